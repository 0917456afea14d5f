//! Third-party form relay: forwards support submissions by email.

use serde::Serialize;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::types::BackendError;

/// Body posted to the relay endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelaySubmission {
    pub name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
    pub user_id: Uuid,
}

#[derive(Clone)]
pub struct FormRelay {
    http: reqwest::Client,
    url: String,
}

impl FormRelay {
    #[must_use]
    pub fn new(http: reqwest::Client, url: String) -> Self {
        Self { http, url }
    }

    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn submit(&self, submission: &RelaySubmission) -> Result<(), BackendError> {
        let response = self
            .http
            .post(&self.url)
            .header("Accept", "application/json")
            .json(submission)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Request(format!("form relay returned {status}")));
        }
        Ok(())
    }

    /// Fire-and-forget submit. Failures are logged, never surfaced.
    pub fn spawn_submit(&self, submission: RelaySubmission) -> JoinHandle<()> {
        let relay = self.clone();
        tokio::spawn(async move {
            match relay.submit(&submission).await {
                Ok(()) => tracing::debug!(user_id = %submission.user_id, "support form relayed"),
                Err(e) => tracing::warn!(error = %e, user_id = %submission.user_id, "support form relay failed"),
            }
        })
    }
}

#[cfg(test)]
#[path = "relay_test.rs"]
mod tests;
