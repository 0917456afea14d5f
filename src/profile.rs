//! Application-level user profile and the landing-view decision.
//!
//! DESIGN
//! ======
//! The profile is distinct from the auth identity: it lives in the `users`
//! table keyed by `uid` (the auth user id) and carries role and lifecycle
//! status. Status is a free-form label in the table; only the exact value
//! `"Deleted"` is meaningful, as the soft-delete marker.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::SessionSnapshot;

pub const DELETED_STATUS: &str = "Deleted";

/// Status assigned to freshly created members.
pub const NEW_MEMBER_STATUS: &str = "In Progress";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Member,
    #[serde(other)]
    Unknown,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Member => "member",
            Self::Unknown => "unknown",
        }
    }
}

/// Lifecycle status. Anything other than the soft-delete marker is active;
/// the original label is kept so it round-trips unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum ProfileStatus {
    Active(Option<String>),
    Deleted,
}

impl ProfileStatus {
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        matches!(self, Self::Deleted)
    }
}

impl From<Option<String>> for ProfileStatus {
    fn from(raw: Option<String>) -> Self {
        match raw {
            Some(s) if s == DELETED_STATUS => Self::Deleted,
            other => Self::Active(other),
        }
    }
}

impl From<ProfileStatus> for Option<String> {
    fn from(status: ProfileStatus) -> Self {
        match status {
            ProfileStatus::Deleted => Some(DELETED_STATUS.to_owned()),
            ProfileStatus::Active(label) => label,
        }
    }
}

/// Row from the `users` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Row id, used by admin actions.
    pub id: Uuid,
    /// Auth user id, used for session lookups.
    pub uid: Uuid,
    pub email: String,
    pub name: String,
    pub role: Role,
    #[serde(default = "active_status")]
    pub status: ProfileStatus,
    #[serde(default)]
    pub join_date: Option<String>,
}

fn active_status() -> ProfileStatus {
    ProfileStatus::Active(None)
}

impl UserProfile {
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Case-insensitive match against name or email.
    #[must_use]
    pub fn matches_search(&self, term: &str) -> bool {
        let term = term.trim().to_lowercase();
        term.is_empty() || self.name.to_lowercase().contains(&term) || self.email.to_lowercase().contains(&term)
    }
}

/// Which view the current browser session belongs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Landing {
    /// Session or profile resolution still in flight.
    Loading,
    Login,
    /// Signed in, but the profile row does not exist yet.
    Pending,
    Admin,
    Member,
}

impl Landing {
    #[must_use]
    pub fn from_snapshot(snapshot: &SessionSnapshot) -> Self {
        if snapshot.loading {
            return Self::Loading;
        }
        if snapshot.error.is_some() || snapshot.user.is_none() {
            return Self::Login;
        }
        match snapshot.profile.as_ref().map(|p| p.role) {
            None => Self::Pending,
            Some(Role::Admin) => Self::Admin,
            Some(Role::Member) => Self::Member,
            Some(Role::Unknown) => {
                tracing::warn!("profile has unknown role, sending to login");
                Self::Login
            }
        }
    }

    /// Path of the view, if this landing has one.
    #[must_use]
    pub fn path(self) -> Option<&'static str> {
        match self {
            Self::Login => Some("/login"),
            Self::Admin => Some("/admin"),
            Self::Member => Some("/member"),
            Self::Loading | Self::Pending => None,
        }
    }
}

#[cfg(test)]
#[path = "profile_test.rs"]
mod tests;
