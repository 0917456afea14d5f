//! Data API client (PostgREST-compatible `/rest/v1` endpoints).
//!
//! DESIGN
//! ======
//! `Query` is a tiny builder over PostgREST's URL filter grammar
//! (`col=eq.value`, `order=col.asc`, ...). `RestClient` executes queries
//! with the caller's bearer token so row-level security applies to whoever
//! is acting. `PostgrestStore` is the [`DataStore`] built from the two.

use std::fmt::Display;

use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use super::types::{BackendError, NewProfile, NewTicket, query_error};
use super::DataStore;
use crate::config::BackendConfig;
use crate::profile::{DELETED_STATUS, ProfileStatus, Role, UserProfile};

const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

pub const USERS_TABLE: &str = "users";
pub const TICKETS_TABLE: &str = "support_tickets";
pub const PROFILE_COLUMNS: &str = "id,uid,email,name,role,status,join_date";

// =============================================================================
// QUERY BUILDER
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    table: &'static str,
    params: Vec<(String, String)>,
}

impl Query {
    #[must_use]
    pub fn new(table: &'static str) -> Self {
        Self { table, params: Vec::new() }
    }

    #[must_use]
    pub fn select(self, columns: &str) -> Self {
        self.param("select", columns.to_owned())
    }

    #[must_use]
    pub fn eq(self, column: &str, value: impl Display) -> Self {
        self.param(column, format!("eq.{value}"))
    }

    #[must_use]
    pub fn neq(self, column: &str, value: impl Display) -> Self {
        self.param(column, format!("neq.{value}"))
    }

    #[must_use]
    pub fn order(self, column: &str, ascending: bool) -> Self {
        let dir = if ascending { "asc" } else { "desc" };
        self.param("order", format!("{column}.{dir}"))
    }

    #[must_use]
    pub fn limit(self, n: usize) -> Self {
        self.param("limit", n.to_string())
    }

    fn param(mut self, key: &str, value: String) -> Self {
        self.params.push((key.to_owned(), value));
        self
    }

    #[must_use]
    pub fn table(&self) -> &'static str {
        self.table
    }

    #[must_use]
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }
}

pub(crate) fn profile_by_uid(uid: Uuid) -> Query {
    Query::new(USERS_TABLE).select(PROFILE_COLUMNS).eq("uid", uid)
}

pub(crate) fn profile_by_email(email: &str) -> Query {
    Query::new(USERS_TABLE).select(PROFILE_COLUMNS).eq("email", email).limit(1)
}

pub(crate) fn active_members() -> Query {
    Query::new(USERS_TABLE)
        .select(PROFILE_COLUMNS)
        .eq("role", Role::Member.as_str())
        .neq("status", DELETED_STATUS)
        .order("name", true)
}

pub(crate) fn row_by_id(id: Uuid) -> Query {
    Query::new(USERS_TABLE).select(PROFILE_COLUMNS).eq("id", id)
}

// =============================================================================
// CLIENT
// =============================================================================

#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
}

impl RestClient {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        Ok(Self {
            http: super::gotrue::build_http(config)?,
            base_url: format!("{}/rest/v1", config.url),
            anon_key: config.anon_key.clone(),
        })
    }

    fn request(&self, method: reqwest::Method, table: &str, bearer: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}/{table}", self.base_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
    }

    async fn send(req: reqwest::RequestBuilder) -> Result<String, BackendError> {
        let response = req.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        if !(200..300).contains(&status) {
            return Err(query_error(status, &text));
        }
        Ok(text)
    }

    /// # Errors
    ///
    /// Returns an error on transport failure, an error response, or a body
    /// that does not decode as `Vec<T>`.
    pub async fn select<T: DeserializeOwned>(&self, bearer: &str, query: &Query) -> Result<Vec<T>, BackendError> {
        let req = self
            .request(reqwest::Method::GET, query.table(), bearer)
            .query(query.params());
        let text = Self::send(req).await?;
        decode(&text)
    }

    /// Exactly-one read. Zero rows is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, any error response other than
    /// "not found", or an undecodable body.
    pub async fn select_single<T: DeserializeOwned>(
        &self,
        bearer: &str,
        query: &Query,
    ) -> Result<Option<T>, BackendError> {
        let req = self
            .request(reqwest::Method::GET, query.table(), bearer)
            .header("Accept", SINGLE_OBJECT)
            .query(query.params());
        match Self::send(req).await {
            Ok(text) => decode(&text).map(Some),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// # Errors
    ///
    /// Returns an error on transport failure or an error response.
    pub async fn insert<B: Serialize + Sync>(&self, bearer: &str, table: &str, row: &B) -> Result<(), BackendError> {
        let req = self
            .request(reqwest::Method::POST, table, bearer)
            .header("Prefer", "return=minimal")
            .json(row);
        Self::send(req).await.map(|_| ())
    }

    /// Patch rows matching `query`'s filters and return them.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, an error response, or an
    /// undecodable body.
    pub async fn update<B, T>(&self, bearer: &str, query: &Query, patch: &B) -> Result<Vec<T>, BackendError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let req = self
            .request(reqwest::Method::PATCH, query.table(), bearer)
            .header("Prefer", "return=representation")
            .query(query.params())
            .json(patch);
        let text = Self::send(req).await?;
        decode(&text)
    }
}

fn decode<T: DeserializeOwned>(text: &str) -> Result<T, BackendError> {
    serde_json::from_str(text).map_err(|e| BackendError::Decode(e.to_string()))
}

// =============================================================================
// STORE
// =============================================================================

pub struct PostgrestStore {
    rest: RestClient,
}

impl PostgrestStore {
    #[must_use]
    pub fn new(rest: RestClient) -> Self {
        Self { rest }
    }
}

#[async_trait::async_trait]
impl DataStore for PostgrestStore {
    async fn fetch_profile(&self, bearer: &str, uid: Uuid) -> Result<Option<UserProfile>, BackendError> {
        self.rest.select_single(bearer, &profile_by_uid(uid)).await
    }

    async fn find_profile_by_email(&self, bearer: &str, email: &str) -> Result<Option<UserProfile>, BackendError> {
        let rows: Vec<UserProfile> = self.rest.select(bearer, &profile_by_email(email)).await?;
        Ok(rows.into_iter().next())
    }

    async fn list_members(&self, bearer: &str) -> Result<Vec<UserProfile>, BackendError> {
        self.rest.select(bearer, &active_members()).await
    }

    async fn insert_profile(&self, bearer: &str, profile: &NewProfile) -> Result<(), BackendError> {
        self.rest.insert(bearer, USERS_TABLE, profile).await
    }

    async fn update_status(
        &self,
        bearer: &str,
        id: Uuid,
        status: &ProfileStatus,
    ) -> Result<Vec<UserProfile>, BackendError> {
        let patch = serde_json::json!({ "status": status });
        self.rest.update(bearer, &row_by_id(id), &patch).await
    }

    async fn update_role(&self, bearer: &str, id: Uuid, role: Role) -> Result<Vec<UserProfile>, BackendError> {
        let patch = serde_json::json!({ "role": role });
        self.rest.update(bearer, &row_by_id(id), &patch).await
    }

    async fn insert_ticket(&self, bearer: &str, ticket: &NewTicket) -> Result<(), BackendError> {
        self.rest.insert(bearer, TICKETS_TABLE, ticket).await
    }
}

#[cfg(test)]
#[path = "rest_test.rs"]
mod tests;
