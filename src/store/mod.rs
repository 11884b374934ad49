//! Credential store.
//!
//! Everything above this module talks to persistence through [`CredentialStore`]. Each
//! method is one atomic statement (or one transaction), and failures come back as a
//! [`StoreError`] so callers can tell "not found" apart from "database unreachable".

pub mod memory;
pub mod models;
pub mod postgres;

pub use memory::MemoryStore;
pub use models::{
    AccessTokenRecord, AuthEvent, AuthorizationCode, Client, ProfileUpdate, User, UserCredential,
    UserGrants,
};
pub use postgres::PgStore;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("record already exists")]
    Conflict,
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
    #[error("stored record is corrupt: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if matches!(err, sqlx::Error::RowNotFound) {
            return Self::NotFound;
        }
        if is_unique_violation(&err) {
            return Self::Conflict;
        }
        match err {
            sqlx::Error::Decode(_) | sqlx::Error::ColumnDecode { .. } => {
                Self::Corrupt(err.to_string())
            }
            err => Self::Database(err),
        }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Liveness check used by `/health`.
    async fn ping(&self) -> StoreResult<()>;

    // users

    /// Insert a new user. `Conflict` when the email is taken within the platform.
    async fn register_user(&self, user: &User) -> StoreResult<()>;
    async fn get_user(&self, id: Uuid) -> StoreResult<User>;
    async fn find_user_by_email(&self, platform: &str, email: &str) -> StoreResult<User>;
    async fn delete_user(&self, id: Uuid) -> StoreResult<()>;
    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> StoreResult<()>;
    async fn update_password(&self, id: Uuid, password_hash: &str) -> StoreResult<()>;
    async fn update_totp_pending(&self, id: Uuid, secret: &str, expires_at: i64)
        -> StoreResult<()>;
    /// Promote `secret` to the current TOTP secret and clear the pending one.
    async fn enable_totp(&self, id: Uuid, secret: &str) -> StoreResult<()>;
    async fn disable_totp(&self, id: Uuid) -> StoreResult<()>;
    async fn update_webauthn_session(&self, id: Uuid, session: Option<&str>) -> StoreResult<()>;
    async fn enable_webauthn(&self, id: Uuid) -> StoreResult<()>;
    async fn rotate_signing_secret(&self, id: Uuid, secret: &str) -> StoreResult<()>;

    // ledger

    async fn record_event(&self, event: &AuthEvent) -> StoreResult<()>;
    async fn get_event(&self, id: Uuid) -> StoreResult<AuthEvent>;
    /// Set `consumed_at` if still unset. `NotFound` when the event is absent or
    /// already claimed, so at most one caller ever wins.
    async fn claim_event(&self, id: Uuid, now: i64) -> StoreResult<AuthEvent>;

    // webauthn

    async fn save_credential(&self, credential: &UserCredential) -> StoreResult<()>;
    async fn list_credentials(&self, user_id: Uuid) -> StoreResult<Vec<UserCredential>>;
    async fn update_credential(&self, id: Uuid, credential: &str) -> StoreResult<()>;

    // oauth2

    async fn register_client(&self, client: &Client) -> StoreResult<()>;
    async fn get_client(&self, id: &str) -> StoreResult<Client>;
    async fn upsert_grants(&self, grants: &UserGrants) -> StoreResult<()>;
    async fn get_grants(&self, user_id: Uuid, client_id: &str) -> StoreResult<UserGrants>;
    async fn save_authorization_code(&self, code: &AuthorizationCode) -> StoreResult<()>;
    /// Remove and return the code in one step. A second call for the same code is `NotFound`.
    async fn consume_authorization_code(
        &self,
        code: &str,
        client_id: &str,
    ) -> StoreResult<AuthorizationCode>;
    async fn save_access_token(&self, record: &AccessTokenRecord) -> StoreResult<()>;
    async fn get_access_token(&self, token_id: &str) -> StoreResult<AccessTokenRecord>;
    async fn revoke_access_token(&self, token_id: &str) -> StoreResult<()>;
    /// Remember `nonce` for `client_id`. Returns `false` when it was seen before.
    async fn record_nonce(&self, client_id: &str, nonce: &str, now: i64) -> StoreResult<bool>;
}
