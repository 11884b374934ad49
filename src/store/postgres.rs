use super::{
    AccessTokenRecord, AuthEvent, AuthorizationCode, Client, CredentialStore, ProfileUpdate,
    StoreError, StoreResult, User, UserCredential, UserGrants,
};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use sqlx::{postgres::PgQueryResult, PgPool};
use tracing::{info_span, Instrument, Span};
use uuid::Uuid;

const SCHEMA: &str = include_str!("../../sql/schema.sql");

const USER_COLUMNS: &str = "id, platform, email, password_hash, first_name, last_name, created_at, \
    totp_enabled, totp_secret, totp_pending_secret, totp_pending_expires_at, \
    webauthn_enabled, webauthn_session, signing_secret";

const EVENT_COLUMNS: &str =
    "id, user_id, name, created_at, ip_address, user_agent, purpose, expires_at, consumed_at";

fn db_span(operation: &'static str, statement: &str) -> Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn affected(result: &PgQueryResult) -> StoreResult<()> {
    if result.rows_affected() == 0 {
        Err(StoreError::NotFound)
    } else {
        Ok(())
    }
}

/// Postgres-backed store on a shared `sqlx` pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create missing tables. Every statement is `IF NOT EXISTS`.
    ///
    /// # Errors
    /// Returns an error if a statement fails.
    pub async fn apply_schema(&self) -> StoreResult<()> {
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement)
                .execute(&self.pool)
                .instrument(db_span("DDL", statement))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn ping(&self) -> StoreResult<()> {
        let query = "SELECT 1";
        sqlx::query(query)
            .execute(&self.pool)
            .instrument(db_span("SELECT", query))
            .await?;
        Ok(())
    }

    async fn register_user(&self, user: &User) -> StoreResult<()> {
        let query = format!(
            "INSERT INTO users ({USER_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
        );
        sqlx::query(&query)
            .bind(user.id)
            .bind(&user.platform)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(user.created_at)
            .bind(user.totp_enabled)
            .bind(user.totp_secret.as_deref())
            .bind(user.totp_pending_secret.as_deref())
            .bind(user.totp_pending_expires_at)
            .bind(user.webauthn_enabled)
            .bind(user.webauthn_session.as_deref())
            .bind(user.signing_secret.expose_secret())
            .execute(&self.pool)
            .instrument(db_span("INSERT", &query))
            .await?;
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<User> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_one(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await?;
        Ok(user)
    }

    async fn find_user_by_email(&self, platform: &str, email: &str) -> StoreResult<User> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE platform = $1 AND email = $2");
        let user = sqlx::query_as::<_, User>(&query)
            .bind(platform)
            .bind(email)
            .fetch_one(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await?;
        Ok(user)
    }

    async fn delete_user(&self, id: Uuid) -> StoreResult<()> {
        let query = "DELETE FROM users WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await?;
        affected(&result)
    }

    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> StoreResult<()> {
        let query = "UPDATE users SET email = COALESCE($2, email), \
             first_name = COALESCE($3, first_name), last_name = COALESCE($4, last_name) \
             WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .bind(update.email.as_deref())
            .bind(update.first_name.as_deref())
            .bind(update.last_name.as_deref())
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await?;
        affected(&result)
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> StoreResult<()> {
        let query = "UPDATE users SET password_hash = $2 WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .bind(password_hash)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await?;
        affected(&result)
    }

    async fn update_totp_pending(
        &self,
        id: Uuid,
        secret: &str,
        expires_at: i64,
    ) -> StoreResult<()> {
        let query =
            "UPDATE users SET totp_pending_secret = $2, totp_pending_expires_at = $3 WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .bind(secret)
            .bind(expires_at)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await?;
        affected(&result)
    }

    async fn enable_totp(&self, id: Uuid, secret: &str) -> StoreResult<()> {
        let query = "UPDATE users SET totp_enabled = TRUE, totp_secret = $2, \
             totp_pending_secret = NULL, totp_pending_expires_at = NULL WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .bind(secret)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await?;
        affected(&result)
    }

    async fn disable_totp(&self, id: Uuid) -> StoreResult<()> {
        let query = "UPDATE users SET totp_enabled = FALSE, totp_secret = NULL, \
             totp_pending_secret = NULL, totp_pending_expires_at = NULL WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await?;
        affected(&result)
    }

    async fn update_webauthn_session(&self, id: Uuid, session: Option<&str>) -> StoreResult<()> {
        let query = "UPDATE users SET webauthn_session = $2 WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .bind(session)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await?;
        affected(&result)
    }

    async fn enable_webauthn(&self, id: Uuid) -> StoreResult<()> {
        let query =
            "UPDATE users SET webauthn_enabled = TRUE, webauthn_session = NULL WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await?;
        affected(&result)
    }

    async fn rotate_signing_secret(&self, id: Uuid, secret: &str) -> StoreResult<()> {
        let query = "UPDATE users SET signing_secret = $2 WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .bind(secret)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await?;
        affected(&result)
    }

    async fn record_event(&self, event: &AuthEvent) -> StoreResult<()> {
        let query = format!(
            "INSERT INTO auth_event ({EVENT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        );
        sqlx::query(&query)
            .bind(event.id)
            .bind(event.user_id)
            .bind(&event.name)
            .bind(event.created_at)
            .bind(&event.ip_address)
            .bind(&event.user_agent)
            .bind(event.purpose.map(|p| p.as_str()))
            .bind(event.expires_at)
            .bind(event.consumed_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", &query))
            .await?;
        Ok(())
    }

    async fn get_event(&self, id: Uuid) -> StoreResult<AuthEvent> {
        let query = format!("SELECT {EVENT_COLUMNS} FROM auth_event WHERE id = $1");
        let event = sqlx::query_as::<_, AuthEvent>(&query)
            .bind(id)
            .fetch_one(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await?;
        Ok(event)
    }

    async fn claim_event(&self, id: Uuid, now: i64) -> StoreResult<AuthEvent> {
        let query = format!(
            "UPDATE auth_event SET consumed_at = $2 \
             WHERE id = $1 AND consumed_at IS NULL RETURNING {EVENT_COLUMNS}"
        );
        let event = sqlx::query_as::<_, AuthEvent>(&query)
            .bind(id)
            .bind(now)
            .fetch_one(&self.pool)
            .instrument(db_span("UPDATE", &query))
            .await?;
        Ok(event)
    }

    async fn save_credential(&self, credential: &UserCredential) -> StoreResult<()> {
        let query = "INSERT INTO user_credential (id, user_id, credential, created_at) \
             VALUES ($1, $2, $3, $4)";
        sqlx::query(query)
            .bind(credential.id)
            .bind(credential.user_id)
            .bind(&credential.credential)
            .bind(credential.created_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await?;
        Ok(())
    }

    async fn list_credentials(&self, user_id: Uuid) -> StoreResult<Vec<UserCredential>> {
        let query = "SELECT id, user_id, credential, created_at FROM user_credential \
             WHERE user_id = $1 ORDER BY created_at";
        let credentials = sqlx::query_as::<_, UserCredential>(query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await?;
        Ok(credentials)
    }

    async fn update_credential(&self, id: Uuid, credential: &str) -> StoreResult<()> {
        let query = "UPDATE user_credential SET credential = $2 WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .bind(credential)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await?;
        affected(&result)
    }

    async fn register_client(&self, client: &Client) -> StoreResult<()> {
        let query =
            "INSERT INTO clients (id, name, secret_hash, redirect_uri) VALUES ($1, $2, $3, $4)";
        sqlx::query(query)
            .bind(&client.id)
            .bind(&client.name)
            .bind(&client.secret_hash)
            .bind(&client.redirect_uri)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await?;
        Ok(())
    }

    async fn get_client(&self, id: &str) -> StoreResult<Client> {
        let query = "SELECT id, name, secret_hash, redirect_uri FROM clients WHERE id = $1";
        let client = sqlx::query_as::<_, Client>(query)
            .bind(id)
            .fetch_one(&self.pool)
            .instrument(db_span("SELECT", query))
            .await?;
        Ok(client)
    }

    async fn upsert_grants(&self, grants: &UserGrants) -> StoreResult<()> {
        let query = "INSERT INTO user_grants (user_id, client_id, scope) VALUES ($1, $2, $3) \
             ON CONFLICT (user_id, client_id) DO UPDATE SET scope = EXCLUDED.scope";
        sqlx::query(query)
            .bind(grants.user_id)
            .bind(&grants.client_id)
            .bind(&grants.scope)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await?;
        Ok(())
    }

    async fn get_grants(&self, user_id: Uuid, client_id: &str) -> StoreResult<UserGrants> {
        let query =
            "SELECT user_id, client_id, scope FROM user_grants WHERE user_id = $1 AND client_id = $2";
        let grants = sqlx::query_as::<_, UserGrants>(query)
            .bind(user_id)
            .bind(client_id)
            .fetch_one(&self.pool)
            .instrument(db_span("SELECT", query))
            .await?;
        Ok(grants)
    }

    async fn save_authorization_code(&self, code: &AuthorizationCode) -> StoreResult<()> {
        let query = "INSERT INTO authorization_code \
             (code, client_id, user_id, redirect_uri, created_at) VALUES ($1, $2, $3, $4, $5)";
        sqlx::query(query)
            .bind(&code.code)
            .bind(&code.client_id)
            .bind(code.user_id)
            .bind(&code.redirect_uri)
            .bind(code.created_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await?;
        Ok(())
    }

    async fn consume_authorization_code(
        &self,
        code: &str,
        client_id: &str,
    ) -> StoreResult<AuthorizationCode> {
        let query = "DELETE FROM authorization_code WHERE code = $1 AND client_id = $2 \
             RETURNING code, client_id, user_id, redirect_uri, created_at";
        let code = sqlx::query_as::<_, AuthorizationCode>(query)
            .bind(code)
            .bind(client_id)
            .fetch_one(&self.pool)
            .instrument(db_span("DELETE", query))
            .await?;
        Ok(code)
    }

    async fn save_access_token(&self, record: &AccessTokenRecord) -> StoreResult<()> {
        let query = "INSERT INTO access_token (token_id, user_id, client_id, token, created_at) \
             VALUES ($1, $2, $3, $4, $5)";
        sqlx::query(query)
            .bind(&record.token_id)
            .bind(record.user_id)
            .bind(&record.client_id)
            .bind(&record.token)
            .bind(record.created_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await?;
        Ok(())
    }

    async fn get_access_token(&self, token_id: &str) -> StoreResult<AccessTokenRecord> {
        let query = "SELECT token_id, user_id, client_id, token, created_at FROM access_token \
             WHERE token_id = $1";
        let record = sqlx::query_as::<_, AccessTokenRecord>(query)
            .bind(token_id)
            .fetch_one(&self.pool)
            .instrument(db_span("SELECT", query))
            .await?;
        Ok(record)
    }

    async fn revoke_access_token(&self, token_id: &str) -> StoreResult<()> {
        let query = "DELETE FROM access_token WHERE token_id = $1";
        let result = sqlx::query(query)
            .bind(token_id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await?;
        affected(&result)
    }

    async fn record_nonce(&self, client_id: &str, nonce: &str, now: i64) -> StoreResult<bool> {
        let query = "INSERT INTO oauth2_nonce (client_id, nonce, created_at) VALUES ($1, $2, $3) \
             ON CONFLICT (client_id, nonce) DO NOTHING";
        let result = sqlx::query(query)
            .bind(client_id)
            .bind(nonce)
            .bind(now)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await?;
        Ok(result.rows_affected() == 1)
    }
}
