use crate::ledger::Purpose;
use secrecy::{ExposeSecret, SecretString};
use sqlx::{postgres::PgRow, FromRow, Row};
use uuid::Uuid;

/// Identity record. Timestamps are unix seconds.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub platform: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub created_at: i64,
    pub totp_enabled: bool,
    pub totp_secret: Option<String>,
    pub totp_pending_secret: Option<String>,
    pub totp_pending_expires_at: Option<i64>,
    pub webauthn_enabled: bool,
    pub webauthn_session: Option<String>,
    pub signing_secret: SecretString,
}

impl User {
    #[must_use]
    pub fn signing_key(&self) -> &[u8] {
        self.signing_secret.expose_secret().as_bytes()
    }
}

impl<'r> FromRow<'r, PgRow> for User {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let signing_secret: String = row.try_get("signing_secret")?;
        Ok(Self {
            id: row.try_get("id")?,
            platform: row.try_get("platform")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            created_at: row.try_get("created_at")?,
            totp_enabled: row.try_get("totp_enabled")?,
            totp_secret: row.try_get("totp_secret")?,
            totp_pending_secret: row.try_get("totp_pending_secret")?,
            totp_pending_expires_at: row.try_get("totp_pending_expires_at")?,
            webauthn_enabled: row.try_get("webauthn_enabled")?,
            webauthn_session: row.try_get("webauthn_session")?,
            signing_secret: SecretString::from(signing_secret),
        })
    }
}

/// Fields a profile update may touch. `None` leaves the column alone.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl ProfileUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.first_name.is_none() && self.last_name.is_none()
    }
}

/// Ledger entry. Rows with a `purpose` double as continuation tickets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEvent {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub name: String,
    pub created_at: i64,
    pub ip_address: String,
    pub user_agent: String,
    pub purpose: Option<Purpose>,
    pub expires_at: Option<i64>,
    pub consumed_at: Option<i64>,
}

impl<'r> FromRow<'r, PgRow> for AuthEvent {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let purpose: Option<String> = row.try_get("purpose")?;
        let purpose = purpose
            .map(|value| {
                Purpose::parse(&value).ok_or_else(|| {
                    sqlx::Error::Decode(Box::new(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("invalid auth_event.purpose value: {value}"),
                    )))
                })
            })
            .transpose()?;
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            name: row.try_get("name")?,
            created_at: row.try_get("created_at")?,
            ip_address: row.try_get("ip_address")?,
            user_agent: row.try_get("user_agent")?,
            purpose,
            expires_at: row.try_get("expires_at")?,
            consumed_at: row.try_get("consumed_at")?,
        })
    }
}

/// Serialized WebAuthn security key owned by one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserCredential {
    pub id: Uuid,
    pub user_id: Uuid,
    pub credential: String,
    pub created_at: i64,
}

impl<'r> FromRow<'r, PgRow> for UserCredential {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            credential: row.try_get("credential")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Registered OAuth2 client. The secret is an argon2 PHC string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    pub id: String,
    pub name: String,
    pub secret_hash: String,
    pub redirect_uri: String,
}

impl<'r> FromRow<'r, PgRow> for Client {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            secret_hash: row.try_get("secret_hash")?,
            redirect_uri: row.try_get("redirect_uri")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserGrants {
    pub user_id: Uuid,
    pub client_id: String,
    pub scope: String,
}

impl<'r> FromRow<'r, PgRow> for UserGrants {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            user_id: row.try_get("user_id")?,
            client_id: row.try_get("client_id")?,
            scope: row.try_get("scope")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationCode {
    pub code: String,
    pub client_id: String,
    pub user_id: Uuid,
    pub redirect_uri: String,
    pub created_at: i64,
}

impl<'r> FromRow<'r, PgRow> for AuthorizationCode {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            code: row.try_get("code")?,
            client_id: row.try_get("client_id")?,
            user_id: row.try_get("user_id")?,
            redirect_uri: row.try_get("redirect_uri")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Server-side record of a delegated token, keyed by its `jti`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessTokenRecord {
    pub token_id: String,
    pub user_id: Uuid,
    pub client_id: String,
    pub token: String,
    pub created_at: i64,
}

impl<'r> FromRow<'r, PgRow> for AccessTokenRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            token_id: row.try_get("token_id")?,
            user_id: row.try_get("user_id")?,
            client_id: row.try_get("client_id")?,
            token: row.try_get("token")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
