//! Auth event ledger and continuation tickets.
//!
//! Every decision in a sign-in writes an [`AuthEvent`]. Events that carry a
//! [`Purpose`] are also tickets: their id, base64url-encoded, goes back to the client
//! as `signin_session_token` and stands for "this much authentication already
//! happened". [`Ticket::check`] is the only place that decides whether a ticket is
//! still good for a given purpose.

use crate::store::{AuthEvent, CredentialStore, StoreError};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

pub const SIGNUP: &str = "signup";
pub const LOGIN_SUCCESSFUL: &str = "login_successful";
pub const TOTP_REQUIRED: &str = "totp_required";
pub const WEBAUTHN_REQUIRED: &str = "webauthn_required";
pub const SEC_AUTH_SUCCESS: &str = "sec_auth_success";
pub const TOKEN_REFRESHED: &str = "token_refreshed";
pub const SECRET_ROTATED: &str = "signing_secret_rotated";
pub const TOTP_ENABLED: &str = "totp_enabled";
pub const WEBAUTHN_REGISTERED: &str = "webauthn_registered";

/// What a ticket may be redeemed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    /// Password accepted, TOTP code outstanding.
    AwaitTotp,
    /// Password accepted, WebAuthn ceremony outstanding.
    AwaitWebauthn,
    /// WebAuthn ceremony completed; redeemable by sign-in as `webauthn_session_token`.
    WebauthnProof,
}

impl Purpose {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AwaitTotp => "await_totp",
            Self::AwaitWebauthn => "await_webauthn",
            Self::WebauthnProof => "webauthn_proof",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "await_totp" => Some(Self::AwaitTotp),
            "await_webauthn" => Some(Self::AwaitWebauthn),
            "webauthn_proof" => Some(Self::WebauthnProof),
            _ => None,
        }
    }
}

/// Network origin of a request, as far as the proxy headers tell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Origin {
    pub ip_address: String,
    pub user_agent: String,
}

#[derive(Debug, Error)]
pub enum TicketError {
    #[error("ticket is not a valid encoded id")]
    Malformed,
    #[error("ticket does not exist")]
    Unknown,
    #[error("ticket was issued for another purpose")]
    WrongPurpose,
    #[error("ticket expired")]
    Expired,
    #[error("ticket was already used")]
    AlreadyUsed,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub purpose: Option<Purpose>,
    pub issued_at: i64,
    pub expires_at: i64,
    pub consumed_at: Option<i64>,
}

impl From<&AuthEvent> for Ticket {
    fn from(event: &AuthEvent) -> Self {
        Self {
            id: event.id,
            user_id: event.user_id,
            purpose: event.purpose,
            issued_at: event.created_at,
            // An event recorded without a purpose was never meant to be redeemed.
            expires_at: event.expires_at.unwrap_or(event.created_at),
            consumed_at: event.consumed_at,
        }
    }
}

impl Ticket {
    /// Valid for `purpose` at `now`: right purpose, not expired, not used.
    ///
    /// # Errors
    /// Returns the first rule the ticket breaks.
    pub fn check(&self, purpose: Purpose, now: i64) -> Result<(), TicketError> {
        if self.purpose != Some(purpose) {
            return Err(TicketError::WrongPurpose);
        }
        if now >= self.expires_at {
            return Err(TicketError::Expired);
        }
        if self.consumed_at.is_some() {
            return Err(TicketError::AlreadyUsed);
        }
        Ok(())
    }

    /// Opaque string handed to the client.
    #[must_use]
    pub fn token(&self) -> String {
        encode_ticket(self.id)
    }
}

#[must_use]
pub fn encode_ticket(id: Uuid) -> String {
    URL_SAFE_NO_PAD.encode(id.to_string())
}

/// # Errors
/// `Malformed` when the input is not a base64url-encoded UUID.
pub fn decode_ticket(token: &str) -> Result<Uuid, TicketError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(token.trim())
        .map_err(|_| TicketError::Malformed)?;
    let text = String::from_utf8(bytes).map_err(|_| TicketError::Malformed)?;
    Uuid::parse_str(&text).map_err(|_| TicketError::Malformed)
}

fn event(user_id: Option<Uuid>, name: &str, origin: &Origin, now: i64) -> AuthEvent {
    AuthEvent {
        id: Uuid::new_v4(),
        user_id,
        name: name.to_string(),
        created_at: now,
        ip_address: origin.ip_address.clone(),
        user_agent: origin.user_agent.clone(),
        purpose: None,
        expires_at: None,
        consumed_at: None,
    }
}

/// Append an audit event.
///
/// # Errors
/// Returns the store error if the write fails.
pub async fn record(
    store: &dyn CredentialStore,
    user_id: Option<Uuid>,
    name: &str,
    origin: &Origin,
    now: i64,
) -> Result<AuthEvent, StoreError> {
    let event = event(user_id, name, origin, now);
    store.record_event(&event).await?;
    Ok(event)
}

/// Append an audit event; a failed write is logged and otherwise ignored.
pub async fn record_best_effort(
    store: &dyn CredentialStore,
    user_id: Option<Uuid>,
    name: &str,
    origin: &Origin,
    now: i64,
) {
    if let Err(err) = record(store, user_id, name, origin, now).await {
        error!("Failed to record auth event {name}: {err}");
    }
}

/// Persist an event that doubles as a ticket for `purpose`, valid for `ttl_seconds`.
///
/// # Errors
/// Returns the store error if the write fails. The caller cannot answer without it.
pub async fn issue_ticket(
    store: &dyn CredentialStore,
    user_id: Uuid,
    name: &str,
    purpose: Purpose,
    origin: &Origin,
    now: i64,
    ttl_seconds: i64,
) -> Result<Ticket, StoreError> {
    let mut event = event(Some(user_id), name, origin, now);
    event.purpose = Some(purpose);
    event.expires_at = Some(now.saturating_add(ttl_seconds));
    store.record_event(&event).await?;
    Ok(Ticket::from(&event))
}

/// Look a ticket up and check it without using it up.
///
/// # Errors
/// Any [`TicketError`].
pub async fn inspect(
    store: &dyn CredentialStore,
    token: &str,
    purpose: Purpose,
    now: i64,
) -> Result<Ticket, TicketError> {
    let id = decode_ticket(token)?;
    let event = match store.get_event(id).await {
        Ok(event) => event,
        Err(StoreError::NotFound) => return Err(TicketError::Unknown),
        Err(err) => return Err(err.into()),
    };
    let ticket = Ticket::from(&event);
    ticket.check(purpose, now)?;
    Ok(ticket)
}

/// Check a ticket and atomically mark it used. Of two concurrent redeemers exactly
/// one succeeds; the other sees `AlreadyUsed`.
///
/// # Errors
/// Any [`TicketError`].
pub async fn redeem(
    store: &dyn CredentialStore,
    token: &str,
    purpose: Purpose,
    now: i64,
) -> Result<Ticket, TicketError> {
    let ticket = inspect(store, token, purpose, now).await?;
    match store.claim_event(ticket.id, now).await {
        Ok(event) => Ok(Ticket::from(&event)),
        Err(StoreError::NotFound) => Err(TicketError::AlreadyUsed),
        Err(err) => Err(err.into()),
    }
}
