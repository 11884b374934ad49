//! Bearer token validation.
//!
//! Flow Overview: read the bearer token, peek at its unsigned payload to learn the
//! subject, load that subject's signing secret, then verify signature and expiry.
//! Delegated tokens must also still have their server-side row. The resolved
//! [`Principal`] is attached to the request for downstream handlers.

use super::{utils, AuthState};
use crate::{
    error::{error_response, internal_error, AuthReason, ErrorCode, SecurityReason},
    store::{StoreError, User},
    token::{self, Claims},
};
use axum::{
    extract::{Extension, Request},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{debug, error};
use uuid::Uuid;

/// Authenticated user context derived from the bearer token.
#[derive(Clone, Debug)]
pub struct Principal {
    pub user: User,
    pub claims: Claims,
}

impl Principal {
    /// Account management is reserved for the user's own session tokens.
    ///
    /// # Errors
    /// A 403 response when the token was issued to an OAuth2 client.
    pub fn require_session(&self) -> Result<(), Response> {
        if self.claims.is_delegated() {
            debug!(
                user_id = %self.user.id,
                client_id = %self.claims.aud,
                "delegated token refused"
            );
            return Err(error_response(ErrorCode::Security(
                SecurityReason::DelegatedTokenNotAllowed,
            )));
        }
        Ok(())
    }
}

/// Why a request was not authenticated.
#[derive(Debug)]
pub enum Rejection {
    Denied(ErrorCode),
    Internal,
}

impl Rejection {
    fn into_response(self) -> Response {
        match self {
            Self::Denied(code) => error_response(code),
            Self::Internal => internal_error(),
        }
    }
}

const fn denied(reason: AuthReason) -> Rejection {
    Rejection::Denied(ErrorCode::Authentication(reason))
}

/// Validate a bearer token at `now`.
///
/// # Errors
/// `Denied` with the failing reason, or `Internal` when the store is unreachable.
pub async fn authenticate(
    state: &AuthState,
    token: &str,
    now: i64,
) -> Result<Principal, Rejection> {
    let unverified = token::decode_unverified(token)
        .map_err(|_| denied(AuthReason::InvalidOrRevokedToken))?;
    let user_id = Uuid::parse_str(&unverified.sub)
        .map_err(|_| denied(AuthReason::InvalidOrRevokedToken))?;

    let user = match state.store().get_user(user_id).await {
        Ok(user) => user,
        Err(StoreError::NotFound) => return Err(denied(AuthReason::UserUnknown)),
        Err(err) => {
            error!("Failed to load token subject: {err}");
            return Err(Rejection::Internal);
        }
    };

    let claims = token::decode(token, user.signing_key(), now).map_err(|err| {
        debug!("Token rejected: {err}");
        denied(AuthReason::InvalidOrRevokedToken)
    })?;
    if claims.iss != state.config().issuer() {
        return Err(denied(AuthReason::InvalidOrRevokedToken));
    }

    if claims.is_delegated() {
        let jti = claims
            .jti
            .as_deref()
            .ok_or_else(|| denied(AuthReason::InvalidOrRevokedToken))?;
        let record = match state.store().get_access_token(jti).await {
            Ok(record) => record,
            Err(StoreError::NotFound) => return Err(denied(AuthReason::InvalidOrRevokedToken)),
            Err(err) => {
                error!("Failed to load access token: {err}");
                return Err(Rejection::Internal);
            }
        };
        let same_token: bool = record.token.as_bytes().ct_eq(token.as_bytes()).into();
        if record.user_id != user.id || !same_token {
            return Err(denied(AuthReason::InvalidOrRevokedToken));
        }
    }

    Ok(Principal { user, claims })
}

/// Resolve the request's bearer token into a principal.
///
/// # Errors
/// `AuthHeaderMissing` when there is no usable `Authorization` header.
pub async fn require_auth(state: &AuthState, headers: &HeaderMap) -> Result<Principal, Rejection> {
    let token = utils::extract_bearer_token(headers)
        .ok_or_else(|| denied(AuthReason::AuthHeaderMissing))?;
    authenticate(state, token, utils::now()).await
}

/// Middleware for protected routes. Rejected requests never reach the handler.
pub async fn auth_layer(
    Extension(state): Extension<Arc<AuthState>>,
    mut request: Request,
    next: Next,
) -> Response {
    match require_auth(&state, request.headers()).await {
        Ok(principal) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(rejection) => rejection.into_response(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{
        api::handlers::auth::AuthConfig,
        store::{AccessTokenRecord, CredentialStore, MemoryStore},
    };
    use secrecy::SecretString;

    const NOW: i64 = 1_700_000_000;

    async fn state_with_user() -> (AuthState, User) {
        let store = Arc::new(MemoryStore::new());
        let user = User {
            id: Uuid::new_v4(),
            platform: "web".to_string(),
            email: "a@x.com".to_string(),
            password_hash: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            created_at: NOW,
            totp_enabled: false,
            totp_secret: None,
            totp_pending_secret: None,
            totp_pending_expires_at: None,
            webauthn_enabled: false,
            webauthn_session: None,
            signing_secret: SecretString::from("user-secret".to_string()),
        };
        store.register_user(&user).await.unwrap();
        let state = AuthState::new(AuthConfig::new(), store).unwrap();
        (state, user)
    }

    fn code(result: Result<Principal, Rejection>) -> u16 {
        match result {
            Err(Rejection::Denied(code)) => code.code(),
            Err(Rejection::Internal) => 500,
            Ok(_) => 200,
        }
    }

    #[tokio::test]
    async fn session_token_resolves_the_user() -> anyhow::Result<()> {
        let (state, user) = state_with_user().await;
        let (token, _) = token::encode(&user.id.to_string(), user.signing_key(), "custos", 60, NOW)?;
        let principal = authenticate(&state, &token, NOW).await.unwrap();
        assert_eq!(principal.user.id, user.id);
        Ok(())
    }

    #[tokio::test]
    async fn token_signed_by_another_secret_is_rejected() -> anyhow::Result<()> {
        let (state, user) = state_with_user().await;
        let (token, _) = token::encode(&user.id.to_string(), b"someone-else", "custos", 60, NOW)?;
        assert_eq!(code(authenticate(&state, &token, NOW).await), 4920);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_subject_and_foreign_issuer() -> anyhow::Result<()> {
        let (state, user) = state_with_user().await;
        let (token, _) =
            token::encode(&Uuid::new_v4().to_string(), user.signing_key(), "custos", 60, NOW)?;
        assert_eq!(code(authenticate(&state, &token, NOW).await), 4600);

        let (token, _) = token::encode(&user.id.to_string(), user.signing_key(), "other", 60, NOW)?;
        assert_eq!(code(authenticate(&state, &token, NOW).await), 4920);
        Ok(())
    }

    #[tokio::test]
    async fn delegated_token_needs_its_row() -> anyhow::Result<()> {
        let (state, user) = state_with_user().await;
        let claims = Claims::delegated(
            &user.id.to_string(),
            "custos",
            "client-1",
            "read",
            "jti-1",
            NOW,
            60,
        );
        let token = token::encode_claims(&claims, user.signing_key())?;
        assert_eq!(code(authenticate(&state, &token, NOW).await), 4920);

        state
            .store()
            .save_access_token(&AccessTokenRecord {
                token_id: "jti-1".to_string(),
                user_id: user.id,
                client_id: "client-1".to_string(),
                token: token.clone(),
                created_at: NOW,
            })
            .await?;
        assert_eq!(code(authenticate(&state, &token, NOW).await), 200);

        state.store().revoke_access_token("jti-1").await?;
        assert_eq!(code(authenticate(&state, &token, NOW).await), 4920);
        Ok(())
    }

    #[tokio::test]
    async fn missing_header_is_reported() {
        let (state, _) = state_with_user().await;
        let result = require_auth(&state, &HeaderMap::new()).await;
        assert_eq!(code(result), 4910);
    }

    #[tokio::test]
    async fn only_session_tokens_manage_the_account() {
        let (_, user) = state_with_user().await;
        let subject = user.id.to_string();

        let session = Principal {
            user: user.clone(),
            claims: Claims::session(&subject, "custos", NOW, 60),
        };
        assert!(session.require_session().is_ok());

        let delegated = Principal {
            user,
            claims: Claims::delegated(&subject, "custos", "client-1", "read", "jti-1", NOW, 60),
        };
        let response = delegated.require_session().unwrap_err();
        assert_eq!(response.status(), axum::http::StatusCode::FORBIDDEN);
    }
}
