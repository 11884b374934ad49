//! Security key ceremonies.
//!
//! Registration runs behind the bearer token. Login runs mid sign-in: the caller
//! holds only the continuation ticket from the 422 answer and passes it in the
//! `AuthToken` header. A successful login yields a proof ticket that sign-in
//! accepts as `webauthn_session_token`.

use super::{
    auth::{utils, AuthState, Principal},
    missing_payload,
};
use crate::{
    error::{error_response, internal_error, AuthReason, ErrorCode},
    ledger::{self, Purpose},
    signin,
    store::{StoreError, User},
    webauthn::SecurityKeyError,
};
use axum::{
    extract::Extension,
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, instrument};
use utoipa::ToSchema;
use webauthn_rs::prelude::{PublicKeyCredential, RegisterPublicKeyCredential};

/// Header carrying the continuation ticket during a login ceremony.
pub const AUTH_TOKEN_HEADER: &str = "authtoken";

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginProof {
    pub result: String,
    /// The continuation ticket the ceremony ran under.
    pub auth_token: String,
    /// Proof of the ceremony, submitted to `/signin` as `webauthn_session_token`.
    pub sec_auth_token: String,
}

fn denied(reason: AuthReason) -> Response {
    error_response(ErrorCode::Authentication(reason))
}

/// Resolve the ticket in the `AuthToken` header to the user signing in.
async fn ticket_holder(state: &AuthState, headers: &HeaderMap) -> Result<(String, User), Response> {
    let ticket = headers
        .get(AUTH_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| denied(AuthReason::SigninSessionTokenDecodingFailed))?;

    let inspected =
        match ledger::inspect(state.store(), ticket, Purpose::AwaitWebauthn, utils::now()).await {
            Ok(inspected) => inspected,
            Err(err) => {
                return Err(match signin::ticket_reason(err) {
                    Ok(reason) => denied(reason),
                    Err(err) => {
                        error!("Failed to load continuation ticket: {err}");
                        internal_error()
                    }
                });
            }
        };
    let user_id = inspected
        .user_id
        .ok_or_else(|| denied(AuthReason::SigninSessionTokenDecodingFailed))?;

    match state.store().get_user(user_id).await {
        Ok(user) => Ok((ticket.to_string(), user)),
        Err(StoreError::NotFound) => Err(denied(AuthReason::UserUnknown)),
        Err(err) => {
            error!("Failed to load user: {err}");
            Err(internal_error())
        }
    }
}

/// Faults inside a ceremony: the caller's mistakes are 4xx, the rest 500.
fn ceremony_failure(err: &SecurityKeyError, reason: AuthReason) -> Response {
    match err {
        SecurityKeyError::Webauthn(_) | SecurityKeyError::NoSession | SecurityKeyError::NoCredentials => {
            debug!("WebAuthn ceremony rejected: {err}");
            denied(reason)
        }
        SecurityKeyError::Origin(_) | SecurityKeyError::Json(_) | SecurityKeyError::Store(_) => {
            error!("WebAuthn ceremony failed: {err}");
            internal_error()
        }
    }
}

#[utoipa::path(
    post,
    path= "/webauthn/register/begin",
    responses (
        (status = 200, description = "Creation challenge for the authenticator"),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 403, description = "Token was issued to a client"),
    ),
    security(("bearer" = [])),
    tag= "webauthn"
)]
#[instrument(skip(state, principal))]
pub async fn register_begin(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(principal): Extension<Principal>,
) -> Response {
    if let Err(response) = principal.require_session() {
        return response;
    }
    match state
        .security_keys()
        .register_begin(state.store(), &principal.user)
        .await
    {
        Ok(challenge) => Json(challenge).into_response(),
        Err(err) => ceremony_failure(&err, AuthReason::WebauthnRegistrationFailure),
    }
}

#[utoipa::path(
    post,
    path= "/webauthn/register/finish",
    request_body = Object,
    responses (
        (status = 200, description = "Security key registered and WebAuthn enabled"),
        (status = 400, description = "Attestation rejected or no registration pending"),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 403, description = "Token was issued to a client"),
    ),
    security(("bearer" = [])),
    tag= "webauthn"
)]
#[instrument(skip(state, principal, headers, payload))]
pub async fn register_finish(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    payload: Option<Json<RegisterPublicKeyCredential>>,
) -> Response {
    if let Err(response) = principal.require_session() {
        return response;
    }
    let response = match payload {
        Some(Json(payload)) => payload,
        None => return missing_payload(),
    };
    let now = utils::now();
    if let Err(err) = state
        .security_keys()
        .register_finish(state.store(), &principal.user, &response, now)
        .await
    {
        return ceremony_failure(&err, AuthReason::WebauthnRegistrationFailure);
    }

    ledger::record_best_effort(
        state.store(),
        Some(principal.user.id),
        ledger::WEBAUTHN_REGISTERED,
        &utils::origin(&headers),
        now,
    )
    .await;

    Json(json!({"status": "webauthn enabled"})).into_response()
}

#[utoipa::path(
    post,
    path= "/webauthn/login/begin",
    params(("AuthToken" = String, Header, description = "Continuation ticket from the 422 sign-in answer")),
    responses (
        (status = 200, description = "Request challenge for the authenticator"),
        (status = 401, description = "Ticket rejected or no security key registered"),
    ),
    tag= "webauthn"
)]
#[instrument(skip(state, headers))]
pub async fn login_begin(Extension(state): Extension<Arc<AuthState>>, headers: HeaderMap) -> Response {
    let (_, user) = match ticket_holder(&state, &headers).await {
        Ok(holder) => holder,
        Err(response) => return response,
    };
    match state.security_keys().login_begin(state.store(), &user).await {
        Ok(challenge) => Json(challenge).into_response(),
        Err(err) => ceremony_failure(&err, AuthReason::WebauthnAuthFailure),
    }
}

#[utoipa::path(
    post,
    path= "/webauthn/login/finish",
    request_body = Object,
    params(("AuthToken" = String, Header, description = "Continuation ticket from the 422 sign-in answer")),
    responses (
        (status = 200, description = "Assertion verified", body = LoginProof),
        (status = 401, description = "Ticket or assertion rejected"),
    ),
    tag= "webauthn"
)]
#[instrument(skip(state, headers, payload))]
pub async fn login_finish(
    Extension(state): Extension<Arc<AuthState>>,
    headers: HeaderMap,
    payload: Option<Json<PublicKeyCredential>>,
) -> Response {
    let response = match payload {
        Some(Json(payload)) => payload,
        None => return missing_payload(),
    };
    let (auth_token, user) = match ticket_holder(&state, &headers).await {
        Ok(holder) => holder,
        Err(response) => return response,
    };
    if let Err(err) = state
        .security_keys()
        .login_finish(state.store(), &user, &response)
        .await
    {
        return ceremony_failure(&err, AuthReason::WebauthnAuthFailure);
    }

    let proof = match ledger::issue_ticket(
        state.store(),
        user.id,
        ledger::SEC_AUTH_SUCCESS,
        Purpose::WebauthnProof,
        &utils::origin(&headers),
        utils::now(),
        state.config().continuation_ttl_seconds(),
    )
    .await
    {
        Ok(proof) => proof,
        Err(err) => {
            error!("Failed to record WebAuthn proof: {err}");
            return internal_error();
        }
    };

    Json(LoginProof {
        result: "ok".to_string(),
        auth_token,
        sec_auth_token: proof.token(),
    })
    .into_response()
}
