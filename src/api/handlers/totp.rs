//! TOTP enrollment: a pending secret is generated, shown as a QR code, and only
//! promoted once the user proves their authenticator produces matching codes.

use super::{
    auth::{utils, AuthState, Principal},
    missing_payload,
};
use crate::{
    error::{error_response, internal_error, ErrorCode, ServerReason, TotpReason},
    ledger,
};
use axum::{
    extract::Extension,
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct QrCode {
    /// Base64 encoded PNG.
    pub payload: String,
    /// `otpauth://` provisioning URI.
    pub uri: String,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct TotpConfirm {
    totp: String,
}

#[utoipa::path(
    get,
    path= "/totp/qr-code-json",
    responses (
        (status = 200, description = "Pending secret stored; scan the QR code", body = QrCode),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 403, description = "Token was issued to a client"),
        (status = 500, description = "QR code could not be rendered"),
    ),
    security(("bearer" = [])),
    tag= "totp"
)]
#[instrument(skip(state, principal))]
pub async fn qr_code_json(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(principal): Extension<Principal>,
) -> Response {
    if let Err(response) = principal.require_session() {
        return response;
    }
    let user = &principal.user;
    let secret = state.otp().new_secret();

    let (payload, uri) = match (
        state.otp().qr_png_base64(&secret, &user.email),
        state.otp().provisioning_uri(&secret, &user.email),
    ) {
        (Ok(payload), Ok(uri)) => (payload, uri),
        (Err(err), _) => {
            error!("Failed to render TOTP QR code: {err}");
            return error_response(ErrorCode::Server(ServerReason::QrCodeFailure));
        }
        (_, Err(err)) => {
            error!("Failed to build TOTP provisioning URI: {err}");
            return error_response(ErrorCode::Totp(TotpReason::ProblemEncodingQrCode));
        }
    };

    if let Err(response) = store_pending(&state, user.id, &secret).await {
        return response;
    }

    Json(QrCode { payload, uri }).into_response()
}

#[utoipa::path(
    get,
    path= "/totp/qr-code-raw",
    responses (
        (status = 200, description = "Pending secret stored; scan the QR code", content_type = "image/png", body = Vec<u8>),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 403, description = "Token was issued to a client"),
        (status = 500, description = "QR code could not be rendered"),
    ),
    security(("bearer" = [])),
    tag= "totp"
)]
#[instrument(skip(state, principal))]
pub async fn qr_code_raw(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(principal): Extension<Principal>,
) -> Response {
    if let Err(response) = principal.require_session() {
        return response;
    }
    let user = &principal.user;
    let secret = state.otp().new_secret();

    let png = match state.otp().qr_png(&secret, &user.email) {
        Ok(png) => png,
        Err(err) => {
            error!("Failed to render TOTP QR code: {err}");
            return error_response(ErrorCode::Server(ServerReason::QrCodeFailure));
        }
    };

    if let Err(response) = store_pending(&state, user.id, &secret).await {
        return response;
    }

    ([(CONTENT_TYPE, "image/png")], png).into_response()
}

/// Replace any earlier pending secret; it expires if never confirmed.
async fn store_pending(state: &AuthState, user_id: Uuid, secret: &str) -> Result<(), Response> {
    let expires_at = utils::now().saturating_add(state.config().totp_enrollment_ttl_seconds());
    state
        .store()
        .update_totp_pending(user_id, secret, expires_at)
        .await
        .map_err(|err| {
            error!("Failed to store pending TOTP secret: {err}");
            internal_error()
        })
}

#[utoipa::path(
    post,
    path= "/totp/confirm",
    request_body = TotpConfirm,
    responses (
        (status = 200, description = "TOTP enabled"),
        (status = 400, description = "Code does not match the pending secret, or no enrollment is pending"),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 403, description = "Token was issued to a client"),
    ),
    security(("bearer" = [])),
    tag= "totp"
)]
#[instrument(skip(state, principal, headers, payload))]
pub async fn confirm(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    payload: Option<Json<TotpConfirm>>,
) -> Response {
    if let Err(response) = principal.require_session() {
        return response;
    }
    let code = match payload {
        Some(Json(payload)) => payload.totp,
        None => return missing_payload(),
    };
    let invalid = || {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"status": "totp invalid"})),
        )
            .into_response()
    };

    let user = &principal.user;
    let now = utils::now();
    let pending = match (&user.totp_pending_secret, user.totp_pending_expires_at) {
        (Some(secret), Some(expires_at)) if now < expires_at => secret,
        _ => {
            debug!(user_id = %user.id, "no pending TOTP enrollment");
            return invalid();
        }
    };

    match state.otp().verify(pending, &code, now) {
        Ok(true) => {}
        Ok(false) => return invalid(),
        Err(err) => {
            error!("Failed to verify TOTP code: {err}");
            return invalid();
        }
    }

    if let Err(err) = state.store().enable_totp(user.id, pending).await {
        error!("Failed to enable TOTP: {err}");
        return internal_error();
    }

    ledger::record_best_effort(
        state.store(),
        Some(user.id),
        ledger::TOTP_ENABLED,
        &utils::origin(&headers),
        now,
    )
    .await;

    Json(json!({"status": "totp enabled"})).into_response()
}
