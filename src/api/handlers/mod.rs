//! HTTP handlers.

pub mod auth;
pub mod health;
pub mod oauth2;
pub mod signin;
pub mod totp;
pub mod users;
pub mod webauthn;

use crate::error::{error_response, ErrorCode, JsonReason};
use axum::response::Response;

/// 400 for a missing or undecodable body.
pub(crate) fn missing_payload() -> Response {
    error_response(ErrorCode::Json(JsonReason::Unmarshalling))
}
