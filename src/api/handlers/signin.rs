//! `POST /signin` and `POST /refresh`.

use super::{
    auth::{utils, AuthState},
    missing_payload,
};
use crate::{
    error::{error_response, internal_error, AuthReason, ErrorBody, ErrorCode},
    ledger,
    signin::{Outcome, SigninRequest},
    store::StoreError,
    token,
};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionToken {
    pub token: String,
    pub exp: i64,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct RefreshRequest {
    token: String,
}

#[utoipa::path(
    post,
    path= "/signin",
    request_body = SigninRequest,
    responses (
        (status = 200, description = "Signed in", body = SessionToken),
        (status = 400, description = "Neither credentials nor a continuation token", body = ErrorBody),
        (status = 401, description = "Credentials, ticket or second factor rejected", body = ErrorBody),
        (status = 422, description = "Second factor required; resume with signin_session_token", body = ErrorBody),
    ),
    tag= "signin"
)]
#[instrument(skip(state, headers, payload))]
pub async fn signin(
    Extension(state): Extension<Arc<AuthState>>,
    headers: HeaderMap,
    payload: Option<Json<SigninRequest>>,
) -> Response {
    let mut request: SigninRequest = match payload {
        Some(Json(payload)) => payload,
        None => return missing_payload(),
    };
    request.username = request.username.as_deref().map(utils::normalize_email);

    let attempt = state.signin(utils::origin(&headers), utils::now());
    match attempt.run(&request).await {
        Ok(Outcome::Granted {
            user_id,
            token,
            exp,
        }) => {
            info!(%user_id, "sign-in granted");
            (StatusCode::OK, Json(SessionToken { token, exp })).into_response()
        }
        Ok(Outcome::ContinuationRequired { code, ticket }) => (
            code.status(),
            Json(ErrorBody::with_continuation(code, ticket)),
        )
            .into_response(),
        Ok(Outcome::Denied { code, user_id }) => {
            debug!(?user_id, code = code.code(), "sign-in denied");
            error_response(code)
        }
        Err(err) => {
            error!("Failed to process sign-in: {err}");
            internal_error()
        }
    }
}

#[utoipa::path(
    post,
    path= "/refresh",
    request_body = RefreshRequest,
    responses (
        (status = 200, description = "Fresh token for the same subject", body = SessionToken),
        (status = 401, description = "Token is not a valid session token", body = ErrorBody),
    ),
    tag= "signin"
)]
#[instrument(skip(state, headers, payload))]
pub async fn refresh(
    Extension(state): Extension<Arc<AuthState>>,
    headers: HeaderMap,
    payload: Option<Json<RefreshRequest>>,
) -> Response {
    let presented = match payload {
        Some(Json(payload)) => payload.token,
        None => return missing_payload(),
    };
    let rejected = || error_response(ErrorCode::Authentication(AuthReason::InvalidOrRevokedToken));

    let Ok(unverified) = token::decode_unverified(&presented) else {
        return rejected();
    };
    let Ok(user_id) = Uuid::parse_str(&unverified.sub) else {
        return rejected();
    };
    let user = match state.store().get_user(user_id).await {
        Ok(user) => user,
        Err(StoreError::NotFound) => {
            return error_response(ErrorCode::Authentication(AuthReason::UserUnknown));
        }
        Err(err) => {
            error!("Failed to load token subject: {err}");
            return internal_error();
        }
    };

    let now = utils::now();
    let issuer = state.config().issuer();
    let claims = match token::decode(&presented, user.signing_key(), now) {
        Ok(claims) => claims,
        Err(err) => {
            debug!("Refresh rejected: {err}");
            return rejected();
        }
    };
    // Delegated tokens belong to a client and are never refreshed here.
    if claims.is_delegated() || claims.iss != issuer {
        return rejected();
    }

    let (token, exp) = match token::encode(
        &claims.sub,
        user.signing_key(),
        issuer,
        state.config().session_ttl_seconds(),
        now,
    ) {
        Ok(encoded) => encoded,
        Err(err) => {
            error!("Failed to encode token: {err}");
            return error_response(ErrorCode::Authentication(AuthReason::JwtEncodingFailure));
        }
    };

    ledger::record_best_effort(
        state.store(),
        Some(user.id),
        ledger::TOKEN_REFRESHED,
        &utils::origin(&headers),
        now,
    )
    .await;

    Json(SessionToken { token, exp }).into_response()
}
