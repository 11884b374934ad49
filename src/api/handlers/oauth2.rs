use super::{
    auth::{utils, AuthState, Principal},
    missing_payload,
};
use crate::{
    error::{error_response, internal_error, ErrorBody},
    oauth2::{self, AuthorizeRequest, AuthorizeResponse, ClientInfo, OAuth2Error, TokenRequest, TokenResponse},
};
use axum::{
    extract::{Extension, Form, Path},
    http::{
        header::{CACHE_CONTROL, PRAGMA},
        HeaderValue,
    },
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::{debug, error, instrument};

fn failure(err: &OAuth2Error) -> Response {
    match err.code() {
        Some(code) => {
            debug!("OAuth2 request rejected: {err}");
            error_response(code)
        }
        None => {
            error!("OAuth2 request failed: {err}");
            internal_error()
        }
    }
}

#[utoipa::path(
    post,
    path= "/oauth2/authorize",
    request_body = AuthorizeRequest,
    responses (
        (status = 200, description = "Authorization code issued", body = AuthorizeResponse),
        (status = 400, description = "Unknown client, redirect URI mismatch or replayed nonce", body = ErrorBody),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 403, description = "Token was issued to a client"),
    ),
    security(("bearer" = [])),
    tag= "oauth2"
)]
#[instrument(skip(state, principal, payload))]
pub async fn authorize(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(principal): Extension<Principal>,
    payload: Option<Json<AuthorizeRequest>>,
) -> Response {
    if let Err(response) = principal.require_session() {
        return response;
    }
    let request = match payload {
        Some(Json(payload)) => payload,
        None => return missing_payload(),
    };
    match state
        .oauth2(utils::now())
        .authorize(&principal.user, request)
        .await
    {
        Ok(response) => Json(response).into_response(),
        Err(err) => failure(&err),
    }
}

#[utoipa::path(
    post,
    path= "/oauth2/access_token",
    request_body(content = TokenRequest, content_type = "application/x-www-form-urlencoded"),
    responses (
        (status = 200, description = "Delegated access token", body = TokenResponse),
        (status = 400, description = "Invalid, expired or reused authorization code", body = ErrorBody),
        (status = 401, description = "Client authentication failed", body = ErrorBody),
    ),
    tag= "oauth2"
)]
#[instrument(skip(state, payload))]
pub async fn access_token(
    Extension(state): Extension<Arc<AuthState>>,
    payload: Option<Form<TokenRequest>>,
) -> Response {
    let request = match payload {
        Some(Form(payload)) => payload,
        None => return missing_payload(),
    };
    match state.oauth2(utils::now()).exchange(&request).await {
        Ok(token) => {
            let mut response = Json(token).into_response();
            let headers = response.headers_mut();
            headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
            headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
            response
        }
        Err(err) => failure(&err),
    }
}

#[utoipa::path(
    get,
    path= "/oauth2/clients/{id}",
    params(("id" = String, Path, description = "Client id")),
    responses (
        (status = 200, description = "Client display name", body = ClientInfo),
        (status = 400, description = "Unknown client", body = ErrorBody),
    ),
    tag= "oauth2"
)]
pub async fn client(Extension(state): Extension<Arc<AuthState>>, Path(id): Path<String>) -> Response {
    match oauth2::client_info(state.store(), &id).await {
        Ok(info) => Json(info).into_response(),
        Err(err) => failure(&err),
    }
}
