//! Signup and the profile operations on `/users/:id`.

use super::{
    auth::{utils, AuthState, Principal},
    missing_payload,
};
use crate::{
    error::{error_response, internal_error, ErrorCode, SecurityReason},
    ledger, password,
    store::{ProfileUpdate, StoreError, User},
    token,
};
use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(ToSchema, Deserialize, Debug)]
pub struct Signup {
    email: String,
    password: String,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
}

#[derive(ToSchema, Deserialize, Debug, Default)]
pub struct UserPatch {
    email: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    password: Option<String>,
    totpenabled: Option<bool>,
}

/// Public view of a user; secrets never leave the store.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct UserResource {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub created_at: i64,
    pub totpenabled: bool,
    pub webauthnenabled: bool,
}

impl From<&User> for UserResource {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            created_at: user.created_at,
            totpenabled: user.totp_enabled,
            webauthnenabled: user.webauthn_enabled,
        }
    }
}

/// Session token handed back after a secret rotation.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RotatedToken {
    pub token: String,
    pub exp: i64,
}

/// The path id must name the authenticated user.
/// Changes to an account need the owner's session token.
fn ensure_owner(principal: &Principal, id: Uuid) -> Result<(), Response> {
    principal.require_session()?;
    ensure_self(principal, id)
}

fn ensure_self(principal: &Principal, id: Uuid) -> Result<(), Response> {
    if principal.user.id == id {
        Ok(())
    } else {
        debug!(requested = %id, "profile access for another user refused");
        Err(error_response(ErrorCode::Security(
            SecurityReason::ContextUserDoesNotMatchGivenUserId,
        )))
    }
}

#[utoipa::path(
    post,
    path= "/users",
    request_body = Signup,
    responses (
        (status = 200, description = "User created", body = UserResource),
        (status = 400, description = "Invalid email or password"),
        (status = 409, description = "User with the specified email already exists"),
    ),
    tag= "users"
)]
#[instrument(skip(state, headers, payload))]
pub async fn signup(
    Extension(state): Extension<Arc<AuthState>>,
    headers: HeaderMap,
    payload: Option<Json<Signup>>,
) -> Response {
    let signup: Signup = match payload {
        Some(Json(payload)) => payload,
        None => return missing_payload(),
    };

    let email = utils::normalize_email(&signup.email);
    if !utils::valid_email(&email) {
        return (StatusCode::BAD_REQUEST, "Invalid email".to_string()).into_response();
    }
    if signup.password.is_empty() {
        return (StatusCode::BAD_REQUEST, "Invalid password".to_string()).into_response();
    }

    let (password_hash, signing_secret) =
        match (password::hash_password(&signup.password), password::generate_secret()) {
            (Ok(hash), Ok(secret)) => (hash, secret),
            (Err(err), _) => {
                error!("Failed to hash password: {err}");
                return internal_error();
            }
            (_, Err(err)) => {
                error!("Failed to generate signing secret: {err}");
                return internal_error();
            }
        };

    let now = utils::now();
    let user = User {
        id: Uuid::new_v4(),
        platform: state.config().platform().to_string(),
        email,
        password_hash,
        first_name: signup.first_name,
        last_name: signup.last_name,
        created_at: now,
        totp_enabled: false,
        totp_secret: None,
        totp_pending_secret: None,
        totp_pending_expires_at: None,
        webauthn_enabled: false,
        webauthn_session: None,
        signing_secret: SecretString::from(signing_secret),
    };

    match state.store().register_user(&user).await {
        Ok(()) => {}
        Err(StoreError::Conflict) => {
            debug!("User already exists");
            return (StatusCode::CONFLICT, "User already exists".to_string()).into_response();
        }
        Err(err) => {
            error!("Failed to register user: {err}");
            return internal_error();
        }
    }

    ledger::record_best_effort(
        state.store(),
        Some(user.id),
        ledger::SIGNUP,
        &utils::origin(&headers),
        now,
    )
    .await;

    (StatusCode::OK, Json(UserResource::from(&user))).into_response()
}

#[utoipa::path(
    get,
    path= "/users/{id}",
    params(("id" = Uuid, Path, description = "User id")),
    responses (
        (status = 200, description = "The authenticated user", body = UserResource),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 403, description = "Id does not belong to the authenticated user"),
    ),
    security(("bearer" = [])),
    tag= "users"
)]
pub async fn get_user(Extension(principal): Extension<Principal>, Path(id): Path<Uuid>) -> Response {
    if let Err(response) = ensure_self(&principal, id) {
        return response;
    }
    Json(UserResource::from(&principal.user)).into_response()
}

#[utoipa::path(
    patch,
    path= "/users/{id}",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = UserPatch,
    responses (
        (status = 200, description = "Updated user", body = UserResource),
        (status = 400, description = "Invalid email or password"),
        (status = 403, description = "Id belongs to someone else, or the token was issued to a client"),
        (status = 409, description = "Email already taken"),
    ),
    security(("bearer" = [])),
    tag= "users"
)]
#[instrument(skip(state, principal, payload))]
pub async fn update_user(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    payload: Option<Json<UserPatch>>,
) -> Response {
    if let Err(response) = ensure_owner(&principal, id) {
        return response;
    }
    let patch: UserPatch = match payload {
        Some(Json(payload)) => payload,
        None => return missing_payload(),
    };

    let email = match patch.email.as_deref().map(utils::normalize_email) {
        Some(email) if !utils::valid_email(&email) => {
            return (StatusCode::BAD_REQUEST, "Invalid email".to_string()).into_response();
        }
        other => other,
    };
    let update = ProfileUpdate {
        email,
        first_name: patch.first_name,
        last_name: patch.last_name,
    };
    if !update.is_empty() {
        match state.store().update_profile(id, &update).await {
            Ok(()) => {}
            Err(StoreError::Conflict) => {
                return (StatusCode::CONFLICT, "Email already taken".to_string()).into_response();
            }
            Err(err) => {
                error!("Failed to update profile: {err}");
                return internal_error();
            }
        }
    }

    if let Some(new_password) = patch.password.as_deref() {
        if new_password.is_empty() {
            return (StatusCode::BAD_REQUEST, "Invalid password".to_string()).into_response();
        }
        let hash = match password::hash_password(new_password) {
            Ok(hash) => hash,
            Err(err) => {
                error!("Failed to hash password: {err}");
                return internal_error();
            }
        };
        if let Err(err) = state.store().update_password(id, &hash).await {
            error!("Failed to update password: {err}");
            return internal_error();
        }
    }

    if patch.totpenabled == Some(false) {
        if let Err(err) = state.store().disable_totp(id).await {
            error!("Failed to disable TOTP: {err}");
            return internal_error();
        }
    }

    match state.store().get_user(id).await {
        Ok(user) => Json(UserResource::from(&user)).into_response(),
        Err(err) => {
            error!("Failed to reload user: {err}");
            internal_error()
        }
    }
}

#[utoipa::path(
    delete,
    path= "/users/{id}",
    params(("id" = Uuid, Path, description = "User id")),
    responses (
        (status = 204, description = "User deleted"),
        (status = 403, description = "Id belongs to someone else, or the token was issued to a client"),
    ),
    security(("bearer" = [])),
    tag= "users"
)]
pub async fn delete_user(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Response {
    if let Err(response) = ensure_owner(&principal, id) {
        return response;
    }
    match state.store().delete_user(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            error!("Failed to delete user: {err}");
            internal_error()
        }
    }
}

#[utoipa::path(
    post,
    path= "/users/{id}/rotate-secret",
    params(("id" = Uuid, Path, description = "User id")),
    responses (
        (status = 200, description = "Secret rotated; every earlier token is void", body = RotatedToken),
        (status = 403, description = "Id belongs to someone else, or the token was issued to a client"),
    ),
    security(("bearer" = [])),
    tag= "users"
)]
#[instrument(skip(state, principal, headers))]
pub async fn rotate_secret(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = ensure_owner(&principal, id) {
        return response;
    }
    let secret = match password::generate_secret() {
        Ok(secret) => secret,
        Err(err) => {
            error!("Failed to generate signing secret: {err}");
            return internal_error();
        }
    };
    if let Err(err) = state.store().rotate_signing_secret(id, &secret).await {
        error!("Failed to rotate signing secret: {err}");
        return internal_error();
    }

    let now = utils::now();
    let (token, exp) = match token::encode(
        &id.to_string(),
        secret.as_bytes(),
        state.config().issuer(),
        state.config().session_ttl_seconds(),
        now,
    ) {
        Ok(encoded) => encoded,
        Err(err) => {
            error!("Failed to encode token: {err}");
            return internal_error();
        }
    };

    ledger::record_best_effort(
        state.store(),
        Some(id),
        ledger::SECRET_ROTATED,
        &utils::origin(&headers),
        now,
    )
    .await;

    Json(RotatedToken { token, exp }).into_response()
}
