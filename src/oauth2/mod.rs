//! OAuth2 authorization-code grant.
//!
//! `authorize` runs for a signed-in user and hands out a single-use code bound to
//! (client, user, redirect URI). `exchange` authenticates the client, consumes the
//! code and mints a delegated token whose audience is the client id.

use crate::{
    error::{ErrorCode, OAuth2Reason},
    password,
    store::{
        AccessTokenRecord, AuthorizationCode, Client, CredentialStore, StoreError, User,
        UserGrants,
    },
    token::{self, Claims},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

pub const GRANT_TYPE_AUTHORIZATION_CODE: &str = "authorization_code";
pub const RESPONSE_TYPE_CODE: &str = "code";
pub const TOKEN_TYPE: &str = "bearer";

#[derive(ToSchema, Deserialize, Debug, Clone, Default)]
pub struct AuthorizeRequest {
    pub client_id: String,
    pub redirect_uri: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub response_type: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AuthorizeResponse {
    pub code: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

/// Form body of `POST /oauth2/access_token`.
#[derive(ToSchema, Deserialize, Debug, Clone, Default)]
pub struct TokenRequest {
    pub grant_type: String,
    pub code: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub scope: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub name: String,
}

#[derive(Debug, Error)]
pub enum OAuth2Error {
    #[error("unknown client")]
    UnknownClient,
    #[error("client authentication failed")]
    ClientAuthFailed,
    #[error("unsupported grant type")]
    UnsupportedGrantType,
    #[error("unsupported response type")]
    UnsupportedResponseType,
    #[error("redirect uri mismatch")]
    RedirectUriMismatch,
    #[error("invalid grant")]
    InvalidGrant,
    #[error("authorization code expired")]
    CodeExpired,
    #[error("nonce replayed")]
    NonceReplayed,
    #[error("client id {0:?} collides with the token issuer")]
    ReservedClientId(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Token(#[from] token::Error),
    #[error(transparent)]
    Password(#[from] password::Error),
}

impl OAuth2Error {
    /// Client-facing code, or `None` for internal faults.
    #[must_use]
    pub fn code(&self) -> Option<ErrorCode> {
        let reason = match self {
            Self::UnknownClient => OAuth2Reason::UnknownClient,
            Self::ClientAuthFailed => OAuth2Reason::ClientAuthFailed,
            Self::UnsupportedGrantType => OAuth2Reason::UnsupportedGrantType,
            Self::UnsupportedResponseType => OAuth2Reason::UnsupportedResponseType,
            Self::RedirectUriMismatch => OAuth2Reason::RedirectUriMismatch,
            Self::InvalidGrant => OAuth2Reason::InvalidGrant,
            Self::CodeExpired => OAuth2Reason::AuthorizationCodeExpired,
            Self::NonceReplayed => OAuth2Reason::NonceReplayed,
            Self::ReservedClientId(_) | Self::Store(_) | Self::Token(_) | Self::Password(_) => {
                return None
            }
        };
        Some(ErrorCode::OAuth2(reason))
    }
}

fn not_found_as(err: StoreError, as_err: OAuth2Error) -> OAuth2Error {
    match err {
        StoreError::NotFound => as_err,
        other => other.into(),
    }
}

pub struct Flow<'a> {
    pub store: &'a dyn CredentialStore,
    pub issuer: &'a str,
    pub access_token_ttl_seconds: i64,
    pub authorization_code_ttl_seconds: i64,
    pub now: i64,
}

impl Flow<'_> {
    /// Issue an authorization code for `user`.
    ///
    /// # Errors
    /// Client-actionable variants for bad input, `Store` for persistence faults.
    pub async fn authorize(
        &self,
        user: &User,
        request: AuthorizeRequest,
    ) -> Result<AuthorizeResponse, OAuth2Error> {
        if request
            .response_type
            .as_deref()
            .is_some_and(|rt| rt != RESPONSE_TYPE_CODE)
        {
            return Err(OAuth2Error::UnsupportedResponseType);
        }

        let client = self
            .store
            .get_client(&request.client_id)
            .await
            .map_err(|e| not_found_as(e, OAuth2Error::UnknownClient))?;
        if request.redirect_uri != client.redirect_uri {
            return Err(OAuth2Error::RedirectUriMismatch);
        }

        if let Some(nonce) = request.nonce.as_deref().filter(|n| !n.is_empty()) {
            if !self.store.record_nonce(&client.id, nonce, self.now).await? {
                return Err(OAuth2Error::NonceReplayed);
            }
        }

        self.store
            .upsert_grants(&UserGrants {
                user_id: user.id,
                client_id: client.id.clone(),
                scope: request.scope.clone(),
            })
            .await?;

        let code = password::generate_secret()?;
        self.store
            .save_authorization_code(&AuthorizationCode {
                code: code.clone(),
                client_id: client.id.clone(),
                user_id: user.id,
                redirect_uri: request.redirect_uri.clone(),
                created_at: self.now,
            })
            .await?;
        info!(client_id = %client.id, user_id = %user.id, "authorization code issued");

        Ok(AuthorizeResponse {
            code,
            client_id: client.id,
            redirect_uri: request.redirect_uri,
            scope: request.scope,
            state: request.state,
            nonce: request.nonce,
        })
    }

    /// Trade an authorization code for a delegated access token.
    ///
    /// # Errors
    /// Client-actionable variants for bad input, internal variants for faults.
    pub async fn exchange(&self, request: &TokenRequest) -> Result<TokenResponse, OAuth2Error> {
        if request.grant_type != GRANT_TYPE_AUTHORIZATION_CODE {
            return Err(OAuth2Error::UnsupportedGrantType);
        }

        let client = match self.store.get_client(&request.client_id).await {
            Ok(client) => client,
            Err(StoreError::NotFound) => {
                password::verify_dummy(&request.client_secret);
                return Err(OAuth2Error::ClientAuthFailed);
            }
            Err(err) => return Err(err.into()),
        };
        if !password::verify_password(&request.client_secret, &client.secret_hash) {
            return Err(OAuth2Error::ClientAuthFailed);
        }

        let code = self
            .store
            .consume_authorization_code(&request.code, &client.id)
            .await
            .map_err(|e| not_found_as(e, OAuth2Error::InvalidGrant))?;
        if self.now - code.created_at > self.authorization_code_ttl_seconds {
            return Err(OAuth2Error::CodeExpired);
        }
        if request.redirect_uri != code.redirect_uri {
            return Err(OAuth2Error::RedirectUriMismatch);
        }

        let grants = self
            .store
            .get_grants(code.user_id, &client.id)
            .await
            .map_err(|e| not_found_as(e, OAuth2Error::InvalidGrant))?;
        let user = self
            .store
            .get_user(code.user_id)
            .await
            .map_err(|e| not_found_as(e, OAuth2Error::InvalidGrant))?;

        let jti = Uuid::new_v4().to_string();
        let claims = Claims::delegated(
            &user.id.to_string(),
            self.issuer,
            &client.id,
            &grants.scope,
            &jti,
            self.now,
            self.access_token_ttl_seconds,
        );
        let access_token = token::encode_claims(&claims, user.signing_key())?;
        self.store
            .save_access_token(&AccessTokenRecord {
                token_id: jti,
                user_id: user.id,
                client_id: client.id.clone(),
                token: access_token.clone(),
                created_at: self.now,
            })
            .await?;
        info!(client_id = %client.id, user_id = %user.id, "access token issued");

        Ok(TokenResponse {
            access_token,
            token_type: TOKEN_TYPE.to_string(),
            expires_in: self.access_token_ttl_seconds,
            scope: grants.scope,
        })
    }
}

/// Public display data of a client.
///
/// # Errors
/// `UnknownClient` when no such client is registered.
pub async fn client_info(
    store: &dyn CredentialStore,
    client_id: &str,
) -> Result<ClientInfo, OAuth2Error> {
    let client = store
        .get_client(client_id)
        .await
        .map_err(|e| not_found_as(e, OAuth2Error::UnknownClient))?;
    Ok(ClientInfo { name: client.name })
}

/// Register a client and return its plaintext secret, which is never stored.
///
/// The id becomes the audience of delegated tokens, so it may not equal `issuer`:
/// those tokens would then pass as session tokens.
///
/// # Errors
/// Returns an error if the id is reserved or taken, or hashing fails.
pub async fn register_client(
    store: &dyn CredentialStore,
    issuer: &str,
    id: &str,
    name: &str,
    redirect_uri: &str,
) -> Result<String, OAuth2Error> {
    if id == issuer {
        return Err(OAuth2Error::ReservedClientId(id.to_string()));
    }
    let secret = password::generate_secret()?;
    store
        .register_client(&Client {
            id: id.to_string(),
            name: name.to_string(),
            secret_hash: password::hash_password(&secret)?,
            redirect_uri: redirect_uri.to_string(),
        })
        .await?;
    Ok(secret)
}
