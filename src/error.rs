//! Client-facing error codes.
//!
//! Codes are `category * 1000 + reason`, so a client can branch on `code / 1000`
//! without matching strings. Every category owns a closed reason enum, and every
//! match below is exhaustive.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseReason {
    QueryingFailed,
    PersistingFailed,
    Unknown,
    GeneralError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityReason {
    ContextUserDoesNotMatchGivenUserId,
    DelegatedTokenNotAllowed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonReason {
    Marshalling,
    Unmarshalling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthReason {
    SigninSessionTokenDecodingFailed,
    SigninSessionExpired,
    UsernameOrPasswordDoesNotMatch,
    WebauthnAuthFailure,
    TotpAuthFailure,
    UserUnknown,
    JwtEncodingFailure,
    TotpRequired,
    WebauthnRequired,
    AuthHeaderMissing,
    InvalidOrRevokedToken,
    MissingCredentials,
    WebauthnRegistrationFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerReason {
    QrCodeFailure,
    RetrievingPayloadError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TotpReason {
    InvalidTotp,
    ProblemEncodingQrCode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuth2Reason {
    UnknownClient,
    ClientAuthFailed,
    UnsupportedGrantType,
    UnsupportedResponseType,
    RedirectUriMismatch,
    InvalidGrant,
    AuthorizationCodeExpired,
    NonceReplayed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Database(DatabaseReason),
    Security(SecurityReason),
    Json(JsonReason),
    Authentication(AuthReason),
    Server(ServerReason),
    Totp(TotpReason),
    OAuth2(OAuth2Reason),
}

impl ErrorCode {
    #[must_use]
    pub const fn category(self) -> u16 {
        match self {
            Self::Database(_) => 1,
            Self::Security(_) => 2,
            Self::Json(_) => 3,
            Self::Authentication(_) => 4,
            Self::Server(_) => 5,
            Self::Totp(_) => 6,
            Self::OAuth2(_) => 7,
        }
    }

    const fn reason(self) -> u16 {
        match self {
            Self::Database(reason) => match reason {
                DatabaseReason::QueryingFailed => 100,
                DatabaseReason::PersistingFailed => 200,
                DatabaseReason::Unknown => 300,
                DatabaseReason::GeneralError => 400,
            },
            Self::Security(reason) => match reason {
                SecurityReason::ContextUserDoesNotMatchGivenUserId => 100,
                SecurityReason::DelegatedTokenNotAllowed => 200,
            },
            Self::Json(reason) => match reason {
                JsonReason::Marshalling => 100,
                JsonReason::Unmarshalling => 200,
            },
            Self::Authentication(reason) => match reason {
                AuthReason::SigninSessionTokenDecodingFailed => 100,
                AuthReason::SigninSessionExpired => 200,
                AuthReason::UsernameOrPasswordDoesNotMatch => 300,
                AuthReason::WebauthnAuthFailure => 400,
                AuthReason::TotpAuthFailure => 500,
                AuthReason::UserUnknown => 600,
                AuthReason::JwtEncodingFailure => 700,
                AuthReason::TotpRequired => 800,
                AuthReason::WebauthnRequired => 900,
                AuthReason::AuthHeaderMissing => 910,
                AuthReason::InvalidOrRevokedToken => 920,
                AuthReason::MissingCredentials => 930,
                AuthReason::WebauthnRegistrationFailure => 950,
            },
            Self::Server(reason) => match reason {
                ServerReason::QrCodeFailure => 100,
                ServerReason::RetrievingPayloadError => 200,
            },
            Self::Totp(reason) => match reason {
                TotpReason::InvalidTotp => 100,
                TotpReason::ProblemEncodingQrCode => 200,
            },
            Self::OAuth2(reason) => match reason {
                OAuth2Reason::UnknownClient => 100,
                OAuth2Reason::ClientAuthFailed => 200,
                OAuth2Reason::UnsupportedGrantType => 300,
                OAuth2Reason::UnsupportedResponseType => 400,
                OAuth2Reason::RedirectUriMismatch => 500,
                OAuth2Reason::InvalidGrant => 600,
                OAuth2Reason::AuthorizationCodeExpired => 700,
                OAuth2Reason::NonceReplayed => 800,
            },
        }
    }

    /// Stable numeric code (`category * 1000 + reason`).
    #[must_use]
    pub const fn code(self) -> u16 {
        self.category() * 1000 + self.reason()
    }

    /// Message shown to the end user. Also used as the ledger event name on denials.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::Database(reason) => match reason {
                DatabaseReason::QueryingFailed => "Database query failed",
                DatabaseReason::PersistingFailed => "Writing to database failed",
                DatabaseReason::Unknown => "Unknown database error",
                DatabaseReason::GeneralError => "Database error",
            },
            Self::Security(reason) => match reason {
                SecurityReason::ContextUserDoesNotMatchGivenUserId => {
                    "User ID in context does not match given user's ID"
                }
                SecurityReason::DelegatedTokenNotAllowed => {
                    "Tokens issued to a client cannot manage the account"
                }
            },
            Self::Json(reason) => match reason {
                JsonReason::Marshalling => "Error occurred during marshalling",
                JsonReason::Unmarshalling => "Error occurred during unmarshalling",
            },
            Self::Authentication(reason) => match reason {
                AuthReason::SigninSessionTokenDecodingFailed => {
                    "Error decoding signin_session_token"
                }
                AuthReason::SigninSessionExpired => "Your signin session timed out",
                AuthReason::UsernameOrPasswordDoesNotMatch => "Check your username or password",
                AuthReason::WebauthnAuthFailure => "Webauthn authentication failed",
                AuthReason::TotpAuthFailure => "Your TOTP code is invalid",
                AuthReason::UserUnknown => "User is unknown",
                AuthReason::JwtEncodingFailure => "Problem with encoding jwt token",
                AuthReason::TotpRequired => "TOTP required",
                AuthReason::WebauthnRequired => "WebAuthn Auth Required",
                AuthReason::AuthHeaderMissing => "Authorization header is missing or malformed",
                AuthReason::InvalidOrRevokedToken => "Token is invalid or has been revoked",
                AuthReason::MissingCredentials => "Missing username and password",
                AuthReason::WebauthnRegistrationFailure => "Failed to register user's U2F key",
            },
            Self::Server(reason) => match reason {
                ServerReason::QrCodeFailure => "Error generating QR code image",
                ServerReason::RetrievingPayloadError => "Error retrieving payload",
            },
            Self::Totp(reason) => match reason {
                TotpReason::InvalidTotp => "TOTP is invalid",
                TotpReason::ProblemEncodingQrCode => "Problem encoding QR code",
            },
            Self::OAuth2(reason) => match reason {
                OAuth2Reason::UnknownClient => "Unknown client",
                OAuth2Reason::ClientAuthFailed => "Client authentication failed",
                OAuth2Reason::UnsupportedGrantType => "Unsupported grant type",
                OAuth2Reason::UnsupportedResponseType => "Unsupported response type",
                OAuth2Reason::RedirectUriMismatch => "Redirect URI does not match",
                OAuth2Reason::InvalidGrant => "Authorization code is invalid or already used",
                OAuth2Reason::AuthorizationCodeExpired => "Authorization code expired",
                OAuth2Reason::NonceReplayed => "Nonce has already been used",
            },
        }
    }

    /// HTTP status a handler answers with for this code.
    #[must_use]
    pub const fn status(self) -> StatusCode {
        match self {
            Self::Database(_) | Self::Server(_) | Self::Json(JsonReason::Marshalling) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Json(JsonReason::Unmarshalling) => StatusCode::BAD_REQUEST,
            Self::Security(_) => StatusCode::FORBIDDEN,
            Self::Authentication(reason) => match reason {
                AuthReason::TotpRequired | AuthReason::WebauthnRequired => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                AuthReason::JwtEncodingFailure => StatusCode::INTERNAL_SERVER_ERROR,
                AuthReason::WebauthnRegistrationFailure | AuthReason::MissingCredentials => {
                    StatusCode::BAD_REQUEST
                }
                AuthReason::SigninSessionTokenDecodingFailed
                | AuthReason::SigninSessionExpired
                | AuthReason::UsernameOrPasswordDoesNotMatch
                | AuthReason::WebauthnAuthFailure
                | AuthReason::TotpAuthFailure
                | AuthReason::UserUnknown
                | AuthReason::AuthHeaderMissing
                | AuthReason::InvalidOrRevokedToken => StatusCode::UNAUTHORIZED,
            },
            Self::Totp(TotpReason::InvalidTotp) => StatusCode::BAD_REQUEST,
            Self::Totp(TotpReason::ProblemEncodingQrCode) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::OAuth2(reason) => match reason {
                OAuth2Reason::ClientAuthFailed => StatusCode::UNAUTHORIZED,
                OAuth2Reason::UnknownClient
                | OAuth2Reason::UnsupportedGrantType
                | OAuth2Reason::UnsupportedResponseType
                | OAuth2Reason::RedirectUriMismatch
                | OAuth2Reason::InvalidGrant
                | OAuth2Reason::AuthorizationCodeExpired
                | OAuth2Reason::NonceReplayed => StatusCode::BAD_REQUEST,
            },
        }
    }
}

/// JSON body for every structured failure.
///
/// `signin_session_token` is only present on 422 answers, where it lets the client
/// resume the sign-in once it has the missing factor.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signin_session_token: Option<String>,
}

impl ErrorBody {
    #[must_use]
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code: code.code(),
            message: code.message().to_string(),
            signin_session_token: None,
        }
    }

    #[must_use]
    pub fn with_continuation(code: ErrorCode, signin_session_token: String) -> Self {
        Self {
            signin_session_token: Some(signin_session_token),
            ..Self::new(code)
        }
    }
}

/// Respond with the code's status and a `{code, message}` body.
#[must_use]
pub fn error_response(code: ErrorCode) -> Response {
    (code.status(), Json(ErrorBody::new(code))).into_response()
}

/// Opaque 500 for faults whose detail stays in the logs.
#[must_use]
pub fn internal_error() -> Response {
    error_response(ErrorCode::Database(DatabaseReason::GeneralError))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_namespaced_by_category() {
        assert_eq!(
            ErrorCode::Database(DatabaseReason::QueryingFailed).code(),
            1100
        );
        assert_eq!(
            ErrorCode::Security(SecurityReason::ContextUserDoesNotMatchGivenUserId).code(),
            2100
        );
        assert_eq!(
            ErrorCode::Security(SecurityReason::DelegatedTokenNotAllowed).code(),
            2200
        );
        assert_eq!(ErrorCode::Json(JsonReason::Unmarshalling).code(), 3200);
        assert_eq!(
            ErrorCode::Authentication(AuthReason::SigninSessionExpired).code(),
            4200
        );
        assert_eq!(
            ErrorCode::Authentication(AuthReason::WebauthnRequired).code(),
            4900
        );
        assert_eq!(ErrorCode::Server(ServerReason::QrCodeFailure).code(), 5100);
        assert_eq!(ErrorCode::Totp(TotpReason::InvalidTotp).code(), 6100);
        assert_eq!(ErrorCode::OAuth2(OAuth2Reason::NonceReplayed).code(), 7800);
    }

    #[test]
    fn registration_failure_stays_in_its_category() {
        let code = ErrorCode::Authentication(AuthReason::WebauthnRegistrationFailure);
        assert_eq!(code.code() / 1000, code.category());
    }

    #[test]
    fn second_factor_requirements_are_422() {
        assert_eq!(
            ErrorCode::Authentication(AuthReason::TotpRequired).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ErrorCode::Authentication(AuthReason::TotpAuthFailure).status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn body_carries_message_and_optional_token() -> anyhow::Result<()> {
        let body = ErrorBody::new(ErrorCode::Authentication(AuthReason::UserUnknown));
        let json = serde_json::to_value(&body)?;
        assert_eq!(json["code"], 4600);
        assert_eq!(json["message"], "User is unknown");
        assert!(json.get("signin_session_token").is_none());

        let body = ErrorBody::with_continuation(
            ErrorCode::Authentication(AuthReason::TotpRequired),
            "dGlja2V0".to_string(),
        );
        let json = serde_json::to_value(&body)?;
        assert_eq!(json["signin_session_token"], "dGlja2V0");
        Ok(())
    }
}
