//! Bearer token codec.
//!
//! Tokens are compact JWTs signed with HS256. The HMAC key is the **subject's own**
//! signing secret, never a server-wide key, so rotating one user's secret invalidates
//! exactly that user's tokens.
//!
//! Verification is two-phase because the key depends on the subject:
//! 1. [`decode_unverified`] reads the payload segment to learn `sub`.
//! 2. The caller fetches that subject's secret and calls [`decode`], which checks the
//!    signature before it trusts any claim, then checks expiry.
//!
//! Session tokens have `iss == aud`. Delegated (OAuth2) tokens carry the client id as
//! audience plus a `jti` and a `scope`.

use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const ALG_HS256: &str = "HS256";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenHeader {
    pub alg: String,
    pub typ: String,
}

impl TokenHeader {
    fn hs256() -> Self {
        Self {
            alg: ALG_HS256.to_string(),
            typ: "JWT".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl Claims {
    /// Session claims: the issuer is also the audience.
    #[must_use]
    pub fn session(subject: &str, issuer: &str, now: i64, ttl_seconds: i64) -> Self {
        Self {
            iss: issuer.to_string(),
            sub: subject.to_string(),
            aud: issuer.to_string(),
            iat: now,
            exp: now.saturating_add(ttl_seconds),
            jti: None,
            scope: None,
        }
    }

    /// Delegated claims minted for a third-party client.
    #[must_use]
    pub fn delegated(
        subject: &str,
        issuer: &str,
        client_id: &str,
        scope: &str,
        jti: &str,
        now: i64,
        ttl_seconds: i64,
    ) -> Self {
        Self {
            iss: issuer.to_string(),
            sub: subject.to_string(),
            aud: client_id.to_string(),
            iat: now,
            exp: now.saturating_add(ttl_seconds),
            jti: Some(jti.to_string()),
            scope: Some(scope.to_string()),
        }
    }

    /// Tokens whose issuer differs from their audience were handed to a client.
    #[must_use]
    pub fn is_delegated(&self) -> bool {
        self.iss != self.aud
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("invalid signing key")]
    InvalidKey,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, Error> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, Error> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| Error::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn mac(secret: &[u8], signing_input: &str) -> Result<HmacSha256, Error> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| Error::InvalidKey)?;
    mac.update(signing_input.as_bytes());
    Ok(mac)
}

fn split(token: &str) -> Result<(&str, &str, &str), Error> {
    let mut parts = token.split('.');
    let header_b64 = parts.next().ok_or(Error::TokenFormat)?;
    let claims_b64 = parts.next().ok_or(Error::TokenFormat)?;
    let sig_b64 = parts.next().ok_or(Error::TokenFormat)?;
    if parts.next().is_some() || header_b64.is_empty() || claims_b64.is_empty() {
        return Err(Error::TokenFormat);
    }
    Ok((header_b64, claims_b64, sig_b64))
}

/// Sign arbitrary claims with `secret`.
///
/// # Errors
/// Returns an error if the claims cannot be serialized or the key is rejected.
pub fn encode_claims(claims: &Claims, secret: &[u8]) -> Result<String, Error> {
    if secret.is_empty() {
        return Err(Error::InvalidKey);
    }
    let header_b64 = b64e_json(&TokenHeader::hs256())?;
    let claims_b64 = b64e_json(claims)?;
    let signing_input = format!("{header_b64}.{claims_b64}");
    let signature = mac(secret, &signing_input)?.finalize().into_bytes();
    let signature_b64 = Base64UrlUnpadded::encode_string(&signature);
    Ok(format!("{signing_input}.{signature_b64}"))
}

/// Mint a session token for `subject`, returning the token and its expiry.
///
/// # Errors
/// Returns an error if signing fails.
pub fn encode(
    subject: &str,
    secret: &[u8],
    issuer: &str,
    ttl_seconds: i64,
    now: i64,
) -> Result<(String, i64), Error> {
    let claims = Claims::session(subject, issuer, now, ttl_seconds);
    let token = encode_claims(&claims, secret)?;
    Ok((token, claims.exp))
}

/// Verify the signature with `secret`, then check expiry, and return the claims.
///
/// # Errors
/// `InvalidSignature` when the token was not signed with `secret`, `Expired` once
/// `exp <= now`, and format errors for anything that is not a compact HS256 JWT.
pub fn decode(token: &str, secret: &[u8], now: i64) -> Result<Claims, Error> {
    let (header_b64, claims_b64, sig_b64) = split(token)?;

    let header: TokenHeader = b64d_json(header_b64)?;
    if header.alg != ALG_HS256 {
        return Err(Error::UnsupportedAlg(header.alg));
    }

    let signature = Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| Error::Base64)?;
    let signing_input = format!("{header_b64}.{claims_b64}");
    mac(secret, &signing_input)?
        .verify_slice(&signature)
        .map_err(|_| Error::InvalidSignature)?;

    let claims: Claims = b64d_json(claims_b64)?;
    if claims.exp <= now {
        return Err(Error::Expired);
    }

    Ok(claims)
}

/// Read the claims without checking the signature.
///
/// Only used to discover which subject's secret to verify with; nothing returned here
/// may be trusted until [`decode`] succeeds.
///
/// # Errors
/// Returns an error if the token is not structurally a JWT.
pub fn decode_unverified(token: &str) -> Result<Claims, Error> {
    let (_, claims_b64, _) = split(token)?;
    b64d_json(claims_b64)
}
