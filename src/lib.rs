//! # Custos (self-hosted identity provider)
//!
//! `custos` signs users in with a password plus an optional second factor and hands
//! out bearer tokens that other services can check without a shared key server.
//!
//! ## Tokens
//!
//! Every user owns a signing secret. Bearer tokens are HS256 JWS values keyed by
//! that secret, so rotating it voids every token the user holds. Session tokens
//! carry `iss == aud`; tokens minted for an OAuth2 client carry the client id as
//! audience and are additionally backed by a server-side row that can be revoked.
//!
//! ## Multi-factor sign-in
//!
//! A correct password for a user with a second factor answers `422` with a
//! short-lived continuation ticket. The client resubmits the ticket together with
//! a TOTP code or a WebAuthn proof. Tickets are ledger events with a purpose and an
//! expiry and are redeemed at most once. WebAuthn wins over TOTP when both are on.
//!
//! ## OAuth2
//!
//! The authorization-code grant: a signed-in user authorizes a registered client,
//! which exchanges the single-use code (within 20 seconds by default) for a
//! delegated token.

pub mod api;
pub mod cli;
pub mod error;
pub mod ledger;
pub mod oauth2;
pub mod otp;
pub mod password;
pub mod signin;
pub mod store;
pub mod token;
pub mod webauthn;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
