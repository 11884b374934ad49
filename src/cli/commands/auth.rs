//! Token lifetimes, issuer and WebAuthn relying-party flags.

use clap::{Arg, ArgMatches, Command};

pub const ARG_ISSUER: &str = "issuer";
pub const ARG_PLATFORM: &str = "platform";
pub const ARG_SESSION_TTL_SECONDS: &str = "session-ttl-seconds";
pub const ARG_ACCESS_TOKEN_TTL_SECONDS: &str = "access-token-ttl-seconds";
pub const ARG_CONTINUATION_TTL_SECONDS: &str = "continuation-ttl-seconds";
pub const ARG_AUTHORIZATION_CODE_TTL_SECONDS: &str = "authorization-code-ttl-seconds";
pub const ARG_TOTP_ENROLLMENT_TTL_SECONDS: &str = "totp-enrollment-ttl-seconds";
pub const ARG_WEBAUTHN_RP_ID: &str = "webauthn-rp-id";
pub const ARG_WEBAUTHN_RP_ORIGIN: &str = "webauthn-rp-origin";
pub const ARG_WEBAUTHN_RP_NAME: &str = "webauthn-rp-name";

#[derive(Debug)]
pub struct Options {
    pub issuer: String,
    pub platform: String,
    pub session_ttl_seconds: i64,
    pub access_token_ttl_seconds: i64,
    pub continuation_ttl_seconds: i64,
    pub authorization_code_ttl_seconds: i64,
    pub totp_enrollment_ttl_seconds: i64,
    pub webauthn: WebauthnOptions,
}

#[derive(Debug)]
pub struct WebauthnOptions {
    pub rp_id: String,
    pub rp_origin: String,
    pub rp_name: String,
}

impl Options {
    /// Every flag has a default, so parsing only fails on a broken command definition.
    ///
    /// # Errors
    /// Returns an error if a flag is missing from the matches.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        Ok(Self {
            issuer: string(matches, ARG_ISSUER)?,
            platform: string(matches, ARG_PLATFORM)?,
            session_ttl_seconds: seconds(matches, ARG_SESSION_TTL_SECONDS)?,
            access_token_ttl_seconds: seconds(matches, ARG_ACCESS_TOKEN_TTL_SECONDS)?,
            continuation_ttl_seconds: seconds(matches, ARG_CONTINUATION_TTL_SECONDS)?,
            authorization_code_ttl_seconds: seconds(matches, ARG_AUTHORIZATION_CODE_TTL_SECONDS)?,
            totp_enrollment_ttl_seconds: seconds(matches, ARG_TOTP_ENROLLMENT_TTL_SECONDS)?,
            webauthn: WebauthnOptions {
                rp_id: string(matches, ARG_WEBAUTHN_RP_ID)?,
                rp_origin: string(matches, ARG_WEBAUTHN_RP_ORIGIN)?,
                rp_name: string(matches, ARG_WEBAUTHN_RP_NAME)?,
            },
        })
    }
}

fn string(matches: &ArgMatches, id: &str) -> anyhow::Result<String> {
    matches
        .get_one::<String>(id)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("missing required argument: --{id}"))
}

fn seconds(matches: &ArgMatches, id: &str) -> anyhow::Result<i64> {
    matches
        .get_one::<i64>(id)
        .copied()
        .ok_or_else(|| anyhow::anyhow!("missing required argument: --{id}"))
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_token_args(command);
    with_webauthn_args(command)
}

fn ttl_arg(id: &'static str, help: &'static str, env: &'static str, default: &'static str) -> Arg {
    Arg::new(id)
        .long(id)
        .help(help)
        .env(env)
        .default_value(default)
        .value_parser(clap::value_parser!(i64).range(1..))
}

fn with_token_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ISSUER)
                .long(ARG_ISSUER)
                .help("Issuer of every token; also the audience of session tokens")
                .env("CUSTOS_ISSUER")
                .default_value("custos"),
        )
        .arg(
            Arg::new(ARG_PLATFORM)
                .long(ARG_PLATFORM)
                .help("Platform namespace; emails are unique per platform")
                .env("CUSTOS_PLATFORM")
                .default_value("web"),
        )
        .arg(ttl_arg(
            ARG_SESSION_TTL_SECONDS,
            "Bearer token lifetime in seconds",
            "CUSTOS_SESSION_TTL_SECONDS",
            "3600",
        ))
        .arg(ttl_arg(
            ARG_ACCESS_TOKEN_TTL_SECONDS,
            "OAuth2 delegated token lifetime in seconds",
            "CUSTOS_ACCESS_TOKEN_TTL_SECONDS",
            "3600",
        ))
        .arg(ttl_arg(
            ARG_CONTINUATION_TTL_SECONDS,
            "How long a second-factor continuation ticket stays valid",
            "CUSTOS_CONTINUATION_TTL_SECONDS",
            "300",
        ))
        .arg(ttl_arg(
            ARG_AUTHORIZATION_CODE_TTL_SECONDS,
            "How long an authorization code can be exchanged",
            "CUSTOS_AUTHORIZATION_CODE_TTL_SECONDS",
            "20",
        ))
        .arg(ttl_arg(
            ARG_TOTP_ENROLLMENT_TTL_SECONDS,
            "Lifetime of a pending TOTP secret awaiting confirmation",
            "CUSTOS_TOTP_ENROLLMENT_TTL_SECONDS",
            "300",
        ))
}

fn with_webauthn_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_WEBAUTHN_RP_ID)
                .long(ARG_WEBAUTHN_RP_ID)
                .help("WebAuthn relying party id (effective domain)")
                .env("CUSTOS_WEBAUTHN_RP_ID")
                .default_value("localhost"),
        )
        .arg(
            Arg::new(ARG_WEBAUTHN_RP_ORIGIN)
                .long(ARG_WEBAUTHN_RP_ORIGIN)
                .help("WebAuthn relying party origin, also the allowed CORS origin")
                .env("CUSTOS_WEBAUTHN_RP_ORIGIN")
                .default_value("http://localhost:4200"),
        )
        .arg(
            Arg::new(ARG_WEBAUTHN_RP_NAME)
                .long(ARG_WEBAUTHN_RP_NAME)
                .help("WebAuthn relying party display name")
                .env("CUSTOS_WEBAUTHN_RP_NAME")
                .default_value("Custos"),
        )
}
