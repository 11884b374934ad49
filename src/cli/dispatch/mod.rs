//! Map parsed CLI arguments to the action the binary runs.

use crate::cli::actions::{client, server::Args, Action};
use crate::cli::commands::{self, auth};
use anyhow::{Context, Result};

/// Map validated CLI matches to the server action, or to a subcommand when one is given.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let auth_opts = auth::Options::parse(matches)?;

    if let Some(sub) = matches.subcommand_matches(commands::client::COMMAND) {
        let options = commands::client::Options::parse(sub)?;
        return Ok(Action::RegisterClient(client::Args {
            dsn,
            issuer: auth_opts.issuer,
            id: options.id,
            name: options.name,
            redirect_uri: options.redirect_uri,
        }));
    }

    Ok(Action::Server(Args {
        port,
        dsn,
        issuer: auth_opts.issuer,
        platform: auth_opts.platform,
        session_ttl_seconds: auth_opts.session_ttl_seconds,
        access_token_ttl_seconds: auth_opts.access_token_ttl_seconds,
        continuation_ttl_seconds: auth_opts.continuation_ttl_seconds,
        authorization_code_ttl_seconds: auth_opts.authorization_code_ttl_seconds,
        totp_enrollment_ttl_seconds: auth_opts.totp_enrollment_ttl_seconds,
        webauthn_rp_id: auth_opts.webauthn.rp_id,
        webauthn_rp_origin: auth_opts.webauthn.rp_origin,
        webauthn_rp_name: auth_opts.webauthn.rp_name,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_action_carries_every_flag() -> anyhow::Result<()> {
        let matches = crate::cli::commands::new().try_get_matches_from(vec![
            "custos",
            "--dsn",
            "postgres://localhost/custos",
            "--port",
            "9000",
            "--issuer",
            "idp",
            "--platform",
            "mobile",
            "--continuation-ttl-seconds",
            "120",
            "--webauthn-rp-origin",
            "https://id.example",
        ])?;

        let Action::Server(args) = handler(&matches)? else {
            panic!("expected the server action");
        };
        assert_eq!(args.port, 9000);
        assert_eq!(args.dsn, "postgres://localhost/custos");
        assert_eq!(args.issuer, "idp");
        assert_eq!(args.platform, "mobile");
        assert_eq!(args.continuation_ttl_seconds, 120);
        assert_eq!(args.webauthn_rp_origin, "https://id.example");
        Ok(())
    }

    #[test]
    fn register_client_subcommand_keeps_dsn_and_issuer() -> anyhow::Result<()> {
        let matches = crate::cli::commands::new().try_get_matches_from(vec![
            "custos",
            "--dsn",
            "postgres://localhost/custos",
            "--issuer",
            "idp",
            "register-client",
            "--client-id",
            "app",
            "--client-name",
            "Demo App",
            "--redirect-uri",
            "https://app.example/callback",
        ])?;

        let Action::RegisterClient(args) = handler(&matches)? else {
            panic!("expected the register-client action");
        };
        assert_eq!(args.dsn, "postgres://localhost/custos");
        assert_eq!(args.issuer, "idp");
        assert_eq!(args.id, "app");
        assert_eq!(args.name, "Demo App");
        assert_eq!(args.redirect_uri, "https://app.example/callback");
        Ok(())
    }
}
