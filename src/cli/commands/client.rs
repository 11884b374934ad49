//! `register-client` subcommand: create an OAuth2 client and print its secret.

use clap::{Arg, ArgMatches, Command};

pub const COMMAND: &str = "register-client";
pub const ARG_CLIENT_ID: &str = "client-id";
pub const ARG_CLIENT_NAME: &str = "client-name";
pub const ARG_REDIRECT_URI: &str = "redirect-uri";

#[must_use]
pub fn with_subcommand(command: Command) -> Command {
    command.subcommand(
        Command::new(COMMAND)
            .about("Register an OAuth2 client and print its secret once")
            .arg(
                Arg::new(ARG_CLIENT_ID)
                    .long(ARG_CLIENT_ID)
                    .help("Client id, also the audience of its delegated tokens")
                    .required(true),
            )
            .arg(
                Arg::new(ARG_CLIENT_NAME)
                    .long(ARG_CLIENT_NAME)
                    .help("Name shown to users on the consent screen")
                    .required(true),
            )
            .arg(
                Arg::new(ARG_REDIRECT_URI)
                    .long(ARG_REDIRECT_URI)
                    .help("Only redirect URI accepted for this client")
                    .value_parser(parse_redirect_uri)
                    .required(true),
            ),
    )
}

fn parse_redirect_uri(raw: &str) -> Result<String, String> {
    url::Url::parse(raw)
        .map(|_| raw.to_string())
        .map_err(|e| format!("invalid redirect uri: {e}"))
}

#[derive(Debug)]
pub struct Options {
    pub id: String,
    pub name: String,
    pub redirect_uri: String,
}

impl Options {
    /// # Errors
    /// Returns an error if a required flag is missing from the matches.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        Ok(Self {
            id: string(matches, ARG_CLIENT_ID)?,
            name: string(matches, ARG_CLIENT_NAME)?,
            redirect_uri: string(matches, ARG_REDIRECT_URI)?,
        })
    }
}

fn string(matches: &ArgMatches, id: &str) -> anyhow::Result<String> {
    matches
        .get_one::<String>(id)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("missing required argument: --{id}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command() -> Command {
        with_subcommand(Command::new("custos"))
    }

    #[test]
    fn parses_client_flags() -> anyhow::Result<()> {
        let matches = command().try_get_matches_from(vec![
            "custos",
            COMMAND,
            "--client-id",
            "app",
            "--client-name",
            "Demo App",
            "--redirect-uri",
            "https://app.example/callback",
        ])?;
        let sub = matches
            .subcommand_matches(COMMAND)
            .ok_or_else(|| anyhow::anyhow!("no subcommand"))?;
        let options = Options::parse(sub)?;
        assert_eq!(options.id, "app");
        assert_eq!(options.name, "Demo App");
        assert_eq!(options.redirect_uri, "https://app.example/callback");
        Ok(())
    }

    #[test]
    fn redirect_uri_must_be_a_url() {
        let result = command().try_get_matches_from(vec![
            "custos",
            COMMAND,
            "--client-id",
            "app",
            "--client-name",
            "Demo App",
            "--redirect-uri",
            "not a url",
        ]);
        assert_eq!(
            result.map_err(|e| e.kind()).err(),
            Some(clap::error::ErrorKind::ValueValidation)
        );
    }
}
