use crate::{api, api::handlers::auth::AuthConfig, cli::telemetry};
use anyhow::Result;
use tracing::debug;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub issuer: String,
    pub platform: String,
    pub session_ttl_seconds: i64,
    pub access_token_ttl_seconds: i64,
    pub continuation_ttl_seconds: i64,
    pub authorization_code_ttl_seconds: i64,
    pub totp_enrollment_ttl_seconds: i64,
    pub webauthn_rp_id: String,
    pub webauthn_rp_origin: String,
    pub webauthn_rp_name: String,
}

impl Args {
    fn auth_config(&self) -> AuthConfig {
        AuthConfig::new()
            .with_issuer(self.issuer.clone())
            .with_platform(self.platform.clone())
            .with_session_ttl_seconds(self.session_ttl_seconds)
            .with_access_token_ttl_seconds(self.access_token_ttl_seconds)
            .with_continuation_ttl_seconds(self.continuation_ttl_seconds)
            .with_authorization_code_ttl_seconds(self.authorization_code_ttl_seconds)
            .with_totp_enrollment_ttl_seconds(self.totp_enrollment_ttl_seconds)
            .with_webauthn_rp_id(self.webauthn_rp_id.clone())
            .with_webauthn_rp_origin(self.webauthn_rp_origin.clone())
            .with_webauthn_rp_name(self.webauthn_rp_name.clone())
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let auth_config = args.auth_config();
    debug!(?auth_config, "starting server");

    let result = api::new(args.port, args.dsn, auth_config).await;

    telemetry::shutdown_tracer();

    result
}
