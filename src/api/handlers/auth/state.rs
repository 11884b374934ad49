//! Auth state and configuration shared by every handler.

use crate::{
    ledger::Origin,
    oauth2::Flow,
    otp::TotpEngine,
    signin::Signin,
    store::CredentialStore,
    webauthn::{SecurityKeyError, SecurityKeyService},
};
use std::sync::Arc;

const DEFAULT_ISSUER: &str = "custos";
const DEFAULT_PLATFORM: &str = "web";
const DEFAULT_SESSION_TTL_SECONDS: i64 = 60 * 60;
const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 60 * 60;
const DEFAULT_CONTINUATION_TTL_SECONDS: i64 = 5 * 60;
const DEFAULT_AUTHORIZATION_CODE_TTL_SECONDS: i64 = 20;
const DEFAULT_TOTP_ENROLLMENT_TTL_SECONDS: i64 = 5 * 60;
const DEFAULT_WEBAUTHN_RP_ID: &str = "localhost";
const DEFAULT_WEBAUTHN_RP_ORIGIN: &str = "http://localhost:4200";
const DEFAULT_WEBAUTHN_RP_NAME: &str = "Custos";

#[derive(Clone, Debug)]
pub struct AuthConfig {
    issuer: String,
    platform: String,
    session_ttl_seconds: i64,
    access_token_ttl_seconds: i64,
    continuation_ttl_seconds: i64,
    authorization_code_ttl_seconds: i64,
    totp_enrollment_ttl_seconds: i64,
    webauthn_rp_id: String,
    webauthn_rp_origin: String,
    webauthn_rp_name: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            issuer: DEFAULT_ISSUER.to_string(),
            platform: DEFAULT_PLATFORM.to_string(),
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            access_token_ttl_seconds: DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
            continuation_ttl_seconds: DEFAULT_CONTINUATION_TTL_SECONDS,
            authorization_code_ttl_seconds: DEFAULT_AUTHORIZATION_CODE_TTL_SECONDS,
            totp_enrollment_ttl_seconds: DEFAULT_TOTP_ENROLLMENT_TTL_SECONDS,
            webauthn_rp_id: DEFAULT_WEBAUTHN_RP_ID.to_string(),
            webauthn_rp_origin: DEFAULT_WEBAUTHN_RP_ORIGIN.to_string(),
            webauthn_rp_name: DEFAULT_WEBAUTHN_RP_NAME.to_string(),
        }
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: String) -> Self {
        self.issuer = issuer;
        self
    }

    #[must_use]
    pub fn with_platform(mut self, platform: String) -> Self {
        self.platform = platform;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_access_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_continuation_ttl_seconds(mut self, seconds: i64) -> Self {
        self.continuation_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_authorization_code_ttl_seconds(mut self, seconds: i64) -> Self {
        self.authorization_code_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_totp_enrollment_ttl_seconds(mut self, seconds: i64) -> Self {
        self.totp_enrollment_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_webauthn_rp_id(mut self, rp_id: String) -> Self {
        self.webauthn_rp_id = rp_id;
        self
    }

    #[must_use]
    pub fn with_webauthn_rp_origin(mut self, rp_origin: String) -> Self {
        // Origins never carry a trailing slash.
        self.webauthn_rp_origin = rp_origin.trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_webauthn_rp_name(mut self, rp_name: String) -> Self {
        self.webauthn_rp_name = rp_name;
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn platform(&self) -> &str {
        &self.platform
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn access_token_ttl_seconds(&self) -> i64 {
        self.access_token_ttl_seconds
    }

    #[must_use]
    pub fn continuation_ttl_seconds(&self) -> i64 {
        self.continuation_ttl_seconds
    }

    #[must_use]
    pub fn authorization_code_ttl_seconds(&self) -> i64 {
        self.authorization_code_ttl_seconds
    }

    #[must_use]
    pub fn totp_enrollment_ttl_seconds(&self) -> i64 {
        self.totp_enrollment_ttl_seconds
    }

    #[must_use]
    pub fn webauthn_rp_id(&self) -> &str {
        &self.webauthn_rp_id
    }

    #[must_use]
    pub fn webauthn_rp_origin(&self) -> &str {
        &self.webauthn_rp_origin
    }

    #[must_use]
    pub fn webauthn_rp_name(&self) -> &str {
        &self.webauthn_rp_name
    }
}

pub struct AuthState {
    config: AuthConfig,
    store: Arc<dyn CredentialStore>,
    otp: TotpEngine,
    security_keys: SecurityKeyService,
}

impl AuthState {
    /// # Errors
    /// Returns an error if the WebAuthn relying party settings are invalid.
    pub fn new(
        config: AuthConfig,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Self, SecurityKeyError> {
        let security_keys = SecurityKeyService::new(
            config.webauthn_rp_id(),
            config.webauthn_rp_origin(),
            config.webauthn_rp_name(),
        )?;
        let otp = TotpEngine::new(config.issuer());
        Ok(Self {
            config,
            store,
            otp,
            security_keys,
        })
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &dyn CredentialStore {
        self.store.as_ref()
    }

    #[must_use]
    pub fn otp(&self) -> &TotpEngine {
        &self.otp
    }

    #[must_use]
    pub fn security_keys(&self) -> &SecurityKeyService {
        &self.security_keys
    }

    /// Sign-in attempt bound to this request's origin and clock.
    #[must_use]
    pub fn signin(&self, origin: Origin, now: i64) -> Signin<'_> {
        Signin {
            store: self.store(),
            otp: &self.otp,
            issuer: self.config.issuer(),
            platform: self.config.platform(),
            session_ttl_seconds: self.config.session_ttl_seconds(),
            continuation_ttl_seconds: self.config.continuation_ttl_seconds(),
            origin,
            now,
        }
    }

    #[must_use]
    pub fn oauth2(&self, now: i64) -> Flow<'_> {
        Flow {
            store: self.store(),
            issuer: self.config.issuer(),
            access_token_ttl_seconds: self.config.access_token_ttl_seconds(),
            authorization_code_ttl_seconds: self.config.authorization_code_ttl_seconds(),
            now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AuthConfig, AuthState};
    use crate::store::MemoryStore;
    use std::sync::Arc;

    #[test]
    fn auth_config_defaults_and_overrides() {
        let config = AuthConfig::new();

        assert_eq!(config.issuer(), super::DEFAULT_ISSUER);
        assert_eq!(config.platform(), super::DEFAULT_PLATFORM);
        assert_eq!(config.continuation_ttl_seconds(), 300);
        assert_eq!(config.authorization_code_ttl_seconds(), 20);
        assert_eq!(config.webauthn_rp_origin(), "http://localhost:4200");

        let config = config
            .with_issuer("idp".to_string())
            .with_platform("mobile".to_string())
            .with_session_ttl_seconds(60)
            .with_continuation_ttl_seconds(30)
            .with_webauthn_rp_origin("https://id.example/".to_string());

        assert_eq!(config.issuer(), "idp");
        assert_eq!(config.platform(), "mobile");
        assert_eq!(config.session_ttl_seconds(), 60);
        assert_eq!(config.continuation_ttl_seconds(), 30);
        assert_eq!(config.webauthn_rp_origin(), "https://id.example");
    }

    #[test]
    fn auth_state_wires_the_issuer_into_the_totp_engine() -> anyhow::Result<()> {
        let config = AuthConfig::new().with_issuer("idp".to_string());
        let state = AuthState::new(config, Arc::new(MemoryStore::new()))?;
        assert_eq!(state.otp().issuer(), "idp");
        assert_eq!(state.signin(Default::default(), 0).issuer, "idp");
        Ok(())
    }

    #[test]
    fn auth_state_rejects_invalid_relying_party() {
        let config = AuthConfig::new().with_webauthn_rp_origin("not a url".to_string());
        assert!(AuthState::new(config, Arc::new(MemoryStore::new())).is_err());
    }
}
