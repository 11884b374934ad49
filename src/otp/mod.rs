//! Time-based one-time passcodes (RFC 6238, SHA-1, 6 digits, 30 s step).
//!
//! Secrets are kept base32-encoded. Verification accepts the current step and one
//! step either side and holds no state, so the same `(secret, code, step)` always
//! gives the same answer.

use thiserror::Error;
use totp_rs::{Algorithm, Secret, TOTP};

pub const DIGITS: usize = 6;
pub const STEP_SECONDS: u64 = 30;
pub const SKEW_STEPS: u8 = 1;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid TOTP secret: {0}")]
    Secret(String),
    #[error("TOTP init error: {0}")]
    Totp(String),
    #[error("QR gen error: {0}")]
    Qr(String),
}

#[derive(Debug, Clone)]
pub struct TotpEngine {
    issuer: String,
    label: String,
}

/// Authenticator apps split the `otpauth` label on `:`, so neither part may carry one.
fn display_label(value: &str) -> String {
    let value = value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"))
        .unwrap_or(value)
        .trim_end_matches('/');
    value.replace(':', "_")
}

impl TotpEngine {
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        let issuer = issuer.into();
        let label = display_label(&issuer);
        Self { issuer, label }
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Issuer as shown in authenticator apps.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Fresh random secret, base32-encoded.
    #[must_use]
    pub fn new_secret(&self) -> String {
        Secret::generate_secret().to_encoded().to_string()
    }

    fn secret_bytes(secret: &str) -> Result<Vec<u8>, Error> {
        Secret::Encoded(secret.to_string())
            .to_bytes()
            .map_err(|e| Error::Secret(format!("{e:?}")))
    }

    /// Codes depend on the secret alone; labels never reach this instance.
    fn clock(secret: &str) -> Result<TOTP, Error> {
        Ok(TOTP::new_unchecked(
            Algorithm::SHA1,
            DIGITS,
            SKEW_STEPS,
            STEP_SECONDS,
            Self::secret_bytes(secret)?,
            None,
            String::new(),
        ))
    }

    fn enrollment(&self, secret: &str, account: &str) -> Result<TOTP, Error> {
        TOTP::new(
            Algorithm::SHA1,
            DIGITS,
            SKEW_STEPS,
            STEP_SECONDS,
            Self::secret_bytes(secret)?,
            Some(self.label.clone()),
            display_label(account),
        )
        .map_err(|e| Error::Totp(e.to_string()))
    }

    /// `otpauth://totp/...` URI for authenticator enrollment.
    ///
    /// # Errors
    /// Returns an error if the secret is not valid base32 or the labels are rejected.
    pub fn provisioning_uri(&self, secret: &str, account: &str) -> Result<String, Error> {
        Ok(self.enrollment(secret, account)?.get_url())
    }

    /// Provisioning URI rendered as a base64 PNG QR code.
    ///
    /// # Errors
    /// Returns an error if the secret is invalid or the image cannot be rendered.
    pub fn qr_png_base64(&self, secret: &str, account: &str) -> Result<String, Error> {
        self.enrollment(secret, account)?
            .get_qr_base64()
            .map_err(Error::Qr)
    }

    /// Provisioning URI rendered as raw PNG bytes.
    ///
    /// # Errors
    /// Returns an error if the secret is invalid or the image cannot be rendered.
    pub fn qr_png(&self, secret: &str, account: &str) -> Result<Vec<u8>, Error> {
        self.enrollment(secret, account)?
            .get_qr_png()
            .map_err(Error::Qr)
    }

    /// Check `code` against `secret` at unix time `at`.
    ///
    /// # Errors
    /// Returns an error only if the stored secret is unusable; a wrong code is `Ok(false)`.
    pub fn verify(&self, secret: &str, code: &str, at: i64) -> Result<bool, Error> {
        let Ok(at) = u64::try_from(at) else {
            return Ok(false);
        };
        let code = code.trim();
        if code.len() != DIGITS || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(false);
        }
        Ok(Self::clock(secret)?.check(code, at))
    }

    /// Code for the step containing `at`.
    ///
    /// # Errors
    /// Returns an error if the secret is unusable.
    pub fn generate(&self, secret: &str, at: i64) -> Result<String, Error> {
        let at = u64::try_from(at).map_err(|_| Error::Totp("negative time".to_string()))?;
        Ok(Self::clock(secret)?.generate(at))
    }
}
