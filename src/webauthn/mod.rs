//! WebAuthn security keys as a second factor.
//!
//! The cryptographic ceremony belongs to `webauthn-rs`. This module only keeps the
//! in-flight ceremony state on the user record between begin and finish, and the
//! registered keys in the credential store.

use crate::store::{CredentialStore, StoreError, User, UserCredential};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;
use webauthn_rs::prelude::*;

#[derive(Debug, Error)]
pub enum SecurityKeyError {
    #[error("webauthn: {0}")]
    Webauthn(#[from] WebauthnError),
    #[error("invalid relying party origin: {0}")]
    Origin(#[from] url::ParseError),
    #[error("ceremony state: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("no ceremony in progress")]
    NoSession,
    #[error("no security keys registered")]
    NoCredentials,
}

/// Ceremony state parked on the user record between begin and finish.
#[derive(Serialize, Deserialize)]
#[serde(tag = "ceremony", content = "state", rename_all = "snake_case")]
enum Ceremony {
    Registration(SecurityKeyRegistration),
    Authentication(SecurityKeyAuthentication),
}

pub struct SecurityKeyService {
    webauthn: Webauthn,
}

impl SecurityKeyService {
    /// # Errors
    /// Returns an error if the origin does not parse or the relying party is rejected.
    pub fn new(rp_id: &str, rp_origin: &str, rp_name: &str) -> Result<Self, SecurityKeyError> {
        let rp_origin_url = Url::parse(rp_origin)?;
        let webauthn = WebauthnBuilder::new(rp_id, &rp_origin_url)?
            .rp_name(rp_name)
            .build()?;
        Ok(Self { webauthn })
    }

    async fn keys(
        store: &dyn CredentialStore,
        user_id: Uuid,
    ) -> Result<Vec<(UserCredential, SecurityKey)>, SecurityKeyError> {
        let mut keys = Vec::new();
        for stored in store.list_credentials(user_id).await? {
            let key: SecurityKey = serde_json::from_str(&stored.credential)?;
            keys.push((stored, key));
        }
        Ok(keys)
    }

    async fn park(
        store: &dyn CredentialStore,
        user_id: Uuid,
        ceremony: &Ceremony,
    ) -> Result<(), SecurityKeyError> {
        let blob = serde_json::to_string(ceremony)?;
        store.update_webauthn_session(user_id, Some(&blob)).await?;
        Ok(())
    }

    /// Take the parked state off the user record. It is cleared before the finish
    /// step is verified, so each challenge answers once.
    async fn unpark(
        store: &dyn CredentialStore,
        user: &User,
    ) -> Result<Ceremony, SecurityKeyError> {
        let blob = user
            .webauthn_session
            .as_deref()
            .ok_or(SecurityKeyError::NoSession)?;
        store.update_webauthn_session(user.id, None).await?;
        Ok(serde_json::from_str(blob)?)
    }

    /// # Errors
    /// Returns an error if the challenge cannot be created or parked.
    pub async fn register_begin(
        &self,
        store: &dyn CredentialStore,
        user: &User,
    ) -> Result<CreationChallengeResponse, SecurityKeyError> {
        let exclude_credentials: Vec<CredentialID> = Self::keys(store, user.id)
            .await?
            .iter()
            .map(|(_, key)| key.cred_id().clone())
            .collect();

        let (challenge, registration) = self.webauthn.start_securitykey_registration(
            user.id,
            &user.email,
            &user.email,
            Some(exclude_credentials),
            None,
            None,
        )?;
        Self::park(store, user.id, &Ceremony::Registration(registration)).await?;
        Ok(challenge)
    }

    /// Verify the authenticator's attestation, store the key and turn WebAuthn on.
    ///
    /// # Errors
    /// `NoSession` without a pending registration, `Webauthn` when verification fails.
    pub async fn register_finish(
        &self,
        store: &dyn CredentialStore,
        user: &User,
        response: &RegisterPublicKeyCredential,
        now: i64,
    ) -> Result<(), SecurityKeyError> {
        let Ceremony::Registration(registration) = Self::unpark(store, user).await? else {
            return Err(SecurityKeyError::NoSession);
        };
        let key = self
            .webauthn
            .finish_securitykey_registration(response, &registration)?;

        store
            .save_credential(&UserCredential {
                id: Uuid::new_v4(),
                user_id: user.id,
                credential: serde_json::to_string(&key)?,
                created_at: now,
            })
            .await?;
        store.enable_webauthn(user.id).await?;
        Ok(())
    }

    /// # Errors
    /// `NoCredentials` when the user has no keys, otherwise store or webauthn errors.
    pub async fn login_begin(
        &self,
        store: &dyn CredentialStore,
        user: &User,
    ) -> Result<RequestChallengeResponse, SecurityKeyError> {
        let keys: Vec<SecurityKey> = Self::keys(store, user.id)
            .await?
            .into_iter()
            .map(|(_, key)| key)
            .collect();
        if keys.is_empty() {
            return Err(SecurityKeyError::NoCredentials);
        }

        let (challenge, authentication) = self.webauthn.start_securitykey_authentication(&keys)?;
        Self::park(store, user.id, &Ceremony::Authentication(authentication)).await?;
        Ok(challenge)
    }

    /// Verify the assertion and persist the key's new signature counter.
    ///
    /// # Errors
    /// `NoSession` without a pending authentication, `Webauthn` when verification fails.
    pub async fn login_finish(
        &self,
        store: &dyn CredentialStore,
        user: &User,
        response: &PublicKeyCredential,
    ) -> Result<(), SecurityKeyError> {
        let Ceremony::Authentication(authentication) = Self::unpark(store, user).await? else {
            return Err(SecurityKeyError::NoSession);
        };
        let result = self
            .webauthn
            .finish_securitykey_authentication(response, &authentication)?;

        for (stored, mut key) in Self::keys(store, user.id).await? {
            if key.update_credential(&result) == Some(true) {
                store
                    .update_credential(stored.id, &serde_json::to_string(&key)?)
                    .await?;
                debug!(user_id = %user.id, "security key counter updated");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use secrecy::SecretString;

    fn service() -> SecurityKeyService {
        SecurityKeyService::new("localhost", "http://localhost:4200", "Custos").unwrap()
    }

    async fn user(store: &MemoryStore) -> User {
        let user = User {
            id: Uuid::new_v4(),
            platform: "web".to_string(),
            email: "a@x.com".to_string(),
            password_hash: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            created_at: 0,
            totp_enabled: false,
            totp_secret: None,
            totp_pending_secret: None,
            totp_pending_expires_at: None,
            webauthn_enabled: false,
            webauthn_session: None,
            signing_secret: SecretString::from("s".to_string()),
        };
        store.register_user(&user).await.unwrap();
        user
    }

    #[test]
    fn rejects_bad_origin() {
        assert!(matches!(
            SecurityKeyService::new("localhost", "not a url", "Custos"),
            Err(SecurityKeyError::Origin(_))
        ));
    }

    #[tokio::test]
    async fn register_begin_parks_the_ceremony() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let user = user(&store).await;
        let challenge = service().register_begin(&store, &user).await?;
        let json = serde_json::to_value(&challenge)?;
        assert!(json["publicKey"]["challenge"].is_string());

        let stored = store.get_user(user.id).await?;
        let blob: serde_json::Value =
            serde_json::from_str(stored.webauthn_session.as_deref().unwrap())?;
        assert_eq!(blob["ceremony"], "registration");
        Ok(())
    }

    #[tokio::test]
    async fn login_begin_requires_a_key() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let user = user(&store).await;
        let result = service().login_begin(&store, &user).await;
        assert!(matches!(result, Err(SecurityKeyError::NoCredentials)));
        Ok(())
    }

    #[tokio::test]
    async fn finish_without_begin_has_no_session() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let user = user(&store).await;
        let result = SecurityKeyService::unpark(&store, &user).await;
        assert!(matches!(result, Err(SecurityKeyError::NoSession)));
        Ok(())
    }

    #[tokio::test]
    async fn unpark_clears_the_session() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let user = user(&store).await;
        service().register_begin(&store, &user).await?;
        let parked = store.get_user(user.id).await?;
        let ceremony = SecurityKeyService::unpark(&store, &parked).await?;
        assert!(matches!(ceremony, Ceremony::Registration(_)));
        assert!(store.get_user(user.id).await?.webauthn_session.is_none());
        Ok(())
    }
}
