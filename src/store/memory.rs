use super::{
    AccessTokenRecord, AuthEvent, AuthorizationCode, Client, CredentialStore, ProfileUpdate,
    StoreError, StoreResult, User, UserCredential, UserGrants,
};
use async_trait::async_trait;
use secrecy::SecretString;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    events: HashMap<Uuid, AuthEvent>,
    credentials: HashMap<Uuid, UserCredential>,
    clients: HashMap<String, Client>,
    grants: HashMap<(Uuid, String), UserGrants>,
    codes: HashMap<String, AuthorizationCode>,
    access_tokens: HashMap<String, AccessTokenRecord>,
    nonces: HashSet<(String, String)>,
}

/// In-process store. One lock guards every table, so each call is atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every ledger row, oldest first.
    pub async fn events(&self) -> Vec<AuthEvent> {
        let tables = self.tables.lock().await;
        let mut events: Vec<AuthEvent> = tables.events.values().cloned().collect();
        events.sort_by_key(|event| event.created_at);
        events
    }
}

fn with_user<F>(tables: &mut Tables, id: Uuid, apply: F) -> StoreResult<()>
where
    F: FnOnce(&mut User),
{
    let user = tables.users.get_mut(&id).ok_or(StoreError::NotFound)?;
    apply(user);
    Ok(())
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn register_user(&self, user: &User) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let taken = tables
            .users
            .values()
            .any(|u| u.id == user.id || (u.platform == user.platform && u.email == user.email));
        if taken {
            return Err(StoreError::Conflict);
        }
        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<User> {
        let tables = self.tables.lock().await;
        tables.users.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn find_user_by_email(&self, platform: &str, email: &str) -> StoreResult<User> {
        let tables = self.tables.lock().await;
        tables
            .users
            .values()
            .find(|u| u.platform == platform && u.email == email)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn delete_user(&self, id: Uuid) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        tables.users.remove(&id).ok_or(StoreError::NotFound)?;
        tables.credentials.retain(|_, c| c.user_id != id);
        tables.grants.retain(|(user_id, _), _| *user_id != id);
        tables.codes.retain(|_, c| c.user_id != id);
        tables.access_tokens.retain(|_, t| t.user_id != id);
        Ok(())
    }

    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if let Some(email) = &update.email {
            let platform = tables
                .users
                .get(&id)
                .map(|u| u.platform.clone())
                .ok_or(StoreError::NotFound)?;
            let taken = tables
                .users
                .values()
                .any(|u| u.id != id && u.platform == platform && &u.email == email);
            if taken {
                return Err(StoreError::Conflict);
            }
        }
        with_user(&mut tables, id, |user| {
            if let Some(email) = &update.email {
                user.email.clone_from(email);
            }
            if let Some(first_name) = &update.first_name {
                user.first_name.clone_from(first_name);
            }
            if let Some(last_name) = &update.last_name {
                user.last_name.clone_from(last_name);
            }
        })
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        with_user(&mut tables, id, |user| {
            user.password_hash = password_hash.to_string();
        })
    }

    async fn update_totp_pending(
        &self,
        id: Uuid,
        secret: &str,
        expires_at: i64,
    ) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        with_user(&mut tables, id, |user| {
            user.totp_pending_secret = Some(secret.to_string());
            user.totp_pending_expires_at = Some(expires_at);
        })
    }

    async fn enable_totp(&self, id: Uuid, secret: &str) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        with_user(&mut tables, id, |user| {
            user.totp_enabled = true;
            user.totp_secret = Some(secret.to_string());
            user.totp_pending_secret = None;
            user.totp_pending_expires_at = None;
        })
    }

    async fn disable_totp(&self, id: Uuid) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        with_user(&mut tables, id, |user| {
            user.totp_enabled = false;
            user.totp_secret = None;
            user.totp_pending_secret = None;
            user.totp_pending_expires_at = None;
        })
    }

    async fn update_webauthn_session(&self, id: Uuid, session: Option<&str>) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        with_user(&mut tables, id, |user| {
            user.webauthn_session = session.map(str::to_string);
        })
    }

    async fn enable_webauthn(&self, id: Uuid) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        with_user(&mut tables, id, |user| {
            user.webauthn_enabled = true;
            user.webauthn_session = None;
        })
    }

    async fn rotate_signing_secret(&self, id: Uuid, secret: &str) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        with_user(&mut tables, id, |user| {
            user.signing_secret = SecretString::from(secret.to_string());
        })
    }

    async fn record_event(&self, event: &AuthEvent) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.events.contains_key(&event.id) {
            return Err(StoreError::Conflict);
        }
        tables.events.insert(event.id, event.clone());
        Ok(())
    }

    async fn get_event(&self, id: Uuid) -> StoreResult<AuthEvent> {
        let tables = self.tables.lock().await;
        tables.events.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn claim_event(&self, id: Uuid, now: i64) -> StoreResult<AuthEvent> {
        let mut tables = self.tables.lock().await;
        match tables.events.get_mut(&id) {
            Some(event) if event.consumed_at.is_none() => {
                event.consumed_at = Some(now);
                Ok(event.clone())
            }
            _ => Err(StoreError::NotFound),
        }
    }

    async fn save_credential(&self, credential: &UserCredential) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if !tables.users.contains_key(&credential.user_id) {
            return Err(StoreError::NotFound);
        }
        tables.credentials.insert(credential.id, credential.clone());
        Ok(())
    }

    async fn list_credentials(&self, user_id: Uuid) -> StoreResult<Vec<UserCredential>> {
        let tables = self.tables.lock().await;
        let mut credentials: Vec<UserCredential> = tables
            .credentials
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        credentials.sort_by_key(|c| c.created_at);
        Ok(credentials)
    }

    async fn update_credential(&self, id: Uuid, credential: &str) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let stored = tables.credentials.get_mut(&id).ok_or(StoreError::NotFound)?;
        stored.credential = credential.to_string();
        Ok(())
    }

    async fn register_client(&self, client: &Client) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.clients.contains_key(&client.id) {
            return Err(StoreError::Conflict);
        }
        tables.clients.insert(client.id.clone(), client.clone());
        Ok(())
    }

    async fn get_client(&self, id: &str) -> StoreResult<Client> {
        let tables = self.tables.lock().await;
        tables.clients.get(id).cloned().ok_or(StoreError::NotFound)
    }

    async fn upsert_grants(&self, grants: &UserGrants) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        tables
            .grants
            .insert((grants.user_id, grants.client_id.clone()), grants.clone());
        Ok(())
    }

    async fn get_grants(&self, user_id: Uuid, client_id: &str) -> StoreResult<UserGrants> {
        let tables = self.tables.lock().await;
        tables
            .grants
            .get(&(user_id, client_id.to_string()))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn save_authorization_code(&self, code: &AuthorizationCode) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.codes.contains_key(&code.code) {
            return Err(StoreError::Conflict);
        }
        tables.codes.insert(code.code.clone(), code.clone());
        Ok(())
    }

    async fn consume_authorization_code(
        &self,
        code: &str,
        client_id: &str,
    ) -> StoreResult<AuthorizationCode> {
        let mut tables = self.tables.lock().await;
        let matches = tables
            .codes
            .get(code)
            .is_some_and(|stored| stored.client_id == client_id);
        if !matches {
            return Err(StoreError::NotFound);
        }
        tables.codes.remove(code).ok_or(StoreError::NotFound)
    }

    async fn save_access_token(&self, record: &AccessTokenRecord) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.access_tokens.contains_key(&record.token_id) {
            return Err(StoreError::Conflict);
        }
        tables
            .access_tokens
            .insert(record.token_id.clone(), record.clone());
        Ok(())
    }

    async fn get_access_token(&self, token_id: &str) -> StoreResult<AccessTokenRecord> {
        let tables = self.tables.lock().await;
        tables
            .access_tokens
            .get(token_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn revoke_access_token(&self, token_id: &str) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        tables
            .access_tokens
            .remove(token_id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn record_nonce(&self, client_id: &str, nonce: &str, _now: i64) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        Ok(tables
            .nonces
            .insert((client_id.to_string(), nonce.to_string())))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ledger::Purpose;

    fn user(email: &str) -> User {
        User {
            id: Uuid::new_v4(),
            platform: "web".to_string(),
            email: email.to_string(),
            password_hash: "hash".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            created_at: 1_700_000_000,
            totp_enabled: false,
            totp_secret: None,
            totp_pending_secret: None,
            totp_pending_expires_at: None,
            webauthn_enabled: false,
            webauthn_session: None,
            signing_secret: SecretString::from("secret".to_string()),
        }
    }

    #[tokio::test]
    async fn email_is_unique_per_platform() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        store.register_user(&user("a@x.com")).await?;
        assert!(matches!(
            store.register_user(&user("a@x.com")).await,
            Err(StoreError::Conflict)
        ));

        let mut other = user("a@x.com");
        other.platform = "mobile".to_string();
        store.register_user(&other).await?;
        Ok(())
    }

    #[tokio::test]
    async fn narrow_updates_leave_other_fields_alone() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let u = user("a@x.com");
        store.register_user(&u).await?;
        store.update_totp_pending(u.id, "PENDING", 10).await?;
        store
            .update_profile(
                u.id,
                &ProfileUpdate {
                    first_name: Some("Grace".to_string()),
                    ..ProfileUpdate::default()
                },
            )
            .await?;

        let stored = store.get_user(u.id).await?;
        assert_eq!(stored.first_name, "Grace");
        assert_eq!(stored.last_name, "Lovelace");
        assert_eq!(stored.totp_pending_secret.as_deref(), Some("PENDING"));

        store.enable_totp(u.id, "PENDING").await?;
        let stored = store.get_user(u.id).await?;
        assert!(stored.totp_enabled);
        assert!(stored.totp_pending_secret.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn events_are_claimed_once() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let event = AuthEvent {
            id: Uuid::new_v4(),
            user_id: None,
            name: "totp_required".to_string(),
            created_at: 100,
            ip_address: String::new(),
            user_agent: String::new(),
            purpose: Some(Purpose::AwaitTotp),
            expires_at: Some(400),
            consumed_at: None,
        };
        store.record_event(&event).await?;
        let claimed = store.claim_event(event.id, 150).await?;
        assert_eq!(claimed.consumed_at, Some(150));
        assert!(matches!(
            store.claim_event(event.id, 151).await,
            Err(StoreError::NotFound)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn authorization_codes_are_single_use_and_client_bound() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let code = AuthorizationCode {
            code: "abc".to_string(),
            client_id: "client-1".to_string(),
            user_id: Uuid::new_v4(),
            redirect_uri: "https://app.example/cb".to_string(),
            created_at: 100,
        };
        store.save_authorization_code(&code).await?;
        assert!(matches!(
            store.consume_authorization_code("abc", "client-2").await,
            Err(StoreError::NotFound)
        ));
        assert_eq!(store.consume_authorization_code("abc", "client-1").await?, code);
        assert!(matches!(
            store.consume_authorization_code("abc", "client-1").await,
            Err(StoreError::NotFound)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn nonces_are_remembered_per_client() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        assert!(store.record_nonce("c1", "n1", 1).await?);
        assert!(!store.record_nonce("c1", "n1", 2).await?);
        assert!(store.record_nonce("c2", "n1", 3).await?);
        Ok(())
    }

    #[tokio::test]
    async fn deleting_a_user_drops_owned_rows() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let u = user("a@x.com");
        store.register_user(&u).await?;
        store
            .save_credential(&UserCredential {
                id: Uuid::new_v4(),
                user_id: u.id,
                credential: "{}".to_string(),
                created_at: 1,
            })
            .await?;
        store.delete_user(u.id).await?;
        assert!(store.list_credentials(u.id).await?.is_empty());
        assert!(matches!(store.get_user(u.id).await, Err(StoreError::NotFound)));
        Ok(())
    }
}
