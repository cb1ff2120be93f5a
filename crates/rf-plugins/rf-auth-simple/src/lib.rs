//! # rf-auth-simple
//!
//! Argon2-based implementation of `AuthProvider` for the local backend.
//! Holds one in-memory session; tokens are random and never leave the process.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use rf_core::models::{AuthEvent, AuthUser, Badge, Profile, Role, Session};
use rf_core::traits::{AuthProvider, Credential, CredentialStore, ForumStore};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 16;

pub struct SimpleAuthProvider {
    profiles: Arc<dyn ForumStore>,
    credentials: Arc<dyn CredentialStore>,
    session: RwLock<Option<Session>>,
    events: broadcast::Sender<AuthEvent>,
}

impl SimpleAuthProvider {
    pub fn new(profiles: Arc<dyn ForumStore>, credentials: Arc<dyn CredentialStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { profiles, credentials, session: RwLock::new(None), events }
    }

    fn announce(&self, event: AuthEvent) {
        // Nobody listening is not an error.
        let _ = self.events.send(event);
    }
}

/// Hashes `password` with a fresh random salt.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let mut salt = [0u8; 16];
    getrandom::getrandom(&mut salt).map_err(|e| anyhow!("no randomness available: {e}"))?;
    let salt = SaltString::encode_b64(&salt).map_err(|e| anyhow!("salt encoding failed: {e}"))?;
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("password hashing failed: {e}"))?;
    Ok(hash.to_string())
}

/// Verifies if a provided password matches a stored Argon2 hash.
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(p) => p,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

fn new_token() -> anyhow::Result<String> {
    let mut bytes = [0u8; 32];
    getrandom::getrandom(&mut bytes).map_err(|e| anyhow!("no randomness available: {e}"))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

#[async_trait]
impl AuthProvider for SimpleAuthProvider {
    async fn sign_up(&self, email: &str, password: &str, username: &str) -> anyhow::Result<AuthUser> {
        let email = email.trim().to_lowercase();
        if self.credentials.find_credential(&email).await?.is_some() {
            bail!("User already registered");
        }

        let owned = password.to_string();
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&owned))
            .await
            .context("hashing task failed")??;

        let id = Uuid::now_v7();
        self.profiles
            .create_profile(Profile {
                id,
                username: Some(username.to_string()),
                role: Role::User,
                badge: Badge::Initiate,
                created_at: Some(Utc::now()),
            })
            .await?;
        self.credentials
            .save_credential(Credential { user_id: id, email: email.clone(), password_hash })
            .await?;

        log::info!("registered local account {id}");
        Ok(AuthUser { id, email: Some(email) })
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> anyhow::Result<Session> {
        let email = email.trim().to_lowercase();
        let credential = self.credentials.find_credential(&email).await?;

        let (owned, stored) = (password.to_string(), credential.clone());
        let verified = tokio::task::spawn_blocking(move || {
            stored.is_some_and(|c| verify_password(&owned, &c.password_hash))
        })
        .await
        .context("verification task failed")?;

        let credential = match credential {
            Some(c) if verified => c,
            _ => bail!("Invalid login credentials"),
        };

        let session = Session {
            access_token: new_token()?,
            user: AuthUser { id: credential.user_id, email: Some(credential.email) },
        };
        *self.session.write().await = Some(session.clone());
        self.announce(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> anyhow::Result<()> {
        if self.session.write().await.take().is_some() {
            self.announce(AuthEvent::SignedOut);
        }
        Ok(())
    }

    async fn get_session(&self) -> anyhow::Result<Option<Session>> {
        Ok(self.session.read().await.clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rf_db_sqlite::SqliteForumStore;

    async fn provider() -> (SimpleAuthProvider, Arc<SqliteForumStore>) {
        let store = Arc::new(SqliteForumStore::new("sqlite::memory:").await.unwrap());
        (SimpleAuthProvider::new(store.clone(), store.clone()), store)
    }

    #[test]
    fn test_hash_round_trip_rejects_wrong_password() {
        let hash = hash_password("hunter22").unwrap();
        assert!(verify_password("hunter22", &hash));
        assert!(!verify_password("hunter23", &hash));
        assert!(!verify_password("hunter22", "not-a-hash"));
    }

    #[tokio::test]
    async fn test_sign_up_creates_profile_without_signing_in() {
        let (auth, store) = provider().await;
        let user = auth.sign_up("Neo@Matrix.io", "redpill", "neo").await.unwrap();

        assert_eq!(user.email.as_deref(), Some("neo@matrix.io"));
        let profile = store.get_profile(user.id).await.unwrap().unwrap();
        assert_eq!(profile.username.as_deref(), Some("neo"));
        assert_eq!(profile.badge, Badge::Initiate);
        assert!(auth.get_session().await.unwrap().is_none());

        assert!(auth.sign_up("neo@matrix.io", "again", "neo2").await.is_err());
    }

    #[tokio::test]
    async fn test_sign_in_and_out_broadcast_events() {
        let (auth, _store) = provider().await;
        let user = auth.sign_up("neo@matrix.io", "redpill", "neo").await.unwrap();
        let mut events = auth.subscribe();

        assert!(auth.sign_in_with_password("neo@matrix.io", "bluepill").await.is_err());
        let session = auth.sign_in_with_password(" NEO@matrix.io ", "redpill").await.unwrap();
        assert_eq!(session.user.id, user.id);
        assert_eq!(auth.get_session().await.unwrap(), Some(session.clone()));
        assert_eq!(events.recv().await.unwrap(), AuthEvent::SignedIn(session));

        auth.sign_out().await.unwrap();
        assert_eq!(events.recv().await.unwrap(), AuthEvent::SignedOut);
        assert!(auth.get_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_email_is_rejected() {
        let (auth, _store) = provider().await;
        let err = auth.sign_in_with_password("ghost@zion.io", "x").await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid login credentials");
    }
}
