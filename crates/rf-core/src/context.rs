//! # Application Contexts
//!
//! Process-wide session identity and UI preferences. Both are built once at
//! startup and handed to whoever needs them; neither is a global.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;

use crate::error::{AppError, Result};
use crate::models::{AuthEvent, AuthUser, Session, SessionUser};
use crate::traits::{AuthProvider, ForumStore, PreferenceStore};
use crate::validation;

pub const THEME_KEY: &str = "theme";
pub const SHOW_NSFW_KEY: &str = "showNSFW";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Theme {
    type Err = AppError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            other => Err(AppError::ValidationError(format!("unknown theme '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Preferences {
    pub theme: Theme,
    pub show_nsfw: bool,
}

/// Theme and NSFW visibility, read once at startup and written on toggle.
pub struct SettingsContext {
    store: Arc<dyn PreferenceStore>,
    state: RwLock<Preferences>,
}

impl SettingsContext {
    /// `default_theme` applies when nothing was stored yet.
    pub async fn init(store: Arc<dyn PreferenceStore>, default_theme: Theme) -> Self {
        let theme = match store.get(THEME_KEY).await {
            Ok(Some(raw)) => raw.parse().unwrap_or_else(|_| {
                log::warn!("ignoring stored theme '{raw}'");
                default_theme
            }),
            Ok(None) => default_theme,
            Err(err) => {
                log::warn!("could not read theme preference: {err:#}");
                default_theme
            }
        };
        let show_nsfw = match store.get(SHOW_NSFW_KEY).await {
            Ok(value) => value.as_deref() == Some("true"),
            Err(err) => {
                log::warn!("could not read NSFW preference: {err:#}");
                false
            }
        };

        Self { store, state: RwLock::new(Preferences { theme, show_nsfw }) }
    }

    pub async fn preferences(&self) -> Preferences {
        *self.state.read().await
    }

    /// Flips the theme. The in-memory value changes even if persisting fails.
    pub async fn toggle_theme(&self) -> Result<Theme> {
        let theme = {
            let mut state = self.state.write().await;
            state.theme = state.theme.toggled();
            state.theme
        };
        self.persist(THEME_KEY, theme.as_str()).await?;
        Ok(theme)
    }

    pub async fn toggle_nsfw(&self) -> Result<bool> {
        let show = {
            let mut state = self.state.write().await;
            state.show_nsfw = !state.show_nsfw;
            state.show_nsfw
        };
        self.persist(SHOW_NSFW_KEY, if show { "true" } else { "false" }).await?;
        Ok(show)
    }

    async fn persist(&self, key: &str, value: &str) -> Result<()> {
        self.store
            .set(key, value)
            .await
            .map_err(|e| AppError::Internal(format!("could not save preference '{key}': {e:#}")))
    }
}

/// The signed-in user, kept in step with the auth provider.
pub struct SessionContext {
    auth: Arc<dyn AuthProvider>,
    store: Arc<dyn ForumStore>,
    current: Arc<RwLock<Option<SessionUser>>>,
    listener: JoinHandle<()>,
}

impl SessionContext {
    /// Restores any existing session and starts listening for session changes.
    pub async fn init(auth: Arc<dyn AuthProvider>, store: Arc<dyn ForumStore>) -> Self {
        let current = Arc::new(RwLock::new(None));
        // Subscribe before reading so a sign-in in between is not lost.
        let events = auth.subscribe();

        match auth.get_session().await {
            Ok(Some(session)) => {
                *current.write().await = Some(resolve(store.as_ref(), &session).await);
            }
            Ok(None) => {}
            Err(err) => log::warn!("could not restore session: {err:#}"),
        }

        let listener = tokio::spawn(listen(events, store.clone(), current.clone()));
        Self { auth, store, current, listener }
    }

    pub async fn current(&self) -> Option<SessionUser> {
        self.current.read().await.clone()
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<SessionUser> {
        validation::validate_credentials(email, password)?;
        let session = self.auth.sign_in_with_password(email.trim(), password).await?;
        let user = resolve(self.store.as_ref(), &session).await;
        *self.current.write().await = Some(user.clone());
        log::info!("signed in as {}", user.id);
        Ok(user)
    }

    /// Registers without signing in; the provider may require confirmation.
    pub async fn sign_up(&self, email: &str, password: &str, username: &str) -> Result<AuthUser> {
        validation::validate_credentials(email, password)?;
        validation::validate_new_password(password)?;
        let username = validation::validate_username(username)?;
        let user = self.auth.sign_up(email.trim(), password, &username).await?;
        log::info!("registered account {}", user.id);
        Ok(user)
    }

    pub async fn sign_out(&self) -> Result<()> {
        self.auth.sign_out().await?;
        *self.current.write().await = None;
        Ok(())
    }

    /// Refetches the current user's profile, e.g. after a role change.
    pub async fn reload_profile(&self) {
        let mut current = self.current.write().await;
        if let Some(user) = current.as_mut() {
            match self.store.get_profile(user.id).await {
                Ok(profile) => user.profile = profile,
                Err(err) => log::warn!("could not reload profile {}: {err:#}", user.id),
            }
        }
    }

    /// Stops listening for session changes.
    pub fn shutdown(&self) {
        self.listener.abort();
    }
}

impl Drop for SessionContext {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

async fn resolve(store: &dyn ForumStore, session: &Session) -> SessionUser {
    let profile = store.get_profile(session.user.id).await.unwrap_or_else(|err| {
        log::warn!("could not load profile {}: {err:#}", session.user.id);
        None
    });
    SessionUser { id: session.user.id, email: session.user.email.clone(), profile }
}

async fn listen(
    mut events: broadcast::Receiver<AuthEvent>,
    store: Arc<dyn ForumStore>,
    current: Arc<RwLock<Option<SessionUser>>>,
) {
    loop {
        match events.recv().await {
            Ok(AuthEvent::SignedIn(session)) => {
                let user = resolve(store.as_ref(), &session).await;
                *current.write().await = Some(user);
            }
            Ok(AuthEvent::SignedOut) => *current.write().await = None,
            Err(RecvError::Lagged(skipped)) => {
                log::warn!("session listener skipped {skipped} auth events");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuthUser, Profile, Role};
    use crate::traits::{MockAuthProvider, MockForumStore, MockPreferenceStore};
    use std::time::Duration;
    use uuid::Uuid;

    fn session(id: Uuid) -> Session {
        Session {
            access_token: "token".into(),
            user: AuthUser { id, email: Some("a@b.c".into()) },
        }
    }

    fn profile(id: Uuid, role: Role) -> Profile {
        Profile { id, username: Some("morpheus".into()), role, badge: Default::default(), created_at: None }
    }

    #[tokio::test]
    async fn test_settings_read_stored_values() {
        let mut prefs = MockPreferenceStore::new();
        prefs.expect_get().returning(|key| {
            Ok(match key {
                THEME_KEY => Some("dark".to_string()),
                SHOW_NSFW_KEY => Some("true".to_string()),
                _ => None,
            })
        });
        let settings = SettingsContext::init(Arc::new(prefs), Theme::Light).await;
        assert_eq!(
            settings.preferences().await,
            Preferences { theme: Theme::Dark, show_nsfw: true }
        );
    }

    #[tokio::test]
    async fn test_settings_fall_back_and_persist_toggles() {
        let mut prefs = MockPreferenceStore::new();
        prefs.expect_get().returning(|_| Ok(None));
        prefs
            .expect_set()
            .withf(|key, value| key.to_string() == SHOW_NSFW_KEY && value.to_string() == "true")
            .times(1)
            .returning(|_, _| Ok(()));
        prefs
            .expect_set()
            .withf(|key, value| key.to_string() == THEME_KEY && value.to_string() == "light")
            .times(1)
            .returning(|_, _| Ok(()));

        let settings = SettingsContext::init(Arc::new(prefs), Theme::Dark).await;
        assert_eq!(settings.preferences().await, Preferences { theme: Theme::Dark, show_nsfw: false });

        assert!(settings.toggle_nsfw().await.unwrap());
        assert_eq!(settings.toggle_theme().await.unwrap(), Theme::Light);
    }

    #[tokio::test]
    async fn test_session_restores_profile_and_follows_sign_out() {
        let id = Uuid::now_v7();
        let (tx, _) = broadcast::channel(8);
        let sender = tx.clone();

        let mut auth = MockAuthProvider::new();
        auth.expect_subscribe().returning(move || tx.subscribe());
        auth.expect_get_session().returning(move || Ok(Some(session(id))));

        let mut store = MockForumStore::new();
        store
            .expect_get_profile()
            .returning(|id| Ok(Some(profile(id, Role::Admin))));

        let ctx = SessionContext::init(Arc::new(auth), Arc::new(store)).await;
        let user = ctx.current().await.expect("restored session");
        assert!(user.is_admin());
        assert_eq!(user.display_name(), "morpheus");

        sender.send(AuthEvent::SignedOut).unwrap();
        for _ in 0..50 {
            if ctx.current().await.is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(ctx.current().await.is_none());
        ctx.shutdown();
    }

    #[tokio::test]
    async fn test_sign_in_rejects_blank_credentials_without_calling_provider() {
        let (tx, _) = broadcast::channel(1);
        let mut auth = MockAuthProvider::new();
        auth.expect_subscribe().returning(move || tx.subscribe());
        auth.expect_get_session().returning(|| Ok(None));
        auth.expect_sign_in_with_password().never();

        let ctx = SessionContext::init(Arc::new(auth), Arc::new(MockForumStore::new())).await;
        let err = ctx.sign_in("  ", "secret").await.unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_sign_up_rejects_short_password_without_calling_provider() {
        let (tx, _) = broadcast::channel(1);
        let mut auth = MockAuthProvider::new();
        auth.expect_subscribe().returning(move || tx.subscribe());
        auth.expect_get_session().returning(|| Ok(None));
        auth.expect_sign_up().never();

        let ctx = SessionContext::init(Arc::new(auth), Arc::new(MockForumStore::new())).await;
        let err = ctx.sign_up("neo@matrix.io", "abc", "neo").await.unwrap_err();
        assert!(matches!(err, AppError::ValidationError(m) if m.contains("at least 6")));
    }
}
