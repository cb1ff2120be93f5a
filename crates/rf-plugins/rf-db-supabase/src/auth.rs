//! `AuthProvider` over the GoTrue-style `/auth/v1` endpoints.

use async_trait::async_trait;
use reqwest::Method;
use rf_core::models::{AuthEvent, AuthUser, Session};
use rf_core::traits::AuthProvider;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{broadcast, RwLock};

use crate::client::{BackendError, RestClient};

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    user: AuthUser,
}

/// Sign-up answers with either a bare user (confirmation pending) or a
/// full session.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session { user: AuthUser },
    User(AuthUser),
}

pub struct SupabaseAuth {
    client: RestClient,
    session: RwLock<Option<Session>>,
    events: broadcast::Sender<AuthEvent>,
}

impl SupabaseAuth {
    pub fn new(client: RestClient) -> Self {
        let (events, _) = broadcast::channel(16);
        Self { client, session: RwLock::new(None), events }
    }
}

/// Reduces a backend rejection to its reason, which is shown to the user as is.
fn rejection(err: anyhow::Error) -> anyhow::Error {
    match err.downcast::<BackendError>() {
        Ok(rejected) => {
            log::info!("auth request rejected with {}", rejected.status);
            anyhow::Error::msg(rejected.message)
        }
        Err(other) => other,
    }
}

#[async_trait]
impl AuthProvider for SupabaseAuth {
    async fn sign_up(&self, email: &str, password: &str, username: &str) -> anyhow::Result<AuthUser> {
        let url = self.client.url("/auth/v1/signup")?;
        let req = self.client.request(Method::POST, url).await.json(&json!({
            "email": email,
            "password": password,
            "data": { "username": username },
        }));
        let user = match self.client.send_json::<SignUpResponse>(req).await.map_err(rejection)? {
            SignUpResponse::Session { user } | SignUpResponse::User(user) => user,
        };
        log::info!("registered account {}", user.id);
        Ok(user)
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> anyhow::Result<Session> {
        let mut url = self.client.url("/auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", "password");
        let req = self
            .client
            .request(Method::POST, url)
            .await
            .json(&json!({ "email": email, "password": password }));
        let token: TokenResponse = self.client.send_json(req).await.map_err(rejection)?;

        let session = Session { access_token: token.access_token, user: token.user };
        self.client.set_access_token(Some(session.access_token.clone())).await;
        *self.session.write().await = Some(session.clone());
        let _ = self.events.send(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    /// The local session is dropped even if the backend call fails.
    async fn sign_out(&self) -> anyhow::Result<()> {
        if self.session.read().await.is_none() {
            return Ok(());
        }
        let url = self.client.url("/auth/v1/logout")?;
        let req = self.client.request(Method::POST, url).await;
        if let Err(err) = self.client.send_empty(req).await {
            log::warn!("backend sign out failed: {err:#}");
        }

        self.client.set_access_token(None).await;
        *self.session.write().await = None;
        let _ = self.events.send(AuthEvent::SignedOut);
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
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use secrecy::SecretString;
    use std::net::TcpListener;

    const USER_ID: &str = "0190a0b8-8a9c-7cc0-a6a4-1f1f3f6f0b09";

    fn can_bind_localhost() -> bool {
        TcpListener::bind("127.0.0.1:0").is_ok()
    }

    fn auth_for(server: &MockServer) -> SupabaseAuth {
        let url = url::Url::parse(&server.base_url()).unwrap();
        SupabaseAuth::new(RestClient::new(url, SecretString::from("anon-key".to_string())))
    }

    #[tokio::test]
    async fn test_sign_up_sends_username_metadata() {
        if !can_bind_localhost() {
            return;
        }
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/auth/v1/signup").json_body(serde_json::json!({
                "email": "neo@matrix.io",
                "password": "redpill",
                "data": { "username": "neo" }
            }));
            then.status(200).json_body(serde_json::json!({ "id": USER_ID, "email": "neo@matrix.io" }));
        });

        let auth = auth_for(&server);
        let user = auth.sign_up("neo@matrix.io", "redpill", "neo").await.unwrap();
        mock.assert();
        assert_eq!(user.id.to_string(), USER_ID);
        assert!(auth.get_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sign_in_uses_token_for_later_requests_and_sign_out_clears_it() {
        if !can_bind_localhost() {
            return;
        }
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/auth/v1/token").query_param("grant_type", "password");
            then.status(200).json_body(serde_json::json!({
                "access_token": "jwt-123",
                "token_type": "bearer",
                "user": { "id": USER_ID, "email": "neo@matrix.io" }
            }));
        });
        let logout = server.mock(|when, then| {
            when.method(POST).path("/auth/v1/logout").header("authorization", "Bearer jwt-123");
            then.status(204);
        });

        let auth = auth_for(&server);
        let mut events = auth.subscribe();
        let session = auth.sign_in_with_password("neo@matrix.io", "redpill").await.unwrap();
        assert_eq!(session.access_token, "jwt-123");
        assert!(matches!(events.recv().await.unwrap(), AuthEvent::SignedIn(_)));

        auth.sign_out().await.unwrap();
        logout.assert();
        assert_eq!(events.recv().await.unwrap(), AuthEvent::SignedOut);
        assert!(auth.get_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bad_credentials_report_backend_message() {
        if !can_bind_localhost() {
            return;
        }
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/auth/v1/token");
            then.status(400).json_body(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Invalid login credentials"
            }));
        });

        let auth = auth_for(&server);
        let err = auth.sign_in_with_password("neo@matrix.io", "nope").await.unwrap_err();
        let shown = rf_core::AppError::from(err);
        assert!(matches!(shown, rf_core::AppError::Remote(m) if m == "Invalid login credentials"));
    }

    #[tokio::test]
    async fn test_sign_up_rejection_carries_only_the_reason() {
        if !can_bind_localhost() {
            return;
        }
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/auth/v1/signup");
            then.status(422).json_body(serde_json::json!({ "code": 422, "msg": "User already registered" }));
        });

        let auth = auth_for(&server);
        let err = auth.sign_up("neo@matrix.io", "redpill", "neo").await.unwrap_err();
        assert_eq!(format!("{err:#}"), "User already registered");
    }
}
