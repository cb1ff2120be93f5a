use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::{Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use url::Url;

/// A non-success answer from the backend, with its human-readable reason.
#[derive(Debug, thiserror::Error)]
#[error("backend error ({status}): {message}")]
pub struct BackendError {
    pub status: StatusCode,
    pub message: String,
}

/// Shared HTTP plumbing for the REST and auth endpoints.
///
/// Requests carry the public key as `apikey` and, once signed in, the
/// session's access token as the bearer; before that the key doubles as
/// the bearer.
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: Url,
    anon_key: Arc<SecretString>,
    access_token: Arc<RwLock<Option<String>>>,
}

impl RestClient {
    pub fn new(base_url: Url, anon_key: SecretString) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            anon_key: Arc::new(anon_key),
            access_token: Arc::new(RwLock::new(None)),
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub(crate) fn anon_key(&self) -> &str {
        self.anon_key.expose_secret()
    }

    pub(crate) async fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write().await = token;
    }

    pub(crate) async fn access_token(&self) -> Option<String> {
        self.access_token.read().await.clone()
    }

    pub(crate) fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).context("failed to build backend URL")
    }

    /// `/rest/v1/{table}` with PostgREST query parameters appended.
    pub(crate) fn table_url(&self, table: &str, params: &[(&str, String)]) -> Result<Url> {
        let mut url = self.url(&format!("/rest/v1/{table}"))?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    pub(crate) async fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let bearer = match self.access_token().await {
            Some(token) => token,
            None => self.anon_key().to_string(),
        };
        self.http
            .request(method, url)
            .header("apikey", self.anon_key())
            .bearer_auth(bearer)
    }

    pub(crate) async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        let response = req.send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(BackendError { status, message: error_message(&body) }.into());
        }
        serde_json::from_str(&body).with_context(|| format!("unexpected response body: {body}"))
    }

    pub(crate) async fn send_empty(&self, req: RequestBuilder) -> Result<()> {
        let response = req.send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(BackendError { status, message: error_message(&body) }.into());
        }
        Ok(())
    }
}

/// Pulls the human-readable part out of a PostgREST or GoTrue error body.
pub(crate) fn error_message(body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    parsed
        .as_ref()
        .and_then(|v| {
            ["message", "msg", "error_description", "error"]
                .iter()
                .find_map(|key| v.get(*key).and_then(|m| m.as_str()))
        })
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_url_encodes_filters() {
        let client = RestClient::new(
            Url::parse("https://x.supabase.co").unwrap(),
            SecretString::from("anon".to_string()),
        );
        let url = client
            .table_url("categories", &[("name", "eq.PEPTIDES & SARMS".to_string())])
            .unwrap();
        assert_eq!(url.path(), "/rest/v1/categories");
        assert_eq!(url.query(), Some("name=eq.PEPTIDES+%26+SARMS"));
    }

    #[test]
    fn test_error_message_prefers_json_fields() {
        assert_eq!(error_message(r#"{"message":"duplicate key"}"#), "duplicate key");
        assert_eq!(error_message(r#"{"msg":"Invalid login credentials"}"#), "Invalid login credentials");
        assert_eq!(error_message("plain"), "plain");
    }
}
