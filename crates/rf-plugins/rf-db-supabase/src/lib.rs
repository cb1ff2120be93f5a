//! # rf-db-supabase
//!
//! Hosted backend plugin: PostgREST rows, GoTrue auth and the Phoenix
//! realtime socket, all addressed from one base URL and public key.

mod auth;
mod client;
mod realtime;
mod rows;
mod store;

use secrecy::SecretString;
use url::Url;

pub use auth::SupabaseAuth;
pub use client::RestClient;
pub use realtime::{socket_url, SupabaseRealtime, HEARTBEAT_INTERVAL};
pub use store::SupabaseStore;

/// The three hosted adapters sharing one HTTP client, so the store's
/// requests carry the session token once the user signs in.
pub struct SupabaseBackend {
    pub store: SupabaseStore,
    pub auth: SupabaseAuth,
    pub realtime: SupabaseRealtime,
}

impl SupabaseBackend {
    pub fn connect(base_url: Url, anon_key: SecretString) -> anyhow::Result<Self> {
        let client = RestClient::new(base_url, anon_key);
        let realtime = SupabaseRealtime::new(socket_url(client.base_url(), client.anon_key())?);
        log::info!("using hosted backend at {}", client.base_url());
        Ok(Self {
            store: SupabaseStore::new(client.clone()),
            auth: SupabaseAuth::new(client),
            realtime,
        })
    }
}
