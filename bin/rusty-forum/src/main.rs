//! # Rusty-Forum Binary
//!
//! Assembles the forum client from the backend selected at compile time.

use std::sync::Arc;

use actix_files::Files;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use rf_api::{configure_routes, handlers, middleware, AppState};
use rf_config::AppConfig;
use rf_core::traits::{AuthProvider, ChangeFeed, ForumStore};
use rf_core::{SessionContext, SettingsContext};
use rf_prefs_local::JsonPreferenceStore;

#[cfg(feature = "db-sqlite")]
use rf_auth_simple::SimpleAuthProvider;
#[cfg(feature = "db-sqlite")]
use rf_db_sqlite::SqliteForumStore;

#[cfg(all(feature = "db-supabase", not(feature = "db-sqlite")))]
use rf_db_supabase::SupabaseBackend;

#[cfg(not(any(feature = "db-supabase", feature = "db-sqlite")))]
compile_error!("enable the `db-supabase` or the `db-sqlite` feature");

/// The three ports every backend provides.
struct Backend {
    store: Arc<dyn ForumStore>,
    auth: Arc<dyn AuthProvider>,
    changes: Arc<dyn ChangeFeed>,
}

#[cfg(feature = "db-sqlite")]
async fn build_backend(config: &AppConfig) -> anyhow::Result<Backend> {
    let store = Arc::new(
        SqliteForumStore::new(&config.storage.sqlite_url)
            .await
            .with_context(|| format!("failed to open {}", config.storage.sqlite_url))?,
    );
    log::info!("using local database {}", config.storage.sqlite_url);
    Ok(Backend {
        changes: Arc::new(store.changes()),
        auth: Arc::new(SimpleAuthProvider::new(store.clone(), store.clone())),
        store,
    })
}

#[cfg(all(feature = "db-supabase", not(feature = "db-sqlite")))]
async fn build_backend(config: &AppConfig) -> anyhow::Result<Backend> {
    let key = secrecy::SecretString::from(config.backend.anon_key().to_string());
    let hosted = SupabaseBackend::connect(config.backend.url.clone(), key)?;
    Ok(Backend {
        store: Arc::new(hosted.store),
        auth: Arc::new(hosted.auth),
        changes: Arc::new(hosted.realtime),
    })
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    // Missing backend settings are the one unrecoverable startup error.
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(err) => {
            log::error!("configuration error: {err}");
            std::process::exit(1);
        }
    };
    log::debug!("{config:?}");

    let backend = build_backend(&config).await?;

    let prefs = Arc::new(JsonPreferenceStore::new(config.storage.preferences_path.clone()));
    let settings = SettingsContext::init(prefs, config.ui.default_theme).await;
    let session = SessionContext::init(backend.auth.clone(), backend.store.clone()).await;

    let state = web::Data::new(AppState::new(
        backend.store,
        backend.changes,
        session,
        settings,
        config.ui.home_feed_limit,
    ));

    let bind = (config.server.host.clone(), config.server.port);
    log::info!("Rusty-Forum starting on http://{}:{}", bind.0, bind.1);

    let server_state = state.clone();
    HttpServer::new(move || {
        App::new()
            .app_data(server_state.clone())
            .wrap(middleware::security_headers())
            .wrap(middleware::cors_policy())
            .wrap(middleware::standard_middleware())
            .service(Files::new("/static", rf_ui::STATIC_DIR))
            .configure(configure_routes)
            .default_service(web::route().to(handlers::page_not_found))
    })
    .bind(bind)
    .context("failed to bind the HTTP listener")?
    .run()
    .await?;

    state.shutdown().await;
    log::info!("Rusty-Forum stopped");
    Ok(())
}
