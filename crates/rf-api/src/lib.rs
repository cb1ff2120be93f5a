//! # rf-api
//!
//! The web routing and orchestration layer for Rusty-Forum.

pub mod handlers;
pub mod middleware;
pub mod state;

use actix_web::web;

pub use state::{AppState, ViewSlot};

/// Registers every page and form endpoint.
///
/// Category names may contain `/`, so the segment pattern accepts it.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(handlers::index))
        .service(
            web::resource("/login")
                .route(web::get().to(handlers::login_form))
                .route(web::post().to(handlers::login)),
        )
        .service(
            web::resource("/register")
                .route(web::get().to(handlers::register_form))
                .route(web::post().to(handlers::register)),
        )
        .route("/logout", web::post().to(handlers::logout))
        .route("/category/{name:.*}", web::get().to(handlers::category))
        .route("/post/{id}", web::get().to(handlers::post_page))
        .route("/post/{id}/vote", web::post().to(handlers::vote))
        .route("/post/{id}/comments", web::post().to(handlers::add_comment))
        .route("/comments/{id}/delete", web::post().to(handlers::delete_comment))
        .service(
            web::resource("/new-post")
                .route(web::get().to(handlers::new_post_form))
                .route(web::post().to(handlers::create_post)),
        )
        .route("/admin", web::get().to(handlers::admin_page))
        .route("/admin/users/{id}/role", web::post().to(handlers::admin_role))
        .route("/admin/users/{id}/badge", web::post().to(handlers::admin_badge))
        .route("/admin/{tab}/{id}/delete", web::post().to(handlers::admin_delete))
        .route("/settings/theme", web::post().to(handlers::toggle_theme))
        .route("/settings/nsfw", web::post().to(handlers::toggle_nsfw));
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::{header, StatusCode};
    use actix_web::{test, App};
    use rf_core::realtime::{PostFeed, PostScope};
    use rf_core::traits::{
        ChangeFeed, ForumStore, MockAuthProvider, MockChangeFeed, MockForumStore, MockPreferenceStore,
    };
    use rf_core::{SessionContext, SettingsContext, Theme};
    use std::sync::Arc;
    use tokio::sync::broadcast;

    async fn app_state(store: MockForumStore) -> web::Data<AppState> {
        let store: Arc<dyn ForumStore> = Arc::new(store);

        let (tx, _) = broadcast::channel(4);
        let mut auth = MockAuthProvider::new();
        auth.expect_subscribe().returning(move || tx.subscribe());
        auth.expect_get_session().returning(|| Ok(None));
        let session = SessionContext::init(Arc::new(auth), store.clone()).await;

        let mut prefs = MockPreferenceStore::new();
        prefs.expect_get().returning(|_| Ok(None));
        prefs.expect_set().returning(|_, _| Ok(()));
        let settings = SettingsContext::init(Arc::new(prefs), Theme::Light).await;

        web::Data::new(AppState::new(store, Arc::new(MockChangeFeed::new()), session, settings, 20))
    }

    #[actix_web::test]
    async fn test_admin_redirects_anonymous_visitors_home() {
        let data = app_state(MockForumStore::new()).await;
        let app = test::init_service(App::new().app_data(data.clone()).configure(configure_routes)).await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/admin").to_request()).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(resp.headers().get(header::LOCATION).unwrap(), "/");
    }

    #[actix_web::test]
    async fn test_new_post_requires_login() {
        let data = app_state(MockForumStore::new()).await;
        let app = test::init_service(App::new().app_data(data.clone()).configure(configure_routes)).await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/new-post").to_request()).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(resp.headers().get(header::LOCATION).unwrap(), "/login");

        let notices = data.take_notices().await;
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].text, "Please log in to create a post");
    }

    #[actix_web::test]
    async fn test_anonymous_vote_is_rejected_before_the_store() {
        let mut store = MockForumStore::new();
        store.expect_insert_vote().never();
        let data = app_state(store).await;
        let app = test::init_service(App::new().app_data(data.clone()).configure(configure_routes)).await;

        let post_id = uuid::Uuid::now_v7();
        let req = test::TestRequest::post()
            .uri(&format!("/post/{post_id}/vote"))
            .set_form([("vote_type", "up")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(resp.headers().get(header::LOCATION).unwrap().to_str().unwrap(), format!("/post/{post_id}"));

        let notices = data.take_notices().await;
        assert_eq!(notices[0].text, "Please log in to vote");
    }

    #[actix_web::test]
    async fn test_unknown_category_renders_inline_not_found() {
        let mut store = MockForumStore::new();
        store.expect_list_categories().returning(|| Ok(Vec::new()));
        store
            .expect_get_category_by_name()
            .withf(|name| name.to_string() == "BONE STRUCTURE / FACE SHAPE")
            .times(1)
            .returning(|_| Ok(None));
        let data = app_state(store).await;
        let app = test::init_service(App::new().app_data(data.clone()).configure(configure_routes)).await;

        let req = test::TestRequest::get()
            .uri("/category/BONE%20STRUCTURE%20%2F%20FACE%20SHAPE")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = test::read_body(resp).await;
        assert!(String::from_utf8_lossy(&body).contains("Category not found"));
    }

    #[actix_web::test]
    async fn test_theme_toggle_only_follows_local_paths() {
        let data = app_state(MockForumStore::new()).await;
        let app = test::init_service(App::new().app_data(data.clone()).configure(configure_routes)).await;

        let req = test::TestRequest::post()
            .uri("/settings/theme")
            .set_form([("back", "/category/TECH")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.headers().get(header::LOCATION).unwrap(), "/category/TECH");
        assert_eq!(data.settings.preferences().await.theme, Theme::Dark);

        let req = test::TestRequest::post()
            .uri("/settings/theme")
            .set_form([("back", "//evil.example")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.headers().get(header::LOCATION).unwrap(), "/");
    }

    #[tokio::test]
    async fn test_view_slot_falls_back_to_a_snapshot_without_live_updates() {
        let mut store = MockForumStore::new();
        store.expect_list_posts().times(1).returning(|_| Ok(Vec::new()));
        let store: Arc<dyn ForumStore> = Arc::new(store);

        let mut changes = MockChangeFeed::new();
        changes
            .expect_subscribe()
            .returning(|_| Err(anyhow::anyhow!("realtime offline")));
        let changes: Arc<dyn ChangeFeed> = Arc::new(changes);

        let slot: ViewSlot<(), PostFeed> = ViewSlot::new();
        let feed = slot
            .show((), || PostFeed::new(PostScope::Recent(5)), &store, changes.as_ref())
            .await
            .unwrap();
        assert!(feed.snapshot().await.is_empty());
        assert!(slot.mounted(()).await.is_none());
    }
}
