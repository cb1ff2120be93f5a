//! Shared handler state: services, contexts and the currently mounted views.

use std::sync::Arc;

use rf_core::realtime::{CommentFeed, PostFeed, PostScope, Reconcile};
use rf_core::traits::{ChangeFeed, ForumStore};
use rf_core::{
    AdminPanel, ForumService, LiveView, SessionContext, SettingsContext, ViewGuard, VoteRegistry,
};
use rf_ui::Notice;
use tokio::sync::Mutex;
use uuid::Uuid;

/// State shared across all Actix-web workers.
pub struct AppState {
    pub forum: ForumService,
    pub admin: AdminPanel,
    pub session: SessionContext,
    pub settings: SettingsContext,
    pub votes: VoteRegistry,
    pub changes: Arc<dyn ChangeFeed>,
    pub home: ViewSlot<(), PostFeed>,
    pub category: ViewSlot<Uuid, PostFeed>,
    pub comments: ViewSlot<Uuid, CommentFeed>,
    pub home_limit: usize,
    notices: Mutex<Vec<Notice>>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn ForumStore>,
        changes: Arc<dyn ChangeFeed>,
        session: SessionContext,
        settings: SettingsContext,
        home_limit: usize,
    ) -> Self {
        Self {
            forum: ForumService::new(store.clone()),
            admin: AdminPanel::new(store.clone()),
            votes: VoteRegistry::new(store),
            session,
            settings,
            changes,
            home: ViewSlot::new(),
            category: ViewSlot::new(),
            comments: ViewSlot::new(),
            home_limit,
            notices: Mutex::new(Vec::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn ForumStore> {
        self.forum.store()
    }

    /// Queues a message for the next rendered page.
    pub async fn notify(&self, notice: Notice) {
        self.notices.lock().await.push(notice);
    }

    pub async fn take_notices(&self) -> Vec<Notice> {
        std::mem::take(&mut *self.notices.lock().await)
    }

    /// Unmounts every view and stops the session listener.
    pub async fn shutdown(&self) {
        self.home.clear().await;
        self.category.clear().await;
        self.comments.clear().await;
        self.session.shutdown();
    }

    pub async fn home_feed(&self) -> anyhow::Result<Arc<PostFeed>> {
        let scope = PostScope::Recent(self.home_limit);
        self.home.show((), || PostFeed::new(scope), self.store(), self.changes.as_ref()).await
    }

    pub async fn category_feed(&self, category_id: Uuid) -> anyhow::Result<Arc<PostFeed>> {
        let scope = PostScope::Category(category_id);
        self.category
            .show(category_id, || PostFeed::new(scope), self.store(), self.changes.as_ref())
            .await
    }

    pub async fn comment_feed(&self, post_id: Uuid) -> anyhow::Result<Arc<CommentFeed>> {
        self.comments
            .show(post_id, || CommentFeed::new(post_id), self.store(), self.changes.as_ref())
            .await
    }
}

/// At most one mounted view per page kind. Showing a different key tears
/// the previous view down before the next one subscribes.
pub struct ViewSlot<K, F: Reconcile> {
    current: Mutex<Option<(K, LiveView<F>)>>,
}

impl<K: PartialEq + Copy, F: Reconcile> ViewSlot<K, F> {
    pub fn new() -> Self {
        Self { current: Mutex::new(None) }
    }

    /// Returns the live feed for `key`, mounting it if needed. If the
    /// change feed is unavailable the list is fetched once, unsubscribed.
    pub async fn show(
        &self,
        key: K,
        make: impl Fn() -> F,
        store: &Arc<dyn ForumStore>,
        changes: &dyn ChangeFeed,
    ) -> anyhow::Result<Arc<F>> {
        let mut current = self.current.lock().await;
        if let Some((mounted, view)) = current.as_ref() {
            if *mounted == key && view.is_live() {
                return Ok(view.feed().clone());
            }
        }
        // Drop the old view first so its late fetches are discarded.
        current.take();

        match LiveView::mount(make(), store.clone(), changes).await {
            Ok(view) => {
                let feed = view.feed().clone();
                *current = Some((key, view));
                Ok(feed)
            }
            Err(err) => {
                log::warn!("live updates unavailable, showing a snapshot: {err:#}");
                let feed = make();
                feed.refresh(store.as_ref(), &ViewGuard::new()).await?;
                Ok(Arc::new(feed))
            }
        }
    }

    /// The mounted feed, if it is the one for `key`.
    pub async fn mounted(&self, key: K) -> Option<Arc<F>> {
        let current = self.current.lock().await;
        match current.as_ref() {
            Some((mounted, view)) if *mounted == key => Some(view.feed().clone()),
            _ => None,
        }
    }

    /// Refetches the mounted feed for `key`; other keys are left alone.
    pub async fn refresh(&self, key: K, store: &dyn ForumStore) -> anyhow::Result<()> {
        let current = self.current.lock().await;
        match current.as_ref() {
            Some((mounted, view)) if *mounted == key => view.feed().refresh(store, view.guard()).await,
            _ => Ok(()),
        }
    }

    pub async fn clear(&self) {
        self.current.lock().await.take();
    }
}

impl<K: PartialEq + Copy, F: Reconcile> Default for ViewSlot<K, F> {
    fn default() -> Self {
        Self::new()
    }
}
