//! # Real-time Feeds
//!
//! Change notifications arrive as a message stream per subscription.
//! Feeds turn that stream into an up-to-date local list; what a feed does
//! with an event (refetch everything or patch one row) is its own policy.
//!
//! Every mounted view carries a [`ViewGuard`]. Tearing the view down
//! unsubscribes and discards any fetch that completes afterwards.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{CommentView, PostView};
use crate::traits::{ChangeFeed, ForumStore, PostQuery};

/// Tables that emit change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Profiles,
    Categories,
    Posts,
    Comments,
    Votes,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Profiles => "profiles",
            Table::Categories => "categories",
            Table::Posts => "posts",
            Table::Comments => "comments",
            Table::Votes => "votes",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Table {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "profiles" => Ok(Table::Profiles),
            "categories" => Ok(Table::Categories),
            "posts" => Ok(Table::Posts),
            "comments" => Ok(Table::Comments),
            "votes" => Ok(Table::Votes),
            other => Err(AppError::ValidationError(format!("unknown table '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl FromStr for ChangeKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INSERT" => Ok(ChangeKind::Insert),
            "UPDATE" => Ok(ChangeKind::Update),
            "DELETE" => Ok(ChangeKind::Delete),
            other => Err(AppError::ValidationError(format!("unknown change kind '{other}'"))),
        }
    }
}

/// Which rows a subscriber wants to hear about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeFilter {
    pub table: Table,
    pub post_id: Option<Uuid>,
}

impl ChangeFilter {
    pub fn table(table: Table) -> Self {
        Self { table, post_id: None }
    }

    pub fn for_post(table: Table, post_id: Uuid) -> Self {
        Self { table, post_id: Some(post_id) }
    }

    /// Stable channel name, e.g. `comments:<post id>`.
    pub fn channel_name(&self) -> String {
        match self.post_id {
            Some(id) => format!("{}:{}", self.table, id),
            None => self.table.to_string(),
        }
    }

    /// Rows without a `post_id` field (delete events carrying only the
    /// primary key) are let through; consumers match them by id.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.table != self.table {
            return false;
        }
        match (self.post_id, event.field_uuid("post_id")) {
            (Some(wanted), Some(actual)) => wanted == actual,
            _ => true,
        }
    }
}

/// One insert/update/delete notification. Rows are kept as raw JSON since
/// the backend only guarantees the primary key on deletes.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    pub new: Option<Value>,
    pub old: Option<Value>,
}

impl ChangeEvent {
    pub fn new(table: Table, kind: ChangeKind, new: Option<Value>, old: Option<Value>) -> Self {
        Self { table, kind, new, old }
    }

    /// The primary key of the affected row.
    pub fn row_id(&self) -> Option<Uuid> {
        self.field_uuid("id")
    }

    pub fn field_uuid(&self, key: &str) -> Option<Uuid> {
        [self.new.as_ref(), self.old.as_ref()]
            .into_iter()
            .flatten()
            .find_map(|row| row.get(key).and_then(Value::as_str))
            .and_then(|raw| Uuid::parse_str(raw).ok())
    }
}

/// Consumer end of a change subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    filter: ChangeFilter,
    events: mpsc::UnboundedReceiver<ChangeEvent>,
}

impl Subscription {
    pub fn filter(&self) -> ChangeFilter {
        self.filter
    }

    /// `None` once the producer is gone.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }
}

/// Producer end of a change subscription, held by the backend plugin.
#[derive(Debug, Clone)]
pub struct SubscriptionSender {
    filter: ChangeFilter,
    events: mpsc::UnboundedSender<ChangeEvent>,
}

impl SubscriptionSender {
    pub fn filter(&self) -> ChangeFilter {
        self.filter
    }

    /// Forwards the event if it matches the filter. Returns `false` once
    /// the subscriber has gone away.
    pub fn deliver(&self, event: ChangeEvent) -> bool {
        if !self.filter.matches(&event) {
            return !self.events.is_closed();
        }
        self.events.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }

    /// Resolves when the subscriber drops its end.
    pub async fn closed(&self) {
        self.events.closed().await
    }
}

/// Creates a connected producer/consumer pair.
pub fn subscription(filter: ChangeFilter) -> (SubscriptionSender, Subscription) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        SubscriptionSender { filter, events: tx },
        Subscription { filter, events: rx },
    )
}

/// Liveness flag of a mounted view.
#[derive(Debug, Clone)]
pub struct ViewGuard {
    live: Arc<AtomicBool>,
}

impl ViewGuard {
    pub fn new() -> Self {
        Self { live: Arc::new(AtomicBool::new(true)) }
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub fn teardown(&self) {
        self.live.store(false, Ordering::Release);
    }
}

impl Default for ViewGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// A local list kept in step with the backend through change events.
#[async_trait]
pub trait Reconcile: Send + Sync + 'static {
    fn filter(&self) -> ChangeFilter;

    /// Refetches the whole list. Results are dropped if the guard is torn down.
    async fn refresh(&self, store: &dyn ForumStore, guard: &ViewGuard) -> anyhow::Result<()>;

    async fn apply(
        &self,
        store: &dyn ForumStore,
        guard: &ViewGuard,
        event: &ChangeEvent,
    ) -> anyhow::Result<()>;
}

/// Which posts a [`PostFeed`] lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostScope {
    Recent(usize),
    Category(Uuid),
}

impl PostScope {
    fn query(&self) -> PostQuery {
        match *self {
            PostScope::Recent(limit) => PostQuery::recent(limit),
            PostScope::Category(id) => PostQuery::in_category(id),
        }
    }
}

/// Post list with coarse invalidation: any post change refetches the list.
pub struct PostFeed {
    scope: PostScope,
    posts: RwLock<Vec<PostView>>,
}

impl PostFeed {
    pub fn new(scope: PostScope) -> Self {
        Self { scope, posts: RwLock::new(Vec::new()) }
    }

    pub fn scope(&self) -> PostScope {
        self.scope
    }

    pub async fn snapshot(&self) -> Vec<PostView> {
        self.posts.read().await.clone()
    }
}

#[async_trait]
impl Reconcile for PostFeed {
    fn filter(&self) -> ChangeFilter {
        ChangeFilter::table(Table::Posts)
    }

    async fn refresh(&self, store: &dyn ForumStore, guard: &ViewGuard) -> anyhow::Result<()> {
        let posts = store.list_posts(self.scope.query()).await?;
        if guard.is_live() {
            *self.posts.write().await = posts;
        } else {
            log::debug!("discarding post list fetched after teardown ({:?})", self.scope);
        }
        Ok(())
    }

    async fn apply(
        &self,
        store: &dyn ForumStore,
        guard: &ViewGuard,
        _event: &ChangeEvent,
    ) -> anyhow::Result<()> {
        self.refresh(store, guard).await
    }
}

/// Comment list of one post, patched row by row.
pub struct CommentFeed {
    post_id: Uuid,
    comments: RwLock<Vec<CommentView>>,
}

impl CommentFeed {
    pub fn new(post_id: Uuid) -> Self {
        Self { post_id, comments: RwLock::new(Vec::new()) }
    }

    pub fn post_id(&self) -> Uuid {
        self.post_id
    }

    pub async fn snapshot(&self) -> Vec<CommentView> {
        self.comments.read().await.clone()
    }

    /// Drops a comment from the local list after it was deleted remotely.
    pub async fn remove(&self, comment_id: Uuid) {
        self.comments.write().await.retain(|c| c.comment.id != comment_id);
    }

    async fn contains(&self, comment_id: Uuid) -> bool {
        self.comments.read().await.iter().any(|c| c.comment.id == comment_id)
    }
}

#[async_trait]
impl Reconcile for CommentFeed {
    fn filter(&self) -> ChangeFilter {
        ChangeFilter::for_post(Table::Comments, self.post_id)
    }

    async fn refresh(&self, store: &dyn ForumStore, guard: &ViewGuard) -> anyhow::Result<()> {
        let comments = store.list_comments(self.post_id).await?;
        if guard.is_live() {
            *self.comments.write().await = comments;
        }
        Ok(())
    }

    async fn apply(
        &self,
        store: &dyn ForumStore,
        guard: &ViewGuard,
        event: &ChangeEvent,
    ) -> anyhow::Result<()> {
        let Some(id) = event.row_id() else {
            log::warn!("comment change without an id: {:?}", event.kind);
            return Ok(());
        };

        match event.kind {
            ChangeKind::Insert => {
                if self.contains(id).await {
                    return Ok(());
                }
                // The event row lacks the author; fetch it joined.
                let Some(view) = store.get_comment(id).await? else {
                    return Ok(());
                };
                if view.comment.post_id != self.post_id || !guard.is_live() {
                    return Ok(());
                }
                let mut comments = self.comments.write().await;
                if !comments.iter().any(|c| c.comment.id == id) {
                    comments.push(view);
                }
            }
            ChangeKind::Update => {
                let fetched = store.get_comment(id).await?;
                if !guard.is_live() {
                    return Ok(());
                }
                let mut comments = self.comments.write().await;
                match fetched {
                    Some(view) => {
                        if let Some(slot) = comments.iter_mut().find(|c| c.comment.id == id) {
                            *slot = view;
                        }
                    }
                    None => comments.retain(|c| c.comment.id != id),
                }
            }
            ChangeKind::Delete => self.remove(id).await,
        }
        Ok(())
    }
}

/// A feed mounted on a live subscription. Dropping it tears the view down.
pub struct LiveView<F: Reconcile> {
    feed: Arc<F>,
    guard: ViewGuard,
    task: JoinHandle<()>,
}

impl<F: Reconcile> LiveView<F> {
    /// Subscribes first, then fetches, so no change between the two is lost.
    pub async fn mount(
        feed: F,
        store: Arc<dyn ForumStore>,
        changes: &dyn ChangeFeed,
    ) -> anyhow::Result<Self> {
        let feed = Arc::new(feed);
        let guard = ViewGuard::new();
        let subscription = changes.subscribe(feed.filter()).await?;
        feed.refresh(store.as_ref(), &guard).await?;

        let task = tokio::spawn(drive(feed.clone(), store, guard.clone(), subscription));
        Ok(Self { feed, guard, task })
    }

    pub fn feed(&self) -> &Arc<F> {
        &self.feed
    }

    pub fn guard(&self) -> &ViewGuard {
        &self.guard
    }

    pub fn is_live(&self) -> bool {
        self.guard.is_live() && !self.task.is_finished()
    }
}

impl<F: Reconcile> Drop for LiveView<F> {
    fn drop(&mut self) {
        self.guard.teardown();
        self.task.abort();
    }
}

async fn drive<F: Reconcile>(
    feed: Arc<F>,
    store: Arc<dyn ForumStore>,
    guard: ViewGuard,
    mut subscription: Subscription,
) {
    let channel = subscription.filter().channel_name();
    while let Some(event) = subscription.recv().await {
        if !guard.is_live() {
            break;
        }
        if let Err(err) = feed.apply(store.as_ref(), &guard, &event).await {
            log::warn!("failed to apply {:?} on {}: {:#}", event.kind, channel, err);
        }
    }
    log::debug!("feed {} stopped", channel);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuthorRef, Comment};
    use crate::traits::{MockChangeFeed, MockForumStore};
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration;

    fn comment_view(id: Uuid, post_id: Uuid, content: &str) -> CommentView {
        CommentView {
            comment: Comment {
                id,
                post_id,
                user_id: Uuid::now_v7(),
                content: content.to_string(),
                created_at: Utc::now(),
            },
            author: Some(AuthorRef { username: Some("neo".into()), badge: None }),
        }
    }

    #[test]
    fn test_filter_matches_post_scoped_rows() {
        let post = Uuid::now_v7();
        let filter = ChangeFilter::for_post(Table::Comments, post);

        let same = ChangeEvent::new(
            Table::Comments,
            ChangeKind::Insert,
            Some(json!({ "id": Uuid::now_v7(), "post_id": post })),
            None,
        );
        let other = ChangeEvent::new(
            Table::Comments,
            ChangeKind::Insert,
            Some(json!({ "id": Uuid::now_v7(), "post_id": Uuid::now_v7() })),
            None,
        );
        let key_only_delete = ChangeEvent::new(
            Table::Comments,
            ChangeKind::Delete,
            None,
            Some(json!({ "id": Uuid::now_v7() })),
        );
        let wrong_table = ChangeEvent::new(Table::Posts, ChangeKind::Insert, None, None);

        assert!(filter.matches(&same));
        assert!(!filter.matches(&other));
        assert!(filter.matches(&key_only_delete));
        assert!(!filter.matches(&wrong_table));
        assert_eq!(filter.channel_name(), format!("comments:{post}"));
    }

    #[tokio::test]
    async fn test_sender_reports_closed_subscriber() {
        let (tx, rx) = subscription(ChangeFilter::table(Table::Posts));
        assert!(tx.deliver(ChangeEvent::new(Table::Posts, ChangeKind::Insert, None, None)));
        drop(rx);
        assert!(tx.is_closed());
        assert!(!tx.deliver(ChangeEvent::new(Table::Posts, ChangeKind::Insert, None, None)));
    }

    #[tokio::test]
    async fn test_comment_insert_fetches_author_and_appends() {
        let post = Uuid::now_v7();
        let existing = comment_view(Uuid::now_v7(), post, "first");
        let incoming = comment_view(Uuid::now_v7(), post, "second");

        let mut store = MockForumStore::new();
        let listed = vec![existing.clone()];
        store.expect_list_comments().returning(move |_| Ok(listed.clone()));
        let fetched = incoming.clone();
        store
            .expect_get_comment()
            .times(1)
            .returning(move |_| Ok(Some(fetched.clone())));

        let feed = CommentFeed::new(post);
        let guard = ViewGuard::new();
        feed.refresh(&store, &guard).await.unwrap();

        let event = ChangeEvent::new(
            Table::Comments,
            ChangeKind::Insert,
            Some(json!({ "id": incoming.comment.id, "post_id": post })),
            None,
        );
        feed.apply(&store, &guard, &event).await.unwrap();
        // A duplicate notification is ignored without another fetch.
        feed.apply(&store, &guard, &event).await.unwrap();

        let ids: Vec<Uuid> = feed.snapshot().await.iter().map(|c| c.comment.id).collect();
        assert_eq!(ids, vec![existing.comment.id, incoming.comment.id]);
    }

    #[tokio::test]
    async fn test_comment_delete_removes_row_without_fetching() {
        let post = Uuid::now_v7();
        let doomed = comment_view(Uuid::now_v7(), post, "bye");
        let kept = comment_view(Uuid::now_v7(), post, "stay");

        let mut store = MockForumStore::new();
        let listed = vec![doomed.clone(), kept.clone()];
        store.expect_list_comments().returning(move |_| Ok(listed.clone()));
        store.expect_get_comment().never();

        let feed = CommentFeed::new(post);
        let guard = ViewGuard::new();
        feed.refresh(&store, &guard).await.unwrap();

        let event = ChangeEvent::new(
            Table::Comments,
            ChangeKind::Delete,
            None,
            Some(json!({ "id": doomed.comment.id })),
        );
        feed.apply(&store, &guard, &event).await.unwrap();

        let snapshot = feed.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].comment.id, kept.comment.id);
    }

    #[tokio::test]
    async fn test_fetch_after_teardown_is_discarded() {
        let post = Uuid::now_v7();
        let mut store = MockForumStore::new();
        store
            .expect_list_comments()
            .returning(move |post_id| Ok(vec![comment_view(Uuid::now_v7(), post_id, "late")]));

        let feed = CommentFeed::new(post);
        let guard = ViewGuard::new();
        guard.teardown();
        feed.refresh(&store, &guard).await.unwrap();

        assert!(feed.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_live_view_refetches_posts_on_change() {
        let mut store = MockForumStore::new();
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        store.expect_list_posts().returning(move |query| {
            assert_eq!(query, PostQuery::recent(20));
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        });

        let (tx, rx) = subscription(ChangeFilter::table(Table::Posts));
        let mut rx = Some(rx);
        let mut changes = MockChangeFeed::new();
        changes
            .expect_subscribe()
            .times(1)
            .returning(move |_| Ok(rx.take().expect("subscribed once")));

        let view = LiveView::mount(PostFeed::new(PostScope::Recent(20)), Arc::new(store), &changes)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tx.deliver(ChangeEvent::new(Table::Posts, ChangeKind::Insert, Some(json!({})), None));
        for _ in 0..50 {
            if calls.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        drop(view);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(tx.is_closed());
    }
}
