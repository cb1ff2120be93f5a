//! # Core Traits (Ports)
//!
//! Any backend plugin must implement these traits to be used by the binary.
//! Every method is a thin passthrough to the backend; policy lives in the
//! services built on top of them.

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{
    AdminCommentView, AuthEvent, AuthUser, Badge, Category, Comment, CommentView, NewComment,
    NewPost, Post, PostView, Profile, Role, Session, Vote,
};
use crate::realtime::{ChangeFilter, Subscription};

/// Filter for post list reads. Results are always newest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostQuery {
    pub category_id: Option<Uuid>,
    pub limit: Option<usize>,
}

impl PostQuery {
    pub fn recent(limit: usize) -> Self {
        Self { category_id: None, limit: Some(limit) }
    }

    pub fn in_category(category_id: Uuid) -> Self {
        Self { category_id: Some(category_id), limit: None }
    }

    pub fn all() -> Self {
        Self::default()
    }
}

/// Data access facade over the backend's tables.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ForumStore: Send + Sync {
    // Profile Operations
    async fn get_profile(&self, id: Uuid) -> anyhow::Result<Option<Profile>>;
    /// Newest first.
    async fn list_profiles(&self) -> anyhow::Result<Vec<Profile>>;
    async fn create_profile(&self, profile: Profile) -> anyhow::Result<()>;
    async fn update_profile_role(&self, id: Uuid, role: Role) -> anyhow::Result<()>;
    async fn update_profile_badge(&self, id: Uuid, badge: Badge) -> anyhow::Result<()>;

    // Category Operations
    /// Ordered by name.
    async fn list_categories(&self) -> anyhow::Result<Vec<Category>>;
    async fn get_category_by_name(&self, name: &str) -> anyhow::Result<Option<Category>>;

    // Post Operations
    async fn list_posts(&self, query: PostQuery) -> anyhow::Result<Vec<PostView>>;
    async fn get_post(&self, id: Uuid) -> anyhow::Result<Option<PostView>>;
    async fn create_post(&self, post: NewPost) -> anyhow::Result<Post>;
    async fn delete_post(&self, id: Uuid) -> anyhow::Result<()>;

    // Comment Operations
    /// Oldest first.
    async fn list_comments(&self, post_id: Uuid) -> anyhow::Result<Vec<CommentView>>;
    async fn get_comment(&self, id: Uuid) -> anyhow::Result<Option<CommentView>>;
    /// Every comment with its post title, newest first.
    async fn list_all_comments(&self) -> anyhow::Result<Vec<AdminCommentView>>;
    async fn create_comment(&self, comment: NewComment) -> anyhow::Result<Comment>;
    async fn delete_comment(&self, id: Uuid) -> anyhow::Result<()>;

    // Vote Operations
    async fn list_votes(&self, post_id: Uuid) -> anyhow::Result<Vec<Vote>>;
    async fn get_vote(&self, post_id: Uuid, user_id: Uuid) -> anyhow::Result<Option<Vote>>;
    async fn insert_vote(&self, vote: Vote) -> anyhow::Result<()>;
    async fn update_vote(&self, vote: Vote) -> anyhow::Result<()>;
    async fn delete_vote(&self, post_id: Uuid, user_id: Uuid) -> anyhow::Result<()>;
}

/// Identity contract. The provider owns the session lifecycle.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Registers an account. Does not sign the user in.
    async fn sign_up(&self, email: &str, password: &str, username: &str) -> anyhow::Result<AuthUser>;
    async fn sign_in_with_password(&self, email: &str, password: &str) -> anyhow::Result<Session>;
    async fn sign_out(&self) -> anyhow::Result<()>;
    async fn get_session(&self) -> anyhow::Result<Option<Session>>;
    /// Receives every later sign-in and sign-out.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}

/// Change-notification channel scoped to a table and optional filter.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Dropping the returned subscription unsubscribes.
    async fn subscribe(&self, filter: ChangeFilter) -> anyhow::Result<Subscription>;
}

/// Local key/value preference storage.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
}

/// A stored password hash, used by self-hosted auth providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub user_id: Uuid,
    pub email: String,
    pub password_hash: String,
}

/// Persistence for self-hosted auth providers.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn save_credential(&self, credential: Credential) -> anyhow::Result<()>;
    async fn find_credential(&self, email: &str) -> anyhow::Result<Option<Credential>>;
}
