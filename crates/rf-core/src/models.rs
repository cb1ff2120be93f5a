//! # Domain Models
//!
//! Transient, non-authoritative copies of the rows owned by the backend.
//! Locally generated ids use UUID v7 so they stay time-ordered.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Moderation role stored on a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::User, Role::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(AppError::ValidationError(format!("unknown role '{other}'"))),
        }
    }
}

/// Tier label shown next to a username.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Badge {
    #[default]
    Initiate,
    Novice,
    Member,
    Veteran,
    Expert,
    Legend,
}

impl Badge {
    pub const ALL: [Badge; 6] = [
        Badge::Initiate,
        Badge::Novice,
        Badge::Member,
        Badge::Veteran,
        Badge::Expert,
        Badge::Legend,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Badge::Initiate => "Initiate",
            Badge::Novice => "Novice",
            Badge::Member => "Member",
            Badge::Veteran => "Veteran",
            Badge::Expert => "Expert",
            Badge::Legend => "Legend",
        }
    }
}

impl fmt::Display for Badge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Badge {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Badge::ALL
            .into_iter()
            .find(|b| b.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AppError::ValidationError(format!("unknown badge '{}'", s.trim())))
    }
}

/// Identity record; `id` equals the auth user id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub username: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub badge: Badge,
    pub created_at: Option<DateTime<Utc>>,
}

impl Profile {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// A forum section, e.g. "FITNESS".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub category_id: Option<Uuid>,
    /// `None` when the author's account is gone.
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub nsfw: bool,
    #[serde(default)]
    pub anonymous: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub post_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Direction of a single vote row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteType {
    Up,
    Down,
}

impl VoteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteType::Up => "up",
            VoteType::Down => "down",
        }
    }
}

impl FromStr for VoteType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(VoteType::Up),
            "down" => Ok(VoteType::Down),
            other => Err(AppError::ValidationError(format!("unknown vote type '{other}'"))),
        }
    }
}

/// One vote row. The pair (post_id, user_id) is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub post_id: Uuid,
    pub user_id: Uuid,
    pub vote_type: VoteType,
}

/// Author fields embedded into post and comment reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorRef {
    pub username: Option<String>,
    pub badge: Option<Badge>,
}

/// Category fields embedded into post reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRef {
    pub id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
}

/// A post joined with its category, author and comment count.
#[derive(Debug, Clone, PartialEq)]
pub struct PostView {
    pub post: Post,
    pub category: Option<CategoryRef>,
    pub author: Option<AuthorRef>,
    pub comment_count: u64,
}

impl PostView {
    /// Display name; anonymous posts never reveal the profile.
    pub fn author_label(&self) -> String {
        if self.post.anonymous {
            return "Anonymous".to_string();
        }
        self.author
            .as_ref()
            .and_then(|a| a.username.clone())
            .unwrap_or_else(|| "Unknown User".to_string())
    }

    /// Badge to display next to the author, hidden for anonymous posts.
    pub fn author_badge(&self) -> Option<Badge> {
        if self.post.anonymous {
            return None;
        }
        self.author.as_ref().and_then(|a| a.badge)
    }

    pub fn category_name(&self) -> Option<&str> {
        self.category.as_ref().map(|c| c.name.as_str())
    }
}

/// A comment joined with its author.
#[derive(Debug, Clone, PartialEq)]
pub struct CommentView {
    pub comment: Comment,
    pub author: Option<AuthorRef>,
}

impl CommentView {
    pub fn author_label(&self) -> String {
        self.author
            .as_ref()
            .and_then(|a| a.username.clone())
            .unwrap_or_else(|| "Unknown User".to_string())
    }
}

/// A comment as listed in the moderation panel.
#[derive(Debug, Clone, PartialEq)]
pub struct AdminCommentView {
    pub comment: Comment,
    pub author: Option<AuthorRef>,
    /// `None` once the parent post is deleted.
    pub post_title: Option<String>,
}

/// Payload for a post insert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewPost {
    pub title: String,
    pub content: String,
    pub category_id: Uuid,
    pub user_id: Uuid,
    pub nsfw: bool,
    pub anonymous: bool,
}

/// Payload for a comment insert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewComment {
    pub post_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
}

/// The authenticated identity reported by the auth provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: Option<String>,
}

/// A live session. The token is opaque to the client.
#[derive(Clone, PartialEq)]
pub struct Session {
    pub access_token: String,
    pub user: AuthUser,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"[redacted]")
            .field("user", &self.user)
            .finish()
    }
}

/// Session changes pushed by the auth provider.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    SignedIn(Session),
    SignedOut,
}

/// The signed-in user as seen by feature components.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionUser {
    pub id: Uuid,
    pub email: Option<String>,
    pub profile: Option<Profile>,
}

impl SessionUser {
    pub fn is_admin(&self) -> bool {
        self.profile.as_ref().is_some_and(Profile::is_admin)
    }

    pub fn display_name(&self) -> String {
        self.profile
            .as_ref()
            .and_then(|p| p.username.clone())
            .unwrap_or_else(|| "User".to_string())
    }
}
