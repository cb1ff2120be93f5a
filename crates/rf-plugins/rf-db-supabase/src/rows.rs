//! Wire shapes of PostgREST rows, including embedded foreign-key selects.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rf_core::models::{
    AdminCommentView, AuthorRef, Badge, CategoryRef, Comment, CommentView, Post, PostView, Profile,
    Role,
};
use serde::Deserialize;
use uuid::Uuid;

pub(crate) const POST_SELECT: &str =
    "*,categories(id,name,description),profiles(username,badge),comments(count)";
pub(crate) const COMMENT_SELECT: &str = "*,profiles(username,badge)";
pub(crate) const ADMIN_COMMENT_SELECT: &str = "*,profiles(username,badge),posts(title)";

/// Badges and roles are free text in the table; unknown values fall back.
fn lenient<T: FromStr + Default>(raw: Option<String>) -> T {
    raw.and_then(|s| s.parse().ok()).unwrap_or_default()
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProfileRow {
    id: Uuid,
    username: Option<String>,
    role: Option<String>,
    badge: Option<String>,
    created_at: Option<DateTime<Utc>>,
}

impl From<ProfileRow> for Profile {
    fn from(row: ProfileRow) -> Self {
        Profile {
            id: row.id,
            username: row.username,
            role: lenient::<Role>(row.role),
            badge: lenient::<Badge>(row.badge),
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct AuthorEmbed {
    username: Option<String>,
    badge: Option<String>,
}

impl From<AuthorEmbed> for AuthorRef {
    fn from(embed: AuthorEmbed) -> Self {
        AuthorRef {
            username: embed.username,
            badge: embed.badge.and_then(|b| b.parse().ok()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct CategoryEmbed {
    id: Option<Uuid>,
    name: String,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CountEmbed {
    count: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PostRow {
    #[serde(flatten)]
    post: Post,
    categories: Option<CategoryEmbed>,
    profiles: Option<AuthorEmbed>,
    #[serde(default)]
    comments: Vec<CountEmbed>,
}

impl From<PostRow> for PostView {
    fn from(row: PostRow) -> Self {
        PostView {
            post: row.post,
            category: row.categories.map(|c| CategoryRef {
                id: c.id,
                name: c.name,
                description: c.description,
            }),
            author: row.profiles.map(AuthorRef::from),
            comment_count: row.comments.first().map(|c| c.count).unwrap_or(0),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct PostTitleEmbed {
    title: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CommentRow {
    #[serde(flatten)]
    comment: Comment,
    profiles: Option<AuthorEmbed>,
    #[serde(default)]
    posts: Option<PostTitleEmbed>,
}

impl From<CommentRow> for CommentView {
    fn from(row: CommentRow) -> Self {
        CommentView { comment: row.comment, author: row.profiles.map(AuthorRef::from) }
    }
}

impl From<CommentRow> for AdminCommentView {
    fn from(row: CommentRow) -> Self {
        AdminCommentView {
            comment: row.comment,
            author: row.profiles.map(AuthorRef::from),
            post_title: row.posts.map(|p| p.title),
        }
    }
}
