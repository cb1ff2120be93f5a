//! # Admin Panel
//!
//! Moderation tables over posts, users and comments. Each tab has a fixed
//! column schema; rows are rendered to display strings here so templates
//! stay dumb.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{AdminCommentView, Badge, PostView, Profile, Role, SessionUser};
use crate::traits::{ForumStore, PostQuery};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdminTab {
    #[default]
    Posts,
    Users,
    Comments,
}

impl AdminTab {
    pub const ALL: [AdminTab; 3] = [AdminTab::Posts, AdminTab::Users, AdminTab::Comments];

    pub fn as_str(&self) -> &'static str {
        match self {
            AdminTab::Posts => "posts",
            AdminTab::Users => "users",
            AdminTab::Comments => "comments",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AdminTab::Posts => "Posts",
            AdminTab::Users => "Users",
            AdminTab::Comments => "Comments",
        }
    }

    pub fn columns(&self) -> &'static [Column] {
        match self {
            AdminTab::Posts => POST_COLUMNS,
            AdminTab::Users => USER_COLUMNS,
            AdminTab::Comments => COMMENT_COLUMNS,
        }
    }

    /// Profiles are never deleted from the client.
    pub fn deletable(&self) -> bool {
        !matches!(self, AdminTab::Users)
    }
}

impl fmt::Display for AdminTab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdminTab {
    type Err = AppError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        AdminTab::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| AppError::NotFound("Admin tab".into(), s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub key: &'static str,
    pub label: &'static str,
}

const fn col(key: &'static str, label: &'static str) -> Column {
    Column { key, label }
}

const POST_COLUMNS: &[Column] = &[
    col("title", "Title"),
    col("author", "Author"),
    col("category", "Category"),
    col("created_at", "Created"),
    col("flags", "Flags"),
];

const USER_COLUMNS: &[Column] = &[
    col("username", "Username"),
    col("role", "Role"),
    col("badge", "Badge"),
    col("created_at", "Joined"),
];

const COMMENT_COLUMNS: &[Column] = &[
    col("content", "Content"),
    col("author", "Author"),
    col("post", "Post"),
    col("created_at", "Created"),
];

/// One rendered table row; `cells` line up with the tab's columns.
#[derive(Debug, Clone, PartialEq)]
pub struct AdminRow {
    pub id: Uuid,
    pub cells: Vec<String>,
    /// Editable fields, users tab only.
    pub role: Option<Role>,
    pub badge: Option<Badge>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdminTable {
    pub tab: AdminTab,
    pub rows: Vec<AdminRow>,
}

impl AdminTable {
    pub fn columns(&self) -> &'static [Column] {
        self.tab.columns()
    }
}

/// "Jan 5, 2025".
pub fn format_date(at: &DateTime<Utc>) -> String {
    at.format("%b %-d, %Y").to_string()
}

fn post_row(view: &PostView) -> AdminRow {
    let author = if view.post.anonymous {
        "Anonymous".to_string()
    } else {
        view.author
            .as_ref()
            .and_then(|a| a.username.clone())
            .unwrap_or_else(|| "Unknown".to_string())
    };
    let mut flags = Vec::new();
    if view.post.nsfw {
        flags.push("NSFW");
    }
    if view.post.anonymous {
        flags.push("Anon");
    }
    AdminRow {
        id: view.post.id,
        cells: vec![
            view.post.title.clone(),
            author,
            view.category_name().unwrap_or("N/A").to_string(),
            format_date(&view.post.created_at),
            flags.join(" "),
        ],
        role: None,
        badge: None,
    }
}

fn user_row(profile: &Profile) -> AdminRow {
    AdminRow {
        id: profile.id,
        cells: vec![
            profile.username.clone().unwrap_or_else(|| "Unknown".to_string()),
            profile.role.to_string(),
            profile.badge.to_string(),
            profile.created_at.as_ref().map(format_date).unwrap_or_else(|| "N/A".to_string()),
        ],
        role: Some(profile.role),
        badge: Some(profile.badge),
    }
}

fn comment_row(view: &AdminCommentView) -> AdminRow {
    AdminRow {
        id: view.comment.id,
        cells: vec![
            view.comment.content.clone(),
            view.author
                .as_ref()
                .and_then(|a| a.username.clone())
                .unwrap_or_else(|| "Unknown".to_string()),
            view.post_title.clone().unwrap_or_else(|| "Deleted post".to_string()),
            format_date(&view.comment.created_at),
        ],
        role: None,
        badge: None,
    }
}

/// Moderation operations. Every call checks the caller's role first.
pub struct AdminPanel {
    store: Arc<dyn ForumStore>,
}

impl AdminPanel {
    pub fn new(store: Arc<dyn ForumStore>) -> Self {
        Self { store }
    }

    pub fn require_admin(caller: Option<&SessionUser>) -> Result<()> {
        match caller {
            Some(user) if user.is_admin() => Ok(()),
            _ => Err(AppError::Unauthorized("Admin access required".into())),
        }
    }

    /// Rows of `tab`, newest first.
    pub async fn load(&self, caller: Option<&SessionUser>, tab: AdminTab) -> Result<AdminTable> {
        Self::require_admin(caller)?;
        let rows = match tab {
            AdminTab::Posts => self.store.list_posts(PostQuery::all()).await?.iter().map(post_row).collect(),
            AdminTab::Users => self.store.list_profiles().await?.iter().map(user_row).collect(),
            AdminTab::Comments => {
                self.store.list_all_comments().await?.iter().map(comment_row).collect()
            }
        };
        Ok(AdminTable { tab, rows })
    }

    pub async fn delete(&self, caller: Option<&SessionUser>, tab: AdminTab, id: Uuid) -> Result<()> {
        Self::require_admin(caller)?;
        match tab {
            AdminTab::Posts => self.store.delete_post(id).await?,
            AdminTab::Comments => self.store.delete_comment(id).await?,
            AdminTab::Users => {
                return Err(AppError::ValidationError("Users cannot be deleted".into()));
            }
        }
        log::info!("admin deleted {} {id}", tab.as_str());
        Ok(())
    }

    pub async fn update_role(&self, caller: Option<&SessionUser>, id: Uuid, role: Role) -> Result<()> {
        Self::require_admin(caller)?;
        self.store.update_profile_role(id, role).await?;
        log::info!("profile {id} role set to {role}");
        Ok(())
    }

    pub async fn update_badge(&self, caller: Option<&SessionUser>, id: Uuid, badge: Badge) -> Result<()> {
        Self::require_admin(caller)?;
        self.store.update_profile_badge(id, badge).await?;
        log::info!("profile {id} badge set to {badge}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuthorRef, CategoryRef, Comment, Post};
    use crate::traits::MockForumStore;
    use chrono::TimeZone;

    fn admin() -> SessionUser {
        let id = Uuid::now_v7();
        SessionUser {
            id,
            email: None,
            profile: Some(Profile { id, username: Some("root".into()), role: Role::Admin, badge: Badge::Legend, created_at: None }),
        }
    }

    fn jan5() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 5, 12, 0, 0).unwrap()
    }

    fn post(anonymous: bool, nsfw: bool) -> PostView {
        PostView {
            post: Post {
                id: Uuid::now_v7(),
                title: "Cutting season".into(),
                content: String::new(),
                category_id: None,
                user_id: None,
                nsfw,
                anonymous,
                created_at: jan5(),
            },
            category: None,
            author: Some(AuthorRef { username: Some("trinity".into()), badge: None }),
            comment_count: 0,
        }
    }

    #[test]
    fn test_post_rows_hide_anonymous_authors() {
        let row = post_row(&post(true, true));
        assert_eq!(row.cells, vec!["Cutting season", "Anonymous", "N/A", "Jan 5, 2025", "NSFW Anon"]);

        let mut named = post(false, false);
        named.category = Some(CategoryRef { id: None, name: "FITNESS".into(), description: None });
        let row = post_row(&named);
        assert_eq!(row.cells[1], "trinity");
        assert_eq!(row.cells[2], "FITNESS");
        assert_eq!(row.cells[4], "");
    }

    #[test]
    fn test_comment_rows_mark_deleted_posts() {
        let view = AdminCommentView {
            comment: Comment {
                id: Uuid::now_v7(),
                post_id: Uuid::now_v7(),
                user_id: Uuid::now_v7(),
                content: "gone".into(),
                created_at: jan5(),
            },
            author: None,
            post_title: None,
        };
        assert_eq!(comment_row(&view).cells, vec!["gone", "Unknown", "Deleted post", "Jan 5, 2025"]);
    }

    #[test]
    fn test_tabs_parse_and_expose_schemas() {
        assert_eq!("users".parse::<AdminTab>().unwrap(), AdminTab::Users);
        assert!("votes".parse::<AdminTab>().is_err());
        let labels: Vec<_> = AdminTab::Users.columns().iter().map(|c| c.label).collect();
        assert_eq!(labels, ["Username", "Role", "Badge", "Joined"]);
        assert!(!AdminTab::Users.deletable());
    }

    #[tokio::test]
    async fn test_non_admin_is_rejected_without_remote_calls() {
        let mut store = MockForumStore::new();
        store.expect_list_posts().never();
        store.expect_delete_post().never();
        store.expect_update_profile_role().never();
        let panel = AdminPanel::new(Arc::new(store));

        let mut user = admin();
        if let Some(p) = user.profile.as_mut() {
            p.role = Role::User;
        }

        assert!(matches!(panel.load(Some(&user), AdminTab::Posts).await, Err(AppError::Unauthorized(_))));
        assert!(matches!(panel.load(None, AdminTab::Posts).await, Err(AppError::Unauthorized(_))));
        assert!(panel.delete(Some(&user), AdminTab::Posts, Uuid::now_v7()).await.is_err());
        assert!(panel.update_role(Some(&user), Uuid::now_v7(), Role::Admin).await.is_err());
    }

    #[tokio::test]
    async fn test_admin_updates_badge_and_cannot_delete_users() {
        let target = Uuid::now_v7();
        let mut store = MockForumStore::new();
        store
            .expect_update_profile_badge()
            .withf(move |id, badge| *id == target && *badge == Badge::Veteran)
            .times(1)
            .returning(|_, _| Ok(()));
        store.expect_list_profiles().returning(move || {
            Ok(vec![Profile { id: target, username: None, role: Role::User, badge: Badge::Veteran, created_at: Some(jan5()) }])
        });
        let panel = AdminPanel::new(Arc::new(store));
        let caller = admin();

        panel.update_badge(Some(&caller), target, Badge::Veteran).await.unwrap();
        let table = panel.load(Some(&caller), AdminTab::Users).await.unwrap();
        assert_eq!(table.rows[0].cells, vec!["Unknown", "user", "Veteran", "Jan 5, 2025"]);
        assert_eq!(table.rows[0].badge, Some(Badge::Veteran));

        let err = panel.delete(Some(&caller), AdminTab::Users, target).await.unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }
}
