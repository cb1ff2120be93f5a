//! # rf-ui
//!
//! Askama page templates and the display models they render.

pub mod view;

use askama::Template;
use rf_core::admin::{AdminTab, AdminTable};
use rf_core::models::{Badge, Role};

pub use view::{
    category_href, excerpt, relative_time, CategoryLink, Chrome, CommentItem, Notice, NoticeKind,
    PostCard, PostDetail, VoteWidget,
};

/// Directory served under `/static`.
pub const STATIC_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/static");

pub const SITE_NAME: &str = "BLACKPILL FORUM";

/// Home page: recent posts plus a few featured categories.
#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub chrome: Chrome,
    pub featured: Vec<CategoryLink>,
    pub posts: Vec<PostCard>,
}

#[derive(Template)]
#[template(path = "category.html")]
pub struct CategoryTemplate {
    pub chrome: Chrome,
    pub name: String,
    /// `None` renders the inline "not found" state.
    pub category: Option<CategoryLink>,
    pub posts: Vec<PostCard>,
}

#[derive(Template)]
#[template(path = "post.html")]
pub struct PostTemplate {
    pub chrome: Chrome,
    pub post: PostDetail,
    pub votes: VoteWidget,
    pub comments: Vec<CommentItem>,
}

#[derive(Template)]
#[template(path = "not_found.html")]
pub struct NotFoundTemplate {
    pub chrome: Chrome,
    pub what: String,
}

/// Sticky values of the new-post form after a failed submit.
#[derive(Debug, Clone, Default)]
pub struct PostForm {
    pub title: String,
    pub content: String,
    pub category: String,
    pub nsfw: bool,
    pub anonymous: bool,
}

#[derive(Debug, Clone)]
pub struct SelectOption {
    pub value: String,
    pub selected: bool,
}

impl SelectOption {
    pub fn options<'a>(values: impl IntoIterator<Item = &'a str>, current: &str) -> Vec<Self> {
        values
            .into_iter()
            .map(|v| SelectOption { value: v.to_string(), selected: v == current })
            .collect()
    }
}

#[derive(Template)]
#[template(path = "new_post.html")]
pub struct NewPostTemplate {
    pub chrome: Chrome,
    pub form: PostForm,
    pub category_options: Vec<SelectOption>,
    pub max_title: usize,
    pub max_content: usize,
}

#[derive(Template)]
#[template(path = "login.html")]
pub struct LoginTemplate {
    pub chrome: Chrome,
    pub email: String,
}

#[derive(Template)]
#[template(path = "register.html")]
pub struct RegisterTemplate {
    pub chrome: Chrome,
    pub email: String,
    pub username: String,
}

#[derive(Debug, Clone)]
pub struct TabLink {
    pub label: &'static str,
    pub href: String,
    pub active: bool,
}

/// One admin table row with its action targets resolved.
#[derive(Debug, Clone)]
pub struct AdminRowView {
    pub id: String,
    pub cells: Vec<String>,
    pub delete_action: Option<String>,
    pub role_options: Vec<SelectOption>,
    pub badge_options: Vec<SelectOption>,
}

#[derive(Template)]
#[template(path = "admin.html")]
pub struct AdminTemplate {
    pub chrome: Chrome,
    pub tabs: Vec<TabLink>,
    pub headers: Vec<&'static str>,
    pub rows: Vec<AdminRowView>,
    pub editable: bool,
    pub delete_prompt: &'static str,
}

impl AdminTemplate {
    pub fn new(chrome: Chrome, table: &AdminTable) -> Self {
        let tab = table.tab;
        let tabs = AdminTab::ALL
            .iter()
            .map(|t| TabLink { label: t.label(), href: format!("/admin?tab={t}"), active: *t == tab })
            .collect();
        let rows = table
            .rows
            .iter()
            .map(|row| AdminRowView {
                id: row.id.to_string(),
                cells: row.cells.clone(),
                delete_action: tab.deletable().then(|| format!("/admin/{tab}/{}/delete", row.id)),
                role_options: row
                    .role
                    .map(|r| SelectOption::options(Role::ALL.iter().map(|x| x.as_str()), r.as_str()))
                    .unwrap_or_default(),
                badge_options: row
                    .badge
                    .map(|b| SelectOption::options(Badge::ALL.iter().map(|x| x.as_str()), b.as_str()))
                    .unwrap_or_default(),
            })
            .collect();

        Self {
            chrome,
            tabs,
            headers: table.columns().iter().map(|c| c.label).collect(),
            rows,
            editable: tab == AdminTab::Users,
            delete_prompt: match tab {
                AdminTab::Comments => "Are you sure you want to delete this comment?",
                _ => "Are you sure you want to delete this post?",
            },
        }
    }
}
