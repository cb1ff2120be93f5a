//! Display models: everything a template prints, already formatted.

use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use rf_core::admin::format_date;
use rf_core::models::{Badge, Category, CommentView, PostView, SessionUser};
use rf_core::Preferences;
use uuid::Uuid;

pub const EXCERPT_CHARS: usize = 150;

/// First 150 characters, with "..." when cut.
pub fn excerpt(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(EXCERPT_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

/// "5 minutes ago", with the usual rounding thresholds.
pub fn relative_time(at: &DateTime<Utc>, now: &DateTime<Utc>) -> String {
    let secs = (*now - *at).num_seconds().max(0) as f64;
    let minutes = secs / 60.0;
    let hours = minutes / 60.0;
    let days = hours / 24.0;

    let (n, unit) = if secs < 45.0 {
        return "a few seconds ago".into();
    } else if secs < 90.0 {
        return "a minute ago".into();
    } else if minutes < 45.0 {
        (minutes.round(), "minutes")
    } else if minutes < 90.0 {
        return "an hour ago".into();
    } else if hours < 22.0 {
        (hours.round(), "hours")
    } else if hours < 36.0 {
        return "a day ago".into();
    } else if days < 26.0 {
        (days.round(), "days")
    } else if days < 45.0 {
        return "a month ago".into();
    } else if days < 320.0 {
        ((days / 30.4).round().max(2.0), "months")
    } else if days < 548.0 {
        return "a year ago".into();
    } else {
        ((days / 365.25).round().max(2.0), "years")
    };
    format!("{n} {unit} ago")
}

/// Percent-encodes a category name for use as one path segment.
pub fn category_href(name: &str) -> String {
    format!("/category/{}", utf8_percent_encode(name, NON_ALPHANUMERIC))
}

/// CSS modifier for a badge pill.
pub fn badge_class(badge: Option<Badge>) -> &'static str {
    match badge.unwrap_or_default() {
        Badge::Initiate => "badge-initiate",
        Badge::Novice => "badge-novice",
        Badge::Member => "badge-member",
        Badge::Veteran => "badge-veteran",
        Badge::Expert => "badge-expert",
        Badge::Legend => "badge-legend",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoticeKind {
    Success,
    Error,
}

/// One-shot message shown at the top of the next page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub text: String,
}

impl Notice {
    pub fn success(text: impl Into<String>) -> Self {
        Self { kind: NoticeKind::Success, text: text.into() }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self { kind: NoticeKind::Error, text: text.into() }
    }

    pub fn css(&self) -> &'static str {
        match self.kind {
            NoticeKind::Success => "notice-success",
            NoticeKind::Error => "notice-error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CategoryLink {
    pub name: String,
    pub description: String,
    pub href: String,
    pub active: bool,
}

impl CategoryLink {
    pub fn new(category: &Category, active: Option<&str>) -> Self {
        Self {
            name: category.name.clone(),
            description: category.description.clone().unwrap_or_default(),
            href: category_href(&category.name),
            active: active == Some(category.name.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Viewer {
    pub name: String,
    pub is_admin: bool,
}

/// Page chrome shared by every template: navbar, sidebar, notices.
#[derive(Debug, Clone)]
pub struct Chrome {
    pub title: String,
    pub theme: &'static str,
    pub show_nsfw: bool,
    pub viewer: Option<Viewer>,
    pub categories: Vec<CategoryLink>,
    pub notices: Vec<Notice>,
    /// Where the settings toggles send the browser back to.
    pub back: String,
}

impl Chrome {
    pub fn new(
        title: impl Into<String>,
        prefs: Preferences,
        user: Option<&SessionUser>,
        categories: &[Category],
        active_category: Option<&str>,
        notices: Vec<Notice>,
        back: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            theme: prefs.theme.as_str(),
            show_nsfw: prefs.show_nsfw,
            viewer: user.map(|u| Viewer { name: u.display_name(), is_admin: u.is_admin() }),
            categories: categories.iter().map(|c| CategoryLink::new(c, active_category)).collect(),
            notices,
            back: back.into(),
        }
    }

    pub fn signed_in(&self) -> bool {
        self.viewer.is_some()
    }

    pub fn is_admin(&self) -> bool {
        self.viewer.as_ref().is_some_and(|v| v.is_admin)
    }
}

/// A post as listed in a feed.
#[derive(Debug, Clone)]
pub struct PostCard {
    pub id: Uuid,
    pub href: String,
    pub title: String,
    pub excerpt: String,
    pub category: String,
    pub author: String,
    pub badge: Option<String>,
    pub badge_class: &'static str,
    pub created: String,
    pub nsfw: bool,
    pub anonymous: bool,
    pub comment_count: u64,
    /// NSFW while the viewer has NSFW hidden; render the placeholder.
    pub hidden: bool,
}

impl PostCard {
    pub fn new(view: &PostView, show_nsfw: bool, now: &DateTime<Utc>) -> Self {
        let badge = view.author_badge();
        Self {
            id: view.post.id,
            href: format!("/post/{}", view.post.id),
            title: view.post.title.clone(),
            excerpt: excerpt(&view.post.content),
            category: view.category_name().unwrap_or("Uncategorized").to_string(),
            author: view.author_label(),
            badge: badge.map(|b| b.to_string()),
            badge_class: badge_class(badge),
            created: relative_time(&view.post.created_at, now),
            nsfw: view.post.nsfw,
            anonymous: view.post.anonymous,
            comment_count: view.comment_count,
            hidden: view.post.nsfw && !show_nsfw,
        }
    }

    pub fn list(views: &[PostView], show_nsfw: bool) -> Vec<Self> {
        let now = Utc::now();
        views.iter().map(|v| Self::new(v, show_nsfw, &now)).collect()
    }
}

/// The full post on its own page.
#[derive(Debug, Clone)]
pub struct PostDetail {
    pub card: PostCard,
    pub content: String,
    pub category_href: Option<String>,
    pub posted_on: String,
}

impl PostDetail {
    pub fn new(view: &PostView, show_nsfw: bool) -> Self {
        let now = Utc::now();
        Self {
            card: PostCard::new(view, show_nsfw, &now),
            content: view.post.content.clone(),
            category_href: view.category_name().map(category_href),
            posted_on: format_date(&view.post.created_at),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommentItem {
    pub id: Uuid,
    pub author: String,
    pub badge: Option<String>,
    pub badge_class: &'static str,
    pub content: String,
    pub created: String,
    pub can_delete: bool,
}

impl CommentItem {
    pub fn list(comments: &[CommentView], viewer: Option<&SessionUser>) -> Vec<Self> {
        let now = Utc::now();
        comments
            .iter()
            .map(|c| {
                let badge = c.author.as_ref().and_then(|a| a.badge);
                Self {
                    id: c.comment.id,
                    author: c.author_label(),
                    badge: badge.map(|b| b.to_string()),
                    badge_class: badge_class(badge),
                    content: c.comment.content.clone(),
                    created: relative_time(&c.comment.created_at, &now),
                    can_delete: rf_core::forum::can_delete_comment(viewer, c),
                }
            })
            .collect()
    }
}

/// Arrow widget state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteWidget {
    pub score: i64,
    pub upvotes: i64,
    pub downvotes: i64,
    pub up_active: bool,
    pub down_active: bool,
    pub busy: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rf_core::models::{AuthorRef, Post};

    #[test]
    fn test_excerpt_cuts_at_150_characters() {
        assert_eq!(excerpt("short"), "short");
        let exact = "x".repeat(EXCERPT_CHARS);
        assert_eq!(excerpt(&exact), exact);
        let long = "ü".repeat(EXCERPT_CHARS + 1);
        let cut = excerpt(&long);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), EXCERPT_CHARS + 3);
    }

    #[test]
    fn test_relative_time_buckets() {
        let now = Utc::now();
        let ago = |d: Duration| relative_time(&(now - d), &now);
        assert_eq!(ago(Duration::seconds(10)), "a few seconds ago");
        assert_eq!(ago(Duration::minutes(5)), "5 minutes ago");
        assert_eq!(ago(Duration::minutes(70)), "an hour ago");
        assert_eq!(ago(Duration::hours(3)), "3 hours ago");
        assert_eq!(ago(Duration::days(4)), "4 days ago");
        assert_eq!(ago(Duration::days(800)), "2 years ago");
    }

    #[test]
    fn test_category_names_become_single_segments() {
        assert_eq!(category_href("TECH"), "/category/TECH");
        assert_eq!(
            category_href("BONE STRUCTURE / FACE SHAPE"),
            "/category/BONE%20STRUCTURE%20%2F%20FACE%20SHAPE"
        );
    }

    #[test]
    fn test_nsfw_card_is_hidden_unless_enabled() {
        let view = PostView {
            post: Post {
                id: Uuid::now_v7(),
                title: "t".into(),
                content: "c".into(),
                category_id: None,
                user_id: None,
                nsfw: true,
                anonymous: true,
                created_at: Utc::now(),
            },
            category: None,
            author: Some(AuthorRef { username: Some("neo".into()), badge: Some(Badge::Legend) }),
            comment_count: 0,
        };
        let now = Utc::now();
        let card = PostCard::new(&view, false, &now);
        assert!(card.hidden);
        assert_eq!(card.author, "Anonymous");
        assert_eq!(card.badge, None);
        assert_eq!(card.category, "Uncategorized");
        assert!(!PostCard::new(&view, true, &now).hidden);
    }
}
