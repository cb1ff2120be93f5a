//! # rf-api Handlers
//!
//! Each page handler reads the session, asks the core for data, and renders
//! an rf-ui template. Form endpoints queue a notice and redirect.

use actix_web::http::{header, StatusCode};
use actix_web::{web, HttpRequest, HttpResponse};
use askama::Template;
use percent_encoding::percent_decode_str;
use rf_core::validation::{PostDraft, MAX_CONTENT_CHARS, MAX_TITLE_CHARS};
use rf_core::{AdminPanel, AdminTab, AdminTable, AppError, Badge, Role, SessionUser, VoteType};
use rf_ui::{
    AdminTemplate, CategoryLink, CategoryTemplate, Chrome, CommentItem, IndexTemplate, LoginTemplate,
    NewPostTemplate, NotFoundTemplate, Notice, PostCard, PostDetail, PostForm, PostTemplate,
    RegisterTemplate, SelectOption, VoteWidget,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::state::AppState;

/// Categories shown as tiles on the home page.
pub const FEATURED_CATEGORIES: usize = 6;

fn see_other(location: &str) -> HttpResponse {
    HttpResponse::SeeOther()
        .insert_header((header::LOCATION, location.to_string()))
        .finish()
}

fn render_status<T: Template>(status: StatusCode, page: T) -> HttpResponse {
    match page.render() {
        Ok(html) => HttpResponse::build(status)
            .content_type("text/html; charset=utf-8")
            .body(html),
        Err(err) => {
            log::error!("template rendering failed: {err}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

fn render<T: Template>(page: T) -> HttpResponse {
    render_status(StatusCode::OK, page)
}

/// Only same-site paths are followed back.
fn local_path(back: Option<&str>) -> String {
    match back {
        Some(path) if path.starts_with('/') && !path.starts_with("//") => path.to_string(),
        _ => "/".to_string(),
    }
}

/// User-facing text of a failed operation. Remote failures get `fallback`.
fn failure_text(err: &AppError, fallback: &str) -> String {
    match err {
        AppError::ValidationError(msg) | AppError::Unauthorized(msg) | AppError::Conflict(msg) => {
            msg.clone()
        }
        AppError::NotFound(what, _) => format!("{what} not found"),
        AppError::Remote(_) | AppError::Internal(_) => {
            log::warn!("{fallback}: {err}");
            fallback.to_string()
        }
    }
}

/// Sign-in and sign-up show the backend's own reason.
fn auth_failure_text(err: &AppError) -> String {
    match err {
        AppError::Remote(msg) => {
            log::info!("authentication rejected: {msg}");
            msg.clone()
        }
        other => failure_text(other, "Authentication failed"),
    }
}

async fn chrome(
    data: &AppState,
    title: &str,
    user: Option<&SessionUser>,
    active_category: Option<&str>,
    req: &HttpRequest,
) -> Chrome {
    let categories = data.forum.categories().await.unwrap_or_else(|err| {
        log::warn!("could not load categories: {err}");
        Vec::new()
    });
    let prefs = data.settings.preferences().await;
    let notices = data.take_notices().await;
    Chrome::new(title, prefs, user, &categories, active_category, notices, req.uri().to_string())
}

async fn not_found(data: &AppState, user: Option<&SessionUser>, what: &str, req: &HttpRequest) -> HttpResponse {
    let chrome = chrome(data, "Not Found", user, None, req).await;
    render_status(StatusCode::NOT_FOUND, NotFoundTemplate { chrome, what: what.to_string() })
}

/// Renders the home page: category tiles and the live recent-posts feed.
pub async fn index(data: web::Data<AppState>, req: HttpRequest) -> HttpResponse {
    let user = data.session.current().await;
    let posts = match data.home_feed().await {
        Ok(feed) => feed.snapshot().await,
        Err(err) => {
            log::warn!("could not load recent posts: {err:#}");
            Vec::new()
        }
    };

    let chrome = chrome(&data, "Home", user.as_ref(), None, &req).await;
    let featured = chrome.categories.iter().take(FEATURED_CATEGORIES).cloned().collect();
    render(IndexTemplate { posts: PostCard::list(&posts, chrome.show_nsfw), featured, chrome })
}

/// Renders one category, e.g. `/category/BONE%20STRUCTURE%20%2F%20FACE%20SHAPE`.
pub async fn category(data: web::Data<AppState>, req: HttpRequest, path: web::Path<String>) -> HttpResponse {
    // The router leaves reserved characters such as %2F encoded.
    let name = percent_decode_str(&path.into_inner()).decode_utf8_lossy().into_owned();
    let user = data.session.current().await;

    let (category, posts) = match data.forum.category_page(&name).await {
        Ok(Some(category)) => {
            let posts = match data.category_feed(category.id).await {
                Ok(feed) => feed.snapshot().await,
                Err(err) => {
                    log::warn!("could not load posts of {name}: {err:#}");
                    data.notify(Notice::error("Failed to load posts")).await;
                    Vec::new()
                }
            };
            (Some(category), posts)
        }
        Ok(None) => (None, Vec::new()),
        Err(err) => {
            data.notify(Notice::error(failure_text(&err, "Error loading category"))).await;
            (None, Vec::new())
        }
    };

    let chrome = chrome(&data, &name, user.as_ref(), Some(&name), &req).await;
    let status = if category.is_some() { StatusCode::OK } else { StatusCode::NOT_FOUND };
    render_status(
        status,
        CategoryTemplate {
            category: category.as_ref().map(|c| CategoryLink::new(c, None)),
            posts: PostCard::list(&posts, chrome.show_nsfw),
            name,
            chrome,
        },
    )
}

/// Renders a post with its votes and live comment list.
pub async fn post_page(data: web::Data<AppState>, req: HttpRequest, path: web::Path<String>) -> HttpResponse {
    let user = data.session.current().await;
    let Ok(post_id) = Uuid::parse_str(&path.into_inner()) else {
        return not_found(&data, user.as_ref(), "Post", &req).await;
    };

    let view = match data.forum.post_detail(post_id).await {
        Ok(view) => view,
        Err(AppError::NotFound(..)) => return not_found(&data, user.as_ref(), "Post", &req).await,
        Err(err) => {
            data.notify(Notice::error(failure_text(&err, "Error loading post"))).await;
            return not_found(&data, user.as_ref(), "Post", &req).await;
        }
    };

    let comments = match data.comment_feed(post_id).await {
        Ok(feed) => feed.snapshot().await,
        Err(err) => {
            log::warn!("could not load comments of {post_id}: {err:#}");
            data.notify(Notice::error("Failed to load comments")).await;
            Vec::new()
        }
    };

    let aggregator = data.votes.aggregator(post_id);
    let busy = aggregator.is_busy().await;
    // A cast still in flight keeps its optimistic counters on screen.
    let tally = if busy {
        aggregator.tally().await
    } else {
        aggregator.mount(user.as_ref().map(|u| u.id)).await
    };
    let votes = VoteWidget {
        score: tally.score(),
        upvotes: tally.upvotes,
        downvotes: tally.downvotes,
        up_active: tally.user_vote == Some(VoteType::Up),
        down_active: tally.user_vote == Some(VoteType::Down),
        busy,
    };

    let show_nsfw = data.settings.preferences().await.show_nsfw;
    let title = if view.post.nsfw && !show_nsfw { "NSFW Content Hidden" } else { view.post.title.as_str() };
    let chrome = chrome(&data, title, user.as_ref(), view.category_name(), &req).await;
    render(PostTemplate {
        post: PostDetail::new(&view, chrome.show_nsfw),
        votes,
        comments: CommentItem::list(&comments, user.as_ref()),
        chrome,
    })
}

#[derive(Debug, Deserialize)]
pub struct VoteForm {
    pub vote_type: String,
}

pub async fn vote(data: web::Data<AppState>, path: web::Path<Uuid>, form: web::Form<VoteForm>) -> HttpResponse {
    let post_id = path.into_inner();
    let back = format!("/post/{post_id}");
    let requested: VoteType = match form.vote_type.parse() {
        Ok(vote_type) => vote_type,
        Err(err) => {
            data.notify(Notice::error(failure_text(&err, "Failed to vote"))).await;
            return see_other(&back);
        }
    };

    let user = data.session.current().await;
    if let Err(err) = data.votes.aggregator(post_id).cast_vote(user.as_ref(), requested).await {
        data.notify(Notice::error(failure_text(&err, "Failed to vote"))).await;
    }
    see_other(&back)
}

#[derive(Debug, Deserialize)]
pub struct CommentForm {
    #[serde(default)]
    pub content: String,
}

pub async fn add_comment(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
    form: web::Form<CommentForm>,
) -> HttpResponse {
    let post_id = path.into_inner();
    let user = data.session.current().await;

    match data.forum.add_comment(user.as_ref(), post_id, &form.content).await {
        Ok(()) => {
            // Own inserts may arrive on the change feed after the redirect.
            if let Err(err) = data.comments.refresh(post_id, data.store().as_ref()).await {
                log::warn!("could not refresh comments of {post_id}: {err:#}");
            }
            data.notify(Notice::success("Comment posted!")).await;
        }
        Err(err) => data.notify(Notice::error(failure_text(&err, "Failed to post comment"))).await,
    }
    see_other(&format!("/post/{post_id}"))
}

/// Form body of endpoints that send the browser back where it came from.
#[derive(Debug, Default, Deserialize)]
pub struct BackForm {
    pub back: Option<String>,
}

pub async fn delete_comment(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
    form: web::Form<BackForm>,
) -> HttpResponse {
    let comment_id = path.into_inner();
    let user = data.session.current().await;

    match data.forum.delete_comment(user.as_ref(), comment_id).await {
        Ok(post_id) => {
            if let Some(feed) = data.comments.mounted(post_id).await {
                feed.remove(comment_id).await;
            }
            data.notify(Notice::success("Comment deleted")).await;
            see_other(&format!("/post/{post_id}"))
        }
        Err(err) => {
            data.notify(Notice::error(failure_text(&err, "Failed to delete comment"))).await;
            see_other(&local_path(form.back.as_deref()))
        }
    }
}

async fn new_post_page(
    data: &AppState,
    user: Option<&SessionUser>,
    form: PostForm,
    req: &HttpRequest,
) -> HttpResponse {
    let chrome = chrome(data, "Create New Post", user, None, req).await;
    let category_options =
        SelectOption::options(chrome.categories.iter().map(|c| c.name.as_str()), &form.category);
    render(NewPostTemplate {
        form,
        category_options,
        max_title: MAX_TITLE_CHARS,
        max_content: MAX_CONTENT_CHARS,
        chrome,
    })
}

pub async fn new_post_form(data: web::Data<AppState>, req: HttpRequest) -> HttpResponse {
    let Some(user) = data.session.current().await else {
        data.notify(Notice::error("Please log in to create a post")).await;
        return see_other("/login");
    };
    new_post_page(&data, Some(&user), PostForm::default(), &req).await
}

#[derive(Debug, Deserialize)]
pub struct NewPostForm {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub category: String,
    /// Checkboxes are only sent when ticked.
    pub nsfw: Option<String>,
    pub anonymous: Option<String>,
}

pub async fn create_post(
    data: web::Data<AppState>,
    req: HttpRequest,
    form: web::Form<NewPostForm>,
) -> HttpResponse {
    let user = data.session.current().await;
    let form = form.into_inner();
    let draft = PostDraft {
        title: form.title,
        content: form.content,
        category: form.category,
        nsfw: form.nsfw.is_some(),
        anonymous: form.anonymous.is_some(),
    };

    match data.forum.create_post(user.as_ref(), &draft).await {
        Ok(post) => {
            data.notify(Notice::success("Post created successfully!")).await;
            see_other(&format!("/post/{}", post.id))
        }
        Err(AppError::Unauthorized(msg)) => {
            data.notify(Notice::error(msg)).await;
            see_other("/login")
        }
        Err(err) => {
            data.notify(Notice::error(failure_text(&err, "Failed to create post"))).await;
            let sticky = PostForm {
                title: draft.title,
                content: draft.content,
                category: draft.category,
                nsfw: draft.nsfw,
                anonymous: draft.anonymous,
            };
            new_post_page(&data, user.as_ref(), sticky, &req).await
        }
    }
}

pub async fn login_form(data: web::Data<AppState>, req: HttpRequest) -> HttpResponse {
    if data.session.current().await.is_some() {
        return see_other("/");
    }
    let chrome = chrome(&data, "Login", None, None, &req).await;
    render(LoginTemplate { chrome, email: String::new() })
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

pub async fn login(data: web::Data<AppState>, req: HttpRequest, form: web::Form<LoginForm>) -> HttpResponse {
    let outcome = data.session.sign_in(&form.email, &form.password).await;
    match outcome {
        Ok(_) => {
            data.notify(Notice::success("Logged in successfully")).await;
            see_other("/")
        }
        Err(err) => {
            data.notify(Notice::error(auth_failure_text(&err))).await;
            let chrome = chrome(&data, "Login", None, None, &req).await;
            render(LoginTemplate { chrome, email: form.into_inner().email })
        }
    }
}

pub async fn register_form(data: web::Data<AppState>, req: HttpRequest) -> HttpResponse {
    if data.session.current().await.is_some() {
        return see_other("/");
    }
    let chrome = chrome(&data, "Register", None, None, &req).await;
    render(RegisterTemplate { chrome, email: String::new(), username: String::new() })
}

#[derive(Debug, Deserialize)]
pub struct RegisterForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub username: String,
}

pub async fn register(
    data: web::Data<AppState>,
    req: HttpRequest,
    form: web::Form<RegisterForm>,
) -> HttpResponse {
    let outcome = data.session.sign_up(&form.email, &form.password, &form.username).await;
    match outcome {
        Ok(_) => {
            data.notify(Notice::success("Registration successful! Please log in.")).await;
            see_other("/login")
        }
        Err(err) => {
            data.notify(Notice::error(auth_failure_text(&err))).await;
            let form = form.into_inner();
            let chrome = chrome(&data, "Register", None, None, &req).await;
            render(RegisterTemplate { chrome, email: form.email, username: form.username })
        }
    }
}

pub async fn logout(data: web::Data<AppState>) -> HttpResponse {
    match data.session.sign_out().await {
        Ok(()) => data.notify(Notice::success("Logged out successfully")).await,
        Err(err) => data.notify(Notice::error(failure_text(&err, "Error logging out"))).await,
    }
    see_other("/")
}

#[derive(Debug, Deserialize)]
pub struct AdminQuery {
    pub tab: Option<String>,
}

/// Moderation tables. Anyone but an admin is sent home.
pub async fn admin_page(
    data: web::Data<AppState>,
    req: HttpRequest,
    query: web::Query<AdminQuery>,
) -> HttpResponse {
    let user = data.session.current().await;
    if AdminPanel::require_admin(user.as_ref()).is_err() {
        return see_other("/");
    }

    let tab: AdminTab = query.tab.as_deref().and_then(|t| t.parse().ok()).unwrap_or_default();
    let table = match data.admin.load(user.as_ref(), tab).await {
        Ok(table) => table,
        Err(err) => {
            data.notify(Notice::error(failure_text(&err, "Error loading data"))).await;
            AdminTable { tab, rows: Vec::new() }
        }
    };

    let chrome = chrome(&data, "Admin Panel", user.as_ref(), None, &req).await;
    render(AdminTemplate::new(chrome, &table))
}

pub async fn admin_delete(data: web::Data<AppState>, req: HttpRequest, path: web::Path<(String, Uuid)>) -> HttpResponse {
    let (tab, id) = path.into_inner();
    let user = data.session.current().await;
    let Ok(tab) = tab.parse::<AdminTab>() else {
        return not_found(&data, user.as_ref(), "Admin tab", &req).await;
    };

    let (done, failed) = match tab {
        AdminTab::Comments => ("Comment deleted successfully", "Failed to delete comment"),
        _ => ("Post deleted successfully", "Failed to delete post"),
    };
    match data.admin.delete(user.as_ref(), tab, id).await {
        Ok(()) => {
            if tab == AdminTab::Posts {
                data.votes.forget(id);
            }
            data.notify(Notice::success(done)).await;
        }
        Err(AppError::Unauthorized(_)) => return see_other("/"),
        Err(err) => data.notify(Notice::error(failure_text(&err, failed))).await,
    }
    see_other(&format!("/admin?tab={tab}"))
}

#[derive(Debug, Deserialize)]
pub struct RoleForm {
    pub role: String,
}

pub async fn admin_role(data: web::Data<AppState>, path: web::Path<Uuid>, form: web::Form<RoleForm>) -> HttpResponse {
    let id = path.into_inner();
    let user = data.session.current().await;
    let outcome = match form.role.parse::<Role>() {
        Ok(role) => data.admin.update_role(user.as_ref(), id, role).await,
        Err(err) => Err(err),
    };
    finish_user_update(&data, user.as_ref(), id, outcome, "User role updated successfully", "Failed to update user role").await
}

#[derive(Debug, Deserialize)]
pub struct BadgeForm {
    pub badge: String,
}

pub async fn admin_badge(data: web::Data<AppState>, path: web::Path<Uuid>, form: web::Form<BadgeForm>) -> HttpResponse {
    let id = path.into_inner();
    let user = data.session.current().await;
    let outcome = match form.badge.parse::<Badge>() {
        Ok(badge) => data.admin.update_badge(user.as_ref(), id, badge).await,
        Err(err) => Err(err),
    };
    finish_user_update(&data, user.as_ref(), id, outcome, "User badge updated successfully", "Failed to update user badge").await
}

async fn finish_user_update(
    data: &AppState,
    caller: Option<&SessionUser>,
    id: Uuid,
    outcome: rf_core::Result<()>,
    done: &str,
    failed: &str,
) -> HttpResponse {
    match outcome {
        Ok(()) => {
            if caller.is_some_and(|u| u.id == id) {
                data.session.reload_profile().await;
            }
            data.notify(Notice::success(done)).await;
        }
        Err(AppError::Unauthorized(_)) => return see_other("/"),
        Err(err) => data.notify(Notice::error(failure_text(&err, failed))).await,
    }
    see_other("/admin?tab=users")
}

pub async fn toggle_theme(data: web::Data<AppState>, form: web::Form<BackForm>) -> HttpResponse {
    if let Err(err) = data.settings.toggle_theme().await {
        data.notify(Notice::error(failure_text(&err, "Could not save the theme preference"))).await;
    }
    see_other(&local_path(form.back.as_deref()))
}

pub async fn toggle_nsfw(data: web::Data<AppState>, form: web::Form<BackForm>) -> HttpResponse {
    if let Err(err) = data.settings.toggle_nsfw().await {
        data.notify(Notice::error(failure_text(&err, "Could not save the NSFW preference"))).await;
    }
    see_other(&local_path(form.back.as_deref()))
}

/// Fallback for unknown paths.
pub async fn page_not_found(data: web::Data<AppState>, req: HttpRequest) -> HttpResponse {
    let user = data.session.current().await;
    not_found(&data, user.as_ref(), "Page", &req).await
}
