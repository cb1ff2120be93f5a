//! # Forum Service
//!
//! Post, comment and category operations with validation and authorization
//! applied before the store is touched.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{Category, CommentView, NewComment, NewPost, Post, PostView, SessionUser};
use crate::traits::ForumStore;
use crate::validation::{self, PostDraft};

pub struct ForumService {
    store: Arc<dyn ForumStore>,
}

fn require_user(caller: Option<&SessionUser>, action: &str) -> Result<SessionUser> {
    caller
        .cloned()
        .ok_or_else(|| AppError::Unauthorized(format!("Please log in to {action}")))
}

impl ForumService {
    pub fn new(store: Arc<dyn ForumStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ForumStore> {
        &self.store
    }

    /// All categories, ordered by name.
    pub async fn categories(&self) -> Result<Vec<Category>> {
        Ok(self.store.list_categories().await?)
    }

    /// Exact, case-sensitive lookup. `None` renders as an inline "not found".
    pub async fn category_page(&self, name: &str) -> Result<Option<Category>> {
        Ok(self.store.get_category_by_name(name).await?)
    }

    pub async fn post_detail(&self, id: Uuid) -> Result<PostView> {
        self.store
            .get_post(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Post".into(), id.to_string()))
    }

    pub async fn create_post(&self, caller: Option<&SessionUser>, draft: &PostDraft) -> Result<Post> {
        let user = require_user(caller, "create a post")?;
        let draft = validation::validate_post(draft)?;

        let category = self
            .store
            .get_category_by_name(&draft.category)
            .await?
            .ok_or_else(|| AppError::ValidationError("Please select a category".into()))?;

        let post = self
            .store
            .create_post(NewPost {
                title: draft.title,
                content: draft.content,
                category_id: category.id,
                user_id: user.id,
                nsfw: draft.nsfw,
                anonymous: draft.anonymous,
            })
            .await?;
        log::info!("post {} created in {}", post.id, category.name);
        Ok(post)
    }

    pub async fn add_comment(
        &self,
        caller: Option<&SessionUser>,
        post_id: Uuid,
        content: &str,
    ) -> Result<()> {
        let user = require_user(caller, "comment")?;
        let content = validation::validate_comment(content)?;
        let comment = self
            .store
            .create_comment(NewComment { post_id, user_id: user.id, content })
            .await?;
        log::debug!("comment {} added to post {post_id}", comment.id);
        Ok(())
    }

    /// Authors may delete their own comments; admins may delete any.
    pub async fn delete_comment(&self, caller: Option<&SessionUser>, comment_id: Uuid) -> Result<Uuid> {
        let user = require_user(caller, "delete comments")?;
        let view = self
            .store
            .get_comment(comment_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Comment".into(), comment_id.to_string()))?;

        if !can_delete_comment(Some(&user), &view) {
            return Err(AppError::Unauthorized("You can only delete your own comments".into()));
        }
        self.store.delete_comment(comment_id).await?;
        log::info!("comment {comment_id} deleted by {}", user.id);
        Ok(view.comment.post_id)
    }
}

/// Whether the delete control is offered for `comment`.
pub fn can_delete_comment(viewer: Option<&SessionUser>, comment: &CommentView) -> bool {
    viewer.is_some_and(|u| u.is_admin() || u.id == comment.comment.user_id)
}
