//! `ForumStore` over the PostgREST row API.

use async_trait::async_trait;
use reqwest::Method;
use rf_core::models::{
    AdminCommentView, Badge, Category, Comment, CommentView, NewComment, NewPost, Post, PostView,
    Profile, Role, Vote,
};
use rf_core::traits::{ForumStore, PostQuery};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::client::RestClient;
use crate::rows::{
    CommentRow, PostRow, ProfileRow, ADMIN_COMMENT_SELECT, COMMENT_SELECT, POST_SELECT,
};

fn eq(id: impl ToString) -> String {
    format!("eq.{}", id.to_string())
}

fn param(key: &'static str, value: impl Into<String>) -> (&'static str, String) {
    (key, value.into())
}

pub struct SupabaseStore {
    client: RestClient,
}

impl SupabaseStore {
    pub fn new(client: RestClient) -> Self {
        Self { client }
    }

    async fn select<T: DeserializeOwned>(&self, table: &str, params: &[(&str, String)]) -> anyhow::Result<Vec<T>> {
        let url = self.client.table_url(table, params)?;
        let req = self.client.request(Method::GET, url).await;
        self.client.send_json(req).await
    }

    /// Single-row read; an empty result is `None`, not an error.
    async fn select_one<T: DeserializeOwned>(&self, table: &str, params: &[(&str, String)]) -> anyhow::Result<Option<T>> {
        let mut params = params.to_vec();
        params.push(param("limit", "1"));
        Ok(self.select(table, &params).await?.into_iter().next())
    }

    async fn insert<B: Serialize + Sync, T: DeserializeOwned>(&self, table: &str, body: &B) -> anyhow::Result<T> {
        let url = self.client.table_url(table, &[])?;
        let req = self
            .client
            .request(Method::POST, url)
            .await
            .header("Prefer", "return=representation")
            .json(body);
        let rows: Vec<T> = self.client.send_json(req).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("insert into {table} returned no row"))
    }

    async fn insert_silent<B: Serialize + Sync>(&self, table: &str, body: &B) -> anyhow::Result<()> {
        let url = self.client.table_url(table, &[])?;
        let req = self.client.request(Method::POST, url).await.json(body);
        self.client.send_empty(req).await
    }

    async fn update<B: Serialize + Sync>(&self, table: &str, filters: &[(&str, String)], body: &B) -> anyhow::Result<()> {
        let url = self.client.table_url(table, filters)?;
        let req = self.client.request(Method::PATCH, url).await.json(body);
        self.client.send_empty(req).await
    }

    async fn delete(&self, table: &str, filters: &[(&str, String)]) -> anyhow::Result<()> {
        let url = self.client.table_url(table, filters)?;
        let req = self.client.request(Method::DELETE, url).await;
        self.client.send_empty(req).await
    }
}

#[async_trait]
impl ForumStore for SupabaseStore {
    async fn get_profile(&self, id: Uuid) -> anyhow::Result<Option<Profile>> {
        let row: Option<ProfileRow> = self
            .select_one("profiles", &[param("select", "*"), param("id", eq(id))])
            .await?;
        Ok(row.map(Profile::from))
    }

    async fn list_profiles(&self) -> anyhow::Result<Vec<Profile>> {
        let rows: Vec<ProfileRow> = self
            .select("profiles", &[param("select", "*"), param("order", "created_at.desc")])
            .await?;
        Ok(rows.into_iter().map(Profile::from).collect())
    }

    async fn create_profile(&self, profile: Profile) -> anyhow::Result<()> {
        // created_at is left to the column default.
        let body = json!({
            "id": profile.id,
            "username": profile.username,
            "role": profile.role,
            "badge": profile.badge,
        });
        self.insert_silent("profiles", &body).await
    }

    async fn update_profile_role(&self, id: Uuid, role: Role) -> anyhow::Result<()> {
        self.update("profiles", &[param("id", eq(id))], &json!({ "role": role })).await
    }

    async fn update_profile_badge(&self, id: Uuid, badge: Badge) -> anyhow::Result<()> {
        self.update("profiles", &[param("id", eq(id))], &json!({ "badge": badge })).await
    }

    async fn list_categories(&self) -> anyhow::Result<Vec<Category>> {
        self.select("categories", &[param("select", "*"), param("order", "name.asc")]).await
    }

    async fn get_category_by_name(&self, name: &str) -> anyhow::Result<Option<Category>> {
        self.select_one("categories", &[param("select", "*"), param("name", eq(name))]).await
    }

    async fn list_posts(&self, query: PostQuery) -> anyhow::Result<Vec<PostView>> {
        let mut params = vec![param("select", POST_SELECT), param("order", "created_at.desc")];
        if let Some(category_id) = query.category_id {
            params.push(param("category_id", eq(category_id)));
        }
        if let Some(limit) = query.limit {
            params.push(param("limit", limit.to_string()));
        }
        let rows: Vec<PostRow> = self.select("posts", &params).await?;
        Ok(rows.into_iter().map(PostView::from).collect())
    }

    async fn get_post(&self, id: Uuid) -> anyhow::Result<Option<PostView>> {
        let row: Option<PostRow> = self
            .select_one("posts", &[param("select", POST_SELECT), param("id", eq(id))])
            .await?;
        Ok(row.map(PostView::from))
    }

    async fn create_post(&self, post: NewPost) -> anyhow::Result<Post> {
        self.insert("posts", &post).await
    }

    async fn delete_post(&self, id: Uuid) -> anyhow::Result<()> {
        self.delete("posts", &[param("id", eq(id))]).await
    }

    async fn list_comments(&self, post_id: Uuid) -> anyhow::Result<Vec<CommentView>> {
        let rows: Vec<CommentRow> = self
            .select(
                "comments",
                &[
                    param("select", COMMENT_SELECT),
                    param("post_id", eq(post_id)),
                    param("order", "created_at.asc"),
                ],
            )
            .await?;
        Ok(rows.into_iter().map(CommentView::from).collect())
    }

    async fn get_comment(&self, id: Uuid) -> anyhow::Result<Option<CommentView>> {
        let row: Option<CommentRow> = self
            .select_one("comments", &[param("select", COMMENT_SELECT), param("id", eq(id))])
            .await?;
        Ok(row.map(CommentView::from))
    }

    async fn list_all_comments(&self) -> anyhow::Result<Vec<AdminCommentView>> {
        let rows: Vec<CommentRow> = self
            .select(
                "comments",
                &[param("select", ADMIN_COMMENT_SELECT), param("order", "created_at.desc")],
            )
            .await?;
        Ok(rows.into_iter().map(AdminCommentView::from).collect())
    }

    async fn create_comment(&self, comment: NewComment) -> anyhow::Result<Comment> {
        self.insert("comments", &comment).await
    }

    async fn delete_comment(&self, id: Uuid) -> anyhow::Result<()> {
        self.delete("comments", &[param("id", eq(id))]).await
    }

    async fn list_votes(&self, post_id: Uuid) -> anyhow::Result<Vec<Vote>> {
        self.select("votes", &[param("select", "*"), param("post_id", eq(post_id))]).await
    }

    async fn get_vote(&self, post_id: Uuid, user_id: Uuid) -> anyhow::Result<Option<Vote>> {
        self.select_one(
            "votes",
            &[param("select", "*"), param("post_id", eq(post_id)), param("user_id", eq(user_id))],
        )
        .await
    }

    async fn insert_vote(&self, vote: Vote) -> anyhow::Result<()> {
        self.insert_silent("votes", &vote).await
    }

    async fn update_vote(&self, vote: Vote) -> anyhow::Result<()> {
        self.update(
            "votes",
            &[param("post_id", eq(vote.post_id)), param("user_id", eq(vote.user_id))],
            &json!({ "vote_type": vote.vote_type }),
        )
        .await
    }

    async fn delete_vote(&self, post_id: Uuid, user_id: Uuid) -> anyhow::Result<()> {
        self.delete("votes", &[param("post_id", eq(post_id)), param("user_id", eq(user_id))]).await
    }
}
