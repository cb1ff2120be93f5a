//! # rf-db-sqlite Implementation
//!
//! Local backend: maps the SQLite relational model onto the `rf-core`
//! domain models, and broadcasts every write as a change event so feeds
//! behave the same as against the hosted backend.

mod changes;
mod schema;

use std::str::FromStr;

use anyhow::bail;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rf_core::models::{
    AdminCommentView, AuthorRef, Badge, Category, CategoryRef, Comment, CommentView, NewComment,
    NewPost, Post, PostView, Profile, Role, Vote, VoteType,
};
use rf_core::realtime::{ChangeKind, Table};
use rf_core::traits::{Credential, CredentialStore, ForumStore, PostQuery};
use serde_json::json;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use uuid::Uuid;

pub use changes::ChangeBus;
pub use schema::SEED_CATEGORIES;

#[derive(Clone)]
pub struct SqliteForumStore {
    pool: SqlitePool,
    bus: ChangeBus,
}

// Helper for UUID conversion
pub(crate) fn uuid_to_blob(id: Uuid) -> Vec<u8> {
    id.as_bytes().to_vec()
}

fn blob_to_uuid(blob: &[u8]) -> anyhow::Result<Uuid> {
    Ok(Uuid::from_slice(blob)?)
}

fn opt_uuid(row: &SqliteRow, column: &str) -> anyhow::Result<Option<Uuid>> {
    row.try_get::<Option<Vec<u8>>, _>(column)?
        .map(|blob| blob_to_uuid(&blob))
        .transpose()
}

fn req_uuid(row: &SqliteRow, column: &str) -> anyhow::Result<Uuid> {
    blob_to_uuid(&row.try_get::<Vec<u8>, _>(column)?)
}

const POST_SELECT: &str = "SELECT p.id, p.title, p.content, p.category_id, p.user_id, p.nsfw, p.anonymous, p.created_at,
        c.id AS cat_id, c.name AS cat_name, c.description AS cat_description,
        pr.id AS author_id, pr.username AS author_username, pr.badge AS author_badge,
        (SELECT COUNT(*) FROM comments cm WHERE cm.post_id = p.id) AS comment_count
    FROM posts p
    LEFT JOIN categories c ON c.id = p.category_id
    LEFT JOIN profiles pr ON pr.id = p.user_id";

const COMMENT_SELECT: &str = "SELECT cm.id, cm.post_id, cm.user_id, cm.content, cm.created_at,
        pr.id AS author_id, pr.username AS author_username, pr.badge AS author_badge,
        p.title AS post_title
    FROM comments cm
    LEFT JOIN profiles pr ON pr.id = cm.user_id
    LEFT JOIN posts p ON p.id = cm.post_id";

fn author_from_row(row: &SqliteRow) -> anyhow::Result<Option<AuthorRef>> {
    if opt_uuid(row, "author_id")?.is_none() {
        return Ok(None);
    }
    let badge: Option<String> = row.try_get("author_badge")?;
    Ok(Some(AuthorRef {
        username: row.try_get("author_username")?,
        badge: badge.and_then(|b| Badge::from_str(&b).ok()),
    }))
}

fn post_from_row(row: &SqliteRow) -> anyhow::Result<PostView> {
    let category = match row.try_get::<Option<String>, _>("cat_name")? {
        Some(name) => Some(CategoryRef {
            id: opt_uuid(row, "cat_id")?,
            name,
            description: row.try_get("cat_description")?,
        }),
        None => None,
    };
    Ok(PostView {
        post: Post {
            id: req_uuid(row, "id")?,
            title: row.try_get("title")?,
            content: row.try_get("content")?,
            category_id: opt_uuid(row, "category_id")?,
            user_id: opt_uuid(row, "user_id")?,
            nsfw: row.try_get("nsfw")?,
            anonymous: row.try_get("anonymous")?,
            created_at: row.try_get("created_at")?,
        },
        category,
        author: author_from_row(row)?,
        comment_count: row.try_get::<i64, _>("comment_count")?.max(0) as u64,
    })
}

fn comment_from_row(row: &SqliteRow) -> anyhow::Result<Comment> {
    Ok(Comment {
        id: req_uuid(row, "id")?,
        post_id: req_uuid(row, "post_id")?,
        user_id: req_uuid(row, "user_id")?,
        content: row.try_get("content")?,
        created_at: row.try_get("created_at")?,
    })
}

fn profile_from_row(row: &SqliteRow) -> anyhow::Result<Profile> {
    let role: String = row.try_get("role")?;
    let badge: String = row.try_get("badge")?;
    Ok(Profile {
        id: req_uuid(row, "id")?,
        username: row.try_get("username")?,
        role: Role::from_str(&role).unwrap_or_default(),
        badge: Badge::from_str(&badge).unwrap_or_default(),
        created_at: row.try_get::<Option<DateTime<Utc>>, _>("created_at")?,
    })
}

fn vote_from_row(row: &SqliteRow) -> anyhow::Result<Vote> {
    let vote_type: String = row.try_get("vote_type")?;
    Ok(Vote {
        post_id: req_uuid(row, "post_id")?,
        user_id: req_uuid(row, "user_id")?,
        vote_type: VoteType::from_str(&vote_type)?,
    })
}

impl SqliteForumStore {
    /// Opens (creating if needed) the database at `url`, applies the schema
    /// and seeds the categories. `sqlite::memory:` gives a private database.
    pub async fn new(url: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // Every connection to `:memory:` is its own database, so keep exactly one alive.
        let in_memory = url.contains(":memory:");
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .idle_timeout(if in_memory { None } else { Some(std::time::Duration::from_secs(600)) })
            .max_lifetime(if in_memory { None } else { Some(std::time::Duration::from_secs(1800)) })
            .connect_with(options)
            .await?;

        schema::migrate(&pool).await?;
        let seeded = schema::seed(&pool).await?;
        if seeded > 0 {
            log::info!("seeded {seeded} categories");
        }

        Ok(Self { pool, bus: ChangeBus::new() })
    }

    /// The change feed fed by this store's writes.
    pub fn changes(&self) -> ChangeBus {
        self.bus.clone()
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl ForumStore for SqliteForumStore {
    async fn get_profile(&self, id: Uuid) -> anyhow::Result<Option<Profile>> {
        sqlx::query("SELECT * FROM profiles WHERE id = ?")
            .bind(uuid_to_blob(id))
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(profile_from_row)
            .transpose()
    }

    async fn list_profiles(&self) -> anyhow::Result<Vec<Profile>> {
        sqlx::query("SELECT * FROM profiles ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(profile_from_row)
            .collect()
    }

    async fn create_profile(&self, profile: Profile) -> anyhow::Result<()> {
        let created_at = profile.created_at.unwrap_or_else(Utc::now);
        sqlx::query("INSERT INTO profiles (id, username, role, badge, created_at) VALUES (?, ?, ?, ?, ?)")
            .bind(uuid_to_blob(profile.id))
            .bind(&profile.username)
            .bind(profile.role.as_str())
            .bind(profile.badge.as_str())
            .bind(created_at)
            .execute(&self.pool)
            .await?;
        self.bus.emit(
            Table::Profiles,
            ChangeKind::Insert,
            Some(json!({ "id": profile.id, "username": profile.username })),
            None,
        );
        Ok(())
    }

    async fn update_profile_role(&self, id: Uuid, role: Role) -> anyhow::Result<()> {
        let done = sqlx::query("UPDATE profiles SET role = ? WHERE id = ?")
            .bind(role.as_str())
            .bind(uuid_to_blob(id))
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 {
            bail!("profile {id} not found");
        }
        self.bus.emit(Table::Profiles, ChangeKind::Update, Some(json!({ "id": id, "role": role })), None);
        Ok(())
    }

    async fn update_profile_badge(&self, id: Uuid, badge: Badge) -> anyhow::Result<()> {
        let done = sqlx::query("UPDATE profiles SET badge = ? WHERE id = ?")
            .bind(badge.as_str())
            .bind(uuid_to_blob(id))
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 {
            bail!("profile {id} not found");
        }
        self.bus.emit(Table::Profiles, ChangeKind::Update, Some(json!({ "id": id, "badge": badge })), None);
        Ok(())
    }

    async fn list_categories(&self) -> anyhow::Result<Vec<Category>> {
        let rows = sqlx::query("SELECT id, name, description FROM categories ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(Category {
                    id: req_uuid(row, "id")?,
                    name: row.try_get("name")?,
                    description: row.try_get("description")?,
                })
            })
            .collect()
    }

    async fn get_category_by_name(&self, name: &str) -> anyhow::Result<Option<Category>> {
        let row = sqlx::query("SELECT id, name, description FROM categories WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = row {
            Ok(Some(Category {
                id: req_uuid(&row, "id")?,
                name: row.try_get("name")?,
                description: row.try_get("description")?,
            }))
        } else {
            Ok(None)
        }
    }

    async fn list_posts(&self, query: PostQuery) -> anyhow::Result<Vec<PostView>> {
        let mut sql = String::from(POST_SELECT);
        if query.category_id.is_some() {
            sql.push_str(" WHERE p.category_id = ?");
        }
        sql.push_str(" ORDER BY p.created_at DESC, p.id DESC LIMIT ?");

        let mut q = sqlx::query(&sql);
        if let Some(category_id) = query.category_id {
            q = q.bind(uuid_to_blob(category_id));
        }
        // SQLite treats a negative limit as "no limit".
        let limit = query.limit.map(|l| l as i64).unwrap_or(-1);
        q.bind(limit)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(post_from_row)
            .collect()
    }

    async fn get_post(&self, id: Uuid) -> anyhow::Result<Option<PostView>> {
        sqlx::query(&format!("{POST_SELECT} WHERE p.id = ?"))
            .bind(uuid_to_blob(id))
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(post_from_row)
            .transpose()
    }

    async fn create_post(&self, post: NewPost) -> anyhow::Result<Post> {
        let created = Post {
            id: Uuid::now_v7(),
            title: post.title,
            content: post.content,
            category_id: Some(post.category_id),
            user_id: Some(post.user_id),
            nsfw: post.nsfw,
            anonymous: post.anonymous,
            created_at: Utc::now(),
        };
        sqlx::query("INSERT INTO posts (id, title, content, category_id, user_id, nsfw, anonymous, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)")
            .bind(uuid_to_blob(created.id))
            .bind(&created.title)
            .bind(&created.content)
            .bind(uuid_to_blob(post.category_id))
            .bind(uuid_to_blob(post.user_id))
            .bind(created.nsfw)
            .bind(created.anonymous)
            .bind(created.created_at)
            .execute(&self.pool)
            .await?;
        self.bus.emit(Table::Posts, ChangeKind::Insert, Some(serde_json::to_value(&created)?), None);
        Ok(created)
    }

    async fn delete_post(&self, id: Uuid) -> anyhow::Result<()> {
        // Comments and votes go with the post.
        let mut tx = self.pool.begin().await?;
        let orphaned = sqlx::query("SELECT id FROM comments WHERE post_id = ?")
            .bind(uuid_to_blob(id))
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(|row| req_uuid(row, "id"))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let done = sqlx::query("DELETE FROM posts WHERE id = ?")
            .bind(uuid_to_blob(id))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        if done.rows_affected() > 0 {
            for comment_id in orphaned {
                self.bus.emit(
                    Table::Comments,
                    ChangeKind::Delete,
                    None,
                    Some(json!({ "id": comment_id, "post_id": id })),
                );
            }
            self.bus.emit(Table::Posts, ChangeKind::Delete, None, Some(json!({ "id": id })));
        }
        Ok(())
    }

    async fn list_comments(&self, post_id: Uuid) -> anyhow::Result<Vec<CommentView>> {
        sqlx::query(&format!("{COMMENT_SELECT} WHERE cm.post_id = ? ORDER BY cm.created_at ASC, cm.id ASC"))
            .bind(uuid_to_blob(post_id))
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| Ok(CommentView { comment: comment_from_row(row)?, author: author_from_row(row)? }))
            .collect()
    }

    async fn get_comment(&self, id: Uuid) -> anyhow::Result<Option<CommentView>> {
        let row = sqlx::query(&format!("{COMMENT_SELECT} WHERE cm.id = ?"))
            .bind(uuid_to_blob(id))
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(CommentView {
                comment: comment_from_row(&row)?,
                author: author_from_row(&row)?,
            })),
            None => Ok(None),
        }
    }

    async fn list_all_comments(&self) -> anyhow::Result<Vec<AdminCommentView>> {
        sqlx::query(&format!("{COMMENT_SELECT} ORDER BY cm.created_at DESC, cm.id DESC"))
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| {
                Ok(AdminCommentView {
                    comment: comment_from_row(row)?,
                    author: author_from_row(row)?,
                    post_title: row.try_get("post_title")?,
                })
            })
            .collect()
    }

    async fn create_comment(&self, comment: NewComment) -> anyhow::Result<Comment> {
        let created = Comment {
            id: Uuid::now_v7(),
            post_id: comment.post_id,
            user_id: comment.user_id,
            content: comment.content,
            created_at: Utc::now(),
        };
        sqlx::query("INSERT INTO comments (id, post_id, user_id, content, created_at) VALUES (?, ?, ?, ?, ?)")
            .bind(uuid_to_blob(created.id))
            .bind(uuid_to_blob(created.post_id))
            .bind(uuid_to_blob(created.user_id))
            .bind(&created.content)
            .bind(created.created_at)
            .execute(&self.pool)
            .await?;
        self.bus.emit(Table::Comments, ChangeKind::Insert, Some(serde_json::to_value(&created)?), None);
        Ok(created)
    }

    async fn delete_comment(&self, id: Uuid) -> anyhow::Result<()> {
        let post_id = sqlx::query("SELECT post_id FROM comments WHERE id = ?")
            .bind(uuid_to_blob(id))
            .fetch_optional(&self.pool)
            .await?
            .map(|row| req_uuid(&row, "post_id"))
            .transpose()?;

        sqlx::query("DELETE FROM comments WHERE id = ?")
            .bind(uuid_to_blob(id))
            .execute(&self.pool)
            .await?;

        if let Some(post_id) = post_id {
            self.bus.emit(
                Table::Comments,
                ChangeKind::Delete,
                None,
                Some(json!({ "id": id, "post_id": post_id })),
            );
        }
        Ok(())
    }

    async fn list_votes(&self, post_id: Uuid) -> anyhow::Result<Vec<Vote>> {
        sqlx::query("SELECT post_id, user_id, vote_type FROM votes WHERE post_id = ?")
            .bind(uuid_to_blob(post_id))
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(vote_from_row)
            .collect()
    }

    async fn get_vote(&self, post_id: Uuid, user_id: Uuid) -> anyhow::Result<Option<Vote>> {
        sqlx::query("SELECT post_id, user_id, vote_type FROM votes WHERE post_id = ? AND user_id = ?")
            .bind(uuid_to_blob(post_id))
            .bind(uuid_to_blob(user_id))
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(vote_from_row)
            .transpose()
    }

    /// Fails if the user already voted on the post.
    async fn insert_vote(&self, vote: Vote) -> anyhow::Result<()> {
        sqlx::query("INSERT INTO votes (post_id, user_id, vote_type) VALUES (?, ?, ?)")
            .bind(uuid_to_blob(vote.post_id))
            .bind(uuid_to_blob(vote.user_id))
            .bind(vote.vote_type.as_str())
            .execute(&self.pool)
            .await?;
        self.bus.emit(Table::Votes, ChangeKind::Insert, Some(serde_json::to_value(&vote)?), None);
        Ok(())
    }

    async fn update_vote(&self, vote: Vote) -> anyhow::Result<()> {
        let done = sqlx::query("UPDATE votes SET vote_type = ? WHERE post_id = ? AND user_id = ?")
            .bind(vote.vote_type.as_str())
            .bind(uuid_to_blob(vote.post_id))
            .bind(uuid_to_blob(vote.user_id))
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 {
            bail!("no vote by {} on post {}", vote.user_id, vote.post_id);
        }
        self.bus.emit(Table::Votes, ChangeKind::Update, Some(serde_json::to_value(&vote)?), None);
        Ok(())
    }

    async fn delete_vote(&self, post_id: Uuid, user_id: Uuid) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM votes WHERE post_id = ? AND user_id = ?")
            .bind(uuid_to_blob(post_id))
            .bind(uuid_to_blob(user_id))
            .execute(&self.pool)
            .await?;
        self.bus.emit(
            Table::Votes,
            ChangeKind::Delete,
            None,
            Some(json!({ "post_id": post_id, "user_id": user_id })),
        );
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for SqliteForumStore {
    async fn save_credential(&self, credential: Credential) -> anyhow::Result<()> {
        sqlx::query("INSERT INTO credentials (user_id, email, password_hash) VALUES (?, ?, ?)")
            .bind(uuid_to_blob(credential.user_id))
            .bind(credential.email.to_lowercase())
            .bind(credential.password_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_credential(&self, email: &str) -> anyhow::Result<Option<Credential>> {
        let row = sqlx::query("SELECT user_id, email, password_hash FROM credentials WHERE email = ?")
            .bind(email.to_lowercase())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(Credential {
                user_id: req_uuid(&row, "user_id")?,
                email: row.try_get("email")?,
                password_hash: row.try_get("password_hash")?,
            })),
            None => Ok(None),
        }
    }
}
