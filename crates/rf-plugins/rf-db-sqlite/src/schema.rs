//! Table definitions and seed rows for the local backend.

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::uuid_to_blob;

pub(crate) const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS profiles (
        id          BLOB PRIMARY KEY,
        username    TEXT,
        role        TEXT NOT NULL DEFAULT 'user' CHECK (role IN ('user', 'admin')),
        badge       TEXT NOT NULL DEFAULT 'Initiate',
        created_at  TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS categories (
        id          BLOB PRIMARY KEY,
        name        TEXT NOT NULL UNIQUE,
        description TEXT
    )",
    "CREATE TABLE IF NOT EXISTS posts (
        id          BLOB PRIMARY KEY,
        title       TEXT NOT NULL,
        content     TEXT NOT NULL DEFAULT '',
        category_id BLOB REFERENCES categories(id),
        user_id     BLOB REFERENCES profiles(id) ON DELETE SET NULL,
        nsfw        INTEGER NOT NULL DEFAULT 0,
        anonymous   INTEGER NOT NULL DEFAULT 0,
        created_at  TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS posts_category_idx ON posts (category_id, created_at)",
    "CREATE TABLE IF NOT EXISTS comments (
        id          BLOB PRIMARY KEY,
        post_id     BLOB NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
        user_id     BLOB NOT NULL REFERENCES profiles(id),
        content     TEXT NOT NULL,
        created_at  TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS comments_post_idx ON comments (post_id, created_at)",
    "CREATE TABLE IF NOT EXISTS votes (
        post_id     BLOB NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
        user_id     BLOB NOT NULL REFERENCES profiles(id),
        vote_type   TEXT NOT NULL CHECK (vote_type IN ('up', 'down')),
        PRIMARY KEY (post_id, user_id)
    )",
    "CREATE TABLE IF NOT EXISTS credentials (
        user_id       BLOB PRIMARY KEY,
        email         TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL
    )",
];

pub const SEED_CATEGORIES: &[(&str, &str)] = &[
    ("CONFIDENCE", "Build mental fortitude and social dominance"),
    ("FITNESS", "Workouts, nutrition, and physique optimization"),
    ("STYLE", "Fashion, grooming, and appearance improvement"),
    ("MINDFULNESS", "Mental clarity, meditation, and focus"),
    ("TECH", "Gadgets, software, and tech trends"),
    ("HOBBIES", "Skills, interests, and leisure activities"),
    ("NEWS", "Current events and analysis"),
    ("OFF-TOPIC", "Random discussions"),
    ("PEPTIDES & SARMS", "Body optimization, hormones, supplements"),
    ("BONE STRUCTURE / FACE SHAPE", "Facial aesthetics, jawline, symmetry"),
    ("SELF-OPTIMIZATION", "Maximizing potential in all areas"),
    ("ANON DISCUSSIONS", "Completely anonymous posts"),
];

pub(crate) async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    for statement in SCHEMA.iter().copied() {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

/// Inserts any missing seed category; existing names are left alone.
pub(crate) async fn seed(pool: &SqlitePool) -> anyhow::Result<u64> {
    let mut inserted = 0;
    for (name, description) in SEED_CATEGORIES {
        inserted += sqlx::query("INSERT OR IGNORE INTO categories (id, name, description) VALUES (?, ?, ?)")
            .bind(uuid_to_blob(Uuid::now_v7()))
            .bind(*name)
            .bind(*description)
            .execute(pool)
            .await?
            .rows_affected();
    }
    Ok(inserted)
}
