//! Expertise profile persistence
//!
//! Profiles survive restarts: they are loaded at startup and written
//! through on every consensus merge. The engine runs fully in-memory when
//! constructed without a pool (tests, embedded use).

use std::collections::HashMap;
use std::path::Path;

use corvee_common::UserId;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;

/// Open (creating if missing) the SQLite database and ensure the schema
pub async fn connect(path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    init_schema(&pool).await?;
    Ok(pool)
}

/// In-memory database for tests and ephemeral runs
///
/// Pinned to a single connection: each SQLite in-memory connection is its
/// own database.
pub async fn connect_in_memory() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    init_schema(&pool).await?;
    Ok(pool)
}

/// Create tables if they do not exist
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS expertise (
            user_id TEXT NOT NULL,
            category TEXT NOT NULL,
            score REAL NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (user_id, category)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Load all persisted expertise profiles
pub async fn load_profiles(pool: &SqlitePool) -> Result<HashMap<UserId, HashMap<String, f64>>> {
    let rows: Vec<(String, String, f64)> =
        sqlx::query_as("SELECT user_id, category, score FROM expertise")
            .fetch_all(pool)
            .await?;

    let mut profiles: HashMap<UserId, HashMap<String, f64>> = HashMap::new();
    for (user, category, score) in rows {
        let Ok(user_id) = Uuid::parse_str(&user) else {
            warn!(%user, "skipping expertise row with malformed user id");
            continue;
        };
        profiles.entry(user_id).or_default().insert(category, score);
    }
    Ok(profiles)
}

/// Upsert one user's category scores
pub async fn upsert_scores(
    pool: &SqlitePool,
    user: UserId,
    scores: &HashMap<String, f64>,
) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    for (category, score) in scores {
        sqlx::query(
            r#"
            INSERT INTO expertise (user_id, category, score, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (user_id, category)
            DO UPDATE SET score = excluded.score, updated_at = excluded.updated_at
            "#,
        )
        .bind(user.to_string())
        .bind(category)
        .bind(score)
        .bind(&now)
        .execute(pool)
        .await?;
    }
    Ok(())
}
