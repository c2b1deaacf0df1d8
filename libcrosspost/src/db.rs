//! Durable job store for scheduled posts

use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqliteRow};
use sqlx::Row;

use crate::error::{DbError, Result};
use crate::types::{PlatformName, PostStatus, ScheduledPost};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the store and run migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        // Expand path and create parent directories
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // Forward slashes work on both Windows and Unix; mode=rwc creates the file
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));
        let options = SqliteConnectOptions::from_str(&db_url)
            .map_err(DbError::SqlxError)?
            // the daemon and the CLI tools share one file
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    /// Insert or update a post
    ///
    /// A row that is already terminal on disk, or claimed by a scheduler that
    /// is publishing it, is never overwritten. Returns `false` in that case so
    /// the caller can adopt the stored state. The claim itself is only written
    /// by [`Database::claim_post`] and [`Database::finish_post`].
    pub async fn save_post(&self, post: &ScheduledPost) -> Result<bool> {
        let platforms = serde_json::to_string(&post.platforms).map_err(|e| DbError::CorruptRow {
            id: post.id.clone(),
            reason: e.to_string(),
        })?;

        let result = sqlx::query(
            r#"
            INSERT INTO scheduled_posts
                (id, image_ref, caption, platforms, scheduled_time, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                caption = excluded.caption,
                scheduled_time = excluded.scheduled_time,
                status = excluded.status
            WHERE scheduled_posts.status = 'pending'
              AND scheduled_posts.claimed_at IS NULL
            "#,
        )
        .bind(&post.id)
        .bind(&post.image_ref)
        .bind(&post.caption)
        .bind(platforms)
        .bind(format_time(&post.scheduled_time))
        .bind(post.status.as_str())
        .bind(format_time(&post.created_at))
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    /// Mark a pending post as being published
    ///
    /// Succeeds for exactly one caller across every process sharing the store;
    /// `false` means the row is gone, no longer pending or already claimed.
    pub async fn claim_post(&self, post_id: &str, claimed_at: &DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_posts SET claimed_at = ?
            WHERE id = ? AND status = 'pending' AND claimed_at IS NULL
            "#,
        )
        .bind(format_time(claimed_at))
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Write the final status of a claimed post and release the claim
    pub async fn finish_post(&self, post_id: &str, status: PostStatus) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_posts SET status = ?, claimed_at = NULL
            WHERE id = ? AND status = 'pending' AND claimed_at IS NOT NULL
            "#,
        )
        .bind(status.as_str())
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Get a post by ID
    pub async fn get_post(&self, post_id: &str) -> Result<Option<ScheduledPost>> {
        let row = sqlx::query(
            r#"
            SELECT id, image_ref, caption, platforms, scheduled_time, status, created_at,
                   claimed_at
            FROM scheduled_posts WHERE id = ?
            "#,
        )
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.map(|r| post_from_row(&r)).transpose()
    }

    /// Every post in insertion order
    ///
    /// Rows that fail to decode are logged and skipped.
    pub async fn load_posts(&self) -> Result<Vec<ScheduledPost>> {
        let rows = sqlx::query(
            r#"
            SELECT id, image_ref, caption, platforms, scheduled_time, status, created_at,
                   claimed_at
            FROM scheduled_posts ORDER BY rowid
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        let mut posts = Vec::with_capacity(rows.len());
        for row in rows {
            match post_from_row(&row) {
                Ok(post) => posts.push(post),
                Err(e) => tracing::warn!("Skipping unreadable scheduled post: {}", e),
            }
        }
        Ok(posts)
    }
}

fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn post_from_row(row: &SqliteRow) -> Result<ScheduledPost> {
    let id: String = row.get("id");
    let corrupt = |reason: String| DbError::CorruptRow {
        id: id.clone(),
        reason,
    };

    let platforms: BTreeSet<PlatformName> =
        serde_json::from_str(row.get::<&str, _>("platforms"))
            .map_err(|e| corrupt(format!("platforms: {}", e)))?;
    let parse_time = |column: &str| {
        DateTime::parse_from_rfc3339(row.get::<&str, _>(column))
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| corrupt(format!("{}: {}", column, e)))
    };
    let scheduled_time = parse_time("scheduled_time")?;
    let created_at = parse_time("created_at")?;
    let status = PostStatus::from_str(row.get::<&str, _>("status"))
        .map_err(|e| corrupt(e.to_string()))?;
    let claimed_at = match row.get::<Option<&str>, _>("claimed_at") {
        Some(_) => Some(parse_time("claimed_at")?),
        None => None,
    };

    Ok(ScheduledPost {
        id: id.clone(),
        image_ref: row.get("image_ref"),
        caption: row.get("caption"),
        platforms,
        scheduled_time,
        status,
        created_at,
        claimed_at,
    })
}
