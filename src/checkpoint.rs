//! Watermark persistence.
//!
//! The watermark of a source is the unix-second instant at which its last
//! fully successful pass started. It lives in the `checkpoints` table and is
//! only written after a pass has delivered everything.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

/// Stored watermark for `source`, or `None` if it has never completed a pass.
///
/// A watermark that is not a unix-second integer is an error rather than a
/// silent fallback to a full resync.
pub async fn get_checkpoint(pool: &SqlitePool, source: &str) -> Result<Option<i64>> {
    let stored: Option<String> =
        sqlx::query_scalar("SELECT cursor FROM checkpoints WHERE source = ?")
            .bind(source)
            .fetch_optional(pool)
            .await?;

    stored
        .map(|raw| {
            raw.trim().parse::<i64>().with_context(|| {
                format!(
                    "Invalid watermark '{}' stored for {}; rerun with --full to reset it",
                    raw, source
                )
            })
        })
        .transpose()
}

/// Record `watermark` as the start of the last successful pass.
pub async fn set_checkpoint(pool: &SqlitePool, source: &str, watermark: i64) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO checkpoints (source, cursor, updated_at) VALUES (?, ?, ?)
        ON CONFLICT(source) DO UPDATE SET cursor = excluded.cursor, updated_at = excluded.updated_at
        "#,
    )
    .bind(source)
    .bind(watermark.to_string())
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}
