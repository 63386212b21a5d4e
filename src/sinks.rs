//! Concrete [`DocumentSink`]s.
//!
//! - [`JsonLinesSink`] writes one JSON object per document to any writer
//!   (stdout for `phabsync sync --sink jsonl`).
//! - [`SqliteSink`] upserts documents into the `documents` table, one
//!   transaction per batch.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::io::Write;
use uuid::Uuid;

use crate::dispatch::DocumentSink;
use crate::models::ExportDocument;

/// Writes each document as a JSON line.
pub struct JsonLinesSink<W> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W: Write + Send> DocumentSink for JsonLinesSink<W> {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn feed(&mut self, docs: Vec<ExportDocument>) -> Result<()> {
        for doc in &docs {
            serde_json::to_writer(&mut self.writer, doc)?;
            self.writer.write_all(b"\n")?;
        }
        self.writer.flush().context("Failed to flush JSON lines output")?;
        Ok(())
    }
}

/// Upserts documents into SQLite, keyed by `(source, phid)`.
pub struct SqliteSink {
    pool: SqlitePool,
}

impl SqliteSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentSink for SqliteSink {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn feed(&mut self, docs: Vec<ExportDocument>) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for doc in &docs {
            let existing_id: Option<String> =
                sqlx::query_scalar("SELECT id FROM documents WHERE source = ? AND source_id = ?")
                    .bind(&doc.data_source_id)
                    .bind(&doc.phid)
                    .fetch_optional(&mut *tx)
                    .await?;
            let row_id = existing_id.unwrap_or_else(|| Uuid::new_v4().to_string());

            sqlx::query(
                r#"
                INSERT INTO documents (id, source, source_id, display_id, doc_type, title, author, author_image_url, location, url, updated_at, body, dedup_hash)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(source, source_id) DO UPDATE SET
                    display_id = excluded.display_id,
                    doc_type = excluded.doc_type,
                    title = excluded.title,
                    author = excluded.author,
                    author_image_url = excluded.author_image_url,
                    location = excluded.location,
                    url = excluded.url,
                    updated_at = excluded.updated_at,
                    body = excluded.body,
                    dedup_hash = excluded.dedup_hash
                "#,
            )
            .bind(&row_id)
            .bind(&doc.data_source_id)
            .bind(&doc.phid)
            .bind(&doc.id)
            .bind(doc.doc_type.as_str())
            .bind(&doc.title)
            .bind(&doc.author)
            .bind(&doc.author_image_url)
            .bind(&doc.location)
            .bind(&doc.url)
            .bind(doc.timestamp.timestamp())
            .bind(&doc.content)
            .bind(dedup_hash(doc))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

fn dedup_hash(doc: &ExportDocument) -> String {
    let mut hasher = Sha256::new();
    hasher.update(doc.data_source_id.as_bytes());
    hasher.update(doc.phid.as_bytes());
    hasher.update(doc.timestamp.timestamp().to_le_bytes());
    hasher.update(doc.content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ObjectKind, RemoteObject};

    fn doc(id: &str, title: &str) -> ExportDocument {
        let object = RemoteObject {
            id: id.to_string(),
            phid: format!("PHID-TASK-{}", id),
            author_phid: "PHID-USER-a".to_string(),
            timestamp: 1_700_000_000,
            contents: "body".to_string(),
            kind: ObjectKind::Task {
                name: title.to_string(),
            },
        };
        ExportDocument::from_object(&object, "phab").unwrap()
    }

    #[tokio::test]
    async fn json_lines_writes_one_object_per_line() {
        let mut sink = JsonLinesSink::new(Vec::<u8>::new());
        sink.feed(vec![doc("1", "First"), doc("2", "Second")])
            .await
            .unwrap();
        sink.feed(vec![doc("3", "Third")]).await.unwrap();

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<serde_json::Value> = out
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["title"], "First");
        assert_eq!(lines[2]["id"], "3");
        assert_eq!(lines[1]["data_source_id"], "phab");
        assert_eq!(lines[1]["timestamp"], "2023-11-14T22:13:20Z");
    }

    #[test]
    fn dedup_hash_tracks_content() {
        let a = doc("1", "First");
        let mut b = a.clone();
        assert_eq!(dedup_hash(&a), dedup_hash(&b));
        b.content.push('!');
        assert_ne!(dedup_hash(&a), dedup_hash(&b));
    }
}
