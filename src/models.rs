//! Core data models used throughout phabsync.
//!
//! [`RemoteObject`]s are rebuilt from the Conduit API on every pass and never
//! cached; [`ExportDocument`]s are what the sinks receive.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Query parameters sent to a Conduit method.
///
/// Ordered so that request bodies are stable, which keeps logs and test
/// expectations deterministic.
pub type Query = BTreeMap<String, String>;

/// Title given to comment documents, which carry no name of their own.
pub const COMMENT_TITLE: &str = "Comment";

/// Value for export fields this synchronizer does not populate.
pub const UNSET_FIELD: &str = "@@@";

/// Kind of a [`RemoteObject`], carrying the fields only some kinds have.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectKind {
    /// A Maniphest task.
    Task { name: String },
    /// A Phriction wiki page revision.
    Wiki { name: String },
    /// A comment attached to a task or wiki page.
    Comment,
}

/// An entity pulled from the remote API.
///
/// `phid` is the durable identity; `id` is the display identifier and may
/// differ between revisions of the same entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub id: String,
    pub phid: String,
    pub author_phid: String,
    /// Last modification time, unix seconds.
    pub timestamp: i64,
    pub contents: String,
    pub kind: ObjectKind,
}

impl RemoteObject {
    /// Display title: the entity name, or [`COMMENT_TITLE`] for comments.
    pub fn title(&self) -> &str {
        match &self.kind {
            ObjectKind::Task { name } | ObjectKind::Wiki { name } => name,
            ObjectKind::Comment => COMMENT_TITLE,
        }
    }
}

/// Paging cursor returned with every page.
///
/// For any given endpoint at most one of the two tokens is meaningful.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Cursor {
    #[serde(default, deserialize_with = "optional_token")]
    pub before: Option<String>,
    #[serde(default, deserialize_with = "optional_token")]
    pub after: Option<String>,
}

/// One page of a Conduit `*.search` result.
#[derive(Debug, Clone, Deserialize)]
pub struct Page {
    pub data: Vec<serde_json::Value>,
    pub cursor: Cursor,
}

/// Document kind understood by the downstream index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Comment,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Comment => "comment",
        }
    }
}

/// Record handed to a [`DocumentSink`](crate::dispatch::DocumentSink).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportDocument {
    pub id: String,
    pub phid: String,
    pub data_source_id: String,
    #[serde(rename = "type")]
    pub doc_type: DocumentType,
    pub title: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub author: String,
    pub author_image_url: String,
    pub location: String,
    pub url: String,
}

impl ExportDocument {
    /// Build the export record for `object`, owned by `data_source_id`.
    ///
    /// Fails only if the object's timestamp is outside chrono's range.
    pub fn from_object(object: &RemoteObject, data_source_id: &str) -> Result<Self> {
        let timestamp = DateTime::from_timestamp(object.timestamp, 0).ok_or_else(|| {
            anyhow!(
                "timestamp {} of {} is out of range",
                object.timestamp,
                object.phid
            )
        })?;

        Ok(Self {
            id: object.id.clone(),
            phid: object.phid.clone(),
            data_source_id: data_source_id.to_string(),
            doc_type: DocumentType::Comment,
            title: object.title().to_string(),
            content: object.contents.clone(),
            timestamp,
            author: object.author_phid.clone(),
            author_image_url: UNSET_FIELD.to_string(),
            location: UNSET_FIELD.to_string(),
            url: UNSET_FIELD.to_string(),
        })
    }
}

/// Conduit renders ids and cursor tokens as either JSON strings or numbers.
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Str(String),
    Int(i64),
}

impl From<Scalar> for String {
    fn from(value: Scalar) -> Self {
        match value {
            Scalar::Str(s) => s,
            Scalar::Int(n) => n.to_string(),
        }
    }
}

pub(crate) fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Scalar::deserialize(deserializer).map(String::from)
}

fn optional_token<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Scalar>::deserialize(deserializer)?.map(String::from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(kind: ObjectKind) -> RemoteObject {
        RemoteObject {
            id: "7".to_string(),
            phid: "PHID-TASK-aaaa".to_string(),
            author_phid: "PHID-USER-bbbb".to_string(),
            timestamp: 1_700_000_000,
            contents: "body".to_string(),
            kind,
        }
    }

    #[test]
    fn title_follows_kind() {
        let task = object(ObjectKind::Task {
            name: "Fix login".to_string(),
        });
        assert_eq!(task.title(), "Fix login");
        assert_eq!(object(ObjectKind::Comment).title(), COMMENT_TITLE);
    }

    #[test]
    fn cursor_accepts_numeric_and_null_tokens() {
        let cursor: Cursor = serde_json::from_value(json!({
            "limit": 100,
            "after": 42,
            "before": null,
            "order": null
        }))
        .unwrap();
        assert_eq!(cursor.after.as_deref(), Some("42"));
        assert_eq!(cursor.before, None);

        let empty: Cursor = serde_json::from_value(json!({})).unwrap();
        assert_eq!(empty, Cursor::default());
    }

    #[test]
    fn page_requires_data_and_cursor() {
        assert!(serde_json::from_value::<Page>(json!({ "data": [] })).is_err());
        assert!(serde_json::from_value::<Page>(json!({ "cursor": {} })).is_err());
    }

    #[test]
    fn export_document_fills_placeholders() {
        let doc = ExportDocument::from_object(&object(ObjectKind::Comment), "phab").unwrap();
        assert_eq!(doc.title, COMMENT_TITLE);
        assert_eq!(doc.data_source_id, "phab");
        assert_eq!(doc.timestamp.timestamp(), 1_700_000_000);
        assert_eq!(doc.url, UNSET_FIELD);
        assert_eq!(doc.location, UNSET_FIELD);
        assert_eq!(doc.author_image_url, UNSET_FIELD);

        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["type"], "comment");
    }

    #[test]
    fn export_document_rejects_out_of_range_timestamp() {
        let mut bad = object(ObjectKind::Comment);
        bad.timestamp = i64::MAX;
        assert!(ExportDocument::from_object(&bad, "phab").is_err());
    }
}
