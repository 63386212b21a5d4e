//! Page parsers for the three synchronized entity types.
//!
//! | Parser | Endpoint | Incremental filtering |
//! |--------|----------|-----------------------|
//! | [`TaskParser`] | `maniphest.search` | server side (`constraints[modifiedStart]`) |
//! | [`WikiParser`] | `phriction.content.search` | client side, plus one record per `phid` |
//! | [`CommentParser`] | `transaction.search` | client side, `comment` transactions only |

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;

use crate::conduit::{PHRICTION_SEARCH, TASK_SEARCH, TRANSACTION_SEARCH};
use crate::error::ConduitError;
use crate::models::{string_or_number, ObjectKind, Page, RemoteObject};
use crate::paginate::PageParser;

/// Transaction type carrying a user comment.
pub const COMMENT_TRANSACTION: &str = "comment";

#[derive(Deserialize)]
struct RawText {
    raw: String,
}

#[derive(Deserialize)]
struct TaskRow {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    phid: String,
    fields: TaskFields,
}

#[derive(Deserialize)]
struct TaskFields {
    name: String,
    description: RawText,
    #[serde(rename = "dateModified")]
    date_modified: i64,
    #[serde(rename = "authorPHID")]
    author_phid: String,
}

#[derive(Deserialize)]
struct WikiRow {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    phid: String,
    fields: WikiFields,
    attachments: WikiAttachments,
}

#[derive(Deserialize)]
struct WikiFields {
    #[serde(rename = "dateModified")]
    date_modified: i64,
}

#[derive(Deserialize)]
struct WikiAttachments {
    content: WikiContent,
}

#[derive(Deserialize)]
struct WikiContent {
    title: String,
    #[serde(rename = "authorPHID")]
    author_phid: String,
    content: RawText,
}

#[derive(Deserialize)]
struct TransactionRow {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    comments: Vec<CommentRow>,
}

#[derive(Deserialize)]
struct CommentRow {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    phid: String,
    #[serde(rename = "authorPHID")]
    author_phid: String,
    #[serde(rename = "dateModified")]
    date_modified: i64,
    content: RawText,
}

fn decode_rows<T: DeserializeOwned>(endpoint: &str, page: &Page) -> Result<Vec<T>, ConduitError> {
    page.data
        .iter()
        .map(|row| T::deserialize(row).map_err(|e| ConduitError::malformed(endpoint, e)))
        .collect()
}

/// Maps every task row to a record; the query already excludes stale tasks.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskParser;

impl PageParser for TaskParser {
    type Record = RemoteObject;

    fn parse(&self, page: &Page) -> Result<Vec<RemoteObject>, ConduitError> {
        Ok(decode_rows::<TaskRow>(TASK_SEARCH, page)?
            .into_iter()
            .map(|task| RemoteObject {
                id: task.id,
                phid: task.phid,
                author_phid: task.fields.author_phid,
                timestamp: task.fields.date_modified,
                contents: task.fields.description.raw,
                kind: ObjectKind::Task {
                    name: task.fields.name,
                },
            })
            .collect())
    }
}

/// Keeps wiki revisions modified at or after the watermark, one per `phid`.
#[derive(Debug, Clone, Copy)]
pub struct WikiParser {
    pub watermark: i64,
}

impl WikiParser {
    pub fn new(watermark: i64) -> Self {
        Self { watermark }
    }
}

impl PageParser for WikiParser {
    type Record = RemoteObject;

    fn parse(&self, page: &Page) -> Result<Vec<RemoteObject>, ConduitError> {
        Ok(decode_rows::<WikiRow>(PHRICTION_SEARCH, page)?
            .into_iter()
            .filter(|wiki| wiki.fields.date_modified >= self.watermark)
            .map(|wiki| RemoteObject {
                id: wiki.id,
                phid: wiki.phid,
                author_phid: wiki.attachments.content.author_phid,
                timestamp: wiki.fields.date_modified,
                contents: wiki.attachments.content.content.raw,
                kind: ObjectKind::Wiki {
                    name: wiki.attachments.content.title,
                },
            })
            .collect())
    }

    /// Collapse records sharing a `phid`.
    ///
    /// Each `phid` keeps the slot of its first sighting and the value of its
    /// last one. Rows arrive newest first, so a later sighting is an older
    /// revision: the retained revision depends on traversal order, not on
    /// `timestamp`.
    fn reconcile(&self, records: Vec<RemoteObject>) -> Vec<RemoteObject> {
        let mut slots: HashMap<String, usize> = HashMap::with_capacity(records.len());
        let mut kept: Vec<RemoteObject> = Vec::with_capacity(records.len());
        for record in records {
            match slots.get(&record.phid) {
                Some(&slot) => kept[slot] = record,
                None => {
                    slots.insert(record.phid.clone(), kept.len());
                    kept.push(record);
                }
            }
        }
        kept
    }
}

/// Extracts comments at or after the watermark from a transaction page.
#[derive(Debug, Clone, Copy)]
pub struct CommentParser {
    pub watermark: i64,
}

impl CommentParser {
    pub fn new(watermark: i64) -> Self {
        Self { watermark }
    }
}

impl PageParser for CommentParser {
    type Record = RemoteObject;

    fn parse(&self, page: &Page) -> Result<Vec<RemoteObject>, ConduitError> {
        let mut comments = Vec::new();
        for transaction in decode_rows::<TransactionRow>(TRANSACTION_SEARCH, page)? {
            if transaction.kind.as_deref() != Some(COMMENT_TRANSACTION) {
                continue;
            }
            let comment = transaction.comments.into_iter().next().ok_or_else(|| {
                ConduitError::malformed(TRANSACTION_SEARCH, "comment transaction without comments")
            })?;
            if comment.date_modified < self.watermark {
                continue;
            }
            comments.push(RemoteObject {
                id: comment.id,
                phid: comment.phid,
                author_phid: comment.author_phid,
                timestamp: comment.date_modified,
                contents: comment.content.raw,
                kind: ObjectKind::Comment,
            });
        }
        Ok(comments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Cursor;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    fn page(rows: Vec<Value>) -> Page {
        Page {
            data: rows,
            cursor: Cursor::default(),
        }
    }

    fn wiki_row(id: u64, phid: &str, modified: i64, title: &str) -> Value {
        json!({
            "id": id,
            "phid": phid,
            "fields": { "dateModified": modified },
            "attachments": {
                "content": {
                    "title": title,
                    "authorPHID": "PHID-USER-wiki",
                    "content": { "raw": format!("{} body", title) }
                }
            }
        })
    }

    fn transaction(kind: Option<&str>, comment_id: u64, modified: i64) -> Value {
        json!({
            "id": comment_id * 10,
            "phid": format!("PHID-XACT-{}", comment_id),
            "type": kind,
            "comments": [{
                "id": comment_id,
                "phid": format!("PHID-XCMT-{}", comment_id),
                "authorPHID": "PHID-USER-c",
                "dateModified": modified,
                "content": { "raw": format!("comment {}", comment_id) }
            }]
        })
    }

    #[test]
    fn task_parser_maps_every_row() {
        let parsed = TaskParser
            .parse(&page(vec![json!({
                "id": 12,
                "phid": "PHID-TASK-1",
                "fields": {
                    "name": "Broken build",
                    "description": { "raw": "CI is red" },
                    "dateModified": 5,
                    "authorPHID": "PHID-USER-a"
                }
            })]))
            .unwrap();

        assert_eq!(
            parsed,
            vec![RemoteObject {
                id: "12".to_string(),
                phid: "PHID-TASK-1".to_string(),
                author_phid: "PHID-USER-a".to_string(),
                timestamp: 5,
                contents: "CI is red".to_string(),
                kind: ObjectKind::Task {
                    name: "Broken build".to_string()
                },
            }]
        );
    }

    #[test]
    fn task_parser_rejects_missing_fields() {
        let err = TaskParser
            .parse(&page(vec![json!({ "id": 1, "phid": "PHID-TASK-1" })]))
            .unwrap_err();
        assert!(matches!(err, ConduitError::Malformed { ref endpoint, .. } if endpoint == TASK_SEARCH));
    }

    #[test]
    fn wiki_parser_filters_by_watermark() {
        let parsed = WikiParser::new(100)
            .parse(&page(vec![
                wiki_row(1, "PHID-WIKI-a", 99, "stale"),
                wiki_row(2, "PHID-WIKI-b", 100, "boundary"),
                wiki_row(3, "PHID-WIKI-c", 150, "fresh"),
            ]))
            .unwrap();
        let titles: Vec<&str> = parsed.iter().map(RemoteObject::title).collect();
        assert_eq!(titles, vec!["boundary", "fresh"]);
        assert_eq!(parsed[0].author_phid, "PHID-USER-wiki");
        assert_eq!(parsed[0].contents, "boundary body");
    }

    #[test]
    fn wiki_reconcile_keeps_first_slot_and_last_value() {
        let parser = WikiParser::new(0);
        let mut records = parser
            .parse(&page(vec![
                wiki_row(30, "PHID-WIKI-a", 300, "a newest"),
                wiki_row(20, "PHID-WIKI-b", 200, "b"),
            ]))
            .unwrap();
        records.extend(
            parser
                .parse(&page(vec![wiki_row(10, "PHID-WIKI-a", 100, "a oldest")]))
                .unwrap(),
        );

        let kept = parser.reconcile(records);
        let summary: Vec<(&str, &str, i64)> = kept
            .iter()
            .map(|r| (r.phid.as_str(), r.id.as_str(), r.timestamp))
            .collect();
        // The later (older) revision of PHID-WIKI-a replaces the newer one
        // but stays ahead of PHID-WIKI-b.
        assert_eq!(
            summary,
            vec![("PHID-WIKI-a", "10", 100), ("PHID-WIKI-b", "20", 200)]
        );
    }

    #[test]
    fn wiki_reconcile_within_one_page() {
        let parser = WikiParser::new(0);
        let records = parser
            .parse(&page(vec![
                wiki_row(2, "PHID-WIKI-a", 20, "second revision"),
                wiki_row(1, "PHID-WIKI-a", 10, "first revision"),
            ]))
            .unwrap();
        let kept = parser.reconcile(records);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].title(), "first revision");
    }

    #[test]
    fn comment_parser_keeps_only_comments_at_or_after_watermark() {
        let parsed = CommentParser::new(100)
            .parse(&page(vec![
                transaction(Some("comment"), 1, 100),
                transaction(Some("comment"), 2, 99),
                transaction(Some("status"), 3, 500),
                transaction(None, 4, 500),
                transaction(Some("comment"), 5, 101),
            ]))
            .unwrap();
        let ids: Vec<&str> = parsed.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "5"]);
        assert!(parsed.iter().all(|c| c.kind == ObjectKind::Comment));
        assert_eq!(parsed[0].phid, "PHID-XCMT-1");
        assert_eq!(parsed[0].contents, "comment 1");
    }

    #[test]
    fn comment_parser_uses_first_comment_of_transaction() {
        let mut row = transaction(Some("comment"), 1, 10);
        row["comments"].as_array_mut().unwrap().push(json!({
            "id": 2,
            "phid": "PHID-XCMT-2",
            "authorPHID": "PHID-USER-c",
            "dateModified": 10,
            "content": { "raw": "edit history" }
        }));
        let parsed = CommentParser::new(0).parse(&page(vec![row])).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].id, "1");
    }

    #[test]
    fn comment_transaction_without_comments_is_malformed() {
        let row = json!({ "id": 1, "phid": "PHID-XACT-1", "type": "comment", "comments": [] });
        let err = CommentParser::new(0).parse(&page(vec![row])).unwrap_err();
        assert!(matches!(err, ConduitError::Malformed { .. }));
    }

    #[test]
    fn non_comment_transactions_need_no_comment_payload() {
        let row = json!({ "id": 1, "phid": "PHID-XACT-1", "type": "status" });
        assert!(CommentParser::new(0).parse(&page(vec![row])).unwrap().is_empty());
    }
}
