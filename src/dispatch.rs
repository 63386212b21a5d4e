//! Batched delivery of synchronized objects to a sink.

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

use crate::models::{ExportDocument, RemoteObject};

/// Number of documents handed to a sink per `feed` call.
pub const FEED_BATCH_SIZE: usize = 512;

/// Downstream consumer of export documents.
///
/// The sink owns durability. A failed `feed` aborts the pass; documents
/// from earlier batches stay delivered.
#[async_trait]
pub trait DocumentSink: Send {
    /// Short label used in log lines.
    fn name(&self) -> &str;

    async fn feed(&mut self, docs: Vec<ExportDocument>) -> Result<()>;
}

/// Convert `objects` to export documents and feed them in batches.
///
/// A batch is flushed as soon as it holds `batch_size` documents; whatever
/// remains at the end goes out as a final, smaller batch. Empty batches are
/// never fed. Returns the number of documents delivered.
pub async fn dispatch_documents<I>(
    objects: I,
    data_source_id: &str,
    sink: &mut dyn DocumentSink,
    batch_size: usize,
) -> Result<usize>
where
    I: IntoIterator<Item = RemoteObject>,
{
    let batch_size = batch_size.max(1);
    let mut batch: Vec<ExportDocument> = Vec::with_capacity(batch_size);
    let mut total_fed = 0usize;

    for object in objects {
        batch.push(ExportDocument::from_object(&object, data_source_id)?);
        if batch.len() >= batch_size {
            total_fed += batch.len();
            let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
            debug!(sink = sink.name(), documents = full.len(), "feeding batch");
            sink.feed(full).await?;
        }
    }

    if !batch.is_empty() {
        total_fed += batch.len();
        debug!(sink = sink.name(), documents = batch.len(), "feeding final batch");
        sink.feed(batch).await?;
    }

    if total_fed > 0 {
        info!(sink = sink.name(), total_fed, "fed documents");
    }
    Ok(total_fed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ObjectKind;

    #[derive(Default)]
    struct Recorder {
        batches: Vec<Vec<ExportDocument>>,
    }

    #[async_trait]
    impl DocumentSink for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn feed(&mut self, docs: Vec<ExportDocument>) -> Result<()> {
            self.batches.push(docs);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl DocumentSink for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn feed(&mut self, _docs: Vec<ExportDocument>) -> Result<()> {
            anyhow::bail!("index queue unavailable")
        }
    }

    fn comments(n: usize) -> Vec<RemoteObject> {
        (0..n)
            .map(|i| RemoteObject {
                id: i.to_string(),
                phid: format!("PHID-XCMT-{}", i),
                author_phid: "PHID-USER-a".to_string(),
                timestamp: 1_000 + i as i64,
                contents: format!("comment {}", i),
                kind: ObjectKind::Comment,
            })
            .collect()
    }

    fn sizes(recorder: &Recorder) -> Vec<usize> {
        recorder.batches.iter().map(Vec::len).collect()
    }

    #[tokio::test]
    async fn flushes_at_threshold_then_remainder() {
        let mut sink = Recorder::default();
        let fed = dispatch_documents(comments(1025), "phab", &mut sink, FEED_BATCH_SIZE)
            .await
            .unwrap();
        assert_eq!(fed, 1025);
        assert_eq!(sizes(&sink), vec![512, 512, 1]);
    }

    #[tokio::test]
    async fn exact_multiple_has_no_trailing_empty_batch() {
        let mut sink = Recorder::default();
        let fed = dispatch_documents(comments(1024), "phab", &mut sink, FEED_BATCH_SIZE)
            .await
            .unwrap();
        assert_eq!(fed, 1024);
        assert_eq!(sizes(&sink), vec![512, 512]);
    }

    #[tokio::test]
    async fn empty_stream_feeds_nothing() {
        let mut sink = Recorder::default();
        let fed = dispatch_documents(Vec::<RemoteObject>::new(), "phab", &mut sink, FEED_BATCH_SIZE)
            .await
            .unwrap();
        assert_eq!(fed, 0);
        assert!(sink.batches.is_empty());
    }

    #[tokio::test]
    async fn preserves_order_and_source() {
        let mut sink = Recorder::default();
        dispatch_documents(comments(5), "phab-prod", &mut sink, 2)
            .await
            .unwrap();
        assert_eq!(sizes(&sink), vec![2, 2, 1]);
        let ids: Vec<String> = sink.batches.concat().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["0", "1", "2", "3", "4"]);
        assert!(sink
            .batches
            .iter()
            .flatten()
            .all(|d| d.data_source_id == "phab-prod"));
    }

    #[tokio::test]
    async fn sink_failure_propagates() {
        let err = dispatch_documents(comments(3), "phab", &mut Failing, FEED_BATCH_SIZE)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("index queue"));
    }
}
