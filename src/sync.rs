//! Incremental synchronization passes.
//!
//! A pass pulls every task and wiki page changed since the watermark, then
//! fans out to fetch the comments of each of those objects, and feeds the
//! merged stream to a sink:
//!
//! ```text
//! phriction.content.search ─┐
//! maniphest.search ─────────┼─▶ tasks ++ wikis ─▶ transaction.search × N ─▶ dispatch ─▶ sink
//!                           │        (one comment traversal per object)
//! ```
//!
//! Output order is fixed: all tasks, then all wiki pages, then comments
//! grouped by owning object in that same order. Everything runs
//! sequentially; the first failure aborts the pass.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::info;

use crate::checkpoint::{get_checkpoint, set_checkpoint};
use crate::conduit::{Conduit, ConduitClient, Endpoint, PHRICTION_SEARCH, TASK_SEARCH, TRANSACTION_SEARCH};
use crate::config::{Config, SinkKind};
use crate::db;
use crate::dispatch::{dispatch_documents, DocumentSink};
use crate::error::ConduitError;
use crate::migrate;
use crate::models::{ObjectKind, Query, RemoteObject};
use crate::paginate::fetch_all;
use crate::parsers::{CommentParser, TaskParser, WikiParser};
use crate::sinks::{JsonLinesSink, SqliteSink};

/// Collects the records of one pass from a [`Conduit`].
pub struct Synchronizer<'a> {
    conduit: &'a dyn Conduit,
}

impl<'a> Synchronizer<'a> {
    pub fn new(conduit: &'a dyn Conduit) -> Self {
        Self { conduit }
    }

    /// Tasks modified since `watermark`, filtered by the server.
    pub async fn fetch_tasks(&self, watermark: i64) -> Result<Vec<RemoteObject>, ConduitError> {
        let mut query = Query::new();
        query.insert("queryKey".to_string(), "all".to_string());
        query.insert("constraints[modifiedStart]".to_string(), watermark.to_string());
        fetch_all(&Endpoint::new(self.conduit, TASK_SEARCH), &TaskParser, query).await
    }

    /// Wiki pages modified since `watermark`, one record per `phid`.
    pub async fn fetch_wikis(&self, watermark: i64) -> Result<Vec<RemoteObject>, ConduitError> {
        let mut query = Query::new();
        query.insert("queryKey".to_string(), "all".to_string());
        query.insert("attachments[content]".to_string(), "1".to_string());
        query.insert("order".to_string(), "newest".to_string());
        fetch_all(
            &Endpoint::new(self.conduit, PHRICTION_SEARCH),
            &WikiParser::new(watermark),
            query,
        )
        .await
    }

    /// Comments on `parent` modified since `watermark`.
    pub async fn fetch_comments(
        &self,
        parent: &RemoteObject,
        watermark: i64,
    ) -> Result<Vec<RemoteObject>, ConduitError> {
        let mut query = Query::new();
        query.insert("objectIdentifier".to_string(), parent.phid.clone());
        fetch_all(
            &Endpoint::new(self.conduit, TRANSACTION_SEARCH),
            &CommentParser::new(watermark),
            query,
        )
        .await
    }

    /// Tasks followed by wiki pages.
    ///
    /// Wikis are requested first; the returned order is still tasks first.
    pub async fn fetch_objects(&self, watermark: i64) -> Result<Vec<RemoteObject>, ConduitError> {
        let wikis = self.fetch_wikis(watermark).await?;
        let mut objects = self.fetch_tasks(watermark).await?;
        info!(tasks = objects.len(), wikis = wikis.len(), "fetched objects");
        objects.extend(wikis);
        Ok(objects)
    }

    /// Every record of one pass: objects, then their comments grouped by owner.
    pub async fn collect(&self, watermark: i64) -> Result<Vec<RemoteObject>, ConduitError> {
        let mut records = self.fetch_objects(watermark).await?;
        let parents = records.len();

        let mut comments = Vec::new();
        for parent in &records {
            comments.extend(self.fetch_comments(parent, watermark).await?);
        }
        info!(parents, comments = comments.len(), "fetched comments");

        records.extend(comments);
        Ok(records)
    }
}

/// Counts from one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub tasks: usize,
    pub wikis: usize,
    pub comments: usize,
    pub fed: usize,
}

impl PassSummary {
    pub fn fetched(&self) -> usize {
        self.tasks + self.wikis + self.comments
    }

    fn count(records: &[RemoteObject]) -> Self {
        records.iter().fold(Self::default(), |mut acc, r| {
            match r.kind {
                ObjectKind::Task { .. } => acc.tasks += 1,
                ObjectKind::Wiki { .. } => acc.wikis += 1,
                ObjectKind::Comment => acc.comments += 1,
            }
            acc
        })
    }
}

/// Run one incremental pass against `conduit`, feeding `sink`.
///
/// Nothing is persisted here; recording the new watermark is up to the
/// caller once this returns `Ok`.
pub async fn run_pass(
    conduit: &dyn Conduit,
    sink: &mut dyn DocumentSink,
    data_source_id: &str,
    watermark: i64,
    batch_size: usize,
) -> Result<PassSummary> {
    let records = Synchronizer::new(conduit).collect(watermark).await?;
    let mut summary = PassSummary::count(&records);
    summary.fed = dispatch_documents(records, data_source_id, sink, batch_size).await?;
    Ok(summary)
}

/// Options for [`run_sync`], mirroring `phabsync sync` flags.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Ignore the stored watermark.
    pub full: bool,
    /// Override the watermark with midnight UTC of this date (YYYY-MM-DD).
    pub since: Option<String>,
    /// Fetch and count without feeding a sink or advancing the watermark.
    pub dry_run: bool,
    /// Override `sync.sink` from the configuration.
    pub sink: Option<SinkKind>,
}

/// Result of [`run_sync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub summary: PassSummary,
    /// Watermark the pass filtered with.
    pub watermark: i64,
    /// Watermark recorded for the next pass, `None` for dry runs.
    pub next_watermark: Option<i64>,
}

/// Resolve the watermark for a pass.
///
/// `--since` wins over `--full`, which wins over the stored checkpoint.
/// No checkpoint means a full sync from the epoch.
pub fn resolve_watermark(opts: &SyncOptions, stored: Option<i64>) -> Result<i64> {
    if let Some(ref since_str) = opts.since {
        let since_date = NaiveDate::parse_from_str(since_str, "%Y-%m-%d")
            .with_context(|| format!("Invalid --since date '{}', expected YYYY-MM-DD", since_str))?;
        return Ok(since_date.and_time(chrono::NaiveTime::MIN).and_utc().timestamp());
    }
    if opts.full {
        return Ok(0);
    }
    Ok(stored.unwrap_or(0))
}

/// Run one pass for the configured server and record the new watermark.
pub async fn run_sync(config: &Config, opts: &SyncOptions) -> Result<SyncReport> {
    let client = ConduitClient::new(&config.phabricator)?;
    let source = config.sync.source_id.as_str();

    let pool = db::connect(config).await?;
    migrate::apply_schema(&pool).await?;

    // An explicit starting point never consults the stored watermark.
    let stored = if opts.full || opts.since.is_some() {
        None
    } else {
        get_checkpoint(&pool, source).await?
    };
    let watermark = resolve_watermark(opts, stored)?;
    let started_at = chrono::Utc::now().timestamp();
    info!(source, watermark, "starting pass");

    if opts.dry_run {
        let records = Synchronizer::new(&client).collect(watermark).await?;
        pool.close().await;
        return Ok(SyncReport {
            summary: PassSummary::count(&records),
            watermark,
            next_watermark: None,
        });
    }

    let summary = match opts.sink.unwrap_or(config.sync.sink) {
        SinkKind::Sqlite => {
            let mut sink = SqliteSink::new(pool.clone());
            run_pass(&client, &mut sink, source, watermark, config.sync.batch_size).await?
        }
        SinkKind::Jsonl => {
            let mut sink = JsonLinesSink::new(std::io::stdout());
            run_pass(&client, &mut sink, source, watermark, config.sync.batch_size).await?
        }
    };

    set_checkpoint(&pool, source, started_at).await?;
    info!(source, next_watermark = started_at, "pass complete");

    pool.close().await;
    Ok(SyncReport {
        summary,
        watermark,
        next_watermark: Some(started_at),
    })
}
