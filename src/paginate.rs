//! Cursor pagination over Conduit `*.search` endpoints.
//!
//! One traversal algorithm serves every entity type. Each endpoint supplies
//! a [`PageSource`] (how to fetch a page for a query) and a [`PageParser`]
//! (how to turn a page into records), and [`fetch_all`] drives the pair
//! until the endpoint is exhausted.
//!
//! # Paging direction
//!
//! Conduit reports a `{before, after}` cursor pair with every page. The
//! direction is inferred from the *first* page only ([`PagingDirection::resolve`])
//! and stays fixed for the rest of the traversal:
//!
//! ```text
//! first cursor          direction   next query key
//! {before: "x", ..}  →  Before   →  before = <cursor.before>
//! {before: null, after: "y"} → After → after = <cursor.after>
//! {null, null}       →  none     →  stop after this page
//! ```

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::ConduitError;
use crate::models::{Cursor, Page, Query};

/// Direction a traversal pages in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingDirection {
    Before,
    After,
}

impl PagingDirection {
    /// Infer the direction from the first page's cursor.
    ///
    /// `None` means the whole result fit in one page.
    pub fn resolve(cursor: &Cursor) -> Option<Self> {
        if cursor.before.is_some() {
            Some(Self::Before)
        } else if cursor.after.is_some() {
            Some(Self::After)
        } else {
            None
        }
    }

    /// Query parameter (and cursor field) this direction uses.
    pub fn query_key(self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::After => "after",
        }
    }

    /// The token `cursor` carries for this direction, if any.
    pub fn token(self, cursor: &Cursor) -> Option<&str> {
        match self {
            Self::Before => cursor.before.as_deref(),
            Self::After => cursor.after.as_deref(),
        }
    }
}

/// Fetches one page of an endpoint.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Endpoint name used in log lines.
    fn name(&self) -> &str;

    /// Fetch the page selected by `query`.
    ///
    /// `Ok(None)` is the explicit "no data" signal and ends the traversal
    /// normally.
    async fn fetch_page(&self, query: &Query) -> Result<Option<Page>, ConduitError>;
}

/// Turns raw pages of one endpoint into typed records.
pub trait PageParser {
    type Record;

    /// Parse a single page. Records come back in row order.
    fn parse(&self, page: &Page) -> Result<Vec<Self::Record>, ConduitError>;

    /// Final pass over every record of a traversal, in page order.
    ///
    /// The default keeps everything.
    fn reconcile(&self, records: Vec<Self::Record>) -> Vec<Self::Record> {
        records
    }
}

/// Drive `source` to exhaustion starting from `query`.
///
/// Records are returned first page to last, row order within a page, after
/// [`PageParser::reconcile`]. A fetch or parse failure aborts the traversal
/// and nothing accumulated so far is returned.
pub async fn fetch_all<S, P>(
    source: &S,
    parser: &P,
    mut query: Query,
) -> Result<Vec<P::Record>, ConduitError>
where
    S: PageSource + ?Sized,
    P: PageParser + ?Sized,
{
    let mut direction: Option<PagingDirection> = None;
    let mut first_page = true;
    let mut pages = 0usize;
    let mut records = Vec::new();

    loop {
        let Some(page) = source.fetch_page(&query).await? else {
            info!(endpoint = source.name(), pages, "received empty response");
            break;
        };
        pages += 1;

        let parsed = parser.parse(&page)?;
        debug!(
            endpoint = source.name(),
            page = pages,
            rows = page.data.len(),
            records = parsed.len(),
            "fetched page"
        );
        records.extend(parsed);

        if first_page {
            direction = PagingDirection::resolve(&page.cursor);
            first_page = false;
        }

        let Some(dir) = direction else {
            break;
        };
        let Some(token) = dir.token(&page.cursor) else {
            break;
        };
        query.insert(dir.query_key().to_string(), token.to_string());
    }

    let records = parser.reconcile(records);
    info!(
        endpoint = source.name(),
        pages,
        records = records.len(),
        "traversal complete"
    );
    Ok(records)
}
