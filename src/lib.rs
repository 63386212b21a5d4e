//! # phabsync
//!
//! Incremental synchronization of Phabricator tasks, wiki pages and their
//! comments into a document sink.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌─────────────┐   ┌──────────┐
//! │   Conduit    │──▶│  Paginated   │──▶│ Synchronizer│──▶│ Dispatch │──▶ sink
//! │ *.search API │   │ fetch + parse│   │  fan-out    │   │ 512/batch│
//! └──────────────┘   └──────────────┘   └─────────────┘   └──────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. [`sync::Synchronizer`] walks `phriction.content.search` and
//!    `maniphest.search` through [`paginate::fetch_all`], which infers the
//!    paging direction from the first cursor and follows it to the end.
//! 2. [`parsers`] turn each page into [`models::RemoteObject`]s, dropping
//!    entries older than the watermark and collapsing wiki revisions.
//! 3. For every task and wiki page one `transaction.search` traversal
//!    collects its comments.
//! 4. [`dispatch::dispatch_documents`] converts the merged stream to
//!    [`models::ExportDocument`]s and feeds them to a [`dispatch::DocumentSink`]
//!    in fixed-size batches.
//! 5. [`sync::run_sync`] records the pass start as the next watermark once
//!    everything has been delivered.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Remote objects, cursors, pages and export documents |
//! | [`error`] | Conduit failure type |
//! | [`conduit`] | Conduit HTTP client and the `Conduit` trait |
//! | [`paginate`] | Paging direction and the generic traversal loop |
//! | [`parsers`] | Task, wiki and comment page parsers |
//! | [`sync`] | Pass orchestration and watermark handling |
//! | [`dispatch`] | Batching and the `DocumentSink` trait |
//! | [`sinks`] | JSON-lines and SQLite sinks |
//! | [`checkpoint`] | Watermark storage |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Database schema (idempotent) |

pub mod checkpoint;
pub mod conduit;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod migrate;
pub mod models;
pub mod paginate;
pub mod parsers;
pub mod sinks;
pub mod sync;

pub use conduit::{Conduit, ConduitClient};
pub use dispatch::{dispatch_documents, DocumentSink};
pub use error::ConduitError;
pub use models::{ExportDocument, ObjectKind, RemoteObject};
pub use sync::{run_pass, Synchronizer};
