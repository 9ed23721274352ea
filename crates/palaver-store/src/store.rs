//! The abstract document-store trait.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::path::DocPath;
use crate::query::Query;
use crate::snapshot::Snapshot;
use crate::value::{Patch, WriteMode};

/// Consistent read set handed to a transaction body.
///
/// Every path passed to [`DocumentStore::run_transaction`] appears here,
/// mapped to the document's snapshot at transaction begin (or `None` if it
/// does not exist).
#[derive(Debug)]
pub struct TxnReads {
    snapshots: HashMap<DocPath, Option<Snapshot>>,
}

impl TxnReads {
    pub fn new(snapshots: HashMap<DocPath, Option<Snapshot>>) -> Self {
        Self { snapshots }
    }

    pub fn get(&self, path: &DocPath) -> Option<&Snapshot> {
        self.snapshots.get(path).and_then(Option::as_ref)
    }
}

/// A staged write produced by a transaction body.
#[derive(Debug, Clone)]
pub struct TxnWrite {
    pub path: DocPath,
    pub patch: Patch,
    pub mode: WriteMode,
}

impl TxnWrite {
    pub fn merge(path: DocPath, patch: Patch) -> Self {
        Self {
            path,
            patch,
            mode: WriteMode::Merge,
        }
    }

    pub fn replace(path: DocPath, patch: Patch) -> Self {
        Self {
            path,
            patch,
            mode: WriteMode::Replace,
        }
    }
}

/// A transaction body: a synchronous decision function from the read set to
/// staged writes. The store may execute it more than once (optimistic
/// concurrency retry), so bodies must be idempotent and side-effect free.
pub type TxnBody = Box<dyn Fn(&TxnReads) -> Result<Vec<TxnWrite>> + Send + Sync>;

/// Live stream of one document: the current snapshot at subscribe time, then
/// a snapshot after every write (or `None` after a delete). The subscription
/// ends when the receiver is dropped.
pub type DocWatch = mpsc::UnboundedReceiver<Option<Snapshot>>;

/// Live stream of a query's result set. The current result is delivered at
/// subscribe time; a new result follows every change that alters it.
pub type QueryWatch = mpsc::UnboundedReceiver<Vec<Snapshot>>;

/// An eventually-consistent, path-addressed document database.
///
/// Server timestamps are strictly monotonically increasing per store and are
/// materialised at commit time, so every `ServerTimestamp` op inside one
/// write (or one transaction) resolves to the same instant.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read a single document.
    async fn get(&self, path: &DocPath) -> Result<Option<Snapshot>>;

    /// Write a document. `Merge` deep-merges nested maps and creates the
    /// document if missing; `Replace` discards previous fields.
    async fn set(&self, path: &DocPath, patch: Patch, mode: WriteMode) -> Result<()>;

    /// Apply field deltas to an existing document. Fails with
    /// [`crate::StoreError::NotFound`] if the document does not exist.
    async fn update(&self, path: &DocPath, patch: Patch) -> Result<()>;

    /// Delete a document. Deleting a missing document is a no-op.
    async fn delete(&self, path: &DocPath) -> Result<()>;

    /// Run a query and return the matching snapshots.
    async fn query(&self, query: &Query) -> Result<Vec<Snapshot>>;

    /// Atomic read-modify-write over the given documents.
    ///
    /// The body sees a consistent snapshot of every path in `reads` and
    /// returns the writes to commit. Commit is atomic; on conflict with a
    /// concurrent writer the store re-reads and re-runs the body.
    async fn run_transaction(&self, reads: Vec<DocPath>, body: TxnBody) -> Result<()>;

    /// Subscribe to a single document.
    async fn watch_doc(&self, path: &DocPath) -> Result<DocWatch>;

    /// Subscribe to a query's result set.
    async fn watch_query(&self, query: &Query) -> Result<QueryWatch>;
}
