//! In-process [`DocumentStore`] implementation.
//!
//! Backs the test suite and local tooling. All state lives under one async
//! mutex, which makes every transaction trivially serializable; a remote
//! adapter would instead re-run transaction bodies on optimistic-concurrency
//! conflicts, which is why bodies are required to be idempotent.
//!
//! Server timestamps come from a logical clock that never repeats or
//! regresses even when the wall clock does not advance between writes.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::path::DocPath;
use crate::query::{Direction, Filter, Query};
use crate::snapshot::{lookup, Snapshot};
use crate::store::{DocWatch, DocumentStore, QueryWatch, TxnBody, TxnReads, TxnWrite};
use crate::value::{FieldOp, Patch, Value, WriteMode};

#[derive(Debug, Clone)]
struct StoredDoc {
    fields: BTreeMap<String, Value>,
    version: u64,
    update_time: DateTime<Utc>,
}

struct QueryWatcher {
    query: Query,
    tx: mpsc::UnboundedSender<Vec<Snapshot>>,
    /// (path, version) signature of the last emitted result, to suppress
    /// re-emissions when an unrelated document changes.
    last: Vec<(DocPath, u64)>,
}

#[derive(Default)]
struct Shared {
    docs: BTreeMap<DocPath, StoredDoc>,
    doc_watchers: HashMap<DocPath, Vec<mpsc::UnboundedSender<Option<Snapshot>>>>,
    query_watchers: Vec<QueryWatcher>,
    last_server_time: Option<DateTime<Utc>>,
    next_version: u64,
    /// Test aid: writes under this path prefix fail with `Unavailable`.
    poisoned_prefix: Option<String>,
}

/// In-memory document store.
pub struct MemoryStore {
    inner: Mutex<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Shared::default()),
        }
    }

    /// Test aid: make every write whose document path starts with `prefix`
    /// fail with [`StoreError::Unavailable`] until [`Self::heal`] is called.
    /// Reads and watches are unaffected. Used to exercise best-effort write
    /// paths (mirror lag, dropped read receipts).
    pub async fn poison_writes(&self, prefix: &str) {
        self.inner.lock().await.poisoned_prefix = Some(prefix.to_string());
    }

    /// Clear a previous [`Self::poison_writes`].
    pub async fn heal(&self) {
        self.inner.lock().await.poisoned_prefix = None;
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Shared {
    /// Strictly increasing server clock.
    fn server_now(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = self.last_server_time {
            if now <= last {
                now = last + Duration::microseconds(1);
            }
        }
        self.last_server_time = Some(now);
        now
    }

    fn check_writable(&self, path: &DocPath) -> Result<()> {
        if let Some(ref prefix) = self.poisoned_prefix {
            if path.to_string().starts_with(prefix.as_str()) {
                return Err(StoreError::Unavailable(format!(
                    "write rejected under {prefix}"
                )));
            }
        }
        Ok(())
    }

    fn snapshot_of(&self, path: &DocPath) -> Option<Snapshot> {
        self.docs.get(path).map(|doc| {
            Snapshot::new(path.clone(), doc.fields.clone(), doc.update_time)
        })
    }

    fn apply(&mut self, path: &DocPath, patch: &Patch, mode: WriteMode, now: DateTime<Utc>) {
        let version = {
            self.next_version += 1;
            self.next_version
        };

        let entry = self.docs.entry(path.clone()).or_insert_with(|| StoredDoc {
            fields: BTreeMap::new(),
            version,
            update_time: now,
        });

        if mode == WriteMode::Replace {
            entry.fields.clear();
        }
        for (field, op) in patch.ops() {
            apply_op(&mut entry.fields, field, op, mode, now);
        }
        entry.version = version;
        entry.update_time = now;
    }

    fn remove(&mut self, path: &DocPath) -> bool {
        self.docs.remove(path).is_some()
    }

    fn run_query(&self, query: &Query) -> Vec<Snapshot> {
        let mut hits: Vec<Snapshot> = self
            .docs
            .iter()
            .filter(|(path, _)| path.parent() == *query.collection_path())
            .filter(|(_, doc)| matches_filters(&doc.fields, query.filters()))
            .map(|(path, doc)| Snapshot::new(path.clone(), doc.fields.clone(), doc.update_time))
            .collect();

        if let Some((field, direction)) = query.order() {
            // Documents without the order-by field are excluded.
            hits.retain(|snap| snap.get(field).is_some());
            hits.sort_by(|a, b| {
                let ord = a
                    .get(field)
                    .expect("retained above")
                    .order_cmp(b.get(field).expect("retained above"));
                match direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                }
            });
        } else {
            hits.sort_by(|a, b| a.path().cmp(b.path()));
        }

        if let Some(limit) = query.limit_count() {
            hits.truncate(limit);
        }
        hits
    }

    /// Fan out a document change to doc watchers and re-evaluate query
    /// watchers. Dead receivers are pruned here.
    fn notify(&mut self, path: &DocPath) {
        if let Some(senders) = self.doc_watchers.get_mut(path) {
            let snap = self
                .docs
                .get(path)
                .map(|doc| Snapshot::new(path.clone(), doc.fields.clone(), doc.update_time));
            senders.retain(|tx| tx.send(snap.clone()).is_ok());
            if senders.is_empty() {
                self.doc_watchers.remove(path);
            }
        }

        // Taking the watcher list out sidesteps borrowing `self` mutably
        // while each re-evaluation reads `self.docs`.
        let mut watchers = std::mem::take(&mut self.query_watchers);
        watchers.retain_mut(|watcher| {
            let hits = self.run_query(&watcher.query);
            let signature: Vec<(DocPath, u64)> = hits
                .iter()
                .map(|snap| {
                    let version = self.docs.get(snap.path()).map(|d| d.version).unwrap_or(0);
                    (snap.path().clone(), version)
                })
                .collect();
            if signature != watcher.last {
                watcher.last = signature;
                watcher.tx.send(hits).is_ok()
            } else {
                !watcher.tx.is_closed()
            }
        });
        self.query_watchers = watchers;
    }
}

fn matches_filters(fields: &BTreeMap<String, Value>, filters: &[Filter]) -> bool {
    filters.iter().all(|filter| match filter {
        Filter::Eq(field, expected) => lookup(fields, field) == Some(expected),
        Filter::ArrayContains(field, expected) => lookup(fields, field)
            .and_then(Value::as_array)
            .map(|items| items.contains(expected))
            .unwrap_or(false),
    })
}

/// Apply one field op at a dotted path, creating intermediate maps as
/// needed. A non-map value in the way of a deeper write is overwritten.
fn apply_op(
    fields: &mut BTreeMap<String, Value>,
    field: &str,
    op: &FieldOp,
    mode: WriteMode,
    now: DateTime<Utc>,
) {
    let parts: Vec<&str> = field.split('.').collect();
    let (leaf, dirs) = parts.split_last().expect("field paths are non-empty");

    let mut current = fields;
    for dir in dirs {
        let entry = current
            .entry(dir.to_string())
            .or_insert_with(|| Value::Map(BTreeMap::new()));
        if !matches!(entry, Value::Map(_)) {
            *entry = Value::Map(BTreeMap::new());
        }
        current = match entry {
            Value::Map(map) => map,
            _ => unreachable!(),
        };
    }

    match op {
        FieldOp::Set(value) => {
            // Merge-mode map-onto-map writes merge recursively.
            let map_merge = mode == WriteMode::Merge
                && matches!(value, Value::Map(_))
                && matches!(current.get(*leaf), Some(Value::Map(_)));
            if map_merge {
                if let (Some(Value::Map(existing)), Value::Map(new)) =
                    (current.get_mut(*leaf), value)
                {
                    merge_maps(existing, new);
                }
            } else {
                current.insert(leaf.to_string(), value.clone());
            }
        }
        FieldOp::ServerTimestamp => {
            current.insert(leaf.to_string(), Value::Timestamp(now));
        }
        FieldOp::Delete => {
            current.remove(*leaf);
        }
        FieldOp::ArrayUnion(values) => {
            // Anything other than an array (including absence) becomes an
            // empty array first.
            if !matches!(current.get(*leaf), Some(Value::Array(_))) {
                current.insert(leaf.to_string(), Value::Array(Vec::new()));
            }
            if let Some(Value::Array(existing)) = current.get_mut(*leaf) {
                for value in values {
                    if !existing.contains(value) {
                        existing.push(value.clone());
                    }
                }
            }
        }
        FieldOp::ArrayRemove(values) => {
            if !matches!(current.get(*leaf), Some(Value::Array(_))) {
                current.insert(leaf.to_string(), Value::Array(Vec::new()));
                return;
            }
            if let Some(Value::Array(existing)) = current.get_mut(*leaf) {
                existing.retain(|item| !values.contains(item));
            }
        }
    }
}

fn merge_maps(existing: &mut BTreeMap<String, Value>, incoming: &BTreeMap<String, Value>) {
    for (key, value) in incoming {
        let nested = matches!(value, Value::Map(_))
            && matches!(existing.get(key), Some(Value::Map(_)));
        if nested {
            if let (Some(Value::Map(old)), Value::Map(new)) = (existing.get_mut(key), value) {
                merge_maps(old, new);
            }
        } else {
            existing.insert(key.clone(), value.clone());
        }
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &DocPath) -> Result<Option<Snapshot>> {
        Ok(self.inner.lock().await.snapshot_of(path))
    }

    async fn set(&self, path: &DocPath, patch: Patch, mode: WriteMode) -> Result<()> {
        let mut shared = self.inner.lock().await;
        shared.check_writable(path)?;
        let now = shared.server_now();
        shared.apply(path, &patch, mode, now);
        shared.notify(path);
        Ok(())
    }

    async fn update(&self, path: &DocPath, patch: Patch) -> Result<()> {
        let mut shared = self.inner.lock().await;
        shared.check_writable(path)?;
        if !shared.docs.contains_key(path) {
            return Err(StoreError::NotFound(path.to_string()));
        }
        let now = shared.server_now();
        shared.apply(path, &patch, WriteMode::Merge, now);
        shared.notify(path);
        Ok(())
    }

    async fn delete(&self, path: &DocPath) -> Result<()> {
        let mut shared = self.inner.lock().await;
        shared.check_writable(path)?;
        if shared.remove(path) {
            shared.notify(path);
        }
        Ok(())
    }

    async fn query(&self, query: &Query) -> Result<Vec<Snapshot>> {
        Ok(self.inner.lock().await.run_query(query))
    }

    async fn run_transaction(&self, reads: Vec<DocPath>, body: TxnBody) -> Result<()> {
        let mut shared = self.inner.lock().await;

        // The single lock makes this serializable: read, decide, commit.
        let snapshots: HashMap<DocPath, Option<Snapshot>> = reads
            .iter()
            .map(|path| (path.clone(), shared.snapshot_of(path)))
            .collect();

        let writes: Vec<TxnWrite> = body(&TxnReads::new(snapshots))?;

        for write in &writes {
            shared.check_writable(&write.path)?;
        }

        // One commit timestamp for the whole transaction.
        let now = shared.server_now();
        for write in &writes {
            shared.apply(&write.path, &write.patch, write.mode, now);
        }
        for write in &writes {
            shared.notify(&write.path);
        }

        debug!(writes = writes.len(), "transaction committed");
        Ok(())
    }

    async fn watch_doc(&self, path: &DocPath) -> Result<DocWatch> {
        let mut shared = self.inner.lock().await;
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(shared.snapshot_of(path));
        shared.doc_watchers.entry(path.clone()).or_default().push(tx);
        Ok(rx)
    }

    async fn watch_query(&self, query: &Query) -> Result<QueryWatch> {
        let mut shared = self.inner.lock().await;
        let (tx, rx) = mpsc::unbounded_channel();
        let hits = shared.run_query(query);
        let last = hits
            .iter()
            .map(|s| {
                let version = shared.docs.get(s.path()).map(|d| d.version).unwrap_or(0);
                (s.path().clone(), version)
            })
            .collect();
        let _ = tx.send(hits);
        shared.query_watchers.push(QueryWatcher {
            query: query.clone(),
            tx,
            last,
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::CollectionPath;

    fn chat(id: &str) -> DocPath {
        CollectionPath::root("chats").doc(id)
    }

    #[tokio::test]
    async fn test_set_and_get_round_trip() {
        let store = MemoryStore::new();
        let path = chat("c1");
        store
            .set(
                &path,
                Patch::new().set("type", "private").server_timestamp("createdAt"),
                WriteMode::Merge,
            )
            .await
            .unwrap();

        let snap = store.get(&path).await.unwrap().unwrap();
        assert_eq!(snap.get_str("type"), Some("private"));
        assert!(snap.get_timestamp("createdAt").is_some());
    }

    #[tokio::test]
    async fn test_merge_deep_merges_nested_maps() {
        let store = MemoryStore::new();
        let path = chat("c1");
        store
            .set(
                &path,
                Patch::new().server_timestamp("memberMeta.alice.lastOpenedAt"),
                WriteMode::Merge,
            )
            .await
            .unwrap();
        store
            .set(
                &path,
                Patch::new().set("memberMeta.bob.iBlockedPeer", true),
                WriteMode::Merge,
            )
            .await
            .unwrap();

        let snap = store.get(&path).await.unwrap().unwrap();
        assert!(snap.get_timestamp("memberMeta.alice.lastOpenedAt").is_some());
        assert_eq!(snap.get_bool("memberMeta.bob.iBlockedPeer"), Some(true));
    }

    #[tokio::test]
    async fn test_replace_discards_previous_fields() {
        let store = MemoryStore::new();
        let path = chat("c1");
        store
            .set(&path, Patch::new().set("a", 1), WriteMode::Merge)
            .await
            .unwrap();
        store
            .set(&path, Patch::new().set("b", 2), WriteMode::Replace)
            .await
            .unwrap();

        let snap = store.get(&path).await.unwrap().unwrap();
        assert!(snap.get("a").is_none());
        assert_eq!(snap.get_i64("b"), Some(2));
    }

    #[tokio::test]
    async fn test_field_delete_removes_not_falsifies() {
        let store = MemoryStore::new();
        let path = chat("c1");
        store
            .set(&path, Patch::new().set("archived", true), WriteMode::Merge)
            .await
            .unwrap();
        store
            .set(&path, Patch::new().delete("archived"), WriteMode::Merge)
            .await
            .unwrap();

        let snap = store.get(&path).await.unwrap().unwrap();
        assert!(snap.get("archived").is_none());
    }

    #[tokio::test]
    async fn test_array_union_deduplicates() {
        let store = MemoryStore::new();
        let path = chat("c1");
        store
            .set(
                &path,
                Patch::new().array_union("hiddenFor", vec![Value::from("alice")]),
                WriteMode::Merge,
            )
            .await
            .unwrap();
        store
            .set(
                &path,
                Patch::new().array_union(
                    "hiddenFor",
                    vec![Value::from("alice"), Value::from("bob")],
                ),
                WriteMode::Merge,
            )
            .await
            .unwrap();

        let snap = store.get(&path).await.unwrap().unwrap();
        assert_eq!(snap.get_str_array("hiddenFor"), vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn test_update_missing_doc_errors() {
        let store = MemoryStore::new();
        let err = store
            .update(&chat("nope"), Patch::new().set("a", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_server_timestamps_strictly_increase() {
        let store = MemoryStore::new();
        let path = chat("c1");
        let mut previous = None;
        for _ in 0..50 {
            store
                .set(&path, Patch::new().server_timestamp("t"), WriteMode::Merge)
                .await
                .unwrap();
            let t = store
                .get(&path)
                .await
                .unwrap()
                .unwrap()
                .get_timestamp("t")
                .unwrap();
            if let Some(prev) = previous {
                assert!(t > prev, "server clock regressed");
            }
            previous = Some(t);
        }
    }

    #[tokio::test]
    async fn test_query_filters_and_limit() {
        let store = MemoryStore::new();
        for (id, status, member) in [
            ("c1", "sent", "alice"),
            ("c2", "sent", "bob"),
            ("c3", "read", "alice"),
            ("c4", "sent", "alice"),
        ] {
            store
                .set(
                    &chat(id),
                    Patch::new()
                        .set("lastMessageStatus", status)
                        .set("members", vec![Value::from(member)]),
                    WriteMode::Merge,
                )
                .await
                .unwrap();
        }

        let q = Query::collection(CollectionPath::root("chats"))
            .filter_array_contains("members", "alice")
            .filter_eq("lastMessageStatus", "sent")
            .limit(1);
        let hits = store.query(&q).await.unwrap();
        assert_eq!(hits.len(), 1);

        let all = store
            .query(
                &Query::collection(CollectionPath::root("chats"))
                    .filter_array_contains("members", "alice")
                    .filter_eq("lastMessageStatus", "sent"),
            )
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_query_order_by_excludes_docs_missing_field() {
        let store = MemoryStore::new();
        store
            .set(&chat("c1"), Patch::new().set("n", 2), WriteMode::Merge)
            .await
            .unwrap();
        store
            .set(&chat("c2"), Patch::new().set("n", 1), WriteMode::Merge)
            .await
            .unwrap();
        store
            .set(&chat("c3"), Patch::new().set("other", 1), WriteMode::Merge)
            .await
            .unwrap();

        let hits = store
            .query(
                &Query::collection(CollectionPath::root("chats"))
                    .order_by("n", Direction::Descending),
            )
            .await
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(Snapshot::id).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
    }

    #[tokio::test]
    async fn test_transaction_commits_atomically_across_docs() {
        let store = MemoryStore::new();
        let a = chat("a");
        let b = chat("b");
        let (a2, b2) = (a.clone(), b.clone());
        store
            .run_transaction(
                vec![a.clone()],
                Box::new(move |reads| {
                    assert!(reads.get(&a2).is_none());
                    Ok(vec![
                        TxnWrite::merge(a2.clone(), Patch::new().server_timestamp("t")),
                        TxnWrite::merge(b2.clone(), Patch::new().server_timestamp("t")),
                    ])
                }),
            )
            .await
            .unwrap();

        let ta = store.get(&a).await.unwrap().unwrap().get_timestamp("t");
        let tb = store.get(&b).await.unwrap().unwrap().get_timestamp("t");
        // One commit instant for the whole transaction.
        assert_eq!(ta, tb);
    }

    #[tokio::test]
    async fn test_watch_doc_sees_initial_and_updates() {
        let store = MemoryStore::new();
        let path = chat("c1");
        let mut watch = store.watch_doc(&path).await.unwrap();
        assert!(watch.recv().await.unwrap().is_none());

        store
            .set(&path, Patch::new().set("a", 1), WriteMode::Merge)
            .await
            .unwrap();
        let snap = watch.recv().await.unwrap().unwrap();
        assert_eq!(snap.get_i64("a"), Some(1));

        store.delete(&path).await.unwrap();
        assert!(watch.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_watch_query_skips_unrelated_changes() {
        let store = MemoryStore::new();
        let q = Query::collection(CollectionPath::root("chats")).filter_eq("kind", "x");
        let mut watch = store.watch_query(&q).await.unwrap();
        assert!(watch.recv().await.unwrap().is_empty());

        // Unrelated document: no emission.
        store
            .set(&chat("other"), Patch::new().set("kind", "y"), WriteMode::Merge)
            .await
            .unwrap();
        // Matching document: one emission.
        store
            .set(&chat("hit"), Patch::new().set("kind", "x"), WriteMode::Merge)
            .await
            .unwrap();

        let hits = watch.recv().await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id(), "hit");
    }

    #[tokio::test]
    async fn test_poisoned_writes_fail_until_healed() {
        let store = MemoryStore::new();
        let path = chat("c1");
        store.poison_writes("chats/").await;
        let err = store
            .set(&path, Patch::new().set("a", 1), WriteMode::Merge)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));

        store.heal().await;
        store
            .set(&path, Patch::new().set("a", 1), WriteMode::Merge)
            .await
            .unwrap();
    }
}
