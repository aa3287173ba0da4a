//! The vector store contract (§6): an external collaborator the core only
//! depends on through a trait. Production deployments back this with a
//! durable key-value engine; this module also ships an in-memory reference
//! implementation used by this crate's own tests and by embedders that
//! don't yet need persistence.

use dashmap::DashMap;

use crate::error::{Error, Result};
use crate::point::VectorRecord;

/// Namespace-level storage statistics (§6 `stats`).
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreStats {
    /// Number of records currently stored in the namespace.
    pub count: usize,
    /// Approximate bytes of storage consumed.
    pub storage_bytes: u64,
}

/// A handle representing a group of reads/writes the store should treat as
/// one atomic unit (§6 "Transactions"). The in-memory reference store has no
/// real transaction log, so this is a no-op marker; a durable backend would
/// wrap a write-ahead-log transaction handle instead.
#[derive(Debug, Default)]
pub struct Transaction {
    _private: (),
}

impl Transaction {
    /// Begins a new logical transaction.
    #[must_use]
    pub fn begin() -> Self {
        Self::default()
    }
}

/// What the core expects from the external vector store (§6).
///
/// Implementations must make `put`/`get`/`delete` linearizable per
/// `(namespace, id)` key and `scan` a weakly-consistent lazy sequence over
/// whatever snapshot was current when the scan started.
pub trait VectorStore: Send + Sync {
    /// Inserts or replaces `record` under `id` in `namespace`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QuotaExceeded`] if the namespace is at capacity.
    fn put(&self, namespace: &str, id: &str, record: VectorRecord, tx: &Transaction)
        -> Result<()>;

    /// Fetches the record stored under `id` in `namespace`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::VectorNotFound`] if no such record exists.
    fn get(&self, namespace: &str, id: &str) -> Result<VectorRecord>;

    /// Removes the record stored under `id` in `namespace`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::VectorNotFound`] if no such record exists.
    fn delete(&self, namespace: &str, id: &str, tx: &Transaction) -> Result<()>;

    /// Returns every record currently stored in `namespace`, in unspecified
    /// order. `filter_hint` is an optional pre-filter predicate the store
    /// may use to prune before returning candidates to the caller; the store
    /// is free to ignore it and return the full set, since the caller
    /// re-evaluates any filter itself.
    fn scan(&self, namespace: &str, filter_hint: Option<&dyn Fn(&VectorRecord) -> bool>)
        -> Vec<VectorRecord>;

    /// Returns storage statistics for `namespace`.
    fn stats(&self, namespace: &str) -> StoreStats;
}

/// An in-memory [`VectorStore`] backed by a sharded concurrent map, used by
/// this crate's tests and as a reference implementation for embedders that
/// don't need durability.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    namespaces: DashMap<String, DashMap<String, VectorRecord>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn namespace_map(&self, namespace: &str) -> dashmap::mapref::one::Ref<'_, String, DashMap<String, VectorRecord>> {
        self.namespaces
            .entry(namespace.to_string())
            .or_default();
        self.namespaces.get(namespace).expect("just inserted")
    }
}

impl VectorStore for InMemoryStore {
    fn put(
        &self,
        namespace: &str,
        id: &str,
        record: VectorRecord,
        _tx: &Transaction,
    ) -> Result<()> {
        let ns = self.namespace_map(namespace);
        ns.insert(id.to_string(), record);
        Ok(())
    }

    fn get(&self, namespace: &str, id: &str) -> Result<VectorRecord> {
        let ns = self.namespaces.get(namespace).ok_or_else(|| Error::VectorNotFound(id.to_string()))?;
        ns.get(id)
            .map(|r| r.clone())
            .ok_or_else(|| Error::VectorNotFound(id.to_string()))
    }

    fn delete(&self, namespace: &str, id: &str, _tx: &Transaction) -> Result<()> {
        let ns = self.namespaces.get(namespace).ok_or_else(|| Error::VectorNotFound(id.to_string()))?;
        ns.remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::VectorNotFound(id.to_string()))
    }

    fn scan(
        &self,
        namespace: &str,
        filter_hint: Option<&dyn Fn(&VectorRecord) -> bool>,
    ) -> Vec<VectorRecord> {
        let Some(ns) = self.namespaces.get(namespace) else {
            return Vec::new();
        };
        ns.iter()
            .map(|e| e.value().clone())
            .filter(|r| filter_hint.is_none_or(|f| f(r)))
            .collect()
    }

    fn stats(&self, namespace: &str) -> StoreStats {
        let Some(ns) = self.namespaces.get(namespace) else {
            return StoreStats::default();
        };
        let count = ns.len();
        let storage_bytes = ns
            .iter()
            .map(|e| (e.value().dimension * 4 + e.key().len()) as u64)
            .sum();
        StoreStats {
            count,
            storage_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn rec(id: &str, v: Vec<f32>) -> VectorRecord {
        VectorRecord::new(id, v, Map::new(), 0).unwrap()
    }

    #[test]
    fn put_then_get_round_trips() {
        let store = InMemoryStore::new();
        let tx = Transaction::begin();
        store.put("ns", "a", rec("a", vec![1.0, 2.0]), &tx).unwrap();
        let got = store.get("ns", "a").unwrap();
        assert_eq!(got.id, "a");
    }

    #[test]
    fn get_missing_is_not_found() {
        let store = InMemoryStore::new();
        assert!(matches!(store.get("ns", "x"), Err(Error::VectorNotFound(_))));
    }

    #[test]
    fn delete_removes_record() {
        let store = InMemoryStore::new();
        let tx = Transaction::begin();
        store.put("ns", "a", rec("a", vec![1.0]), &tx).unwrap();
        store.delete("ns", "a", &tx).unwrap();
        assert!(store.get("ns", "a").is_err());
    }

    #[test]
    fn delete_missing_is_not_found() {
        let store = InMemoryStore::new();
        let tx = Transaction::begin();
        assert!(matches!(store.delete("ns", "x", &tx), Err(Error::VectorNotFound(_))));
    }

    #[test]
    fn scan_returns_all_records_in_namespace() {
        let store = InMemoryStore::new();
        let tx = Transaction::begin();
        store.put("ns", "a", rec("a", vec![1.0]), &tx).unwrap();
        store.put("ns", "b", rec("b", vec![2.0]), &tx).unwrap();
        store.put("other", "c", rec("c", vec![3.0]), &tx).unwrap();
        let results = store.scan("ns", None);
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn scan_applies_filter_hint() {
        let store = InMemoryStore::new();
        let tx = Transaction::begin();
        store.put("ns", "a", rec("a", vec![1.0]), &tx).unwrap();
        store.put("ns", "b", rec("b", vec![2.0]), &tx).unwrap();
        let results = store.scan("ns", Some(&|r: &VectorRecord| r.id == "a"));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "a");
    }

    #[test]
    fn stats_reports_count() {
        let store = InMemoryStore::new();
        let tx = Transaction::begin();
        store.put("ns", "a", rec("a", vec![1.0, 2.0, 3.0]), &tx).unwrap();
        let stats = store.stats("ns");
        assert_eq!(stats.count, 1);
        assert!(stats.storage_bytes > 0);
    }

    #[test]
    fn stats_on_unknown_namespace_is_zero() {
        let store = InMemoryStore::new();
        let stats = store.stats("nope");
        assert_eq!(stats.count, 0);
    }
}
