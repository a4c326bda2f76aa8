//! In-memory remote tree with path subscriptions.

use crate::error::RemoteError;
use crate::types::{Fields, StorePath};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::types::{
    ChangeCallback, ErrorCallback, ReadCallback, RemoteStore, SubscriptionId, WatchTarget,
};

type SharedChange = Arc<dyn Fn(Option<Value>) + Send + Sync>;

/// Internal watch state.
struct Watch {
    target: WatchTarget,
    on_change: SharedChange,
    /// Last delivered snapshot; deliveries are suppressed when unchanged.
    last: Option<Value>,
}

/// A one-shot read parked while the store is in deferred mode.
struct PendingRead {
    path: StorePath,
    query: Option<(String, Value)>,
    reply: ReadCallback,
}

/// In-memory [`RemoteStore`].
///
/// Writes go through [`MemoryStore::set`], which notifies every watch whose
/// target overlaps the written path. Reads either resolve immediately or,
/// in deferred mode, wait until [`MemoryStore::resolve_pending_reads`].
pub struct MemoryStore {
    /// The tree. Always an object at the root.
    root: RwLock<Value>,
    /// Active watches by ID.
    watches: RwLock<HashMap<SubscriptionId, Watch>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
    /// Injected failures: any read or watch at or below a key fails.
    failures: RwLock<HashMap<StorePath, String>>,
    /// `Some` while reads are deferred.
    deferred: Mutex<Option<VecDeque<PendingRead>>>,
    /// Number of one-shot reads issued.
    reads_issued: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_root(Value::Object(Fields::new()))
    }

    /// Create a store seeded with a tree.
    pub fn with_root(root: Value) -> Self {
        let root = if root.is_object() {
            root
        } else {
            Value::Object(Fields::new())
        };
        Self {
            root: RwLock::new(root),
            watches: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            failures: RwLock::new(HashMap::new()),
            deferred: Mutex::new(None),
            reads_issued: AtomicU64::new(0),
        }
    }

    // --- Writes ---

    /// Write `value` at `path` (`null` removes) and notify affected watches.
    pub fn set(&self, path: &StorePath, value: Value) {
        {
            let mut root = self.root.write();
            let segments: Vec<&str> = path.segments().collect();
            write_at(&mut root, &segments, value);
            if !root.is_object() {
                *root = Value::Object(Fields::new());
            }
        }
        self.notify(path);
    }

    pub fn remove(&self, path: &StorePath) {
        self.set(path, Value::Null);
    }

    /// Current value at `path`.
    pub fn value_at(&self, path: &StorePath) -> Option<Value> {
        lookup(&self.root.read(), path).cloned()
    }

    fn notify(&self, written: &StorePath) {
        let mut deliveries: Vec<(SubscriptionId, SharedChange, Option<Value>)> = Vec::new();

        {
            let root = self.root.read();
            let mut watches = self.watches.write();
            for (id, watch) in watches.iter_mut() {
                if !watch.target.path().overlaps(written) {
                    continue;
                }
                let snapshot = snapshot(&root, &watch.target);
                if watch.last != snapshot {
                    watch.last = snapshot.clone();
                    deliveries.push((*id, Arc::clone(&watch.on_change), snapshot));
                }
            }
        }

        // Deliver outside the locks, oldest subscription first.
        deliveries.sort_by_key(|(id, _, _)| id.0);
        for (_, callback, value) in deliveries {
            callback(value);
        }
    }

    // --- Failure injection ---

    /// Make reads and new subscriptions at or below `path` fail.
    pub fn fail_path(&self, path: &StorePath, message: impl Into<String>) {
        self.failures.write().insert(path.clone(), message.into());
    }

    pub fn clear_failure(&self, path: &StorePath) {
        self.failures.write().remove(path);
    }

    fn failure_for(&self, path: &StorePath) -> Option<RemoteError> {
        self.failures
            .read()
            .iter()
            .find(|(failing, _)| failing.contains(path))
            .map(|(_, message)| RemoteError::new(path.as_str(), message.clone()))
    }

    // --- Deferred reads ---

    /// Park one-shot reads until [`resolve_pending_reads`](Self::resolve_pending_reads).
    pub fn defer_reads(&self, enabled: bool) {
        let mut deferred = self.deferred.lock();
        if enabled {
            deferred.get_or_insert_with(VecDeque::new);
        } else if let Some(queue) = deferred.take() {
            // Leaving deferred mode must not lose parked reads.
            drop(deferred);
            for read in queue {
                self.resolve(read);
            }
        }
    }

    pub fn pending_read_count(&self) -> usize {
        self.deferred.lock().as_ref().map_or(0, |q| q.len())
    }

    /// Resolve every parked read against the current tree, in FIFO order.
    ///
    /// Reads issued by the callbacks themselves stay parked.
    pub fn resolve_pending_reads(&self) -> usize {
        let parked: Vec<PendingRead> = match self.deferred.lock().as_mut() {
            Some(queue) => queue.drain(..).collect(),
            None => Vec::new(),
        };
        let count = parked.len();
        for read in parked {
            self.resolve(read);
        }
        count
    }

    pub fn reads_issued(&self) -> u64 {
        self.reads_issued.load(Ordering::SeqCst)
    }

    fn enqueue_or_resolve(&self, read: PendingRead) {
        self.reads_issued.fetch_add(1, Ordering::SeqCst);
        {
            let mut deferred = self.deferred.lock();
            if let Some(queue) = deferred.as_mut() {
                queue.push_back(read);
                return;
            }
        }
        self.resolve(read);
    }

    fn resolve(&self, read: PendingRead) {
        if let Some(err) = self.failure_for(&read.path) {
            (read.reply)(Err(err));
            return;
        }
        let value = {
            let root = self.root.read();
            match &read.query {
                None => lookup(&root, &read.path).cloned(),
                Some((field, value)) => children_equal(&root, &read.path, field, value),
            }
        };
        (read.reply)(Ok(value));
    }

    // --- Introspection ---

    /// Get active watch count.
    pub fn subscription_count(&self) -> usize {
        self.watches.read().len()
    }

    /// Watched paths, sorted, one entry per watch.
    pub fn watched_paths(&self) -> Vec<StorePath> {
        let mut paths: Vec<StorePath> = self
            .watches
            .read()
            .values()
            .map(|w| w.target.path().clone())
            .collect();
        paths.sort();
        paths
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteStore for MemoryStore {
    fn get(&self, path: &StorePath, reply: ReadCallback) {
        self.enqueue_or_resolve(PendingRead {
            path: path.clone(),
            query: None,
            reply,
        });
    }

    fn query_equal(&self, path: &StorePath, field: &str, value: &Value, reply: ReadCallback) {
        self.enqueue_or_resolve(PendingRead {
            path: path.clone(),
            query: Some((field.to_string(), value.clone())),
            reply,
        });
    }

    fn subscribe(
        &self,
        target: &WatchTarget,
        on_change: ChangeCallback,
        on_error: ErrorCallback,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));

        if let Some(err) = self.failure_for(target.path()) {
            on_error(err);
            return id;
        }

        let on_change: SharedChange = Arc::from(on_change);
        let initial = {
            let root = self.root.read();
            let initial = snapshot(&root, target);
            self.watches.write().insert(
                id,
                Watch {
                    target: target.clone(),
                    on_change: Arc::clone(&on_change),
                    last: initial.clone(),
                },
            );
            initial
        };

        on_change(initial);
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.watches.write().remove(&id);
    }
}

// --- Tree helpers ---

fn lookup<'a>(root: &'a Value, path: &StorePath) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.segments() {
        current = current.as_object()?.get(segment)?;
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

/// Write `value` below `node`, creating intermediate objects and pruning
/// objects left empty by a removal.
fn write_at(node: &mut Value, segments: &[&str], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *node = value;
        return;
    };

    if !node.is_object() {
        *node = Value::Object(Fields::new());
    }
    let Some(map) = node.as_object_mut() else {
        return;
    };

    if rest.is_empty() {
        if value.is_null() {
            map.remove(*first);
        } else {
            map.insert(first.to_string(), value);
        }
        return;
    }

    let child = map
        .entry(first.to_string())
        .or_insert_with(|| Value::Object(Fields::new()));
    write_at(child, rest, value);
    let empty = child.is_null() || child.as_object().map_or(false, |c| c.is_empty());
    if empty {
        map.remove(*first);
    }
}

fn children_equal(root: &Value, path: &StorePath, field: &str, expected: &Value) -> Option<Value> {
    let children = lookup(root, path)?.as_object()?;
    let matched: Fields = children
        .iter()
        .filter(|(_, child)| child.get(field) == Some(expected))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if matched.is_empty() {
        None
    } else {
        Some(Value::Object(matched))
    }
}

fn snapshot(root: &Value, target: &WatchTarget) -> Option<Value> {
    match target {
        WatchTarget::Value(path) => lookup(root, path).cloned(),
        WatchTarget::ChildKeys(path) => {
            let keys = lookup(root, path)
                .and_then(Value::as_object)
                .map(|obj| obj.keys().map(|k| Value::String(k.clone())).collect())
                .unwrap_or_default();
            Some(Value::Array(keys))
        }
        WatchTarget::ChildrenEqual { path, field, value } => {
            children_equal(root, path, field, value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recorder() -> (Arc<Mutex<Vec<Option<Value>>>>, ChangeCallback) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, Box::new(move |v| sink.lock().push(v)))
    }

    fn ignore_errors() -> ErrorCallback {
        Box::new(|_| {})
    }

    #[test]
    fn test_subscribe_delivers_initial_and_changes_only() {
        let store = MemoryStore::new();
        let path = StorePath::new("a/b");
        let (seen, on_change) = recorder();

        let id = store.subscribe(&WatchTarget::Value(path.clone()), on_change, ignore_errors());
        store.set(&path, json!(1));
        store.set(&path, json!(1));
        store.set(&StorePath::new("a/c"), json!(2));
        store.set(&path, json!(3));

        assert_eq!(*seen.lock(), vec![None, Some(json!(1)), Some(json!(3))]);

        store.unsubscribe(id);
        store.set(&path, json!(4));
        assert_eq!(seen.lock().len(), 3);
        assert_eq!(store.subscription_count(), 0);
    }

    #[test]
    fn test_parent_write_reaches_child_watch() {
        let store = MemoryStore::new();
        let (seen, on_change) = recorder();
        store.subscribe(
            &WatchTarget::Value(StorePath::new("s/1/Status/Value")),
            on_change,
            ignore_errors(),
        );

        store.set(&StorePath::new("s/1"), json!({"Status": {"Value": "Active"}}));
        assert_eq!(seen.lock().last().cloned(), Some(Some(json!("Active"))));
    }

    #[test]
    fn test_null_write_prunes_empty_parents() {
        let store = MemoryStore::new();
        store.set(&StorePath::new("a/b/c"), json!(true));
        store.remove(&StorePath::new("a/b/c"));
        assert_eq!(store.value_at(&StorePath::new("a")), None);
    }

    #[test]
    fn test_child_keys_and_children_equal() {
        let store = MemoryStore::new();
        store.set(&StorePath::new("n/x"), json!({"active": true}));
        store.set(&StorePath::new("n/y"), json!({"active": false}));

        let (keys, on_keys) = recorder();
        store.subscribe(&WatchTarget::ChildKeys(StorePath::new("n")), on_keys, ignore_errors());
        assert_eq!(keys.lock()[0], Some(json!(["x", "y"])));

        let (active, on_active) = recorder();
        store.subscribe(
            &WatchTarget::ChildrenEqual {
                path: StorePath::new("n"),
                field: "active".into(),
                value: json!(true),
            },
            on_active,
            ignore_errors(),
        );
        assert_eq!(active.lock()[0], Some(json!({"x": {"active": true}})));

        store.set(&StorePath::new("n/x/active"), json!(false));
        assert_eq!(active.lock().last().cloned(), Some(None));
    }

    #[test]
    fn test_failing_path_reports_errors() {
        let store = MemoryStore::new();
        store.fail_path(&StorePath::new("secret"), "permission_denied");

        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        store.subscribe(
            &WatchTarget::Value(StorePath::new("secret/inner")),
            Box::new(|_| panic!("must not deliver")),
            Box::new(move |e| sink.lock().push(e)),
        );
        assert_eq!(errors.lock().len(), 1);
        assert_eq!(store.subscription_count(), 0);

        let result = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&result);
        store.get(&StorePath::new("secret"), Box::new(move |r| *slot.lock() = Some(r)));
        assert!(matches!(*result.lock(), Some(Err(_))));
    }

    #[test]
    fn test_deferred_reads_resolve_with_current_data() {
        let store = MemoryStore::new();
        store.defer_reads(true);

        let result = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&result);
        store.get(&StorePath::new("k"), Box::new(move |r| *slot.lock() = Some(r)));
        assert_eq!(store.pending_read_count(), 1);
        assert!(result.lock().is_none());

        store.set(&StorePath::new("k"), json!("late"));
        assert_eq!(store.resolve_pending_reads(), 1);
        assert_eq!(*result.lock(), Some(Ok(Some(json!("late")))));
        assert_eq!(store.reads_issued(), 1);
    }
}
