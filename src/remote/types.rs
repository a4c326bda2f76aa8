//! Remote store trait and subscription types.

use crate::error::RemoteError;
use crate::types::StorePath;
use serde_json::Value;

/// Unique identifier for a remote subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Called with the current value at the watched target (`None` = absent).
pub type ChangeCallback = Box<dyn Fn(Option<Value>) + Send + Sync>;

/// Called when the subscription cannot be served.
pub type ErrorCallback = Box<dyn Fn(RemoteError) + Send + Sync>;

/// Completion of a one-shot read.
pub type ReadCallback = Box<dyn FnOnce(Result<Option<Value>, RemoteError>) + Send>;

/// What a subscription watches.
#[derive(Clone, Debug, PartialEq)]
pub enum WatchTarget {
    /// The full value at a path.
    Value(StorePath),

    /// The keys of the children of a path, delivered as a JSON array of
    /// strings (empty when the node is missing).
    ChildKeys(StorePath),

    /// Children of a path whose `field` equals `value`, delivered as an
    /// object keyed by child key (`None` when nothing matches).
    ChildrenEqual {
        path: StorePath,
        field: String,
        value: Value,
    },
}

impl WatchTarget {
    pub fn path(&self) -> &StorePath {
        match self {
            WatchTarget::Value(path) => path,
            WatchTarget::ChildKeys(path) => path,
            WatchTarget::ChildrenEqual { path, .. } => path,
        }
    }
}

/// Path-based get/subscribe primitive over a single logical tree.
///
/// Implementations must never invoke a callback while holding a lock that
/// `subscribe`/`unsubscribe` would need, and must tolerate callbacks being
/// invoked for a subscription that is concurrently being removed.
pub trait RemoteStore: Send + Sync {
    /// One-shot read of the value at `path`.
    fn get(&self, path: &StorePath, reply: ReadCallback);

    /// One-shot read of the children of `path` whose `field` equals `value`.
    fn query_equal(&self, path: &StorePath, field: &str, value: &Value, reply: ReadCallback);

    /// Start watching `target`. The current value is delivered once, then
    /// again on every change.
    fn subscribe(
        &self,
        target: &WatchTarget,
        on_change: ChangeCallback,
        on_error: ErrorCallback,
    ) -> SubscriptionId;

    /// Stop a subscription. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);
}
