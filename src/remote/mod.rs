//! Remote key/value tree contract.
//!
//! The engine never talks to a concrete database. It consumes the
//! [`RemoteStore`] trait: path-based one-shot reads, path subscriptions and
//! an equality-filtered child query. Every completion is delivered through a
//! callback so that reads may resolve after the caller has gone away.
//!
//! [`MemoryStore`] is an in-process implementation of the contract, used by
//! tests, benches and embedders that want a local tree.
//!
//! # Example
//!
//! ```ignore
//! let store = MemoryStore::new();
//! store.set(&StorePath::new("students/a/profile"), json!({"firstName": "Ada"}));
//!
//! let id = store.subscribe(
//!     &WatchTarget::Value(StorePath::new("students/a/profile")),
//!     Box::new(|value| println!("profile: {:?}", value)),
//!     Box::new(|err| eprintln!("failed: {}", err)),
//! );
//! store.unsubscribe(id);
//! ```

mod memory;
mod types;

pub use memory::MemoryStore;
pub use types::{ChangeCallback, ErrorCallback, ReadCallback, RemoteStore, SubscriptionId, WatchTarget};
