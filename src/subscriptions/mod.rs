//! Subscription lifecycle for enrolled courses.
//!
//! This module keeps the set of open remote subscriptions equal to the
//! subject's current enrollment:
//! - One field subscription per (course, whitelisted path)
//! - One catalog subscription per course
//! - One standing membership watch on the enrollment parent node
//!
//! New ids seen by the membership watch are never subscribed
//! incrementally; the engine runs a forced refresh and then reconciles.
//!
//! # Example
//!
//! ```ignore
//! let mut lifecycle = LifecycleManager::new(student, &config);
//! let summary = lifecycle.reconcile(&current_ids, &mut accumulators, &*store, &mailbox);
//! for course in summary.closed {
//!     println!("stopped watching {}", course);
//! }
//! ```

mod manager;
mod types;

pub use manager::{
    enrollment_ids, LifecycleManager, ListenerRegistry, MembershipChange, ReconcileSummary,
};
pub use types::Subscription;
