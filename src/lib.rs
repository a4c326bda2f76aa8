//! # Enrollment Sync
//!
//! A live, self-maintaining view of one student's course enrollments,
//! assembled from many independent real-time subscriptions to a remote
//! key/value tree.
//!
//! ## Core Concepts
//!
//! - **Accumulators**: Per-course partial fields, merged on demand
//! - **Lifecycle**: Exactly one set of listeners per enrolled course
//! - **Loading gate**: One `loading` flag over four independent sources
//! - **Composer**: Ordered, annotated course list with payment and catalog data
//! - **Refresh**: Epoch-tagged forced re-reads that supersede each other
//!
//! ## Example
//!
//! ```ignore
//! use enrollment_sync::{
//!     CallerIdentity, Collaborators, EngineConfig, EnrollmentEngine, MemoryStore, PermissionBag,
//! };
//!
//! let store = Arc::new(MemoryStore::new());
//! let mut engine = EnrollmentEngine::new(store.clone(), EngineConfig::default(), Collaborators::default())?;
//!
//! let staff = CallerIdentity::new("kyle@rtd.ca", PermissionBag::new().grant("staff"));
//! engine.mount("jane@example.com", &staff)?;
//! engine.pump();
//!
//! for course in &engine.view().courses {
//!     println!("{} paid={}", course.id, course.payment.has_valid_payment);
//! }
//! engine.teardown();
//! ```

pub mod accumulator;
pub mod collaborators;
pub mod compose;
pub mod config;
pub mod engine;
pub mod error;
pub mod gate;
pub mod hooks;
pub mod mailbox;
pub mod remote;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use accumulator::{Accumulators, CourseAccumulator};
pub use collaborators::{
    AnnotationOptions, CallerIdentity, Collaborators, EmailKeySanitizer, KeySanitizer,
    NoopRpc, NotificationAnnotator, PassThroughAnnotator, PermissionBag, PermissionCheck,
    RequirePermission, RpcReply, SurveyOperation, SurveyRequest, SurveyRpc,
};
pub use compose::{compose_courses, sort_by_created_desc, ComposeInput, StaffDirectory};
pub use config::{EngineConfig, PathLayout, DEFAULT_FIELD_PATHS};
pub use engine::EnrollmentEngine;
pub use error::{RemoteError, Result, SyncError};
pub use gate::{GateSignal, GateState, LoadingGate};
pub use hooks::{EngineHooks, NoHooks, ObserverId, RefreshReason};
pub use mailbox::{Liveness, Mailbox, Message, ReadRequest, Source};
pub use remote::{MemoryStore, RemoteStore, SubscriptionId, WatchTarget};
pub use subscriptions::{LifecycleManager, ListenerRegistry, ReconcileSummary};
pub use types::*;
