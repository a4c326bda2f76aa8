//! The enrollment engine.
//!
//! Ties the lifecycle manager, accumulators, loading gate and composer to
//! one mounted subject. All remote deliveries are queued in the session
//! mailbox and applied by [`EnrollmentEngine::pump`], so state is only ever
//! mutated from the caller's thread.
//!
//! # Example
//!
//! ```ignore
//! use enrollment_sync::{CallerIdentity, Collaborators, EngineConfig, EnrollmentEngine, MemoryStore};
//!
//! let store = Arc::new(MemoryStore::new());
//! let mut engine = EnrollmentEngine::new(store, EngineConfig::default(), Collaborators::default())?;
//! engine.observe(|view| println!("{} courses", view.courses.len()));
//!
//! engine.mount("jane@example.com", &staff)?;
//! engine.pump();
//! assert!(!engine.view().loading);
//! ```

mod refresh;
mod session;

use crate::collaborators::{CallerIdentity, Collaborators, SurveyOperation, SurveyRequest};
use crate::compose::Dependency;
use crate::config::EngineConfig;
use crate::error::{Result, SyncError};
use crate::hooks::{EngineHooks, NoHooks, ObserverId, Observers, RefreshReason};
use crate::remote::RemoteStore;
use crate::subscriptions::ListenerRegistry;
use crate::types::{CourseId, EnrollmentView, StudentKey};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use session::{Context, Session};

/// Live, self-maintaining view of one subject student's enrollments.
pub struct EnrollmentEngine {
    store: Arc<dyn RemoteStore>,
    config: EngineConfig,
    collaborators: Collaborators,
    hooks: Box<dyn EngineHooks>,
    observers: Observers,

    /// Present between mount and teardown.
    session: Option<Session>,

    /// Last published view. Frozen after teardown.
    view: EnrollmentView,
}

impl EnrollmentEngine {
    /// Create an unmounted engine. The configuration is validated here.
    pub fn new(
        store: Arc<dyn RemoteStore>,
        config: EngineConfig,
        collaborators: Collaborators,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            collaborators,
            hooks: Box::new(NoHooks),
            observers: Observers::new(),
            session: None,
            view: EnrollmentView::default(),
        })
    }

    pub fn with_hooks(mut self, hooks: impl EngineHooks + 'static) -> Self {
        self.hooks = Box::new(hooks);
        self
    }

    // --- Lifecycle ---

    /// Mount the view for `subject_email`.
    ///
    /// Any previous session is torn down first. The permission check runs
    /// before a single subscription is opened; on denial the published view
    /// carries the error and `loading == false`.
    pub fn mount(&mut self, subject_email: &str, caller: &CallerIdentity) -> Result<()> {
        self.teardown();
        self.view = EnrollmentView::default();

        if !self
            .collaborators
            .permissions
            .allows(&caller.email, &caller.permissions)
        {
            let err = SyncError::PermissionDenied(caller.email.clone());
            warn!(caller = %caller.email, "permission denied; nothing subscribed");
            self.fail_view(&err);
            return Err(err);
        }

        let key = self.collaborators.sanitizer.sanitize(subject_email);
        if key.is_empty() {
            let err = SyncError::InvalidSubject(subject_email.to_string());
            warn!(subject = subject_email, "subject sanitizes to an empty key");
            self.fail_view(&err);
            return Err(err);
        }

        let mut session = Session::open(subject_email, StudentKey(key), &self.config);
        let ctx = Context {
            store: &*self.store,
            config: &self.config,
        };
        session.start(&ctx);
        let epoch = session.begin_refresh(RefreshReason::Initial, &ctx);
        self.hooks.on_refresh(RefreshReason::Initial, epoch);

        info!(subject = subject_email, student = %session.student, "mounted enrollment view");
        self.session = Some(session);
        self.publish_view(true);
        Ok(())
    }

    /// Tear down the current subject and mount another.
    pub fn switch_subject(&mut self, subject_email: &str, caller: &CallerIdentity) -> Result<()> {
        if let Some(session) = &self.session {
            debug!(from = %session.subject_email, to = subject_email, "switching subject");
        }
        self.mount(subject_email, caller)
    }

    /// Stop everything. The last published view stays as it was.
    ///
    /// Callbacks still in flight are discarded when they fire.
    pub fn teardown(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.teardown(&*self.store);
            info!(subject = %session.subject_email, "enrollment view torn down");
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.session.is_some()
    }

    // --- Event loop ---

    /// Apply every queued message. Returns how many were applied.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        loop {
            let Some(session) = self.session.as_mut() else {
                break;
            };
            let Ok(message) = session.inbox.try_recv() else {
                break;
            };
            let label = message.label();
            if !session.liveness.is_alive() {
                self.hooks.on_discard(&label);
                continue;
            }
            self.hooks.on_message(&label);

            let ctx = Context {
                store: &*self.store,
                config: &self.config,
            };
            let effect = session.handle(message, &ctx);
            applied += 1;

            if let Some(reason) = effect.refresh {
                self.start_refresh(reason);
            }
            if effect.publish {
                self.publish_view(false);
            }
        }
        applied
    }

    /// Messages waiting to be applied.
    pub fn pending_messages(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.inbox.len())
    }

    /// Re-read enrollment, active notifications and required courses.
    ///
    /// Returns the new refresh epoch. Results of older epochs still in
    /// flight are discarded.
    pub fn forced_refresh(&mut self) -> Result<u64> {
        self.start_refresh(RefreshReason::Manual)
            .ok_or(SyncError::NotMounted)
    }

    fn start_refresh(&mut self, reason: RefreshReason) -> Option<u64> {
        let session = self.session.as_mut()?;
        if !session.liveness.is_alive() {
            return None;
        }
        let ctx = Context {
            store: &*self.store,
            config: &self.config,
        };
        let epoch = session.begin_refresh(reason, &ctx);
        self.hooks.on_refresh(reason, epoch);
        Some(epoch)
    }

    /// Current refresh epoch (0 when unmounted).
    pub fn refresh_epoch(&self) -> u64 {
        self.session.as_ref().map_or(0, |s| s.refresh.epoch())
    }

    // --- Notifications ---

    /// Mark a notification seen for this session and tell the backend.
    pub fn mark_notification_seen(&mut self, notification_id: &str) -> Result<()> {
        let session = self.session.as_mut().ok_or(SyncError::NotMounted)?;
        session.seen.insert(notification_id.to_string());
        session.deps.mark(Dependency::Notifications);

        let request = SurveyRequest {
            operation: SurveyOperation::MarkSeen,
            notification_id: notification_id.to_string(),
            course_ids: session.enrolled_ids(),
            user_email: session.subject_email.clone(),
            student_name: self.view.profile.as_ref().and_then(|p| p.display_name()),
            answers: None,
        };
        session.dispatch_rpc(&*self.collaborators.rpc, request);
        self.publish_view(false);
        Ok(())
    }

    /// Submit survey answers for a notification on one course.
    pub fn submit_survey_response(
        &mut self,
        notification_id: &str,
        course_id: &CourseId,
        answers: Value,
    ) -> Result<()> {
        let session = self.session.as_mut().ok_or(SyncError::NotMounted)?;
        session.seen.insert(notification_id.to_string());
        session.deps.mark(Dependency::Notifications);

        let request = SurveyRequest {
            operation: SurveyOperation::Submit,
            notification_id: notification_id.to_string(),
            course_ids: vec![course_id.clone()],
            user_email: session.subject_email.clone(),
            student_name: self.view.profile.as_ref().and_then(|p| p.display_name()),
            answers: Some(answers),
        };
        session.dispatch_rpc(&*self.collaborators.rpc, request);
        self.publish_view(false);
        Ok(())
    }

    // --- View ---

    /// The last published view.
    pub fn view(&self) -> &EnrollmentView {
        &self.view
    }

    /// Register an observer called after every publish.
    pub fn observe(&mut self, observer: impl FnMut(&EnrollmentView) + 'static) -> ObserverId {
        self.observers.add(observer)
    }

    pub fn unobserve(&mut self, id: ObserverId) -> bool {
        self.observers.remove(id)
    }

    /// Listener registry of the mounted session.
    pub fn registry(&self) -> Option<&ListenerRegistry> {
        self.session.as_ref().map(|s| s.lifecycle.registry())
    }

    /// Course ids with a live accumulator.
    pub fn tracked_courses(&self) -> Vec<CourseId> {
        self.session
            .as_ref()
            .map(|s| s.tracked_courses())
            .unwrap_or_default()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn publish_view(&mut self, force: bool) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.recompute(&self.config, &*self.collaborators.annotator);
        let view = session.view();
        if !force && view == self.view {
            return;
        }
        self.view = view;
        self.hooks.on_publish(&self.view);
        self.observers.notify(&self.view);
    }

    fn fail_view(&mut self, err: &SyncError) {
        self.view.loading = false;
        self.view.error = Some(err.to_string());
        self.hooks.on_publish(&self.view);
        self.observers.notify(&self.view);
    }
}

impl Drop for EnrollmentEngine {
    fn drop(&mut self) {
        self.teardown();
    }
}
