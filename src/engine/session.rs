//! Per-subject session state and message handlers.

use crate::accumulator::Accumulators;
use crate::collaborators::{AnnotationOptions, NotificationAnnotator, SurveyRequest, SurveyRpc};
use crate::compose::{annotate_courses, compose_courses, ComposeInput, Dependency, DependencyGraph, StaffDirectory};
use crate::config::EngineConfig;
use crate::error::{RemoteError, SyncError};
use crate::gate::{GateSignal, GateState, LoadingGate};
use crate::hooks::RefreshReason;
use crate::mailbox::{Liveness, Mailbox, Message, ReadRequest, Source};
use crate::remote::{RemoteStore, WatchTarget};
use crate::subscriptions::{enrollment_ids, LifecycleManager, MembershipChange, Subscription};
use crate::types::{
    CourseId, CourseMetadata, CourseView, EnrollmentView, Fields, NotificationRecord, PaymentInfo,
    Profile, RequiredCourseTemplate, StaffMember, StorePath, StudentKey,
};
use crossbeam_channel::Receiver;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, warn};

use super::refresh::{PaymentPart, PaymentReads, RefreshController, RefreshProgress, RefreshResults};

/// Borrowed engine context handed to the handlers.
pub(crate) struct Context<'a> {
    pub store: &'a dyn RemoteStore,
    pub config: &'a EngineConfig,
}

/// What the engine must do after a message was applied.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Effect {
    pub publish: bool,
    pub refresh: Option<RefreshReason>,
}

impl Effect {
    fn none() -> Self {
        Self::default()
    }

    fn publish() -> Self {
        Self {
            publish: true,
            refresh: None,
        }
    }

    fn refresh(reason: RefreshReason) -> Self {
        Self {
            publish: false,
            refresh: Some(reason),
        }
    }
}

/// State of one mounted subject.
pub(crate) struct Session {
    pub subject_email: String,
    pub student: StudentKey,
    pub liveness: Liveness,
    pub mailbox: Mailbox,
    pub inbox: Receiver<Message>,

    pub lifecycle: LifecycleManager,
    globals: Vec<Subscription>,
    pub refresh: RefreshController,
    last_membership: Option<BTreeSet<CourseId>>,

    accumulators: Accumulators,
    base: HashMap<CourseId, Fields>,
    order: Vec<CourseId>,
    catalog: HashMap<CourseId, CourseMetadata>,
    staff: StaffDirectory,
    payments: HashMap<CourseId, PaymentInfo>,
    payment_reads: PaymentReads,
    required: Vec<RequiredCourseTemplate>,

    profile: Option<Profile>,
    profile_exists: bool,
    notifications: Vec<NotificationRecord>,
    important_dates: Option<Fields>,
    /// Failure of a standing subscription. Those never recover.
    source_error: Option<String>,
    /// Failure of the latest refresh. Cleared by the next clean refresh.
    refresh_error: Option<String>,

    pub seen: BTreeSet<String>,
    pub deps: DependencyGraph,
    gate: LoadingGate,
    composed: Vec<CourseView>,
    courses: Vec<CourseView>,
}

impl Session {
    pub fn open(subject_email: &str, student: StudentKey, config: &EngineConfig) -> Self {
        let liveness = Liveness::new();
        let (mailbox, inbox) = Mailbox::channel(liveness.clone());
        let layout = &config.layout;

        let globals = vec![
            Subscription::new(Source::Profile, WatchTarget::Value(layout.profile(&student))),
            Subscription::new(
                Source::ImportantDates,
                WatchTarget::Value(layout.important_dates()),
            ),
            Subscription::new(
                Source::Notifications,
                WatchTarget::ChildrenEqual {
                    path: layout.notifications(),
                    field: config.notification_active_field.clone(),
                    value: Value::Bool(true),
                },
            ),
        ];

        Self {
            subject_email: subject_email.trim().to_string(),
            lifecycle: LifecycleManager::new(student.clone(), config),
            student,
            liveness,
            mailbox,
            inbox,
            globals,
            refresh: RefreshController::default(),
            last_membership: None,
            accumulators: Accumulators::new(),
            base: HashMap::new(),
            order: Vec::new(),
            catalog: HashMap::new(),
            staff: StaffDirectory::new(),
            payments: HashMap::new(),
            payment_reads: PaymentReads::default(),
            required: Vec::new(),
            profile: None,
            profile_exists: false,
            notifications: Vec::new(),
            important_dates: None,
            source_error: None,
            refresh_error: None,
            seen: BTreeSet::new(),
            deps: DependencyGraph::default(),
            gate: LoadingGate::new(),
            composed: Vec::new(),
            courses: Vec::new(),
        }
    }

    /// Open the subject-wide subscriptions and the membership watch.
    pub fn start(&mut self, ctx: &Context<'_>) {
        for sub in &mut self.globals {
            sub.start(ctx.store, &self.mailbox);
        }
        self.lifecycle.watch_membership(ctx.store, &self.mailbox);
    }

    /// Kill the session, close every subscription and drop queued work.
    pub fn teardown(&mut self, store: &dyn RemoteStore) {
        self.liveness.kill();
        self.lifecycle.close_all(store);
        for sub in &mut self.globals {
            sub.stop(store);
        }
        self.accumulators.clear();
        let discarded = self.inbox.try_iter().count();
        debug!(student = %self.student, discarded, "session torn down");
    }

    // --- Refresh ---

    /// Issue the three reads of a forced refresh under a new epoch.
    pub fn begin_refresh(&mut self, reason: RefreshReason, ctx: &Context<'_>) -> u64 {
        let epoch = self.refresh.begin(reason);
        let config = ctx.config;
        let layout = &config.layout;
        debug!(epoch, reason = %reason, student = %self.student, "forced refresh started");

        self.read(
            ReadRequest::Enrollment { epoch },
            &layout.enrollment(&self.student),
            ctx.store,
        );
        self.query(
            ReadRequest::ActiveNotifications { epoch },
            &layout.notifications(),
            &config.notification_active_field,
            &Value::Bool(true),
            ctx.store,
        );
        self.query(
            ReadRequest::RequiredCourses { epoch },
            &layout.catalog_root(),
            &config.required_flag_field,
            &Value::String(config.required_flag_value.clone()),
            ctx.store,
        );
        epoch
    }

    fn read(&self, request: ReadRequest, path: &StorePath, store: &dyn RemoteStore) {
        let mailbox = self.mailbox.clone();
        store.get(
            path,
            Box::new(move |result: Result<Option<Value>, RemoteError>| {
                mailbox.post(Message::ReadCompleted { request, result });
            }),
        );
    }

    fn query(
        &self,
        request: ReadRequest,
        path: &StorePath,
        field: &str,
        value: &Value,
        store: &dyn RemoteStore,
    ) {
        let mailbox = self.mailbox.clone();
        store.query_equal(
            path,
            field,
            value,
            Box::new(move |result: Result<Option<Value>, RemoteError>| {
                mailbox.post(Message::ReadCompleted { request, result });
            }),
        );
    }

    pub fn dispatch_rpc(&self, rpc: &dyn SurveyRpc, request: SurveyRequest) {
        let mailbox = self.mailbox.clone();
        let operation = request.operation.as_str().to_string();
        let notification_id = request.notification_id.clone();
        rpc.submit_notification_survey(
            request,
            Box::new(move |result: Result<Value, String>| {
                mailbox.post(Message::RpcCompleted {
                    operation,
                    notification_id,
                    result,
                });
            }),
        );
    }

    // --- Message handlers ---

    pub fn handle(&mut self, message: Message, ctx: &Context<'_>) -> Effect {
        match message {
            Message::Snapshot { source, value } => self.on_snapshot(source, value, ctx),
            Message::SourceFailed { source, error } => self.on_source_failed(source, error),
            Message::ReadCompleted { request, result } => self.on_read(request, result, ctx),
            Message::RpcCompleted {
                operation,
                notification_id,
                result,
            } => {
                match result {
                    Ok(_) => {
                        info!(operation = %operation, notification = %notification_id, "survey rpc completed");
                    }
                    Err(err) => {
                        warn!(operation = %operation, notification = %notification_id, error = %err, "survey rpc failed");
                    }
                }
                Effect::none()
            }
        }
    }

    fn on_snapshot(&mut self, source: Source, value: Option<Value>, ctx: &Context<'_>) -> Effect {
        match source {
            Source::Profile => {
                self.profile_exists = value.is_some();
                self.profile = value.as_ref().and_then(Profile::from_value);
                self.deps.mark(Dependency::Profile);
                self.mark_gate(GateSignal::Profile);
                Effect::publish()
            }
            Source::ImportantDates => {
                self.important_dates = value.and_then(|v| v.as_object().cloned());
                self.mark_gate(GateSignal::Dates);
                Effect::publish()
            }
            Source::Notifications => {
                self.notifications = NotificationRecord::list_from_children(value.as_ref());
                self.deps.mark(Dependency::Notifications);
                self.mark_gate(GateSignal::Notifications);
                Effect::publish()
            }
            Source::Membership => self.on_membership(value, ctx),
            Source::Field { course, path } => {
                match self.accumulators.apply_field_update(&course, &path, value) {
                    Ok(true) => {
                        self.deps.mark(Dependency::Courses);
                        Effect::publish()
                    }
                    Ok(false) => Effect::none(),
                    Err(err) => {
                        warn!(error = %err, path = %path, "dropping field update");
                        Effect::none()
                    }
                }
            }
            Source::Catalog(course) => self.on_catalog(course, value, ctx),
        }
    }

    fn on_membership(&mut self, value: Option<Value>, ctx: &Context<'_>) -> Effect {
        let observed = enrollment_ids(value.as_ref(), ctx.config);
        let change = self.lifecycle.membership_change(&observed);
        self.last_membership = Some(observed);

        let Some(change) = change else {
            return Effect::none();
        };
        if self.refresh.is_in_flight() {
            debug!(
                added = change.added.len(),
                removed = change.removed.len(),
                "membership changed during refresh; queued"
            );
            self.refresh.queue();
            return Effect::none();
        }
        Effect::refresh(self.reason_for(&change))
    }

    fn reason_for(&self, change: &MembershipChange) -> RefreshReason {
        if change.added.is_empty() {
            RefreshReason::CourseRemoved
        } else if self.lifecycle.registry().is_empty() {
            RefreshReason::FirstCourse
        } else {
            RefreshReason::CourseAdded
        }
    }

    fn on_catalog(&mut self, course: CourseId, value: Option<Value>, ctx: &Context<'_>) -> Effect {
        if !self.lifecycle.is_tracked(&course) {
            debug!(course = %course, "ignoring catalog snapshot for untracked course");
            return Effect::none();
        }

        match value.as_ref().and_then(CourseMetadata::from_catalog) {
            Some(meta) => {
                for key in &meta.staff_keys {
                    if self.staff.needs_fetch(key) {
                        self.staff.mark_pending(key);
                        self.read(
                            ReadRequest::Staff(key.clone()),
                            &ctx.config.layout.staff(key),
                            ctx.store,
                        );
                    }
                }
                self.catalog.insert(course, meta);
            }
            None => {
                self.catalog.remove(&course);
            }
        }
        self.deps.mark(Dependency::Courses);
        Effect::publish()
    }

    fn on_source_failed(&mut self, source: Source, error: RemoteError) -> Effect {
        warn!(source = %source, error = %error, "source unavailable");
        match source {
            Source::Profile => {
                self.profile = None;
                self.profile_exists = false;
                self.deps.mark(Dependency::Profile);
                self.source_error = Some(SyncError::from(error).to_string());
                self.mark_gate(GateSignal::Profile);
                Effect::publish()
            }
            Source::ImportantDates => {
                self.important_dates = None;
                self.source_error = Some(SyncError::from(error).to_string());
                self.mark_gate(GateSignal::Dates);
                Effect::publish()
            }
            Source::Notifications => {
                self.notifications.clear();
                self.deps.mark(Dependency::Notifications);
                self.source_error = Some(SyncError::from(error).to_string());
                self.mark_gate(GateSignal::Notifications);
                Effect::publish()
            }
            Source::Membership => {
                self.source_error = Some(SyncError::from(error).to_string());
                Effect::publish()
            }
            // Partial course data is preferred over none.
            Source::Field { .. } | Source::Catalog(_) => Effect::none(),
        }
    }

    fn on_read(
        &mut self,
        request: ReadRequest,
        result: Result<Option<Value>, RemoteError>,
        ctx: &Context<'_>,
    ) -> Effect {
        match request {
            ReadRequest::Enrollment { .. }
            | ReadRequest::ActiveNotifications { .. }
            | ReadRequest::RequiredCourses { .. } => match self.refresh.record(&request, result) {
                RefreshProgress::Stale => {
                    debug!(request = %request, "discarding superseded refresh read");
                    Effect::none()
                }
                RefreshProgress::Pending => Effect::none(),
                RefreshProgress::Complete(results) => self.complete_refresh(results, ctx),
            },
            ReadRequest::PaymentStatus { epoch, course } => {
                self.on_payment(epoch, course, PaymentPart::Status, result, ctx)
            }
            ReadRequest::PaymentDetails { epoch, course } => {
                self.on_payment(epoch, course, PaymentPart::Details, result, ctx)
            }
            ReadRequest::Staff(key) => {
                match result {
                    Ok(Some(record)) => self.staff.insert(StaffMember::from_record(&key, &record)),
                    Ok(None) => self.staff.insert(StaffMember::unresolved(key.as_str())),
                    Err(err) => {
                        warn!(staff = %key, error = %err, "staff lookup failed");
                        self.staff.forget_pending(&key);
                        return Effect::none();
                    }
                }
                self.deps.mark(Dependency::Courses);
                Effect::publish()
            }
        }
    }

    fn complete_refresh(&mut self, results: RefreshResults, ctx: &Context<'_>) -> Effect {
        let RefreshResults {
            epoch,
            reason,
            enrollment,
            notifications,
            required,
        } = results;
        let config = ctx.config;
        let mut failed = false;

        let ids = match enrollment {
            Ok(snapshot) => {
                let ids = enrollment_ids(snapshot.as_ref(), config);
                self.order.clear();
                self.base.clear();
                if let Some(children) = snapshot.as_ref().and_then(Value::as_object) {
                    for (key, child) in children {
                        let id = CourseId::new(key.as_str());
                        if !ids.contains(&id) {
                            continue;
                        }
                        self.base
                            .insert(id.clone(), child.as_object().cloned().unwrap_or_default());
                        self.order.push(id);
                    }
                }
                self.order.sort();
                ids
            }
            Err(err) => {
                warn!(epoch, error = %err, "enrollment read failed; keeping current courses");
                self.refresh_error = Some(SyncError::from(err).to_string());
                failed = true;
                self.lifecycle.registry().course_ids()
            }
        };

        match notifications {
            Ok(snapshot) => {
                self.notifications = NotificationRecord::list_from_children(snapshot.as_ref());
                self.deps.mark(Dependency::Notifications);
            }
            Err(err) => {
                warn!(epoch, error = %err, "notification read failed");
                self.refresh_error = Some(SyncError::from(err).to_string());
                failed = true;
            }
        }

        match required {
            Ok(snapshot) => {
                self.required = required_templates(snapshot.as_ref(), config, &self.subject_email);
            }
            Err(err) => {
                warn!(epoch, error = %err, "required course read failed");
                self.refresh_error = Some(SyncError::from(err).to_string());
                failed = true;
            }
        }

        let summary = self
            .lifecycle
            .reconcile(&ids, &mut self.accumulators, ctx.store, &self.mailbox);
        for course in &summary.closed {
            self.base.remove(course);
            self.catalog.remove(course);
            self.payments.remove(course);
            self.payment_reads.forget_course(course);
        }
        for course in &ids {
            self.request_payment(epoch, course, ctx);
        }

        if !failed {
            self.refresh_error = None;
        }
        self.deps.mark(Dependency::Courses);
        self.mark_gate(GateSignal::Courses);
        info!(
            epoch,
            reason = %reason,
            courses = ids.len(),
            opened = summary.opened.len(),
            closed = summary.closed.len(),
            pending_payments = self.payment_reads.len(),
            "forced refresh complete"
        );

        let follow_up = if self.refresh.take_queued() {
            self.last_membership
                .as_ref()
                .and_then(|observed| self.lifecycle.membership_change(observed))
                .map(|change| self.reason_for(&change))
        } else {
            None
        };

        Effect {
            publish: true,
            refresh: follow_up,
        }
    }

    fn request_payment(&mut self, epoch: u64, course: &CourseId, ctx: &Context<'_>) {
        let layout = &ctx.config.layout;
        self.payment_reads.expect(epoch, course);
        self.read(
            ReadRequest::PaymentStatus {
                epoch,
                course: course.clone(),
            },
            &layout.payment_status(&self.student, course),
            ctx.store,
        );
        self.read(
            ReadRequest::PaymentDetails {
                epoch,
                course: course.clone(),
            },
            &layout.payment_details(&self.student, course),
            ctx.store,
        );
    }

    fn on_payment(
        &mut self,
        epoch: u64,
        course: CourseId,
        part: PaymentPart,
        result: Result<Option<Value>, RemoteError>,
        ctx: &Context<'_>,
    ) -> Effect {
        if !self.lifecycle.is_tracked(&course) {
            debug!(course = %course, "ignoring payment read for untracked course");
            return Effect::none();
        }
        let value = result.unwrap_or_else(|err| {
            warn!(course = %course, error = %err, "payment read failed");
            None
        });

        match self.payment_reads.record(epoch, &course, part, value) {
            Some((status, details)) => {
                let info = PaymentInfo::from_reads(
                    status.as_ref(),
                    details,
                    &ctx.config.valid_payment_statuses,
                );
                self.payments.insert(course, info);
                self.deps.mark(Dependency::Courses);
                Effect::publish()
            }
            None => Effect::none(),
        }
    }

    fn mark_gate(&mut self, signal: GateSignal) {
        match self.gate.mark(signal) {
            GateState::Opened => {
                info!(student = %self.student, "initial load complete");
                self.deps.mark_all();
            }
            GateState::AlreadyOpen => self.deps.mark(Dependency::Notifications),
            GateState::Pending => {
                debug!(signal = %signal, outstanding = ?self.gate.outstanding(), "waiting on sources");
            }
        }
    }

    // --- Composition ---

    /// Ids of every enrolled (non-injected) course currently composed.
    pub fn enrolled_ids(&self) -> Vec<CourseId> {
        self.courses
            .iter()
            .filter(|course| !course.is_required_course)
            .map(|course| course.id.clone())
            .collect()
    }

    /// Recompute dirty parts of the course list. Returns true if anything ran.
    pub fn recompute(&mut self, config: &EngineConfig, annotator: &dyn NotificationAnnotator) -> bool {
        if !self.deps.any_dirty() {
            return false;
        }
        if self.deps.is_dirty(Dependency::Courses) {
            self.composed = compose_courses(&ComposeInput {
                order: &self.order,
                accumulators: &self.accumulators,
                base: &self.base,
                catalog: &self.catalog,
                staff: &self.staff,
                payments: &self.payments,
                required: &self.required,
                stripped: &config.stripped_fields,
            });
        }

        self.courses = match (&self.profile, self.gate.is_open()) {
            (Some(profile), true) => {
                let options = AnnotationOptions {
                    actionable: false,
                    seen: self.seen.clone(),
                };
                annotate_courses(
                    annotator,
                    self.composed.clone(),
                    profile,
                    &self.notifications,
                    &options,
                )
            }
            _ => self.composed.clone(),
        };
        self.deps.clear();
        true
    }

    pub fn view(&self) -> EnrollmentView {
        EnrollmentView {
            courses: self.courses.clone(),
            profile: self.profile.clone(),
            loading: self.gate.is_loading(),
            error: self.refresh_error.clone().or_else(|| self.source_error.clone()),
            student_exists: self.profile_exists,
            important_dates: self.important_dates.clone(),
            all_notifications: self.notifications.clone(),
        }
    }

    pub fn tracked_courses(&self) -> Vec<CourseId> {
        self.accumulators.ids()
    }
}

/// Required-course templates visible to `subject_email`.
fn required_templates(
    snapshot: Option<&Value>,
    config: &EngineConfig,
    subject_email: &str,
) -> Vec<RequiredCourseTemplate> {
    let Some(entries) = snapshot.and_then(Value::as_object) else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|(id, entry)| {
            RequiredCourseTemplate::from_catalog_entry(id, entry, &config.required_allow_field)
        })
        .filter(|template| template.is_eligible(subject_email))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_required_templates_filtered_by_allow_list() {
        let config = EngineConfig::default();
        let snapshot = json!({
            "4": {"Active": "Required", "Title": "Orientation"},
            "5": {"Active": "Required", "allowedEmails": ["other@example.com"]},
            "6": {"Active": "Required", "allowedEmails": ["Jane@Example.com"]}
        });

        let templates = required_templates(Some(&snapshot), &config, "jane@example.com");
        let ids: Vec<&str> = templates.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["4", "6"]);
        assert!(required_templates(None, &config, "jane@example.com").is_empty());
    }

    #[test]
    fn test_effect_constructors() {
        assert_eq!(Effect::none(), Effect::default());
        assert!(Effect::publish().publish);
        assert_eq!(
            Effect::refresh(RefreshReason::Manual).refresh,
            Some(RefreshReason::Manual)
        );
    }
}
