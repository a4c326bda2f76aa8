//! View composition.
//!
//! Turns accumulated course state into the ordered `courses` list of the
//! published view: merge, attach catalog metadata and payment, inject
//! required courses, sort, then annotate.

use crate::accumulator::Accumulators;
use crate::collaborators::{AnnotationOptions, NotificationAnnotator};
use crate::types::{
    CourseId, CourseMetadata, CourseView, Fields, NotificationRecord, PaymentInfo, Profile,
    RequiredCourseTemplate, StaffMember,
};
use std::collections::{HashMap, HashSet};

/// Staff records resolved so far, plus keys with a read in flight.
#[derive(Debug, Default)]
pub struct StaffDirectory {
    entries: HashMap<String, StaffMember>,
    pending: HashSet<String>,
}

impl StaffDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `key` is neither resolved nor being read.
    pub fn needs_fetch(&self, key: &str) -> bool {
        !self.entries.contains_key(key) && !self.pending.contains(key)
    }

    pub fn mark_pending(&mut self, key: &str) {
        self.pending.insert(key.to_string());
    }

    /// Drop a pending mark so the key is fetched again later.
    pub fn forget_pending(&mut self, key: &str) {
        self.pending.remove(key);
    }

    pub fn insert(&mut self, member: StaffMember) {
        self.pending.remove(&member.key);
        self.entries.insert(member.key.clone(), member);
    }

    /// Resolved member, or an unresolved placeholder.
    pub fn resolve(&self, key: &str) -> StaffMember {
        self.entries
            .get(key)
            .cloned()
            .unwrap_or_else(|| StaffMember::unresolved(key))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Everything composition reads. All borrowed; composition never mutates.
pub struct ComposeInput<'a> {
    /// Enrollment order from the last snapshot (tie-break for sorting).
    pub order: &'a [CourseId],
    pub accumulators: &'a Accumulators,
    pub base: &'a HashMap<CourseId, Fields>,
    pub catalog: &'a HashMap<CourseId, CourseMetadata>,
    pub staff: &'a StaffDirectory,
    pub payments: &'a HashMap<CourseId, PaymentInfo>,
    pub required: &'a [RequiredCourseTemplate],
    pub stripped: &'a [String],
}

/// Compose the sorted, unannotated course list.
pub fn compose_courses(input: &ComposeInput<'_>) -> Vec<CourseView> {
    let mut courses = Vec::with_capacity(input.accumulators.len() + input.required.len());
    let mut present: HashSet<CourseId> = HashSet::new();

    // Snapshot order first, then anything tracked but not yet in a snapshot.
    let tracked = input.accumulators.ids();
    let ordered = input
        .order
        .iter()
        .chain(tracked.iter().filter(|id| !input.order.contains(id)));

    for id in ordered {
        if present.contains(id) {
            continue;
        }
        let Some(fields) = input
            .accumulators
            .merge_course(id, input.base.get(id), input.stripped)
        else {
            continue;
        };
        present.insert(id.clone());

        courses.push(CourseView {
            id: id.clone(),
            fields,
            course_details: input
                .catalog
                .get(id)
                .map(|meta| with_staff(meta.clone(), input.staff)),
            payment: input.payments.get(id).cloned().unwrap_or_default(),
            is_required_course: false,
            notifications: Vec::new(),
        });
    }

    for template in input.required {
        if !present.insert(template.id.clone()) {
            continue;
        }
        let mut view = template.to_course_view();
        view.course_details = view.course_details.map(|meta| with_staff(meta, input.staff));
        courses.push(view);
    }

    sort_by_created_desc(&mut courses);
    courses
}

fn with_staff(mut meta: CourseMetadata, staff: &StaffDirectory) -> CourseMetadata {
    meta.staff = meta.staff_keys.iter().map(|key| staff.resolve(key)).collect();
    meta
}

/// Stable sort, newest `Created` first.
pub fn sort_by_created_desc(courses: &mut [CourseView]) {
    courses.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
}

/// Run the annotator and restore the sort order.
pub fn annotate_courses(
    annotator: &dyn NotificationAnnotator,
    courses: Vec<CourseView>,
    profile: &Profile,
    notifications: &[NotificationRecord],
    options: &AnnotationOptions,
) -> Vec<CourseView> {
    let mut annotated = annotator.annotate(courses, profile, notifications, options);
    sort_by_created_desc(&mut annotated);
    annotated
}

/// Inputs the annotation pass depends on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dependency {
    Courses,
    Profile,
    Notifications,
}

/// Dirty flags for the annotation pass.
///
/// A change to any node marks it dirty; the next publish recomputes what
/// depends on the dirty nodes and clears them.
#[derive(Clone, Debug, Default)]
pub struct DependencyGraph {
    courses: bool,
    profile: bool,
    notifications: bool,
}

impl DependencyGraph {
    pub fn mark(&mut self, dependency: Dependency) {
        match dependency {
            Dependency::Courses => self.courses = true,
            Dependency::Profile => self.profile = true,
            Dependency::Notifications => self.notifications = true,
        }
    }

    pub fn mark_all(&mut self) {
        self.courses = true;
        self.profile = true;
        self.notifications = true;
    }

    pub fn is_dirty(&self, dependency: Dependency) -> bool {
        match dependency {
            Dependency::Courses => self.courses,
            Dependency::Profile => self.profile,
            Dependency::Notifications => self.notifications,
        }
    }

    pub fn any_dirty(&self) -> bool {
        self.courses || self.profile || self.notifications
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
