//! Subscription lifecycle manager.
//!
//! Owns the listener registry: one set of field subscriptions plus one
//! catalog subscription per enrolled course, and the standing membership
//! watch on the enrollment parent node.

use crate::accumulator::Accumulators;
use crate::config::{EngineConfig, PathLayout};
use crate::mailbox::{Mailbox, Source};
use crate::remote::{RemoteStore, WatchTarget};
use crate::types::{CourseId, StorePath, StudentKey};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

use super::types::Subscription;

/// Subscriptions held for one enrolled course.
#[derive(Debug)]
struct CourseListeners {
    fields: Vec<Subscription>,
    catalog: Subscription,
}

impl CourseListeners {
    fn stop(&mut self, store: &dyn RemoteStore) {
        for sub in &mut self.fields {
            sub.stop(store);
        }
        self.catalog.stop(store);
    }
}

/// Open subscriptions keyed by course id.
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    courses: HashMap<CourseId, CourseListeners>,
    membership: Option<Subscription>,
}

impl ListenerRegistry {
    pub fn course_ids(&self) -> BTreeSet<CourseId> {
        self.courses.keys().cloned().collect()
    }

    pub fn contains(&self, course: &CourseId) -> bool {
        self.courses.contains_key(course)
    }

    pub fn len(&self) -> usize {
        self.courses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.courses.is_empty()
    }

    /// Field paths subscribed for a course.
    pub fn field_paths(&self, course: &CourseId) -> Vec<String> {
        self.courses
            .get(course)
            .map(|listeners| {
                listeners
                    .fields
                    .iter()
                    .filter_map(|sub| match sub.source() {
                        Source::Field { path, .. } => Some(path.clone()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Active subscriptions, membership watch included.
    pub fn subscription_count(&self) -> usize {
        let per_course: usize = self
            .courses
            .values()
            .map(|l| l.fields.iter().filter(|s| s.is_active()).count() + l.catalog.is_active() as usize)
            .sum();
        let membership = self.membership.as_ref().map_or(0, |m| m.is_active() as usize);
        per_course + membership
    }

    /// True if any (course, path) pair is watched more than once.
    pub fn has_duplicates(&self) -> bool {
        let mut seen = HashSet::new();
        for listeners in self.courses.values() {
            for sub in listeners.fields.iter().chain(std::iter::once(&listeners.catalog)) {
                if !seen.insert(sub.target().path().clone()) {
                    return true;
                }
            }
        }
        false
    }
}

/// Outcome of a reconciliation pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub opened: Vec<CourseId>,
    pub closed: Vec<CourseId>,
}

impl ReconcileSummary {
    pub fn is_empty(&self) -> bool {
        self.opened.is_empty() && self.closed.is_empty()
    }
}

/// Difference between observed membership and the registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MembershipChange {
    pub added: Vec<CourseId>,
    pub removed: Vec<CourseId>,
}

/// Keeps the registry equal to the current enrollment id set.
#[derive(Debug)]
pub struct LifecycleManager {
    registry: ListenerRegistry,
    student: StudentKey,
    field_paths: Vec<String>,
    layout: PathLayout,
}

impl LifecycleManager {
    pub fn new(student: StudentKey, config: &EngineConfig) -> Self {
        let mut seen = HashSet::new();
        let field_paths = config
            .field_paths
            .iter()
            .map(|p| StorePath::new(p).as_str().to_string())
            .filter(|p| !p.is_empty() && seen.insert(p.clone()))
            .collect();

        Self {
            registry: ListenerRegistry::default(),
            student,
            field_paths,
            layout: config.layout.clone(),
        }
    }

    pub fn registry(&self) -> &ListenerRegistry {
        &self.registry
    }

    pub fn is_tracked(&self, course: &CourseId) -> bool {
        self.registry.contains(course)
    }

    /// Open listeners for new ids and close listeners for departed ones.
    ///
    /// Courses already in the registry are left untouched, so a reconcile
    /// never duplicates a subscription.
    pub fn reconcile(
        &mut self,
        current: &BTreeSet<CourseId>,
        accumulators: &mut Accumulators,
        store: &dyn RemoteStore,
        mailbox: &Mailbox,
    ) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();

        let departed: Vec<CourseId> = self
            .registry
            .courses
            .keys()
            .filter(|id| !current.contains(*id))
            .cloned()
            .collect();
        for course in departed {
            if let Some(mut listeners) = self.registry.courses.remove(&course) {
                listeners.stop(store);
            }
            accumulators.remove(&course);
            debug!(course = %course, "closed course listeners");
            summary.closed.push(course);
        }

        for course in current {
            if self.registry.contains(course) {
                continue;
            }
            accumulators.seed(course);
            let listeners = self.open_course(course, store, mailbox);
            self.registry.courses.insert(course.clone(), listeners);
            debug!(course = %course, fields = self.field_paths.len(), "opened course listeners");
            summary.opened.push(course.clone());
        }

        summary
    }

    fn open_course(&self, course: &CourseId, store: &dyn RemoteStore, mailbox: &Mailbox) -> CourseListeners {
        let fields = self
            .field_paths
            .iter()
            .map(|path| {
                let mut sub = Subscription::new(
                    Source::Field {
                        course: course.clone(),
                        path: path.clone(),
                    },
                    WatchTarget::Value(self.layout.course_field(&self.student, course, path)),
                );
                sub.start(store, mailbox);
                sub
            })
            .collect();

        let mut catalog = Subscription::new(
            Source::Catalog(course.clone()),
            WatchTarget::Value(self.layout.catalog(course)),
        );
        catalog.start(store, mailbox);

        CourseListeners { fields, catalog }
    }

    /// Start the standing watch on the enrollment parent's child keys.
    pub fn watch_membership(&mut self, store: &dyn RemoteStore, mailbox: &Mailbox) {
        let membership = self.registry.membership.get_or_insert_with(|| {
            Subscription::new(
                Source::Membership,
                WatchTarget::ChildKeys(self.layout.enrollment(&self.student)),
            )
        });
        membership.start(store, mailbox);
    }

    /// Compare observed ids with the registry.
    pub fn membership_change(&self, observed: &BTreeSet<CourseId>) -> Option<MembershipChange> {
        let added: Vec<CourseId> = observed
            .iter()
            .filter(|id| !self.registry.contains(id))
            .cloned()
            .collect();
        let removed: Vec<CourseId> = self
            .registry
            .course_ids()
            .into_iter()
            .filter(|id| !observed.contains(id))
            .collect();

        if added.is_empty() && removed.is_empty() {
            None
        } else {
            Some(MembershipChange { added, removed })
        }
    }

    /// Close every subscription, membership watch included.
    pub fn close_all(&mut self, store: &dyn RemoteStore) {
        for (_, mut listeners) in self.registry.courses.drain() {
            listeners.stop(store);
        }
        if let Some(mut membership) = self.registry.membership.take() {
            membership.stop(store);
        }
    }
}

/// Course ids from an enrollment snapshot, minus reserved keys.
///
/// Accepts either the enrollment object itself or a list of child keys.
pub fn enrollment_ids(value: Option<&Value>, config: &EngineConfig) -> BTreeSet<CourseId> {
    let keep = |key: &str| !key.is_empty() && !config.is_reserved_key(key);
    match value {
        Some(Value::Object(children)) => children
            .keys()
            .filter(|k| keep(k.as_str()))
            .map(|k| CourseId::new(k.as_str()))
            .collect(),
        Some(Value::Array(keys)) => keys
            .iter()
            .filter_map(Value::as_str)
            .filter(|k| keep(*k))
            .map(CourseId::new)
            .collect(),
        _ => BTreeSet::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::Liveness;
    use crate::remote::MemoryStore;
    use serde_json::json;

    fn ids(list: &[&str]) -> BTreeSet<CourseId> {
        list.iter().map(|s| CourseId::new(*s)).collect()
    }

    fn manager() -> (LifecycleManager, EngineConfig) {
        let config = EngineConfig::default();
        (
            LifecycleManager::new(StudentKey("a".to_string()), &config),
            config,
        )
    }

    #[test]
    fn test_reconcile_opens_and_closes() {
        let store = MemoryStore::new();
        let (mailbox, _inbox) = Mailbox::channel(Liveness::new());
        let (mut lifecycle, config) = manager();
        let mut acc = Accumulators::new();
        let per_course = config.field_paths.len() + 1;

        let summary = lifecycle.reconcile(&ids(&["1", "2"]), &mut acc, &store, &mailbox);
        assert_eq!(summary.opened, vec![CourseId::new("1"), CourseId::new("2")]);
        assert_eq!(store.subscription_count(), 2 * per_course);
        assert_eq!(acc.len(), 2);

        let summary = lifecycle.reconcile(&ids(&["2", "3"]), &mut acc, &store, &mailbox);
        assert_eq!(summary.opened, vec![CourseId::new("3")]);
        assert_eq!(summary.closed, vec![CourseId::new("1")]);
        assert_eq!(store.subscription_count(), 2 * per_course);
        assert!(!acc.contains(&CourseId::new("1")));
        assert_eq!(lifecycle.registry().course_ids(), ids(&["2", "3"]));
    }

    #[test]
    fn test_reconcile_same_set_is_noop() {
        let store = MemoryStore::new();
        let (mailbox, _inbox) = Mailbox::channel(Liveness::new());
        let (mut lifecycle, _) = manager();
        let mut acc = Accumulators::new();

        lifecycle.reconcile(&ids(&["1"]), &mut acc, &store, &mailbox);
        let before = store.subscription_count();
        let summary = lifecycle.reconcile(&ids(&["1"]), &mut acc, &store, &mailbox);

        assert!(summary.is_empty());
        assert_eq!(store.subscription_count(), before);
        assert!(!lifecycle.registry().has_duplicates());
    }

    #[test]
    fn test_membership_change_and_close_all() {
        let store = MemoryStore::new();
        let (mailbox, _inbox) = Mailbox::channel(Liveness::new());
        let (mut lifecycle, _) = manager();
        let mut acc = Accumulators::new();

        lifecycle.reconcile(&ids(&["1"]), &mut acc, &store, &mailbox);
        lifecycle.watch_membership(&store, &mailbox);
        lifecycle.watch_membership(&store, &mailbox);

        assert_eq!(lifecycle.membership_change(&ids(&["1"])), None);
        let change = lifecycle.membership_change(&ids(&["2"])).unwrap();
        assert_eq!(change.added, vec![CourseId::new("2")]);
        assert_eq!(change.removed, vec![CourseId::new("1")]);

        lifecycle.close_all(&store);
        assert_eq!(store.subscription_count(), 0);
        assert_eq!(lifecycle.registry().subscription_count(), 0);
    }

    #[test]
    fn test_enrollment_ids_skip_reserved() {
        let config = EngineConfig::default();
        let snapshot = json!({"89": {}, "sections": {}, "normalizedSchedule": {}, "100": {}});
        assert_eq!(enrollment_ids(Some(&snapshot), &config), ids(&["100", "89"]));

        let keys = json!(["89", "sections"]);
        assert_eq!(enrollment_ids(Some(&keys), &config), ids(&["89"]));
        assert!(enrollment_ids(None, &config).is_empty());
    }
}
