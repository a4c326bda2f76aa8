//! View observers and injectable debug hooks.
//!
//! Both are scoped to one engine instance.

use crate::types::EnrollmentView;
use std::fmt;

/// Why a forced refresh started.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshReason {
    /// Initial load at mount.
    Initial,
    /// Explicit operator or caller request.
    Manual,
    /// The membership watch saw the first course of an empty enrollment.
    FirstCourse,
    /// The membership watch saw a course id the registry does not track.
    CourseAdded,
    /// A tracked course id disappeared from the membership watch.
    CourseRemoved,
}

impl fmt::Display for RefreshReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RefreshReason::Initial => "initial",
            RefreshReason::Manual => "manual",
            RefreshReason::FirstCourse => "first-course",
            RefreshReason::CourseAdded => "course-added",
            RefreshReason::CourseRemoved => "course-removed",
        };
        f.write_str(name)
    }
}

/// Debug hooks. Every method defaults to a no-op.
pub trait EngineHooks {
    /// A queued message is about to be applied.
    fn on_message(&self, _label: &str) {}

    /// A message was discarded because its session is dead.
    fn on_discard(&self, _label: &str) {}

    /// A forced refresh started.
    fn on_refresh(&self, _reason: RefreshReason, _epoch: u64) {}

    /// A new view was published.
    fn on_publish(&self, _view: &EnrollmentView) {}
}

/// Hooks that do nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHooks;

impl EngineHooks for NoHooks {}

/// Identifier returned by [`Observers::add`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(pub u64);

type Observer = Box<dyn FnMut(&EnrollmentView)>;

/// Observers notified after every publish, in registration order.
#[derive(Default)]
pub struct Observers {
    list: Vec<(ObserverId, Observer)>,
    next_id: u64,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, observer: impl FnMut(&EnrollmentView) + 'static) -> ObserverId {
        self.next_id += 1;
        let id = ObserverId(self.next_id);
        self.list.push((id, Box::new(observer)));
        id
    }

    pub fn remove(&mut self, id: ObserverId) -> bool {
        let before = self.list.len();
        self.list.retain(|(existing, _)| *existing != id);
        self.list.len() != before
    }

    pub fn notify(&mut self, view: &EnrollmentView) {
        for (_, observer) in self.list.iter_mut() {
            observer(view);
        }
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("count", &self.list.len())
            .finish()
    }
}
