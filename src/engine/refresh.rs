//! Forced-refresh and payment read bookkeeping.

use crate::error::RemoteError;
use crate::hooks::RefreshReason;
use crate::mailbox::ReadRequest;
use crate::types::CourseId;
use serde_json::Value;
use std::collections::HashMap;

pub(crate) type ReadResult = Result<Option<Value>, RemoteError>;

/// The three reads of one forced refresh.
#[derive(Debug)]
pub(crate) struct RefreshJoin {
    pub epoch: u64,
    pub reason: RefreshReason,
    enrollment: Option<ReadResult>,
    notifications: Option<ReadResult>,
    required: Option<ReadResult>,
}

/// Results of a completed refresh.
#[derive(Debug)]
pub(crate) struct RefreshResults {
    pub epoch: u64,
    pub reason: RefreshReason,
    pub enrollment: ReadResult,
    pub notifications: ReadResult,
    pub required: ReadResult,
}

impl RefreshJoin {
    fn new(epoch: u64, reason: RefreshReason) -> Self {
        Self {
            epoch,
            reason,
            enrollment: None,
            notifications: None,
            required: None,
        }
    }

    fn record(&mut self, request: &ReadRequest, result: ReadResult) {
        match request {
            ReadRequest::Enrollment { .. } => self.enrollment = Some(result),
            ReadRequest::ActiveNotifications { .. } => self.notifications = Some(result),
            ReadRequest::RequiredCourses { .. } => self.required = Some(result),
            _ => {}
        }
    }

    fn is_complete(&self) -> bool {
        self.enrollment.is_some() && self.notifications.is_some() && self.required.is_some()
    }

    fn into_results(self) -> Option<RefreshResults> {
        Some(RefreshResults {
            epoch: self.epoch,
            reason: self.reason,
            enrollment: self.enrollment?,
            notifications: self.notifications?,
            required: self.required?,
        })
    }
}

/// Outcome of recording one refresh read.
#[derive(Debug)]
pub(crate) enum RefreshProgress {
    /// The read belongs to a superseded (or unknown) epoch.
    Stale,
    Pending,
    Complete(RefreshResults),
}

/// Tracks the current refresh epoch and at most one in-flight refresh.
#[derive(Debug, Default)]
pub(crate) struct RefreshController {
    epoch: u64,
    in_flight: Option<RefreshJoin>,
    queued: bool,
}

impl RefreshController {
    /// Start a new epoch. Any in-flight refresh is superseded.
    pub fn begin(&mut self, reason: RefreshReason) -> u64 {
        self.epoch += 1;
        self.in_flight = Some(RefreshJoin::new(self.epoch, reason));
        self.queued = false;
        self.epoch
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Ask for one follow-up check after the in-flight refresh.
    pub fn queue(&mut self) {
        self.queued = true;
    }

    pub fn take_queued(&mut self) -> bool {
        std::mem::take(&mut self.queued)
    }

    pub fn record(&mut self, request: &ReadRequest, result: ReadResult) -> RefreshProgress {
        let epoch = match request {
            ReadRequest::Enrollment { epoch }
            | ReadRequest::ActiveNotifications { epoch }
            | ReadRequest::RequiredCourses { epoch } => *epoch,
            _ => return RefreshProgress::Stale,
        };

        let Some(join) = self.in_flight.as_mut().filter(|j| j.epoch == epoch) else {
            return RefreshProgress::Stale;
        };
        join.record(request, result);
        if !join.is_complete() {
            return RefreshProgress::Pending;
        }

        match self.in_flight.take().and_then(RefreshJoin::into_results) {
            Some(results) => RefreshProgress::Complete(results),
            None => RefreshProgress::Pending,
        }
    }
}

/// Which half of a payment read pair completed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PaymentPart {
    Status,
    Details,
}

#[derive(Debug, Default)]
struct PaymentJoin {
    status: Option<Option<Value>>,
    details: Option<Option<Value>>,
}

/// Pending status/details read pairs, keyed by (epoch, course).
#[derive(Debug, Default)]
pub(crate) struct PaymentReads {
    pending: HashMap<(u64, CourseId), PaymentJoin>,
}

impl PaymentReads {
    pub fn expect(&mut self, epoch: u64, course: &CourseId) {
        self.pending.insert((epoch, course.clone()), PaymentJoin::default());
    }

    /// Record one half. Returns `(status, details)` once both arrived.
    pub fn record(
        &mut self,
        epoch: u64,
        course: &CourseId,
        part: PaymentPart,
        value: Option<Value>,
    ) -> Option<(Option<Value>, Option<Value>)> {
        let key = (epoch, course.clone());
        let join = self.pending.get_mut(&key)?;
        match part {
            PaymentPart::Status => join.status = Some(value),
            PaymentPart::Details => join.details = Some(value),
        }
        if join.status.is_none() || join.details.is_none() {
            return None;
        }
        let join = self.pending.remove(&key)?;
        Some((join.status.flatten(), join.details.flatten()))
    }

    pub fn forget_course(&mut self, course: &CourseId) {
        self.pending.retain(|(_, id), _| id != course);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}
