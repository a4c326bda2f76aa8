//! Engine mailbox: the single logical event loop.
//!
//! Remote callbacks never touch engine state. They post a typed [`Message`]
//! into the session mailbox, and the engine applies queued messages in
//! delivery order when it is pumped. The [`Liveness`] flag is checked both
//! when posting and when applying, so callbacks that fire after teardown are
//! discarded without side effects.

use crate::error::RemoteError;
use crate::types::CourseId;
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Which standing subscription produced a snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Source {
    Profile,
    ImportantDates,
    Notifications,
    Membership,
    Field { course: CourseId, path: String },
    Catalog(CourseId),
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Profile => write!(f, "profile"),
            Source::ImportantDates => write!(f, "important-dates"),
            Source::Notifications => write!(f, "notifications"),
            Source::Membership => write!(f, "membership"),
            Source::Field { course, path } => write!(f, "field {}/{}", course, path),
            Source::Catalog(course) => write!(f, "catalog {}", course),
        }
    }
}

/// Which one-shot read completed.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ReadRequest {
    Enrollment { epoch: u64 },
    ActiveNotifications { epoch: u64 },
    RequiredCourses { epoch: u64 },
    PaymentStatus { epoch: u64, course: CourseId },
    PaymentDetails { epoch: u64, course: CourseId },
    Staff(String),
}

impl fmt::Display for ReadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadRequest::Enrollment { epoch } => write!(f, "enrollment#{}", epoch),
            ReadRequest::ActiveNotifications { epoch } => write!(f, "notifications#{}", epoch),
            ReadRequest::RequiredCourses { epoch } => write!(f, "required-courses#{}", epoch),
            ReadRequest::PaymentStatus { epoch, course } => {
                write!(f, "payment-status {}#{}", course, epoch)
            }
            ReadRequest::PaymentDetails { epoch, course } => {
                write!(f, "payment-details {}#{}", course, epoch)
            }
            ReadRequest::Staff(key) => write!(f, "staff {}", key),
        }
    }
}

/// Work queued for the engine.
#[derive(Clone, Debug)]
pub enum Message {
    Snapshot {
        source: Source,
        value: Option<Value>,
    },
    SourceFailed {
        source: Source,
        error: RemoteError,
    },
    ReadCompleted {
        request: ReadRequest,
        result: Result<Option<Value>, RemoteError>,
    },
    RpcCompleted {
        operation: String,
        notification_id: String,
        result: Result<Value, String>,
    },
}

impl Message {
    /// Short label for logs and debug hooks.
    pub fn label(&self) -> String {
        match self {
            Message::Snapshot { source, .. } => format!("snapshot {}", source),
            Message::SourceFailed { source, .. } => format!("failed {}", source),
            Message::ReadCompleted { request, .. } => format!("read {}", request),
            Message::RpcCompleted { operation, .. } => format!("rpc {}", operation),
        }
    }
}

/// Session liveness flag. Cleared once, at the start of teardown.
#[derive(Clone, Debug)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    pub fn new() -> Self {
        Liveness(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn kill(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

/// Sending half of a session mailbox. Cheap to clone into callbacks.
#[derive(Clone, Debug)]
pub struct Mailbox {
    sender: Sender<Message>,
    liveness: Liveness,
}

impl Mailbox {
    /// Create a mailbox bound to `liveness` and its receiving half.
    pub fn channel(liveness: Liveness) -> (Self, Receiver<Message>) {
        let (sender, receiver) = unbounded();
        (Self { sender, liveness }, receiver)
    }

    /// Queue a message. Returns false if the session is dead or gone.
    pub fn post(&self, message: Message) -> bool {
        if !self.liveness.is_alive() {
            return false;
        }
        self.sender.send(message).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_after_kill_is_dropped() {
        let liveness = Liveness::new();
        let (mailbox, inbox) = Mailbox::channel(liveness.clone());

        assert!(mailbox.post(Message::Snapshot {
            source: Source::Profile,
            value: None,
        }));
        liveness.kill();
        assert!(!mailbox.post(Message::Snapshot {
            source: Source::Profile,
            value: None,
        }));

        assert_eq!(inbox.try_iter().count(), 1);
    }

    #[test]
    fn test_post_after_receiver_dropped() {
        let (mailbox, inbox) = Mailbox::channel(Liveness::new());
        drop(inbox);
        assert!(!mailbox.post(Message::RpcCompleted {
            operation: "mark_seen".into(),
            notification_id: "n1".into(),
            result: Ok(Value::Null),
        }));
    }

    #[test]
    fn test_labels() {
        let message = Message::ReadCompleted {
            request: ReadRequest::PaymentStatus {
                epoch: 2,
                course: CourseId::new("89"),
            },
            result: Ok(None),
        };
        assert_eq!(message.label(), "read payment-status 89#2");
    }
}
