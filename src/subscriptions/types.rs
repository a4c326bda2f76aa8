//! Subscription handle bound to the engine mailbox.

use crate::error::RemoteError;
use crate::mailbox::{Mailbox, Message, Source};
use crate::remote::{RemoteStore, SubscriptionId, WatchTarget};
use serde_json::Value;

/// One standing subscription.
///
/// `start` opens the remote watch and routes every delivery into the
/// mailbox as a [`Message`] tagged with this subscription's [`Source`];
/// `stop` closes it. Both are idempotent.
#[derive(Debug)]
pub struct Subscription {
    source: Source,
    target: WatchTarget,
    id: Option<SubscriptionId>,
}

impl Subscription {
    pub fn new(source: Source, target: WatchTarget) -> Self {
        Self {
            source,
            target,
            id: None,
        }
    }

    pub fn start(&mut self, store: &dyn RemoteStore, mailbox: &Mailbox) {
        if self.id.is_some() {
            return;
        }

        let changes = mailbox.clone();
        let change_source = self.source.clone();
        let errors = mailbox.clone();
        let error_source = self.source.clone();

        let id = store.subscribe(
            &self.target,
            Box::new(move |value: Option<Value>| {
                changes.post(Message::Snapshot {
                    source: change_source.clone(),
                    value,
                });
            }),
            Box::new(move |error: RemoteError| {
                errors.post(Message::SourceFailed {
                    source: error_source.clone(),
                    error,
                });
            }),
        );
        self.id = Some(id);
    }

    pub fn stop(&mut self, store: &dyn RemoteStore) {
        if let Some(id) = self.id.take() {
            store.unsubscribe(id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.id.is_some()
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn target(&self) -> &WatchTarget {
        &self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::Liveness;
    use crate::remote::MemoryStore;
    use crate::types::StorePath;
    use serde_json::json;

    #[test]
    fn test_start_stop_idempotent() {
        let store = MemoryStore::new();
        let (mailbox, inbox) = Mailbox::channel(Liveness::new());
        let mut sub = Subscription::new(
            Source::Profile,
            WatchTarget::Value(StorePath::new("students/a/profile")),
        );

        sub.start(&store, &mailbox);
        sub.start(&store, &mailbox);
        assert_eq!(store.subscription_count(), 1);
        assert!(sub.is_active());

        store.set(&StorePath::new("students/a/profile"), json!({"firstName": "Ada"}));
        let messages: Vec<_> = inbox.try_iter().collect();
        assert_eq!(messages.len(), 2);
        assert!(matches!(
            &messages[1],
            Message::Snapshot { source: Source::Profile, value: Some(_) }
        ));

        sub.stop(&store);
        sub.stop(&store);
        assert_eq!(store.subscription_count(), 0);
        assert!(!sub.is_active());
    }

    #[test]
    fn test_failure_routes_source_failed() {
        let store = MemoryStore::new();
        store.fail_path(&StorePath::new("ImportantDates"), "unavailable");
        let (mailbox, inbox) = Mailbox::channel(Liveness::new());

        let mut sub = Subscription::new(
            Source::ImportantDates,
            WatchTarget::Value(StorePath::new("ImportantDates")),
        );
        sub.start(&store, &mailbox);

        let message = inbox.try_recv().unwrap();
        assert!(matches!(
            message,
            Message::SourceFailed { source: Source::ImportantDates, .. }
        ));
    }
}
