use crate::event::{parse_notification, CallEvent, EventKind};
use anyhow::{bail, Result};
use std::{
    collections::{hash_map::Entry, HashMap},
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Callback invoked exactly once when a matching event is published.
pub type EventCallback = Box<dyn FnOnce(CallEvent) + Send + 'static>;

/// Process-wide registry correlating asynchronous webhook events to the call
/// flows waiting for them. Lives for the whole process; there is no teardown
/// beyond dropping it at exit.
///
/// At most one subscription may exist per (kind, key) pair. Publishing a
/// matching event consumes the subscription; events nobody is awaiting are
/// dropped, which is normal under duplicate webhook delivery.
#[derive(Default)]
pub struct EventDispatcher {
    subscriptions: Mutex<HashMap<(EventKind, String), EventCallback>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback for (kind, key). Returns false without touching
    /// the existing callback if the key is already subscribed; a duplicate
    /// subscribe means two awaiters raced for one key and must surface as a
    /// bug in the calling flow.
    pub fn subscribe(
        &self,
        kind: EventKind,
        key: impl Into<String>,
        callback: EventCallback,
    ) -> bool {
        let mut subscriptions = self.subscriptions.lock().unwrap();
        match subscriptions.entry((kind, key.into())) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(callback);
                true
            }
        }
    }

    /// Idempotent removal; unknown keys are a no-op.
    pub fn unsubscribe(&self, kind: EventKind, key: &str) {
        self.subscriptions
            .lock()
            .unwrap()
            .remove(&(kind, key.to_string()));
    }

    /// Parses a raw webhook body and dispatches every recognized event, in
    /// arrival order. Never fails: the HTTP handler that received the webhook
    /// must ack it regardless of payload quality.
    pub fn publish(&self, raw: &str) {
        for event in parse_notification(raw) {
            self.dispatch(event);
        }
    }

    /// Delivers one typed event: remove-and-fetch the matching subscription
    /// under the lock, then invoke it on its own task so a slow or panicking
    /// callback can neither delay the webhook ack nor poison the table.
    pub fn dispatch(&self, event: CallEvent) {
        let kind = event.kind();
        let Some(key) = event.correlation_key() else {
            warn!(
                ?kind,
                call_connection_id = event.call_connection_id,
                "event without correlation key, dropping"
            );
            return;
        };
        let callback = {
            let mut subscriptions = self.subscriptions.lock().unwrap();
            subscriptions.remove(&(kind, key.to_string()))
        };
        match callback {
            Some(callback) => {
                tokio::spawn(async move { callback(event) });
            }
            None => debug!(?kind, key, "no subscriber, event dropped"),
        }
    }

    /// One logical wait over several (kind, key) subscriptions sharing a
    /// channel, e.g. the success and failure results of one operation.
    /// Fails if any key is already subscribed; partially added keys are
    /// rolled back when the returned waiter drops.
    pub fn wait_first_of(self: Arc<Self>, kinds: &[EventKind], key: &str) -> Result<EventWaiter> {
        let (tx, rx) = mpsc::channel(kinds.len().max(1));
        let mut waiter = EventWaiter {
            dispatcher: self,
            keys: Vec::with_capacity(kinds.len()),
            rx,
        };
        for &kind in kinds {
            let tx = tx.clone();
            let added = waiter.dispatcher.subscribe(
                kind,
                key,
                Box::new(move |event| {
                    let _ = tx.try_send(event);
                }),
            );
            if !added {
                bail!("duplicate subscription for {:?} key {}", kind, key);
            }
            waiter.keys.push((kind, key.to_string()));
        }
        Ok(waiter)
    }
}

/// Outcome of an [`EventWaiter::wait`].
#[derive(Debug)]
pub enum WaitOutcome {
    Event(CallEvent),
    Timeout,
}

/// A pending wait registered with [`EventDispatcher::wait_first_of`].
/// Dropping the waiter removes any remaining subscriptions, so a stale event
/// cannot wake a later cycle that happens to reuse the same key.
pub struct EventWaiter {
    dispatcher: Arc<EventDispatcher>,
    keys: Vec<(EventKind, String)>,
    rx: mpsc::Receiver<CallEvent>,
}

impl EventWaiter {
    /// Waits until one subscribed event arrives or the deadline passes.
    pub async fn wait(mut self, timeout: Duration) -> WaitOutcome {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(event)) => WaitOutcome::Event(event),
            Ok(None) | Err(_) => WaitOutcome::Timeout,
        }
    }
}

impl Drop for EventWaiter {
    fn drop(&mut self) {
        for (kind, key) in &self.keys {
            self.dispatcher.unsubscribe(*kind, key);
        }
    }
}
