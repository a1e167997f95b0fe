//! Event dispatch to registered observers.
//!
//! Every event is delivered to the observers registered at the moment its
//! delivery starts, in the order events were dispatched. A failing observer
//! (returned error or panic) is logged and skipped; the remaining observers
//! still receive the event.

use crate::serial::SerialQueue;
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use wslink_core::{EventKind, WsEvent};

/// Result returned by an observer.
pub type ObserverResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type ObserverFn = Arc<dyn Fn(&WsEvent) -> ObserverResult + Send + Sync>;

#[derive(Clone)]
enum Observer {
    Callback(ObserverFn),
    /// Removed on the first delivery after its receiver is dropped.
    Channel(mpsc::UnboundedSender<WsEvent>),
}

/// Handle returned by registration, used to deregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// In-order, failure-isolating event fan-out.
pub struct EventDispatcher {
    observers: RwLock<Vec<(ObserverId, Observer)>>,
    next_id: AtomicU64,
    queue: SerialQueue<WsEvent>,
    delivered: AtomicU64,
    failures: AtomicU64,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            queue: SerialQueue::new(),
            delivered: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Register an observer for every event kind.
    pub fn subscribe<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&WsEvent) -> ObserverResult + Send + Sync + 'static,
    {
        self.register(Observer::Callback(Arc::new(observer)))
    }

    fn register(&self, observer: Observer) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, observer));
        id
    }

    /// Register an observer that only sees one event kind.
    pub fn subscribe_kind<F>(&self, kind: EventKind, observer: F) -> ObserverId
    where
        F: Fn(&WsEvent) -> ObserverResult + Send + Sync + 'static,
    {
        self.subscribe(move |event| {
            if event.kind() == kind {
                observer(event)
            } else {
                Ok(())
            }
        })
    }

    /// Register a channel observer.
    ///
    /// Intended for hosts that pump events from their own update loop with
    /// `try_recv`. Dropping the receiver deregisters the observer at the
    /// next delivery.
    pub fn subscribe_channel(&self) -> (ObserverId, mpsc::UnboundedReceiver<WsEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (self.register(Observer::Channel(tx)), rx)
    }

    /// Remove an observer. Returns `false` if it was not registered.
    ///
    /// An event whose delivery already started may still reach the
    /// observer; no later event will.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    /// Total events delivered.
    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Total observer invocations that failed.
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Queue an event and deliver everything pending.
    ///
    /// If another call is already delivering (on this thread, from inside
    /// an observer, or on another thread) the event is delivered by that
    /// call once the events ahead of it are done.
    pub fn dispatch(&self, event: WsEvent) {
        self.queue.push(event);
        self.queue.run(|event| self.deliver(&event));
    }

    fn deliver(&self, event: &WsEvent) {
        let observers: Vec<(ObserverId, Observer)> = self.observers.read().clone();
        let kind = event.kind().as_str();
        let mut closed = Vec::new();

        for (id, observer) in observers {
            let observer = match observer {
                Observer::Callback(observer) => observer,
                Observer::Channel(tx) => {
                    if tx.send(event.clone()).is_err() {
                        closed.push(id);
                    }
                    continue;
                }
            };
            match catch_unwind(AssertUnwindSafe(|| observer(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(observer = id.0, event = kind, error = %e, "Observer returned an error");
                }
                Err(panic) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        observer = id.0,
                        event = kind,
                        panic = panic_message(panic.as_ref()),
                        "Observer panicked"
                    );
                }
            }
        }

        if !closed.is_empty() {
            debug!(count = closed.len(), "Removing observers with dropped channels");
            self.observers.write().retain(|(id, _)| !closed.contains(id));
        }
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic"
    }
}
