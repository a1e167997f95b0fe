//! Transport channel abstraction.
//!
//! The controller never touches sockets. It hands work to a
//! [`TransportChannel`], and the transport reports back through the
//! [`TransportSink`] it was given for the attempt and through one
//! [`SendCompletion`] per accepted send.
//!
//! Contract for implementors:
//! - `begin_*` methods must return without waiting on the network.
//! - Calls arrive in the order the controller accepted them; sends must be
//!   written in that order.
//! - Events for one attempt must be reported in the order they happened:
//!   `opened` before any `message`, at most one `closed`, nothing after it.
//! - A handshake failure is `error` followed by `closed(1006, .., false)`.
//! - `closed` after `opened` with no preceding `begin_close` is an
//!   unexpected close and may arrive at any time.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::debug;
use wslink_core::{Payload, WsError, WsResult};

/// Network side of a connection.
#[cfg_attr(test, mockall::automock)]
pub trait TransportChannel: Send + Sync {
    /// Start a handshake with `address`. Outcome is reported through `sink`.
    fn begin_connect(&self, address: &str, sink: TransportSink);

    /// Write one message. `completion` must be completed (or dropped) once
    /// the write succeeded or definitively failed.
    fn begin_send(&self, payload: Payload, completion: SendCompletion);

    /// Start the closing handshake. Report the result with `sink.closed`.
    fn begin_close(&self, sink: TransportSink);
}

/// Raw event reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TransportEvent {
    Opened,
    Message(Payload),
    Error(String),
    Closed {
        code: u16,
        reason: String,
        was_clean: bool,
    },
}

/// Receiver of transport reports, implemented by the controller.
pub(crate) trait TransportHandler: Send + Sync {
    fn on_transport_event(&self, generation: u64, event: TransportEvent);
    fn on_send_complete(&self, send_id: u64, result: WsResult<()>);
}

/// Reporting handle for one connect attempt.
///
/// Reports from a sink whose attempt has been superseded are ignored.
#[derive(Clone)]
pub struct TransportSink {
    handler: Weak<dyn TransportHandler>,
    generation: u64,
}

impl std::fmt::Debug for TransportSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSink")
            .field("generation", &self.generation)
            .finish()
    }
}

impl TransportSink {
    pub(crate) fn new(handler: Weak<dyn TransportHandler>, generation: u64) -> Self {
        Self {
            handler,
            generation,
        }
    }

    /// Attempt number this sink reports for.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The handshake completed.
    pub fn opened(&self) {
        self.report(TransportEvent::Opened);
    }

    /// A message arrived.
    pub fn message(&self, payload: Payload) {
        self.report(TransportEvent::Message(payload));
    }

    /// Something went wrong.
    pub fn error(&self, message: impl Into<String>) {
        self.report(TransportEvent::Error(message.into()));
    }

    /// The connection is gone.
    pub fn closed(&self, code: u16, reason: impl Into<String>, was_clean: bool) {
        self.report(TransportEvent::Closed {
            code,
            reason: reason.into(),
            was_clean,
        });
    }

    fn report(&self, event: TransportEvent) {
        match self.handler.upgrade() {
            Some(handler) => handler.on_transport_event(self.generation, event),
            None => debug!(?event, "Connection dropped, discarding transport event"),
        }
    }
}

/// Fire-once completion for a single send.
///
/// Dropping it without completing reports the send as failed.
pub struct SendCompletion {
    handler: Option<Weak<dyn TransportHandler>>,
    send_id: u64,
}

impl std::fmt::Debug for SendCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendCompletion")
            .field("send_id", &self.send_id)
            .field("completed", &self.handler.is_none())
            .finish()
    }
}

impl SendCompletion {
    pub(crate) fn new(handler: Weak<dyn TransportHandler>, send_id: u64) -> Self {
        Self {
            handler: Some(handler),
            send_id,
        }
    }

    pub fn send_id(&self) -> u64 {
        self.send_id
    }

    /// The message was written.
    pub fn succeed(mut self) {
        self.finish(Ok(()));
    }

    /// The write failed.
    pub fn fail(mut self, reason: impl Into<String>) {
        self.finish(Err(WsError::Transport(reason.into())));
    }

    fn finish(&mut self, result: WsResult<()>) {
        if let Some(handler) = self.handler.take().and_then(|weak| weak.upgrade()) {
            handler.on_send_complete(self.send_id, result);
        }
    }
}

impl Drop for SendCompletion {
    fn drop(&mut self) {
        if self.handler.is_some() {
            self.finish(Err(WsError::Transport(
                "send dropped by transport".to_string(),
            )));
        }
    }
}

/// Call recorded by [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Connect(String),
    Send(Payload),
    Close,
}

/// In-memory transport for tests and demos.
///
/// Records every call and lets the caller play the network side by hand:
/// open the connection, deliver messages, complete sends, close.
#[derive(Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<TransportCall>>,
    sink: Mutex<Option<TransportSink>>,
    completions: Mutex<Vec<SendCompletion>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.count(|c| matches!(c, TransportCall::Connect(_)))
    }

    pub fn send_count(&self) -> usize {
        self.count(|c| matches!(c, TransportCall::Send(_)))
    }

    pub fn close_count(&self) -> usize {
        self.count(|c| matches!(c, TransportCall::Close))
    }

    /// Payloads passed to `begin_send`, in call order.
    pub fn sent_payloads(&self) -> Vec<Payload> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                TransportCall::Send(p) => Some(p.clone()),
                _ => None,
            })
            .collect()
    }

    /// Sink of the latest connect attempt.
    pub fn sink(&self) -> Option<TransportSink> {
        self.sink.lock().clone()
    }

    /// Number of sends waiting for completion.
    pub fn pending_sends(&self) -> usize {
        self.completions.lock().len()
    }

    pub fn open(&self) {
        if let Some(sink) = self.sink() {
            sink.opened();
        }
    }

    pub fn receive(&self, payload: impl Into<Payload>) {
        if let Some(sink) = self.sink() {
            sink.message(payload.into());
        }
    }

    pub fn error(&self, message: &str) {
        if let Some(sink) = self.sink() {
            sink.error(message);
        }
    }

    pub fn close(&self, code: u16, reason: &str, was_clean: bool) {
        if let Some(sink) = self.sink() {
            sink.closed(code, reason, was_clean);
        }
    }

    /// Report a failed handshake: error followed by an abnormal close.
    pub fn fail_handshake(&self, reason: &str) {
        if let Some(sink) = self.sink() {
            sink.error(reason);
            sink.closed(wslink_core::CLOSE_ABNORMAL, reason, false);
        }
    }

    /// Complete the oldest pending send successfully.
    pub fn complete_next_send(&self) -> bool {
        match self.take_next_completion() {
            Some(completion) => {
                completion.succeed();
                true
            }
            None => false,
        }
    }

    /// Fail the oldest pending send.
    pub fn fail_next_send(&self, reason: &str) -> bool {
        match self.take_next_completion() {
            Some(completion) => {
                completion.fail(reason);
                true
            }
            None => false,
        }
    }

    /// Drop every pending completion without completing it.
    pub fn drop_pending_sends(&self) {
        let completions: Vec<_> = self.completions.lock().drain(..).collect();
        drop(completions);
    }

    fn take_next_completion(&self) -> Option<SendCompletion> {
        let mut completions = self.completions.lock();
        if completions.is_empty() {
            None
        } else {
            Some(completions.remove(0))
        }
    }

    fn count(&self, pred: impl Fn(&TransportCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }
}

impl TransportChannel for RecordingTransport {
    fn begin_connect(&self, address: &str, sink: TransportSink) {
        self.calls
            .lock()
            .push(TransportCall::Connect(address.to_string()));
        *self.sink.lock() = Some(sink);
    }

    fn begin_send(&self, payload: Payload, completion: SendCompletion) {
        self.calls.lock().push(TransportCall::Send(payload));
        self.completions.lock().push(completion);
    }

    fn begin_close(&self, _sink: TransportSink) {
        self.calls.lock().push(TransportCall::Close);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(u64, TransportEvent)>>,
        completions: Mutex<Vec<(u64, WsResult<()>)>>,
    }

    impl TransportHandler for Recorder {
        fn on_transport_event(&self, generation: u64, event: TransportEvent) {
            self.events.lock().push((generation, event));
        }

        fn on_send_complete(&self, send_id: u64, result: WsResult<()>) {
            self.completions.lock().push((send_id, result));
        }
    }

    fn handler() -> (Arc<Recorder>, Weak<dyn TransportHandler>) {
        let recorder = Arc::new(Recorder::default());
        let as_dyn: Arc<dyn TransportHandler> = recorder.clone();
        let weak = Arc::downgrade(&as_dyn);
        (recorder, weak)
    }

    #[test]
    fn test_sink_tags_generation() {
        let (recorder, weak) = handler();
        let sink = TransportSink::new(weak, 7);

        sink.opened();
        sink.closed(1000, "bye", true);

        let events = recorder.events.lock();
        assert_eq!(events[0], (7, TransportEvent::Opened));
        assert_eq!(
            events[1],
            (
                7,
                TransportEvent::Closed {
                    code: 1000,
                    reason: "bye".to_string(),
                    was_clean: true
                }
            )
        );
    }

    #[test]
    fn test_completion_fires_once() {
        let (recorder, weak) = handler();
        SendCompletion::new(weak.clone(), 1).succeed();
        SendCompletion::new(weak, 2).fail("broken pipe");

        let completions = recorder.completions.lock();
        assert_eq!(completions.len(), 2);
        assert_eq!(completions[0], (1, Ok(())));
        assert_eq!(
            completions[1],
            (2, Err(WsError::Transport("broken pipe".to_string())))
        );
    }

    #[test]
    fn test_dropped_completion_reports_failure() {
        let (recorder, weak) = handler();
        drop(SendCompletion::new(weak, 9));

        let completions = recorder.completions.lock();
        assert_eq!(completions.len(), 1);
        assert!(matches!(completions[0], (9, Err(WsError::Transport(_)))));
    }

    #[test]
    fn test_reports_after_handler_dropped_are_ignored() {
        let (recorder, weak) = handler();
        let sink = TransportSink::new(weak.clone(), 1);
        let completion = SendCompletion::new(weak, 1);
        drop(recorder);

        sink.opened();
        completion.succeed();
    }
}
