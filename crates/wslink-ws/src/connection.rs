//! WebSocket connection controller.
//!
//! Validates connect/send/close requests against the connection state,
//! hands accepted work to the transport, turns transport reports into
//! state changes and events, and schedules reconnects after unexpected
//! closes.
//!
//! All state lives behind one mutex whose critical sections never perform
//! I/O, run observer code or call the transport. Anything a critical
//! section produces (transport calls, events, send completions) is queued
//! in order while the lock is held and executed after it is released.

use crate::config::ConnectionConfig;
use crate::dispatcher::{EventDispatcher, ObserverId, ObserverResult};
use crate::reconnect::{ReconnectDecision, ReconnectGovernor};
use crate::serial::SerialQueue;
use crate::transport::{
    SendCompletion, TransportChannel, TransportEvent, TransportHandler, TransportSink,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wslink_core::{
    ConnectionState, EventKind, Payload, Role, StateTransition, WsError, WsEvent, WsResult,
    CLOSE_ABNORMAL, CLOSE_NORMAL,
};

/// Callback invoked once when a send completes or fails.
pub type CompletionCallback = Box<dyn FnOnce(WsResult<()>) + Send + 'static>;

/// Pending result of an accepted send.
#[derive(Debug)]
pub struct SendHandle {
    id: u64,
    rx: oneshot::Receiver<WsResult<()>>,
}

impl SendHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait until the transport confirmed or failed the write.
    pub async fn completed(self) -> WsResult<()> {
        self.rx.await.unwrap_or_else(|_| {
            Err(WsError::Transport(
                "connection dropped before send completed".to_string(),
            ))
        })
    }

    /// Non-blocking check; `None` while the send is still in flight.
    pub fn try_result(&mut self) -> Option<WsResult<()>> {
        self.rx.try_recv().ok()
    }
}

struct PendingSend {
    tx: oneshot::Sender<WsResult<()>>,
    on_complete: Option<CompletionCallback>,
}

impl PendingSend {
    fn complete(self, result: WsResult<()>) {
        let _ = self.tx.send(result.clone());
        if let Some(callback) = self.on_complete {
            if catch_unwind(AssertUnwindSafe(|| callback(result))).is_err() {
                warn!("Send completion callback panicked");
            }
        }
    }
}

/// Work produced under the state lock, executed after it is released.
enum Work {
    Connect { address: String, sink: TransportSink },
    Send { payload: Payload, completion: SendCompletion },
    Close { sink: TransportSink },
    Emit(WsEvent),
    Complete { pending: PendingSend, result: WsResult<()> },
}

struct Inner {
    state: ConnectionState,
    address: Option<String>,
    /// Incremented for every connect attempt; tags transport sinks.
    generation: u64,
    /// A connect attempt has been handed to the transport and not yet closed.
    attempt_active: bool,
    /// `close()` was called since the last `connect()`.
    close_requested: bool,
    governor: ReconnectGovernor,
    reconnect: Option<CancellationToken>,
    close_timer: Option<CancellationToken>,
    pending: BTreeMap<u64, PendingSend>,
    next_send_id: u64,
    watchers: Vec<mpsc::UnboundedSender<StateTransition>>,
}

impl Inner {
    fn transition(&mut self, to: ConnectionState) {
        let from = self.state;
        if !from.can_transition_to(to) {
            warn!(%from, %to, "Rejected illegal state transition");
            return;
        }
        self.state = to;
        debug!(%from, %to, "Connection state changed");
        let transition = StateTransition::new(from, to);
        self.watchers.retain(|tx| tx.send(transition).is_ok());
    }

    /// Cancel a scheduled reconnect. Returns `true` if one was pending.
    fn cancel_reconnect(&mut self) -> bool {
        match self.reconnect.take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn cancel_close_timer(&mut self) {
        if let Some(token) = self.close_timer.take() {
            token.cancel();
        }
    }
}

struct Shared {
    config: ConnectionConfig,
    transport: Arc<dyn TransportChannel>,
    dispatcher: EventDispatcher,
    inner: Mutex<Inner>,
    work: SerialQueue<Work>,
    runtime: Handle,
    this: Weak<Shared>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        inner.cancel_reconnect();
        inner.cancel_close_timer();
        for (_, pending) in std::mem::take(&mut inner.pending) {
            pending.complete(Err(WsError::Transport(
                "connection dropped before send completed".to_string(),
            )));
        }
    }
}

impl Shared {
    fn handler(&self) -> Weak<dyn TransportHandler> {
        self.this.clone()
    }

    fn run_work(&self) {
        self.work.run(|work| match work {
            Work::Connect { address, sink } => self.transport.begin_connect(&address, sink),
            Work::Send {
                payload,
                completion,
            } => self.transport.begin_send(payload, completion),
            Work::Close { sink } => self.transport.begin_close(sink),
            Work::Emit(event) => self.dispatcher.dispatch(event),
            Work::Complete { pending, result } => pending.complete(result),
        });
    }

    fn emit(&self, event: WsEvent) {
        self.work.push(Work::Emit(event));
    }

    fn connect(&self, address: &str) -> WsResult<()> {
        if !self.config.role.is_client() {
            return Err(WsError::InvalidState(
                "only client instances can connect".to_string(),
            ));
        }
        validate_address(address)?;

        let mut inner = self.inner.lock();
        if let Some(existing) = &inner.address {
            if existing != address {
                return Err(WsError::InvalidArgument(format!(
                    "address is fixed to {existing}, cannot connect to {address}"
                )));
            }
        }

        match inner.state {
            ConnectionState::Open => {
                debug!("Connect ignored, already open");
                return Ok(());
            }
            ConnectionState::Connecting if inner.attempt_active => {
                debug!("Connect ignored, attempt already in flight");
                return Ok(());
            }
            ConnectionState::Closing => {
                return Err(WsError::InvalidState("close in progress".to_string()));
            }
            ConnectionState::Connecting | ConnectionState::Closed => {}
        }

        if inner.governor.is_exhausted() {
            return Err(WsError::InvalidState(format!(
                "reconnect attempts exhausted after {} attempts",
                inner.governor.attempts()
            )));
        }

        if inner.cancel_reconnect() {
            debug!("Manual connect supersedes scheduled reconnect");
        }
        inner.close_requested = false;
        if inner.state == ConnectionState::Closed {
            inner.transition(ConnectionState::Connecting);
        }
        if inner.address.is_none() {
            inner.address = Some(address.to_string());
        }

        info!(address, "Connecting to WebSocket");
        self.start_attempt(&mut inner);
        drop(inner);

        self.run_work();
        Ok(())
    }

    fn start_attempt(&self, inner: &mut Inner) {
        inner.generation += 1;
        inner.attempt_active = true;
        let address = inner.address.clone().unwrap_or_default();
        let sink = TransportSink::new(self.handler(), inner.generation);
        self.work.push(Work::Connect { address, sink });
    }

    fn close(&self) {
        let mut inner = self.inner.lock();
        let cancelled = inner.cancel_reconnect();
        inner.close_requested = true;

        match inner.state {
            ConnectionState::Closing | ConnectionState::Closed => {
                if cancelled {
                    info!("Scheduled reconnect cancelled by close");
                } else {
                    debug!(state = %inner.state, "Close ignored");
                }
                return;
            }
            ConnectionState::Connecting if !inner.attempt_active => {
                inner.transition(ConnectionState::Closing);
                inner.transition(ConnectionState::Closed);
                self.emit(WsEvent::close(CLOSE_NORMAL, "closed before connect", true));
            }
            ConnectionState::Connecting | ConnectionState::Open => {
                info!(state = %inner.state, "Closing WebSocket");
                inner.transition(ConnectionState::Closing);
                let sink = TransportSink::new(self.handler(), inner.generation);
                self.work.push(Work::Close { sink });
                self.arm_close_timer(&mut inner);
            }
        }
        drop(inner);

        self.run_work();
    }

    fn send(
        &self,
        payload: Payload,
        on_complete: Option<CompletionCallback>,
    ) -> WsResult<SendHandle> {
        let mut inner = self.inner.lock();
        if !inner.state.can_send() {
            return Err(WsError::InvalidState(format!(
                "cannot send while {}",
                inner.state
            )));
        }

        let id = inner.next_send_id;
        inner.next_send_id += 1;
        let (tx, rx) = oneshot::channel();
        inner.pending.insert(id, PendingSend { tx, on_complete });
        debug!(
            send_id = id,
            kind = payload.kind().as_str(),
            bytes = payload.len(),
            "Send queued"
        );

        let completion = SendCompletion::new(self.handler(), id);
        self.work.push(Work::Send {
            payload,
            completion,
        });
        drop(inner);

        self.run_work();
        Ok(SendHandle { id, rx })
    }

    fn reset_reconnect(&self) {
        let mut inner = self.inner.lock();
        inner.governor.reset();
        info!("Reconnect governor reset");
    }

    fn handle_event(&self, generation: u64, event: TransportEvent) {
        let mut inner = self.inner.lock();
        if generation != inner.generation {
            debug!(
                generation,
                current = inner.generation,
                ?event,
                "Discarding event from superseded attempt"
            );
            return;
        }

        match event {
            TransportEvent::Opened => match inner.state {
                ConnectionState::Connecting if inner.attempt_active => {
                    inner.transition(ConnectionState::Open);
                    inner.governor.record_open();
                    let address = inner.address.clone().unwrap_or_default();
                    info!(address = %address, "WebSocket connected");
                    self.emit(WsEvent::open(address));
                }
                state => debug!(%state, "Ignoring open report"),
            },
            TransportEvent::Message(payload) => match inner.state {
                ConnectionState::Open | ConnectionState::Closing => {
                    self.emit(WsEvent::message(payload));
                }
                state => debug!(%state, "Ignoring message outside open connection"),
            },
            TransportEvent::Error(message) => {
                if inner.attempt_active {
                    warn!(error = %message, "Transport error");
                    self.emit(WsEvent::error(message));
                } else {
                    debug!(error = %message, "Ignoring error after close");
                }
            }
            TransportEvent::Closed {
                code,
                reason,
                was_clean,
            } => self.finish_close(&mut inner, code, reason, was_clean),
        }
        drop(inner);

        self.run_work();
    }

    fn finish_close(&self, inner: &mut Inner, code: u16, reason: String, was_clean: bool) {
        match inner.state {
            ConnectionState::Closed => {
                debug!(code, "Duplicate close ignored");
                return;
            }
            ConnectionState::Connecting if !inner.attempt_active => return,
            ConnectionState::Connecting | ConnectionState::Closing => {
                inner.transition(ConnectionState::Closed);
            }
            ConnectionState::Open => {
                inner.transition(ConnectionState::Closing);
                inner.transition(ConnectionState::Closed);
            }
        }
        inner.attempt_active = false;
        inner.cancel_close_timer();

        let pending = std::mem::take(&mut inner.pending);
        if !pending.is_empty() {
            warn!(count = pending.len(), "Failing in-flight sends on close");
        }
        for (_, pending) in pending {
            self.work.push(Work::Complete {
                pending,
                result: Err(WsError::Transport(
                    "connection closed before send completed".to_string(),
                )),
            });
        }

        let close = WsEvent::close(code, reason.clone(), was_clean);
        if inner.close_requested {
            info!(code, %reason, was_clean, "WebSocket closed");
            self.emit(close);
            return;
        }

        warn!(code, %reason, was_clean, "WebSocket closed unexpectedly");
        let was_exhausted = inner.governor.is_exhausted();
        match inner.governor.on_unexpected_close() {
            ReconnectDecision::Schedule { attempt, delay } => {
                self.emit(close);
                self.schedule_reconnect(inner, attempt, delay);
            }
            ReconnectDecision::Exhausted { attempts } => {
                if !was_exhausted {
                    self.emit(WsEvent::error(format!(
                        "reconnect attempts exhausted after {attempts} attempts"
                    )));
                }
                self.emit(close);
            }
            ReconnectDecision::Disabled => self.emit(close),
        }
    }

    fn schedule_reconnect(&self, inner: &mut Inner, attempt: u32, delay: Duration) {
        let token = CancellationToken::new();
        inner.reconnect = Some(token.clone());
        let weak = self.this.clone();

        self.runtime.spawn(async move {
            // Wait for delay OR cancellation (close, manual connect, drop)
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = token.cancelled() => {
                    debug!(attempt, "Scheduled reconnect cancelled");
                    return;
                }
            }
            if let Some(shared) = weak.upgrade() {
                shared.fire_reconnect(&token, attempt);
            }
        });
    }

    fn fire_reconnect(&self, token: &CancellationToken, attempt: u32) {
        let mut inner = self.inner.lock();
        // Re-checked under the lock: a close() racing the timer wins.
        if token.is_cancelled()
            || inner.close_requested
            || inner.state != ConnectionState::Closed
        {
            debug!(attempt, "Reconnect no longer wanted");
            return;
        }
        inner.reconnect = None;

        info!(
            attempt,
            address = inner.address.as_deref().unwrap_or_default(),
            "Reconnecting"
        );
        inner.transition(ConnectionState::Connecting);
        self.start_attempt(&mut inner);
        drop(inner);

        self.run_work();
    }

    fn arm_close_timer(&self, inner: &mut Inner) {
        inner.cancel_close_timer();
        let token = CancellationToken::new();
        inner.close_timer = Some(token.clone());
        let generation = inner.generation;
        let timeout = self.config.close_timeout();
        let weak = self.this.clone();

        self.runtime.spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(timeout) => {}
                () = token.cancelled() => return,
            }
            if let Some(shared) = weak.upgrade() {
                shared.close_timed_out(generation);
            }
        });
    }

    fn close_timed_out(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.generation != generation || inner.state != ConnectionState::Closing {
            return;
        }
        warn!(
            timeout_ms = self.config.close_timeout_ms,
            "Transport did not confirm close, forcing closed"
        );
        inner.close_timer = None;
        self.finish_close(
            &mut inner,
            CLOSE_ABNORMAL,
            "close handshake timed out".to_string(),
            false,
        );
        drop(inner);

        self.run_work();
    }

    fn complete_send(&self, send_id: u64, result: WsResult<()>) {
        let mut inner = self.inner.lock();
        match inner.pending.remove(&send_id) {
            Some(pending) => {
                if let Err(e) = &result {
                    warn!(send_id, error = %e, "Send failed");
                } else {
                    debug!(send_id, "Send completed");
                }
                self.work.push(Work::Complete { pending, result });
            }
            None => debug!(send_id, "Completion for settled send ignored"),
        }
        drop(inner);

        self.run_work();
    }
}

impl TransportHandler for Shared {
    fn on_transport_event(&self, generation: u64, event: TransportEvent) {
        self.handle_event(generation, event);
    }

    fn on_send_complete(&self, send_id: u64, result: WsResult<()>) {
        self.complete_send(send_id, result);
    }
}

/// Client-side WebSocket connection.
///
/// Cheap to clone; clones share one connection. Every operation returns
/// immediately, results arrive as events or send completions.
#[derive(Clone)]
pub struct WebSocket {
    shared: Arc<Shared>,
}

impl WebSocket {
    /// Create a connection driven by `transport`.
    ///
    /// Must be called inside a tokio runtime, which is used for reconnect
    /// and close timers.
    pub fn new(config: ConnectionConfig, transport: Arc<dyn TransportChannel>) -> WsResult<Self> {
        let runtime = Handle::try_current().map_err(|_| WsError::NoRuntime)?;
        let governor = ReconnectGovernor::new(config.reconnect.clone());

        let shared = Arc::new_cyclic(|this| Shared {
            config,
            transport,
            dispatcher: EventDispatcher::new(),
            inner: Mutex::new(Inner {
                state: ConnectionState::default(),
                address: None,
                generation: 0,
                attempt_active: false,
                close_requested: false,
                governor,
                reconnect: None,
                close_timer: None,
                pending: BTreeMap::new(),
                next_send_id: 1,
                watchers: Vec::new(),
            }),
            work: SerialQueue::new(),
            runtime,
            this: this.clone(),
        });

        Ok(Self { shared })
    }

    /// Start connecting to `address`.
    ///
    /// Does nothing if already open or connecting.
    ///
    /// # Errors
    ///
    /// - `WsError::InvalidState`: not a client, close in progress, or
    ///   reconnect attempts exhausted
    /// - `WsError::InvalidArgument`: malformed address, or an address other
    ///   than the one this connection is bound to
    pub fn connect(&self, address: &str) -> WsResult<()> {
        self.shared.connect(address)
    }

    /// Start closing. Does nothing if already closing or closed, apart from
    /// cancelling a scheduled reconnect.
    pub fn close(&self) {
        self.shared.close();
    }

    /// Send a message.
    ///
    /// # Errors
    ///
    /// `WsError::InvalidState` if the connection is not open. Transport
    /// failures are reported through the returned handle instead.
    pub fn send(&self, payload: Payload) -> WsResult<SendHandle> {
        self.shared.send(payload, None)
    }

    /// Send a message and call `on_complete` exactly once when it settles.
    ///
    /// `on_complete` is not called if the send is rejected synchronously.
    pub fn send_with<F>(&self, payload: Payload, on_complete: F) -> WsResult<SendHandle>
    where
        F: FnOnce(WsResult<()>) + Send + 'static,
    {
        self.shared.send(payload, Some(Box::new(on_complete)))
    }

    pub fn send_text(&self, text: impl Into<String>) -> WsResult<SendHandle> {
        self.send(Payload::Text(text.into()))
    }

    pub fn send_binary(&self, data: impl Into<Vec<u8>>) -> WsResult<SendHandle> {
        self.send(Payload::Binary(data.into()))
    }

    /// Send raw bytes as a text message.
    ///
    /// # Errors
    ///
    /// `WsError::InvalidArgument` if `bytes` is not valid UTF-8, otherwise
    /// as [`send`](Self::send).
    pub fn send_utf8(&self, bytes: Vec<u8>) -> WsResult<SendHandle> {
        self.send(Payload::text_from_utf8(bytes)?)
    }

    /// Target address; empty until the first accepted connect.
    pub fn address(&self) -> String {
        self.shared.inner.lock().address.clone().unwrap_or_default()
    }

    pub fn ready_state(&self) -> ConnectionState {
        self.shared.inner.lock().state
    }

    pub fn role(&self) -> Role {
        self.shared.config.role
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    /// Reconnect attempts since the last successful open.
    pub fn retry_count(&self) -> u32 {
        self.shared.inner.lock().governor.attempts()
    }

    pub fn reconnect_exhausted(&self) -> bool {
        self.shared.inner.lock().governor.is_exhausted()
    }

    pub fn reconnect_scheduled(&self) -> bool {
        self.shared.inner.lock().reconnect.is_some()
    }

    /// Sends accepted but not yet settled.
    pub fn pending_sends(&self) -> usize {
        self.shared.inner.lock().pending.len()
    }

    /// Clear the retry counter and the exhausted flag.
    pub fn reset_reconnect(&self) {
        self.shared.reset_reconnect();
    }

    pub fn subscribe<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&WsEvent) -> ObserverResult + Send + Sync + 'static,
    {
        self.shared.dispatcher.subscribe(observer)
    }

    pub fn subscribe_kind<F>(&self, kind: EventKind, observer: F) -> ObserverId
    where
        F: Fn(&WsEvent) -> ObserverResult + Send + Sync + 'static,
    {
        self.shared.dispatcher.subscribe_kind(kind, observer)
    }

    pub fn subscribe_channel(&self) -> (ObserverId, mpsc::UnboundedReceiver<WsEvent>) {
        self.shared.dispatcher.subscribe_channel()
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.shared.dispatcher.unsubscribe(id)
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.shared.dispatcher
    }

    /// Stream of every state change from now on, in order.
    pub fn state_transitions(&self) -> mpsc::UnboundedReceiver<StateTransition> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.inner.lock().watchers.push(tx);
        rx
    }
}

impl std::fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("WebSocket")
            .field("address", &inner.address)
            .field("state", &inner.state)
            .field("retry_count", &inner.governor.attempts())
            .finish()
    }
}

fn validate_address(address: &str) -> WsResult<()> {
    if address.is_empty() {
        return Err(WsError::InvalidArgument("address is empty".to_string()));
    }
    let uri: Uri = address
        .parse()
        .map_err(|e| WsError::InvalidArgument(format!("invalid address {address}: {e}")))?;

    match uri.scheme_str() {
        Some(scheme)
            if scheme.eq_ignore_ascii_case("ws") || scheme.eq_ignore_ascii_case("wss") => {}
        _ => {
            return Err(WsError::InvalidArgument(format!(
                "address must use ws:// or wss://, got {address}"
            )))
        }
    }

    if uri.host().map_or(true, str::is_empty) {
        return Err(WsError::InvalidArgument(format!(
            "address has no host: {address}"
        )));
    }
    Ok(())
}
