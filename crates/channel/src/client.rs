//! Resilient channel client.
//!
//! Owns at most one live connection handle at a time. Failures of an
//! established handle are recovered by a single owned retry task that keeps
//! reconnecting until it succeeds or the caller closes the channel. Frames sent
//! while disconnected wait in a backlog that a single poll task flushes once a
//! handle is open.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use url::Url;

use crate::backoff::BackoffState;
use crate::config::ChannelConfig;
use crate::envelope::{Envelope, Inbound, Payload};
use crate::error::{ConnectError, SendError, TransportError};
use crate::state::ConnectionState;
use crate::transport::{CloseFrame, Duplex, Frame, FrameStream, Transport, WsTransport};

type MessageHandler = Box<dyn Fn(Inbound) + Send + Sync>;
type ReconnectHandler = Box<dyn Fn() + Send + Sync>;

/// Reconnecting duplex message channel to the game server.
///
/// Cheap to clone; clones share the same connection. Background tasks keep the
/// channel alive after the last clone is dropped, so call [`close`](Self::close)
/// to tear it down.
#[derive(Clone)]
pub struct ChannelClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: ChannelConfig,
    transport: Arc<dyn Transport>,
    shared: Mutex<Shared>,
    state_tx: watch::Sender<ConnectionState>,
    on_message: tokio::sync::Mutex<Option<MessageHandler>>,
    on_reconnect: tokio::sync::Mutex<Option<ReconnectHandler>>,
}

/// Everything mutated by transitions. Never held across an `.await`.
struct Shared {
    state: ConnectionState,
    live: Option<LiveHandle>,
    generation: u64,
    /// Set by `close()`, cleared by the next successful connection
    manual_close: bool,
    /// Bumped by every `close()` so in-flight handshakes can tell they were cancelled
    close_epoch: u64,
    connected_once: bool,
    retry: Option<JoinHandle<()>>,
    poll: Option<JoinHandle<()>>,
    backlog: VecDeque<Frame>,
}

/// One live connection handle: the queue feeding its pump task's writer. The
/// pump ends on its own once the handle is lost or closed.
struct LiveHandle {
    generation: u64,
    outbound: mpsc::UnboundedSender<Frame>,
}

/// Why a pump stopped.
#[derive(Debug)]
enum Lost {
    PeerClosed(Option<CloseFrame>),
    Ended,
    Failed(TransportError),
    Closed,
}

enum Begin {
    Proceed { epoch: u64 },
    AlreadyOpen,
    /// Another caller is mid-handshake; carries the generation seen at that point
    InProgress { generation: u64 },
}

impl ChannelClient {
    /// Client using the WebSocket transport.
    pub fn new(config: ChannelConfig) -> Self {
        Self::with_transport(config, Arc::new(WsTransport))
    }

    pub fn with_transport(config: ChannelConfig, transport: Arc<dyn Transport>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                shared: Mutex::new(Shared {
                    state: ConnectionState::Disconnected,
                    live: None,
                    generation: 0,
                    manual_close: false,
                    close_epoch: 0,
                    connected_once: false,
                    retry: None,
                    poll: None,
                    backlog: VecDeque::new(),
                }),
                state_tx,
                on_message: tokio::sync::Mutex::new(None),
                on_reconnect: tokio::sync::Mutex::new(None),
            }),
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.inner.config.endpoint
    }

    /// Register the handler every decoded inbound frame is delivered to, in
    /// arrival order.
    pub async fn set_on_message<F>(&self, callback: F)
    where
        F: Fn(Inbound) + Send + Sync + 'static,
    {
        let mut on_message = self.inner.on_message.lock().await;
        *on_message = Some(Box::new(callback));
    }

    /// Register the hook fired after every successful connection except the
    /// first one.
    pub async fn set_on_reconnect<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut on_reconnect = self.inner.on_reconnect.lock().await;
        *on_reconnect = Some(Box::new(callback));
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// Watch state transitions, e.g. to render "reconnecting".
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Frames waiting for an open connection.
    pub fn backlog_len(&self) -> usize {
        self.inner.lock().backlog.len()
    }

    /// Open the connection.
    ///
    /// Returns immediately if a handle is already open, and waits for the
    /// outcome if another attempt is in flight. A failed handshake is returned
    /// to this caller and does not schedule a retry.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        self.inner.connect(false).await
    }

    /// Send a payload. Text and binary go out unmodified, everything else as
    /// JSON.
    ///
    /// Never suspends. While no handle is open the frame is held and
    /// re-attempted every `send_poll_interval` until a connection is available.
    pub fn send(&self, payload: impl Into<Payload>) -> Result<(), SendError> {
        let frame = payload.into().into_frame()?;
        self.inner.enqueue(frame);
        Ok(())
    }

    /// Send a `{type, data}` envelope.
    pub fn send_message(&self, kind: &str, data: impl Serialize) -> Result<(), SendError> {
        self.send(Envelope::new(kind, data)?)
    }

    /// Send any serializable value as a JSON text frame.
    pub fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), SendError> {
        let text = serde_json::to_string(value)?;
        self.inner.enqueue(Frame::Text(text));
        Ok(())
    }

    /// Close the channel intentionally.
    ///
    /// Cancels any pending reconnection, discards frames still waiting in the
    /// backlog and shuts the live handle down with `code` and `reason`. A
    /// handshake still in flight is shut down as soon as it completes.
    pub fn close(&self, code: u16, reason: &str) {
        self.inner.close(code, reason);
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, shared: &mut Shared, next: ConnectionState) {
        if shared.state != next {
            tracing::debug!(from = %shared.state, to = %next, "Channel state change");
            shared.state = next;
            self.state_tx.send_replace(next);
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().live.as_ref().map(|live| live.generation) == Some(generation)
    }

    fn begin_attempt(&self) -> Begin {
        let mut shared = self.lock();
        match shared.state {
            ConnectionState::Open => Begin::AlreadyOpen,
            ConnectionState::Connecting => Begin::InProgress {
                generation: shared.generation,
            },
            ConnectionState::Closing | ConnectionState::Disconnected => {
                // A handle still finishing an intentional close is detached,
                // not aborted, so its close frame still reaches the peer. From
                // here on the generation check makes it stale.
                if let Some(old) = shared.live.take() {
                    tracing::debug!(generation = old.generation, "Detaching closing handle");
                }
                self.transition(&mut shared, ConnectionState::Connecting);
                Begin::Proceed {
                    epoch: shared.close_epoch,
                }
            }
        }
    }

    async fn connect(self: &Arc<Self>, from_retry: bool) -> Result<(), ConnectError> {
        let epoch = match self.begin_attempt() {
            Begin::AlreadyOpen => return Ok(()),
            Begin::InProgress { generation } => return self.await_attempt(generation).await,
            Begin::Proceed { epoch } => epoch,
        };

        let mut guard = AttemptGuard {
            inner: self,
            armed: true,
        };

        let opened = tokio::time::timeout(
            self.config.handshake_timeout,
            self.transport.open(&self.config.endpoint),
        )
        .await
        .unwrap_or_else(|_| Err(TransportError::Handshake("timed out".into())));

        let duplex = match opened {
            Ok(duplex) => duplex,
            Err(e) => {
                // The retry loop reports its own failures
                if from_retry {
                    tracing::debug!(endpoint = %self.config.endpoint, error = %e, "Handshake failed");
                } else {
                    tracing::error!(endpoint = %self.config.endpoint, error = %e, "Failed to connect");
                }
                return Err(e.into());
            }
        };

        let (generation, reconnected) = {
            let mut shared = self.lock();
            guard.armed = false;

            if shared.close_epoch != epoch {
                self.transition(&mut shared, ConnectionState::Disconnected);
                drop(shared);
                tracing::info!("Channel closed during handshake, shutting new handle down");
                tokio::spawn(shut_down(duplex, self.config.close_timeout));
                return Err(ConnectError::Closed);
            }

            shared.manual_close = false;
            shared.generation += 1;
            let generation = shared.generation;

            if let Some(retry) = shared.retry.take() {
                // From inside the retry task the handle is simply released
                if !from_retry {
                    retry.abort();
                }
            }

            let (outbound, outbound_rx) = mpsc::unbounded_channel();
            tokio::spawn(Arc::clone(self).pump(generation, duplex, outbound_rx));
            shared.live = Some(LiveHandle {
                generation,
                outbound,
            });
            self.transition(&mut shared, ConnectionState::Open);

            let reconnected = shared.connected_once;
            shared.connected_once = true;
            (generation, reconnected)
        };

        tracing::info!(
            endpoint = %self.config.endpoint,
            generation,
            reconnected,
            "Connected to game server"
        );

        if reconnected {
            let hook = self.on_reconnect.lock().await;
            if let Some(ref cb) = *hook {
                cb();
            }
        }
        Ok(())
    }

    /// Wait for another caller's handshake to resolve.
    ///
    /// Success is judged by the generation counter rather than the settled
    /// state, so a handle that opened and dropped again before this waiter ran
    /// still counts as connected.
    async fn await_attempt(&self, start: u64) -> Result<(), ConnectError> {
        let mut state_rx = self.state_tx.subscribe();
        let _ = state_rx
            .wait_for(|state| *state != ConnectionState::Connecting)
            .await;

        if self.lock().generation > start {
            Ok(())
        } else {
            Err(ConnectError::AttemptFailed)
        }
    }

    /// Drive one handle: deliver inbound frames in order and write outbound
    /// frames, until either side fails or an intentional close completes.
    async fn pump(
        self: Arc<Self>,
        generation: u64,
        duplex: Duplex,
        mut outbound: mpsc::UnboundedReceiver<Frame>,
    ) {
        let Duplex {
            mut sink,
            mut stream,
        } = duplex;
        let mut unsent = Vec::new();

        let lost = loop {
            tokio::select! {
                incoming = stream.next() => match incoming {
                    Some(Ok(Frame::Close(frame))) => break Lost::PeerClosed(frame),
                    Some(Ok(frame)) => self.dispatch(generation, frame).await,
                    Some(Err(e)) => break Lost::Failed(e),
                    None => break Lost::Ended,
                },
                outgoing = outbound.recv() => match outgoing {
                    Some(close @ Frame::Close(_)) => {
                        if let Err(e) = sink.send(close).await {
                            tracing::debug!(generation, error = %e, "Failed to send close frame");
                        } else {
                            self.await_peer_close(generation, &mut stream).await;
                        }
                        break Lost::Closed;
                    }
                    Some(frame) => {
                        if let Err(e) = sink.send(frame.clone()).await {
                            unsent.push(frame);
                            break Lost::Failed(e);
                        }
                    }
                    None => break Lost::Ended,
                },
            }
        };

        outbound.close();
        while let Ok(frame) = outbound.try_recv() {
            if !matches!(frame, Frame::Close(_)) {
                unsent.push(frame);
            }
        }

        if tokio::time::timeout(self.config.close_timeout, sink.close())
            .await
            .is_err()
        {
            tracing::debug!(generation, "Timed out shutting the socket down");
        }

        self.handle_lost(generation, lost, unsent);
    }

    async fn dispatch(&self, generation: u64, frame: Frame) {
        let Some(message) = Inbound::decode(frame) else {
            return;
        };
        if !self.is_current(generation) {
            tracing::debug!(generation, "Dropping frame from superseded handle");
            return;
        }
        let handler = self.on_message.lock().await;
        match handler.as_ref() {
            Some(cb) => cb(message),
            None => tracing::debug!("No message handler registered, dropping frame"),
        }
    }

    /// After sending our close frame, keep delivering until the peer answers.
    async fn await_peer_close(&self, generation: u64, stream: &mut FrameStream) {
        let drain = async {
            while let Some(Ok(frame)) = stream.next().await {
                if matches!(frame, Frame::Close(_)) {
                    break;
                }
                self.dispatch(generation, frame).await;
            }
        };
        if tokio::time::timeout(self.config.close_timeout, drain)
            .await
            .is_err()
        {
            tracing::debug!("Peer did not acknowledge close in time");
        }
    }

    fn handle_lost(self: &Arc<Self>, generation: u64, lost: Lost, unsent: Vec<Frame>) {
        let mut guard = self.lock();
        let shared = &mut *guard;

        if shared.live.as_ref().map(|live| live.generation) != Some(generation) {
            tracing::debug!(generation, ?lost, "Ignoring event from superseded handle");
            return;
        }
        shared.live = None;
        self.transition(shared, ConnectionState::Disconnected);

        if shared.manual_close {
            tracing::info!(generation, "Channel closed");
            return;
        }

        match &lost {
            Lost::PeerClosed(frame) => {
                tracing::info!(generation, ?frame, "Server closed connection")
            }
            Lost::Ended => tracing::info!(generation, "Connection dropped"),
            Lost::Failed(e) => tracing::error!(generation, error = %e, "WebSocket error"),
            Lost::Closed => tracing::info!(generation, "Connection closed"),
        }

        for frame in unsent.into_iter().rev() {
            shared.backlog.push_front(frame);
        }
        if !shared.backlog.is_empty() {
            tracing::debug!(backlog = shared.backlog.len(), "Holding unsent frames");
            self.ensure_poll(shared);
        }

        self.schedule_retry(shared);
    }

    /// Start the retry loop unless one is already pending.
    fn schedule_retry(self: &Arc<Self>, shared: &mut Shared) {
        if shared.retry.as_ref().is_some_and(|retry| !retry.is_finished()) {
            tracing::debug!("Reconnection already pending");
            return;
        }
        let inner = Arc::clone(self);
        shared.retry = Some(tokio::spawn(inner.retry_loop()));
    }

    async fn retry_loop(self: Arc<Self>) {
        let mut backoff = BackoffState::new(self.config.retry.clone());

        loop {
            let delay = backoff.next_delay_and_advance();
            tracing::info!(
                attempt = backoff.attempts(),
                delay_ms = delay,
                "Scheduling reconnection"
            );
            tokio::time::sleep(Duration::from_millis(delay)).await;

            if self.lock().manual_close {
                tracing::info!("Reconnection cancelled - intentional close");
                return;
            }

            match self.connect(true).await {
                Ok(()) => return,
                Err(ConnectError::Closed) => return,
                Err(e) => {
                    tracing::warn!(
                        attempt = backoff.attempts(),
                        error = %e,
                        "Reconnection attempt failed"
                    );
                }
            }
        }
    }

    fn enqueue(self: &Arc<Self>, frame: Frame) {
        let mut guard = self.lock();
        let shared = &mut *guard;

        let frame = match (&shared.live, shared.state, shared.backlog.is_empty()) {
            (Some(live), ConnectionState::Open, true) => match live.outbound.send(frame) {
                Ok(()) => return,
                Err(rejected) => rejected.0,
            },
            _ => frame,
        };

        shared.backlog.push_back(frame);
        tracing::debug!(
            backlog = shared.backlog.len(),
            "Channel not open, holding frame for later delivery"
        );
        self.ensure_poll(shared);
    }

    /// Start the backlog poll task unless one is already running.
    fn ensure_poll(self: &Arc<Self>, shared: &mut Shared) {
        if shared.poll.as_ref().is_some_and(|poll| !poll.is_finished()) {
            return;
        }
        let inner = Arc::clone(self);
        shared.poll = Some(tokio::spawn(inner.poll_backlog()));
    }

    async fn poll_backlog(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.config.send_poll_interval).await;
            if self.flush_backlog() {
                return;
            }
        }
    }

    /// Hand backlog frames to the live handle in order. Returns true once the
    /// backlog is empty.
    fn flush_backlog(&self) -> bool {
        let mut guard = self.lock();
        let shared = &mut *guard;

        let Some(live) = shared.live.as_ref().filter(|_| shared.state.is_open()) else {
            return shared.backlog.is_empty();
        };

        let mut flushed = 0usize;
        while let Some(frame) = shared.backlog.pop_front() {
            if let Err(rejected) = live.outbound.send(frame) {
                shared.backlog.push_front(rejected.0);
                break;
            }
            flushed += 1;
        }
        if flushed > 0 {
            tracing::debug!(flushed, generation = live.generation, "Flushed held frames");
        }

        if shared.backlog.is_empty() {
            shared.poll = None;
            true
        } else {
            false
        }
    }

    fn close(&self, code: u16, reason: &str) {
        let (retry, poll) = {
            let mut guard = self.lock();
            let shared = &mut *guard;

            shared.manual_close = true;
            shared.close_epoch += 1;

            let dropped = shared.backlog.len();
            shared.backlog.clear();
            if dropped > 0 {
                tracing::debug!(dropped, "Discarded unsent frames on close");
            }

            let requested = shared.live.as_ref().map(|live| {
                let frame = Frame::Close(Some(CloseFrame::new(code, reason)));
                live.outbound.send(frame).is_ok()
            });
            match requested {
                Some(true) => self.transition(shared, ConnectionState::Closing),
                Some(false) => tracing::debug!("Handle already shutting down"),
                // A handshake in flight resolves the state itself
                None if shared.state == ConnectionState::Connecting => {}
                None => self.transition(shared, ConnectionState::Disconnected),
            }

            (shared.retry.take(), shared.poll.take())
        };

        if let Some(retry) = retry {
            retry.abort();
            tracing::debug!("Cancelled pending reconnection");
        }
        if let Some(poll) = poll {
            poll.abort();
        }
        tracing::info!(code, reason, "Closing channel");
    }
}

/// Resets `Connecting` if a handshake is abandoned before it resolves, e.g.
/// because its retry task was cancelled.
struct AttemptGuard<'a> {
    inner: &'a Inner,
    armed: bool,
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut shared = self.inner.lock();
            if shared.state == ConnectionState::Connecting {
                self.inner
                    .transition(&mut shared, ConnectionState::Disconnected);
            }
        }
    }
}

/// Close a handle nobody wants any more.
async fn shut_down(duplex: Duplex, timeout: Duration) {
    let Duplex { mut sink, .. } = duplex;
    let close = async {
        let _ = sink
            .send(Frame::Close(Some(CloseFrame::new(1000, "closed"))))
            .await;
        let _ = sink.close().await;
    };
    let _ = tokio::time::timeout(timeout, close).await;
}
