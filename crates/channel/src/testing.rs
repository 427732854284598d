//! In-memory transport for driving the channel client in tests.
//!
//! Every accepted handshake yields a [`Peer`] the test uses to act as the game
//! server: push frames, read what the client sent, drop or break the handle.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{sink, stream, StreamExt};
use tokio::sync::mpsc;
use url::Url;

use crate::error::TransportError;
use crate::transport::{CloseFrame, Duplex, Frame, Transport};

/// What the next handshake does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    Accept,
    Refuse,
}

#[derive(Default)]
struct Script {
    queued: VecDeque<Handshake>,
    refuse_by_default: bool,
    delay: Duration,
    opens: usize,
    in_flight: usize,
    max_in_flight: usize,
}

/// Scripted transport. Accepts every handshake unless told otherwise.
pub struct ScriptedTransport {
    script: Mutex<Script>,
    peers_tx: mpsc::UnboundedSender<Peer>,
    peers_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Peer>>,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransport {
    pub fn new() -> Self {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        Self {
            script: Mutex::new(Script::default()),
            peers_tx,
            peers_rx: tokio::sync::Mutex::new(peers_rx),
        }
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refuse the next `n` handshakes, then fall back to the default.
    pub fn refuse_next(&self, n: usize) {
        let mut script = self.script();
        script
            .queued
            .extend(std::iter::repeat(Handshake::Refuse).take(n));
    }

    /// Refuse (`true`) or accept (`false`) every handshake not explicitly queued.
    pub fn refuse_all(&self, refuse: bool) {
        self.script().refuse_by_default = refuse;
    }

    /// Make every handshake take `delay` before resolving.
    pub fn set_handshake_delay(&self, delay: Duration) {
        self.script().delay = delay;
    }

    /// Number of handshakes started so far.
    pub fn open_count(&self) -> usize {
        self.script().opens
    }

    /// Highest number of handshakes that were in flight at the same time.
    pub fn max_concurrent_opens(&self) -> usize {
        self.script().max_in_flight
    }

    /// Wait for the next accepted handle.
    pub async fn next_peer(&self) -> Peer {
        self.peers_rx
            .lock()
            .await
            .recv()
            .await
            .expect("transport owns a peer sender")
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, _endpoint: &Url) -> Result<Duplex, TransportError> {
        let (handshake, delay) = {
            let mut script = self.script();
            script.opens += 1;
            script.in_flight += 1;
            script.max_in_flight = script.max_in_flight.max(script.in_flight);
            let fallback = if script.refuse_by_default {
                Handshake::Refuse
            } else {
                Handshake::Accept
            };
            (script.queued.pop_front().unwrap_or(fallback), script.delay)
        };

        // Also released when the caller gives up on a slow handshake
        let in_flight = InFlight(self);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        drop(in_flight);

        match handshake {
            Handshake::Refuse => Err(TransportError::Handshake("connection refused".into())),
            Handshake::Accept => {
                let (duplex, peer) = Peer::pair();
                let _ = self.peers_tx.send(peer);
                Ok(duplex)
            }
        }
    }
}

struct InFlight<'a>(&'a ScriptedTransport);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.script().in_flight -= 1;
    }
}

/// Server side of one accepted handle.
pub struct Peer {
    to_client: Option<mpsc::UnboundedSender<Result<Frame, TransportError>>>,
    from_client: mpsc::UnboundedReceiver<Frame>,
    writes_broken: Arc<AtomicBool>,
}

impl Peer {
    fn pair() -> (Duplex, Peer) {
        let (to_client, inbound) = mpsc::unbounded_channel::<Result<Frame, TransportError>>();
        let (outbound, from_client) = mpsc::unbounded_channel::<Frame>();
        let writes_broken = Arc::new(AtomicBool::new(false));

        let stream = stream::unfold(inbound, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed();

        // Close frames are echoed back, as a WebSocket server does. The echo
        // path must not keep the inbound stream alive after a drop.
        let echo = to_client.downgrade();
        let broken = Arc::clone(&writes_broken);
        let sink = sink::unfold(
            (outbound, echo),
            move |(outbound, echo), frame: Frame| {
                let broken = broken.load(Ordering::SeqCst);
                async move {
                    if broken {
                        return Err(TransportError::Send("broken pipe".into()));
                    }
                    if let (Frame::Close(close), Some(tx)) = (&frame, echo.upgrade()) {
                        let _ = tx.send(Ok(Frame::Close(close.clone())));
                    }
                    outbound
                        .send(frame)
                        .map_err(|_| TransportError::Send("peer gone".into()))?;
                    Ok((outbound, echo))
                }
            },
        );

        let duplex = Duplex {
            sink: Box::pin(sink),
            stream,
        };
        let peer = Peer {
            to_client: Some(to_client),
            from_client,
            writes_broken,
        };
        (duplex, peer)
    }

    fn push(&self, item: Result<Frame, TransportError>) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(item);
        }
    }

    pub fn send_text(&self, text: impl Into<String>) {
        self.push(Ok(Frame::Text(text.into())));
    }

    pub fn send_binary(&self, bytes: Vec<u8>) {
        self.push(Ok(Frame::Binary(bytes)));
    }

    /// Server-initiated close frame.
    pub fn close(&self, code: u16, reason: &str) {
        self.push(Ok(Frame::Close(Some(CloseFrame::new(code, reason)))));
    }

    /// Report a stream error on the handle.
    pub fn fail(&self, message: &str) {
        self.push(Err(TransportError::Stream(message.to_string())));
    }

    /// Abruptly end the inbound stream without a close frame.
    pub fn drop_connection(&mut self) {
        self.to_client = None;
    }

    /// Make every subsequent client write fail.
    pub fn break_writes(&self) {
        self.writes_broken.store(true, Ordering::SeqCst);
    }

    /// Next frame written by the client, or `None` once the handle is gone.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.from_client.recv().await
    }

    /// Next frame written by the client, failing the test after `timeout`.
    pub async fn expect_frame(&mut self, timeout: Duration) -> Frame {
        tokio::time::timeout(timeout, self.recv())
            .await
            .expect("client frame within timeout")
            .expect("handle still open")
    }

    /// Frame written by the client right now, if any.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.from_client.try_recv().ok()
    }
}
