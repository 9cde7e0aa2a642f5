//!
//! Per-connection session state machine: reader task, dispatcher loop and
//! keep-alive ping loop coordinated through close triggers and channels.
//!

use crate::error::Error;
use crate::result::Result;
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use uniport_core::channel::{Channel, Receiver};
use uniport_core::trigger::SingleTrigger;

/// Outbound write buffer handed to the transport at upgrade time.
pub const WRITE_BUFFER_SIZE: usize = 4096;
/// Largest accepted inbound message.
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;
/// Keep-alive probe interval. Reset by any outbound non-ping write.
pub const PING_INTERVAL: Duration = Duration::from_secs(60);
/// Write deadline applied to keep-alive probes.
pub const PING_WRITE_TIMEOUT: Duration = Duration::from_secs(5);
/// How long a pong may take to arrive after a probe.
pub const PONG_TIMEOUT: Duration = Duration::from_secs(30);
/// Write deadline applied to regular frames.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Atomic counters tracking session counts and cumulative message sizes in
/// bytes (without accounting for frame overhead). Created externally and
/// shared across sessions.
#[derive(Debug, Default)]
pub struct SessionCounters {
    pub total_sessions: AtomicUsize,
    pub active_sessions: AtomicUsize,
    pub rx_bytes: AtomicUsize,
    pub tx_bytes: AtomicUsize,
}

/// Frame processor installed into a [`Session`]. Frames are delivered in
/// arrival order, one at a time; a returned error terminates the session.
#[async_trait]
pub trait SessionHandler: Send + Sync + 'static {
    /// Called for every inbound data frame.
    async fn frame(self: &Arc<Self>, session: &Arc<Session>, msg: Message) -> Result<()>;

    /// Called once after the session loop has exited, with the loop result.
    async fn disconnect(self: &Arc<Self>, _result: Result<()>) {}
}

/// A live WebSocket session. All writes (responses, notifications and
/// keep-alive probes alike) go through [`Session::post`], which feeds the
/// single sink owned by the dispatcher loop. Only that loop ever touches the
/// socket's write half, so frames never interleave.
pub struct Session {
    peer: SocketAddr,
    sink: Channel<Message>,
    read_out: Channel<Message>,
    read_err: Channel<Error>,
    close: SingleTrigger,
    done: SingleTrigger,
    ping_reset: Channel<()>,
    error: Channel<Error>,
    pong_deadline: Mutex<Option<Instant>>,
    closed: AtomicBool,
    counters: Arc<SessionCounters>,
}

impl Session {
    /// Take ownership of an upgraded socket and spawn the session tasks.
    /// The returned handle can be retained for posting frames, closing the
    /// session and consuming the terminal error.
    pub fn spawn<H>(
        socket: WebSocket,
        peer: SocketAddr,
        handler: Arc<H>,
        counters: Arc<SessionCounters>,
    ) -> Arc<Session>
    where
        H: SessionHandler,
    {
        counters.total_sessions.fetch_add(1, Ordering::Relaxed);
        counters.active_sessions.fetch_add(1, Ordering::Relaxed);

        let session = Arc::new(Session {
            peer,
            sink: Channel::unbounded(),
            read_out: Channel::bounded(1),
            read_err: Channel::bounded(1),
            close: SingleTrigger::new(),
            done: SingleTrigger::new(),
            ping_reset: Channel::bounded(1),
            error: Channel::bounded(1),
            pong_deadline: Mutex::new(None),
            closed: AtomicBool::new(false),
            counters,
        });

        let (ws_sink, ws_stream) = socket.split();
        tokio::spawn(session.clone().reader_task(ws_stream));
        tokio::spawn(session.clone().ping_task());
        tokio::spawn(session.clone().pump_task(ws_sink, handler));

        session
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Queue an outbound frame. Never blocks; fails once the session is
    /// closed.
    pub fn post(&self, msg: Message) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::SessionClosed);
        }
        self.sink.try_send(msg).map_err(|_| Error::SessionClosed)
    }

    /// The session error surface: capacity 1, receives the terminal error
    /// exactly once at teardown.
    pub fn errors(&self) -> Receiver<Error> {
        self.error.receiver.clone()
    }

    /// Signal session termination. Idempotent; repeated calls are no-ops.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.close.trigger.trigger();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Block until every session task has observed shutdown.
    pub async fn join(&self) {
        self.done.listener.clone().await;
    }

    pub async fn close_and_join(&self) {
        self.close();
        self.join().await;
    }

    async fn reader_task(self: Arc<Self>, mut stream: SplitStream<WebSocket>) {
        loop {
            let next = tokio::select! {
                _ = self.close.listener.clone() => break,
                next = stream.next() => next,
            };
            match next {
                Some(Ok(Message::Text(text))) => {
                    self.counters.rx_bytes.fetch_add(text.len(), Ordering::Relaxed);
                    if !self.forward(Message::Text(text)).await {
                        break;
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    self.counters.rx_bytes.fetch_add(data.len(), Ordering::Relaxed);
                    if !self.forward(Message::Binary(data)).await {
                        break;
                    }
                }
                Some(Ok(Message::Pong(_))) => {
                    if let Ok(mut slot) = self.pong_deadline.lock() {
                        *slot = None;
                    }
                }
                // the transport replies to pings on its own
                Some(Ok(Message::Ping(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    self.read_err.try_send(Error::RemoteClose).ok();
                    break;
                }
                Some(Err(err)) => {
                    self.read_err.try_send(err.into()).ok();
                    break;
                }
            }
        }
    }

    async fn forward(&self, msg: Message) -> bool {
        tokio::select! {
            _ = self.close.listener.clone() => false,
            sent = self.read_out.send(msg) => sent.is_ok(),
        }
    }

    async fn ping_task(self: Arc<Self>) {
        loop {
            // snapshot the armed pong deadline for this select round; the
            // reader clears the slot when the pong arrives
            let pong_deadline = self.pong_deadline.lock().ok().and_then(|slot| *slot);
            tokio::select! {
                _ = self.close.listener.clone() => break,
                // outbound activity observed; restart the interval
                _ = self.ping_reset.recv() => continue,
                _ = Self::pong_wait(pong_deadline) => {
                    let still_overdue = self
                        .pong_deadline
                        .lock()
                        .map(|slot| matches!(*slot, Some(deadline) if Instant::now() >= deadline))
                        .unwrap_or(false);
                    if still_overdue {
                        self.error.try_send(Error::KeepAliveTimeout).ok();
                        self.close();
                        break;
                    }
                }
                _ = tokio::time::sleep(PING_INTERVAL) => {
                    if let Ok(mut slot) = self.pong_deadline.lock() {
                        if slot.is_none() {
                            *slot = Some(Instant::now() + PONG_TIMEOUT);
                        }
                    }
                    if self.sink.try_send(Message::Ping(Vec::new())).is_err() {
                        break;
                    }
                }
            }
        }
    }

    /// Resolves at the armed pong deadline; pends forever while no probe is
    /// outstanding.
    async fn pong_wait(deadline: Option<Instant>) {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }

    async fn pump_task<H>(
        self: Arc<Self>,
        mut ws_sink: SplitSink<WebSocket, Message>,
        handler: Arc<H>,
    ) where
        H: SessionHandler,
    {
        let result = self.pump_loop(&mut ws_sink, &handler).await;

        // single teardown path: close signal, transport close, waiter
        // release, terminal error publication
        self.closed.store(true, Ordering::SeqCst);
        self.close.trigger.trigger();
        ws_sink.close().await.ok();

        let terminal = result
            .clone()
            .err()
            .unwrap_or(Error::ServerClose(self.peer));
        log::trace!("session {} finished: {terminal}", self.peer);
        self.error.try_send(terminal).ok();

        handler.disconnect(result).await;
        self.counters.active_sessions.fetch_sub(1, Ordering::Relaxed);
        self.done.trigger.trigger();
    }

    async fn pump_loop<H>(
        self: &Arc<Self>,
        ws_sink: &mut SplitSink<WebSocket, Message>,
        handler: &Arc<H>,
    ) -> Result<()>
    where
        H: SessionHandler,
    {
        loop {
            tokio::select! {
                _ = self.close.listener.clone() => return Ok(()),
                err = self.read_err.recv() => {
                    return match err {
                        Ok(err) => Err(err),
                        Err(_) => Ok(()),
                    };
                }
                msg = self.sink.recv() => {
                    let Ok(msg) = msg else { return Ok(()) };
                    self.write_frame(ws_sink, msg).await?;
                }
                msg = self.read_out.recv() => {
                    let Ok(msg) = msg else { return Ok(()) };
                    handler.frame(self, msg).await?;
                }
            }
        }
    }

    async fn write_frame(
        &self,
        ws_sink: &mut SplitSink<WebSocket, Message>,
        msg: Message,
    ) -> Result<()> {
        let (is_ping, len) = match &msg {
            Message::Ping(data) | Message::Pong(data) => (true, data.len()),
            Message::Text(text) => (false, text.len()),
            Message::Binary(data) => (false, data.len()),
            Message::Close(_) => (false, 0),
        };
        let deadline = if is_ping {
            PING_WRITE_TIMEOUT
        } else {
            WRITE_TIMEOUT
        };
        match tokio::time::timeout(deadline, ws_sink.send(msg)).await {
            Ok(Ok(())) => {
                self.counters.tx_bytes.fetch_add(len, Ordering::Relaxed);
                if !is_ping {
                    self.ping_reset.try_send(()).ok();
                }
                Ok(())
            }
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Err(Error::WriteTimeout),
        }
    }
}
