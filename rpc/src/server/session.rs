//!
//! WebSocket session handlers: JSON-RPC frames routed through the
//! dispatcher, raw frames routed to a user callback. Each kind binds the
//! matching notifier into the per-frame request context so handlers can
//! deliver asynchronous messages over the same session after returning.
//! A session is constructed as exactly one of the two kinds.
//!

use crate::context::{RequestContext, SessionNotifier};
use crate::error::SUCCESS;
use crate::imports::*;
use crate::message::SubscriptionNotice;
use crate::metrics::Metrics;
use crate::server::dispatcher::Dispatcher;
use uniport_websocket::{Message as WsMessage, Session, SessionHandler};
use uuid::Uuid;

/// Handle for pushing subscription notices over a JSON-RPC session. The
/// id is an opaque per-session token, typically used as the subscription
/// identifier inside notices; it is not unique across sessions.
#[derive(Clone)]
pub struct RpcNotifier {
    session: Arc<Session>,
    id: String,
}

impl RpcNotifier {
    pub(crate) fn new(session: Arc<Session>) -> RpcNotifier {
        RpcNotifier {
            session,
            id: Token::new().to_string(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Serialize the notice as a JSON-RPC notification and queue it on the
    /// session. Fails once the session is closed.
    pub fn notify(&self, notice: &SubscriptionNotice) -> Result<()> {
        let message = notice.to_message()?;
        let text = serde_json::to_string(&message)?;
        self.session.post(WsMessage::Text(text))?;
        Ok(())
    }

    /// The session's terminal error surface.
    pub fn errors(&self) -> Receiver<uniport_websocket::Error> {
        self.session.errors()
    }

    pub fn close(&self) {
        self.session.close()
    }
}

/// Handle for writing raw frames over a raw session, preserving the frame
/// type chosen by the caller.
#[derive(Clone)]
pub struct RawNotifier {
    session: Arc<Session>,
    id: String,
}

impl RawNotifier {
    pub(crate) fn new(session: Arc<Session>) -> RawNotifier {
        RawNotifier {
            session,
            id: Token::new().to_string(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn write(&self, msg: WsMessage) -> Result<()> {
        self.session.post(msg)?;
        Ok(())
    }

    pub fn errors(&self) -> Receiver<uniport_websocket::Error> {
        self.session.errors()
    }

    pub fn close(&self) {
        self.session.close()
    }
}

/// User callback for raw WebSocket sessions. Receives the per-frame
/// context (with the raw notifier bound) and the frame itself; responses
/// go through the notifier, synchronously or later.
pub type RawWsHandlerFn = Arc<
    Box<
        dyn Fn(RequestContext, WsMessage) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>
            + Send
            + Sync
            + 'static,
    >,
>;

/// Wrap an async closure into a [`RawWsHandlerFn`].
pub fn raw_ws_handler<FN, Fut>(handler: FN) -> RawWsHandlerFn
where
    FN: Fn(RequestContext, WsMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(Box::new(move |ctx, msg| Box::pin(handler(ctx, msg))))
}

/// Session processor for JSON-RPC frames: every inbound data frame goes
/// through the dispatcher and its response is written back through the
/// session's serialized writer.
pub(crate) struct JsonRpcSessionHandler {
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<Metrics>,
}

impl JsonRpcSessionHandler {
    pub(crate) fn new(dispatcher: Arc<Dispatcher>, metrics: Arc<Metrics>) -> JsonRpcSessionHandler {
        JsonRpcSessionHandler {
            dispatcher,
            metrics,
        }
    }
}

#[async_trait]
impl SessionHandler for JsonRpcSessionHandler {
    async fn frame(
        self: &Arc<Self>,
        session: &Arc<Session>,
        msg: WsMessage,
    ) -> uniport_websocket::Result<()> {
        let data = match msg {
            WsMessage::Text(text) => text.into_bytes(),
            WsMessage::Binary(data) => data,
            _ => return Ok(()),
        };

        let notifier = RpcNotifier::new(session.clone());
        let ctx = RequestContext::new(
            self.metrics.clone(),
            "jsonRpc2",
            Value::String(Uuid::new_v4().to_string()),
            data.len(),
            Some(session.peer()),
            Some(SessionNotifier::Rpc(notifier)),
        );

        let outcome = self.dispatcher.dispatch(&ctx, &data).await;
        ctx.end_request(SUCCESS);

        session.post(WsMessage::Text(outcome.to_json()))
    }

    async fn disconnect(self: &Arc<Self>, result: uniport_websocket::Result<()>) {
        if let Err(err) = result {
            debug!("jsonrpc session ended: {err}");
        }
    }
}

/// Session processor for raw frames: bytes and frame type are handed to
/// the user callback untouched.
pub(crate) struct RawSessionHandler {
    handler: RawWsHandlerFn,
    metrics: Arc<Metrics>,
}

impl RawSessionHandler {
    pub(crate) fn new(handler: RawWsHandlerFn, metrics: Arc<Metrics>) -> RawSessionHandler {
        RawSessionHandler { handler, metrics }
    }
}

#[async_trait]
impl SessionHandler for RawSessionHandler {
    async fn frame(
        self: &Arc<Self>,
        session: &Arc<Session>,
        msg: WsMessage,
    ) -> uniport_websocket::Result<()> {
        if !matches!(msg, WsMessage::Text(_) | WsMessage::Binary(_)) {
            return Ok(());
        }

        let size = match &msg {
            WsMessage::Text(text) => text.len(),
            WsMessage::Binary(data) => data.len(),
            _ => 0,
        };
        let notifier = RawNotifier::new(session.clone());
        let ctx = RequestContext::new(
            self.metrics.clone(),
            "rawWs",
            Value::String(Uuid::new_v4().to_string()),
            size,
            Some(session.peer()),
            Some(SessionNotifier::Raw(notifier)),
        );

        (self.handler)(ctx.clone(), msg).await;
        ctx.end_request(SUCCESS);
        Ok(())
    }

    async fn disconnect(self: &Arc<Self>, result: uniport_websocket::Result<()>) {
        if let Err(err) = result {
            debug!("raw session ended: {err}");
        }
    }
}
