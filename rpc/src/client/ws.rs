//!
//! WebSocket transport: a full-duplex session correlating responses to
//! calls through a pending-reply table keyed by the id token, delivering
//! notifications to the subscription sink, and surfacing exactly one
//! terminal error at close.
//!

use crate::client::{BatchElem, CallFactory, ClientOptions, SubscriptionSink, WsFrame, WsMode};
use crate::imports::*;
use crate::message::{Message, SubscriptionParams};
use futures_util::{SinkExt, StreamExt};
use tungstenite::client::IntoClientRequest;
use tungstenite::Message as TungsteniteMessage;

struct Inner {
    factory: CallFactory,
    mode: WsMode,
    sink: Option<SubscriptionSink>,
    writer: Channel<TungsteniteMessage>,
    pending: Mutex<AHashMap<String, Sender<Message>>>,
    errors: Channel<Error>,
    close: SingleTrigger,
    closed: AtomicBool,
}

#[derive(Clone)]
pub struct WsClient {
    inner: Arc<Inner>,
}

impl WsClient {
    pub(crate) async fn dial(url: &str, options: ClientOptions) -> Result<WsClient> {
        let mut request = url.into_client_request()?;
        request.headers_mut().extend(options.headers.clone());
        let (stream, _response) = tokio_tungstenite::connect_async(request).await?;
        let (ws_sink, ws_stream) = stream.split();

        let encoding = options.jsonrpc.map(|opt| opt.encoding).unwrap_or_default();
        let inner = Arc::new(Inner {
            factory: CallFactory::new(encoding),
            mode: options.ws_mode,
            sink: options.subscription_sink,
            writer: Channel::unbounded(),
            pending: Mutex::new(AHashMap::new()),
            errors: Channel::bounded(1),
            close: SingleTrigger::new(),
            closed: AtomicBool::new(false),
        });

        tokio::spawn(writer_task(inner.clone(), ws_sink));
        tokio::spawn(reader_task(inner.clone(), ws_stream));

        Ok(WsClient { inner })
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Terminate the session. The terminal error is published on the error
    /// channel and all pending waiters are released.
    pub fn close(&self) {
        terminate(&self.inner, Error::Closed);
    }

    /// The session's terminal error channel (capacity 1).
    pub fn errors(&self) -> Receiver<Error> {
        self.inner.errors.receiver.clone()
    }

    /// Queue a raw frame, preserving its type.
    pub fn write_raw(&self, frame: WsFrame) -> Result<()> {
        let message = match frame {
            WsFrame::Text(text) => TungsteniteMessage::Text(text),
            WsFrame::Binary(data) => TungsteniteMessage::Binary(data),
        };
        self.post(message)
    }

    pub async fn call<T, P>(&self, method: &str, args: Option<&P>) -> Result<T>
    where
        T: DeserializeOwned,
        P: Serialize,
    {
        if self.inner.mode == WsMode::Raw {
            return Err(Error::UnsupportedTransport);
        }
        let request = self.inner.factory.new_call(method, args)?;
        let receiver = self.register_pending(&request)?;
        if let Err(err) = self.post(TungsteniteMessage::Text(serde_json::to_string(&request)?)) {
            self.forget_pending(&request);
            return Err(err);
        }
        let reply = receiver.recv().await.map_err(|_| Error::Closed)?;
        self.inner.factory.decode_result(&reply)
    }

    pub async fn batch_call(&self, batch: &mut [BatchElem]) -> Result<()> {
        if self.inner.mode == WsMode::Raw {
            return Err(Error::UnsupportedTransport);
        }

        let mut requests = Vec::with_capacity(batch.len());
        let mut receivers = Vec::with_capacity(batch.len());
        for elem in batch.iter() {
            let request = self.inner.factory.new_call(&elem.method, elem.args.as_ref())?;
            receivers.push(self.register_pending(&request)?);
            requests.push(request);
        }

        // one batch write; the reader demultiplexes each response by id
        if let Err(err) = self.post(TungsteniteMessage::Text(serde_json::to_string(&requests)?)) {
            for request in &requests {
                self.forget_pending(request);
            }
            return Err(err);
        }

        for (elem, receiver) in batch.iter_mut().zip(receivers) {
            let reply = receiver.recv().await.map_err(|_| Error::Closed)?;
            if let Some(err) = reply.error {
                elem.error = Some(Error::Rpc(err));
            } else if let Some(result) = reply.result {
                elem.result = Some(result);
            } else {
                elem.error = Some(Error::NoResult);
            }
        }
        Ok(())
    }

    /// Insert the pending-reply slot before the request is written, so the
    /// reader can never race the registration.
    fn register_pending(&self, request: &Message) -> Result<Receiver<Message>> {
        let Some(id) = &request.id else {
            return Err(Error::NoResult);
        };
        let (sender, receiver) = oneshot::<Message>();
        let Ok(mut pending) = self.inner.pending.lock() else {
            return Err(Error::ChannelSend);
        };
        pending.insert(id.get().to_string(), sender);
        Ok(receiver)
    }

    fn forget_pending(&self, request: &Message) {
        if let (Some(id), Ok(mut pending)) = (&request.id, self.inner.pending.lock()) {
            pending.remove(id.get());
        }
    }

    fn post(&self, message: TungsteniteMessage) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        self.inner
            .writer
            .try_send(message)
            .map_err(|_| Error::Closed)
    }
}

async fn writer_task(
    inner: Arc<Inner>,
    mut ws_sink: futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
        TungsteniteMessage,
    >,
) {
    loop {
        let message = tokio::select! {
            _ = inner.close.listener.clone() => break,
            message = inner.writer.recv() => message,
        };
        let Ok(message) = message else { break };
        if let Err(err) = ws_sink.send(message).await {
            terminate(&inner, err.into());
            break;
        }
    }
    ws_sink.close().await.ok();
}

async fn reader_task(
    inner: Arc<Inner>,
    mut ws_stream: futures_util::stream::SplitStream<
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    >,
) {
    loop {
        let next = tokio::select! {
            _ = inner.close.listener.clone() => break,
            next = ws_stream.next() => next,
        };
        match next {
            Some(Ok(TungsteniteMessage::Text(text))) => route_frame(&inner, WsFrame::Text(text)),
            Some(Ok(TungsteniteMessage::Binary(data))) => {
                route_frame(&inner, WsFrame::Binary(data))
            }
            Some(Ok(TungsteniteMessage::Close(_))) | None => {
                terminate(&inner, Error::Closed);
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                terminate(&inner, err.into());
                break;
            }
        }
    }
}

fn route_frame(inner: &Arc<Inner>, frame: WsFrame) {
    if inner.mode == WsMode::Raw {
        match &inner.sink {
            Some(sink) => sink.deliver_frame(frame),
            None => warn!("raw frame dropped: no subscription sink installed"),
        }
        return;
    }

    let text = match &frame {
        WsFrame::Text(text) => text.as_str(),
        WsFrame::Binary(data) => match std::str::from_utf8(data) {
            Ok(text) => text,
            Err(_) => {
                warn!("non-UTF8 frame dropped on JSON-RPC session");
                return;
            }
        },
    };

    if text.trim_start().starts_with('[') {
        match serde_json::from_str::<Vec<Message>>(text) {
            Ok(replies) => {
                for reply in replies {
                    route_message(inner, reply);
                }
            }
            Err(err) => warn!("malformed batch frame dropped: {err}"),
        }
    } else {
        match serde_json::from_str::<Message>(text) {
            Ok(reply) => route_message(inner, reply),
            Err(err) => warn!("malformed frame dropped: {err}"),
        }
    }
}

fn route_message(inner: &Arc<Inner>, message: Message) {
    // responses route to their waiter; notifications to the sink
    if message.is_response() {
        let id = message
            .id
            .as_ref()
            .map(|id| id.get().to_string())
            .unwrap_or_default();
        let waiter = inner
            .pending
            .lock()
            .ok()
            .and_then(|mut pending| pending.remove(&id));
        match waiter {
            Some(waiter) => {
                waiter.try_send(message).ok();
            }
            None => warn!("response with no pending waiter: id {id}"),
        }
    } else if message.method.is_some() {
        let Some(sink) = &inner.sink else {
            trace!("notification dropped: no subscription sink installed");
            return;
        };
        let Some(params) = message.params.as_deref() else {
            warn!("notification without params dropped");
            return;
        };
        match serde_json::from_str::<SubscriptionParams>(params.get()) {
            Ok(subscription) => match subscription.result.as_deref() {
                Some(payload) => sink.deliver_payload(payload),
                None => warn!("subscription notice without result dropped"),
            },
            Err(err) => warn!("malformed subscription notice dropped: {err}"),
        }
    } else {
        warn!("unroutable frame dropped");
    }
}

/// Exactly-once teardown: publish the terminal error, fire the close
/// trigger and release every pending waiter.
fn terminate(inner: &Arc<Inner>, err: Error) {
    if inner.closed.swap(true, Ordering::SeqCst) {
        return;
    }
    inner.errors.try_send(err).ok();
    inner.close.trigger.trigger();
    if let Ok(mut pending) = inner.pending.lock() {
        // dropping the senders wakes each waiter with a closed-channel error
        pending.clear();
    }
}
