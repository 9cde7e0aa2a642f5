//!
//! Multi-transport RPC client. [`dial`] selects the transport from the URL
//! scheme: `http(s)` posts JSON-RPC bodies, `ws(s)` runs a full-duplex
//! session with request correlation and subscription delivery, `grpc`
//! opens a binary RPC channel and exposes it for generated stubs.
//!

pub mod grpc;
pub mod http;
pub mod ws;

use crate::imports::*;
use crate::message::Message;
use serde_json::value::to_raw_value;

pub use crate::server::HttpMethod;
pub use grpc::GrpcClient;
pub use http::HttpClient;
pub use ws::WsClient;

/// An element in a batch request. The per-element `result`/`error` slots
/// are populated by `batch_call`; the top-level error reflects transport
/// failures only.
#[derive(Debug, Default)]
pub struct BatchElem {
    pub method: String,
    pub args: Option<Value>,
    pub result: Option<Box<RawValue>>,
    pub error: Option<Error>,
}

impl BatchElem {
    pub fn new(method: impl Into<String>, args: Option<Value>) -> BatchElem {
        BatchElem {
            method: method.into(),
            args,
            ..BatchElem::default()
        }
    }

    /// Decode the populated result slot into the caller's type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        match &self.result {
            Some(raw) => Ok(serde_json::from_str(raw.get())?),
            None => Err(Error::NoResult),
        }
    }
}

/// Status and body of a raw HTTP exchange.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// A raw WebSocket frame, preserving the text/binary distinction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsFrame {
    Text(String),
    Binary(Vec<u8>),
}

/// How a WebSocket client interprets inbound frames: as JSON-RPC traffic
/// (responses correlated by id, notifications decoded into the sink) or as
/// raw frames delivered to the sink untouched.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum WsMode {
    #[default]
    JsonRpc,
    Raw,
}

/// Delivery target for server-initiated messages. Constructed over a user
/// channel with the payload type fixed at build time; decode failures are
/// logged and skipped.
#[derive(Clone)]
pub struct SubscriptionSink {
    inner: SinkInner,
}

#[derive(Clone)]
enum SinkInner {
    Typed(Arc<Box<dyn Fn(&RawValue) + Send + Sync + 'static>>),
    Frames(Sender<WsFrame>),
}

impl SubscriptionSink {
    /// Sink for JSON-RPC subscription notices: the `params.result` payload
    /// of each notice is decoded into `T` and sent on the channel.
    pub fn typed<T>(sender: Sender<T>) -> SubscriptionSink
    where
        T: DeserializeOwned + Send + 'static,
    {
        SubscriptionSink {
            inner: SinkInner::Typed(Arc::new(Box::new(move |raw| {
                match serde_json::from_str::<T>(raw.get()) {
                    Ok(value) => {
                        if sender.try_send(value).is_err() {
                            warn!("subscription sink is full or closed; payload dropped");
                        }
                    }
                    Err(err) => warn!("subscription payload decode failed: {err}"),
                }
            }))),
        }
    }

    /// Sink for raw mode: whole frames, type preserved.
    pub fn frames(sender: Sender<WsFrame>) -> SubscriptionSink {
        SubscriptionSink {
            inner: SinkInner::Frames(sender),
        }
    }

    pub(crate) fn deliver_payload(&self, raw: &RawValue) {
        match &self.inner {
            SinkInner::Typed(deliver) => deliver(raw),
            SinkInner::Frames(_) => warn!("frame sink cannot take subscription payloads"),
        }
    }

    pub(crate) fn deliver_frame(&self, frame: WsFrame) {
        match &self.inner {
            SinkInner::Frames(sender) => {
                if sender.try_send(frame).is_err() {
                    warn!("subscription sink is full or closed; frame dropped");
                }
            }
            SinkInner::Typed(_) => warn!("typed sink cannot take raw frames"),
        }
    }
}

/// JSON-RPC layer configuration for a client.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonRpcOptions {
    pub encoding: Encoding,
}

#[derive(Default)]
pub struct ClientOptions {
    /// Enables the JSON-RPC call surface. HTTP clients without it can only
    /// use `raw_http`.
    pub jsonrpc: Option<JsonRpcOptions>,
    /// Passthrough headers attached to HTTP requests and the WebSocket
    /// handshake.
    pub headers: ::http::HeaderMap,
    pub ws_mode: WsMode,
    pub subscription_sink: Option<SubscriptionSink>,
}

/// Shared JSON-RPC call machinery: id assignment and result decoding. Ids
/// are a monotonically increasing counter emitted as bare integers.
pub(crate) struct CallFactory {
    #[allow(dead_code)]
    encoding: Encoding,
    ids: SequenceId,
}

impl CallFactory {
    pub(crate) fn new(encoding: Encoding) -> CallFactory {
        CallFactory {
            encoding,
            ids: SequenceId::new(),
        }
    }

    pub(crate) fn new_call<P: Serialize>(
        &self,
        method: &str,
        args: Option<&P>,
    ) -> Result<Message> {
        let id = to_raw_value(&self.ids.next())?;
        // absent args stay absent; never send "params":null
        let params = match args {
            Some(args) => Some(to_raw_value(args)?),
            None => None,
        };
        Ok(Message::call(id, method, params))
    }

    pub(crate) fn decode_result<T: DeserializeOwned>(&self, reply: &Message) -> Result<T> {
        if let Some(err) = &reply.error {
            return Err(Error::Rpc(err.clone()));
        }
        let Some(raw) = &reply.result else {
            return Err(Error::NoResult);
        };
        Ok(serde_json::from_str(raw.get())?)
    }
}

/// A connected client, one variant per transport.
pub enum Client {
    Http(HttpClient),
    WebSocket(WsClient),
    Grpc(GrpcClient),
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Client::Http(_) => f.write_str("Client::Http"),
            Client::WebSocket(_) => f.write_str("Client::WebSocket"),
            Client::Grpc(_) => f.write_str("Client::Grpc"),
        }
    }
}

/// Connect to `url`, selecting the transport from the scheme.
pub async fn dial(url: &str, options: ClientOptions) -> Result<Client> {
    let parsed = reqwest::Url::parse(url).map_err(|err| Error::InvalidUrl(err.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(Client::Http(HttpClient::dial(parsed, options)?)),
        "ws" | "wss" => Ok(Client::WebSocket(WsClient::dial(url, options).await?)),
        "grpc" => Ok(Client::Grpc(GrpcClient::dial(&parsed).await?)),
        scheme => Err(Error::UnknownScheme(scheme.to_string())),
    }
}

impl Client {
    /// Single request, single correlated response, decoded into `T`.
    pub async fn call<T, P>(&self, method: &str, args: Option<P>) -> Result<T>
    where
        T: DeserializeOwned,
        P: Serialize,
    {
        match self {
            Client::Http(client) => client.call(method, args.as_ref()).await,
            Client::WebSocket(client) => client.call(method, args.as_ref()).await,
            Client::Grpc(_) => Err(Error::UnsupportedTransport),
        }
    }

    /// One batch request; per-element outcomes land in the elements.
    pub async fn batch_call(&self, batch: &mut [BatchElem]) -> Result<()> {
        match self {
            Client::Http(client) => client.batch_call(batch).await,
            Client::WebSocket(client) => client.batch_call(batch).await,
            Client::Grpc(_) => Err(Error::UnsupportedTransport),
        }
    }

    /// Bypass JSON-RPC framing entirely.
    pub async fn raw_http(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<HttpResponse> {
        match self {
            Client::Http(client) => client.raw_http(method, path, body).await,
            _ => Err(Error::UnsupportedTransport),
        }
    }

    /// Queue a raw frame on the WebSocket session.
    pub fn write_ws(&self, frame: WsFrame) -> Result<()> {
        match self {
            Client::WebSocket(client) => client.write_raw(frame),
            _ => Err(Error::UnsupportedTransport),
        }
    }

    /// The WebSocket session's terminal error channel.
    pub fn ws_errors(&self) -> Result<Receiver<Error>> {
        match self {
            Client::WebSocket(client) => Ok(client.errors()),
            _ => Err(Error::UnsupportedTransport),
        }
    }

    /// The underlying channel for generated binary RPC stubs.
    pub fn underlying_grpc(&self) -> Option<tonic::transport::Channel> {
        match self {
            Client::Grpc(client) => Some(client.underlying()),
            _ => None,
        }
    }

    pub fn close(&self) {
        if let Client::WebSocket(client) = self {
            client.close();
        }
    }
}
