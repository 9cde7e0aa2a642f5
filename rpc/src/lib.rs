//!
//! uniport-rpc serves JSON-RPC 2.0 over HTTP and WebSocket while accepting
//! native binary RPC (gRPC) traffic on the same TCP port via protocol
//! sniffing. The crate provides both sides of the wire:
//!
//! - [`server::Server`]: a service registry built from boxed async
//!   handlers, a batch-aware dispatcher with canonical JSON-RPC error
//!   coding, a WebSocket session surface with server-initiated subscription
//!   notices, and a connection multiplexer that classifies accepted
//!   connections without consuming bytes.
//! - [`client::Client`]: a multi-transport client selected by URL scheme
//!   (`http(s)`, `ws(s)`, `grpc`) with call/batch correlation and typed
//!   subscription sinks.
//!

pub mod client;
pub mod codec;
pub mod context;
pub mod encoding;
pub mod error;
mod imports;
pub mod message;
pub mod metrics;
pub mod result;
pub mod server;

pub mod prelude {
    //! Common uniport-rpc imports
    pub use crate::client::{dial, BatchElem, Client, ClientOptions, SubscriptionSink, WsMode};
    pub use crate::context::RequestContext;
    pub use crate::encoding::Encoding;
    pub use crate::error::{Error, RpcError};
    pub use crate::message::{Message, Response, SubscriptionNotice};
    pub use crate::metrics::Metrics;
    pub use crate::result::Result;
    pub use crate::server::{
        HttpMethod, Method, RawResponse, SchemaMethod, Server, ServerOptions, Service,
    };
}
