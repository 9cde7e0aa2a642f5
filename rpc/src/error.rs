//!
//! Error definitions: the wire-level [`RpcError`] carried inside JSON-RPC
//! responses and the transport-level [`enum@Error`] returned by server and
//! client operations.
//!

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Success sentinel. Never emitted on the wire; used for metric accounting.
pub const SUCCESS: i64 = 0;
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
/// Bounds of the range reserved for server-implementation-defined errors.
/// Handler-supplied codes are passed through without validation.
pub const RESERVED_MIN_ERROR: i64 = -32099;
pub const RESERVED_MAX_ERROR: i64 = -32000;

/// Canonical message for a system error code.
pub fn canonical_message(code: i64) -> Option<&'static str> {
    match code {
        PARSE_ERROR => Some("Parse error"),
        INVALID_REQUEST => Some("Invalid request"),
        METHOD_NOT_FOUND => Some("Method not found"),
        INVALID_PARAMS => Some("Invalid params"),
        INTERNAL_ERROR => Some("Internal error"),
        _ => None,
    }
}

/// The JSON-RPC 2.0 error record: `{code, message, data?}`. Handlers return
/// this type directly; the dispatcher surfaces it verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("jsonError(code: {code}, message: {message}, data: {data:?})")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> RpcError {
        RpcError {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(code: i64, message: impl Into<String>, data: impl Into<Value>) -> RpcError {
        RpcError {
            code,
            message: message.into(),
            data: Some(data.into()),
        }
    }

    /// Build a system error using the canonical message for `code`.
    pub fn system(code: i64, data: Option<Value>) -> RpcError {
        RpcError {
            code,
            message: canonical_message(code).unwrap_or("Server error").to_string(),
            data,
        }
    }
}

/// Transport and usage errors. These never appear inside a JSON-RPC
/// response; they surface as the operation's return value.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    ProtoDecode(#[from] prost::DecodeError),

    #[error("schema codec produced non-UTF8 output")]
    ProtoEncoding,

    /// The server answered the call with a JSON-RPC error object.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("no result in JSON-RPC response")]
    NoResult,

    #[error("no known transport for URL scheme {0:?}")]
    UnknownScheme(String),

    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("http status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error(transparent)]
    Session(#[from] uniport_websocket::Error),

    #[error(transparent)]
    Grpc(#[from] tonic::transport::Error),

    #[error("client is not configured for JSON-RPC calls")]
    NoJsonRpc,

    #[error("operation is not supported by this client transport")]
    UnsupportedTransport,

    #[error("connection is closed")]
    Closed,

    #[error("RPC call timed out")]
    Timeout,

    #[error("channel receive error")]
    ChannelRecv,

    #[error("channel send error")]
    ChannelSend,

    #[error("{0}")]
    Registration(String),

    #[error("path is invalid. conflict with builtin")]
    PathConflict,

    #[error("server listener is not bound")]
    NotBound,

    #[error("unable to listen on `{0}`: {1}")]
    Listen(String, String),

    #[error("server stop error: {0}")]
    Stop(String),

    #[error("server join error: {0}")]
    Join(String),
}

impl From<tungstenite::Error> for Error {
    fn from(err: tungstenite::Error) -> Self {
        Error::WebSocket(err.to_string())
    }
}

impl<T> From<uniport_core::channel::SendError<T>> for Error {
    fn from(_: uniport_core::channel::SendError<T>) -> Self {
        Error::ChannelSend
    }
}

impl From<uniport_core::channel::RecvError> for Error {
    fn from(_: uniport_core::channel::RecvError) -> Self {
        Error::ChannelRecv
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_messages_cover_system_codes() {
        for code in [
            PARSE_ERROR,
            INVALID_REQUEST,
            METHOD_NOT_FOUND,
            INVALID_PARAMS,
            INTERNAL_ERROR,
        ] {
            assert!(canonical_message(code).is_some());
        }
        assert!(canonical_message(-32000).is_none());
    }

    #[test]
    fn rpc_error_serialization_omits_absent_data() {
        let err = RpcError::new(-32601, "Method not found");
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, r#"{"code":-32601,"message":"Method not found"}"#);
    }
}
