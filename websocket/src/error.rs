//!
//! [`enum@Error`] declarations for the session engine.
//!

use std::net::SocketAddr;
use thiserror::Error;

/// Session-level errors. Clonable so the terminal error can be published on
/// the session error channel and also returned to the handler.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The remote endpoint closed the connection (close frame or EOF).
    #[error("connection closed by remote")]
    RemoteClose,

    /// The session was closed locally.
    #[error("server close from {0}")]
    ServerClose(SocketAddr),

    #[error("websocket transport error: {0}")]
    Transport(String),

    #[error("write timed out")]
    WriteTimeout,

    /// No pong arrived within the pong wait after a keep-alive probe.
    #[error("keep-alive timed out")]
    KeepAliveTimeout,

    #[error("session is closed")]
    SessionClosed,

    #[error("{0}")]
    Handler(String),
}

impl From<axum::Error> for Error {
    fn from(err: axum::Error) -> Self {
        Error::Transport(err.to_string())
    }
}
