//!
//! Server-side WebSocket session engine (requires tokio executor).
//!
//! A [`session::Session`] owns one upgraded WebSocket connection and runs
//! three cooperating tasks: a reader, a dispatcher loop that hands inbound
//! frames to the installed [`session::SessionHandler`], and a resettable
//! keep-alive ping loop. All outbound frames funnel through a single sink
//! consumed by the dispatcher loop, so writes never interleave at the frame
//! layer.
//!

pub mod error;
pub mod result;
pub mod session;

pub use axum::extract::ws::{Message, WebSocket};
pub use error::Error;
pub use result::Result;
pub use session::{Session, SessionCounters, SessionHandler};
