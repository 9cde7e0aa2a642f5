pub use crate::encoding::Encoding;
pub use crate::error::{Error, RpcError};
pub use crate::result::Result;
pub use ahash::AHashMap;
pub use async_trait::async_trait;
pub use futures::Future;
pub use log::{debug, error, info, trace, warn};
pub use serde::{de::DeserializeOwned, Deserialize, Serialize};
pub use serde_json::value::RawValue;
pub use serde_json::{self, Value};
pub use std::fmt::Debug;
pub use std::marker::PhantomData;
pub use std::net::SocketAddr;
pub use std::pin::Pin;
pub use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
pub use std::sync::{Arc, Mutex, RwLock};
pub use std::time::Duration;
pub use tokio::time::Instant;
pub use uniport_core::channel::{oneshot, Channel, DuplexChannel, Receiver, Sender};
pub use uniport_core::id::{SequenceId, Token};
pub use uniport_core::trigger::SingleTrigger;
