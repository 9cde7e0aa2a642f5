//!
//! Shared plumbing for the `uniport` crates.
//!
//! This crate carries the small building blocks used across the uniport
//! workspace: [`channel`] wrappers combining sender and receiver halves,
//! [`trigger`] shutdown signaling and [`id`] generation for call sequence
//! numbers and subscription tokens.
//!

pub mod channel;
pub mod id;
pub mod trigger;

pub mod prelude {
    //! Common uniport-core imports
    pub use crate::channel::{oneshot, Channel, DuplexChannel};
    pub use crate::id::{SequenceId, Token};
    pub use crate::trigger::SingleTrigger;
}
