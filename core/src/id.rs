//!
//! Identifier generation: a monotonic [`SequenceId`] for client call ids and
//! a random 64-bit [`Token`] rendered as a `0x`-prefixed hex string for
//! subscription and notifier handles.
//!

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid token: {0}")]
    InvalidToken(String),
}

/// Monotonically increasing sequence, starting at 1. Used for JSON-RPC
/// request ids, which travel as bare integers on the wire.
#[derive(Debug, Default)]
pub struct SequenceId {
    next: AtomicU64,
}

impl SequenceId {
    pub fn new() -> SequenceId {
        SequenceId {
            next: AtomicU64::new(0),
        }
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Random 64-bit identifier that renders as a `0x`-prefixed, zero-padded
/// hex string. Tokens are opaque handles scoped to the session that created
/// them; they are not unique across sessions.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(u64);

impl Token {
    pub fn new() -> Token {
        Token(rand::random::<u64>())
    }

    pub fn to_bits(self) -> u64 {
        self.0
    }
}

impl Default for Token {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

impl FromStr for Token {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s
            .strip_prefix("0x")
            .ok_or_else(|| Error::InvalidToken(s.to_string()))?;
        u64::from_str_radix(hex, 16)
            .map(Token)
            .map_err(|_| Error::InvalidToken(s.to_string()))
    }
}

impl Serialize for Token {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Token {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Token::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_starts_at_one() {
        let seq = SequenceId::new();
        assert_eq!(seq.next(), 1);
        assert_eq!(seq.next(), 2);
    }

    #[test]
    fn token_round_trips_through_display() {
        let token = Token::new();
        let text = token.to_string();
        assert!(text.starts_with("0x"));
        assert_eq!(text.len(), 18);
        assert_eq!(Token::from_str(&text).unwrap(), token);
    }

    #[test]
    fn token_rejects_bare_hex() {
        assert!(Token::from_str("5ec9").is_err());
    }
}
