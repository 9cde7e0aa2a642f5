//!
//! Module containing the [`Encoding`] selection enum used by server and
//! client constructors.
//!

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

/// Codec family for RPC parameters and results: plain JSON or the
/// schema-driven JSON variant backed by protobuf descriptors.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, Hash, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum Encoding {
    #[default]
    Json = 0,
    Protobuf = 1,
}

impl Display for Encoding {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Encoding::Json => "JSON",
            Encoding::Protobuf => "Protobuf",
        };
        f.write_str(s)
    }
}

impl FromStr for Encoding {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Encoding::Json),
            "protobuf" | "proto" => Ok(Encoding::Protobuf),
            _ => Err(Error::Registration(format!(
                "invalid encoding: {s} (must be: 'json' or 'protobuf')"
            ))),
        }
    }
}
