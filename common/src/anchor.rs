// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Entropy anchor: an unpredictable, periodically rotating 32-byte value that
// every challenge is bound to. Rendered as 64 lowercase hex characters.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Anchor size (bytes).
pub const ANCHOR_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ParseAnchorError {
    #[error("anchor must be {expected} hex characters, got {got}")]
    Length { expected: usize, got: usize },

    #[error("anchor is not valid hex: {0}")]
    Hex(#[from] hex::FromHexError),
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Anchor([u8; ANCHOR_LEN]);

impl Anchor {
    pub const fn from_bytes(bytes: [u8; ANCHOR_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ANCHOR_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for Anchor {
    type Err = ParseAnchorError;

    /// Parse an anchor from hex. Surrounding whitespace (a trailing newline
    /// from an HTTP body, typically) is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != ANCHOR_LEN * 2 {
            return Err(ParseAnchorError::Length {
                expected: ANCHOR_LEN * 2,
                got: s.len(),
            });
        }
        let mut bytes = [0u8; ANCHOR_LEN];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Anchor({})", self.to_hex())
    }
}

impl Serialize for Anchor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Anchor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
