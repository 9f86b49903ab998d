// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// HTTP-facing encoding of challenges and solutions.
//
// Proof headers sent by a client retrying a challenged request:
//   x-pow-nonce:     16 hex digits (nonce as big-endian u64)
//   x-pow-timestamp: issued_at, decimal Unix seconds, echoed from the challenge
//   x-pow-base:      the anchor the client solved against, 64 hex digits
//
// Rejections are JSON bodies tagged by "code".

use serde::{Deserialize, Serialize};

use crate::anchor::Anchor;
use crate::work::Difficulty;

pub const HEADER_NONCE: &str = "x-pow-nonce";
pub const HEADER_TIMESTAMP: &str = "x-pow-timestamp";
pub const HEADER_BASE: &str = "x-pow-base";
/// Carries a signed access grant, both from filter to client and back.
pub const HEADER_GRANT: &str = "x-pow-grant";

/// Nonce width on the wire (hex digits).
pub const NONCE_HEX_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseNonceError {
    #[error("nonce must be 1 to 16 hex digits, got {0}")]
    Length(usize),

    #[error("nonce is not valid hex")]
    NotHex,
}

pub fn format_nonce(nonce: u64) -> String {
    format!("{nonce:016x}")
}

pub fn parse_nonce(s: &str) -> Result<u64, ParseNonceError> {
    let s = s.trim();
    if s.is_empty() || s.len() > NONCE_HEX_LEN {
        return Err(ParseNonceError::Length(s.len()));
    }
    // from_str_radix tolerates a leading '+'
    if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ParseNonceError::NotHex);
    }
    u64::from_str_radix(s, 16).map_err(|_| ParseNonceError::NotHex)
}

/// Parameters a client needs to solve a challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeBody {
    /// Anchor to solve against; echo it back in `x-pow-base`
    pub current: Anchor,
    pub difficulty: Difficulty,
    /// `issued_at`; echo it back in `x-pow-timestamp`
    pub timestamp: u64,
    /// Path the solution is bound to
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Rejection {
    PowRequired(ChallengeBody),
    RateLimited {
        message: String,
        retry_after_secs: u64,
    },
    Blocked {
        message: String,
    },
}
