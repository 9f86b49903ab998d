// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Stateless proof-of-work challenges.
//!
//! Nothing is stored per client. A challenge is the tuple
//! `(path, anchor, issued_at, difficulty)`; a solution echoes it with a
//! nonce, and verification recomputes the digest with
//! [`powgate_common::Puzzle`], the same code the solver runs.

use crate::anchor::{AnchorError, AnchorRing};
use crate::config::ChallengeConfig;
use powgate_common::wire::{HEADER_BASE, HEADER_NONCE, HEADER_TIMESTAMP};
use powgate_common::{parse_nonce, Anchor, ChallengeBody, Difficulty, Puzzle};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Parameters handed to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub path: String,
    pub anchor: Anchor,
    pub issued_at: u64,
    pub difficulty: Difficulty,
}

impl Challenge {
    pub fn body(&self, message: impl Into<String>) -> ChallengeBody {
        ChallengeBody {
            current: self.anchor,
            difficulty: self.difficulty,
            timestamp: self.issued_at,
            path: self.path.clone(),
            message: message.into(),
        }
    }
}

/// A client's answer. `path` is always the path of the request carrying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Solution {
    pub path: String,
    pub anchor: Anchor,
    pub issued_at: u64,
    pub nonce: u64,
}

/// Raw proof header values as received.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofHeaders {
    pub nonce: String,
    pub timestamp: String,
    pub base: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ProofError {
    #[error("invalid {HEADER_NONCE}: {0}")]
    Nonce(#[from] powgate_common::ParseNonceError),

    #[error("invalid {HEADER_TIMESTAMP}")]
    Timestamp,

    #[error("invalid {HEADER_BASE}: {0}")]
    Base(#[from] powgate_common::ParseAnchorError),
}

impl Solution {
    pub fn from_headers(path: &str, proof: &ProofHeaders) -> Result<Self, ProofError> {
        Ok(Self {
            path: path.to_string(),
            anchor: proof.base.parse()?,
            issued_at: proof.timestamp.trim().parse().map_err(|_| ProofError::Timestamp)?,
            nonce: parse_nonce(&proof.nonce)?,
        })
    }
}

/// Verification outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Verified,
    /// Too old, or solved against an anchor that has rotated out
    Expired,
    /// Digest above target
    TooEasy,
    Malformed,
}

impl Verification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verification::Verified => "verified",
            Verification::Expired => "expired",
            Verification::TooEasy => "too_easy",
            Verification::Malformed => "malformed",
        }
    }
}

impl fmt::Display for Verification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Issues and verifies challenges against the shared anchor ring.
#[derive(Debug, Clone)]
pub struct ChallengeEngine {
    anchors: Arc<AnchorRing>,
    difficulty: Difficulty,
    freshness_secs: u64,
    clock_skew_secs: u64,
}

impl ChallengeEngine {
    pub fn new(anchors: Arc<AnchorRing>, difficulty: Difficulty, config: &ChallengeConfig) -> Self {
        Self {
            anchors,
            difficulty,
            freshness_secs: config.freshness_secs,
            clock_skew_secs: config.clock_skew_secs,
        }
    }

    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    /// New challenge for `path` at Unix time `now`.
    pub async fn issue(&self, path: &str, now: u64) -> Result<Challenge, AnchorError> {
        let anchor = self.anchors.current().await.ok_or(AnchorError::Unavailable)?;
        Ok(Challenge {
            path: path.to_string(),
            anchor,
            issued_at: now,
            difficulty: self.difficulty,
        })
    }

    /// Check a solution at Unix time `now`.
    pub async fn verify(&self, solution: &Solution, now: u64) -> Verification {
        if solution.issued_at > now.saturating_add(self.clock_skew_secs) {
            return Verification::Malformed;
        }
        if now.saturating_sub(solution.issued_at) > self.freshness_secs {
            return Verification::Expired;
        }
        if !self.anchors.is_accepted(&solution.anchor).await {
            return Verification::Expired;
        }
        if !solution.path.starts_with('/') {
            return Verification::Malformed;
        }

        let puzzle = Puzzle::new(&solution.anchor, solution.issued_at, &solution.path, self.difficulty);
        if puzzle.accepts(solution.nonce) {
            Verification::Verified
        } else {
            Verification::TooEasy
        }
    }
}
