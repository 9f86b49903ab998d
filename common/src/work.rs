// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Proof-of-work puzzle shared by issuer, verifier and solver.
//
// Canonical digest input:
//   [32 bytes: anchor]
//   [8 bytes:  issued_at, Unix seconds, big-endian]
//   [N bytes:  request path, UTF-8]
//   [8 bytes:  nonce, big-endian]
//
// A nonce solves the puzzle when SHA-256 of the above, read as a 256-bit
// big-endian integer, is <= floor((2^256 - 1) / difficulty).

use std::fmt;
use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::anchor::Anchor;

/// SHA-256 output size (bytes).
pub const DIGEST_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("difficulty must be a positive integer")]
pub struct ZeroDifficulty;

/// Expected number of hash evaluations needed to find a solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct Difficulty(NonZeroU64);

impl Difficulty {
    pub fn new(value: u64) -> Result<Self, ZeroDifficulty> {
        NonZeroU64::new(value).map(Self).ok_or(ZeroDifficulty)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }

    pub fn target(self) -> Target {
        Target::from_difficulty(self)
    }
}

impl TryFrom<u64> for Difficulty {
    type Error = ZeroDifficulty;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Difficulty> for u64 {
    fn from(d: Difficulty) -> Self {
        d.get()
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 256-bit big-endian threshold. Byte arrays compare lexicographically, which
/// for equal-length big-endian values is numeric order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Target([u8; DIGEST_LEN]);

impl Target {
    /// `floor((2^256 - 1) / difficulty)`, by schoolbook long division one
    /// byte at a time. The remainder stays below the divisor (< 2^64), so the
    /// shifted working value always fits in a u128.
    pub fn from_difficulty(difficulty: Difficulty) -> Self {
        let divisor = u128::from(difficulty.get());
        let mut quotient = [0u8; DIGEST_LEN];
        let mut rem: u128 = 0;
        for byte in quotient.iter_mut() {
            let cur = (rem << 8) | 0xff;
            *byte = (cur / divisor) as u8;
            rem = cur % divisor;
        }
        Self(quotient)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    pub fn is_met_by(&self, digest: &[u8; DIGEST_LEN]) -> bool {
        digest <= &self.0
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Target({})", hex::encode(self.0))
    }
}

/// A challenge with everything but the nonce already absorbed into the
/// hasher, so each attempt costs one clone plus one compression round.
#[derive(Clone)]
pub struct Puzzle {
    prefix: Sha256,
    target: Target,
}

impl Puzzle {
    pub fn new(anchor: &Anchor, issued_at: u64, path: &str, difficulty: Difficulty) -> Self {
        let mut prefix = Sha256::new();
        prefix.update(anchor.as_bytes());
        prefix.update(issued_at.to_be_bytes());
        prefix.update(path.as_bytes());
        Self {
            prefix,
            target: difficulty.target(),
        }
    }

    pub fn digest(&self, nonce: u64) -> [u8; DIGEST_LEN] {
        let mut hasher = self.prefix.clone();
        hasher.update(nonce.to_be_bytes());
        hasher.finalize().into()
    }

    pub fn accepts(&self, nonce: u64) -> bool {
        self.target.is_met_by(&self.digest(nonce))
    }

    pub fn target(&self) -> &Target {
        &self.target
    }
}

impl fmt::Debug for Puzzle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Puzzle")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}
