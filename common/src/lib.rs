// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// powgate common: the pieces the filter and the solver must agree on
// bit-for-bit.
//
//   Anchor:     32-byte entropy value (chain tip hash), hex on the wire
//   Puzzle:     SHA-256(anchor || issued_at BE64 || path || nonce BE64)
//   Target:     floor((2^256 - 1) / difficulty), digest <= target wins
//   Wire:       x-pow-* header names, nonce encoding, rejection bodies

pub mod anchor;
pub mod wire;
pub mod work;

pub use anchor::{Anchor, ParseAnchorError, ANCHOR_LEN};
pub use wire::{format_nonce, parse_nonce, ChallengeBody, ParseNonceError, Rejection};
pub use work::{Difficulty, Puzzle, Target, ZeroDifficulty, DIGEST_LEN};
