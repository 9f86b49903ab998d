// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Brute-force nonce search.
//
// Nonces are tried in order from zero, so the result for a given request is
// always the smallest valid nonce. CPU bound: run it on a dedicated thread
// (see worker.rs), never on an async executor.

use std::sync::atomic::{AtomicBool, Ordering};

use powgate_common::{Anchor, Difficulty, ParseAnchorError, Puzzle};

use crate::protocol::MineRequest;

/// Attempts between two looks at the cancel flag.
pub const CANCEL_CHECK_INTERVAL: u64 = 1024;

#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    #[error("difficulty must be positive")]
    ZeroDifficulty,

    #[error("invalid anchor: {0}")]
    Anchor(#[from] ParseAnchorError),

    #[error("path must start with '/'")]
    Path,

    #[error("cancelled")]
    Cancelled,

    #[error("nonce space exhausted")]
    Exhausted,
}

/// Validate a request and build its puzzle.
pub fn prepare(request: &MineRequest) -> Result<Puzzle, SolverError> {
    let difficulty = Difficulty::new(request.difficulty).map_err(|_| SolverError::ZeroDifficulty)?;
    let anchor: Anchor = request.current.parse()?;
    if !request.path.starts_with('/') {
        return Err(SolverError::Path);
    }
    Ok(Puzzle::new(&anchor, request.timestamp, &request.path, difficulty))
}

/// Smallest nonce accepted by `puzzle`, unless `cancel` is raised first.
pub fn search(puzzle: &Puzzle, cancel: &AtomicBool) -> Result<u64, SolverError> {
    let mut nonce = 0u64;
    loop {
        if nonce % CANCEL_CHECK_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
            return Err(SolverError::Cancelled);
        }
        if puzzle.accepts(nonce) {
            return Ok(nonce);
        }
        nonce = nonce.checked_add(1).ok_or(SolverError::Exhausted)?;
    }
}

/// Solve a request on the calling thread.
pub fn solve(request: &MineRequest) -> Result<u64, SolverError> {
    search(&prepare(request)?, &AtomicBool::new(false))
}
