// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// powgate solver: finds nonces for powgate challenges.
//
//   search:    brute force over the shared Puzzle, cancellable
//   worker:    dedicated mining thread driven by message passing
//   protocol:  {difficulty, path, current, timestamp} -> {ok} | {err}
//   client:    fetch through a gateway, solving challenges on the way

pub mod client;
pub mod protocol;
pub mod search;
pub mod worker;

pub use client::{ClientError, Fetched, GatewayClient};
pub use protocol::{MineReply, MineRequest};
pub use search::{prepare, search, solve, SolverError};
pub use worker::{JobReply, MiningWorker, WorkerError};
