// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Message protocol between a UI task and the mining worker.
//
//   request: {"difficulty": 100000, "path": "/ip", "current": "<64 hex>", "timestamp": 1700000000}
//   reply:   {"ok": 27700} | {"err": "cancelled"}
//
// Fields stay raw so that bad input is answered with {"err"} instead of
// failing to decode.

use powgate_common::ChallengeBody;
use serde::{Deserialize, Serialize};

use crate::search::SolverError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MineRequest {
    pub difficulty: u64,
    pub path: String,
    /// Anchor, 64 hex characters
    pub current: String,
    /// issued_at, Unix seconds
    pub timestamp: u64,
}

impl From<ChallengeBody> for MineRequest {
    fn from(body: ChallengeBody) -> Self {
        Self {
            difficulty: body.difficulty.get(),
            path: body.path,
            current: body.current.to_hex(),
            timestamp: body.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MineReply {
    Ok(u64),
    Err(String),
}

impl From<Result<u64, SolverError>> for MineReply {
    fn from(result: Result<u64, SolverError>) -> Self {
        match result {
            Ok(nonce) => MineReply::Ok(nonce),
            Err(e) => MineReply::Err(e.to_string()),
        }
    }
}
