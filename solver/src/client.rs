// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// End-to-end gateway client.
//
//   GET url                           -> 429 {"code":"POW_REQUIRED", ...}
//   solve on the mining worker
//   GET url + x-pow-nonce/-timestamp/-base -> 200, x-pow-grant: <token>
//   GET url + x-pow-grant             -> 200 while the grant lasts

use powgate_common::wire::{HEADER_BASE, HEADER_GRANT, HEADER_NONCE, HEADER_TIMESTAMP};
use powgate_common::{format_nonce, ChallengeBody, Rejection};
use reqwest::StatusCode;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};

use crate::protocol::{MineReply, MineRequest};
use crate::worker::{JobReply, MiningWorker, WorkerError};

pub const DEFAULT_ATTEMPTS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error("solver: {0}")]
    Solver(String),

    #[error("rate limited, retry after {retry_after_secs}s: {message}")]
    RateLimited { message: String, retry_after_secs: u64 },

    #[error("blocked: {0}")]
    Blocked(String),

    #[error("unexpected status {status}: {body}")]
    Unexpected { status: StatusCode, body: String },

    #[error("gave up after {0} attempts")]
    Exhausted(usize),
}

/// A successful response.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub status: StatusCode,
    pub body: String,
    /// Grant in effect after this exchange
    pub grant: Option<String>,
    /// Challenges solved along the way
    pub solved: usize,
}

struct Proof {
    nonce: u64,
    timestamp: u64,
    base: String,
}

pub struct GatewayClient {
    http: reqwest::Client,
    worker: MiningWorker,
    replies: UnboundedReceiver<JobReply>,
    grant: Option<String>,
    max_attempts: usize,
}

impl GatewayClient {
    pub fn new(max_attempts: usize) -> anyhow::Result<Self> {
        let (worker, replies) = MiningWorker::spawn()?;
        Ok(Self {
            http: reqwest::Client::builder().build()?,
            worker,
            replies,
            grant: None,
            max_attempts: max_attempts.max(1),
        })
    }

    /// Reuse a grant from an earlier session.
    pub fn with_grant(mut self, grant: Option<String>) -> Self {
        self.grant = grant;
        self
    }

    pub fn grant(&self) -> Option<&str> {
        self.grant.as_deref()
    }

    /// GET `url`, solving challenges until it is let through.
    pub async fn fetch(&mut self, url: &str) -> Result<Fetched, ClientError> {
        let mut proof: Option<Proof> = None;
        let mut solved = 0;

        for attempt in 1..=self.max_attempts {
            let mut request = self.http.get(url);
            if let Some(grant) = &self.grant {
                request = request.header(HEADER_GRANT, grant);
            }
            if let Some(p) = proof.take() {
                request = request
                    .header(HEADER_NONCE, format_nonce(p.nonce))
                    .header(HEADER_TIMESTAMP, p.timestamp.to_string())
                    .header(HEADER_BASE, p.base);
            }

            let response = request.send().await?;
            let status = response.status();
            if let Some(token) = response.headers().get(HEADER_GRANT).and_then(|v| v.to_str().ok()) {
                debug!("received grant");
                self.grant = Some(token.to_string());
            }
            let body = response.text().await?;

            if status.is_success() {
                return Ok(Fetched {
                    status,
                    body,
                    grant: self.grant.clone(),
                    solved,
                });
            }

            match serde_json::from_str::<Rejection>(&body) {
                Ok(Rejection::PowRequired(challenge)) => {
                    // A rejected grant is worthless from here on
                    self.grant = None;
                    info!(
                        attempt,
                        difficulty = %challenge.difficulty,
                        path = %challenge.path,
                        "solving challenge"
                    );
                    proof = Some(self.solve(challenge).await?);
                    solved += 1;
                }
                Ok(Rejection::RateLimited {
                    message,
                    retry_after_secs,
                }) => return Err(ClientError::RateLimited { message, retry_after_secs }),
                Ok(Rejection::Blocked { message }) => return Err(ClientError::Blocked(message)),
                Err(_) => return Err(ClientError::Unexpected { status, body }),
            }
        }

        Err(ClientError::Exhausted(self.max_attempts))
    }

    async fn solve(&mut self, challenge: ChallengeBody) -> Result<Proof, ClientError> {
        let timestamp = challenge.timestamp;
        let base = challenge.current.to_hex();
        let id = self.worker.submit(MineRequest::from(challenge))?;

        while let Some(reply) = self.replies.recv().await {
            if reply.id != id {
                continue;
            }
            return match reply.reply {
                MineReply::Ok(nonce) => Ok(Proof { nonce, timestamp, base }),
                MineReply::Err(reason) => Err(ClientError::Solver(reason)),
            };
        }
        Err(WorkerError::Stopped.into())
    }
}
