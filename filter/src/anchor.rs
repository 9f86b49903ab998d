// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Entropy anchors for proof-of-work challenges.
//!
//! A background task polls a mempool-style API for the chain tip hash and
//! pushes every new value into an [`AnchorRing`]. The newest anchor is handed
//! out in challenges; the ring's older entries stay acceptable in solutions so
//! a rotation does not invalidate work in flight. Request handling only ever
//! reads the ring and never waits on the upstream.

use crate::metrics;
use powgate_common::{Anchor, ParseAnchorError};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum AnchorError {
    #[error("entropy upstream request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("entropy upstream answered with status {0}")]
    Status(u16),

    #[error("entropy upstream returned an invalid anchor: {0}")]
    Invalid(#[from] ParseAnchorError),

    #[error("entropy upstream did not answer within {0:?}")]
    Timeout(Duration),

    #[error("no entropy anchor available yet")]
    Unavailable,
}

/// Something that can produce the current anchor.
pub trait EntropySource: Send + Sync {
    fn fetch(&self) -> impl Future<Output = Result<Anchor, AnchorError>> + Send;
}

/// Client for `GET {base}/api/blocks/tip/hash`, which answers with the tip
/// block hash as 64 hex characters.
#[derive(Debug, Clone)]
pub struct MempoolSource {
    url: url::Url,
    client: reqwest::Client,
}

impl MempoolSource {
    pub fn new(url: url::Url, timeout: Duration) -> Result<Self, AnchorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("powgate-filter/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { url, client })
    }

    pub fn url(&self) -> &url::Url {
        &self.url
    }
}

impl EntropySource for MempoolSource {
    async fn fetch(&self) -> Result<Anchor, AnchorError> {
        let response = self.client.get(self.url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AnchorError::Status(status.as_u16()));
        }
        let body = response.text().await?;
        Ok(body.parse()?)
    }
}

/// Most recent anchors, newest first.
#[derive(Debug)]
pub struct AnchorRing {
    recent: RwLock<VecDeque<Anchor>>,
    capacity: usize,
}

impl AnchorRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            recent: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Anchor to put in new challenges.
    pub async fn current(&self) -> Option<Anchor> {
        self.recent.read().await.front().copied()
    }

    /// Whether a solution computed against `anchor` can still be accepted.
    pub async fn is_accepted(&self, anchor: &Anchor) -> bool {
        self.recent.read().await.contains(anchor)
    }

    /// Make `anchor` current. Returns false if it already was.
    pub async fn push(&self, anchor: Anchor) -> bool {
        let mut recent = self.recent.write().await;
        if recent.front() == Some(&anchor) {
            return false;
        }
        recent.retain(|a| a != &anchor);
        recent.push_front(anchor);
        recent.truncate(self.capacity);
        true
    }

    /// Fetch once from `source`, bounded by `timeout`. Returns the new anchor
    /// if it differs from the current one.
    pub async fn refresh<S: EntropySource>(
        &self,
        source: &S,
        timeout: Duration,
    ) -> Result<Option<Anchor>, AnchorError> {
        let anchor = tokio::time::timeout(timeout, source.fetch())
            .await
            .map_err(|_| AnchorError::Timeout(timeout))??;
        Ok(self.push(anchor).await.then_some(anchor))
    }

    pub async fn len(&self) -> usize {
        self.recent.read().await.len()
    }
}

/// Poll `source` forever. Failures keep the last known anchors in service.
pub async fn run_refresher<S: EntropySource>(
    ring: Arc<AnchorRing>,
    source: S,
    every: Duration,
    timeout: Duration,
) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        match ring.refresh(&source, timeout).await {
            Ok(Some(anchor)) => {
                metrics::ANCHOR_ROTATIONS.inc();
                info!(%anchor, "Entropy anchor rotated");
            }
            Ok(None) => debug!("Entropy anchor unchanged"),
            Err(error) => {
                metrics::ANCHOR_REFRESH_FAILURES.inc();
                warn!(%error, "Anchor refresh failed, keeping last known anchor");
            }
        }
    }
}
