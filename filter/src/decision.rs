// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Per-request verdicts.
//!
//! [`Filter::decide`] is the single entry point from the host runtime. It
//! short-circuits in a fixed order: allowlist, route resolution, rate
//! limiter, grant, submitted proof, and finally a fresh challenge.
//!
//! Everything derived from configuration lives in an immutable [`Snapshot`]
//! behind an `ArcSwap`; a reload swaps the pointer. Rate limit counters and
//! entropy anchors are owned by the [`Filter`] itself and survive reloads.

use crate::anchor::AnchorRing;
use crate::challenge::{Challenge, ChallengeEngine, ProofHeaders, Solution, Verification};
use crate::cidr::Allowlist;
use crate::config::{Config, ConfigError, DefaultAction};
use crate::grant::{GrantError, GrantSigner};
use crate::limiter::{Admission, RateLimiter};
use crate::metrics;
use crate::route::{normalize_host, normalize_path, RoutePolicyTree};
use arc_swap::ArcSwap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Grant(#[from] GrantError),
}

/// What the filter needs to know about a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMeta {
    pub client_addr: IpAddr,
    pub host: String,
    /// Request path; query and fragment are ignored
    pub path: String,
    pub grant: Option<String>,
    pub proof: Option<ProofHeaders>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowReason {
    Whitelisted,
    /// No route covers the request and the default action is allow
    NoPolicy,
    Granted,
    /// Proof verified but no grant could be minted
    Verified,
    /// Nothing to challenge with yet; fail open
    AnchorUnavailable,
}

impl AllowReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllowReason::Whitelisted => "whitelisted",
            AllowReason::NoPolicy => "no_policy",
            AllowReason::Granted => "granted",
            AllowReason::Verified => "verified",
            AllowReason::AnchorUnavailable => "anchor_unavailable",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeReason {
    /// No proof was submitted
    Required,
    /// A proof was submitted and did not verify
    Rejected(Verification),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// No virtual host is configured for the request's host
    UnknownHost,
    /// The host is configured but none of its routes match the path
    NoRoute,
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockReason::UnknownHost => "unknown_host",
            BlockReason::NoRoute => "no_route",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow(AllowReason),
    AllowWithGrant {
        token: String,
        expires_in: Duration,
    },
    Challenge {
        challenge: Challenge,
        reason: ChallengeReason,
    },
    RateLimited {
        retry_after: Duration,
    },
    Blocked {
        reason: BlockReason,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow(_) | Decision::AllowWithGrant { .. })
    }

    /// Metric label.
    pub fn outcome(&self) -> &'static str {
        match self {
            Decision::Allow(_) => "allow",
            Decision::AllowWithGrant { .. } => "allow_with_grant",
            Decision::Challenge { .. } => "challenge",
            Decision::RateLimited { .. } => "rate_limited",
            Decision::Blocked { .. } => "blocked",
        }
    }
}

/// Configuration-derived state, replaced wholesale on reload.
pub struct Snapshot {
    pub allowlist: Allowlist,
    /// Peers allowed to name the client in forwarding headers
    pub trusted_proxies: Allowlist,
    pub routes: RoutePolicyTree,
    pub engine: ChallengeEngine,
    pub grants: GrantSigner,
    pub unmatched: DefaultAction,
    grant_secret: Option<String>,
}

impl Snapshot {
    fn build(config: &Config, anchors: &Arc<AnchorRing>, previous: Option<&Snapshot>) -> Result<Self, FilterError> {
        let routes = RoutePolicyTree::from_config(&config.virtual_hosts).map_err(ConfigError::Route)?;

        let ttl = config.challenge.grant_ttl();
        let grant_secret = config.challenge.grant_secret.clone();
        let grants = match (&grant_secret, previous) {
            (Some(secret), _) => GrantSigner::new(secret.as_bytes(), ttl)?,
            // Keep the generated key so outstanding grants stay valid
            (None, Some(prev)) if prev.grant_secret.is_none() => prev.grants.clone().with_ttl(ttl),
            (None, _) => GrantSigner::random(ttl)?,
        };

        Ok(Self {
            allowlist: Allowlist::new(config.whitelist.clone()),
            trusted_proxies: Allowlist::new(config.trusted_proxies.clone()),
            routes,
            engine: ChallengeEngine::new(anchors.clone(), config.difficulty, &config.challenge),
            grants,
            unmatched: config.unmatched,
            grant_secret,
        })
    }
}

/// The decision engine.
pub struct Filter {
    snapshot: ArcSwap<Snapshot>,
    limiter: RateLimiter,
    anchors: Arc<AnchorRing>,
}

impl Filter {
    pub fn new(config: &Config, anchors: Arc<AnchorRing>) -> Result<Self, FilterError> {
        let snapshot = Snapshot::build(config, &anchors, None)?;
        Ok(Self {
            snapshot: ArcSwap::from_pointee(snapshot),
            limiter: RateLimiter::new(config.limiter.clone()),
            anchors,
        })
    }

    /// Swap in a new configuration. On error the current one stays active.
    ///
    /// Limiter bookkeeping and the anchor ring are not rebuilt, so changes to
    /// `limiter.*` and `challenge.accepted_anchors` need a restart.
    pub fn reload(&self, config: &Config) -> Result<(), FilterError> {
        let current = self.snapshot.load_full();
        let next = Snapshot::build(config, &self.anchors, Some(&current))?;
        info!(
            hosts = next.routes.host_count(),
            whitelist = next.allowlist.len(),
            trusted_proxies = next.trusted_proxies.len(),
            difficulty = %next.engine.difficulty(),
            "Configuration reloaded"
        );
        self.snapshot.store(Arc::new(next));
        Ok(())
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.load_full()
    }

    pub fn anchors(&self) -> &Arc<AnchorRing> {
        &self.anchors
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Drop idle rate limit counters.
    pub fn cleanup(&self) {
        self.limiter.cleanup();
    }

    pub async fn decide(&self, req: &RequestMeta) -> Decision {
        let timer = metrics::DECISION_LATENCY.start_timer();
        let decision = self.decide_at(req, Instant::now(), unix_now()).await;
        timer.observe_duration();
        metrics::DECISIONS.with_label_values(&[decision.outcome()]).inc();
        decision
    }

    /// [`Filter::decide`] with explicit clocks: `now` drives rate limit
    /// windows, `unix_secs` challenge freshness and grant expiry.
    pub async fn decide_at(&self, req: &RequestMeta, now: Instant, unix_secs: u64) -> Decision {
        let snapshot = self.snapshot.load_full();
        let client = req.client_addr;

        if snapshot.allowlist.contains(client) {
            debug!(%client, "Whitelisted client");
            return Decision::Allow(AllowReason::Whitelisted);
        }

        let host = normalize_host(&req.host);
        let path = normalize_path(&req.path);

        let Some(policy) = snapshot.routes.resolve(&host, &path) else {
            return match snapshot.unmatched {
                DefaultAction::Allow => Decision::Allow(AllowReason::NoPolicy),
                DefaultAction::Block => {
                    let reason = if snapshot.routes.has_host(&host) {
                        BlockReason::NoRoute
                    } else {
                        BlockReason::UnknownHost
                    };
                    debug!(%client, %host, %path, reason = reason.as_str(), "No policy, blocking");
                    Decision::Blocked { reason }
                }
            };
        };

        if let Admission::Rejected { retry_after } =
            self.limiter.admit_at(client, policy.route_id, &policy.rate_limit, now)
        {
            return Decision::RateLimited { retry_after };
        }

        if let Some(token) = &req.grant {
            match snapshot.grants.check(token, &host, client, unix_secs) {
                Ok(_) => return Decision::Allow(AllowReason::Granted),
                Err(error) => debug!(%client, %error, "Ignoring grant"),
            }
        }

        let mut reason = ChallengeReason::Required;
        if let Some(proof) = &req.proof {
            let verification = match Solution::from_headers(&path, proof) {
                Ok(solution) => snapshot.engine.verify(&solution, unix_secs).await,
                Err(error) => {
                    debug!(%client, %error, "Unparseable proof headers");
                    Verification::Malformed
                }
            };
            metrics::VERIFICATIONS.with_label_values(&[verification.as_str()]).inc();

            if verification == Verification::Verified {
                return match snapshot.grants.issue(&host, client, unix_secs) {
                    Ok(token) => {
                        metrics::GRANTS_ISSUED.inc();
                        info!(%client, %host, route = policy.route_id, "Proof verified, grant issued");
                        Decision::AllowWithGrant {
                            token,
                            expires_in: snapshot.grants.ttl(),
                        }
                    }
                    Err(error) => {
                        warn!(%client, %error, "Failed to mint grant");
                        Decision::Allow(AllowReason::Verified)
                    }
                };
            }
            debug!(%client, route = policy.route_id, %verification, "Proof rejected");
            reason = ChallengeReason::Rejected(verification);
        }

        match snapshot.engine.issue(&path, unix_secs).await {
            Ok(challenge) => {
                metrics::CHALLENGES_ISSUED.inc();
                Decision::Challenge { challenge, reason }
            }
            Err(error) => {
                metrics::ANCHOR_FAIL_OPEN.inc();
                warn!(%client, %error, "Cannot issue challenge, admitting request");
                Decision::Allow(AllowReason::AnchorUnavailable)
            }
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
