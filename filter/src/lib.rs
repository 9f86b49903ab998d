// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! powgate filter
//!
//! Gateway-side access control that runs before upstream routing:
//!
//! - CIDR allowlist bypass (IPv4 and IPv6)
//! - Per-host route tree with hierarchical fixed-window rate limits
//! - Stateless proof-of-work challenges anchored to the chain tip hash
//! - HMAC-signed access grants for clients that solved a challenge
//! - Hot configuration reload without losing limiter state
//!
//! ## Usage
//!
//! [`decision::Filter`] is the engine; [`handlers::router`] puts it behind
//! an external authorization HTTP endpoint. The two can be used separately
//! to embed the engine in another host runtime.

pub mod anchor;
pub mod challenge;
pub mod cidr;
pub mod config;
pub mod decision;
pub mod grant;
pub mod handlers;
pub mod limiter;
pub mod metrics;
pub mod route;

pub use anchor::{AnchorError, AnchorRing, EntropySource, MempoolSource};
pub use challenge::{Challenge, ChallengeEngine, Solution, Verification};
pub use config::Config;
pub use decision::{AllowReason, Decision, Filter, FilterError, RequestMeta};
pub use limiter::{Admission, RateLimiter};
pub use route::RoutePolicyTree;
