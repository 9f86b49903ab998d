// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Prometheus metrics, registered in the default registry.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    pub static ref DECISIONS: IntCounterVec = register_int_counter_vec!(
        "powgate_decisions_total",
        "Filter decisions by outcome",
        &["outcome"]
    )
    .expect("register powgate_decisions_total");
    pub static ref DECISION_LATENCY: Histogram = register_histogram!(
        "powgate_decision_latency_seconds",
        "Time spent deciding a request"
    )
    .expect("register powgate_decision_latency_seconds");
    pub static ref CHALLENGES_ISSUED: IntCounter =
        register_int_counter!("powgate_challenges_issued_total", "Proof-of-work challenges issued")
            .expect("register powgate_challenges_issued_total");
    pub static ref VERIFICATIONS: IntCounterVec = register_int_counter_vec!(
        "powgate_verifications_total",
        "Submitted proofs by verification result",
        &["result"]
    )
    .expect("register powgate_verifications_total");
    pub static ref GRANTS_ISSUED: IntCounter =
        register_int_counter!("powgate_grants_issued_total", "Access grants minted")
            .expect("register powgate_grants_issued_total");
    pub static ref LIMITER_FAIL_OPEN: IntCounter = register_int_counter!(
        "powgate_limiter_fail_open_total",
        "Requests admitted because the limiter was at capacity"
    )
    .expect("register powgate_limiter_fail_open_total");
    pub static ref TRACKED_COUNTERS: IntGauge =
        register_int_gauge!("powgate_tracked_counters", "Live rate limit counters")
            .expect("register powgate_tracked_counters");
    pub static ref ANCHOR_ROTATIONS: IntCounter =
        register_int_counter!("powgate_anchor_rotations_total", "New entropy anchors observed")
            .expect("register powgate_anchor_rotations_total");
    pub static ref ANCHOR_REFRESH_FAILURES: IntCounter = register_int_counter!(
        "powgate_anchor_refresh_failures_total",
        "Failed entropy upstream polls"
    )
    .expect("register powgate_anchor_refresh_failures_total");
    pub static ref ANCHOR_FAIL_OPEN: IntCounter = register_int_counter!(
        "powgate_anchor_fail_open_total",
        "Requests admitted because no anchor was available to challenge them"
    )
    .expect("register powgate_anchor_fail_open_total");
}

/// Text exposition of every registered metric.
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
