// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: Apache-2.0

//! Client populations replayed against the decision engine.

use std::time::Duration;

/// What the simulated clients put in their requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Never answers challenges
    Ignore,
    /// Well-formed proofs with guessed nonces
    ForgedProof,
    /// Proof headers that do not parse
    MalformedProof,
    /// One grant replayed from every address
    StolenGrant,
    /// Solves challenges, then rides its grant
    Honest,
}

/// Where the client addresses come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// `10.0.0.0/8`, never allowlisted
    Pool,
    /// `192.0.2.0/24`, allowlisted by the test config
    Allowlisted,
}

#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: &'static str,
    pub requests: usize,
    /// Simulated arrival rate across all clients
    pub per_second: f64,
    pub clients: usize,
    pub paths: usize,
    pub behavior: Behavior,
    pub source: Source,
}

impl Scenario {
    fn new(name: &'static str, requests: usize, per_second: f64) -> Self {
        Self {
            name,
            requests,
            per_second,
            clients: 1,
            paths: 1,
            behavior: Behavior::Ignore,
            source: Source::Pool,
        }
    }

    fn clients(mut self, n: usize) -> Self {
        self.clients = n;
        self
    }

    fn paths(mut self, n: usize) -> Self {
        self.paths = n;
        self
    }

    fn behaving(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    fn allowlisted(mut self) -> Self {
        self.source = Source::Allowlisted;
        self
    }

    pub fn flood() -> Self {
        Self::new("single-address flood", 200, 100.0).paths(10)
    }

    pub fn botnet() -> Self {
        Self::new("distributed low-rate", 500, 50.0).clients(100).paths(50)
    }

    pub fn nonce_guessing() -> Self {
        Self::new("guessed nonces", 100, 20.0)
            .clients(10)
            .paths(5)
            .behaving(Behavior::ForgedProof)
    }

    pub fn garbage_proofs() -> Self {
        Self::new("unparseable proofs", 50, 10.0)
            .clients(5)
            .paths(5)
            .behaving(Behavior::MalformedProof)
    }

    pub fn shared_grant() -> Self {
        Self::new("grant shared by a botnet", 100, 20.0)
            .clients(50)
            .paths(5)
            .behaving(Behavior::StolenGrant)
    }

    pub fn honest() -> Self {
        Self::new("honest client", 50, 0.5).paths(5).behaving(Behavior::Honest)
    }

    /// 54/min against a 60/min route.
    pub fn slow_drip() -> Self {
        Self::new("slow drip", 100, 0.9).paths(5).behaving(Behavior::Honest)
    }

    pub fn allowlisted_flood() -> Self {
        Self::new("allowlisted flood", 300, 300.0).clients(3).paths(3).allowlisted()
    }

    /// Simulated time the scenario spans.
    pub fn span(&self) -> Duration {
        Duration::from_secs_f64(self.requests as f64 / self.per_second)
    }

    /// Highest share of requests that may be admitted.
    pub fn admission_ceiling(&self) -> f64 {
        match (self.source, self.behavior) {
            (Source::Allowlisted, _) | (_, Behavior::Honest) => 1.0,
            _ => 0.0,
        }
    }
}
