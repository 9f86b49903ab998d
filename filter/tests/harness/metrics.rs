// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Outcome tally for attack simulations.

use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Whitelisted,
    /// Let through for another reason (no policy, no anchor)
    Allowed,
    Granted,
    Verified,
    Challenged,
    ProofRejected,
    RateLimited,
    Blocked,
}

impl Outcome {
    const ALL: [Outcome; 8] = [
        Outcome::Whitelisted,
        Outcome::Allowed,
        Outcome::Granted,
        Outcome::Verified,
        Outcome::Challenged,
        Outcome::ProofRejected,
        Outcome::RateLimited,
        Outcome::Blocked,
    ];

    fn admitted(self) -> bool {
        (self as usize) <= Outcome::Verified as usize
    }

    fn label(self) -> &'static str {
        match self {
            Outcome::Whitelisted => "whitelisted",
            Outcome::Allowed => "allowed",
            Outcome::Granted => "granted",
            Outcome::Verified => "verified",
            Outcome::Challenged => "challenged",
            Outcome::ProofRejected => "proof rejected",
            Outcome::RateLimited => "rate limited",
            Outcome::Blocked => "blocked",
        }
    }
}

#[derive(Debug, Default)]
pub struct Tally {
    counts: [usize; Outcome::ALL.len()],
    clients: HashSet<IpAddr>,
    latencies: Vec<Duration>,
}

impl Tally {
    pub fn record(&mut self, outcome: Outcome, client: IpAddr, latency: Duration) {
        self.counts[outcome as usize] += 1;
        self.clients.insert(client);
        self.latencies.push(latency);
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.counts[outcome as usize]
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    /// Requests the engine let through, whatever the reason.
    pub fn admitted(&self) -> usize {
        Outcome::ALL.iter().filter(|o| o.admitted()).map(|o| self.count(*o)).sum()
    }

    fn percentile(&self, q: f64) -> Duration {
        let mut sorted = self.latencies.clone();
        sorted.sort_unstable();
        let idx = ((sorted.len() as f64 * q) as usize).min(sorted.len().saturating_sub(1));
        sorted.get(idx).copied().unwrap_or_default()
    }

    pub fn report(&self, scenario: &'static str) -> Report {
        Report {
            scenario,
            total_requests: self.total(),
            allowed: self.admitted(),
            whitelisted: self.count(Outcome::Whitelisted),
            granted: self.count(Outcome::Granted),
            verified: self.count(Outcome::Verified),
            challenged: self.count(Outcome::Challenged),
            proof_rejected: self.count(Outcome::ProofRejected),
            rate_limited: self.count(Outcome::RateLimited),
            blocked: self.count(Outcome::Blocked),
            unique_ips: self.clients.len(),
            median_latency: self.percentile(0.5),
            p99_latency: self.percentile(0.99),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Report {
    pub scenario: &'static str,
    pub total_requests: usize,
    pub allowed: usize,
    pub whitelisted: usize,
    pub granted: usize,
    pub verified: usize,
    pub challenged: usize,
    pub proof_rejected: usize,
    pub rate_limited: usize,
    pub blocked: usize,
    pub unique_ips: usize,
    pub median_latency: Duration,
    pub p99_latency: Duration,
}

impl Report {
    pub fn admitted_ratio(&self) -> f64 {
        self.allowed as f64 / self.total_requests.max(1) as f64
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "[{}] {} requests from {} clients, {:.1}% admitted",
            self.scenario,
            self.total_requests,
            self.unique_ips,
            self.admitted_ratio() * 100.0
        )?;
        let rows = [
            (Outcome::Whitelisted, self.whitelisted),
            (Outcome::Granted, self.granted),
            (Outcome::Verified, self.verified),
            (Outcome::Challenged, self.challenged),
            (Outcome::ProofRejected, self.proof_rejected),
            (Outcome::RateLimited, self.rate_limited),
            (Outcome::Blocked, self.blocked),
        ];
        for (outcome, n) in rows.iter().filter(|(_, n)| *n > 0) {
            writeln!(f, "  {:<15}{:>6}", outcome.label(), n)?;
        }
        write!(f, "  latency p50 {:?}, p99 {:?}", self.median_latency, self.p99_latency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([10, 0, 0, last])
    }

    #[test]
    fn test_tally_splits_admitted_from_rejected() {
        let mut tally = Tally::default();
        tally.record(Outcome::Challenged, ip(1), Duration::from_micros(100));
        tally.record(Outcome::Verified, ip(1), Duration::from_micros(150));
        tally.record(Outcome::Granted, ip(2), Duration::from_micros(50));
        tally.record(Outcome::RateLimited, ip(2), Duration::from_micros(50));

        let report = tally.report("mixed");
        assert_eq!(report.total_requests, 4);
        assert_eq!(report.allowed, 2);
        assert_eq!(report.rate_limited, 1);
        assert_eq!(report.unique_ips, 2);
        assert!((report.admitted_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_tally() {
        let report = Tally::default().report("empty");
        assert_eq!(report.total_requests, 0);
        assert_eq!(report.median_latency, Duration::ZERO);
        assert_eq!(report.admitted_ratio(), 0.0);
    }
}
