// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: Apache-2.0

//! Request inputs for attack simulation.

use super::attacks::Source;
use powgate_common::{format_nonce, Anchor};
use powgate_filter::challenge::ProofHeaders;
use std::net::{IpAddr, Ipv4Addr};

/// `n` distinct client addresses from `source`.
pub fn addresses(source: Source, n: usize) -> Vec<IpAddr> {
    (0..n)
        .map(|i| {
            let [_, a, b, c] = (i as u32).to_be_bytes();
            match source {
                Source::Pool => IpAddr::V4(Ipv4Addr::new(10, a, b, c)),
                Source::Allowlisted => IpAddr::V4(Ipv4Addr::new(192, 0, 2, c)),
            }
        })
        .collect()
}

/// Paths under one host, a third of them carrying a query string.
pub fn paths(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| match i % 3 {
            0 => format!("/api/items/{i}"),
            1 => format!("/search?q=item-{i}"),
            _ => format!("/static/{i}.css"),
        })
        .collect()
}

/// Syntactically valid proof whose nonce is a guess.
pub fn guessed_proof(seed: usize, anchor: &Anchor, issued_at: u64) -> ProofHeaders {
    ProofHeaders {
        nonce: format_nonce((seed as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15)),
        timestamp: issued_at.to_string(),
        base: anchor.to_hex(),
    }
}

/// Header values that must never parse as a proof.
pub fn garbage_proofs() -> Vec<ProofHeaders> {
    let good = "ab".repeat(32);
    let bad = "zz".repeat(32);
    let (anchor, bad_anchor) = (good.as_str(), bad.as_str());
    [
        ("", "1700000000", anchor),
        ("0123456789abcdef0", "1700000000", anchor),
        ("-1", "1700000000", anchor),
        ("0000000000000001", "", anchor),
        ("0000000000000001", "-5", anchor),
        ("0000000000000001", "1e9", anchor),
        ("0000000000000001", "1700000000", ""),
        ("0000000000000001", "1700000000", "abcd"),
        ("0000000000000001", "1700000000", bad_anchor),
    ]
    .into_iter()
    .map(|(nonce, timestamp, base)| ProofHeaders {
        nonce: nonce.to_string(),
        timestamp: timestamp.to_string(),
        base: base.to_string(),
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_addresses_are_distinct() {
        let pool = addresses(Source::Pool, 300);
        assert_eq!(pool.iter().collect::<HashSet<_>>().len(), 300);
        assert!(addresses(Source::Allowlisted, 3)
            .iter()
            .all(|ip| ip.to_string().starts_with("192.0.2.")));
    }

    #[test]
    fn test_paths_are_rooted() {
        assert!(paths(30).iter().all(|p| p.starts_with('/')));
    }
}
