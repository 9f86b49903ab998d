// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! CIDR set matching for the allowlist and trusted proxies.
//!
//! Entries only ever match addresses of their own family; an IPv4-mapped
//! IPv6 client address is treated as IPv6.

use ipnet::IpNet;
use std::net::IpAddr;

/// Ordered set of CIDR blocks. Linear scan; these lists are short.
#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    entries: Vec<IpNet>,
}

impl Allowlist {
    pub fn new(entries: Vec<IpNet>) -> Self {
        Self { entries }
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        self.entries.iter().any(|net| net.contains(&ip))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<IpNet> for Allowlist {
    fn from_iter<I: IntoIterator<Item = IpNet>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
