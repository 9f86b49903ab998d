// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Per-host route policy tree.
//!
//! Each virtual host owns a forest of route nodes. Child paths are joined to
//! their parent's path at load time, so every node stores an absolute pattern
//! and a child always covers a subset of its parent's paths.
//!
//! Resolution walks the forest from the roots: at every level the most
//! specific matching sibling wins (exact > prefix > wildcard, then the longer
//! literal, then declaration order) and the walk continues in its children.
//! The deepest node reached supplies the rate limit.

use crate::config::{MatchKind, RateLimitSpec, RouteConfig, VirtualHostConfig};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::fmt;

/// Errors detected while building the tree. All of them are fatal at load.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("empty route path under host {host:?}")]
    EmptyPath { host: String },

    #[error("malformed pattern {path:?}: '*' is only allowed as the whole final segment")]
    MisplacedWildcard { path: String },

    #[error("pattern {path:?} cannot be matched as {declared:?}")]
    KindMismatch { path: String, declared: MatchKind },

    #[error("invalid virtual host {0:?}")]
    InvalidHost(String),

    #[error("virtual host {0:?} is configured more than once")]
    DuplicateHost(String),
}

/// How a pattern matched a path. Lower sorts first and is more specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Specificity {
    Exact,
    Prefix,
    Wildcard,
}

/// Path pattern with an explicit match kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// Matches the literal path only
    Exact(String),
    /// Matches the literal and everything below it at a segment boundary
    Prefix(String),
    /// Literal ending in `/`, followed by `*`; matches any suffix, including none
    Wildcard(String),
}

impl Pattern {
    /// Build a pattern from an absolute, normalised path.
    pub fn parse(path: &str, declared: Option<MatchKind>) -> Result<Self, RouteError> {
        let segments: Vec<&str> = path.split('/').collect();
        let last = segments.len() - 1;
        let misplaced = segments
            .iter()
            .enumerate()
            .any(|(i, seg)| seg.contains('*') && !(i == last && *seg == "*"));
        if misplaced {
            return Err(RouteError::MisplacedWildcard {
                path: path.to_string(),
            });
        }

        let is_wildcard = segments[last] == "*";
        let mismatch = || RouteError::KindMismatch {
            path: path.to_string(),
            declared: declared.unwrap_or(MatchKind::Wildcard),
        };

        match (is_wildcard, declared) {
            (true, None | Some(MatchKind::Wildcard)) => {
                Ok(Pattern::Wildcard(path.trim_end_matches('*').to_string()))
            }
            (true, Some(_)) | (false, Some(MatchKind::Wildcard)) => Err(mismatch()),
            (false, None | Some(MatchKind::Exact)) => Ok(Pattern::Exact(path.to_string())),
            (false, Some(MatchKind::Prefix)) => Ok(Pattern::Prefix(path.to_string())),
        }
    }

    /// The literal part of the pattern.
    pub fn literal(&self) -> &str {
        match self {
            Pattern::Exact(l) | Pattern::Prefix(l) | Pattern::Wildcard(l) => l,
        }
    }

    /// Match a normalised request path.
    ///
    /// `structural` lets an exact pattern also cover the paths below it,
    /// which is how a parent node with children is reached. Such a match
    /// ranks as a prefix match.
    pub fn match_path(&self, path: &str, structural: bool) -> Option<Specificity> {
        match self {
            Pattern::Exact(l) if path == l => Some(Specificity::Exact),
            Pattern::Exact(l) if structural && is_under(path, l) => Some(Specificity::Prefix),
            Pattern::Prefix(l) if path == l || is_under(path, l) => Some(Specificity::Prefix),
            Pattern::Wildcard(l) if path.starts_with(l.as_str()) || path == l.trim_end_matches('/') => {
                Some(Specificity::Wildcard)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Exact(l) => f.write_str(l),
            Pattern::Prefix(l) if l.ends_with('/') => write!(f, "{l}**"),
            Pattern::Prefix(l) => write!(f, "{l}/**"),
            Pattern::Wildcard(l) => write!(f, "{l}*"),
        }
    }
}

/// `path` lies strictly below `literal` at a segment boundary.
fn is_under(path: &str, literal: &str) -> bool {
    if literal == "/" {
        return path.len() > 1;
    }
    path.len() > literal.len()
        && path.starts_with(literal)
        && path.as_bytes()[literal.len()] == b'/'
}

#[derive(Debug, Clone)]
pub struct RouteNode {
    pub pattern: Pattern,
    /// Counter identity: host followed by the pattern
    pub id: String,
    pub rate_limit: RateLimitSpec,
    pub children: Vec<RouteNode>,
}

impl RouteNode {
    fn build(host: &str, parent: &str, config: &RouteConfig) -> Result<Self, RouteError> {
        if config.path.trim().is_empty() {
            return Err(RouteError::EmptyPath {
                host: host.to_string(),
            });
        }
        let path = normalize_path(&format!("{parent}/{}", config.path.trim()));
        let pattern = Pattern::parse(&path, config.kind)?;
        let children = config
            .children
            .iter()
            .map(|child| RouteNode::build(host, &path, child))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id: format!("{host}{pattern}"),
            pattern,
            rate_limit: config.rate_limit,
            children,
        })
    }

    fn match_path(&self, path: &str) -> Option<Specificity> {
        self.pattern.match_path(path, !self.children.is_empty())
    }
}

/// Most specific matching node among siblings.
fn best_match<'a>(nodes: &'a [RouteNode], path: &str) -> Option<&'a RouteNode> {
    nodes
        .iter()
        .enumerate()
        .filter_map(|(idx, node)| node.match_path(path).map(|s| (s, node, idx)))
        .min_by_key(|(s, node, idx)| (*s, Reverse(node.pattern.literal().len()), *idx))
        .map(|(_, node, _)| node)
}

/// Effective policy for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved<'a> {
    pub route_id: &'a str,
    pub rate_limit: RateLimitSpec,
}

/// Immutable host → route forest map.
#[derive(Debug, Clone, Default)]
pub struct RoutePolicyTree {
    hosts: HashMap<String, Vec<RouteNode>>,
}

impl RoutePolicyTree {
    pub fn from_config(virtual_hosts: &[VirtualHostConfig]) -> Result<Self, RouteError> {
        let mut hosts = HashMap::with_capacity(virtual_hosts.len());
        for vhost in virtual_hosts {
            let host = normalize_host(&vhost.host);
            if host.is_empty() {
                return Err(RouteError::InvalidHost(vhost.host.clone()));
            }
            let routes = vhost
                .routes
                .iter()
                .map(|route| RouteNode::build(&host, "", route))
                .collect::<Result<Vec<_>, _>>()?;
            if hosts.insert(host.clone(), routes).is_some() {
                return Err(RouteError::DuplicateHost(host));
            }
        }
        Ok(Self { hosts })
    }

    /// Resolve `(host, path)` to the deepest matching route's policy.
    pub fn resolve(&self, host: &str, path: &str) -> Option<Resolved<'_>> {
        let mut level = self.hosts.get(&normalize_host(host))?.as_slice();
        let path = normalize_path(path);

        let mut deepest = None;
        while let Some(node) = best_match(level, &path) {
            deepest = Some(node);
            level = &node.children;
        }

        deepest.map(|node| Resolved {
            route_id: &node.id,
            rate_limit: node.rate_limit,
        })
    }

    pub fn has_host(&self, host: &str) -> bool {
        self.hosts.contains_key(&normalize_host(host))
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }
}

/// Strip query and fragment, collapse repeated slashes, resolve `.` and `..`
/// segments (including their `%2e` spellings), drop the trailing slash and
/// guarantee a leading one. `..` never climbs above the root.
pub fn normalize_path(raw: &str) -> String {
    let raw = raw.split(['?', '#']).next().unwrap_or_default();
    let mut segments: Vec<&str> = Vec::new();
    for segment in raw.split('/').filter(|s| !s.is_empty()) {
        match dot_segment(segment) {
            Some(DotSegment::Current) => {}
            Some(DotSegment::Parent) => {
                segments.pop();
            }
            None => segments.push(segment),
        }
    }

    let mut out = String::with_capacity(raw.len() + 1);
    for segment in segments {
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

enum DotSegment {
    Current,
    Parent,
}

fn dot_segment(segment: &str) -> Option<DotSegment> {
    if segment.len() > 6 {
        return None;
    }
    let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
    match decoded.as_str() {
        "." => Some(DotSegment::Current),
        ".." => Some(DotSegment::Parent),
        _ => None,
    }
}

/// Lowercase, drop any `:port` suffix and a trailing root dot.
pub fn normalize_host(raw: &str) -> String {
    let raw = raw.trim();
    let host = if let Some(rest) = raw.strip_prefix('[') {
        // [v6]:port
        rest.split(']').next().unwrap_or_default()
    } else {
        match raw.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') && port.bytes().all(|b| b.is_ascii_digit()) => host,
            _ => raw,
        }
    };
    host.trim_end_matches('.').to_ascii_lowercase()
}
