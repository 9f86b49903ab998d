// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Signed, time-bound access grants.
//!
//! A client that solved a challenge receives a grant so it does not have to
//! solve one for every request. Token format:
//!
//! ```text
//! base64url(claims JSON) "." base64url(HMAC-SHA256(claims JSON))
//! ```
//!
//! Claims bind the grant to the virtual host and client address it was
//! minted for.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::net::IpAddr;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// Random key size when no secret is configured (bytes).
pub const GENERATED_KEY_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum GrantError {
    #[error("grant token is malformed")]
    Malformed,

    #[error("grant signature does not verify")]
    BadSignature,

    #[error("grant expired")]
    Expired,

    #[error("grant was issued for another host or client")]
    WrongScope,

    #[error("grant key rejected: {0}")]
    Key(#[from] hmac::digest::InvalidLength),

    #[error("failed to encode grant claims: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantClaims {
    pub host: String,
    pub client: IpAddr,
    /// Expiry, Unix seconds
    pub exp: u64,
}

/// Mints and checks grants with one HMAC key.
#[derive(Clone)]
pub struct GrantSigner {
    mac: HmacSha256,
    ttl: Duration,
}

impl GrantSigner {
    pub fn new(secret: &[u8], ttl: Duration) -> Result<Self, GrantError> {
        Ok(Self {
            mac: HmacSha256::new_from_slice(secret)?,
            ttl,
        })
    }

    /// Signer with a fresh random key. Grants do not survive a restart.
    pub fn random(ttl: Duration) -> Result<Self, GrantError> {
        let mut key = [0u8; GENERATED_KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut key);
        Self::new(&key, ttl)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Same key, different lifetime for newly minted grants.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn issue(&self, host: &str, client: IpAddr, now: u64) -> Result<String, GrantError> {
        let claims = GrantClaims {
            host: host.to_string(),
            client,
            exp: now.saturating_add(self.ttl.as_secs()),
        };
        let payload = serde_json::to_vec(&claims)?;
        let mut mac = self.mac.clone();
        mac.update(&payload);
        let sig = mac.finalize().into_bytes();
        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(sig)
        ))
    }

    pub fn check(&self, token: &str, host: &str, client: IpAddr, now: u64) -> Result<GrantClaims, GrantError> {
        let (payload_b64, sig_b64) = token.trim().split_once('.').ok_or(GrantError::Malformed)?;
        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| GrantError::Malformed)?;
        let sig = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| GrantError::Malformed)?;

        let mut mac = self.mac.clone();
        mac.update(&payload);
        mac.verify_slice(&sig).map_err(|_| GrantError::BadSignature)?;

        let claims: GrantClaims = serde_json::from_slice(&payload).map_err(|_| GrantError::Malformed)?;
        if claims.exp <= now {
            return Err(GrantError::Expired);
        }
        if claims.host != host || claims.client != client {
            return Err(GrantError::WrongScope);
        }
        Ok(claims)
    }
}

impl std::fmt::Debug for GrantSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrantSigner")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
