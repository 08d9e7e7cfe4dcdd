// Bearer authentication and per-client request quotas for the network transport

use crate::config::RateLimitConfig;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use subtle::ConstantTimeEq;

/// Who a request is attributed to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AuthIdentity {
    /// No server token is configured
    Anonymous,
    /// Presented the configured token; only a digest of it is kept
    Bearer { fingerprint: String },
}

impl AuthIdentity {
    /// Key under which this identity's quota is tracked.
    ///
    /// Anonymous callers are told apart by source address.
    pub fn quota_key(&self, peer: Option<IpAddr>) -> String {
        match self {
            AuthIdentity::Bearer { fingerprint } => format!("bearer:{}", fingerprint),
            AuthIdentity::Anonymous => match peer {
                Some(ip) => format!("addr:{}", ip),
                None => "addr:unknown".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GuardError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
}

/// Authentication and sliding-window rate limiting.
///
/// Without a configured token every request is accepted as
/// [`AuthIdentity::Anonymous`]. That is only suitable for local development;
/// operators must set a token for any exposed deployment. Rate limiting still
/// applies in that mode.
pub struct Guard {
    token_digest: Option<[u8; 32]>,
    window: Duration,
    capacity: usize,
    quotas: Mutex<QuotaBook>,
}

/// Per-key request timestamps, oldest first
#[derive(Default)]
struct QuotaBook {
    windows: HashMap<String, VecDeque<Instant>>,
    last_sweep: Option<Instant>,
}

impl QuotaBook {
    /// Drop keys with nothing left in their window. Runs at most once per
    /// window length, so idle clients are forgotten within two windows.
    fn sweep(&mut self, now: Instant, window: Duration) {
        let due = self
            .last_sweep
            .map_or(true, |last| now.saturating_duration_since(last) >= window);
        if !due {
            return;
        }
        self.windows.retain(|_, stamps| {
            stamps
                .back()
                .is_some_and(|newest| now.saturating_duration_since(*newest) < window)
        });
        self.last_sweep = Some(now);
    }
}

impl Guard {
    pub fn new(api_key: Option<&str>, limits: &RateLimitConfig) -> Self {
        let token_digest = api_key
            .filter(|key| !key.is_empty())
            .map(|key| Sha256::digest(key.as_bytes()).into());

        Self {
            token_digest,
            window: Duration::from_secs(limits.window_secs),
            capacity: limits.capacity,
            quotas: Mutex::new(QuotaBook::default()),
        }
    }

    /// True when no token is configured
    pub fn is_open(&self) -> bool {
        self.token_digest.is_none()
    }

    /// Check an `Authorization` header value
    pub fn authenticate(&self, authorization: Option<&str>) -> Result<AuthIdentity, GuardError> {
        let Some(expected) = &self.token_digest else {
            return Ok(AuthIdentity::Anonymous);
        };

        let header = authorization.ok_or(GuardError::Unauthorized)?;
        let (scheme, token) = header.split_once(' ').ok_or(GuardError::Unauthorized)?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return Err(GuardError::Unauthorized);
        }

        // Compare fixed-size digests so timing does not depend on token length
        let presented: [u8; 32] = Sha256::digest(token.trim().as_bytes()).into();
        if !bool::from(presented.as_slice().ct_eq(expected.as_slice())) {
            return Err(GuardError::Unauthorized);
        }

        Ok(AuthIdentity::Bearer {
            fingerprint: hex::encode(&presented[..8]),
        })
    }

    /// Record a request for `key` if its window has room
    pub fn admit(&self, key: &str) -> Result<(), GuardError> {
        self.admit_at(key, Instant::now())
    }

    pub fn admit_at(&self, key: &str, now: Instant) -> Result<(), GuardError> {
        let mut book = self.quotas.lock().unwrap_or_else(PoisonError::into_inner);
        book.sweep(now, self.window);
        let window = book.windows.entry(key.to_string()).or_default();

        while let Some(oldest) = window.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() >= self.capacity {
            let retry_after = window
                .front()
                .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
                .unwrap_or(self.window);
            if window.is_empty() {
                book.windows.remove(key);
            }
            return Err(GuardError::RateLimited {
                retry_after_secs: ceil_secs(retry_after),
            });
        }

        window.push_back(now);
        Ok(())
    }

    /// Number of requests currently counted against `key`
    pub fn in_window(&self, key: &str) -> usize {
        let book = self.quotas.lock().unwrap_or_else(PoisonError::into_inner);
        book.windows.get(key).map_or(0, VecDeque::len)
    }

    /// Number of keys holding quota state
    pub fn tracked_keys(&self) -> usize {
        let book = self.quotas.lock().unwrap_or_else(PoisonError::into_inner);
        book.windows.len()
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    secs.max(1)
}
