//! Single-use anti-replay tokens (`state`, `nonce`).
//!
//! Entries live in memory only and are never persisted. Redemption removes
//! the entry under the same lock that checks it, so a token can be redeemed
//! at most once no matter how many requests race for it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Validity window of a freshly issued token.
///
/// Covers an interactive OIDC login round trip through the platform with
/// room for a slow user; anything older is treated as a replay.
pub const SINGLE_USE_TOKEN_TTL: Duration = Duration::from_secs(10 * 60);

/// A fresh random token value (UUID v4, 122 bits from the OS CSPRNG).
pub fn new_token() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone)]
struct Entry {
    payload: String,
    issued_at: Instant,
}

#[derive(Debug)]
struct Inner {
    entries: HashMap<String, Entry>,
    last_sweep: Instant,
}

/// Concurrency-safe store of single-use tokens with TTL eviction.
#[derive(Debug, Clone)]
pub struct TokenCache {
    inner: Arc<Mutex<Inner>>,
    ttl: Duration,
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new(SINGLE_USE_TOKEN_TTL)
    }
}

impl TokenCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: HashMap::new(),
                last_sweep: Instant::now(),
            })),
            ttl,
        }
    }

    /// Issue a token whose payload is the token itself.
    pub async fn issue(&self) -> String {
        let token = new_token();
        self.insert(token.clone(), token.clone()).await;
        token
    }

    /// Issue a token bound to `payload` (e.g. a nonce bound to its state).
    pub async fn issue_bound(&self, payload: impl Into<String>) -> String {
        let token = new_token();
        self.insert(token.clone(), payload.into()).await;
        token
    }

    async fn insert(&self, token: String, payload: String) {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        if now.duration_since(inner.last_sweep) >= self.ttl / 2 {
            let removed = sweep(&mut inner.entries, now, self.ttl);
            inner.last_sweep = now;
            if removed > 0 {
                debug!("Swept {} expired single-use tokens on access", removed);
            }
        }
        inner.entries.insert(
            token,
            Entry {
                payload,
                issued_at: now,
            },
        );
    }

    /// Atomically redeem `token`, returning its payload.
    ///
    /// Returns `None` if the token was never issued, was already redeemed,
    /// or has outlived the validity window. The entry is gone afterwards in
    /// every case.
    pub async fn take(&self, token: &str) -> Option<String> {
        let mut inner = self.inner.lock().await;
        let entry = inner.entries.remove(token)?;
        if entry.issued_at.elapsed() > self.ttl {
            debug!("Single-use token presented after expiry");
            return None;
        }
        Some(entry.payload)
    }

    /// Atomically redeem `token`; `true` only for the first fresh redemption.
    pub async fn consume(&self, token: &str) -> bool {
        self.take(token).await.is_some()
    }

    /// Drop every expired entry, returning how many were removed.
    pub async fn sweep_expired(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        inner.last_sweep = now;
        sweep(&mut inner.entries, now, self.ttl)
    }

    /// Number of live (not yet swept) entries.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Periodically sweep expired entries until `shutdown` fires.
    pub fn spawn_sweeper(
        &self,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = cache.sweep_expired().await;
                        if removed > 0 {
                            debug!("Swept {} expired single-use tokens", removed);
                        }
                    }
                }
            }
        })
    }
}

fn sweep(entries: &mut HashMap<String, Entry>, now: Instant, ttl: Duration) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| now.duration_since(entry.issued_at) <= ttl);
    before - entries.len()
}
