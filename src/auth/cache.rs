//! Issuer trust cache
//!
//! Maps an issuer URL to its fetched metadata and signing keys. Lookups for
//! a fresh record never await. When a record is missing or expired, exactly
//! one fetch runs per issuer: concurrent callers join the same
//! [`Shared`] future and observe the same outcome.
//!
//! A record moves through three windows:
//!
//! ```text
//! fetched_at ── fresh ──> expires_at ── stale, usable ──> usable_until ── unusable
//! ```
//!
//! A stale record triggers a refresh on access. If the refresh fails, the
//! stale record keeps serving until `usable_until`, and no new fetch starts
//! before `retry_interval` has passed.
//!
//! Refreshes forced by a signing key miss are limited to one per issuer per
//! `min_refresh_interval`; inside that window the current record is returned
//! as is.

use super::discovery::{FetchError, IssuerDocument, IssuerFetcher, IssuerMetadata};
use super::jwks::KeySet;
use super::trust::TrustPolicy;
use super::AuthError;
use crate::config::CacheConfig;
use crate::metrics;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Freshness and retry settings of the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    /// Freshness when the key set response has no `Cache-Control` hint
    pub default_ttl: Duration,
    /// Lower bound applied to a `Cache-Control` hint
    pub min_ttl: Duration,
    /// Upper bound applied to a `Cache-Control` hint
    pub max_ttl: Duration,
    /// How long after expiry a record may still be served if refresh fails
    pub grace: Duration,
    /// Minimum wait between failed fetch attempts for one issuer
    pub retry_interval: Duration,
    /// Bound on a single fetch of metadata plus keys
    pub fetch_timeout: Duration,
    /// Minimum wait between key-miss refreshes of one issuer
    pub min_refresh_interval: Duration,
}

impl CachePolicy {
    /// Freshness window for a fetched document
    pub fn freshness(&self, hint: Option<Duration>) -> Duration {
        match hint {
            Some(max_age) => max_age.max(self.min_ttl).min(self.max_ttl),
            None => self.default_ttl,
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

impl From<&CacheConfig> for CachePolicy {
    fn from(config: &CacheConfig) -> Self {
        Self {
            default_ttl: Duration::from_secs(config.default_ttl_seconds),
            min_ttl: Duration::from_secs(config.min_ttl_seconds),
            max_ttl: Duration::from_secs(config.max_ttl_seconds),
            grace: Duration::from_secs(config.grace_seconds),
            retry_interval: Duration::from_secs(config.retry_interval_seconds),
            fetch_timeout: config.fetch_timeout(),
            min_refresh_interval: Duration::from_secs(config.min_refresh_interval_seconds),
        }
    }
}

/// One issuer's metadata and keys as of one fetch
///
/// Never mutated. A refresh replaces the whole record.
#[derive(Debug)]
pub struct IssuerRecord {
    issuer: String,
    metadata: IssuerMetadata,
    keys: KeySet,
    fetched_at: Instant,
    expires_at: Instant,
    usable_until: Instant,
    generation: u64,
}

impl IssuerRecord {
    /// Build a record from a fetched document
    ///
    /// The document must describe `issuer` exactly and carry at least one
    /// usable signing key.
    pub fn build(
        issuer: &str,
        document: IssuerDocument,
        policy: &CachePolicy,
        generation: u64,
    ) -> Result<Self, FetchError> {
        if document.metadata.issuer != issuer {
            return Err(FetchError::IssuerMismatch {
                expected: issuer.to_string(),
                actual: document.metadata.issuer,
            });
        }

        let keys = KeySet::from_jwks(&document.jwks);
        if keys.is_empty() {
            return Err(FetchError::NoUsableKeys);
        }

        let fetched_at = Instant::now();
        let expires_at = fetched_at + policy.freshness(document.max_age);

        Ok(Self {
            issuer: issuer.to_string(),
            metadata: document.metadata,
            keys,
            fetched_at,
            expires_at,
            usable_until: expires_at + policy.grace,
            generation,
        })
    }

    /// Canonical issuer URL
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn metadata(&self) -> &IssuerMetadata {
        &self.metadata
    }

    pub fn keys(&self) -> &KeySet {
        &self.keys
    }

    pub fn fetched_at(&self) -> Instant {
        self.fetched_at
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn usable_until(&self) -> Instant {
        self.usable_until
    }

    /// Increases with every successful fetch, across all issuers
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }

    pub fn is_usable(&self, now: Instant) -> bool {
        now < self.usable_until
    }
}

type FetchOutcome = Result<Arc<IssuerRecord>, FetchError>;
type SharedFetch = Shared<BoxFuture<'static, FetchOutcome>>;

/// What a caller of `join_or_start` is satisfied by
#[derive(Debug, Clone, Copy)]
enum Wanted {
    /// Any fresh record
    Fresh,
    /// A record newer than this generation
    NewerThan(u64),
    /// Like `NewerThan`, but throttled by `min_refresh_interval`
    KeyMiss(u64),
}

/// Per-issuer cache state
///
/// Locks are only held for a read, a swap or a clone; never across `.await`.
#[derive(Default)]
struct IssuerSlot {
    record: RwLock<Option<Arc<IssuerRecord>>>,
    inflight: Mutex<Option<SharedFetch>>,
    /// Last fetch failure and when a new attempt may start
    failure: Mutex<Option<(Instant, FetchError)>>,
    /// When the last key-miss refresh started
    last_key_miss: Mutex<Option<Instant>>,
}

impl IssuerSlot {
    fn current(&self) -> Option<Arc<IssuerRecord>> {
        self.record.read().clone()
    }

    fn pending_failure(&self, now: Instant) -> Option<FetchError> {
        match &*self.failure.lock() {
            Some((retry_at, error)) if now < *retry_at => Some(error.clone()),
            _ => None,
        }
    }

    fn key_miss_throttled(&self, now: Instant, interval: Duration) -> bool {
        matches!(*self.last_key_miss.lock(), Some(at) if now < at + interval)
    }
}

/// Concurrency-safe cache of issuer trust material
pub struct IssuerTrustCache {
    trust: TrustPolicy,
    fetcher: Arc<dyn IssuerFetcher>,
    policy: CachePolicy,
    slots: DashMap<String, Arc<IssuerSlot>>,
    generation: Arc<AtomicU64>,
}

impl IssuerTrustCache {
    /// Create an empty cache
    pub fn new(trust: TrustPolicy, fetcher: Arc<dyn IssuerFetcher>, policy: CachePolicy) -> Self {
        Self {
            trust,
            fetcher,
            policy,
            slots: DashMap::new(),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn trust_policy(&self) -> &TrustPolicy {
        &self.trust
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// Return a usable record for `issuer_url`, fetching it if needed
    ///
    /// Fails with `IssuerUntrusted` before any network call when the trust
    /// policy does not accept the issuer, and with `IssuerUnreachable` when
    /// no fresh or within-grace record can be produced.
    pub async fn get_or_fetch(&self, issuer_url: &str) -> Result<Arc<IssuerRecord>, AuthError> {
        let trusted = self
            .trust
            .resolve(issuer_url)
            .ok_or_else(|| AuthError::IssuerUntrusted(issuer_url.to_string()))?;
        let issuer = trusted.issuer.as_str();
        let slot = self.slot(issuer);

        let current = slot.current();
        if let Some(record) = &current {
            let now = Instant::now();
            if record.is_fresh(now) {
                metrics::record_cache_lookup("hit");
                return Ok(Arc::clone(record));
            }
            if record.is_usable(now) && slot.pending_failure(now).is_some() {
                metrics::record_cache_lookup("stale");
                return Ok(Arc::clone(record));
            }
        }

        match self.join_or_start(issuer, &slot, Wanted::Fresh).await {
            Ok(record) => {
                metrics::record_cache_lookup("miss");
                Ok(record)
            }
            Err(e) => match slot.current().filter(|r| r.is_usable(Instant::now())) {
                Some(stale) => {
                    warn!(issuer = %issuer, error = %e, "Issuer refresh failed, serving stale record");
                    metrics::record_cache_lookup("stale");
                    Ok(stale)
                }
                None => Err(AuthError::IssuerUnreachable(e.to_string())),
            },
        }
    }

    /// Refresh an issuer after `seen` turned out to lack a needed key
    ///
    /// Single-flight like [`get_or_fetch`](Self::get_or_fetch). If the cache
    /// already holds a newer generation than `seen`, it is returned without a
    /// fetch. At most one such refresh starts per issuer per
    /// `min_refresh_interval`; a throttled call returns the current record.
    pub async fn force_refresh(
        &self,
        seen: &IssuerRecord,
    ) -> Result<Arc<IssuerRecord>, AuthError> {
        let issuer = seen.issuer();
        let slot = self.slot(issuer);
        self.join_or_start(issuer, &slot, Wanted::KeyMiss(seen.generation()))
            .await
            .map_err(|e| AuthError::IssuerUnreachable(e.to_string()))
    }

    /// Drop the record for an issuer; returns whether one was cached
    ///
    /// The slot itself stays, so a fetch already in flight is still joined
    /// by later callers.
    pub fn evict(&self, issuer_url: &str) -> bool {
        let key = self
            .trust
            .resolve(issuer_url)
            .map(|trusted| trusted.issuer.clone())
            .unwrap_or_else(|| issuer_url.to_string());
        let Some(slot) = self.slots.get(&key).map(|entry| Arc::clone(entry.value())) else {
            return false;
        };

        let removed = slot.record.write().take().is_some();
        *slot.failure.lock() = None;
        *slot.last_key_miss.lock() = None;
        if removed {
            info!(issuer = %key, "Evicted issuer record");
        }
        removed
    }

    /// The cached record for an issuer, whatever its age
    pub fn peek(&self, issuer_url: &str) -> Option<Arc<IssuerRecord>> {
        let trusted = self.trust.resolve(issuer_url)?;
        self.slots.get(&trusted.issuer)?.current()
    }

    /// Number of issuers with a cached record
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|entry| entry.value().current().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Refresh every record that expires within `horizon`
    ///
    /// Failures are logged and leave the current record in place. Returns
    /// the number of successful refreshes.
    pub async fn refresh_expiring(&self, horizon: Duration) -> usize {
        let deadline = Instant::now() + horizon;
        let due: Vec<(String, Arc<IssuerSlot>, u64)> = self
            .slots
            .iter()
            .filter_map(|entry| {
                let record = entry.value().current()?;
                (record.expires_at() <= deadline).then(|| {
                    (
                        entry.key().clone(),
                        Arc::clone(entry.value()),
                        record.generation(),
                    )
                })
            })
            .collect();

        let mut refreshed = 0;
        for (issuer, slot, generation) in due {
            match self
                .join_or_start(&issuer, &slot, Wanted::NewerThan(generation))
                .await
            {
                Ok(_) => refreshed += 1,
                Err(e) => debug!(issuer = %issuer, error = %e, "Background refresh failed"),
            }
        }
        refreshed
    }

    /// Periodically refresh records nearing expiry
    ///
    /// Best effort; request-path correctness does not depend on it. The task
    /// stops once the cache is dropped.
    pub fn spawn_background_refresh(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let cache = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let refreshed = cache.refresh_expiring(every).await;
                if refreshed > 0 {
                    debug!(refreshed, "Background issuer refresh complete");
                }
            }
        })
    }

    fn slot(&self, issuer: &str) -> Arc<IssuerSlot> {
        if let Some(slot) = self.slots.get(issuer) {
            return Arc::clone(slot.value());
        }
        Arc::clone(self.slots.entry(issuer.to_string()).or_default().value())
    }

    /// Join the in-flight fetch for `issuer`, or start one
    async fn join_or_start(
        &self,
        issuer: &str,
        slot: &Arc<IssuerSlot>,
        wanted: Wanted,
    ) -> FetchOutcome {
        let fetch = {
            let mut inflight = slot.inflight.lock();
            match inflight.as_ref() {
                Some(fetch) => fetch.clone(),
                None => {
                    let now = Instant::now();
                    if let Some(record) = slot.current() {
                        let satisfied = match wanted {
                            Wanted::Fresh => record.is_fresh(now),
                            Wanted::NewerThan(seen) | Wanted::KeyMiss(seen) => {
                                record.generation() > seen
                            }
                        };
                        if satisfied {
                            return Ok(record);
                        }
                        if matches!(wanted, Wanted::KeyMiss(_))
                            && slot.key_miss_throttled(now, self.policy.min_refresh_interval)
                        {
                            debug!(issuer = %issuer, "Key-miss refresh throttled");
                            return Ok(record);
                        }
                    }
                    if let Some(error) = slot.pending_failure(now) {
                        return Err(error);
                    }
                    if matches!(wanted, Wanted::KeyMiss(_)) {
                        *slot.last_key_miss.lock() = Some(now);
                    }

                    let fetch = self.fetch(issuer, Arc::clone(slot)).shared();
                    *inflight = Some(fetch.clone());
                    fetch
                }
            }
        };

        fetch.await
    }

    fn fetch(&self, issuer: &str, slot: Arc<IssuerSlot>) -> BoxFuture<'static, FetchOutcome> {
        let issuer = issuer.to_string();
        let fetcher = Arc::clone(&self.fetcher);
        let policy = self.policy.clone();
        let generation = Arc::clone(&self.generation);

        async move {
            debug!(issuer = %issuer, "Fetching issuer metadata and keys");
            let started = Instant::now();

            let outcome = match tokio::time::timeout(policy.fetch_timeout, fetcher.fetch(&issuer))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(policy.fetch_timeout)),
            }
            .and_then(|document| {
                let generation = generation.fetch_add(1, Ordering::Relaxed) + 1;
                IssuerRecord::build(&issuer, document, &policy, generation)
            })
            .map(Arc::new);

            metrics::record_issuer_fetch(outcome.is_ok(), started.elapsed().as_secs_f64());

            match &outcome {
                Ok(record) => {
                    info!(
                        issuer = %issuer,
                        keys = record.keys().len(),
                        generation = record.generation(),
                        "Issuer record refreshed"
                    );
                    *slot.record.write() = Some(Arc::clone(record));
                    *slot.failure.lock() = None;
                }
                Err(e) => {
                    warn!(issuer = %issuer, error = %e, "Issuer fetch failed");
                    *slot.failure.lock() = Some((Instant::now() + policy.retry_interval, e.clone()));
                }
            }

            slot.inflight.lock().take();
            outcome
        }
        .boxed()
    }
}
