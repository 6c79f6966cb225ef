//! Verdict cache with TTL expiry and single-flight loading
//!
//! Every fingerprint maps to either a settled verdict (positive or negative)
//! or an in-flight load that concurrent callers attach to. Placeholders are
//! installed under the map's shard lock, so two callers can never both start
//! a load for the same key.
//!
//! `capacity` bounds the number of entries. Before a new load is admitted into
//! a full map, expired verdicts are swept and then the settled verdicts
//! closest to expiry are evicted. In-flight loads are never evicted, so the map
//! can briefly exceed the bound while more than `capacity` loads are pending.

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::credential::Fingerprint;
use crate::error::{AuthorizationError, Result};
use crate::types::{Allowed, EffectiveAuthorization};

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of entries kept in the map
    pub capacity: usize,

    /// Time-to-live for settled verdicts, measured from resolution
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            ttl: Duration::from_secs(60),
        }
    }
}

/// Values that carry their own expiry, which may shorten the cache TTL
pub trait Expiry {
    fn time_to_expiry(&self) -> Option<Duration> {
        None
    }
}

impl Expiry for EffectiveAuthorization {
    fn time_to_expiry(&self) -> Option<Duration> {
        Some(
            (self.expires_at() - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO),
        )
    }
}

impl Expiry for Allowed {}

/// Outcome shared by every caller of one load
pub type Verdict<V> = Result<Arc<V>>;

type Flight<V> = Shared<BoxFuture<'static, Verdict<V>>>;

enum Slot<V> {
    Ready {
        verdict: Verdict<V>,
        /// `None` when the deadline is past what `Instant` can represent
        expires_at: Option<Instant>,
    },
    Pending {
        flight_id: u64,
        flight: Flight<V>,
    },
}

enum Lookup<V> {
    Hit(Verdict<V>),
    Attach(Flight<V>),
    Lead {
        flight_id: u64,
        flight: Flight<V>,
        sender: oneshot::Sender<Verdict<V>>,
    },
}

fn is_live(expires_at: &Option<Instant>, now: Instant) -> bool {
    expires_at.map_or(true, |at| at > now)
}

/// Releases a load's placeholder if its task ends without settling it,
/// whether by panic or by the runtime dropping the task.
struct FlightGuard<V> {
    cache: SingleFlightCache<V>,
    key: Fingerprint,
    flight_id: u64,
    settled: bool,
}

impl<V> Drop for FlightGuard<V> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let flight_id = self.flight_id;
        let removed = self.cache.entries.remove_if(&self.key, |_, slot| {
            matches!(slot, Slot::Pending { flight_id: current, .. } if *current == flight_id)
        });
        if removed.is_some() {
            warn!("Load for {} ended without a verdict; placeholder released", self.key);
        }
    }
}

/// Single-flight verdict cache
pub struct SingleFlightCache<V> {
    /// Settled verdicts and in-flight placeholders
    entries: Arc<DashMap<Fingerprint, Slot<V>>>,

    /// Cache configuration
    config: CacheConfig,

    /// Cache statistics
    stats: Arc<DashMap<&'static str, u64>>,

    /// Monotonic id distinguishing successive loads of the same key
    next_flight: Arc<AtomicU64>,
}

impl<V> Clone for SingleFlightCache<V> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            config: self.config.clone(),
            stats: Arc::clone(&self.stats),
            next_flight: Arc::clone(&self.next_flight),
        }
    }
}

impl<V> SingleFlightCache<V>
where
    V: Expiry + Send + Sync + 'static,
{
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            config,
            stats: Arc::new(DashMap::new()),
            next_flight: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Return the live verdict for `key`, or run `loader` exactly once for all
    /// concurrent callers and share its outcome.
    ///
    /// The load runs on its own task: a caller that stops waiting does not
    /// cancel it for the others. Must be called within a tokio runtime.
    pub async fn get_or_load<F, Fut>(&self, key: Fingerprint, loader: F) -> Verdict<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Verdict<V>> + Send + 'static,
    {
        if self.entries.len() >= self.config.capacity && !self.entries.contains_key(&key) {
            self.make_room();
        }

        match self.lookup(key) {
            Lookup::Hit(verdict) => {
                debug!("Cache hit for {}", key);
                verdict
            }
            Lookup::Attach(flight) => {
                debug!("Attaching to in-flight load for {}", key);
                flight.await
            }
            Lookup::Lead {
                flight_id,
                flight,
                sender,
            } => {
                debug!("Cache miss for {}, loading", key);
                let guard = FlightGuard {
                    cache: self.clone(),
                    key,
                    flight_id,
                    settled: false,
                };
                let load = loader();
                tokio::spawn(async move {
                    let mut guard = guard;
                    let verdict = match AssertUnwindSafe(load).catch_unwind().await {
                        Ok(verdict) => verdict,
                        Err(_) => {
                            error!("Authorization load for {} panicked", key);
                            Err(AuthorizationError::Internal(
                                "authorization load panicked".to_string(),
                            ))
                        }
                    };
                    guard.cache.complete(key, flight_id, &verdict);
                    guard.settled = true;
                    // Waiters may all be gone; the settled entry still stands.
                    let _ = sender.send(verdict);
                });
                flight.await
            }
        }
    }

    /// Drop whatever is stored for `key`. Returns true if something was removed.
    pub fn invalidate(&self, key: &Fingerprint) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Clear the entire cache
    pub fn clear(&self) {
        self.entries.clear();
        self.stats.clear();
    }

    /// Number of entries, including in-flight placeholders
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove settled entries whose TTL has passed
    pub fn purge_expired(&self) {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, slot| match slot {
            Slot::Ready { expires_at, .. } => is_live(expires_at, now),
            Slot::Pending { .. } => true,
        });
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            self.add_stat("expirations", removed as u64);
            debug!("Purged {} expired cache entries", removed);
        }
    }

    /// Sweep expired verdicts, then evict the settled verdicts closest to
    /// expiry until one slot is free.
    fn make_room(&self) {
        self.purge_expired();

        let target = self.config.capacity.saturating_sub(1);
        let excess = self.entries.len().saturating_sub(target);
        if excess == 0 {
            return;
        }

        let mut settled: Vec<(Fingerprint, Option<Instant>)> = self
            .entries
            .iter()
            .filter_map(|entry| match entry.value() {
                Slot::Ready { expires_at, .. } => Some((*entry.key(), *expires_at)),
                Slot::Pending { .. } => None,
            })
            .collect();
        // Soonest deadline first; unbounded deadlines last
        settled.sort_by_key(|(_, expires_at)| (expires_at.is_none(), *expires_at));

        let mut evicted = 0u64;
        for (key, _) in settled.into_iter().take(excess) {
            let removed = self
                .entries
                .remove_if(&key, |_, slot| matches!(slot, Slot::Ready { .. }));
            if removed.is_some() {
                evicted += 1;
            }
        }

        if evicted > 0 {
            self.add_stat("evictions", evicted);
            debug!("Evicted {} cached verdicts at capacity {}", evicted, self.config.capacity);
        }
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.get_stat("hits"),
            misses: self.get_stat("misses"),
            coalesced: self.get_stat("coalesced"),
            expirations: self.get_stat("expirations"),
            evictions: self.get_stat("evictions"),
            entries: self.entries.len(),
            capacity: self.config.capacity,
        }
    }

    fn lookup(&self, key: Fingerprint) -> Lookup<V> {
        let now = Instant::now();

        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                let existing = match occupied.get() {
                    Slot::Ready {
                        verdict,
                        expires_at,
                    } if is_live(expires_at, now) => Some(Lookup::Hit(verdict.clone())),
                    Slot::Pending { flight, .. } => Some(Lookup::Attach(flight.clone())),
                    Slot::Ready { .. } => None,
                };

                match existing {
                    Some(Lookup::Hit(verdict)) => {
                        self.add_stat("hits", 1);
                        Lookup::Hit(verdict)
                    }
                    Some(attach) => {
                        self.add_stat("coalesced", 1);
                        attach
                    }
                    None => {
                        self.add_stat("expirations", 1);
                        self.add_stat("misses", 1);
                        let (slot, lead) = self.new_flight();
                        occupied.insert(slot);
                        lead
                    }
                }
            }
            Entry::Vacant(vacant) => {
                self.add_stat("misses", 1);
                let (slot, lead) = self.new_flight();
                vacant.insert(slot);
                lead
            }
        }
    }

    fn new_flight(&self) -> (Slot<V>, Lookup<V>) {
        let flight_id = self.next_flight.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel::<Verdict<V>>();

        let flight = receiver
            .map(|received| {
                received.unwrap_or_else(|_| {
                    Err(AuthorizationError::Internal(
                        "authorization load abandoned".to_string(),
                    ))
                })
            })
            .boxed()
            .shared();

        (
            Slot::Pending {
                flight_id,
                flight: flight.clone(),
            },
            Lookup::Lead {
                flight_id,
                flight,
                sender,
            },
        )
    }

    /// Settle the placeholder installed by `flight_id`, unless it was
    /// invalidated or replaced in the meantime.
    fn complete(&self, key: Fingerprint, flight_id: u64, verdict: &Verdict<V>) {
        let Entry::Occupied(mut occupied) = self.entries.entry(key) else {
            return;
        };

        let ours = matches!(
            occupied.get(),
            Slot::Pending { flight_id: current, .. } if *current == flight_id
        );
        if !ours {
            return;
        }

        let ttl = match verdict {
            Ok(value) => value
                .time_to_expiry()
                .map_or(self.config.ttl, |remaining| remaining.min(self.config.ttl)),
            Err(err) if err.is_cacheable() => self.config.ttl,
            Err(err) => {
                debug!("Not caching {:?} verdict for {}", err.kind(), key);
                occupied.remove();
                return;
            }
        };

        occupied.insert(Slot::Ready {
            verdict: verdict.clone(),
            expires_at: Instant::now().checked_add(ttl),
        });
    }

    fn add_stat(&self, key: &'static str, amount: u64) {
        self.stats
            .entry(key)
            .and_modify(|count| *count += amount)
            .or_insert(amount);
    }

    fn get_stat(&self, key: &'static str) -> u64 {
        self.stats.get(key).map(|v| *v).unwrap_or(0)
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub expirations: u64,
    pub evictions: u64,
    pub entries: usize,
    pub capacity: usize,
}

impl CacheStats {
    /// Fraction of lookups that avoided a new load
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.coalesced + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits + self.coalesced) as f64 / total as f64
        }
    }
}
