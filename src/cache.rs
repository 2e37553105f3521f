use crate::metrics::{CACHE_ENTRIES, CACHE_EVICTIONS_TOTAL};
use crate::types::Site;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub inserted_at: Instant,
    pub sites: Vec<Site>,
}

impl CacheEntry {
    /// All records of an entry share fate: one elapsed TTL expires the whole entry.
    fn is_expired(&self, now: Instant) -> bool {
        self.sites
            .iter()
            .any(|site| self.inserted_at + Duration::from_secs(u64::from(site.ttl)) < now)
    }
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
}

impl CacheInner {
    fn remove(&mut self, domain: &str) {
        self.entries.remove(domain);
        self.order.retain(|d| d != domain);
    }
}

/// Answers of earlier lookups, keyed by the domain exactly as the client sent it.
///
/// Eviction is FIFO by insertion, not LRU. `capacity` of `None` means unbounded,
/// `Some(0)` disables caching altogether.
pub struct AnswerCache {
    capacity: Option<usize>,
    inner: Mutex<CacheInner>,
}

impl AnswerCache {
    pub fn new(capacity: Option<usize>) -> Self {
        Self { capacity, inner: Mutex::new(CacheInner::default()) }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, domain: &str) -> Option<Vec<Site>> {
        self.get_at(domain, Instant::now())
    }

    pub fn get_at(&self, domain: &str, now: Instant) -> Option<Vec<Site>> {
        let mut inner = self.lock();
        let expired = match inner.entries.get(domain) {
            None => {
                tracing::debug!("[cache] MISS for '{}'", domain);
                return None;
            }
            Some(entry) => entry.is_expired(now),
        };

        if expired {
            tracing::info!("[cache] Removing expired records for '{}'", domain);
            inner.remove(domain);
            CACHE_EVICTIONS_TOTAL.with_label_values(&["expired"]).inc();
            CACHE_ENTRIES.set(inner.entries.len() as f64);
            return None;
        }

        tracing::info!("[cache] HIT for '{}'", domain);
        inner.entries.get(domain).map(|entry| entry.sites.clone())
    }

    pub fn add(&self, domain: &str, inserted_at: Instant, sites: Vec<Site>) {
        let Some(limit) = self.capacity.map_or(Some(usize::MAX), |c| (c > 0).then_some(c)) else {
            return;
        };

        let mut inner = self.lock();
        if inner.entries.contains_key(domain) {
            inner.order.retain(|d| d != domain);
        } else if inner.order.len() >= limit {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
                tracing::info!("[cache] Evicting '{}' to stay within {} entries", oldest, limit);
                CACHE_EVICTIONS_TOTAL.with_label_values(&["capacity"]).inc();
            }
        }

        tracing::info!("[cache] Storing {} record(s) for '{}'", sites.len(), domain);
        inner.entries.insert(domain.to_string(), CacheEntry { inserted_at, sites });
        inner.order.push_back(domain.to_string());
        CACHE_ENTRIES.set(inner.entries.len() as f64);
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// Evicts every expired entry and returns how many went.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut inner = self.lock();
        let expired: Vec<String> = inner
            .order
            .iter()
            .filter(|d| inner.entries.get(d.as_str()).map_or(false, |e| e.is_expired(now)))
            .cloned()
            .collect();

        for domain in &expired {
            tracing::info!("[cache] Removing expired records for '{}'", domain);
            inner.remove(domain);
        }
        CACHE_EVICTIONS_TOTAL.with_label_values(&["expired"]).inc_by(expired.len() as u64);
        CACHE_ENTRIES.set(inner.entries.len() as f64);
        expired.len()
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
