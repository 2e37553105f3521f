//! Process-wide state shared by every request: the answer cache, the IPv6
//! verdict from startup, and the resolver.

use crate::cache::AnswerCache;
use crate::error::LookupError;
use crate::metrics::{LOOKUPS_TOTAL, LOOKUP_DURATION};
use crate::resolver::Resolver;
use crate::transport::Transport;
use crate::types::Site;
use std::time::Instant;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Cached(Vec<Site>),
    Resolved { trace: Vec<Site>, records: Vec<Site> },
    Unresolvable { trace: Vec<Site> },
}

pub struct Context<T: Transport> {
    cache: AnswerCache,
    ipv6: bool,
    resolver: Resolver<T>,
}

impl<T: Transport> Context<T> {
    pub fn new(cache: AnswerCache, ipv6: bool, resolver: Resolver<T>) -> Self {
        if ipv6 {
            info!("Using IPv4 and IPv6 both.");
        } else {
            info!("Using IPv4 only.");
        }
        Self { cache, ipv6, resolver }
    }

    pub fn ipv6_supported(&self) -> bool {
        self.ipv6
    }

    pub fn cache(&self) -> &AnswerCache {
        &self.cache
    }

    pub fn resolver(&self) -> &Resolver<T> {
        &self.resolver
    }

    /// Answers `raw_domain`, from the cache when no trace is wanted.
    pub async fn lookup(&self, raw_domain: &str, include_trace: bool) -> Result<Lookup, LookupError> {
        let domain = raw_domain.trim_matches('.');
        if domain.is_empty() {
            return Err(LookupError::InvalidDomain(raw_domain.to_string()));
        }

        if !include_trace {
            if let Some(records) = self.cache.get(domain) {
                LOOKUPS_TOTAL.with_label_values(&["cache"]).inc();
                return Ok(Lookup::Cached(records));
            }
        }

        let started = Instant::now();
        let resolution = self.resolver.resolve(domain, self.ipv6).await;
        LOOKUP_DURATION.observe(started.elapsed().as_secs_f64());

        if resolution.records.is_empty() {
            LOOKUPS_TOTAL.with_label_values(&["unresolvable"]).inc();
            return Ok(Lookup::Unresolvable { trace: resolution.trace });
        }

        LOOKUPS_TOTAL.with_label_values(&["resolved"]).inc();
        self.cache.add(domain, started, resolution.records.clone());
        Ok(Lookup::Resolved { trace: resolution.trace, records: resolution.records })
    }

    /// Drops expired cache entries, returning how many were removed.
    pub fn refresh_cache(&self) -> usize {
        let evicted = self.cache.sweep();
        info!("Cache refresh evicted {} expired domain(s)", evicted);
        evicted
    }
}
