//! Hot in-memory cache of provider offers.
//!
//! Catalog lookups hit the provider's public price endpoint, which is slow
//! and rate limited. Offers are kept per `(service, country)` for a short TTL.

use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::domain::ProviderOffer;

#[derive(Debug, Clone)]
struct CachedOffer {
    offer: Option<ProviderOffer>,
    fetched_at: Instant,
}

/// Thread-safe TTL cache keyed by `(service, country)`.
///
/// "Nothing in stock" is cached too, so repeated lookups of an unavailable
/// pair do not hammer the provider.
#[derive(Debug)]
pub struct PriceCache {
    store: DashMap<(String, String), CachedOffer>,
    ttl: Duration,
}

impl PriceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            store: DashMap::new(),
            ttl,
        }
    }

    /// `Some(offer)` on a fresh hit, `None` on a miss or stale entry
    #[must_use]
    pub fn get(&self, service: &str, country: &str) -> Option<Option<ProviderOffer>> {
        let key = (service.to_string(), country.to_string());
        let entry = self.store.get(&key)?;
        if entry.fetched_at.elapsed() < self.ttl {
            debug!(service = %service, country = %country, "Price cache hit");
            return Some(entry.offer.clone());
        }
        drop(entry);
        self.store.remove(&key);
        None
    }

    pub fn insert(&self, service: &str, country: &str, offer: Option<ProviderOffer>) {
        self.store.insert(
            (service.to_string(), country.to_string()),
            CachedOffer {
                offer,
                fetched_at: Instant::now(),
            },
        );
    }

    /// Drop an entry, e.g. after the provider reports it is out of stock
    pub fn invalidate(&self, service: &str, country: &str) {
        self.store
            .remove(&(service.to_string(), country.to_string()));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}
