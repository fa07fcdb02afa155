use std::collections::VecDeque;

use hashbrown::HashMap;
use strata_geom::RegionKey;

use crate::snapshot::RegionPayload;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PayloadCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

/// LRU of recently applied payloads, validated by version on lookup.
pub struct PayloadCache {
    entries: HashMap<RegionKey, RegionPayload>,
    order: VecDeque<RegionKey>,
    capacity: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl PayloadCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    pub fn get(&mut self, key: RegionKey, expected_version: u64) -> Option<RegionPayload> {
        if let Some(payload) = self.entries.get(&key) {
            if payload.version == expected_version {
                let payload = payload.clone();
                self.hits += 1;
                self.touch(&key);
                return Some(payload);
            }
            self.remove_entry(&key);
        }
        self.misses += 1;
        None
    }

    pub fn insert(&mut self, payload: RegionPayload) {
        if self.capacity == 0 {
            return;
        }
        let key = payload.key;
        self.entries.insert(key, payload);
        self.remove_from_order(&key);
        self.order.push_back(key);
        self.enforce_capacity();
    }

    pub fn clear(&mut self) {
        self.evictions += self.entries.len() as u64;
        self.entries.clear();
        self.order.clear();
    }

    pub fn stats(&self) -> PayloadCacheStats {
        PayloadCacheStats {
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            entries: self.entries.len(),
        }
    }

    fn remove_entry(&mut self, key: &RegionKey) {
        if self.entries.remove(key).is_some() {
            self.evictions += 1;
        }
        self.remove_from_order(key);
    }

    fn touch(&mut self, key: &RegionKey) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if let Some(entry) = self.order.remove(pos) {
                self.order.push_back(entry);
            }
        }
    }

    fn remove_from_order(&mut self, key: &RegionKey) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
    }

    fn enforce_capacity(&mut self) {
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                if self.entries.remove(&old).is_some() {
                    self.evictions += 1;
                }
            }
        }
    }
}
