//! Response cache collaborator.
//!
//! A job only hands successful `GET` results to a [`CacheStore`] and asks it
//! for a copy before starting a worker. Expiry and eviction are entirely the
//! store's business.
use std::{collections::HashMap, time::SystemTime};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRecord {
    pub url: String,
    pub mime_type: Option<String>,
    pub data: Vec<u8>,
    pub expires: Option<SystemTime>,
}

impl CacheRecord {
    pub fn is_fresh(&self, now: SystemTime) -> bool {
        self.expires.is_none_or(|expires| expires > now)
    }
}

pub trait CacheStore {
    /// A usable copy of `url`, if the store has one.
    fn lookup(&mut self, url: &str) -> Option<CacheRecord>;
    fn insert(&mut self, record: CacheRecord);
}

/// Keeps records in memory until they expire.
#[derive(Debug, Default)]
pub struct MemoryCache {
    records: HashMap<String, CacheRecord>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl CacheStore for MemoryCache {
    fn lookup(&mut self, url: &str) -> Option<CacheRecord> {
        let now = SystemTime::now();
        match self.records.get(url) {
            Some(record) if record.is_fresh(now) => Some(record.clone()),
            Some(_) => {
                self.records.remove(url);
                None
            }
            None => None,
        }
    }

    fn insert(&mut self, record: CacheRecord) {
        self.records.insert(record.url.clone(), record);
    }
}
