//! Deduplication index of every URL admitted to the frontier

use crate::url::CanonicalUrl;
use crate::UrlResult;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Membership marker for one canonical URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenRecord {
    pub url: String,
    pub first_seen_at: DateTime<Utc>,
}

/// Concurrent set of canonical URLs
///
/// A URL is admitted at most once per crawl epoch. The check and the insert
/// happen under one shard lock, so two concurrent callers can never both
/// see a URL as new.
#[derive(Debug, Default)]
pub struct SeenSet {
    entries: DashMap<String, DateTime<Utc>>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalizes `url` and admits it; returns whether it was new
    pub fn admit(&self, url: &str) -> UrlResult<bool> {
        let canonical = CanonicalUrl::parse(url)?;
        Ok(self.admit_canonical(&canonical))
    }

    /// Admits an already normalized URL; returns whether it was new
    pub fn admit_canonical(&self, url: &CanonicalUrl) -> bool {
        match self.entries.entry(url.as_str().to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Utc::now());
                true
            }
        }
    }

    pub fn contains(&self, url: &CanonicalUrl) -> bool {
        self.entries.contains_key(url.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All records, sorted by URL so snapshots are stable
    pub fn snapshot(&self) -> Vec<SeenRecord> {
        let mut records: Vec<SeenRecord> = self
            .entries
            .iter()
            .map(|entry| SeenRecord {
                url: entry.key().clone(),
                first_seen_at: *entry.value(),
            })
            .collect();
        records.sort_by(|a, b| a.url.cmp(&b.url));
        records
    }

    /// Replaces the current membership with `records`
    pub fn restore(&self, records: Vec<SeenRecord>) {
        self.entries.clear();
        for record in records {
            self.entries.insert(record.url, record.first_seen_at);
        }
    }

    /// Forgets every URL; used when a new crawl epoch starts
    pub fn reset(&self) {
        self.entries.clear();
    }
}
