//! # Ordered Window
//!
//! A bounded, sorted, de-duplicated run of records. Every mutation keeps three
//! invariants: keys are unique, keys ascend, and the length never exceeds the
//! capacity.
//!
//! ## Eviction
//!
//! When an insertion pushes the window over capacity, the record at index 0 is
//! dropped. This is eviction by position, not by "lowest key wins": a window that
//! follows a scroll position keeps sliding forward under insert pressure from below,
//! and its lower bound moves with it.

use crate::models::{Record, RecordKey, StreamItem};

/// What a single item did to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Inserted { evicted: bool },
    Replaced,
    Deleted,
    /// Delete marker for a key the window does not hold.
    Ignored,
}

/// Bound changes caused by an insertion. The caller owns the bounds; the window only
/// reports how they move.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundsUpdate {
    pub start_key: Option<RecordKey>,
    pub end_key: Option<RecordKey>,
}

#[derive(Debug, Clone, Default)]
pub struct OrderedWindow {
    entries: Vec<(RecordKey, Record)>,
}

impl OrderedWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn first_key(&self) -> Option<&RecordKey> {
        self.entries.first().map(|(k, _)| k)
    }

    pub fn get(&self, key: &RecordKey) -> Option<&Record> {
        self.position(key).ok().map(|i| &self.entries[i].1)
    }

    pub fn keys(&self) -> impl Iterator<Item = &RecordKey> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.entries.iter().map(|(_, r)| r)
    }

    /// Owned copy of the records, in key order.
    pub fn snapshot(&self) -> Vec<Record> {
        self.records().cloned().collect()
    }

    fn position(&self, key: &RecordKey) -> Result<usize, usize> {
        self.entries.binary_search_by(|(k, _)| k.cmp(key))
    }

    /// Applies one classified item.
    ///
    /// `start_key` is the current lower bound held by the caller; an insertion below it
    /// is reported in the returned [`BoundsUpdate`], as is an append past the end and
    /// the new first key after an eviction.
    pub fn apply(
        &mut self,
        item: StreamItem,
        capacity: usize,
        start_key: &RecordKey,
    ) -> (Applied, BoundsUpdate) {
        let mut bounds = BoundsUpdate::default();

        match item {
            StreamItem::Delete { key } => match self.position(&key) {
                Ok(i) => {
                    self.entries.remove(i);
                    (Applied::Deleted, bounds)
                }
                Err(_) => (Applied::Ignored, bounds),
            },
            StreamItem::Upsert { key, record } => match self.position(&key) {
                Ok(i) => {
                    self.entries[i].1 = record;
                    (Applied::Replaced, bounds)
                }
                Err(i) if i < self.entries.len() => {
                    if key < *start_key {
                        bounds.start_key = Some(key.clone());
                    }
                    self.entries.insert(i, (key, record));
                    let evicted = self.evict_over(capacity, &mut bounds);
                    (Applied::Inserted { evicted }, bounds)
                }
                Err(_) => {
                    bounds.end_key = Some(key.clone());
                    self.entries.push((key, record));
                    let evicted = self.evict_over(capacity, &mut bounds);
                    (Applied::Inserted { evicted }, bounds)
                }
            },
        }
    }

    /// Drops records from index 0 until at most `capacity` remain and returns how many
    /// went. Used when the capacity itself shrinks under a populated window.
    pub fn evict_to(&mut self, capacity: usize) -> usize {
        let excess = self.entries.len().saturating_sub(capacity);
        if excess > 0 {
            self.entries.drain(..excess);
            log::debug!("Window shrunk to capacity {}, evicted {} record(s)", capacity, excess);
        }
        excess
    }

    fn evict_over(&mut self, capacity: usize, bounds: &mut BoundsUpdate) -> bool {
        if self.entries.len() <= capacity {
            return false;
        }
        let (dropped, _) = self.entries.remove(0);
        log::trace!("Window over capacity {}, evicted key {:?}", capacity, dropped.as_value());
        bounds.start_key = self.first_key().cloned();
        true
    }
}
