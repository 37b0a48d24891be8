use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};

use crate::models::Observation;

/// Ring buffer accumulating observations between thinking cycles.
///
/// A context hash seen within the dedup TTL rejects new observations with the
/// same hash outright: the dropped observation's payload (including any newer
/// image) is lost by design. The recency set is independent of buffer
/// occupancy and only shrinks by TTL expiry, so repeated contexts stay
/// suppressed across cycle boundaries.
pub struct ObservationBuffer {
    capacity: usize,
    dedup_ttl: Duration,
    entries: VecDeque<Observation>,
    recent_hashes: HashMap<String, DateTime<Utc>>,
}

impl ObservationBuffer {
    pub fn new(capacity: usize, dedup_ttl_secs: i64) -> Self {
        Self {
            capacity: capacity.max(1),
            dedup_ttl: Duration::seconds(dedup_ttl_secs.max(0)),
            entries: VecDeque::with_capacity(capacity.max(1)),
            recent_hashes: HashMap::new(),
        }
    }

    /// Enqueue an observation. Returns false when the context hash was seen
    /// within the TTL and the observation was dropped. A full buffer silently
    /// evicts its oldest entry.
    ///
    /// Expiry is driven by the incoming observation's timestamp, so callers
    /// own the clock.
    pub fn add(&mut self, obs: Observation) -> bool {
        self.expire_hashes(obs.timestamp);

        if self.recent_hashes.contains_key(&obs.context_hash) {
            return false;
        }

        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }

        self.recent_hashes
            .insert(obs.context_hash.clone(), obs.timestamp);
        self.entries.push_back(obs);
        true
    }

    /// All buffered observations in arrival order, non-destructive.
    pub fn all(&self) -> Vec<Observation> {
        self.entries.iter().cloned().collect()
    }

    /// Observations captured within the trailing window, non-destructive.
    pub fn recent(&self, now: DateTime<Utc>, window_secs: i64) -> Vec<Observation> {
        let cutoff = now - Duration::seconds(window_secs.max(0));
        self.entries
            .iter()
            .filter(|obs| obs.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    /// Empties the buffer. The recency set is deliberately untouched so a
    /// just-processed context cannot immediately re-enter.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn expire_hashes(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.dedup_ttl;
        self.recent_hashes.retain(|_, seen_at| *seen_at > cutoff);
    }
}
