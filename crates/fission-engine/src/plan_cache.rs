//! LRU cache of executor vectors keyed by fragment id.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tracing::debug;

use fission_common::types::FragmentId;

use crate::exec::{ExecutorVector, SharedVector};

/// Bounded cache of compiled executor vectors.
///
/// Hits refresh recency; inserts evict the least-recently-used entry once
/// the cache is full. The entry matching the engine's currently-executing
/// vector is never the one evicted.
pub struct PlanCache {
    capacity: usize,
    entries: HashMap<FragmentId, SharedVector>,
    /// Recency order, least-recently-used first.
    lru: VecDeque<FragmentId>,
}

impl PlanCache {
    /// Creates an empty cache holding at most `capacity` vectors.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::with_capacity(capacity.max(1)),
            lru: VecDeque::new(),
        }
    }

    /// Returns the number of cached vectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if the fragment is cached, without touching recency.
    #[must_use]
    pub fn contains(&self, fragment_id: FragmentId) -> bool {
        self.entries.contains_key(&fragment_id)
    }

    /// Looks a fragment up, marking it most recently used on a hit.
    #[must_use]
    pub fn get(&mut self, fragment_id: FragmentId) -> Option<SharedVector> {
        let vector = self.entries.get(&fragment_id).cloned()?;
        self.touch(fragment_id);
        Some(vector)
    }

    /// Inserts a freshly built vector, evicting the least recently used
    /// entry if needed.
    ///
    /// `pinned` names the engine's current executor vector; it is skipped
    /// when choosing an eviction victim.
    pub fn insert(
        &mut self,
        fragment_id: FragmentId,
        vector: ExecutorVector,
        pinned: Option<FragmentId>,
    ) -> SharedVector {
        let shared = Arc::new(vector);
        if self.entries.insert(fragment_id, Arc::clone(&shared)).is_none() {
            self.lru.push_back(fragment_id);
        } else {
            self.touch(fragment_id);
        }

        while self.entries.len() > self.capacity {
            let Some(victim) = self.pick_victim(pinned) else {
                break;
            };
            self.entries.remove(&victim);
            self.lru.retain(|&id| id != victim);
            debug!(fragment_id = %victim, "evicted executor vector");
        }
        shared
    }

    /// Drops every cached vector (catalog replacement invalidates plans).
    pub fn clear(&mut self) {
        self.entries.clear();
        self.lru.clear();
    }

    fn touch(&mut self, fragment_id: FragmentId) {
        self.lru.retain(|&id| id != fragment_id);
        self.lru.push_back(fragment_id);
    }

    fn pick_victim(&self, pinned: Option<FragmentId>) -> Option<FragmentId> {
        self.lru
            .iter()
            .copied()
            .find(|&id| Some(id) != pinned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fission_plan::{PlanFragment, PlanNode};

    fn vector(id: i64) -> ExecutorVector {
        let fragment = PlanFragment::new(vec![PlanNode::SeqScan {
            table: "t".to_string(),
            predicate: None,
        }]);
        ExecutorVector::from_fragment(FragmentId::new(id), &fragment).unwrap()
    }

    #[test]
    fn test_hit_and_miss() {
        let mut cache = PlanCache::new(4);
        cache.insert(FragmentId::new(1), vector(1), None);
        assert!(cache.get(FragmentId::new(1)).is_some());
        assert!(cache.get(FragmentId::new(2)).is_none());
    }

    #[test]
    fn test_lru_eviction_order() {
        let mut cache = PlanCache::new(2);
        cache.insert(FragmentId::new(1), vector(1), None);
        cache.insert(FragmentId::new(2), vector(2), None);
        // Touch 1 so 2 becomes the LRU entry.
        cache.get(FragmentId::new(1));
        cache.insert(FragmentId::new(3), vector(3), None);

        assert!(cache.contains(FragmentId::new(1)));
        assert!(!cache.contains(FragmentId::new(2)));
        assert!(cache.contains(FragmentId::new(3)));
    }

    #[test]
    fn test_pinned_vector_survives_eviction() {
        let mut cache = PlanCache::new(2);
        cache.insert(FragmentId::new(1), vector(1), None);
        cache.insert(FragmentId::new(2), vector(2), None);
        // Fragment 1 is the LRU entry but also the current vector; the
        // eviction must fall through to fragment 2.
        cache.insert(FragmentId::new(3), vector(3), Some(FragmentId::new(1)));

        assert!(cache.contains(FragmentId::new(1)));
        assert!(!cache.contains(FragmentId::new(2)));
        assert!(cache.contains(FragmentId::new(3)));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_reinsert_refreshes_entry() {
        let mut cache = PlanCache::new(2);
        cache.insert(FragmentId::new(1), vector(1), None);
        cache.insert(FragmentId::new(1), vector(1), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_clear() {
        let mut cache = PlanCache::new(2);
        cache.insert(FragmentId::new(1), vector(1), None);
        cache.clear();
        assert!(cache.is_empty());
    }
}
