//! Region pool manager holding every waiting player
//!
//! All pools live behind one synchronous mutex. Callers enter the critical
//! section through [`RegionPoolManager::with_pools`], which takes a closure, so
//! the guard can never be held across an `.await` and an abandoned caller can
//! never leave the lock taken.

use crate::error::{MatchmakingError, Result};
use crate::pool::matching::{ClosestRatingMatcher, PoolMatcher};
use crate::types::{PlayerId, PoolKey, QueueEntry, Rating, Region};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// The pools themselves; only reachable while the manager's lock is held
pub struct RegionPools {
    pools: HashMap<PoolKey, Vec<QueueEntry>>,
    /// Which pool each waiting player is in
    members: HashMap<PlayerId, PoolKey>,
    /// Players taken out of a pool whose match has not been resolved yet
    reserved: HashSet<PlayerId>,
    same_region_only: bool,
    matcher: Arc<dyn PoolMatcher>,
}

impl RegionPools {
    fn new(same_region_only: bool, matcher: Arc<dyn PoolMatcher>) -> Self {
        Self {
            pools: HashMap::new(),
            members: HashMap::new(),
            reserved: HashSet::new(),
            same_region_only,
            matcher,
        }
    }

    /// Pool a player from `region` waits in
    pub fn key_for(&self, region: Region) -> PoolKey {
        if self.same_region_only {
            PoolKey::Region(region)
        } else {
            PoolKey::Global
        }
    }

    /// Append to the tail of the entry's pool and return the new pool size.
    /// Callers must make sure the player is not already waiting.
    pub fn enqueue(&mut self, entry: QueueEntry) -> usize {
        let key = self.key_for(entry.region);
        self.members.insert(entry.id.clone(), key);
        let pool = self.pools.entry(key).or_default();
        pool.push(entry);
        pool.len()
    }

    /// Closest waiting candidate within `threshold`, without removing it
    pub fn find_best_match(
        &self,
        key: PoolKey,
        rating: Rating,
        threshold: Rating,
    ) -> Option<QueueEntry> {
        let pool = self.pools.get(&key)?;
        self.matcher
            .find_best_match(pool, rating, threshold)
            .and_then(|index| pool.get(index).cloned())
    }

    /// Remove exactly the matched entry; the rest keep their order
    pub fn remove_matched(&mut self, key: PoolKey, candidate: &QueueEntry) -> Option<QueueEntry> {
        let pool = self.pools.get_mut(&key)?;
        let index = pool.iter().position(|entry| entry.id == candidate.id)?;
        let removed = pool.remove(index);
        self.members.remove(&removed.id);
        Some(removed)
    }

    /// Take a waiting player out of whichever pool holds them
    pub fn remove_player(&mut self, player_id: &str) -> Option<QueueEntry> {
        let key = self.members.remove(player_id)?;
        let pool = self.pools.get_mut(&key)?;
        let index = pool.iter().position(|entry| entry.id == player_id)?;
        Some(pool.remove(index))
    }

    pub fn contains(&self, player_id: &str) -> bool {
        self.members.contains_key(player_id)
    }

    /// Mark both sides of a match as taken until [`RegionPools::release`]
    pub fn reserve(&mut self, first: &str, second: &str) {
        self.reserved.insert(first.to_string());
        self.reserved.insert(second.to_string());
    }

    pub fn release(&mut self, player_ids: &[PlayerId]) {
        for id in player_ids {
            self.reserved.remove(id);
        }
    }

    pub fn is_reserved(&self, player_id: &str) -> bool {
        self.reserved.contains(player_id)
    }

    pub fn pool_of(&self, player_id: &str) -> Option<PoolKey> {
        self.members.get(player_id).copied()
    }

    pub fn pool_size(&self, key: PoolKey) -> usize {
        self.pools.get(&key).map(Vec::len).unwrap_or(0)
    }

    pub fn total_waiting(&self) -> usize {
        self.members.len()
    }
}

/// Owns the per-region waiting pools
pub struct RegionPoolManager {
    pools: Mutex<RegionPools>,
}

impl RegionPoolManager {
    /// Create a manager with the default closest-rating matcher
    pub fn new(same_region_only: bool) -> Self {
        Self::with_matcher(same_region_only, Arc::new(ClosestRatingMatcher::new()))
    }

    /// Create a manager with a custom candidate search
    pub fn with_matcher(same_region_only: bool, matcher: Arc<dyn PoolMatcher>) -> Self {
        Self {
            pools: Mutex::new(RegionPools::new(same_region_only, matcher)),
        }
    }

    /// Run `f` as one critical section over all pools
    pub fn with_pools<R>(&self, f: impl FnOnce(&mut RegionPools) -> R) -> Result<R> {
        let mut pools = self
            .pools
            .lock()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire region pools lock".to_string(),
            })?;
        Ok(f(&mut pools))
    }

    /// Append a player to their region's pool; returns the pool size after
    pub fn enqueue(&self, entry: QueueEntry) -> Result<usize> {
        self.with_pools(|pools| {
            let player_id = entry.id.clone();
            let size = pools.enqueue(entry);
            debug!("Enqueued '{}' - pool size now {}", player_id, size);
            size
        })
    }

    /// Peek at the best candidate in `key`'s pool
    pub fn find_best_match(
        &self,
        key: PoolKey,
        rating: Rating,
        threshold: Rating,
    ) -> Result<Option<QueueEntry>> {
        self.with_pools(|pools| pools.find_best_match(key, rating, threshold))
    }

    /// Remove a previously found candidate from its pool
    pub fn remove_matched(&self, key: PoolKey, candidate: &QueueEntry) -> Result<Option<QueueEntry>> {
        self.with_pools(|pools| pools.remove_matched(key, candidate))
    }

    /// Take a waiting player out of their pool
    pub fn remove_player(&self, player_id: &str) -> Result<Option<QueueEntry>> {
        self.with_pools(|pools| pools.remove_player(player_id))
    }

    pub fn contains(&self, player_id: &str) -> Result<bool> {
        self.with_pools(|pools| pools.contains(player_id))
    }

    pub fn is_reserved(&self, player_id: &str) -> Result<bool> {
        self.with_pools(|pools| pools.is_reserved(player_id))
    }

    /// Let the given players queue again after their match ended
    pub fn release(&self, player_ids: &[PlayerId]) -> Result<()> {
        self.with_pools(|pools| pools.release(player_ids))
    }

    pub fn pool_key(&self, region: Region) -> Result<PoolKey> {
        self.with_pools(|pools| pools.key_for(region))
    }

    pub fn pool_size(&self, key: PoolKey) -> Result<usize> {
        self.with_pools(|pools| pools.pool_size(key))
    }

    /// Size of every non-empty pool
    pub fn pool_sizes(&self) -> Result<HashMap<PoolKey, usize>> {
        self.with_pools(|pools| {
            pools
                .pools
                .iter()
                .filter(|(_, entries)| !entries.is_empty())
                .map(|(key, entries)| (*key, entries.len()))
                .collect()
        })
    }

    pub fn total_waiting(&self) -> Result<usize> {
        self.with_pools(|pools| pools.total_waiting())
    }

    /// Copy of a pool's entries in insertion order
    pub fn snapshot(&self, key: PoolKey) -> Result<Vec<QueueEntry>> {
        self.with_pools(|pools| pools.pools.get(&key).cloned().unwrap_or_default())
    }
}

impl Default for RegionPoolManager {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, rating: Rating) -> QueueEntry {
        QueueEntry::new(id, rating, Region::Europe)
    }

    const EUROPE: PoolKey = PoolKey::Region(Region::Europe);

    #[test]
    fn test_enqueue_into_empty_pool() {
        let manager = RegionPoolManager::new(true);

        assert_eq!(manager.find_best_match(EUROPE, 2000, 200).unwrap(), None);
        let size = manager.enqueue(entry("B", 2000)).unwrap();

        assert_eq!(size, 1);
        assert_eq!(manager.pool_size(EUROPE).unwrap(), 1);
        assert!(manager.contains("B").unwrap());
    }

    #[test]
    fn test_match_and_remove_single_waiting_player() {
        let manager = RegionPoolManager::new(true);
        manager.enqueue(entry("A", 1900)).unwrap();

        let candidate = manager.find_best_match(EUROPE, 2000, 200).unwrap().unwrap();
        assert_eq!(candidate.id, "A");

        let removed = manager.remove_matched(EUROPE, &candidate).unwrap().unwrap();
        assert_eq!(removed.id, "A");
        assert_eq!(manager.pool_size(EUROPE).unwrap(), 0);
        assert!(!manager.contains("A").unwrap());
    }

    #[test]
    fn test_closest_of_two_is_chosen() {
        let manager = RegionPoolManager::new(true);
        manager.enqueue(entry("A", 1700)).unwrap();
        manager.enqueue(entry("C", 1950)).unwrap();

        let candidate = manager.find_best_match(EUROPE, 2000, 200).unwrap().unwrap();
        assert_eq!(candidate.id, "C");
    }

    #[test]
    fn test_remove_preserves_order() {
        let manager = RegionPoolManager::new(true);
        for (id, rating) in [("A", 1000), ("B", 2000), ("C", 3000), ("D", 4000)] {
            manager.enqueue(entry(id, rating)).unwrap();
        }

        let b = manager.find_best_match(EUROPE, 2010, 50).unwrap().unwrap();
        manager.remove_matched(EUROPE, &b).unwrap();

        let remaining: Vec<String> = manager
            .snapshot(EUROPE)
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(remaining, vec!["A", "C", "D"]);
    }

    #[test]
    fn test_regions_are_separate_pools() {
        let manager = RegionPoolManager::new(true);
        manager
            .enqueue(QueueEntry::new("asia-1", 2000, Region::Asia))
            .unwrap();

        assert_eq!(manager.find_best_match(EUROPE, 2000, 200).unwrap(), None);
        assert!(manager
            .find_best_match(PoolKey::Region(Region::Asia), 2000, 200)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_global_pool_when_region_scoping_disabled() {
        let manager = RegionPoolManager::new(false);
        manager
            .enqueue(QueueEntry::new("asia-1", 2000, Region::Asia))
            .unwrap();

        assert_eq!(manager.pool_key(Region::Europe).unwrap(), PoolKey::Global);
        let candidate = manager
            .find_best_match(PoolKey::Global, 1990, 200)
            .unwrap()
            .unwrap();
        assert_eq!(candidate.id, "asia-1");
    }

    #[test]
    fn test_remove_player() {
        let manager = RegionPoolManager::new(true);
        manager.enqueue(entry("A", 1500)).unwrap();
        manager.enqueue(entry("B", 1600)).unwrap();

        let removed = manager.remove_player("A").unwrap();
        assert_eq!(removed.map(|e| e.id), Some("A".to_string()));
        assert_eq!(manager.remove_player("A").unwrap(), None);
        assert_eq!(manager.total_waiting().unwrap(), 1);
    }

    #[test]
    fn test_pool_sizes_skips_empty_pools() {
        let manager = RegionPoolManager::new(true);
        manager.enqueue(entry("A", 1500)).unwrap();
        manager
            .enqueue(QueueEntry::new("B", 1500, Region::Africa))
            .unwrap();
        manager.remove_player("B").unwrap();

        let sizes = manager.pool_sizes().unwrap();
        assert_eq!(sizes.len(), 1);
        assert_eq!(sizes.get(&EUROPE), Some(&1));
    }

    #[test]
    fn test_reserved_players_are_tracked_until_released() {
        let manager = RegionPoolManager::new(true);
        manager.enqueue(entry("A", 1900)).unwrap();

        manager
            .with_pools(|pools| {
                let candidate = pools.find_best_match(EUROPE, 2000, 200).unwrap();
                pools.remove_matched(EUROPE, &candidate);
                pools.reserve("B", &candidate.id);
            })
            .unwrap();

        assert!(!manager.contains("A").unwrap());
        assert!(manager.is_reserved("A").unwrap());
        assert!(manager.is_reserved("B").unwrap());
        assert_eq!(manager.total_waiting().unwrap(), 0);

        manager.release(&["A".to_string(), "B".to_string()]).unwrap();
        assert!(!manager.is_reserved("A").unwrap());
        assert!(!manager.is_reserved("B").unwrap());
    }

    #[test]
    fn test_critical_section_is_atomic_across_threads() {
        let manager = Arc::new(RegionPoolManager::new(true));
        manager.enqueue(entry("waiting", 2000)).unwrap();

        // Many threads race to claim the same candidate; exactly one wins
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let manager = manager.clone();
                std::thread::spawn(move || {
                    manager
                        .with_pools(|pools| {
                            let candidate = pools.find_best_match(EUROPE, 2000, 200)?;
                            pools.remove_matched(EUROPE, &candidate)
                        })
                        .unwrap()
                })
            })
            .collect();

        let claimed = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .count();
        assert_eq!(claimed, 1);
    }
}
