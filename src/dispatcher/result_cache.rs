//! Bounded, time-aware cache of terminal command results.

// self
use crate::_prelude::*;

#[derive(Debug)]
struct CacheEntry<V> {
	value: V,
	stored_at: OffsetDateTime,
	last_used: u64,
}

#[derive(Debug)]
struct CacheState<K, V> {
	entries: HashMap<K, CacheEntry<V>>,
	tick: u64,
}
impl<K, V> CacheState<K, V> {
	fn next_tick(&mut self) -> u64 {
		self.tick += 1;

		self.tick
	}
}

/// LRU map whose entries expire `ttl` after they were stored.
///
/// Lookups of expired entries remove them and report a miss.
#[derive(Debug)]
pub struct ResultCache<K, V> {
	capacity: usize,
	ttl: Duration,
	state: Mutex<CacheState<K, V>>,
}
impl<K, V> ResultCache<K, V>
where
	K: Clone + Eq + Hash,
	V: Clone,
{
	/// Creates an empty cache holding at most `capacity` entries.
	pub fn new(capacity: usize, ttl: Duration) -> Self {
		Self {
			capacity: capacity.max(1),
			ttl,
			state: Mutex::new(CacheState { entries: HashMap::new(), tick: 0 }),
		}
	}

	/// Returns the entry for `key` if it is younger than the TTL at `now`.
	pub fn get_at(&self, key: &K, now: OffsetDateTime) -> Option<V> {
		let mut state = self.state.lock();
		let tick = state.next_tick();

		match state.entries.get_mut(key) {
			None => return None,
			Some(entry) if now - entry.stored_at < self.ttl => {
				entry.last_used = tick;

				return Some(entry.value.clone());
			},
			Some(_) => {},
		}

		state.entries.remove(key);

		tracing::debug!("Evicted expired result cache entry.");

		None
	}

	/// [`get_at`](Self::get_at) with the current clock.
	pub fn get(&self, key: &K) -> Option<V> {
		self.get_at(key, OffsetDateTime::now_utc())
	}

	/// Stores `value`, replacing any entry for `key` and evicting the least recently used entry
	/// when full.
	pub fn put_at(&self, key: K, value: V, now: OffsetDateTime) {
		let mut state = self.state.lock();
		let tick = state.next_tick();

		if !state.entries.contains_key(&key) && state.entries.len() >= self.capacity {
			let oldest = state
				.entries
				.iter()
				.min_by_key(|(_, entry)| entry.last_used)
				.map(|(key, _)| key.clone());

			if let Some(oldest) = oldest {
				state.entries.remove(&oldest);
			}
		}

		state.entries.insert(key, CacheEntry { value, stored_at: now, last_used: tick });
	}

	/// [`put_at`](Self::put_at) with the current clock.
	pub fn put(&self, key: K, value: V) {
		self.put_at(key, value, OffsetDateTime::now_utc());
	}

	/// Removes the entry for `key`.
	pub fn remove(&self, key: &K) -> Option<V> {
		self.state.lock().entries.remove(key).map(|entry| entry.value)
	}

	/// Number of stored entries, expired ones included until looked up.
	pub fn len(&self) -> usize {
		self.state.lock().entries.len()
	}

	/// Returns true when nothing is stored.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Drops every entry.
	pub fn clear(&self) {
		self.state.lock().entries.clear();
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	#[test]
	fn entries_expire_and_are_removed_on_lookup() {
		let cache = ResultCache::new(4, Duration::seconds(30));
		let now = macros::datetime!(2025-11-10 12:00 UTC);

		cache.put_at("k", 1, now);

		assert_eq!(cache.get_at(&"k", now + Duration::seconds(29)), Some(1));
		assert_eq!(cache.len(), 1);
		assert_eq!(cache.get_at(&"k", now + Duration::seconds(30)), None);
		assert_eq!(cache.len(), 0);
	}

	#[test]
	fn put_replaces_and_full_cache_evicts_least_recently_used() {
		let cache = ResultCache::new(2, Duration::minutes(1));
		let now = macros::datetime!(2025-11-10 12:00 UTC);

		cache.put_at("a", 1, now);
		cache.put_at("b", 2, now);
		cache.put_at("a", 3, now);

		assert_eq!(cache.len(), 2);
		assert_eq!(cache.get_at(&"a", now), Some(3));

		cache.put_at("c", 4, now);

		assert_eq!(cache.get_at(&"b", now), None, "b was the least recently used entry.");
		assert_eq!(cache.get_at(&"a", now), Some(3));
		assert_eq!(cache.get_at(&"c", now), Some(4));

		cache.clear();

		assert!(cache.is_empty());
	}
}
