//! Protocol version negotiation cache.

// std
use std::sync::atomic::{AtomicBool, Ordering};
// self
use crate::{_prelude::*, auth::PackageName};

/// Protocol name advertised in every hello handshake.
pub const MSAL_TO_BROKER_PROTOCOL_NAME: &str = "msal.to.broker";
/// Default lifetime of a cached handshake outcome.
pub const DEFAULT_HELLO_CACHE_TTL: Duration = Duration::hours(4);

/// Cached handshake outcome.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HelloOutcome {
	/// The broker agreed on this protocol version.
	Negotiated(String),
	/// The broker rejected the advertised version range.
	HandshakeError,
}

/// Identifies one handshake: advertised range plus the broker build it ran against.
#[derive(Clone, Copy, Debug)]
pub struct HelloKey<'a> {
	/// Minimum version the caller requires.
	pub min_version: Option<&'a str>,
	/// Maximum version the client speaks.
	pub max_version: &'a str,
	/// Broker package.
	pub package: &'a PackageName,
	/// Broker application version.
	pub app_version: &'a str,
}

#[derive(Debug)]
struct HelloEntry {
	outcome: HelloOutcome,
	stored_at: OffsetDateTime,
}

type Partition = Arc<RwLock<HashMap<String, HelloEntry>>>;

/// TTL cache of hello outcomes, partitioned and locked per broker package.
#[derive(Debug)]
pub struct HelloCache {
	protocol_name: String,
	ttl: Duration,
	enabled: AtomicBool,
	partitions: RwLock<HashMap<PackageName, Partition>>,
}
impl HelloCache {
	/// Creates an empty cache.
	pub fn new(protocol_name: impl Into<String>, ttl: Duration) -> Self {
		Self {
			protocol_name: protocol_name.into(),
			ttl,
			enabled: AtomicBool::new(true),
			partitions: RwLock::new(HashMap::new()),
		}
	}

	/// Turns caching on or off; a disabled cache misses on every lookup and drops every save.
	pub fn set_enabled(&self, enabled: bool) {
		self.enabled.store(enabled, Ordering::Relaxed);
	}

	/// Returns whether caching is on.
	pub fn is_enabled(&self) -> bool {
		self.enabled.load(Ordering::Relaxed)
	}

	/// Looks up a live entry at `now`; expired entries are removed and reported as misses.
	pub fn get_at(&self, key: HelloKey<'_>, now: OffsetDateTime) -> Option<HelloOutcome> {
		if !self.is_enabled() {
			return None;
		}

		let partition = self.partitions.read().get(key.package).cloned()?;
		let cache_key = self.cache_key(key);

		{
			let entries = partition.read();
			let entry = entries.get(&cache_key)?;

			if now - entry.stored_at < self.ttl {
				return Some(entry.outcome.clone());
			}
		}

		let mut entries = partition.write();

		if entries.get(&cache_key).is_some_and(|entry| now - entry.stored_at >= self.ttl) {
			entries.remove(&cache_key);

			tracing::debug!(key = %cache_key, "Evicted expired hello cache entry.");
		}

		None
	}

	/// [`get_at`](Self::get_at) with the current clock.
	pub fn get(&self, key: HelloKey<'_>) -> Option<HelloOutcome> {
		self.get_at(key, OffsetDateTime::now_utc())
	}

	/// Stores an outcome observed at `now`.
	pub fn save_at(&self, key: HelloKey<'_>, outcome: HelloOutcome, now: OffsetDateTime) {
		if !self.is_enabled() {
			return;
		}

		let partition = self.partition(key.package);
		let cache_key = self.cache_key(key);

		partition.write().insert(cache_key, HelloEntry { outcome, stored_at: now });
	}

	/// Stores a negotiated version with the current clock.
	pub fn save_negotiated_version(&self, key: HelloKey<'_>, version: impl Into<String>) {
		self.save_at(key, HelloOutcome::Negotiated(version.into()), OffsetDateTime::now_utc());
	}

	/// Stores a handshake failure with the current clock.
	pub fn save_handshake_error(&self, key: HelloKey<'_>) {
		self.save_at(key, HelloOutcome::HandshakeError, OffsetDateTime::now_utc());
	}

	/// Number of cached entries across every package.
	pub fn len(&self) -> usize {
		self.partitions.read().values().map(|partition| partition.read().len()).sum()
	}

	/// Returns true when nothing is cached.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Drops every entry.
	pub fn clear(&self) {
		self.partitions.write().clear();
	}

	fn partition(&self, package: &PackageName) -> Partition {
		if let Some(partition) = self.partitions.read().get(package) {
			return partition.clone();
		}

		self.partitions.write().entry(package.clone()).or_default().clone()
	}

	fn cache_key(&self, key: HelloKey<'_>) -> String {
		format!(
			"{}[{},{}]:{}[{}]",
			self.protocol_name,
			key.min_version.unwrap_or_default(),
			key.max_version,
			key.package,
			key.app_version
		)
	}
}
impl Default for HelloCache {
	fn default() -> Self {
		Self::new(MSAL_TO_BROKER_PROTOCOL_NAME, DEFAULT_HELLO_CACHE_TTL)
	}
}
