//! Dispatcher configuration.

// self
use crate::{
	_prelude::*,
	error::ConfigError,
	ipc::{DEFAULT_HELLO_CACHE_TTL, HelloCache, MSAL_TO_BROKER_PROTOCOL_NAME},
};

/// Tunables for [`CommandDispatcher`](crate::dispatcher::CommandDispatcher).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
	/// Worker threads of the silent lane.
	pub silent_workers: usize,
	/// Upper bound a lane worker waits for `complete_interactive`; `None` waits forever.
	pub interactive_timeout: Option<Duration>,
	/// Timeout applied by `submit_silent_sync`.
	pub silent_sync_timeout: Duration,
	/// Maximum number of cached command results.
	pub result_cache_capacity: usize,
	/// Lifetime of a cached command result.
	pub result_cache_ttl: Duration,
	/// Lifetime of a negotiated broker protocol version.
	pub hello_cache_ttl: Duration,
}
impl DispatcherConfig {
	/// Sets the silent lane size.
	pub fn with_silent_workers(mut self, workers: usize) -> Self {
		self.silent_workers = workers;

		self
	}

	/// Sets or disables the interactive wait bound.
	pub fn with_interactive_timeout(mut self, timeout: Option<Duration>) -> Self {
		self.interactive_timeout = timeout;

		self
	}

	/// Sets the synchronous silent submission timeout.
	pub fn with_silent_sync_timeout(mut self, timeout: Duration) -> Self {
		self.silent_sync_timeout = timeout;

		self
	}

	/// Sets the result cache bound.
	pub fn with_result_cache_capacity(mut self, capacity: usize) -> Self {
		self.result_cache_capacity = capacity;

		self
	}

	/// Sets the result cache TTL.
	pub fn with_result_cache_ttl(mut self, ttl: Duration) -> Self {
		self.result_cache_ttl = ttl;

		self
	}

	/// Sets the hello cache TTL.
	pub fn with_hello_cache_ttl(mut self, ttl: Duration) -> Self {
		self.hello_cache_ttl = ttl;

		self
	}

	/// Builds a hello cache honoring `hello_cache_ttl`, for sharing between broker controllers.
	pub fn hello_cache(&self) -> HelloCache {
		HelloCache::new(MSAL_TO_BROKER_PROTOCOL_NAME, self.hello_cache_ttl)
	}

	/// Rejects configurations the dispatcher cannot run with.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.silent_workers == 0 {
			return Err(ConfigError::ZeroWorkers);
		}
		if self.result_cache_capacity == 0 {
			return Err(ConfigError::ZeroCacheCapacity);
		}

		let durations = [
			("interactive_timeout", self.interactive_timeout.unwrap_or(Duration::MAX)),
			("silent_sync_timeout", self.silent_sync_timeout),
			("result_cache_ttl", self.result_cache_ttl),
			("hello_cache_ttl", self.hello_cache_ttl),
		];

		if let Some((field, _)) = durations.into_iter().find(|(_, d)| !d.is_positive()) {
			return Err(ConfigError::NonPositiveDuration { field });
		}

		Ok(())
	}
}
impl Default for DispatcherConfig {
	fn default() -> Self {
		Self {
			silent_workers: 5,
			interactive_timeout: Some(Duration::minutes(10)),
			silent_sync_timeout: Duration::seconds(30),
			result_cache_capacity: 250,
			result_cache_ttl: Duration::seconds(30),
			hello_cache_ttl: DEFAULT_HELLO_CACHE_TTL,
		}
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::{
		auth::PackageName,
		ipc::{HelloKey, HelloOutcome},
	};

	#[test]
	fn defaults_are_valid() {
		let config = DispatcherConfig::default();

		assert_eq!(config.validate(), Ok(()));
		assert_eq!(config.silent_workers, 5);
		assert_eq!(config.interactive_timeout, Some(Duration::minutes(10)));
	}

	#[test]
	fn validation_names_the_offending_field() {
		assert_eq!(
			DispatcherConfig::default().with_silent_workers(0).validate(),
			Err(ConfigError::ZeroWorkers)
		);
		assert_eq!(
			DispatcherConfig::default().with_result_cache_capacity(0).validate(),
			Err(ConfigError::ZeroCacheCapacity)
		);
		assert_eq!(
			DispatcherConfig::default().with_result_cache_ttl(Duration::ZERO).validate(),
			Err(ConfigError::NonPositiveDuration { field: "result_cache_ttl" })
		);
		assert_eq!(DispatcherConfig::default().with_interactive_timeout(None).validate(), Ok(()));
	}

	#[test]
	fn hello_cache_uses_the_configured_ttl() {
		let cache = DispatcherConfig::default().with_hello_cache_ttl(Duration::minutes(30)).hello_cache();
		let package = PackageName::new("com.example.broker").expect("Package fixture should be valid.");
		let key = HelloKey { min_version: None, max_version: "14.0", package: &package, app_version: "1.0" };
		let stored = macros::datetime!(2025-11-10 12:00 UTC);

		cache.save_at(key, HelloOutcome::Negotiated("14.0".into()), stored);

		assert!(cache.get_at(key, stored + Duration::minutes(29)).is_some());
		assert_eq!(cache.get_at(key, stored + Duration::minutes(30)), None);
	}

	#[test]
	fn partial_json_falls_back_to_defaults() {
		let config: DispatcherConfig = serde_json::from_str(r#"{ "silent_workers": 2 }"#)
			.expect("Partial configuration should deserialize.");

		assert_eq!(config.silent_workers, 2);
		assert_eq!(config.result_cache_capacity, 250);
	}
}
