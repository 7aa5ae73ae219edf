//! Last broker package observed in result bundle metadata.

// self
use crate::{_prelude::*, auth::PackageName, ipc::Bundle};

/// Result bundle key naming the broker that served the call.
pub const ACTIVE_BROKER_PACKAGE_NAME_KEY: &str = "active_broker_package_name";

/// Shared "last known good broker" slot.
#[derive(Clone, Debug, Default)]
pub struct ActiveBrokerCache(Arc<RwLock<Option<PackageName>>>);
impl ActiveBrokerCache {
	/// Returns the cached package.
	pub fn get(&self) -> Option<PackageName> {
		self.0.read().clone()
	}

	/// Replaces the cached package.
	pub fn set(&self, package: PackageName) {
		*self.0.write() = Some(package);
	}

	/// Forgets the cached package.
	pub fn clear(&self) {
		self.0.write().take();
	}

	/// Records the package advertised by `bundle`; returns whether the cache changed.
	pub fn update_from_result_bundle(&self, bundle: &Bundle) -> bool {
		let Some(raw) = bundle.get_str(ACTIVE_BROKER_PACKAGE_NAME_KEY) else {
			return false;
		};
		let package = match PackageName::new(raw) {
			Ok(package) => package,
			Err(e) => {
				tracing::debug!(error = %e, "Ignoring malformed active broker package name.");

				return false;
			},
		};
		let mut slot = self.0.write();

		if slot.as_ref() == Some(&package) {
			return false;
		}

		tracing::info!(package = %package, "Active broker changed.");

		*slot = Some(package);

		true
	}
}
