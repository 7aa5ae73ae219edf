//! Broker IPC contracts and the multi-strategy broker operation executor.
//!
//! A broker is reached through one of several transports ([`IpcStrategy`]). The
//! [`BrokerOperationExecutor`] tries them in priority order and separates "could not connect"
//! (try the next transport) from "connected but the broker said no" (stop).

pub mod active_broker;
pub mod bundle;
pub mod executor;
pub mod hello;

pub use active_broker::*;
pub use bundle::*;
pub use executor::*;
pub use hello::*;

// self
use crate::{_prelude::*, auth::PackageName, error::BrokerCommunicationError};

/// Transport used to reach the broker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IpcStrategyKind {
	/// Content-provider query.
	ContentProvider,
	/// Bound service call.
	BoundService,
	/// Account manager call.
	AccountManager,
}
impl IpcStrategyKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			IpcStrategyKind::ContentProvider => "content_provider",
			IpcStrategyKind::BoundService => "bound_service",
			IpcStrategyKind::AccountManager => "account_manager",
		}
	}
}
impl Display for IpcStrategyKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Broker entry points.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BrokerApi {
	/// Protocol version negotiation.
	Hello,
	/// Fetch the payload that launches the broker's interactive UI.
	GetIntentForInteractiveRequest,
	/// Silent token acquisition.
	AcquireTokenSilent,
	/// List broker accounts visible to the caller.
	GetAccounts,
	/// Remove an account.
	RemoveAccount,
	/// Query shared-device mode.
	GetDeviceMode,
	/// Current account of a shared device.
	GetCurrentAccountInSharedDevice,
	/// Sign out from a shared device.
	SignOutFromSharedDevice,
}
impl BrokerApi {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			BrokerApi::Hello => "hello",
			BrokerApi::GetIntentForInteractiveRequest => "get_intent_for_interactive_request",
			BrokerApi::AcquireTokenSilent => "acquire_token_silent",
			BrokerApi::GetAccounts => "get_accounts",
			BrokerApi::RemoveAccount => "remove_account",
			BrokerApi::GetDeviceMode => "get_device_mode",
			BrokerApi::GetCurrentAccountInSharedDevice => "get_current_account_in_shared_device",
			BrokerApi::SignOutFromSharedDevice => "sign_out_from_shared_device",
		}
	}
}
impl Display for BrokerApi {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Request handed to an [`IpcStrategy`].
#[derive(Clone, Debug, PartialEq)]
pub struct OperationBundle {
	/// Broker entry point.
	pub api: BrokerApi,
	/// Broker package the request is addressed to.
	pub target_package: PackageName,
	/// Request payload.
	pub payload: Bundle,
}
impl OperationBundle {
	/// Creates a new request.
	pub fn new(api: BrokerApi, target_package: PackageName, payload: Bundle) -> Self {
		Self { api, target_package, payload }
	}
}

/// One transport to the broker.
pub trait IpcStrategy
where
	Self: Send + Sync,
{
	/// Transport kind.
	fn kind(&self) -> IpcStrategyKind;

	/// Synchronously sends the request and returns the raw result bundle.
	fn communicate_to_broker(
		&self,
		bundle: &OperationBundle,
	) -> Result<Bundle, BrokerCommunicationError>;

	/// Returns false when the target broker cannot be reached through this transport.
	fn is_supported_by_target_package(&self, package: &PackageName) -> bool {
		let _ = package;

		true
	}
}

/// Keeps the strategies that can reach `package`, preserving priority order.
pub fn supported_strategies(
	candidates: &[Arc<dyn IpcStrategy>],
	package: &PackageName,
) -> Vec<Arc<dyn IpcStrategy>> {
	candidates
		.iter()
		.filter(|strategy| strategy.is_supported_by_target_package(package))
		.cloned()
		.collect()
}
