//! Error taxonomy shared by controllers, the broker executor, and the dispatcher.
//!
//! Every failure that reaches a command callback is one of the [`Error`] variants. Transport-level
//! IPC failures are modeled separately by [`BrokerCommunicationError`]; they are retried across
//! strategies and only ever surface as suppressed diagnostics on a [`ClientError`].

// self
use crate::{_prelude::*, ipc::IpcStrategyKind};

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Shared, cloneable error cause.
pub type SharedError = Arc<dyn StdError + Send + Sync>;

/// Stable error codes reported through [`Error::code`].
pub mod codes {
	/// Catch-all for failures with no better classification.
	pub const UNKNOWN_ERROR: &str = "unknown_error";
	/// Local I/O failure.
	pub const IO_ERROR: &str = "io_error";
	/// A blocking wait exceeded its deadline.
	pub const TIMED_OUT: &str = "timed_out";
	/// A worker panicked or a wait was torn down before a value arrived.
	pub const INTERRUPTED_OPERATION: &str = "interrupted_operation";
	/// Every IPC strategy failed to reach the broker.
	pub const BROKER_BIND_SERVICE_FAILED: &str = "broker_bind_service_failed";
	/// A broker result bundle could not be parsed.
	pub const INVALID_BROKER_BUNDLE: &str = "invalid_broker_bundle";
	/// Broker and client share no protocol version.
	pub const UNSUPPORTED_BROKER_VERSION: &str = "unsupported_broker_version";
	/// The target account is not present in the cache.
	pub const NO_ACCOUNT_FOUND: &str = "no_account_found";
	/// The target account has no usable tokens.
	pub const NO_TOKENS_FOUND: &str = "no_tokens_found";
	/// OAuth `invalid_grant`.
	pub const INVALID_GRANT: &str = "invalid_grant";
	/// OAuth `interaction_required`.
	pub const INTERACTION_REQUIRED: &str = "interaction_required";
	/// The user aborted the flow.
	pub const USER_CANCELLED: &str = "user_cancelled";
	/// The SDK aborted the flow (for example, a newer interactive request replaced it).
	pub const AUTHORIZATION_CANCELLED_BY_SDK: &str = "auth_cancelled_by_sdk";
	/// Conditional access requires device registration.
	pub const DEVICE_REGISTRATION_NEEDED: &str = "device_registration_needed";
	/// Authorization failed without an error payload.
	pub const AUTHORIZATION_RESULT_NULL_ERROR_RESPONSE: &str =
		"authorization_result_null_error_response";
	/// The device has no network connectivity.
	pub const DEVICE_NETWORK_NOT_AVAILABLE: &str = "device_network_not_available";
	/// The lane that should run the command is stopped.
	pub const EXECUTOR_SHUTDOWN: &str = "executor_shutdown";
	/// The controller does not implement the requested operation.
	pub const UNSUPPORTED_OPERATION: &str = "unsupported_operation";
	/// An interactive operation ran without an interactive session.
	pub const MISSING_INTERACTIVE_SESSION: &str = "missing_interactive_session";
	/// The token cache backend failed.
	pub const STORAGE_ERROR: &str = "storage_error";
	/// The token endpoint reported a lifetime that is not positive or overflows the clock.
	pub const INVALID_TOKEN_LIFETIME: &str = "invalid_token_lifetime";
}

const NON_CACHEABLE_CODES: [&str; 4] = [
	codes::DEVICE_NETWORK_NOT_AVAILABLE,
	codes::INTERRUPTED_OPERATION,
	codes::INVALID_BROKER_BUNDLE,
	codes::IO_ERROR,
];

/// Coarse classification of an [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
	/// Local or SDK-side failure.
	Client,
	/// Authorization server rejected the request.
	Service,
	/// Silent renewal is impossible; retry interactively.
	UiRequired,
	/// User aborted the flow.
	UserCancel,
	/// Conditional access requires device registration.
	DeviceRegistrationRequired,
}
impl ErrorKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			ErrorKind::Client => "client",
			ErrorKind::Service => "service",
			ErrorKind::UiRequired => "ui_required",
			ErrorKind::UserCancel => "user_cancel",
			ErrorKind::DeviceRegistrationRequired => "device_registration_required",
		}
	}
}
impl Display for ErrorKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Server-side diagnostics propagated onto errors.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerTelemetry {
	/// SPE ring the request was served from.
	pub spe_ring: Option<String>,
	/// Age of the refresh token used for the request.
	pub refresh_token_age: Option<String>,
	/// Server-reported error code.
	pub server_error_code: Option<String>,
	/// Server-reported sub-error code.
	pub server_sub_error_code: Option<String>,
}
impl ServerTelemetry {
	/// Returns true when no field is populated.
	pub fn is_empty(&self) -> bool {
		self.spe_ring.is_none()
			&& self.refresh_token_age.is_none()
			&& self.server_error_code.is_none()
			&& self.server_sub_error_code.is_none()
	}
}

/// Canonical error delivered to command callbacks.
#[derive(Clone, Debug, ThisError)]
pub enum Error {
	/// Local or SDK-side failure.
	#[error(transparent)]
	Client(#[from] ClientError),
	/// Authorization server rejected the request.
	#[error(transparent)]
	Service(#[from] ServiceError),
	/// Silent renewal is impossible; the caller must retry interactively.
	#[error("Interaction required: {0}")]
	UiRequired(ServiceError),
	/// The user aborted the flow.
	#[error("User cancelled the flow: {message}.")]
	UserCancel {
		/// Human-readable cancellation detail.
		message: String,
	},
	/// Conditional access requires the device to be registered.
	#[error("Device registration required: {service}")]
	DeviceRegistrationRequired {
		/// Server error that triggered the redirect.
		service: ServiceError,
		/// Account that must be registered, when known.
		username: Option<String>,
	},
}
impl Error {
	/// Builds a [`ClientError`]-backed error.
	pub fn client(code: impl Into<String>, message: impl Into<String>) -> Self {
		Self::Client(ClientError::new(code, message))
	}

	/// Builds a user-cancel error.
	pub fn user_cancel(message: impl Into<String>) -> Self {
		Self::UserCancel { message: message.into() }
	}

	/// Returns the variant's coarse classification.
	pub fn kind(&self) -> ErrorKind {
		match self {
			Self::Client(_) => ErrorKind::Client,
			Self::Service(_) => ErrorKind::Service,
			Self::UiRequired(_) => ErrorKind::UiRequired,
			Self::UserCancel { .. } => ErrorKind::UserCancel,
			Self::DeviceRegistrationRequired { .. } => ErrorKind::DeviceRegistrationRequired,
		}
	}

	/// Returns the stable error code.
	pub fn code(&self) -> &str {
		match self {
			Self::Client(e) => &e.code,
			Self::Service(e) | Self::UiRequired(e) => &e.code,
			Self::UserCancel { .. } => codes::USER_CANCELLED,
			Self::DeviceRegistrationRequired { service, .. } => &service.code,
		}
	}

	/// Returns the human-readable message.
	pub fn message(&self) -> &str {
		match self {
			Self::Client(e) => &e.message,
			Self::Service(e) | Self::UiRequired(e) => &e.message,
			Self::UserCancel { message } => message,
			Self::DeviceRegistrationRequired { service, .. } => &service.message,
		}
	}

	/// Returns the OAuth sub-error code for service-side variants.
	pub fn sub_error(&self) -> Option<&str> {
		match self {
			Self::Service(e) | Self::UiRequired(e) => e.sub_error.as_deref(),
			Self::DeviceRegistrationRequired { service, .. } => service.sub_error.as_deref(),
			Self::Client(_) | Self::UserCancel { .. } => None,
		}
	}

	/// Returns server diagnostics attached to the error, if any.
	pub fn telemetry(&self) -> Option<&ServerTelemetry> {
		match self {
			Self::Client(e) => Some(&e.telemetry),
			Self::Service(e) | Self::UiRequired(e) => Some(&e.telemetry),
			Self::DeviceRegistrationRequired { service, .. } => Some(&service.telemetry),
			Self::UserCancel { .. } => None,
		}
	}

	/// Attaches server diagnostics, replacing populated fields only.
	pub fn with_telemetry(mut self, telemetry: &ServerTelemetry) -> Self {
		let target = match &mut self {
			Self::Client(e) => &mut e.telemetry,
			Self::Service(e) | Self::UiRequired(e) => &mut e.telemetry,
			Self::DeviceRegistrationRequired { service, .. } => &mut service.telemetry,
			Self::UserCancel { .. } => return self,
		};

		merge_telemetry(target, telemetry);

		self
	}

	/// Returns true for the user-cancel variant.
	pub fn is_user_cancel(&self) -> bool {
		matches!(self, Self::UserCancel { .. })
	}

	/// Returns false for transient local failures that must never be served from a cache.
	pub fn is_cacheable(&self) -> bool {
		!NON_CACHEABLE_CODES.contains(&self.code())
	}
}

/// Local or SDK-side failure.
#[derive(Clone, Debug, ThisError)]
#[error("{code}: {message}")]
pub struct ClientError {
	/// Stable error code (see [`codes`]).
	pub code: String,
	/// Human-readable detail.
	pub message: String,
	/// Underlying cause, when one exists.
	#[source]
	pub source: Option<SharedError>,
	/// Per-strategy IPC failures swallowed before this error was raised.
	pub suppressed: Vec<BrokerCommunicationError>,
	/// Server diagnostics, when the failure followed a server round-trip.
	pub telemetry: ServerTelemetry,
}
impl ClientError {
	/// Creates a new client error without a cause.
	pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			code: code.into(),
			message: message.into(),
			source: None,
			suppressed: Vec::new(),
			telemetry: ServerTelemetry::default(),
		}
	}

	/// Attaches the underlying cause.
	pub fn with_source(mut self, source: impl 'static + StdError + Send + Sync) -> Self {
		self.source = Some(Arc::new(source));

		self
	}

	/// Attaches an already shared cause.
	pub fn with_shared_source(mut self, source: SharedError) -> Self {
		self.source = Some(source);

		self
	}

	/// Attaches suppressed per-strategy IPC failures.
	pub fn with_suppressed(mut self, suppressed: Vec<BrokerCommunicationError>) -> Self {
		self.suppressed = suppressed;

		self
	}
}

/// Authorization server rejection.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("{code}: {message}")]
pub struct ServiceError {
	/// OAuth error code returned by the server.
	pub code: String,
	/// Server-supplied description.
	pub message: String,
	/// HTTP status of the failed response.
	pub http_status: Option<u16>,
	/// OAuth sub-error code.
	pub sub_error: Option<String>,
	/// Server diagnostics.
	pub telemetry: ServerTelemetry,
}
impl ServiceError {
	/// Creates a new service error.
	pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			code: code.into(),
			message: message.into(),
			http_status: None,
			sub_error: None,
			telemetry: ServerTelemetry::default(),
		}
	}

	/// Sets the HTTP status.
	pub fn with_http_status(mut self, status: u16) -> Self {
		self.http_status = Some(status);

		self
	}

	/// Sets the OAuth sub-error code.
	pub fn with_sub_error(mut self, sub_error: impl Into<String>) -> Self {
		self.sub_error = Some(sub_error.into());

		self
	}
}

/// Category of a broker transport failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommunicationFailure {
	/// The transport could not connect or the call broke mid-flight.
	ConnectionError,
	/// The client side of the transport does not support the call.
	OperationNotSupportedOnClientSide,
	/// The broker side of the transport does not support the call.
	OperationNotSupportedOnServerSide,
}
impl CommunicationFailure {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			CommunicationFailure::ConnectionError => "connection_error",
			CommunicationFailure::OperationNotSupportedOnClientSide =>
				"operation_not_supported_on_client_side",
			CommunicationFailure::OperationNotSupportedOnServerSide =>
				"operation_not_supported_on_server_side",
		}
	}
}
impl Display for CommunicationFailure {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Transport-level IPC failure; always recoverable by trying the next strategy.
#[derive(Clone, Debug, ThisError)]
#[error("{strategy} could not reach the broker ({category}): {message}")]
pub struct BrokerCommunicationError {
	/// Failure category.
	pub category: CommunicationFailure,
	/// Strategy that produced the failure.
	pub strategy: IpcStrategyKind,
	/// Human-readable detail.
	pub message: String,
	/// Underlying transport cause.
	#[source]
	pub source: Option<SharedError>,
}
impl BrokerCommunicationError {
	/// Creates a new communication error.
	pub fn new(
		category: CommunicationFailure,
		strategy: IpcStrategyKind,
		message: impl Into<String>,
	) -> Self {
		Self { category, strategy, message: message.into(), source: None }
	}

	/// Shorthand for [`CommunicationFailure::ConnectionError`].
	pub fn connection(strategy: IpcStrategyKind, message: impl Into<String>) -> Self {
		Self::new(CommunicationFailure::ConnectionError, strategy, message)
	}

	/// Attaches the underlying transport cause.
	pub fn with_source(mut self, source: impl 'static + StdError + Send + Sync) -> Self {
		self.source = Some(Arc::new(source));

		self
	}
}

/// Validation failures raised by [`DispatcherConfig`](crate::config::DispatcherConfig).
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum ConfigError {
	/// The silent lane needs at least one worker.
	#[error("Silent lane requires at least one worker.")]
	ZeroWorkers,
	/// The result cache needs room for at least one entry.
	#[error("Result cache capacity must be at least one.")]
	ZeroCacheCapacity,
	/// A duration setting is zero or negative.
	#[error("The {field} duration must be positive.")]
	NonPositiveDuration {
		/// Offending configuration field.
		field: &'static str,
	},
}

fn merge_telemetry(target: &mut ServerTelemetry, source: &ServerTelemetry) {
	if source.spe_ring.is_some() {
		target.spe_ring = source.spe_ring.clone();
	}
	if source.refresh_token_age.is_some() {
		target.refresh_token_age = source.refresh_token_age.clone();
	}
	if source.server_error_code.is_some() {
		target.server_error_code = source.server_error_code.clone();
	}
	if source.server_sub_error_code.is_some() {
		target.server_sub_error_code = source.server_sub_error_code.clone();
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn codes_and_kinds_follow_variants() {
		let client = Error::client(codes::NO_ACCOUNT_FOUND, "No account in cache.");
		let ui = Error::UiRequired(ServiceError::new(codes::INVALID_GRANT, "Token expired."));
		let cancel = Error::user_cancel("Closed the browser");

		assert_eq!(client.kind(), ErrorKind::Client);
		assert_eq!(client.code(), codes::NO_ACCOUNT_FOUND);
		assert_eq!(ui.kind(), ErrorKind::UiRequired);
		assert_eq!(ui.code(), codes::INVALID_GRANT);
		assert_eq!(cancel.code(), codes::USER_CANCELLED);
		assert!(cancel.is_user_cancel());
		assert!(!client.is_user_cancel());
	}

	#[test]
	fn transient_local_failures_are_not_cacheable() {
		assert!(!Error::client(codes::IO_ERROR, "disk").is_cacheable());
		assert!(!Error::client(codes::INVALID_BROKER_BUNDLE, "bundle").is_cacheable());
		assert!(Error::client(codes::NO_ACCOUNT_FOUND, "none").is_cacheable());
		assert!(Error::Service(ServiceError::new("invalid_client", "bad")).is_cacheable());
	}

	#[test]
	fn telemetry_merge_keeps_existing_fields() {
		let mut service = ServiceError::new("invalid_request", "Bad request.");

		service.telemetry.spe_ring = Some("ring-1".into());

		let error = Error::Service(service).with_telemetry(&ServerTelemetry {
			refresh_token_age: Some("42".into()),
			..Default::default()
		});
		let telemetry = error.telemetry().expect("Service errors should carry telemetry.");

		assert_eq!(telemetry.spe_ring.as_deref(), Some("ring-1"));
		assert_eq!(telemetry.refresh_token_age.as_deref(), Some("42"));
	}

	#[test]
	fn client_error_exposes_source_and_suppressed() {
		let io = std::io::Error::other("pipe closed");
		let suppressed = vec![BrokerCommunicationError::connection(
			IpcStrategyKind::BoundService,
			"Service unavailable.",
		)];
		let error: Error = ClientError::new(codes::BROKER_BIND_SERVICE_FAILED, "Bind failed.")
			.with_source(io)
			.with_suppressed(suppressed)
			.into();
		let source = StdError::source(&error).expect("Client error should expose its cause.");

		assert_eq!(source.to_string(), "pipe closed");

		let Error::Client(client) = error else {
			panic!("Expected a client error.");
		};

		assert_eq!(client.suppressed.len(), 1);
		assert_eq!(client.suppressed[0].strategy, IpcStrategyKind::BoundService);
	}
}
