//! Controller capability contract and the pure fallback decision.
//!
//! A [`Command`](crate::command::Command) tries its controllers in order. Each attempt is
//! classified by [`classify_attempt`] into a [`ControllerOutcome`]; only `invalid_grant` and
//! missing account/token failures on a non-final controller move on to the next one.

pub mod broker;
pub mod local;

pub use broker::*;
pub use local::*;

// self
use crate::{
	_prelude::*,
	auth::AccountRecord,
	dispatcher::InteractiveSession,
	error::codes,
	normalize,
	params::OperationParameters,
	result::AcquireTokenResult,
};

/// Token acquisition capability backed by one execution strategy.
pub trait Controller
where
	Self: Send + Sync,
{
	/// Short label used in logs.
	fn name(&self) -> &'static str;

	/// Runs an interactive flow, blocking on `session` for the UI outcome.
	fn acquire_token_interactive(
		&self,
		params: &OperationParameters,
		session: &InteractiveSession,
	) -> Result<AcquireTokenResult>;

	/// Acquires a token without user interaction.
	fn acquire_token_silent(&self, params: &OperationParameters) -> Result<AcquireTokenResult>;

	/// Lists the accounts known for the client.
	fn get_accounts(&self, params: &OperationParameters) -> Result<Vec<AccountRecord>>;

	/// Removes the account targeted by `params`.
	fn remove_account(&self, params: &OperationParameters) -> Result<bool>;

	/// Reports whether the device runs in shared-device mode.
	fn get_device_mode(&self, params: &OperationParameters) -> Result<bool> {
		let _ = params;

		Err(unsupported(self.name(), "get_device_mode"))
	}

	/// Returns the signed-in account(s) of a single-account or shared device.
	fn get_current_account(&self, params: &OperationParameters) -> Result<Vec<AccountRecord>> {
		let _ = params;

		Err(unsupported(self.name(), "get_current_account"))
	}

	/// Signs the current account out.
	fn remove_current_account(&self, params: &OperationParameters) -> Result<bool> {
		let _ = params;

		Err(unsupported(self.name(), "remove_current_account"))
	}
}

/// Failure classes that let a command continue with its next controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RetryableKind {
	/// The refresh token was rejected.
	InvalidGrant,
	/// The account is unknown to this controller.
	NoAccountFound,
	/// The account has no usable tokens.
	NoTokensFound,
}
impl RetryableKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			RetryableKind::InvalidGrant => codes::INVALID_GRANT,
			RetryableKind::NoAccountFound => codes::NO_ACCOUNT_FOUND,
			RetryableKind::NoTokensFound => codes::NO_TOKENS_FOUND,
		}
	}
}

/// Classified result of one controller attempt.
#[derive(Debug)]
pub enum ControllerOutcome<T> {
	/// Stop and hand this value to the dispatcher.
	Success(T),
	/// Try the next controller.
	RetryableFailure(RetryableKind),
	/// Stop and report this error.
	FatalFailure(Error),
}

/// Values a controller may return while still asking for fallback.
pub trait FallbackValue {
	/// Returns the retryable class when the value itself encodes a retryable failure.
	fn retryable_failure(&self) -> Option<RetryableKind>;
}
impl FallbackValue for AcquireTokenResult {
	fn retryable_failure(&self) -> Option<RetryableKind> {
		if self.succeeded() {
			return None;
		}

		retryable_kind(&normalize::error_from_acquire_token_result(self))
	}
}
impl FallbackValue for Vec<AccountRecord> {
	fn retryable_failure(&self) -> Option<RetryableKind> {
		None
	}
}
impl FallbackValue for bool {
	fn retryable_failure(&self) -> Option<RetryableKind> {
		None
	}
}

/// Maps an error onto its retryable class, if any.
pub fn retryable_kind(error: &Error) -> Option<RetryableKind> {
	match error.code() {
		codes::INVALID_GRANT => Some(RetryableKind::InvalidGrant),
		codes::NO_ACCOUNT_FOUND => Some(RetryableKind::NoAccountFound),
		codes::NO_TOKENS_FOUND => Some(RetryableKind::NoTokensFound),
		_ => None,
	}
}

/// Decides whether a controller attempt ends the command or falls through.
///
/// The final controller never falls through; its value or error is returned as-is.
pub fn classify_attempt<T>(attempt: Result<T>, is_last: bool) -> ControllerOutcome<T>
where
	T: FallbackValue,
{
	match attempt {
		Ok(value) => match value.retryable_failure() {
			Some(kind) if !is_last => ControllerOutcome::RetryableFailure(kind),
			_ => ControllerOutcome::Success(value),
		},
		Err(e) => match retryable_kind(&e) {
			Some(kind) if !is_last => ControllerOutcome::RetryableFailure(kind),
			_ => ControllerOutcome::FatalFailure(e),
		},
	}
}

fn unsupported(controller: &str, operation: &str) -> Error {
	Error::client(
		codes::UNSUPPORTED_OPERATION,
		format!("The {controller} controller does not support {operation}."),
	)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		error::ErrorKind,
		result::{TokenErrorResponse, TokenResult},
	};

	#[test]
	fn retryable_errors_fall_through_unless_last() {
		for code in [codes::NO_ACCOUNT_FOUND, codes::NO_TOKENS_FOUND, codes::INVALID_GRANT] {
			assert!(matches!(
				classify_attempt::<bool>(Err(Error::client(code, "")), false),
				ControllerOutcome::RetryableFailure(_)
			));
			assert!(matches!(
				classify_attempt::<bool>(Err(Error::client(code, "")), true),
				ControllerOutcome::FatalFailure(_)
			));
		}
	}

	#[test]
	fn other_errors_are_fatal_everywhere() {
		let outcome = classify_attempt::<bool>(Err(Error::client(codes::IO_ERROR, "disk")), false);

		assert!(matches!(outcome, ControllerOutcome::FatalFailure(ref e) if e.kind() == ErrorKind::Client));
		assert!(matches!(
			classify_attempt::<bool>(Err(Error::user_cancel("closed")), false),
			ControllerOutcome::FatalFailure(_)
		));
	}

	#[test]
	fn failed_token_result_with_invalid_grant_is_retryable() {
		let failed = AcquireTokenResult::from_token(TokenResult::failure(TokenErrorResponse::new(
			codes::INVALID_GRANT,
		)));

		assert!(matches!(
			classify_attempt(Ok(failed.clone()), false),
			ControllerOutcome::RetryableFailure(RetryableKind::InvalidGrant)
		));
		assert!(matches!(classify_attempt(Ok(failed), true), ControllerOutcome::Success(_)));

		let other = AcquireTokenResult::from_token(TokenResult::failure(TokenErrorResponse::new(
			"invalid_client",
		)));

		assert!(matches!(classify_attempt(Ok(other), false), ControllerOutcome::Success(_)));
	}
}
