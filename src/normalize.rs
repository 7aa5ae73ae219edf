//! Maps failures of any origin into the closed [`Error`] taxonomy.
//!
//! Every function here is pure apart from debug logging, so the same input always produces the
//! same classification regardless of which controller or lane produced it.

// std
use std::{any::Any, io};
// self
use crate::{
	_prelude::*,
	dispatcher::WaitError,
	error::{ClientError, ServerTelemetry, ServiceError, SharedError, codes},
	result::{
		AcquireTokenResult, AuthorizationResult, AuthorizationStatus, TokenErrorResponse,
		TokenResult,
	},
};

/// Codes that always describe a local failure, even when a broker reports them.
const CLIENT_CODES: [&str; 17] = [
	codes::UNKNOWN_ERROR,
	codes::IO_ERROR,
	codes::TIMED_OUT,
	codes::INTERRUPTED_OPERATION,
	codes::BROKER_BIND_SERVICE_FAILED,
	codes::INVALID_BROKER_BUNDLE,
	codes::UNSUPPORTED_BROKER_VERSION,
	codes::NO_ACCOUNT_FOUND,
	codes::NO_TOKENS_FOUND,
	codes::AUTHORIZATION_CANCELLED_BY_SDK,
	codes::AUTHORIZATION_RESULT_NULL_ERROR_RESPONSE,
	codes::DEVICE_NETWORK_NOT_AVAILABLE,
	codes::EXECUTOR_SHUTDOWN,
	codes::UNSUPPORTED_OPERATION,
	codes::MISSING_INTERACTIVE_SESSION,
	codes::STORAGE_ERROR,
	codes::INVALID_TOKEN_LIFETIME,
];
const NO_ERROR_FROM_SERVICE: &str = "Request failed, but no error returned back from service.";

/// Normalizes an arbitrary error.
///
/// Typed errors pass through, I/O failures become `io_error`, wait timeouts become `timed_out`,
/// and everything else becomes `unknown_error` wrapping the cause.
pub fn base_error_from(error: Box<dyn StdError + Send + Sync>) -> Error {
	let error = match error.downcast::<Error>() {
		Ok(error) => return *error,
		Err(error) => error,
	};
	let error = match error.downcast::<ClientError>() {
		Ok(error) => return Error::Client(*error),
		Err(error) => error,
	};
	let error = match error.downcast::<ServiceError>() {
		Ok(error) => return Error::Service(*error),
		Err(error) => error,
	};
	let error = match error.downcast::<io::Error>() {
		Ok(error) => {
			let message = error.to_string();

			return ClientError::new(codes::IO_ERROR, message).with_source(*error).into();
		},
		Err(error) => error,
	};
	let error = match error.downcast::<WaitError>() {
		Ok(error) => return ClientError::new(codes::TIMED_OUT, error.to_string()).with_source(*error).into(),
		Err(error) => error,
	};
	let message = error.to_string();
	let source: SharedError = Arc::from(error);

	tracing::debug!(%message, "Normalizing an untyped failure into unknown_error.");

	ClientError::new(codes::UNKNOWN_ERROR, message).with_shared_source(source).into()
}

/// Converts a worker panic payload into `interrupted_operation`.
pub fn error_from_panic(payload: Box<dyn Any + Send>) -> Error {
	let detail = payload
		.downcast_ref::<&str>()
		.map(|s| (*s).to_owned())
		.or_else(|| payload.downcast_ref::<String>().cloned())
		.unwrap_or_else(|| "non-string panic payload".into());

	Error::client(codes::INTERRUPTED_OPERATION, format!("Command execution panicked: {detail}"))
}

/// Derives the error for a failed [`AcquireTokenResult`].
///
/// The authorization step is inspected first; when it is absent or succeeded, the token step
/// decides.
pub fn error_from_acquire_token_result(result: &AcquireTokenResult) -> Error {
	if let Some(authorization) = result.authorization.as_ref().filter(|a| !a.is_success()) {
		return error_from_authorization_result(authorization);
	}

	error_from_token_result(result.token.as_ref())
}

/// Derives the error for a failed authorization step.
pub fn error_from_authorization_result(result: &AuthorizationResult) -> Error {
	if result.status == AuthorizationStatus::UserCancel {
		return Error::user_cancel("User cancelled the authorization request");
	}

	let Some(response) = result.error.as_ref() else {
		return Error::client(
			codes::AUTHORIZATION_RESULT_NULL_ERROR_RESPONSE,
			"Authorization failed without an error response.",
		);
	};
	let message = response.error_description.clone().unwrap_or_default();

	match result.status {
		AuthorizationStatus::Fail if response.error == codes::DEVICE_REGISTRATION_NEEDED =>
			Error::DeviceRegistrationRequired {
				service: ServiceError::new(&response.error, message),
				username: response.upn_to_register.clone(),
			},
		AuthorizationStatus::Fail => Error::Service(ServiceError::new(&response.error, message)),
		AuthorizationStatus::SdkCancel | AuthorizationStatus::Success =>
			Error::client(&response.error, message),
		AuthorizationStatus::UserCancel => Error::user_cancel(message),
	}
}

/// Derives the error for a failed token step; a missing error body yields `unknown_error`.
pub fn error_from_token_result(result: Option<&TokenResult>) -> Error {
	let telemetry = result.and_then(|r| r.telemetry.as_ref());
	let error = match result.and_then(|r| r.error.as_ref()) {
		Some(response) => error_from_token_error_response(response),
		None => Error::Service(ServiceError::new(codes::UNKNOWN_ERROR, NO_ERROR_FROM_SERVICE)),
	};

	match telemetry {
		Some(telemetry) => error.with_telemetry(telemetry),
		None => error,
	}
}

/// Maps a token endpoint error payload.
///
/// `invalid_grant` and `interaction_required` become [`Error::UiRequired`]; every other code
/// becomes [`Error::Service`] with the code preserved.
pub fn error_from_token_error_response(response: &TokenErrorResponse) -> Error {
	let mut service = ServiceError::new(
		&response.error,
		response.error_description.clone().unwrap_or_default(),
	);

	service.http_status = response.status_code;
	service.sub_error = response.sub_error.clone();
	service.telemetry = ServerTelemetry {
		server_error_code: Some(response.error.clone()),
		server_sub_error_code: response.sub_error.clone(),
		..Default::default()
	};

	if is_ui_required_code(&response.error) {
		Error::UiRequired(service)
	} else {
		Error::Service(service)
	}
}

/// Maps a bare error code (as reported by a broker) onto the taxonomy.
pub fn error_from_code(
	code: &str,
	message: impl Into<String>,
	sub_error: Option<String>,
	username: Option<String>,
) -> Error {
	let message = message.into();

	if code == codes::USER_CANCELLED {
		return Error::user_cancel(message);
	}
	if CLIENT_CODES.contains(&code) {
		return Error::client(code, message);
	}

	let mut service = ServiceError::new(code, message);

	service.sub_error = sub_error;

	if code == codes::DEVICE_REGISTRATION_NEEDED {
		Error::DeviceRegistrationRequired { service, username }
	} else if is_ui_required_code(code) {
		Error::UiRequired(service)
	} else {
		Error::Service(service)
	}
}

fn is_ui_required_code(code: &str) -> bool {
	code == codes::INVALID_GRANT || code == codes::INTERACTION_REQUIRED
}
