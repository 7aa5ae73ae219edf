//! Token cache contract consumed by the local controller, plus an in-memory implementation.

pub mod memory;

pub use memory::MemoryTokenCache;

// self
use crate::{
	_prelude::*,
	auth::{AccountRecord, CacheRecord, ClientId, CredentialKind, HomeAccountId, LocalAccountId},
	error::{ClientError, codes},
};

/// Storage engine contract. Implementations are synchronous and internally synchronized.
pub trait OAuth2TokenCache
where
	Self: Send + Sync,
{
	/// Loads every record aggregated for the account's home account id.
	fn load_with_aggregated_account_data(
		&self,
		client_id: &ClientId,
		account: &AccountRecord,
	) -> Result<Vec<CacheRecord>, StoreError>;

	/// Saves a record and returns the aggregated records for its account.
	fn save_and_load_aggregated_account_data(
		&self,
		client_id: &ClientId,
		record: CacheRecord,
	) -> Result<Vec<CacheRecord>, StoreError>;

	/// Removes every record for the account; returns whether anything was removed.
	fn remove_account(
		&self,
		client_id: &ClientId,
		home_account_id: &HomeAccountId,
	) -> Result<bool, StoreError>;

	/// Removes one credential family of the account; returns whether one was present.
	fn remove_credential(
		&self,
		client_id: &ClientId,
		home_account_id: &HomeAccountId,
		kind: CredentialKind,
	) -> Result<bool, StoreError>;

	/// Finds an account by home account id.
	fn get_account_by_home_account_id(
		&self,
		client_id: &ClientId,
		home_account_id: &HomeAccountId,
	) -> Result<Option<AccountRecord>, StoreError>;

	/// Finds an account by tenant-local id.
	fn get_account_by_local_account_id(
		&self,
		client_id: &ClientId,
		local_account_id: &LocalAccountId,
	) -> Result<Option<AccountRecord>, StoreError>;

	/// Lists every account known to the client.
	fn get_accounts(&self, client_id: &ClientId) -> Result<Vec<AccountRecord>, StoreError>;
}

/// Error type produced by [`OAuth2TokenCache`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}
impl From<StoreError> for Error {
	fn from(e: StoreError) -> Self {
		let message = e.to_string();

		ClientError::new(codes::STORAGE_ERROR, message).with_source(e).into()
	}
}

/// Key identifying the records of one account for one client.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
	/// Client the records were issued to.
	pub client_id: ClientId,
	/// Home account the records belong to.
	pub home_account_id: HomeAccountId,
}
impl CacheKey {
	/// Builds a key.
	pub fn new(client_id: &ClientId, home_account_id: &HomeAccountId) -> Self {
		Self { client_id: client_id.clone(), home_account_id: home_account_id.clone() }
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::error::ErrorKind;

	#[test]
	fn store_error_converts_into_client_error_with_source() {
		let store_error = StoreError::Backend { message: "keystore locked".into() };
		let error: Error = store_error.clone().into();

		assert_eq!(error.kind(), ErrorKind::Client);
		assert_eq!(error.code(), codes::STORAGE_ERROR);
		assert!(error.message().contains("keystore locked"));

		let source = StdError::source(&error)
			.expect("Client error should expose the original store error as its source.");

		assert_eq!(source.to_string(), store_error.to_string());
	}
}
