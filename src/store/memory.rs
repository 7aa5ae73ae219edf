//! Thread-safe in-memory [`OAuth2TokenCache`] for tests and cache-less deployments.

// self
use crate::{
	_prelude::*,
	auth::{AccountRecord, CacheRecord, ClientId, CredentialKind, HomeAccountId, LocalAccountId},
	store::{CacheKey, OAuth2TokenCache, StoreError},
};

type CacheMap = Arc<RwLock<HashMap<CacheKey, CacheRecord>>>;

/// Keeps one [`CacheRecord`] per client and home account in process memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryTokenCache(CacheMap);
impl MemoryTokenCache {
	/// Number of stored records.
	pub fn len(&self) -> usize {
		self.0.read().len()
	}

	/// Returns true when nothing is stored.
	pub fn is_empty(&self) -> bool {
		self.0.read().is_empty()
	}

	fn merge(existing: Option<CacheRecord>, incoming: CacheRecord) -> CacheRecord {
		let Some(existing) = existing else {
			return incoming;
		};

		CacheRecord {
			account: incoming.account,
			access_token: incoming.access_token.or(existing.access_token),
			refresh_token: incoming.refresh_token.or(existing.refresh_token),
			id_token: incoming.id_token.or(existing.id_token),
		}
	}
}
impl OAuth2TokenCache for MemoryTokenCache {
	fn load_with_aggregated_account_data(
		&self,
		client_id: &ClientId,
		account: &AccountRecord,
	) -> Result<Vec<CacheRecord>, StoreError> {
		let key = CacheKey::new(client_id, &account.home_account_id);

		Ok(self.0.read().get(&key).cloned().into_iter().collect())
	}

	fn save_and_load_aggregated_account_data(
		&self,
		client_id: &ClientId,
		record: CacheRecord,
	) -> Result<Vec<CacheRecord>, StoreError> {
		let key = CacheKey::new(client_id, &record.account.home_account_id);
		let mut guard = self.0.write();
		let merged = Self::merge(guard.remove(&key), record);

		guard.insert(key, merged.clone());

		Ok(vec![merged])
	}

	fn remove_account(
		&self,
		client_id: &ClientId,
		home_account_id: &HomeAccountId,
	) -> Result<bool, StoreError> {
		Ok(self.0.write().remove(&CacheKey::new(client_id, home_account_id)).is_some())
	}

	fn remove_credential(
		&self,
		client_id: &ClientId,
		home_account_id: &HomeAccountId,
		kind: CredentialKind,
	) -> Result<bool, StoreError> {
		let key = CacheKey::new(client_id, home_account_id);

		Ok(self.0.write().get_mut(&key).is_some_and(|record| record.take_credential(kind)))
	}

	fn get_account_by_home_account_id(
		&self,
		client_id: &ClientId,
		home_account_id: &HomeAccountId,
	) -> Result<Option<AccountRecord>, StoreError> {
		let key = CacheKey::new(client_id, home_account_id);

		Ok(self.0.read().get(&key).map(|record| record.account.clone()))
	}

	fn get_account_by_local_account_id(
		&self,
		client_id: &ClientId,
		local_account_id: &LocalAccountId,
	) -> Result<Option<AccountRecord>, StoreError> {
		Ok(self
			.0
			.read()
			.iter()
			.filter(|(key, _)| &key.client_id == client_id)
			.map(|(_, record)| &record.account)
			.find(|account| account.local_account_id.as_ref() == Some(local_account_id))
			.cloned())
	}

	fn get_accounts(&self, client_id: &ClientId) -> Result<Vec<AccountRecord>, StoreError> {
		let mut accounts = self
			.0
			.read()
			.iter()
			.filter(|(key, _)| &key.client_id == client_id)
			.map(|(_, record)| record.account.clone())
			.collect::<Vec<_>>();

		accounts.sort_by(|a, b| a.home_account_id.cmp(&b.home_account_id));

		Ok(accounts)
	}
}
