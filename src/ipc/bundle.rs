//! Key/value payloads exchanged with the broker.

// crates.io
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
// self
use crate::{
	_prelude::*,
	error::{ClientError, codes},
};

/// JSON object payload carried across the IPC boundary.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bundle(Map<String, Value>);
impl Bundle {
	/// Creates an empty bundle.
	pub fn new() -> Self {
		Self::default()
	}

	/// Serializes a typed payload; it must serialize into a JSON object.
	pub fn from_payload<T>(payload: &T) -> Result<Self, ClientError>
	where
		T: Serialize,
	{
		match serde_json::to_value(payload) {
			Ok(Value::Object(map)) => Ok(Self(map)),
			Ok(other) => Err(ClientError::new(
				codes::INVALID_BROKER_BUNDLE,
				format!("Broker payload must be an object, found {other}."),
			)),
			Err(e) => Err(ClientError::new(
				codes::INVALID_BROKER_BUNDLE,
				"Broker payload could not be serialized.",
			)
			.with_source(e)),
		}
	}

	/// Adds or replaces a key.
	pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
		self.insert(key, value);

		self
	}

	/// Adds or replaces a key in place.
	pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
		self.0.insert(key.into(), value.into());
	}

	/// Returns the string stored under `key`.
	pub fn get_str(&self, key: &str) -> Option<&str> {
		self.0.get(key).and_then(Value::as_str)
	}

	/// Returns true when `key` is present.
	pub fn contains_key(&self, key: &str) -> bool {
		self.0.contains_key(key)
	}

	/// Returns true when the bundle holds no keys.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Parses the bundle into a typed response.
	///
	/// Failures become `invalid_broker_bundle` naming the offending path.
	pub fn extract<T>(&self) -> Result<T, ClientError>
	where
		T: DeserializeOwned,
	{
		serde_path_to_error::deserialize(Value::Object(self.0.clone())).map_err(|e| {
			let path = e.path().to_string();

			ClientError::new(
				codes::INVALID_BROKER_BUNDLE,
				format!("Broker result bundle is invalid at `{path}`."),
			)
			.with_source(e.into_inner())
		})
	}
}
impl From<Map<String, Value>> for Bundle {
	fn from(map: Map<String, Value>) -> Self {
		Self(map)
	}
}
