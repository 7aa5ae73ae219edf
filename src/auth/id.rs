//! Validated identifiers used in cache keys, command identity, and broker addressing.

// std
use std::{borrow::Borrow, ops::Deref};
// self
use crate::_prelude::*;

macro_rules! def_id {
	($name:ident, $doc:literal, $kind:literal, $max:expr) => {
		#[doc = $doc]
		#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);
		impl $name {
			/// Creates a new identifier after validation.
			pub fn new(value: impl AsRef<str>) -> Result<Self, IdentifierError> {
				let view = value.as_ref();

				validate_view($kind, view, $max)?;

				Ok(Self(view.to_owned()))
			}
		}
		impl Deref for $name {
			type Target = str;

			fn deref(&self) -> &Self::Target {
				&self.0
			}
		}
		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
		impl From<$name> for String {
			fn from(value: $name) -> Self {
				value.0
			}
		}
		impl TryFrom<String> for $name {
			type Error = IdentifierError;

			fn try_from(value: String) -> Result<Self, Self::Error> {
				validate_view($kind, &value, $max)?;

				Ok(Self(value))
			}
		}
		impl Borrow<str> for $name {
			fn borrow(&self) -> &str {
				&self.0
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				write!(f, concat!($kind, "({})"), self.0)
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
		impl FromStr for $name {
			type Err = IdentifierError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Self::new(s)
			}
		}
	};
}

const ACCOUNT_ID_MAX_LEN: usize = 256;
const CLIENT_ID_MAX_LEN: usize = 128;
const PACKAGE_NAME_MAX_LEN: usize = 255;

/// Error returned when identifier validation fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum IdentifierError {
	/// The identifier was empty.
	#[error("{kind} identifier cannot be empty.")]
	Empty {
		/// Kind of identifier (client, account, package).
		kind: &'static str,
	},
	/// The identifier contains whitespace characters.
	#[error("{kind} identifier contains whitespace.")]
	ContainsWhitespace {
		/// Kind of identifier (client, account, package).
		kind: &'static str,
	},
	/// The identifier exceeded the allowed byte count.
	#[error("{kind} identifier exceeds {max} characters.")]
	TooLong {
		/// Kind of identifier (client, account, package).
		kind: &'static str,
		/// Maximum permitted length.
		max: usize,
	},
}

def_id! { ClientId, "Application (client) identifier registered with the authority.", "Client", CLIENT_ID_MAX_LEN }
def_id! { HomeAccountId, "Home account identifier (`<uid>.<utid>`) shared across tenants.", "HomeAccount", ACCOUNT_ID_MAX_LEN }
def_id! { LocalAccountId, "Tenant-local account object identifier.", "LocalAccount", ACCOUNT_ID_MAX_LEN }
def_id! { PackageName, "Application package name used to address a broker.", "Package", PACKAGE_NAME_MAX_LEN }

fn validate_view(kind: &'static str, view: &str, max: usize) -> Result<(), IdentifierError> {
	if view.is_empty() {
		return Err(IdentifierError::Empty { kind });
	}
	if view.chars().any(char::is_whitespace) {
		return Err(IdentifierError::ContainsWhitespace { kind });
	}
	if view.len() > max {
		return Err(IdentifierError::TooLong { kind, max });
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn identifiers_reject_padding_and_empty_values() {
		assert!(ClientId::new(" client").is_err(), "Leading whitespace must be rejected.");
		assert!(HomeAccountId::new("uid.utid ").is_err(), "Trailing whitespace must be rejected.");
		assert!(PackageName::new("").is_err());

		let client = ClientId::new("4b0db8c2-9f26-4417-8bde-3f0e3656f8e0")
			.expect("Client fixture should be considered valid.");

		assert_eq!(client.as_ref(), "4b0db8c2-9f26-4417-8bde-3f0e3656f8e0");
	}

	#[test]
	fn serde_enforces_validation() {
		let account: HomeAccountId = serde_json::from_str("\"uid.utid\"")
			.expect("Home account id should deserialize successfully.");

		assert_eq!(&*account, "uid.utid");
		assert!(serde_json::from_str::<HomeAccountId>("\"uid utid\"").is_err());
	}

	#[test]
	fn per_kind_length_limits_apply() {
		let package = "p".repeat(PACKAGE_NAME_MAX_LEN);

		PackageName::new(&package).expect("Exact length should succeed.");

		let err = ClientId::new("c".repeat(CLIENT_ID_MAX_LEN + 1))
			.expect_err("Over-long client ids must be rejected.");

		assert_eq!(err, IdentifierError::TooLong { kind: "Client", max: CLIENT_ID_MAX_LEN });
	}

	#[test]
	fn borrow_supports_fast_lookup() {
		let map: HashMap<PackageName, u8> = HashMap::from_iter([(
			PackageName::new("com.example.broker").expect("Package used for lookup should be valid."),
			7_u8,
		)]);

		assert_eq!(map.get("com.example.broker"), Some(&7));
	}
}
