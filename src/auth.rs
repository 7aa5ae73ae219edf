//! Identifiers, scope sets, secrets, and the account/credential records held by token caches.

pub mod id;
pub mod record;
pub mod scope;
pub mod secret;

pub use id::*;
pub use record::*;
pub use scope::*;
pub use secret::*;
