//! Key-value secret store contract.
//!
//! Secrets are flat JSON objects grouped into collections (`keys`, `users`,
//! `whitelist`). Implementations must make each single-entry operation atomic;
//! nothing stronger is assumed by callers.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

pub use memory::MemoryStore;

/// A single secret: field name to JSON value.
pub type Secret = Map<String, Value>;

/// Collection holding signing keys, one secret per key with a `key` field.
pub const KEYS_COLLECTION: &str = "keys";
/// Collection holding user records keyed by lowercase email.
pub const USERS_COLLECTION: &str = "users";
/// Collection holding whitelisted refresh tokens keyed by the raw token.
pub const WHITELIST_COLLECTION: &str = "whitelist";

#[async_trait]
pub trait SecretStore: Send + Sync + std::fmt::Debug {
    /// Read a secret, `None` when absent.
    async fn read_secret(&self, collection: &str, key: &str) -> Result<Option<Secret>>;

    /// Create or overwrite a secret.
    async fn write_secret(&self, collection: &str, key: &str, data: Secret) -> Result<()>;

    /// Delete a secret. Deleting an absent key is not an error.
    async fn delete_secret(&self, collection: &str, key: &str) -> Result<()>;

    /// List the keys of a collection; an empty or unknown collection yields an empty list.
    async fn list_keys(&self, collection: &str) -> Result<Vec<String>>;
}

/// Read a string field from a secret.
#[must_use]
pub fn field<'a>(secret: &'a Secret, name: &str) -> Option<&'a str> {
    secret.get(name).and_then(Value::as_str)
}
