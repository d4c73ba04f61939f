//! Minimal Vault logical API used by the resource client (KV version 1 semantics).

use std::collections::BTreeMap;

use reskit_core::Result;

/// Fields of one secret.
pub type SecretData = BTreeMap<String, String>;

#[async_trait::async_trait]
pub trait VaultKv: Send + Sync {
    /// `None` when nothing is stored at `path`.
    async fn read(&self, path: &str) -> Result<Option<SecretData>>;

    /// Replace the secret at `path`.
    async fn write(&self, path: &str, data: SecretData) -> Result<()>;

    async fn delete(&self, path: &str) -> Result<()>;

    /// Child keys directly under `path`; sub-folders end with `/`. Empty when absent.
    async fn list_keys(&self, path: &str) -> Result<Vec<String>>;
}
