//! The slice of the Consul KV API the resource client needs.

use std::time::Duration;

use reskit_core::Result;

/// One KV entry as Consul reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    pub key: String,
    pub value: Vec<u8>,
    pub modify_index: u64,
}

/// Blocking-query parameters: return once the index moves past `index` or `wait` elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockingQuery {
    pub index: u64,
    pub wait: Duration,
}

/// Result of a recursive listing together with the `X-Consul-Index` it was served at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KvList {
    pub pairs: Vec<KvPair>,
    pub index: u64,
}

#[async_trait::async_trait]
pub trait ConsulKv: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<KvPair>>;

    /// Check-and-set write. `cas == 0` only succeeds when the key is absent; otherwise the
    /// key's `ModifyIndex` must equal `cas`. Returns whether the write was applied.
    async fn put_cas(&self, key: &str, value: Vec<u8>, cas: u64) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Every pair under `prefix`. With `query` set this is a blocking query.
    async fn list(&self, prefix: &str, query: Option<BlockingQuery>) -> Result<KvList>;
}
