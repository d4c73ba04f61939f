//! reskit Consul backend: each resource is a KV pair at `{root_key}/{namespace}/{name}` holding
//! its JSON form. Consul's `ModifyIndex` is the resource version.

#![forbid(unsafe_code)]

pub mod http;
pub mod kv;

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use reskit_core::client::{
    send_or_cancel, WatchChannels, WATCH_ERROR_CAPACITY, WATCH_LIST_CAPACITY, WRITES_TOTAL,
};
use reskit_core::{
    resolve_namespace, selector_matches, sort_resources, validate_name, DeleteOpts, Error,
    ListOpts, ReadOpts, Resource, ResourceClient, Result, Selector, WatchOpts, WriteOpts,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub use http::{ConsulConfig, ConsulHttpClient, DEFAULT_ADDRESS};
pub use kv::{BlockingQuery, ConsulKv, KvList, KvPair};

/// Pause between a failed blocking query and the next attempt.
pub const WATCH_RETRY_BACKOFF: Duration = Duration::from_millis(500);

pub struct ConsulResourceClient<R: Resource> {
    kv: Arc<dyn ConsulKv>,
    root_key: Arc<str>,
    _kind: PhantomData<fn() -> R>,
}

impl<R: Resource> Clone for ConsulResourceClient<R> {
    fn clone(&self) -> Self {
        Self { kv: Arc::clone(&self.kv), root_key: Arc::clone(&self.root_key), _kind: PhantomData }
    }
}

impl<R: Resource> ConsulResourceClient<R> {
    pub fn new(kv: Arc<dyn ConsulKv>, root_key: &str) -> Self {
        let root_key: Arc<str> = Arc::from(root_key.trim_matches('/'));
        Self { kv, root_key, _kind: PhantomData }
    }

    fn prefix(&self, namespace: &str) -> String {
        format!("{}/{}/", self.root_key, namespace)
    }

    fn key(&self, namespace: &str, name: &str) -> String {
        format!("{}{}", self.prefix(namespace), name)
    }

    fn decode(pair: &KvPair) -> Result<R> {
        let mut resource: R = serde_json::from_slice(&pair.value)
            .map_err(|e| Error::codec(format!("decoding {}", pair.key), e))?;
        resource.metadata_mut().resource_version = pair.modify_index.to_string();
        Ok(resource)
    }

    fn encode(resource: &R) -> Result<Vec<u8>> {
        let mut stored = resource.clone();
        stored.metadata_mut().resource_version.clear();
        serde_json::to_vec(&stored)
            .map_err(|e| Error::codec(format!("encoding {}", resource.metadata().reference()), e))
    }

    /// Direct children of `prefix`, decoded, filtered and sorted.
    fn decode_list(prefix: &str, pairs: &[KvPair], selector: &Selector) -> Result<Vec<R>> {
        let mut out = Vec::new();
        for pair in pairs {
            let Some(rest) = pair.key.strip_prefix(prefix) else { continue };
            if rest.is_empty() || rest.contains('/') {
                continue;
            }
            let resource = Self::decode(pair)?;
            if selector_matches(selector, &resource.metadata().labels) {
                out.push(resource);
            }
        }
        sort_resources(&mut out);
        Ok(out)
    }
}

#[async_trait::async_trait]
impl<R: Resource> ResourceClient<R> for ConsulResourceClient<R> {
    async fn register(&self) -> Result<()> {
        Ok(())
    }

    async fn read(&self, namespace: &str, name: &str, _opts: ReadOpts) -> Result<R> {
        validate_name(name)?;
        let namespace = resolve_namespace(namespace)?;
        match self.kv.get(&self.key(&namespace, name)).await? {
            Some(pair) => Self::decode(&pair),
            None => Err(Error::not_exist(&namespace, name)),
        }
    }

    async fn write(&self, mut resource: R, opts: WriteOpts) -> Result<R> {
        validate_name(&resource.metadata().name)?;
        let namespace = resolve_namespace(&resource.metadata().namespace)?;
        resource.metadata_mut().namespace = namespace.clone();
        let name = resource.metadata().name.clone();
        let key = self.key(&namespace, &name);
        let given = resource.metadata().resource_version.clone();

        let cas = match self.kv.get(&key).await? {
            Some(existing) => {
                if !opts.overwrite_existing {
                    return Err(Error::exist(&namespace, &name));
                }
                let expected = existing.modify_index.to_string();
                if given != expected {
                    return Err(Error::resource_version(&namespace, &name, &given, &expected));
                }
                existing.modify_index
            }
            None => 0,
        };

        if !self.kv.put_cas(&key, Self::encode(&resource)?, cas).await? {
            // lost a race between the check and the write
            if cas == 0 {
                return Err(Error::exist(&namespace, &name));
            }
            let current = self.kv.get(&key).await?;
            let expected = current.map(|p| p.modify_index.to_string()).unwrap_or_default();
            return Err(Error::resource_version(&namespace, &name, &given, &expected));
        }
        counter!(WRITES_TOTAL, 1, "backend" => "consul", "kind" => R::KIND);

        let stored = self.read(&namespace, &name, ReadOpts::default()).await?;
        debug!(kind = R::KIND, key = %key, version = %stored.metadata().resource_version, "wrote");
        Ok(stored)
    }

    async fn delete(&self, namespace: &str, name: &str, opts: DeleteOpts) -> Result<()> {
        validate_name(name)?;
        let namespace = resolve_namespace(namespace)?;
        let key = self.key(&namespace, name);
        if self.kv.get(&key).await?.is_none() {
            return if opts.ignore_not_exist {
                Ok(())
            } else {
                Err(Error::not_exist(&namespace, name))
            };
        }
        self.kv.delete(&key).await
    }

    async fn list(&self, namespace: &str, opts: ListOpts) -> Result<Vec<R>> {
        let namespace = resolve_namespace(namespace)?;
        let prefix = self.prefix(&namespace);
        let listed = self.kv.list(&prefix, None).await?;
        Self::decode_list(&prefix, &listed.pairs, &opts.selector)
    }

    async fn watch(&self, namespace: &str, opts: WatchOpts) -> Result<WatchChannels<R>> {
        let namespace = resolve_namespace(namespace)?;
        let opts = opts.with_defaults();
        let prefix = self.prefix(&namespace);
        let kv = Arc::clone(&self.kv);
        let (list_tx, list_rx) = mpsc::channel::<Vec<R>>(WATCH_LIST_CAPACITY);
        let (err_tx, err_rx) = mpsc::channel::<Error>(WATCH_ERROR_CAPACITY);

        tokio::spawn(async move {
            info!(kind = R::KIND, prefix = %prefix, "consul watch started");
            let mut last_index = 0u64;
            let mut emitted = false;
            loop {
                let query = BlockingQuery { index: last_index, wait: opts.refresh_rate };
                let result = tokio::select! {
                    _ = opts.cancel.cancelled() => break,
                    r = kv.list(&prefix, Some(query)) => r,
                };
                counter!("consul_blocking_queries_total", 1);
                let listed = match result {
                    Ok(listed) => listed,
                    Err(e) => {
                        warn!(prefix = %prefix, error = %e, "consul blocking query failed");
                        if !send_or_cancel(&err_tx, e, &opts).await {
                            break;
                        }
                        tokio::select! {
                            _ = opts.cancel.cancelled() => break,
                            _ = tokio::time::sleep(WATCH_RETRY_BACKOFF) => continue,
                        }
                    }
                };
                if listed.index < last_index {
                    // index went backwards (snapshot restore, leader change): start over
                    let (from, to) = (last_index, listed.index);
                    debug!(prefix = %prefix, from, to, "consul index reset");
                    last_index = 0;
                    continue;
                }
                if emitted && listed.index == last_index {
                    continue;
                }
                last_index = listed.index;
                match Self::decode_list(&prefix, &listed.pairs, &opts.selector) {
                    Ok(list) => {
                        if !send_or_cancel(&list_tx, list, &opts).await {
                            break;
                        }
                        emitted = true;
                    }
                    Err(e) => {
                        if !send_or_cancel(&err_tx, e, &opts).await {
                            break;
                        }
                    }
                }
            }
            info!(kind = R::KIND, prefix = %prefix, "consul watch stopped");
        });
        Ok((list_rx, err_rx))
    }
}
