//! reskit memory backend: a process-local store shared by any number of clients, with an
//! epoch channel that wakes watchers on every mutation.

#![forbid(unsafe_code)]

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use metrics::counter;
use parking_lot::RwLock;
use reskit_core::client::{
    send_or_cancel, WatchChannels, WATCH_ERROR_CAPACITY, WATCH_LIST_CAPACITY, WRITES_TOTAL,
};
use reskit_core::{
    next_resource_version, resolve_namespace, selector_matches, sort_resources,
    validate_name, DeleteOpts, Error, ListOpts, ReadOpts, Resource, ResourceClient, Result,
    Selector, WatchOpts, WriteOpts,
};
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

const KEY_SEPARATOR: &str = "~;~";

type Entry = Arc<dyn Any + Send + Sync>;

fn key(namespace: &str, name: &str) -> String {
    format!("{namespace}{KEY_SEPARATOR}{name}")
}

fn namespace_prefix(namespace: &str) -> String {
    format!("{namespace}{KEY_SEPARATOR}")
}

struct Inner {
    // kind -> "{namespace}~;~{name}" -> stored resource
    kinds: RwLock<FxHashMap<&'static str, FxHashMap<String, Entry>>>,
    epoch_tx: watch::Sender<u64>,
}

/// Shared backing store. Cloning is cheap and every clone sees the same data.
#[derive(Clone)]
pub struct InMemoryResourceCache {
    inner: Arc<Inner>,
}

impl Default for InMemoryResourceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryResourceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryResourceCache").field("epoch", &self.epoch()).finish()
    }
}

impl InMemoryResourceCache {
    pub fn new() -> Self {
        let (epoch_tx, _) = watch::channel(0u64);
        Self { inner: Arc::new(Inner { kinds: RwLock::new(FxHashMap::default()), epoch_tx }) }
    }

    /// Number of mutations applied so far, across all kinds.
    pub fn epoch(&self) -> u64 {
        *self.inner.epoch_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.epoch_tx.subscribe()
    }

    /// Number of stored resources of kind `R`, across namespaces.
    pub fn len<R: Resource>(&self) -> usize {
        self.inner.kinds.read().get(R::KIND).map_or(0, |m| m.len())
    }

    pub fn is_empty<R: Resource>(&self) -> bool {
        self.len::<R>() == 0
    }

    fn bump(&self) {
        self.inner.epoch_tx.send_modify(|e| *e = e.wrapping_add(1));
    }

    fn get<R: Resource>(&self, namespace: &str, name: &str) -> Result<Option<R>> {
        let kinds = self.inner.kinds.read();
        match kinds.get(R::KIND).and_then(|m| m.get(&key(namespace, name))) {
            Some(entry) => downcast::<R>(entry).map(Some),
            None => Ok(None),
        }
    }

    fn put<R: Resource>(&self, mut resource: R, overwrite: bool) -> Result<R> {
        let namespace = resource.metadata().namespace.clone();
        let name = resource.metadata().name.clone();
        {
            let mut kinds = self.inner.kinds.write();
            let by_key = kinds.entry(R::KIND).or_default();
            let k = key(&namespace, &name);
            let current = match by_key.get(&k) {
                Some(entry) => Some(downcast::<R>(entry)?.metadata().resource_version.clone()),
                None => None,
            };
            if let Some(expected) = &current {
                if !overwrite {
                    return Err(Error::exist(&namespace, &name));
                }
                let given = &resource.metadata().resource_version;
                if given != expected {
                    return Err(Error::resource_version(&namespace, &name, given, expected));
                }
            }
            resource.metadata_mut().resource_version =
                next_resource_version(current.as_deref().unwrap_or_default());
            by_key.insert(k, Arc::new(resource.clone()));
        }
        self.bump();
        Ok(resource)
    }

    fn remove<R: Resource>(&self, namespace: &str, name: &str) -> bool {
        let removed = {
            let mut kinds = self.inner.kinds.write();
            kinds.get_mut(R::KIND).and_then(|m| m.remove(&key(namespace, name))).is_some()
        };
        if removed {
            self.bump();
        }
        removed
    }

    fn list<R: Resource>(&self, namespace: &str, selector: &Selector) -> Result<Vec<R>> {
        let prefix = namespace_prefix(namespace);
        let mut out = Vec::new();
        {
            let kinds = self.inner.kinds.read();
            if let Some(by_key) = kinds.get(R::KIND) {
                for (k, entry) in by_key.iter() {
                    if !k.starts_with(&prefix) {
                        continue;
                    }
                    let r = downcast::<R>(entry)?;
                    if selector_matches(selector, &r.metadata().labels) {
                        out.push(r);
                    }
                }
            }
        }
        sort_resources(&mut out);
        Ok(out)
    }
}

fn downcast<R: Resource>(entry: &Entry) -> Result<R> {
    entry
        .downcast_ref::<R>()
        .cloned()
        .ok_or_else(|| Error::Internal(format!("stored entry is not a {}", R::KIND)))
}

/// `ResourceClient` over an [`InMemoryResourceCache`]. Versions are decimal counters that
/// start at `"1"`.
pub struct MemoryResourceClient<R: Resource> {
    cache: InMemoryResourceCache,
    _kind: PhantomData<fn() -> R>,
}

impl<R: Resource> MemoryResourceClient<R> {
    pub fn new(cache: InMemoryResourceCache) -> Self {
        Self { cache, _kind: PhantomData }
    }

    pub fn cache(&self) -> &InMemoryResourceCache {
        &self.cache
    }
}

impl<R: Resource> Clone for MemoryResourceClient<R> {
    fn clone(&self) -> Self {
        Self::new(self.cache.clone())
    }
}

#[async_trait::async_trait]
impl<R: Resource> ResourceClient<R> for MemoryResourceClient<R> {
    async fn register(&self) -> Result<()> {
        Ok(())
    }

    async fn read(&self, namespace: &str, name: &str, _opts: ReadOpts) -> Result<R> {
        validate_name(name)?;
        let namespace = resolve_namespace(namespace)?;
        self.cache.get::<R>(&namespace, name)?.ok_or_else(|| Error::not_exist(&namespace, name))
    }

    async fn write(&self, mut resource: R, opts: WriteOpts) -> Result<R> {
        validate_name(&resource.metadata().name)?;
        let namespace = resolve_namespace(&resource.metadata().namespace)?;
        resource.metadata_mut().namespace = namespace;
        let stored = self.cache.put(resource, opts.overwrite_existing)?;
        counter!(WRITES_TOTAL, 1, "backend" => "memory", "kind" => R::KIND);
        debug!(
            kind = R::KIND,
            name = %stored.metadata().reference(),
            version = %stored.metadata().resource_version,
            "stored"
        );
        Ok(stored)
    }

    async fn delete(&self, namespace: &str, name: &str, opts: DeleteOpts) -> Result<()> {
        validate_name(name)?;
        let namespace = resolve_namespace(namespace)?;
        if self.cache.remove::<R>(&namespace, name) || opts.ignore_not_exist {
            Ok(())
        } else {
            Err(Error::not_exist(&namespace, name))
        }
    }

    async fn list(&self, namespace: &str, opts: ListOpts) -> Result<Vec<R>> {
        let namespace = resolve_namespace(namespace)?;
        self.cache.list::<R>(&namespace, &opts.selector)
    }

    async fn watch(&self, namespace: &str, opts: WatchOpts) -> Result<WatchChannels<R>> {
        let namespace = resolve_namespace(namespace)?;
        let (list_tx, list_rx) = mpsc::channel::<Vec<R>>(WATCH_LIST_CAPACITY);
        let (err_tx, err_rx) = mpsc::channel::<Error>(WATCH_ERROR_CAPACITY);
        let cache = self.cache.clone();
        // subscribe before the first list so no mutation falls between them
        let mut epoch_rx = cache.subscribe();
        tokio::spawn(async move {
            info!(kind = R::KIND, namespace = %namespace, "memory watch started");
            let mut last: Option<Vec<R>> = None;
            loop {
                let _ = epoch_rx.borrow_and_update();
                match cache.list::<R>(&namespace, &opts.selector) {
                    Ok(current) if last.as_ref() != Some(&current) => {
                        if !send_or_cancel(&list_tx, current.clone(), &opts).await {
                            break;
                        }
                        last = Some(current);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if !send_or_cancel(&err_tx, e, &opts).await {
                            break;
                        }
                    }
                }
                tokio::select! {
                    _ = opts.cancel.cancelled() => break,
                    changed = epoch_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            info!(kind = R::KIND, namespace = %namespace, "memory watch stopped");
        });
        Ok((list_rx, err_rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reskit_core::mocks::{MockData, MockResource};

    #[test]
    fn kinds_do_not_collide() {
        let cache = InMemoryResourceCache::new();
        cache.put(MockResource::new("ns", "a"), false).unwrap();
        cache.put(MockData::new("ns", "a"), false).unwrap();
        assert_eq!(cache.len::<MockResource>(), 1);
        assert_eq!(cache.len::<MockData>(), 1);
        assert!(cache.remove::<MockData>("ns", "a"));
        assert_eq!(cache.len::<MockResource>(), 1);
        assert!(cache.is_empty::<MockData>());
    }

    #[test]
    fn every_mutation_bumps_the_epoch() {
        let cache = InMemoryResourceCache::new();
        assert_eq!(cache.epoch(), 0);
        cache.put(MockResource::new("ns", "a"), false).unwrap();
        assert_eq!(cache.epoch(), 1);
        // rejected writes leave the epoch alone
        assert!(cache.put(MockResource::new("ns", "a"), false).is_err());
        assert_eq!(cache.epoch(), 1);
        assert!(cache.remove::<MockResource>("ns", "a"));
        assert!(!cache.remove::<MockResource>("ns", "a"));
        assert_eq!(cache.epoch(), 2);
    }

    #[test]
    fn namespace_prefix_does_not_leak() {
        let cache = InMemoryResourceCache::new();
        cache.put(MockResource::new("ns", "a"), false).unwrap();
        cache.put(MockResource::new("ns2", "b"), false).unwrap();
        let listed = cache.list::<MockResource>("ns", &Selector::new()).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].metadata.name, "a");
    }
}
