//! reskit backend selection.
//!
//! Callers describe the storage once with [`ResourceClientOptions`] and obtain a
//! `ResourceClient` for any resource kind from the [`ResourceClientFactory`]. Frontends that
//! only care about one kind hold a [`TypedResourceClient`].

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use reskit_consul::{ConsulConfig, ConsulHttpClient, ConsulKv, ConsulResourceClient};
use reskit_core::client::WatchChannels;
use reskit_core::{
    DeleteOpts, ListOpts, ReadOpts, Resource, ResourceClient, Result, WatchOpts, WriteOpts,
};
use reskit_file::{FileResourceClient, WriteLock};
use reskit_kube::{Crd, KubeConfigMapClient, KubeResourceClient, KubeSecretClient};
use reskit_memory::{InMemoryResourceCache, MemoryResourceClient};
use reskit_vault::{VaultConfig, VaultHttpClient, VaultKv, VaultResourceClient};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct MemoryClientOpts {
    /// Every client built from these options shares this cache.
    pub cache: InMemoryResourceCache,
}

#[derive(Debug, Clone)]
pub struct FileClientOpts {
    pub root_dir: PathBuf,
    /// Shared by every client built from these options.
    pub write_lock: WriteLock,
}

impl FileClientOpts {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self { root_dir: root_dir.into(), write_lock: WriteLock::default() }
    }
}

#[derive(Clone)]
pub struct ConsulClientOpts {
    pub kv: Arc<dyn ConsulKv>,
    pub root_key: String,
}

impl ConsulClientOpts {
    pub fn http(config: ConsulConfig, root_key: impl Into<String>) -> Result<Self> {
        Ok(Self { kv: Arc::new(ConsulHttpClient::new(config)?), root_key: root_key.into() })
    }
}

#[derive(Clone)]
pub struct VaultClientOpts {
    pub kv: Arc<dyn VaultKv>,
    pub root_key: String,
}

impl VaultClientOpts {
    pub fn http(config: VaultConfig, root_key: impl Into<String>) -> Result<Self> {
        Ok(Self { kv: Arc::new(VaultHttpClient::new(config)?), root_key: root_key.into() })
    }
}

#[derive(Clone)]
pub struct KubeClientOpts {
    pub client: kube::Client,
    pub crd: Crd,
}

#[derive(Clone)]
pub struct KubeConfigMapClientOpts {
    pub client: kube::Client,
}

#[derive(Clone)]
pub struct KubeSecretClientOpts {
    pub client: kube::Client,
}

/// Where resources live. One variant per backend.
#[derive(Clone)]
pub enum ResourceClientOptions {
    Memory(MemoryClientOpts),
    File(FileClientOpts),
    Consul(ConsulClientOpts),
    Vault(VaultClientOpts),
    Kube(KubeClientOpts),
    KubeConfigMap(KubeConfigMapClientOpts),
    KubeSecret(KubeSecretClientOpts),
}

impl ResourceClientOptions {
    pub fn backend(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::File(_) => "file",
            Self::Consul(_) => "consul",
            Self::Vault(_) => "vault",
            Self::Kube(_) => "kube",
            Self::KubeConfigMap(_) => "kube-configmap",
            Self::KubeSecret(_) => "kube-secret",
        }
    }
}

impl std::fmt::Debug for ResourceClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ResourceClientOptions").field(&self.backend()).finish()
    }
}

#[derive(Debug, Clone)]
pub struct ResourceClientFactory {
    opts: ResourceClientOptions,
}

impl ResourceClientFactory {
    pub fn new(opts: ResourceClientOptions) -> Self {
        Self { opts }
    }

    pub fn options(&self) -> &ResourceClientOptions {
        &self.opts
    }

    /// Build a client for kind `R`. Fails with `UnsupportedKind` when the backend needs a
    /// capability `R` lacks.
    pub fn new_resource_client<R: Resource>(&self) -> Result<Arc<dyn ResourceClient<R>>> {
        debug!(kind = R::KIND, backend = self.opts.backend(), "building resource client");
        let client: Arc<dyn ResourceClient<R>> = match &self.opts {
            ResourceClientOptions::Memory(o) => {
                Arc::new(MemoryResourceClient::<R>::new(o.cache.clone()))
            }
            ResourceClientOptions::File(o) => Arc::new(FileResourceClient::<R>::with_write_lock(
                o.root_dir.clone(),
                o.write_lock.clone(),
            )),
            ResourceClientOptions::Consul(o) => {
                Arc::new(ConsulResourceClient::<R>::new(Arc::clone(&o.kv), &o.root_key))
            }
            ResourceClientOptions::Vault(o) => {
                Arc::new(VaultResourceClient::<R>::new(Arc::clone(&o.kv), &o.root_key)?)
            }
            ResourceClientOptions::Kube(o) => {
                Arc::new(KubeResourceClient::<R>::new(o.client.clone(), o.crd.clone())?)
            }
            ResourceClientOptions::KubeConfigMap(o) => {
                Arc::new(KubeConfigMapClient::<R>::new(o.client.clone())?)
            }
            ResourceClientOptions::KubeSecret(o) => {
                Arc::new(KubeSecretClient::<R>::new(o.client.clone())?)
            }
        };
        Ok(client)
    }
}

/// A `ResourceClient` pinned to one kind.
pub struct TypedResourceClient<R: Resource> {
    inner: Arc<dyn ResourceClient<R>>,
}

impl<R: Resource> Clone for TypedResourceClient<R> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<R: Resource> TypedResourceClient<R> {
    pub fn new(factory: &ResourceClientFactory) -> Result<Self> {
        Ok(Self { inner: factory.new_resource_client::<R>()? })
    }

    pub fn from_client(inner: Arc<dyn ResourceClient<R>>) -> Self {
        Self { inner }
    }

    pub fn base_client(&self) -> Arc<dyn ResourceClient<R>> {
        Arc::clone(&self.inner)
    }

    pub fn kind(&self) -> &'static str {
        R::KIND
    }

    pub async fn register(&self) -> Result<()> {
        self.inner.register().await
    }

    pub async fn read(&self, namespace: &str, name: &str, opts: ReadOpts) -> Result<R> {
        self.inner.read(namespace, name, opts).await
    }

    pub async fn write(&self, resource: R, opts: WriteOpts) -> Result<R> {
        self.inner.write(resource, opts).await
    }

    pub async fn delete(&self, namespace: &str, name: &str, opts: DeleteOpts) -> Result<()> {
        self.inner.delete(namespace, name, opts).await
    }

    pub async fn list(&self, namespace: &str, opts: ListOpts) -> Result<Vec<R>> {
        self.inner.list(namespace, opts).await
    }

    pub async fn watch(&self, namespace: &str, opts: WatchOpts) -> Result<WatchChannels<R>> {
        self.inner.watch(namespace, opts).await
    }
}
