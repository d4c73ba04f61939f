//! reskit Vault backend for data resources. A resource is one secret at
//! `{root_key}/{namespace}/{name}`: its data entries become secret fields and its metadata is
//! kept as JSON under the reserved `_metadata` field.

#![forbid(unsafe_code)]

pub mod http;
pub mod kv;

use std::marker::PhantomData;
use std::sync::Arc;

use metrics::counter;
use reskit_core::client::{spawn_poll_watch, WatchChannels, WRITES_TOTAL};
use reskit_core::{
    next_resource_version, resolve_namespace, selector_matches, sort_resources,
    validate_name, DeleteOpts, Error, ListOpts, Metadata, ReadOpts, Resource, ResourceClient,
    Result, WatchOpts, WriteOpts,
};
use tracing::debug;

pub use http::{VaultConfig, VaultHttpClient, DEFAULT_ADDRESS};
pub use kv::{SecretData, VaultKv};

/// Secret field holding the JSON-encoded resource metadata.
pub const METADATA_FIELD: &str = "_metadata";

pub struct VaultResourceClient<R: Resource> {
    kv: Arc<dyn VaultKv>,
    root_key: Arc<str>,
    _kind: PhantomData<fn() -> R>,
}

impl<R: Resource> Clone for VaultResourceClient<R> {
    fn clone(&self) -> Self {
        Self { kv: Arc::clone(&self.kv), root_key: Arc::clone(&self.root_key), _kind: PhantomData }
    }
}

impl<R: Resource> VaultResourceClient<R> {
    /// Fails with `UnsupportedKind` unless `R` is a data resource.
    pub fn new(kv: Arc<dyn VaultKv>, root_key: &str) -> Result<Self> {
        if !R::is_data_resource() {
            return Err(Error::UnsupportedKind {
                kind: R::KIND,
                backend: "vault",
                capability: "data resource",
            });
        }
        Ok(Self { kv, root_key: Arc::from(root_key.trim_matches('/')), _kind: PhantomData })
    }

    fn dir(&self, namespace: &str) -> String {
        format!("{}/{}", self.root_key, namespace)
    }

    fn path(&self, namespace: &str, name: &str) -> String {
        format!("{}/{}", self.dir(namespace), name)
    }

    fn to_secret(resource: &R) -> Result<SecretData> {
        let mut secret = resource.as_data().map(|d| d.data().clone()).unwrap_or_default();
        let meta = serde_json::to_string(resource.metadata()).map_err(|e| {
            Error::codec(format!("encoding metadata of {}", resource.metadata().reference()), e)
        })?;
        secret.insert(METADATA_FIELD.to_string(), meta);
        Ok(secret)
    }

    fn from_secret(path: &str, mut secret: SecretData) -> Result<R> {
        let raw = secret.remove(METADATA_FIELD).ok_or_else(|| {
            Error::codec(format!("decoding {path}"), format!("missing {METADATA_FIELD} field"))
        })?;
        let meta: Metadata = serde_json::from_str(&raw)
            .map_err(|e| Error::codec(format!("decoding metadata at {path}"), e))?;
        let mut resource = R::default();
        resource.set_metadata(meta);
        match resource.as_data_mut() {
            Some(data) => data.set_data(secret),
            None => return Err(Error::Internal(format!("{} lost its data capability", R::KIND))),
        }
        Ok(resource)
    }

    async fn load(&self, namespace: &str, name: &str) -> Result<Option<R>> {
        let path = self.path(namespace, name);
        match self.kv.read(&path).await? {
            Some(secret) => Self::from_secret(&path, secret).map(Some),
            None => Ok(None),
        }
    }
}

#[async_trait::async_trait]
impl<R: Resource> ResourceClient<R> for VaultResourceClient<R> {
    async fn register(&self) -> Result<()> {
        Ok(())
    }

    async fn read(&self, namespace: &str, name: &str, _opts: ReadOpts) -> Result<R> {
        validate_name(name)?;
        let namespace = resolve_namespace(namespace)?;
        self.load(&namespace, name).await?.ok_or_else(|| Error::not_exist(&namespace, name))
    }

    async fn write(&self, mut resource: R, opts: WriteOpts) -> Result<R> {
        validate_name(&resource.metadata().name)?;
        if resource.as_data().is_some_and(|d| d.data().contains_key(METADATA_FIELD)) {
            return Err(Error::Validation(format!(
                "{}: data key {METADATA_FIELD:?} is reserved by the vault backend",
                resource.metadata().reference()
            )));
        }
        let namespace = resolve_namespace(&resource.metadata().namespace)?;
        resource.metadata_mut().namespace = namespace.clone();
        let name = resource.metadata().name.clone();

        // KV v1 has no check-and-set; compare explicitly before replacing
        let current_version = match self.load(&namespace, &name).await? {
            Some(existing) => {
                if !opts.overwrite_existing {
                    return Err(Error::exist(&namespace, &name));
                }
                let expected = &existing.metadata().resource_version;
                let given = &resource.metadata().resource_version;
                if given != expected {
                    return Err(Error::resource_version(&namespace, &name, given, expected));
                }
                expected.clone()
            }
            None => String::new(),
        };
        resource.metadata_mut().resource_version = next_resource_version(&current_version);
        let path = self.path(&namespace, &name);
        self.kv.write(&path, Self::to_secret(&resource)?).await?;
        counter!(WRITES_TOTAL, 1, "backend" => "vault", "kind" => R::KIND);
        let version = &resource.metadata().resource_version;
        debug!(kind = R::KIND, path = %path, version = %version, "wrote");
        Ok(resource)
    }

    async fn delete(&self, namespace: &str, name: &str, opts: DeleteOpts) -> Result<()> {
        validate_name(name)?;
        let namespace = resolve_namespace(namespace)?;
        let path = self.path(&namespace, name);
        if self.kv.read(&path).await?.is_none() {
            return if opts.ignore_not_exist {
                Ok(())
            } else {
                Err(Error::not_exist(&namespace, name))
            };
        }
        self.kv.delete(&path).await
    }

    async fn list(&self, namespace: &str, opts: ListOpts) -> Result<Vec<R>> {
        let namespace = resolve_namespace(namespace)?;
        let keys = self.kv.list_keys(&self.dir(&namespace)).await?;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys.iter().filter(|k| !k.ends_with('/')) {
            // deleted between LIST and read
            let Some(resource) = self.load(&namespace, key).await? else { continue };
            if selector_matches(&opts.selector, &resource.metadata().labels) {
                out.push(resource);
            }
        }
        sort_resources(&mut out);
        Ok(out)
    }

    async fn watch(&self, namespace: &str, opts: WatchOpts) -> Result<WatchChannels<R>> {
        let namespace = resolve_namespace(namespace)?;
        let client = self.clone();
        let list_opts = opts.list_opts();
        let label = format!("vault:{}", self.dir(&namespace));
        Ok(spawn_poll_watch(label, opts, move || {
            let client = client.clone();
            let namespace = namespace.clone();
            let list_opts = list_opts.clone();
            async move { client.list(&namespace, list_opts).await }
        }))
    }
}
