//! Data resources stored as ConfigMaps or Secrets.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::marker::PhantomData;

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
use metrics::counter;
use reskit_core::client::{WatchChannels, WRITES_TOTAL};
use reskit_core::{
    default_namespace_if_empty, selector_matches, sort_resources, validate_name, DeleteOpts, Error,
    ListOpts, ReadOpts, Resource, ResourceClient, Result, WatchOpts, WriteOpts,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::common::{list_params, map_err, metadata_from, object_meta, spawn_event_watch, WriteKind};

/// A namespaced Kubernetes object carrying a string map.
pub trait DataObject:
    kube::Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Used in logs and capability errors.
    const BACKEND: &'static str;

    fn from_parts(meta: ObjectMeta, data: BTreeMap<String, String>) -> Self;

    fn data_map(&self) -> Result<BTreeMap<String, String>>;
}

impl DataObject for ConfigMap {
    const BACKEND: &'static str = "kube-configmap";

    fn from_parts(metadata: ObjectMeta, data: BTreeMap<String, String>) -> Self {
        ConfigMap { metadata, data: Some(data), ..Default::default() }
    }

    fn data_map(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.data.clone().unwrap_or_default())
    }
}

impl DataObject for Secret {
    const BACKEND: &'static str = "kube-secret";

    fn from_parts(metadata: ObjectMeta, data: BTreeMap<String, String>) -> Self {
        let data = data.into_iter().map(|(k, v)| (k, ByteString(v.into_bytes()))).collect();
        Secret { metadata, data: Some(data), ..Default::default() }
    }

    fn data_map(&self) -> Result<BTreeMap<String, String>> {
        let mut out = BTreeMap::new();
        for (k, v) in self.data.iter().flatten() {
            let text = String::from_utf8(v.0.clone())
                .map_err(|e| Error::codec(format!("secret key {k} is not UTF-8"), e))?;
            out.insert(k.clone(), text);
        }
        // stringData is write-only on the server, but accept it from local fixtures
        for (k, v) in self.string_data.iter().flatten() {
            out.entry(k.clone()).or_insert_with(|| v.clone());
        }
        Ok(out)
    }
}

/// Data resource client over `K` (ConfigMap or Secret).
pub struct KubeDataClient<R: Resource, K: DataObject> {
    client: Client,
    _kind: PhantomData<fn() -> (R, K)>,
}

pub type KubeConfigMapClient<R> = KubeDataClient<R, ConfigMap>;
pub type KubeSecretClient<R> = KubeDataClient<R, Secret>;

impl<R: Resource, K: DataObject> Clone for KubeDataClient<R, K> {
    fn clone(&self) -> Self {
        Self { client: self.client.clone(), _kind: PhantomData }
    }
}

impl<R: Resource, K: DataObject> KubeDataClient<R, K> {
    pub fn new(client: Client) -> Result<Self> {
        if !R::is_data_resource() {
            return Err(Error::UnsupportedKind {
                kind: R::KIND,
                backend: K::BACKEND,
                capability: "data resource",
            });
        }
        Ok(Self { client, _kind: PhantomData })
    }

    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn to_object(resource: &R) -> K {
        let data = resource.as_data().map(|d| d.data().clone()).unwrap_or_default();
        K::from_parts(object_meta(resource.metadata()), data)
    }

    fn from_object(obj: &K) -> Result<R> {
        let mut resource = R::default();
        resource.set_metadata(metadata_from(obj.meta()));
        let data = obj.data_map()?;
        match resource.as_data_mut() {
            Some(d) => d.set_data(data),
            None => return Err(Error::Internal(format!("{} lost its data capability", R::KIND))),
        }
        Ok(resource)
    }

    async fn list_in(api: &Api<K>, opts: &ListOpts) -> Result<Vec<R>> {
        let objects = api
            .list(&list_params(&opts.selector))
            .await
            .map_err(|e| Error::transport(format!("listing {}", K::BACKEND), e))?;
        let mut out = Vec::with_capacity(objects.items.len());
        for obj in &objects.items {
            let r = Self::from_object(obj)?;
            if selector_matches(&opts.selector, &r.metadata().labels) {
                out.push(r);
            }
        }
        sort_resources(&mut out);
        Ok(out)
    }
}

#[async_trait::async_trait]
impl<R: Resource, K: DataObject> ResourceClient<R> for KubeDataClient<R, K> {
    async fn register(&self) -> Result<()> {
        Ok(())
    }

    async fn read(&self, namespace: &str, name: &str, _opts: ReadOpts) -> Result<R> {
        validate_name(name)?;
        let namespace = default_namespace_if_empty(namespace);
        match self.api(&namespace).get_opt(name).await {
            Ok(Some(obj)) => Self::from_object(&obj),
            Ok(None) => Err(Error::not_exist(&namespace, name)),
            Err(e) => Err(map_err(e, &namespace, name, "", None)),
        }
    }

    async fn write(&self, mut resource: R, opts: WriteOpts) -> Result<R> {
        validate_name(&resource.metadata().name)?;
        let namespace = default_namespace_if_empty(&resource.metadata().namespace);
        resource.metadata_mut().namespace = namespace.clone();
        let name = resource.metadata().name.clone();
        let given = resource.metadata().resource_version.clone();
        let api = self.api(&namespace);

        let existing = if opts.overwrite_existing {
            api.get_opt(&name).await.map_err(|e| map_err(e, &namespace, &name, &given, None))?
        } else {
            None
        };
        let stored = match existing {
            Some(current) => {
                let expected = current.meta().resource_version.clone().unwrap_or_default();
                if given != expected {
                    return Err(Error::resource_version(&namespace, &name, &given, &expected));
                }
                api.replace(&name, &PostParams::default(), &Self::to_object(&resource))
                    .await
                    .map_err(|e| map_err(e, &namespace, &name, &given, Some(WriteKind::Replace)))?
            }
            None => {
                let mut obj = Self::to_object(&resource);
                obj.meta_mut().resource_version = None;
                api.create(&PostParams::default(), &obj)
                    .await
                    .map_err(|e| map_err(e, &namespace, &name, &given, Some(WriteKind::Create)))?
            }
        };
        counter!(WRITES_TOTAL, 1, "backend" => K::BACKEND, "kind" => R::KIND);
        let stored = Self::from_object(&stored)?;
        debug!(
            backend = K::BACKEND,
            name = %stored.metadata().reference(),
            version = %stored.metadata().resource_version,
            "wrote"
        );
        Ok(stored)
    }

    async fn delete(&self, namespace: &str, name: &str, opts: DeleteOpts) -> Result<()> {
        validate_name(name)?;
        let namespace = default_namespace_if_empty(namespace);
        match self.api(&namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) => match map_err(e, &namespace, name, "", None) {
                err if err.is_not_exist() && opts.ignore_not_exist => Ok(()),
                err => Err(err),
            },
        }
    }

    async fn list(&self, namespace: &str, opts: ListOpts) -> Result<Vec<R>> {
        let namespace = default_namespace_if_empty(namespace);
        Self::list_in(&self.api(&namespace), &opts).await
    }

    async fn watch(&self, namespace: &str, opts: WatchOpts) -> Result<WatchChannels<R>> {
        let namespace = default_namespace_if_empty(namespace);
        let api = self.api(&namespace);
        let list_api = api.clone();
        let list_opts = opts.list_opts();
        let label = format!("{}:{}/{}", K::BACKEND, R::KIND, namespace);
        Ok(spawn_event_watch(label, api, opts, move || {
            let api = list_api.clone();
            let list_opts = list_opts.clone();
            async move { Self::list_in(&api, &list_opts).await }
        }))
    }
}
