//! Input resources as custom resources, handled through `DynamicObject`.

use std::marker::PhantomData;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, PostParams};
use kube::Client;
use metrics::counter;
use reskit_core::client::{WatchChannels, WRITES_TOTAL};
use reskit_core::{
    default_namespace_if_empty, selector_matches, sort_resources, validate_name, DeleteOpts, Error,
    ListOpts, ReadOpts, Resource, ResourceClient, Result, WatchOpts, WriteOpts,
};
use serde_json::{Map, Value};
use tracing::debug;

use crate::common::{list_params, map_err, metadata_from, object_meta, spawn_event_watch, WriteKind};

/// Coordinates of a custom resource type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Crd {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
}

impl Crd {
    pub fn api_resource(&self) -> ApiResource {
        let api_version = if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        };
        ApiResource {
            group: self.group.clone(),
            version: self.version.clone(),
            api_version,
            kind: self.kind.clone(),
            plural: self.plural.clone(),
        }
    }

    /// Name of the `CustomResourceDefinition` object, `{plural}.{group}`.
    pub fn definition_name(&self) -> String {
        format!("{}.{}", self.plural, self.group)
    }
}

/// Resource body goes under `spec` (everything but `metadata` and `status`), status under
/// `status`.
pub struct KubeResourceClient<R: Resource> {
    client: Client,
    crd: Crd,
    ar: ApiResource,
    _kind: PhantomData<fn() -> R>,
}

impl<R: Resource> Clone for KubeResourceClient<R> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            crd: self.crd.clone(),
            ar: self.ar.clone(),
            _kind: PhantomData,
        }
    }
}

impl<R: Resource> KubeResourceClient<R> {
    pub fn new(client: Client, crd: Crd) -> Result<Self> {
        if !R::is_input_resource() {
            return Err(Error::UnsupportedKind {
                kind: R::KIND,
                backend: "kube",
                capability: "input resource",
            });
        }
        let ar = crd.api_resource();
        Ok(Self { client, crd, ar, _kind: PhantomData })
    }

    fn api(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &self.ar)
    }

    fn to_object(ar: &ApiResource, resource: &R) -> Result<DynamicObject> {
        let meta = resource.metadata();
        let mut body = match serde_json::to_value(resource) {
            Ok(Value::Object(map)) => map,
            Ok(other) => return Err(Error::Internal(format!("{} serialized to {other}", R::KIND))),
            Err(e) => return Err(Error::codec(format!("encoding {}", meta.reference()), e)),
        };
        body.remove("metadata");
        let status = body.remove("status");
        let mut data = Map::new();
        data.insert("spec".to_string(), Value::Object(body));
        if let Some(status) = status {
            data.insert("status".to_string(), status);
        }
        let mut obj = DynamicObject::new(&meta.name, ar);
        obj.metadata = object_meta(meta);
        obj.data = Value::Object(data);
        Ok(obj)
    }

    fn from_object(obj: &DynamicObject) -> Result<R> {
        let mut body = match obj.data.get("spec") {
            Some(Value::Object(spec)) => spec.clone(),
            _ => Map::new(),
        };
        if let Some(status) = obj.data.get("status") {
            body.insert("status".to_string(), status.clone());
        }
        let meta = metadata_from(&obj.metadata);
        let reference = meta.reference();
        let meta = serde_json::to_value(meta)
            .map_err(|e| Error::codec(format!("encoding metadata of {reference}"), e))?;
        body.insert("metadata".to_string(), meta);
        serde_json::from_value(Value::Object(body))
            .map_err(|e| Error::codec(format!("decoding {reference}"), e))
    }

    async fn list_in(api: &Api<DynamicObject>, opts: &ListOpts) -> Result<Vec<R>> {
        let objects = api
            .list(&list_params(&opts.selector))
            .await
            .map_err(|e| Error::transport("listing custom resources", e))?;
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
impl<R: Resource> ResourceClient<R> for KubeResourceClient<R> {
    async fn register(&self) -> Result<()> {
        let crds: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        let name = self.crd.definition_name();
        match crds.get_opt(&name).await {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(Error::Validation(format!(
                "custom resource definition {name} is not installed"
            ))),
            Err(e) => Err(Error::transport(format!("looking up {name}"), e)),
        }
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
                let expected = current.metadata.resource_version.clone().unwrap_or_default();
                if given != expected {
                    return Err(Error::resource_version(&namespace, &name, &given, &expected));
                }
                let obj = Self::to_object(&self.ar, &resource)?;
                api.replace(&name, &PostParams::default(), &obj)
                    .await
                    .map_err(|e| map_err(e, &namespace, &name, &given, Some(WriteKind::Replace)))?
            }
            None => {
                let mut obj = Self::to_object(&self.ar, &resource)?;
                obj.metadata.resource_version = None;
                api.create(&PostParams::default(), &obj)
                    .await
                    .map_err(|e| map_err(e, &namespace, &name, &given, Some(WriteKind::Create)))?
            }
        };
        counter!(WRITES_TOTAL, 1, "backend" => "kube", "kind" => R::KIND);
        let stored = Self::from_object(&stored)?;
        debug!(
            kind = R::KIND,
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
        let label = format!("kube:{}/{}", self.crd.definition_name(), namespace);
        Ok(spawn_event_watch(label, api, opts, move || {
            let api = list_api.clone();
            let list_opts = list_opts.clone();
            async move { Self::list_in(&api, &list_opts).await }
        }))
    }
}
