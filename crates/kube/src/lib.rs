//! reskit Kubernetes backends: input resources as custom resources, data resources as
//! ConfigMaps or Secrets. The apiserver's `resourceVersion` is the resource version and its
//! optimistic concurrency check guards overwrites.

#![forbid(unsafe_code)]

mod common;
pub mod crd;
pub mod data;

pub use crd::{Crd, KubeResourceClient};
pub use data::{DataObject, KubeConfigMapClient, KubeDataClient, KubeSecretClient};

/// Client from the ambient kubeconfig or in-cluster environment.
pub async fn default_client() -> reskit_core::Result<kube::Client> {
    kube::Client::try_default()
        .await
        .map_err(|e| reskit_core::Error::transport("building kubernetes client", e))
}
