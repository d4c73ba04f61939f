//! Conversions and watch wiring shared by the Kubernetes-backed clients.

use std::fmt::Debug;
use std::future::Future;

use futures::TryStreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, ListParams};
use kube::runtime::watcher::{self, watcher};
use kube::runtime::WatchStreamExt;
use reskit_core::client::{send_or_cancel, WatchChannels, WATCH_ERROR_CAPACITY, WATCH_LIST_CAPACITY};
use reskit_core::{Error, Metadata, Resource, Selector, WatchOpts};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// What a conflicting write means for the caller.
#[derive(Debug, Clone, Copy)]
pub(crate) enum WriteKind {
    Create,
    Replace,
}

pub(crate) fn api_code(e: &kube::Error) -> Option<u16> {
    match e {
        kube::Error::Api(resp) => Some(resp.code),
        _ => None,
    }
}

/// Map an apiserver failure for `namespace/name` onto the reskit taxonomy.
pub(crate) fn map_err(
    e: kube::Error,
    namespace: &str,
    name: &str,
    given: &str,
    write: Option<WriteKind>,
) -> Error {
    match (api_code(&e), write) {
        (Some(404), _) => Error::not_exist(namespace, name),
        (Some(409), Some(WriteKind::Create)) => Error::exist(namespace, name),
        (Some(409), Some(WriteKind::Replace)) => {
            Error::resource_version(namespace, name, given, "newer")
        }
        _ => Error::transport(format!("kube request for {namespace}.{name}"), e),
    }
}

pub(crate) fn object_meta(meta: &Metadata) -> ObjectMeta {
    let non_empty =
        |v: &std::collections::BTreeMap<String, String>| (!v.is_empty()).then(|| v.clone());
    ObjectMeta {
        name: Some(meta.name.clone()),
        namespace: Some(meta.namespace.clone()),
        resource_version: (!meta.resource_version.is_empty())
            .then(|| meta.resource_version.clone()),
        labels: non_empty(&meta.labels),
        annotations: non_empty(&meta.annotations),
        ..Default::default()
    }
}

pub(crate) fn metadata_from(om: &ObjectMeta) -> Metadata {
    Metadata {
        name: om.name.clone().unwrap_or_default(),
        namespace: om.namespace.clone().unwrap_or_default(),
        resource_version: om.resource_version.clone().unwrap_or_default(),
        labels: om.labels.clone().unwrap_or_default(),
        annotations: om.annotations.clone().unwrap_or_default(),
    }
}

/// `k=v,k2=v2`, the apiserver's equality selector syntax.
pub(crate) fn label_selector(selector: &Selector) -> String {
    selector.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(",")
}

pub(crate) fn list_params(selector: &Selector) -> ListParams {
    if selector.is_empty() {
        ListParams::default()
    } else {
        ListParams::default().labels(&label_selector(selector))
    }
}

/// Relist on every watcher event and on every `refresh_rate` tick, emitting when the list
/// changed. The first tick fires at once, which gives the initial emission.
pub(crate) fn spawn_event_watch<R, K, F, Fut>(
    label: String,
    api: Api<K>,
    opts: WatchOpts,
    list: F,
) -> WatchChannels<R>
where
    R: Resource,
    K: kube::Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = reskit_core::Result<Vec<R>>> + Send + 'static,
{
    let opts = opts.with_defaults();
    let (list_tx, list_rx) = mpsc::channel::<Vec<R>>(WATCH_LIST_CAPACITY);
    let (err_tx, err_rx) = mpsc::channel::<Error>(WATCH_ERROR_CAPACITY);
    tokio::spawn(async move {
        let events = watcher(api, watcher::Config::default()).default_backoff();
        futures::pin_mut!(events);
        let mut ticker = tokio::time::interval(opts.refresh_rate);
        let mut last: Option<Vec<R>> = None;
        info!(watch = %label, "kube watch started");
        loop {
            tokio::select! {
                _ = opts.cancel.cancelled() => break,
                _ = ticker.tick() => {}
                ev = events.try_next() => match ev {
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        warn!(watch = %label, "watcher stream ended");
                        break;
                    }
                    Err(e) => {
                        let e = Error::transport(format!("watching {label}"), e);
                        if !send_or_cancel(&err_tx, e, &opts).await {
                            break;
                        }
                        continue;
                    }
                },
            }
            match list().await {
                Ok(current) => {
                    if last.as_ref() != Some(&current) {
                        debug!(watch = %label, count = current.len(), "list changed");
                        if !send_or_cancel(&list_tx, current.clone(), &opts).await {
                            break;
                        }
                        last = Some(current);
                    }
                }
                Err(e) => {
                    if !send_or_cancel(&err_tx, e, &opts).await {
                        break;
                    }
                }
            }
        }
        info!(watch = %label, "kube watch stopped");
    });
    (list_rx, err_rx)
}
