//! The `ResourceClient` contract and shared watch plumbing.

use std::future::Future;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::errors::{Error, Result};
use crate::opts::{DeleteOpts, ListOpts, ReadOpts, WatchOpts, WriteOpts};
use crate::resource::Resource;

/// Data and error channels returned by `watch`.
pub type WatchChannels<R> = (mpsc::Receiver<Vec<R>>, mpsc::Receiver<Error>);

/// Capacity of the list channel. Every message is a full list, so a slow consumer only
/// delays the watcher; nothing is lost that the next message would not repeat.
pub const WATCH_LIST_CAPACITY: usize = 1;
pub const WATCH_ERROR_CAPACITY: usize = 16;

/// Counter bumped by every backend on a successful write, labelled `backend` and `kind`.
pub const WRITES_TOTAL: &str = "resource_client_writes_total";
/// Write latency histogram in milliseconds, labelled `backend`.
pub const WRITE_LATENCY_MS: &str = "resource_client_write_ms";

/// CRUD + watch over one resource kind, independent of the storage medium.
#[async_trait::async_trait]
pub trait ResourceClient<R: Resource>: Send + Sync {
    fn kind(&self) -> &'static str {
        R::KIND
    }

    fn new_resource(&self) -> R {
        R::default()
    }

    /// Idempotent backend setup.
    async fn register(&self) -> Result<()>;

    async fn read(&self, namespace: &str, name: &str, opts: ReadOpts) -> Result<R>;

    /// Create (or, with `overwrite_existing`, compare-and-update) a resource. Returns the
    /// stored copy with its new resource version.
    async fn write(&self, resource: R, opts: WriteOpts) -> Result<R>;

    async fn delete(&self, namespace: &str, name: &str, opts: DeleteOpts) -> Result<()>;

    /// All resources in `namespace` matching the selector, sorted by `(namespace, name)`.
    async fn list(&self, namespace: &str, opts: ListOpts) -> Result<Vec<R>>;

    /// Full lists on every change, starting with an immediate initial list.
    async fn watch(&self, namespace: &str, opts: WatchOpts) -> Result<WatchChannels<R>>;
}

/// Send `value` unless `opts.cancel` fires first. Returns false when the watch should stop
/// (cancelled, or the receiver is gone).
pub async fn send_or_cancel<T: Send>(tx: &mpsc::Sender<T>, value: T, opts: &WatchOpts) -> bool {
    tokio::select! {
        _ = opts.cancel.cancelled() => false,
        res = tx.send(value) => res.is_ok(),
    }
}

/// Spawn a polling watch: call `list` immediately and then every `refresh_rate`, emitting
/// whenever the result differs from the last emitted list.
pub fn spawn_poll_watch<R, F, Fut>(label: String, opts: WatchOpts, list: F) -> WatchChannels<R>
where
    R: Resource,
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Vec<R>>> + Send + 'static,
{
    let opts = opts.with_defaults();
    let (list_tx, list_rx) = mpsc::channel::<Vec<R>>(WATCH_LIST_CAPACITY);
    let (err_tx, err_rx) = mpsc::channel::<Error>(WATCH_ERROR_CAPACITY);
    tokio::spawn(async move {
        let refresh_ms = opts.refresh_rate.as_millis() as u64;
        info!(watch = %label, refresh_ms, "poll watch started");
        let mut last: Option<Vec<R>> = None;
        loop {
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
            tokio::select! {
                _ = opts.cancel.cancelled() => break,
                _ = tokio::time::sleep(opts.refresh_rate) => {}
            }
        }
        info!(watch = %label, "poll watch stopped");
    });
    (list_rx, err_rx)
}
