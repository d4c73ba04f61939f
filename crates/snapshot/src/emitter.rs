//! Fan-in of many (kind, namespace) watches into one stream of deduplicated snapshots.

use std::collections::BTreeSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use metrics::{counter, histogram};
use reskit_core::client::send_or_cancel;
use reskit_core::{default_namespace_if_empty, Error, Resource, Result, WatchOpts};
use reskit_factory::TypedResourceClient;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::forward_error;
use crate::snapshot::{AnyResource, Partition, Snapshot};

pub const PARTITION_CAPACITY: usize = 64;
pub const SNAPSHOT_CAPACITY: usize = 8;
pub const SNAPSHOT_ERROR_CAPACITY: usize = 64;

/// One full list for one (kind, namespace) pair.
#[derive(Debug)]
pub struct PartitionUpdate {
    pub kind: &'static str,
    pub namespace: String,
    pub resources: Partition,
}

/// Where forwarders deliver lists and errors.
#[derive(Debug, Clone)]
pub struct Forward {
    pub lists: mpsc::Sender<PartitionUpdate>,
    pub errors: mpsc::Sender<Error>,
}

/// A typed client seen through its kind only.
#[async_trait::async_trait]
pub trait WatchSource: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn register(&self) -> Result<()>;

    /// Open a watch on `namespace` and spawn, onto `tasks`, a forwarder that feeds `out`
    /// until `opts.cancel` fires or the watch closes.
    async fn forward(
        &self,
        namespace: &str,
        opts: WatchOpts,
        out: Forward,
        tasks: &mut JoinSet<()>,
    ) -> Result<()>;
}

#[async_trait::async_trait]
impl<R: Resource> WatchSource for TypedResourceClient<R> {
    fn kind(&self) -> &'static str {
        R::KIND
    }

    async fn register(&self) -> Result<()> {
        TypedResourceClient::register(self).await
    }

    async fn forward(
        &self,
        namespace: &str,
        opts: WatchOpts,
        out: Forward,
        tasks: &mut JoinSet<()>,
    ) -> Result<()> {
        let (mut lists, mut errors) = self.watch(namespace, opts.clone()).await?;
        let namespace = namespace.to_string();
        let provenance = format!("{namespace}-{}", R::KIND);
        tasks.spawn(async move {
            let mut errors_open = true;
            loop {
                tokio::select! {
                    _ = opts.cancel.cancelled() => break,
                    list = lists.recv() => {
                        let Some(list) = list else { break };
                        let resources = list
                            .into_iter()
                            .map(|r| Arc::new(r) as Arc<dyn AnyResource>)
                            .collect();
                        let update = PartitionUpdate {
                            kind: R::KIND,
                            namespace: namespace.clone(),
                            resources,
                        };
                        if !send_or_cancel(&out.lists, update, &opts).await {
                            break;
                        }
                    }
                    err = errors.recv(), if errors_open => match err {
                        Some(e) => {
                            let e = Error::from_watch(provenance.clone(), e);
                            forward_error(&out.errors, e, "snapshot emitter");
                        }
                        None => errors_open = false,
                    },
                }
            }
            debug!(watch = %provenance, "forwarder stopped");
        });
        Ok(())
    }
}

/// Output of [`SnapshotEmitter::snapshots`]. Both channels close once the emitter has shut
/// down.
pub struct SnapshotStream {
    pub snapshots: mpsc::Receiver<Arc<Snapshot>>,
    pub errors: mpsc::Receiver<Error>,
    /// Most recently published snapshot (empty until the first one).
    pub latest: Arc<ArcSwap<Snapshot>>,
}

impl SnapshotStream {
    pub fn latest(&self) -> Arc<Snapshot> {
        self.latest.load_full()
    }
}

#[derive(Clone, Default)]
pub struct SnapshotEmitter {
    sources: Vec<Arc<dyn WatchSource>>,
}

impl SnapshotEmitter {
    pub fn new(sources: Vec<Arc<dyn WatchSource>>) -> Self {
        Self { sources }
    }

    pub fn with_client<R: Resource>(mut self, client: TypedResourceClient<R>) -> Self {
        self.sources.push(Arc::new(client));
        self
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.kind()).collect()
    }

    pub async fn register(&self) -> Result<()> {
        for source in &self.sources {
            source.register().await?;
        }
        Ok(())
    }

    /// Watch every kind in every namespace (empty slice: the default namespace).
    ///
    /// The first snapshot is published once each (kind, namespace) watch delivered its
    /// initial list; after that, only when the content hash changes.
    pub async fn snapshots(
        &self,
        namespaces: &[String],
        opts: WatchOpts,
    ) -> Result<SnapshotStream> {
        let namespaces: BTreeSet<String> = if namespaces.is_empty() {
            BTreeSet::from([default_namespace_if_empty("")])
        } else {
            namespaces.iter().map(|ns| default_namespace_if_empty(ns)).collect()
        };
        let cancel = opts.cancel.child_token();
        let opts = WatchOpts { cancel: cancel.clone(), ..opts };

        let (part_tx, mut part_rx) = mpsc::channel::<PartitionUpdate>(PARTITION_CAPACITY);
        let (err_tx, err_rx) = mpsc::channel::<Error>(SNAPSHOT_ERROR_CAPACITY);
        let (snap_tx, snap_rx) = mpsc::channel::<Arc<Snapshot>>(SNAPSHOT_CAPACITY);
        let latest = Arc::new(ArcSwap::from_pointee(Snapshot::default()));

        let out = Forward { lists: part_tx, errors: err_tx };
        let mut tasks = JoinSet::new();
        let mut expected = BTreeSet::new();
        for source in &self.sources {
            for namespace in &namespaces {
                let forwarded =
                    source.forward(namespace, opts.clone(), out.clone(), &mut tasks).await;
                if let Err(e) = forwarded {
                    cancel.cancel();
                    tasks.shutdown().await;
                    return Err(e);
                }
                expected.insert((source.kind(), namespace.clone()));
            }
        }
        // forwarders hold the only senders from here on
        drop(out);

        let published = Arc::clone(&latest);
        tokio::spawn(async move {
            info!(partitions = expected.len(), "snapshot emitter started");
            let mut current = Snapshot::default();
            let mut seen = BTreeSet::new();
            let mut last_hash: Option<u64> = None;
            loop {
                let update = tokio::select! {
                    _ = cancel.cancelled() => break,
                    update = part_rx.recv() => match update {
                        Some(update) => update,
                        None => break,
                    },
                };
                seen.insert((update.kind, update.namespace.clone()));
                current.set_partition(update.kind, &update.namespace, update.resources);
                if seen.len() < expected.len() {
                    continue;
                }
                let hash = current.hash();
                if last_hash == Some(hash) {
                    counter!("snapshot_deduplicated_total", 1);
                    continue;
                }
                last_hash = Some(hash);
                let snapshot = Arc::new(current.clone());
                published.store(Arc::clone(&snapshot));
                counter!("snapshot_published_total", 1);
                histogram!("snapshot_resources", snapshot.len() as f64);
                debug!(hash, resources = snapshot.len(), "snapshot published");
                if !send_or_cancel(&snap_tx, snapshot, &opts).await {
                    break;
                }
            }
            // also reached when the consumer went away; stop the watches either way
            cancel.cancel();
            while tasks.join_next().await.is_some() {}
            info!("snapshot emitter stopped");
        });

        Ok(SnapshotStream { snapshots: snap_rx, errors: err_rx, latest })
    }
}
