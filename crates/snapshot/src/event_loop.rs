//! Drive a [`Syncer`] from a snapshot stream, cancelling work on stale snapshots.

use std::sync::Arc;

use metrics::counter;
use reskit_core::{Error, Result, WatchOpts};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::emitter::SnapshotEmitter;
use crate::forward_error;
use crate::snapshot::Snapshot;

pub const EVENT_LOOP_ERROR_CAPACITY: usize = 16;

/// Reacts to snapshots. `cancel` fires as soon as a newer snapshot arrives.
#[async_trait::async_trait]
pub trait Syncer: Send + Sync + 'static {
    async fn sync(&self, cancel: CancellationToken, snapshot: Arc<Snapshot>) -> Result<()>;
}

pub struct EventLoop<S: Syncer> {
    emitter: SnapshotEmitter,
    syncer: Arc<S>,
}

impl<S: Syncer> EventLoop<S> {
    pub fn new(emitter: SnapshotEmitter, syncer: S) -> Self {
        Self { emitter, syncer: Arc::new(syncer) }
    }

    /// Start the loop. Sync and emitter errors arrive on the returned channel, which closes
    /// once the loop has stopped.
    pub async fn run(
        &self,
        namespaces: &[String],
        opts: WatchOpts,
    ) -> Result<mpsc::Receiver<Error>> {
        let cancel = opts.cancel.clone();
        let mut stream = self.emitter.snapshots(namespaces, opts).await?;
        let (err_tx, err_rx) = mpsc::channel::<Error>(EVENT_LOOP_ERROR_CAPACITY);
        let syncer = Arc::clone(&self.syncer);

        tokio::spawn(async move {
            info!("event loop started");
            let mut syncs = JoinSet::new();
            let mut in_flight: Option<CancellationToken> = None;
            let mut errors_open = true;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    snapshot = stream.snapshots.recv() => {
                        let Some(snapshot) = snapshot else { break };
                        if let Some(stale) = in_flight.take() {
                            stale.cancel();
                            counter!("event_loop_syncs_cancelled_total", 1);
                        }
                        let token = cancel.child_token();
                        in_flight = Some(token.clone());
                        counter!("event_loop_syncs_total", 1);
                        debug!(resources = snapshot.len(), "syncing snapshot");
                        let syncer = Arc::clone(&syncer);
                        let err_tx = err_tx.clone();
                        syncs.spawn(async move {
                            if let Err(e) = syncer.sync(token, snapshot).await {
                                forward_error(&err_tx, e, "event loop");
                            }
                        });
                    }
                    err = stream.errors.recv(), if errors_open => match err {
                        Some(e) => forward_error(&err_tx, e, "event loop"),
                        None => errors_open = false,
                    },
                    Some(_) = syncs.join_next(), if !syncs.is_empty() => {}
                }
            }
            if let Some(token) = in_flight {
                token.cancel();
            }
            while syncs.join_next().await.is_some() {}
            info!("event loop stopped");
        });
        Ok(err_rx)
    }
}
