//! reskit snapshots.
//!
//! A [`SnapshotEmitter`] watches several resource kinds across several namespaces and
//! publishes a new immutable [`Snapshot`] whenever the combined content changes. An
//! [`EventLoop`] feeds those snapshots to a [`Syncer`], cancelling the sync of a snapshot that
//! has been superseded.

#![forbid(unsafe_code)]

pub mod emitter;
pub mod event_loop;
pub mod snapshot;

use metrics::counter;
use reskit_core::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

pub use emitter::{Forward, PartitionUpdate, SnapshotEmitter, SnapshotStream, WatchSource};
pub use event_loop::{EventLoop, Syncer};
pub use snapshot::{AnyResource, Partition, Snapshot};

/// Non-blocking error hand-off; a full channel drops the error with a warning.
pub(crate) fn forward_error(tx: &mpsc::Sender<Error>, err: Error, origin: &'static str) {
    match tx.try_send(err) {
        Ok(()) => {}
        Err(TrySendError::Full(err)) => {
            counter!("errors_dropped_total", 1, "origin" => origin);
            warn!(origin, error = %err, "error channel full; dropping error");
        }
        Err(TrySendError::Closed(_)) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_error_channel_drops_without_blocking() {
        let (tx, mut rx) = mpsc::channel::<Error>(1);
        forward_error(&tx, Error::Internal("first".into()), "test");
        forward_error(&tx, Error::Internal("second".into()), "test");
        assert!(rx.try_recv().unwrap().to_string().contains("first"));
        assert!(rx.try_recv().is_err());
        drop(rx);
        // closed channels are ignored too
        forward_error(&tx, Error::Internal("third".into()), "test");
    }
}
