#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use reskit_core::client::WatchChannels;
use reskit_core::mocks::{MockData, MockResource};
use reskit_core::{
    DeleteOpts, Error, ListOpts, ReadOpts, ResourceClient, Result, WatchOpts, WriteOpts,
};
use reskit_factory::{
    MemoryClientOpts, ResourceClientFactory, ResourceClientOptions, TypedResourceClient,
};
use reskit_snapshot::{Snapshot, SnapshotEmitter, SnapshotStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

fn factory() -> ResourceClientFactory {
    ResourceClientFactory::new(ResourceClientOptions::Memory(MemoryClientOpts::default()))
}

fn namespaces() -> Vec<String> {
    vec!["ns1".to_string(), "ns2".to_string()]
}

async fn next(stream: &mut SnapshotStream) -> Arc<Snapshot> {
    tokio::time::timeout(WAIT, stream.snapshots.recv())
        .await
        .expect("snapshot in time")
        .expect("stream open")
}

/// Receive snapshots until `pred` holds, checking that consecutive snapshots differ.
async fn until(
    stream: &mut SnapshotStream,
    last_hash: &mut u64,
    pred: impl Fn(&Snapshot) -> bool,
) -> Arc<Snapshot> {
    loop {
        let snap = next(stream).await;
        assert_ne!(snap.hash(), *last_hash, "consecutive snapshots must differ");
        *last_hash = snap.hash();
        if pred(&snap) {
            return snap;
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tracks_adds_and_deletes_across_namespaces() {
    let factory = factory();
    let client = TypedResourceClient::<MockResource>::new(&factory).unwrap();
    let emitter = SnapshotEmitter::default().with_client(client.clone());
    emitter.register().await.unwrap();

    let cancel = CancellationToken::new();
    let mut stream =
        emitter.snapshots(&namespaces(), WatchOpts::new(cancel.clone())).await.unwrap();

    let first = next(&mut stream).await;
    assert!(first.is_empty());
    assert_eq!(first.namespaces("MockResource").collect::<Vec<_>>(), vec!["ns1", "ns2"]);
    let mut last_hash = first.hash();

    for ns in ["ns1", "ns2"] {
        client.write(MockResource::new(ns, "angela"), WriteOpts::default()).await.unwrap();
    }
    let snap = until(&mut stream, &mut last_hash, |s| s.list::<MockResource>().len() == 2).await;
    assert!(snap.find::<MockResource>("ns1", "angela").is_some());
    assert!(snap.find::<MockResource>("ns2", "angela").is_some());
    assert_eq!(stream.latest().hash(), snap.hash());

    for ns in ["ns1", "ns2"] {
        client.delete(ns, "angela", DeleteOpts::default()).await.unwrap();
    }
    until(&mut stream, &mut last_hash, |s| s.list::<MockResource>().is_empty()).await;

    cancel.cancel();
    let closed = tokio::time::timeout(WAIT, async {
        while stream.snapshots.recv().await.is_some() {}
        while stream.errors.recv().await.is_some() {}
    })
    .await;
    assert!(closed.is_ok(), "both channels close after cancellation");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn version_churn_is_not_published() {
    let factory = factory();
    let client = TypedResourceClient::<MockResource>::new(&factory).unwrap();
    let emitter = SnapshotEmitter::default().with_client(client.clone());
    let cancel = CancellationToken::new();

    let stable = MockResource::new("ns1", "stable").with_data("x");
    let seeded = client.write(stable, WriteOpts::default()).await.unwrap();
    let mut stream =
        emitter.snapshots(&namespaces(), WatchOpts::new(cancel.clone())).await.unwrap();
    let first = next(&mut stream).await;
    assert_eq!(first.len(), 1);

    // same content, new version
    client.write(seeded, WriteOpts::overwrite()).await.unwrap();
    client.write(MockResource::new("ns2", "marker"), WriteOpts::default()).await.unwrap();

    let after = next(&mut stream).await;
    assert!(after.find::<MockResource>("ns2", "marker").is_some(), "churn alone must not publish");
    assert_ne!(after.hash(), first.hash());
    cancel.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn several_kinds_share_one_snapshot() {
    let factory = factory();
    let inputs = TypedResourceClient::<MockResource>::new(&factory).unwrap();
    let data = TypedResourceClient::<MockData>::new(&factory).unwrap();
    let emitter = SnapshotEmitter::default().with_client(inputs.clone()).with_client(data.clone());
    assert_eq!(emitter.kinds(), vec!["MockResource", "MockData"]);

    let cancel = CancellationToken::new();
    let mut stream = emitter.snapshots(&[], WatchOpts::new(cancel.clone())).await.unwrap();
    let mut last_hash = next(&mut stream).await.hash();

    inputs.write(MockResource::new("", "a"), WriteOpts::default()).await.unwrap();
    data.write(MockData::new("", "b").with_entry("k", "v"), WriteOpts::default()).await.unwrap();
    let snap = until(&mut stream, &mut last_hash, |s| s.len() == 2).await;
    assert_eq!(snap.list_in::<MockResource>("default").len(), 1);
    assert_eq!(snap.list_in::<MockData>("default").len(), 1);
    cancel.cancel();
}

/// Emits one empty list, then one error, for every watch.
struct FlakyClient;

#[async_trait::async_trait]
impl ResourceClient<MockResource> for FlakyClient {
    async fn register(&self) -> Result<()> {
        Ok(())
    }
    async fn read(&self, namespace: &str, name: &str, _: ReadOpts) -> Result<MockResource> {
        Err(Error::not_exist(namespace, name))
    }
    async fn write(&self, r: MockResource, _: WriteOpts) -> Result<MockResource> {
        Ok(r)
    }
    async fn delete(&self, _: &str, _: &str, _: DeleteOpts) -> Result<()> {
        Ok(())
    }
    async fn list(&self, _: &str, _: ListOpts) -> Result<Vec<MockResource>> {
        Ok(Vec::new())
    }
    async fn watch(&self, namespace: &str, opts: WatchOpts) -> Result<WatchChannels<MockResource>> {
        if namespace == "broken" {
            return Err(Error::Internal("cannot watch".into()));
        }
        let (list_tx, list_rx) = mpsc::channel(1);
        let (err_tx, err_rx) = mpsc::channel(1);
        tokio::spawn(async move {
            let _ = list_tx.send(Vec::new()).await;
            let _ = err_tx.send(Error::Internal("boom".into())).await;
            opts.cancel.cancelled().await;
        });
        Ok((list_rx, err_rx))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn watch_errors_carry_provenance() {
    let client = TypedResourceClient::from_client(Arc::new(FlakyClient));
    let emitter = SnapshotEmitter::default().with_client(client);
    let cancel = CancellationToken::new();
    let mut stream =
        emitter.snapshots(&["ns1".to_string()], WatchOpts::new(cancel.clone())).await.unwrap();

    let err = tokio::time::timeout(WAIT, stream.errors.recv())
        .await
        .expect("error in time")
        .expect("open");
    match &err {
        Error::Watch { provenance, source } => {
            assert_eq!(provenance, "ns1-MockResource");
            assert!(source.to_string().contains("boom"));
        }
        other => panic!("expected a watch error, got {other:?}"),
    }
    assert!(next(&mut stream).await.is_empty());
    cancel.cancel();
}

#[tokio::test]
async fn setup_failure_is_returned() {
    let client = TypedResourceClient::from_client(Arc::new(FlakyClient));
    let emitter = SnapshotEmitter::default().with_client(client);
    let cancel = CancellationToken::new();
    let namespaces = ["ns1".to_string(), "broken".to_string()];
    let res = emitter.snapshots(&namespaces, WatchOpts::new(cancel)).await;
    let err = res.err().expect("setup error surfaces");
    assert!(err.to_string().contains("cannot watch"));
}
