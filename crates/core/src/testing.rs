//! Backend-agnostic contract checks, shared by every backend's test suite.
//!
//! Enabled with the `testing` feature; the functions panic on the first violated property.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::client::ResourceClient;
use crate::hash::normalized;
use crate::opts::{DeleteOpts, ListOpts, ReadOpts, WatchOpts, WriteOpts};
use crate::resource::{Resource, Selector};

/// Builds a resource of the kind under test from `(namespace, name, payload)`.
pub type MakeResource<R> = fn(&str, &str, &str) -> R;

const WAIT: Duration = Duration::from_secs(5);

/// Round-trip, create-exists, version-conflict, delete, list-ordering and selector properties.
pub async fn crud_suite<R, C>(client: &C, namespace: &str, make: MakeResource<R>)
where
    R: Resource,
    C: ResourceClient<R> + ?Sized,
{
    client.register().await.expect("register");
    client.register().await.expect("register is idempotent");

    // round trip
    let written =
        client.write(make(namespace, "foo", "hello"), WriteOpts::default()).await.expect("create");
    assert!(!written.metadata().resource_version.is_empty(), "version assigned on create");
    let read = client.read(namespace, "foo", ReadOpts::default()).await.expect("read");
    assert_eq!(normalized(&read), normalized(&make(namespace, "foo", "hello")));
    assert_eq!(read.metadata().resource_version, written.metadata().resource_version);

    // create twice
    let err =
        client.write(make(namespace, "foo", "hello"), WriteOpts::default()).await.unwrap_err();
    assert!(err.is_exist(), "second create must fail with Exist, got {err}");

    // overwrite with the current version
    let mut update = make(namespace, "foo", "world");
    update.metadata_mut().resource_version = read.metadata().resource_version.clone();
    let updated = client.write(update, WriteOpts::overwrite()).await.expect("overwrite");
    assert_ne!(updated.metadata().resource_version, written.metadata().resource_version);
    let reread =
        client.read(namespace, "foo", ReadOpts::default()).await.expect("read after update");
    assert_eq!(normalized(&reread), normalized(&make(namespace, "foo", "world")));

    // stale version
    let mut stale = make(namespace, "foo", "stale");
    stale.metadata_mut().resource_version = written.metadata().resource_version.clone();
    let err = client.write(stale, WriteOpts::overwrite()).await.unwrap_err();
    assert!(err.is_resource_version(), "stale overwrite must fail, got {err}");

    // invalid names
    assert!(client.read(namespace, "Not_Valid", ReadOpts::default()).await.is_err());

    // list ordering
    for name in ["zeta", "alpha", "mid"] {
        client
            .write(make(namespace, name, name), WriteOpts::default())
            .await
            .expect("create for list");
    }
    let names = |list: &[R]| list.iter().map(|r| r.metadata().name.clone()).collect::<Vec<_>>();
    let first = client.list(namespace, ListOpts::default()).await.expect("list");
    assert_eq!(names(&first), vec!["alpha", "foo", "mid", "zeta"]);
    let second = client.list(namespace, ListOpts::default()).await.expect("list again");
    assert_eq!(first, second, "list is stable without writes");

    // delete
    client.delete(namespace, "foo", DeleteOpts::default()).await.expect("delete");
    let err = client.read(namespace, "foo", ReadOpts::default()).await.unwrap_err();
    assert!(err.is_not_exist(), "read after delete must be NotExist, got {err}");
    let err = client.delete(namespace, "foo", DeleteOpts::default()).await.unwrap_err();
    assert!(err.is_not_exist(), "second delete must be NotExist, got {err}");
    client
        .delete(namespace, "foo", DeleteOpts { ignore_not_exist: true })
        .await
        .expect("ignore_not_exist swallows missing");
    let after = client.list(namespace, ListOpts::default()).await.expect("list after delete");
    assert_eq!(names(&after), vec!["alpha", "mid", "zeta"]);

    // label selector
    let mut labelled = make(namespace, "labelled", "l");
    labelled.metadata_mut().labels.insert("tier".into(), "gold".into());
    client.write(labelled, WriteOpts::default()).await.expect("create labelled");
    let selected =
        client.list(namespace, ListOpts { selector: gold() }).await.expect("list by selector");
    assert_eq!(names(&selected), vec!["labelled"]);
    assert_eq!(selected[0].metadata().labels.get("tier").map(String::as_str), Some("gold"));
    let everything = client.list(namespace, ListOpts::default()).await.expect("list all");
    assert_eq!(names(&everything), vec!["alpha", "labelled", "mid", "zeta"]);
}

fn gold() -> Selector {
    Selector::from([("tier".to_string(), "gold".to_string())])
}

/// Watch emits the current list immediately, then a new full list after a write, and closes
/// its channels once cancelled.
pub async fn watch_suite<R, C>(
    client: &C,
    namespace: &str,
    make: MakeResource<R>,
    refresh_rate: Duration,
) where
    R: Resource,
    C: ResourceClient<R> + ?Sized,
{
    let cancel = CancellationToken::new();
    let opts = WatchOpts::new(cancel.clone()).with_refresh_rate(refresh_rate);
    let (mut lists, _errs) = client.watch(namespace, opts).await.expect("watch");

    let initial = next_before(&mut lists, Instant::now() + WAIT).await;
    let listed = client.list(namespace, ListOpts::default()).await.expect("list");
    assert_eq!(initial, listed, "initial emission equals list");

    client.write(make(namespace, "watched", "v1"), WriteOpts::default()).await.expect("create");
    let deadline = Instant::now() + WAIT;
    loop {
        let next = next_before(&mut lists, deadline).await;
        if next.iter().any(|r| r.metadata().name == "watched") {
            break;
        }
    }

    cancel.cancel();
    let deadline = Instant::now() + WAIT;
    loop {
        match tokio::time::timeout_at(deadline, lists.recv()).await.expect("closes after cancel") {
            Some(_) => continue,
            None => break,
        }
    }

    // a selector narrows every emission
    let cancel = CancellationToken::new();
    let mut opts = WatchOpts::new(cancel.clone()).with_refresh_rate(refresh_rate);
    opts.selector = gold();
    let (mut lists, _errs) = client.watch(namespace, opts.clone()).await.expect("selector watch");
    let initial = next_before(&mut lists, Instant::now() + WAIT).await;
    let listed = client.list(namespace, opts.list_opts()).await.expect("list by selector");
    assert_eq!(initial, listed, "initial emission equals selected list");
    let is_gold = |r: &R| r.metadata().labels.get("tier").map(String::as_str) == Some("gold");
    assert!(initial.iter().all(is_gold));

    client
        .write(make(namespace, "plain", "p"), WriteOpts::default())
        .await
        .expect("create unlabelled");
    let mut golden = make(namespace, "golden", "g");
    golden.metadata_mut().labels.insert("tier".into(), "gold".into());
    client.write(golden, WriteOpts::default()).await.expect("create labelled");
    let deadline = Instant::now() + WAIT;
    loop {
        let next = next_before(&mut lists, deadline).await;
        let leaked = next.iter().any(|r| r.metadata().name == "plain");
        assert!(!leaked, "unlabelled resource leaked into watch");
        if next.iter().any(|r| r.metadata().name == "golden") {
            break;
        }
    }
    cancel.cancel();
}

async fn next_before<R>(lists: &mut mpsc::Receiver<Vec<R>>, deadline: Instant) -> Vec<R> {
    tokio::time::timeout_at(deadline, lists.recv())
        .await
        .expect("emission in time")
        .expect("watch channel open")
}
