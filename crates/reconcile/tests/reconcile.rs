#![forbid(unsafe_code)]

use std::sync::Arc;

use reskit_core::mocks::MockResource;
use reskit_core::{
    Error, ListOpts, Metadata, ReadOpts, ResourceClient, Selector, State, Status, WriteOpts,
};
use reskit_memory::{InMemoryResourceCache, MemoryResourceClient};
use reskit_reconcile::{ReconcileSummary, Reconciler, TransitionFn};

type Client = Arc<dyn ResourceClient<MockResource>>;

fn client() -> Client {
    Arc::new(MemoryResourceClient::<MockResource>::new(InMemoryResourceCache::new()))
}

async fn seed(client: &Client, resource: MockResource) -> MockResource {
    client.write(resource, WriteOpts::default()).await.expect("seed")
}

async fn names(client: &Client, ns: &str) -> Vec<(String, String)> {
    client
        .list(ns, ListOpts::default())
        .await
        .expect("list")
        .into_iter()
        .map(|r| (r.metadata.name, r.data))
        .collect()
}

#[tokio::test]
async fn creates_updates_and_deletes() {
    let client = client();
    seed(&client, MockResource::new("ns", "keep").with_data("old")).await;
    seed(&client, MockResource::new("ns", "stale").with_data("x")).await;
    seed(&client, MockResource::new("other", "untouched")).await;

    let reconciler = Reconciler::new(Arc::clone(&client));
    let desired = vec![
        MockResource::new("ns", "keep").with_data("new"),
        MockResource::new("ns", "fresh").with_data("y"),
    ];
    let summary = reconciler.reconcile("ns", desired, None, ListOpts::default()).await.unwrap();

    assert_eq!(summary, ReconcileSummary { created: 1, updated: 1, unchanged: 0, deleted: 1 });
    assert_eq!(
        names(&client, "ns").await,
        vec![("fresh".to_string(), "y".to_string()), ("keep".to_string(), "new".to_string())]
    );
    assert_eq!(names(&client, "other").await.len(), 1);

    let kept = client.read("ns", "keep", ReadOpts::default()).await.unwrap();
    assert_eq!(kept.metadata.resource_version, "2");
}

#[tokio::test]
async fn empty_namespace_means_default() {
    let client = client();
    let reconciler = Reconciler::new(Arc::clone(&client));
    let desired = vec![MockResource { metadata: Metadata::new("", "a"), ..Default::default() }];
    let summary = reconciler.reconcile("", desired, None, ListOpts::default()).await.unwrap();
    assert_eq!(summary.created, 1);
    assert!(client.read("default", "a", ReadOpts::default()).await.is_ok());
}

#[tokio::test]
async fn transition_can_skip_updates() {
    let client = client();
    seed(&client, MockResource::new("ns", "same").with_data("v")).await;
    seed(&client, MockResource::new("ns", "diff").with_data("v")).await;

    let reconciler = Reconciler::new(Arc::clone(&client));
    let only_changed: TransitionFn<'_, MockResource> =
        &|original, desired| Ok(original.data != desired.data);
    let desired = vec![
        MockResource::new("ns", "same").with_data("v"),
        MockResource::new("ns", "diff").with_data("w"),
    ];
    let summary = reconciler
        .reconcile("ns", desired, Some(only_changed), ListOpts::default())
        .await
        .unwrap();

    assert_eq!(summary, ReconcileSummary { created: 0, updated: 1, unchanged: 1, deleted: 0 });
    let same = client.read("ns", "same", ReadOpts::default()).await.unwrap();
    assert_eq!(same.metadata.resource_version, "1");
}

#[tokio::test]
async fn transition_error_aborts() {
    let client = client();
    seed(&client, MockResource::new("ns", "a")).await;
    let reconciler = Reconciler::new(Arc::clone(&client));
    let refuse: TransitionFn<'_, MockResource> = &|_, _| Err(Error::Internal("refused".into()));
    let err = reconciler
        .reconcile("ns", vec![MockResource::new("ns", "a")], Some(refuse), ListOpts::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("refused"));
}

#[tokio::test]
async fn updates_reset_status() {
    let client = client();
    let mut accepted = MockResource::new("ns", "a");
    accepted.status = Status::accepted("gloo");
    seed(&client, accepted).await;

    let mut desired = MockResource::new("ns", "a").with_data("next");
    desired.status = Status::rejected("bad", "someone");
    Reconciler::new(Arc::clone(&client))
        .reconcile("ns", vec![desired], None, ListOpts::default())
        .await
        .unwrap();

    let stored = client.read("ns", "a", ReadOpts::default()).await.unwrap();
    assert_eq!(stored.status.state, State::Pending);
    assert_eq!(stored.data, "next");
}

#[tokio::test]
async fn deletion_is_scoped_by_selector() {
    let client = client();
    let mut owned = MockResource::new("ns", "owned");
    owned.metadata = owned.metadata.with_label("owner", "me");
    seed(&client, owned).await;
    seed(&client, MockResource::new("ns", "foreign")).await;

    let selector: Selector = [("owner".to_string(), "me".to_string())].into_iter().collect();
    let summary = Reconciler::new(Arc::clone(&client))
        .reconcile("ns", Vec::new(), None, ListOpts { selector })
        .await
        .unwrap();

    assert_eq!(summary.deleted, 1);
    let left: Vec<_> = names(&client, "ns").await.into_iter().map(|(n, _)| n).collect();
    assert_eq!(left, vec!["foreign"]);
}

#[tokio::test]
async fn reconcile_is_idempotent() {
    let client = client();
    let reconciler = Reconciler::new(Arc::clone(&client));
    let desired = || vec![MockResource::new("ns", "a"), MockResource::new("ns", "b")];

    let first = reconciler.reconcile("ns", desired(), None, ListOpts::default()).await.unwrap();
    assert_eq!(first.created, 2);
    let second = reconciler.reconcile("ns", desired(), None, ListOpts::default()).await.unwrap();
    assert_eq!(second, ReconcileSummary { created: 0, updated: 2, unchanged: 0, deleted: 0 });
}
