#![forbid(unsafe_code)]

use std::sync::Arc;

use reskit_core::kinds::Artifact;
use reskit_core::mocks::{MockData, MockResource};
use reskit_core::testing::crud_suite;
use reskit_core::{Error, ListOpts, ReadOpts, ResourceClient, WriteOpts};
use reskit_factory::{
    FileClientOpts, MemoryClientOpts, ResourceClientFactory, ResourceClientOptions,
    TypedResourceClient, VaultClientOpts,
};
use reskit_vault::VaultConfig;

fn memory_factory() -> ResourceClientFactory {
    ResourceClientFactory::new(ResourceClientOptions::Memory(MemoryClientOpts::default()))
}

#[tokio::test]
async fn memory_clients_share_the_factory_cache() {
    let factory = memory_factory();
    let writer = TypedResourceClient::<MockResource>::new(&factory).unwrap();
    let reader = TypedResourceClient::<MockResource>::new(&factory).unwrap();
    writer.write(MockResource::new("ns", "a").with_data("x"), WriteOpts::default()).await.unwrap();
    assert_eq!(reader.read("ns", "a", ReadOpts::default()).await.unwrap().data, "x");
    // other kinds stay separate
    let data = TypedResourceClient::<MockData>::new(&factory).unwrap();
    assert!(data.list("ns", ListOpts::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn base_client_passes_the_contract() {
    let typed = TypedResourceClient::<Artifact>::new(&memory_factory()).unwrap();
    assert_eq!(typed.kind(), "Artifact");
    let base = typed.base_client();
    crud_suite(base.as_ref(), "ns", |ns, name, v| Artifact::new(ns, name).with_entry("v", v)).await;
}

#[tokio::test]
async fn file_backend_through_factory() {
    let nanos =
        std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos();
    let root = std::env::temp_dir().join(format!("reskit-factory-{nanos}"));
    let factory =
        ResourceClientFactory::new(ResourceClientOptions::File(FileClientOpts::new(&root)));
    let client = factory.new_resource_client::<MockResource>().unwrap();
    let written = client.write(MockResource::new("ns", "a"), WriteOpts::default()).await.unwrap();
    assert_eq!(written.metadata.resource_version, "1");
    assert!(root.join("ns").join("a").is_file());
    let _ = std::fs::remove_dir_all(root);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn file_clients_from_one_factory_share_the_write_lock() {
    let nanos =
        std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos();
    let root = std::env::temp_dir().join(format!("reskit-factory-lock-{nanos}"));
    let factory =
        ResourceClientFactory::new(ResourceClientOptions::File(FileClientOpts::new(&root)));
    let seed = factory.new_resource_client::<MockResource>().unwrap();
    let created = seed.write(MockResource::new("ns", "a"), WriteOpts::default()).await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..8 {
        let client = factory.new_resource_client::<MockResource>().unwrap();
        let mut update = created.clone().with_data(format!("writer-{i}"));
        update.metadata.resource_version = created.metadata.resource_version.clone();
        tasks.push(tokio::spawn(async move { client.write(update, WriteOpts::overwrite()).await }));
    }
    let mut winners = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => winners += 1,
            Err(e) => assert!(e.is_resource_version(), "losers see a version conflict, got {e}"),
        }
    }
    assert_eq!(winners, 1);
    let stored = seed.read("ns", "a", ReadOpts::default()).await.unwrap();
    assert_eq!(stored.metadata.resource_version, "2");
    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn vault_needs_a_data_resource() {
    let opts = VaultClientOpts::http(VaultConfig::default(), "secret/reskit").unwrap();
    let factory = ResourceClientFactory::new(ResourceClientOptions::Vault(opts));
    let err =
        factory.new_resource_client::<MockResource>().err().expect("input kinds are rejected");
    match err {
        Error::UnsupportedKind { kind, backend, .. } => {
            assert_eq!(kind, "MockResource");
            assert_eq!(backend, "vault");
        }
        other => panic!("unexpected error {other}"),
    }
    assert!(factory.new_resource_client::<MockData>().is_ok());
}

#[tokio::test]
async fn from_client_wraps_an_existing_client() {
    let base = memory_factory().new_resource_client::<MockResource>().unwrap();
    let typed = TypedResourceClient::from_client(Arc::clone(&base));
    typed.write(MockResource::new("ns", "b"), WriteOpts::default()).await.unwrap();
    assert_eq!(base.list("ns", ListOpts::default()).await.unwrap().len(), 1);
}
