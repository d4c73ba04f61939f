#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use reskit_core::mocks::MockResource;
use reskit_core::testing::{crud_suite, watch_suite};
use reskit_core::{ListOpts, ReadOpts, ResourceClient, WriteOpts};
use reskit_file::FileResourceClient;

fn temp_root(tag: &str) -> PathBuf {
    let nanos =
        std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos();
    std::env::temp_dir().join(format!("reskit-file-{tag}-{nanos}"))
}

fn mock(namespace: &str, name: &str, data: &str) -> MockResource {
    MockResource::new(namespace, name).with_data(data)
}

#[tokio::test]
async fn crud_contract() {
    let root = temp_root("crud");
    let client = FileResourceClient::<MockResource>::new(&root);
    crud_suite(&client, "ns1", mock).await;
    let _ = std::fs::remove_dir_all(root);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn watch_contract() {
    let root = temp_root("watch");
    let client = FileResourceClient::<MockResource>::new(&root);
    client.register().await.unwrap();
    watch_suite(&client, "ns1", mock, Duration::from_millis(20)).await;
    let _ = std::fs::remove_dir_all(root);
}

#[tokio::test]
async fn one_yaml_file_per_resource() {
    let root = temp_root("layout");
    let client = FileResourceClient::<MockResource>::new(&root);
    client.write(mock("team-a", "gateway", "hello"), WriteOpts::default()).await.unwrap();

    let path = root.join("team-a").join("gateway");
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("name: gateway"), "yaml on disk: {text}");
    assert!(text.contains("hello"));
    let leftovers: Vec<_> = std::fs::read_dir(root.join("team-a"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(leftovers, vec!["gateway".to_string()], "no temp file left behind");
    let _ = std::fs::remove_dir_all(root);
}

#[tokio::test]
async fn missing_namespace_lists_empty() {
    let root = temp_root("empty");
    let client = FileResourceClient::<MockResource>::new(&root);
    let listed = client.list("nobody", ListOpts::default()).await.unwrap();
    assert!(listed.is_empty());
}

#[tokio::test]
async fn stray_files_are_skipped() {
    let root = temp_root("stray");
    let client = FileResourceClient::<MockResource>::new(&root);
    client.write(mock("ns", "real", "x"), WriteOpts::default()).await.unwrap();
    std::fs::write(root.join("ns").join(".real.tmp"), "garbage: [").unwrap();
    std::fs::create_dir_all(root.join("ns").join("nested")).unwrap();
    let listed = client.list("ns", ListOpts::default()).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].metadata.name, "real");
    let _ = std::fs::remove_dir_all(root);
}

#[tokio::test]
async fn versions_survive_a_new_client() {
    let root = temp_root("reopen");
    let first = FileResourceClient::<MockResource>::new(&root);
    let created = first.write(mock("ns", "foo", "a"), WriteOpts::default()).await.unwrap();
    assert_eq!(created.metadata.resource_version, "1");

    let second = FileResourceClient::<MockResource>::new(&root);
    let read = second.read("ns", "foo", ReadOpts::default()).await.unwrap();
    assert_eq!(read, created);
    let updated = second.write(read.with_data("b"), WriteOpts::overwrite()).await.unwrap();
    assert_eq!(updated.metadata.resource_version, "2");
    let _ = std::fs::remove_dir_all(root);
}
