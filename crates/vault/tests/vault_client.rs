#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reskit_core::mocks::MockData;
use reskit_core::testing::{crud_suite, watch_suite};
use reskit_core::{Error, ListOpts, ReadOpts, ResourceClient, Result, WriteOpts};
use reskit_vault::{SecretData, VaultKv, VaultResourceClient, METADATA_FIELD};

/// KV v1 stand-in: flat path -> secret, LIST derived from path prefixes.
#[derive(Default)]
struct FakeVault {
    secrets: Mutex<BTreeMap<String, SecretData>>,
}

#[async_trait::async_trait]
impl VaultKv for FakeVault {
    async fn read(&self, path: &str) -> Result<Option<SecretData>> {
        Ok(self.secrets.lock().unwrap().get(path).cloned())
    }

    async fn write(&self, path: &str, data: SecretData) -> Result<()> {
        self.secrets.lock().unwrap().insert(path.to_string(), data);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.secrets.lock().unwrap().remove(path);
        Ok(())
    }

    async fn list_keys(&self, path: &str) -> Result<Vec<String>> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let secrets = self.secrets.lock().unwrap();
        let mut keys: Vec<String> = secrets
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .map(|rest| match rest.split_once('/') {
                Some((folder, _)) => format!("{folder}/"),
                None => rest.to_string(),
            })
            .collect();
        keys.dedup();
        Ok(keys)
    }
}

fn data(namespace: &str, name: &str, value: &str) -> MockData {
    MockData::new(namespace, name).with_entry("value", value)
}

fn client(fake: &Arc<FakeVault>) -> VaultResourceClient<MockData> {
    VaultResourceClient::new(Arc::clone(fake) as Arc<dyn VaultKv>, "secret/reskit").unwrap()
}

#[tokio::test]
async fn crud_contract() {
    let fake = Arc::new(FakeVault::default());
    crud_suite(&client(&fake), "ns1", data).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn watch_contract() {
    let fake = Arc::new(FakeVault::default());
    watch_suite(&client(&fake), "ns1", data, Duration::from_millis(20)).await;
}

#[tokio::test]
async fn secret_layout_has_fields_and_metadata() {
    let fake = Arc::new(FakeVault::default());
    let c = client(&fake);
    let db =
        MockData::new("team-a", "db").with_entry("user", "admin").with_entry("pass", "hunter2");
    let written = c.write(db, WriteOpts::default()).await.unwrap();
    assert_eq!(written.metadata.resource_version, "1");

    let stored =
        fake.read("secret/reskit/team-a/db").await.unwrap().expect("secret at root/ns/name");
    assert_eq!(stored.get("user").map(String::as_str), Some("admin"));
    assert_eq!(stored.get("pass").map(String::as_str), Some("hunter2"));
    let meta: serde_json::Value = serde_json::from_str(&stored[METADATA_FIELD]).unwrap();
    assert_eq!(meta["name"], "db");
    assert_eq!(meta["namespace"], "team-a");
    assert_eq!(meta["resourceVersion"], "1");
}

#[tokio::test]
async fn list_ignores_sub_folders() {
    let fake = Arc::new(FakeVault::default());
    let c = client(&fake);
    c.write(data("ns", "a", "1"), WriteOpts::default()).await.unwrap();
    fake.write("secret/reskit/ns/folder/inner", SecretData::new()).await.unwrap();
    let listed = c.list("ns", ListOpts::default()).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].metadata.name, "a");
}

#[tokio::test]
async fn reserved_metadata_key_is_rejected() {
    let fake = Arc::new(FakeVault::default());
    let c = client(&fake);
    let clash =
        MockData::new("ns", "a").with_entry(METADATA_FIELD, "user-value").with_entry("k", "v");
    let err = c.write(clash, WriteOpts::default()).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "got {err}");
    assert!(fake.read("secret/reskit/ns/a").await.unwrap().is_none());
    assert!(c.read("ns", "a", ReadOpts::default()).await.unwrap_err().is_not_exist());
}

#[tokio::test]
async fn invalid_namespace_never_reaches_vault() {
    let fake = Arc::new(FakeVault::default());
    let c = client(&fake);
    let err = c.write(data("ns/evil", "a", "1"), WriteOpts::default()).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "got {err}");
    assert!(fake.secrets.lock().unwrap().is_empty());
}
