//! Resource model: metadata, status, capability traits and list helpers.

use std::collections::BTreeMap;
use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// Label selector: every pair must be present with an equal value.
pub type Selector = BTreeMap<String, String>;

/// Identity and bookkeeping carried by every resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    /// Opaque, backend-assigned optimistic-concurrency token. Empty before the first write.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_version: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Metadata {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { name: name.into(), namespace: namespace.into(), ..Default::default() }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// `namespace.name`, the form used in error messages and logs.
    pub fn reference(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }
}

/// Acceptance state reported for an input resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    #[default]
    Pending,
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    #[serde(default)]
    pub state: State,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reported_by: String,
}

impl Status {
    pub fn accepted(reported_by: impl Into<String>) -> Self {
        Self { state: State::Accepted, reason: String::new(), reported_by: reported_by.into() }
    }

    pub fn rejected(reason: impl Into<String>, reported_by: impl Into<String>) -> Self {
        Self { state: State::Rejected, reason: reason.into(), reported_by: reported_by.into() }
    }
}

/// A named, namespaced configuration object.
///
/// The metadata field must serialize as `metadata` and, for input resources, the status as
/// `status`; the Kubernetes CRD backend relies on these names when splitting a resource into
/// spec and status. Maps inside a resource should be ordered (`BTreeMap`) so that the
/// serialized form, and therefore the snapshot hash, is deterministic.
pub trait Resource:
    Clone + Default + PartialEq + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Stable type name, e.g. `"Upstream"`.
    const KIND: &'static str;

    fn metadata(&self) -> &Metadata;

    fn metadata_mut(&mut self) -> &mut Metadata;

    fn set_metadata(&mut self, meta: Metadata) {
        *self.metadata_mut() = meta;
    }

    fn as_input(&self) -> Option<&dyn InputResource> {
        None
    }

    fn as_input_mut(&mut self) -> Option<&mut dyn InputResource> {
        None
    }

    fn as_data(&self) -> Option<&dyn DataResource> {
        None
    }

    fn as_data_mut(&mut self) -> Option<&mut dyn DataResource> {
        None
    }

    /// Whether this kind carries a status (checked on a default value).
    fn is_input_resource() -> bool {
        Self::default().as_input().is_some()
    }

    /// Whether this kind is a flat string map (checked on a default value).
    fn is_data_resource() -> bool {
        Self::default().as_data().is_some()
    }
}

/// Capability: resources users write and controllers report status on.
pub trait InputResource {
    fn status(&self) -> &Status;
    fn set_status(&mut self, status: Status);
}

/// Capability: resources that are a flat string-to-string map (ConfigMap/Secret shaped).
pub trait DataResource {
    fn data(&self) -> &BTreeMap<String, String>;
    fn set_data(&mut self, data: BTreeMap<String, String>);
}

/// Validate a resource name (DNS-1123 subdomain rules).
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Validation("name cannot be empty".into()));
    }
    if name.len() > 253 {
        return Err(Error::Validation(format!("name {:?} is longer than 253 characters", name)));
    }
    let bytes = name.as_bytes();
    let edge_ok = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !edge_ok(bytes[0]) || !edge_ok(bytes[bytes.len() - 1]) {
        return Err(Error::Validation(format!(
            "name {:?} must start and end with a lowercase alphanumeric character",
            name
        )));
    }
    let legal = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.';
    if let Some(bad) = name.chars().find(|c| !legal(*c)) {
        return Err(Error::Validation(format!(
            "name {:?} contains illegal character {:?}",
            name, bad
        )));
    }
    Ok(())
}

pub fn selector_matches(selector: &Selector, labels: &BTreeMap<String, String>) -> bool {
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

/// Canonical order: `(namespace, name)`.
pub fn sort_resources<R: Resource>(list: &mut [R]) {
    list.sort_by(|a, b| {
        let (a, b) = (a.metadata(), b.metadata());
        a.namespace.cmp(&b.namespace).then_with(|| a.name.cmp(&b.name))
    });
}

pub fn find<'a, R: Resource>(list: &'a [R], namespace: &str, name: &str) -> Option<&'a R> {
    list.iter().find(|r| r.metadata().namespace == namespace && r.metadata().name == name)
}

pub fn filter_by_namespaces<R: Resource>(list: &[R], namespaces: &[&str]) -> Vec<R> {
    list.iter().filter(|r| namespaces.contains(&r.metadata().namespace.as_str())).cloned().collect()
}
