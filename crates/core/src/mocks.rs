//! Small resource kinds used by tests across the workspace.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::resource::{DataResource, InputResource, Metadata, Resource, Status};

/// Input resource with a single string payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockResource {
    pub metadata: Metadata,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub status: Status,
}

impl MockResource {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { metadata: Metadata::new(namespace, name), ..Default::default() }
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = data.into();
        self
    }
}

impl Resource for MockResource {
    const KIND: &'static str = "MockResource";

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    fn as_input(&self) -> Option<&dyn InputResource> {
        Some(self)
    }

    fn as_input_mut(&mut self) -> Option<&mut dyn InputResource> {
        Some(self)
    }
}

impl InputResource for MockResource {
    fn status(&self) -> &Status {
        &self.status
    }

    fn set_status(&mut self, status: Status) {
        self.status = status;
    }
}

/// Data resource (secret-shaped).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockData {
    pub metadata: Metadata,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl MockData {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { metadata: Metadata::new(namespace, name), data: BTreeMap::new() }
    }

    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

impl Resource for MockData {
    const KIND: &'static str = "MockData";

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    fn as_data(&self) -> Option<&dyn DataResource> {
        Some(self)
    }

    fn as_data_mut(&mut self) -> Option<&mut dyn DataResource> {
        Some(self)
    }
}

impl DataResource for MockData {
    fn data(&self) -> &BTreeMap<String, String> {
        &self.data
    }

    fn set_data(&mut self, data: BTreeMap<String, String>) {
        self.data = data;
    }
}
