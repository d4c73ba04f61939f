//! General-purpose kinds shipped with the core crate.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::resource::{DataResource, Metadata, Resource};

/// A named bag of string key/values: the shape stored in ConfigMaps, Secrets and Vault.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub metadata: Metadata,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl Artifact {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { metadata: Metadata::new(namespace, name), data: BTreeMap::new() }
    }

    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

impl Resource for Artifact {
    const KIND: &'static str = "Artifact";

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

impl DataResource for Artifact {
    fn data(&self) -> &BTreeMap<String, String> {
        &self.data
    }

    fn set_data(&mut self, data: BTreeMap<String, String>) {
        self.data = data;
    }
}
