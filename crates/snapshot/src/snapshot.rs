//! Immutable, multi-kind view of every watched resource.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::hash::Hasher;
use std::sync::Arc;

use reskit_core::hash::{hash_resource_into, Fnv1a};
use reskit_core::{Metadata, Resource};

/// A resource of any kind, as stored in a [`Snapshot`].
pub trait AnyResource: Debug + Send + Sync + 'static {
    fn resource_kind(&self) -> &'static str;
    fn resource_metadata(&self) -> &Metadata;
    fn as_any(&self) -> &dyn Any;
    /// Feed the version-insensitive form into `hasher`.
    fn hash_into(&self, hasher: &mut Fnv1a);
}

impl<R: Resource> AnyResource for R {
    fn resource_kind(&self) -> &'static str {
        R::KIND
    }

    fn resource_metadata(&self) -> &Metadata {
        self.metadata()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn hash_into(&self, hasher: &mut Fnv1a) {
        hash_resource_into(self, hasher);
    }
}

pub type Partition = Vec<Arc<dyn AnyResource>>;

/// kind -> namespace -> resources sorted by name.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    kinds: BTreeMap<&'static str, BTreeMap<String, Partition>>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the `(R::KIND, namespace)` partition.
    pub fn set_namespace_list<R: Resource>(&mut self, namespace: &str, list: Vec<R>) {
        let erased = list.into_iter().map(|r| Arc::new(r) as Arc<dyn AnyResource>).collect();
        self.set_partition(R::KIND, namespace, erased);
    }

    pub fn set_partition(&mut self, kind: &'static str, namespace: &str, mut resources: Partition) {
        resources.sort_by(|a, b| a.resource_metadata().name.cmp(&b.resource_metadata().name));
        self.kinds.entry(kind).or_default().insert(namespace.to_string(), resources);
    }

    /// Every `R` across namespaces, ordered by `(namespace, name)`.
    pub fn list<R: Resource>(&self) -> Vec<R> {
        self.kinds
            .get(R::KIND)
            .into_iter()
            .flat_map(|by_ns| by_ns.values())
            .flat_map(|part| part.iter())
            .filter_map(|r| r.as_any().downcast_ref::<R>().cloned())
            .collect()
    }

    pub fn list_in<R: Resource>(&self, namespace: &str) -> Vec<R> {
        self.kinds
            .get(R::KIND)
            .and_then(|by_ns| by_ns.get(namespace))
            .into_iter()
            .flat_map(|part| part.iter())
            .filter_map(|r| r.as_any().downcast_ref::<R>().cloned())
            .collect()
    }

    pub fn find<R: Resource>(&self, namespace: &str, name: &str) -> Option<R> {
        self.kinds
            .get(R::KIND)?
            .get(namespace)?
            .iter()
            .find(|r| r.resource_metadata().name == name)
            .and_then(|r| r.as_any().downcast_ref::<R>().cloned())
    }

    pub fn kinds(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.kinds.keys().copied()
    }

    pub fn namespaces(&self, kind: &str) -> impl Iterator<Item = &str> + '_ {
        self.kinds.get(kind).into_iter().flat_map(|by_ns| by_ns.keys().map(String::as_str))
    }

    /// Total resources across kinds and namespaces.
    pub fn len(&self) -> usize {
        self.kinds.values().flat_map(|by_ns| by_ns.values()).map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Content hash. Ignores resource versions and status, so version churn alone does not
    /// change it.
    pub fn hash(&self) -> u64 {
        let mut h = Fnv1a::default();
        for (kind, by_ns) in &self.kinds {
            h.write(kind.as_bytes());
            h.write_u8(0xfe);
            for (namespace, part) in by_ns {
                h.write(namespace.as_bytes());
                h.write_u8(0xfe);
                for r in part {
                    r.hash_into(&mut h);
                }
            }
        }
        h.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reskit_core::mocks::{MockData, MockResource};
    use reskit_core::Status;

    fn mock(ns: &str, name: &str, data: &str) -> MockResource {
        MockResource::new(ns, name).with_data(data)
    }

    #[test]
    fn typed_access_by_kind_and_namespace() {
        let mut s = Snapshot::new();
        s.set_namespace_list("ns2", vec![mock("ns2", "b", "")]);
        s.set_namespace_list("ns1", vec![mock("ns1", "z", ""), mock("ns1", "a", "")]);
        s.set_namespace_list("ns1", vec![MockData::new("ns1", "cfg")]);

        let names: Vec<_> =
            s.list::<MockResource>().into_iter().map(|r| r.metadata.reference()).collect();
        assert_eq!(names, vec!["ns1.a", "ns1.z", "ns2.b"]);
        assert_eq!(s.list_in::<MockResource>("ns2").len(), 1);
        assert_eq!(s.list_in::<MockData>("ns1").len(), 1);
        assert!(s.list_in::<MockData>("ns2").is_empty());
        let found = s.find::<MockResource>("ns1", "z").map(|r| r.metadata.name);
        assert_eq!(found, Some("z".to_string()));
        assert_eq!(s.kinds().collect::<Vec<_>>(), vec!["MockData", "MockResource"]);
        assert_eq!(s.namespaces("MockResource").collect::<Vec<_>>(), vec!["ns1", "ns2"]);
        assert_eq!(s.len(), 4);
    }

    #[test]
    fn hash_ignores_version_churn() {
        let mut a = Snapshot::new();
        a.set_namespace_list("ns", vec![mock("ns", "a", "x")]);

        let mut churned = mock("ns", "a", "x");
        churned.metadata.resource_version = "99".into();
        churned.status = Status::accepted("gloo");
        let mut b = Snapshot::new();
        b.set_namespace_list("ns", vec![churned]);
        assert_eq!(a.hash(), b.hash());

        b.set_namespace_list("ns", vec![mock("ns", "a", "y")]);
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn empty_partition_differs_from_missing() {
        let empty = Snapshot::new();
        let mut with_partition = Snapshot::new();
        with_partition.set_namespace_list::<MockResource>("ns", Vec::new());
        assert_ne!(empty.hash(), with_partition.hash());
        assert!(with_partition.is_empty());
    }

    #[test]
    fn clones_are_independent() {
        let mut a = Snapshot::new();
        a.set_namespace_list("ns", vec![mock("ns", "a", "")]);
        let frozen = a.clone();
        a.set_namespace_list::<MockResource>("ns", Vec::new());
        assert_eq!(frozen.len(), 1);
        assert_eq!(a.len(), 0);
    }
}
