//! reskit core types: the resource model, error taxonomy, operation options and the
//! storage-agnostic `ResourceClient` contract every backend implements.

#![forbid(unsafe_code)]

pub mod client;
pub mod errors;
pub mod hash;
pub mod kinds;
pub mod mocks;
pub mod opts;
pub mod resource;
#[cfg(feature = "testing")]
pub mod testing;

pub use client::ResourceClient;
pub use errors::{Error, ErrorKind, Result};
pub use opts::{
    default_namespace_if_empty, resolve_namespace, DeleteOpts, ListOpts, ReadOpts, WatchOpts,
    WriteOpts,
    DEFAULT_NAMESPACE, DEFAULT_REFRESH_RATE,
};
pub use resource::{
    filter_by_namespaces, find, selector_matches, sort_resources, validate_name, DataResource,
    InputResource, Metadata, Resource, Selector, State, Status,
};

pub mod prelude {
    pub use super::{
        DataResource, DeleteOpts, Error, InputResource, ListOpts, Metadata, ReadOpts, Resource,
        ResourceClient, Result, Selector, Status, WatchOpts, WriteOpts,
    };
}

/// Bump a decimal resource version: `""` becomes `"1"`, `"7"` becomes `"8"`.
///
/// Used by backends without a native version counter (memory, file, vault). A version that
/// is not a decimal integer is treated as zero.
pub fn next_resource_version(current: &str) -> String {
    let n: u64 = current.parse().unwrap_or(0);
    n.saturating_add(1).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_version_increments() {
        assert_eq!(next_resource_version(""), "1");
        assert_eq!(next_resource_version("1"), "2");
        assert_eq!(next_resource_version("41"), "42");
        assert_eq!(next_resource_version("garbage"), "1");
    }
}
