//! Content hashing insensitive to version churn.

use std::hash::Hasher;

use tracing::warn;

use crate::resource::{Resource, Status};

const FNV_OFFSET: u64 = 0xcbf29ce484222325; // 64-bit FNV-1a offset
const FNV_PRIME: u64 = 0x100000001b3;

/// 64-bit FNV-1a. Stable across processes and platforms, unlike `DefaultHasher`.
#[derive(Debug, Clone, Copy)]
pub struct Fnv1a(u64);

impl Default for Fnv1a {
    fn default() -> Self {
        Self(FNV_OFFSET)
    }
}

impl Hasher for Fnv1a {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        for b in bytes {
            self.0 ^= *b as u64;
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
    }
}

/// Clone with `resource_version` cleared and status reset.
pub fn normalized<R: Resource>(resource: &R) -> R {
    let mut clone = resource.clone();
    clone.metadata_mut().resource_version.clear();
    if let Some(input) = clone.as_input_mut() {
        input.set_status(Status::default());
    }
    clone
}

/// Feed the normalized form of `resource` into `hasher`.
pub fn hash_resource_into<R: Resource>(resource: &R, hasher: &mut Fnv1a) {
    let norm = normalized(resource);
    match serde_json::to_vec(&norm) {
        Ok(bytes) => hasher.write(&bytes),
        Err(e) => {
            // Only reachable for maps with non-string keys; fall back to the debug form.
            warn!(
                kind = R::KIND,
                name = %norm.metadata().reference(),
                error = %e,
                "hashing via debug representation"
            );
            hasher.write(format!("{:?}", norm).as_bytes());
        }
    }
    // separator so adjacent resources cannot run together
    hasher.write_u8(0xff);
}

pub fn hash_resource<R: Resource>(resource: &R) -> u64 {
    let mut h = Fnv1a::default();
    hash_resource_into(resource, &mut h);
    h.finish()
}
