//! Per-operation options.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::errors::Result;
use crate::resource::{validate_name, Selector};

/// Namespace used whenever a caller leaves it empty.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Poll interval / long-poll budget used when `WatchOpts::refresh_rate` is zero.
pub const DEFAULT_REFRESH_RATE: Duration = Duration::from_secs(30);

pub fn default_namespace_if_empty(namespace: &str) -> String {
    if namespace.is_empty() {
        DEFAULT_NAMESPACE.to_string()
    } else {
        namespace.to_string()
    }
}

/// Default an empty namespace, then check it follows the same rules as names. Backends that
/// build keys or paths from the namespace rely on this.
pub fn resolve_namespace(namespace: &str) -> Result<String> {
    let namespace = default_namespace_if_empty(namespace);
    validate_name(&namespace)?;
    Ok(namespace)
}

#[derive(Debug, Clone, Default)]
pub struct ReadOpts {}

#[derive(Debug, Clone, Default)]
pub struct WriteOpts {
    /// Update semantics: the caller's resource version must match the stored one.
    pub overwrite_existing: bool,
}

impl WriteOpts {
    pub fn overwrite() -> Self {
        Self { overwrite_existing: true }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeleteOpts {
    pub ignore_not_exist: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ListOpts {
    pub selector: Selector,
}

#[derive(Debug, Clone, Default)]
pub struct WatchOpts {
    /// Cancelling this token stops the watch and closes its channels.
    pub cancel: CancellationToken,
    pub selector: Selector,
    pub refresh_rate: Duration,
}

impl WatchOpts {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel, ..Default::default() }
    }

    pub fn with_refresh_rate(mut self, refresh_rate: Duration) -> Self {
        self.refresh_rate = refresh_rate;
        self
    }

    /// Fill in zero values.
    pub fn with_defaults(mut self) -> Self {
        if self.refresh_rate.is_zero() {
            self.refresh_rate = DEFAULT_REFRESH_RATE;
        }
        self
    }

    pub fn list_opts(&self) -> ListOpts {
        ListOpts { selector: self.selector.clone() }
    }
}
