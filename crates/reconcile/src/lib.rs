//! reskit reconciler: make the stored resources of one namespace match a desired set.

#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use reskit_core::{
    default_namespace_if_empty, find, DeleteOpts, ListOpts, Resource, ResourceClient, Result,
    Status, WriteOpts,
};
use tracing::{debug, info};

/// Decides whether `original` should be replaced by `desired`. Returning `false` keeps the
/// stored copy.
pub type TransitionFn<'a, R> = &'a (dyn Fn(&R, &R) -> Result<bool> + Send + Sync);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
}

pub struct Reconciler<R: Resource> {
    client: Arc<dyn ResourceClient<R>>,
}

impl<R: Resource> Clone for Reconciler<R> {
    fn clone(&self) -> Self {
        Self { client: Arc::clone(&self.client) }
    }
}

impl<R: Resource> Reconciler<R> {
    pub fn new(client: Arc<dyn ResourceClient<R>>) -> Self {
        Self { client }
    }

    /// Create what is missing, update what exists (subject to `transition`), then delete
    /// every stored resource in `namespace` matching `list_opts` that is not desired.
    pub async fn reconcile(
        &self,
        namespace: &str,
        desired: Vec<R>,
        transition: Option<TransitionFn<'_, R>>,
        list_opts: ListOpts,
    ) -> Result<ReconcileSummary> {
        let started = Instant::now();
        let namespace = default_namespace_if_empty(namespace);
        let originals = self.client.list(&namespace, list_opts).await?;
        let mut summary = ReconcileSummary::default();
        let mut wanted = BTreeSet::new();

        for mut resource in desired {
            if resource.metadata().namespace.is_empty() {
                resource.metadata_mut().namespace = namespace.clone();
            }
            let ns = resource.metadata().namespace.clone();
            let name = resource.metadata().name.clone();
            wanted.insert((ns.clone(), name.clone()));

            match find(&originals, &ns, &name) {
                Some(original) => {
                    if let Some(transition) = transition {
                        if !transition(original, &resource)? {
                            summary.unchanged += 1;
                            continue;
                        }
                    }
                    let version = original.metadata().resource_version.clone();
                    resource.metadata_mut().resource_version = version;
                    if let Some(input) = resource.as_input_mut() {
                        input.set_status(Status::default());
                    }
                    self.client.write(resource, WriteOpts::overwrite()).await?;
                    debug!(kind = R::KIND, namespace = %ns, name = %name, "updated");
                    summary.updated += 1;
                }
                None => {
                    self.client.write(resource, WriteOpts::default()).await?;
                    debug!(kind = R::KIND, namespace = %ns, name = %name, "created");
                    summary.created += 1;
                }
            }
        }

        for original in &originals {
            let meta = original.metadata();
            if wanted.contains(&(meta.namespace.clone(), meta.name.clone())) {
                continue;
            }
            self.client
                .delete(&meta.namespace, &meta.name, DeleteOpts { ignore_not_exist: true })
                .await?;
            debug!(kind = R::KIND, namespace = %meta.namespace, name = %meta.name, "deleted");
            summary.deleted += 1;
        }

        histogram!("reconcile_latency_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("reconcile_runs_total", 1, "kind" => R::KIND);
        info!(
            kind = R::KIND,
            namespace = %namespace,
            created = summary.created,
            updated = summary.updated,
            unchanged = summary.unchanged,
            deleted = summary.deleted,
            "reconciled"
        );
        Ok(summary)
    }
}
