//! reskit file backend: one YAML document per resource at `{root}/{namespace}/{name}`.
//! Keep it small and predictable; watches poll.

#![forbid(unsafe_code)]

use std::io::ErrorKind as IoErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use reskit_core::client::{spawn_poll_watch, WatchChannels, WRITES_TOTAL, WRITE_LATENCY_MS};
use reskit_core::{
    default_namespace_if_empty, next_resource_version, selector_matches, sort_resources,
    validate_name, DeleteOpts, Error, ListOpts, ReadOpts, Resource, ResourceClient, Result,
    WatchOpts, WriteOpts,
};
use tokio::sync::Mutex;
use tracing::debug;

const TEMP_SUFFIX: &str = ".tmp";

/// Serializes check-then-write. Clients on the same root should share one so two writers in
/// this process cannot both pass the version check.
#[derive(Debug, Clone, Default)]
pub struct WriteLock(Arc<Mutex<()>>);

#[derive(Debug)]
struct Inner {
    root: PathBuf,
    write_lock: WriteLock,
}

pub struct FileResourceClient<R: Resource> {
    inner: Arc<Inner>,
    _kind: PhantomData<fn() -> R>,
}

impl<R: Resource> Clone for FileResourceClient<R> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner), _kind: PhantomData }
    }
}

impl<R: Resource> std::fmt::Debug for FileResourceClient<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileResourceClient")
            .field("kind", &R::KIND)
            .field("root", &self.inner.root)
            .finish()
    }
}

impl<R: Resource> FileResourceClient<R> {
    /// A client with its own write lock.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_write_lock(root, WriteLock::default())
    }

    pub fn with_write_lock(root: impl Into<PathBuf>, write_lock: WriteLock) -> Self {
        Self { inner: Arc::new(Inner { root: root.into(), write_lock }), _kind: PhantomData }
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    fn namespace_dir(&self, namespace: &str) -> Result<PathBuf> {
        // namespaces become directory names; the same rules keep them from escaping root
        validate_name(namespace)?;
        Ok(self.inner.root.join(namespace))
    }

    fn resource_path(&self, namespace: &str, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.namespace_dir(namespace)?.join(name))
    }

    async fn load(&self, path: &Path) -> Result<Option<R>> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => serde_yaml::from_str(&text)
                .map(Some)
                .map_err(|e| Error::codec(format!("decoding {}", path.display()), e)),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::transport(format!("reading {}", path.display()), e)),
        }
    }

    async fn store(&self, path: &Path, resource: &R) -> Result<()> {
        let yaml = serde_yaml::to_string(resource)
            .map_err(|e| Error::codec(format!("encoding {}", resource.metadata().reference()), e))?;
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| Error::transport(format!("creating {}", dir.display()), e))?;
        }
        let tmp = temp_path(path);
        tokio::fs::write(&tmp, yaml.as_bytes())
            .await
            .map_err(|e| Error::transport(format!("writing {}", tmp.display()), e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| Error::transport(format!("renaming into {}", path.display()), e))
    }
}

/// Hidden sibling used while writing: `{dir}/.{name}.tmp`.
fn temp_path(path: &Path) -> PathBuf {
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    path.with_file_name(format!(".{name}{TEMP_SUFFIX}"))
}

#[async_trait::async_trait]
impl<R: Resource> ResourceClient<R> for FileResourceClient<R> {
    async fn register(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.inner.root)
            .await
            .map_err(|e| Error::transport(format!("creating {}", self.inner.root.display()), e))
    }

    async fn read(&self, namespace: &str, name: &str, _opts: ReadOpts) -> Result<R> {
        let namespace = default_namespace_if_empty(namespace);
        let path = self.resource_path(&namespace, name)?;
        self.load(&path).await?.ok_or_else(|| Error::not_exist(&namespace, name))
    }

    async fn write(&self, mut resource: R, opts: WriteOpts) -> Result<R> {
        let started = Instant::now();
        let namespace = default_namespace_if_empty(&resource.metadata().namespace);
        let name = resource.metadata().name.clone();
        let path = self.resource_path(&namespace, &name)?;
        resource.metadata_mut().namespace = namespace.clone();

        let _guard = self.inner.write_lock.0.lock().await;
        let current = self.load(&path).await?;
        let current_version = match &current {
            Some(existing) => {
                if !opts.overwrite_existing {
                    return Err(Error::exist(&namespace, &name));
                }
                let expected = &existing.metadata().resource_version;
                let given = &resource.metadata().resource_version;
                if given != expected {
                    return Err(Error::resource_version(&namespace, &name, given, expected));
                }
                expected.clone()
            }
            None => String::new(),
        };
        resource.metadata_mut().resource_version = next_resource_version(&current_version);
        self.store(&path, &resource).await?;

        histogram!(WRITE_LATENCY_MS, started.elapsed().as_secs_f64() * 1000.0, "backend" => "file");
        counter!(WRITES_TOTAL, 1, "backend" => "file", "kind" => R::KIND);
        debug!(
            kind = R::KIND,
            path = %path.display(),
            version = %resource.metadata().resource_version,
            "wrote"
        );
        Ok(resource)
    }

    async fn delete(&self, namespace: &str, name: &str, opts: DeleteOpts) -> Result<()> {
        let namespace = default_namespace_if_empty(namespace);
        let path = self.resource_path(&namespace, name)?;
        let _guard = self.inner.write_lock.0.lock().await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                if opts.ignore_not_exist {
                    Ok(())
                } else {
                    Err(Error::not_exist(&namespace, name))
                }
            }
            Err(e) => Err(Error::transport(format!("removing {}", path.display()), e)),
        }
    }

    async fn list(&self, namespace: &str, opts: ListOpts) -> Result<Vec<R>> {
        let namespace = default_namespace_if_empty(namespace);
        let dir = self.namespace_dir(&namespace)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::transport(format!("listing {}", dir.display()), e)),
        };
        let mut out = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => return Err(Error::transport(format!("listing {}", dir.display()), e)),
            };
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else { continue };
            // temp files start with '.', which no valid name does
            if validate_name(file_name).is_err() {
                continue;
            }
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            // a concurrent delete between readdir and read is not an error
            if let Some(resource) = self.load(&entry.path()).await? {
                if selector_matches(&opts.selector, &resource.metadata().labels) {
                    out.push(resource);
                }
            }
        }
        sort_resources(&mut out);
        Ok(out)
    }

    async fn watch(&self, namespace: &str, opts: WatchOpts) -> Result<WatchChannels<R>> {
        let namespace = default_namespace_if_empty(namespace);
        let _ = self.namespace_dir(&namespace)?;
        let client = self.clone();
        let list_opts = opts.list_opts();
        let label = format!("file:{}/{}", R::KIND, namespace);
        Ok(spawn_poll_watch(label, opts, move || {
            let client = client.clone();
            let namespace = namespace.clone();
            let list_opts = list_opts.clone();
            async move { client.list(&namespace, list_opts).await }
        }))
    }
}
