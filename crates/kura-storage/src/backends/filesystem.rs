//! Single-root filesystem backend.
//!
//! Every logical path maps to one file below a configured root. On top of
//! the shared adaptor this backend deletes entries and containers, keeps an
//! optional mirror root populated for external serving, and derives URLs.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::adaptor::{HierarchicalAdaptor, Locator, resolve_under};
use crate::error::{StorageError, StorageResult};
use crate::events::ChangeKind;
use crate::import::{DataObject, Importer};
use crate::path;
use crate::source::{
    DataSource, MutableSource, ObservableSource, PublishedSource, RemovableSource,
};
use crate::types::{Capabilities, EntryProperties};
use crate::writer::EntryWriter;

/// When a file is copied to the mirror root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorPolicy {
    /// Copy only if the mirror has no copy yet. Stale copies are kept.
    #[default]
    CopyIfAbsent,
    /// Also refresh copies older than the primary file.
    CopyIfNewer,
}

/// [`Locator`] mapping `path` to `root/path`.
#[derive(Debug, Clone)]
pub struct SingleRoot {
    root: PathBuf,
}

impl SingleRoot {
    /// Use `root`, creating it if absent.
    ///
    /// The root is canonicalized so physical paths are stable even when it
    /// is reached through a symlink.
    pub fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root: PathBuf = root.into();
        let display = root.display().to_string();
        fs::create_dir_all(&root).map_err(|e| StorageError::io("create root", &display, e))?;
        let root = dunce::canonicalize(&root).map_err(|e| StorageError::io("canonicalize", display, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Locator for SingleRoot {
    fn locate(&self, path: &str) -> StorageResult<Vec<PathBuf>> {
        Ok(vec![self.locate_one(path)?])
    }

    fn locate_one(&self, path: &str) -> StorageResult<PathBuf> {
        resolve_under(&self.root, path)
    }
}

/// Filesystem backend with deletion, mirroring and URLs.
#[derive(Debug)]
pub struct FilesystemBackend {
    inner: HierarchicalAdaptor<SingleRoot>,
    mirror: Option<PathBuf>,
    mirror_policy: MirrorPolicy,
    url_prefix: Option<String>,
    forward_url_prefix: Option<String>,
}

impl FilesystemBackend {
    /// Backend for `root`, created if absent.
    pub fn new(protocol: impl Into<String>, root: impl Into<PathBuf>) -> StorageResult<Self> {
        Ok(Self {
            inner: HierarchicalAdaptor::new(protocol, SingleRoot::new(root)?),
            mirror: None,
            mirror_policy: MirrorPolicy::default(),
            url_prefix: None,
            forward_url_prefix: None,
        })
    }

    /// Mirror served files and deletions to `mirror`.
    pub fn with_mirror(mut self, mirror: impl Into<PathBuf>) -> Self {
        self.mirror = Some(mirror.into());
        self
    }

    pub fn with_mirror_policy(mut self, policy: MirrorPolicy) -> Self {
        self.mirror_policy = policy;
        self
    }

    /// Prefix of [`url`](PublishedSource::url), and of
    /// [`forward_url`](PublishedSource::forward_url) unless overridden.
    pub fn with_url_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.url_prefix = Some(prefix.into());
        self
    }

    pub fn with_forward_url_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.forward_url_prefix = Some(prefix.into());
        self
    }

    pub fn with_importer(mut self, importer: Arc<dyn Importer>) -> Self {
        self.inner = self.inner.with_importer(importer);
        self
    }

    /// Shared adaptor, for callers holding the concrete backend.
    pub fn adaptor(&self) -> &HierarchicalAdaptor<SingleRoot> {
        &self.inner
    }

    pub fn root(&self) -> &Path {
        self.inner.locator().root()
    }

    pub fn mirror(&self) -> Option<&Path> {
        self.mirror.as_deref()
    }

    fn mirror_location(&self, path: &str) -> Option<PathBuf> {
        let mirror = self.mirror.as_ref()?;
        resolve_under(mirror, path)
            .inspect_err(|e| warn!("no mirror location for {}: {}", path, e))
            .ok()
    }

    fn needs_copy(&self, source: &Path, target: &Path) -> bool {
        if !target.exists() {
            return true;
        }
        match self.mirror_policy {
            MirrorPolicy::CopyIfAbsent => false,
            MirrorPolicy::CopyIfNewer => {
                let modified = |p: &Path| fs::metadata(p).and_then(|m| m.modified()).ok();
                match (modified(source), modified(target)) {
                    (Some(src), Some(dst)) => src > dst,
                    _ => true,
                }
            }
        }
    }

    /// Copy `path` to the mirror root if the policy asks for it.
    ///
    /// Failures are logged and otherwise ignored.
    fn ensure_mirrored(&self, path: &str) {
        let Some(target) = self.mirror_location(path) else {
            return;
        };
        let Ok(source) = self.inner.physical(path) else {
            return;
        };
        if !source.is_file() || !self.needs_copy(&source, &target) {
            return;
        }

        let copy = || -> io::Result<u64> {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(&source, &target)
        };
        match copy() {
            Ok(bytes) => debug!("mirrored {} ({} bytes)", path, bytes),
            Err(e) => warn!("unable to mirror {} to {}: {}", path, target.display(), e),
        }
    }

    /// Apply a deletion to the mirror root; failures are logged only.
    fn mirror_delete(&self, path: &str, recursive: bool) {
        let Some(target) = self.mirror_location(path) else {
            return;
        };
        if !target.exists() {
            return;
        }
        let result = match (target.is_dir(), recursive) {
            (true, true) => fs::remove_dir_all(&target),
            (true, false) => fs::remove_dir(&target),
            (false, _) => fs::remove_file(&target),
        };
        if let Err(e) = result {
            warn!("unable to delete mirror copy {}: {}", target.display(), e);
        }
    }

    fn published(&self, op: &'static str, prefix: Option<&String>, path: &str) -> StorageResult<String> {
        let prefix = prefix.ok_or_else(|| StorageError::unsupported(op, self.inner.protocol()))?;
        path::validate(path)?;
        self.ensure_mirrored(path);
        Ok(format!("{prefix}{path}"))
    }
}

fn clear_read_only(location: &Path) -> io::Result<()> {
    let mut perms = fs::metadata(location)?.permissions();
    if !perms.readonly() {
        return Ok(());
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        perms.set_mode(perms.mode() | 0o200);
    }
    #[cfg(not(unix))]
    #[allow(clippy::permissions_set_readonly_false)]
    perms.set_readonly(false);
    fs::set_permissions(location, perms)
}

impl DataSource for FilesystemBackend {
    fn protocol(&self) -> &str {
        self.inner.protocol()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            urls: self.url_prefix.is_some(),
            ..Capabilities::full()
        }
    }

    fn exists(&self, path: &str) -> bool {
        self.inner.exists(path)
    }

    fn is_container(&self, path: &str) -> bool {
        self.inner.is_container(path)
    }

    fn is_entry(&self, path: &str) -> bool {
        self.inner.is_entry(path)
    }

    fn read_entry(&self, path: &str) -> StorageResult<Box<dyn Read + Send>> {
        self.inner.read_entry(path)
    }

    fn list_children(&self, path: &str) -> StorageResult<Option<Vec<String>>> {
        self.inner.list_children(path)
    }

    fn create_entry_stream(&self, container: &str, name: &str) -> StorageResult<EntryWriter> {
        self.inner.create_entry_stream(container, name)
    }

    fn read_structured(&self, path: &str) -> StorageResult<Option<DataObject>> {
        self.inner.read_structured(path)
    }

    fn read_properties(&self, path: &str) -> StorageResult<EntryProperties> {
        self.inner.read_properties(path)
    }

    fn as_mutable(&self) -> Option<&dyn MutableSource> {
        Some(&self.inner)
    }

    fn as_removable(&self) -> Option<&dyn RemovableSource> {
        Some(self)
    }

    fn as_published(&self) -> Option<&dyn PublishedSource> {
        Some(self)
    }

    fn as_observable(&self) -> Option<&dyn ObservableSource> {
        Some(&self.inner)
    }
}

impl RemovableSource for FilesystemBackend {
    #[tracing::instrument(skip(self), name = "storage.delete")]
    fn delete(&self, path: &str, force: bool) -> StorageResult<()> {
        let location = self.inner.physical(path)?;
        if !location.exists() {
            return Err(StorageError::not_found(path));
        }
        let is_dir = location.is_dir();
        let kind = if is_dir {
            ChangeKind::ContainerDeleted
        } else {
            ChangeKind::EntryDeleted
        };

        self.inner.apply_change(self.inner.event(kind, path), || {
            if force {
                clear_read_only(&location).map_err(|e| StorageError::io("delete", path, e))?;
            }
            let removed = if is_dir {
                fs::remove_dir(&location)
            } else {
                fs::remove_file(&location)
            };
            removed.map_err(|e| StorageError::io("delete", path, e))
        })?;

        self.mirror_delete(path, false);
        Ok(())
    }

    #[tracing::instrument(skip(self), name = "storage.delete_recursively")]
    fn delete_recursively(&self, path: &str) -> StorageResult<()> {
        let location = self.inner.physical(path)?;
        if !location.exists() {
            return Ok(());
        }
        let is_dir = location.is_dir();
        let kind = if is_dir {
            ChangeKind::ContainerDeletedRecursively
        } else {
            ChangeKind::EntryDeleted
        };

        self.inner.apply_change(self.inner.event(kind, path), || {
            let removed = if is_dir {
                fs::remove_dir_all(&location)
            } else {
                fs::remove_file(&location)
            };
            removed.map_err(|e| StorageError::io("delete", path, e))
        })?;

        self.mirror_delete(path, true);
        Ok(())
    }
}

impl PublishedSource for FilesystemBackend {
    fn url(&self, path: &str) -> StorageResult<String> {
        self.published("url", self.url_prefix.as_ref(), path)
    }

    fn forward_url(&self, path: &str) -> StorageResult<String> {
        let prefix = self.forward_url_prefix.as_ref().or(self.url_prefix.as_ref());
        self.published("forward_url", prefix, path)
    }
}
