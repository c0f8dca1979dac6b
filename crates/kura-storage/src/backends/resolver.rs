//! Resource-resolver backend.
//!
//! Delegates existence, listing, reading and create-then-write to a
//! [`ResourceResolver`], typically the process-wide one installed with
//! [`install_global_resolver`]. It offers no mutation, deletion, URLs or
//! events, and never reports changes.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Cursor, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::adaptor::resolve_under;
use crate::error::{StorageError, StorageResult};
use crate::path;
use crate::source::DataSource;
use crate::types::Capabilities;
use crate::writer::EntryWriter;

/// Virtual resource tree addressed by `/`-separated resource paths.
pub trait ResourceResolver: Send + Sync {
    fn exists(&self, resource: &str) -> bool;

    fn is_directory(&self, resource: &str) -> bool;

    fn open_read(&self, resource: &str) -> io::Result<Box<dyn Read + Send>>;

    /// Full resource paths of the direct children of `prefix`.
    fn list_child_paths(&self, prefix: &str) -> io::Result<Vec<String>>;

    /// Create `resource` (and missing parents) if absent, then open it for
    /// writing from the start.
    fn create_then_open_write(&self, resource: &str) -> io::Result<Box<dyn Write + Send>>;
}

// ============================================================================
// Process-wide resolver
// ============================================================================

static GLOBAL_RESOLVER: RwLock<Option<Arc<dyn ResourceResolver>>> = parking_lot::const_rwlock(None);

/// Install the process-wide resolver, returning the previous one.
pub fn install_global_resolver(
    resolver: Arc<dyn ResourceResolver>,
) -> Option<Arc<dyn ResourceResolver>> {
    GLOBAL_RESOLVER.write().replace(resolver)
}

/// The process-wide resolver, if one was installed.
pub fn global_resolver() -> Option<Arc<dyn ResourceResolver>> {
    GLOBAL_RESOLVER.read().clone()
}

// ============================================================================
// In-memory resolver
// ============================================================================

#[derive(Debug, Clone)]
enum Node {
    File(Vec<u8>),
    Directory,
}

type Nodes = Arc<RwLock<BTreeMap<String, Node>>>;

/// Resolver over an in-memory tree. The root `""` always exists.
#[derive(Debug, Clone)]
pub struct MemoryResolver {
    nodes: Nodes,
}

impl Default for MemoryResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryResolver {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(String::new(), Node::Directory);
        Self {
            nodes: Arc::new(RwLock::new(nodes)),
        }
    }

    /// Store `data` at `resource`, creating parents.
    pub fn insert(&self, resource: &str, data: impl Into<Vec<u8>>) -> io::Result<()> {
        let mut nodes = self.nodes.write();
        Self::ensure_parents(&mut nodes, resource)?;
        if let Some(Node::Directory) = nodes.get(resource) {
            return Err(io::Error::new(io::ErrorKind::IsADirectory, resource.to_string()));
        }
        nodes.insert(resource.to_string(), Node::File(data.into()));
        Ok(())
    }

    /// Create a directory and its parents.
    pub fn mkdir(&self, resource: &str) -> io::Result<()> {
        let mut nodes = self.nodes.write();
        Self::ensure_parents(&mut nodes, resource)?;
        match nodes.get(resource) {
            Some(Node::File(_)) => Err(io::Error::new(
                io::ErrorKind::NotADirectory,
                resource.to_string(),
            )),
            _ => {
                nodes.insert(resource.to_string(), Node::Directory);
                Ok(())
            }
        }
    }

    fn ensure_parents(nodes: &mut BTreeMap<String, Node>, resource: &str) -> io::Result<()> {
        let mut current = path::parent(resource);
        while let Some(dir) = current {
            match nodes.get(dir) {
                Some(Node::Directory) => break,
                Some(Node::File(_)) => {
                    return Err(io::Error::new(io::ErrorKind::NotADirectory, dir.to_string()));
                }
                None => {
                    nodes.insert(dir.to_string(), Node::Directory);
                }
            }
            current = path::parent(dir);
        }
        Ok(())
    }
}

/// Writer appending straight into a [`MemoryResolver`] node.
struct MemoryWriter {
    nodes: Nodes,
    resource: String,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.nodes.write().get_mut(&self.resource) {
            Some(Node::File(data)) => {
                data.extend_from_slice(buf);
                Ok(buf.len())
            }
            _ => Err(io::Error::new(io::ErrorKind::NotFound, self.resource.clone())),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ResourceResolver for MemoryResolver {
    fn exists(&self, resource: &str) -> bool {
        self.nodes.read().contains_key(resource)
    }

    fn is_directory(&self, resource: &str) -> bool {
        matches!(self.nodes.read().get(resource), Some(Node::Directory))
    }

    fn open_read(&self, resource: &str) -> io::Result<Box<dyn Read + Send>> {
        match self.nodes.read().get(resource) {
            Some(Node::File(data)) => Ok(Box::new(Cursor::new(data.clone()))),
            Some(Node::Directory) => Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                resource.to_string(),
            )),
            None => Err(io::Error::new(io::ErrorKind::NotFound, resource.to_string())),
        }
    }

    fn list_child_paths(&self, prefix: &str) -> io::Result<Vec<String>> {
        let nodes = self.nodes.read();
        Ok(nodes
            .keys()
            .filter(|key| !key.is_empty() && path::parent(key) == Some(prefix))
            .cloned()
            .collect())
    }

    fn create_then_open_write(&self, resource: &str) -> io::Result<Box<dyn Write + Send>> {
        let mut nodes = self.nodes.write();
        Self::ensure_parents(&mut nodes, resource)?;
        match nodes.get(resource) {
            Some(Node::Directory) => {
                return Err(io::Error::new(
                    io::ErrorKind::IsADirectory,
                    resource.to_string(),
                ));
            }
            _ => {
                nodes.insert(resource.to_string(), Node::File(Vec::new()));
            }
        }
        Ok(Box::new(MemoryWriter {
            nodes: Arc::clone(&self.nodes),
            resource: resource.to_string(),
        }))
    }
}

// ============================================================================
// Directory resolver
// ============================================================================

/// Resolver over stacked directories; the first root holding a resource
/// wins and new resources land in the first root.
#[derive(Debug, Clone)]
pub struct DirectoryResolver {
    roots: Vec<PathBuf>,
}

impl DirectoryResolver {
    pub fn new(roots: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
        }
    }

    /// Location of `resource` below each root; fails if it would escape one.
    fn candidates(&self, resource: &str) -> io::Result<Vec<PathBuf>> {
        self.roots
            .iter()
            .map(|root| resolve_under(root, resource).map_err(io::Error::from))
            .collect()
    }

    fn any(&self, resource: &str, test: impl Fn(&PathBuf) -> bool) -> bool {
        self.candidates(resource)
            .is_ok_and(|candidates| candidates.iter().any(test))
    }
}

impl ResourceResolver for DirectoryResolver {
    fn exists(&self, resource: &str) -> bool {
        self.any(resource, |c| c.exists())
    }

    fn is_directory(&self, resource: &str) -> bool {
        self.any(resource, |c| c.is_dir())
    }

    fn open_read(&self, resource: &str) -> io::Result<Box<dyn Read + Send>> {
        let location = self
            .candidates(resource)?
            .into_iter()
            .find(|c| c.is_file())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, resource.to_string()))?;
        Ok(Box::new(BufReader::new(File::open(location)?)))
    }

    fn list_child_paths(&self, prefix: &str) -> io::Result<Vec<String>> {
        let mut names = BTreeSet::new();
        for dir in self.candidates(prefix)?.into_iter().filter(|c| c.is_dir()) {
            for entry in fs::read_dir(&dir)? {
                names.insert(entry?.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(names.iter().map(|name| path::join(prefix, name)).collect())
    }

    fn create_then_open_write(&self, resource: &str) -> io::Result<Box<dyn Write + Send>> {
        let target = self
            .candidates(resource)?
            .into_iter()
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no resolver roots"))?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&target)?;
        Ok(Box::new(file))
    }
}

// ============================================================================
// Backend
// ============================================================================

/// Read-mostly backend over a [`ResourceResolver`].
pub struct ResolverBackend {
    protocol: String,
    resolver: Arc<dyn ResourceResolver>,
    base: Option<String>,
}

impl std::fmt::Debug for ResolverBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverBackend")
            .field("protocol", &self.protocol)
            .field("base", &self.base)
            .finish()
    }
}

impl ResolverBackend {
    /// Backend over `resolver`; logical paths live below `base` if given.
    pub fn new(
        protocol: impl Into<String>,
        resolver: Arc<dyn ResourceResolver>,
        base: Option<String>,
    ) -> Self {
        Self {
            protocol: protocol.into(),
            resolver,
            base: base.filter(|b| !path::is_root(b)),
        }
    }

    /// Backend over the process-wide resolver.
    pub fn from_global(protocol: impl Into<String>, base: Option<String>) -> StorageResult<Self> {
        let resolver = global_resolver()
            .ok_or_else(|| StorageError::config("no global resource resolver installed"))?;
        Ok(Self::new(protocol, resolver, base))
    }

    fn resource(&self, path: &str) -> StorageResult<String> {
        path::validate(path)?;
        Ok(match &self.base {
            Some(base) => path::join(base, path).trim_end_matches(path::SEPARATOR).to_string(),
            None => path.to_string(),
        })
    }

    fn logical<'a>(&self, resource: &'a str) -> &'a str {
        let Some(base) = &self.base else {
            return resource;
        };
        resource
            .strip_prefix(base.as_str())
            .map(|rest| rest.trim_start_matches(path::SEPARATOR))
            .unwrap_or(resource)
    }
}

impl DataSource for ResolverBackend {
    fn protocol(&self) -> &str {
        &self.protocol
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::read_only()
    }

    fn exists(&self, path: &str) -> bool {
        self.resource(path)
            .is_ok_and(|resource| self.resolver.exists(&resource))
    }

    fn is_container(&self, path: &str) -> bool {
        self.resource(path)
            .is_ok_and(|resource| self.resolver.is_directory(&resource))
    }

    fn is_entry(&self, path: &str) -> bool {
        self.resource(path).is_ok_and(|resource| {
            self.resolver.exists(&resource) && !self.resolver.is_directory(&resource)
        })
    }

    fn read_entry(&self, path: &str) -> StorageResult<Box<dyn Read + Send>> {
        let resource = self.resource(path)?;
        if !self.resolver.exists(&resource) {
            return Err(StorageError::not_found(path));
        }
        if self.resolver.is_directory(&resource) {
            return Err(StorageError::not_an_entry(path));
        }
        self.resolver
            .open_read(&resource)
            .map_err(|e| StorageError::io("open", path, e))
    }

    fn list_children(&self, path: &str) -> StorageResult<Option<Vec<String>>> {
        let resource = self.resource(path)?;
        if !self.resolver.is_directory(&resource) {
            return Ok(None);
        }
        let mut children: Vec<String> = self
            .resolver
            .list_child_paths(&resource)
            .map_err(|e| StorageError::io("list", path, e))?
            .iter()
            .map(|child| self.logical(child).to_string())
            .collect();
        if children.is_empty() {
            return Ok(None);
        }
        children.sort();
        Ok(Some(children))
    }

    fn create_entry_stream(&self, container: &str, name: &str) -> StorageResult<EntryWriter> {
        let child = path::join(container, name);
        let resource = self.resource(&child)?;
        if self.resolver.exists(&resource) {
            return Err(StorageError::already_exists(child));
        }
        debug!("creating {} via resolver", resource);
        let sink = self
            .resolver
            .create_then_open_write(&resource)
            .map_err(|e| StorageError::io("create", child.as_str(), e))?;
        Ok(EntryWriter::plain(child, sink))
    }
}
