//! Backend-independent hierarchical adaptor.
//!
//! [`HierarchicalAdaptor`] implements the whole [`DataSource`] /
//! [`MutableSource`] / [`ObservableSource`] contract in terms of a single
//! backend hook, the [`Locator`], which maps a logical path to the physical
//! locations that may realize it:
//!
//! - `locate` returns every candidate location (zero, one or several for an
//!   overlay) and drives listing.
//! - `locate_one` returns the location every other operation acts on.
//!
//! Locators reject paths that would resolve outside their roots with
//! [`StorageError::InvalidPath`]; [`resolve_under`] does the check for
//! directory-backed locators.
//!
//! ## Listing merge
//!
//! Zero locations list as "no children". One location lists its directory
//! entries. Several locations list the union of the entries of every
//! location that exists as a directory, each name once. Empty results are
//! reported as "no children" too.

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};
use crate::events::{ChangeEvent, ChangeKind, ChangeListener, ChangeNotifier};
use crate::import::{DataObject, Importer, JsonImporter};
use crate::path;
use crate::source::{DataSource, MutableSource, ObservableSource};
use crate::types::{Capabilities, EntryProperties, WriteMode};
use crate::writer::EntryWriter;

/// Random candidates tried after the plain `prefix + suffix` name.
pub const UNIQUE_NAME_ATTEMPTS: usize = 100;

/// Exclusive upper bound of the random number in generated names.
pub const UNIQUE_NAME_RANGE: u32 = 99_999;

/// Maps logical paths to physical locations.
pub trait Locator: Send + Sync {
    /// Every location that may realize `path`, in priority order.
    fn locate(&self, path: &str) -> StorageResult<Vec<PathBuf>>;

    /// The location operations on `path` act on.
    fn locate_one(&self, path: &str) -> StorageResult<PathBuf>;
}

/// Physical location of `path` below `root`.
///
/// `path` must pass [`path::validate`]. If `root` exists, the deepest
/// existing ancestor of the location is canonicalized and must still lie
/// below the canonical root, so symlinks cannot lead out of it either.
pub fn resolve_under(root: &Path, path: &str) -> StorageResult<PathBuf> {
    path::validate(path)?;
    if path::is_root(path) {
        return Ok(root.to_path_buf());
    }

    let full = root.join(path);
    let Ok(canonical_root) = dunce::canonicalize(root) else {
        return Ok(full);
    };

    let mut existing = full.as_path();
    while !existing.exists() {
        match existing.parent() {
            Some(parent) => existing = parent,
            None => return Ok(full),
        }
    }
    let canonical =
        dunce::canonicalize(existing).map_err(|e| StorageError::io("canonicalize", path, e))?;
    if !canonical.starts_with(&canonical_root) {
        return Err(StorageError::invalid_path(format!(
            "{} is not under {}",
            path,
            canonical_root.display()
        )));
    }
    Ok(full)
}

/// Turns a protocol and logical path into the path reported in events.
pub type SourceNaming = fn(protocol: &str, path: &str) -> String;

/// Default [`SourceNaming`]: `protocol://path`.
pub fn protocol_source_name(protocol: &str, path: &str) -> String {
    format!("{protocol}://{path}")
}

/// Shared adaptor logic over a [`Locator`].
pub struct HierarchicalAdaptor<L> {
    protocol: String,
    locator: L,
    notifier: Arc<ChangeNotifier>,
    importer: Arc<dyn Importer>,
    source_naming: SourceNaming,
    /// Built on first use.
    rng: Mutex<Option<StdRng>>,
}

impl<L: std::fmt::Debug> std::fmt::Debug for HierarchicalAdaptor<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HierarchicalAdaptor")
            .field("protocol", &self.protocol)
            .field("locator", &self.locator)
            .field("notifier", &self.notifier)
            .finish()
    }
}

impl<L: Locator> HierarchicalAdaptor<L> {
    /// Create an adaptor importing structured content as JSON.
    pub fn new(protocol: impl Into<String>, locator: L) -> Self {
        Self {
            protocol: protocol.into(),
            locator,
            notifier: Arc::new(ChangeNotifier::new()),
            importer: Arc::new(JsonImporter),
            source_naming: protocol_source_name,
            rng: Mutex::new(None),
        }
    }

    /// Replace the importer used by `read_structured`.
    pub fn with_importer(mut self, importer: Arc<dyn Importer>) -> Self {
        self.importer = importer;
        self
    }

    /// Replace the path transform used in events.
    pub fn with_source_naming(mut self, naming: SourceNaming) -> Self {
        self.source_naming = naming;
        self
    }

    pub fn locator(&self) -> &L {
        &self.locator
    }

    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.notifier
    }

    /// Path of `path` as reported in events.
    pub fn source_name(&self, path: &str) -> String {
        (self.source_naming)(&self.protocol, path)
    }

    /// Event of `kind` for `path`.
    pub fn event(&self, kind: ChangeKind, path: &str) -> ChangeEvent {
        ChangeEvent::new(&self.protocol, kind, self.source_name(path))
    }

    /// Physical location operations on `path` act on.
    pub fn physical(&self, path: &str) -> StorageResult<PathBuf> {
        self.locator.locate_one(path)
    }

    /// Run `op` under the two-phase change contract.
    ///
    /// Checkers see `event` before `op` runs; listeners see it only if `op`
    /// succeeds.
    pub fn apply_change<T>(
        &self,
        event: ChangeEvent,
        op: impl FnOnce() -> StorageResult<T>,
    ) -> StorageResult<T> {
        self.notifier.check_allowed(&event)?;
        let result = op()?;
        self.notifier.notify_changed(&event);
        Ok(result)
    }

    fn require_absent(&self, path: &str, location: &Path) -> StorageResult<()> {
        if location.exists() {
            return Err(StorageError::already_exists(path));
        }
        Ok(())
    }

    fn require_entry(&self, path: &str, location: &Path) -> StorageResult<()> {
        if location.is_file() {
            Ok(())
        } else if location.exists() {
            Err(StorageError::not_an_entry(path))
        } else {
            Err(StorageError::not_found(path))
        }
    }

    fn next_random(&self) -> u32 {
        let mut rng = self.rng.lock();
        rng.get_or_insert_with(StdRng::from_entropy)
            .gen_range(0..UNIQUE_NAME_RANGE)
    }

    /// Move `from` to `to` physically, reporting a `Moved` change.
    fn relocate(
        &self,
        op: &'static str,
        old_path: &str,
        new_path: &str,
        to: &Path,
    ) -> StorageResult<()> {
        let from = self.physical(old_path)?;
        if !from.exists() {
            return Err(StorageError::not_found(old_path));
        }
        self.require_absent(new_path, to)?;

        let event = ChangeEvent::moved(
            &self.protocol,
            self.source_name(old_path),
            self.source_name(new_path),
        );
        self.apply_change(event, || {
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent).map_err(|e| StorageError::io(op, new_path, e))?;
            }
            fs::rename(&from, to).map_err(|e| StorageError::io(op, old_path, e))
        })
    }

    fn create_file(&self, path: &str, location: &Path) -> StorageResult<File> {
        if let Some(parent) = location.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::io("create", path, e))?;
        }
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(location)
            .map_err(|e| StorageError::io("create", path, e))
    }

    fn dir_names(path: &str, dir: &Path) -> StorageResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| StorageError::io("list", path, e))? {
            let entry = entry.map_err(|e| StorageError::io("list", path, e))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn qualify(path: &str, names: Vec<String>) -> Option<Vec<String>> {
        if names.is_empty() {
            return None;
        }
        if path::is_root(path) {
            return Some(names);
        }
        Some(names.iter().map(|name| path::join(path, name)).collect())
    }
}

fn copy_into(data: &mut dyn Read, file: File) -> io::Result<()> {
    let mut out = BufWriter::new(file);
    io::copy(data, &mut out)?;
    out.flush()
}

impl<L: Locator> DataSource for HierarchicalAdaptor<L> {
    fn protocol(&self) -> &str {
        &self.protocol
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            mutation: true,
            events: true,
            ..Capabilities::default()
        }
    }

    fn exists(&self, path: &str) -> bool {
        debug!("exists({})", path);
        self.physical(path).is_ok_and(|p| p.exists())
    }

    fn is_container(&self, path: &str) -> bool {
        self.physical(path).is_ok_and(|p| p.is_dir())
    }

    fn is_entry(&self, path: &str) -> bool {
        self.physical(path).is_ok_and(|p| p.is_file())
    }

    fn read_entry(&self, path: &str) -> StorageResult<Box<dyn Read + Send>> {
        let location = self.physical(path)?;
        self.require_entry(path, &location)?;
        let file = File::open(&location).map_err(|e| StorageError::io("open", path, e))?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn list_children(&self, path: &str) -> StorageResult<Option<Vec<String>>> {
        let locations = self.locator.locate(path)?;
        let names = match locations.as_slice() {
            [] => return Ok(None),
            [only] => {
                if !only.is_dir() {
                    return Ok(None);
                }
                Self::dir_names(path, only)?
            }
            many => {
                let mut merged = BTreeSet::new();
                let mut found = false;
                for location in many.iter().filter(|l| l.is_dir()) {
                    found = true;
                    merged.extend(Self::dir_names(path, location)?);
                }
                if !found {
                    return Ok(None);
                }
                merged.into_iter().collect()
            }
        };
        Ok(Self::qualify(path, names))
    }

    fn read_structured(&self, path: &str) -> StorageResult<Option<DataObject>> {
        let mut reader = self.read_entry(path)?;
        let records = self
            .importer
            .import(&mut reader)
            .map_err(|source| StorageError::Import {
                path: path.to_string(),
                source,
            })?;
        Ok(records.into_iter().next())
    }

    fn read_properties(&self, path: &str) -> StorageResult<EntryProperties> {
        let meta = fs::metadata(self.physical(path)?).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StorageError::not_found(path),
            _ => StorageError::io("stat", path, e),
        })?;
        Ok(EntryProperties::from_metadata(path::base_name(path), &meta))
    }

    #[tracing::instrument(skip(self), name = "storage.create_entry_stream")]
    fn create_entry_stream(&self, container: &str, name: &str) -> StorageResult<EntryWriter> {
        let child = path::join(container, name);
        let location = self.physical(&child)?;
        self.require_absent(&child, &location)?;

        let event = self.event(ChangeKind::EntryCreated, &child);
        self.notifier.check_allowed(&event)?;
        let file = self.create_file(&child, &location)?;
        Ok(EntryWriter::notifying(
            child,
            Box::new(BufWriter::new(file)),
            Arc::clone(&self.notifier),
            event,
        ))
    }

    fn as_mutable(&self) -> Option<&dyn MutableSource> {
        Some(self)
    }

    fn as_observable(&self) -> Option<&dyn ObservableSource> {
        Some(self)
    }
}

impl<L: Locator> MutableSource for HierarchicalAdaptor<L> {
    #[tracing::instrument(skip(self), name = "storage.rename")]
    fn rename(&self, old_path: &str, new_name: &str) -> StorageResult<String> {
        let Some(parent) = path::parent(old_path) else {
            return Err(StorageError::invalid_path("cannot rename the root"));
        };
        if new_name.contains(path::SEPARATOR) {
            return Err(StorageError::invalid_path(format!(
                "'{new_name}' is not a single name"
            )));
        }
        path::validate(new_name)?;
        let new_path = path::join(parent, new_name);
        // stay in the root holding the original
        let to = match self.physical(old_path)?.parent() {
            Some(dir) => dir.join(new_name),
            None => self.physical(&new_path)?,
        };
        self.relocate("rename", old_path, &new_path, &to)?;
        Ok(new_name.to_string())
    }

    #[tracing::instrument(skip(self), name = "storage.move")]
    fn move_to(&self, old_path: &str, new_path: &str) -> StorageResult<String> {
        if path::is_root(old_path) {
            return Err(StorageError::invalid_path("cannot move the root"));
        }
        let to = self.physical(new_path)?;
        self.relocate("move", old_path, new_path, &to)?;
        Ok(new_path.to_string())
    }

    #[tracing::instrument(skip(self, data), name = "storage.write_entry")]
    fn write_entry(&self, path: &str, data: &mut dyn Read) -> StorageResult<()> {
        let location = self.physical(path)?;
        self.require_entry(path, &location)?;

        let event = self.event(ChangeKind::EntryModified, path);
        self.apply_change(event, || {
            let file = File::create(&location).map_err(|e| StorageError::io("write", path, e))?;
            copy_into(data, file).map_err(|e| {
                warn!("unable to write {}: {}", path, e);
                StorageError::io("write", path, e)
            })
        })
    }

    fn open_write_stream(&self, path: &str, mode: WriteMode) -> StorageResult<EntryWriter> {
        let location = self.physical(path)?;
        match mode {
            WriteMode::Append => self.require_entry(path, &location)?,
            WriteMode::Truncate if location.is_dir() => {
                return Err(StorageError::not_an_entry(path));
            }
            WriteMode::Truncate => {}
        }

        let event = self.event(ChangeKind::EntryModified, path);
        self.notifier.check_allowed(&event)?;

        let mut options = OpenOptions::new();
        match mode {
            WriteMode::Append => options.append(true),
            WriteMode::Truncate => options.write(true).create(true).truncate(true),
        };
        let file = options
            .open(&location)
            .map_err(|e| StorageError::io("open", path, e))?;
        Ok(EntryWriter::notifying(
            path,
            Box::new(BufWriter::new(file)),
            Arc::clone(&self.notifier),
            event,
        ))
    }

    #[tracing::instrument(skip(self, data), name = "storage.create_entry")]
    fn create_entry(
        &self,
        container: &str,
        name: &str,
        data: &mut dyn Read,
    ) -> StorageResult<String> {
        let child = path::join(container, name);
        let location = self.physical(&child)?;
        self.require_absent(&child, &location)?;

        let event = self.event(ChangeKind::EntryCreated, &child);
        self.apply_change(event, || {
            let file = self.create_file(&child, &location)?;
            if let Err(e) = copy_into(data, file) {
                if let Err(cleanup) = fs::remove_file(&location) {
                    warn!("unable to remove partial entry {}: {}", child, cleanup);
                }
                return Err(StorageError::io("write", child.as_str(), e));
            }
            Ok(())
        })?;
        Ok(child)
    }

    #[tracing::instrument(skip(self), name = "storage.create_container")]
    fn create_container(&self, container: &str, name: &str) -> StorageResult<String> {
        let child = path::join(container, name);
        let location = self.physical(&child)?;
        self.require_absent(&child, &location)?;

        let event = self.event(ChangeKind::ContainerCreated, &child);
        self.apply_change(event, || {
            if let Some(parent) = location.parent() {
                fs::create_dir_all(parent).map_err(|e| StorageError::io("mkdir", &child, e))?;
            }
            fs::create_dir(&location).map_err(|e| StorageError::io("mkdir", &child, e))
        })?;
        Ok(child)
    }

    fn create_unique_name(
        &self,
        container: &str,
        prefix: &str,
        suffix: Option<&str>,
    ) -> StorageResult<String> {
        let suffix = suffix.unwrap_or("");

        let name = format!("{prefix}{suffix}");
        path::validate(&path::join(container, &name))?;
        if !self.exists(&path::join(container, &name)) {
            return Ok(name);
        }

        for _ in 0..UNIQUE_NAME_ATTEMPTS {
            let name = format!("{prefix}{}{suffix}", self.next_random());
            if !self.exists(&path::join(container, &name)) {
                return Ok(name);
            }
        }

        Err(StorageError::Exhausted {
            container: container.to_string(),
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
            attempts: UNIQUE_NAME_ATTEMPTS,
        })
    }

    fn write_properties(&self, _path: &str, _properties: &EntryProperties) -> StorageResult<()> {
        Err(StorageError::unsupported("write_properties", &self.protocol))
    }
}

impl<L: Locator> ObservableSource for HierarchicalAdaptor<L> {
    fn add_listener(&self, listener: Arc<dyn ChangeListener>) -> bool {
        self.notifier.add(listener)
    }

    fn remove_listener(&self, listener: &Arc<dyn ChangeListener>) -> bool {
        self.notifier.remove(listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ListenerError, Veto};
    use tempfile::TempDir;

    /// Locator over a fixed list of roots; `locate_one` is always the first.
    #[derive(Debug)]
    struct Roots(Vec<PathBuf>);

    impl Locator for Roots {
        fn locate(&self, path: &str) -> StorageResult<Vec<PathBuf>> {
            self.0.iter().map(|r| resolve_under(r, path)).collect()
        }

        fn locate_one(&self, path: &str) -> StorageResult<PathBuf> {
            resolve_under(&self.0[0], path)
        }
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<ChangeEvent>>,
    }

    impl ChangeListener for Recorder {
        fn changed(&self, event: &ChangeEvent) -> Result<(), ListenerError> {
            self.seen.lock().push(event.clone());
            Ok(())
        }
    }

    struct DenyAll;

    impl ChangeListener for DenyAll {
        fn check_allowed(&self, event: &ChangeEvent) -> Result<(), Veto> {
            Err(Veto::new(format!("no {}", event.kind)))
        }

        fn changed(&self, _event: &ChangeEvent) -> Result<(), ListenerError> {
            Ok(())
        }
    }

    fn setup() -> (HierarchicalAdaptor<Roots>, TempDir) {
        let dir = TempDir::new().unwrap();
        let adaptor = HierarchicalAdaptor::new("test", Roots(vec![dir.path().to_path_buf()]));
        (adaptor, dir)
    }

    fn read_all(adaptor: &HierarchicalAdaptor<Roots>, path: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        adaptor.read_entry(path).unwrap().read_to_end(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_create_and_read() {
        let (adaptor, _dir) = setup();
        let path = adaptor.create_entry("", "a.txt", &mut &b"hello"[..]).unwrap();
        assert_eq!(path, "a.txt");
        assert!(adaptor.exists("a.txt"));
        assert!(adaptor.is_entry("a.txt"));
        assert!(!adaptor.is_container("a.txt"));
        assert_eq!(read_all(&adaptor, "a.txt"), b"hello");
    }

    #[test]
    fn test_create_conflict_fires_no_event() {
        let (adaptor, _dir) = setup();
        let rec = Arc::new(Recorder::default());
        adaptor.add_listener(rec.clone());

        adaptor.create_container("", "docs").unwrap();
        let err = adaptor.create_container("", "docs").unwrap_err();
        assert!(err.is_precondition());

        adaptor.create_entry("docs", "x", &mut &b"1"[..]).unwrap();
        let err = adaptor.create_entry("docs", "x", &mut &b"2"[..]).unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(ref p) if p == "docs/x"));

        let kinds: Vec<_> = rec.seen.lock().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![ChangeKind::ContainerCreated, ChangeKind::EntryCreated]);
        assert_eq!(rec.seen.lock()[1].path, "test://docs/x");
    }

    #[test]
    fn test_create_container_with_ancestors() {
        let (adaptor, _dir) = setup();
        assert_eq!(adaptor.create_container("a/b", "c").unwrap(), "a/b/c");
        assert!(adaptor.is_container("a/b"));
        assert!(adaptor.is_container("a/b/c"));
    }

    #[test]
    fn test_write_entry_requires_existing_entry() {
        let (adaptor, _dir) = setup();
        let err = adaptor.write_entry("missing", &mut &b"x"[..]).unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));

        adaptor.create_container("", "dir").unwrap();
        let err = adaptor.write_entry("dir", &mut &b"x"[..]).unwrap_err();
        assert!(matches!(err, StorageError::NotAnEntry(_)));

        adaptor.create_entry("", "f", &mut &b"old content"[..]).unwrap();
        adaptor.write_entry("f", &mut &b"new"[..]).unwrap();
        assert_eq!(read_all(&adaptor, "f"), b"new");
    }

    #[test]
    fn test_veto_blocks_everything() {
        let (adaptor, dir) = setup();
        adaptor.create_entry("", "keep", &mut &b"k"[..]).unwrap();
        adaptor.add_listener(Arc::new(DenyAll));

        let vetoed = |r: StorageResult<String>| matches!(r, Err(StorageError::Vetoed { .. }));
        assert!(vetoed(adaptor.create_entry("", "new", &mut &b"n"[..])));
        assert!(vetoed(adaptor.create_container("", "dir")));
        assert!(vetoed(adaptor.rename("keep", "renamed")));
        assert!(vetoed(adaptor.move_to("keep", "sub/keep")));
        assert!(adaptor.write_entry("keep", &mut &b"x"[..]).is_err());
        assert!(adaptor.open_write_stream("keep", WriteMode::Append).is_err());
        assert!(adaptor.create_entry_stream("", "streamed").is_err());

        assert!(!adaptor.exists("new"));
        assert!(!adaptor.exists("dir"));
        assert!(!adaptor.exists("streamed"));
        assert!(!adaptor.exists("renamed"));
        assert!(!dir.path().join("sub").exists());
        assert_eq!(read_all(&adaptor, "keep"), b"k");
    }

    #[test]
    fn test_stream_notifies_on_close() {
        let (adaptor, _dir) = setup();
        let rec = Arc::new(Recorder::default());
        adaptor.add_listener(rec.clone());

        let mut out = adaptor.create_entry_stream("", "s.txt").unwrap();
        out.write_all(b"streamed").unwrap();
        assert!(rec.seen.lock().is_empty());
        out.close().unwrap();
        out.close().unwrap();
        drop(out);

        assert_eq!(rec.seen.lock().len(), 1);
        assert_eq!(rec.seen.lock()[0].kind, ChangeKind::EntryCreated);
        assert_eq!(read_all(&adaptor, "s.txt"), b"streamed");

        let err = adaptor.create_entry_stream("", "s.txt").unwrap_err();
        assert!(err.is_precondition());
    }

    #[test]
    fn test_append_stream() {
        let (adaptor, _dir) = setup();
        assert!(adaptor.open_write_stream("log", WriteMode::Append).is_err());

        adaptor.create_entry("", "log", &mut &b"one\n"[..]).unwrap();
        let mut out = adaptor.open_write_stream("log", WriteMode::Append).unwrap();
        out.write_all(b"two\n").unwrap();
        out.close().unwrap();
        assert_eq!(read_all(&adaptor, "log"), b"one\ntwo\n");

        let mut out = adaptor.open_write_stream("log", WriteMode::Truncate).unwrap();
        out.write_all(b"three\n").unwrap();
        out.close().unwrap();
        assert_eq!(read_all(&adaptor, "log"), b"three\n");
    }

    #[test]
    fn test_rename_and_move() {
        let (adaptor, _dir) = setup();
        let rec = Arc::new(Recorder::default());
        adaptor.add_listener(rec.clone());
        adaptor.create_container("", "a").unwrap();
        adaptor.create_entry("a", "old.txt", &mut &b"x"[..]).unwrap();

        assert_eq!(adaptor.rename("a/old.txt", "new.txt").unwrap(), "new.txt");
        assert!(!adaptor.exists("a/old.txt"));
        assert!(adaptor.is_entry("a/new.txt"));

        assert_eq!(adaptor.move_to("a/new.txt", "b/moved.txt").unwrap(), "b/moved.txt");
        assert!(adaptor.is_entry("b/moved.txt"));

        let moved = rec.seen.lock().last().cloned().unwrap();
        assert_eq!(moved.kind, ChangeKind::Moved);
        assert_eq!(moved.destination.as_deref(), Some("test://b/moved.txt"));

        assert!(matches!(
            adaptor.rename("nope", "x"),
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            adaptor.rename("", "x"),
            Err(StorageError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_rename_onto_existing_fails() {
        let (adaptor, _dir) = setup();
        adaptor.create_entry("", "a", &mut &b"a"[..]).unwrap();
        adaptor.create_entry("", "b", &mut &b"b"[..]).unwrap();
        assert!(matches!(
            adaptor.rename("a", "b"),
            Err(StorageError::AlreadyExists(_))
        ));
        assert_eq!(read_all(&adaptor, "b"), b"b");
    }

    #[test]
    fn test_paths_stay_under_root() {
        let outer = TempDir::new().unwrap();
        let root = outer.path().join("root");
        std::fs::create_dir(&root).unwrap();
        let adaptor = HierarchicalAdaptor::new("test", Roots(vec![root.clone()]));
        adaptor.create_entry("", "keep", &mut &b"k"[..]).unwrap();
        let absolute = outer.path().join("absolute.txt");

        let invalid = |r: StorageResult<String>| matches!(r, Err(StorageError::InvalidPath(_)));
        assert!(invalid(adaptor.create_entry("", "../escaped.txt", &mut &b"x"[..])));
        assert!(invalid(adaptor.create_entry("", absolute.to_str().unwrap(), &mut &b"x"[..])));
        assert!(invalid(adaptor.create_container("..", "up")));
        assert!(invalid(adaptor.rename("keep", "../keep")));
        assert!(invalid(adaptor.move_to("keep", "../keep")));
        assert!(invalid(adaptor.create_unique_name("..", "tmp", None)));
        assert!(adaptor.create_entry_stream("a/./b", "x").is_err());
        assert!(adaptor.write_entry("../keep", &mut &b"x"[..]).is_err());
        assert!(matches!(
            adaptor.list_children(".."),
            Err(StorageError::InvalidPath(_))
        ));
        assert!(!adaptor.exists(".."));

        assert!(!outer.path().join("escaped.txt").exists());
        assert!(!outer.path().join("up").exists());
        assert!(!outer.path().join("keep").exists());
        assert!(!absolute.exists());
        assert_eq!(read_all(&adaptor, "keep"), b"k");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_out_of_root_rejected() {
        let outer = TempDir::new().unwrap();
        let root = outer.path().join("root");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(outer.path().join("secret"), "s").unwrap();
        std::os::unix::fs::symlink(outer.path(), root.join("link")).unwrap();
        let adaptor = HierarchicalAdaptor::new("test", Roots(vec![root]));

        assert!(matches!(
            adaptor.create_entry("link", "planted", &mut &b"x"[..]),
            Err(StorageError::InvalidPath(_))
        ));
        assert!(matches!(
            adaptor.read_entry("link/secret"),
            Err(StorageError::InvalidPath(_))
        ));
        assert!(!outer.path().join("planted").exists());
    }

    #[test]
    fn test_list_children() {
        let (adaptor, _dir) = setup();
        assert_eq!(adaptor.list_children("").unwrap(), None);
        assert_eq!(adaptor.list_children("absent").unwrap(), None);

        adaptor.create_container("", "d").unwrap();
        assert_eq!(adaptor.list_children("d").unwrap(), None);
        assert!(adaptor.exists("d"));

        adaptor.create_entry("d", "b", &mut &b""[..]).unwrap();
        adaptor.create_entry("d", "a", &mut &b""[..]).unwrap();
        assert_eq!(
            adaptor.list_children("d").unwrap(),
            Some(vec!["d/a".to_string(), "d/b".to_string()])
        );
        assert_eq!(adaptor.list_children("").unwrap(), Some(vec!["d".to_string()]));
        assert_eq!(adaptor.list_children("d/a").unwrap(), None);
    }

    #[test]
    fn test_overlay_merge() {
        let one = TempDir::new().unwrap();
        let two = TempDir::new().unwrap();
        let three = TempDir::new().unwrap();
        for (root, names) in [(&one, ["a", "b"]), (&two, ["b", "c"])] {
            std::fs::create_dir(root.path().join("c")).unwrap();
            for name in names {
                std::fs::write(root.path().join("c").join(name), name).unwrap();
            }
        }
        // third root lacks the container entirely
        let adaptor = HierarchicalAdaptor::new(
            "overlay",
            Roots(vec![
                one.path().to_path_buf(),
                two.path().to_path_buf(),
                three.path().to_path_buf(),
            ]),
        );

        assert_eq!(
            adaptor.list_children("c").unwrap(),
            Some(vec!["c/a".to_string(), "c/b".to_string(), "c/c".to_string()])
        );
        assert_eq!(adaptor.list_children("nowhere").unwrap(), None);
    }

    #[test]
    fn test_no_locations_lists_nothing() {
        #[derive(Debug)]
        struct Nowhere;

        impl Locator for Nowhere {
            fn locate(&self, _path: &str) -> StorageResult<Vec<PathBuf>> {
                Ok(Vec::new())
            }

            fn locate_one(&self, path: &str) -> StorageResult<PathBuf> {
                Ok(PathBuf::from("/nonexistent/kura").join(path))
            }
        }

        let adaptor = HierarchicalAdaptor::new("none", Nowhere);
        assert_eq!(adaptor.list_children("").unwrap(), None);
    }

    #[test]
    fn test_unique_name() {
        let (adaptor, _dir) = setup();
        assert_eq!(adaptor.create_unique_name("", "tmp", Some(".txt")).unwrap(), "tmp.txt");
        assert_eq!(adaptor.create_unique_name("", "tmp", None).unwrap(), "tmp");

        adaptor.create_entry("", "tmp.txt", &mut &b""[..]).unwrap();
        let name = adaptor.create_unique_name("", "tmp", Some(".txt")).unwrap();
        assert_ne!(name, "tmp.txt");
        assert!(name.starts_with("tmp") && name.ends_with(".txt"));
        let digits = &name["tmp".len()..name.len() - ".txt".len()];
        assert!(digits.parse::<u32>().unwrap() < UNIQUE_NAME_RANGE);
        assert!(!adaptor.exists(&name));
    }

    #[test]
    fn test_name_and_parent() {
        let (adaptor, _dir) = setup();
        assert_eq!(adaptor.name("a/b/c.txt"), "c.txt");
        assert_eq!(adaptor.name(""), path::ROOT_NAME);
        assert_eq!(adaptor.parent(""), None);
        assert_eq!(adaptor.parent("x").as_deref(), Some(""));
        assert_eq!(adaptor.child("a", "b"), "a/b");
    }

    #[test]
    fn test_structured_read() {
        let (adaptor, _dir) = setup();
        adaptor
            .create_entry("", "p.json", &mut &br#"[{"type": "person", "name": "Amy"}, {"name": "Bo"}]"#[..])
            .unwrap();
        let obj = adaptor.read_structured("p.json").unwrap().unwrap();
        assert_eq!(obj.type_name.as_deref(), Some("person"));

        adaptor.create_entry("", "empty.json", &mut &b"[]"[..]).unwrap();
        assert_eq!(adaptor.read_structured("empty.json").unwrap(), None);

        adaptor.create_entry("", "bad.json", &mut &b"{oops"[..]).unwrap();
        assert!(matches!(
            adaptor.read_structured("bad.json"),
            Err(StorageError::Import { .. })
        ));
    }

    #[test]
    fn test_properties() {
        let (adaptor, _dir) = setup();
        adaptor.create_entry("", "f", &mut &b"abc"[..]).unwrap();
        let props = adaptor.read_properties("f").unwrap();
        assert_eq!(props.size, 3);
        assert_eq!(props.name, "f");
        assert!(props.kind.is_entry());

        assert!(matches!(
            adaptor.read_properties("missing"),
            Err(StorageError::NotFound(_))
        ));
        let err = adaptor.write_properties("f", &props).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Unsupported);
    }

    #[test]
    fn test_custom_source_naming() {
        let dir = TempDir::new().unwrap();
        let adaptor = HierarchicalAdaptor::new("repo", Roots(vec![dir.path().to_path_buf()]))
            .with_source_naming(|_, path| format!("/{path}"));
        assert_eq!(adaptor.source_name("a/b"), "/a/b");
        assert_eq!(adaptor.event(ChangeKind::EntryDeleted, "x").path, "/x");
    }
}
