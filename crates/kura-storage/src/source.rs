//! Data source capability traits.
//!
//! Every backend implements [`DataSource`], the read-side core plus
//! create-then-write. Further capabilities are separate traits reached
//! through the `as_*` accessors, so callers can ask what a backend supports
//! instead of catching `Unsupported` errors:
//!
//! ```ignore
//! if let Some(store) = source.as_mutable() {
//!     store.create_container("", "reports")?;
//! }
//! ```
//!
//! All paths are logical paths (see [`crate::path`]).

use std::io::Read;
use std::sync::Arc;

use crate::error::{StorageError, StorageResult};
use crate::events::ChangeListener;
use crate::import::DataObject;
use crate::path;
use crate::types::{Capabilities, EntryProperties, WriteMode};
use crate::writer::EntryWriter;

/// Core operations every backend provides.
pub trait DataSource: Send + Sync {
    /// Protocol name identifying this source in change events.
    fn protocol(&self) -> &str;

    /// Capabilities beyond the read-side core.
    fn capabilities(&self) -> Capabilities;

    /// Does anything live at `path`?
    fn exists(&self, path: &str) -> bool;

    /// Is `path` a container?
    fn is_container(&self, path: &str) -> bool;

    /// Is `path` an entry?
    fn is_entry(&self, path: &str) -> bool;

    /// Base name of `path`; the root yields [`path::ROOT_NAME`].
    fn name(&self, path: &str) -> String {
        path::base_name(path).to_string()
    }

    /// Parent container; `None` for the root.
    fn parent(&self, path: &str) -> Option<String> {
        path::parent(path).map(str::to_string)
    }

    /// Path of `name` inside `container`.
    fn child(&self, container: &str, name: &str) -> String {
        path::join(container, name)
    }

    /// Open an entry for reading.
    fn read_entry(&self, path: &str) -> StorageResult<Box<dyn Read + Send>>;

    /// Full paths of the children of `path`.
    ///
    /// `None` when the container is empty or absent; use
    /// [`exists`](DataSource::exists) to tell the two apart.
    fn list_children(&self, path: &str) -> StorageResult<Option<Vec<String>>>;

    /// Create a new entry and open it for writing.
    ///
    /// Fails if `container/name` already exists.
    fn create_entry_stream(&self, container: &str, name: &str) -> StorageResult<EntryWriter>;

    /// First structured record imported from the entry, if any.
    fn read_structured(&self, _path: &str) -> StorageResult<Option<DataObject>> {
        Err(StorageError::unsupported("read_structured", self.protocol()))
    }

    /// Metadata snapshot.
    fn read_properties(&self, _path: &str) -> StorageResult<EntryProperties> {
        Err(StorageError::unsupported("read_properties", self.protocol()))
    }

    fn as_mutable(&self) -> Option<&dyn MutableSource> {
        None
    }

    fn as_removable(&self) -> Option<&dyn RemovableSource> {
        None
    }

    fn as_published(&self) -> Option<&dyn PublishedSource> {
        None
    }

    fn as_observable(&self) -> Option<&dyn ObservableSource> {
        None
    }
}

/// Modification of entries and containers.
pub trait MutableSource: Send + Sync {
    /// Rename `old_path` within its parent. Returns `new_name`.
    fn rename(&self, old_path: &str, new_name: &str) -> StorageResult<String>;

    /// Move `old_path` to `new_path`. Returns `new_path`.
    fn move_to(&self, old_path: &str, new_path: &str) -> StorageResult<String>;

    /// Overwrite an existing entry with everything `data` yields.
    fn write_entry(&self, path: &str, data: &mut dyn Read) -> StorageResult<()>;

    /// Open an entry for writing; the change is reported when the stream
    /// is closed. [`WriteMode::Append`] requires the entry to exist.
    fn open_write_stream(&self, path: &str, mode: WriteMode) -> StorageResult<EntryWriter>;

    /// Create a new entry holding everything `data` yields.
    ///
    /// Returns the path of the new entry.
    fn create_entry(&self, container: &str, name: &str, data: &mut dyn Read)
    -> StorageResult<String>;

    /// Create a new container, including missing ancestors.
    ///
    /// Returns the path of the new container.
    fn create_container(&self, container: &str, name: &str) -> StorageResult<String>;

    /// A child name of `container` unused at the time of the call.
    ///
    /// Nothing is reserved: a second call before the name is used may
    /// return the same name.
    fn create_unique_name(
        &self,
        container: &str,
        prefix: &str,
        suffix: Option<&str>,
    ) -> StorageResult<String>;

    /// Property mutation is not supported by any backend.
    fn write_properties(&self, path: &str, properties: &EntryProperties) -> StorageResult<()>;
}

/// Deletion of entries and containers.
pub trait RemovableSource: Send + Sync {
    /// Delete one entry or one empty container.
    ///
    /// With `force`, a read-only flag on the target is cleared first.
    fn delete(&self, path: &str, force: bool) -> StorageResult<()>;

    /// Delete `path` with everything below it. A missing path is a no-op.
    fn delete_recursively(&self, path: &str) -> StorageResult<()>;
}

/// URLs under which entries are served externally.
pub trait PublishedSource: Send + Sync {
    fn url(&self, path: &str) -> StorageResult<String>;

    fn forward_url(&self, path: &str) -> StorageResult<String>;
}

/// Registration of change listeners.
pub trait ObservableSource: Send + Sync {
    /// Returns `false` if the listener was already registered.
    fn add_listener(&self, listener: Arc<dyn ChangeListener>) -> bool;

    /// Returns `false` if the listener was not registered.
    fn remove_listener(&self, listener: &Arc<dyn ChangeListener>) -> bool;
}
