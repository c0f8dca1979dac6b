//! Hierarchical storage adaptors.
//!
//! A uniform, path-addressed interface for reading, writing, listing and
//! deleting entries (files) and containers (directories). Key components:
//!
//! - [`DataSource`] and the capability traits ([`MutableSource`],
//!   [`RemovableSource`], [`PublishedSource`], [`ObservableSource`])
//! - [`HierarchicalAdaptor`] - shared algorithms over a [`Locator`]
//! - [`FilesystemBackend`] - one root directory, optional mirror and URLs
//! - [`OverlayBackend`] - several roots merged into one tree
//! - [`ResolverBackend`] - read-mostly access through a [`ResourceResolver`]
//!
//! ## Change events
//!
//! Every mutation runs in two phases. Checkers registered as
//! [`ChangeListener`]s may veto a [`ChangeEvent`] before anything happens;
//! after the mutation succeeds every listener is notified. Streams returned
//! for writing ([`EntryWriter`]) defer the notification until they are
//! closed.
//!
//! ## Paths
//!
//! Logical paths are `/`-separated and relative; `""` is the root. Empty,
//! `.` and `..` components are rejected, and no path resolves outside the
//! roots of its backend. See [`path`].

pub mod adaptor;
pub mod backends;
pub mod config;
mod error;
mod events;
pub mod import;
pub mod path;
mod source;
mod types;
mod writer;

pub use adaptor::{
    HierarchicalAdaptor, Locator, SourceNaming, protocol_source_name, resolve_under,
};
pub use backends::{
    DirectoryResolver, FilesystemBackend, MemoryResolver, MirrorPolicy, OverlayBackend,
    OverlayRoots, ResolverBackend, ResourceResolver, SingleRoot, global_resolver,
    install_global_resolver,
};
pub use config::{BackendConfig, ConfigError, StorageConfig, open_source};
pub use error::{ErrorKind, ImportError, StorageError, StorageResult};
pub use events::{ChangeEvent, ChangeKind, ChangeListener, ChangeNotifier, ListenerError, Veto};
pub use import::{DataObject, Importer, JsonImporter};
pub use source::{DataSource, MutableSource, ObservableSource, PublishedSource, RemovableSource};
pub use types::{Capabilities, EntryProperties, NodeKind, WriteMode};
pub use writer::EntryWriter;
