//! Shared value types for data sources.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Kind of an addressable node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// File-like node holding bytes.
    Entry,
    /// Directory-like node holding children.
    Container,
}

impl NodeKind {
    pub fn is_entry(&self) -> bool {
        matches!(self, NodeKind::Entry)
    }

    pub fn is_container(&self) -> bool {
        matches!(self, NodeKind::Container)
    }
}

/// How [`MutableSource::open_write_stream`](crate::MutableSource::open_write_stream)
/// treats existing content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Replace the content, creating the entry if needed.
    #[default]
    Truncate,
    /// Append to an existing entry.
    Append,
}

/// Optional capabilities a data source provides beyond the read-side core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    /// Rename, move, write, create and property reads.
    pub mutation: bool,
    /// Single and recursive deletion.
    pub deletion: bool,
    /// Externally servable URLs.
    pub urls: bool,
    /// Veto/notify change events.
    pub events: bool,
}

impl Capabilities {
    /// Only the read-side core.
    pub fn read_only() -> Self {
        Self::default()
    }

    /// Everything.
    pub fn full() -> Self {
        Self {
            mutation: true,
            deletion: true,
            urls: true,
            events: true,
        }
    }
}

/// Metadata snapshot of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryProperties {
    /// Base name (root yields the root placeholder).
    pub name: String,
    pub kind: NodeKind,
    /// Size in bytes; 0 for containers.
    pub size: u64,
    pub last_modified: Option<SystemTime>,
    pub read_only: bool,
}

impl EntryProperties {
    /// Snapshot from filesystem metadata.
    pub fn from_metadata(name: impl Into<String>, meta: &std::fs::Metadata) -> Self {
        let kind = if meta.is_dir() {
            NodeKind::Container
        } else {
            NodeKind::Entry
        };
        Self {
            name: name.into(),
            kind,
            size: if meta.is_dir() { 0 } else { meta.len() },
            last_modified: meta.modified().ok(),
            read_only: meta.permissions().readonly(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_kind() {
        assert!(NodeKind::Entry.is_entry());
        assert!(!NodeKind::Entry.is_container());
        assert!(NodeKind::Container.is_container());
    }

    #[test]
    fn test_capabilities() {
        let ro = Capabilities::read_only();
        assert!(!ro.mutation && !ro.deletion && !ro.urls && !ro.events);
        assert!(Capabilities::full().mutation);
        assert_eq!(WriteMode::default(), WriteMode::Truncate);
    }

    #[test]
    fn test_properties_from_metadata() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("f.txt");
        std::fs::write(&file, b"12345").unwrap();

        let props = EntryProperties::from_metadata("f.txt", &std::fs::metadata(&file).unwrap());
        assert_eq!(props.kind, NodeKind::Entry);
        assert_eq!(props.size, 5);
        assert!(props.last_modified.is_some());

        let props = EntryProperties::from_metadata("d", &std::fs::metadata(dir.path()).unwrap());
        assert_eq!(props.kind, NodeKind::Container);
        assert_eq!(props.size, 0);
    }
}
