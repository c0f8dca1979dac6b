//! Two-phase change events.
//!
//! Every mutation builds a [`ChangeEvent`] before touching storage, offers
//! it to the registered checkers ([`ChangeNotifier::check_allowed`]) and,
//! only once the mutation has succeeded, delivers it to the listeners
//! ([`ChangeNotifier::notify_changed`]). Delivery is synchronous and happens
//! on the caller's thread.
//!
//! ```ignore
//! let event = ChangeEvent::new("repo", ChangeKind::EntryCreated, "repo://a.txt");
//! notifier.check_allowed(&event)?;   // veto phase
//! write_the_bytes()?;
//! notifier.notify_changed(&event);   // notify phase, never fails
//! ```

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use strum::EnumString;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};

/// Error a listener may return from the notify phase.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// What a mutation did.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum ChangeKind {
    #[strum(serialize = "entry_created")]
    EntryCreated,
    #[strum(serialize = "entry_modified")]
    EntryModified,
    #[strum(serialize = "entry_deleted")]
    EntryDeleted,
    #[strum(serialize = "container_created")]
    ContainerCreated,
    #[strum(serialize = "container_deleted")]
    ContainerDeleted,
    #[strum(serialize = "container_deleted_recursively")]
    ContainerDeletedRecursively,
    /// Rename or move; the event carries the destination.
    #[strum(serialize = "moved")]
    Moved,
}

impl ChangeKind {
    /// Parse from string (case-insensitive).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::EntryCreated => "entry_created",
            ChangeKind::EntryModified => "entry_modified",
            ChangeKind::EntryDeleted => "entry_deleted",
            ChangeKind::ContainerCreated => "container_created",
            ChangeKind::ContainerDeleted => "container_deleted",
            ChangeKind::ContainerDeletedRecursively => "container_deleted_recursively",
            ChangeKind::Moved => "moved",
        }
    }

    /// Deletion of either kind of node.
    pub fn is_delete(&self) -> bool {
        matches!(
            self,
            ChangeKind::EntryDeleted
                | ChangeKind::ContainerDeleted
                | ChangeKind::ContainerDeletedRecursively
        )
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable description of one change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Protocol of the adaptor that produced the event.
    pub source: String,
    /// What happened.
    pub kind: ChangeKind,
    /// Affected path in the source's addressing scheme.
    pub path: String,
    /// Destination for [`ChangeKind::Moved`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
}

impl ChangeEvent {
    /// Create a new event.
    pub fn new(source: impl Into<String>, kind: ChangeKind, path: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            kind,
            path: path.into(),
            destination: None,
        }
    }

    /// Create a move event from `path` to `destination`.
    pub fn moved(
        source: impl Into<String>,
        path: impl Into<String>,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            kind: ChangeKind::Moved,
            path: path.into(),
            destination: Some(destination.into()),
        }
    }
}

impl std::fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.destination {
            Some(dest) => write!(f, "{} {} -> {}", self.kind, self.path, dest),
            None => write!(f, "{} {}", self.kind, self.path),
        }
    }
}

/// Rejection raised by a checker in the veto phase.
#[derive(Debug, Clone, Error)]
#[error("{reason}")]
pub struct Veto {
    pub reason: String,
}

impl Veto {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Observer of storage changes.
///
/// Both phases run synchronously on the thread performing the mutation.
pub trait ChangeListener: Send + Sync {
    /// Veto phase. Returning `Err` aborts the mutation before any side effect.
    fn check_allowed(&self, _event: &ChangeEvent) -> Result<(), Veto> {
        Ok(())
    }

    /// Notify phase, after the mutation completed.
    ///
    /// Errors are logged and never undo the mutation.
    fn changed(&self, event: &ChangeEvent) -> Result<(), ListenerError>;
}

/// Registry of change listeners for one adaptor.
#[derive(Default)]
pub struct ChangeNotifier {
    listeners: RwLock<Vec<Arc<dyn ChangeListener>>>,
}

impl std::fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

fn same_listener(a: &Arc<dyn ChangeListener>, b: &Arc<dyn ChangeListener>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. Returns `false` if it was already registered.
    pub fn add(&self, listener: Arc<dyn ChangeListener>) -> bool {
        let mut listeners = self.listeners.write();
        if listeners.iter().any(|l| same_listener(l, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    /// Unregister a listener. Returns `false` if it was not registered.
    pub fn remove(&self, listener: &Arc<dyn ChangeListener>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !same_listener(l, listener));
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    // Callbacks run without the lock held so listeners may (un)register.
    fn snapshot(&self) -> Vec<Arc<dyn ChangeListener>> {
        self.listeners.read().clone()
    }

    /// Veto phase: the first rejection wins and becomes
    /// [`StorageError::Vetoed`]. A panicking checker is logged and skipped.
    pub fn check_allowed(&self, event: &ChangeEvent) -> StorageResult<()> {
        for listener in self.snapshot() {
            match catch_unwind(AssertUnwindSafe(|| listener.check_allowed(event))) {
                Ok(Ok(())) => {}
                Ok(Err(veto)) => {
                    debug!("change {} vetoed: {}", event, veto);
                    return Err(StorageError::Vetoed {
                        path: event.path.clone(),
                        veto,
                    });
                }
                Err(_) => warn!("checker panicked while checking {}", event),
            }
        }
        Ok(())
    }

    /// Notify phase: every listener sees the event even if an earlier one
    /// fails or panics.
    pub fn notify_changed(&self, event: &ChangeEvent) {
        for listener in self.snapshot() {
            match catch_unwind(AssertUnwindSafe(|| listener.changed(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("listener failed on {}: {}", event, e),
                Err(_) => warn!("listener panicked on {}", event),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

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

    struct Rejecter;

    impl ChangeListener for Rejecter {
        fn check_allowed(&self, _event: &ChangeEvent) -> Result<(), Veto> {
            Err(Veto::new("read-only today"))
        }

        fn changed(&self, _event: &ChangeEvent) -> Result<(), ListenerError> {
            Ok(())
        }
    }

    struct Broken;

    impl ChangeListener for Broken {
        fn changed(&self, _event: &ChangeEvent) -> Result<(), ListenerError> {
            Err("listener bug".into())
        }
    }

    struct Panicky;

    impl ChangeListener for Panicky {
        fn changed(&self, _event: &ChangeEvent) -> Result<(), ListenerError> {
            panic!("boom");
        }
    }

    fn event() -> ChangeEvent {
        ChangeEvent::new("repo", ChangeKind::EntryCreated, "repo://a.txt")
    }

    #[test]
    fn test_kind_strings() {
        assert_eq!(ChangeKind::from_str("Entry_Created"), Some(ChangeKind::EntryCreated));
        assert_eq!(ChangeKind::ContainerDeletedRecursively.to_string(), "container_deleted_recursively");
        assert!(ChangeKind::EntryDeleted.is_delete());
        assert!(!ChangeKind::Moved.is_delete());
        assert_eq!(ChangeKind::from_str("nope"), None);
    }

    #[test]
    fn test_add_remove() {
        let notifier = ChangeNotifier::new();
        let rec: Arc<dyn ChangeListener> = Arc::new(Recorder::default());

        assert!(notifier.add(Arc::clone(&rec)));
        assert!(!notifier.add(Arc::clone(&rec)));
        assert_eq!(notifier.len(), 1);

        assert!(notifier.remove(&rec));
        assert!(!notifier.remove(&rec));
        assert!(notifier.is_empty());
    }

    #[test]
    fn test_veto_wins() {
        let notifier = ChangeNotifier::new();
        notifier.add(Arc::new(Recorder::default()));
        notifier.add(Arc::new(Rejecter));

        let err = notifier.check_allowed(&event()).unwrap_err();
        match err {
            StorageError::Vetoed { path, veto } => {
                assert_eq!(path, "repo://a.txt");
                assert_eq!(veto.reason, "read-only today");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_no_listeners_allows() {
        assert!(ChangeNotifier::new().check_allowed(&event()).is_ok());
    }

    #[test]
    fn test_failing_listeners_do_not_block_delivery() {
        let notifier = ChangeNotifier::new();
        let rec = Arc::new(Recorder::default());
        notifier.add(Arc::new(Broken));
        notifier.add(Arc::new(Panicky));
        notifier.add(rec.clone());

        notifier.notify_changed(&event());

        assert_eq!(rec.seen.lock().as_slice(), &[event()]);
    }

    #[test]
    fn test_moved_display() {
        let ev = ChangeEvent::moved("repo", "repo://a", "repo://b");
        assert_eq!(ev.to_string(), "moved repo://a -> repo://b");
    }
}
