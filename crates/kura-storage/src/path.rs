//! Logical path model.
//!
//! Logical paths are `/`-separated, relative, and never start with a
//! separator. The empty string is the root container. Nothing here touches
//! storage; backends map these strings onto physical locations.

use crate::error::{StorageError, StorageResult};

/// Separator between logical path components.
pub const SEPARATOR: char = '/';

/// Placeholder returned as the base name of the root container.
///
/// A separator can never be part of a real name, so callers can tell the
/// sentinel apart from any child name.
pub const ROOT_NAME: &str = "/";

/// Returns true if `path` denotes the root container.
pub fn is_root(path: &str) -> bool {
    path.is_empty()
}

/// Parent of a logical path.
///
/// `None` only for the root itself. A path without a separator lives
/// directly in the root, so its parent is `Some("")`.
pub fn parent(path: &str) -> Option<&str> {
    if is_root(path) {
        return None;
    }
    match path.rfind(SEPARATOR) {
        Some(idx) => Some(&path[..idx]),
        None => Some(""),
    }
}

/// Path of the child `name` inside `container`.
pub fn join(container: &str, name: &str) -> String {
    if is_root(container) {
        name.to_string()
    } else {
        format!("{container}{SEPARATOR}{name}")
    }
}

/// Last component of a logical path; [`ROOT_NAME`] for the root.
pub fn base_name(path: &str) -> &str {
    if is_root(path) {
        return ROOT_NAME;
    }
    match path.rfind(SEPARATOR) {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Split a path into `(parent, name)`; `None` for the root.
pub fn split(path: &str) -> Option<(&str, &str)> {
    parent(path).map(|p| (p, base_name(path)))
}

/// Reject paths that could leave the container they are resolved under.
///
/// Every component must be a plain name: no empty component (leading,
/// trailing or doubled separator), no `.` and no `..`. The root is valid.
pub fn validate(path: &str) -> StorageResult<()> {
    if is_root(path) {
        return Ok(());
    }
    for component in path.split(SEPARATOR) {
        match component {
            "" | "." | ".." => {
                return Err(StorageError::invalid_path(format!(
                    "'{path}' has a '{component}' component"
                )));
            }
            _ if component.contains('\\') => {
                return Err(StorageError::invalid_path(format!(
                    "'{path}' contains a backslash"
                )));
            }
            _ => {}
        }
    }
    Ok(())
}
