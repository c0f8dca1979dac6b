//! Multi-root overlay backend.
//!
//! A logical path is realized by the same relative path below each root.
//! Listings merge every root; all other operations act on the first root
//! holding the path, and new content lands in the first root.

use std::fs;
use std::path::PathBuf;

use crate::adaptor::{HierarchicalAdaptor, Locator, resolve_under};
use crate::error::{StorageError, StorageResult};

/// [`Locator`] over an ordered list of roots.
#[derive(Debug, Clone)]
pub struct OverlayRoots {
    roots: Vec<PathBuf>,
}

impl OverlayRoots {
    /// Requires at least one root. The first root is created if absent.
    pub fn new(roots: impl IntoIterator<Item = impl Into<PathBuf>>) -> StorageResult<Self> {
        let roots: Vec<PathBuf> = roots.into_iter().map(Into::into).collect();
        let Some(first) = roots.first() else {
            return Err(StorageError::config("overlay needs at least one root"));
        };
        fs::create_dir_all(first)
            .map_err(|e| StorageError::io("create root", first.display().to_string(), e))?;
        let roots = roots
            .into_iter()
            .map(|root| dunce::canonicalize(&root).unwrap_or(root))
            .collect();
        Ok(Self { roots })
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

impl Locator for OverlayRoots {
    fn locate(&self, path: &str) -> StorageResult<Vec<PathBuf>> {
        self.roots.iter().map(|root| resolve_under(root, path)).collect()
    }

    fn locate_one(&self, path: &str) -> StorageResult<PathBuf> {
        let mut candidates = self.locate(path)?.into_iter();
        let first = candidates.next().unwrap_or_default();
        if first.exists() {
            return Ok(first);
        }
        Ok(candidates.find(|c| c.exists()).unwrap_or(first))
    }
}

/// Overlay of several directory trees.
pub type OverlayBackend = HierarchicalAdaptor<OverlayRoots>;

impl HierarchicalAdaptor<OverlayRoots> {
    /// Overlay backend over `roots`, highest priority first.
    pub fn overlay(
        protocol: impl Into<String>,
        roots: impl IntoIterator<Item = impl Into<PathBuf>>,
    ) -> StorageResult<Self> {
        Ok(Self::new(protocol, OverlayRoots::new(roots)?))
    }
}
