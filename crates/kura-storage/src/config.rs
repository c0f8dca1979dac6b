//! Backend configuration.
//!
//! A [`StorageConfig`] names the protocol and picks a backend. It is usually
//! read from RON:
//!
//! ```ron
//! StorageConfig(
//!     protocol: "file",
//!     backend: Filesystem(
//!         root: "/srv/data",
//!         mirror: Some("/srv/www"),
//!         url_prefix: Some("https://static.example.com/"),
//!     ),
//! )
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::backends::filesystem::{FilesystemBackend, MirrorPolicy};
use crate::backends::overlay::OverlayBackend;
use crate::backends::resolver::ResolverBackend;
use crate::error::StorageResult;
use crate::source::DataSource;

/// Errors loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

/// Which backend to build, with its settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BackendConfig {
    /// Single root directory.
    Filesystem {
        root: PathBuf,
        #[serde(default)]
        mirror: Option<PathBuf>,
        #[serde(default)]
        url_prefix: Option<String>,
        /// Defaults to `url_prefix`.
        #[serde(default)]
        forward_url_prefix: Option<String>,
        #[serde(default)]
        mirror_policy: MirrorPolicy,
    },
    /// Stacked directories, highest priority first.
    Overlay { roots: Vec<PathBuf> },
    /// The process-wide resource resolver, optionally below `base`.
    Resolver {
        #[serde(default)]
        base: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub protocol: String,
    pub backend: BackendConfig,
}

impl StorageConfig {
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_ron(&text)
    }

    /// Build the configured backend.
    pub fn open(&self) -> StorageResult<Arc<dyn DataSource>> {
        open_source(self)
    }
}

/// Build the backend described by `config`.
pub fn open_source(config: &StorageConfig) -> StorageResult<Arc<dyn DataSource>> {
    let protocol = config.protocol.as_str();
    let source: Arc<dyn DataSource> = match &config.backend {
        BackendConfig::Filesystem {
            root,
            mirror,
            url_prefix,
            forward_url_prefix,
            mirror_policy,
        } => {
            info!("opening filesystem storage '{}' at {}", protocol, root.display());
            let mut backend =
                FilesystemBackend::new(protocol, root)?.with_mirror_policy(*mirror_policy);
            if let Some(mirror) = mirror {
                backend = backend.with_mirror(mirror);
            }
            if let Some(prefix) = url_prefix {
                backend = backend.with_url_prefix(prefix);
            }
            if let Some(prefix) = forward_url_prefix {
                backend = backend.with_forward_url_prefix(prefix);
            }
            Arc::new(backend)
        }
        BackendConfig::Overlay { roots } => {
            info!("opening overlay storage '{}' over {} roots", protocol, roots.len());
            Arc::new(OverlayBackend::overlay(protocol, roots)?)
        }
        BackendConfig::Resolver { base } => {
            info!("opening resolver storage '{}'", protocol);
            Arc::new(ResolverBackend::from_global(protocol, base.clone())?)
        }
    };
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    #[test]
    fn test_parse_filesystem() {
        let config = StorageConfig::from_ron(
            r#"StorageConfig(
                protocol: "file",
                backend: Filesystem(
                    root: "/srv/data",
                    url_prefix: Some("/files/"),
                    mirror_policy: copy_if_newer,
                ),
            )"#,
        )
        .unwrap();
        assert_eq!(config.protocol, "file");
        match config.backend {
            BackendConfig::Filesystem {
                root,
                mirror,
                url_prefix,
                forward_url_prefix,
                mirror_policy,
            } => {
                assert_eq!(root, PathBuf::from("/srv/data"));
                assert_eq!(mirror, None);
                assert_eq!(url_prefix.as_deref(), Some("/files/"));
                assert_eq!(forward_url_prefix, None);
                assert_eq!(mirror_policy, MirrorPolicy::CopyIfNewer);
            }
            other => panic!("unexpected backend {other:?}"),
        }
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            StorageConfig::from_ron("StorageConfig(protocol: 3)"),
            Err(ConfigError::Ron(_))
        ));
        assert!(matches!(
            StorageConfig::load("/nonexistent/kura.ron"),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_load_and_open_filesystem() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("data");
        let config = StorageConfig {
            protocol: "file".into(),
            backend: BackendConfig::Filesystem {
                root: root.clone(),
                mirror: Some(dir.path().join("www")),
                url_prefix: Some("/files/".into()),
                forward_url_prefix: None,
                mirror_policy: MirrorPolicy::CopyIfAbsent,
            },
        };
        let file = dir.path().join("storage.ron");
        let text = ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::default()).unwrap();
        std::fs::write(&file, text).unwrap();

        let loaded = StorageConfig::load(&file).unwrap();
        assert_eq!(loaded, config);

        let source = loaded.open().unwrap();
        assert_eq!(source.protocol(), "file");
        assert!(root.is_dir());
        assert_eq!(source.as_published().unwrap().forward_url("a").unwrap(), "/files/a");
    }

    #[test]
    fn test_open_overlay_without_roots() {
        let config = StorageConfig {
            protocol: "lib".into(),
            backend: BackendConfig::Overlay { roots: Vec::new() },
        };
        let err = open_source(&config).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
