//! Concrete storage backends.

pub mod filesystem;
pub mod overlay;
pub mod resolver;

pub use filesystem::{FilesystemBackend, MirrorPolicy, SingleRoot};
pub use overlay::{OverlayBackend, OverlayRoots};
pub use resolver::{
    DirectoryResolver, MemoryResolver, ResolverBackend, ResourceResolver, global_resolver,
    install_global_resolver,
};
