//! dcmanifest - Distributed-class manifest loading
//!
//! Compiles a distributed-class schema into a hash and a symbol manifest,
//! resolves the manifest against the class implementations linked into the
//! process, and builds the read-only class registry the replication runtime
//! instantiates objects from. Peers whose schema hash differs are refused at
//! the handshake.
//!
//! ```no_run
//! use dcmanifest::{ClassCatalog, ClassRegistry, ManifestLoader, ManifestOrigin, Role};
//!
//! # fn main() -> anyhow::Result<()> {
//! let catalog = ClassCatalog::new(); // register game classes here
//! let snapshot = ManifestLoader::new(ManifestOrigin::Schema(vec!["game.dc".into()]), &catalog)
//!     .with_role(Role::Ai)
//!     .load()?;
//! let registry = ClassRegistry::build(snapshot)?;
//! println!("schema hash {}", registry.schema_hash());
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod manifest;
pub mod network;
pub mod protocol;
pub mod registry;
pub mod schema;

pub use catalog::{ClassCatalog, ClassHandle, ClassImpl, DistributedObject, DynamicObject, FieldValue};
pub use manifest::{
    DuplicatePolicy, LoadError, ManifestEntry, ManifestLoader, ManifestOrigin, ManifestSnapshot,
    SymbolManifest, SymbolSource,
};
pub use registry::{ClassRegistry, RegistryError};
pub use schema::{ClassId, Role, Schema, SchemaCompiler, SchemaHash};
