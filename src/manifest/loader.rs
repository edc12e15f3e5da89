//! Manifest loader
//!
//! `ManifestLoader::load` produces the resolved symbol list and schema hash.
//! It either resolves every symbol or returns an error; no partial snapshot
//! is ever handed out.

use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

use super::{
    read_manifest, DuplicatePolicy, ManifestFileError, ManifestSnapshot, ResolvedSymbol,
    SymbolManifest,
};
use crate::catalog::ClassHandle;
use crate::schema::{compile_files, Role, SchemaError, SchemaHash};

/// Where symbols are looked up at load time
pub trait SymbolSource {
    /// Find the implementation of `name` exported by `module_path`
    fn locate(&self, module_path: &str, name: &str) -> Option<ClassHandle>;
}

/// Loader errors
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Unresolved symbol: {name} (from {module_path})")]
    UnresolvedSymbol { module_path: String, name: String },

    #[error("Duplicate symbol: {name} imported from {first_module} and {second_module}")]
    DuplicateSymbol {
        name: String,
        first_module: String,
        second_module: String,
    },

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Manifest file error: {0}")]
    File(#[from] ManifestFileError),

    #[error("Manifest is stale: schema hash is {expected}, manifest was generated from {found}")]
    StaleManifest {
        expected: SchemaHash,
        found: SchemaHash,
    },

    #[error("Manifest was generated for role {found}, loader expects {expected}")]
    RoleMismatch { expected: Role, found: Role },
}

pub type LoadResult<T> = Result<T, LoadError>;

/// Where the loader gets its manifest from
#[derive(Debug, Clone)]
pub enum ManifestOrigin {
    /// Compile these schema files, in order
    Schema(Vec<PathBuf>),
    /// Read a generated manifest file, optionally checking it is current
    Generated {
        path: PathBuf,
        verify_against: Option<Vec<PathBuf>>,
    },
    /// A manifest already in memory
    InMemory(SymbolManifest),
}

/// Loads a manifest and resolves it against a symbol source
pub struct ManifestLoader<'a> {
    origin: ManifestOrigin,
    source: &'a dyn SymbolSource,
    role: Role,
    duplicates: DuplicatePolicy,
}

impl<'a> ManifestLoader<'a> {
    pub fn new(origin: ManifestOrigin, source: &'a dyn SymbolSource) -> Self {
        Self {
            origin,
            source,
            role: Role::default(),
            duplicates: DuplicatePolicy::default(),
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicates = policy;
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Load the manifest and resolve every symbol
    pub fn load(&self) -> LoadResult<ManifestSnapshot> {
        let manifest = self.read_origin()?;
        let hash = manifest.hash();
        let entries = dedup(manifest, self.duplicates)?;

        let mut resolved = Vec::with_capacity(entries.len());
        let mut missing = Vec::new();

        for entry in entries {
            match self.source.locate(&entry.module_path, &entry.name) {
                Some(handle) => resolved.push(ResolvedSymbol { entry, handle }),
                None => {
                    tracing::error!("Unresolved symbol {}", entry.qualified_name());
                    missing.push(entry);
                }
            }
        }

        if let Some(first) = missing.into_iter().next() {
            return Err(LoadError::UnresolvedSymbol {
                module_path: first.module_path,
                name: first.name,
            });
        }

        tracing::info!(
            "Loaded {} symbols for role {} (schema hash {})",
            resolved.len(),
            self.role,
            hash
        );

        Ok(ManifestSnapshot::new(hash, self.role, resolved))
    }

    fn read_origin(&self) -> LoadResult<SymbolManifest> {
        let manifest = match &self.origin {
            ManifestOrigin::Schema(paths) => {
                let schema = compile_files(paths)?;
                return Ok(schema.manifest(self.role));
            }
            ManifestOrigin::Generated {
                path,
                verify_against,
            } => {
                let manifest = read_manifest(path)?;
                if let Some(paths) = verify_against {
                    let expected = compile_files(paths)?.hash();
                    if expected != manifest.hash() {
                        return Err(LoadError::StaleManifest {
                            expected,
                            found: manifest.hash(),
                        });
                    }
                }
                manifest
            }
            ManifestOrigin::InMemory(manifest) => manifest.clone(),
        };

        if manifest.role() != self.role {
            return Err(LoadError::RoleMismatch {
                expected: self.role,
                found: manifest.role(),
            });
        }

        Ok(manifest)
    }
}

/// Apply the duplicate policy, returning entries in manifest order
fn dedup(
    manifest: SymbolManifest,
    policy: DuplicatePolicy,
) -> LoadResult<Vec<super::ManifestEntry>> {
    let mut entries: Vec<super::ManifestEntry> = Vec::with_capacity(manifest.len());
    let mut seen: HashMap<String, usize> = HashMap::new();

    for entry in manifest.entries {
        match seen.get(&entry.name) {
            None => {
                seen.insert(entry.name.clone(), entries.len());
                entries.push(entry);
            }
            Some(&index) => match policy {
                DuplicatePolicy::Reject => {
                    return Err(LoadError::DuplicateSymbol {
                        name: entry.name,
                        first_module: entries[index].module_path.clone(),
                        second_module: entry.module_path,
                    });
                }
                DuplicatePolicy::Shadow => {
                    tracing::warn!(
                        "{} shadows {}",
                        entry.qualified_name(),
                        entries[index].qualified_name()
                    );
                    entries[index] = entry;
                }
            },
        }
    }

    Ok(entries)
}
