//! Manifest module - Symbol manifests and the manifest loader
//!
//! A `SymbolManifest` is the ordered list of symbols a process must resolve,
//! stamped with the schema hash it was generated from. The loader resolves
//! every entry against a `SymbolSource` and returns a `ManifestSnapshot`.

mod file;
mod loader;

pub use file::*;
pub use loader::*;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::catalog::ClassHandle;
use crate::schema::{ClassId, Role, SchemaHash};

/// One symbol a process must resolve
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Module the symbol is imported from, e.g. `toontown.coghq`
    #[serde(rename = "module")]
    pub module_path: String,
    /// Symbol name, including any role suffix
    pub name: String,
    /// Distributed class this symbol implements
    #[serde(rename = "class")]
    pub class_name: String,
    pub class_id: ClassId,
    /// Whether this is the symbol instantiated for `class_id`
    #[serde(default = "default_primary")]
    pub primary: bool,
}

fn default_primary() -> bool {
    true
}

impl ManifestEntry {
    /// Entry for a symbol named after its class
    pub fn new(module_path: &str, name: &str, class_id: ClassId) -> Self {
        Self::primary(module_path, name, name, class_id)
    }

    pub fn primary(module_path: &str, name: &str, class_name: &str, class_id: ClassId) -> Self {
        Self {
            module_path: module_path.to_string(),
            name: name.to_string(),
            class_name: class_name.to_string(),
            class_id,
            primary: true,
        }
    }

    /// Entry for an auxiliary view of a class (e.g. an owner view)
    pub fn variant(module_path: &str, name: &str, class_name: &str, class_id: ClassId) -> Self {
        Self {
            primary: false,
            ..Self::primary(module_path, name, class_name, class_id)
        }
    }

    /// `module.Name`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.module_path, self.name)
    }
}

/// Ordered symbol list plus the hash of the schema it came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolManifest {
    hash: SchemaHash,
    #[serde(default)]
    role: Role,
    #[serde(default, rename = "symbols")]
    entries: Vec<ManifestEntry>,
}

impl SymbolManifest {
    pub fn new(hash: SchemaHash, role: Role, entries: Vec<ManifestEntry>) -> Self {
        Self {
            hash,
            role,
            entries,
        }
    }

    pub fn hash(&self) -> SchemaHash {
        self.hash
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What to do when a manifest names the same symbol twice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Fail the load with `DuplicateSymbol`
    #[default]
    Reject,
    /// The later entry replaces the earlier one, keeping the earlier position
    Shadow,
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DuplicatePolicy::Reject => f.write_str("reject"),
            DuplicatePolicy::Shadow => f.write_str("shadow"),
        }
    }
}

impl FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reject" => Ok(DuplicatePolicy::Reject),
            "shadow" => Ok(DuplicatePolicy::Shadow),
            other => Err(format!(
                "unknown duplicate policy '{}' (expected reject or shadow)",
                other
            )),
        }
    }
}

/// A manifest entry together with the implementation it resolved to
#[derive(Debug, Clone)]
pub struct ResolvedSymbol {
    pub entry: ManifestEntry,
    pub handle: ClassHandle,
}

/// Result of a successful load: every symbol resolved, in manifest order
#[derive(Debug, Clone)]
pub struct ManifestSnapshot {
    hash: SchemaHash,
    role: Role,
    symbols: Vec<ResolvedSymbol>,
    index: HashMap<String, usize>,
}

impl ManifestSnapshot {
    pub(crate) fn new(hash: SchemaHash, role: Role, symbols: Vec<ResolvedSymbol>) -> Self {
        let index = symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (s.entry.name.clone(), i))
            .collect();
        Self {
            hash,
            role,
            symbols,
            index,
        }
    }

    pub fn hash(&self) -> SchemaHash {
        self.hash
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn symbols(&self) -> &[ResolvedSymbol] {
        &self.symbols
    }

    pub fn names(&self) -> Vec<&str> {
        self.symbols.iter().map(|s| s.entry.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Look up the implementation exported under `name`
    pub fn handle(&self, name: &str) -> Option<&ClassHandle> {
        self.index.get(name).map(|&i| &self.symbols[i].handle)
    }

    /// Explicit name -> implementation mapping, in manifest order
    pub fn exports(&self) -> impl Iterator<Item = (&str, &ClassHandle)> {
        self.symbols
            .iter()
            .map(|s| (s.entry.name.as_str(), &s.handle))
    }

    /// The manifest this snapshot was resolved from
    pub fn manifest(&self) -> SymbolManifest {
        SymbolManifest::new(
            self.hash,
            self.role,
            self.symbols.iter().map(|s| s.entry.clone()).collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_constructors() {
        let entry = ManifestEntry::new("pkg.a", "Foo", ClassId(0));
        assert_eq!(entry.class_name, "Foo");
        assert!(entry.primary);
        assert_eq!(entry.qualified_name(), "pkg.a.Foo");

        let variant = ManifestEntry::variant("pkg.a", "FooOV", "Foo", ClassId(0));
        assert!(!variant.primary);
        assert_eq!(variant.class_name, "Foo");
    }

    #[test]
    fn test_duplicate_policy_parsing() {
        assert_eq!("Shadow".parse::<DuplicatePolicy>().unwrap(), DuplicatePolicy::Shadow);
        assert_eq!(DuplicatePolicy::default(), DuplicatePolicy::Reject);
        assert!("ignore".parse::<DuplicatePolicy>().is_err());
    }
}
