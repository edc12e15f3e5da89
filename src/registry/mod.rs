//! Class registry - Resolved class table
//!
//! Built once from a `ManifestSnapshot` at startup and never mutated
//! afterwards. Share it as `Arc<ClassRegistry>`; reads need no locking.

use std::collections::HashMap;
use thiserror::Error;

use crate::catalog::{ClassHandle, DistributedObject, FieldError, FieldValue};
use crate::manifest::{ManifestSnapshot, ResolvedSymbol};
use crate::schema::{ClassId, Role, SchemaHash};

/// Registry errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Class id {class_id} has two primary symbols: {first} and {second}")]
    ConflictingPrimary {
        class_id: ClassId,
        first: String,
        second: String,
    },

    #[error("Unknown class id: {0}")]
    UnknownClassId(ClassId),

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("{class} does not handle field '{field}'")]
    UnhandledField { class: String, field: String },

    #[error("Field error: {0}")]
    Field(#[from] FieldError),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Read-only mapping from symbol name and class id to implementation
#[derive(Debug)]
pub struct ClassRegistry {
    hash: SchemaHash,
    role: Role,
    symbols: Vec<ResolvedSymbol>,
    by_name: HashMap<String, usize>,
    by_id: HashMap<ClassId, usize>,
}

impl ClassRegistry {
    /// Index a snapshot. Nothing is returned unless every entry indexes cleanly.
    pub fn build(snapshot: ManifestSnapshot) -> RegistryResult<Self> {
        let hash = snapshot.hash();
        let role = snapshot.role();
        let symbols = snapshot.symbols().to_vec();

        let mut by_name = HashMap::with_capacity(symbols.len());
        let mut by_id = HashMap::new();

        for (index, symbol) in symbols.iter().enumerate() {
            by_name.insert(symbol.entry.name.clone(), index);

            if !symbol.entry.primary {
                continue;
            }
            if let Some(&existing) = by_id.get(&symbol.entry.class_id) {
                let existing: &ResolvedSymbol = &symbols[existing];
                return Err(RegistryError::ConflictingPrimary {
                    class_id: symbol.entry.class_id,
                    first: existing.entry.name.clone(),
                    second: symbol.entry.name.clone(),
                });
            }
            by_id.insert(symbol.entry.class_id, index);
        }

        tracing::info!(
            "Class registry ready: {} symbols, {} classes, schema hash {}",
            symbols.len(),
            by_id.len(),
            hash
        );

        Ok(Self {
            hash,
            role,
            symbols,
            by_name,
            by_id,
        })
    }

    pub fn schema_hash(&self) -> SchemaHash {
        self.hash
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Whether a peer advertising `remote` may talk to this process
    pub fn is_compatible(&self, remote: SchemaHash) -> bool {
        self.hash == remote
    }

    /// Every symbol, in manifest order
    pub fn symbols(&self) -> &[ResolvedSymbol] {
        &self.symbols
    }

    pub fn by_name(&self, name: &str) -> Option<&ResolvedSymbol> {
        self.by_name.get(name).map(|&i| &self.symbols[i])
    }

    /// The primary symbol of a class
    pub fn by_id(&self, class_id: ClassId) -> Option<&ResolvedSymbol> {
        self.by_id.get(&class_id).map(|&i| &self.symbols[i])
    }

    pub fn class_id_of(&self, name: &str) -> Option<ClassId> {
        self.by_name(name).map(|s| s.entry.class_id)
    }

    pub fn handle(&self, name: &str) -> Option<&ClassHandle> {
        self.by_name(name).map(|s| &s.handle)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Number of classes this role can instantiate by id
    pub fn class_count(&self) -> usize {
        self.by_id.len()
    }

    /// Construct an object of the class with this id
    pub fn instantiate(&self, class_id: ClassId) -> RegistryResult<Box<dyn DistributedObject>> {
        let symbol = self
            .by_id(class_id)
            .ok_or(RegistryError::UnknownClassId(class_id))?;
        tracing::trace!("Instantiating {} for class {}", symbol.entry.name, class_id);
        Ok(symbol.handle.construct())
    }

    /// Construct an object through a specific symbol, e.g. an owner view
    pub fn instantiate_named(&self, name: &str) -> RegistryResult<Box<dyn DistributedObject>> {
        let symbol = self
            .by_name(name)
            .ok_or_else(|| RegistryError::UnknownSymbol(name.to_string()))?;
        Ok(symbol.handle.construct())
    }

    /// Route a field update to an object, refusing fields its class does not handle
    pub fn apply_field(
        &self,
        object: &mut dyn DistributedObject,
        field: &str,
        value: FieldValue,
    ) -> RegistryResult<()> {
        let handle = self
            .handle(object.class_name())
            .ok_or_else(|| RegistryError::UnknownSymbol(object.class_name().to_string()))?;

        if !handle.handles(field) {
            return Err(RegistryError::UnhandledField {
                class: handle.name().to_string(),
                field: field.to_string(),
            });
        }

        object.apply_field(field, value)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ClassCatalog, DynamicObject};
    use crate::manifest::{ManifestEntry, ManifestLoader, ManifestOrigin, SymbolManifest};
    use crate::schema::compile_str;
    use std::sync::Arc;

    const SCHEMA: &str = "\
        from otp.distributed import DistributedNode\n\
        from otp.avatar import DistributedAvatar/AI/OV\n\
        dclass DistributedNode { setX(int16) broadcast ram; };\n\
        dclass DistributedAvatar : DistributedNode { setName(string) required; };\n";

    fn registry(role: Role) -> ClassRegistry {
        let schema = compile_str(SCHEMA).unwrap();
        let catalog = ClassCatalog::from_schema(&schema, role);
        let snapshot = ManifestLoader::new(
            ManifestOrigin::InMemory(schema.manifest(role)),
            &catalog,
        )
        .with_role(role)
        .load()
        .unwrap();
        ClassRegistry::build(snapshot).unwrap()
    }

    #[test]
    fn test_lookup_by_name_and_id() {
        let registry = registry(Role::Client);
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.class_count(), 2);

        assert_eq!(registry.class_id_of("DistributedAvatarOV"), Some(ClassId(1)));
        assert_eq!(
            registry.by_id(ClassId(1)).unwrap().entry.name,
            "DistributedAvatar"
        );
        assert!(registry.by_id(ClassId(9)).is_none());
        assert!(registry.by_name("DistributedAvatarAI").is_none());
    }

    #[test]
    fn test_ai_primary_symbol() {
        let registry = registry(Role::Ai);
        assert_eq!(registry.len(), 1);
        let object = registry.instantiate(ClassId(1)).unwrap();
        assert_eq!(object.class_name(), "DistributedAvatarAI");
        assert_eq!(
            registry.instantiate(ClassId(0)).unwrap_err(),
            RegistryError::UnknownClassId(ClassId(0))
        );
    }

    #[test]
    fn test_instantiate_and_apply_fields() {
        let registry = registry(Role::Client);
        let mut object = registry.instantiate(ClassId(1)).unwrap();

        registry
            .apply_field(object.as_mut(), "setX", FieldValue::Int(12))
            .unwrap();
        registry
            .apply_field(object.as_mut(), "setName", FieldValue::Str("Flippy".to_string()))
            .unwrap();

        let err = registry
            .apply_field(object.as_mut(), "setHp", FieldValue::Int(1))
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::UnhandledField {
                class: "DistributedAvatar".to_string(),
                field: "setHp".to_string(),
            }
        );

        let avatar = object.as_any().downcast_ref::<DynamicObject>().unwrap();
        assert_eq!(avatar.get("setX"), Some(&FieldValue::Int(12)));

        let ov = registry.instantiate_named("DistributedAvatarOV").unwrap();
        assert_eq!(ov.class_name(), "DistributedAvatarOV");
        assert!(matches!(
            registry.instantiate_named("Nope"),
            Err(RegistryError::UnknownSymbol(_))
        ));
    }

    #[test]
    fn test_conflicting_primary() {
        let schema = compile_str(SCHEMA).unwrap();
        let catalog = ClassCatalog::from_schema(&schema, Role::Client);
        let manifest = SymbolManifest::new(
            schema.hash(),
            Role::Client,
            vec![
                ManifestEntry::new("otp.distributed", "DistributedNode", ClassId(0)),
                ManifestEntry::primary("otp.avatar", "DistributedAvatar", "DistributedAvatar", ClassId(0)),
            ],
        );
        let snapshot = ManifestLoader::new(ManifestOrigin::InMemory(manifest), &catalog)
            .load()
            .unwrap();

        let err = ClassRegistry::build(snapshot).unwrap_err();
        assert!(matches!(err, RegistryError::ConflictingPrimary { class_id: ClassId(0), .. }));
    }

    #[test]
    fn test_compatibility() {
        let registry = registry(Role::Client);
        let hash = compile_str(SCHEMA).unwrap().hash();
        assert!(registry.is_compatible(hash));
        assert!(!registry.is_compatible(SchemaHash(hash.value().wrapping_add(1))));
    }

    #[test]
    fn test_shared_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ClassRegistry>();

        let registry = Arc::new(registry(Role::Client));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.instantiate(ClassId(0)).unwrap().class_name().to_string())
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), "DistributedNode");
        }
    }
}
