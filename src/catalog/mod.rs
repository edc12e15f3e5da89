//! Class catalog - Implementations linked into this process
//!
//! The catalog is what manifest symbols are resolved against. Each entry
//! pairs a constructor with the set of fields the implementation handles.

mod dynamic;

pub use dynamic::DynamicObject;

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::manifest::SymbolSource;
use crate::schema::{Role, Schema};

/// Catalog errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Class already registered: {module_path}.{name}")]
    AlreadyRegistered { module_path: String, name: String },
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// Errors raised by an object while applying a field
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FieldError {
    #[error("{class} has no field '{field}'")]
    Unknown { class: String, field: String },

    #[error("Invalid value for {class}.{field}: {reason}")]
    InvalidValue {
        class: String,
        field: String,
        reason: String,
    },
}

/// A field value as handed to an object by the replication runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<FieldValue>),
}

/// An instance of a distributed class
pub trait DistributedObject: Send + Sync + fmt::Debug {
    /// Symbol name of the implementation that built this object
    fn class_name(&self) -> &str;

    /// Apply one field update
    fn apply_field(&mut self, field: &str, value: FieldValue) -> Result<(), FieldError>;

    fn as_any(&self) -> &dyn Any;
}

/// Builds a fresh object of one class
pub type Constructor = Arc<dyn Fn() -> Box<dyn DistributedObject> + Send + Sync>;

/// Shared handle to a class implementation
pub type ClassHandle = Arc<ClassImpl>;

/// A runnable class implementation: constructor plus field-handler set
pub struct ClassImpl {
    module_path: String,
    name: String,
    constructor: Constructor,
    fields: BTreeSet<String>,
}

impl ClassImpl {
    pub fn new<F>(module_path: impl Into<String>, name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn() -> Box<dyn DistributedObject> + Send + Sync + 'static,
    {
        Self {
            module_path: module_path.into(),
            name: name.into(),
            constructor: Arc::new(constructor),
            fields: BTreeSet::new(),
        }
    }

    /// Declare the fields this implementation handles
    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn module_path(&self) -> &str {
        &self.module_path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(String::as_str)
    }

    pub fn handles(&self, field: &str) -> bool {
        self.fields.contains(field)
    }

    pub fn construct(&self) -> Box<dyn DistributedObject> {
        (self.constructor)()
    }
}

impl fmt::Debug for ClassImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassImpl")
            .field("module_path", &self.module_path)
            .field("name", &self.name)
            .field("fields", &self.fields)
            .finish()
    }
}

/// Every class implementation available to the loader
#[derive(Debug, Default)]
pub struct ClassCatalog {
    classes: HashMap<(String, String), ClassHandle>,
}

impl ClassCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one implementation
    pub fn register(&mut self, class: ClassImpl) -> CatalogResult<ClassHandle> {
        let key = (class.module_path.clone(), class.name.clone());
        if self.classes.contains_key(&key) {
            return Err(CatalogError::AlreadyRegistered {
                module_path: key.0,
                name: key.1,
            });
        }

        let handle = Arc::new(class);
        self.classes.insert(key, handle.clone());
        Ok(handle)
    }

    /// Build a catalog of `DynamicObject` implementations for every symbol
    /// `role` imports from `schema`
    ///
    /// Used by tooling processes that have no compiled gameplay classes.
    pub fn from_schema(schema: &Schema, role: Role) -> Self {
        let mut catalog = Self::new();
        for entry in schema.manifest(role).entries() {
            let key = (entry.module_path.clone(), entry.name.clone());
            if catalog.classes.contains_key(&key) {
                continue;
            }

            let fields: Arc<BTreeSet<String>> = Arc::new(
                schema
                    .inherited_fields(&entry.class_name)
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            );
            let name = entry.name.clone();
            let accepted = fields.clone();
            let class = ClassImpl::new(&entry.module_path, &entry.name, move || {
                Box::new(DynamicObject::new(&name, accepted.clone())) as Box<dyn DistributedObject>
            })
            .with_fields(fields.iter().cloned());

            catalog.classes.insert(key, Arc::new(class));
        }
        catalog
    }

    pub fn get(&self, module_path: &str, name: &str) -> Option<&ClassHandle> {
        self.classes.get(&(module_path.to_string(), name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl SymbolSource for ClassCatalog {
    fn locate(&self, module_path: &str, name: &str) -> Option<ClassHandle> {
        self.get(module_path, name).cloned()
    }
}
