//! Schema module - Compiles distributed-class schema sources
//!
//! A schema is one or more source files in load order. Compiling them yields:
//! - the `SchemaHash` every communicating process must agree on
//! - the declared distributed classes, numbered by declaration order
//! - the imports that name the implementations each role must resolve

mod hash;
mod lexer;
mod parser;

pub use hash::*;

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use crate::manifest::{ManifestEntry, SymbolManifest};
use parser::Statement;

/// Schema compilation errors
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Failed to read schema {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{origin}:{line}: unexpected character '{found}'")]
    UnexpectedChar {
        origin: String,
        line: usize,
        found: char,
    },

    #[error("{origin}:{line}: unterminated {what}")]
    Unterminated {
        origin: String,
        line: usize,
        what: &'static str,
    },

    #[error("{origin}:{line}: expected {expected}, found {found}")]
    UnexpectedToken {
        origin: String,
        line: usize,
        expected: &'static str,
        found: String,
    },

    #[error("{origin}: unexpected end of input, expected {expected}")]
    UnexpectedEof {
        origin: String,
        expected: &'static str,
    },

    #[error("{origin}:{line}: field declaration has no name")]
    MissingFieldName { origin: String, line: usize },

    #[error("{origin}:{line}: '{name}' is already declared")]
    DuplicateType {
        origin: String,
        line: usize,
        name: String,
    },

    #[error("{origin}:{line}: field '{field}' is declared twice in '{class}'")]
    DuplicateField {
        origin: String,
        line: usize,
        class: String,
        field: String,
    },

    #[error("{origin}:{line}: '{class}' inherits from undeclared class '{parent}'")]
    UnknownParent {
        origin: String,
        line: usize,
        class: String,
        parent: String,
    },

    #[error("{origin}:{line}: '{name}' is imported from {module_path} but no dclass declares it")]
    UndeclaredImport {
        origin: String,
        line: usize,
        module_path: String,
        name: String,
    },

    #[error("Too many distributed classes: {0}")]
    TooManyClasses(usize),
}

pub type SchemaResult<T> = Result<T, SchemaError>;

/// Numeric id of a distributed class, its declaration index in the schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassId(pub u16);

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of process loading a manifest
///
/// Each role imports a different projection of the same schema, but all
/// roles share one hash and one set of class ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Client,
    Ai,
    Uberdog,
}

impl Role {
    /// Suffix of the symbol this role instantiates for a class
    pub fn primary_suffix(&self) -> Option<&'static str> {
        match self {
            Role::Client => None,
            Role::Ai => Some("AI"),
            Role::Uberdog => Some("UD"),
        }
    }

    /// Suffixed variants this role imports in addition to its primary symbol
    fn extra_suffixes(&self) -> &'static [&'static str] {
        match self {
            Role::Client => &["OV"],
            Role::Ai | Role::Uberdog => &[],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Ai => "ai",
            Role::Uberdog => "uberdog",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "client" => Ok(Role::Client),
            "ai" => Ok(Role::Ai),
            "uberdog" | "ud" => Ok(Role::Uberdog),
            other => Err(format!("unknown role '{}' (expected client, ai or uberdog)", other)),
        }
    }
}

/// One name in a `from ... import` list, with its declared suffixes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedSymbol {
    pub name: String,
    pub suffixes: Vec<String>,
}

impl ImportedSymbol {
    pub fn has_suffix(&self, suffix: &str) -> bool {
        self.suffixes.iter().any(|s| s == suffix)
    }
}

/// A `from <module> import ...` statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportDecl {
    pub module_path: String,
    pub symbols: Vec<ImportedSymbol>,
    pub line: usize,
}

/// A declared distributed class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDecl {
    pub id: ClassId,
    pub name: String,
    pub parents: Vec<String>,
    pub fields: Vec<String>,
}

/// A compiled schema
#[derive(Debug, Clone)]
pub struct Schema {
    hash: SchemaHash,
    modules: Vec<String>,
    imports: Vec<ImportDecl>,
    classes: Vec<ClassDecl>,
    structs: Vec<String>,
    keywords: Vec<String>,
    class_index: HashMap<String, usize>,
}

impl Schema {
    pub fn hash(&self) -> SchemaHash {
        self.hash
    }

    /// Modules named by plain `import` statements and `import *` lists
    pub fn modules(&self) -> &[String] {
        &self.modules
    }

    pub fn imports(&self) -> &[ImportDecl] {
        &self.imports
    }

    pub fn classes(&self) -> &[ClassDecl] {
        &self.classes
    }

    pub fn structs(&self) -> &[String] {
        &self.structs
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn class(&self, name: &str) -> Option<&ClassDecl> {
        self.class_index.get(name).map(|&i| &self.classes[i])
    }

    pub fn class_by_id(&self, id: ClassId) -> Option<&ClassDecl> {
        self.classes.get(id.0 as usize)
    }

    /// Every field of `name`, inherited fields first in parent order
    pub fn inherited_fields(&self, name: &str) -> Vec<&str> {
        let mut fields = Vec::new();
        let mut seen = HashSet::new();
        self.collect_fields(name, &mut fields, &mut seen);
        fields
    }

    fn collect_fields<'a>(
        &'a self,
        name: &str,
        fields: &mut Vec<&'a str>,
        seen: &mut HashSet<&'a str>,
    ) {
        let Some(class) = self.class(name) else {
            return;
        };
        for parent in &class.parents {
            self.collect_fields(parent, fields, seen);
        }
        for field in &class.fields {
            if seen.insert(field.as_str()) {
                fields.push(field.as_str());
            }
        }
    }

    /// Project the imports into the symbol manifest for `role`
    ///
    /// Entries appear in import declaration order. Duplicate names are kept;
    /// whether they are an error is the loader's decision.
    pub fn manifest(&self, role: Role) -> SymbolManifest {
        let mut entries = Vec::new();

        for decl in &self.imports {
            for symbol in &decl.symbols {
                let Some(class) = self.class(&symbol.name) else {
                    continue;
                };

                match role.primary_suffix() {
                    None => entries.push(ManifestEntry::primary(
                        &decl.module_path,
                        &symbol.name,
                        &class.name,
                        class.id,
                    )),
                    Some(suffix) if symbol.has_suffix(suffix) => {
                        entries.push(ManifestEntry::primary(
                            &decl.module_path,
                            &format!("{}{}", symbol.name, suffix),
                            &class.name,
                            class.id,
                        ))
                    }
                    Some(_) => {}
                }

                for suffix in role.extra_suffixes() {
                    if symbol.has_suffix(suffix) {
                        entries.push(ManifestEntry::variant(
                            &decl.module_path,
                            &format!("{}{}", symbol.name, suffix),
                            &class.name,
                            class.id,
                        ));
                    }
                }
            }
        }

        SymbolManifest::new(self.hash, role, entries)
    }
}

/// Collects schema sources and compiles them
#[derive(Debug, Default)]
pub struct SchemaCompiler {
    sources: Vec<(String, String)>,
}

impl SchemaCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a source held in memory; `origin` names it in errors
    pub fn add_source(&mut self, origin: impl Into<String>, text: impl Into<String>) -> &mut Self {
        self.sources.push((origin.into(), text.into()));
        self
    }

    /// Read and add a schema file
    pub fn add_file(&mut self, path: &Path) -> SchemaResult<&mut Self> {
        let text = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(self.add_source(path.display().to_string(), text))
    }

    /// Compile every added source, in the order they were added
    pub fn compile(&self) -> SchemaResult<Schema> {
        let mut generator = HashGenerator::new();
        let mut parsed = Vec::with_capacity(self.sources.len());

        for (origin, text) in &self.sources {
            let tokens = lexer::tokenize(origin, text)?;
            generator.add_tokens(&tokens);
            parsed.push((origin.as_str(), parser::parse(origin, &tokens)?));
        }

        let mut schema = Schema {
            hash: generator.finish(),
            modules: Vec::new(),
            imports: Vec::new(),
            classes: Vec::new(),
            structs: Vec::new(),
            keywords: Vec::new(),
            class_index: HashMap::new(),
        };
        let mut type_names = HashSet::new();
        let mut import_origins = Vec::new();

        for (origin, statements) in parsed {
            for statement in statements {
                match statement {
                    Statement::ModuleImport { module_path, .. } => {
                        schema.modules.push(module_path);
                    }
                    Statement::SymbolImport(decl) => {
                        import_origins.push(origin);
                        schema.imports.push(decl);
                    }
                    Statement::Class {
                        name,
                        parents,
                        fields,
                        line,
                    } => {
                        if !type_names.insert(name.clone()) {
                            return Err(SchemaError::DuplicateType {
                                origin: origin.to_string(),
                                line,
                                name,
                            });
                        }
                        check_fields(origin, line, &name, &fields)?;
                        for parent in &parents {
                            if !schema.class_index.contains_key(parent) {
                                return Err(SchemaError::UnknownParent {
                                    origin: origin.to_string(),
                                    line,
                                    class: name,
                                    parent: parent.clone(),
                                });
                            }
                        }

                        let index = schema.classes.len();
                        let id = u16::try_from(index)
                            .map_err(|_| SchemaError::TooManyClasses(index + 1))?;
                        schema.class_index.insert(name.clone(), index);
                        schema.classes.push(ClassDecl {
                            id: ClassId(id),
                            name,
                            parents,
                            fields,
                        });
                    }
                    Statement::Struct { name, fields, line } => {
                        if !type_names.insert(name.clone()) {
                            return Err(SchemaError::DuplicateType {
                                origin: origin.to_string(),
                                line,
                                name,
                            });
                        }
                        check_fields(origin, line, &name, &fields)?;
                        schema.structs.push(name);
                    }
                    Statement::Keyword { name } => schema.keywords.push(name),
                    Statement::Typedef => {}
                }
            }
        }

        // Imports may precede the dclass they name, so check them last
        for (decl, origin) in schema.imports.iter().zip(import_origins) {
            for symbol in &decl.symbols {
                if !schema.class_index.contains_key(&symbol.name) {
                    return Err(SchemaError::UndeclaredImport {
                        origin: origin.to_string(),
                        line: decl.line,
                        module_path: decl.module_path.clone(),
                        name: symbol.name.clone(),
                    });
                }
            }
        }

        tracing::debug!(
            "Compiled schema {} ({} classes, {} import statements)",
            schema.hash,
            schema.classes.len(),
            schema.imports.len()
        );

        Ok(schema)
    }
}

fn check_fields(origin: &str, line: usize, class: &str, fields: &[String]) -> SchemaResult<()> {
    let mut seen = HashSet::new();
    for field in fields {
        if !seen.insert(field.as_str()) {
            return Err(SchemaError::DuplicateField {
                origin: origin.to_string(),
                line,
                class: class.to_string(),
                field: field.clone(),
            });
        }
    }
    Ok(())
}

/// Compile a single in-memory source
pub fn compile_str(source: &str) -> SchemaResult<Schema> {
    SchemaCompiler::new().add_source("<memory>", source).compile()
}

/// Compile schema files in order
pub fn compile_files<P: AsRef<Path>>(paths: &[P]) -> SchemaResult<Schema> {
    let mut compiler = SchemaCompiler::new();
    for path in paths {
        compiler.add_file(path.as_ref())?;
    }
    compiler.compile()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        import otp.ai;
        from otp.distributed import DistributedNode
        from otp.avatar import DistributedAvatar/AI/OV/UD, DistributedPlayer/AI/OV

        keyword ram;
        keyword broadcast;

        dclass DistributedNode {
            setX(int16) broadcast ram;
            setY(int16) broadcast ram;
        };

        dclass DistributedAvatar : DistributedNode {
            setName(string) required broadcast;
            setX(int16) broadcast ram;
        };

        dclass DistributedPlayer : DistributedAvatar {
            setAccess(uint8) ram;
        };

        struct BuffInfo {
            uint8 kind;
        };
    "#;

    #[test]
    fn test_compile_sample() {
        let schema = compile_str(SAMPLE).unwrap();
        assert_eq!(schema.modules(), &["otp.ai".to_string()]);
        assert_eq!(schema.classes().len(), 3);
        assert_eq!(schema.structs(), &["BuffInfo".to_string()]);
        assert_eq!(schema.keywords().len(), 2);
        assert_eq!(schema.class("DistributedPlayer").unwrap().id, ClassId(2));
        assert_eq!(schema.class_by_id(ClassId(1)).unwrap().name, "DistributedAvatar");
    }

    #[test]
    fn test_hash_is_deterministic() {
        let a = compile_str(SAMPLE).unwrap();
        let b = compile_str(SAMPLE).unwrap();
        assert_eq!(a.hash(), b.hash());

        let reformatted = SAMPLE.replace("        ", "\t").replace("\n\n", "\n// blank\n");
        assert_eq!(compile_str(&reformatted).unwrap().hash(), a.hash());

        let changed = SAMPLE.replace("setAccess(uint8)", "setAccess(uint16)");
        assert_ne!(compile_str(&changed).unwrap().hash(), a.hash());
    }

    #[test]
    fn test_source_order_matters() {
        let mut forward = SchemaCompiler::new();
        forward.add_source("a.dc", "keyword a;").add_source("b.dc", "keyword b;");
        let mut backward = SchemaCompiler::new();
        backward.add_source("b.dc", "keyword b;").add_source("a.dc", "keyword a;");
        assert_ne!(
            forward.compile().unwrap().hash(),
            backward.compile().unwrap().hash()
        );
    }

    #[test]
    fn test_inherited_fields() {
        let schema = compile_str(SAMPLE).unwrap();
        assert_eq!(
            schema.inherited_fields("DistributedPlayer"),
            vec!["setX", "setY", "setName", "setAccess"]
        );
        assert!(schema.inherited_fields("Missing").is_empty());
    }

    #[test]
    fn test_client_manifest() {
        let schema = compile_str(SAMPLE).unwrap();
        let manifest = schema.manifest(Role::Client);
        let names: Vec<&str> = manifest.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "DistributedNode",
                "DistributedAvatar",
                "DistributedAvatarOV",
                "DistributedPlayer",
                "DistributedPlayerOV",
            ]
        );
        assert_eq!(manifest.hash(), schema.hash());
        let ov = &manifest.entries()[2];
        assert!(!ov.primary);
        assert_eq!(ov.class_name, "DistributedAvatar");
        assert_eq!(ov.class_id, ClassId(1));
    }

    #[test]
    fn test_ai_and_uberdog_manifests() {
        let schema = compile_str(SAMPLE).unwrap();

        let ai = schema.manifest(Role::Ai);
        let names: Vec<&str> = ai.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["DistributedAvatarAI", "DistributedPlayerAI"]);
        assert!(ai.entries().iter().all(|e| e.primary));

        let ud = schema.manifest(Role::Uberdog);
        assert_eq!(ud.entries().len(), 1);
        assert_eq!(ud.entries()[0].name, "DistributedAvatarUD");
        assert_eq!(ud.entries()[0].module_path, "otp.avatar");
    }

    #[test]
    fn test_wildcard_import_adds_module() {
        let schema = compile_str(
            "from toontown.pets.PetDCImports import *\n\
             from toontown.coghq.InGameEditorDCImports import *;\n\
             from pkg import Foo\n\
             dclass Foo {};",
        )
        .unwrap();
        assert_eq!(
            schema.modules(),
            &[
                "toontown.pets.PetDCImports".to_string(),
                "toontown.coghq.InGameEditorDCImports".to_string()
            ]
        );
        assert_eq!(schema.manifest(Role::Client).len(), 1);

        let without = compile_str("from pkg import Foo\ndclass Foo {};").unwrap();
        assert_ne!(schema.hash(), without.hash());
    }

    #[test]
    fn test_undeclared_import() {
        let err = compile_str("from pkg import Ghost\ndclass Other {};").unwrap_err();
        match err {
            SchemaError::UndeclaredImport { name, line, .. } => {
                assert_eq!(name, "Ghost");
                assert_eq!(line, 1);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_duplicate_class() {
        let err = compile_str("dclass A {};\ndclass A {};").unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateType { line: 2, .. }));
    }

    #[test]
    fn test_duplicate_field() {
        let err = compile_str("dclass A { setX(int8); setX(int16); };").unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateField { .. }));
    }

    #[test]
    fn test_unknown_parent() {
        let err = compile_str("dclass B : A {};\ndclass A {};").unwrap_err();
        assert!(matches!(err, SchemaError::UnknownParent { .. }));
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("AI".parse::<Role>().unwrap(), Role::Ai);
        assert_eq!("ud".parse::<Role>().unwrap(), Role::Uberdog);
        assert!("server".parse::<Role>().is_err());
        assert_eq!(Role::Uberdog.to_string(), "uberdog");
    }

    #[test]
    fn test_missing_file() {
        let err = compile_files(&["/nonexistent/schema.dc"]).unwrap_err();
        assert!(matches!(err, SchemaError::Io { .. }));
    }
}
