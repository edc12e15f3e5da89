//! Generated manifest files
//!
//! The manifest is written as TOML so it can be checked in next to the
//! schema and diffed. Writing is deterministic.

use std::path::{Path, PathBuf};
use thiserror::Error;

use super::SymbolManifest;

const HEADER: &str = "# Generated by dcmanifest from the distributed-class schema. Do not edit.\n\n";

/// Manifest file errors
#[derive(Error, Debug)]
pub enum ManifestFileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Manifest file not found: {0}")]
    NotFound(PathBuf),
}

pub type ManifestFileResult<T> = Result<T, ManifestFileError>;

/// Render a manifest as the generated file contents
pub fn to_toml_string(manifest: &SymbolManifest) -> ManifestFileResult<String> {
    let body = toml::to_string_pretty(manifest)?;
    Ok(format!("{}{}", HEADER, body))
}

pub fn from_toml_str(contents: &str) -> ManifestFileResult<SymbolManifest> {
    Ok(toml::from_str(contents)?)
}

/// Write a generated manifest file, creating parent directories
pub fn write_manifest(manifest: &SymbolManifest, path: &Path) -> ManifestFileResult<()> {
    let contents = to_toml_string(manifest)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    std::fs::write(path, contents)?;
    tracing::info!(
        "Wrote manifest {} ({} symbols, hash {})",
        path.display(),
        manifest.len(),
        manifest.hash()
    );
    Ok(())
}

/// Read a generated manifest file
pub fn read_manifest(path: &Path) -> ManifestFileResult<SymbolManifest> {
    if !path.exists() {
        return Err(ManifestFileError::NotFound(path.to_path_buf()));
    }

    let contents = std::fs::read_to_string(path)?;
    from_toml_str(&contents)
}
