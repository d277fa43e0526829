//! Asset registry: the ordered, de-duplicated list of tracked specs.
//!
//! Backed by a flat file with one spec per line. Every mutation rewrites the
//! whole file (write to `.tmp`, rename into place) and only then publishes the
//! new list, so a failed write leaves memory equal to the last persisted state.
//! Readers take a short read lock and never wait on file I/O.

use crate::domain::SymbolSpec;
use crate::locks::{lock, read, write};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("asset list {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug)]
pub struct AssetRegistry {
    path: PathBuf,
    specs: RwLock<Vec<SymbolSpec>>,
    /// Serializes mutations so persist-then-publish is atomic per writer.
    writer: Mutex<()>,
}

impl AssetRegistry {
    /// Load the list at `path`. A missing file is an empty registry.
    ///
    /// Blank lines are skipped; malformed lines and duplicates are dropped
    /// with a warning.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let path = path.into();
        let specs = match fs::read_to_string(&path) {
            Ok(content) => parse_lines(&content, &path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no asset list yet, starting empty");
                Vec::new()
            }
            Err(source) => return Err(RegistryError::Io { path, source }),
        };

        tracing::info!(path = %path.display(), count = specs.len(), "loaded asset list");
        Ok(Self {
            path,
            specs: RwLock::new(specs),
            writer: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `spec` unless already present. Returns whether it was added.
    pub fn add(&self, spec: SymbolSpec) -> Result<bool, RegistryError> {
        let _writer = lock(&self.writer);
        let mut next = self.list();
        if next.contains(&spec) {
            return Ok(false);
        }
        next.push(spec);
        self.persist(&next)?;
        *write(&self.specs) = next;
        Ok(true)
    }

    /// Remove `spec` if present. Returns whether it was removed.
    pub fn remove(&self, spec: &SymbolSpec) -> Result<bool, RegistryError> {
        let _writer = lock(&self.writer);
        let mut next = self.list();
        let before = next.len();
        next.retain(|s| s != spec);
        if next.len() == before {
            return Ok(false);
        }
        self.persist(&next)?;
        *write(&self.specs) = next;
        Ok(true)
    }

    /// Snapshot of the registered specs in insertion order.
    pub fn list(&self) -> Vec<SymbolSpec> {
        read(&self.specs).clone()
    }

    pub fn contains(&self, spec: &SymbolSpec) -> bool {
        read(&self.specs).contains(spec)
    }

    pub fn first(&self) -> Option<SymbolSpec> {
        read(&self.specs).first().cloned()
    }

    pub fn len(&self) -> usize {
        read(&self.specs).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.specs).is_empty()
    }

    fn persist(&self, specs: &[SymbolSpec]) -> Result<(), RegistryError> {
        let io_err = |source| RegistryError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let mut content = String::new();
        for spec in specs {
            content.push_str(&spec.to_string());
            content.push('\n');
        }

        let tmp = tmp_path(&self.path);
        if let Err(e) = fs::write(&tmp, content).and_then(|_| fs::rename(&tmp, &self.path)) {
            let _ = fs::remove_file(&tmp);
            tracing::warn!(path = %self.path.display(), error = %e, "failed to persist asset list");
            return Err(io_err(e));
        }

        tracing::debug!(path = %self.path.display(), count = specs.len(), "persisted asset list");
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn parse_lines(content: &str, path: &Path) -> Vec<SymbolSpec> {
    let mut specs: Vec<SymbolSpec> = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match SymbolSpec::parse(line) {
            Ok(spec) if specs.contains(&spec) => {
                tracing::warn!(path = %path.display(), line = lineno + 1, %spec, "duplicate asset dropped");
            }
            Ok(spec) => specs.push(spec),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    line = lineno + 1,
                    raw = line,
                    error = %e,
                    "malformed asset line dropped"
                );
            }
        }
    }
    specs
}
