//! Storage layer capability and its two backends.
//!
//! Paths are `/`-separated and relative to the layer root. Both the static
//! and the overlay layer use the same [`Layer`] interface; which one may be
//! written to is decided by the entity store, not by the backend.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use cryocat_core::CoreError;

use crate::error::{StoreError, StoreResult};

/// Minimal filesystem/object-storage capability.
pub trait Layer: Send + Sync + fmt::Debug {
    /// Short name used in logs (`overlay`, `static`).
    fn label(&self) -> &str;

    /// Names of the immediate children of `prefix`, sorted. Empty when the
    /// prefix does not exist.
    fn list(&self, prefix: &str) -> StoreResult<Vec<String>>;

    fn exists(&self, path: &str) -> StoreResult<bool>;

    fn is_dir(&self, path: &str) -> StoreResult<bool>;

    fn read(&self, path: &str) -> StoreResult<Vec<u8>>;

    /// Write a file, creating missing parents.
    fn write(&self, path: &str, data: &[u8]) -> StoreResult<()>;

    /// Create a directory and its missing parents.
    fn create_dir(&self, path: &str) -> StoreResult<()>;

    /// Delete a file or a directory tree. [`StoreError::NotFound`] if absent.
    fn delete(&self, path: &str) -> StoreResult<()>;
}

/// Join path segments with `/`, skipping empty segments.
pub fn join(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// All file paths below `root`, relative to it. A plain file yields `[""]`.
pub fn walk_files(layer: &dyn Layer, root: &str) -> StoreResult<Vec<String>> {
    if !layer.is_dir(root)? {
        return if layer.exists(root)? {
            Ok(vec![String::new()])
        } else {
            Err(StoreError::NotFound(root.to_string()))
        };
    }

    let mut out = Vec::new();
    let mut pending = vec![String::new()];
    while let Some(rel) = pending.pop() {
        let dir = join(&[root, rel.as_str()]);
        for name in layer.list(&dir)? {
            let child_rel = join(&[rel.as_str(), name.as_str()]);
            if layer.is_dir(&join(&[root, child_rel.as_str()]))? {
                pending.push(child_rel);
            } else {
                out.push(child_rel);
            }
        }
    }
    out.sort();
    Ok(out)
}

// ---------------------------------------------------------------------------
// LocalLayer
// ---------------------------------------------------------------------------

/// A layer rooted at a local directory.
#[derive(Debug)]
pub struct LocalLayer {
    label: String,
    root: PathBuf,
}

impl LocalLayer {
    pub fn new(label: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> StoreResult<PathBuf> {
        let rel = Path::new(path);
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(CoreError::Validation(format!(
                "Layer path '{path}' must be relative and free of '..'"
            ))
            .into());
        }
        Ok(self.root.join(rel))
    }
}

impl Layer for LocalLayer {
    fn label(&self) -> &str {
        &self.label
    }

    fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let dir = self.resolve(prefix)?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&dir).map_err(|e| StoreError::io(prefix, e))?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(prefix, e))?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn exists(&self, path: &str) -> StoreResult<bool> {
        Ok(self.resolve(path)?.exists())
    }

    fn is_dir(&self, path: &str) -> StoreResult<bool> {
        Ok(self.resolve(path)?.is_dir())
    }

    fn read(&self, path: &str) -> StoreResult<Vec<u8>> {
        fs::read(self.resolve(path)?).map_err(|e| StoreError::io(path, e))
    }

    fn write(&self, path: &str, data: &[u8]) -> StoreResult<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(path, e))?;
        }
        fs::write(&full, data).map_err(|e| StoreError::io(path, e))
    }

    fn create_dir(&self, path: &str) -> StoreResult<()> {
        fs::create_dir_all(self.resolve(path)?).map_err(|e| StoreError::io(path, e))
    }

    fn delete(&self, path: &str) -> StoreResult<()> {
        let full = self.resolve(path)?;
        if full.is_dir() {
            fs::remove_dir_all(&full).map_err(|e| StoreError::io(path, e))
        } else {
            fs::remove_file(&full).map_err(|e| StoreError::io(path, e))
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryState {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
}

impl MemoryState {
    fn is_dir(&self, path: &str) -> bool {
        if path.is_empty() {
            return true;
        }
        let prefix = format!("{path}/");
        self.dirs.contains(path)
            || self.files.keys().any(|k| k.starts_with(&prefix))
            || self.dirs.iter().any(|d| d.starts_with(&prefix))
    }
}

/// An in-process layer. Used for tests and for scratch projects.
#[derive(Debug, Default)]
pub struct MemoryLayer {
    label: String,
    state: Mutex<MemoryState>,
}

impl MemoryLayer {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: Mutex::new(MemoryState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of stored files, for assertions.
    pub fn file_count(&self) -> usize {
        self.state().files.len()
    }
}

impl Layer for MemoryLayer {
    fn label(&self) -> &str {
        &self.label
    }

    fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let prefix = prefix.trim_matches('/');
        let state = self.state();
        let lead = if prefix.is_empty() {
            String::new()
        } else {
            format!("{prefix}/")
        };

        let names: BTreeSet<String> = state
            .files
            .keys()
            .chain(state.dirs.iter())
            .filter_map(|k| k.strip_prefix(lead.as_str()))
            .filter_map(|rest| rest.split('/').next())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        Ok(names.into_iter().collect())
    }

    fn exists(&self, path: &str) -> StoreResult<bool> {
        let path = path.trim_matches('/');
        let state = self.state();
        Ok(state.files.contains_key(path) || state.is_dir(path))
    }

    fn is_dir(&self, path: &str) -> StoreResult<bool> {
        Ok(self.state().is_dir(path.trim_matches('/')))
    }

    fn read(&self, path: &str) -> StoreResult<Vec<u8>> {
        self.state()
            .files
            .get(path.trim_matches('/'))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    fn write(&self, path: &str, data: &[u8]) -> StoreResult<()> {
        let path = path.trim_matches('/');
        let mut state = self.state();
        if state.is_dir(path) {
            return Err(StoreError::Conflict(format!("'{path}' is a directory")));
        }
        state.files.insert(path.to_string(), data.to_vec());
        Ok(())
    }

    fn create_dir(&self, path: &str) -> StoreResult<()> {
        let path = path.trim_matches('/');
        let mut state = self.state();
        if state.files.contains_key(path) {
            return Err(StoreError::Conflict(format!("'{path}' is a file")));
        }
        state.dirs.insert(path.to_string());
        Ok(())
    }

    fn delete(&self, path: &str) -> StoreResult<()> {
        let path = path.trim_matches('/');
        let prefix = format!("{path}/");
        let mut state = self.state();

        let removed_file = state.files.remove(path).is_some();
        let removed_dir = state.dirs.remove(path);
        let before = state.files.len() + state.dirs.len();
        state.files.retain(|k, _| !k.starts_with(&prefix));
        state.dirs.retain(|d| !d.starts_with(&prefix));
        let removed_children = before != state.files.len() + state.dirs.len();

        if removed_file || removed_dir || removed_children {
            Ok(())
        } else {
            Err(StoreError::NotFound(path.to_string()))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
