//! Registry persistence.
//!
//! The store is the only component that touches the registry file:
//!   - `load` reads a consistent snapshot without locking (writers replace the
//!     file atomically, so a reader sees either the old or the new document)
//!   - `update` holds an exclusive advisory lock on `<registry>.lock` across
//!     load, mutate and persist, so concurrent writers cannot lose updates
//!   - persistence goes through a temporary file in the same directory that is
//!     synced and renamed over the target

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{Result, RouterError};
use crate::model::Registry;
use crate::registry;

/// How `import` combines the incoming document with the current registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    /// The incoming document becomes the registry, once its names check out.
    Replace,
    /// Incoming entries are added; any name clash aborts the import.
    Merge,
}

/// Interchange format, picked from the file extension (`.yaml`/`.yml` or JSON).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                DocumentFormat::Yaml
            }
            _ => DocumentFormat::Json,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegistryStore {
    path: PathBuf,
}

/// Held for the duration of a read-modify-write; released on drop.
struct LockGuard {
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

impl RegistryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "registry".into());
        name.push(".lock");
        self.path.with_file_name(name)
    }

    /// Read the registry. A missing file is an empty registry; a malformed one
    /// is `RegistryCorrupted`.
    pub fn load(&self) -> Result<Registry> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "registry file absent, starting empty");
                return Ok(Registry::new());
            }
            Err(e) => return Err(RouterError::io(&self.path, e)),
        };
        parse_document(&self.path, &raw)
    }

    /// Run one guarded read-modify-write. The closure receives the current
    /// registry and returns the registry to persist plus a value for the caller.
    /// Nothing is written when the closure fails.
    pub fn update<T, F>(&self, mutate: F) -> Result<T>
    where
        F: FnOnce(Registry) -> Result<(Registry, T)>,
    {
        let _guard = self.lock()?;
        let current = self.load()?;
        let (next, out) = mutate(current)?;
        self.save(&next)?;
        Ok(out)
    }

    /// Apply `mutate` to a snapshot and drop the resulting registry. Nothing is
    /// locked or written; the closure's value is returned as if saved.
    pub fn preview<T, F>(&self, mutate: F) -> Result<T>
    where
        F: FnOnce(Registry) -> Result<(Registry, T)>,
    {
        let (_, out) = mutate(self.load()?)?;
        Ok(out)
    }

    /// Persist atomically: temp file in the same directory, fsync, rename.
    pub fn save(&self, registry: &Registry) -> Result<()> {
        let dir = self.parent_dir();
        fs::create_dir_all(&dir).map_err(|e| RouterError::io(&dir, e))?;

        let body = serde_json::to_string_pretty(registry)
            .map_err(|e| RouterError::corrupted(&self.path, format!("serialize: {e}")))?;

        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| RouterError::io(&dir, e))?;
        tmp.write_all(body.as_bytes())
            .and_then(|_| tmp.write_all(b"\n"))
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| RouterError::io(tmp.path(), e))?;
        tmp.persist(&self.path)
            .map_err(|e| RouterError::io(&self.path, e.error))?;

        debug!(path = %self.path.display(), commands = registry.len(), "registry saved");
        Ok(())
    }

    /// Write the current registry to `dest` in the format its extension implies.
    /// Returns the number of exported commands.
    pub fn export(&self, dest: &Path) -> Result<usize> {
        let registry = self.load()?;
        let body = match DocumentFormat::from_path(dest) {
            DocumentFormat::Json => serde_json::to_string_pretty(&registry)
                .map_err(|e| RouterError::InvalidRequest(format!("cannot serialize registry: {e}")))?,
            DocumentFormat::Yaml => serde_yaml::to_string(&registry)
                .map_err(|e| RouterError::InvalidRequest(format!("cannot serialize registry: {e}")))?,
        };
        if let Some(dir) = dest.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir).map_err(|e| RouterError::io(dir, e))?;
        }
        fs::write(dest, body).map_err(|e| RouterError::io(dest, e))?;
        debug!(dest = %dest.display(), commands = registry.len(), "registry exported");
        Ok(registry.len())
    }

    /// Read a document produced by `export` and apply it under the lock.
    /// Returns the number of imported commands.
    pub fn import(&self, src: &Path, mode: ImportMode) -> Result<usize> {
        let incoming = read_document(src)?;
        self.update(|current| combine(current, incoming, mode))
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn lock(&self) -> Result<LockGuard> {
        let dir = self.parent_dir();
        fs::create_dir_all(&dir).map_err(|e| RouterError::io(&dir, e))?;
        let lock_path = self.lock_path();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| RouterError::io(&lock_path, e))?;
        file.lock().map_err(|e| RouterError::io(&lock_path, e))?;
        debug!(lock = %lock_path.display(), "registry lock acquired");
        Ok(LockGuard { file })
    }
}

/// Read an export file in the format its extension implies.
pub fn read_document(src: &Path) -> Result<Registry> {
    let raw = fs::read_to_string(src).map_err(|e| RouterError::io(src, e))?;
    match DocumentFormat::from_path(src) {
        DocumentFormat::Json => parse_document(src, &raw),
        DocumentFormat::Yaml => {
            serde_yaml::from_str(&raw).map_err(|e| RouterError::corrupted(src, e.to_string()))
        }
    }
}

/// The registry an import produces, with the number of incoming commands.
pub fn combine(current: Registry, incoming: Registry, mode: ImportMode) -> Result<(Registry, usize)> {
    let count = incoming.len();
    let next = match mode {
        ImportMode::Replace => registry::merge(Registry::new(), incoming)?,
        ImportMode::Merge => registry::merge(current, incoming)?,
    };
    Ok((next, count))
}

/// Parse a registry document, mapping every failure to `RegistryCorrupted`.
pub fn parse_document(path: &Path, raw: &str) -> Result<Registry> {
    if raw.trim().is_empty() {
        return Err(RouterError::corrupted(path, "file is empty"));
    }
    serde_json::from_str(raw).map_err(|e| RouterError::corrupted(path, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CommandKind, RegisteredCommand};
    use chrono::Utc;

    fn store_in(dir: &tempfile::TempDir) -> RegistryStore {
        RegistryStore::new(dir.path().join("nested").join("registry.json"))
    }

    fn insert(reg: &mut Registry, name: &str) {
        let cmd = RegisteredCommand::new(name, CommandKind::Shell, "echo", Utc::now());
        reg.commands.insert(name.to_string(), cmd);
    }

    #[test]
    fn missing_file_is_empty_registry() {
        let dir = tempfile::tempdir().unwrap();
        let reg = store_in(&dir).load().unwrap();
        assert!(reg.is_empty());
    }

    #[test]
    fn malformed_file_is_corrupted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        fs::write(&path, "{ not json").unwrap();
        let err = RegistryStore::new(&path).load().unwrap_err();
        assert!(matches!(err, RouterError::RegistryCorrupted { .. }));
        assert!(err.to_string().contains("never repairs"));
        // Left untouched.
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn update_persists_and_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store
            .update(|mut reg| {
                insert(&mut reg, "hello");
                Ok((reg, ()))
            })
            .unwrap();
        let reg = store.load().unwrap();
        assert!(reg.contains("hello"));
        assert_eq!(reg.get("hello").unwrap().name, "hello");
    }

    #[test]
    fn failed_update_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let res: Result<()> = store.update(|mut reg| {
            insert(&mut reg, "ghost");
            Err(RouterError::NotFound("x".into()))
        });
        assert!(res.is_err());
        assert!(!store.path().exists());
    }

    #[test]
    fn concurrent_updates_do_not_lose_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store
                        .update(|mut reg| {
                            insert(&mut reg, &format!("cmd{i}"));
                            Ok((reg, ()))
                        })
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.load().unwrap().len(), 8);
    }

    #[test]
    fn preview_leaves_the_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let seen = store
            .preview(|mut reg| {
                insert(&mut reg, "ghost");
                let n = reg.len();
                Ok((reg, n))
            })
            .unwrap();
        assert_eq!(seen, 1);
        assert!(!store.path().exists());
    }

    #[test]
    fn export_and_import_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store
            .update(|mut reg| {
                insert(&mut reg, "a");
                Ok((reg, ()))
            })
            .unwrap();
        let dump = dir.path().join("backup.yaml");
        assert_eq!(store.export(&dump).unwrap(), 1);

        let other = RegistryStore::new(dir.path().join("other.json"));
        other
            .update(|mut reg| {
                insert(&mut reg, "b");
                Ok((reg, ()))
            })
            .unwrap();
        assert_eq!(other.import(&dump, ImportMode::Merge).unwrap(), 1);
        assert_eq!(other.load().unwrap().len(), 2);

        // A second merge clashes on 'a' and leaves the file alone.
        let err = other.import(&dump, ImportMode::Merge).unwrap_err();
        assert!(matches!(err, RouterError::NameCollision { .. }));
        assert_eq!(other.load().unwrap().len(), 2);

        other.import(&dump, ImportMode::Replace).unwrap();
        let reg = other.load().unwrap();
        assert!(reg.contains("a"));
        assert!(!reg.contains("b"));

        // A replacement whose alias shadows another entry is refused whole.
        let clash = dir.path().join("clash.yaml");
        fs::write(
            &clash,
            "version: 1\ncommands:\n  a:\n    kind: shell\n    target: echo\n    aliases: [b]\n  b:\n    kind: shell\n    target: echo\n",
        )
        .unwrap();
        let err = other.import(&clash, ImportMode::Replace).unwrap_err();
        assert!(matches!(err, RouterError::NameCollision { .. }));
        assert_eq!(other.load().unwrap().len(), 1);
    }
}
