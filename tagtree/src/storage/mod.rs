// Storage collaborator - enumerate, decode and encode the containers behind the tree

use crate::config::StorageSettings;
use crate::error::{Result, TagTreeError};
use crate::value::Compound;
use std::io::Write;
use std::path::{Path, PathBuf};

/// What a path on disk maps to in the node tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Directory,
    File,
    Archive,
}

/// One child found while listing a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEntry {
    pub name: String,
    pub path: PathBuf,
    pub kind: EntryKind,
}

/// Backing store for container nodes. The tree only calls into this on
/// expand, refresh and save; failures are surfaced as-is.
pub trait Storage: Send + Sync {
    /// Classify a path, or `None` if it is not something the tree can open.
    fn classify(&self, path: &Path) -> Option<EntryKind>;

    /// List the openable children of a directory.
    fn list_directory(&self, path: &Path) -> Result<Vec<StorageEntry>>;

    /// Decode a data file into its root compound.
    fn read_file(&self, path: &Path) -> Result<Compound>;

    fn write_file(&self, path: &Path, data: &Compound) -> Result<()>;

    /// Occupied entry slots of an archive, ascending.
    fn list_archive(&self, path: &Path) -> Result<Vec<usize>>;

    fn read_entry(&self, path: &Path, slot: usize) -> Result<Compound>;

    fn write_entry(&self, path: &Path, slot: usize, data: &Compound) -> Result<()>;
}

/// Filesystem storage.
///
/// Data files hold one compound serialized as JSON (`.json`) or YAML
/// (`.yaml`, `.yml`). Archives (`.jsonl`) hold one JSON compound per line;
/// the line index is the entry slot and a blank line is a vacant slot.
#[derive(Debug, Clone)]
pub struct FsStorage {
    data_extensions: Vec<String>,
    archive_extensions: Vec<String>,
}

impl Default for FsStorage {
    fn default() -> Self {
        FsStorage::from_config(&StorageSettings::default())
    }
}

impl FsStorage {
    pub fn new() -> Self {
        FsStorage::default()
    }

    pub fn from_config(settings: &StorageSettings) -> Self {
        FsStorage {
            data_extensions: lowercase_all(&settings.data_extensions),
            archive_extensions: lowercase_all(&settings.archive_extensions),
        }
    }

    fn extension(path: &Path) -> Option<String> {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }

    fn is_yaml(path: &Path) -> bool {
        matches!(Self::extension(path).as_deref(), Some("yaml") | Some("yml"))
    }

    fn read_lines(path: &Path) -> Result<Vec<String>> {
        let content = std::fs::read_to_string(path)?;
        Ok(content.lines().map(|l| l.to_string()).collect())
    }
}

impl Storage for FsStorage {
    fn classify(&self, path: &Path) -> Option<EntryKind> {
        if path.is_dir() {
            return Some(EntryKind::Directory);
        }
        let ext = Self::extension(path)?;
        if self.archive_extensions.contains(&ext) {
            Some(EntryKind::Archive)
        } else if self.data_extensions.contains(&ext) {
            Some(EntryKind::File)
        } else {
            None
        }
    }

    fn list_directory(&self, path: &Path) -> Result<Vec<StorageEntry>> {
        let mut entries = Vec::new();
        for dir_entry in std::fs::read_dir(path)? {
            let dir_entry = dir_entry?;
            let child = dir_entry.path();
            let name = dir_entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            if let Some(kind) = self.classify(&child) {
                entries.push(StorageEntry {
                    name,
                    path: child,
                    kind,
                });
            }
        }

        // Directories first, then files, each alphabetically
        entries.sort_by(|a, b| {
            let a_dir = a.kind != EntryKind::Directory;
            let b_dir = b.kind != EntryKind::Directory;
            a_dir.cmp(&b_dir).then_with(|| a.name.cmp(&b.name))
        });
        Ok(entries)
    }

    fn read_file(&self, path: &Path) -> Result<Compound> {
        let content = std::fs::read_to_string(path)?;
        if Self::is_yaml(path) {
            serde_yaml::from_str(&content).map_err(|e| decode_error(path, e))
        } else {
            serde_json::from_str(&content).map_err(|e| decode_error(path, e))
        }
    }

    fn write_file(&self, path: &Path, data: &Compound) -> Result<()> {
        let content = if Self::is_yaml(path) {
            serde_yaml::to_string(data)?
        } else {
            serde_json::to_string_pretty(data)?
        };
        write_atomic(path, content.as_bytes())
    }

    fn list_archive(&self, path: &Path) -> Result<Vec<usize>> {
        let lines = Self::read_lines(path)?;
        Ok(lines
            .iter()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(slot, _)| slot)
            .collect())
    }

    fn read_entry(&self, path: &Path, slot: usize) -> Result<Compound> {
        let lines = Self::read_lines(path)?;
        let line = lines
            .get(slot)
            .filter(|l| !l.trim().is_empty())
            .ok_or_else(|| TagTreeError::Decode {
                path: path.display().to_string(),
                message: format!("entry slot {slot} is vacant"),
            })?;
        serde_json::from_str(line).map_err(|e| decode_error(path, e))
    }

    fn write_entry(&self, path: &Path, slot: usize, data: &Compound) -> Result<()> {
        let mut lines = if path.exists() {
            Self::read_lines(path)?
        } else {
            Vec::new()
        };
        if lines.len() <= slot {
            lines.resize(slot + 1, String::new());
        }
        lines[slot] = serde_json::to_string(data)?;

        let mut content = lines.join("\n");
        content.push('\n');
        write_atomic(path, content.as_bytes())
    }
}

fn lowercase_all(values: &[String]) -> Vec<String> {
    values.iter().map(|v| v.to_ascii_lowercase()).collect()
}

fn decode_error(path: &Path, err: impl std::fmt::Display) -> TagTreeError {
    TagTreeError::Decode {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

/// Write through a temp file in the same directory, then rename over the target.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| TagTreeError::Io(e.error))?;
    log::debug!("Wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::NodeValue;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn sample() -> Compound {
        Compound::new()
            .with("hp", NodeValue::Int(10))
            .with("name", NodeValue::String("Zed".into()))
    }

    #[test]
    fn test_classify_by_extension() {
        let tmp = TempDir::new().unwrap();
        let storage = FsStorage::new();

        assert_eq!(storage.classify(tmp.path()), Some(EntryKind::Directory));
        assert_eq!(storage.classify(&tmp.path().join("a.json")), Some(EntryKind::File));
        assert_eq!(storage.classify(&tmp.path().join("b.YML")), Some(EntryKind::File));
        assert_eq!(storage.classify(&tmp.path().join("r.0.0.jsonl")), Some(EntryKind::Archive));
        assert_eq!(storage.classify(&tmp.path().join("notes.txt")), None);
    }

    #[test]
    fn test_list_directory_orders_dirs_first() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("zdir")).unwrap();
        std::fs::write(tmp.path().join("a.json"), "{}").unwrap();
        std::fs::write(tmp.path().join("ignored.txt"), "x").unwrap();
        std::fs::write(tmp.path().join(".hidden.json"), "{}").unwrap();

        let storage = FsStorage::new();
        let names: Vec<String> = storage
            .list_directory(tmp.path())
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["zdir".to_string(), "a.json".to_string()]);
    }

    #[test]
    fn test_file_write_then_read_yaml() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("level.yaml");
        let storage = FsStorage::new();

        storage.write_file(&path, &sample()).unwrap();
        assert_eq!(storage.read_file(&path).unwrap(), sample());
    }

    #[test]
    fn test_read_file_reports_decode_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = FsStorage::new().read_file(&path).unwrap_err();
        assert!(err.is_storage_failure());
        assert!(matches!(err, TagTreeError::Decode { .. }));
    }

    #[test]
    fn test_archive_slots_skip_vacant_lines() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("r.0.0.jsonl");
        let storage = FsStorage::new();

        storage.write_entry(&path, 2, &sample()).unwrap();
        storage.write_entry(&path, 0, &Compound::new()).unwrap();

        assert_eq!(storage.list_archive(&path).unwrap(), vec![0, 2]);
        assert_eq!(storage.read_entry(&path, 2).unwrap(), sample());
        assert!(storage.read_entry(&path, 1).is_err());
    }
}
