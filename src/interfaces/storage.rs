//! Persistent key/path storage
//!
//! Paths are relative, `/`-separated and resolved under the storage root.

use std::fs;
use std::io::{Cursor, Write};
use std::path::{Component, Path, PathBuf};

use dashmap::DashMap;
use symphonia::core::io::MediaSource;
use tracing::trace;

use crate::{Error, Result};

pub trait Storage: Send + Sync {
    fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Replace the contents at `path`, creating parent directories
    fn write(&self, path: &str, data: &[u8]) -> Result<()>;

    fn exists(&self, path: &str) -> bool;

    fn remove(&self, path: &str) -> Result<()>;

    /// Open a seekable byte source for the decoder
    fn open_media(&self, path: &str) -> Result<Box<dyn MediaSource>>;

    fn read_to_string(&self, path: &str) -> Result<String> {
        String::from_utf8(self.read(path)?).map_err(|e| Error::storage(format!("{} is not UTF-8: {}", path, e)))
    }
}

fn normalize(path: &str) -> Result<String> {
    let trimmed = path.trim_start_matches('/');
    let relative = Path::new(trimmed);

    if trimmed.is_empty()
        || relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(Error::storage(format!("Invalid storage path: {}", path)));
    }
    Ok(trimmed.to_string())
}

/// Filesystem storage rooted at a directory
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new<P: Into<PathBuf>>(root: P) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        Ok(self.root.join(normalize(path)?))
    }
}

impl Storage for FsStorage {
    fn read(&self, path: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.resolve(path)?)?)
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write beside the target and rename so readers never see a partial file
        let tmp = temp_path(&target);
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &target)?;

        trace!("Stored {} bytes at {}", data.len(), target.display());
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.is_file()).unwrap_or(false)
    }

    fn remove(&self, path: &str) -> Result<()> {
        Ok(fs::remove_file(self.resolve(path)?)?)
    }

    fn open_media(&self, path: &str) -> Result<Box<dyn MediaSource>> {
        let file = fs::File::open(self.resolve(path)?)?;
        Ok(Box::new(file))
    }
}

/// In-memory storage for tests and diskless operation
#[derive(Debug, Default)]
pub struct MemoryStorage {
    files: DashMap<String, Vec<u8>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl Storage for MemoryStorage {
    fn read(&self, path: &str) -> Result<Vec<u8>> {
        let key = normalize(path)?;
        self.files
            .get(&key)
            .map(|v| v.value().clone())
            .ok_or_else(|| Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, key)))
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        self.files.insert(normalize(path)?, data.to_vec());
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        normalize(path).map(|k| self.files.contains_key(&k)).unwrap_or(false)
    }

    fn remove(&self, path: &str) -> Result<()> {
        let key = normalize(path)?;
        self.files
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, key)))
    }

    fn open_media(&self, path: &str) -> Result<Box<dyn MediaSource>> {
        Ok(Box::new(Cursor::new(self.read(path)?)))
    }
}

/// `audio/a.mp3` -> `audio/a.mp3.part`
fn temp_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    target.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fs_storage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path()).unwrap();

        storage.write("audio/clip.wav", b"abc").unwrap();
        assert!(storage.exists("audio/clip.wav"));
        assert!(storage.exists("/audio/clip.wav"));
        assert_eq!(storage.read("audio/clip.wav").unwrap(), b"abc");
        assert!(!dir.path().join("audio/clip.wav.part").exists());

        storage.remove("audio/clip.wav").unwrap();
        assert!(!storage.exists("audio/clip.wav"));
        assert!(storage.read("audio/clip.wav").is_err());
    }

    #[test]
    fn test_temp_file_keeps_extension() {
        assert_eq!(temp_path(Path::new("audio/hello.mp3")), PathBuf::from("audio/hello.mp3.part"));
        assert_ne!(temp_path(Path::new("audio/hello.mp3")), temp_path(Path::new("audio/hello.wav")));

        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path()).unwrap();
        storage.write("audio/hello.mp3", b"mp3").unwrap();
        storage.write("audio/hello.wav", b"wav").unwrap();
        assert_eq!(storage.read("audio/hello.mp3").unwrap(), b"mp3");
        assert_eq!(storage.read("audio/hello.wav").unwrap(), b"wav");
    }

    #[test]
    fn test_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path()).unwrap();
        assert!(storage.write("../outside", b"x").is_err());
        assert!(storage.write("", b"x").is_err());
        assert!(!storage.exists("../outside"));
    }

    #[test]
    fn test_memory_storage() {
        let storage = MemoryStorage::new();
        storage.write("settings/volume", b"0.5").unwrap();
        assert_eq!(storage.read_to_string("/settings/volume").unwrap(), "0.5");
        assert_eq!(storage.len(), 1);
        assert!(storage.open_media("settings/volume").is_ok());
        storage.remove("settings/volume").unwrap();
        assert!(storage.is_empty());
        assert!(storage.remove("settings/volume").is_err());
    }
}
