//! Filesystem block store.
//!
//! Backs both sides of the transfer: the publisher discovers and reads
//! outbound payloads here, the subscriber's finished blocks are written
//! under `received/`.

use std::io;
use std::path::PathBuf;

use tracing::info;

use blockcast_transfer::error::StorageError;
use blockcast_transfer::store::BlockStore;
use blockcast_transfer::wire::MAX_SOURCE_FILE_BYTES;

pub struct FsStore {
    dir: PathBuf,
    max_file_bytes: u64,
}

impl FsStore {
    pub fn new(dir: PathBuf) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&dir)?;
        info!(dir = %dir.display(), "block store directory");
        Ok(Self {
            dir,
            max_file_bytes: MAX_SOURCE_FILE_BYTES,
        })
    }

    #[cfg(test)]
    fn with_limit(dir: PathBuf, max_file_bytes: u64) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            max_file_bytes,
        })
    }
}

impl BlockStore for FsStore {
    fn read(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.dir.join(name);
        let metadata = std::fs::metadata(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                StorageError::NotFound(name.to_string())
            } else {
                StorageError::Io(e)
            }
        })?;
        if metadata.len() == 0 {
            return Err(StorageError::Empty(name.to_string()));
        }
        if metadata.len() > self.max_file_bytes {
            return Err(StorageError::TooLarge {
                size: metadata.len(),
                max: self.max_file_bytes,
            });
        }
        Ok(std::fs::read(&path)?)
    }

    fn write(&self, name: &str, data: &[u8]) -> Result<(), StorageError> {
        let path = self.dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, data)?;
        info!(path = %path.display(), bytes = data.len(), "file written");
        Ok(())
    }

    fn discover_first_matching(&self, extensions: &[&str]) -> Option<String> {
        let entries = std::fs::read_dir(&self.dir).ok()?;
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();
        names.into_iter().find(|name| {
            let lower = name.to_lowercase();
            extensions.iter().any(|ext| lower.ends_with(ext))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_store(tag: &str) -> FsStore {
        let dir = std::env::temp_dir().join(format!("blockcast_store_test_{tag}"));
        let _ = std::fs::remove_dir_all(&dir);
        FsStore::with_limit(dir, 1024).unwrap()
    }

    #[test]
    fn read_errors() {
        let store = scratch_store("read");
        assert!(matches!(
            store.read("absent.bin"),
            Err(StorageError::NotFound(_))
        ));

        store.write("empty.bin", &[]).unwrap();
        assert!(matches!(
            store.read("empty.bin"),
            Err(StorageError::Empty(_))
        ));

        store.write("big.bin", &[0u8; 2048]).unwrap();
        assert!(matches!(
            store.read("big.bin"),
            Err(StorageError::TooLarge { size: 2048, .. })
        ));
    }

    #[test]
    fn write_read_roundtrip_with_subdir() {
        let store = scratch_store("roundtrip");
        store.write("received/block_1_0.bin", b"payload").unwrap();
        assert_eq!(store.read("received/block_1_0.bin").unwrap(), b"payload");
    }

    #[test]
    fn discovery_prefers_sorted_names_and_ignores_case() {
        let store = scratch_store("discover");
        store.write("zebra.JPG", b"z").unwrap();
        store.write("alpha.txt", b"a").unwrap();
        store.write("beta.jpg", b"b").unwrap();

        let found = store.discover_first_matching(&[".jpg", ".jpeg"]);
        assert_eq!(found.as_deref(), Some("beta.jpg"));

        assert_eq!(store.discover_first_matching(&[".png"]), None);
    }
}
