use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::error;

/// Key-value persistence used by the session store. Kept deliberately small
/// (get/set/remove by key) so the backing medium can be swapped out.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> io::Result<()>;
    fn remove(&self, key: &str) -> io::Result<()>;
}

/// Stores one JSON document per key under a data directory.
pub struct FileKvStore {
    dir: PathBuf,
}

impl FileKvStore {
    pub fn new(dir: PathBuf) -> io::Result<Self> {
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl KvStore for FileKvStore {
    fn get(&self, key: &str) -> Option<String> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(contents) => Some(contents),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                error!(key, path = %path.display(), error = %e, "Failed to read store entry");
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        fs::write(self.path_for(key), value)
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            // Removing an absent key is a no-op
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn set_get_remove_round_trip() {
        let dir = tempdir().unwrap();
        let store = FileKvStore::new(dir.path().to_path_buf()).unwrap();

        assert!(store.get("missing").is_none());
        store.set("sessionSettings", r#"{"autoSave":true}"#).unwrap();
        assert_eq!(
            store.get("sessionSettings").as_deref(),
            Some(r#"{"autoSave":true}"#)
        );
        store.remove("sessionSettings").unwrap();
        assert!(store.get("sessionSettings").is_none());
    }

    #[test]
    fn remove_absent_key_is_noop() {
        let dir = tempdir().unwrap();
        let store = FileKvStore::new(dir.path().to_path_buf()).unwrap();
        assert!(store.remove("currentSession").is_ok());
    }

    #[test]
    fn creates_data_directory() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("nested").join("data");
        let store = FileKvStore::new(nested.clone()).unwrap();
        store.set("k", "v").unwrap();
        assert!(nested.join("k.json").is_file());
    }
}
