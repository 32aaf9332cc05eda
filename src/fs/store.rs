// src/fs/store.rs

//! A directory of `<key>.json` files behaving like a string-keyed map.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::FileSystem;

const EXTENSION: &str = "json";

/// String-keyed JSON document store rooted at a single directory.
///
/// Each value lives in its own file, so writes under distinct keys never
/// contend with each other.
#[derive(Debug, Clone)]
pub struct JsonStore {
    fs: Arc<dyn FileSystem>,
    dir: PathBuf,
}

impl JsonStore {
    pub fn new(fs: Arc<dyn FileSystem>, dir: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let path = self.path_for(key)?;
        if !self.fs.is_file(&path) {
            return Ok(None);
        }
        let contents = self.fs.read_to_string(&path)?;
        let value = serde_json::from_str(&contents)
            .with_context(|| format!("decoding JSON document {:?}", path))?;
        Ok(Some(value))
    }

    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let path = self.path_for(key)?;
        let bytes = serde_json::to_vec_pretty(value)
            .with_context(|| format!("encoding JSON document for key '{key}'"))?;
        self.fs.write(&path, &bytes)
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.fs.is_file(&self.path_for(key)?))
    }

    /// Remove a key; returns whether it existed.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        if !self.fs.is_file(&path) {
            return Ok(false);
        }
        self.fs.remove_file(&path)?;
        Ok(true)
    }

    /// All keys in the store, sorted. A missing directory is an empty store.
    pub fn keys(&self) -> Result<Vec<String>> {
        if !self.fs.exists(&self.dir) {
            return Ok(Vec::new());
        }
        let mut keys: Vec<String> = self
            .fs
            .read_dir(&self.dir)?
            .into_iter()
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(EXTENSION))
            .filter(|p| self.fs.is_file(p))
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.starts_with('.') || key.contains(['/', '\\']) {
            bail!("invalid store key '{key}'");
        }
        Ok(self.dir.join(format!("{key}.{EXTENSION}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    fn store() -> JsonStore {
        JsonStore::new(Arc::new(MockFileSystem::new()), "/data/things")
    }

    #[test]
    fn put_get_remove_round_trip() {
        let store = store();
        assert_eq!(store.get::<Vec<u32>>("a").unwrap(), None);

        store.put("a", &vec![1u32, 2, 3]).unwrap();
        assert_eq!(store.get::<Vec<u32>>("a").unwrap(), Some(vec![1, 2, 3]));
        assert!(store.contains("a").unwrap());

        assert!(store.remove("a").unwrap());
        assert!(!store.remove("a").unwrap());
        assert_eq!(store.get::<Vec<u32>>("a").unwrap(), None);
    }

    #[test]
    fn keys_are_sorted_and_missing_dir_is_empty() {
        let store = store();
        assert!(store.keys().unwrap().is_empty());

        store.put("zeta", &1u8).unwrap();
        store.put("alpha", &2u8).unwrap();
        assert_eq!(store.keys().unwrap(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn rejects_path_like_keys() {
        let store = store();
        assert!(store.put("../escape", &1u8).is_err());
        assert!(store.put("", &1u8).is_err());
    }

    #[test]
    fn real_filesystem_persists_across_instances() {
        let tmp = tempfile::tempdir().unwrap();
        let first = JsonStore::new(Arc::new(crate::fs::RealFileSystem), tmp.path());
        first.put("dol", &"0.2.51").unwrap();

        let second = JsonStore::new(Arc::new(crate::fs::RealFileSystem), tmp.path());
        assert_eq!(second.get::<String>("dol").unwrap().as_deref(), Some("0.2.51"));
        assert_eq!(second.keys().unwrap(), vec!["dol"]);
    }
}
