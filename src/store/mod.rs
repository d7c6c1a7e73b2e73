// src/store/mod.rs
//! Durable key-value persistence on the device. Values are opaque bytes;
//! callers encode JSON on top.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::fs;

use crate::error::PersistenceError;

#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    /// `Ok(None)` when the key was never written.
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError>;

    /// Replace the whole value for `key`.
    async fn write(&self, key: &str, value: &[u8]) -> Result<(), PersistenceError>;
}

/// One file per key under a directory. Writes go to a temp file first and are
/// renamed into place so readers never observe a half-written value.
pub struct FileKvStore {
    dir: PathBuf,
}

impl FileKvStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// ASCII letters, digits and `-` map to themselves; every other byte,
    /// `_` included, becomes `_xx` (lowercase hex). Distinct keys therefore
    /// never share a file.
    fn path_for(&self, key: &str) -> PathBuf {
        let mut safe = String::with_capacity(key.len());
        for b in key.bytes() {
            if b.is_ascii_alphanumeric() || b == b'-' {
                safe.push(char::from(b));
            } else {
                safe.push_str(&format!("_{b:02x}"));
            }
        }
        self.dir.join(format!("{safe}.json"))
    }
}

#[async_trait::async_trait]
impl KvStore for FileKvStore {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        match fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PersistenceError::Read {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn write(&self, key: &str, value: &[u8]) -> Result<(), PersistenceError> {
        let werr = |e: std::io::Error| PersistenceError::Write {
            key: key.to_string(),
            reason: e.to_string(),
        };
        fs::create_dir_all(&self.dir).await.map_err(werr)?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value).await.map_err(werr)?;
        fs::rename(&tmp, &path).await.map_err(werr)?;
        Ok(())
    }
}

/// In-memory store for tests; can be switched into failure mode.
#[derive(Default)]
pub struct MemoryKvStore {
    values: Mutex<HashMap<String, Vec<u8>>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reads(&self, on: bool) {
        self.fail_reads.store(on, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, on: bool) {
        self.fail_writes.store(on, Ordering::SeqCst);
    }

    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.values.lock().expect("kv mutex poisoned").get(key).cloned()
    }

    pub fn put_raw(&self, key: &str, value: &[u8]) {
        self.values
            .lock()
            .expect("kv mutex poisoned")
            .insert(key.to_string(), value.to_vec());
    }
}

#[async_trait::async_trait]
impl KvStore for MemoryKvStore {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(PersistenceError::Read {
                key: key.to_string(),
                reason: "memory store: reads disabled".into(),
            });
        }
        Ok(self.raw(key))
    }

    async fn write(&self, key: &str, value: &[u8]) -> Result<(), PersistenceError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PersistenceError::Write {
                key: key.to_string(),
                reason: "memory store: writes disabled".into(),
            });
        }
        self.put_raw(key, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_store_roundtrip_and_missing_key() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileKvStore::new(tmp.path().join("kv"));

        assert_eq!(store.read("partygram").await.unwrap(), None);
        store.write("partygram", br#"{"likes":{}}"#).await.unwrap();
        store.write("partygram", br#"{"likes":{"1":{}}}"#).await.unwrap();
        let got = store.read("partygram").await.unwrap().unwrap();
        assert_eq!(got, br#"{"likes":{"1":{}}}"#.to_vec());
        assert!(!tmp.path().join("kv").join("partygram.json.tmp").exists());
    }

    #[test]
    fn file_names_are_escaped() {
        let store = FileKvStore::new("/tmp/x");
        assert_eq!(store.path_for("partygram"), PathBuf::from("/tmp/x/partygram.json"));
        assert_eq!(store.path_for("../evil key"), PathBuf::from("/tmp/x/_2e_2e_2fevil_20key.json"));
    }

    #[test]
    fn similar_keys_get_distinct_files() {
        let store = FileKvStore::new("/tmp/x");
        assert_ne!(store.path_for("a.b"), store.path_for("a_b"));
        assert_ne!(store.path_for("a_2eb"), store.path_for("a.b"));
    }

    #[tokio::test]
    async fn similar_keys_do_not_overwrite_each_other() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileKvStore::new(tmp.path());
        store.write("a.b", b"dot").await.unwrap();
        store.write("a_b", b"underscore").await.unwrap();
        assert_eq!(store.read("a.b").await.unwrap().unwrap(), b"dot".to_vec());
        assert_eq!(store.read("a_b").await.unwrap().unwrap(), b"underscore".to_vec());
    }
}
