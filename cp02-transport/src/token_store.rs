//! Token store (C3): persistent `bluetooth_address -> token` mapping.
//!
//! Not a secret — a cached probe result from enumeration discovery (C5). The
//! whole point of persisting it is avoiding re-running that 256-value probe
//! on every reconnect.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TokenEntry {
    pub token: u8,
    pub last_used: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TokenFile {
    #[serde(flatten)]
    entries: HashMap<String, TokenEntry>,
}

/// Atomic-file-backed token store. Writes are temp-file-then-rename so a
/// crash mid-write never corrupts the previous contents.
pub struct TokenStore {
    path: PathBuf,
    entries: HashMap<String, TokenEntry>,
}

impl TokenStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str::<TokenFile>(&contents)?.entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(TokenStore { path, entries })
    }

    pub fn get(&self, addr: &str) -> Option<u8> {
        self.entries.get(addr).map(|e| e.token)
    }

    pub fn put(&mut self, addr: &str, token: u8) -> Result<(), Error> {
        let last_used = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.entries
            .insert(addr.to_string(), TokenEntry { token, last_used });
        self.flush()
    }

    pub fn clear(&mut self) -> Result<(), Error> {
        self.entries.clear();
        self.flush()
    }

    fn flush(&self) -> Result<(), Error> {
        let file = TokenFile {
            entries: self.entries.clone(),
        };
        let serialized = serde_json::to_string_pretty(&file)?;
        write_atomic(&self.path, serialized.as_bytes())
    }
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, contents)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let dir = std::env::temp_dir().join(format!("cp02-token-store-test-{}", std::process::id()));
        let path = dir.join("tokens.json");
        let mut store = TokenStore::open(&path).unwrap();
        assert_eq!(store.get("AA:BB:CC:DD:EE:FF"), None);
        store.put("AA:BB:CC:DD:EE:FF", 42).unwrap();
        assert_eq!(store.get("AA:BB:CC:DD:EE:FF"), Some(42));

        // reopen from disk
        let reopened = TokenStore::open(&path).unwrap();
        assert_eq!(reopened.get("AA:BB:CC:DD:EE:FF"), Some(42));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn clear_empties_the_store() {
        let dir = std::env::temp_dir().join(format!("cp02-token-store-test-clear-{}", std::process::id()));
        let path = dir.join("tokens.json");
        let mut store = TokenStore::open(&path).unwrap();
        store.put("addr", 1).unwrap();
        store.clear().unwrap();
        assert_eq!(store.get("addr"), None);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_file_opens_empty() {
        let path = std::env::temp_dir().join("cp02-token-store-definitely-missing.json");
        std::fs::remove_file(&path).ok();
        let store = TokenStore::open(&path).unwrap();
        assert_eq!(store.get("anything"), None);
    }
}
