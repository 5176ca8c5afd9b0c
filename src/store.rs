//! Persistence seams for the catalog and the watch-history ledger.
//!
//! Both are whole documents in a key-value store: every operation loads the
//! document, changes it in memory and writes it back in one go. Components
//! receive the store as an argument; nothing here is global.

use std::{
    collections::HashMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use parking_lot::RwLock;
use tempfile::NamedTempFile;
use tracing::warn;

use crate::catalog::{Title, WatchHistoryEntry};
use crate::error::{CoreError, CoreResult};

/// Key under which the catalog document is stored.
pub const CATALOG_KEY: &str = "animes";
/// Key under which the watch-history ledger is stored.
pub const HISTORY_KEY: &str = "watchHistory";

/// String documents addressed by key, the shape of browser local storage.
pub trait DocumentStore {
    fn read(&self, key: &str) -> Result<Option<String>>;
    /// Replaces the document; readers never observe a partial write.
    fn write(&self, key: &str, value: &str) -> Result<()>;
}

pub trait CatalogStore {
    fn get_all_titles(&self) -> CoreResult<Vec<Title>>;
    fn save_titles(&self, titles: &[Title]) -> CoreResult<()>;
}

pub trait HistoryStore {
    fn get_history(&self) -> CoreResult<Vec<WatchHistoryEntry>>;
    fn save_history(&self, entries: &[WatchHistoryEntry]) -> CoreResult<()>;
}

impl<T: DocumentStore + ?Sized> CatalogStore for T {
    fn get_all_titles(&self) -> CoreResult<Vec<Title>> {
        let Some(raw) = self.read(CATALOG_KEY)? else {
            return Ok(Vec::new());
        };
        serde_json::from_str(&raw).map_err(|err| CoreError::CatalogCorrupt(err.to_string()))
    }

    fn save_titles(&self, titles: &[Title]) -> CoreResult<()> {
        let raw = serde_json::to_string(titles).context("serializing catalog")?;
        self.write(CATALOG_KEY, &raw)?;
        Ok(())
    }
}

impl<T: DocumentStore + ?Sized> HistoryStore for T {
    fn get_history(&self) -> CoreResult<Vec<WatchHistoryEntry>> {
        let Some(raw) = self.read(HISTORY_KEY)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&raw) {
            Ok(entries) => Ok(entries),
            Err(err) => {
                let err = CoreError::LedgerCorrupt(err.to_string());
                warn!(error = %err, "starting from an empty watch history");
                Ok(Vec::new())
            }
        }
    }

    fn save_history(&self, entries: &[WatchHistoryEntry]) -> CoreResult<()> {
        let raw = serde_json::to_string(entries).context("serializing watch history")?;
        self.write(HISTORY_KEY, &raw)?;
        Ok(())
    }
}

/// In-process store. Used by tests and by callers that keep state per session.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self.documents.read().get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        self.documents
            .write()
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

/// One `<key>.json` file per document inside `dir`.
///
/// Writes land in a temp file in the same directory which is then renamed
/// over the target, so a crash leaves either the old or the new document.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating document directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl DocumentStore for JsonFileStore {
    fn read(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let raw =
            fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        Ok(Some(raw))
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key);
        let mut tmp = NamedTempFile::new_in(&self.dir)
            .with_context(|| format!("creating temp file in {}", self.dir.display()))?;
        tmp.write_all(value.as_bytes())
            .with_context(|| format!("writing {}", path.display()))?;
        tmp.as_file()
            .sync_all()
            .with_context(|| format!("syncing {}", path.display()))?;
        tmp.persist(&path)
            .map_err(|err| err.error)
            .with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }
}
