//! Snapshot-persisted item store.
//!
//! All reads and writes go to an inner [`MemoryStore`]. `flush()` writes the
//! full item set to `items.bin` (bincode) through a temp file + rename, so a
//! crash mid-flush leaves the previous snapshot intact. Writes accepted since
//! the last flush are lost on restart.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{ItemStore, MemoryStore, QueryRequest};
use crate::codec::Item;
use crate::error::Result;
use crate::keys::PrimaryKey;
use crate::statement::Statement;

pub const SNAPSHOT_FILE: &str = "items.bin";
const SNAPSHOT_TMP: &str = "items.bin.tmp";

pub struct FileStore {
    dir: PathBuf,
    inner: MemoryStore,
    dirty: AtomicBool,
    /// Serializes concurrent flushes onto the single temp file.
    flush_lock: Mutex<()>,
}

impl FileStore {
    /// Open (or create) a store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let snapshot = dir.join(SNAPSHOT_FILE);
        let inner = if snapshot.exists() {
            let reader = BufReader::new(File::open(&snapshot)?);
            let items: Vec<Item> = bincode::deserialize_from(reader)?;
            tracing::debug!(path = %snapshot.display(), items = items.len(), "loaded snapshot");
            MemoryStore::from_items(items)?
        } else {
            MemoryStore::new()
        };

        Ok(Self {
            dir,
            inner,
            dirty: AtomicBool::new(false),
            flush_lock: Mutex::new(()),
        })
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }
}

impl ItemStore for FileStore {
    fn put_item(&self, item: Item) -> Result<()> {
        self.inner.put_item(item)?;
        self.mark_dirty();
        Ok(())
    }

    fn get_item(&self, key: &PrimaryKey) -> Result<Option<Item>> {
        self.inner.get_item(key)
    }

    fn delete_item(&self, key: &PrimaryKey) -> Result<bool> {
        let removed = self.inner.delete_item(key)?;
        if removed {
            self.mark_dirty();
        }
        Ok(removed)
    }

    fn query(&self, request: &QueryRequest) -> Result<Vec<Item>> {
        self.inner.query(request)
    }

    fn execute_statement(&self, statement: &Statement) -> Result<Vec<Item>> {
        self.inner.execute_statement(statement)
    }

    fn item_count(&self) -> usize {
        self.inner.item_count()
    }

    fn flush(&self) -> Result<()> {
        let _guard = self.flush_lock.lock()?;
        // Cleared before the snapshot: a write racing the flush re-marks dirty.
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let items = self.inner.snapshot()?;
        let tmp = self.dir.join(SNAPSHOT_TMP);
        let result = (|| -> Result<()> {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            bincode::serialize_into(&mut writer, &items)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
            fs::rename(&tmp, self.dir.join(SNAPSHOT_FILE))?;
            Ok(())
        })();

        if let Err(e) = &result {
            self.mark_dirty();
            tracing::warn!(path = %self.dir.display(), error = %e, "snapshot flush failed");
        } else {
            tracing::debug!(path = %self.dir.display(), items = items.len(), "snapshot flushed");
        }
        result
    }
}
