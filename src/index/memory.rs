use super::{IndexDocument, SearchIndex};
use crate::error::AssetError;
use crate::model::ResourceId;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// In-process search index with an availability switch for outage drills.
/// Writes carrying an older version than the stored document are ignored.
pub struct MemoryIndex {
    documents: Mutex<HashMap<ResourceId, IndexDocument>>,
    available: AtomicBool,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self {
            documents: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn document(&self, id: &ResourceId) -> Option<IndexDocument> {
        self.documents.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.documents.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Successful `write` calls, stale ones included.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> u64 {
        self.deletes.load(Ordering::SeqCst)
    }

    fn ensure_available(&self) -> Result<(), AssetError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AssetError::index("search index unavailable"))
        }
    }
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    async fn write(&self, id: &ResourceId, document: &IndexDocument) -> Result<(), AssetError> {
        self.ensure_available()?;
        let mut documents = self.documents.lock();
        let stale = documents
            .get(id)
            .is_some_and(|existing| existing.version > document.version);
        if !stale {
            documents.insert(id.clone(), document.clone());
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, id: &ResourceId) -> Result<(), AssetError> {
        self.ensure_available()?;
        self.documents.lock().remove(id);
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn current_version(&self, id: &ResourceId) -> Result<Option<u64>, AssetError> {
        self.ensure_available()?;
        Ok(self.documents.lock().get(id).map(|doc| doc.version))
    }

    async fn is_healthy(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}
