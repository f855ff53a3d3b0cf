use super::lock::StoreLock;
use super::query::{parse_pattern, parse_statement};
use super::{LockMode, StoreHandle, StoreOpener};
use crate::config::RepositoryConfig;
use crate::error::AssetError;
use crate::model::{Record, ResourceId, ResourceKind, now_micros};
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::ThreadId;
use std::time::Duration;
use tracing::trace;

type Dataset = im::HashMap<String, im::OrdMap<ResourceId, Record>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreMetrics {
    pub begins: u64,
    pub commits: u64,
    pub aborts: u64,
    pub ends: u64,
}

#[derive(Default)]
struct Counters {
    begins: AtomicU64,
    commits: AtomicU64,
    aborts: AtomicU64,
    ends: AtomicU64,
}

struct StoreShared {
    location: String,
    data: RwLock<Dataset>,
    lock: StoreLock,
    lock_timeout: Duration,
    counters: Counters,
}

/// In-process primary store. Every transaction works on a structurally shared
/// copy of the committed dataset, published atomically on write commit.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<StoreShared>,
}

impl MemoryStore {
    pub fn new(location: impl Into<String>, config: &RepositoryConfig) -> Self {
        let mut data = Dataset::new();
        for kind in ResourceKind::ALL {
            data.insert(kind.sub_store().to_string(), im::OrdMap::new());
        }
        Self {
            shared: Arc::new(StoreShared {
                location: location.into(),
                data: RwLock::new(data),
                lock: StoreLock::default(),
                lock_timeout: config.lock_timeout,
                counters: Counters::default(),
            }),
        }
    }

    /// Open a handle owned by the calling thread.
    pub fn open_handle(&self) -> MemoryHandle {
        MemoryHandle {
            shared: Arc::clone(&self.shared),
            owner: std::thread::current().id(),
            tx: None,
        }
    }

    /// Write `records` in one transaction.
    pub fn load(&self, records: impl IntoIterator<Item = Record>) -> Result<(), AssetError> {
        let mut handle = self.open_handle();
        handle.begin(LockMode::Write)?;
        let written = records
            .into_iter()
            .try_for_each(|record| handle.put(record.kind.sub_store(), record));
        let result = match written {
            Ok(()) => handle.commit(),
            Err(e) => {
                handle.abort();
                Err(e)
            }
        };
        handle.end();
        result
    }

    /// Committed state of one record, read outside any transaction.
    pub fn peek(&self, sub_store: &str, id: &ResourceId) -> Option<Record> {
        self.shared
            .data
            .read()
            .get(sub_store)
            .and_then(|records| records.get(id).cloned())
    }

    pub fn len(&self, sub_store: &str) -> usize {
        self.shared
            .data
            .read()
            .get(sub_store)
            .map_or(0, |records| records.len())
    }

    pub fn metrics(&self) -> StoreMetrics {
        let c = &self.shared.counters;
        StoreMetrics {
            begins: c.begins.load(Ordering::Relaxed),
            commits: c.commits.load(Ordering::Relaxed),
            aborts: c.aborts.load(Ordering::Relaxed),
            ends: c.ends.load(Ordering::Relaxed),
        }
    }
}

impl StoreOpener for MemoryStore {
    fn location(&self) -> &str {
        &self.shared.location
    }

    fn open(&self) -> Result<Box<dyn StoreHandle>, AssetError> {
        Ok(Box::new(self.open_handle()))
    }
}

struct OpenTx {
    mode: LockMode,
    staged: Dataset,
    finished: bool,
}

pub struct MemoryHandle {
    shared: Arc<StoreShared>,
    owner: ThreadId,
    tx: Option<OpenTx>,
}

impl MemoryHandle {
    fn open_tx(&self) -> Result<&OpenTx, AssetError> {
        match &self.tx {
            Some(tx) if !tx.finished => Ok(tx),
            _ => Err(AssetError::Validation("no open transaction".into())),
        }
    }

    fn write_tx(&mut self) -> Result<&mut OpenTx, AssetError> {
        match &mut self.tx {
            Some(tx) if !tx.finished => {
                if tx.mode == LockMode::Write {
                    Ok(tx)
                } else {
                    Err(AssetError::Validation(
                        "mutation inside a read transaction".into(),
                    ))
                }
            }
            _ => Err(AssetError::Validation("no open transaction".into())),
        }
    }
}

fn sub_store<'d>(
    data: &'d Dataset,
    name: &str,
) -> Result<&'d im::OrdMap<ResourceId, Record>, AssetError> {
    data.get(name)
        .ok_or_else(|| AssetError::Validation(format!("unknown sub-store '{name}'")))
}

fn sub_store_mut<'d>(
    data: &'d mut Dataset,
    name: &str,
) -> Result<&'d mut im::OrdMap<ResourceId, Record>, AssetError> {
    data.get_mut(name)
        .ok_or_else(|| AssetError::Validation(format!("unknown sub-store '{name}'")))
}

impl StoreHandle for MemoryHandle {
    fn location(&self) -> &str {
        &self.shared.location
    }

    fn begin(&mut self, mode: LockMode) -> Result<(), AssetError> {
        if std::thread::current().id() != self.owner {
            return Err(AssetError::Validation(
                "store handle used outside the thread that opened it".into(),
            ));
        }
        if self.tx.is_some() {
            return Err(AssetError::Validation(
                "transaction already open on this handle".into(),
            ));
        }
        self.shared
            .lock
            .acquire(mode, self.owner, self.shared.lock_timeout)?;
        let staged = self.shared.data.read().clone();
        self.tx = Some(OpenTx {
            mode,
            staged,
            finished: false,
        });
        self.shared.counters.begins.fetch_add(1, Ordering::Relaxed);
        trace!(location = %self.shared.location, %mode, "store transaction begun");
        Ok(())
    }

    fn commit(&mut self) -> Result<(), AssetError> {
        let tx = match &mut self.tx {
            Some(tx) if !tx.finished => tx,
            _ => return Err(AssetError::Validation("no open transaction".into())),
        };
        if tx.mode == LockMode::Write {
            *self.shared.data.write() = std::mem::take(&mut tx.staged);
        }
        tx.finished = true;
        self.shared.counters.commits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn abort(&mut self) {
        if let Some(tx) = &mut self.tx
            && !tx.finished
        {
            tx.finished = true;
            tx.staged = Dataset::new();
            self.shared.counters.aborts.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn end(&mut self) {
        if let Some(tx) = self.tx.take() {
            self.shared.lock.release(tx.mode, self.owner);
            self.shared.counters.ends.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn mode(&self) -> Option<LockMode> {
        self.tx.as_ref().map(|tx| tx.mode)
    }

    fn get(&self, sub: &str, id: &ResourceId) -> Result<Option<Record>, AssetError> {
        let tx = self.open_tx()?;
        Ok(sub_store(&tx.staged, sub)?.get(id).cloned())
    }

    fn put(&mut self, sub: &str, record: Record) -> Result<(), AssetError> {
        if record.kind.sub_store() != sub {
            return Err(AssetError::Validation(format!(
                "{} record '{}' does not belong in sub-store '{sub}'",
                record.kind, record.id
            )));
        }
        let tx = self.write_tx()?;
        sub_store_mut(&mut tx.staged, sub)?.insert(record.id.clone(), record);
        Ok(())
    }

    fn remove(&mut self, sub: &str, id: &ResourceId) -> Result<Option<Record>, AssetError> {
        let tx = self.write_tx()?;
        Ok(sub_store_mut(&mut tx.staged, sub)?.remove(id))
    }

    fn query(&self, sub: &str, pattern: &str) -> Result<Vec<ResourceId>, AssetError> {
        let pattern = parse_pattern(pattern)?;
        let tx = self.open_tx()?;
        Ok(sub_store(&tx.staged, sub)?
            .values()
            .filter(|record| pattern.matches(record))
            .map(|record| record.id.clone())
            .collect())
    }

    fn update(&mut self, sub: &str, statement: &str) -> Result<usize, AssetError> {
        let statement = parse_statement(statement)?;
        let tx = self.write_tx()?;
        let records = sub_store_mut(&mut tx.staged, sub)?;
        let Some(record) = records.get_mut(statement.subject()) else {
            return Ok(0);
        };
        if statement.apply(record) {
            record.modified = now_micros();
            Ok(1)
        } else {
            Ok(0)
        }
    }
}

impl Drop for MemoryHandle {
    fn drop(&mut self) {
        self.end();
    }
}
