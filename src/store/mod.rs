//! Primary store port.
//!
//! A [`StoreHandle`] is bound to the thread that opened it: the store lock it
//! takes in [`StoreHandle::begin`] belongs to that thread until
//! [`StoreHandle::end`]. Work that must not inherit the calling thread's lock
//! context opens a fresh handle through a [`StoreOpener`] on another thread.

use crate::error::AssetError;
use crate::model::{Record, ResourceId};
use std::fmt;

mod lock;
pub mod memory;
pub mod query;

pub use memory::{MemoryHandle, MemoryStore, StoreMetrics};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Shared access; any number of concurrent readers.
    Read,
    /// Exclusive access; one writer and no readers.
    Write,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Read => f.write_str("read"),
            LockMode::Write => f.write_str("write"),
        }
    }
}

pub trait StoreHandle {
    /// Location shared by every handle opened on the same store.
    fn location(&self) -> &str;

    fn begin(&mut self, mode: LockMode) -> Result<(), AssetError>;
    fn commit(&mut self) -> Result<(), AssetError>;
    fn abort(&mut self);
    /// Release the transaction scope. Safe to call on every exit path.
    fn end(&mut self);

    /// Mode of the open transaction, if any.
    fn mode(&self) -> Option<LockMode>;

    fn get(&self, sub_store: &str, id: &ResourceId) -> Result<Option<Record>, AssetError>;
    fn put(&mut self, sub_store: &str, record: Record) -> Result<(), AssetError>;
    fn remove(&mut self, sub_store: &str, id: &ResourceId) -> Result<Option<Record>, AssetError>;

    /// Subjects matching a triple pattern such as `?s <member> <asset://users/1>`.
    fn query(&self, sub_store: &str, pattern: &str) -> Result<Vec<ResourceId>, AssetError>;
    /// Apply a `SET`/`ADD`/`UNSET` statement; returns the number of records touched.
    fn update(&mut self, sub_store: &str, statement: &str) -> Result<usize, AssetError>;
}

/// Opens new handles to one store location. Each handle is owned by the
/// thread that called `open`.
pub trait StoreOpener: Send + Sync {
    fn location(&self) -> &str;
    fn open(&self) -> Result<Box<dyn StoreHandle>, AssetError>;
}

/// A named sub-store of an open handle.
pub struct SubStore<'a> {
    handle: &'a mut dyn StoreHandle,
    name: &'a str,
}

impl<'a> SubStore<'a> {
    pub fn new(handle: &'a mut dyn StoreHandle, name: &'a str) -> Self {
        Self { handle, name }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn get(&self, id: &ResourceId) -> Result<Option<Record>, AssetError> {
        self.handle.get(self.name, id)
    }

    pub fn put(&mut self, record: Record) -> Result<(), AssetError> {
        self.handle.put(self.name, record)
    }

    pub fn remove(&mut self, id: &ResourceId) -> Result<Option<Record>, AssetError> {
        self.handle.remove(self.name, id)
    }

    pub fn query(&self, pattern: &str) -> Result<Vec<ResourceId>, AssetError> {
        self.handle.query(self.name, pattern)
    }

    pub fn update(&mut self, statement: &str) -> Result<usize, AssetError> {
        self.handle.update(self.name, statement)
    }
}
