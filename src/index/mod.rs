//! Search index port and the per-kind document factories feeding it.

use crate::error::AssetError;
use crate::model::{Record, ResourceId, ResourceKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod memory;

pub use memory::MemoryIndex;

/// A denormalized copy of one record as the search index stores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub id: ResourceId,
    pub kind: ResourceKind,
    /// External version: the record's `modified` stamp.
    pub version: u64,
    pub body: serde_json::Value,
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn write(&self, id: &ResourceId, document: &IndexDocument) -> Result<(), AssetError>;
    /// Deleting an absent entry succeeds.
    async fn delete(&self, id: &ResourceId) -> Result<(), AssetError>;
    async fn current_version(&self, id: &ResourceId) -> Result<Option<u64>, AssetError>;
    async fn is_healthy(&self) -> bool;
}

pub type DocumentFactory = Box<dyn Fn(&Record) -> Result<IndexDocument, AssetError> + Send + Sync>;

/// Builds index documents, one factory per resource kind.
#[derive(Default)]
pub struct DocumentRegistry {
    factories: HashMap<ResourceKind, DocumentFactory>,
}

impl DocumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every kind serialized as-is.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for kind in ResourceKind::ALL {
            registry.register(kind, plain_document);
        }
        registry
    }

    pub fn register<F>(&mut self, kind: ResourceKind, factory: F) -> &mut Self
    where
        F: Fn(&Record) -> Result<IndexDocument, AssetError> + Send + Sync + 'static,
    {
        self.factories.insert(kind, Box::new(factory));
        self
    }

    pub fn supports(&self, kind: ResourceKind) -> bool {
        self.factories.contains_key(&kind)
    }

    pub fn build(&self, record: &Record) -> Result<IndexDocument, AssetError> {
        let factory = self.factories.get(&record.kind).ok_or_else(|| {
            AssetError::index(format!("no document factory registered for {}", record.kind))
        })?;
        factory(record)
    }
}

pub fn plain_document(record: &Record) -> Result<IndexDocument, AssetError> {
    let body = serde_json::to_value(record).map_err(|e| AssetError::Encode(e.to_string()))?;
    Ok(IndexDocument {
        id: record.id.clone(),
        kind: record.kind,
        version: record.modified,
        body,
    })
}
