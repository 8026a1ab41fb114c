//! Key-value seam under the record store.
//!
//! Implementations are thin adapters: they persist attribute maps under a
//! string key and enforce existence preconditions atomically. They never
//! interpret task fields. A failed precondition is reported as
//! [`KvError::ConditionFailed`] so callers branch on the error kind instead of
//! matching messages.

use async_trait::async_trait;
use serde_json::{Map, Value};

/// Attribute name to value. The storage key is carried separately and is
/// never part of the item handed back to callers.
pub type Item = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutCondition {
    Always,
    KeyAbsent,
}

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("condition check failed for key {key}")]
    ConditionFailed { key: String },
    #[error("request throttled for key {key}: {message}")]
    Throttled { key: String, message: String },
    #[error("backend error: {message}")]
    Backend {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl KvError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            source: None,
        }
    }

    pub fn is_condition_failed(&self) -> bool {
        matches!(self, Self::ConditionFailed { .. })
    }
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn put(&self, key: &str, item: Item, condition: PutCondition) -> Result<(), KvError>;

    async fn get(&self, key: &str) -> Result<Option<Item>, KvError>;

    /// Sets `set` attributes and removes `remove` attributes in one
    /// conditional write that requires the key to exist. Returns the item as
    /// stored after the write.
    async fn update(&self, key: &str, set: Item, remove: &[&str]) -> Result<Item, KvError>;

    /// Deletes the key, requiring it to exist.
    async fn delete(&self, key: &str) -> Result<(), KvError>;

    /// Full scan. Not transactional: concurrent writes may or may not be
    /// reflected.
    async fn scan_all(&self) -> Result<Vec<(String, Item)>, KvError>;
}
