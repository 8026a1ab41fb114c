//! In-memory [`KeyValueStore`] used for local runs and tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::kv::{Item, KeyValueStore, KvError, PutCondition};

#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    items: Mutex<BTreeMap<String, Item>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Raw item for a storage key, bypassing the store contract.
    pub fn raw_item(&self, key: &str) -> Option<Item> {
        self.items.lock().get(key).cloned()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn put(&self, key: &str, item: Item, condition: PutCondition) -> Result<(), KvError> {
        let mut items = self.items.lock();
        if condition == PutCondition::KeyAbsent && items.contains_key(key) {
            return Err(KvError::ConditionFailed {
                key: key.to_string(),
            });
        }
        items.insert(key.to_string(), item);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Item>, KvError> {
        Ok(self.items.lock().get(key).cloned())
    }

    async fn update(&self, key: &str, set: Item, remove: &[&str]) -> Result<Item, KvError> {
        let mut items = self.items.lock();
        let Some(existing) = items.get_mut(key) else {
            return Err(KvError::ConditionFailed {
                key: key.to_string(),
            });
        };

        for (name, value) in set {
            existing.insert(name, value);
        }
        for name in remove {
            existing.remove(*name);
        }
        Ok(existing.clone())
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        match self.items.lock().remove(key) {
            Some(_) => Ok(()),
            None => Err(KvError::ConditionFailed {
                key: key.to_string(),
            }),
        }
    }

    async fn scan_all(&self) -> Result<Vec<(String, Item)>, KvError> {
        Ok(self
            .items
            .lock()
            .iter()
            .map(|(key, item)| (key.clone(), item.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    fn item(value: Value) -> Item {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[tokio::test]
    async fn conditional_put_rejects_existing_key() {
        let store = InMemoryKeyValueStore::new();
        store
            .put("k", item(json!({"a": 1})), PutCondition::KeyAbsent)
            .await
            .expect("first put should succeed");

        let error = store
            .put("k", item(json!({"a": 2})), PutCondition::KeyAbsent)
            .await
            .expect_err("second conditional put should fail");
        assert!(error.is_condition_failed());
        assert_eq!(store.raw_item("k"), Some(item(json!({"a": 1}))));
    }

    #[tokio::test]
    async fn update_sets_and_removes_attributes() {
        let store = InMemoryKeyValueStore::new();
        store
            .put("k", item(json!({"a": 1, "b": 2})), PutCondition::Always)
            .await
            .expect("put should succeed");

        let updated = store
            .update("k", item(json!({"a": 3})), &["b"])
            .await
            .expect("update should succeed");
        assert_eq!(updated, item(json!({"a": 3})));
    }

    #[tokio::test]
    async fn update_and_delete_require_existing_key() {
        let store = InMemoryKeyValueStore::new();

        let update_error = store
            .update("missing", Item::new(), &[])
            .await
            .expect_err("update should fail");
        assert!(update_error.is_condition_failed());

        let delete_error = store.delete("missing").await.expect_err("delete should fail");
        assert!(delete_error.is_condition_failed());
        assert!(store.is_empty());
    }
}
