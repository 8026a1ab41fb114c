//! Task record store over a [`KeyValueStore`].
//!
//! Missing records are a normal outcome: `get` and `update` return `None`
//! and `delete` returns `false` when the existence precondition fails.
//! Everything that reaches the caller as an error is either a validation
//! failure (permanent) or a storage/serialization failure (retryable).

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::contract::{
    validate_create_request, validate_update_request, CreateTaskRequest, Task, UpdateTaskRequest,
    ValidationError,
};
use crate::kv::{Item, KeyValueStore, KvError, PutCondition};
use crate::storage_keys::{idempotent_task_id, task_id_from_key, task_key};

const TITLE_ATTRIBUTE: &str = "title";
const DETAIL_ATTRIBUTE: &str = "detail";
const DUE_AT_ATTRIBUTE: &str = "dueAt";
const IS_COMPLETE_ATTRIBUTE: &str = "isComplete";
const UPDATED_AT_ATTRIBUTE: &str = "updatedAt";

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Millisecond-precision UTC timestamp with a `Z` suffix.
pub fn format_timestamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, thiserror::Error)]
pub enum TaskStoreError {
    #[error("invalid task payload: {0}")]
    Validation(#[from] ValidationError),
    #[error("task storage failed: {0}")]
    Storage(#[source] KvError),
    #[error("task item {key} could not be (de)serialized: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl TaskStoreError {
    /// Validation failures are permanent; storage and serialization
    /// failures may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Validation(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(Task),
    /// A record already existed under the derived id; nothing was written.
    Existing(Task),
}

impl CreateOutcome {
    pub fn task(&self) -> &Task {
        match self {
            Self::Created(task) | Self::Existing(task) => task,
        }
    }

    pub fn into_task(self) -> Task {
        match self {
            Self::Created(task) | Self::Existing(task) => task,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Stateless handle; clones share the same backend and clock.
#[derive(Clone)]
pub struct TaskStore {
    kv: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl TaskStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Creates a task under a freshly generated id.
    pub async fn create(&self, request: &CreateTaskRequest) -> Result<Task, TaskStoreError> {
        validate_create_request(request)?;
        let task = self.new_task(Uuid::new_v4().to_string(), request);
        self.kv
            .put(&task_key(&task.id), encode_task(&task)?, PutCondition::Always)
            .await
            .map_err(TaskStoreError::Storage)?;
        Ok(task)
    }

    /// Creates a task whose id is derived from `idempotency_key`. Repeating
    /// the call with the same key returns the stored record untouched.
    pub async fn create_idempotent(
        &self,
        request: &CreateTaskRequest,
        idempotency_key: &str,
    ) -> Result<CreateOutcome, TaskStoreError> {
        validate_create_request(request)?;
        let task = self.new_task(idempotent_task_id(idempotency_key), request);
        let key = task_key(&task.id);

        match self
            .kv
            .put(&key, encode_task(&task)?, PutCondition::KeyAbsent)
            .await
        {
            Ok(()) => Ok(CreateOutcome::Created(task)),
            Err(KvError::ConditionFailed { .. }) => {
                tracing::debug!(task_id = %task.id, "task already exists for idempotency key");
                // A concurrent delete between the put and this read surfaces
                // as a retryable condition failure.
                match self.get(&task.id).await? {
                    Some(existing) => Ok(CreateOutcome::Existing(existing)),
                    None => Err(TaskStoreError::Storage(KvError::ConditionFailed { key })),
                }
            }
            Err(error) => Err(TaskStoreError::Storage(error)),
        }
    }

    pub async fn get(&self, task_id: &str) -> Result<Option<Task>, TaskStoreError> {
        let key = task_key(task_id);
        let item = self.kv.get(&key).await.map_err(TaskStoreError::Storage)?;
        item.map(|item| decode_task(&key, item)).transpose()
    }

    /// Scans every task. Items that fail to decode are skipped and logged.
    pub async fn list(&self) -> Result<Vec<Task>, TaskStoreError> {
        let items = self.kv.scan_all().await.map_err(TaskStoreError::Storage)?;

        let mut tasks = Vec::with_capacity(items.len());
        for (key, item) in items {
            if task_id_from_key(&key).is_none() {
                continue;
            }
            match decode_task(&key, item) {
                Ok(task) => tasks.push(task),
                Err(error) => tracing::warn!(%key, %error, "skipping undecodable task item"),
            }
        }
        Ok(tasks)
    }

    /// Replaces the mutable fields of an existing task. Optional fields
    /// absent from `request` are removed from the stored record.
    pub async fn update(
        &self,
        task_id: &str,
        request: &UpdateTaskRequest,
    ) -> Result<Option<Task>, TaskStoreError> {
        validate_update_request(request)?;
        let key = task_key(task_id);

        let mut set = Item::new();
        let mut remove = Vec::new();
        set.insert(TITLE_ATTRIBUTE.to_string(), Value::from(request.title.clone()));
        set.insert(
            IS_COMPLETE_ATTRIBUTE.to_string(),
            Value::from(request.is_complete),
        );
        set.insert(
            UPDATED_AT_ATTRIBUTE.to_string(),
            Value::from(format_timestamp(self.clock.now())),
        );
        match &request.detail {
            Some(detail) => {
                set.insert(DETAIL_ATTRIBUTE.to_string(), Value::from(detail.clone()));
            }
            None => remove.push(DETAIL_ATTRIBUTE),
        }
        match &request.due_at {
            Some(due_at) => {
                set.insert(DUE_AT_ATTRIBUTE.to_string(), Value::from(due_at.clone()));
            }
            None => remove.push(DUE_AT_ATTRIBUTE),
        }

        match self.kv.update(&key, set, &remove).await {
            Ok(item) => decode_task(&key, item).map(Some),
            Err(KvError::ConditionFailed { .. }) => {
                tracing::debug!(%task_id, "update skipped, task does not exist");
                Ok(None)
            }
            Err(error) => Err(TaskStoreError::Storage(error)),
        }
    }

    /// Returns whether a record was removed.
    pub async fn delete(&self, task_id: &str) -> Result<bool, TaskStoreError> {
        match self.kv.delete(&task_key(task_id)).await {
            Ok(()) => Ok(true),
            Err(KvError::ConditionFailed { .. }) => {
                tracing::debug!(%task_id, "delete skipped, task does not exist");
                Ok(false)
            }
            Err(error) => Err(TaskStoreError::Storage(error)),
        }
    }

    fn new_task(&self, id: String, request: &CreateTaskRequest) -> Task {
        let now = format_timestamp(self.clock.now());
        Task {
            id,
            title: request.title.clone(),
            detail: request.detail.clone(),
            due_at: request.due_at.clone(),
            is_complete: request.is_complete,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

fn encode_task(task: &Task) -> Result<Item, TaskStoreError> {
    let serialization_error = |source| TaskStoreError::Serialization {
        key: task_key(&task.id),
        source,
    };
    match serde_json::to_value(task).map_err(serialization_error)? {
        Value::Object(item) => Ok(item),
        other => Err(serialization_error(serde::ser::Error::custom(format!(
            "task encoded as non-object value: {other}"
        )))),
    }
}

fn decode_task(key: &str, item: Item) -> Result<Task, TaskStoreError> {
    serde_json::from_value(Value::Object(item)).map_err(|source| TaskStoreError::Serialization {
        key: key.to_string(),
        source,
    })
}
