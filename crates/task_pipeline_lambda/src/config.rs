//! Environment-driven configuration, read once per cold start.

use std::time::Duration;

use task_pipeline_core::contract::{DEFAULT_MAX_IMPORT_ROWS, TASK_CREATE_EVENT_TYPE};

pub const TASKS_TABLE_NAME_VAR: &str = "TASKS_TABLE_NAME";
pub const TASKS_QUEUE_URL_VAR: &str = "TASKS_QUEUE_URL";
pub const BULK_IMPORT_MAX_ROWS_VAR: &str = "BULK_IMPORT_MAX_ROWS";
pub const CONSUMER_DEADLINE_MARGIN_MS_VAR: &str = "CONSUMER_DEADLINE_MARGIN_MS";
pub const IDEMPOTENT_CREATES_VAR: &str = "IDEMPOTENT_CREATES";
pub const TASK_EVENT_TYPE_VAR: &str = "TASK_EVENT_TYPE";

const DEFAULT_DEADLINE_MARGIN_MS: u64 = 1_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be configured")]
    Missing { name: &'static str },
    #[error("{name} has invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub table_name: String,
    /// Only the bulk import path publishes, so the consumer may run without it.
    pub queue_url: Option<String>,
    pub max_import_rows: usize,
    pub deadline_margin: Duration,
    pub idempotent_creates: bool,
    pub event_type: String,
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup. Blank
    /// values are treated as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let read = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let table_name = read(TASKS_TABLE_NAME_VAR).ok_or(ConfigError::Missing {
            name: TASKS_TABLE_NAME_VAR,
        })?;

        let max_import_rows = match read(BULK_IMPORT_MAX_ROWS_VAR) {
            None => DEFAULT_MAX_IMPORT_ROWS,
            Some(value) => match value.parse::<usize>() {
                Ok(rows) if rows > 0 => rows,
                Ok(_) => return Err(invalid(BULK_IMPORT_MAX_ROWS_VAR, value, "must be positive")),
                Err(error) => return Err(invalid(BULK_IMPORT_MAX_ROWS_VAR, value, error)),
            },
        };

        let deadline_margin_ms = match read(CONSUMER_DEADLINE_MARGIN_MS_VAR) {
            None => DEFAULT_DEADLINE_MARGIN_MS,
            Some(value) => value
                .parse::<u64>()
                .map_err(|error| invalid(CONSUMER_DEADLINE_MARGIN_MS_VAR, value, error))?,
        };

        let idempotent_creates = match read(IDEMPOTENT_CREATES_VAR) {
            None => true,
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                _ => {
                    return Err(invalid(
                        IDEMPOTENT_CREATES_VAR,
                        value,
                        "expected true or false",
                    ))
                }
            },
        };

        Ok(Self {
            table_name,
            queue_url: read(TASKS_QUEUE_URL_VAR),
            max_import_rows,
            deadline_margin: Duration::from_millis(deadline_margin_ms),
            idempotent_creates,
            event_type: read(TASK_EVENT_TYPE_VAR)
                .unwrap_or_else(|| TASK_CREATE_EVENT_TYPE.to_string()),
        })
    }

    pub fn require_queue_url(&self) -> Result<&str, ConfigError> {
        self.queue_url.as_deref().ok_or(ConfigError::Missing {
            name: TASKS_QUEUE_URL_VAR,
        })
    }
}

fn invalid(name: &'static str, value: String, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        name,
        value,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<PipelineConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        PipelineConfig::from_lookup(|name| env.get(name).cloned())
    }

    #[test]
    fn applies_defaults_when_only_table_is_set() {
        let config = config_from(&[(TASKS_TABLE_NAME_VAR, "tasks")]).expect("valid config");

        assert_eq!(
            config,
            PipelineConfig {
                table_name: "tasks".to_string(),
                queue_url: None,
                max_import_rows: DEFAULT_MAX_IMPORT_ROWS,
                deadline_margin: Duration::from_millis(1_000),
                idempotent_creates: true,
                event_type: TASK_CREATE_EVENT_TYPE.to_string(),
            }
        );
        assert_eq!(
            config.require_queue_url(),
            Err(ConfigError::Missing {
                name: TASKS_QUEUE_URL_VAR
            })
        );
    }

    #[test]
    fn blank_table_name_is_missing() {
        let error = config_from(&[(TASKS_TABLE_NAME_VAR, "  ")]).expect_err("blank table");
        assert_eq!(error.to_string(), "TASKS_TABLE_NAME must be configured");
    }

    #[test]
    fn reads_overrides() {
        let config = config_from(&[
            (TASKS_TABLE_NAME_VAR, "tasks"),
            (TASKS_QUEUE_URL_VAR, "https://sqs.example/queue"),
            (BULK_IMPORT_MAX_ROWS_VAR, "25"),
            (CONSUMER_DEADLINE_MARGIN_MS_VAR, "250"),
            (IDEMPOTENT_CREATES_VAR, "false"),
            (TASK_EVENT_TYPE_VAR, "TaskImported"),
        ])
        .expect("valid config");

        assert_eq!(config.require_queue_url(), Ok("https://sqs.example/queue"));
        assert_eq!(config.max_import_rows, 25);
        assert_eq!(config.deadline_margin, Duration::from_millis(250));
        assert!(!config.idempotent_creates);
        assert_eq!(config.event_type, "TaskImported");
    }

    #[test]
    fn rejects_unparseable_values_by_name() {
        let error = config_from(&[
            (TASKS_TABLE_NAME_VAR, "tasks"),
            (BULK_IMPORT_MAX_ROWS_VAR, "0"),
        ])
        .expect_err("zero rows");
        assert!(matches!(
            error,
            ConfigError::Invalid {
                name: BULK_IMPORT_MAX_ROWS_VAR,
                ..
            }
        ));

        let error = config_from(&[
            (TASKS_TABLE_NAME_VAR, "tasks"),
            (IDEMPOTENT_CREATES_VAR, "maybe"),
        ])
        .expect_err("bad flag");
        assert!(error.to_string().starts_with("IDEMPOTENT_CREATES"));
    }
}
