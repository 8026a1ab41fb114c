//! DynamoDB implementation of the key-value seam.
//!
//! One item per key in a single table with a string partition key `PK`.
//! The remaining attributes are the task's JSON fields mapped onto native
//! DynamoDB attribute values, so records stay readable in the console.
//! Existence preconditions are expressed as condition expressions on `PK`,
//! and a failed condition surfaces as [`KvError::ConditionFailed`].

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::types::{AttributeValue, ReturnValue};
use aws_sdk_dynamodb::Client;
use serde_json::{Number, Value};
use task_pipeline_core::kv::{Item, KeyValueStore, KvError, PutCondition};

pub const PARTITION_KEY_ATTRIBUTE: &str = "PK";

const PARTITION_KEY_NAME: &str = "#pk";
const KEY_EXISTS: &str = "attribute_exists(#pk)";
const KEY_ABSENT: &str = "attribute_not_exists(#pk)";

const THROTTLING_CODES: &[&str] = &[
    "ProvisionedThroughputExceededException",
    "RequestLimitExceeded",
    "ThrottlingException",
];

type AttributeMap = HashMap<String, AttributeValue>;

#[derive(Debug, Clone)]
pub struct DynamoDbKeyValueStore {
    client: Client,
    table_name: String,
}

impl DynamoDbKeyValueStore {
    pub fn new(client: Client, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }
}

#[async_trait]
impl KeyValueStore for DynamoDbKeyValueStore {
    async fn put(&self, key: &str, item: Item, condition: PutCondition) -> Result<(), KvError> {
        let mut attributes = to_attribute_map(item);
        attributes.insert(
            PARTITION_KEY_ATTRIBUTE.to_string(),
            AttributeValue::S(key.to_string()),
        );

        let mut request = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(attributes));
        if condition == PutCondition::KeyAbsent {
            request = request
                .condition_expression(KEY_ABSENT)
                .expression_attribute_names(PARTITION_KEY_NAME, PARTITION_KEY_ATTRIBUTE);
        }

        request
            .send()
            .await
            .map_err(|error| map_sdk_error(error, key))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Item>, KvError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key(PARTITION_KEY_ATTRIBUTE, AttributeValue::S(key.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|error| map_sdk_error(error, key))?;

        output
            .item()
            .map(|attributes| from_attribute_map(key, attributes))
            .transpose()
    }

    async fn update(&self, key: &str, set: Item, remove: &[&str]) -> Result<Item, KvError> {
        let expression = UpdateExpression::build(set, remove);

        let mut request = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .key(PARTITION_KEY_ATTRIBUTE, AttributeValue::S(key.to_string()))
            .update_expression(expression.expression)
            .condition_expression(KEY_EXISTS)
            .set_expression_attribute_names(Some(expression.names))
            .return_values(ReturnValue::AllNew);
        if !expression.values.is_empty() {
            request = request.set_expression_attribute_values(Some(expression.values));
        }

        let output = request
            .send()
            .await
            .map_err(|error| map_sdk_error(error, key))?;
        let attributes = output.attributes().ok_or_else(|| {
            KvError::backend(format!("update for key {key} returned no attributes"))
        })?;
        from_attribute_map(key, attributes)
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.client
            .delete_item()
            .table_name(&self.table_name)
            .key(PARTITION_KEY_ATTRIBUTE, AttributeValue::S(key.to_string()))
            .condition_expression(KEY_EXISTS)
            .expression_attribute_names(PARTITION_KEY_NAME, PARTITION_KEY_ATTRIBUTE)
            .send()
            .await
            .map_err(|error| map_sdk_error(error, key))?;
        Ok(())
    }

    async fn scan_all(&self) -> Result<Vec<(String, Item)>, KvError> {
        let mut results = Vec::new();
        let mut exclusive_start_key = None;

        loop {
            let output = self
                .client
                .scan()
                .table_name(&self.table_name)
                .set_exclusive_start_key(exclusive_start_key.take())
                .send()
                .await
                .map_err(|error| map_sdk_error(error, &self.table_name))?;

            for attributes in output.items() {
                let Some(key) = attributes
                    .get(PARTITION_KEY_ATTRIBUTE)
                    .and_then(|value| value.as_s().ok())
                else {
                    tracing::warn!("skipping scanned item without a string partition key");
                    continue;
                };
                results.push((key.clone(), from_attribute_map(key, attributes)?));
            }

            match output.last_evaluated_key() {
                Some(last_key) if !last_key.is_empty() => {
                    exclusive_start_key = Some(last_key.clone());
                }
                _ => break,
            }
        }

        Ok(results)
    }
}

/// `SET #s0 = :s0, ... REMOVE #r0, ...` with placeholders for every
/// attribute name, so task fields never collide with reserved words.
#[derive(Debug, PartialEq)]
struct UpdateExpression {
    expression: String,
    names: HashMap<String, String>,
    values: AttributeMap,
}

impl UpdateExpression {
    fn build(set: Item, remove: &[&str]) -> Self {
        let mut names = HashMap::from([(
            PARTITION_KEY_NAME.to_string(),
            PARTITION_KEY_ATTRIBUTE.to_string(),
        )]);
        let mut values = HashMap::new();

        let mut assignments = Vec::with_capacity(set.len());
        for (index, (name, value)) in set.into_iter().enumerate() {
            let name_placeholder = format!("#s{index}");
            let value_placeholder = format!(":s{index}");
            assignments.push(format!("{name_placeholder} = {value_placeholder}"));
            names.insert(name_placeholder, name);
            values.insert(value_placeholder, to_attribute_value(value));
        }

        let mut removals = Vec::with_capacity(remove.len());
        for (index, name) in remove.iter().enumerate() {
            let placeholder = format!("#r{index}");
            removals.push(placeholder.clone());
            names.insert(placeholder, name.to_string());
        }

        let mut clauses = Vec::new();
        if !assignments.is_empty() {
            clauses.push(format!("SET {}", assignments.join(", ")));
        }
        if !removals.is_empty() {
            clauses.push(format!("REMOVE {}", removals.join(", ")));
        }

        Self {
            expression: clauses.join(" "),
            names,
            values,
        }
    }
}

fn to_attribute_map(item: Item) -> AttributeMap {
    item.into_iter()
        .map(|(name, value)| (name, to_attribute_value(value)))
        .collect()
}

fn to_attribute_value(value: Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(flag) => AttributeValue::Bool(flag),
        Value::Number(number) => AttributeValue::N(number.to_string()),
        Value::String(text) => AttributeValue::S(text),
        Value::Array(values) => {
            AttributeValue::L(values.into_iter().map(to_attribute_value).collect())
        }
        Value::Object(map) => AttributeValue::M(to_attribute_map(map)),
    }
}

/// Converts a stored item back to JSON, dropping the partition key.
fn from_attribute_map(key: &str, attributes: &AttributeMap) -> Result<Item, KvError> {
    attributes
        .iter()
        .filter(|(name, _)| name.as_str() != PARTITION_KEY_ATTRIBUTE)
        .map(|(name, value)| Ok((name.clone(), from_attribute_value(key, value)?)))
        .collect()
}

fn from_attribute_value(key: &str, value: &AttributeValue) -> Result<Value, KvError> {
    let parse_number = |text: &str| {
        text.parse::<Number>().map(Value::Number).map_err(|error| KvError::Backend {
            message: format!("invalid number attribute {text:?} for key {key}"),
            source: Some(Box::new(error)),
        })
    };

    match value {
        AttributeValue::Null(_) => Ok(Value::Null),
        AttributeValue::Bool(flag) => Ok(Value::Bool(*flag)),
        AttributeValue::N(text) => parse_number(text),
        AttributeValue::S(text) => Ok(Value::String(text.clone())),
        AttributeValue::Ss(texts) => Ok(Value::Array(
            texts.iter().cloned().map(Value::String).collect(),
        )),
        AttributeValue::Ns(numbers) => numbers
            .iter()
            .map(|text| parse_number(text))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        AttributeValue::L(values) => values
            .iter()
            .map(|value| from_attribute_value(key, value))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        AttributeValue::M(map) => from_attribute_map(key, map).map(Value::Object),
        other => Err(KvError::backend(format!(
            "unsupported attribute type for key {key}: {other:?}"
        ))),
    }
}

fn map_sdk_error<E, R>(error: SdkError<E, R>, key: &str) -> KvError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let code = error.code().map(str::to_string);
    match code.as_deref() {
        Some("ConditionalCheckFailedException") => KvError::ConditionFailed {
            key: key.to_string(),
        },
        Some(code) if THROTTLING_CODES.contains(&code) => KvError::Throttled {
            key: key.to_string(),
            message: error.message().unwrap_or(code).to_string(),
        },
        _ => KvError::Backend {
            message: format!("DynamoDB error for key {key}: {error}"),
            source: Some(Box::new(error)),
        },
    }
}
