//! Shared task-ingestion domain primitives.
//!
//! This crate owns the request/record contracts, the bulk CSV validator, the
//! record store built on a key-value seam, the fan-out publisher and the
//! batch queue consumer. It intentionally excludes AWS SDK and Lambda runtime
//! concerns; those live in `task_pipeline_lambda`.

pub mod bulk_import;
pub mod consumer;
pub mod contract;
pub mod fanout;
pub mod kv;
pub mod memory;
pub mod storage_keys;
pub mod store;
