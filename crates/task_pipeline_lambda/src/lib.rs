//! AWS-oriented adapters and handlers for the task ingestion pipeline.
//!
//! This crate owns runtime integration details (Lambda event framing, the
//! DynamoDB record store adapter, the SQS publisher, configuration and log
//! setup) and exposes a single runtime module boundary for the contract,
//! validation, store and consumer primitives in `task_pipeline_core`.

pub mod adapters;
pub mod config;
pub mod handlers;
pub mod runtime;
pub mod services;
pub mod telemetry;
