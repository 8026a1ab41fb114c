//! Single import boundary for the domain primitives the handlers build on.

pub use task_pipeline_core::{bulk_import, consumer, contract, fanout, kv, storage_keys, store};
