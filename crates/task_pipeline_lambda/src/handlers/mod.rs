pub mod api;
pub mod bulk_import;
pub mod queue_consumer;
pub mod response;
pub mod tasks;
