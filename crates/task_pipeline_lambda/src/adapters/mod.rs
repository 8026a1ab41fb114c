pub mod dynamodb;
pub mod sqs;
