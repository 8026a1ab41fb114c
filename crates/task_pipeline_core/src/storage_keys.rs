use sha2::{Digest, Sha256};

pub const TASK_KEY_PREFIX: &str = "TASK#";

/// Builds the internal storage key for a task id.
pub fn task_key(task_id: &str) -> String {
    format!("{TASK_KEY_PREFIX}{task_id}")
}

/// Extracts the task id from an internal storage key. Keys of other entity
/// types yield `None`.
pub fn task_id_from_key(key: &str) -> Option<&str> {
    key.strip_prefix(TASK_KEY_PREFIX)
        .filter(|task_id| !task_id.is_empty())
}

/// Maps an idempotency key onto a deterministic task id shaped like a UUID,
/// so redelivered creates land on the same storage key.
pub fn idempotent_task_id(idempotency_key: &str) -> String {
    let digest = Sha256::digest(idempotency_key.as_bytes());
    let hex = format!("{digest:x}");
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

/// Idempotency key for one row of a fan-out upload. `import_id` names a
/// single import request, so two uploads with identical rows stay distinct.
pub fn upload_item_key(import_id: &str, index: usize) -> String {
    format!("{import_id}:{index}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_task_key_with_prefix() {
        assert_eq!(task_key("abc-123"), "TASK#abc-123");
    }

    #[test]
    fn strips_prefix_from_task_key() {
        assert_eq!(task_id_from_key("TASK#abc-123"), Some("abc-123"));
        assert_eq!(task_id_from_key("USER#abc-123"), None);
        assert_eq!(task_id_from_key("TASK#"), None);
    }

    #[test]
    fn idempotent_task_id_is_deterministic_and_uuid_shaped() {
        let first = idempotent_task_id("message-1");
        let second = idempotent_task_id("message-1");
        let other = idempotent_task_id("message-2");

        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(first.len(), 36);
        assert_eq!(first.matches('-').count(), 4);
    }

    #[test]
    fn upload_item_keys_differ_per_row() {
        assert_eq!(upload_item_key("abc", 0), "abc:0");
        assert_ne!(upload_item_key("abc", 0), upload_item_key("abc", 1));
    }
}
