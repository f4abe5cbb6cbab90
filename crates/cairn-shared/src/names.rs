//! Naming rules for channel directories and message entries.
//!
//! Both end up as a single path component below a store root, so the same
//! rules apply to each: the name must stay inside its parent directory and
//! must not collide with the versioned store's own metadata.

use crate::constants::MAX_ENTRY_NAME_LEN;
use crate::error::SharedError;

/// Check that `name` is usable as a single file or directory name.
pub fn validate_entry_name(name: &str) -> Result<(), SharedError> {
    let reason = if name.is_empty() {
        Some("must not be empty")
    } else if name.len() > MAX_ENTRY_NAME_LEN {
        Some("longer than 255 bytes")
    } else if name == "." || name == ".." {
        Some("reserved path component")
    } else if name.contains(['/', '\\']) {
        Some("contains a path separator")
    } else if name.chars().any(char::is_control) {
        // Covers NUL, and line breaks that would split the commit record.
        Some("contains a control character")
    } else if name.starts_with(".git") {
        Some("reserved by the versioned store")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(SharedError::InvalidName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_plain_names() {
        assert!(validate_entry_name("general").is_ok());
        assert!(validate_entry_name("m1").is_ok());
        assert!(validate_entry_name("3f2b9c1e-0d4a-4e8b-9a51-6c0f2d7e8a90").is_ok());
        assert!(validate_entry_name(".notes").is_ok());
    }

    #[test]
    fn test_rejects_traversal() {
        assert!(validate_entry_name("").is_err());
        assert!(validate_entry_name(".").is_err());
        assert!(validate_entry_name("..").is_err());
        assert!(validate_entry_name("a/b").is_err());
        assert!(validate_entry_name("..\\evil").is_err());
        assert!(validate_entry_name("nul\0byte").is_err());
    }

    #[test]
    fn test_rejects_control_characters() {
        for name in ["a\nb", "trailing\r", "tab\there", "bell\u{7}", "next\u{85}line"] {
            let err = validate_entry_name(name).unwrap_err();
            assert!(
                matches!(err, SharedError::InvalidName { reason, .. } if reason == "contains a control character"),
                "{name:?}"
            );
        }
        assert!(validate_entry_name("caf\u{e9}").is_ok());
    }

    #[test]
    fn test_rejects_store_metadata() {
        assert!(validate_entry_name(".git").is_err());
        assert!(validate_entry_name(".gitignore").is_err());
    }

    #[test]
    fn test_rejects_long_names() {
        let long = "x".repeat(MAX_ENTRY_NAME_LEN + 1);
        let err = validate_entry_name(&long).unwrap_err();
        assert!(matches!(err, SharedError::InvalidName { .. }));
        assert!(validate_entry_name(&"x".repeat(MAX_ENTRY_NAME_LEN)).is_ok());
    }
}
