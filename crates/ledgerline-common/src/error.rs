//! Error types shared across Ledgerline crates

use thiserror::Error;

/// Result type alias for shared Ledgerline operations
pub type Result<T> = std::result::Result<T, LedgerlineError>;

/// Errors that are not tied to a single server layer
#[derive(Error, Debug)]
pub enum LedgerlineError {
    #[error("Invalid identifier '{0}': expected lowercase letters, digits and underscores")]
    InvalidIdentifier(String),
}

/// Check that `name` is safe to splice into SQL as an unquoted identifier
///
/// Table, column and session-variable segments must match `[a-z_][a-z0-9_]*`.
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first == '_' || first.is_ascii_lowercase() => {
            chars.all(|c| c == '_' || c.is_ascii_lowercase() || c.is_ascii_digit())
        },
        _ => false,
    };

    if valid && name.len() <= 63 {
        Ok(())
    } else {
        Err(LedgerlineError::InvalidIdentifier(name.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_validation() {
        assert!(validate_identifier("users").is_ok());
        assert!(validate_identifier("_course_enrolment2").is_ok());

        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("2fa").is_err());
        assert!(validate_identifier("Users").is_err());
        assert!(validate_identifier("users; DROP TABLE audit_log").is_err());
        assert!(validate_identifier(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_invalid_identifier_message() {
        let err = validate_identifier("Courses").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid identifier 'Courses': expected lowercase letters, digits and underscores"
        );
    }
}
