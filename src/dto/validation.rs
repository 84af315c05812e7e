//! Validation helpers for DTOs.

use validator::ValidationError;

use crate::services::party_service::{JOIN_CODE_ALPHABET, JOIN_CODE_LENGTH};

/// Validates that a join code has the expected length and only uses the code alphabet.
///
/// Lowercase input is accepted; codes are compared case-insensitively.
///
/// # Examples
///
/// ```ignore
/// validate_join_code("K7PQ2M") // Ok
/// validate_join_code("k7pq2m") // Ok
/// validate_join_code("K7PQ2")  // Err - too short
/// validate_join_code("K7PQ0M") // Err - ambiguous character
/// ```
pub fn validate_join_code(code: &str) -> Result<(), ValidationError> {
    if code.chars().count() != JOIN_CODE_LENGTH {
        let mut err = ValidationError::new("join_code_length");
        err.message = Some(
            format!(
                "Join code must be exactly {JOIN_CODE_LENGTH} characters (got {})",
                code.chars().count()
            )
            .into(),
        );
        return Err(err);
    }

    if !code
        .bytes()
        .all(|b| JOIN_CODE_ALPHABET.contains(&b.to_ascii_uppercase()))
    {
        let mut err = ValidationError::new("join_code_format");
        err.message = Some("Join code contains characters outside the code alphabet".into());
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_join_code_valid() {
        assert!(validate_join_code("K7PQ2M").is_ok());
        assert!(validate_join_code("k7pq2m").is_ok());
    }

    #[test]
    fn test_validate_join_code_invalid_length() {
        assert!(validate_join_code("K7PQ2").is_err());
        assert!(validate_join_code("K7PQ2MM").is_err());
        assert!(validate_join_code("").is_err());
    }

    #[test]
    fn test_validate_join_code_invalid_format() {
        assert!(validate_join_code("K7PQ0M").is_err()); // zero
        assert!(validate_join_code("K7PQOM").is_err()); // letter O
        assert!(validate_join_code("K7PQ M").is_err()); // space
    }
}
