//! Request validation helpers
//!
//! Small synchronous checks handlers run on path params and query
//! strings before touching the database — kept separate from the
//! domain-level validation in [`crate::model`] since these only concern
//! shape, not workflow semantics.

use crate::api::error::ApiError;

/// Rejects empty or whitespace-only strings.
pub fn validate_not_empty(value: &str, field: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::ValidationError(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Bounds a string's length, inclusive on both ends.
pub fn validate_string_length(value: &str, field: &str, min: usize, max: usize) -> Result<(), ApiError> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(ApiError::ValidationError(format!(
            "{field} must be between {min} and {max} characters, got {len}"
        )));
    }
    Ok(())
}

/// Clamps a caller-supplied page size to a sane range, defaulting when
/// absent (§6.2 `GET /runs` `limit`).
pub fn validate_pagination(limit: Option<i64>, default: i64, max: i64) -> i64 {
    match limit {
        Some(n) if n <= 0 => default,
        Some(n) if n > max => max,
        Some(n) => n,
        None => default,
    }
}

/// UUIDs and the crate's own hex-encoded ids (run/workflow/version ids
/// generated via [`crate::lifecycle::new_id`]) are both non-empty,
/// reasonably short opaque tokens — this only screens out obviously
/// malformed path params, not a strict UUID parse.
pub fn validate_uuid(value: &str, field: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() || value.len() > 128 || !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(ApiError::ValidationError(format!("{field} is not a valid identifier")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty() {
        assert!(validate_not_empty("", "name").is_err());
        assert!(validate_not_empty("  ", "name").is_err());
        assert!(validate_not_empty("x", "name").is_ok());
    }

    #[test]
    fn bounds_string_length() {
        assert!(validate_string_length("ab", "name", 1, 5).is_ok());
        assert!(validate_string_length("", "name", 1, 5).is_err());
        assert!(validate_string_length("toolong", "name", 1, 5).is_err());
    }

    #[test]
    fn clamps_pagination() {
        assert_eq!(validate_pagination(None, 50, 200), 50);
        assert_eq!(validate_pagination(Some(0), 50, 200), 50);
        assert_eq!(validate_pagination(Some(-5), 50, 200), 50);
        assert_eq!(validate_pagination(Some(500), 50, 200), 200);
        assert_eq!(validate_pagination(Some(10), 50, 200), 10);
    }

    #[test]
    fn validates_identifier_shape() {
        assert!(validate_uuid("run-abc123", "runId").is_ok());
        assert!(validate_uuid("", "runId").is_err());
        assert!(validate_uuid("has space", "runId").is_err());
    }
}
