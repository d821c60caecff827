use chrono::{DateTime, NaiveDate, Utc};

use super::error::ApiError;

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

pub fn required<T>(value: Option<T>, name: &str) -> Result<T, ApiError> {
    value.ok_or_else(|| ApiError::validation(format!("{name} is required")))
}

pub fn required_str(value: Option<String>, name: &str) -> Result<String, ApiError> {
    let v = required(value, name)?;
    let t = v.trim();
    if t.is_empty() {
        return Err(ApiError::validation(format!("{name} is required")));
    }
    Ok(t.to_string())
}

pub fn one_of(value: &str, allowed: &[&str], name: &str) -> Result<(), ApiError> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(ApiError::validation(format!(
            "{name} must be one of: {}",
            allowed.join(", ")
        )))
    }
}

/// Normalizes a calendar-day value to `YYYY-MM-DD`; accepts a bare date or an
/// RFC 3339 timestamp. Attendance keys on the day, not the instant.
pub fn normalize_date(raw: &str, name: &str) -> Result<String, ApiError> {
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.date_naive().format("%Y-%m-%d").to_string());
    }
    Err(ApiError::validation(format!(
        "{name} must be YYYY-MM-DD or an RFC 3339 timestamp"
    )))
}

/// Validates an RFC 3339 timestamp field without altering it.
pub fn check_timestamp(raw: &str, name: &str) -> Result<(), ApiError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|_| ())
        .map_err(|_| ApiError::validation(format!("{name} must be an RFC 3339 timestamp")))
}

/// True when an INSERT/UPDATE failed on a UNIQUE constraint, which handlers
/// report as a validation error on the offending natural key.
pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dates_normalize_to_calendar_day() {
        assert_eq!(normalize_date("2026-03-04", "date").unwrap(), "2026-03-04");
        assert_eq!(
            normalize_date("2026-03-04T15:30:00Z", "date").unwrap(),
            "2026-03-04"
        );
        assert!(normalize_date("04/03/2026", "date").is_err());
    }

    #[test]
    fn enum_membership_is_checked() {
        assert!(one_of("late", &["present", "absent", "late", "excused"], "status").is_ok());
        assert!(one_of("tardy", &["present", "absent", "late", "excused"], "status").is_err());
    }
}
