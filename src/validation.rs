//! Input validation for form and JSON submissions.
//!
//! Each validator returns `Err(message)` with a message fit to show the user.
//! Services wrap these into `Error::InvalidInput`.

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;

pub const MIN_PASSWORD_LENGTH: usize = 8;
const MAX_PASSWORD_LENGTH: usize = 128;

lazy_static! {
    /// Usernames: letters, digits, underscore and dash, 3-20 chars
    static ref USERNAME_REGEX: Regex = Regex::new(r"^[a-zA-Z0-9_-]{3,20}$").unwrap();

    /// Loose email shape check; delivery is never attempted
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$"
    ).unwrap();

    /// Route, bus and vehicle identifiers (e.g. "NELC-1", "24", "V 7")
    static ref IDENTIFIER_REGEX: Regex = Regex::new(
        r"^[A-Za-z0-9]([A-Za-z0-9 _.-]{0,30}[A-Za-z0-9])?$"
    ).unwrap();
}

/// Validate a username
pub fn validate_username(username: &str) -> Result<(), String> {
    if username.is_empty() {
        return Err("Username is required".to_string());
    }
    if !USERNAME_REGEX.is_match(username) {
        return Err(
            "Username must be 3-20 characters of letters, digits, '_' or '-'".to_string(),
        );
    }
    Ok(())
}

/// Validate a new password
pub fn validate_password(password: &str) -> Result<(), String> {
    if password.is_empty() {
        return Err("Password is required".to_string());
    }
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        ));
    }
    if password.len() > MAX_PASSWORD_LENGTH {
        return Err(format!(
            "Password is too long (max {} characters)",
            MAX_PASSWORD_LENGTH
        ));
    }
    Ok(())
}

/// Validate an email address. Empty is allowed; the field is optional.
pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Ok(());
    }
    if email.len() > 254 || !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email address".to_string());
    }
    Ok(())
}

pub fn validate_display_name(name: &str) -> Result<(), String> {
    if name.chars().count() > 100 {
        return Err("Display name is too long (max 100 characters)".to_string());
    }
    if name.chars().any(|c| c.is_control()) {
        return Err("Display name contains invalid characters".to_string());
    }
    Ok(())
}

/// Validate a route, bus or vehicle identifier
pub fn validate_identifier(label: &str, value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("{} is required", label));
    }
    if !IDENTIFIER_REGEX.is_match(value) {
        return Err(format!("{} '{}' is not a valid identifier", label, value));
    }
    Ok(())
}

/// Parse a calendar date in `YYYY-MM-DD` form
pub fn parse_date(label: &str, value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| format!("{} must be a date in YYYY-MM-DD form", label))
}

/// Treat blank form fields as absent.
pub fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
