//! Input validation for API requests.
//!
//! Validators return `Err(message)`; handlers collect them with
//! `ValidationErrorBuilder` from the `error` module.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref EMAIL_REGEX: Regex =
        Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();

    /// `+62` followed by 8 to 13 digits
    static ref WHATSAPP_REGEX: Regex = Regex::new(r"^\+62\d{8,13}$").unwrap();

    /// Unit codes like `CAM-001` or `TRIPOD_A2`
    static ref UNIT_CODE_REGEX: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$").unwrap();

    static ref DATE_REGEX: Regex = Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap();
}

pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MIN_NAME_LENGTH: usize = 3;

/// Strip whitespace and bring a number into `+62...` form.
///
/// `0812...` and `62812...` both become `+62812...`; anything else without the
/// country code gets it prefixed.
pub fn normalize_whatsapp(raw: &str) -> String {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if let Some(rest) = compact.strip_prefix('0') {
        format!("+62{}", rest)
    } else if compact.starts_with("62") {
        format!("+{}", compact)
    } else if compact.starts_with("+62") {
        compact
    } else {
        format!("+62{}", compact)
    }
}

/// Validate an already normalized WhatsApp number
pub fn validate_whatsapp(whatsapp: &str) -> Result<(), String> {
    if whatsapp.is_empty() || whatsapp == "+62" {
        return Err("WhatsApp number is required".to_string());
    }
    if !WHATSAPP_REGEX.is_match(whatsapp) {
        return Err("Invalid WhatsApp number".to_string());
    }
    Ok(())
}

pub fn validate_name(name: &str) -> Result<(), String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("Name is required".to_string());
    }
    if name.chars().count() < MIN_NAME_LENGTH {
        return Err(format!("Name must be at least {} characters", MIN_NAME_LENGTH));
    }
    if name.chars().count() > 100 {
        return Err("Name is too long (max 100 characters)".to_string());
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), String> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        ));
    }
    Ok(())
}

/// Validate an optional email (blank counts as absent)
pub fn validate_email(email: &Option<String>) -> Result<(), String> {
    match email.as_deref().map(str::trim) {
        None | Some("") => Ok(()),
        Some(e) if e.len() > 254 => Err("Email is too long".to_string()),
        Some(e) if EMAIL_REGEX.is_match(e) => Ok(()),
        Some(_) => Err("Invalid email format".to_string()),
    }
}

pub fn validate_required(value: &str, label: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{} is required", label));
    }
    Ok(())
}

pub fn validate_non_negative(value: i64, label: &str) -> Result<(), String> {
    if value < 0 {
        return Err(format!("{} cannot be negative", label));
    }
    Ok(())
}

pub fn validate_unit_code(code: &str) -> Result<(), String> {
    if code.trim().is_empty() {
        return Err("Unit code is required".to_string());
    }
    if code.len() > 64 {
        return Err("Unit code is too long (max 64 characters)".to_string());
    }
    if !UNIT_CODE_REGEX.is_match(code.trim()) {
        return Err("Unit code may only contain letters, digits, dashes and underscores".to_string());
    }
    Ok(())
}

/// Optional `YYYY-MM-DD` date (blank counts as absent)
pub fn validate_optional_date(value: &Option<String>, label: &str) -> Result<(), String> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(()),
        Some(v) if DATE_REGEX.is_match(v) && chrono::NaiveDate::parse_from_str(v, "%Y-%m-%d").is_ok() => Ok(()),
        Some(_) => Err(format!("{} must be a date (YYYY-MM-DD)", label)),
    }
}

/// Push service endpoints must be absolute https URLs
pub fn validate_push_endpoint(endpoint: &str) -> Result<(), String> {
    if endpoint.trim().is_empty() {
        return Err("Endpoint is required".to_string());
    }
    if !endpoint.starts_with("https://") {
        return Err("Endpoint must be an https URL".to_string());
    }
    if endpoint.len() > 2048 {
        return Err("Endpoint is too long".to_string());
    }
    Ok(())
}
