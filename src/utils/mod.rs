//! Small helpers shared across the crate.

use chrono::{SecondsFormat, Utc};
use lazy_static::lazy_static;
use rand::Rng;
use regex::Regex;
use std::path::Path;

lazy_static! {
    static ref NON_WORD: Regex = Regex::new(r"[^\w\s-]").unwrap();
    static ref SEPARATORS: Regex = Regex::new(r"[\s_-]+").unwrap();
}

const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Current UTC time as RFC 3339 with a `Z` suffix, so stored timestamps sort as strings
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn to_rfc3339(dt: chrono::DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Lowercase, drop punctuation, collapse whitespace into single dashes
pub fn slugify(text: &str) -> String {
    let lower = text.trim().to_lowercase();
    let cleaned = NON_WORD.replace_all(&lower, "");
    SEPARATORS
        .replace_all(cleaned.trim(), "-")
        .trim_matches('-')
        .to_string()
}

fn random_from(alphabet: &[u8], len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| alphabet[rng.random_range(0..alphabet.len())] as char)
        .collect()
}

/// Lowercase alphanumeric suffix used to keep product slugs unique
pub fn random_suffix(len: usize) -> String {
    random_from(SUFFIX_ALPHABET, len)
}

/// Uppercase alphanumeric code used in invoice numbers
pub fn random_code(len: usize) -> String {
    random_from(CODE_ALPHABET, len)
}

/// `Rp 1.250.000`
pub fn format_rupiah(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    if amount < 0 {
        format!("-Rp {}", grouped)
    } else {
        format!("Rp {}", grouped)
    }
}

pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Treat blank optional strings as absent
pub fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Kamera Canon EOS"), "kamera-canon-eos");
        assert_eq!(slugify("  Cetak   A3 (Warna)! "), "cetak-a3-warna");
        assert_eq!(slugify("Tenda--Dome_4P"), "tenda-dome-4p");
    }

    #[test]
    fn test_random_suffix_shape() {
        let s = random_suffix(5);
        assert_eq!(s.len(), 5);
        assert!(s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));

        let c = random_code(6);
        assert_eq!(c.len(), 6);
        assert!(c.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_format_rupiah() {
        assert_eq!(format_rupiah(0), "Rp 0");
        assert_eq!(format_rupiah(950), "Rp 950");
        assert_eq!(format_rupiah(1_000), "Rp 1.000");
        assert_eq!(format_rupiah(1_250_000), "Rp 1.250.000");
        assert_eq!(format_rupiah(-15_000), "-Rp 15.000");
    }

    #[test]
    fn test_now_rfc3339_uses_z_suffix() {
        let now = now_rfc3339();
        assert!(now.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&now).is_ok());
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty(Some("  ".into())), None);
        assert_eq!(non_empty(Some(" x ".into())), Some("x".into()));
        assert_eq!(non_empty(None), None);
    }
}
