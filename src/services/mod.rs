//! Domain services used by HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own business rules and form validation so route handlers
//! can stay focused on protocol translation and cookie plumbing. Validation
//! always runs before the first backend call.

pub mod account;
pub mod support;
pub mod team;

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub const MIN_PASSWORD_LEN: usize = 6;

/// Trim and lowercase an email; `None` unless it looks like `local@domain`.
#[must_use]
pub fn normalize_email(email: &str) -> Option<String> {
    let normalized = email.trim().to_ascii_lowercase();
    let (local, domain) = normalized.split_once('@')?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return None;
    }
    Some(normalized)
}

/// Current UTC time as RFC 3339, the format the tables store.
pub(crate) fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email("  Mia@Example.COM "), Some("mia@example.com".into()));
    }

    #[test]
    fn normalize_email_rejects_malformed() {
        for bad in ["", "mia", "@example.com", "mia@", "a@b@c"] {
            assert_eq!(normalize_email(bad), None, "accepted {bad:?}");
        }
    }

    #[test]
    fn now_rfc3339_is_utc_timestamp() {
        let stamp = now_rfc3339();
        assert!(stamp.ends_with('Z'), "bad stamp {stamp}");
        assert_eq!(stamp.as_bytes()[10], b'T');
    }
}
