//! Syntactic email validation.

use once_cell::sync::Lazy;
use regex::Regex;

use docvault_core::{Error, Result};

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9!#$%&'*+/=?^_`{|}~-]+(?:\.[A-Za-z0-9!#$%&'*+/=?^_`{|}~-]+)*@(?:[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?\.)+[A-Za-z]{2,63}$").unwrap()
});

const MAX_EMAIL_LEN: usize = 254;

/// Validate `raw` and return it trimmed with the domain lowercased.
pub fn normalize_email(raw: &str) -> Result<String> {
    let email = raw.trim();
    if email.len() > MAX_EMAIL_LEN || !EMAIL.is_match(email) {
        return Err(Error::InvalidEmail(format!("email {} is invalid", raw)));
    }
    match email.rsplit_once('@') {
        Some((local, domain)) => Ok(format!("{}@{}", local, domain.to_ascii_lowercase())),
        None => Err(Error::InvalidEmail(format!("email {} is invalid", raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalizes_domain_only() {
        assert_eq!(normalize_email("  John.Doe@Example.COM ").unwrap(), "John.Doe@example.com");
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in ["", "plain", "a@b", "a@@b.com", "a b@c.com", "a@-b.com", ".a@b.com", "a@b.c"] {
            assert!(
                matches!(normalize_email(bad), Err(Error::InvalidEmail(_))),
                "{} should be invalid",
                bad
            );
        }
    }
}
