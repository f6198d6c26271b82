//! Login normalization
//!
//! Turns whatever the user typed (`DOMAIN\jdoe`, `jdoe@example.com`, `JDoe`)
//! into the canonical username used for every directory lookup.

use adauth_core::UsernameError;
use regex::Regex;

/// Normalize a raw login.
///
/// The first pattern (in list order) that matches `raw` replaces it with its
/// first capture group; later patterns are not consulted. The candidate is
/// then lower-cased and must match `validation`.
pub fn normalize(raw: &str, patterns: &[Regex], validation: &Regex) -> Result<String, UsernameError> {
    let candidate = patterns
        .iter()
        .find_map(|pattern| pattern.captures(raw))
        .map(|caps| caps.get(1).map_or("", |m| m.as_str()))
        .unwrap_or(raw);

    let candidate = candidate.to_lowercase();

    if validation.is_match(&candidate) {
        Ok(candidate)
    } else {
        Err(UsernameError::RulesViolation {
            username: candidate,
        })
    }
}
