//! Rejection-reason normalization and secret masking.
//!
//! Normalization runs on every reason before it leaves the reason dialog:
//! trim, classify against the configured "no reason" keywords, truncate.
//! Masking runs only on the persistence path — the agent receives the
//! operator's words verbatim, the log does not.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use emissary_core::truncate_to_boundary;

use crate::outcome::ReasonSource;

/// `key=value` / `key: value` pairs whose key belongs to the secret-ish
/// vocabulary. The value is group 3.
static SECRET_PAIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)\b(token|password|passwd|secret|api[-_ ]?key|authorization|auth|bearer|access[-_ ]?key)\b(\s*[:=]\s*)(\S+)"#,
    )
    .expect("secret pair pattern is valid")
});

/// Standalone hex/base64-like runs long enough to be credentials.
static SECRET_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9+/=_-]{32,}").expect("secret run pattern is valid"));

/// Keep the first and last 4 characters, elide the middle; short values are
/// replaced entirely.
fn partial_mask(value: &str) -> String {
    let count = value.chars().count();
    if count <= 8 {
        return "***".to_string();
    }
    let head: String = value.chars().take(4).collect();
    let tail: String = value
        .chars()
        .skip(count.saturating_sub(4))
        .collect();
    format!("{head}***{tail}")
}

/// Mask likely secrets for persistence.
///
/// Applied to the rejection log only; the deny message forwarded to the
/// agent stays unmasked.
#[must_use]
pub fn mask_secrets(reason: &str) -> String {
    let masked = SECRET_PAIR.replace_all(reason, |caps: &Captures<'_>| {
        format!("{}{}{}", &caps[1], &caps[2], partial_mask(&caps[3]))
    });
    SECRET_RUN
        .replace_all(&masked, |caps: &Captures<'_>| partial_mask(&caps[0]))
        .into_owned()
}

/// Check whether `text` is one of the configured "no reason" keywords,
/// compared case-insensitively after trimming.
#[must_use]
pub fn is_skip_keyword(text: &str, skip_keywords: &[String]) -> bool {
    let trimmed = text.trim();
    skip_keywords
        .iter()
        .any(|keyword| keyword.eq_ignore_ascii_case(trimmed))
}

/// Normalize operator-supplied reason text: trim, classify, truncate.
///
/// Returns the normalized reason and its provenance. Keyword matches and
/// empty input classify as an explicit skip with an empty reason; anything
/// else is user input, truncated to `max_chars`.
#[must_use]
pub fn normalize_reason(
    text: &str,
    skip_keywords: &[String],
    max_chars: usize,
) -> (String, ReasonSource) {
    let trimmed = text.trim();
    if trimmed.is_empty() || is_skip_keyword(trimmed, skip_keywords) {
        return (String::new(), ReasonSource::ExplicitSkip);
    }
    (
        truncate_to_boundary(trimmed, max_chars).to_string(),
        ReasonSource::UserInput,
    )
}
