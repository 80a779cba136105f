//! Safe-config filtering (spec.md §4.5): a connector's `status()` never
//! leaks secrets, implemented as an explicit allow-list plus a
//! compile-time redaction rule for known secret keys — the
//! Rust-idiomatic replacement for the reflection-based filtering the
//! original used (spec.md §9 "Reflection-based safe-config filtering").

use serde_json::Value;
use std::collections::HashMap;

/// Keys every connector's config is allowed to surface regardless of
/// source family.
pub const DEFAULT_WHITELIST: &[&str] = &["api_base", "timeout_s", "concurrency", "enabled", "name"];

/// Keys that are never returned, no matter what a connector's
/// extension list says.
pub const SECRET_KEYS: &[&str] = &["api_key", "token", "password", "secret"];

/// Filters `raw` down to [`DEFAULT_WHITELIST`] plus `extra_allowed`,
/// always excluding [`SECRET_KEYS`].
pub fn safe_config(raw: &HashMap<String, Value>, extra_allowed: &[&str]) -> HashMap<String, Value> {
    raw.iter()
        .filter(|(key, _)| {
            let is_secret = SECRET_KEYS.iter().any(|s| key.eq_ignore_ascii_case(s));
            let is_allowed = DEFAULT_WHITELIST.iter().any(|w| key.eq_ignore_ascii_case(w))
                || extra_allowed.iter().any(|w| key.eq_ignore_ascii_case(w));
            !is_secret && is_allowed
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_never_returned_even_if_extra_allowed() {
        let mut raw = HashMap::new();
        raw.insert("api_key".to_string(), Value::String("shh".into()));
        raw.insert("api_base".to_string(), Value::String("https://api.example.com".into()));

        let filtered = safe_config(&raw, &["api_key"]);
        assert!(!filtered.contains_key("api_key"));
        assert!(filtered.contains_key("api_base"));
    }

    #[test]
    fn extension_list_adds_connector_specific_keys() {
        let mut raw = HashMap::new();
        raw.insert("org".to_string(), Value::String("octocat".into()));
        raw.insert("unrelated".to_string(), Value::Bool(true));

        let filtered = safe_config(&raw, &["org"]);
        assert!(filtered.contains_key("org"));
        assert!(!filtered.contains_key("unrelated"));
    }
}
