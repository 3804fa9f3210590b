//! Canonical parameter encodings.
//!
//! The protocol uses two distinct stringifications of a parameter map:
//! a sorted, *unescaped* `k=v&k=v` form that feeds signatures and the
//! AES-encrypted `params` payload, and a conventional percent-escaped
//! form for query strings and POST bodies. Mixing them up produces
//! signatures the server rejects.

use std::collections::BTreeMap;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

/// Characters left untouched by query escaping, beyond alphanumerics.
const QUERY: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Encodes params as `k=v&k=v` sorted by key, values verbatim.
///
/// Used inside signature strings and AES payloads; an empty map yields
/// an empty string.
pub fn encode_values_sorted(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Encodes params as a percent-escaped form/query string, sorted by key.
pub fn encode_form(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", query_escape(k), query_escape(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Percent-escapes a single form value, encoding space as `+`.
pub fn query_escape(s: &str) -> String {
    utf8_percent_encode(s, QUERY).to_string().replace("%20", "+")
}
