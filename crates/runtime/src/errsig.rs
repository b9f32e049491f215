//! Error normalisation for causal fix tracking.
//!
//! Strips the variable parts of an error message (paths, UUIDs, addresses,
//! timestamps, numbers) so that two occurrences of the same failure produce
//! the same fingerprint across sessions. The FNV-1a bit pattern is part of
//! the cross-session contract and is therefore implemented here rather than
//! pulled from a hashing crate.

use regex::Regex;
use std::sync::OnceLock;

const FNV_OFFSET_BASIS: u64 = 14695981039346656037;
const FNV_PRIME: u64 = 1099511628211;

/// 64-bit FNV-1a over the UTF-8 bytes of `text`.
pub fn fnv1a_64(text: &str) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in text.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// FNV-1a 64 truncated to the first 8 hex characters.
pub fn fnv1a_hash(text: &str) -> String {
    format!("{:016x}", fnv1a_64(text))[..8].to_string()
}

struct StripRule {
    pattern: Regex,
    replacement: &'static str,
}

fn strip_rules() -> &'static Vec<StripRule> {
    static RULES: OnceLock<Vec<StripRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        // Applied in order; earlier rules must not be masked by later ones.
        let table: [(&str, &str); 12] = [
            (r"(?:[A-Za-z]:)?[/\\][\w./\\-]+", "<path>"),
            (
                r"(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}",
                "<uuid>",
            ),
            (r"0x[0-9a-fA-F]+", "<hex>"),
            (
                r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}[\w.:+-]*",
                "<ts>",
            ),
            (r"\b[0-9a-f]{40}\b", "<git-hash>"),
            (r"\b[0-9a-f]{7}\b", "<git-short>"),
            (r"tmp[a-zA-Z0-9_]{6,10}", "<tmp>"),
            (r"<\w+ object at (?:0x[0-9a-fA-F]+|<hex>)>", "<obj-repr>"),
            (r":\d{2,5}([/\s]|$)", ":<port>$1"),
            (r"(?i)\b\d+\s*(?:bytes?|[KMG]B)\b", "<mem-size>"),
            (r",\s*line\s+\d+", ", line <n>"),
            (r"\d{2,}", "<n>"),
        ];
        table
            .iter()
            .map(|(pattern, replacement)| StripRule {
                pattern: Regex::new(pattern).unwrap(),
                replacement,
            })
            .collect()
    })
}

/// Strip variable parts from an error message, producing a stable
/// fingerprint: lowercase, whitespace collapsed, volatile tokens replaced.
pub fn normalize_error(raw: &str) -> String {
    let mut text = raw.to_string();
    for rule in strip_rules() {
        text = rule.pattern.replace_all(&text, rule.replacement).into_owned();
    }
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.to_lowercase()
}

/// `(normalised, hash8)` pair for an error message.
pub fn error_signature(raw: &str) -> (String, String) {
    let normalized = normalize_error(raw);
    let hash = fnv1a_hash(&normalized);
    (normalized, hash)
}
