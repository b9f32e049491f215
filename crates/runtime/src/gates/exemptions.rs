//! Tiered exemption helpers shared by the gate modules.
//!
//! Three tiers, each building on the previous:
//! - base:     empty-path guard + fixed basenames + skills directory
//! - standard: base + test/spec name patterns
//! - full:     standard + non-code extension filter
//!
//! Gates pick the tier that matches their purpose: safety gates use base,
//! verification-shaped gates use standard, content gates use full.

use std::path::Path;

const BASE_EXEMPT_BASENAMES: &[&str] = &[
    "state.json",
    "HANDOFF.md",
    "live_state.json",
    "warden.toml",
    "CLAUDE.md",
];

const TEST_NAME_PATTERNS: &[&str] = &["test_", "_test.", ".test.", "spec_", "_spec.", ".spec."];

const NON_CODE_EXTENSIONS: &[&str] = &[
    "md", "json", "yaml", "yml", "toml", "cfg", "ini", "txt", "sh", "bash", "css", "html", "xml",
    "csv", "lock",
];

fn basename(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
}

fn extension(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Tier 1: empty guard, fixed basenames, skills directory prefix.
pub fn is_exempt_base(file_path: &str, skills_dir: &Path) -> bool {
    if file_path.is_empty() {
        return true;
    }
    if BASE_EXEMPT_BASENAMES.contains(&basename(file_path)) {
        return true;
    }
    let normalized = Path::new(&crate::types::canonical_path(file_path)).to_path_buf();
    normalized.starts_with(skills_dir)
}

/// Tier 2: base + test/spec file name patterns (case-insensitive).
pub fn is_exempt_standard(file_path: &str, skills_dir: &Path) -> bool {
    if is_exempt_base(file_path, skills_dir) {
        return true;
    }
    is_test_file(file_path)
}

/// Tier 3: standard + non-code extensions.
pub fn is_exempt_full(file_path: &str, skills_dir: &Path) -> bool {
    if is_exempt_standard(file_path, skills_dir) {
        return true;
    }
    match extension(file_path) {
        Some(ext) => NON_CODE_EXTENSIONS.contains(&ext.as_str()),
        None => false,
    }
}

/// Whether the basename looks like a test or spec file.
pub fn is_test_file(file_path: &str) -> bool {
    let lower = basename(file_path).to_ascii_lowercase();
    TEST_NAME_PATTERNS.iter().any(|p| lower.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn skills() -> PathBuf {
        PathBuf::from("/home/dev/.warden/skills")
    }

    #[test]
    fn empty_path_is_always_exempt() {
        assert!(is_exempt_base("", &skills()));
    }

    #[test]
    fn fixed_basenames_are_exempt_everywhere() {
        assert!(is_exempt_base("/project/HANDOFF.md", &skills()));
        assert!(is_exempt_base("/deep/nested/state.json", &skills()));
        assert!(!is_exempt_base("/project/main.rs", &skills()));
    }

    #[test]
    fn skills_directory_is_exempt_by_prefix() {
        assert!(is_exempt_base(
            "/home/dev/.warden/skills/review/run.sh",
            &skills()
        ));
        assert!(!is_exempt_base("/home/dev/project/run.sh", &skills()));
    }

    #[test]
    fn test_files_are_exempt_at_standard_tier_only() {
        assert!(!is_exempt_base("/x/test_parser.rs", &skills()));
        assert!(is_exempt_standard("/x/test_parser.rs", &skills()));
        assert!(is_exempt_standard("/x/parser_test.py", &skills()));
        assert!(is_exempt_standard("/x/widget.spec.ts", &skills()));
        assert!(!is_exempt_standard("/x/parser.rs", &skills()));
    }

    #[test]
    fn non_code_extensions_are_exempt_at_full_tier_only() {
        assert!(!is_exempt_standard("/x/notes.md", &skills()));
        assert!(is_exempt_full("/x/notes.md", &skills()));
        assert!(is_exempt_full("/x/deploy.yaml", &skills()));
        assert!(!is_exempt_full("/x/main.go", &skills()));
    }
}
