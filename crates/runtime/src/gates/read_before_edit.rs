//! Gate 1 (safety): deny edits to guarded-extension files that were not
//! read this session. Blind edits to code files are the top source of
//! regressions.
//!
//! A "semantically related" read counts as a substitute: same basename in
//! another directory, or the same stem once test prefixes/suffixes are
//! stripped (reading `foo.rs` covers editing `test_foo.rs`).

use std::path::Path;

use crate::gates::exemptions::is_exempt_base;
use crate::gates::{Gate, GateContext};
use crate::state::SessionState;
use crate::types::{canonical_path, GateResult, GateTier};

pub const NAME: &str = "GATE 1: READ BEFORE EDIT";

const GUARDED_EXTENSIONS: &[&str] = &[
    "py", "js", "ts", "jsx", "tsx", "rs", "go", "java", "c", "cpp", "rb", "php", "sh", "sql",
    "tf", "ipynb",
];

fn stem_normalize(path: &str) -> String {
    let stem = Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("");
    let mut stem = stem.to_string();
    for prefix in ["test_", "test"] {
        if let Some(rest) = stem.strip_prefix(prefix) {
            stem = rest.to_string();
            break;
        }
    }
    for suffix in ["_test", "_spec", ".test", ".spec"] {
        if let Some(rest) = stem.strip_suffix(suffix) {
            stem = rest.to_string();
            break;
        }
    }
    stem.to_ascii_lowercase()
}

fn is_related_read(read_path: &str, edit_path: &str) -> bool {
    let read_base = Path::new(read_path).file_name();
    let edit_base = Path::new(edit_path).file_name();
    if read_base.is_some() && read_base == edit_base {
        return true;
    }
    stem_normalize(read_path) == stem_normalize(edit_path)
}

pub struct ReadBeforeEdit;

impl Gate for ReadBeforeEdit {
    fn name(&self) -> &'static str {
        NAME
    }

    fn tier(&self) -> GateTier {
        GateTier::Safety
    }

    fn check(&self, ctx: &GateContext, state: &mut SessionState) -> GateResult {
        if !ctx.event.is_pre_tool() || !ctx.event.is_mutation_tool() {
            return GateResult::pass(NAME);
        }
        let Some(file_path) = ctx.event.file_path() else {
            return GateResult::pass(NAME);
        };

        let ext = Path::new(file_path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext {
            Some(ext) if GUARDED_EXTENSIONS.contains(&ext.as_str()) => {}
            _ => return GateResult::pass(NAME),
        }

        if is_exempt_base(file_path, &ctx.paths.skills_dir()) {
            return GateResult::pass(NAME);
        }

        // Creating a file from scratch requires no prior read.
        if ctx.event.tool_name == "Write" && !Path::new(file_path).exists() {
            return GateResult::pass(NAME);
        }

        let target = canonical_path(file_path);
        if state.files_read.iter().any(|read| {
            canonical_path(read) == target || is_related_read(read, &target)
        }) {
            return GateResult::pass(NAME);
        }

        GateResult::block(
            NAME,
            format!("[{NAME}] BLOCKED: You must Read '{file_path}' before editing it."),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{WardenConfig, WardenPaths};
    use crate::state::live::LiveState;
    use crate::types::HookEvent;
    use serde_json::json;
    use tempfile::TempDir;

    fn edit_event(tool: &str, path: &str) -> HookEvent {
        HookEvent {
            session_id: "main".into(),
            hook_event_name: "PreToolUse".into(),
            tool_name: tool.into(),
            tool_input: json!({"file_path": path}),
            tool_response: None,
        }
    }

    fn run(event: &HookEvent, state: &mut SessionState, base: &std::path::Path) -> GateResult {
        let paths = WardenPaths::at(base);
        let config = WardenConfig::default();
        let live = LiveState::default();
        let ctx = GateContext::new(event, &config, &paths, &live);
        ReadBeforeEdit.check(&ctx, state)
    }

    #[test]
    fn unread_existing_file_is_blocked() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("foo.py");
        std::fs::write(&file, "x = 1").unwrap();
        let event = edit_event("Edit", file.to_str().unwrap());
        let mut state = SessionState::new("main");
        let result = run(&event, &mut state, tmp.path());
        assert!(result.blocked);
        assert!(result.message.starts_with("[GATE 1: READ BEFORE EDIT] BLOCKED"));
    }

    #[test]
    fn read_file_passes() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("foo.py");
        std::fs::write(&file, "x = 1").unwrap();
        let event = edit_event("Edit", file.to_str().unwrap());
        let mut state = SessionState::new("main");
        state.files_read.push(canonical_path(file.to_str().unwrap()));
        assert!(!run(&event, &mut state, tmp.path()).blocked);
    }

    #[test]
    fn related_test_file_counts_as_read() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("foo.py");
        let test = tmp.path().join("test_foo.py");
        std::fs::write(&source, "x = 1").unwrap();
        std::fs::write(&test, "assert True").unwrap();

        let mut state = SessionState::new("main");
        state.files_read.push(canonical_path(source.to_str().unwrap()));
        let event = edit_event("Edit", test.to_str().unwrap());
        assert!(!run(&event, &mut state, tmp.path()).blocked);
    }

    #[test]
    fn write_to_new_file_is_allowed() {
        let tmp = TempDir::new().unwrap();
        let event = edit_event("Write", tmp.path().join("brand_new.rs").to_str().unwrap());
        let mut state = SessionState::new("main");
        assert!(!run(&event, &mut state, tmp.path()).blocked);
    }

    #[test]
    fn unguarded_extension_is_ignored() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("README.md");
        std::fs::write(&file, "# hi").unwrap();
        let event = edit_event("Edit", file.to_str().unwrap());
        let mut state = SessionState::new("main");
        assert!(!run(&event, &mut state, tmp.path()).blocked);
    }

    #[test]
    fn stem_normalization_strips_affixes() {
        assert_eq!(stem_normalize("/a/test_foo.py"), "foo");
        assert_eq!(stem_normalize("/a/foo_spec.py"), "foo");
        assert_eq!(stem_normalize("/a/Foo.py"), "foo");
    }
}
