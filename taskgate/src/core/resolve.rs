//! Step-to-file resolution.
//!
//! Planner output is free text; these patterns are the only structure the
//! executor relies on, so they are a versioned parsing contract and are tested
//! with literal strings. Patterns are tried in order and the first match wins,
//! all anchored at the start of the trimmed step, after an optional leading
//! connective (`Then`, `Next`, `Finally`, `Now`, `Also`, each optionally
//! followed by a comma):
//!
//! 1. `Edit <path>`                 -> edit
//! 2. `Create <path>`               -> create
//! 3. `Update <path>: ...`          -> edit
//! 4. `In <path>, ...`              -> edit
//! 5. `Delete <path>` / `Remove <path>` -> delete
//! 6. `<path>` at the very start    -> keyword inference
//!
//! A `<path>` must end in one of [`SOURCE_EXTENSIONS`] and may be wrapped in
//! backticks or quotes, which are not part of the captured path. Verbs in the
//! middle of a sentence are still not matched.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::core::types::Operation;

/// Parsing contract version; bump when patterns or precedence change.
///
/// Version 2 added leading connectives and quoted or backticked paths.
pub const RESOLVER_VERSION: u32 = 2;

/// File extensions recognized as step targets.
pub const SOURCE_EXTENSIONS: &[&str] = &[
    "js", "jsx", "mjs", "cjs", "ts", "tsx", "json", "py", "rb", "go", "rs", "java", "kt", "swift",
    "c", "h", "cc", "cpp", "hpp", "cs", "php", "vue", "svelte", "html", "css", "scss", "md",
    "yaml", "yml", "toml", "sql", "sh",
];

/// Which pattern produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRule {
    Edit,
    Create,
    Update,
    In,
    Delete,
    BarePath,
}

/// Resolution of one step description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedStep {
    /// Target path exactly as written in the step, if any pattern matched.
    pub path: Option<String>,
    pub operation: Operation,
    pub rule: Option<MatchRule>,
}

impl ResolvedStep {
    /// Steps without a file are skipped only when they would merely edit.
    pub fn is_skippable(&self) -> bool {
        self.path.is_none() && self.operation == Operation::Edit
    }
}

struct Pattern {
    rule: MatchRule,
    operation: Option<Operation>,
    regex: Regex,
}

static PATTERNS: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    let path = format!(
        r#"[`'"]?([\w@./-]+\.(?:{}))\b[`'"]?"#,
        SOURCE_EXTENSIONS.join("|")
    );
    let lead = r"(?:(?:then|next|finally|now|also)\s*,?\s+)?";
    let build = |rule, operation, body: &str| Pattern {
        rule,
        operation,
        regex: Regex::new(&format!(r"(?i)^\s*{lead}{body}")).expect("step pattern compiles"),
    };
    vec![
        build(
            MatchRule::Edit,
            Some(Operation::Edit),
            &format!(r"edit\s+{path}"),
        ),
        build(
            MatchRule::Create,
            Some(Operation::Create),
            &format!(r"create\s+(?:new\s+)?(?:file\s+)?{path}"),
        ),
        build(
            MatchRule::Update,
            Some(Operation::Edit),
            &format!(r"update\s+{path}\s*:"),
        ),
        build(
            MatchRule::In,
            Some(Operation::Edit),
            &format!(r"in\s+{path}\s*,"),
        ),
        build(
            MatchRule::Delete,
            Some(Operation::Delete),
            &format!(r"(?:delete|remove)\s+(?:file\s+)?{path}"),
        ),
        build(MatchRule::BarePath, None, &path),
    ]
});

/// Resolve the target file and operation for a step description.
pub fn resolve_step(step: &str) -> ResolvedStep {
    for pattern in PATTERNS.iter() {
        if let Some(caps) = pattern.regex.captures(step) {
            return ResolvedStep {
                path: caps.get(1).map(|m| m.as_str().to_string()),
                operation: pattern
                    .operation
                    .unwrap_or_else(|| infer_operation(step)),
                rule: Some(pattern.rule),
            };
        }
    }
    ResolvedStep {
        path: None,
        operation: infer_operation(step),
        rule: None,
    }
}

/// Infer the operation from keywords alone, ignoring any path pattern.
pub fn infer_operation(step: &str) -> Operation {
    let lower = step.to_lowercase();
    if lower.contains("create") || lower.contains("add new file") {
        Operation::Create
    } else if lower.contains("delete") || lower.contains("remove file") {
        Operation::Delete
    } else {
        Operation::Edit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(step: &str) -> (Option<String>, Operation) {
        let r = resolve_step(step);
        (r.path, r.operation)
    }

    #[test]
    fn edit_prefix_resolves_to_edit() {
        assert_eq!(
            resolved("Edit src/routes/auth.js to add /login"),
            (Some("src/routes/auth.js".to_string()), Operation::Edit)
        );
    }

    #[test]
    fn create_prefix_resolves_to_create() {
        assert_eq!(
            resolved("Create src/utils/logger.ts"),
            (Some("src/utils/logger.ts".to_string()), Operation::Create)
        );
    }

    #[test]
    fn update_with_colon_resolves_to_edit() {
        let r = resolve_step("Update src/app.py: add a health endpoint");
        assert_eq!(r.path.as_deref(), Some("src/app.py"));
        assert_eq!(r.operation, Operation::Edit);
        assert_eq!(r.rule, Some(MatchRule::Update));
    }

    #[test]
    fn in_with_comma_resolves_to_edit() {
        let r = resolve_step("In lib/server.go, handle SIGTERM");
        assert_eq!(r.path.as_deref(), Some("lib/server.go"));
        assert_eq!(r.rule, Some(MatchRule::In));
    }

    #[test]
    fn delete_prefix_resolves_to_delete() {
        assert_eq!(
            resolved("Delete src/legacy/old_api.js"),
            (Some("src/legacy/old_api.js".to_string()), Operation::Delete)
        );
        assert_eq!(
            resolved("Remove file src/legacy/old_api.js"),
            (Some("src/legacy/old_api.js".to_string()), Operation::Delete)
        );
    }

    #[test]
    fn bare_path_uses_keyword_inference() {
        assert_eq!(
            resolved("src/index.ts: wire up the router"),
            (Some("src/index.ts".to_string()), Operation::Edit)
        );
        let r = resolve_step("src/config.json - create default settings");
        assert_eq!(r.rule, Some(MatchRule::BarePath));
        assert_eq!(r.operation, Operation::Create);
    }

    #[test]
    fn verb_patterns_are_not_escalated_by_keywords() {
        assert_eq!(
            resolved("Edit src/a.js to delete the unused helper"),
            (Some("src/a.js".to_string()), Operation::Edit)
        );
    }

    #[test]
    fn verbs_are_case_insensitive() {
        assert_eq!(
            resolved("  edit README.md with install notes"),
            (Some("README.md".to_string()), Operation::Edit)
        );
    }

    #[test]
    fn longer_extension_wins_over_prefix_extension() {
        assert_eq!(
            resolved("Edit package.json to add a script"),
            (Some("package.json".to_string()), Operation::Edit)
        );
    }

    #[test]
    fn plain_instruction_has_no_target_and_is_skippable() {
        let r = resolve_step("Run the test suite");
        assert_eq!(r.path, None);
        assert_eq!(r.operation, Operation::Edit);
        assert!(r.is_skippable());
    }

    #[test]
    fn unresolved_create_is_not_skippable() {
        let r = resolve_step("Create a logger module");
        assert_eq!(r.path, None);
        assert_eq!(r.operation, Operation::Create);
        assert!(!r.is_skippable());
    }

    #[test]
    fn unknown_extension_does_not_match() {
        assert_eq!(resolve_step("Edit assets/logo.png").path, None);
    }

    #[test]
    fn leading_connective_is_skipped() {
        assert_eq!(
            resolved("Then edit src/a.js to add the export"),
            (Some("src/a.js".to_string()), Operation::Edit)
        );
        let r = resolve_step("Finally, remove src/old.js");
        assert_eq!(r.path.as_deref(), Some("src/old.js"));
        assert_eq!(r.rule, Some(MatchRule::Delete));
    }

    #[test]
    fn backticked_and_quoted_paths_resolve() {
        assert_eq!(
            resolved("Edit `src/a.js` to add the export"),
            (Some("src/a.js".to_string()), Operation::Edit)
        );
        assert_eq!(
            resolved("Create \"src/utils/logger.ts\""),
            (Some("src/utils/logger.ts".to_string()), Operation::Create)
        );
        let r = resolve_step("Update `src/app.py`: add a health endpoint");
        assert_eq!(r.path.as_deref(), Some("src/app.py"));
        assert_eq!(r.rule, Some(MatchRule::Update));
    }

    #[test]
    fn verb_mid_sentence_is_not_matched() {
        assert_eq!(resolve_step("Make sure to edit src/a.js").path, None);
    }

    #[test]
    fn update_without_colon_falls_through() {
        let r = resolve_step("Update src/app.py to log requests");
        assert_eq!(r.path, None);
    }
}
