//! Safety checks applied to every proposed file change.
//!
//! Checks run in a fixed order so the reported error is deterministic:
//! protected path, traversal, action, size, missing content.

use crate::errors::{Result, SelfModError};
use crate::types::{ChangeAction, FileChange};

/// Locations the engine never writes.
///
/// Each entry covers the exact path, anything below it, and dotted variants
/// such as `.env.staging` or `Dockerfile.dev`.
pub const PROTECTED_PATHS: &[&str] = &[
    "Dockerfile",
    "fly.toml",
    ".github",
    ".env",
    ".env.local",
    ".env.production",
];

/// Largest accepted `new_content`, in bytes.
pub const MAX_CONTENT_BYTES: usize = 1 << 20;

/// A change as the model proposed it, before any checks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProposedChange {
    /// Raw path.
    pub path: String,
    /// Raw action string.
    pub action: String,
    /// Raw content.
    pub new_content: Option<String>,
}

/// Lexically normalize a relative path.
///
/// Backslashes become `/`, empty and `.` segments are dropped, and `..`
/// cancels the preceding segment. A `..` with nothing left to cancel is kept,
/// so escaping paths stay visible to the traversal check. Absolute paths
/// keep their leading `/`.
pub fn clean_path(raw: &str) -> String {
    let unified = raw.replace('\\', "/");
    let absolute = unified.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(&last) if last != ".." => {
                    let _ = segments.pop();
                }
                _ => segments.push(".."),
            },
            other => segments.push(other),
        }
    }
    let joined = segments.join("/");
    if absolute { format!("/{joined}") } else { joined }
}

/// Whether a cleaned path is, sits below, or is a dotted variant of a
/// protected location.
pub fn is_protected(cleaned: &str) -> bool {
    PROTECTED_PATHS.iter().any(|protected| {
        cleaned
            .strip_prefix(protected)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/') || rest.starts_with('.'))
    })
}

/// Whether a cleaned path is absolute or climbs out of the tree.
pub fn escapes_root(cleaned: &str) -> bool {
    cleaned.starts_with('/')
        || has_drive_prefix(cleaned)
        || cleaned.split('/').any(|segment| segment == "..")
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Validate one proposal and return it with a cleaned path and typed action.
pub fn validate_change(proposed: ProposedChange) -> Result<FileChange> {
    let cleaned = clean_path(&proposed.path);

    if is_protected(&cleaned) {
        return Err(SelfModError::ProtectedPath {
            path: proposed.path,
        });
    }
    if escapes_root(&cleaned) {
        return Err(SelfModError::PathTraversal {
            path: proposed.path,
        });
    }
    if cleaned.is_empty() {
        return Err(SelfModError::InvalidPath {
            path: proposed.path,
        });
    }

    let Some(action) = ChangeAction::parse(&proposed.action) else {
        return Err(SelfModError::InvalidAction {
            path: proposed.path,
            action: proposed.action,
        });
    };

    if let Some(content) = &proposed.new_content {
        if content.len() > MAX_CONTENT_BYTES {
            return Err(SelfModError::PayloadTooLarge {
                path: proposed.path,
                size: content.len(),
                limit: MAX_CONTENT_BYTES,
            });
        }
    }

    let new_content = match action {
        ChangeAction::Delete => None,
        ChangeAction::Create | ChangeAction::Modify => match proposed.new_content {
            Some(content) => Some(content),
            None => {
                return Err(SelfModError::MissingContent {
                    path: proposed.path,
                    action: action.as_str(),
                });
            }
        },
    };

    Ok(FileChange {
        path: cleaned,
        action,
        new_content,
    })
}

/// Validate a whole batch; the first failure rejects all of it.
pub fn validate_all(proposed: Vec<ProposedChange>) -> Result<Vec<FileChange>> {
    proposed.into_iter().map(validate_change).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    fn proposal(path: &str, action: &str, content: Option<&str>) -> ProposedChange {
        ProposedChange {
            path: path.into(),
            action: action.into(),
            new_content: content.map(String::from),
        }
    }

    #[test]
    fn clean_path_normalizes() {
        assert_eq!(clean_path("src/./lib.rs"), "src/lib.rs");
        assert_eq!(clean_path("src//lib.rs"), "src/lib.rs");
        assert_eq!(clean_path("src\\main.rs"), "src/main.rs");
        assert_eq!(clean_path("a/b/../c"), "a/c");
        assert_eq!(clean_path("../x"), "../x");
        assert_eq!(clean_path("a/../../x"), "../x");
        assert_eq!(clean_path("/etc/passwd"), "/etc/passwd");
        assert_eq!(clean_path("./"), "");
    }

    #[test]
    fn protected_exact_and_nested() {
        assert!(is_protected("Dockerfile"));
        assert!(is_protected(".github/workflows/ci.yml"));
        assert!(is_protected(".env.production"));
        assert!(!is_protected("docs/Dockerfile"));
        assert!(!is_protected(".envrc"));
        assert!(!is_protected("fly.tomlx"));
    }

    #[test]
    fn protected_dotted_variants() {
        assert!(is_protected(".env.staging"));
        assert!(is_protected("Dockerfile.dev"));
        assert!(is_protected("fly.toml.bak"));
        assert!(is_protected(&clean_path("./.env.test")));
        assert!(!is_protected("src/.env.staging"));
    }

    #[test]
    fn accepts_create() {
        let change = validate_change(proposal("src/x.go", "create", Some("package x\n"))).unwrap();
        assert_eq!(change.path, "src/x.go");
        assert_eq!(change.action, ChangeAction::Create);
        assert_eq!(change.new_content.as_deref(), Some("package x\n"));
    }

    #[test]
    fn stores_cleaned_path() {
        let change = validate_change(proposal("./src/../lib/a.rs", "modify", Some(""))).unwrap();
        assert_eq!(change.path, "lib/a.rs");
    }

    #[test]
    fn rejects_protected() {
        assert_matches!(
            validate_change(proposal("Dockerfile", "modify", Some("FROM scratch"))),
            Err(SelfModError::ProtectedPath { path }) if path == "Dockerfile"
        );
        assert_matches!(
            validate_change(proposal("./.github/workflows/x.yml", "create", Some(""))),
            Err(SelfModError::ProtectedPath { .. })
        );
        assert_matches!(
            validate_change(proposal("src/../fly.toml", "delete", None)),
            Err(SelfModError::ProtectedPath { .. })
        );
    }

    #[test]
    fn rejects_traversal() {
        assert_matches!(
            validate_change(proposal("../outside.txt", "create", Some("x"))),
            Err(SelfModError::PathTraversal { .. })
        );
        assert_matches!(
            validate_change(proposal("/etc/passwd", "modify", Some("x"))),
            Err(SelfModError::PathTraversal { .. })
        );
        assert_matches!(
            validate_change(proposal("C:\\Windows\\x", "create", Some("x"))),
            Err(SelfModError::PathTraversal { .. })
        );
    }

    #[test]
    fn rejects_empty_path() {
        assert_matches!(
            validate_change(proposal(".", "create", Some("x"))),
            Err(SelfModError::InvalidPath { .. })
        );
    }

    #[test]
    fn rejects_unknown_action() {
        assert_matches!(
            validate_change(proposal("a.txt", "rename", Some("x"))),
            Err(SelfModError::InvalidAction { action, .. }) if action == "rename"
        );
    }

    #[test]
    fn rejects_oversized_content() {
        let big = "x".repeat(MAX_CONTENT_BYTES + 1);
        assert_matches!(
            validate_change(proposal("big.txt", "create", Some(&big))),
            Err(SelfModError::PayloadTooLarge { size, .. }) if size == MAX_CONTENT_BYTES + 1
        );
        let edge = "x".repeat(MAX_CONTENT_BYTES);
        assert!(validate_change(proposal("edge.txt", "create", Some(&edge))).is_ok());
    }

    #[test]
    fn create_requires_content() {
        assert_matches!(
            validate_change(proposal("a.txt", "create", None)),
            Err(SelfModError::MissingContent { action: "create", .. })
        );
    }

    #[test]
    fn delete_drops_content() {
        let change = validate_change(proposal("a.txt", "delete", Some("ignored"))).unwrap();
        assert!(change.new_content.is_none());
    }

    #[test]
    fn batch_fails_on_any_invalid() {
        let result = validate_all(vec![
            proposal("ok.txt", "create", Some("a")),
            proposal(".env", "modify", Some("SECRET=1")),
        ]);
        assert_matches!(result, Err(SelfModError::ProtectedPath { .. }));
    }

    proptest! {
        #[test]
        fn accepted_paths_are_safe(raw in "[a-zA-Z._/\\\\-]{0,24}") {
            if let Ok(change) = validate_change(proposal(&raw, "create", Some("x"))) {
                prop_assert!(!is_protected(&change.path));
                prop_assert!(!change.path.split('/').any(|s| s == ".."));
                prop_assert!(!change.path.starts_with('/'));
                prop_assert!(!change.path.is_empty());
            }
        }
    }
}
