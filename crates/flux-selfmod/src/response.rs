//! Parsing the model's JSON proposal.

use std::sync::LazyLock;

use flux_core::text::preview;
use regex::Regex;
use serde::Deserialize;

use crate::errors::{Result, SelfModError};
use crate::validation::ProposedChange;

/// Characters of the raw reply quoted in parse errors.
const SAMPLE_CHARS: usize = 200;

static FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\r?\n?(.*?)```").unwrap());

#[derive(Debug, Deserialize)]
struct RawProposal {
    #[serde(default)]
    description: String,
    changes: Vec<RawChange>,
}

#[derive(Debug, Deserialize)]
struct RawChange {
    path: String,
    action: String,
    #[serde(default)]
    new_content: Option<String>,
}

/// A parsed but unvalidated proposal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Proposal {
    /// Model-written summary.
    pub description: String,
    /// Raw changes, in order.
    pub changes: Vec<ProposedChange>,
}

/// Pull the JSON text out of a reply that may be wrapped in a code fence.
pub fn extract_json(raw: &str) -> &str {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return trimmed;
    }
    if let Some(inner) = FENCE.captures(raw).and_then(|c| c.get(1)) {
        return inner.as_str().trim();
    }
    // Unclosed fence or leading chatter: take the outermost braces.
    match (raw.find('{'), raw.rfind('}')) {
        (Some(start), Some(end)) if start < end => &raw[start..=end],
        _ => trimmed,
    }
}

/// Parse a full model reply into a proposal.
pub fn parse_proposal(raw: &str) -> Result<Proposal> {
    let json = extract_json(raw);
    let parsed: RawProposal =
        serde_json::from_str(json).map_err(|e| SelfModError::ResponseFormat {
            reason: e.to_string(),
            sample: preview(raw, SAMPLE_CHARS),
        })?;
    if parsed.changes.is_empty() {
        return Err(SelfModError::ResponseFormat {
            reason: "proposal contains no changes".into(),
            sample: preview(raw, SAMPLE_CHARS),
        });
    }
    Ok(Proposal {
        description: parsed.description,
        changes: parsed
            .changes
            .into_iter()
            .map(|c| ProposedChange {
                path: c.path,
                action: c.action,
                new_content: c.new_content,
            })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const BODY: &str = r#"{"description":"add x","changes":[{"path":"src/x.go","action":"create","new_content":"package x"}]}"#;

    #[test]
    fn bare_json() {
        assert_eq!(extract_json(BODY), BODY);
    }

    #[test]
    fn json_fence_stripped() {
        let raw = format!("```json\n{BODY}\n```");
        assert_eq!(extract_json(&raw), BODY);
    }

    #[test]
    fn plain_fence_stripped() {
        let raw = format!("Here you go:\n```\n{BODY}\n```\nDone.");
        assert_eq!(extract_json(&raw), BODY);
    }

    #[test]
    fn unclosed_fence_uses_braces() {
        let raw = format!("```json\n{BODY}");
        assert_eq!(extract_json(&raw), BODY);
    }

    #[test]
    fn parses_changes() {
        let proposal = parse_proposal(BODY).unwrap();
        assert_eq!(proposal.description, "add x");
        assert_eq!(
            proposal.changes,
            vec![ProposedChange {
                path: "src/x.go".into(),
                action: "create".into(),
                new_content: Some("package x".into()),
            }]
        );
    }

    #[test]
    fn delete_without_content() {
        let proposal =
            parse_proposal(r#"{"description":"rm","changes":[{"path":"a","action":"delete"}]}"#)
                .unwrap();
        assert_eq!(proposal.changes[0].new_content, None);
    }

    #[test]
    fn prose_is_format_error_with_sample() {
        let raw = "I cannot help with that. ".repeat(20);
        let err = parse_proposal(&raw).unwrap_err();
        assert_matches!(&err, SelfModError::ResponseFormat { sample, .. } if sample.ends_with("..."));
        if let SelfModError::ResponseFormat { sample, .. } = err {
            assert_eq!(sample.chars().count(), SAMPLE_CHARS + 3);
        }
    }

    #[test]
    fn empty_changes_rejected() {
        assert_matches!(
            parse_proposal(r#"{"description":"nothing","changes":[]}"#),
            Err(SelfModError::ResponseFormat { reason, .. }) if reason.contains("no changes")
        );
    }
}
