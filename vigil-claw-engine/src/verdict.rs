//! Model reply parsing.
//!
//! Replies arrive in two shapes in the wild: a structured `FINAL_JSON: {...}`
//! trailer, and the legacy `YES: ...` / `NO: ...` first-token form. Both are
//! accepted; anything unrecognizable counts as still watching.

use crate::types::{Verdict, VerdictState};

const DETAIL_MAX_CHARS: usize = 200;
const JSON_MARKER: &str = "FINAL_JSON";

/// Parse a free-form model reply into a verdict. Never fails: malformed
/// input yields a `Watching` verdict carrying the reply itself.
#[must_use]
pub fn parse_verdict(reply: &str) -> Verdict {
    let text = reply.trim();
    if text.is_empty() {
        return Verdict {
            state: VerdictState::Watching,
            detail: "Empty response".to_string(),
        };
    }

    if let Some(verdict) = parse_structured(text) {
        return verdict;
    }

    // Legacy form: the first token decides.
    let first_token = text.split_whitespace().next().unwrap_or("");
    if first_token.to_uppercase().starts_with("YES") {
        let after = text
            .strip_prefix(first_token)
            .unwrap_or("")
            .trim_start_matches(':')
            .trim();
        let detail = if after.is_empty() {
            "Condition met".to_string()
        } else {
            truncate(after)
        };
        return Verdict {
            state: VerdictState::Resolved,
            detail,
        };
    }

    // A leading NO token is noise; the explanation after it is the detail.
    if first_token.to_uppercase() == "NO" || first_token.to_uppercase() == "NO:" {
        let after = text
            .strip_prefix(first_token)
            .unwrap_or("")
            .trim_start_matches(':')
            .trim();
        if !after.is_empty() {
            return Verdict {
                state: VerdictState::Watching,
                detail: truncate(after),
            };
        }
        return Verdict {
            state: VerdictState::Watching,
            detail: "Condition not yet met".to_string(),
        };
    }

    Verdict {
        state: VerdictState::Watching,
        detail: truncate(text),
    }
}

/// Look for a `FINAL_JSON: {...}` trailer and map its `decision` field.
fn parse_structured(text: &str) -> Option<Verdict> {
    let marker_at = find_marker(text)?;
    let after_marker = &text[marker_at + JSON_MARKER.len()..];
    let brace_at = after_marker.find('{')?;
    let brace_end = after_marker.rfind('}')?;
    if brace_end < brace_at {
        return None;
    }
    let raw = &after_marker[brace_at..=brace_end];

    let payload: serde_json::Value = serde_json::from_str(raw).ok()?;
    let decision = payload
        .get("decision")
        .and_then(|d| d.as_str())
        .unwrap_or("")
        .trim()
        .to_lowercase();
    let state = if decision == "resolved" {
        VerdictState::Resolved
    } else {
        VerdictState::Watching
    };

    let summary = payload
        .get("summary")
        .and_then(|s| s.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let detail = match summary {
        Some(s) => truncate(s),
        None => truncate(text),
    };

    Some(Verdict { state, detail })
}

/// Byte offset of the marker, matched ASCII-case-insensitively. The marker
/// is pure ASCII, so the offset is always a char boundary of `text`.
fn find_marker(text: &str) -> Option<usize> {
    let needle = JSON_MARKER.as_bytes();
    text.as_bytes()
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
}

fn truncate(text: &str) -> String {
    text.chars().take(DETAIL_MAX_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yes_with_detail() {
        let verdict = parse_verdict("YES: file report.pdf saved");
        assert_eq!(verdict.state, VerdictState::Resolved);
        assert_eq!(verdict.detail, "file report.pdf saved");
    }

    #[test]
    fn test_yes_case_insensitive() {
        let verdict = parse_verdict("yes: the dialog closed");
        assert_eq!(verdict.state, VerdictState::Resolved);
        assert_eq!(verdict.detail, "the dialog closed");
    }

    #[test]
    fn test_bare_yes() {
        let verdict = parse_verdict("YES");
        assert_eq!(verdict.state, VerdictState::Resolved);
        assert_eq!(verdict.detail, "Condition met");
    }

    #[test]
    fn test_yes_after_leading_whitespace() {
        let verdict = parse_verdict("  \n YES: ready");
        assert_eq!(verdict.state, VerdictState::Resolved);
        assert_eq!(verdict.detail, "ready");
    }

    #[test]
    fn test_no_is_watching() {
        let verdict = parse_verdict("NO: still compiling");
        assert_eq!(verdict.state, VerdictState::Watching);
        assert_eq!(verdict.detail, "still compiling");
    }

    #[test]
    fn test_bare_no() {
        let verdict = parse_verdict("NO");
        assert_eq!(verdict.state, VerdictState::Watching);
        assert_eq!(verdict.detail, "Condition not yet met");
    }

    #[test]
    fn test_prose_is_watching() {
        let verdict = parse_verdict("The screen shows a progress bar at 40%.");
        assert_eq!(verdict.state, VerdictState::Watching);
        assert_eq!(verdict.detail, "The screen shows a progress bar at 40%.");
    }

    #[test]
    fn test_empty_reply() {
        let verdict = parse_verdict("   ");
        assert_eq!(verdict.state, VerdictState::Watching);
        assert_eq!(verdict.detail, "Empty response");
    }

    #[test]
    fn test_final_json_resolved() {
        let reply = r#"Some reasoning first.
FINAL_JSON: {"decision": "resolved", "summary": "download finished"}"#;
        let verdict = parse_verdict(reply);
        assert_eq!(verdict.state, VerdictState::Resolved);
        assert_eq!(verdict.detail, "download finished");
    }

    #[test]
    fn test_final_json_other_decision_is_watching() {
        let reply = r#"FINAL_JSON: {"decision": "in_progress", "summary": "copying files"}"#;
        let verdict = parse_verdict(reply);
        assert_eq!(verdict.state, VerdictState::Watching);
        assert_eq!(verdict.detail, "copying files");
    }

    #[test]
    fn test_final_json_without_summary_uses_reply_prefix() {
        let reply = r#"FINAL_JSON: {"decision": "resolved"}"#;
        let verdict = parse_verdict(reply);
        assert_eq!(verdict.state, VerdictState::Resolved);
        assert!(verdict.detail.starts_with("FINAL_JSON"));
    }

    #[test]
    fn test_final_json_wins_over_leading_yes() {
        // Structured trailer is authoritative even when prose starts with YES.
        let reply = r#"YES it looks close.
FINAL_JSON: {"decision": "watching", "summary": "button still disabled"}"#;
        let verdict = parse_verdict(reply);
        assert_eq!(verdict.state, VerdictState::Watching);
        assert_eq!(verdict.detail, "button still disabled");
    }

    #[test]
    fn test_final_json_marker_case_insensitive() {
        let reply = r#"final_json: {"decision": "resolved", "summary": "ok"}"#;
        let verdict = parse_verdict(reply);
        assert_eq!(verdict.state, VerdictState::Resolved);
        assert_eq!(verdict.detail, "ok");
    }

    #[test]
    fn test_non_ascii_reply_is_watching() {
        let verdict = parse_verdict("die Überprüfung läuft noch — kein Ergebnis");
        assert_eq!(verdict.state, VerdictState::Watching);
    }

    #[test]
    fn test_malformed_final_json_falls_back() {
        let reply = "FINAL_JSON: {not json at all";
        let verdict = parse_verdict(reply);
        assert_eq!(verdict.state, VerdictState::Watching);
    }

    #[test]
    fn test_long_reply_truncated() {
        let long = "x".repeat(500);
        let verdict = parse_verdict(&long);
        assert_eq!(verdict.detail.chars().count(), 200);
    }

    #[test]
    fn test_multiline_json_payload() {
        let reply = "FINAL_JSON: {\n  \"decision\": \"resolved\",\n  \"summary\": \"done\"\n}";
        let verdict = parse_verdict(reply);
        assert_eq!(verdict.state, VerdictState::Resolved);
        assert_eq!(verdict.detail, "done");
    }
}
