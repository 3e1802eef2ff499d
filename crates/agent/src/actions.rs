//! Classification of free-text completion output into typed actions.
//!
//! The completion boundary is plain text, so no response is trusted to
//! be well formed. Every reply lands in exactly one of three buckets:
//! a SQL request, a final answer, or `Malformed`. Parse failure is a
//! recoverable state handled by the loop, not an error here.

use autoquery_core::Action;

const SQL_MARKER: &str = "SQL:";
const ANSWER_MARKERS: &[&str] = &["FINAL ANSWER:", "ANSWER:"];

/// Parses a raw completion reply into an `Action`. Tolerates fenced
/// code blocks, `SQL:` / `ANSWER:` markers with surrounding prose, and
/// bare SELECT statements.
pub fn parse_action(raw: &str) -> Action {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Action::Malformed { raw: raw.to_string() };
    }

    if let Some(statement) = fenced_sql(trimmed) {
        return Action::RunSql { statement };
    }

    if let Some(statement) = marked_sql(trimmed) {
        return Action::RunSql { statement };
    }

    if let Some(text) = marked_answer(trimmed) {
        return Action::FinalAnswer { text };
    }

    if is_bare_select(trimmed) {
        return Action::RunSql { statement: strip_trailing_prose(trimmed) };
    }

    Action::Malformed { raw: raw.to_string() }
}

/// Extracts the first fenced code block whose content is SELECT-class.
/// The fence language tag (```sql, ```sqlite, bare ```) is ignored.
fn fenced_sql(text: &str) -> Option<String> {
    let mut rest = text;
    while let Some(open) = rest.find("```") {
        let after_open = &rest[open + 3..];
        let body_start = after_open.find('\n').map(|index| index + 1).unwrap_or(0);
        let body = &after_open[body_start..];
        let close = body.find("```")?;
        let candidate = body[..close].trim();
        if is_bare_select(candidate) {
            return Some(candidate.to_string());
        }
        rest = &body[close + 3..];
    }
    None
}

/// Extracts a statement introduced by a `SQL:` marker, running to the
/// first blank line or end of text.
fn marked_sql(text: &str) -> Option<String> {
    let position = find_marker(text, SQL_MARKER)?;
    let after = &text[position + SQL_MARKER.len()..];
    let statement = until_blank_line(after).trim().to_string();
    (!statement.is_empty()).then_some(statement)
}

fn marked_answer(text: &str) -> Option<String> {
    for marker in ANSWER_MARKERS {
        if let Some(position) = find_marker(text, marker) {
            let answer = text[position + marker.len()..].trim().to_string();
            if !answer.is_empty() {
                return Some(answer);
            }
        }
    }
    None
}

/// Case-insensitive marker search anchored at a line start, so prose
/// like "the final answer: 42 came from..." mid-sentence still matches
/// only when the model used the marker protocol.
fn find_marker(text: &str, marker: &str) -> Option<usize> {
    let upper = text.to_ascii_uppercase();
    let mut offset = 0;
    while let Some(relative) = upper[offset..].find(marker) {
        let position = offset + relative;
        let at_line_start =
            position == 0 || upper.as_bytes()[position - 1] == b'\n';
        if at_line_start {
            return Some(position);
        }
        offset = position + marker.len();
    }
    None
}

fn until_blank_line(text: &str) -> &str {
    match text.find("\n\n") {
        Some(index) => &text[..index],
        None => text,
    }
}

fn is_bare_select(text: &str) -> bool {
    let upper = text.trim_start().to_ascii_uppercase();
    upper.starts_with("SELECT") || upper.starts_with("WITH")
}

/// For bare statements, keep everything up to the terminating semicolon
/// when one exists; models sometimes append explanation after it.
fn strip_trailing_prose(text: &str) -> String {
    match text.find(';') {
        Some(index) => text[..index].trim().to_string(),
        None => text.trim().to_string(),
    }
}
