// src/llm/parse.rs
// Cleanup helpers for model output. Models wrap answers in code fences or
// prose no matter how firmly the prompt says not to.

use serde::de::DeserializeOwned;

/// Strip a Markdown code fence (with or without a language tag) wrapping
/// the response. Unfenced input comes back trimmed and otherwise unchanged.
pub fn strip_code_fences(raw: &str) -> String {
    raw.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```sql")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
        .to_string()
}

/// Extract the SQL statement from a completion. If a `WITH` or `SELECT`
/// token is locatable after fence stripping, extraction starts there;
/// otherwise the stripped text is used verbatim.
pub fn extract_sql(raw: &str) -> String {
    let cleaned = strip_code_fences(raw);
    match find_sql_start(&cleaned) {
        Some(idx) => cleaned[idx..].trim().to_string(),
        None => cleaned,
    }
}

fn find_sql_start(s: &str) -> Option<usize> {
    let upper = s.to_ascii_uppercase();
    ["WITH", "SELECT"]
        .iter()
        .filter_map(|kw| find_token(&upper, kw))
        .min()
}

/// First token-bounded occurrence of `kw` in `upper` (both uppercase ASCII).
fn find_token(upper: &str, kw: &str) -> Option<usize> {
    let bytes = upper.as_bytes();
    let mut from = 0;
    while let Some(pos) = upper[from..].find(kw) {
        let abs = from + pos;
        let end = abs + kw.len();
        let before_ok = abs == 0 || !is_word_byte(bytes[abs - 1]);
        let after_ok = end >= bytes.len() || !is_word_byte(bytes[end]);
        if before_ok && after_ok {
            return Some(abs);
        }
        from = end;
    }
    None
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Parse a structured completion. Strips fences first; if the remainder is
/// not pure JSON, retries on the outermost `{...}`/`[...]` window so a
/// sentence of prose around the object doesn't sink the parse.
pub fn parse_json_response<T: DeserializeOwned>(raw: &str) -> Result<T, serde_json::Error> {
    let cleaned = strip_code_fences(raw);
    serde_json::from_str(&cleaned).or_else(|err| match json_window(&cleaned) {
        Some(window) => serde_json::from_str(window),
        None => Err(err),
    })
}

fn json_window(s: &str) -> Option<&str> {
    let start = s.find(['{', '['])?;
    let end = s.rfind(['}', ']'])?;
    (end > start).then(|| &s[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_sql_matches_unfenced() {
        let inner = "SELECT COUNT(*) FROM Track";
        let fenced = format!("```sql\n{inner}\n```");
        assert_eq!(extract_sql(&fenced), extract_sql(inner));
        assert_eq!(extract_sql(&fenced), inner);
    }

    #[test]
    fn fence_without_language_tag() {
        assert_eq!(strip_code_fences("```\nSELECT 1\n```"), "SELECT 1");
    }

    #[test]
    fn commentary_before_select_is_dropped() {
        let raw = "Sure! Here is the query:\nSELECT Name FROM Artist";
        assert_eq!(extract_sql(raw), "SELECT Name FROM Artist");
    }

    #[test]
    fn cte_prefix_wins_over_later_select() {
        let raw = "WITH t AS (SELECT 1) SELECT * FROM t";
        assert_eq!(extract_sql(raw), raw);
    }

    #[test]
    fn no_sql_prefix_returns_verbatim() {
        assert_eq!(extract_sql("PRAGMA table_info(Track)"), "PRAGMA table_info(Track)");
    }

    #[test]
    fn select_substring_is_not_a_prefix() {
        // "Shipdrop-select" style words must not be mistaken for the keyword
        let raw = "unselected text without a query";
        assert_eq!(extract_sql(raw), raw);
    }

    #[test]
    fn json_with_prose_still_parses() {
        #[derive(serde::Deserialize)]
        struct Out {
            intent: String,
        }
        let raw = "Here you go:\n```json\n{\"intent\": \"aggregation\"}\n```\nHope that helps.";
        // the trailing prose lands outside the fence, so the window rescue kicks in
        let out: Out = parse_json_response(raw).unwrap();
        assert_eq!(out.intent, "aggregation");
    }
}
