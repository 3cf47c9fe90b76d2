// src/agent/validator.rs
// Safety gate in front of execution: read-only, single-statement, no DML or
// DDL keywords anywhere. Pure function, no I/O.

/// Keywords that must not appear anywhere in a candidate statement, matched
/// as standalone tokens, case-insensitive.
pub const FORBIDDEN_KEYWORDS: [&str; 8] = [
    "DELETE", "DROP", "UPDATE", "INSERT", "ALTER", "TRUNCATE", "GRANT", "REVOKE",
];

/// Validate a candidate query.
///
/// Returns the sanitized single statement to execute, or a rejection
/// reason. Everything after the first semicolon outside a quoted string is
/// discarded before the checks run, so the same multi-statement rule
/// applies on every path that reaches the database.
pub fn validate_sql(sql: &str) -> Result<String, String> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err("Empty SQL query.".to_string());
    }

    let statement = truncate_at_semicolon(trimmed).trim().to_string();
    if statement.is_empty() {
        return Err("Empty SQL query.".to_string());
    }

    let upper = statement.to_ascii_uppercase();
    // Split on non-identifier chars so the scan sees whole tokens only
    // (Shipdrop/updated_at style identifiers must pass)
    let words: Vec<&str> = upper
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .collect();

    let first = words.first().copied().unwrap_or("");
    if first != "SELECT" && first != "WITH" {
        return Err("Only read-only SELECT statements are allowed.".to_string());
    }

    for keyword in FORBIDDEN_KEYWORDS {
        if words.contains(&keyword) {
            return Err(format!("Forbidden keyword detected: {keyword}"));
        }
    }

    Ok(statement)
}

/// Cut at the first semicolon that sits outside single- or double-quoted
/// text. SQL quote doubling ('' and "") falls out naturally: each quote
/// character just toggles the state twice.
fn truncate_at_semicolon(sql: &str) -> &str {
    let mut in_single = false;
    let mut in_double = false;
    for (i, c) in sql.char_indices() {
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            ';' if !in_single && !in_double => return &sql[..i],
            _ => {}
        }
    }
    sql
}
