//! Statement classification and table extraction.
//!
//! Both are pure functions of the SQL text. Unknown statements classify as
//! writes so that they are always sent to a primary.

use crate::core::Operation;
use regex::Regex;

/// Pseudo-table used for statements that name no table (e.g. `COMMIT`).
pub const NO_TABLE: &str = "no-table";

lazy_static::lazy_static! {
    static ref MAYBE_WRITE: Regex = Regex::new(
        r"(?i)(?:^|\s)(?:ALTER|CREATE|ANALYZE|CHECK|OPTIMIZE|REPAIR|CALL|DELETE|DROP|INSERT|LOAD|REPLACE|UPDATE|SET|RENAME\s+TABLE)(?:\s|$)"
    ).expect("write keyword pattern");

    static ref READ_PREFIX: Regex = Regex::new(
        r"(?i)^(?:SELECT|SHOW|DESCRIBE|DESC|EXPLAIN)(?:\s|$)"
    ).expect("read prefix pattern");

    static ref PARENTHESIZED: Regex = Regex::new(r"(?s)\(([^(]*?)\)")
        .expect("parenthesized pattern");

    static ref COMMON_TABLE: Regex = Regex::new(
        r"(?is)^\s*(?:SELECT.*?\s+FROM|INSERT(?:\s+LOW_PRIORITY|\s+DELAYED|\s+HIGH_PRIORITY)?(?:\s+IGNORE)?(?:\s+INTO)?|REPLACE(?:\s+LOW_PRIORITY|\s+DELAYED)?(?:\s+INTO)?|UPDATE(?:\s+LOW_PRIORITY)?(?:\s+IGNORE)?|DELETE(?:\s+LOW_PRIORITY|\s+QUICK|\s+IGNORE)*(?:.+?FROM)?)\s+((?:[0-9a-zA-Z$_.`-]|[^\x00-\x7F])+)"
    ).expect("common table pattern");

    static ref SHOW_WHERE_NAME: Regex = Regex::new(
        r#"(?is)^\s*SHOW\s+(?:TABLE\s+STATUS|(?:FULL\s+)?TABLES).+WHERE\s+Name\s*=\s*["']((?:[0-9a-zA-Z$_.-]|[^\x00-\x7F])+)["']"#
    ).expect("show where pattern");

    static ref SHOW_LIKE: Regex = Regex::new(
        r#"(?is)^\s*SHOW\s+(?:TABLE\s+STATUS|(?:FULL\s+)?TABLES)\s+(?:WHERE\s+Name\s+)?LIKE\s*["']((?:[\\0-9a-zA-Z$_.-]|[^\x00-\x7F])+)%?["']"#
    ).expect("show like pattern");

    static ref OTHER_TABLE: Regex = Regex::new(concat!(
        r"(?is)^\s*(?:",
        r"(?:EXPLAIN\s+(?:EXTENDED\s+)?)?SELECT.*?\s+FROM",
        r"|DESCRIBE|DESC|EXPLAIN|HANDLER",
        r"|(?:LOCK|UNLOCK)\s+TABLES?",
        r"|(?:RENAME|OPTIMIZE|BACKUP|RESTORE|CHECK|CHECKSUM|ANALYZE|REPAIR).*\s+TABLE",
        r"|TRUNCATE(?:\s+TABLE)?",
        r"|CREATE(?:\s+TEMPORARY)?\s+TABLE(?:\s+IF\s+NOT\s+EXISTS)?",
        r"|ALTER(?:\s+IGNORE)?\s+TABLE",
        r"|DROP\s+TABLE(?:\s+IF\s+EXISTS)?",
        r"|CREATE(?:\s+\w+)?\s+INDEX.*\s+ON",
        r"|DROP\s+INDEX.*\s+ON",
        r"|LOAD\s+DATA.*INFILE.*INTO\s+TABLE",
        r"|(?:GRANT|REVOKE).*ON\s+TABLE",
        r"|SHOW\s+(?:.*FROM|.*TABLE)",
        r")\s+\(*\s*((?:[0-9a-zA-Z$_.`-]|[^\x00-\x7F])+)\s*\)*"
    )).expect("table statement pattern");
}

/// Classifies a statement as [`Operation::Write`] or [`Operation::Read`].
pub fn classify(sql: &str) -> Operation {
    if is_write_query(sql) {
        Operation::Write
    } else {
        Operation::Read
    }
}

/// True when the statement could alter anything.
///
/// Any write keyword as a whole token wins; otherwise only statements starting
/// with SELECT, SHOW, DESCRIBE, DESC or EXPLAIN are reads.
pub fn is_write_query(sql: &str) -> bool {
    let trimmed = sql.trim_start_matches(['\r', '\n', '\t', ' ', '(']);

    if MAYBE_WRITE.is_match(trimmed) {
        return true;
    }

    !READ_PREFIX.is_match(trimmed)
}

/// Extracts the primary table a statement touches, if one can be found.
pub fn extract_table(sql: &str) -> Option<String> {
    // Collapse parenthesized groups unless they hold a subquery.
    let query = PARENTHESIZED.replace_all(sql, |caps: &regex::Captures<'_>| {
        let inner = &caps[1];
        if starts_with_select(inner) {
            caps[0].to_string()
        } else {
            "()".to_string()
        }
    });

    if let Some(caps) = COMMON_TABLE.captures(&query) {
        return Some(caps[1].replace('`', ""));
    }

    if let Some(caps) = SHOW_WHERE_NAME.captures(&query) {
        return Some(caps[1].to_string());
    }

    if let Some(caps) = SHOW_LIKE.captures(&query) {
        return Some(caps[1].replace("\\_", "_"));
    }

    if let Some(caps) = OTHER_TABLE.captures(&query) {
        return Some(caps[1].replace('`', ""));
    }

    None
}

/// Table name used for routing; statements without one use [`NO_TABLE`].
pub fn routing_table(sql: &str) -> String {
    extract_table(sql)
        .filter(|table| !table.is_empty())
        .unwrap_or_else(|| NO_TABLE.to_string())
}

fn starts_with_select(fragment: &str) -> bool {
    fragment
        .trim_start()
        .get(..6)
        .is_some_and(|head| head.eq_ignore_ascii_case("select"))
}
