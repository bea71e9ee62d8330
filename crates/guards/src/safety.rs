//! SQL Safety Rules
//!
//! Static checks on generated SQL: read-only statement, single statement,
//! forbidden keywords, bounded `LIMIT`, no wildcard projection.
//!
//! Keyword scanning runs on a sanitized view of the statement in which string
//! literals, quoted identifiers and comments are blanked out, so
//! `WHERE Name = 'DROP'` is not a violation. A keyword directly followed by
//! `(` is a function call (SQLite's `replace(X, Y, Z)`), not a statement.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::Violation;

fn default_forbidden_keywords() -> Vec<String> {
    [
        "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE", "REPLACE", "ATTACH",
        "DETACH", "PRAGMA", "GRANT", "REVOKE", "VACUUM",
    ]
    .iter()
    .map(|k| k.to_string())
    .collect()
}

fn default_true() -> bool {
    true
}

fn default_max_limit() -> Option<u64> {
    Some(1000)
}

/// Configurable static rules for generated SQL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyRules {
    /// Keywords that may not appear outside literals/comments (case-insensitive)
    #[serde(default = "default_forbidden_keywords")]
    pub forbidden_keywords: Vec<String>,
    /// Every statement must carry a LIMIT clause
    #[serde(default = "default_true")]
    pub require_limit: bool,
    /// Largest LIMIT value accepted
    #[serde(default = "default_max_limit")]
    pub max_limit: Option<u64>,
    /// Reject `SELECT *` and `t.*` projections
    #[serde(default = "default_true")]
    pub forbid_select_star: bool,
    #[serde(default)]
    pub allow_multiple_statements: bool,
}

impl Default for SafetyRules {
    fn default() -> Self {
        Self {
            forbidden_keywords: default_forbidden_keywords(),
            require_limit: true,
            max_limit: default_max_limit(),
            forbid_select_star: true,
            allow_multiple_statements: false,
        }
    }
}

impl SafetyRules {
    /// Run every rule and return all violations (empty when the SQL is safe).
    pub fn check(&self, sql: &str) -> Vec<Violation> {
        let view = sanitize(sql, false);
        let mut violations = Vec::new();

        let statements = view
            .split(';')
            .filter(|s| !s.trim().is_empty())
            .count();
        if statements == 0 {
            violations.push(Violation::safety("empty", "Query is empty"));
            return violations;
        }
        if statements > 1 && !self.allow_multiple_statements {
            violations.push(Violation::safety(
                "multiple_statements",
                format!(
                    "Only a single SQL statement is allowed (found {})",
                    statements
                ),
            ));
        }

        let tokens = word_spans(&view);
        let words: Vec<String> = tokens.iter().map(|(w, _)| w.to_uppercase()).collect();

        match words.first().map(String::as_str) {
            Some("SELECT") | Some("WITH") => {}
            Some(other) => violations.push(Violation::safety(
                "not_select",
                format!("Query must start with SELECT or WITH (found '{}')", other),
            )),
            None => violations.push(Violation::safety("not_select", "Query has no statement")),
        }

        let forbidden: HashSet<String> = self
            .forbidden_keywords
            .iter()
            .map(|k| k.to_uppercase())
            .collect();
        let mut reported = HashSet::new();
        for (word, (_, end)) in words.iter().zip(&tokens) {
            if forbidden.contains(word)
                && !is_function_call(&view, *end)
                && reported.insert(word.clone())
            {
                violations.push(Violation::safety(
                    "forbidden_keyword",
                    format!("Forbidden keyword '{}'", word),
                ));
            }
        }

        if self.forbid_select_star && has_select_star(&view) {
            violations.push(Violation::safety(
                "select_star",
                "SELECT * is not allowed; list the needed columns explicitly",
            ));
        }

        let has_limit = words.iter().any(|w| w == "LIMIT");
        if self.require_limit && !has_limit {
            let message = match self.max_limit {
                Some(max) => format!("Query must include a LIMIT clause (at most {})", max),
                None => "Query must include a LIMIT clause".to_string(),
            };
            violations.push(Violation::safety("missing_limit", message));
        }

        if let Some(max) = self.max_limit {
            for value in limit_values(&view) {
                if value > max {
                    violations.push(Violation::safety(
                        "limit_too_large",
                        format!("LIMIT {} exceeds the maximum of {}", value, max),
                    ));
                }
            }
        }

        violations
    }

    pub fn is_safe(&self, sql: &str) -> bool {
        self.check(sql).is_empty()
    }
}

/// Blank out string literals and comments; quoted identifiers are unquoted.
///
/// The result keeps statement structure (keywords, identifiers, operators) so
/// it can be scanned for aliases and join conditions.
pub fn strip_literals_and_comments(sql: &str) -> String {
    sanitize(sql, true)
}

fn sanitize(sql: &str, keep_identifiers: bool) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                read_quoted(&mut chars, '\'');
                out.push_str("''");
            }
            '"' | '`' => {
                let ident = read_quoted(&mut chars, c);
                if keep_identifiers && is_simple_identifier(&ident) {
                    out.push_str(&ident);
                } else {
                    out.push(' ');
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }

    out
}

/// Consume a quoted run up to its closing quote; a doubled quote is an escape.
fn read_quoted(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, quote: char) -> String {
    let mut content = String::new();
    while let Some(c) = chars.next() {
        if c == quote {
            if chars.peek() == Some(&quote) {
                chars.next();
                content.push(quote);
                continue;
            }
            break;
        }
        content.push(c);
    }
    content
}

fn is_simple_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Words of the statement, each with the byte offset just past it.
fn word_spans(sql: &str) -> Vec<(&str, usize)> {
    let mut spans = Vec::new();
    let mut start = None;
    for (i, c) in sql.char_indices() {
        let in_word = c.is_alphanumeric() || c == '_';
        match (in_word, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                spans.push((&sql[s..i], i));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        spans.push((&sql[s..], sql.len()));
    }
    spans
}

fn is_function_call(sql: &str, word_end: usize) -> bool {
    sql[word_end..].trim_start().starts_with('(')
}

fn select_star_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)\bSELECT\s+(?:DISTINCT\s+|ALL\s+)?(?:[A-Za-z_]\w*\s*\.\s*)?\*",
            r"(?i),\s*(?:[A-Za-z_]\w*\s*\.\s*)?\*\s*(?:,|\bFROM\b)",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

fn limit_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)\bLIMIT\s+(\d+)").ok())
        .as_ref()
}

fn has_select_star(sql: &str) -> bool {
    select_star_patterns().iter().any(|re| re.is_match(sql))
}

fn limit_values(sql: &str) -> Vec<u64> {
    let Some(re) = limit_pattern() else {
        return Vec::new();
    };
    re.captures_iter(sql)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().parse::<u64>().unwrap_or(u64::MAX))
        .collect()
}
