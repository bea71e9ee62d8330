//! JOIN Condition Extraction
//!
//! Pulls `alias.column = alias.column` equalities out of `JOIN ... ON`
//! clauses and resolves the aliases back to table names using the `FROM` and
//! `JOIN` clauses of the same statement.
//!
//! Comma-joined `FROM` lists (`FROM Artist ar, Album al WHERE ...`) join
//! through the `WHERE` clause instead, so for those statements qualified
//! equalities between two different tables in `WHERE` are collected too.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::safety::strip_literals_and_comments;

/// Words that can follow a table name and must not be taken for an alias.
const NON_ALIAS_KEYWORDS: &[&str] = &[
    "WHERE", "JOIN", "ON", "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "OUTER", "NATURAL", "USING",
    "GROUP", "ORDER", "LIMIT", "OFFSET", "HAVING", "UNION", "EXCEPT", "INTERSECT", "WINDOW", "AS",
];

/// A table referenced in a FROM or JOIN clause
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

/// One `left_table.left_column = right_table.right_column` condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinCondition {
    pub left_table: String,
    pub left_column: String,
    pub right_table: String,
    pub right_column: String,
}

impl std::fmt::Display for JoinCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{} = {}.{}",
            self.left_table, self.left_column, self.right_table, self.right_column
        )
    }
}

fn join_target_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)\bJOIN\s+([A-Za-z_]\w*)").ok())
        .as_ref()
}

/// Body of a FROM clause up to the first join, filter or grouping keyword.
fn from_list_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"(?is)\bFROM\b(.*?)(?:\b(?:WHERE|JOIN|INNER|LEFT|RIGHT|FULL|CROSS|NATURAL|GROUP|ORDER|LIMIT|HAVING|UNION|EXCEPT|INTERSECT|WINDOW)\b|[;()]|$)",
            )
            .ok()
        })
        .as_ref()
}

/// One `name [AS] alias` item of a FROM list
fn from_item_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"(?i)^\s*([A-Za-z_]\w*)(?:\s+(?:AS\s+)?([A-Za-z_]\w*))?\s*$").ok()
        })
        .as_ref()
}

fn alias_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)^\s+(?:AS\s+)?([A-Za-z_]\w*)").ok())
        .as_ref()
}

fn where_clause_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"(?is)\bWHERE\b(.*?)(?:\b(?:GROUP|ORDER|LIMIT|HAVING|UNION|EXCEPT|INTERSECT|WINDOW)\b|;|$)",
            )
            .ok()
        })
        .as_ref()
}

fn on_clause_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"(?is)\bON\b(.*?)(?:\b(?:JOIN|INNER|LEFT|RIGHT|FULL|CROSS|NATURAL|WHERE|GROUP|ORDER|LIMIT|HAVING|UNION|EXCEPT|INTERSECT|WINDOW)\b|;|$)",
            )
            .ok()
        })
        .as_ref()
}

fn equality_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"([A-Za-z_]\w*)\s*\.\s*([A-Za-z_]\w*)\s*=\s*([A-Za-z_]\w*)\s*\.\s*([A-Za-z_]\w*)",
            )
            .ok()
        })
        .as_ref()
}

fn is_alias(word: &str) -> bool {
    !NON_ALIAS_KEYWORDS
        .iter()
        .any(|k| k.eq_ignore_ascii_case(word))
}

/// Tables named in FROM lists and JOIN clauses, with their aliases, in
/// statement order.
pub fn extract_table_refs(sql: &str) -> Vec<TableRef> {
    let stripped = strip_literals_and_comments(sql);
    table_refs(&stripped)
        .into_iter()
        .map(|(_, table_ref)| table_ref)
        .collect()
}

/// Table refs of an already stripped statement with their byte offsets.
fn table_refs(stripped: &str) -> Vec<(usize, TableRef)> {
    let (Some(join_re), Some(alias_re), Some(from_re), Some(item_re)) = (
        join_target_pattern(),
        alias_pattern(),
        from_list_pattern(),
        from_item_pattern(),
    ) else {
        return Vec::new();
    };

    let mut refs = Vec::new();

    for list in from_re.captures_iter(stripped) {
        let Some(body) = list.get(1) else {
            continue;
        };
        let mut offset = body.start();
        for item in body.as_str().split(',') {
            if let Some(caps) = item_re.captures(item) {
                let table = caps[1].to_string();
                if !table.eq_ignore_ascii_case("SELECT") {
                    let alias = caps
                        .get(2)
                        .map(|m| m.as_str())
                        .filter(|a| is_alias(a))
                        .map(str::to_string);
                    refs.push((offset, TableRef { table, alias }));
                }
            }
            offset += item.len() + 1;
        }
    }

    // The alias is matched separately so a following `JOIN` is never consumed
    for caps in join_re.captures_iter(stripped) {
        let Some(name) = caps.get(1) else {
            continue;
        };
        let alias = alias_re
            .captures(&stripped[name.end()..])
            .and_then(|a| a.get(1))
            .map(|m| m.as_str())
            .filter(|a| is_alias(a))
            .map(str::to_string);
        refs.push((
            name.start(),
            TableRef {
                table: name.as_str().to_string(),
                alias,
            },
        ));
    }

    refs.sort_by_key(|(offset, _)| *offset);
    refs
}

/// Whether any FROM list joins tables with commas.
fn has_comma_join(stripped: &str) -> bool {
    let (Some(from_re), Some(item_re)) = (from_list_pattern(), from_item_pattern()) else {
        return false;
    };
    from_re.captures_iter(stripped).any(|list| {
        list.get(1).is_some_and(|body| {
            body.as_str()
                .split(',')
                .filter(|item| item_re.is_match(item))
                .count()
                > 1
        })
    })
}

/// Equalities between qualified columns inside ON clauses, with aliases
/// resolved to table names. When a FROM list is comma-joined, equalities in
/// WHERE that relate two different tables are included. Qualifiers that match
/// no FROM/JOIN entry are kept as written.
pub fn extract_join_conditions(sql: &str) -> Vec<JoinCondition> {
    let stripped = strip_literals_and_comments(sql);
    let (Some(on_re), Some(where_re), Some(eq_re)) =
        (on_clause_pattern(), where_clause_pattern(), equality_pattern())
    else {
        return Vec::new();
    };

    let mut aliases: HashMap<String, String> = HashMap::new();
    for (_, table_ref) in table_refs(&stripped) {
        aliases.insert(table_ref.table.to_lowercase(), table_ref.table.clone());
        if let Some(alias) = &table_ref.alias {
            aliases.insert(alias.to_lowercase(), table_ref.table.clone());
        }
    }
    let resolve = |qualifier: &str| -> String {
        aliases
            .get(&qualifier.to_lowercase())
            .cloned()
            .unwrap_or_else(|| qualifier.to_string())
    };
    let equalities = |body: &str| -> Vec<JoinCondition> {
        eq_re
            .captures_iter(body)
            .map(|caps| JoinCondition {
                left_table: resolve(&caps[1]),
                left_column: caps[2].to_string(),
                right_table: resolve(&caps[3]),
                right_column: caps[4].to_string(),
            })
            .collect()
    };

    let mut conditions: Vec<JoinCondition> = Vec::new();
    for clause in on_re.captures_iter(&stripped) {
        if let Some(body) = clause.get(1) {
            for condition in equalities(body.as_str()) {
                if !conditions.contains(&condition) {
                    conditions.push(condition);
                }
            }
        }
    }

    if has_comma_join(&stripped) {
        for clause in where_re.captures_iter(&stripped) {
            let Some(body) = clause.get(1) else {
                continue;
            };
            for condition in equalities(body.as_str()) {
                if !condition.left_table.eq_ignore_ascii_case(&condition.right_table)
                    && !conditions.contains(&condition)
                {
                    conditions.push(condition);
                }
            }
        }
    }

    conditions
}
