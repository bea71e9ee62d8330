//! Schema Introspection
//!
//! Answers meta questions ("what columns does Track have?", "how are albums
//! related to artists?") straight from the schema snapshot and FK graph,
//! without generating SQL.

use query_cascade_core::{SchemaGraph, SchemaSnapshot, TableSchema};

use crate::models::pipeline::SchemaAnswerPayload;

/// Lowercased words of `text`, split on anything that is not alphanumeric
/// or `_`.
fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Whether `word` names `table`, allowing simple English plurals.
fn names_table(word: &str, table: &str) -> bool {
    let table = table.to_lowercase();
    if word == table || word == format!("{}s", table) || word == format!("{}es", table) {
        return true;
    }
    match table.strip_suffix('y') {
        Some(stem) => word == format!("{}ies", stem),
        None => false,
    }
}

/// Tables the question is about: hinted tables first, then tables named in
/// the question, in schema order.
pub fn mentioned_tables<'a>(
    question: &str,
    hinted: &[String],
    snapshot: &'a SchemaSnapshot,
) -> Vec<&'a TableSchema> {
    let words = words(question);
    let mut found: Vec<&TableSchema> = hinted
        .iter()
        .filter_map(|name| snapshot.table(name))
        .collect();

    for table in &snapshot.tables {
        if words.iter().any(|w| names_table(w, &table.name))
            && !found.iter().any(|t| t.name == table.name)
        {
            found.push(table);
        }
    }
    found
}

fn describe_table(table: &TableSchema, graph: &SchemaGraph) -> String {
    let columns: Vec<String> = table
        .columns
        .iter()
        .map(|c| {
            let mut col = format!("{} ({}", c.name, c.data_type);
            if c.primary_key {
                col.push_str(", primary key");
            }
            col.push(')');
            col
        })
        .collect();

    let mut text = format!("{} has columns: {}.", table.name, columns.join(", "));
    let edges = graph.edges_for(&table.name);
    if !edges.is_empty() {
        let links: Vec<String> = edges.iter().map(|e| e.join_condition()).collect();
        text.push_str(&format!(" Related through {}.", links.join("; ")));
    }
    text
}

/// Build a deterministic answer to a schema question.
pub fn answer_schema_question(
    question: &str,
    hinted: &[String],
    snapshot: &SchemaSnapshot,
    graph: &SchemaGraph,
) -> SchemaAnswerPayload {
    let mentioned = mentioned_tables(question, hinted, snapshot);

    if mentioned.is_empty() {
        let overview: Vec<String> = snapshot
            .tables
            .iter()
            .map(|t| format!("{} ({} columns)", t.name, t.columns.len()))
            .collect();
        let answer = format!(
            "The database has {} table(s): {}.\nRelationships:\n{}",
            snapshot.tables.len(),
            overview.join(", "),
            graph.describe_relationships()
        );
        return SchemaAnswerPayload {
            tables: snapshot.table_names().iter().map(|s| s.to_string()).collect(),
            answer,
        };
    }

    let mut paragraphs: Vec<String> = mentioned
        .iter()
        .map(|t| describe_table(t, graph))
        .collect();

    if let [first, rest @ ..] = mentioned.as_slice() {
        for other in rest {
            let line = match graph.find_path(&first.name, &other.name, graph.max_hops()) {
                Some(path) => format!(
                    "{} and {} connect via {} (join on {}).",
                    first.name,
                    other.name,
                    path.describe(),
                    path.join_conditions().join(" AND ")
                ),
                None => format!(
                    "No foreign-key path connects {} and {} within {} hops.",
                    first.name,
                    other.name,
                    graph.max_hops()
                ),
            };
            paragraphs.push(line);
        }
    }

    SchemaAnswerPayload {
        tables: mentioned.iter().map(|t| t.name.clone()).collect(),
        answer: paragraphs.join("\n"),
    }
}
