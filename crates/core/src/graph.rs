//! Schema Graph / FK-Path Validator
//!
//! Treats the schema's foreign keys as a directed graph and answers two
//! questions about generated SQL:
//!
//! - `validate_join`: does `t1.c1 = t2.c2` follow an actual foreign key?
//! - `find_path`: what is the shortest chain of tables connecting two tables?
//!
//! Joins are direction-agnostic, so path search walks the undirected view
//! (forward and reverse adjacency). When several shortest paths exist the
//! result is deterministic: neighbours are expanded in lexicographic order of
//! (case-folded table name, from column, to column).
//!
//! The graph is immutable after construction; a schema reload builds a new one.

use std::collections::{BTreeMap, HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::schema::SchemaSnapshot;

/// Default bound on path length for join-path search.
pub const DEFAULT_MAX_HOPS: usize = 3;

/// A directed foreign-key relationship: `from_table.from_column -> to_table.to_column`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FkEdge {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
}

impl FkEdge {
    pub fn new(
        from_table: impl Into<String>,
        from_column: impl Into<String>,
        to_table: impl Into<String>,
        to_column: impl Into<String>,
    ) -> Self {
        Self {
            from_table: from_table.into(),
            from_column: from_column.into(),
            to_table: to_table.into(),
            to_column: to_column.into(),
        }
    }

    /// Whether `a.ac = b.bc` matches this edge in either direction.
    pub fn matches(&self, a: &str, ac: &str, b: &str, bc: &str) -> bool {
        let forward = eq(&self.from_table, a)
            && eq(&self.from_column, ac)
            && eq(&self.to_table, b)
            && eq(&self.to_column, bc);
        let backward = eq(&self.from_table, b)
            && eq(&self.from_column, bc)
            && eq(&self.to_table, a)
            && eq(&self.to_column, ac);
        forward || backward
    }

    /// Whether this edge connects the two tables (either direction).
    pub fn connects(&self, a: &str, b: &str) -> bool {
        (eq(&self.from_table, a) && eq(&self.to_table, b))
            || (eq(&self.from_table, b) && eq(&self.to_table, a))
    }

    /// The equality condition this edge implies, e.g. `Album.ArtistId = Artist.ArtistId`.
    pub fn join_condition(&self) -> String {
        format!(
            "{}.{} = {}.{}",
            self.from_table, self.from_column, self.to_table, self.to_column
        )
    }
}

impl std::fmt::Display for FkEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{} -> {}.{}",
            self.from_table, self.from_column, self.to_table, self.to_column
        )
    }
}

/// A path through the FK graph. `tables.len() == edges.len() + 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinPath {
    pub tables: Vec<String>,
    pub edges: Vec<FkEdge>,
}

impl JoinPath {
    pub fn hops(&self) -> usize {
        self.edges.len()
    }

    /// Tables strictly between the endpoints.
    pub fn intermediates(&self) -> &[String] {
        if self.tables.len() <= 2 {
            &[]
        } else {
            &self.tables[1..self.tables.len() - 1]
        }
    }

    /// `Artist -> Album -> Track`
    pub fn describe(&self) -> String {
        self.tables.join(" -> ")
    }

    /// Join conditions along the path, in order.
    pub fn join_conditions(&self) -> Vec<String> {
        self.edges.iter().map(FkEdge::join_condition).collect()
    }
}

/// Outcome of a join validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinVerdict {
    pub valid: bool,
    pub diagnostic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_path: Option<JoinPath>,
}

impl JoinVerdict {
    fn valid(diagnostic: String) -> Self {
        Self {
            valid: true,
            diagnostic,
            suggested_path: None,
        }
    }

    fn invalid(diagnostic: String, suggested_path: Option<JoinPath>) -> Self {
        Self {
            valid: false,
            diagnostic,
            suggested_path,
        }
    }
}

/// Foreign-key graph with forward and reverse adjacency.
#[derive(Debug, Clone)]
pub struct SchemaGraph {
    edges: Vec<FkEdge>,
    /// table key -> indices of edges leaving that table
    forward: HashMap<String, Vec<usize>>,
    /// table key -> indices of edges arriving at that table
    reverse: HashMap<String, Vec<usize>>,
    /// table key -> display name
    tables: BTreeMap<String, String>,
    max_hops: usize,
}

impl Default for SchemaGraph {
    fn default() -> Self {
        Self::from_edges(Vec::new())
    }
}

impl SchemaGraph {
    /// Build the graph from every table's foreign-key declarations.
    pub fn from_snapshot(snapshot: &SchemaSnapshot) -> Self {
        let edges = snapshot
            .tables
            .iter()
            .flat_map(|table| {
                table.foreign_keys.iter().map(move |fk| {
                    FkEdge::new(&table.name, &fk.column, &fk.ref_table, &fk.ref_column)
                })
            })
            .collect();

        let mut graph = Self::from_edges(edges);
        for table in &snapshot.tables {
            graph
                .tables
                .entry(key(&table.name))
                .or_insert_with(|| table.name.clone());
        }
        graph
    }

    pub fn from_edges(edges: Vec<FkEdge>) -> Self {
        let mut forward: HashMap<String, Vec<usize>> = HashMap::new();
        let mut reverse: HashMap<String, Vec<usize>> = HashMap::new();
        let mut tables = BTreeMap::new();

        for (idx, edge) in edges.iter().enumerate() {
            forward.entry(key(&edge.from_table)).or_default().push(idx);
            reverse.entry(key(&edge.to_table)).or_default().push(idx);
            tables
                .entry(key(&edge.from_table))
                .or_insert_with(|| edge.from_table.clone());
            tables
                .entry(key(&edge.to_table))
                .or_insert_with(|| edge.to_table.clone());
        }

        Self {
            edges,
            forward,
            reverse,
            tables,
            max_hops: DEFAULT_MAX_HOPS,
        }
    }

    /// Override the hop bound used by `validate_join`.
    pub fn with_max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops;
        self
    }

    pub fn max_hops(&self) -> usize {
        self.max_hops
    }

    pub fn edges(&self) -> &[FkEdge] {
        &self.edges
    }

    /// Known table names, sorted case-insensitively.
    pub fn tables(&self) -> Vec<&str> {
        self.tables.values().map(String::as_str).collect()
    }

    pub fn contains_table(&self, table: &str) -> bool {
        self.tables.contains_key(&key(table))
    }

    /// Edges touching `table` in either direction.
    pub fn edges_for(&self, table: &str) -> Vec<&FkEdge> {
        let k = key(table);
        let outgoing = self.forward.get(&k).into_iter().flatten();
        let incoming = self.reverse.get(&k).into_iter().flatten();
        let mut indices: Vec<usize> = outgoing.chain(incoming).copied().collect();
        indices.sort_unstable();
        indices.dedup();
        indices.into_iter().map(|i| &self.edges[i]).collect()
    }

    /// One line per edge, for prompts and introspection answers.
    pub fn describe_relationships(&self) -> String {
        if self.edges.is_empty() {
            return "No foreign-key relationships declared.".to_string();
        }
        self.edges
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Shortest path between two tables over the undirected FK graph, bounded
    /// by `max_hops` edges. `find_path(T, T)` is always a zero-edge path.
    pub fn find_path(&self, start: &str, end: &str, max_hops: usize) -> Option<JoinPath> {
        let start_key = key(start);
        let end_key = key(end);

        if start_key == end_key {
            return Some(JoinPath {
                tables: vec![self.display_name(start)],
                edges: Vec::new(),
            });
        }
        if !self.contains_table(start) || !self.contains_table(end) {
            return None;
        }

        // table key -> (previous table key, edge index)
        let mut parent: HashMap<String, (String, usize)> = HashMap::new();
        let mut depth: HashMap<String, usize> = HashMap::new();
        let mut queue = VecDeque::new();

        depth.insert(start_key.clone(), 0);
        queue.push_back(start_key.clone());

        while let Some(current) = queue.pop_front() {
            let current_depth = depth.get(&current).copied().unwrap_or(0);
            if current_depth >= max_hops {
                continue;
            }

            for (neighbor, edge_idx) in self.sorted_neighbors(&current) {
                if depth.contains_key(&neighbor) {
                    continue;
                }
                depth.insert(neighbor.clone(), current_depth + 1);
                parent.insert(neighbor.clone(), (current.clone(), edge_idx));

                if neighbor == end_key {
                    return Some(self.rebuild_path(&start_key, &end_key, &parent));
                }
                queue.push_back(neighbor);
            }
        }

        None
    }

    /// Check whether `table1.col1 = table2.col2` follows a foreign key.
    pub fn validate_join(&self, table1: &str, col1: &str, table2: &str, col2: &str) -> JoinVerdict {
        for table in [table1, table2] {
            if !self.tables.is_empty() && !self.contains_table(table) {
                return JoinVerdict::invalid(format!("Unknown table '{}'", table), None);
            }
        }

        let direct: Vec<&FkEdge> = self
            .edges
            .iter()
            .filter(|e| e.connects(table1, table2))
            .collect();

        if let Some(edge) = direct.iter().find(|e| e.matches(table1, col1, table2, col2)) {
            return JoinVerdict::valid(format!(
                "{}.{} = {}.{} follows foreign key {}",
                table1, col1, table2, col2, edge
            ));
        }

        if let Some(edge) = direct.first() {
            let path = JoinPath {
                tables: vec![self.display_name(table1), self.display_name(table2)],
                edges: vec![(*edge).clone()],
            };
            return JoinVerdict::invalid(
                format!(
                    "{} and {} are related through {}, not {}.{} = {}.{}; join on {}",
                    table1,
                    table2,
                    edge,
                    table1,
                    col1,
                    table2,
                    col2,
                    edge.join_condition()
                ),
                Some(path),
            );
        }

        if key(table1) == key(table2) {
            if eq(col1, col2) {
                return JoinVerdict::valid(format!(
                    "{}.{} joined to itself on the same column",
                    table1, col1
                ));
            }
            return JoinVerdict::invalid(
                format!(
                    "No foreign key relates {}.{} to {}.{}",
                    table1, col1, table2, col2
                ),
                None,
            );
        }

        match self.find_path(table1, table2, self.max_hops) {
            Some(path) => JoinVerdict::invalid(
                format!(
                    "{} and {} are not directly related; join through {} using {}",
                    table1,
                    table2,
                    path.intermediates().join(", "),
                    path.join_conditions().join(" AND ")
                ),
                Some(path),
            ),
            None => JoinVerdict::invalid(
                format!(
                    "No relationship exists between {} and {} within {} hops",
                    table1, table2, self.max_hops
                ),
                None,
            ),
        }
    }

    /// Neighbours of `table_key` across both adjacency maps, in deterministic order.
    fn sorted_neighbors(&self, table_key: &str) -> Vec<(String, usize)> {
        let mut neighbors: Vec<(String, usize)> = Vec::new();
        if let Some(out) = self.forward.get(table_key) {
            neighbors.extend(out.iter().map(|&i| (key(&self.edges[i].to_table), i)));
        }
        if let Some(inc) = self.reverse.get(table_key) {
            neighbors.extend(inc.iter().map(|&i| (key(&self.edges[i].from_table), i)));
        }
        neighbors.sort_by(|(a_table, a_idx), (b_table, b_idx)| {
            let a = &self.edges[*a_idx];
            let b = &self.edges[*b_idx];
            a_table
                .cmp(b_table)
                .then_with(|| key(&a.from_column).cmp(&key(&b.from_column)))
                .then_with(|| key(&a.to_column).cmp(&key(&b.to_column)))
                .then_with(|| a_idx.cmp(b_idx))
        });
        neighbors
    }

    fn rebuild_path(
        &self,
        start_key: &str,
        end_key: &str,
        parent: &HashMap<String, (String, usize)>,
    ) -> JoinPath {
        let mut tables = vec![self.display_name(end_key)];
        let mut edges = Vec::new();
        let mut cursor = end_key.to_string();

        while cursor != start_key {
            let Some((prev, edge_idx)) = parent.get(&cursor) else {
                break;
            };
            edges.push(self.edges[*edge_idx].clone());
            tables.push(self.display_name(prev));
            cursor = prev.clone();
        }

        tables.reverse();
        edges.reverse();
        JoinPath { tables, edges }
    }

    fn display_name(&self, table: &str) -> String {
        self.tables
            .get(&key(table))
            .cloned()
            .unwrap_or_else(|| table.to_string())
    }
}

fn key(name: &str) -> String {
    name.to_ascii_lowercase()
}

fn eq(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}
