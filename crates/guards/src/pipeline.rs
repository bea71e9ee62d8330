//! Two-Phase Guard Pipeline
//!
//! Runs the deterministic checks on one generated SQL statement:
//! 1. SAFETY - static rules (`SafetyRules`)
//! 2. JOIN - every `ON` equality must follow a foreign key in the schema graph
//!
//! A safety failure short-circuits: the join phase is reported as skipped.

use std::time::Instant;

use query_cascade_core::SchemaGraph;
use tracing::debug;

use crate::joins::extract_join_conditions;
use crate::models::{GuardKind, GuardReport, GuardResult, Violation};
use crate::safety::SafetyRules;

// ============================================================================
// Pipeline
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct GuardPipeline {
    rules: SafetyRules,
}

impl GuardPipeline {
    pub fn new(rules: SafetyRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &SafetyRules {
        &self.rules
    }

    /// Run both phases against `sql`.
    pub fn run(&self, sql: &str, graph: &SchemaGraph) -> GuardReport {
        let safety = self.run_safety(sql);
        if safety.is_failure() {
            debug!("Safety guard failed, skipping join guard");
            return GuardReport::new(vec![
                safety,
                GuardResult::skipped(GuardKind::Join, "Skipped: safety check failed"),
            ]);
        }

        let join = self.run_joins(sql, graph);
        GuardReport::new(vec![safety, join])
    }

    // ========================================================================
    // Phases
    // ========================================================================

    fn run_safety(&self, sql: &str) -> GuardResult {
        let start = Instant::now();
        let violations = self.rules.check(sql);
        let duration_ms = start.elapsed().as_millis() as u64;

        if violations.is_empty() {
            GuardResult::passed(GuardKind::Safety, "Safety rules passed", duration_ms)
        } else {
            GuardResult::failed(GuardKind::Safety, violations, duration_ms)
        }
    }

    fn run_joins(&self, sql: &str, graph: &SchemaGraph) -> GuardResult {
        let start = Instant::now();
        let conditions = extract_join_conditions(sql);
        if conditions.is_empty() {
            return GuardResult::passed(
                GuardKind::Join,
                "No join conditions",
                start.elapsed().as_millis() as u64,
            );
        }

        let mut violations = Vec::new();
        let mut checked = 0usize;
        for condition in &conditions {
            // CTE and subquery names are not schema tables
            if !graph.contains_table(&condition.left_table)
                || !graph.contains_table(&condition.right_table)
            {
                debug!("Skipping join check for derived table in {}", condition);
                continue;
            }

            checked += 1;
            let verdict = graph.validate_join(
                &condition.left_table,
                &condition.left_column,
                &condition.right_table,
                &condition.right_column,
            );
            if !verdict.valid {
                violations.push(Violation::join(
                    format!("JOIN {} is invalid: {}", condition, verdict.diagnostic),
                    verdict.suggested_path.map(|p| p.describe()),
                ));
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        if violations.is_empty() {
            GuardResult::passed(
                GuardKind::Join,
                format!("{} join condition(s) follow foreign keys", checked),
                duration_ms,
            )
        } else {
            GuardResult::failed(GuardKind::Join, violations, duration_ms)
        }
    }
}
