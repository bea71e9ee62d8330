//! Per-Query Call Budget
//!
//! Counts LLM calls and tokens spent on behalf of one query. Owned by the
//! query's pipeline state and passed to the gateway on every call.

use serde::{Deserialize, Serialize};

/// Which limit a budget check tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetLimit {
    Calls,
    Tokens,
}

impl std::fmt::Display for BudgetLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BudgetLimit::Calls => write!(f, "calls"),
            BudgetLimit::Tokens => write!(f, "tokens"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallBudget {
    pub max_calls: u32,
    pub calls_made: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub tokens_used: u32,
}

impl Default for CallBudget {
    fn default() -> Self {
        Self::new(5, None)
    }
}

impl CallBudget {
    pub fn new(max_calls: u32, max_tokens: Option<u32>) -> Self {
        Self {
            max_calls,
            calls_made: 0,
            max_tokens,
            tokens_used: 0,
        }
    }

    /// Check that one more call is allowed.
    pub fn check(&self) -> Result<(), BudgetLimit> {
        if self.calls_made >= self.max_calls {
            return Err(BudgetLimit::Calls);
        }
        if let Some(max) = self.max_tokens {
            if self.tokens_used >= max {
                return Err(BudgetLimit::Tokens);
            }
        }
        Ok(())
    }

    pub fn has_remaining(&self) -> bool {
        self.check().is_ok()
    }

    pub fn remaining_calls(&self) -> u32 {
        self.max_calls.saturating_sub(self.calls_made)
    }

    /// Tokens left under the cap, `None` when uncapped.
    pub fn remaining_tokens(&self) -> Option<u32> {
        self.max_tokens
            .map(|max| max.saturating_sub(self.tokens_used))
    }

    pub fn record_call(&mut self) {
        self.calls_made += 1;
    }

    pub fn record_tokens(&mut self, tokens: u32) {
        self.tokens_used = self.tokens_used.saturating_add(tokens);
    }
}
