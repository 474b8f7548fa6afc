//! # Token usage accounting
//!
//! Every oracle call reports a [`Usage`]; the runner folds them into a
//! [`UsageStats`] that is returned with the run result, broken down by model
//! and by agent. Nested agent-tool runs keep their own accounting.
//!
//! ```rust
//! use agents_runtime::usage::{Usage, UsageStats};
//!
//! let mut stats = UsageStats::new();
//! stats.record("gpt-4o", "Triage", Usage::new(1200, 300));
//! stats.record("gpt-4o", "Billing", Usage::new(500, 150));
//!
//! assert_eq!(stats.total.total_tokens, 2150);
//! assert_eq!(stats.by_agent["Triage"].request_count, 1);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Add;

/// Token usage of a single oracle call.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    /// The number of tokens in the input prompt.
    pub prompt_tokens: usize,

    /// The number of tokens in the generated completion.
    pub completion_tokens: usize,

    /// The total number of tokens (prompt + completion).
    pub total_tokens: usize,

    /// The number of oracle requests made.
    pub request_count: usize,
}

impl Usage {
    pub fn new(prompt_tokens: usize, completion_tokens: usize) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            request_count: 1,
        }
    }

    /// A single request whose token counts are unknown.
    pub fn request() -> Self {
        Self {
            request_count: 1,
            ..Self::default()
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn add_usage(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
        self.request_count += other.request_count;
    }
}

impl Add for Usage {
    type Output = Self;

    fn add(mut self, other: Self) -> Self {
        self.add_usage(&other);
        self
    }
}

/// Usage aggregated across a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageStats {
    pub total: Usage,
    pub by_model: BTreeMap<String, Usage>,
    pub by_agent: BTreeMap<String, Usage>,
}

impl UsageStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one oracle call made for `agent` with `model`.
    pub fn record(&mut self, model: &str, agent: &str, usage: Usage) {
        self.total.add_usage(&usage);

        self.by_model
            .entry(model.to_string())
            .or_default()
            .add_usage(&usage);

        self.by_agent
            .entry(agent.to_string())
            .or_default()
            .add_usage(&usage);
    }

    /// Human-readable summary report.
    pub fn summary(&self) -> String {
        let mut report = format!(
            "Usage Summary:\n\
             Total Tokens: {}\n\
             Total Requests: {}\n",
            self.total.total_tokens, self.total.request_count,
        );

        if !self.by_model.is_empty() {
            report.push_str("\nBy Model:\n");
            for (model, usage) in &self.by_model {
                report.push_str(&format!(
                    "  {}: {} tokens, {} requests\n",
                    model, usage.total_tokens, usage.request_count
                ));
            }
        }

        if !self.by_agent.is_empty() {
            report.push_str("\nBy Agent:\n");
            for (agent, usage) in &self.by_agent {
                report.push_str(&format!(
                    "  {}: {} tokens, {} requests\n",
                    agent, usage.total_tokens, usage.request_count
                ));
            }
        }

        report
    }
}
