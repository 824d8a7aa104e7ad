use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::types::{Operation, TokenUsage};

/// USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

impl ModelPricing {
    pub const fn new(input_per_mtok: f64, output_per_mtok: f64) -> Self {
        Self {
            input_per_mtok,
            output_per_mtok,
        }
    }

    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        (usage.input_tokens as f64 * self.input_per_mtok
            + usage.output_tokens as f64 * self.output_per_mtok)
            / 1_000_000.0
    }
}

/// Per-model prices. Lookup is exact first, then the longest key that prefixes
/// the model name, then `default`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingTable {
    pub default: ModelPricing,
    pub models: BTreeMap<String, ModelPricing>,
}

impl Default for PricingTable {
    fn default() -> Self {
        let haiku = ModelPricing::new(0.80, 4.0);
        let models = [
            ("claude-3-5-haiku", haiku),
            ("claude-3-5-sonnet", ModelPricing::new(3.0, 15.0)),
            ("gpt-4o-mini", ModelPricing::new(0.15, 0.60)),
            ("gpt-4o", ModelPricing::new(2.50, 10.0)),
        ]
        .into_iter()
        .map(|(name, pricing)| (name.to_string(), pricing))
        .collect();
        Self {
            default: haiku,
            models,
        }
    }
}

impl PricingTable {
    pub fn for_model(&self, model: &str) -> ModelPricing {
        if let Some(pricing) = self.models.get(model) {
            return *pricing;
        }
        self.models
            .iter()
            .filter(|(name, _)| model.starts_with(name.as_str()))
            .max_by_key(|(name, _)| name.len())
            .map(|(_, pricing)| *pricing)
            .unwrap_or(self.default)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageBucket {
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

impl UsageBucket {
    fn record(&mut self, usage: &TokenUsage, cost: f64) {
        self.calls += 1;
        self.input_tokens += usage.input_tokens;
        self.output_tokens += usage.output_tokens;
        self.cost_usd += cost;
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub total: UsageBucket,
    pub failed_calls: u64,
    pub by_operation: BTreeMap<Operation, UsageBucket>,
    pub by_model: BTreeMap<String, UsageBucket>,
}

impl UsageSnapshot {
    pub fn avg_cost_per_call(&self) -> f64 {
        if self.total.calls == 0 {
            0.0
        } else {
            self.total.cost_usd / self.total.calls as f64
        }
    }

    pub fn avg_tokens_per_call(&self) -> f64 {
        if self.total.calls == 0 {
            0.0
        } else {
            self.total.total_tokens() as f64 / self.total.calls as f64
        }
    }
}

/// Cumulative usage for one client instance. Cleared only by [`UsageTracker::reset`].
#[derive(Debug, Default)]
pub struct UsageTracker {
    pricing: PricingTable,
    state: Mutex<UsageSnapshot>,
}

impl UsageTracker {
    pub fn new(pricing: PricingTable) -> Self {
        Self {
            pricing,
            state: Mutex::new(UsageSnapshot::default()),
        }
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    /// Record a successful call and return its estimated cost.
    pub fn record(&self, operation: Operation, model: &str, usage: &TokenUsage) -> f64 {
        let cost = self.pricing.for_model(model).cost(usage);
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.total.record(usage, cost);
        state.by_operation.entry(operation).or_default().record(usage, cost);
        state.by_model.entry(model.to_string()).or_default().record(usage, cost);
        cost
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.failed_calls += 1;
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn reset(&self) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = UsageSnapshot::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(input: u64, output: u64) -> TokenUsage {
        TokenUsage {
            input_tokens: input,
            output_tokens: output,
        }
    }

    #[test]
    fn cost_per_million_tokens() {
        let pricing = ModelPricing::new(3.0, 15.0);
        let cost = pricing.cost(&usage(1_000_000, 100_000));
        assert!((cost - 4.5).abs() < 1e-9);
    }

    #[test]
    fn pricing_lookup_prefers_longest_prefix() {
        let table = PricingTable::default();
        assert_eq!(table.for_model("gpt-4o-mini-2024-07-18"), ModelPricing::new(0.15, 0.60));
        assert_eq!(table.for_model("gpt-4o-2024-08-06"), ModelPricing::new(2.50, 10.0));
        assert_eq!(table.for_model("claude-3-5-sonnet-20241022"), ModelPricing::new(3.0, 15.0));
        assert_eq!(table.for_model("mystery-model"), table.default);
    }

    #[test]
    fn tracker_accumulates_and_breaks_down() {
        let tracker = UsageTracker::new(PricingTable::default());
        tracker.record(Operation::Extract, "claude-3-5-haiku-20241022", &usage(1000, 200));
        tracker.record(Operation::Extract, "claude-3-5-haiku-20241022", &usage(1000, 200));
        tracker.record(Operation::Report, "claude-3-5-sonnet-20241022", &usage(5000, 1000));
        tracker.record_failure();

        let snap = tracker.snapshot();
        assert_eq!(snap.total.calls, 3);
        assert_eq!(snap.total.total_tokens(), 8400);
        assert_eq!(snap.failed_calls, 1);
        assert_eq!(snap.by_operation[&Operation::Extract].calls, 2);
        assert_eq!(snap.by_model["claude-3-5-sonnet-20241022"].calls, 1);
        assert!(snap.avg_cost_per_call() > 0.0);
        assert!((snap.avg_tokens_per_call() - 2800.0).abs() < 1e-9);
    }

    #[test]
    fn reset_clears_counters() {
        let tracker = UsageTracker::new(PricingTable::default());
        tracker.record(Operation::Classify, "gpt-4o-mini", &usage(10, 10));
        tracker.reset();
        assert_eq!(tracker.snapshot(), UsageSnapshot::default());
    }
}
