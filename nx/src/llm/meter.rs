//! Token usage metering
//!
//! A shared handle that every LLM client reports usage into, keyed by
//! (model, agent). Increments are associative and commutative, so
//! interleaving across concurrent agents cannot skew the totals.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::types::TokenUsage;

/// Key for a usage bucket
pub type MeterKey = (String, String);

/// Process-wide token meter handle. Cheap to clone; clones share totals.
#[derive(Debug, Clone, Default)]
pub struct TokenMeter {
    inner: Arc<Mutex<HashMap<MeterKey, TokenUsage>>>,
}

impl TokenMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a usage sample for (model, agent)
    pub fn record(&self, model: &str, agent_id: &str, usage: &TokenUsage) {
        let mut inner = self.inner.lock().expect("token meter mutex poisoned");
        inner
            .entry((model.to_string(), agent_id.to_string()))
            .or_default()
            .add(usage);
    }

    /// Usage for a specific (model, agent) bucket
    pub fn by_key(&self, model: &str, agent_id: &str) -> TokenUsage {
        let inner = self.inner.lock().expect("token meter mutex poisoned");
        inner
            .get(&(model.to_string(), agent_id.to_string()))
            .copied()
            .unwrap_or_default()
    }

    /// Grand total across all buckets
    pub fn total(&self) -> TokenUsage {
        let inner = self.inner.lock().expect("token meter mutex poisoned");
        let mut total = TokenUsage::default();
        for usage in inner.values() {
            total.add(usage);
        }
        total
    }

    /// Total cost across all buckets, priced per bucket's model
    pub fn total_cost_usd(&self) -> f64 {
        let inner = self.inner.lock().expect("token meter mutex poisoned");
        inner.iter().map(|((model, _), usage)| usage.cost_usd(model)).sum()
    }

    /// Snapshot all buckets
    pub fn snapshot(&self) -> Vec<(MeterKey, TokenUsage)> {
        let inner = self.inner.lock().expect("token meter mutex poisoned");
        inner.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(input: u64, output: u64) -> TokenUsage {
        TokenUsage {
            input_tokens: input,
            output_tokens: output,
            ..Default::default()
        }
    }

    #[test]
    fn test_record_and_total() {
        let meter = TokenMeter::new();
        meter.record("sonnet", "agent-1", &usage(100, 10));
        meter.record("sonnet", "agent-2", &usage(50, 5));
        meter.record("opus", "agent-1", &usage(30, 3));

        assert_eq!(meter.by_key("sonnet", "agent-1"), usage(100, 10));
        let total = meter.total();
        assert_eq!(total.input_tokens, 180);
        assert_eq!(total.output_tokens, 18);
    }

    #[test]
    fn test_clones_share_totals() {
        let meter = TokenMeter::new();
        let clone = meter.clone();
        clone.record("sonnet", "a", &usage(10, 1));
        assert_eq!(meter.total().input_tokens, 10);
    }

    proptest::proptest! {
        /// Totals equal the sum of increments regardless of ordering or
        /// bucket interleaving.
        #[test]
        fn prop_totals_are_the_sum_of_increments(
            samples in proptest::collection::vec((0usize..4, 0u64..1000, 0u64..1000), 0..64),
        ) {
            let meter = TokenMeter::new();
            let mut expected_in = 0u64;
            let mut expected_out = 0u64;
            for (bucket, input, output) in samples {
                meter.record("sonnet", &format!("agent-{bucket}"), &usage(input, output));
                expected_in += input;
                expected_out += output;
            }
            let total = meter.total();
            proptest::prop_assert_eq!(total.input_tokens, expected_in);
            proptest::prop_assert_eq!(total.output_tokens, expected_out);
        }
    }

    #[tokio::test]
    async fn test_concurrent_increments_sum_exactly() {
        let meter = TokenMeter::new();
        let mut handles = Vec::new();
        for i in 0..8 {
            let m = meter.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    m.record("sonnet", &format!("agent-{}", i % 2), &usage(1, 1));
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(meter.total().input_tokens, 800);
        assert_eq!(meter.total().output_tokens, 800);
    }
}
