use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::info;

/// Per-provider ceilings for one run. `None` = no cap on that axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetCaps {
    pub max_calls: Option<u32>,
    pub max_spend: Option<f64>,
}

/// Price per 1k tokens, in whatever currency the caps use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl Pricing {
    pub fn estimate(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        f64::from(input_tokens) / 1000.0 * self.input_per_1k
            + f64::from(output_tokens) / 1000.0 * self.output_per_1k
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ProviderUsage {
    pub calls: u32,
    pub estimated_cost: f64,
}

/// Per-run circuit breaker on calls/spend per provider. Not a billing ledger: counters
/// start at zero with every process and are never persisted.
#[derive(Debug, Default)]
pub struct BudgetGuard {
    caps: HashMap<String, BudgetCaps>,
    usage: Mutex<HashMap<String, ProviderUsage>>,
}

impl BudgetGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_caps(mut self, provider: &str, caps: BudgetCaps) -> Self {
        self.caps.insert(provider.to_string(), caps);
        self
    }

    /// Would one more call costing `est_cost` stay within `provider`'s caps?
    pub fn admit(&self, provider: &str, est_cost: f64) -> bool {
        let Some(caps) = self.caps.get(provider) else {
            return true;
        };
        let used = self.usage(provider);
        if let Some(max) = caps.max_calls {
            if used.calls.saturating_add(1) > max {
                return false;
            }
        }
        if let Some(max) = caps.max_spend {
            if used.estimated_cost + est_cost > max {
                return false;
            }
        }
        true
    }

    /// Count a completed call. Unconditional: a call already made is always charged.
    pub fn record(&self, provider: &str, actual_cost: f64) {
        let mut g = self.usage.lock().unwrap_or_else(PoisonError::into_inner);
        let u = g.entry(provider.to_string()).or_default();
        u.calls = u.calls.saturating_add(1);
        u.estimated_cost += actual_cost.max(0.0);
    }

    pub fn usage(&self, provider: &str) -> ProviderUsage {
        let g = self.usage.lock().unwrap_or_else(PoisonError::into_inner);
        g.get(provider).copied().unwrap_or_default()
    }

    pub fn snapshot(&self) -> BTreeMap<String, ProviderUsage> {
        let g = self.usage.lock().unwrap_or_else(PoisonError::into_inner);
        g.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }

    pub fn log_status(&self) {
        for (provider, used) in self.snapshot() {
            let caps = self.caps.get(&provider).copied().unwrap_or_default();
            info!(
                provider = %provider,
                calls = used.calls,
                estimated_cost = used.estimated_cost,
                max_calls = ?caps.max_calls,
                max_spend = ?caps.max_spend,
                "budget status"
            );
        }
    }
}
