//! Text-generation providers, the per-run budget guard and the rotating router over them.

pub mod budget;
pub mod providers;
pub mod router;

pub use budget::{BudgetCaps, BudgetGuard, Pricing, ProviderUsage};
pub use router::{Candidate, ProviderRouter};

use async_trait::async_trait;
use metrics::{describe_counter, describe_histogram};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u32,
    pub output: u32,
    pub total: u32,
}

impl TokenUsage {
    pub fn new(input: u32, output: u32) -> Self {
        Self {
            input,
            output,
            total: input.saturating_add(output),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub preamble: Option<String>,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            preamble: None,
            prompt: prompt.into(),
            temperature: 0.2,
            max_tokens: 300,
        }
    }

    pub fn preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = Some(preamble.into());
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Rough pre-call input size: ~4 characters per token.
    pub fn estimated_input_tokens(&self) -> u32 {
        let chars = self.prompt.chars().count()
            + self.preamble.as_deref().map_or(0, |p| p.chars().count());
        u32::try_from(chars.div_ceil(4)).unwrap_or(u32::MAX)
    }
}

/// What one provider returned for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub usage: TokenUsage,
}

/// Uniform result of a routed invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderCallResult {
    pub text: String,
    pub provider_id: String,
    pub model: String,
    pub tokens_used: TokenUsage,
}

/// Low-level provider: does the remote call for one model.
#[async_trait]
pub trait TextProvider: Send + Sync {
    async fn generate(
        &self,
        model: &str,
        req: &GenerationRequest,
    ) -> Result<Generation, ProviderError>;
    fn kind(&self) -> &'static str;
}

pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "ai_calls_total",
            "Provider attempts, labelled by provider and outcome (ok|error)."
        );
        describe_counter!(
            "ai_budget_vetoes_total",
            "Attempts refused by the budget guard, labelled by provider."
        );
        describe_counter!(
            "ai_router_exhausted_total",
            "Router invocations where every candidate failed or was vetoed."
        );
        describe_counter!("ai_tokens_total", "Tokens reported by providers.");
        describe_histogram!("ai_call_ms", "Provider call latency in milliseconds.");
    });
}
