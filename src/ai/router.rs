use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{info, warn};

use crate::ai::budget::{BudgetGuard, Pricing};
use crate::ai::{ensure_metrics_described, GenerationRequest, ProviderCallResult, TextProvider};
use crate::error::{Attempt, AttemptOutcome, RouterError};

/// One (provider, model) pair the router may try.
#[derive(Clone)]
pub struct Candidate {
    pub provider_id: String,
    pub model: String,
    pub pricing: Pricing,
    pub client: Arc<dyn TextProvider>,
}

impl Candidate {
    pub fn new(
        provider_id: impl Into<String>,
        model: impl Into<String>,
        client: Arc<dyn TextProvider>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            model: model.into(),
            pricing: Pricing::default(),
            client,
        }
    }

    pub fn with_pricing(mut self, pricing: Pricing) -> Self {
        self.pricing = pricing;
        self
    }
}

impl std::fmt::Debug for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Candidate")
            .field("provider_id", &self.provider_id)
            .field("model", &self.model)
            .field("kind", &self.client.kind())
            .finish()
    }
}

/// Tries candidates in rotation order until one answers. The start position advances by
/// one per invocation so load spreads across providers over a run.
pub struct ProviderRouter {
    candidates: Vec<Candidate>,
    offset: AtomicUsize,
    budget: BudgetGuard,
}

impl ProviderRouter {
    pub fn new(candidates: Vec<Candidate>, budget: BudgetGuard) -> Self {
        ensure_metrics_described();
        Self {
            candidates,
            offset: AtomicUsize::new(0),
            budget,
        }
    }

    pub fn with_offset(self, offset: usize) -> Self {
        self.offset.store(offset, Ordering::SeqCst);
        self
    }

    /// Index the next invocation will start from.
    pub fn next_start(&self) -> usize {
        match self.candidates.len() {
            0 => 0,
            n => self.offset.load(Ordering::SeqCst) % n,
        }
    }

    pub fn budget(&self) -> &BudgetGuard {
        &self.budget
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub async fn invoke(&self, req: &GenerationRequest) -> Result<ProviderCallResult, RouterError> {
        let n = self.candidates.len();
        if n == 0 {
            return Err(RouterError::NoCandidates);
        }
        let start = self.offset.fetch_add(1, Ordering::SeqCst) % n;
        let est_input = req.estimated_input_tokens();
        let mut attempts = Vec::with_capacity(n);

        for i in 0..n {
            let cand = &self.candidates[(start + i) % n];
            let provider = cand.provider_id.as_str();
            let est_cost = cand.pricing.estimate(est_input, req.max_tokens);

            if !self.budget.admit(provider, est_cost) {
                info!(provider, model = %cand.model, outcome = "budget_veto", est_cost, "skipping provider");
                counter!("ai_budget_vetoes_total", "provider" => provider.to_string()).increment(1);
                attempts.push(Attempt {
                    provider_id: cand.provider_id.clone(),
                    model: cand.model.clone(),
                    outcome: AttemptOutcome::Vetoed,
                });
                continue;
            }

            let t0 = Instant::now();
            let res = cand.client.generate(&cand.model, req).await;
            histogram!("ai_call_ms", "provider" => provider.to_string())
                .record(t0.elapsed().as_secs_f64() * 1000.0);

            match res {
                Ok(generation) => {
                    let cost = cand.pricing.estimate(generation.usage.input, generation.usage.output);
                    self.budget.record(provider, cost);
                    counter!("ai_calls_total", "provider" => provider.to_string(), "outcome" => "ok")
                        .increment(1);
                    counter!("ai_tokens_total", "provider" => provider.to_string())
                        .increment(u64::from(generation.usage.total));
                    info!(
                        provider,
                        model = %cand.model,
                        outcome = "ok",
                        tokens = generation.usage.total,
                        cost,
                        "provider call succeeded"
                    );
                    return Ok(ProviderCallResult {
                        text: generation.text,
                        provider_id: cand.provider_id.clone(),
                        model: cand.model.clone(),
                        tokens_used: generation.usage,
                    });
                }
                Err(e) => {
                    // The request went out, so it counts against max_calls; spend is only
                    // known from a successful response.
                    self.budget.record(provider, 0.0);
                    counter!("ai_calls_total", "provider" => provider.to_string(), "outcome" => "error")
                        .increment(1);
                    warn!(
                        provider,
                        model = %cand.model,
                        outcome = "error",
                        status = ?e.status(),
                        error = %e,
                        "provider call failed; trying next candidate"
                    );
                    attempts.push(Attempt {
                        provider_id: cand.provider_id.clone(),
                        model: cand.model.clone(),
                        outcome: AttemptOutcome::Failed(e.to_string()),
                    });
                }
            }
        }

        counter!("ai_router_exhausted_total").increment(1);
        warn!(attempts = attempts.len(), "all provider candidates exhausted");
        Err(RouterError::Exhausted { attempts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::budget::BudgetCaps;
    use crate::ai::providers::MockProvider;

    fn cand(id: &str, p: Arc<MockProvider>) -> Candidate {
        Candidate::new(id, format!("{id}-model"), p)
    }

    #[tokio::test]
    async fn rotates_past_failures_and_advances_offset() {
        let a = Arc::new(MockProvider::failing(500));
        let b = Arc::new(MockProvider::failing(429));
        let c = Arc::new(MockProvider::fixed("from c"));
        let router = ProviderRouter::new(
            vec![cand("a", a.clone()), cand("b", b.clone()), cand("c", c.clone())],
            BudgetGuard::new(),
        )
        .with_offset(1);

        let out = router.invoke(&GenerationRequest::new("hi")).await.unwrap();
        assert_eq!(out.provider_id, "c");
        assert_eq!(out.model, "c-model");
        assert_eq!(out.text, "from c");
        assert_eq!(router.next_start(), 2);
        assert_eq!(a.calls(), 0);
        assert_eq!(b.calls(), 1);
    }

    #[tokio::test]
    async fn veto_skips_network_call() {
        let a = Arc::new(MockProvider::fixed("ok"));
        let guard = BudgetGuard::new().with_caps(
            "a",
            BudgetCaps {
                max_calls: Some(2),
                max_spend: None,
            },
        );
        let router = ProviderRouter::new(vec![cand("a", a.clone())], guard);
        let req = GenerationRequest::new("x");
        router.invoke(&req).await.unwrap();
        router.invoke(&req).await.unwrap();

        let err = router.invoke(&req).await.unwrap_err();
        assert!(err.all_vetoed());
        assert_eq!(a.calls(), 2);
        assert_eq!(router.budget().usage("a").calls, 2);
    }

    #[tokio::test]
    async fn empty_list_and_empty_completion() {
        let router = ProviderRouter::new(Vec::new(), BudgetGuard::new());
        assert!(matches!(
            router.invoke(&GenerationRequest::new("x")).await,
            Err(RouterError::NoCandidates)
        ));

        let empty = Arc::new(MockProvider::fixed("  "));
        let router = ProviderRouter::new(vec![cand("e", empty)], BudgetGuard::new());
        match router.invoke(&GenerationRequest::new("x")).await {
            Err(RouterError::Exhausted { attempts }) => {
                assert_eq!(attempts.len(), 1);
                assert!(matches!(attempts[0].outcome, AttemptOutcome::Failed(_)));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(router.budget().usage("e").calls, 1);
    }

    #[tokio::test]
    async fn failed_calls_count_against_the_call_cap() {
        let a = Arc::new(MockProvider::failing(429));
        let guard = BudgetGuard::new().with_caps(
            "a",
            BudgetCaps {
                max_calls: Some(2),
                max_spend: None,
            },
        );
        let router = ProviderRouter::new(vec![cand("a", a.clone())], guard);
        let req = GenerationRequest::new("x");
        for _ in 0..2 {
            let err = router.invoke(&req).await.unwrap_err();
            assert!(!err.all_vetoed());
        }

        let err = router.invoke(&req).await.unwrap_err();
        assert!(err.all_vetoed());
        assert_eq!(a.calls(), 2);
        let used = router.budget().usage("a");
        assert_eq!(used.calls, 2);
        assert_eq!(used.estimated_cost, 0.0);
    }
}
