// src/ai_bootstrap.rs
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::ai::providers::{AnthropicProvider, MockProvider, OpenAiCompatProvider};
use crate::ai::{BudgetGuard, Candidate, ProviderRouter, TextProvider};
use crate::config::ai::{AiConfig, ProviderConfig, ProviderKind};
use crate::config::HttpConfig;

pub const ENV_AI_TEST_MODE: &str = "AI_TEST_MODE";

fn mock_mode() -> bool {
    std::env::var(ENV_AI_TEST_MODE)
        .map(|v| v.eq_ignore_ascii_case("mock"))
        .unwrap_or(false)
}

/// Router plus the settings the analysis stages need, built once per run.
pub struct AiRuntime {
    pub cfg: AiConfig,
    pub router: ProviderRouter,
}

impl AiRuntime {
    /// `None` when AI is disabled. With `AI_TEST_MODE=mock` every candidate is a mock, so no
    /// credentials are needed.
    pub fn from_config(cfg: &AiConfig, http: &HttpConfig) -> Result<Option<Self>> {
        if !cfg.enabled {
            info!("ai disabled; analysis stages skipped");
            return Ok(None);
        }
        let mock = mock_mode();
        let client = if mock {
            None
        } else {
            Some(http.provider_client()?)
        };

        let mut guard = BudgetGuard::new();
        let mut candidates = Vec::with_capacity(cfg.providers.len());
        for p in &cfg.providers {
            let provider: Arc<dyn TextProvider> = match &client {
                None => Arc::new(MockProvider::echo()),
                Some(http) => build_provider(p, http.clone())?,
            };
            guard = guard.with_caps(&p.id, p.caps());
            let models = if p.models.is_empty() {
                std::slice::from_ref(&p.model)
            } else {
                p.models.as_slice()
            };
            for model in models {
                candidates.push(
                    Candidate::new(p.id.as_str(), model.as_str(), provider.clone())
                        .with_pricing(p.pricing()),
                );
            }
        }
        info!(
            providers = candidates.len(),
            mock,
            labels = cfg.labels.len(),
            "ai router ready"
        );
        Ok(Some(Self {
            cfg: cfg.clone(),
            router: ProviderRouter::new(candidates, guard),
        }))
    }
}

fn build_provider(p: &ProviderConfig, http: reqwest::Client) -> Result<Arc<dyn TextProvider>> {
    let key = p
        .resolve_api_key()
        .with_context(|| format!("provider {}", p.id))?;
    Ok(match (p.kind, key) {
        (ProviderKind::Mock, _) => Arc::new(MockProvider::echo()),
        (ProviderKind::Openai, Some(key)) => {
            let mut c = OpenAiCompatProvider::new(http, key);
            if let Some(url) = p.base_url.as_deref() {
                c = c.with_base_url(url);
            }
            Arc::new(c)
        }
        (ProviderKind::Anthropic, Some(key)) => {
            let mut c = AnthropicProvider::new(http, key);
            if let Some(url) = p.base_url.as_deref() {
                c = c.with_base_url(url);
            }
            Arc::new(c)
        }
        (_, None) => anyhow::bail!("provider {} has no api key", p.id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn cfg() -> AiConfig {
        AiConfig {
            enabled: true,
            providers: vec![ProviderConfig {
                id: "nokeyprov".into(),
                kind: ProviderKind::Openai,
                model: "gpt-4o-mini".into(),
                models: vec!["gpt-4o-mini".into()],
                base_url: None,
                api_key: None,
                max_calls: Some(3),
                max_spend: None,
                price_input_per_1k: 0.0,
                price_output_per_1k: 0.0,
            }],
            ..Default::default()
        }
    }

    #[serial_test::serial]
    #[test]
    fn disabled_yields_no_runtime() {
        let rt = AiRuntime::from_config(&AiConfig::default(), &HttpConfig::default()).unwrap();
        assert!(rt.is_none());
    }

    #[serial_test::serial]
    #[test]
    fn missing_key_is_fatal_unless_mocked() {
        env::remove_var("NOKEYPROV_API_KEY");
        env::remove_var(ENV_AI_TEST_MODE);
        assert!(AiRuntime::from_config(&cfg(), &HttpConfig::default()).is_err());

        env::set_var(ENV_AI_TEST_MODE, "mock");
        let rt = AiRuntime::from_config(&cfg(), &HttpConfig::default())
            .unwrap()
            .unwrap();
        env::remove_var(ENV_AI_TEST_MODE);
        assert_eq!(rt.router.candidates().len(), 1);
        assert_eq!(rt.router.candidates()[0].client.kind(), "mock");
    }

    #[serial_test::serial]
    #[test]
    fn each_model_becomes_a_candidate_under_one_provider_id() {
        env::set_var(ENV_AI_TEST_MODE, "mock");
        let mut cfg = cfg();
        cfg.providers[0].models = vec!["llama".into(), "qwen".into()];
        let rt = AiRuntime::from_config(&cfg, &HttpConfig::default())
            .unwrap()
            .unwrap();
        env::remove_var(ENV_AI_TEST_MODE);
        let c = rt.router.candidates();
        assert_eq!(c.len(), 2);
        assert!(c.iter().all(|c| c.provider_id == "nokeyprov"));
        assert_eq!(c[1].model, "qwen");
    }
}
