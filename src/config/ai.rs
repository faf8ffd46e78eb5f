// src/config/ai.rs
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::env;

use crate::ai::budget::{BudgetCaps, Pricing};

fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    300
}
fn default_max_items_per_run() -> usize {
    50
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Per stage, per run.
    #[serde(default = "default_max_items_per_run")]
    pub max_items_per_run: usize,
    /// Allowed classification labels; empty disables the classification stage.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Candidate order; the router rotates its starting point over this list.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_items_per_run: default_max_items_per_run(),
            labels: Vec::new(),
            providers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Any OpenAI-compatible chat completions endpoint (OpenAI, OpenRouter, Groq, ...).
    Openai,
    Anthropic,
    Mock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    /// Single-model shorthand; merged into `models` on load.
    #[serde(default)]
    pub model: String,
    /// Every model tried under this id. They share one set of caps.
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Literal key, or "ENV" / absent to read `<ID>_API_KEY`.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub max_calls: Option<u32>,
    #[serde(default)]
    pub max_spend: Option<f64>,
    #[serde(default)]
    pub price_input_per_1k: f64,
    #[serde(default)]
    pub price_output_per_1k: f64,
}

impl ProviderConfig {
    /// `openrouter` → `OPENROUTER_API_KEY`, `my-groq` → `MY_GROQ_API_KEY`.
    pub fn env_key_name(&self) -> String {
        let stem: String = self
            .id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("{stem}_API_KEY")
    }

    /// Missing credentials for a real provider are a configuration error.
    pub fn resolve_api_key(&self) -> Result<Option<String>> {
        if self.kind == ProviderKind::Mock {
            return Ok(None);
        }
        match self.api_key.as_deref().map(str::trim) {
            Some(k) if !k.is_empty() && !k.eq_ignore_ascii_case("env") => Ok(Some(k.to_string())),
            _ => {
                let var = self.env_key_name();
                match env::var(&var) {
                    Ok(v) if !v.trim().is_empty() => Ok(Some(v.trim().to_string())),
                    _ => bail!("Missing {var} env var for provider {}", self.id),
                }
            }
        }
    }

    pub fn caps(&self) -> BudgetCaps {
        BudgetCaps {
            max_calls: self.max_calls,
            max_spend: self.max_spend,
        }
    }

    pub fn pricing(&self) -> Pricing {
        Pricing {
            input_per_1k: self.price_input_per_1k,
            output_per_1k: self.price_output_per_1k,
        }
    }
}

impl AiConfig {
    pub(crate) fn normalize(&mut self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.temperature) {
            self.temperature = default_temperature();
        }
        self.max_tokens = self.max_tokens.max(16);

        let mut ids = BTreeSet::new();
        for p in &mut self.providers {
            p.id = p.id.trim().to_lowercase();
            if p.id.is_empty() {
                bail!("provider with empty id");
            }
            let mut models = Vec::with_capacity(p.models.len() + 1);
            for m in std::iter::once(&p.model).chain(p.models.iter()) {
                let m = m.trim();
                if !m.is_empty() && !models.iter().any(|x: &String| x == m) {
                    models.push(m.to_string());
                }
            }
            let Some(first) = models.first() else {
                bail!("provider {} has no model", p.id);
            };
            p.model = first.clone();
            p.models = models;
            if !ids.insert(p.id.clone()) {
                bail!("duplicate provider id {:?}", p.id);
            }
        }
        if self.enabled && self.providers.is_empty() {
            bail!("ai is enabled but no providers are configured");
        }

        let mut seen = BTreeSet::new();
        self.labels = std::mem::take(&mut self.labels)
            .into_iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty() && seen.insert(l.to_lowercase()))
            .collect();
        Ok(())
    }
}
