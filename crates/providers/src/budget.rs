//! Spend tracking and the session budget cap.
//!
//! Prices are in USD per 1 million tokens. [`BudgetedClient`] wraps any
//! [`LlmClient`], prices every streamed usage report and refuses new calls
//! once the accumulated spend reaches the cap.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use codeloop_core::error::ProviderError;
use codeloop_core::message::Turn;
use codeloop_core::provider::{ChunkStream, LlmChunk, LlmClient};
use tracing::{debug, warn};

/// Per-million-token pricing for a model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input_per_m: f64,
    pub output_per_m: f64,
}

impl ModelPricing {
    pub fn new(input_per_m: f64, output_per_m: f64) -> Self {
        Self {
            input_per_m,
            output_per_m,
        }
    }

    /// Compute cost for the given token counts.
    pub fn cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (input_tokens as f64 * self.input_per_m + output_tokens as f64 * self.output_per_m)
            / 1_000_000.0
    }
}

/// Model prices with provider-prefix tolerant lookup.
#[derive(Debug, Clone)]
pub struct PricingTable {
    prices: HashMap<String, ModelPricing>,
}

impl PricingTable {
    /// Create a pricing table with built-in model prices.
    pub fn with_defaults() -> Self {
        let mut prices = HashMap::new();

        // ── OpenAI ─────────────────────────────────────────────────
        prices.insert("gpt-4o".into(), ModelPricing::new(2.5, 10.0));
        prices.insert("gpt-4o-mini".into(), ModelPricing::new(0.15, 0.6));
        prices.insert("gpt-4-turbo".into(), ModelPricing::new(10.0, 30.0));
        prices.insert("gpt-4".into(), ModelPricing::new(30.0, 60.0));
        prices.insert("gpt-3.5-turbo".into(), ModelPricing::new(0.5, 1.5));
        prices.insert("o1".into(), ModelPricing::new(15.0, 60.0));
        prices.insert("o1-mini".into(), ModelPricing::new(3.0, 12.0));
        prices.insert("o3-mini".into(), ModelPricing::new(1.1, 4.4));

        // ── Anthropic ──────────────────────────────────────────────
        prices.insert("claude-3.5-sonnet".into(), ModelPricing::new(3.0, 15.0));
        prices.insert("claude-3.5-haiku".into(), ModelPricing::new(0.8, 4.0));

        // ── Groq ───────────────────────────────────────────────────
        prices.insert("llama-3.1-70b-versatile".into(), ModelPricing::new(0.59, 0.79));
        prices.insert("llama-3.1-8b-instant".into(), ModelPricing::new(0.05, 0.08));
        prices.insert("mixtral-8x7b-32768".into(), ModelPricing::new(0.24, 0.24));

        // ── DeepSeek ───────────────────────────────────────────────
        prices.insert("deepseek-chat".into(), ModelPricing::new(0.27, 1.1));

        Self { prices }
    }

    pub fn empty() -> Self {
        Self {
            prices: HashMap::new(),
        }
    }

    pub fn set(&mut self, model: impl Into<String>, pricing: ModelPricing) {
        self.prices.insert(model.into(), pricing);
    }

    /// Look up a model, ignoring any `provider/` prefix.
    pub fn get(&self, model: &str) -> Option<ModelPricing> {
        if let Some(p) = self.prices.get(model) {
            return Some(*p);
        }
        let bare = model.rsplit('/').next().unwrap_or(model);
        self.prices.get(bare).copied()
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Wraps a client and enforces a spend cap across its calls.
pub struct BudgetedClient {
    inner: Box<dyn LlmClient>,
    pricing: PricingTable,
    max_usd: f64,
    spent_usd: Arc<Mutex<f64>>,
}

impl BudgetedClient {
    pub fn new(inner: Box<dyn LlmClient>, max_usd: f64) -> Self {
        Self {
            inner,
            pricing: PricingTable::with_defaults(),
            max_usd,
            spent_usd: Arc::new(Mutex::new(0.0)),
        }
    }

    pub fn with_pricing(mut self, pricing: PricingTable) -> Self {
        self.pricing = pricing;
        self
    }

    /// Total spend so far, in USD.
    pub fn spent_usd(&self) -> f64 {
        self.spent_usd.lock().map(|s| *s).unwrap_or(0.0)
    }

    pub fn max_usd(&self) -> f64 {
        self.max_usd
    }
}

#[async_trait]
impl LlmClient for BudgetedClient {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    fn set_model(&mut self, model: &str) {
        self.inner.set_model(model);
    }

    fn supports_vision(&self) -> bool {
        self.inner.supports_vision()
    }

    async fn run(&self, turns: &[Turn]) -> std::result::Result<ChunkStream, ProviderError> {
        let spent = self.spent_usd();
        if spent >= self.max_usd {
            return Err(ProviderError::BudgetExceeded {
                spent_usd: spent,
                max_usd: self.max_usd,
            });
        }

        let mut upstream = self.inner.run(turns).await?;
        let pricing = self.pricing.get(self.inner.model());
        if pricing.is_none() {
            debug!(model = %self.inner.model(), "No pricing for model, spend not tracked");
        }

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let spent_usd = Arc::clone(&self.spent_usd);

        // Forward chunks, pricing each usage report on the way through
        tokio::spawn(async move {
            while let Some(item) = upstream.recv().await {
                if let (Ok(LlmChunk::Usage { usage }), Some(pricing)) = (&item, pricing) {
                    let cost = pricing.cost(usage.prompt_tokens, usage.completion_tokens);
                    match spent_usd.lock() {
                        Ok(mut total) => *total += cost,
                        Err(_) => warn!("Spend tracker poisoned"),
                    }
                }
                if tx.send(item).await.is_err() {
                    return;
                }
            }
        });

        Ok(rx)
    }
}
