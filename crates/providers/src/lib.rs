//! LLM client implementations for codeloop.
//!
//! All clients implement the `codeloop_core::LlmClient` trait.
//! [`build_client`] turns the `[llm]` config section into a ready client.

pub mod budget;
pub mod fence;
pub mod openai_compat;

pub use budget::{BudgetedClient, ModelPricing, PricingTable};
pub use fence::FenceSplitter;
pub use openai_compat::OpenAiCompatClient;

use codeloop_config::LlmConfig;
use codeloop_core::provider::LlmClient;
use tracing::debug;

/// Build the configured client, wrapped in a budget cap when one is set.
pub fn build_client(config: &LlmConfig) -> Box<dyn LlmClient> {
    let client = OpenAiCompatClient::from_config(config);
    debug!(provider = %client.name(), model = %config.model, "Built LLM client");

    match config.max_budget {
        Some(max_usd) => Box::new(BudgetedClient::new(Box::new(client), max_usd)),
        None => Box::new(client),
    }
}
