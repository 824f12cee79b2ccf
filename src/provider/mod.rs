//! Model provider seam.

pub mod http;

#[cfg(feature = "responses")]
pub mod responses;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ProviderConfig;
use crate::decode::{FrameDecoder, FrameStream, ResponsesDecoder};
use crate::dispatch::ToolOutput;
use crate::error::SpotterError;

/// What a round submits to the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RoundInput {
    UserMessage(String),
    ToolOutputs(Vec<ToolOutput>),
}

/// A request that opens one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRequest {
    /// Response the new round continues from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
    pub input: RoundInput,
}

impl RoundRequest {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            previous_response_id: None,
            input: RoundInput::UserMessage(text.into()),
        }
    }

    pub fn tool_outputs(outputs: Vec<ToolOutput>) -> Self {
        Self {
            previous_response_id: None,
            input: RoundInput::ToolOutputs(outputs),
        }
    }

    pub fn with_previous_response_id(mut self, id: Option<String>) -> Self {
        self.previous_response_id = id;
        self
    }

    pub fn is_continuation(&self) -> bool {
        matches!(self.input, RoundInput::ToolOutputs(_))
    }
}

/// Core trait implemented by model providers.
#[async_trait]
pub trait ConversationProvider: Send + Sync {
    /// Provider name (e.g. "openai-responses").
    fn provider_name(&self) -> &str;

    /// Start streaming a round. Returns raw frames; decoding is the engine's job.
    async fn open_round(&self, request: &RoundRequest) -> Result<FrameStream, SpotterError>;

    /// A fresh decoder for one round of this provider's frames.
    fn decoder(&self) -> Box<dyn FrameDecoder> {
        Box::new(ResponsesDecoder::new())
    }
}

/// Create the configured provider.
#[allow(unused_variables)]
pub fn create_provider(
    config: &ProviderConfig,
) -> Result<std::sync::Arc<dyn ConversationProvider>, SpotterError> {
    #[cfg(feature = "responses")]
    {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| SpotterError::Authentication("Missing OPENAI_API_KEY".into()))?;
        let mut provider =
            responses::ResponsesProvider::new(config.model.clone(), api_key, config.base_url.clone())
                .with_tools(config.tools.clone());
        if let Some(instructions) = &config.instructions {
            provider = provider.with_instructions(instructions.clone());
        }
        Ok(std::sync::Arc::new(provider))
    }
    #[cfg(not(feature = "responses"))]
    {
        Err(SpotterError::UnsupportedOperation(
            "no provider enabled via feature flags".into(),
        ))
    }
}
