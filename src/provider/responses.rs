//! OpenAI Responses API provider.

use async_trait::async_trait;
use tracing::debug;

use super::http::{bearer_headers, shared_client, status_to_error};
use super::{ConversationProvider, RoundInput, RoundRequest};
use crate::decode::{sse_frames, FrameStream};
use crate::error::SpotterError;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Streams rounds from `POST {base_url}/responses`.
///
/// Continuations chain through `previous_response_id`, so each request only
/// carries the new input: the user's text or the batch of tool outputs.
#[derive(Debug, Clone)]
pub struct ResponsesProvider {
    model: String,
    api_key: String,
    base_url: String,
    instructions: Option<String>,
    tools: Vec<serde_json::Value>,
}

impl ResponsesProvider {
    pub fn new(model: impl Into<String>, api_key: impl Into<String>, base_url: Option<String>) -> Self {
        Self {
            model: model.into(),
            api_key: api_key.into(),
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            instructions: None,
            tools: Vec::new(),
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Tool declarations sent verbatim with every request.
    pub fn with_tools(mut self, tools: Vec<serde_json::Value>) -> Self {
        self.tools = tools;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request_body(&self, request: &RoundRequest) -> serde_json::Value {
        let input: Vec<serde_json::Value> = match &request.input {
            RoundInput::UserMessage(text) => {
                vec![serde_json::json!({ "role": "user", "content": text })]
            }
            RoundInput::ToolOutputs(outputs) => outputs
                .iter()
                .map(|o| {
                    serde_json::json!({
                        "type": "function_call_output",
                        "call_id": o.call_id,
                        "output": o.output,
                    })
                })
                .collect(),
        };

        let mut body = serde_json::json!({
            "model": self.model,
            "input": input,
            "stream": true,
        });
        if let Some(prev) = &request.previous_response_id {
            body["previous_response_id"] = serde_json::json!(prev);
        }
        if let Some(instructions) = &self.instructions {
            body["instructions"] = serde_json::json!(instructions);
        }
        if !self.tools.is_empty() {
            body["tools"] = serde_json::json!(self.tools);
            body["parallel_tool_calls"] = serde_json::json!(true);
        }
        body
    }
}

#[async_trait]
impl ConversationProvider for ResponsesProvider {
    fn provider_name(&self) -> &str {
        "openai-responses"
    }

    async fn open_round(&self, request: &RoundRequest) -> Result<FrameStream, SpotterError> {
        let body = self.build_request_body(request);
        let url = format!("{}/responses", self.base_url);

        debug!(
            model = %self.model,
            continuation = request.is_continuation(),
            previous_response_id = ?request.previous_response_id,
            "opening Responses round"
        );

        let resp = shared_client()
            .post(&url)
            .headers(bearer_headers(&self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status, &body_text));
        }

        Ok(sse_frames(resp.bytes_stream()))
    }
}
