//! Continuation manager: owns the provider round and resubmits tool outputs.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::decode::{decode_frames, failed_stream, EventStream};
use crate::dispatch::ToolOutput;
use crate::error::SpotterError;
use crate::provider::{ConversationProvider, RoundRequest};
use crate::types::ToolCallRef;
use crate::util::retry::RetryPolicy;

/// Tracks the current round and the tool outputs it is waiting on.
///
/// A round is opened either by a user message ([`start_round`](Self::start_round))
/// or by resubmitting every stored output
/// ([`continue_after_tool_execution`](Self::continue_after_tool_execution)).
/// Rounds chain through the provider-issued response id. A new user round
/// only chains from a settled response: one that completed with every tool
/// call it requested answered.
pub struct ContinuationManager {
    provider: Arc<dyn ConversationProvider>,
    retry: RetryPolicy,
    response_id: Option<String>,
    settled_response_id: Option<String>,
    expected: Vec<String>,
    outputs: HashMap<String, ToolOutput>,
    rounds_opened: usize,
    continuations: usize,
}

impl ContinuationManager {
    pub fn new(provider: Arc<dyn ConversationProvider>, retry: RetryPolicy) -> Self {
        Self {
            provider,
            retry,
            response_id: None,
            settled_response_id: None,
            expected: Vec::new(),
            outputs: HashMap::new(),
            rounds_opened: 0,
            continuations: 0,
        }
    }

    pub fn provider(&self) -> &Arc<dyn ConversationProvider> {
        &self.provider
    }

    /// Response id of the most recent round, once the provider assigned one.
    pub fn response_id(&self) -> Option<&str> {
        self.response_id.as_deref()
    }

    pub fn set_response_id(&mut self, id: impl Into<String>) {
        self.response_id = Some(id.into());
    }

    /// Response id the next user round chains from.
    pub fn settled_response_id(&self) -> Option<&str> {
        self.settled_response_id.as_deref()
    }

    /// Mark the current response as safe to chain a new user round from.
    ///
    /// Only valid once the response completed without unanswered tool calls.
    pub fn settle_response(&mut self) {
        if self.response_id.is_some() {
            self.settled_response_id = self.response_id.clone();
        }
    }

    pub fn rounds_opened(&self) -> usize {
        self.rounds_opened
    }

    /// Number of continuation rounds requested so far.
    pub fn continuation_count(&self) -> usize {
        self.continuations
    }

    /// Open a round for a new user message.
    pub async fn start_round(&mut self, text: &str) -> EventStream {
        self.abandon_round();
        let request =
            RoundRequest::user(text).with_previous_response_id(self.settled_response_id.clone());
        self.open(request).await
    }

    /// Declare the calls the current round must answer before continuing.
    pub fn expect_outputs<'a>(&mut self, calls: impl IntoIterator<Item = &'a ToolCallRef>) {
        for call in calls {
            if !self.expected.contains(&call.id) {
                self.expected.push(call.id.clone());
            }
        }
    }

    /// Store the output for one call.
    ///
    /// Idempotent per call id within a round: the first stored output wins and
    /// later ones are ignored. Returns whether the output was stored.
    pub fn store_output(&mut self, output: ToolOutput) -> bool {
        if !self.expected.contains(&output.call_id) {
            warn!(call_id = %output.call_id, "output for a call this round did not request");
            return false;
        }
        if self.outputs.contains_key(&output.call_id) {
            debug!(call_id = %output.call_id, "output already stored; ignoring duplicate");
            return false;
        }
        debug!(
            call_id = %output.call_id,
            tool = %output.tool_name,
            is_error = output.is_error(),
            "stored tool output"
        );
        self.outputs.insert(output.call_id.clone(), output);
        true
    }

    pub fn stored_output(&self, call_id: &str) -> Option<&ToolOutput> {
        self.outputs.get(call_id)
    }

    /// Call ids still waiting for an output, in request order.
    pub fn outstanding(&self) -> Vec<&str> {
        self.expected
            .iter()
            .filter(|id| !self.outputs.contains_key(*id))
            .map(String::as_str)
            .collect()
    }

    pub fn has_pending_calls(&self) -> bool {
        !self.expected.is_empty()
    }

    /// Resubmit every stored output and open the next round.
    ///
    /// Calling this with no pending calls, or before every pending call has an
    /// output, is a protocol violation and opens nothing.
    pub async fn continue_after_tool_execution(&mut self) -> Result<EventStream, SpotterError> {
        if self.expected.is_empty() {
            error!("continuation requested with no pending tool calls");
            return Err(SpotterError::Protocol(
                "continuation requested with no pending tool calls".into(),
            ));
        }
        let outstanding = self.outstanding();
        if !outstanding.is_empty() {
            let missing = outstanding.join(", ");
            error!(outstanding = %missing, "continuation requested before every tool output was stored");
            return Err(SpotterError::Protocol(format!(
                "continuation requested with unstored outputs for: {missing}"
            )));
        }

        let expected = std::mem::take(&mut self.expected);
        let mut outputs = std::mem::take(&mut self.outputs);
        let batch: Vec<ToolOutput> = expected
            .iter()
            .filter_map(|id| outputs.remove(id))
            .collect();

        self.continuations += 1;
        debug!(
            outputs = batch.len(),
            previous_response_id = ?self.response_id,
            continuation = self.continuations,
            "requesting continuation"
        );

        let request =
            RoundRequest::tool_outputs(batch).with_previous_response_id(self.response_id.clone());
        Ok(self.open(request).await)
    }

    /// Drop pending calls and stored outputs without continuing, and roll the
    /// response chain back to the last settled response.
    pub fn abandon_round(&mut self) {
        if !self.expected.is_empty() {
            debug!(pending = self.expected.len(), "abandoning round with pending tool calls");
        }
        if self.response_id != self.settled_response_id {
            debug!(
                unsettled = ?self.response_id,
                settled = ?self.settled_response_id,
                "rolling response chain back"
            );
            self.response_id = self.settled_response_id.clone();
        }
        self.expected.clear();
        self.outputs.clear();
    }

    async fn open(&mut self, request: RoundRequest) -> EventStream {
        self.rounds_opened += 1;
        let provider = Arc::clone(&self.provider);
        let opened = self
            .retry
            .execute(|| {
                let provider = Arc::clone(&provider);
                let request = request.clone();
                async move { provider.open_round(&request).await }
            })
            .await;

        match opened {
            Ok(frames) => decode_frames(frames, provider.decoder()),
            Err(err) => {
                error!(
                    provider = provider.provider_name(),
                    continuation = request.is_continuation(),
                    error = %err,
                    "failed to open round"
                );
                failed_stream(err.to_string())
            }
        }
    }
}

impl std::fmt::Debug for ContinuationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContinuationManager")
            .field("provider", &self.provider.provider_name())
            .field("response_id", &self.response_id)
            .field("settled_response_id", &self.settled_response_id)
            .field("expected", &self.expected)
            .field("stored", &self.outputs.len())
            .field("rounds_opened", &self.rounds_opened)
            .field("continuations", &self.continuations)
            .finish()
    }
}
