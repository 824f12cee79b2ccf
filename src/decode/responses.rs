//! Decoder for Responses-API style JSON frames.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::{debug, trace};

use super::{FrameDecoder, RawFrame};
use crate::types::{SideChannelPayload, StreamEvent, ToolCallRef};

/// Stateful decoder for one response.
///
/// Tool calls whose arguments are finalized mid-response are held back and
/// released at `response.completed`: one call becomes [`StreamEvent::ToolCall`],
/// two or more (or any explicit `response.tool_calls` frame) become
/// [`StreamEvent::ToolCalls`].
#[derive(Debug, Default)]
pub struct ResponsesDecoder {
    response_id: Option<String>,
    /// item id -> (call id, tool name)
    items: HashMap<String, (String, String)>,
    /// call id -> streamed argument fragments
    arguments: HashMap<String, String>,
    finalized: Vec<ToolCallRef>,
    finalized_ids: HashSet<String>,
    explicit_batch: bool,
    saw_text_delta: bool,
}

impl ResponsesDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn on_frame(&mut self, event: &Value) -> Vec<StreamEvent> {
        let Some(kind) = event.get("type").and_then(Value::as_str) else {
            return vec![StreamEvent::error("malformed frame: missing type")];
        };

        match kind {
            "response.created" => {
                let id = response_id(event).unwrap_or_default();
                self.response_id = Some(id.clone());
                vec![StreamEvent::ResponseCreated { id }]
            }
            "response.output_text.delta" => match str_field(event, "delta") {
                Some(delta) if !delta.is_empty() => {
                    self.saw_text_delta = true;
                    vec![StreamEvent::text(delta)]
                }
                _ => Vec::new(),
            },
            "response.output_text.done" => {
                let mut events = Vec::new();
                if !self.saw_text_delta {
                    if let Some(text) = str_field(event, "text").filter(|t| !t.is_empty()) {
                        events.push(StreamEvent::text(text));
                    }
                }
                self.saw_text_delta = false;
                events.push(StreamEvent::TextDone);
                events
            }
            "response.output_item.added" => {
                let Some(item) = event.get("item").filter(|i| is_function_call(i)) else {
                    return Vec::new();
                };
                let (Some(call_id), Some(name)) = (call_id(item), str_field(item, "name")) else {
                    return vec![StreamEvent::error(
                        "malformed frame: function_call item without call id or name",
                    )];
                };
                let item_id = str_field(item, "id").unwrap_or(call_id).to_string();
                self.items
                    .insert(item_id, (call_id.to_string(), name.to_string()));
                vec![StreamEvent::ToolCallStarted {
                    id: call_id.to_string(),
                    name: name.to_string(),
                }]
            }
            "response.function_call_arguments.delta" => {
                if let (Some(key), Some(delta)) = (self.lookup_call_id(event), str_field(event, "delta")) {
                    self.arguments.entry(key).or_default().push_str(delta);
                }
                Vec::new()
            }
            "response.function_call_arguments.done" => {
                let Some(id) = self.lookup_call_id(event) else {
                    return vec![StreamEvent::error(
                        "malformed frame: arguments done for an unknown call",
                    )];
                };
                let name = str_field(event, "name")
                    .map(str::to_string)
                    .or_else(|| self.name_for(&id));
                let Some(name) = name else {
                    return vec![StreamEvent::error(format!(
                        "malformed frame: no tool name for call {id}"
                    ))];
                };
                let raw = str_field(event, "arguments").map(str::to_string);
                self.finalize(id, name, raw);
                Vec::new()
            }
            "response.output_item.done" => {
                let Some(item) = event.get("item").filter(|i| is_function_call(i)) else {
                    return Vec::new();
                };
                if let (Some(id), Some(name)) = (call_id(item), str_field(item, "name")) {
                    let raw = str_field(item, "arguments").map(str::to_string);
                    self.finalize(id.to_string(), name.to_string(), raw);
                }
                Vec::new()
            }
            "response.tool_calls" => {
                let Some(calls) = event.get("calls").and_then(Value::as_array) else {
                    return vec![StreamEvent::error("malformed frame: tool_calls without calls")];
                };
                for call in calls {
                    match (call_id(call), str_field(call, "name")) {
                        (Some(id), Some(name)) => {
                            let raw = arguments_string(call.get("arguments"));
                            self.finalize(id.to_string(), name.to_string(), Some(raw));
                        }
                        _ => {
                            return vec![StreamEvent::error(
                                "malformed frame: batched call without id or name",
                            )]
                        }
                    }
                }
                self.explicit_batch = true;
                Vec::new()
            }
            "response.ui.card" => match event.get("card") {
                Some(card) => {
                    vec![StreamEvent::Ui {
                        payload: SideChannelPayload::Card(card.clone()),
                    }]
                }
                None => vec![StreamEvent::error("malformed frame: card event without card")],
            },
            "response.ui.suggestions" => {
                let chips: Option<Vec<String>> = event
                    .get("suggestions")
                    .and_then(|v| serde_json::from_value(v.clone()).ok());
                match chips {
                    Some(chips) => {
                        vec![StreamEvent::Ui {
                            payload: SideChannelPayload::Suggestions(chips),
                        }]
                    }
                    None => vec![StreamEvent::error(
                        "malformed frame: suggestions event without a string list",
                    )],
                }
            }
            "response.completed" | "response.done" => {
                if let Some(id) = response_id(event) {
                    self.response_id = Some(id);
                }
                self.complete()
            }
            "response.failed" | "response.incomplete" => {
                let reason = event
                    .get("response")
                    .and_then(|r| r.get("error"))
                    .and_then(|e| str_field(e, "message"))
                    .or_else(|| {
                        event
                            .get("response")
                            .and_then(|r| r.get("incomplete_details"))
                            .and_then(|d| str_field(d, "reason"))
                    })
                    .unwrap_or(kind)
                    .to_string();
                vec![StreamEvent::ResponseFailed { reason }]
            }
            "error" => {
                let reason = str_field(event, "message")
                    .or_else(|| event.get("error").and_then(|e| str_field(e, "message")))
                    .unwrap_or("provider error");
                vec![StreamEvent::error(reason)]
            }
            other => {
                trace!(event_type = other, "ignoring frame");
                Vec::new()
            }
        }
    }

    fn lookup_call_id(&self, event: &Value) -> Option<String> {
        if let Some(id) = str_field(event, "call_id") {
            return Some(id.to_string());
        }
        let item_id = str_field(event, "item_id")?;
        Some(
            self.items
                .get(item_id)
                .map(|(call_id, _)| call_id.clone())
                .unwrap_or_else(|| item_id.to_string()),
        )
    }

    fn name_for(&self, call_id: &str) -> Option<String> {
        self.items
            .values()
            .find(|(id, _)| id == call_id)
            .map(|(_, name)| name.clone())
    }

    fn finalize(&mut self, id: String, name: String, raw: Option<String>) {
        if !self.finalized_ids.insert(id.clone()) {
            return;
        }
        let streamed = self.arguments.remove(&id);
        let raw_arguments = raw.or(streamed).unwrap_or_default();
        self.finalized.push(ToolCallRef {
            id,
            name,
            raw_arguments,
        });
    }

    fn complete(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::with_capacity(2);
        let mut calls = std::mem::take(&mut self.finalized);
        if calls.len() == 1 && !self.explicit_batch {
            if let Some(call) = calls.pop() {
                events.push(StreamEvent::ToolCall { call });
            }
        } else if !calls.is_empty() {
            events.push(StreamEvent::ToolCalls { calls });
        }
        events.push(StreamEvent::ResponseCompleted {
            id: self.response_id.clone().unwrap_or_default(),
        });
        events
    }
}

impl FrameDecoder for ResponsesDecoder {
    fn decode(&mut self, frame: &RawFrame) -> Vec<StreamEvent> {
        let data = frame.data.trim();
        if data.is_empty() || data == "[DONE]" {
            return Vec::new();
        }
        match serde_json::from_str::<Value>(data) {
            Ok(event) => self.on_frame(&event),
            Err(err) => {
                debug!(error = %err, "undecodable frame");
                vec![StreamEvent::error(format!("malformed frame: {err}"))]
            }
        }
    }

    fn finish(&mut self) -> Vec<StreamEvent> {
        let dropped = std::mem::take(&mut self.finalized);
        self.finalized_ids.clear();
        debug!(
            response_id = ?self.response_id,
            dropped_calls = dropped.len(),
            "stream ended without response.completed"
        );
        vec![StreamEvent::error("stream ended before the response completed")]
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn call_id(item: &Value) -> Option<&str> {
    str_field(item, "call_id").or_else(|| str_field(item, "id"))
}

fn is_function_call(item: &Value) -> bool {
    str_field(item, "type") == Some("function_call")
}

fn response_id(event: &Value) -> Option<String> {
    event
        .get("response")
        .and_then(|r| str_field(r, "id"))
        .map(str::to_string)
}

fn arguments_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(raw)) => raw.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}
