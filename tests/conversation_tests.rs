//! End-to-end turn tests against a scripted provider.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use common::*;
use spotter::prelude::*;

fn recording_sink() -> (Arc<Mutex<Vec<TurnEvent>>>, spotter::engine::TurnEventSink) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let captured = events.clone();
    let sink: spotter::engine::TurnEventSink = Arc::new(move |event: TurnEvent| {
        captured.lock().unwrap().push(event);
    });
    (events, sink)
}

#[tokio::test]
async fn plain_text_round_needs_no_continuation() {
    let provider = ScriptedProvider::new();
    provider.queue_events(text_round("resp_1", &["He", "llo"]));
    let mut h = harness(provider, coaching_registry());

    let outcome = h.conversation.send("hi").await;

    assert_eq!(outcome.status, TurnStatus::Completed);
    assert_eq!(outcome.final_text(), Some("Hello"));
    assert_eq!(outcome.rounds, 1);
    assert_eq!(outcome.continuations, 0);
    assert!(h.provider.continuation_requests().is_empty());

    let messages = h.store.snapshot();
    assert_eq!(messages.len(), 2);
    assert!(messages[0].is_user);
    assert_eq!(messages[1].text, "Hello");
    assert_eq!(messages[1].status, MessageStatus::Complete);
}

#[tokio::test]
async fn single_call_triggers_exactly_one_continuation() {
    let provider = ScriptedProvider::new();
    provider
        .queue_events(single_call_round(
            "resp_1",
            call("call_1", "calculate_1rm", json!({"weight": 100, "reps": 5})),
        ))
        .queue_events(text_round("resp_2", &["Your estimated 1RM ", "is 116.7kg."]));
    let mut h = harness(provider, coaching_registry());

    let outcome = h.conversation.send("What's my 1RM at 100kg x 5?").await;

    assert_eq!(outcome.status, TurnStatus::Completed);
    assert_eq!(outcome.continuations, 1);
    assert_eq!(outcome.rounds, 2);

    let continuations = h.provider.continuation_requests();
    assert_eq!(continuations.len(), 1);
    assert_eq!(continuations[0].previous_response_id.as_deref(), Some("resp_1"));
    assert_eq!(
        h.provider.submitted_outputs(0),
        vec![ToolOutput::new("call_1", "calculate_1rm", "SUCCESS: 116.7")]
    );

    let messages = h.store.snapshot();
    assert_eq!(messages.len(), 2, "no message for a round without text");
    assert_eq!(messages[1].text, "Your estimated 1RM is 116.7kg.");
    assert_eq!(
        messages[1].payload(SideChannelKind::Suggestions),
        Some(&SideChannelPayload::Suggestions(vec![
            "Start a strength block".into(),
            "Log this lift".into(),
        ]))
    );
}

#[tokio::test]
async fn batch_with_failing_member_stores_both_and_continues() {
    let provider = ScriptedProvider::new();
    provider
        .queue_events(batch_round(
            "resp_1",
            vec![
                call("call_1", "get_summary", json!({})),
                call("call_2", "send_message", json!({"to": "coach"})),
            ],
        ))
        .queue_events(text_round(
            "resp_2",
            &["You did 3 workouts. ", "I couldn't message your coach."],
        ));
    let mut h = harness(provider, coaching_registry());

    let outcome = h.conversation.send("Summarize my week and tell my coach").await;

    assert_eq!(outcome.status, TurnStatus::Completed);
    assert_eq!(h.provider.continuation_requests().len(), 1);

    let submitted = h.provider.submitted_outputs(0);
    assert_eq!(submitted.len(), 2);
    assert_eq!(submitted[0], ToolOutput::new("call_1", "get_summary", "SUCCESS: 3 workouts this week"));
    assert_eq!(submitted[1].call_id, "call_2");
    assert_eq!(submitted[1].output, "ERROR: could not reach coach");
    assert!(submitted[1].output.starts_with(ERROR_PREFIX));

    let last = outcome.messages.last().unwrap();
    assert_eq!(last.text, "You did 3 workouts. I couldn't message your coach.");
    assert_eq!(last.status, MessageStatus::Complete);
    assert!(last.payload(SideChannelKind::Card).is_some());
}

#[tokio::test]
async fn unknown_tool_still_reaches_a_finalized_message() {
    let provider = ScriptedProvider::new();
    provider
        .queue_events(single_call_round("resp_1", call("call_1", "nonexistent_tool", json!({}))))
        .queue_events(text_round("resp_2", &["I can't do that yet."]));
    let mut h = harness(provider, coaching_registry());

    let outcome = h.conversation.send("Do the impossible").await;

    assert_eq!(
        outcome.output_for("call_1").map(|o| o.output.as_str()),
        Some("ERROR: Unknown tool")
    );
    assert_eq!(outcome.status, TurnStatus::Completed);
    assert_eq!(outcome.final_text(), Some("I can't do that yet."));
    assert!(outcome.messages.iter().all(VisibleMessage::is_final));
}

#[tokio::test]
async fn cancellation_after_three_deltas_keeps_text_and_never_continues() {
    let provider = ScriptedProvider::new();
    let mut events = vec![created("resp_1")];
    events.extend(["One ", "two ", "three", " four", " five"].map(delta));
    events.push(StreamEvent::ToolCall {
        call: call("call_1", "get_summary", json!({})),
    });
    events.push(completed("resp_1"));
    provider.queue_events(events);

    let cancel = CancellationToken::new();
    let deltas = Arc::new(AtomicUsize::new(0));
    let sink_cancel = cancel.clone();
    let sink_deltas = deltas.clone();
    let sink: spotter::engine::TurnEventSink = Arc::new(move |event: TurnEvent| {
        if let TurnEventPayload::TextDelta { .. } = event.payload {
            if sink_deltas.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                sink_cancel.cancel();
            }
        }
    });

    let mut h = harness(provider, coaching_registry());
    h.conversation = h.conversation.with_event_sink(sink);

    let outcome = h.conversation.send_with_cancel("Tell me a story", cancel).await;

    assert_eq!(outcome.status, TurnStatus::Cancelled);
    assert_eq!(outcome.final_text(), Some("One two three"));
    assert_eq!(outcome.messages[0].status, MessageStatus::Cancelled);
    assert_eq!(h.provider.requests().len(), 1);
    assert!(h.provider.continuation_requests().is_empty());
    assert!(outcome.tool_outputs.is_empty());
}

#[tokio::test]
async fn cancellation_during_tool_execution_skips_continuation() {
    let provider = ScriptedProvider::new();
    provider
        .queue_events(single_call_round("resp_1", call("call_1", "long_import", json!({}))))
        .queue_events(text_round("resp_2", &["never streamed"]));

    let cancel = CancellationToken::new();
    let handler_cancel = cancel.clone();
    let registry = HandlerRegistry::new().with(FnHandler::new("long_import", move |_args, _ctx| {
        let cancel = handler_cancel.clone();
        async move {
            cancel.cancel();
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("SUCCESS: imported".to_string())
        }
    }));
    let mut h = harness(provider, registry);

    let outcome = h.conversation.send_with_cancel("Import my CSV", cancel).await;

    assert_eq!(outcome.status, TurnStatus::Cancelled);
    assert!(h.provider.continuation_requests().is_empty());
    assert!(outcome.tool_outputs.is_empty());
    assert_eq!(outcome.messages.len(), 1, "turn still ends with an assistant message");
    assert_eq!(outcome.messages[0].status, MessageStatus::Cancelled);
}

#[tokio::test]
async fn nested_calls_are_ignored_by_default() {
    let provider = ScriptedProvider::new();
    provider
        .queue_events(single_call_round("resp_1", call("call_1", "get_summary", json!({}))))
        .queue_events(vec![
            created("resp_2"),
            delta("Here is your summary."),
            StreamEvent::ToolCall {
                call: call("call_2", "send_message", json!({"to": "coach"})),
            },
            completed("resp_2"),
        ]);
    let (events, sink) = recording_sink();
    let mut h = harness(provider, coaching_registry());
    h.conversation = h.conversation.with_event_sink(sink);

    let outcome = h.conversation.send("Summarize and share").await;

    assert_eq!(outcome.status, TurnStatus::Completed);
    assert_eq!(outcome.final_text(), Some("Here is your summary."));
    assert_eq!(h.provider.requests().len(), 2);
    assert!(outcome.output_for("call_2").is_none());

    let ignored: Vec<Vec<String>> = events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match &e.payload {
            TurnEventPayload::NestedToolCallsIgnored { call_ids } => Some(call_ids.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(ignored, vec![vec!["call_2".to_string()]]);
}

#[tokio::test]
async fn nested_calls_fail_the_message_when_rejected() {
    let provider = ScriptedProvider::new();
    provider
        .queue_events(single_call_round("resp_1", call("call_1", "get_summary", json!({}))))
        .queue_events(vec![
            created("resp_2"),
            delta("Partial answer"),
            StreamEvent::ToolCalls {
                calls: vec![call("call_2", "get_summary", json!({}))],
            },
            completed("resp_2"),
        ]);
    let config = EngineConfig::builder()
        .open_round_attempts(1)
        .nested_tool_calls(NestedToolCallPolicy::Reject)
        .build();
    let mut h = harness_with_config(provider, coaching_registry(), config);

    let outcome = h.conversation.send("Summarize").await;

    match &outcome.status {
        TurnStatus::Failed { reason } => assert!(reason.contains("nested tool calls")),
        other => panic!("expected failure, got {other:?}"),
    }
    let last = outcome.messages.last().unwrap();
    assert_eq!(last.text, "Partial answer");
    assert_eq!(last.status, MessageStatus::Failed);
    assert_eq!(h.provider.requests().len(), 2);
}

#[tokio::test]
async fn failed_response_keeps_partial_text() {
    let provider = ScriptedProvider::new();
    provider.queue_events(vec![
        created("resp_1"),
        delta("Your plan starts"),
        StreamEvent::ResponseFailed {
            reason: "server_error".into(),
        },
    ]);
    let mut h = harness(provider, coaching_registry());

    let outcome = h.conversation.send("Build me a plan").await;

    assert_eq!(
        outcome.status,
        TurnStatus::Failed {
            reason: "server_error".into()
        }
    );
    let message = &h.store.snapshot()[1];
    assert_eq!(message.text, "Your plan starts");
    assert_eq!(message.status, MessageStatus::Failed);
    assert_eq!(message.error.as_deref(), Some("server_error"));
}

#[tokio::test]
async fn malformed_frame_fails_the_round() {
    let provider = ScriptedProvider::new();
    provider.queue_events(vec![
        created("resp_1"),
        delta("Half"),
        StreamEvent::error("malformed frame: expected value"),
        delta("never seen"),
    ]);
    let mut h = harness(provider, coaching_registry());

    let outcome = h.conversation.send("hi").await;

    assert!(matches!(outcome.status, TurnStatus::Failed { .. }));
    assert_eq!(outcome.final_text(), Some("Half"));
}

#[tokio::test(start_paused = true)]
async fn idle_stream_times_out_with_partial_text() {
    let provider = ScriptedProvider::new();
    provider.queue(Script::EventsThenHang(vec![created("resp_1"), delta("Thinking")]));
    let mut h = harness(provider, coaching_registry());

    let outcome = h.conversation.send("hi").await;

    assert_eq!(
        outcome.status,
        TurnStatus::Failed {
            reason: "stream idle timeout".into()
        }
    );
    assert_eq!(outcome.final_text(), Some("Thinking"));
}

#[tokio::test]
async fn initial_open_failure_still_leaves_an_assistant_message() {
    let provider = ScriptedProvider::new();
    provider.queue(Script::OpenFailure {
        status: 401,
        message: "invalid api key".into(),
    });
    let mut h = harness(provider, coaching_registry());

    let outcome = h.conversation.send("hi").await;

    assert!(matches!(outcome.status, TurnStatus::Failed { .. }));
    let messages = h.store.snapshot();
    assert_eq!(messages.len(), 2);
    assert!(!messages[1].is_user);
    assert_eq!(messages[1].status, MessageStatus::Failed);
    assert!(messages[1].error.as_deref().unwrap().contains("invalid api key"));
}

#[tokio::test]
async fn continuation_open_failure_fails_only_the_new_round() {
    let provider = ScriptedProvider::new();
    provider
        .queue_events(vec![
            created("resp_1"),
            delta("Checking your log..."),
            StreamEvent::ToolCall {
                call: call("call_1", "get_summary", json!({})),
            },
            completed("resp_1"),
        ])
        .queue(Script::OpenFailure {
            status: 400,
            message: "previous response not found".into(),
        });
    let mut h = harness(provider, coaching_registry());

    let outcome = h.conversation.send("How was my week?").await;

    assert!(matches!(&outcome.status, TurnStatus::Failed { reason } if reason.contains("previous response not found")));
    assert_eq!(outcome.messages.len(), 2);
    assert_eq!(outcome.messages[0].text, "Checking your log...");
    assert_eq!(outcome.messages[0].status, MessageStatus::Complete);
    assert_eq!(outcome.messages[1].status, MessageStatus::Failed);
    // The card from get_summary drains into the failed continuation message.
    assert!(outcome.messages[1].payload(SideChannelKind::Card).is_some());
}

#[tokio::test]
async fn side_channel_payloads_attach_to_the_continuation_message_only() {
    let provider = ScriptedProvider::new();
    provider
        .queue_events(vec![
            created("resp_1"),
            delta("Let me pull that up."),
            StreamEvent::ToolCalls {
                calls: vec![call("call_1", "get_summary", json!({}))],
            },
            completed("resp_1"),
        ])
        .queue_events(text_round("resp_2", &["Here you go."]));
    let mut h = harness(provider, coaching_registry());

    let outcome = h.conversation.send("Show my week").await;

    assert_eq!(outcome.messages.len(), 2);
    assert!(outcome.messages[0].attached_payloads.is_empty());
    assert!(outcome.messages[1].payload(SideChannelKind::Card).is_some());
}

#[tokio::test]
async fn provider_ui_events_attach_to_the_current_message() {
    let provider = ScriptedProvider::new();
    provider.queue_events(vec![
        created("resp_1"),
        StreamEvent::Ui {
            payload: SideChannelPayload::Suggestions(vec!["Start workout".into()]),
        },
        delta("Ready when you are."),
        completed("resp_1"),
    ]);
    let mut h = harness(provider, coaching_registry());

    let outcome = h.conversation.send("hi").await;

    assert_eq!(
        outcome.messages[0].payload(SideChannelKind::Suggestions),
        Some(&SideChannelPayload::Suggestions(vec!["Start workout".into()]))
    );
}

#[tokio::test]
async fn each_turn_gets_a_fresh_context_and_chains_responses() {
    let provider = ScriptedProvider::new();
    provider
        .queue_events(single_call_round("resp_1", call("call_1", "remember", json!({}))))
        .queue_events(text_round("resp_2", &["Noted."]))
        .queue_events(single_call_round("resp_3", call("call_2", "remember", json!({}))))
        .queue_events(text_round("resp_4", &["Noted again."]));

    let registry = HandlerRegistry::new().with(FnHandler::new("remember", |_args, ctx| async move {
        let previous = ctx.scratch().set("last_workout_id", json!("w-1"));
        Ok(format!("SUCCESS: previous={}", previous.map(|v| v.to_string()).unwrap_or("none".into())))
    }));
    let mut h = harness(provider, registry);

    let first = h.conversation.send("Create a workout").await;
    let second = h.conversation.send("Create another").await;

    assert_eq!(first.output_for("call_1").unwrap().output, "SUCCESS: previous=none");
    assert_eq!(second.output_for("call_2").unwrap().output, "SUCCESS: previous=none");
    assert_ne!(first.turn_id, second.turn_id);

    let requests = h.provider.requests();
    assert_eq!(requests.len(), 4);
    assert_eq!(requests[2].previous_response_id.as_deref(), Some("resp_2"));
    assert_eq!(h.store.count(), 4);
}

#[tokio::test]
async fn turn_events_are_sequenced_and_distinguish_batches() {
    let provider = ScriptedProvider::new();
    provider
        .queue_events(batch_round(
            "resp_1",
            vec![
                call("call_1", "get_summary", json!({})),
                call("call_2", "calculate_1rm", json!({"weight": 60, "reps": 10})),
            ],
        ))
        .queue_events(text_round("resp_2", &["Done."]));
    let (events, sink) = recording_sink();
    let mut h = harness(provider, coaching_registry());
    h.conversation = h.conversation.with_event_sink(sink);

    h.conversation.send("Summary and 1RM please").await;

    let events = events.lock().unwrap();
    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    assert!(seqs.windows(2).all(|w| w[1] == w[0] + 1));

    let kinds: Vec<&str> = events
        .iter()
        .filter_map(|e| match &e.payload {
            TurnEventPayload::TurnStarted { .. } => Some("turn_started"),
            TurnEventPayload::ToolBatchRequested { .. } => Some("batch"),
            TurnEventPayload::ToolCallRequested { .. } => Some("single"),
            TurnEventPayload::ToolOutputStored { .. } => Some("stored"),
            TurnEventPayload::ContinuationRequested { .. } => Some("continue"),
            TurnEventPayload::MessageFinalized { .. } => Some("finalized"),
            TurnEventPayload::TurnEnded { .. } => Some("turn_ended"),
            _ => None,
        })
        .collect();
    assert_eq!(
        kinds,
        vec!["turn_started", "batch", "stored", "stored", "continue", "finalized", "turn_ended"]
    );
}

#[tokio::test]
async fn next_turn_chains_past_ignored_nested_calls() {
    let provider = ScriptedProvider::new();
    provider
        .queue_events(text_round("resp_1", &["Hi Bobby."]))
        .queue_events(single_call_round("resp_2", call("call_1", "get_summary", json!({}))))
        .queue_events(vec![
            created("resp_3"),
            delta("Here is your summary."),
            StreamEvent::ToolCall {
                call: call("call_2", "send_message", json!({"to": "coach"})),
            },
            completed("resp_3"),
        ])
        .queue_events(text_round("resp_4", &["Anytime."]));
    let mut h = harness(provider, coaching_registry());

    h.conversation.send("Hello").await;
    h.conversation.send("Summarize and share").await;
    let outcome = h.conversation.send("Thanks").await;

    assert_eq!(outcome.status, TurnStatus::Completed);
    let chained: Vec<Option<String>> = h
        .provider
        .requests()
        .into_iter()
        .map(|r| r.previous_response_id)
        .collect();
    assert_eq!(
        chained,
        vec![
            None,
            Some("resp_1".to_string()),
            Some("resp_2".to_string()),
            Some("resp_1".to_string()),
        ]
    );
    assert_eq!(h.conversation.continuation().settled_response_id(), Some("resp_4"));
}

#[tokio::test]
async fn next_turn_chains_past_a_cancelled_tool_round() {
    let provider = ScriptedProvider::new();
    provider
        .queue_events(text_round("resp_1", &["Hi Bobby."]))
        .queue_events(single_call_round("resp_2", call("call_1", "stop_now", json!({}))))
        .queue_events(text_round("resp_3", &["Still here."]));

    let cancel = CancellationToken::new();
    let handler_cancel = cancel.clone();
    let registry = HandlerRegistry::new().with(FnHandler::new("stop_now", move |_args, _ctx| {
        let cancel = handler_cancel.clone();
        async move {
            cancel.cancel();
            Ok("SUCCESS: stopped".to_string())
        }
    }));
    let (events, sink) = recording_sink();
    let mut h = harness(provider, registry);
    h.conversation = h.conversation.with_event_sink(sink);

    h.conversation.send("Hello").await;
    let cancelled = h.conversation.send_with_cancel("Stop the import", cancel).await;
    h.conversation.send("Are you there?").await;

    assert_eq!(cancelled.status, TurnStatus::Cancelled);
    assert!(h.provider.continuation_requests().is_empty());
    assert!(!events
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e.payload, TurnEventPayload::ContinuationRequested { .. })));

    let requests = h.provider.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[2].previous_response_id.as_deref(), Some("resp_1"));
}
