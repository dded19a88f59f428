//! End-to-end conversation scenarios.
//!
//! Every test drives a real [`Orchestrator`] against a scripted gateway that
//! replays canned completions and records each call it receives, plus real
//! tool handlers running through the registry's timeout and task machinery.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::StreamExt;
use serde_json::{Map, Value, json};

use promptbench_agent::config::OrchestratorConfig;
use promptbench_agent::events::{CODE_ITERATION_CAP, CODE_TOOL_CLAMP};
use promptbench_agent::llm::{CompletionResult, GatewayEvent, GatewayStream, ModelGateway};
use promptbench_agent::orchestrator::{ITERATION_CAP_MESSAGE, NO_CONTENT_MESSAGE};
use promptbench_agent::{
    ConversationContext, ConversationRequest, GatewayError, GuardrailPolicy, Message,
    Orchestrator, RequestParams, Role, SearchIntentDetector, StreamEvent, ToolCallRequest,
    ToolCategory, ToolChoice, ToolError, ToolHandler, ToolMetadata, ToolRegistry, ToolSchema,
    ToolVisibility, event_channel,
};

// ── scripted gateway ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct RecordedCall {
    streaming: bool,
    messages: Vec<Message>,
    params: RequestParams,
}

/// Replays queued replies in order.  An exhausted queue answers with the
/// fallback (blocking) or an empty stream.
#[derive(Default)]
struct ScriptedGateway {
    blocking: Mutex<VecDeque<Result<CompletionResult, GatewayError>>>,
    streams: Mutex<VecDeque<Vec<Result<GatewayEvent, GatewayError>>>>,
    fallback: Option<CompletionResult>,
    hang: bool,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedGateway {
    fn new() -> Self {
        Self::default()
    }

    fn reply(self, result: CompletionResult) -> Self {
        self.blocking.lock().unwrap().push_back(Ok(result));
        self
    }

    fn fail(self, error: GatewayError) -> Self {
        self.blocking.lock().unwrap().push_back(Err(error));
        self
    }

    fn stream(self, events: Vec<GatewayEvent>) -> Self {
        self.streams
            .lock()
            .unwrap()
            .push_back(events.into_iter().map(Ok).collect());
        self
    }

    fn always(mut self, result: CompletionResult) -> Self {
        self.fallback = Some(result);
        self
    }

    fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    fn record(&self, streaming: bool, messages: &[Message], params: &RequestParams) {
        self.calls.lock().unwrap().push(RecordedCall {
            streaming,
            messages: messages.to_vec(),
            params: params.clone(),
        });
    }

    fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    async fn complete(
        &self,
        _model: &str,
        messages: &[Message],
        params: &RequestParams,
    ) -> Result<CompletionResult, GatewayError> {
        self.record(false, messages, params);
        if self.hang {
            std::future::pending::<()>().await;
        }
        let next = self.blocking.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(self.fallback.clone().unwrap_or_default()))
    }

    async fn stream_complete(
        &self,
        _model: &str,
        messages: &[Message],
        params: &RequestParams,
    ) -> Result<GatewayStream, GatewayError> {
        self.record(true, messages, params);
        let events = self.streams.lock().unwrap().pop_front().unwrap_or_default();
        Ok(futures::stream::iter(events).boxed())
    }
}

// ── tools ─────────────────────────────────────────────────────────────────────

/// Search tool that counts invocations and echoes its arguments.
struct CountingSearch {
    calls: Arc<AtomicUsize>,
    delay: Duration,
}

#[async_trait]
impl ToolHandler for CountingSearch {
    fn name(&self) -> &str {
        "search_web"
    }

    fn schema(&self) -> ToolSchema {
        search_schema()
    }

    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(ToolCategory::Search, ToolVisibility::Primary)
    }

    async fn call(&self, args: Map<String, Value>) -> Result<Value, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(json!({"results": [{"title": "hit"}], "args": args}))
    }
}

/// Utility tool that sleeps for `ms` milliseconds before answering.
struct Sleeper;

#[async_trait]
impl ToolHandler for Sleeper {
    fn name(&self) -> &str {
        "sleep"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::function("sleep", "Sleep", json!({"type": "object"}))
    }

    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(ToolCategory::Utility, ToolVisibility::Hidden)
    }

    async fn call(&self, args: Map<String, Value>) -> Result<Value, ToolError> {
        let ms = args.get("ms").and_then(Value::as_u64).unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(json!({"slept_ms": ms}))
    }
}

fn search_schema() -> ToolSchema {
    ToolSchema::function(
        "search_web",
        "Search the web",
        json!({"type": "object", "properties": {"query": {"type": "string"}}}),
    )
}

fn sleep_schema() -> ToolSchema {
    ToolSchema::function("sleep", "Sleep", json!({"type": "object"}))
}

// ── harness ───────────────────────────────────────────────────────────────────

struct Harness {
    gateway: Arc<ScriptedGateway>,
    search_calls: Arc<AtomicUsize>,
    orchestrator: Orchestrator,
}

fn harness(gateway: ScriptedGateway) -> Harness {
    harness_with(gateway, OrchestratorConfig::default(), Duration::ZERO)
}

fn harness_with(gateway: ScriptedGateway, config: OrchestratorConfig, search_delay: Duration) -> Harness {
    let gateway = Arc::new(gateway);
    let search_calls = Arc::new(AtomicUsize::new(0));
    let registry = ToolRegistry::new(Duration::from_secs(5))
        .with(CountingSearch {
            calls: Arc::clone(&search_calls),
            delay: search_delay,
        })
        .with(Sleeper);
    let orchestrator = Orchestrator::new(
        gateway.clone(),
        Arc::new(registry),
        Arc::new(GuardrailPolicy::builtin()),
        config,
    )
    .with_today(NaiveDate::from_ymd_opt(2025, 3, 14).unwrap());
    Harness {
        gateway,
        search_calls,
        orchestrator,
    }
}

async fn collect(orchestrator: &Orchestrator, request: ConversationRequest) -> Vec<StreamEvent> {
    let mut rx = orchestrator.start(request);
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    let done = events.iter().filter(|e| e.is_done()).count();
    assert_eq!(done, 1, "exactly one done event: {events:?}");
    assert!(events.last().is_some_and(StreamEvent::is_done), "done must be last");
    events
}

fn kinds(events: &[StreamEvent]) -> Vec<&'static str> {
    events.iter().map(StreamEvent::kind).collect()
}

fn call(id: &str, name: &str, args: Value) -> ToolCallRequest {
    ToolCallRequest::new(id, name, args.to_string())
}

fn content_of(events: &[StreamEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Content { content } => Some(content.clone()),
            _ => None,
        })
        .collect()
}

// ── plain answers ─────────────────────────────────────────────────────────────

/// Without declared tools the answer is streamed straight through.
#[tokio::test]
async fn no_tools_streams_answer() {
    let h = harness(ScriptedGateway::new().stream(vec![
        GatewayEvent::ContentDelta("4".into()),
        GatewayEvent::Finished(Some("stop".into())),
    ]));

    let events = collect(&h.orchestrator, ConversationRequest::new("openai/gpt-4o", "What is 2+2?")).await;

    assert_eq!(events, vec![StreamEvent::content("4"), StreamEvent::done()]);
    let calls = h.gateway.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].streaming);
    assert_eq!(calls[0].messages, vec![Message::user("What is 2+2?")]);
    assert!(calls[0].params.tools.is_empty());
    assert!(calls[0].params.tool_choice.is_none());
}

#[tokio::test]
async fn no_tools_empty_stream_gets_default_content() {
    let h = harness(ScriptedGateway::new());
    let events = collect(&h.orchestrator, ConversationRequest::new("openai/gpt-4o", "")).await;

    assert_eq!(content_of(&events), vec![NO_CONTENT_MESSAGE]);
    assert_eq!(h.gateway.calls()[0].messages, vec![Message::user("Hello")]);
}

/// A direct content answer with tools declared is emitted once, unretried.
#[tokio::test]
async fn content_on_first_iteration_is_accepted() {
    let h = harness(ScriptedGateway::new().reply(CompletionResult::text("Paris")));
    let request = ConversationRequest::new("openai/gpt-4o", "Capital of France?")
        .with_system("Be terse.")
        .with_tools(vec![sleep_schema()]);

    let events = collect(&h.orchestrator, request).await;

    assert_eq!(events, vec![StreamEvent::content("Paris"), StreamEvent::done()]);
    let calls = h.gateway.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].messages[0], Message::system("Be terse."));
    assert_eq!(calls[0].params.tool_choice, Some(ToolChoice::Auto));
    assert_eq!(calls[0].params.parallel_tool_calls, Some(true));
}

// ── tool turns ────────────────────────────────────────────────────────────────

/// Search-implying prompt: the first turn forces the search tool, the tool
/// runs, and the blocking finalization answers.
#[tokio::test]
async fn search_prompt_forces_tool_then_finalizes() {
    let h = harness(
        ScriptedGateway::new()
            .reply(CompletionResult::tool_calls(vec![call(
                "c1",
                "search_web",
                json!({"query": "X"}),
            )]))
            .reply(CompletionResult::text("Here's the news about X.")),
    );
    let request = ConversationRequest::new("openai/gpt-4o", "latest news about X")
        .with_tools(vec![search_schema()]);

    let events = collect(&h.orchestrator, request).await;

    assert_eq!(
        kinds(&events),
        ["tool_calls", "tool_executing", "tool_result", "content", "done"]
    );
    assert_eq!(content_of(&events), vec!["Here's the news about X."]);
    match &events[2] {
        StreamEvent::ToolResult { id, result, category, .. } => {
            assert_eq!(id, "c1");
            assert!(result.success);
            assert_eq!(*category, Some(ToolCategory::Search));
        }
        other => panic!("expected tool_result, got {other:?}"),
    }
    assert_eq!(h.search_calls.load(Ordering::SeqCst), 1);

    let calls = h.gateway.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(
        calls[0].params.tool_choice,
        Some(ToolChoice::Function("search_web".into()))
    );

    let finalize = &calls[1];
    assert!(!finalize.streaming);
    assert_eq!(finalize.params.tool_choice, Some(ToolChoice::None));
    assert_eq!(finalize.params.tools.len(), 1, "tools stay attached");
    let roles: Vec<Role> = finalize.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, [Role::User, Role::Assistant, Role::Tool, Role::User]);
    assert_eq!(finalize.messages[2].tool_call_id.as_deref(), Some("c1"));
    assert_eq!(
        finalize.messages[3].content.as_deref(),
        Some("Please use the tool results above to answer my original question.")
    );
}

/// Time phrases in the prompt fill missing search filters.
#[tokio::test]
async fn time_window_fills_search_arguments() {
    let h = harness(
        ScriptedGateway::new()
            .reply(CompletionResult::tool_calls(vec![call(
                "c1",
                "search_web",
                json!({"query": "fed rates"}),
            )]))
            .reply(CompletionResult::text("done")),
    );
    let request = ConversationRequest::new("openai/gpt-4o", "fed rates in the past 3 days")
        .with_tools(vec![search_schema()]);

    let events = collect(&h.orchestrator, request).await;

    let args = events
        .iter()
        .find_map(|e| match e {
            StreamEvent::ToolResult { result, .. } => result.result.clone(),
            _ => None,
        })
        .expect("tool result payload");
    assert_eq!(args["args"]["time_hint"], "week");
    assert_eq!(args["args"]["after"], "2025-03-11");
}

/// Eight requested calls are clamped to six with a single warning.
#[tokio::test]
async fn oversized_turn_is_clamped_with_one_warning() {
    let requested = (0..8)
        .map(|i| call(&format!("c{i}"), "sleep", json!({"ms": 0})))
        .collect();
    let h = harness(
        ScriptedGateway::new()
            .reply(CompletionResult::tool_calls(requested))
            .reply(CompletionResult::text("ok")),
    );
    let request = ConversationRequest::new("openai/gpt-4o", "nap").with_tools(vec![sleep_schema()]);

    let events = collect(&h.orchestrator, request).await;

    let warnings: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Warning { message, code } => Some((message.clone(), code.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(
        warnings,
        vec![("Trimmed tool calls to 6".to_owned(), Some(CODE_TOOL_CLAMP.to_owned()))]
    );

    let announced = events
        .iter()
        .find_map(|e| match e {
            StreamEvent::ToolCalls { calls } => Some(calls.clone()),
            _ => None,
        })
        .unwrap();
    let ids: Vec<_> = announced.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, ["c0", "c1", "c2", "c3", "c4", "c5"]);

    let executing = kinds(&events).iter().filter(|k| **k == "tool_executing").count();
    let results = kinds(&events).iter().filter(|k| **k == "tool_result").count();
    assert_eq!((executing, results), (6, 6));

    let finalize = &h.gateway.calls()[1];
    let tool_messages = finalize.messages.iter().filter(|m| m.role == Role::Tool).count();
    assert_eq!(tool_messages, 6, "dropped calls get no tool message");
    assert_eq!(finalize.messages[1].tool_calls.len(), 6);
}

/// Equivalent search calls in one turn execute once; each id still gets a
/// result and a tool message.
#[tokio::test]
async fn duplicate_searches_execute_once() {
    let h = harness(
        ScriptedGateway::new()
            .reply(CompletionResult::tool_calls(vec![
                call("a", "search_web", json!({"query": "Rust"})),
                call("b", "search_web", json!({"query": " rust "})),
            ]))
            .reply(CompletionResult::text("ok")),
    );
    let request =
        ConversationRequest::new("openai/gpt-4o", "tell me about rust").with_tools(vec![search_schema()]);

    let events = collect(&h.orchestrator, request).await;

    assert_eq!(h.search_calls.load(Ordering::SeqCst), 1);
    let results: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::ToolResult { id, result, .. } => Some((id.clone(), result.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].1.result, results[1].1.result);
    let mut ids: Vec<_> = results.iter().map(|(id, _)| id.as_str()).collect();
    ids.sort_unstable();
    assert_eq!(ids, ["a", "b"]);

    let finalize = &h.gateway.calls()[1];
    let tool_ids: Vec<_> = finalize
        .messages
        .iter()
        .filter_map(|m| m.tool_call_id.as_deref())
        .collect();
    assert_eq!(tool_ids, ["a", "b"]);
}

/// With parallel calls allowed, results arrive in completion order while
/// tool messages keep request order.
#[tokio::test(start_paused = true)]
async fn concurrent_results_keep_message_order() {
    let h = harness(
        ScriptedGateway::new()
            .reply(CompletionResult::tool_calls(vec![
                call("slow", "sleep", json!({"ms": 2000})),
                call("fast", "sleep", json!({"ms": 10})),
            ]))
            .reply(CompletionResult::text("ok")),
    );
    let request = ConversationRequest::new("openai/gpt-4o", "nap").with_tools(vec![sleep_schema()]);

    let events = collect(&h.orchestrator, request).await;

    assert_eq!(
        kinds(&events),
        [
            "tool_calls",
            "tool_executing",
            "tool_executing",
            "tool_result",
            "tool_result",
            "content",
            "done"
        ]
    );
    let result_ids: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::ToolResult { id, .. } => Some(id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(result_ids, ["fast", "slow"]);

    let finalize = &h.gateway.calls()[1];
    let tool_ids: Vec<_> = finalize
        .messages
        .iter()
        .filter_map(|m| m.tool_call_id.as_deref())
        .collect();
    assert_eq!(tool_ids, ["slow", "fast"]);
}

/// Providers without parallel tool calls run the turn one call at a time.
#[tokio::test(start_paused = true)]
async fn sequential_provider_pairs_each_call() {
    let h = harness(
        ScriptedGateway::new()
            .reply(CompletionResult::tool_calls(vec![
                call("slow", "sleep", json!({"ms": 2000})),
                call("fast", "sleep", json!({"ms": 10})),
            ]))
            .reply(CompletionResult::text("ok")),
    );
    let request = ConversationRequest::new("anthropic/claude-sonnet-4", "nap")
        .with_tools(vec![sleep_schema()]);

    let events = collect(&h.orchestrator, request).await;

    assert_eq!(
        kinds(&events),
        [
            "tool_calls",
            "tool_executing",
            "tool_result",
            "tool_executing",
            "tool_result",
            "content",
            "done"
        ]
    );
    assert_eq!(h.gateway.calls()[0].params.parallel_tool_calls, Some(false));
}

/// A hung tool becomes a failed result and the conversation carries on.
#[tokio::test(start_paused = true)]
async fn tool_timeout_is_reported_and_survived() {
    let h = harness(
        ScriptedGateway::new()
            .reply(CompletionResult::tool_calls(vec![call(
                "c1",
                "sleep",
                json!({"ms": 60_000}),
            )]))
            .reply(CompletionResult::text("could not wait")),
    );
    let request = ConversationRequest::new("openai/gpt-4o", "nap").with_tools(vec![sleep_schema()]);

    let events = collect(&h.orchestrator, request).await;

    let failure = events
        .iter()
        .find_map(|e| match e {
            StreamEvent::ToolResult { result, .. } => Some(result.clone()),
            _ => None,
        })
        .unwrap();
    assert!(!failure.success);
    assert_eq!(
        failure.error.as_deref(),
        Some("Tool 'sleep' timed out after 5 seconds")
    );
    assert_eq!(content_of(&events), vec!["could not wait"]);

    let tool_message = h.gateway.calls()[1]
        .messages
        .iter()
        .find(|m| m.role == Role::Tool)
        .cloned()
        .unwrap();
    let payload: Value = serde_json::from_str(tool_message.content.as_deref().unwrap()).unwrap();
    assert_eq!(payload, json!({"error": "Tool 'sleep' timed out after 5 seconds"}));
}

#[tokio::test]
async fn unknown_tool_lists_available_tools() {
    let h = harness(
        ScriptedGateway::new()
            .reply(CompletionResult::tool_calls(vec![call("c1", "teleport", json!({}))]))
            .reply(CompletionResult::text("sorry")),
    );
    let request = ConversationRequest::new("openai/gpt-4o", "go").with_tools(vec![sleep_schema()]);

    let events = collect(&h.orchestrator, request).await;

    let error = events
        .iter()
        .find_map(|e| match e {
            StreamEvent::ToolResult { result, .. } => result.error.clone(),
            _ => None,
        })
        .unwrap();
    assert_eq!(error, "Unknown tool: teleport. Available tools: search_web, sleep");
}

// ── finalization ──────────────────────────────────────────────────────────────

/// Empty blocking finalization falls back to exactly one streaming call.
#[tokio::test]
async fn finalize_falls_back_to_streaming() {
    let h = harness(
        ScriptedGateway::new()
            .reply(CompletionResult::tool_calls(vec![call("c1", "sleep", json!({}))]))
            .reply(CompletionResult::default())
            .stream(vec![
                GatewayEvent::Reasoning("summarizing".into()),
                GatewayEvent::ContentDelta("Final ".into()),
                GatewayEvent::ContentDelta("answer".into()),
            ]),
    );
    let request = ConversationRequest::new("openai/gpt-4o", "nap").with_tools(vec![sleep_schema()]);

    let events = collect(&h.orchestrator, request).await;

    assert_eq!(content_of(&events), vec!["Final answer"]);
    assert!(events.contains(&StreamEvent::reasoning("summarizing")));
    let streaming: Vec<bool> = h.gateway.calls().iter().map(|c| c.streaming).collect();
    assert_eq!(streaming, [false, false, true]);
    assert_eq!(h.gateway.calls()[2].params.tool_choice, Some(ToolChoice::None));
}

/// Running the fallback chain twice from the same context takes the same
/// path and produces the same events.
#[tokio::test]
async fn finalize_fallback_chain_is_repeatable() {
    let h = harness(
        ScriptedGateway::new()
            .stream(vec![
                GatewayEvent::Reasoning("summarizing".into()),
                GatewayEvent::ContentDelta("From the nap: rested.".into()),
            ])
            .stream(vec![
                GatewayEvent::Reasoning("summarizing".into()),
                GatewayEvent::ContentDelta("From the nap: rested.".into()),
            ]),
    );
    let request = ConversationRequest::new("openai/gpt-4o", "nap").with_tools(vec![sleep_schema()]);
    let mut base = ConversationContext::new(
        &request,
        &GuardrailPolicy::builtin(),
        &SearchIntentDetector::new(),
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
    );
    let nap = call("c1", "sleep", json!({}));
    base.iteration = 1;
    base.messages.push(Message::assistant_tool_calls(vec![nap]));
    base.messages.push(Message::tool_result("c1", r#"{"slept_ms":0}"#));

    let mut runs = Vec::new();
    for _ in 0..2 {
        let mut ctx = base.clone();
        let (sink, mut rx) = event_channel(16);
        let text = h
            .orchestrator
            .finalize_after_tools(&request, &mut ctx, &sink)
            .await
            .unwrap();
        drop(sink);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        runs.push((text, kinds(&events), ctx.messages));
    }

    assert_eq!(runs[0], runs[1]);
    assert_eq!(runs[0].0.as_deref(), Some("From the nap: rested."));
    assert_eq!(runs[0].1, vec!["reasoning"]);

    let calls = h.gateway.calls();
    let order: Vec<bool> = calls.iter().map(|c| c.streaming).collect();
    assert_eq!(order, [false, true, false, true]);
    assert_eq!(calls[0].messages, calls[2].messages);
    assert_eq!(calls[1].messages, calls[3].messages);
    assert!(calls.iter().all(|c| c.params.tool_choice == Some(ToolChoice::None)));
}

/// A failing blocking finalization is not fatal either.
#[tokio::test]
async fn finalize_gateway_error_falls_back() {
    let h = harness(
        ScriptedGateway::new()
            .reply(CompletionResult::tool_calls(vec![call("c1", "sleep", json!({}))]))
            .fail(GatewayError::Http {
                status: 502,
                message: "bad gateway".into(),
            })
            .stream(vec![GatewayEvent::ContentDelta("recovered".into())]),
    );
    let request = ConversationRequest::new("openai/gpt-4o", "nap").with_tools(vec![sleep_schema()]);

    let events = collect(&h.orchestrator, request).await;

    assert_eq!(content_of(&events), vec!["recovered"]);
}

/// When both finalization steps come back empty the loop continues.
#[tokio::test]
async fn empty_finalization_continues_loop() {
    let h = harness(
        ScriptedGateway::new()
            .reply(CompletionResult::tool_calls(vec![call("c1", "sleep", json!({}))]))
            .reply(CompletionResult::default())
            .reply(CompletionResult::text("second try")),
    );
    let request = ConversationRequest::new("openai/gpt-4o", "nap").with_tools(vec![sleep_schema()]);

    let events = collect(&h.orchestrator, request).await;

    assert_eq!(content_of(&events), vec!["second try"]);
    let calls = h.gateway.calls();
    assert_eq!(calls.len(), 4, "tool turn, blocking, streaming, next turn");
    assert_eq!(calls[3].params.tool_choice, Some(ToolChoice::Auto));
}

// ── termination ───────────────────────────────────────────────────────────────

/// A model that never stops calling tools hits the cap.
#[tokio::test]
async fn iteration_cap_ends_conversation() {
    let h = harness(ScriptedGateway::new().always(CompletionResult::tool_calls(vec![call(
        "c1",
        "sleep",
        json!({}),
    )])));
    let request = ConversationRequest::new("openai/gpt-4o", "nap")
        .with_tools(vec![sleep_schema()])
        .with_max_iterations(3);

    let events = collect(&h.orchestrator, request).await;

    let tail = &events[events.len() - 3..];
    assert_eq!(
        tail,
        [
            StreamEvent::warning(
                "Reached maximum tool call iterations (3)",
                Some(CODE_ITERATION_CAP)
            ),
            StreamEvent::content(ITERATION_CAP_MESSAGE),
            StreamEvent::done(),
        ]
    );
    let turns = kinds(&events).iter().filter(|k| **k == "tool_calls").count();
    assert_eq!(turns, 3);
}

/// Empty first answer is retried; a forced-tool conversation retries its
/// second-iteration answer too; the third answer is accepted.
#[tokio::test]
async fn retry_policy_before_any_tool_runs() {
    let h = harness(
        ScriptedGateway::new()
            .reply(CompletionResult::default())
            .reply(CompletionResult::text("too early"))
            .reply(CompletionResult::text("final")),
    );
    let request = ConversationRequest::new("openai/gpt-4o", "search for rust news")
        .with_tools(vec![search_schema()]);

    let events = collect(&h.orchestrator, request).await;

    assert_eq!(events, vec![StreamEvent::content("final"), StreamEvent::done()]);
    let calls = h.gateway.calls();
    assert_eq!(calls.len(), 3);
    let last = calls[2].messages.last().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert_eq!(last.content.as_deref(), Some("too early"));
}

#[tokio::test]
async fn empty_answer_after_retries_gets_default_content() {
    let h = harness(ScriptedGateway::new());
    let request = ConversationRequest::new("openai/gpt-4o", "hi").with_tools(vec![sleep_schema()]);

    let events = collect(&h.orchestrator, request).await;

    assert_eq!(content_of(&events), vec![NO_CONTENT_MESSAGE]);
    assert_eq!(h.gateway.calls().len(), 3);
}

/// A gateway failure in the main loop ends with a bare done.
#[tokio::test]
async fn gateway_error_emits_only_done() {
    let h = harness(ScriptedGateway::new().fail(GatewayError::Transport {
        reason: "connection reset".into(),
    }));
    let request = ConversationRequest::new("openai/gpt-4o", "hi").with_tools(vec![sleep_schema()]);

    let events = collect(&h.orchestrator, request).await;

    assert_eq!(events, vec![StreamEvent::done()]);
}

/// Dropping the receiver stops the conversation promptly.
#[tokio::test]
async fn client_disconnect_cancels_conversation() {
    let h = harness(ScriptedGateway::new().hanging());
    let request = ConversationRequest::new("openai/gpt-4o", "hi").with_tools(vec![sleep_schema()]);

    let (sink, rx) = event_channel(4);
    let orchestrator = h.orchestrator.clone();
    let task = tokio::spawn(async move { orchestrator.run(request, sink).await });

    tokio::task::yield_now().await;
    drop(rx);

    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("conversation must stop after disconnect")
        .unwrap();
}

// ── guardrails and tool choice ────────────────────────────────────────────────

#[tokio::test]
async fn restrictive_provider_is_never_forced() {
    let h = harness(ScriptedGateway::new().reply(CompletionResult::text("ok")));
    let mut params = RequestParams::with_default_sampling();
    params.response_format = Some(json!({"type": "json_object"}));
    let request = ConversationRequest::new("x-ai/grok-4", "latest news today")
        .with_tools(vec![search_schema()])
        .with_params(params);

    collect(&h.orchestrator, request).await;

    let sent = &h.gateway.calls()[0].params;
    assert_eq!(sent.tool_choice, Some(ToolChoice::Auto));
    assert_eq!(sent.parallel_tool_calls, Some(false));
    assert!(sent.response_format.is_none());
}

/// `required` is a forced choice too and is downgraded for providers that
/// reject forcing.
#[tokio::test]
async fn required_tool_choice_respects_guardrails() {
    for (model, expected) in [
        ("x-ai/grok-4", ToolChoice::Auto),
        ("openai/gpt-4o", ToolChoice::Required),
    ] {
        let h = harness(ScriptedGateway::new().reply(CompletionResult::text("ok")));
        let request = ConversationRequest::new(model, "nap")
            .with_tools(vec![sleep_schema()])
            .with_tool_choice("required");

        collect(&h.orchestrator, request).await;

        assert_eq!(h.gateway.calls()[0].params.tool_choice, Some(expected), "{model}");
    }
}

#[tokio::test]
async fn explicit_tool_choice_forces_named_tool() {
    let h = harness(ScriptedGateway::new().reply(CompletionResult::text("ok")));
    let request = ConversationRequest::new("openai/gpt-4o", "nap")
        .with_tools(vec![sleep_schema(), search_schema()])
        .with_tool_choice("sleep");

    collect(&h.orchestrator, request).await;

    assert_eq!(
        h.gateway.calls()[0].params.tool_choice,
        Some(ToolChoice::Function("sleep".into()))
    );
}

#[tokio::test]
async fn undeclared_tool_choice_degrades_to_auto() {
    let h = harness(ScriptedGateway::new().reply(CompletionResult::text("ok")));
    let request = ConversationRequest::new("openai/gpt-4o", "nap")
        .with_tools(vec![sleep_schema()])
        .with_tool_choice("search_web");

    collect(&h.orchestrator, request).await;

    assert_eq!(h.gateway.calls()[0].params.tool_choice, Some(ToolChoice::Auto));
}

// ── streamed turns ────────────────────────────────────────────────────────────

/// In streamed-turn mode reasoning is forwarded live and tool call deltas are
/// assembled before execution.
#[tokio::test]
async fn streamed_turns_assemble_tool_calls() {
    let config = OrchestratorConfig {
        stream_turns: true,
        ..OrchestratorConfig::default()
    };
    let gateway = ScriptedGateway::new()
        .stream(vec![
            GatewayEvent::Reasoning("need a nap".into()),
            GatewayEvent::ToolCallDelta {
                index: 0,
                id: Some("c1".into()),
                name: Some("sleep".into()),
                arguments: "{\"ms\":".into(),
            },
            GatewayEvent::ToolCallDelta {
                index: 0,
                id: None,
                name: None,
                arguments: "1}".into(),
            },
            GatewayEvent::Finished(Some("tool_calls".into())),
        ])
        .reply(CompletionResult::text("rested"));
    let h = harness_with(gateway, config, Duration::ZERO);
    let request = ConversationRequest::new("openai/gpt-4o", "nap").with_tools(vec![sleep_schema()]);

    let events = collect(&h.orchestrator, request).await;

    assert_eq!(
        kinds(&events),
        ["reasoning", "tool_calls", "tool_executing", "tool_result", "content", "done"]
    );
    match &events[1] {
        StreamEvent::ToolCalls { calls } => {
            assert_eq!(calls, &vec![call("c1", "sleep", json!({"ms": 1}))]);
        }
        other => panic!("expected tool_calls, got {other:?}"),
    }
}
