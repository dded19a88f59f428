//! Multi-turn tool-calling conversation driver.
//!
//! One [`Orchestrator`] is shared by every conversation; each call to
//! [`Orchestrator::run`] drives a single conversation to completion and
//! writes its events into an [`EventSink`].
//!
//! Per iteration the model either asks for tools, answers, or returns
//! nothing:
//!
//! ```text
//!             ┌──────────────┐  tool calls  ┌──────────────┐
//!  start ───> │  call model  │ ───────────> │ execute turn │
//!             └──────┬───────┘              └──────┬───────┘
//!          content / │ empty                       │
//!            ┌───────┴───────┐                ┌────┴─────┐  text
//!            │ retry policy  │                │ finalize │ ──────> content
//!            └───────┬───────┘                └────┬─────┘
//!                    │ accept                      │ empty
//!                    v                             v
//!                 content                     next iteration
//! ```
//!
//! Every conversation ends with exactly one `done` event unless the client
//! disconnects first, in which case nothing more is written.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, info, warn};
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::error::GatewayError;
use crate::events::{
    CODE_ITERATION_CAP, CODE_TOOL_CLAMP, ClientGone, EventSink, StreamEvent, event_channel,
};
use crate::guardrails::{GuardrailPolicy, ProviderGuardrails, provider_id};
use crate::llm::client::ModelGateway;
use crate::llm::streaming_openai::CompletionAssembler;
use crate::llm::types::{
    CompletionKind, CompletionResult, GatewayEvent, Message, RequestParams, ToolCallRequest,
    ToolChoice, ToolSchema,
};
use crate::request::ConversationRequest;
use crate::search_intent::{SearchIntentDetector, TimeConstraint};
use crate::tools::{PlannedCall, ToolCategory, ToolRegistry, ToolResult, TurnPlan};

/// Sent when the model produced nothing usable and no retry applies.
pub const NO_CONTENT_MESSAGE: &str = "No additional content generated.";

/// Sent after the iteration cap is reached.
pub const ITERATION_CAP_MESSAGE: &str =
    "Stopped after maximum tool calls. No further content generated by the model.";

/// User prompt used when the client sent an empty one.
pub const EMPTY_PROMPT_FALLBACK: &str = "Hello";

// ---------------------------------------------------------------------------
// Conversation state
// ---------------------------------------------------------------------------

/// Mutable state of one conversation.  Never shared between conversations.
#[derive(Debug, Clone)]
pub struct ConversationContext {
    /// Full history sent to the model on every call.
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub tool_names: BTreeSet<String>,
    pub provider_id: String,
    pub guardrails: ProviderGuardrails,
    /// 1-based index of the current model call.
    pub iteration: u32,
    /// Names of tools that ran at least once.
    pub executed_tools: BTreeSet<String>,
    /// Set when a specific tool was forced on some iteration.
    pub forced_tool_first_turn: bool,
    /// Time window detected in the prompt, applied to search calls.
    pub time_constraint: Option<TimeConstraint>,
}

impl ConversationContext {
    pub fn new(
        request: &ConversationRequest,
        policy: &GuardrailPolicy,
        detector: &SearchIntentDetector,
        today: NaiveDate,
    ) -> Self {
        let provider = provider_id(&request.model);
        let tool_names = request.tools.iter().map(|t| t.name().to_owned()).collect();
        Self {
            messages: initial_messages(request.system.as_deref(), &request.prompt),
            tools: request.tools.clone(),
            tool_names,
            guardrails: policy.guardrails_for(&provider),
            provider_id: provider,
            iteration: 0,
            executed_tools: BTreeSet::new(),
            forced_tool_first_turn: false,
            time_constraint: detector.time_constraint(&request.prompt_text(), today),
        }
    }
}

/// Optional system message (only when non-blank) followed by the user
/// prompt, or [`EMPTY_PROMPT_FALLBACK`] when the prompt is blank.
pub fn initial_messages(system: Option<&str>, prompt: &str) -> Vec<Message> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = system.map(str::trim).filter(|s| !s.is_empty()) {
        messages.push(Message::system(system));
    }
    let prompt = prompt.trim();
    messages.push(Message::user(if prompt.is_empty() {
        EMPTY_PROMPT_FALLBACK
    } else {
        prompt
    }));
    messages
}

/// Why a conversation stopped early.
#[derive(Debug)]
enum Halt {
    ClientGone,
    Gateway(GatewayError),
}

impl From<ClientGone> for Halt {
    fn from(_: ClientGone) -> Self {
        Self::ClientGone
    }
}

impl From<GatewayError> for Halt {
    fn from(e: GatewayError) -> Self {
        Self::Gateway(e)
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Drives conversations against a model gateway and a tool registry.
#[derive(Clone)]
pub struct Orchestrator {
    gateway: Arc<dyn ModelGateway>,
    registry: Arc<ToolRegistry>,
    guardrails: Arc<GuardrailPolicy>,
    detector: Arc<SearchIntentDetector>,
    config: OrchestratorConfig,
    /// Fixed calendar date for time-window detection; `None` uses today (UTC).
    today: Option<NaiveDate>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(
        gateway: Arc<dyn ModelGateway>,
        registry: Arc<ToolRegistry>,
        guardrails: Arc<GuardrailPolicy>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            gateway,
            registry,
            guardrails,
            detector: Arc::new(SearchIntentDetector::new()),
            config,
            today: None,
        }
    }

    /// Replace the search-intent detector.
    pub fn with_detector(mut self, detector: SearchIntentDetector) -> Self {
        self.detector = Arc::new(detector);
        self
    }

    /// Pin the date used to resolve relative time phrases.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Utc::now().date_naive())
    }

    /// Spawn a conversation and return the receiving end of its events.
    ///
    /// Dropping the receiver cancels the conversation.
    pub fn start(&self, request: ConversationRequest) -> mpsc::Receiver<StreamEvent> {
        let (sink, rx) = event_channel(self.config.event_buffer);
        let this = self.clone();
        tokio::spawn(async move { this.run(request, sink).await });
        rx
    }

    /// Drive one conversation until `done` or until the client goes away.
    pub async fn run(&self, request: ConversationRequest, sink: EventSink) {
        let conversation_id = Uuid::now_v7();
        let span = tracing::info_span!(
            "conversation",
            id = %conversation_id,
            model = %request.model,
        );

        async move {
            let started = std::time::Instant::now();
            tokio::select! {
                biased;
                _ = sink.closed() => {
                    info!("client disconnected, abandoning conversation");
                }
                outcome = self.drive(request, &sink) => {
                    match outcome {
                        Ok(()) => {}
                        Err(Halt::Gateway(e)) => warn!(error = %e, "gateway call failed"),
                        Err(Halt::ClientGone) => {
                            debug!("client disconnected mid-conversation");
                            return;
                        }
                    }
                    if sink.emit(StreamEvent::done()).await.is_err() {
                        debug!("client disconnected before done");
                    }
                    info!(
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "conversation finished"
                    );
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn drive(&self, request: ConversationRequest, sink: &EventSink) -> Result<(), Halt> {
        let mut ctx =
            ConversationContext::new(&request, &self.guardrails, &self.detector, self.today());

        info!(
            provider = %ctx.provider_id,
            tools = ctx.tools.len(),
            "starting conversation"
        );

        if ctx.tools.is_empty() {
            return self.respond_directly(&request, &ctx, sink).await;
        }

        let limit = request
            .max_iterations
            .unwrap_or(self.config.max_iterations)
            .max(1);

        while ctx.iteration < limit {
            ctx.iteration += 1;
            let params = self.prepare_request_params(&request, &mut ctx);
            debug!(
                iteration = ctx.iteration,
                tool_choice = ?params.tool_choice,
                "calling model"
            );

            let result = self.call_model(&request.model, &ctx, &params, sink).await?;

            match result.kind() {
                CompletionKind::ToolCalls => {
                    self.execute_tools(result.tool_calls, &mut ctx, sink).await?;
                    if let Some(text) = self.finalize_after_tools(&request, &mut ctx, sink).await? {
                        sink.emit(StreamEvent::content(text)).await?;
                        return Ok(());
                    }
                    debug!(iteration = ctx.iteration, "finalization empty, continuing");
                }
                CompletionKind::Content => {
                    if should_retry(&ctx, true) {
                        debug!(iteration = ctx.iteration, "retrying after premature answer");
                        ctx.messages.push(Message::assistant(result.content));
                        continue;
                    }
                    let text = result.content.unwrap_or_default();
                    sink.emit(StreamEvent::content(text)).await?;
                    return Ok(());
                }
                CompletionKind::Empty => {
                    if should_retry(&ctx, false) {
                        debug!(iteration = ctx.iteration, "retrying after empty response");
                        continue;
                    }
                    sink.emit(StreamEvent::content(NO_CONTENT_MESSAGE)).await?;
                    return Ok(());
                }
            }
        }

        warn!(limit, "iteration cap reached");
        sink.emit(StreamEvent::warning(
            format!("Reached maximum tool call iterations ({limit})"),
            Some(CODE_ITERATION_CAP),
        ))
        .await?;
        sink.emit(StreamEvent::content(ITERATION_CAP_MESSAGE)).await?;
        Ok(())
    }

    /// No tools declared: stream the answer straight through.
    async fn respond_directly(
        &self,
        request: &ConversationRequest,
        ctx: &ConversationContext,
        sink: &EventSink,
    ) -> Result<(), Halt> {
        let mut params = request.params.clone();
        if !ctx.guardrails.allow_structured_output {
            params.response_format = None;
        }

        let mut stream = self
            .gateway
            .stream_complete(&request.model, &ctx.messages, &params)
            .await?;

        let mut wrote_content = false;
        while let Some(event) = stream.next().await {
            match event? {
                GatewayEvent::Reasoning(text) => sink.emit(StreamEvent::reasoning(text)).await?,
                GatewayEvent::ContentDelta(text) if !text.is_empty() => {
                    wrote_content = true;
                    sink.emit(StreamEvent::content(text)).await?;
                }
                _ => {}
            }
        }

        if !wrote_content {
            sink.emit(StreamEvent::content(NO_CONTENT_MESSAGE)).await?;
        }
        Ok(())
    }

    /// Build the parameters for the next model call.
    ///
    /// Applies the client's tool choice, the first-turn search heuristic and
    /// the provider's guardrails, in that order.
    pub fn prepare_request_params(
        &self,
        request: &ConversationRequest,
        ctx: &mut ConversationContext,
    ) -> RequestParams {
        let mut params = request.params.clone();
        params.tools = ctx.tools.clone();

        let mut choice = request
            .tool_choice
            .as_deref()
            .map(|raw| ToolChoice::parse(raw, ctx.tool_names.iter().map(String::as_str)))
            .unwrap_or_default();

        if choice.is_forced() {
            if ctx.guardrails.allow_forced_tool_choice {
                ctx.forced_tool_first_turn = true;
            } else {
                debug!(provider = %ctx.provider_id, "provider rejects forced tool choice");
                choice = ToolChoice::Auto;
            }
        }

        if ctx.iteration == 1
            && choice == ToolChoice::Auto
            && ctx.guardrails.allow_forced_tool_choice
            && let Some(search_tool) = self.search_tool(ctx)
            && self.detector.implies_search(&request.prompt_text(), self.today())
        {
            debug!(tool = %search_tool, "prompt implies search, forcing first turn");
            choice = ToolChoice::Function(search_tool);
            ctx.forced_tool_first_turn = true;
        }

        params.tool_choice = Some(choice);
        params.parallel_tool_calls = Some(ctx.guardrails.allow_parallel_tool_calls);
        if !ctx.guardrails.allow_structured_output {
            params.response_format = None;
        }
        params
    }

    /// First declared tool the registry files under search.
    fn search_tool(&self, ctx: &ConversationContext) -> Option<String> {
        ctx.tools
            .iter()
            .map(ToolSchema::name)
            .find(|name| self.registry.metadata_for(name).category == ToolCategory::Search)
            .map(str::to_owned)
    }

    /// One model call, blocking or streamed depending on configuration.
    /// Reasoning is forwarded as it becomes available.
    async fn call_model(
        &self,
        model: &str,
        ctx: &ConversationContext,
        params: &RequestParams,
        sink: &EventSink,
    ) -> Result<CompletionResult, Halt> {
        if !self.config.stream_turns {
            let result = self.gateway.complete(model, &ctx.messages, params).await?;
            if let Some(reasoning) = &result.reasoning {
                sink.emit(StreamEvent::reasoning(reasoning.clone())).await?;
            }
            return Ok(result);
        }

        let mut stream = self
            .gateway
            .stream_complete(model, &ctx.messages, params)
            .await?;
        let mut assembler = CompletionAssembler::new();
        while let Some(event) = stream.next().await {
            let event = event?;
            if let GatewayEvent::Reasoning(text) = &event {
                sink.emit(StreamEvent::reasoning(text.clone())).await?;
            }
            assembler.apply(&event);
        }
        let mut result = assembler.finish();
        // Already forwarded piecewise.
        result.reasoning = None;
        Ok(result)
    }

    // -- Tool turn -----------------------------------------------------------

    /// Clamp, dedupe and run one turn of tool calls, appending the
    /// assistant and tool messages to the history.
    async fn execute_tools(
        &self,
        requested: Vec<ToolCallRequest>,
        ctx: &mut ConversationContext,
        sink: &EventSink,
    ) -> Result<(), ClientGone> {
        let requested_count = requested.len();
        let limit = self.config.max_tool_calls_per_turn;
        let plan = TurnPlan::build(
            requested,
            &self.registry,
            limit,
            ctx.time_constraint.as_ref(),
        );

        if plan.clamped() {
            warn!(requested = requested_count, kept = limit, "clamping tool calls");
            sink.emit(StreamEvent::warning(
                format!("Trimmed tool calls to {limit}"),
                Some(CODE_TOOL_CLAMP),
            ))
            .await?;
        }

        let requests = plan.requests();
        info!(
            iteration = ctx.iteration,
            calls = requests.len(),
            executions = plan.execution_count(),
            "executing tool turn"
        );
        sink.emit(StreamEvent::ToolCalls {
            calls: requests.clone(),
        })
        .await?;
        ctx.messages.push(Message::assistant_tool_calls(requests));

        let results = if ctx.guardrails.allow_parallel_tool_calls {
            self.run_concurrent(&plan, sink).await?
        } else {
            self.run_sequential(&plan, sink).await?
        };

        for (call, result) in plan.calls.iter().zip(&results) {
            ctx.messages
                .push(Message::tool_result(&call.request.id, result.to_message_content()));
            ctx.executed_tools.insert(call.request.name.clone());
        }
        Ok(())
    }

    async fn run_sequential(
        &self,
        plan: &TurnPlan,
        sink: &EventSink,
    ) -> Result<Vec<ToolResult>, ClientGone> {
        let mut results: Vec<ToolResult> = Vec::with_capacity(plan.calls.len());
        for call in &plan.calls {
            sink.emit(executing_event(call)).await?;
            let result = match call.duplicate_of.and_then(|first| results.get(first)) {
                Some(primary) => primary.clone(),
                None => {
                    self.registry
                        .execute(&call.request.name, call.arguments.clone())
                        .await
                }
            }
            .with_id(&call.request.id);
            sink.emit(result_event(call, result.clone())).await?;
            results.push(result);
        }
        Ok(results)
    }

    /// Unique calls run together; results are emitted as they complete and
    /// returned in plan order.
    async fn run_concurrent(
        &self,
        plan: &TurnPlan,
        sink: &EventSink,
    ) -> Result<Vec<ToolResult>, ClientGone> {
        for call in &plan.calls {
            sink.emit(executing_event(call)).await?;
        }

        let mut pending: FuturesUnordered<_> = plan
            .calls
            .iter()
            .enumerate()
            .filter(|(_, call)| call.duplicate_of.is_none())
            .map(|(index, call)| {
                let registry = &self.registry;
                async move {
                    let result = registry
                        .execute(&call.request.name, call.arguments.clone())
                        .await;
                    (index, result)
                }
            })
            .collect();

        let mut slots: Vec<Option<ToolResult>> = vec![None; plan.calls.len()];
        while let Some((index, result)) = pending.next().await {
            for (slot, call) in plan.calls.iter().enumerate() {
                if slot != index && call.duplicate_of != Some(index) {
                    continue;
                }
                let result = result.clone().with_id(&call.request.id);
                sink.emit(result_event(call, result.clone())).await?;
                slots[slot] = Some(result);
            }
        }

        Ok(slots
            .into_iter()
            .zip(&plan.calls)
            .map(|(slot, call)| {
                slot.unwrap_or_else(|| {
                    ToolResult::failure("tool was not executed").with_id(&call.request.id)
                })
            })
            .collect())
    }

    // -- Finalization --------------------------------------------------------

    /// Ask the model to answer from the tool results it now has.
    ///
    /// Tries a blocking call first and a streaming call second, both with
    /// tool use disabled.  Returns `None` when neither produced text; gateway
    /// failures here are logged and treated as empty.
    pub async fn finalize_after_tools(
        &self,
        request: &ConversationRequest,
        ctx: &mut ConversationContext,
        sink: &EventSink,
    ) -> Result<Option<String>, ClientGone> {
        ctx.messages
            .push(Message::user(self.config.finalization_prompt.clone()));

        let mut params = request.params.clone();
        params.tools = ctx.tools.clone();
        params.tool_choice = Some(ToolChoice::None);
        if !ctx.guardrails.allow_structured_output {
            params.response_format = None;
        }

        let blocking = self.finalize_blocking(&request.model, ctx, &params, sink).await;
        if let Some(text) = absorb(blocking, "blocking")? {
            return Ok(Some(text));
        }

        let streamed = self.finalize_streaming(&request.model, ctx, &params, sink).await;
        absorb(streamed, "streaming")
    }

    async fn finalize_blocking(
        &self,
        model: &str,
        ctx: &ConversationContext,
        params: &RequestParams,
        sink: &EventSink,
    ) -> Result<Option<String>, Halt> {
        let result = self.gateway.complete(model, &ctx.messages, params).await?;
        if let Some(reasoning) = result.reasoning {
            sink.emit(StreamEvent::reasoning(reasoning)).await?;
        }
        Ok(result.content)
    }

    async fn finalize_streaming(
        &self,
        model: &str,
        ctx: &ConversationContext,
        params: &RequestParams,
        sink: &EventSink,
    ) -> Result<Option<String>, Halt> {
        let mut stream = self
            .gateway
            .stream_complete(model, &ctx.messages, params)
            .await?;
        let mut text = String::new();
        while let Some(event) = stream.next().await {
            match event? {
                GatewayEvent::ContentDelta(delta) => text.push_str(&delta),
                GatewayEvent::Reasoning(r) => sink.emit(StreamEvent::reasoning(r)).await?,
                _ => {}
            }
        }
        Ok((!text.trim().is_empty()).then_some(text))
    }
}

/// Decide whether an answer (or non-answer) should be thrown back for
/// another iteration.
///
/// A content answer is retried only on iteration 2, when no tool ran and a
/// tool had been forced.  An empty response is retried on the first two
/// iterations when no tool ran.
pub fn should_retry(ctx: &ConversationContext, has_content: bool) -> bool {
    let nothing_ran = ctx.executed_tools.is_empty();
    if has_content {
        ctx.iteration == 2 && nothing_ran && ctx.forced_tool_first_turn
    } else {
        ctx.iteration <= 2 && nothing_ran
    }
}

/// Log gateway failures of a finalization step and treat them as empty.
fn absorb(outcome: Result<Option<String>, Halt>, step: &str) -> Result<Option<String>, ClientGone> {
    match outcome {
        Ok(Some(text)) => Ok(Some(text)),
        Ok(None) => {
            debug!(step, "finalization produced no text");
            Ok(None)
        }
        Err(Halt::Gateway(e)) => {
            warn!(step, error = %e, "finalization call failed");
            Ok(None)
        }
        Err(Halt::ClientGone) => Err(ClientGone),
    }
}

fn executing_event(call: &PlannedCall) -> StreamEvent {
    StreamEvent::tool_executing(&call.request.id, &call.request.name, call.metadata)
}

fn result_event(call: &PlannedCall, result: ToolResult) -> StreamEvent {
    StreamEvent::tool_result(&call.request.id, &call.request.name, result, call.metadata)
}
