//! Orchestrator — the `Agent` state machine driving one run at a time.
//!
//! `send()` takes the single run slot, then loops: compress history,
//! stream one LLM round, check the requested calls for loops, gate and
//! execute them, append results, repeat. Every exit path funnels through
//! `finalize()`, which settles leftover tool calls, stores the history
//! and emits `RunFinished` exactly once.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use codehelm_core::bus::{AgentEvent, EventBus};
use codehelm_core::config::{AutoApproveConfig, Config, ToolCallFormat};
use codehelm_core::error::{AgentError, FieldIssue, ToolError};
use codehelm_core::run::{ApprovalType, RunOutcome, ToolCallRecord, ToolCallStatus};
use codehelm_core::types::{Message, StreamEvent, ToolCall};
use codehelm_providers::{LlmProvider, LlmRequest, LlmRequestConfig};

use crate::approval::{requires_prompt, ApprovalGate};
use crate::checkpoint::{CheckpointService, InMemoryCheckpointStore};
use crate::compressor::{CompressionState, ContextCompressor};
use crate::context::{AgentMode, ContextBuilder};
use crate::executor::{ToolExecutor, ToolOutcome};
use crate::loop_detector::{LoopDetector, ToolCallSignature};
use crate::parser::{format_tool_result, generate_call_id, ParsedToolCall, StreamingToolCallParser};
use crate::summarizer::{LlmSummarizer, Summarizer};
use crate::tools::schema::parse_arguments;
use crate::tools::{ToolContext, ToolRegistry};

const NOT_EXECUTED: &str = "not executed: run stopped";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ─────────────────────────────────────────────
// Run report
// ─────────────────────────────────────────────

/// Everything a caller learns about a finished run.
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub outcome: RunOutcome,
    /// Visible text of the last assistant message.
    pub final_text: String,
    pub tool_calls: Vec<ToolCallRecord>,
    /// LLM rounds that requested tools.
    pub rounds: u32,
    pub compression: CompressionState,
}

struct RunState {
    id: String,
    messages: Vec<Message>,
    records: Vec<ToolCallRecord>,
    final_text: String,
    rounds: u32,
    compression: CompressionState,
}

/// Releases the run slot on every exit path, including panics.
struct RunGuard<'a> {
    running: &'a AtomicBool,
    cancel: &'a Mutex<Option<CancellationToken>>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        lock(self.cancel).take();
        self.running.store(false, Ordering::Release);
    }
}

/// Aborts the provider task when the round is abandoned.
struct AbortOnDrop(tokio::task::JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

// ─────────────────────────────────────────────
// One LLM round
// ─────────────────────────────────────────────

struct LlmTurn {
    /// Text shown to the user (call blocks removed in inline mode).
    text: String,
    /// Text exactly as the model produced it.
    raw_text: String,
    reasoning: String,
    calls: Vec<ToolCall>,
}

enum RoundError {
    Cancelled { partial: String },
    Retryable(String),
    Fatal(String),
}

/// Accumulates stream events into an `LlmTurn`, publishing deltas as
/// they arrive.
struct TurnBuilder<'a> {
    bus: &'a EventBus,
    parser: Option<StreamingToolCallParser>,
    raw_text: String,
    text: String,
    reasoning: String,
    calls: Vec<ToolCall>,
    last_partial: Option<ParsedToolCall>,
}

impl<'a> TurnBuilder<'a> {
    fn new(bus: &'a EventBus, inline: bool) -> Self {
        Self {
            bus,
            parser: inline.then(StreamingToolCallParser::new),
            raw_text: String::new(),
            text: String::new(),
            reasoning: String::new(),
            calls: Vec::new(),
            last_partial: None,
        }
    }

    fn emit_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.text.push_str(text);
        self.bus.publish(AgentEvent::TextDelta {
            text: text.to_string(),
        });
    }

    fn publish_inline(&self, call: &ParsedToolCall) {
        self.bus.publish(AgentEvent::ToolCallStreaming {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
            streaming: call.streaming,
        });
    }

    fn push_text(&mut self, delta: &str) {
        self.raw_text.push_str(delta);
        if self.parser.is_none() {
            self.emit_text(delta);
            return;
        }
        let Some(parser) = self.parser.as_mut() else {
            return;
        };
        parser.push(delta);
        let visible = parser.take_visible();
        let completed = parser.take_completed();
        let partial = parser.partial();

        self.emit_text(&visible);
        for call in completed {
            self.publish_inline(&call);
            self.calls.push(call.to_tool_call());
        }
        if let Some(partial) = partial {
            if self.last_partial.as_ref() != Some(&partial) {
                self.publish_inline(&partial);
                self.last_partial = Some(partial);
            }
        }
    }

    fn push_reasoning(&mut self, delta: &str) {
        self.reasoning.push_str(delta);
        self.bus.publish(AgentEvent::ReasoningDelta {
            text: delta.to_string(),
        });
    }

    fn push_native_call(&mut self, mut call: ToolCall) {
        if call.id.is_empty() {
            call.id = generate_call_id("native");
        }
        self.calls.push(call);
    }

    fn finish(mut self) -> LlmTurn {
        if let Some(mut parser) = self.parser.take() {
            let flushed = parser.finish();
            let visible = parser.take_visible();
            self.emit_text(&visible);
            for call in flushed {
                self.publish_inline(&call);
                self.calls.push(call.to_tool_call());
            }
        }
        LlmTurn {
            text: self.text.trim().to_string(),
            raw_text: self.raw_text,
            reasoning: self.reasoning,
            calls: self.calls,
        }
    }
}

/// A call that passed validation and is ready to run.
struct ReadyCall {
    args: HashMap<String, Value>,
    approval: ApprovalType,
    gated: bool,
    parallel: bool,
}

enum Decision {
    Approved,
    Rejected,
    Aborted,
}

// ─────────────────────────────────────────────
// Agent
// ─────────────────────────────────────────────

/// The orchestrator. Share it behind an `Arc`: `send()` runs on one task
/// while `approve()`, `reject()` and `abort()` are called from another.
pub struct Agent {
    config: Config,
    provider: Arc<dyn LlmProvider>,
    registry: Arc<ToolRegistry>,
    executor: ToolExecutor,
    compressor: ContextCompressor,
    checkpoints: Arc<dyn CheckpointService>,
    bus: EventBus,
    gate: ApprovalGate,
    auto_approve: Mutex<AutoApproveConfig>,
    running: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
    /// Conversation carried from one run to the next.
    history: Mutex<Vec<Message>>,
}

impl Agent {
    pub fn new(config: Config, provider: Arc<dyn LlmProvider>, registry: ToolRegistry, bus: EventBus) -> Self {
        let registry = Arc::new(registry);
        let checkpoints: Arc<dyn CheckpointService> =
            Arc::new(InMemoryCheckpointStore::with_limit(config.tools.max_checkpoints));
        let summarizer: Arc<dyn Summarizer> =
            Arc::new(LlmSummarizer::new(provider.clone(), config.agent.model.clone()));

        info!(
            provider = provider.display_name(),
            model = %config.agent.model,
            tools = registry.len(),
            max_tool_rounds = config.agent.max_tool_rounds,
            "agent initialized"
        );

        Self {
            executor: ToolExecutor::new(registry.clone()).with_checkpoints(checkpoints.clone()),
            compressor: ContextCompressor::new(config.compression.clone(), summarizer)
                .with_summary_timeout(Duration::from_secs(config.agent.request_timeout_secs)),
            auto_approve: Mutex::new(config.approval),
            config,
            provider,
            registry,
            checkpoints,
            bus,
            gate: ApprovalGate::new(),
            running: AtomicBool::new(false),
            cancel: Mutex::new(None),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn with_checkpoints(mut self, service: Arc<dyn CheckpointService>) -> Self {
        self.executor = ToolExecutor::new(self.registry.clone()).with_checkpoints(service.clone());
        self.checkpoints = service;
        self
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.compressor = ContextCompressor::new(self.config.compression.clone(), summarizer)
            .with_summary_timeout(Duration::from_secs(self.config.agent.request_timeout_secs));
        self
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn checkpoints(&self) -> &Arc<dyn CheckpointService> {
        &self.checkpoints
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Id of the tool call waiting for a decision.
    pub fn pending_approval(&self) -> Option<String> {
        self.gate.pending()
    }

    /// Replace the auto-approval switches; read again for every tool call.
    pub fn set_auto_approve(&self, auto: AutoApproveConfig) {
        *lock(&self.auto_approve) = auto;
    }

    pub fn clear_history(&self) {
        lock(&self.history).clear();
    }

    pub fn history_len(&self) -> usize {
        lock(&self.history).len()
    }

    fn model(&self) -> String {
        if self.config.agent.model.is_empty() {
            self.provider.default_model().to_string()
        } else {
            self.config.agent.model.clone()
        }
    }

    // ── Control surface ──

    /// Approve the outstanding request. `false` if nothing was pending.
    pub fn approve(&self) -> bool {
        self.gate.approve().is_some()
    }

    /// Reject the outstanding request. `false` if nothing was pending.
    pub fn reject(&self) -> bool {
        self.gate.reject().is_some()
    }

    /// Cancel the current run. `false` if no run was active.
    pub fn abort(&self) -> bool {
        let token = lock(&self.cancel).clone();
        self.gate.abort();
        match token {
            Some(token) => {
                info!("abort requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    // ── Run ──

    /// Run one user message to completion.
    ///
    /// Returns `Err` only when the run cannot start; everything that
    /// happens during the run is reported in the `RunReport`.
    pub async fn send(
        &self,
        message: &str,
        workspace: &Path,
        system_prompt: Option<&str>,
        mode: AgentMode,
    ) -> Result<RunReport, AgentError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("send ignored: a run is already in progress");
            return Err(AgentError::RunInProgress);
        }
        let _guard = RunGuard {
            running: &self.running,
            cancel: &self.cancel,
        };

        if !self.provider.is_configured() {
            warn!(provider = self.provider.display_name(), "provider has no credentials");
            return Err(AgentError::NotConfigured(self.provider.display_name().to_string()));
        }

        let cancel = CancellationToken::new();
        *lock(&self.cancel) = Some(cancel.clone());

        let run_id = format!("run_{}", uuid::Uuid::new_v4().simple());
        info!(run_id = %run_id, mode = %mode, workspace = %workspace.display(), "run started");
        self.bus.publish(AgentEvent::RunStarted {
            run_id: run_id.clone(),
            mode: mode.to_string(),
        });

        let mut messages = std::mem::take(&mut *lock(&self.history));
        messages.push(Message::user(message));
        let mut run = RunState {
            id: run_id,
            messages,
            records: Vec::new(),
            final_text: String::new(),
            rounds: 0,
            compression: CompressionState::default(),
        };

        let outcome = self.drive(&mut run, workspace, system_prompt, mode, &cancel).await;
        Ok(self.finalize(run, outcome))
    }

    async fn drive(
        &self,
        run: &mut RunState,
        workspace: &Path,
        system_prompt: Option<&str>,
        mode: AgentMode,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let inline = self.config.agent.tool_call_format == ToolCallFormat::Inline;
        let definitions = match mode {
            AgentMode::Agent => self.registry.get_definitions(),
            AgentMode::Ask => self.registry.read_only_definitions(),
        };
        let offered: HashSet<String> = definitions.iter().map(|d| d.function.name.clone()).collect();
        let system = ContextBuilder::new(workspace).build_system_prompt(
            mode,
            system_prompt,
            inline.then_some(definitions.as_slice()),
        );
        let mut detector = LoopDetector::new(&self.config.loop_detection);
        let max_rounds = self.config.agent.max_tool_rounds;

        loop {
            if cancel.is_cancelled() {
                return RunOutcome::Aborted;
            }

            // Dropping the compression future leaves history untouched.
            let compression = tokio::select! {
                biased;
                _ = cancel.cancelled() => return RunOutcome::Aborted,
                outcome = self.compressor.compress(&mut run.messages) => outcome,
            };
            if compression.applied {
                self.bus.publish(AgentEvent::CompressionApplied {
                    level: compression.state.level,
                    tokens_before: compression.tokens_before,
                    tokens_after: compression.state.estimated_tokens,
                });
            }
            run.compression = compression.state;

            let mut messages = Vec::with_capacity(run.messages.len() + 1);
            messages.push(Message::system(system.clone()));
            messages.extend(run.messages.iter().cloned());
            let request = LlmRequest {
                messages,
                tools: (!inline && !definitions.is_empty()).then(|| definitions.clone()),
                model: self.model(),
                config: LlmRequestConfig {
                    max_tokens: self.config.agent.max_tokens,
                    temperature: self.config.agent.temperature,
                },
            };

            let turn = match self.stream_round(request, inline, cancel).await {
                Ok(turn) => turn,
                Err(RoundError::Cancelled { partial }) => {
                    if !partial.is_empty() {
                        run.messages.push(Message::assistant(partial.clone()));
                        run.final_text = partial;
                    }
                    return RunOutcome::Aborted;
                }
                Err(RoundError::Retryable(reason) | RoundError::Fatal(reason)) => {
                    return RunOutcome::Failed { reason };
                }
            };

            if turn.calls.is_empty() {
                run.messages
                    .push(Message::assistant_turn(Some(turn.text.clone()), Some(turn.reasoning), vec![]));
                run.final_text = turn.text;
                return RunOutcome::Completed;
            }

            if run.rounds >= max_rounds {
                // The requested calls are dropped, not executed.
                run.messages
                    .push(Message::assistant_turn(Some(turn.text.clone()), Some(turn.reasoning), vec![]));
                run.final_text = turn.text;
                return RunOutcome::MaxRoundsReached { limit: max_rounds };
            }
            run.rounds += 1;
            debug!(run_id = %run.id, round = run.rounds, calls = turn.calls.len(), "tool round");

            run.messages.push(if inline {
                Message::assistant_turn(Some(turn.raw_text), Some(turn.reasoning), vec![])
            } else {
                Message::assistant_turn(Some(turn.text), Some(turn.reasoning), turn.calls.clone())
            });

            let first = run.records.len();
            let mut parsed = Vec::with_capacity(turn.calls.len());
            for call in &turn.calls {
                let arguments = parse_arguments(&call.function.arguments);
                let shown = arguments
                    .clone()
                    .unwrap_or_else(|_| Value::String(call.function.arguments.clone()));
                let record = ToolCallRecord::new(&call.id, &call.function.name, shown);
                self.publish_record(&record);
                run.records.push(record);
                parsed.push(arguments);
            }

            let signatures: Vec<ToolCallSignature> = turn
                .calls
                .iter()
                .zip(&parsed)
                .filter_map(|(call, args)| {
                    let args = args.as_ref().ok()?;
                    let name = &call.function.name;
                    Some(ToolCallSignature::new(name, args, self.registry.is_mutating(name)))
                })
                .collect();

            let stop = match detector.check_batch(signatures) {
                Some(detection) => {
                    let reason = format!("not executed: {}", detection.reason);
                    for record in &mut run.records[first..] {
                        record.fail(reason.clone());
                        self.publish_record(record);
                    }
                    Some(RunOutcome::LoopDetected {
                        reason: detection.reason,
                    })
                }
                None => {
                    let ctx = ToolContext::new(workspace, format!("{}_r{}", run.id, run.rounds))
                        .with_restriction(self.config.tools.restrict_to_workspace);
                    self.execute_round(&mut run.records[first..], parsed, &offered, mode, &ctx, cancel)
                        .await
                }
            };

            self.settle(&mut run.records[first..], cancel.is_cancelled());
            for record in &run.records[first..] {
                let is_error = record.status != ToolCallStatus::Success;
                run.messages.push(if inline {
                    Message::user(format_tool_result(&record.name, &record.id, &record.outcome_text(), is_error))
                } else {
                    Message::tool_result(&record.id, record.outcome_text())
                });
            }

            if let Some(outcome) = stop {
                return outcome;
            }
        }
    }

    /// Validate, gate and execute one round of calls.
    ///
    /// Consecutive parallel-safe, ungated calls run concurrently; gated and
    /// mutating calls run one at a time. Returns `Some` when the run must
    /// stop.
    async fn execute_round(
        &self,
        records: &mut [ToolCallRecord],
        parsed: Vec<Result<Value, FieldIssue>>,
        offered: &HashSet<String>,
        mode: AgentMode,
        ctx: &ToolContext,
        cancel: &CancellationToken,
    ) -> Option<RunOutcome> {
        let mut prepared: Vec<Option<ReadyCall>> = Vec::with_capacity(records.len());
        for (record, arguments) in records.iter_mut().zip(parsed) {
            let ready = self.prepare(record, arguments, offered, mode);
            if ready.is_none() {
                self.publish_record(record);
            }
            prepared.push(ready);
        }

        let mut i = 0;
        while i < prepared.len() {
            if cancel.is_cancelled() {
                return Some(RunOutcome::Aborted);
            }
            let Some(ready) = &prepared[i] else {
                i += 1;
                continue;
            };

            if ready.parallel {
                let mut end = i;
                while end < prepared.len() && prepared[end].as_ref().is_some_and(|r| r.parallel) {
                    end += 1;
                }
                let jobs: Vec<(usize, String, HashMap<String, Value>)> = (i..end)
                    .filter_map(|k| {
                        let ready = prepared[k].as_ref()?;
                        Some((k, records[k].name.clone(), ready.args.clone()))
                    })
                    .collect();
                for (k, _, _) in &jobs {
                    records[*k].start();
                    self.publish_record(&records[*k]);
                }

                let batch = join_all(
                    jobs.iter()
                        .map(|(_, name, args)| self.executor.execute(name, args.clone(), ctx)),
                );
                let outcomes = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Some(RunOutcome::Aborted),
                    outcomes = batch => outcomes,
                };

                // Results land in request order regardless of completion order.
                let mut stop = None;
                for ((k, _, _), outcome) in jobs.iter().zip(outcomes) {
                    if let Some(outcome) = self.apply_outcome(&mut records[*k], outcome) {
                        stop.get_or_insert(outcome);
                    }
                }
                if stop.is_some() {
                    return stop;
                }
                i = end;
                continue;
            }

            if ready.gated {
                match self.request_approval(&mut records[i], ready.approval, cancel).await {
                    Decision::Approved => {}
                    Decision::Rejected => {
                        i += 1;
                        continue;
                    }
                    Decision::Aborted => return Some(RunOutcome::Aborted),
                }
            }

            records[i].start();
            self.publish_record(&records[i]);
            let name = records[i].name.clone();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Some(RunOutcome::Aborted),
                outcome = self.executor.execute(&name, ready.args.clone(), ctx) => outcome,
            };
            if let Some(stop) = self.apply_outcome(&mut records[i], outcome) {
                return Some(stop);
            }
            i += 1;
        }
        None
    }

    /// Validate one call. Failures are recorded on the call and yield `None`.
    fn prepare(
        &self,
        record: &mut ToolCallRecord,
        arguments: Result<Value, FieldIssue>,
        offered: &HashSet<String>,
        mode: AgentMode,
    ) -> Option<ReadyCall> {
        let value = match arguments {
            Ok(value) => value,
            Err(issue) => {
                let err = ToolError::Validation {
                    tool: record.name.clone(),
                    issues: vec![issue],
                };
                record.fail(err.to_string());
                return None;
            }
        };
        if self.registry.has(&record.name) && !offered.contains(&record.name) {
            record.fail(format!("Tool '{}' is not available in {mode} mode", record.name));
            return None;
        }
        let args = match self.registry.validate(&record.name, &value) {
            Ok(args) => args,
            Err(e) => {
                debug!(tool = %record.name, error = %e, "tool arguments rejected");
                record.fail(e.to_string());
                return None;
            }
        };

        let auto = *lock(&self.auto_approve);
        let approval = self.registry.get_approval_type(&record.name, &args);
        let gated = requires_prompt(approval, &auto);
        record.approval = approval;
        Some(ReadyCall {
            parallel: !gated && self.registry.is_parallel_safe(&record.name),
            args,
            approval,
            gated,
        })
    }

    async fn request_approval(
        &self,
        record: &mut ToolCallRecord,
        approval: ApprovalType,
        cancel: &CancellationToken,
    ) -> Decision {
        record.await_approval(approval);
        self.publish_record(record);

        let rx = match self.gate.request(&record.id) {
            Ok(rx) => rx,
            Err(e) => {
                warn!(tool = %record.name, error = %e, "approval slot busy");
                record.reject(e.to_string());
                self.publish_record(record);
                return Decision::Rejected;
            }
        };
        self.bus.publish(AgentEvent::ApprovalRequested {
            tool_call_id: record.id.clone(),
            tool: record.name.clone(),
            approval,
            arguments: record.arguments.clone(),
        });

        let approved = self.gate.await_decision(rx, cancel).await;
        self.bus.publish(AgentEvent::ApprovalResolved {
            tool_call_id: record.id.clone(),
            approved,
        });

        if cancel.is_cancelled() {
            record.abort();
            self.publish_record(record);
            return Decision::Aborted;
        }
        if !approved {
            record.reject("declined");
            self.publish_record(record);
            return Decision::Rejected;
        }
        Decision::Approved
    }

    fn apply_outcome(&self, record: &mut ToolCallRecord, outcome: ToolOutcome) -> Option<RunOutcome> {
        let stop = match outcome {
            ToolOutcome::Success(output) => {
                record.succeed(output);
                None
            }
            ToolOutcome::Failed { message, fatal } => {
                record.fail(message.clone());
                fatal.then(|| {
                    error!(tool = %record.name, error = %message, "non-retryable tool failure; stopping run");
                    RunOutcome::Failed {
                        reason: format!("tool '{}' failed: {message}", record.name),
                    }
                })
            }
        };
        self.publish_record(record);
        stop
    }

    /// Move every unfinished call to a terminal state.
    fn settle(&self, records: &mut [ToolCallRecord], aborted: bool) {
        for record in records.iter_mut().filter(|r| !r.status.is_terminal()) {
            if aborted {
                record.abort();
            } else {
                record.fail(NOT_EXECUTED);
            }
            self.publish_record(record);
        }
    }

    fn publish_record(&self, record: &ToolCallRecord) {
        self.bus.publish(AgentEvent::ToolCallUpdated {
            call: record.clone(),
        });
    }

    // ── LLM streaming ──

    async fn stream_round(
        &self,
        request: LlmRequest,
        inline: bool,
        cancel: &CancellationToken,
    ) -> Result<LlmTurn, RoundError> {
        let max_retries = self.config.agent.llm_max_retries;
        let mut attempt = 0u32;
        loop {
            match self.stream_once(request.clone(), inline, cancel).await {
                Err(RoundError::Retryable(message)) if attempt < max_retries => {
                    attempt += 1;
                    warn!(attempt, max_retries, error = %message, "LLM round failed; retrying");
                    self.bus.publish(AgentEvent::warning(format!(
                        "LLM request failed ({message}); retrying {attempt}/{max_retries}"
                    )));
                    let backoff = Duration::from_millis(500 * u64::from(attempt));
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(RoundError::Cancelled { partial: String::new() }),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Err(RoundError::Retryable(message)) | Err(RoundError::Fatal(message)) => {
                    error!(provider = self.provider.display_name(), error = %message, "LLM round failed");
                    return Err(RoundError::Fatal(message));
                }
                other => return other,
            }
        }
    }

    async fn stream_once(
        &self,
        request: LlmRequest,
        inline: bool,
        cancel: &CancellationToken,
    ) -> Result<LlmTurn, RoundError> {
        let (tx, mut rx) = mpsc::channel(256);
        let provider = self.provider.clone();
        debug!(
            provider = provider.display_name(),
            messages = request.messages.len(),
            tools = request.tools.as_ref().map_or(0, Vec::len),
            "LLM request"
        );
        let _task = AbortOnDrop(tokio::spawn(async move {
            provider.stream_chat(request, tx).await;
        }));

        let timeout_secs = self.config.agent.request_timeout_secs;
        let deadline = tokio::time::sleep(Duration::from_secs(timeout_secs));
        tokio::pin!(deadline);

        let mut turn = TurnBuilder::new(&self.bus, inline);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(RoundError::Cancelled { partial: turn.text.trim().to_string() });
                }
                _ = &mut deadline => {
                    return Err(RoundError::Retryable(format!("LLM request timed out after {timeout_secs}s")));
                }
                event = rx.recv() => match event {
                    Some(StreamEvent::TextDelta(delta)) => turn.push_text(&delta),
                    Some(StreamEvent::ReasoningDelta(delta)) => turn.push_reasoning(&delta),
                    Some(StreamEvent::ToolCall(call)) => turn.push_native_call(call),
                    Some(StreamEvent::Done { content, usage }) => {
                        if let Some(usage) = usage {
                            debug!(
                                prompt_tokens = usage.prompt_tokens,
                                completion_tokens = usage.completion_tokens,
                                "LLM response"
                            );
                        }
                        if let Some(content) = content.filter(|_| turn.raw_text.is_empty()) {
                            turn.push_text(&content);
                        }
                        return Ok(turn.finish());
                    }
                    Some(StreamEvent::Error { message, retryable }) => {
                        return Err(if retryable {
                            RoundError::Retryable(message)
                        } else {
                            RoundError::Fatal(message)
                        });
                    }
                    None => {
                        return Err(RoundError::Retryable("provider stream ended without a result".into()));
                    }
                },
            }
        }
    }

    // ── Finalize ──

    fn finalize(&self, mut run: RunState, outcome: RunOutcome) -> RunReport {
        self.settle(&mut run.records, outcome == RunOutcome::Aborted);
        self.gate.abort();

        match &outcome {
            RunOutcome::Completed => {}
            RunOutcome::Aborted | RunOutcome::LoopDetected { .. } | RunOutcome::MaxRoundsReached { .. } => {
                self.bus.publish(AgentEvent::warning(outcome.describe()));
            }
            RunOutcome::Failed { .. } => {
                self.bus.publish(AgentEvent::error(outcome.describe()));
            }
        }

        *lock(&self.history) = std::mem::take(&mut run.messages);

        info!(
            run_id = %run.id,
            outcome = %outcome.describe(),
            rounds = run.rounds,
            tool_calls = run.records.len(),
            "run finished"
        );
        self.bus.publish(AgentEvent::RunFinished {
            run_id: run.id.clone(),
            outcome: outcome.clone(),
        });

        RunReport {
            run_id: run.id,
            outcome,
            final_text: run.final_text,
            tool_calls: run.records,
            rounds: run.rounds,
            compression: run.compression,
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
