use crate::adapters::{adapter_for, ProviderAdapter};
use crate::cache::{CacheHandle, CachePayload, ContextCacheManager};
use crate::config::ProviderConfig;
use crate::retry::{RetryController, RetryDecision};
use crate::transport::{Transport, VendorRequest};
use rondo_core::{
    Conversation, EngineError, EngineResult, ErrorClass, FailureStage, Message, RoundFailure,
    ToolRegistry, ToolResult,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Marker prepended to a reused tool result so the model can tell it
/// repeated itself.
const REUSED_RESULT_PREFIX: &str =
    "[INFO] Identical tool call repeated; reusing the previous result.\n";

/// Where a round currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    /// Building and sending the vendor request.
    Submitting,
    /// Waiting on the vendor reply (including retries).
    AwaitingResponse,
    /// Tool calls received and being executed.
    ToolCallsPending,
    /// Terminal: assistant reply with no tool calls.
    Finalized,
    /// Terminal: the turn failed.
    Failed,
}

/// Per-turn loop state. Created when a user turn starts and dropped at
/// a terminal phase; `round` only ever increases.
#[derive(Debug, Clone)]
pub struct RoundState {
    /// 1-based round counter.
    pub round: u32,
    /// Ids of tool calls awaiting results, in call order.
    pub outstanding: Vec<String>,
    /// Current phase.
    pub phase: RoundPhase,
}

impl RoundState {
    fn new() -> Self {
        Self {
            round: 0,
            outstanding: Vec::new(),
            phase: RoundPhase::Submitting,
        }
    }
}

/// Drives the `model → tool-call → tool-result → model` loop for one
/// session.
///
/// The provider adapter is fixed at construction; per turn the
/// orchestrator replays the whole history each round, executes
/// requested tools, and stops when the model answers without tool
/// calls or a safeguard trips.
pub struct Orchestrator {
    config: ProviderConfig,
    adapter: Arc<dyn ProviderAdapter>,
    transport: Arc<dyn Transport>,
    tools: Arc<ToolRegistry>,
    retry: RetryController,
    cache: Option<Arc<ContextCacheManager>>,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Creates an orchestrator for a validated session config.
    pub fn new(
        config: ProviderConfig,
        transport: Arc<dyn Transport>,
        tools: Arc<ToolRegistry>,
    ) -> EngineResult<Self> {
        config.validate()?;
        let adapter = adapter_for(&config);
        let retry = RetryController::new(config.retry.clone());
        Ok(Self {
            config,
            adapter,
            transport,
            tools,
            retry,
            cache: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Attaches a context cache manager. Only consulted when the
    /// provider supports caching and the config enables it.
    pub fn with_cache(mut self, cache: Arc<ContextCacheManager>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Uses an external cancellation token instead of a private one.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels this session's turns at the next suspension
    /// point.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs one user turn to completion, returning the final assistant
    /// message. History gains the input message plus every assistant
    /// and tool message produced along the way, in order, even on
    /// failure.
    pub async fn run_turn(
        &self,
        conversation: &mut Conversation,
        input: Message,
    ) -> Result<Message, RoundFailure> {
        conversation.push(input);

        let descriptors = self.tools.descriptors();
        let payload = CachePayload {
            system_instruction: conversation.system_text(),
            tool_schemas: descriptors.clone(),
            model: self.config.model.clone(),
        };
        let mut cache_handle = self.initial_cache_handle(&payload).await;
        let mut cache_recreated = false;

        let mut state = RoundState::new();
        let mut memo: HashMap<String, (String, bool)> = HashMap::new();
        let mut reuse_only_rounds = 0u32;

        info!(
            session = %conversation.session_id(),
            provider = %self.config.provider,
            model = %self.config.model,
            "starting turn"
        );

        loop {
            state.round += 1;
            if state.round > self.config.max_rounds {
                state.phase = RoundPhase::Failed;
                return Err(RoundFailure::new(
                    FailureStage::Loop,
                    EngineError::RoundLimitExceeded {
                        rounds: self.config.max_rounds,
                    },
                ));
            }
            self.ensure_live(&mut state)?;

            state.phase = RoundPhase::Submitting;
            debug!(round = state.round, "submitting");
            let mut request = self
                .translate(conversation, &descriptors, cache_handle.as_ref())
                .map_err(|e| RoundFailure::new(FailureStage::Translate, e))?;

            state.phase = RoundPhase::AwaitingResponse;
            let mut attempt = 0u32;
            let body = loop {
                match self.transport.send(&request).await {
                    Ok(body) => break body,
                    Err(err) => {
                        // A server-side expired cache handle is not a
                        // request failure; drop the handle, rebuild it
                        // once, and resubmit.
                        if cache_handle.is_some()
                            && !cache_recreated
                            && ContextCacheManager::is_expired_handle_error(&err)
                        {
                            warn!(error = %err, "cache handle expired server-side; recreating");
                            cache_recreated = true;
                            cache_handle = match &self.cache {
                                Some(manager) => manager.recreate(&payload).await,
                                None => None,
                            };
                            request = self
                                .translate(conversation, &descriptors, cache_handle.as_ref())
                                .map_err(|e| RoundFailure::new(FailureStage::Translate, e))?;
                            continue;
                        }

                        match self.retry.decide(err.class(), attempt, err.retry_after()) {
                            RetryDecision::RetryAfter(delay) => {
                                warn!(
                                    provider = %self.config.provider,
                                    model = %self.config.model,
                                    attempt = attempt + 1,
                                    max_attempts = self.retry.max_attempts(),
                                    delay_ms = delay.as_millis() as u64,
                                    error = %err,
                                    "request failed; backing off"
                                );
                                self.sleep_cancellable(delay, &mut state).await?;
                                attempt += 1;
                            }
                            RetryDecision::Abort => {
                                state.phase = RoundPhase::Failed;
                                return Err(if err.class() == ErrorClass::Fatal {
                                    RoundFailure::new(FailureStage::Network, err)
                                } else {
                                    RoundFailure::exhausted(FailureStage::Network, err)
                                });
                            }
                        }
                    }
                }
            };

            let reply = self
                .adapter
                .translate_response(&body)
                .map_err(|e| RoundFailure::new(FailureStage::Translate, e))?;
            self.ensure_live(&mut state)?;

            let calls = reply.tool_calls.clone();
            let assistant = reply.into_message();
            conversation.push(assistant.clone());

            if calls.is_empty() {
                state.phase = RoundPhase::Finalized;
                debug!(round = state.round, "turn finalized");
                return Ok(assistant);
            }

            state.phase = RoundPhase::ToolCallsPending;
            state.outstanding = calls.iter().map(|c| c.id.clone()).collect();
            debug!(round = state.round, tool_calls = calls.len(), "dispatching tools");

            let keys: Vec<String> = calls
                .iter()
                .map(|c| format!("{}:{}", c.name, c.arguments))
                .collect();
            let mut results: Vec<Option<ToolResult>> = vec![None; calls.len()];

            // First pass: serve cross-round repeats from the memo.
            for (i, key) in keys.iter().enumerate() {
                if let Some((content, is_error)) = memo.get(key) {
                    results[i] = Some(reused_result(&calls[i].id, content, *is_error));
                }
            }

            // Second pass: run every first-seen call concurrently.
            // Duplicates within the round wait for the first instance.
            let mut scheduled: HashSet<&str> = HashSet::new();
            let mut fresh: Vec<usize> = Vec::new();
            for (i, key) in keys.iter().enumerate() {
                if results[i].is_none() && scheduled.insert(key.as_str()) {
                    fresh.push(i);
                }
            }
            let executed_new_tool = !fresh.is_empty();

            let timeout = self.config.tool_timeout();
            let outcomes = futures_util::future::join_all(fresh.iter().map(|&i| {
                let call = &calls[i];
                async move { (i, self.tools.dispatch(call, timeout).await) }
            }))
            .await;
            for (i, result) in outcomes {
                memo.insert(keys[i].clone(), (result.content.clone(), result.is_error));
                results[i] = Some(result);
            }

            // Third pass: intra-round duplicates, now present in the memo.
            for (i, key) in keys.iter().enumerate() {
                if results[i].is_none() {
                    if let Some((content, is_error)) = memo.get(key) {
                        results[i] = Some(reused_result(&calls[i].id, content, *is_error));
                    }
                }
            }

            // Results enter history in the model's call order, whatever
            // order execution finished in.
            for result in results.into_iter().flatten() {
                conversation.push(Message::tool_result(result));
            }
            state.outstanding.clear();

            if executed_new_tool {
                reuse_only_rounds = 0;
            } else {
                reuse_only_rounds += 1;
                if reuse_only_rounds >= 3 {
                    state.phase = RoundPhase::Failed;
                    return Err(RoundFailure::new(
                        FailureStage::Loop,
                        EngineError::Fatal(
                            "three consecutive rounds reused previous tool results; stopping"
                                .into(),
                        ),
                    ));
                }
            }
        }
    }

    fn translate(
        &self,
        conversation: &Conversation,
        descriptors: &[rondo_core::ToolDescriptor],
        cache: Option<&CacheHandle>,
    ) -> EngineResult<VendorRequest> {
        self.adapter
            .translate_request(conversation, descriptors, cache)
    }

    async fn initial_cache_handle(&self, payload: &CachePayload) -> Option<CacheHandle> {
        if !self.adapter.cache_capable() || !self.config.cache_enabled {
            return None;
        }
        let manager = self.cache.as_ref()?;
        manager.get_or_create(payload).await
    }

    fn ensure_live(&self, state: &mut RoundState) -> Result<(), RoundFailure> {
        if self.cancel.is_cancelled() {
            state.phase = RoundPhase::Failed;
            return Err(cancelled_failure());
        }
        Ok(())
    }

    async fn sleep_cancellable(
        &self,
        delay: Duration,
        state: &mut RoundState,
    ) -> Result<(), RoundFailure> {
        tokio::select! {
            _ = self.cancel.cancelled() => {
                state.phase = RoundPhase::Failed;
                Err(cancelled_failure())
            }
            _ = sleep(delay) => Ok(()),
        }
    }
}

fn cancelled_failure() -> RoundFailure {
    RoundFailure::new(
        FailureStage::Loop,
        EngineError::Cancelled("turn cancelled".into()),
    )
}

fn reused_result(call_id: &str, content: &str, is_error: bool) -> ToolResult {
    let content = format!("{REUSED_RESULT_PREFIX}{content}");
    if is_error {
        ToolResult::error(call_id, content)
    } else {
        ToolResult::success(call_id, content)
    }
}
