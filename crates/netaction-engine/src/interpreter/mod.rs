//! Action interpreter
//!
//! Runs one device's action list strictly in order. Each record is gated by
//! the prompt limit and its optional `run_if` condition, then dispatched by
//! kind. Failures of a single command line or HTTP call are logged and the
//! run moves on; only the stop reasons in [`StopReason`] end a run early.

mod audit;
mod command;
mod config;
mod output;
mod rest;
mod script;

use crate::device_log::DeviceLog;
use crate::http::HttpClient;
use crate::parser::{RegexTemplateParser, TemplateParser};
use crate::session::{ExpectPattern, SessionHandle};
use anyhow::{anyhow, Result};
use log::{error, info, warn};
use netaction_core::condition::evaluate;
use netaction_core::config::EngineSettings;
use netaction_core::error::SessionError;
use netaction_core::resolver::VariableResolver;
use netaction_core::store::{DeviceCursor, GlobalStore};
use netaction_core::types::{ActionKind, ActionRecord, OutputMode};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StopReason {
    PromptLimitReached,
    ErrorStringDetected(String),
    /// Login secrets could not be resolved; nothing was sent.
    CredentialsUnavailable(String),
    ConnectionFailed(String),
    ChannelClosed,
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::PromptLimitReached => write!(f, "prompt limit reached"),
            StopReason::ErrorStringDetected(s) => write!(f, "error string '{}' detected", s),
            StopReason::CredentialsUnavailable(reason) => {
                write!(f, "credentials unavailable: {}", reason)
            }
            StopReason::ConnectionFailed(reason) => write!(f, "connection failed: {}", reason),
            StopReason::ChannelClosed => write!(f, "channel closed"),
            StopReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RunState {
    Running,
    Stopped(StopReason),
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceRunReport {
    pub device_name: String,
    pub state: RunState,
    pub executed: usize,
    pub skipped: usize,
}

impl DeviceRunReport {
    pub fn stopped(device_name: &str, reason: StopReason) -> Self {
        DeviceRunReport {
            device_name: device_name.to_string(),
            state: RunState::Stopped(reason),
            executed: 0,
            skipped: 0,
        }
    }

    pub fn completed(&self) -> bool {
        self.state == RunState::Completed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptCounter {
    pub current: usize,
    pub limit: usize,
}

impl PromptCounter {
    pub fn exhausted(&self) -> bool {
        self.current >= self.limit
    }
}

/// Per-run state threaded through every action.
pub struct ExecutionContext {
    pub device_name: String,
    pub variables: Map<String, Value>,
    pub prompt_count: PromptCounter,
    pub stop: Option<StopReason>,
    pub inter_command_delay: Duration,
    pub read_timeout: Duration,
    pub expect_occurrences: usize,
    pub default_expect: String,
    pub error_string: Option<String>,
    pub output_path: PathBuf,
    pub output_mode: OutputMode,
    pub http_retry_backoff: Duration,
    pub log: DeviceLog,
}

impl ExecutionContext {
    pub fn new(device_name: &str, settings: &EngineSettings, log: DeviceLog) -> Self {
        ExecutionContext {
            device_name: device_name.to_string(),
            variables: Map::new(),
            prompt_count: PromptCounter {
                current: 0,
                limit: settings.prompt_count_limit,
            },
            stop: None,
            inter_command_delay: settings.inter_command_delay(),
            read_timeout: settings.read_timeout(),
            expect_occurrences: settings.expect_occurrences,
            default_expect: settings.default_expect.clone(),
            error_string: settings.error_string.clone(),
            output_path: settings.output_path.clone(),
            output_mode: settings.output_mode,
            http_retry_backoff: settings.http_retry_backoff(),
            log,
        }
    }
}

/// Outcome of one line sent to the device.
enum LineOutcome {
    Output(String),
    /// Logged and skipped; the action carries on with its next line.
    Failed,
    /// The run must stop; `ctx.stop` is set.
    Halt,
}

pub struct Interpreter {
    ctx: ExecutionContext,
    cursor: DeviceCursor,
    session: Option<SessionHandle>,
    resolver: Arc<VariableResolver>,
    parser: Arc<dyn TemplateParser>,
    http: Option<Arc<dyn HttpClient>>,
    cancel: CancellationToken,
}

impl Interpreter {
    pub fn new(ctx: ExecutionContext, store: Arc<GlobalStore>) -> Self {
        let mut cursor = store.cursor();
        cursor.set_current_device(&ctx.device_name);
        Interpreter {
            ctx,
            cursor,
            session: None,
            resolver: Arc::new(VariableResolver::new()),
            parser: Arc::new(RegexTemplateParser::default()),
            http: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_session(mut self, session: SessionHandle) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.ctx.variables.extend(variables);
        self
    }

    pub fn with_parser(mut self, parser: Arc<dyn TemplateParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_http(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<VariableResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    /// Hand back the session so the caller can disconnect it.
    pub fn into_session(self) -> Option<SessionHandle> {
        self.session
    }

    pub async fn run(&mut self, actions: &[ActionRecord]) -> DeviceRunReport {
        let device = self.ctx.device_name.clone();
        let mut executed = 0;
        let mut skipped = 0;
        self.ctx
            .log
            .event(&format!("Starting {} action(s)", actions.len()))
            .await;

        for (index, record) in actions.iter().enumerate() {
            if self.cancel.is_cancelled() {
                self.ctx.stop = Some(StopReason::Cancelled);
                break;
            }
            if self.ctx.prompt_count.exhausted() {
                self.ctx.stop = Some(StopReason::PromptLimitReached);
                break;
            }

            if let Some(condition) = &record.run_if {
                let context = self.cursor.store().condition_context(&device);
                if !evaluate(&context, condition).matched {
                    info!(
                        "[{}] Skipping action {} ({}): run_if not met",
                        device, index, record.label()
                    );
                    self.ctx
                        .log
                        .event(&format!("Skipped {} (run_if not met)", record.label()))
                        .await;
                    skipped += 1;
                    continue;
                }
            }

            info!("[{}] Executing action {}: {}", device, index, record.label());
            if let Err(e) = self.execute(index, record).await {
                error!("[{}] Action {} ({}) failed: {}", device, index, record.label(), e);
                self.ctx
                    .log
                    .event(&format!("Action {} failed: {}", record.label(), e))
                    .await;
            }
            executed += 1;

            if self.ctx.stop.is_some() {
                break;
            }
        }

        let state = match self.ctx.stop.clone() {
            Some(reason) => {
                warn!("[{}] Run stopped: {}", device, reason);
                RunState::Stopped(reason)
            }
            None => RunState::Completed,
        };
        self.ctx
            .log
            .event(&format!(
                "Run finished: {:?} ({} executed, {} skipped)",
                state, executed, skipped
            ))
            .await;
        DeviceRunReport {
            device_name: device,
            state,
            executed,
            skipped,
        }
    }

    async fn execute(&mut self, index: usize, record: &ActionRecord) -> Result<()> {
        let scope = self.action_scope(record)?;
        match &record.kind {
            ActionKind::Sleep(action) => self.sleep(action).await,
            ActionKind::RunScript(action) => self.run_script(action, &scope).await,
            ActionKind::SendCommand(action) => self.send_command(index, action, &scope).await,
            ActionKind::SendCommandLoop(action) => {
                self.send_command_loop(index, action, &scope).await
            }
            ActionKind::SendConfig(action) => self.send_config(action, &scope).await,
            ActionKind::SendConfigLoop(action) => self.send_config_loop(action, &scope).await,
            ActionKind::RestApi(request) => self.rest_api(request, &scope).await,
            ActionKind::RestApiLoop(action) => self.rest_api_loop(action, &scope).await,
            ActionKind::Audit(policy) => self.audit(record, policy).await,
            ActionKind::AuditLoop(action) => self.audit_loop(record, action).await,
            ActionKind::PrintAudit(action) => self.print_audit(action, &scope).await,
            ActionKind::DumpStore(action) => self.dump_store(action, &scope).await,
        }
    }

    /// Variables visible to one action: run variables, then device store
    /// variables, then the action's own `action_vars`.
    fn action_scope(&self, record: &ActionRecord) -> Result<Map<String, Value>> {
        let mut scope = self.ctx.variables.clone();
        let device = self.cursor.get_device_data()?;
        for (name, value) in &device.variables {
            scope.insert(name.clone(), value.clone());
        }

        let mut action_variables: Map<String, Value> = device.variables.into_iter().collect();
        if !record.action_vars.is_empty() {
            let context = self.cursor.condition_context()?;
            let resolved = self.resolver.resolve_action_vars(&record.action_vars, &context);
            for (name, value) in resolved {
                scope.insert(name.clone(), value.clone());
                action_variables.insert(name, value);
            }
        }
        scope.insert("action_variables".into(), Value::Object(action_variables));
        Ok(scope)
    }

    fn expect_pattern(
        &self,
        expect: Option<&str>,
        is_regex: bool,
        scope: &Map<String, Value>,
    ) -> Result<ExpectPattern> {
        let source = expect.unwrap_or(&self.ctx.default_expect);
        let rendered = self.resolver.resolve(source, scope);
        ExpectPattern::new(&rendered, is_regex)
            .map_err(|e| anyhow!("invalid expect pattern '{}': {}", rendered, e))
    }

    /// Claim one prompt for the next line, or stop when none are left.
    fn claim_prompt(&mut self) -> bool {
        if self.ctx.prompt_count.exhausted() {
            self.ctx.stop = Some(StopReason::PromptLimitReached);
            return false;
        }
        self.ctx.prompt_count.current += 1;
        true
    }

    /// Send one line and apply the per-line failure policy.
    async fn send_line(
        &mut self,
        line: &str,
        expect: &ExpectPattern,
        occurrences: usize,
        error_string: Option<&str>,
    ) -> Result<LineOutcome> {
        if !self.claim_prompt() {
            return Ok(LineOutcome::Halt);
        }
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| anyhow!("no session open for {}", self.ctx.device_name))?;

        let sent = if line == "\n" {
            session.send_newline(expect, self.ctx.read_timeout).await
        } else {
            session
                .send_and_wait(line, expect, self.ctx.read_timeout, occurrences)
                .await
        };

        let output = match sent {
            Ok(output) => output,
            Err(SessionError::Timeout { partial, seen, wanted, .. }) => {
                warn!(
                    "[{}] '{}' timed out after {}/{} prompt(s); keeping partial output",
                    self.ctx.device_name, line, seen, wanted
                );
                partial
            }
            Err(SessionError::ChannelClosed) => {
                self.ctx.log.event(&format!("Channel closed while sending: {}", line)).await;
                self.ctx.stop = Some(StopReason::ChannelClosed);
                return Ok(LineOutcome::Halt);
            }
            Err(e) => {
                error!(
                    "[{}] Failed to execute command: {}. Error: {}",
                    self.ctx.device_name, line, e
                );
                self.ctx
                    .log
                    .event(&format!("Failed to execute command: {}. Error: {}", line, e))
                    .await;
                return Ok(LineOutcome::Failed);
            }
        };

        self.ctx.log.command(line, &output).await;

        if let Some(needle) = error_string.filter(|s| !s.is_empty()) {
            if output.contains(needle) {
                error!(
                    "[{}] Error string '{}' found in output of '{}'",
                    self.ctx.device_name, needle, line
                );
                self.ctx.stop = Some(StopReason::ErrorStringDetected(needle.to_string()));
                return Ok(LineOutcome::Halt);
            }
        }
        Ok(LineOutcome::Output(output))
    }

    /// The loop source list, from the device store or the run variables.
    fn source_list(&self, name: &str) -> Result<Vec<Value>> {
        let value = match self.cursor.get_variable(name)? {
            Some(value) => Some(value),
            None => self.ctx.variables.get(name).cloned(),
        };
        match value {
            Some(Value::Array(items)) => Ok(items),
            Some(other) => {
                warn!("[{}] Variable '{}' is not a list: {}", self.ctx.device_name, name, other);
                Ok(Vec::new())
            }
            None => {
                warn!("[{}] Loop source '{}' not found", self.ctx.device_name, name);
                Ok(Vec::new())
            }
        }
    }

    /// Merge a loop element into a copy of `scope`; `None` when it lacks `loop_key`.
    async fn iteration_scope(
        &mut self,
        scope: &Map<String, Value>,
        element: &Value,
        loop_key: &str,
    ) -> Option<Map<String, Value>> {
        let Some(key_value) = element.get(loop_key).cloned() else {
            warn!("[{}] Skipping entry without '{}': {}", self.ctx.device_name, loop_key, element);
            self.ctx
                .log
                .event(&format!("Skipped loop entry without '{}': {}", loop_key, element))
                .await;
            return None;
        };
        let mut merged = scope.clone();
        if let Value::Object(fields) = element {
            for (k, v) in fields {
                merged.insert(k.clone(), v.clone());
            }
        }
        merged.insert(loop_key.to_string(), key_value);
        merged.insert("item".into(), element.clone());
        Some(merged)
    }

    async fn pace(&self) {
        if !self.ctx.inter_command_delay.is_zero() {
            tokio::time::sleep(self.ctx.inter_command_delay).await;
        }
    }
}
