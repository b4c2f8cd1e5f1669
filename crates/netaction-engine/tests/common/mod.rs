#![allow(dead_code)]

use async_trait::async_trait;
use netaction_core::config::{Credentials, DeviceTarget, EngineSettings};
use netaction_core::error::SessionError;
use netaction_core::store::GlobalStore;
use netaction_core::types::ActionRecord;
use netaction_engine::device_log::DeviceLog;
use netaction_engine::interpreter::{ExecutionContext, Interpreter};
use netaction_engine::session::{Connector, SessionHandle, SessionOptions, ShellChannel};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const PROMPT: &str = "router#";

/// How the fake device answers one line.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Output followed by the prompt.
    Output(String),
    /// Output with no prompt, so the reader times out.
    NoPrompt(String),
    /// The remote side hangs up.
    Close,
    /// The line can't be written; the peer is already gone.
    Refuse,
}

/// Canned answers keyed by the exact line sent. Unknown lines get an
/// empty answer and the prompt.
#[derive(Debug, Clone, Default)]
pub struct Script {
    replies: HashMap<String, Reply>,
}

impl Script {
    pub fn new() -> Self {
        Script::default()
    }

    pub fn reply(mut self, line: &str, output: &str) -> Self {
        self.replies.insert(line.to_string(), Reply::Output(output.to_string()));
        self
    }

    pub fn stall(mut self, line: &str, partial: &str) -> Self {
        self.replies.insert(line.to_string(), Reply::NoPrompt(partial.to_string()));
        self
    }

    pub fn hang_up(mut self, line: &str) -> Self {
        self.replies.insert(line.to_string(), Reply::Close);
        self
    }

    pub fn refuse(mut self, line: &str) -> Self {
        self.replies.insert(line.to_string(), Reply::Refuse);
        self
    }
}

pub struct ScriptedChannel {
    script: Script,
    pending: VecDeque<Vec<u8>>,
    closed: bool,
    sent: Arc<Mutex<Vec<String>>>,
}

impl ScriptedChannel {
    pub fn new(script: Script, sent: Arc<Mutex<Vec<String>>>) -> Self {
        ScriptedChannel {
            script,
            pending: VecDeque::new(),
            closed: false,
            sent,
        }
    }
}

#[async_trait]
impl ShellChannel for ScriptedChannel {
    async fn write(&mut self, data: &[u8]) -> Result<(), SessionError> {
        let line = String::from_utf8_lossy(data).trim_end_matches('\n').to_string();
        if self.closed {
            return Err(SessionError::ChannelClosed);
        }
        if let Some(Reply::Refuse) = self.script.replies.get(&line) {
            self.closed = true;
            return Err(SessionError::ChannelClosed);
        }
        self.sent.lock().unwrap().push(line.clone());
        match self.script.replies.get(&line).cloned() {
            Some(Reply::Output(output)) => {
                self.pending
                    .push_back(format!("{}\r\n{}\r\n{}", line, output, PROMPT).into_bytes());
            }
            Some(Reply::NoPrompt(partial)) => {
                self.pending.push_back(format!("{}\r\n{}", line, partial).into_bytes());
            }
            Some(Reply::Close) => self.closed = true,
            Some(Reply::Refuse) => unreachable!(),
            None => self.pending.push_back(format!("{}\r\n{}", line, PROMPT).into_bytes()),
        }
        Ok(())
    }

    async fn read(&mut self) -> Result<Option<Vec<u8>>, SessionError> {
        if let Some(chunk) = self.pending.pop_front() {
            return Ok(Some(chunk));
        }
        if self.closed {
            return Ok(None);
        }
        std::future::pending().await
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.closed = true;
        Ok(())
    }
}

/// Hands out scripted channels; the first `failures` opens fail.
pub struct ScriptedConnector {
    scripts: HashMap<String, Script>,
    failures: u32,
    reject_auth: bool,
    pub opens: AtomicU32,
    pub sent: Arc<Mutex<Vec<String>>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        ScriptedConnector {
            scripts: HashMap::new(),
            failures: 0,
            reject_auth: false,
            opens: AtomicU32::new(0),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn device(mut self, host: &str, script: Script) -> Self {
        self.scripts.insert(host.to_string(), script);
        self
    }

    pub fn failing(mut self, failures: u32) -> Self {
        self.failures = failures;
        self
    }

    pub fn rejecting_auth(mut self) -> Self {
        self.reject_auth = true;
        self
    }

    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn open(
        &self,
        target: &DeviceTarget,
        _credentials: &Credentials,
        _timeout: Duration,
    ) -> Result<Box<dyn ShellChannel>, SessionError> {
        let attempt = self.opens.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            return Err(SessionError::Connect {
                host: target.host.clone(),
                reason: "connection refused".into(),
            });
        }
        if self.reject_auth {
            return Err(SessionError::Auth {
                host: target.host.clone(),
            });
        }
        let script = self.scripts.get(&target.host).cloned().unwrap_or_default();
        Ok(Box::new(ScriptedChannel::new(script, Arc::clone(&self.sent))))
    }
}

pub fn settings(dir: &Path) -> EngineSettings {
    EngineSettings {
        output_path: dir.join("output"),
        log_dir: dir.join("log"),
        inter_command_delay: 0.0,
        read_timeout: 0.3,
        retry_interval: 0.0,
        http_retry_backoff: 0.0,
        ..EngineSettings::default()
    }
}

pub fn actions(yaml: &str) -> Vec<ActionRecord> {
    serde_yaml::from_str(yaml).unwrap()
}

pub fn target(name: &str) -> DeviceTarget {
    DeviceTarget {
        name: name.to_string(),
        host: name.to_string(),
        port: 22,
    }
}

pub fn credentials() -> Credentials {
    Credentials {
        username: "admin".into(),
        password: "admin".into(),
    }
}

/// An interpreter for `device` talking to a scripted channel.
pub fn interpreter(
    device: &str,
    script: Script,
    settings: &EngineSettings,
    store: &Arc<GlobalStore>,
) -> (Interpreter, Arc<Mutex<Vec<String>>>) {
    logged_interpreter(device, script, settings, store, DeviceLog::disabled())
}

/// Same as [`interpreter`], writing events to `log`.
pub fn logged_interpreter(
    device: &str,
    script: Script,
    settings: &EngineSettings,
    store: &Arc<GlobalStore>,
    log: DeviceLog,
) -> (Interpreter, Arc<Mutex<Vec<String>>>) {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let channel = ScriptedChannel::new(script, Arc::clone(&sent));
    let session = SessionHandle::new(device, Box::new(channel), SessionOptions::from(settings));
    let context = ExecutionContext::new(device, settings, log);
    let interpreter = Interpreter::new(context, Arc::clone(store)).with_session(session);
    (interpreter, sent)
}
