//! Parallel device runs
//!
//! Every device gets its own tokio task, session and interpreter. A
//! semaphore bounds how many run at once; the global store is the only state
//! they share.

use crate::device_log::DeviceLog;
use crate::http::HttpClient;
use crate::interpreter::{DeviceRunReport, ExecutionContext, Interpreter, StopReason};
use crate::parser::{RegexTemplateParser, TemplateParser};
use crate::session::{Connector, SessionHandle, SessionOptions};
use futures::future::join_all;
use log::{error, info, warn};
use netaction_core::config::{CredentialProvider, Credentials, DeviceTarget, EngineSettings};
use netaction_core::resolver::VariableResolver;
use netaction_core::store::GlobalStore;
use netaction_core::types::ActionRecord;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// One device's share of a run.
#[derive(Debug, Clone)]
pub struct DeviceJob {
    pub target: DeviceTarget,
    pub credentials: Credentials,
    pub variables: Map<String, Value>,
    pub actions: Vec<ActionRecord>,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub reports: Vec<DeviceRunReport>,
}

impl RunSummary {
    pub fn processed(&self) -> usize {
        self.reports.len()
    }

    pub fn failed(&self) -> usize {
        self.reports.iter().filter(|r| !r.completed()).count()
    }
}

pub struct AutomationRunner {
    settings: EngineSettings,
    store: Arc<GlobalStore>,
    connector: Arc<dyn Connector>,
    credentials: Arc<CredentialProvider>,
    resolver: Arc<VariableResolver>,
    parser: Arc<dyn TemplateParser>,
    http: Option<Arc<dyn HttpClient>>,
    cancel: CancellationToken,
}

impl AutomationRunner {
    pub fn new(
        settings: EngineSettings,
        store: Arc<GlobalStore>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        AutomationRunner {
            settings,
            store,
            connector,
            credentials: Arc::new(CredentialProvider::default()),
            resolver: Arc::new(VariableResolver::new()),
            parser: Arc::new(RegexTemplateParser::default()),
            http: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_credentials(mut self, credentials: CredentialProvider) -> Self {
        self.credentials = Arc::new(credentials);
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

    /// Cancelling the token stops every device between actions.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn store(&self) -> &Arc<GlobalStore> {
        &self.store
    }

    pub async fn run(self: &Arc<Self>, jobs: Vec<DeviceJob>) -> RunSummary {
        let permits = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let mut handles = Vec::with_capacity(jobs.len());

        for job in jobs {
            let runner = Arc::clone(self);
            let permits = Arc::clone(&permits);
            let name = job.target.name.clone();
            let handle = tokio::spawn(async move {
                let _permit = permits.acquire_owned().await;
                runner.run_device(job).await
            });
            handles.push((name, handle));
        }

        let finished = join_all(
            handles
                .into_iter()
                .map(|(name, handle)| async move { (name, handle.await) }),
        )
        .await;

        let mut summary = RunSummary::default();
        for (name, joined) in finished {
            match joined {
                Ok(report) => summary.reports.push(report),
                Err(e) => {
                    error!("Device task for {} aborted: {}", name, e);
                    summary.reports.push(DeviceRunReport::stopped(
                        &name,
                        StopReason::ConnectionFailed(format!("task aborted: {}", e)),
                    ));
                }
            }
        }
        info!(
            "Run finished: {} device(s) processed, {} failed",
            summary.processed(),
            summary.failed()
        );
        summary
    }

    async fn run_device(&self, job: DeviceJob) -> DeviceRunReport {
        let name = job.target.name.clone();
        let log_path = self.settings.log_dir.join(format!("{}.log", name));
        let mut log = match DeviceLog::open(&log_path).await {
            Ok(log) => log,
            Err(e) => {
                warn!("Could not open log {}: {}", log_path.display(), e);
                DeviceLog::disabled()
            }
        };

        let credentials = match self.credentials.resolve_credentials(&job.credentials) {
            Ok(credentials) => credentials,
            Err(e) => {
                error!("[{}] Credential error: {}", name, e);
                log.event(&format!("Credential error: {}", e)).await;
                return DeviceRunReport::stopped(
                    &name,
                    StopReason::CredentialsUnavailable(e.to_string()),
                );
            }
        };

        let session = match SessionHandle::connect(
            self.connector.as_ref(),
            &job.target,
            &credentials,
            SessionOptions::from(&self.settings),
        )
        .await
        {
            Ok(session) => session,
            Err(e) => {
                log.event(&format!("Connection failed: {}", e)).await;
                return DeviceRunReport::stopped(
                    &name,
                    StopReason::ConnectionFailed(e.to_string()),
                );
            }
        };

        let mut variables = job.variables;
        variables
            .entry("hostname")
            .or_insert_with(|| json!(job.target.name));
        variables
            .entry("mgmt_ip")
            .or_insert_with(|| json!(job.target.host));

        let mut interpreter = Interpreter::new(
            ExecutionContext::new(&name, &self.settings, log),
            Arc::clone(&self.store),
        )
        .with_session(session)
        .with_variables(variables)
        .with_resolver(Arc::clone(&self.resolver))
        .with_parser(Arc::clone(&self.parser))
        .with_cancellation(self.cancel.clone());
        if let Some(http) = &self.http {
            interpreter = interpreter.with_http(Arc::clone(http));
        }

        let report = interpreter.run(&job.actions).await;
        if let Some(session) = interpreter.into_session() {
            session.disconnect().await;
        }
        report
    }
}
