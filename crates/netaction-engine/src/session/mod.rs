//! Interactive session transport
//!
//! A [`SessionHandle`] owns one interactive shell channel to a device. Every
//! exchange goes through [`SessionHandle::send_and_wait`], which clears the
//! accumulation buffer, writes one line and reads until the expect pattern has
//! been seen often enough. Operations on one handle are serialized by an
//! async mutex.

pub mod ssh;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use netaction_core::config::{Credentials, DeviceTarget, EngineSettings};
use netaction_core::error::SessionError;
use netaction_core::utils::scrub_escape_codes;
use regex::Regex;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub use ssh::SshConnector;

/// A bidirectional byte stream to a remote shell.
#[async_trait]
pub trait ShellChannel: Send {
    async fn write(&mut self, data: &[u8]) -> Result<(), SessionError>;
    /// Next chunk of output, `None` once the remote side has closed.
    async fn read(&mut self) -> Result<Option<Vec<u8>>, SessionError>;
    async fn close(&mut self) -> Result<(), SessionError>;
}

/// Opens shell channels. The SSH implementation lives in [`ssh`].
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(
        &self,
        target: &DeviceTarget,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<Box<dyn ShellChannel>, SessionError>;
}

#[derive(Debug, Clone)]
pub struct ExpectPattern {
    source: String,
    regex: Regex,
}

impl ExpectPattern {
    pub fn new(pattern: &str, is_regex: bool) -> Result<Self, regex::Error> {
        let regex = if is_regex {
            Regex::new(pattern)?
        } else {
            Regex::new(&regex::escape(pattern))?
        };
        Ok(ExpectPattern {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn count(&self, haystack: &str) -> usize {
        self.regex.find_iter(haystack).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_interval: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub scrub_escape_codes: bool,
    /// Upper bound on channel reads per exchange, 0 for none.
    pub max_polls: usize,
    pub connect_timeout: Duration,
    pub retry: RetryPolicy,
}

impl From<&EngineSettings> for SessionOptions {
    fn from(settings: &EngineSettings) -> Self {
        SessionOptions {
            scrub_escape_codes: settings.scrub_escape_codes,
            max_polls: settings.max_polls,
            connect_timeout: settings.connect_timeout(),
            retry: RetryPolicy {
                max_retries: settings.max_retries,
                retry_interval: settings.retry_interval(),
            },
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions::from(&EngineSettings::default())
    }
}

struct SessionState {
    channel: Box<dyn ShellChannel>,
    buffer: Vec<u8>,
}

pub struct SessionHandle {
    device_name: String,
    state: Mutex<SessionState>,
    options: SessionOptions,
}

impl SessionHandle {
    pub fn new(device_name: &str, channel: Box<dyn ShellChannel>, options: SessionOptions) -> Self {
        SessionHandle {
            device_name: device_name.to_string(),
            state: Mutex::new(SessionState {
                channel,
                buffer: Vec::new(),
            }),
            options,
        }
    }

    /// Connect, retrying transport failures. Rejected credentials are
    /// returned immediately.
    pub async fn connect(
        connector: &dyn Connector,
        target: &DeviceTarget,
        credentials: &Credentials,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        let attempts = options.retry.max_retries.max(1);
        let mut attempt = 1;
        loop {
            match connector
                .open(target, credentials, options.connect_timeout)
                .await
            {
                Ok(channel) => {
                    info!("Connected to {} ({}:{})", target.name, target.host, target.port);
                    return Ok(Self::new(&target.name, channel, options));
                }
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(
                        "Connection attempt {}/{} to {} failed: {}. Retrying in {:?}",
                        attempt, attempts, target.name, e, options.retry.retry_interval
                    );
                    tokio::time::sleep(options.retry.retry_interval).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!("Giving up on {} after {} attempt(s): {}", target.name, attempt, e);
                    return Err(e);
                }
            }
        }
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    fn render(&self, raw: &[u8]) -> String {
        let text = String::from_utf8_lossy(raw);
        if self.options.scrub_escape_codes {
            scrub_escape_codes(&text)
        } else {
            text.into_owned()
        }
    }

    /// Send `text` followed by a newline and collect output until `expect`
    /// has matched `occurrences` times.
    pub async fn send_and_wait(
        &self,
        text: &str,
        expect: &ExpectPattern,
        timeout: Duration,
        occurrences: usize,
    ) -> Result<String, SessionError> {
        let mut state = self.state.lock().await;
        state.buffer.clear();

        let payload = format!("{}\n", text);
        state.channel.write(payload.as_bytes()).await?;
        debug!("[{}] sent: {:?}", self.device_name, text);

        let wanted = occurrences.max(1);
        let deadline = Instant::now() + timeout;
        let mut polls = 0usize;
        loop {
            let output = self.render(&state.buffer);
            let seen = expect.count(&output);
            if seen >= wanted {
                return Ok(output);
            }
            if self.options.max_polls > 0 && polls >= self.options.max_polls {
                warn!("[{}] max polls reached, output may be incomplete", self.device_name);
                return Err(SessionError::Timeout {
                    pattern: expect.source().to_string(),
                    seen,
                    wanted,
                    partial: output,
                });
            }
            polls += 1;

            match tokio::time::timeout_at(deadline, state.channel.read()).await {
                Ok(Ok(Some(chunk))) => state.buffer.extend_from_slice(&chunk),
                Ok(Ok(None)) => return Err(SessionError::ChannelClosed),
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    return Err(SessionError::Timeout {
                        pattern: expect.source().to_string(),
                        seen,
                        wanted,
                        partial: output,
                    })
                }
            }
        }
    }

    /// Send a bare newline, e.g. to wake a prompt.
    pub async fn send_newline(
        &self,
        expect: &ExpectPattern,
        timeout: Duration,
    ) -> Result<String, SessionError> {
        self.send_and_wait("", expect, timeout, 1).await
    }

    /// Close the channel. Close failures are logged, not returned.
    pub async fn disconnect(&self) {
        let mut state = self.state.lock().await;
        if let Err(e) = state.channel.close().await {
            warn!("[{}] error while closing session: {}", self.device_name, e);
        }
        info!("Disconnected from {}", self.device_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replays fixed chunks; `None` once they run out.
    struct Replay(VecDeque<Vec<u8>>);

    #[async_trait]
    impl ShellChannel for Replay {
        async fn write(&mut self, _data: &[u8]) -> Result<(), SessionError> {
            Ok(())
        }

        async fn read(&mut self) -> Result<Option<Vec<u8>>, SessionError> {
            Ok(self.0.pop_front())
        }

        async fn close(&mut self) -> Result<(), SessionError> {
            Ok(())
        }
    }

    fn handle(chunks: &[&str], options: SessionOptions) -> SessionHandle {
        let replay = Replay(chunks.iter().map(|c| c.as_bytes().to_vec()).collect());
        SessionHandle::new("r1", Box::new(replay), options)
    }

    #[test]
    fn test_literal_pattern_is_escaped() {
        let pattern = ExpectPattern::new("(config)#", false).unwrap();
        assert_eq!(pattern.count("r1(config)#\nr1(config)#"), 2);
        let regex = ExpectPattern::new(r"\S+#$", true).unwrap();
        assert_eq!(regex.count("r1#"), 1);
    }

    #[tokio::test]
    async fn test_waits_for_occurrences_across_chunks() {
        let session = handle(
            &["show run\r\nr1#", "\x1b[7mmore\x1b[0m\r\n", "end\r\nr1#"],
            SessionOptions::default(),
        );
        let expect = ExpectPattern::new("#", false).unwrap();
        let output = session
            .send_and_wait("show run", &expect, Duration::from_secs(1), 2)
            .await
            .unwrap();
        assert_eq!(output, "show run\nr1#more\nend\nr1#");
    }

    #[tokio::test]
    async fn test_max_polls_returns_partial_output() {
        let options = SessionOptions {
            max_polls: 2,
            ..SessionOptions::default()
        };
        let session = handle(&["line one\n", "line two\n", "r1#"], options);
        let expect = ExpectPattern::new("#", false).unwrap();
        let err = session
            .send_and_wait("show log", &expect, Duration::from_secs(1), 1)
            .await
            .unwrap_err();
        match err {
            SessionError::Timeout { partial, seen, .. } => {
                assert_eq!(partial, "line one\nline two\n");
                assert_eq!(seen, 0);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_closed_channel_is_reported() {
        let session = handle(&["partial"], SessionOptions::default());
        let expect = ExpectPattern::new("#", false).unwrap();
        let err = session
            .send_and_wait("reload", &expect, Duration::from_secs(1), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::ChannelClosed));
    }
}
