use super::{Connector, ShellChannel};
use async_trait::async_trait;
use log::debug;
use netaction_core::config::{Credentials, DeviceTarget};
use netaction_core::error::SessionError;
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

const TERMINAL_WIDTH: u32 = 511;
const TERMINAL_HEIGHT: u32 = 24;

struct ClientHandler;

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    // Network gear is routinely reinstalled with new host keys.
    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Opens password-authenticated interactive shells over SSH.
#[derive(Default)]
pub struct SshConnector {
    config: Arc<client::Config>,
}

impl SshConnector {
    pub fn new() -> Self {
        SshConnector {
            config: Arc::new(client::Config::default()),
        }
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn open(
        &self,
        target: &DeviceTarget,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<Box<dyn ShellChannel>, SessionError> {
        let connect_error = |reason: String| SessionError::Connect {
            host: target.host.clone(),
            reason,
        };

        let connecting = client::connect(
            Arc::clone(&self.config),
            (target.host.as_str(), target.port),
            ClientHandler,
        );
        let mut handle = tokio::time::timeout(timeout, connecting)
            .await
            .map_err(|_| connect_error(format!("no answer within {:?}", timeout)))?
            .map_err(|e| connect_error(e.to_string()))?;

        let accepted = handle
            .authenticate_password(credentials.username.clone(), credentials.password.clone())
            .await
            .map_err(|e| connect_error(e.to_string()))?;
        if !accepted {
            return Err(SessionError::Auth {
                host: target.host.clone(),
            });
        }

        let mut channel = handle
            .channel_open_session()
            .await
            .map_err(|e| connect_error(e.to_string()))?;
        channel
            .request_pty(false, "xterm", TERMINAL_WIDTH, TERMINAL_HEIGHT, 0, 0, &[])
            .await
            .map_err(|e| connect_error(e.to_string()))?;
        channel
            .request_shell(false)
            .await
            .map_err(|e| connect_error(e.to_string()))?;
        debug!("Interactive shell open on {}:{}", target.host, target.port);

        Ok(Box::new(SshShell {
            handle,
            channel,
            closed: false,
        }))
    }
}

/// Send failures that mean the peer has gone away.
fn write_error(e: russh::Error) -> SessionError {
    match e {
        russh::Error::SendError | russh::Error::Disconnect | russh::Error::HUP => {
            SessionError::ChannelClosed
        }
        russh::Error::IO(io)
            if matches!(
                io.kind(),
                ErrorKind::BrokenPipe
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::UnexpectedEof
            ) =>
        {
            SessionError::ChannelClosed
        }
        other => SessionError::Io(other.to_string()),
    }
}

struct SshShell {
    handle: Handle<ClientHandler>,
    channel: Channel<Msg>,
    /// Set once the server sent EOF or closed the channel.
    closed: bool,
}

#[async_trait]
impl ShellChannel for SshShell {
    async fn write(&mut self, data: &[u8]) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::ChannelClosed);
        }
        match self.channel.data(data).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let e = write_error(e);
                self.closed = matches!(e, SessionError::ChannelClosed);
                Err(e)
            }
        }
    }

    async fn read(&mut self) -> Result<Option<Vec<u8>>, SessionError> {
        loop {
            match self.channel.wait().await {
                Some(ChannelMsg::Data { data }) => return Ok(Some(data.to_vec())),
                Some(ChannelMsg::ExtendedData { data, .. }) => return Ok(Some(data.to_vec())),
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                    self.closed = true;
                    return Ok(None);
                }
                Some(other) => debug!("Ignoring channel message {:?}", other),
            }
        }
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        let closed = self.channel.close().await;
        self.handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
            .map_err(|e| SessionError::Io(e.to_string()))?;
        closed.map_err(|e| SessionError::Io(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_to_departed_peer_is_channel_closed() {
        assert!(matches!(write_error(russh::Error::SendError), SessionError::ChannelClosed));
        assert!(matches!(write_error(russh::Error::HUP), SessionError::ChannelClosed));
        let reset = std::io::Error::new(ErrorKind::ConnectionReset, "reset by peer");
        assert!(matches!(write_error(russh::Error::IO(reset)), SessionError::ChannelClosed));
    }

    #[test]
    fn test_other_write_failures_stay_io() {
        let denied = std::io::Error::new(ErrorKind::PermissionDenied, "denied");
        assert!(matches!(write_error(russh::Error::IO(denied)), SessionError::Io(_)));
    }
}
