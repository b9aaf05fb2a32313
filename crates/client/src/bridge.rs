//! Client side of a shared session.
//!
//! A [`ClientSessionBridge`] holds two connections to one context: a status
//! listener and a command connection. `connect` resolves only once the
//! command connection delivers the ready marker as a whole frame; from then
//! on commands can be submitted. Output (without ready markers) and decoded
//! status events are delivered through queues taken from the bridge.

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use protocol::{ResponseMode, StatusMessage, StatusUpdateEvent, TermAction, READY_MARKER};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// How long `close` waits for the readers to see the daemon's close reply.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Command and status connections to one session context.
pub struct ClientSessionBridge {
    config: ClientConfig,
    command: WsSink,
    status: WsSink,
    ready: watch::Receiver<bool>,
    output: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
    status_updates: Option<mpsc::UnboundedReceiver<StatusUpdateEvent>>,
    readers: Vec<JoinHandle<()>>,
}

impl ClientSessionBridge {
    /// Opens the status connection, then the command connection, and waits
    /// for the ready marker.
    ///
    /// A read-only bridge never submits commands and resolves as soon as
    /// both connections are open.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Timeout`] if both handshakes and the marker do
    /// not complete within `ready_timeout`; any open connection is closed
    /// before returning and no command has been sent.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let status_url = config.status_url()?;
        let command_url = config.command_url()?;
        let timeout = config.ready_timeout;
        let deadline = Instant::now() + timeout;

        let (status_ws, _) = match timeout_at(deadline, connect_async(status_url.as_str())).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(url = %status_url, timeout = ?timeout, "Status handshake timed out");
                return Err(ClientError::Timeout(timeout));
            }
        };
        debug!(url = %status_url, "Status connection open");
        let (mut status_sink, status_source) = status_ws.split();

        let command_ws = match timeout_at(deadline, connect_async(command_url.as_str())).await {
            Ok(Ok((ws, _))) => ws,
            Ok(Err(e)) => {
                let _ = status_sink.close().await;
                return Err(e.into());
            }
            Err(_) => {
                warn!(url = %command_url, timeout = ?timeout, "Command handshake timed out");
                let _ = status_sink.close().await;
                return Err(ClientError::Timeout(timeout));
            }
        };
        debug!(url = %command_url, "Command connection open");
        let (command_sink, command_source) = command_ws.split();

        let (ready_tx, ready_rx) = watch::channel(false);
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = mpsc::unbounded_channel();

        let readers = vec![
            tokio::spawn(read_command(command_source, ready_tx, output_tx)),
            tokio::spawn(read_status(status_source, status_tx)),
        ];

        let mut bridge = Self {
            config,
            command: command_sink,
            status: status_sink,
            ready: ready_rx,
            output: Some(output_rx),
            status_updates: Some(status_rx),
            readers,
        };

        if bridge.config.read_only {
            info!(context = %bridge.config.context, "Observing session");
            return Ok(bridge);
        }

        let mut ready = bridge.ready.clone();
        let outcome = timeout_at(deadline, ready.wait_for(|ready| *ready))
            .await
            .map(|result| result.is_ok());

        match outcome {
            Ok(true) => {
                info!(context = %bridge.config.context, "Session ready");
                Ok(bridge)
            }
            Ok(false) => {
                bridge.abandon().await;
                Err(ClientError::Connection(
                    "command connection closed before the session was ready".to_string(),
                ))
            }
            Err(_) => {
                warn!(context = %bridge.config.context, timeout = ?timeout, "Ready marker not received");
                bridge.abandon().await;
                Err(ClientError::Timeout(timeout))
            }
        }
    }

    /// Returns the configuration the bridge was opened with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns true once the ready marker has been observed.
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Returns true if the bridge observes without driving.
    pub fn is_read_only(&self) -> bool {
        self.config.read_only
    }

    /// Submits one command line. Completion is reported on the status queue.
    pub async fn execute_command(&mut self, command: &str) -> Result<()> {
        self.ensure_driver()?;
        let json = TermAction::command(command).to_json()?;
        debug!(command = %command, "Submitting command");
        self.send_envelope(json).await
    }

    /// Changes the terminal size of the session.
    pub async fn resize(&mut self, cols: u16, rows: u16) -> Result<()> {
        self.ensure_driver()?;
        let json = TermAction::Resize { cols, rows }.to_json()?;
        self.send_envelope(json).await
    }

    /// Takes the output queue. Returns `None` after the first call.
    pub fn take_output(&mut self) -> Option<mpsc::UnboundedReceiver<Vec<u8>>> {
        self.output.take()
    }

    /// Takes the status event queue. Returns `None` after the first call.
    pub fn take_status_updates(&mut self) -> Option<mpsc::UnboundedReceiver<StatusUpdateEvent>> {
        self.status_updates.take()
    }

    /// Sends close frames on both connections.
    pub async fn close(mut self) -> Result<()> {
        let command = self.command.close().await;
        let status = self.status.close().await;

        for reader in &mut self.readers {
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, reader).await;
        }

        ignore_closed(command)?;
        ignore_closed(status)?;
        Ok(())
    }

    fn ensure_driver(&self) -> Result<()> {
        if self.config.read_only {
            return Err(ClientError::ReadOnly);
        }
        if !self.is_ready() {
            return Err(ClientError::NotReady);
        }
        Ok(())
    }

    async fn send_envelope(&mut self, json: String) -> Result<()> {
        let message = match self.config.response_mode {
            ResponseMode::Text => Message::Text(json),
            ResponseMode::Binary => Message::Binary(json.into_bytes()),
        };
        self.command.send(message).await?;
        Ok(())
    }

    async fn abandon(&mut self) {
        let _ = self.command.close().await;
        let _ = self.status.close().await;
        for reader in self.readers.drain(..) {
            reader.abort();
        }
    }
}

impl Drop for ClientSessionBridge {
    fn drop(&mut self) {
        for reader in &self.readers {
            reader.abort();
        }
    }
}

fn ignore_closed(result: std::result::Result<(), tungstenite::Error>) -> Result<()> {
    match result {
        Ok(()) | Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Forwards command output, swallowing ready markers.
async fn read_command(
    mut source: WsSource,
    ready: watch::Sender<bool>,
    output: mpsc::UnboundedSender<Vec<u8>>,
) {
    while let Some(frame) = source.next().await {
        let data = match frame {
            Ok(Message::Binary(data)) => data,
            Ok(Message::Text(text)) => text.into_bytes(),
            Ok(Message::Close(frame)) => {
                debug!(frame = ?frame, "Command connection closed by daemon");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "Command connection failed");
                break;
            }
        };

        if data == READY_MARKER.as_bytes() {
            ready.send_replace(true);
            continue;
        }

        // The receiver may have been dropped by a caller that only wants status.
        let _ = output.send(data);
    }
}

/// Decodes status frames into events.
async fn read_status(mut source: WsSource, updates: mpsc::UnboundedSender<StatusUpdateEvent>) {
    while let Some(frame) = source.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(frame)) => {
                debug!(frame = ?frame, "Status connection closed by daemon");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "Status connection failed");
                break;
            }
        };

        match StatusMessage::from_json(&text) {
            Ok(message) => {
                let _ = updates.send(message.into_event());
            }
            Err(e) => warn!(error = %e, "Dropping malformed status message"),
        }
    }
}
