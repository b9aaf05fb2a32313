//! Per-connection endpoint handlers.
//!
//! A command connection attaches an [`OutputChannel`] to the session of its
//! context. A writer task drains the channel into WebSocket frames while
//! the reader loop forwards driver envelopes to the session. A status
//! connection subscribes to the session's status bus and writes each event
//! as a JSON frame. Whatever ends the connection, the handler detaches from
//! the session before returning.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use protocol::{Endpoint, ResponseMode, StatusMessage, TermAction};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::session::{
    AttachOutcome, ChannelId, OutputChannel, SessionError, SessionRegistry, StatusSubscription,
    TerminalSession,
};

type WsSink = SplitSink<WebSocketStream<TcpStream>, WsMessage>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// How long a closing connection waits for its writer to flush.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Role a command connection ended up with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Driver,
    ReadOnly,
}

struct Attachment {
    session: Arc<TerminalSession>,
    role: Role,
    channel_id: ChannelId,
    output: mpsc::Receiver<Vec<u8>>,
}

/// Serves one accepted TCP connection until it closes.
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<SessionRegistry>,
    channel_capacity: usize,
    shutdown: CancellationToken,
) {
    let mut endpoint = None;
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        match Endpoint::parse(request.uri().path()) {
            Ok(parsed) => {
                endpoint = Some(parsed);
                Ok(response)
            }
            Err(e) => {
                debug!(peer = %peer, error = %e, "Rejecting handshake");
                let mut rejection = ErrorResponse::new(Some(e.to_string()));
                *rejection.status_mut() = StatusCode::NOT_FOUND;
                Err(rejection)
            }
        }
    };

    let ws = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!(peer = %peer, error = %e, "WebSocket handshake failed");
            return;
        }
    };

    let Some(endpoint) = endpoint else {
        return;
    };

    match endpoint {
        Endpoint::Command {
            context,
            mode,
            read_only,
        } => {
            serve_command(ws, peer, &registry, &context, mode, read_only, channel_capacity, shutdown)
                .await
        }
        Endpoint::Status { context } => serve_status(ws, peer, &registry, &context, shutdown).await,
    }
}

/// Attaches a fresh channel, resolving the context again once if the
/// resolved session was destroyed in the meantime.
async fn attach_command(
    registry: &SessionRegistry,
    context: &str,
    read_only: bool,
    capacity: usize,
) -> Result<Attachment, SessionError> {
    let mut retried = false;
    loop {
        let session = registry.get_or_create(context);
        let (channel, output) = OutputChannel::with_capacity(capacity);
        let channel_id = channel.id().clone();

        let result = if read_only {
            session.attach_read_only(channel).await.map(|_| Role::ReadOnly)
        } else {
            session.attach_driver(channel).await.map(|outcome| match outcome {
                AttachOutcome::Accepted => Role::Driver,
                AttachOutcome::BecameReadOnly => Role::ReadOnly,
            })
        };

        match result {
            Ok(role) => {
                return Ok(Attachment {
                    session,
                    role,
                    channel_id,
                    output,
                })
            }
            Err(SessionError::Destroyed(_)) if !retried => retried = true,
            Err(e) => return Err(e),
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn serve_command(
    ws: WebSocketStream<TcpStream>,
    peer: SocketAddr,
    registry: &SessionRegistry,
    context: &str,
    mode: ResponseMode,
    read_only: bool,
    capacity: usize,
    shutdown: CancellationToken,
) {
    let (mut sink, source) = ws.split();

    let attachment = match attach_command(registry, context, read_only, capacity).await {
        Ok(attachment) => attachment,
        Err(e) => {
            warn!(peer = %peer, context = %context, error = %e, "Failed to attach command connection");
            let frame = CloseFrame {
                code: CloseCode::Error,
                reason: e.to_string().into(),
            };
            let _ = sink.send(WsMessage::Close(Some(frame))).await;
            return;
        }
    };

    let Attachment {
        session,
        role,
        channel_id,
        output,
    } = attachment;

    info!(
        peer = %peer,
        context = %context,
        channel_id = %channel_id,
        role = ?role,
        mode = %mode,
        "Command connection attached"
    );

    let mut writer = tokio::spawn(write_output(sink, output, mode));

    read_envelopes(source, &session, role, &channel_id, shutdown).await;

    let detached = match role {
        Role::Driver => session.detach_driver(&channel_id).await,
        Role::ReadOnly => session.detach_read_only(&channel_id).await,
    };
    debug!(channel_id = %channel_id, detached, "Command connection closed");

    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }
}

/// Delivers queued output as frames, then closes the connection once the
/// session drops the channel.
async fn write_output(mut sink: WsSink, mut output: mpsc::Receiver<Vec<u8>>, mode: ResponseMode) {
    while let Some(chunk) = output.recv().await {
        let message = match mode {
            ResponseMode::Text => WsMessage::Text(String::from_utf8_lossy(&chunk).into_owned()),
            ResponseMode::Binary => WsMessage::Binary(chunk),
        };
        if let Err(e) = sink.send(message).await {
            debug!(error = %e, "Failed to send output frame");
            return;
        }
    }
    let _ = sink.close().await;
}

async fn read_envelopes(
    mut source: WsSource,
    session: &TerminalSession,
    role: Role,
    channel_id: &str,
    shutdown: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => return,
            frame = source.next() => frame,
        };

        let payload = match frame {
            Some(Ok(WsMessage::Text(text))) => text.into_bytes(),
            Some(Ok(WsMessage::Binary(data))) => data,
            Some(Ok(WsMessage::Close(_))) | None => return,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!(channel_id = %channel_id, error = %e, "Connection error");
                return;
            }
        };

        if role == Role::ReadOnly {
            debug!(channel_id = %channel_id, "Ignoring envelope from read-only connection");
            continue;
        }

        let action = match TermAction::from_slice(&payload) {
            Ok(action) => action,
            Err(e) => {
                warn!(channel_id = %channel_id, error = %e, "Dropping malformed envelope");
                continue;
            }
        };

        let result = match action {
            TermAction::Read { data } => session.submit_input(channel_id, data.into_bytes()).await,
            TermAction::Resize { cols, rows } => session.resize(channel_id, cols, rows).await,
        };

        match result {
            Ok(()) => {}
            Err(SessionError::Destroyed(_)) => return,
            Err(e) => warn!(channel_id = %channel_id, error = %e, "Envelope rejected"),
        }
    }
}

/// Subscribes to the session of a context, resolving it again once if the
/// resolved session was destroyed in the meantime.
async fn subscribe(
    registry: &SessionRegistry,
    context: &str,
) -> Result<(Arc<TerminalSession>, StatusSubscription), SessionError> {
    let session = registry.get_or_create(context);
    match session.subscribe_status().await {
        Ok(subscription) => Ok((session, subscription)),
        Err(SessionError::Destroyed(_)) => {
            let session = registry.get_or_create(context);
            let subscription = session.subscribe_status().await?;
            Ok((session, subscription))
        }
        Err(e) => Err(e),
    }
}

async fn serve_status(
    ws: WebSocketStream<TcpStream>,
    peer: SocketAddr,
    registry: &SessionRegistry,
    context: &str,
    shutdown: CancellationToken,
) {
    let (mut sink, mut source) = ws.split();

    let (session, mut subscription) = match subscribe(registry, context).await {
        Ok(subscribed) => subscribed,
        Err(e) => {
            warn!(peer = %peer, context = %context, error = %e, "Failed to subscribe status listener");
            let frame = CloseFrame {
                code: CloseCode::Error,
                reason: e.to_string().into(),
            };
            let _ = sink.send(WsMessage::Close(Some(frame))).await;
            return;
        }
    };

    info!(peer = %peer, context = %context, listener_id = subscription.id, "Status listener attached");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = subscription.events.recv() => {
                let Some(event) = event else {
                    // The session was destroyed.
                    let _ = sink.close().await;
                    break;
                };

                match StatusMessage::from(event).to_json() {
                    Ok(json) => {
                        if let Err(e) = sink.send(WsMessage::Text(json)).await {
                            debug!(listener_id = subscription.id, error = %e, "Failed to send status");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(listener_id = subscription.id, error = %e, "Failed to encode status event");
                        let frame = CloseFrame {
                            code: CloseCode::Error,
                            reason: format!("Cannot write object to JSON: {}", e).into(),
                        };
                        let _ = sink.send(WsMessage::Close(Some(frame))).await;
                        break;
                    }
                }
            }
            frame = source.next() => match frame {
                Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }

    session.unsubscribe_status(subscription.id).await;
    debug!(context = %context, listener_id = subscription.id, "Status listener closed");
}
