//! WebSocket transport backed by `tokio-tungstenite`.
//!
//! [`WsTransport`] implements the session's transport capability: the
//! handle is non-blocking and hands commands to a background task that
//! owns the socket. The task reports everything that happens —
//! connects, closes, errors, traffic — through the event callback in
//! the order it occurred, which is the ordering guarantee the session
//! relies on.
//!
//! # Architecture
//!
//! ```text
//! WsTransport (handle)          background task
//!   connect()/send()/close() ──► command channel ──► socket
//!   is_connected()  ◄── AtomicBool ◄── task state
//!                         events ◄── TransportEvent callback
//! ```

// Rust guideline compliant 2026-02

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;

use crate::transport::{Transport, TransportEvent};

/// Concrete WebSocket stream type (avoids repeating the generic).
type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Received WebSocket message.
#[derive(Debug)]
enum WsMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Ping frame with payload.
    Ping(Vec<u8>),
    /// Close frame with status code and reason.
    Close {
        /// WebSocket close code (1000 = normal, 1005 = no code).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

/// Write half of a WebSocket connection.
struct WsWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

impl WsWriter {
    /// Send a UTF-8 text frame.
    async fn send_text(&mut self, text: &str) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Text(text.to_string()))
            .await
            .context("WebSocket send_text failed")
    }

    /// Send a pong frame in response to a ping.
    async fn send_pong(&mut self, data: Vec<u8>) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Pong(data))
            .await
            .context("WebSocket send_pong failed")
    }

    /// Flush pending writes and close the sink.
    async fn close(&mut self) -> Result<()> {
        self.sink.close().await.context("WebSocket close failed")
    }
}

/// Read half of a WebSocket connection.
struct WsReader {
    stream: futures_util::stream::SplitStream<WsStream>,
}

impl WsReader {
    /// Receive the next message, returning `None` when the stream ends.
    ///
    /// Binary, pong, and raw frame variants are skipped internally —
    /// the hub protocol is text-only.
    async fn recv(&mut self) -> Option<Result<WsMessage>> {
        loop {
            match self.stream.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    return Some(Ok(WsMessage::Text(text.to_string())));
                }
                Some(Ok(tungstenite::Message::Ping(data))) => {
                    return Some(Ok(WsMessage::Ping(data.to_vec())));
                }
                Some(Ok(tungstenite::Message::Close(close_frame))) => {
                    let (code, reason) = close_frame
                        .map(|cf| (cf.code.into(), cf.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    return Some(Ok(WsMessage::Close { code, reason }));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Some(Err(anyhow::anyhow!("WebSocket read error: {e}")));
                }
                None => return None,
            }
        }
    }
}

/// Connect to a WebSocket URL and split into (writer, reader) halves.
async fn connect(url: &str) -> Result<(WsWriter, WsReader)> {
    use tungstenite::client::IntoClientRequest;

    let request = url
        .into_client_request()
        .with_context(|| format!("invalid WebSocket URL: {url}"))?;

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .context("WebSocket connect failed")?;

    let (sink, stream) = ws_stream.split();

    Ok((WsWriter { sink }, WsReader { stream }))
}

/// Convert an HTTP(S) URL to WS(S) scheme.
///
/// Passes `ws://` and `wss://` through unchanged.
#[must_use]
pub fn http_to_ws_scheme(url: &str) -> String {
    if url.starts_with("wss://") || url.starts_with("ws://") {
        url.to_string()
    } else {
        url.replace("https://", "wss://")
            .replace("http://", "ws://")
    }
}

/// Commands from the transport handle to the background task.
#[derive(Debug)]
enum WsCommand {
    Connect,
    Send(String),
    Close,
}

/// Non-blocking WebSocket transport handle.
#[derive(Debug)]
pub struct WsTransport {
    commands: mpsc::UnboundedSender<WsCommand>,
    connected: Arc<AtomicBool>,
}

impl WsTransport {
    /// Spawn the background task for `url`. Every transport event is
    /// delivered through `emit` in the order it occurred.
    pub fn spawn<F>(url: &str, emit: F) -> Self
    where
        F: FnMut(TransportEvent) + Send + 'static,
    {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));

        let url = http_to_ws_scheme(url);
        tokio::spawn(run_transport(url, commands_rx, emit, Arc::clone(&connected)));

        Self {
            commands: commands_tx,
            connected,
        }
    }
}

impl Transport for WsTransport {
    fn connect(&mut self) {
        if self.commands.send(WsCommand::Connect).is_err() {
            log::error!("WebSocket transport task is gone, can't connect");
        }
    }

    fn send(&mut self, raw: &str) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.commands.send(WsCommand::Send(raw.to_string())).is_ok()
    }

    fn close(&mut self) {
        if self.commands.send(WsCommand::Close).is_err() {
            log::debug!("WebSocket transport task already gone on close");
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Background task: waits for connect commands, runs the connected
/// message loop, and reports every outcome through `emit`.
async fn run_transport<F>(
    url: String,
    mut commands: mpsc::UnboundedReceiver<WsCommand>,
    mut emit: F,
    connected: Arc<AtomicBool>,
) where
    F: FnMut(TransportEvent) + Send + 'static,
{
    while let Some(command) = commands.recv().await {
        match command {
            WsCommand::Connect => {
                log::debug!("Connecting WebSocket: {url}");
                match connect(&url).await {
                    Ok((writer, reader)) => {
                        connected.store(true, Ordering::SeqCst);
                        emit(TransportEvent::Connected);
                        run_connected(writer, reader, &mut commands, &mut emit).await;
                        connected.store(false, Ordering::SeqCst);
                    }
                    Err(e) => {
                        emit(TransportEvent::ConnectionError(format!("{e:#}")));
                    }
                }
            }
            WsCommand::Send(raw) => {
                log::warn!("Dropping send while disconnected: {raw}");
            }
            WsCommand::Close => {}
        }
    }
}

/// Connected message loop. Returns when the connection is gone, after
/// emitting the matching Closed or ConnectionError event.
async fn run_connected<F>(
    mut writer: WsWriter,
    mut reader: WsReader,
    commands: &mut mpsc::UnboundedReceiver<WsCommand>,
    emit: &mut F,
) where
    F: FnMut(TransportEvent) + Send + 'static,
{
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(WsCommand::Send(raw)) => {
                    if writer.send_text(&raw).await.is_ok() {
                        emit(TransportEvent::MessageSent(raw));
                    } else {
                        emit(TransportEvent::ConnectionError("WebSocket send failed".into()));
                        return;
                    }
                }
                Some(WsCommand::Close) | None => {
                    let _ = writer.close().await;
                    emit(TransportEvent::Closed {
                        code: 1000,
                        reason: "closed by client".into(),
                        clean: true,
                    });
                    return;
                }
                Some(WsCommand::Connect) => {
                    log::warn!("Ignoring connect command while already connected");
                }
            },
            message = reader.recv() => match message {
                Some(Ok(WsMessage::Text(text))) => {
                    emit(TransportEvent::Message(text));
                }
                Some(Ok(WsMessage::Ping(data))) => {
                    if writer.send_pong(data).await.is_err() {
                        emit(TransportEvent::ConnectionError("WebSocket pong failed".into()));
                        return;
                    }
                }
                Some(Ok(WsMessage::Close { code, reason })) => {
                    emit(TransportEvent::Closed {
                        code,
                        reason,
                        clean: code <= 1000,
                    });
                    return;
                }
                Some(Err(e)) => {
                    emit(TransportEvent::ConnectionError(e.to_string()));
                    return;
                }
                None => {
                    // Stream ended without a close frame.
                    emit(TransportEvent::Closed {
                        code: 1006,
                        reason: "connection lost".into(),
                        clean: false,
                    });
                    return;
                }
            },
        }
    }
}
