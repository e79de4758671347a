//! Abstract transport capability required by the session.
//!
//! The session core never touches a socket directly. It drives a
//! [`Transport`] — connect, send, close, connectivity probe — and
//! ingests [`TransportEvent`]s delivered by the transport's owner in
//! the order the transport produced them. The WebSocket implementation
//! lives in [`crate::ws`]; tests substitute their own.

// Rust guideline compliant 2026-02

/// Lifecycle and traffic events produced by a transport.
///
/// Events must be delivered to the session in production order; the
/// session does not reorder them.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The transport finished connecting.
    Connected,
    /// The transport closed.
    Closed {
        /// Close status code (1000 = normal).
        code: u16,
        /// Human-readable close reason.
        reason: String,
        /// Whether the close handshake completed cleanly.
        clean: bool,
    },
    /// Connecting failed or the connection errored mid-stream.
    ConnectionError(String),
    /// A frame was written to the wire.
    MessageSent(String),
    /// A frame arrived from the hub.
    Message(String),
}

/// Capability contract the session requires from a transport.
///
/// All operations are non-blocking: implementations hand work to a
/// background task and report outcomes through [`TransportEvent`]s.
pub trait Transport: Send {
    /// Start a connection attempt. Repeated calls re-attempt.
    fn connect(&mut self);

    /// Hand a frame to the transport for sending.
    ///
    /// Returns `false` when the transport cannot currently deliver;
    /// the caller decides whether to queue.
    fn send(&mut self, raw: &str) -> bool;

    /// Close the connection.
    fn close(&mut self);

    /// Whether the transport currently holds an open connection.
    fn is_connected(&self) -> bool;
}
