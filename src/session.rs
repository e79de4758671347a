//! The hub session state machine.
//!
//! [`HubSession`] owns the transport handle, the connection state, the
//! handler registry, the send queues, and the reconnect controller. It
//! ingests transport events in delivery order and reports the service
//! lifecycle steps each transition requires as [`LifecycleSignal`]s —
//! the driver applies them to the service locator, which keeps the
//! state machine testable without live services or a live socket.
//!
//! # States
//!
//! ```text
//! None → Created → Connecting → Connected → Established → Authorized
//!                      ↑            │            │            │
//!                      │            └────────────┴────────────┴──→ Closed
//!                      │                                            │
//!                      └────────────── WaitingForReconnect ←────────┘
//! ```
//!
//! Connected→Established is driven by the *first* inbound frame after
//! connecting — the hub's handshake-complete convention — and
//! Established→Authorized by the authorization service, never by the
//! session itself.

// Rust guideline compliant 2026-02

use std::collections::{HashMap, VecDeque};

use serde::Serialize;

use crate::action::{ActionKey, ControllerCategory};
use crate::config::SocketSettings;
use crate::handle::HandlerRegistry;
use crate::protocol::{ErrorPayload, InboundHeader, MessageType, RequestEnvelope};
use crate::queue::SendQueues;
use crate::reconnect::ReconnectController;
use crate::transport::{Transport, TransportEvent};

/// Close codes above this value are abnormal and eligible for
/// auto-reconnect.
const NORMAL_CLOSE_CODE: u16 = 1000;

/// Connection state, the single source of truth for send/receive
/// eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport exists yet.
    None,
    /// Transport created for a destination address.
    Created,
    /// Connect attempt in flight.
    Connecting,
    /// Transport reports an open connection; handshake frame pending.
    Connected,
    /// First inbound frame observed; non-auth traffic may flow.
    Established,
    /// External authorization completed; all traffic may flow.
    Authorized,
    /// Transport closed or errored.
    Closed,
    /// Reconnect attempt scheduled by the backoff controller.
    WaitingForReconnect,
}

/// Service lifecycle step a state transition requires.
///
/// Produced by the session, applied by the driver to the service
/// locator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// First inbound frame observed — start services.
    Start,
    /// Authorization completed — start authorized services.
    StartAuthorized,
    /// Reconnected after a drop — services should re-authorize.
    Reauthorize,
    /// Connection closed or errored — stop services.
    Stop,
}

/// Terminal outcome of a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Transmitted immediately.
    Sent,
    /// Held in a queue until its flush trigger.
    Queued,
    /// Answered locally by the fake-response development toggle.
    Faked,
}

/// Send failed before anything was queued or transmitted.
#[derive(Debug)]
pub enum SendError {
    /// The payload body failed to encode.
    EncodePayload(serde_json::Error),
    /// The outbound envelope failed to encode.
    EncodeEnvelope(serde_json::Error),
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EncodePayload(e) => write!(f, "Failed to encode payload data: {e}"),
            Self::EncodeEnvelope(e) => write!(f, "Failed to encode message envelope: {e}"),
        }
    }
}

impl std::error::Error for SendError {}

type TransportFactory = Box<dyn FnMut(&str) -> Box<dyn Transport> + Send>;

/// The session state machine. See the module docs for the state
/// diagram and [`crate::client::HubClient`] for the owning driver.
pub struct HubSession {
    state: ConnectionState,
    url: String,
    transport: Option<Box<dyn Transport>>,
    factory: TransportFactory,
    registry: HandlerRegistry,
    queues: SendQueues,
    reconnect: ReconnectController,
    settings: SocketSettings,
    fake_responses: HashMap<ActionKey, String>,
    pending_reconnect: Option<std::time::Duration>,
    state_observers: Vec<Box<dyn FnMut(ConnectionState) + Send>>,
    message_sent_observers: Vec<Box<dyn FnMut() + Send>>,
}

impl std::fmt::Debug for HubSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubSession")
            .field("state", &self.state)
            .field("url", &self.url)
            .field("queued_auth", &self.queues.auth_len())
            .field("queued_plain", &self.queues.plain_len())
            .finish_non_exhaustive()
    }
}

impl HubSession {
    /// Create a session that builds transports with `factory` when a
    /// connection is started.
    pub fn new<F>(settings: SocketSettings, factory: F) -> Self
    where
        F: FnMut(&str) -> Box<dyn Transport> + Send + 'static,
    {
        let reconnect = ReconnectController::new(
            settings.auto_reconnect,
            settings.reconnect_start(),
            settings.reconnect_max(),
            settings.reconnect_growth_step,
        );

        Self {
            state: ConnectionState::None,
            url: String::new(),
            transport: None,
            factory: Box::new(factory),
            registry: HandlerRegistry::new(),
            queues: SendQueues::new(),
            reconnect,
            settings,
            fake_responses: HashMap::new(),
            pending_reconnect: None,
            state_observers: Vec::new(),
            message_sent_observers: Vec::new(),
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether messages can currently be transmitted.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        let transport_up = self.transport.as_ref().is_some_and(|t| t.is_connected());
        transport_up
            && matches!(
                self.state,
                ConnectionState::Established | ConnectionState::Authorized
            )
    }

    // =========================================================================
    // Connection management
    // =========================================================================

    /// Create the transport for `url` and start connecting.
    ///
    /// An empty or unchanged-duplicate address is a no-op logged as a
    /// warning; the state is unchanged.
    pub fn start_connection(&mut self, url: &str) {
        log::info!("Trying to connect to: {url}");
        if url.is_empty() {
            log::warn!("Failed to connect. Destination url is empty");
            return;
        }
        if !self.url.is_empty() && self.url == url {
            log::warn!("Failed to connect. The destination url is unchanged: {url}");
            return;
        }

        log::info!("Set new url: {url}");
        self.url = url.to_string();
        self.transport = Some((self.factory)(url));
        self.set_state(ConnectionState::Created);
        self.connect();
    }

    /// Start (or re-start) a connect attempt on the existing transport.
    pub fn connect(&mut self) {
        if let Some(transport) = self.transport.as_mut() {
            transport.connect();
        } else {
            log::error!("Transport not created, can't connect");
            return;
        }
        self.set_state(ConnectionState::Connecting);
    }

    /// Stop the session: cancel any reconnect schedule, close the
    /// transport, and move to `Closed`. The driver stops services.
    pub fn shutdown(&mut self) {
        self.reconnect.stop();
        self.pending_reconnect = None;
        if let Some(transport) = self.transport.as_mut() {
            transport.close();
        }
        if !matches!(self.state, ConnectionState::None | ConnectionState::Closed) {
            self.set_state(ConnectionState::Closed);
        }
    }

    /// Take the reconnect interval the driver should schedule ticks
    /// at, set when the session enters `WaitingForReconnect`.
    pub fn take_reconnect_schedule(&mut self) -> Option<std::time::Duration> {
        self.pending_reconnect.take()
    }

    /// A scheduled reconnect tick fired: re-invoke the connect
    /// operation. Stale ticks outside `WaitingForReconnect` are
    /// ignored.
    pub fn on_reconnect_tick(&mut self) {
        if self.state != ConnectionState::WaitingForReconnect {
            log::debug!("Ignoring stale reconnect tick in state {:?}", self.state);
            return;
        }
        self.reconnect.on_attempt_started();
        self.connect();
    }

    // =========================================================================
    // Binding and sending
    // =========================================================================

    /// Bind (or rebind) the message callback for `key`.
    pub fn bind<T, F>(&mut self, key: &ActionKey, callback: F)
    where
        T: serde::de::DeserializeOwned + Default + Send + 'static,
        F: FnMut(T) + Send + 'static,
    {
        self.registry.bind(key, callback);
    }

    /// Bind the error callback for `key`. Allowed only after [`bind`]
    /// for the same key; returns whether the callback was bound.
    ///
    /// [`bind`]: Self::bind
    pub fn bind_error<F>(&mut self, key: &ActionKey, callback: F) -> bool
    where
        F: FnMut(ErrorPayload) + Send + 'static,
    {
        self.registry.bind_error(key, callback)
    }

    /// Clear both callbacks for `key`.
    pub fn unbind(&mut self, key: &ActionKey) {
        self.registry.unbind(key);
    }

    /// Register a canned response body for the development-only
    /// fake-response toggle.
    pub fn register_fake_response(&mut self, key: ActionKey, body: impl Into<String>) {
        self.fake_responses.insert(key, body.into());
    }

    /// Encode and send `payload` on `key`.
    ///
    /// Messages that cannot be transmitted in the current state are
    /// queued — `Queued` is a valid terminal outcome, not a failure.
    /// Only encoding errors abort the send.
    pub fn send<T: Serialize>(
        &mut self,
        key: &ActionKey,
        payload: &T,
    ) -> Result<SendOutcome, SendError> {
        log::debug!("Sending request with method \"{}\"", key.method());

        let body = serde_json::to_string(payload).map_err(SendError::EncodePayload)?;
        let envelope = RequestEnvelope::new(key, body);
        let raw = serde_json::to_string(&envelope).map_err(SendError::EncodeEnvelope)?;

        if self.settings.use_fake_response {
            if let Some(fake) = self.fake_responses.get(key).cloned() {
                log::warn!("Fake response for method \"{}\"", key.method());
                let header = InboundHeader::fake_response(key, fake);
                self.dispatch_header(&header);
                return Ok(SendOutcome::Faked);
            }
        }

        if key.requires_auth() && self.state != ConnectionState::Authorized {
            self.enqueue(key, raw);
            return Ok(SendOutcome::Queued);
        }

        if self.try_send(&raw) {
            Ok(SendOutcome::Sent)
        } else {
            self.enqueue(key, raw);
            Ok(SendOutcome::Queued)
        }
    }

    /// Observe every connection state change.
    pub fn subscribe_state_changed<F>(&mut self, callback: F)
    where
        F: FnMut(ConnectionState) + Send + 'static,
    {
        self.state_observers.push(Box::new(callback));
    }

    /// Observe every frame written to the wire (keep-alive timers use
    /// this to treat any outbound traffic as activity).
    pub fn subscribe_message_sent<F>(&mut self, callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.message_sent_observers.push(Box::new(callback));
    }

    /// Number of messages currently held in the auth-required queue.
    #[must_use]
    pub fn queued_auth_len(&self) -> usize {
        self.queues.auth_len()
    }

    /// Number of messages currently held in the non-auth queue.
    #[must_use]
    pub fn queued_plain_len(&self) -> usize {
        self.queues.plain_len()
    }

    // =========================================================================
    // Event ingestion
    // =========================================================================

    /// Ingest one transport event and return the lifecycle steps the
    /// resulting transition requires.
    pub fn handle_transport_event(&mut self, event: TransportEvent) -> Vec<LifecycleSignal> {
        let mut signals = Vec::new();
        match event {
            TransportEvent::Connected => {
                log::info!("Connected to hub");
                let was_reconnecting = self.reconnect.on_connect_succeeded();
                self.pending_reconnect = None;
                if was_reconnecting {
                    log::info!("Stop reconnecting timer");
                    signals.push(LifecycleSignal::Reauthorize);
                }
                self.set_state(ConnectionState::Connected);
                // The connection counts as established only once the
                // hub speaks; see the Message arm.
            }
            TransportEvent::Closed { code, reason, .. } => {
                self.stop_communication(&mut signals);
                if code > NORMAL_CLOSE_CODE {
                    log::warn!("Connection closed with abnormal code {code}: {reason}");
                    self.start_reconnect_timer();
                } else {
                    log::info!("Connection closed");
                }
            }
            TransportEvent::ConnectionError(message) => {
                log::error!("Connection error: {message}");
                self.stop_communication(&mut signals);
                self.start_reconnect_timer();
            }
            TransportEvent::MessageSent(raw) => {
                log::debug!("Message sent: {raw}");
                for callback in &mut self.message_sent_observers {
                    callback();
                }
            }
            TransportEvent::Message(raw) => {
                self.on_message(&raw, &mut signals);
            }
        }
        signals
    }

    /// The designated authorization service reported success.
    pub fn on_authorized(&mut self) -> Vec<LifecycleSignal> {
        log::info!("Authorized on hub completed!");
        self.set_state(ConnectionState::Authorized);
        vec![LifecycleSignal::StartAuthorized]
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn set_state(&mut self, state: ConnectionState) {
        log::info!("Change connection state: {state:?}");
        self.state = state;
        for callback in &mut self.state_observers {
            callback(state);
        }
        self.try_flush_queues();
    }

    fn stop_communication(&mut self, signals: &mut Vec<LifecycleSignal>) {
        self.set_state(ConnectionState::Closed);
        signals.push(LifecycleSignal::Stop);
    }

    fn start_reconnect_timer(&mut self) {
        if let Some(interval) = self.reconnect.schedule() {
            log::warn!(
                "Start reconnecting timer in {:.1} seconds",
                interval.as_secs_f64()
            );
            self.pending_reconnect = Some(interval);
            self.set_state(ConnectionState::WaitingForReconnect);
        }
    }

    fn on_message(&mut self, raw: &str, signals: &mut Vec<LifecycleSignal>) {
        // The first inbound frame after connecting is the
        // handshake-complete signal, never parsed as a message.
        if self.state == ConnectionState::Connected {
            log::info!("First message received - connection established");
            self.set_state(ConnectionState::Established);
            signals.push(LifecycleSignal::Start);
            return;
        }

        if matches!(
            self.state,
            ConnectionState::Established | ConnectionState::Authorized
        ) {
            log::debug!("Message received: {raw}");
            match InboundHeader::parse(raw) {
                Ok(header) => self.dispatch_header(&header),
                Err(e) => log::error!("Failed to parse message: {raw}: {e}"),
            }
        } else {
            log::warn!(
                "Skip handle message in connection state {:?}: {raw}",
                self.state
            );
        }
    }

    fn dispatch_header(&mut self, header: &InboundHeader) {
        let Some(category) = ControllerCategory::from_wire(header.controller) else {
            log::error!(
                "Unknown controller {} for method: {}",
                header.controller,
                header.method
            );
            return;
        };

        let key = ActionKey::new(category, header.method.clone());
        if !self.registry.contains(&key) {
            log::error!("Not found handler for: {}", header.method);
            return;
        }

        if header.kind == MessageType::Error {
            match ErrorPayload::decode(&header.data) {
                Ok(payload) => {
                    log::error!(
                        "Got error message for {} with code {:?}: {}",
                        header.method,
                        payload.code,
                        payload.message
                    );
                    self.registry.dispatch_error(&key, &payload);
                }
                Err(_) => log::error!(
                    "Got error message for {} with wrong data: {}",
                    header.method,
                    header.data
                ),
            }
        } else if self.registry.dispatch_message(&key, &header.data) == Some(false) {
            log::error!("Failed to decode message body for: {}", header.method);
        }
    }

    fn enqueue(&mut self, key: &ActionKey, raw: String) {
        log::warn!(
            "Can't send message, socket is not connected! Message queued - key: {}",
            key.method()
        );
        self.queues.enqueue(key.requires_auth(), raw);
    }

    fn try_send(&mut self, raw: &str) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.transport.as_mut().is_some_and(|t| t.send(raw))
    }

    fn try_flush_queues(&mut self) {
        if !self.is_connected() {
            return;
        }

        if self.state == ConnectionState::Authorized {
            if !self.queues.auth_is_empty() {
                log::info!("Send queued messages after authorization");
                let pending = self.queues.take_auth();
                self.send_all(pending);
            }
        } else if self.state == ConnectionState::Established && !self.queues.plain_is_empty() {
            log::info!("Send queued non auth messages after connection established");
            let pending = self.queues.take_plain();
            self.send_all(pending);
        }
    }

    fn send_all(&mut self, pending: VecDeque<String>) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        for raw in pending {
            if !transport.send(&raw) {
                log::warn!("Transport refused queued message, dropping it");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct TestPayload {
        value: i32,
    }

    /// Transport stub recording sent frames, connectivity toggled by
    /// the test.
    struct TestTransport {
        sent: Arc<Mutex<Vec<String>>>,
        connected: Arc<AtomicBool>,
    }

    impl Transport for TestTransport {
        fn connect(&mut self) {}

        fn send(&mut self, raw: &str) -> bool {
            if !self.connected.load(Ordering::SeqCst) {
                return false;
            }
            self.sent.lock().unwrap().push(raw.to_string());
            true
        }

        fn close(&mut self) {
            self.connected.store(false, Ordering::SeqCst);
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }

    struct Harness {
        session: HubSession,
        sent: Arc<Mutex<Vec<String>>>,
        connected: Arc<AtomicBool>,
    }

    fn harness_with(settings: SocketSettings) -> Harness {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let connected = Arc::new(AtomicBool::new(false));
        let sent_handle = Arc::clone(&sent);
        let connected_handle = Arc::clone(&connected);
        let session = HubSession::new(settings, move |_url| {
            Box::new(TestTransport {
                sent: Arc::clone(&sent_handle),
                connected: Arc::clone(&connected_handle),
            }) as Box<dyn Transport>
        });
        Harness {
            session,
            sent,
            connected,
        }
    }

    fn harness() -> Harness {
        harness_with(SocketSettings::default())
    }

    fn plain_key() -> ActionKey {
        ActionKey::new(ControllerCategory::Event, "notify").require_auth(false)
    }

    fn auth_key() -> ActionKey {
        ActionKey::new(ControllerCategory::Server, "update")
    }

    /// Drive the session to Established through the regular event path.
    fn establish(h: &mut Harness) -> Vec<LifecycleSignal> {
        h.session.start_connection("wss://hub.test");
        h.connected.store(true, Ordering::SeqCst);
        h.session.handle_transport_event(TransportEvent::Connected);
        h.session
            .handle_transport_event(TransportEvent::Message("hello".into()))
    }

    #[test]
    fn test_empty_url_is_noop() {
        let mut h = harness();
        h.session.start_connection("");
        assert_eq!(h.session.state(), ConnectionState::None);
    }

    #[test]
    fn test_duplicate_url_is_noop() {
        let mut h = harness();
        h.session.start_connection("wss://hub.test");
        assert_eq!(h.session.state(), ConnectionState::Connecting);
        h.connected.store(true, Ordering::SeqCst);
        h.session.handle_transport_event(TransportEvent::Connected);

        h.session.start_connection("wss://hub.test");
        assert_eq!(h.session.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_first_frame_establishes_even_if_not_json() {
        let mut h = harness();
        let signals = establish(&mut h);
        assert_eq!(h.session.state(), ConnectionState::Established);
        assert_eq!(signals, vec![LifecycleSignal::Start]);
    }

    #[test]
    fn test_send_before_connect_queues_then_drains_on_established() {
        let mut h = harness();
        h.session.start_connection("wss://hub.test");

        let outcome = h
            .session
            .send(&plain_key(), &TestPayload { value: 1 })
            .unwrap();
        assert_eq!(outcome, SendOutcome::Queued);
        assert_eq!(h.session.queued_plain_len(), 1);

        h.connected.store(true, Ordering::SeqCst);
        h.session.handle_transport_event(TransportEvent::Connected);
        assert!(h.sent.lock().unwrap().is_empty());

        h.session
            .handle_transport_event(TransportEvent::Message("hello".into()));
        assert_eq!(h.session.queued_plain_len(), 0);
        assert_eq!(h.sent.lock().unwrap().len(), 1);
        // Draining alone never authorizes.
        assert_eq!(h.session.state(), ConnectionState::Established);
    }

    #[test]
    fn test_auth_key_queues_until_authorized() {
        let mut h = harness();
        establish(&mut h);

        let outcome = h
            .session
            .send(&auth_key(), &TestPayload { value: 2 })
            .unwrap();
        assert_eq!(outcome, SendOutcome::Queued);
        assert_eq!(h.session.queued_auth_len(), 1);
        assert!(h.sent.lock().unwrap().is_empty());

        let signals = h.session.on_authorized();
        assert_eq!(signals, vec![LifecycleSignal::StartAuthorized]);
        assert_eq!(h.session.state(), ConnectionState::Authorized);
        assert_eq!(h.session.queued_auth_len(), 0);
        assert_eq!(h.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_queue_drain_preserves_fifo_order() {
        let mut h = harness();
        h.session.start_connection("wss://hub.test");
        for value in 0..3 {
            h.session.send(&plain_key(), &TestPayload { value }).unwrap();
        }

        h.connected.store(true, Ordering::SeqCst);
        h.session.handle_transport_event(TransportEvent::Connected);
        h.session
            .handle_transport_event(TransportEvent::Message("hello".into()));

        let sent = h.sent.lock().unwrap();
        assert_eq!(sent.len(), 3);
        for (i, raw) in sent.iter().enumerate() {
            assert!(raw.contains(&format!("\\\"value\\\":{i}")), "out of order: {raw}");
        }
    }

    #[test]
    fn test_send_while_established_transmits_immediately() {
        let mut h = harness();
        establish(&mut h);

        let outcome = h
            .session
            .send(&plain_key(), &TestPayload { value: 9 })
            .unwrap();
        assert_eq!(outcome, SendOutcome::Sent);
        assert_eq!(h.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_abnormal_close_schedules_reconnect() {
        let mut h = harness();
        establish(&mut h);

        let signals = h.session.handle_transport_event(TransportEvent::Closed {
            code: 1006,
            reason: "abnormal".into(),
            clean: false,
        });
        assert_eq!(signals, vec![LifecycleSignal::Stop]);
        assert_eq!(h.session.state(), ConnectionState::WaitingForReconnect);
        assert_eq!(
            h.session.take_reconnect_schedule(),
            Some(std::time::Duration::from_secs(5))
        );
    }

    #[test]
    fn test_normal_close_stays_closed() {
        let mut h = harness();
        establish(&mut h);

        h.session.handle_transport_event(TransportEvent::Closed {
            code: 1000,
            reason: "bye".into(),
            clean: true,
        });
        assert_eq!(h.session.state(), ConnectionState::Closed);
        assert_eq!(h.session.take_reconnect_schedule(), None);
    }

    #[test]
    fn test_reconnect_disabled_stays_closed() {
        let settings = SocketSettings {
            auto_reconnect: false,
            ..SocketSettings::default()
        };
        let mut h = harness_with(settings);
        establish(&mut h);

        h.session.handle_transport_event(TransportEvent::Closed {
            code: 1006,
            reason: "abnormal".into(),
            clean: false,
        });
        assert_eq!(h.session.state(), ConnectionState::Closed);
        assert_eq!(h.session.take_reconnect_schedule(), None);
    }

    #[test]
    fn test_reconnect_success_triggers_reauthorize() {
        let mut h = harness();
        establish(&mut h);

        h.session.handle_transport_event(TransportEvent::ConnectionError("drop".into()));
        assert_eq!(h.session.state(), ConnectionState::WaitingForReconnect);

        h.session.on_reconnect_tick();
        assert_eq!(h.session.state(), ConnectionState::Connecting);

        let signals = h.session.handle_transport_event(TransportEvent::Connected);
        assert_eq!(signals, vec![LifecycleSignal::Reauthorize]);
        assert_eq!(h.session.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_messages_dropped_outside_established() {
        let mut h = harness();
        h.session.start_connection("wss://hub.test");

        let seen = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&seen);
        let key = plain_key();
        h.session.bind(&key, move |_: TestPayload| {
            *sink.lock().unwrap() += 1;
        });

        // Connecting: frames are dropped with a warning.
        h.session.handle_transport_event(TransportEvent::Message(
            r#"{"type":"RESPONSE","controller":1,"method":"notify","data":"{}"}"#.into(),
        ));
        assert_eq!(*seen.lock().unwrap(), 0);
        assert_eq!(h.session.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_inbound_dispatch_to_bound_callback() {
        let mut h = harness();
        establish(&mut h);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        h.session.bind(&plain_key(), move |msg: TestPayload| {
            sink.lock().unwrap().push(msg.value);
        });

        h.session.handle_transport_event(TransportEvent::Message(
            r#"{"type":"RESPONSE","controller":1,"method":"notify","data":"{\"value\":5}"}"#.into(),
        ));
        assert_eq!(*seen.lock().unwrap(), vec![5]);
    }

    #[test]
    fn test_inbound_error_dispatch() {
        let mut h = harness();
        establish(&mut h);

        let seen = Arc::new(Mutex::new(Vec::new()));
        h.session.bind(&plain_key(), |_: TestPayload| {});
        let sink = Arc::clone(&seen);
        h.session.bind_error(&plain_key(), move |err| {
            sink.lock().unwrap().push(err.code);
        });

        h.session.handle_transport_event(TransportEvent::Message(
            r#"{"type":"ERROR","controller":1,"method":"notify","data":"{\"code\":2,\"errorMessage\":\"denied\"}"}"#.into(),
        ));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![crate::protocol::HubErrorCode::Unauthorized]
        );
    }

    #[test]
    fn test_fake_response_bypasses_transport() {
        let settings = SocketSettings {
            use_fake_response: true,
            ..SocketSettings::default()
        };
        let mut h = harness_with(settings);
        establish(&mut h);

        let key = plain_key();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        h.session.bind(&key, move |msg: TestPayload| {
            sink.lock().unwrap().push(msg.value);
        });
        h.session
            .register_fake_response(key.clone(), r#"{"value":42}"#);

        let outcome = h.session.send(&key, &TestPayload { value: 0 }).unwrap();
        assert_eq!(outcome, SendOutcome::Faked);
        assert_eq!(*seen.lock().unwrap(), vec![42]);
        assert!(h.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_fake_response_ignored_when_toggle_off() {
        let mut h = harness();
        establish(&mut h);

        let key = plain_key();
        h.session
            .register_fake_response(key.clone(), r#"{"value":42}"#);
        let outcome = h.session.send(&key, &TestPayload { value: 0 }).unwrap();
        assert_eq!(outcome, SendOutcome::Sent);
        assert_eq!(h.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_state_observers_notified() {
        let mut h = harness();
        let states = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&states);
        h.session
            .subscribe_state_changed(move |s| sink.lock().unwrap().push(s));

        establish(&mut h);
        assert_eq!(
            *states.lock().unwrap(),
            vec![
                ConnectionState::Created,
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Established,
            ]
        );
    }

    #[test]
    fn test_message_sent_observers_notified() {
        let mut h = harness();
        let count = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&count);
        h.session.subscribe_message_sent(move || {
            *sink.lock().unwrap() += 1;
        });

        establish(&mut h);
        h.session
            .handle_transport_event(TransportEvent::MessageSent("raw".into()));
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn test_shutdown_cancels_reconnect() {
        let mut h = harness();
        establish(&mut h);
        h.session
            .handle_transport_event(TransportEvent::ConnectionError("drop".into()));
        assert_eq!(h.session.state(), ConnectionState::WaitingForReconnect);

        h.session.shutdown();
        assert_eq!(h.session.state(), ConnectionState::Closed);
        assert_eq!(h.session.take_reconnect_schedule(), None);
    }
}
