//! The hub client driver.
//!
//! [`HubClient`] owns the session state machine and the service
//! locator and is the single mutator of both: every transport event,
//! service timer, and authorization signal funnels through one
//! unbounded [`ClientEvent`] channel and is applied by one task. The
//! lifecycle signals the session emits for a transition are applied to
//! the locator before the next event is processed, so services observe
//! transitions in order.

// Rust guideline compliant 2026-02

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::SocketSettings;
use crate::services::{HubService, ServiceLocator};
use crate::session::{ConnectionState, HubSession, LifecycleSignal};
use crate::transport::{Transport, TransportEvent};
use crate::ws::WsTransport;

/// Event from a background producer delivered to the client event loop.
///
/// Transport tasks, service timers, and service callbacks all send
/// through the same channel; the `run` loop dispatches each variant in
/// arrival order.
#[derive(Debug)]
pub enum ClientEvent {
    /// Transport lifecycle or traffic event.
    Transport(TransportEvent),

    /// A service-owned timer fired; routed by service name.
    TimerFired {
        /// Name of the owning service.
        service: &'static str,
    },

    /// The designated authorization service reported success.
    Authorized,

    /// A scheduled reconnect attempt is due.
    ReconnectTick,

    /// Stop the event loop, the reconnect timer, and all services.
    Shutdown,
}

/// Driver owning the session and its services.
pub struct HubClient {
    session: HubSession,
    services: ServiceLocator,
    events_tx: mpsc::UnboundedSender<ClientEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<ClientEvent>>,
    reconnect_task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for HubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubClient")
            .field("session", &self.session)
            .field("services", &self.services)
            .finish_non_exhaustive()
    }
}

impl HubClient {
    /// Create a client whose session connects over WebSocket.
    ///
    /// Must be called within a Tokio runtime — connecting spawns the
    /// transport's background task.
    #[must_use]
    pub fn with_websocket(settings: SocketSettings) -> Self {
        Self::new(settings, |events| {
            move |url: &str| {
                let events = events.clone();
                Box::new(WsTransport::spawn(url, move |event| {
                    let _ = events.send(ClientEvent::Transport(event));
                })) as Box<dyn Transport>
            }
        })
    }

    /// Create a client with a custom transport factory.
    ///
    /// `make_factory` receives the client's event sender so the
    /// transports it builds can deliver their events into the loop.
    pub fn new<B, F>(settings: SocketSettings, make_factory: B) -> Self
    where
        B: FnOnce(mpsc::UnboundedSender<ClientEvent>) -> F,
        F: FnMut(&str) -> Box<dyn Transport> + Send + 'static,
    {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let factory = make_factory(events_tx.clone());
        let session = HubSession::new(settings, factory);

        Self {
            session,
            services: ServiceLocator::new(),
            events_tx,
            events_rx: Some(events_rx),
            reconnect_task: None,
        }
    }

    /// Sender for delivering [`ClientEvent`]s into the loop; services
    /// and external owners clone this.
    #[must_use]
    pub fn event_sender(&self) -> mpsc::UnboundedSender<ClientEvent> {
        self.events_tx.clone()
    }

    /// The session state machine.
    #[must_use]
    pub fn session(&self) -> &HubSession {
        &self.session
    }

    /// Mutable access to the session state machine.
    pub fn session_mut(&mut self) -> &mut HubSession {
        &mut self.session
    }

    /// Register `service`, replaying already-performed lifecycle
    /// steps. Registering an already-present type returns the existing
    /// instance.
    pub fn register<S: HubService>(&mut self, service: S) -> &mut S {
        self.services.register(service, &mut self.session)
    }

    /// Typed access to a registered service.
    pub fn service_mut<S: HubService>(&mut self) -> Option<&mut S> {
        self.services.get_mut::<S>()
    }

    /// Run `f` with a registered service and the session, for
    /// operations that need both (for example sending a request owned
    /// by the service).
    pub fn with_service<S: HubService, R>(
        &mut self,
        f: impl FnOnce(&mut S, &mut HubSession) -> R,
    ) -> Option<R> {
        let session = &mut self.session;
        self.services.get_mut::<S>().map(|service| f(service, session))
    }

    /// Call `init` on every registered service.
    pub fn init_services(&mut self) {
        self.services.init_all(&mut self.session);
    }

    /// Create the transport for `url` and start connecting.
    pub fn start_connection(&mut self, url: &str) {
        self.session.start_connection(url);
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    /// Run the event loop until [`ClientEvent::Shutdown`] arrives.
    pub async fn run(&mut self) {
        let Some(mut events) = self.events_rx.take() else {
            log::error!("Client event loop is already running");
            return;
        };

        log::info!("Hub client event loop started");
        while let Some(event) = events.recv().await {
            if matches!(event, ClientEvent::Shutdown) {
                break;
            }
            self.dispatch(event);
        }
        self.events_rx = Some(events);
        self.shutdown();
    }

    /// Drain and dispatch all queued events without blocking. Test and
    /// embedding hook for callers that own their own loop.
    pub fn poll_events(&mut self) {
        let Some(mut events) = self.events_rx.take() else {
            return;
        };
        while let Ok(event) = events.try_recv() {
            if matches!(event, ClientEvent::Shutdown) {
                self.shutdown();
                break;
            }
            self.dispatch(event);
        }
        self.events_rx = Some(events);
    }

    /// Stop the reconnect timer, close the session, and stop all
    /// services. Deterministic: nothing is half-stopped on return.
    pub fn shutdown(&mut self) {
        log::info!("Shutting down hub client");
        if let Some(task) = self.reconnect_task.take() {
            task.abort();
        }
        self.session.shutdown();
        self.services.stop_all(&mut self.session);
    }

    fn dispatch(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Transport(transport_event) => {
                let signals = self.session.handle_transport_event(transport_event);
                self.apply_signals(&signals);
            }
            ClientEvent::TimerFired { service } => {
                self.services.dispatch_timer(service, &mut self.session);
            }
            ClientEvent::Authorized => {
                let signals = self.session.on_authorized();
                self.apply_signals(&signals);
            }
            ClientEvent::ReconnectTick => {
                self.session.on_reconnect_tick();
            }
            ClientEvent::Shutdown => self.shutdown(),
        }
        self.reconcile_reconnect_timer();
    }

    fn apply_signals(&mut self, signals: &[LifecycleSignal]) {
        for signal in signals {
            match signal {
                LifecycleSignal::Start => self.services.start_all(&mut self.session),
                LifecycleSignal::StartAuthorized => {
                    self.services.start_authorized_all(&mut self.session);
                }
                LifecycleSignal::Reauthorize => self.services.reauthorize_all(&mut self.session),
                LifecycleSignal::Stop => self.services.stop_all(&mut self.session),
            }
        }
    }

    /// Keep the reconnect tick task in step with the session: a task
    /// runs exactly while the session waits for reconnect.
    fn reconcile_reconnect_timer(&mut self) {
        if self.session.state() != ConnectionState::WaitingForReconnect {
            if let Some(task) = self.reconnect_task.take() {
                task.abort();
            }
        }

        if let Some(interval) = self.session.take_reconnect_schedule() {
            log::debug!("Scheduling reconnect attempts every {interval:?}");
            let events = self.events_tx.clone();
            self.reconnect_task = Some(tokio::spawn(async move {
                loop {
                    tokio::time::sleep(interval).await;
                    if events.send(ClientEvent::ReconnectTick).is_err() {
                        break;
                    }
                }
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ping::PingService;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    struct TestTransport {
        sent: Arc<Mutex<Vec<String>>>,
        connected: Arc<AtomicBool>,
        events: mpsc::UnboundedSender<ClientEvent>,
    }

    impl Transport for TestTransport {
        fn connect(&mut self) {
            // Transport connects instantly in tests.
            self.connected.store(true, Ordering::SeqCst);
            let _ = self
                .events
                .send(ClientEvent::Transport(TransportEvent::Connected));
        }
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
        client: HubClient,
        sent: Arc<Mutex<Vec<String>>>,
    }

    fn harness() -> Harness {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sent_handle = Arc::clone(&sent);
        let client = HubClient::new(SocketSettings::default(), move |events| {
            move |_url: &str| {
                Box::new(TestTransport {
                    sent: Arc::clone(&sent_handle),
                    connected: Arc::new(AtomicBool::new(false)),
                    events: events.clone(),
                }) as Box<dyn Transport>
            }
        });
        Harness { client, sent }
    }

    fn frame(event: TransportEvent) -> ClientEvent {
        ClientEvent::Transport(event)
    }

    #[tokio::test]
    async fn test_connect_and_establish_flow() {
        let mut h = harness();
        h.client.start_connection("wss://hub.test");
        h.client.poll_events();
        assert_eq!(h.client.state(), ConnectionState::Connected);

        let sender = h.client.event_sender();
        sender
            .send(frame(TransportEvent::Message("welcome".into())))
            .unwrap();
        h.client.poll_events();
        assert_eq!(h.client.state(), ConnectionState::Established);
    }

    #[tokio::test]
    async fn test_authorized_signal_starts_authorized_services() {
        let mut h = harness();
        h.client.start_connection("wss://hub.test");
        let sender = h.client.event_sender();
        sender
            .send(frame(TransportEvent::Message("welcome".into())))
            .unwrap();
        sender.send(ClientEvent::Authorized).unwrap();
        h.client.poll_events();

        assert_eq!(h.client.state(), ConnectionState::Authorized);
        let mask = h.client.services.lifecycle_mask();
        assert!(mask.started);
        assert!(mask.started_auth);
    }

    #[tokio::test]
    async fn test_ping_timer_event_sends_ping() {
        let mut h = harness();
        let ping = PingService::new(h.client.event_sender());
        h.client.register(ping);
        h.client.init_services();

        h.client.start_connection("wss://hub.test");
        let sender = h.client.event_sender();
        sender
            .send(frame(TransportEvent::Message("welcome".into())))
            .unwrap();
        sender
            .send(ClientEvent::TimerFired {
                service: PingService::NAME,
            })
            .unwrap();
        h.client.poll_events();

        let frames = h.sent.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].contains("\"method\":\"ping\""));
    }

    #[tokio::test]
    async fn test_abnormal_close_schedules_tick_task() {
        let mut h = harness();
        h.client.start_connection("wss://hub.test");
        let sender = h.client.event_sender();
        sender
            .send(frame(TransportEvent::Message("welcome".into())))
            .unwrap();
        sender
            .send(frame(TransportEvent::Closed {
                code: 1006,
                reason: "abnormal".into(),
                clean: false,
            }))
            .unwrap();
        h.client.poll_events();

        assert_eq!(h.client.state(), ConnectionState::WaitingForReconnect);
        assert!(h.client.reconnect_task.is_some());

        // Reconnect tick re-invokes connect; the test transport
        // connects instantly and the task is reconciled away.
        sender.send(ClientEvent::ReconnectTick).unwrap();
        h.client.poll_events();
        assert_eq!(h.client.state(), ConnectionState::Connected);
        assert!(h.client.reconnect_task.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_is_deterministic() {
        let mut h = harness();
        h.client.start_connection("wss://hub.test");
        let sender = h.client.event_sender();
        sender
            .send(frame(TransportEvent::Message("welcome".into())))
            .unwrap();
        h.client.poll_events();

        h.client.shutdown();
        assert_eq!(h.client.state(), ConnectionState::Closed);
        assert!(h.client.reconnect_task.is_none());
        assert!(h.client.services.lifecycle_mask().stopped);
    }

    #[tokio::test]
    async fn test_late_service_registration_catches_up() {
        let mut h = harness();
        h.client.init_services();
        h.client.start_connection("wss://hub.test");
        let sender = h.client.event_sender();
        sender
            .send(frame(TransportEvent::Message("welcome".into())))
            .unwrap();
        h.client.poll_events();

        // Registered after StartAll already ran: the service is
        // replayed straight to started, so its timer fire sends a ping.
        let ping = PingService::new(h.client.event_sender());
        h.client.register(ping);
        sender
            .send(ClientEvent::TimerFired {
                service: PingService::NAME,
            })
            .unwrap();
        h.client.poll_events();
        assert!(h
            .sent
            .lock()
            .unwrap()
            .iter()
            .any(|raw| raw.contains("\"method\":\"ping\"")));
    }
}
