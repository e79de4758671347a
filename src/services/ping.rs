//! Ping keep-alive service.
//!
//! The hub closes connections that stay silent, so this service sends
//! a ping on a repeating timer and measures round-trip latency from
//! the nonce echoed back. Any outbound traffic already keeps the
//! connection warm, so the timer resets whenever the session reports a
//! sent message.

use std::any::Any;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::action::{ActionKey, ControllerCategory};
use crate::client::ClientEvent;
use crate::services::HubService;
use crate::session::HubSession;

/// Below the hub's idle-close window (30 s observed in practice).
const PING_INTERVAL: Duration = Duration::from_secs(28);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PingRequest {
    nonce: i64,
}

/// Ping reply echoing the request nonce.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingResponse {
    /// Nonce from the matching request (client send time in ms).
    pub nonce: i64,
    /// Hub receive time in ms.
    pub time_stamp: i64,
}

/// Latency measurements from ping replies, in milliseconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct PingStats {
    /// Round-trip time of the most recent reply.
    pub last_latency_ms: i64,
    /// Highest round-trip time seen this session.
    pub highest_latency_ms: i64,
}

type LatencyObservers = Arc<Mutex<Vec<Box<dyn FnMut(i64) + Send>>>>;

/// Keep-alive service. Register it on the client before connecting.
pub struct PingService {
    events: mpsc::UnboundedSender<ClientEvent>,
    action: ActionKey,
    stats: Arc<Mutex<PingStats>>,
    observers: LatencyObservers,
    activity: Arc<Notify>,
    timer: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for PingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PingService")
            .field("timer_running", &self.timer.is_some())
            .finish_non_exhaustive()
    }
}

impl PingService {
    /// Name used for timer routing.
    pub const NAME: &'static str = "ping";

    /// Create the service; `events` is the client's event sender.
    #[must_use]
    pub fn new(events: mpsc::UnboundedSender<ClientEvent>) -> Self {
        Self {
            events,
            action: ActionKey::new(ControllerCategory::Auth, "ping").require_auth(false),
            stats: Arc::new(Mutex::new(PingStats::default())),
            observers: Arc::new(Mutex::new(Vec::new())),
            activity: Arc::new(Notify::new()),
            timer: None,
        }
    }

    /// Latest latency measurements.
    #[must_use]
    pub fn stats(&self) -> PingStats {
        *self.stats.lock().expect("ping stats lock poisoned")
    }

    /// Observe every measured round-trip latency (milliseconds).
    pub fn subscribe_latency<F>(&self, callback: F)
    where
        F: FnMut(i64) + Send + 'static,
    {
        self.observers
            .lock()
            .expect("ping observers lock poisoned")
            .push(Box::new(callback));
    }

    fn start_timer(&mut self) {
        if self.timer.is_some() {
            return;
        }

        let events = self.events.clone();
        let activity = Arc::clone(&self.activity);
        self.timer = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = tokio::time::sleep(PING_INTERVAL) => {
                        if events
                            .send(ClientEvent::TimerFired { service: PingService::NAME })
                            .is_err()
                        {
                            break;
                        }
                    }
                    // Any outbound traffic keeps the connection warm;
                    // restart the interval instead of pinging early.
                    () = activity.notified() => {}
                }
            }
        }));
        log::debug!("Ping timer started with interval {PING_INTERVAL:?}");
    }

    fn stop_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
            log::debug!("Ping timer stopped");
        }
    }
}

impl HubService for PingService {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn init(&mut self, session: &mut HubSession) {
        let activity = Arc::clone(&self.activity);
        session.subscribe_message_sent(move || activity.notify_one());
    }

    fn start(&mut self, session: &mut HubSession) {
        let stats = Arc::clone(&self.stats);
        let observers = Arc::clone(&self.observers);
        session.bind(&self.action, move |reply: PingResponse| {
            let latency = now_ms() - reply.nonce;
            {
                let mut stats = stats.lock().expect("ping stats lock poisoned");
                stats.last_latency_ms = latency;
                if latency > stats.highest_latency_ms {
                    stats.highest_latency_ms = latency;
                    log::warn!("Got new highest ping time: {latency} ms");
                }
            }
            for callback in observers
                .lock()
                .expect("ping observers lock poisoned")
                .iter_mut()
            {
                callback(latency);
            }
        });
        session.bind_error(&self.action, |error| {
            log::error!("Ping error {:?}: {}", error.code, error.code.error_text());
        });

        self.start_timer();
    }

    fn stop(&mut self, session: &mut HubSession) {
        session.unbind(&self.action);
        self.stop_timer();
    }

    fn on_timer(&mut self, session: &mut HubSession) {
        if let Err(e) = session.send(&self.action, &PingRequest { nonce: now_ms() }) {
            log::error!("Failed to send ping: {e}");
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
