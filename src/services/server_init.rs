//! Server registration and authorization service.
//!
//! A dedicated game server announces itself to the hub with an init
//! request carrying its credentials. The hub answers with the match id
//! assigned to the server, which doubles as the authorization signal:
//! every successful init response moves the session to Authorized.
//! Initialization is the *first* authorization; reconnects re-run the
//! same request through [`HubService::reauthorize`] without re-firing
//! the one-shot initialized callbacks.

use std::any::Any;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::action::{ActionKey, ControllerCategory};
use crate::client::ClientEvent;
use crate::services::HubService;
use crate::session::HubSession;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerInitRequest {
    name: String,
    password: String,
    version: String,
    region_id: String,
}

/// Hub reply to an init request.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInitResponse {
    /// Match id assigned to this server.
    pub match_id: String,
}

/// Credentials a server presents to the hub.
#[derive(Debug, Clone)]
pub struct ServerCredentials {
    /// Server account name.
    pub name: String,
    /// Server account password.
    pub password: String,
    /// Region the server is deployed in, may be empty.
    pub region_id: String,
}

#[derive(Default)]
struct SharedState {
    match_id: String,
    initialized: bool,
    authorized: bool,
    on_initialized: Vec<Box<dyn FnOnce() + Send>>,
    on_authorized: Vec<Box<dyn FnMut() + Send>>,
}

/// Registration/authorization service for dedicated game servers.
pub struct ServerInitService {
    events: mpsc::UnboundedSender<ClientEvent>,
    action: ActionKey,
    credentials: Option<ServerCredentials>,
    version: String,
    shared: Arc<Mutex<SharedState>>,
}

impl std::fmt::Debug for ServerInitService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerInitService")
            .field("credentials_set", &self.credentials.is_some())
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl ServerInitService {
    /// Name used for logging.
    pub const NAME: &'static str = "server_init";

    /// Create the service; `version` is the build version reported to
    /// the hub.
    #[must_use]
    pub fn new(events: mpsc::UnboundedSender<ClientEvent>, version: impl Into<String>) -> Self {
        Self {
            events,
            action: ActionKey::new(ControllerCategory::Auth, "init").require_auth(false),
            credentials: None,
            version: version.into(),
            shared: Arc::new(Mutex::new(SharedState {
                match_id: "DefaultMatchId".to_string(),
                ..SharedState::default()
            })),
        }
    }

    /// Set the credentials presented to the hub.
    pub fn set_credentials(&mut self, credentials: ServerCredentials) {
        log::info!("New credentials with server name: {}", credentials.name);
        self.credentials = Some(credentials);
    }

    /// Whether credentials have been provided.
    #[must_use]
    pub fn is_credentials_set(&self) -> bool {
        self.credentials.is_some()
    }

    /// Match id assigned by the hub, or the default before the first
    /// successful init.
    #[must_use]
    pub fn match_id(&self) -> String {
        self.lock_shared().match_id.clone()
    }

    /// Whether the first init has succeeded this process.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.lock_shared().initialized
    }

    /// Whether the most recent session is authorized.
    #[must_use]
    pub fn is_authorized(&self) -> bool {
        self.lock_shared().authorized
    }

    /// Run `callback` once the first init succeeds. Fires immediately
    /// if that already happened.
    pub fn subscribe_initialized<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut shared = self.lock_shared();
        if shared.initialized {
            drop(shared);
            callback();
            return;
        }
        shared.on_initialized.push(Box::new(callback));
    }

    /// Run `callback` on every successful init (each reconnect
    /// re-authorizes). Fires immediately if the session is currently
    /// authorized, and stays subscribed.
    pub fn subscribe_authorized<F>(&self, mut callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        let mut shared = self.lock_shared();
        if shared.authorized {
            callback();
        }
        shared.on_authorized.push(Box::new(callback));
    }

    /// Send the init request. Logs an error when credentials are
    /// missing; the send itself may queue until the session is
    /// established.
    pub fn send_init(&self, session: &mut HubSession) {
        let Some(credentials) = &self.credentials else {
            log::error!("No auth data to send init");
            return;
        };

        let request = ServerInitRequest {
            name: credentials.name.clone(),
            password: credentials.password.clone(),
            version: self.version.clone(),
            region_id: credentials.region_id.clone(),
        };
        if let Err(e) = session.send(&self.action, &request) {
            log::error!("Failed to send init request: {e}");
        }
    }

    fn lock_shared(&self) -> std::sync::MutexGuard<'_, SharedState> {
        self.shared.lock().expect("server init state lock poisoned")
    }
}

impl HubService for ServerInitService {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn init(&mut self, session: &mut HubSession) {
        session.register_fake_response(self.action.clone(), r#"{"matchId":"123"}"#);

        let shared = Arc::clone(&self.shared);
        let events = self.events.clone();
        session.bind(&self.action, move |reply: ServerInitResponse| {
            {
                let mut state = shared.lock().expect("server init state lock poisoned");
                if reply.match_id.is_empty() {
                    log::warn!("Init response received with empty match id");
                } else {
                    state.match_id = reply.match_id;
                }

                // Many systems may only initialize once; reconnects
                // re-run authorization but not initialization.
                if !state.initialized {
                    state.initialized = true;
                    for callback in state.on_initialized.drain(..) {
                        callback();
                    }
                }

                state.authorized = true;
                for callback in &mut state.on_authorized {
                    callback();
                }
            }
            let _ = events.send(ClientEvent::Authorized);
        });
        session.bind_error(&self.action, |error| {
            log::error!(
                "Server init error {:?}: {}",
                error.code,
                error.code.error_text()
            );
        });
    }

    fn start(&mut self, session: &mut HubSession) {
        // After the first successful init, reconnects go through
        // reauthorize instead; sending from both would double up.
        if self.is_initialized() {
            return;
        }
        if self.credentials.is_some() {
            self.send_init(session);
        } else {
            log::debug!("Server init credentials not set, waiting for caller");
        }
    }

    fn reauthorize(&mut self, session: &mut HubSession) {
        // Only re-run authorization for servers that completed it once.
        if self.is_initialized() {
            self.send_init(session);
        }
    }

    fn stop(&mut self, _session: &mut HubSession) {
        self.lock_shared().authorized = false;
    }
}
