//! Logical services and their lifecycle orchestration.
//!
//! A service is an independent consumer of the session — it binds
//! callbacks, sends requests, and owns its own timers — implementing
//! the fixed lifecycle contract of [`HubService`]. The
//! [`ServiceLocator`] keeps one instance per service type and replays
//! lifecycle steps to late registrants so every service reaches the
//! same point regardless of when it joined.

pub mod ping;
pub mod server_init;

use std::any::{Any, TypeId};

use crate::session::HubSession;

/// Lifecycle contract implemented by every logical service.
///
/// All methods receive the session so services can bind, unbind, and
/// send; default implementations are no-ops so services override only
/// the steps they care about.
pub trait HubService: Send + 'static {
    /// Stable name used for logging and timer routing.
    fn name(&self) -> &'static str;

    /// Downcast support for typed retrieval from the locator.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// One-time setup: bind handles, subscribe to session events.
    fn init(&mut self, _session: &mut HubSession) {}

    /// The session reached Established.
    fn start(&mut self, _session: &mut HubSession) {}

    /// The session reached Authorized.
    fn start_authorized(&mut self, _session: &mut HubSession) {}

    /// The session reconnected after a drop; re-run authorization
    /// flows. Distinct from [`Self::start_authorized`], which fires
    /// only on the fresh handshake path.
    fn reauthorize(&mut self, _session: &mut HubSession) {}

    /// The session closed; release bindings and stop timers.
    fn stop(&mut self, _session: &mut HubSession) {}

    /// A timer owned by this service fired on the driver's event loop.
    fn on_timer(&mut self, _session: &mut HubSession) {}
}

/// Which lifecycle steps the locator has performed at least once since
/// the last reset. Process-wide, not per-service — used to replay
/// steps to late registrants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifecycleMask {
    /// `init_all` has run.
    pub inited: bool,
    /// `start_all` has run and no `stop_all` since.
    pub started: bool,
    /// `start_authorized_all` has run and no `stop_all` since.
    pub started_auth: bool,
    /// `stop_all` has run and no `start_all` since.
    pub stopped: bool,
}

/// Registry of services keyed by type, iterated in registration order.
#[derive(Default)]
pub struct ServiceLocator {
    services: Vec<(TypeId, Box<dyn HubService>)>,
    performed: LifecycleMask,
}

impl std::fmt::Debug for ServiceLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.services.iter().map(|(_, s)| s.name()).collect();
        f.debug_struct("ServiceLocator")
            .field("services", &names)
            .field("performed", &self.performed)
            .finish()
    }
}

impl ServiceLocator {
    /// Create an empty locator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `service`, replaying already-performed lifecycle steps
    /// so it catches up with its peers. Registering a type that is
    /// already present is a no-op returning the existing instance.
    pub fn register<S: HubService>(&mut self, service: S, session: &mut HubSession) -> &mut S {
        let type_id = TypeId::of::<S>();

        if let Some(position) = self.services.iter().position(|(id, _)| *id == type_id) {
            return self.services[position]
                .1
                .as_any_mut()
                .downcast_mut::<S>()
                .expect("service instance matches its TypeId");
        }

        self.services.push((type_id, Box::new(service)));
        let performed = self.performed;
        let index = self.services.len() - 1;
        let entry = &mut self.services[index].1;
        log::info!("Service {} registered", entry.name());

        if performed.inited {
            entry.init(session);
        }
        if performed.stopped {
            // Stop dominates: a late registrant joining a stopped
            // orchestrator must not be started.
            entry.stop(session);
        } else {
            if performed.started {
                entry.start(session);
            }
            if performed.started_auth {
                entry.start_authorized(session);
            }
        }

        entry
            .as_any_mut()
            .downcast_mut::<S>()
            .expect("service instance matches its TypeId")
    }

    /// Stop and remove the service of type `S`, if registered.
    pub fn unregister<S: HubService>(&mut self, session: &mut HubSession) {
        let type_id = TypeId::of::<S>();
        if let Some(position) = self.services.iter().position(|(id, _)| *id == type_id) {
            let (_, mut service) = self.services.remove(position);
            service.stop(session);
            log::info!("Service {} unregistered", service.name());
        } else {
            log::warn!("Service not registered, nothing to unregister");
        }
    }

    /// Typed access to a registered service.
    pub fn get_mut<S: HubService>(&mut self) -> Option<&mut S> {
        let type_id = TypeId::of::<S>();
        self.services
            .iter_mut()
            .find(|(id, _)| *id == type_id)
            .and_then(|(_, service)| service.as_any_mut().downcast_mut::<S>())
    }

    /// Route a fired timer to the service that owns it.
    pub fn dispatch_timer(&mut self, name: &str, session: &mut HubSession) {
        if let Some((_, service)) = self.services.iter_mut().find(|(_, s)| s.name() == name) {
            service.on_timer(session);
        } else {
            log::warn!("Timer fired for unknown service: {name}");
        }
    }

    /// Call `init` on every service, in registration order.
    pub fn init_all(&mut self, session: &mut HubSession) {
        for (_, service) in &mut self.services {
            service.init(session);
        }
        self.performed.inited = true;
    }

    /// Call `start` on every service, in registration order.
    pub fn start_all(&mut self, session: &mut HubSession) {
        for (_, service) in &mut self.services {
            service.start(session);
        }
        self.performed.stopped = false;
        self.performed.started = true;
    }

    /// Call `start_authorized` on every service, in registration order.
    pub fn start_authorized_all(&mut self, session: &mut HubSession) {
        for (_, service) in &mut self.services {
            service.start_authorized(session);
        }
        self.performed.started_auth = true;
    }

    /// Call `reauthorize` on every service, in registration order.
    /// Leaves the lifecycle mask untouched.
    pub fn reauthorize_all(&mut self, session: &mut HubSession) {
        for (_, service) in &mut self.services {
            service.reauthorize(session);
        }
    }

    /// Call `stop` on every service, in registration order.
    pub fn stop_all(&mut self, session: &mut HubSession) {
        for (_, service) in &mut self.services {
            service.stop(session);
        }
        self.performed.started = false;
        self.performed.started_auth = false;
        self.performed.stopped = true;
    }

    /// The lifecycle steps performed so far.
    #[must_use]
    pub fn lifecycle_mask(&self) -> LifecycleMask {
        self.performed
    }

    /// Number of registered services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Whether no services are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
