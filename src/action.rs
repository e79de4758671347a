//! Action keys — identity of a logical request/response channel.
//!
//! Every message routed through the session is addressed by an
//! [`ActionKey`]: a controller category plus a method name. The hub
//! dispatches on `(controller, method)` only, so two keys with the same
//! category and method are the same channel regardless of whether they
//! require authorization — `requires_auth` is a send-time property of
//! the key, not part of its identity.

use std::hash::{Hash, Hasher};

/// Controller categories recognized by the hub.
///
/// Sent on the wire as the integer value — the hub expects an int,
/// never the enum name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerCategory {
    /// Authentication and session-level methods (ping, init).
    Auth,
    /// Event notifications pushed by the hub.
    Event,
    /// Game-server registration and control methods.
    Server,
}

impl ControllerCategory {
    /// Integer value used on the wire.
    #[must_use]
    pub fn as_wire(self) -> i32 {
        match self {
            Self::Auth => 0,
            Self::Event => 1,
            Self::Server => 2,
        }
    }

    /// Map a wire integer back to a category, `None` for unknown values.
    #[must_use]
    pub fn from_wire(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Auth),
            1 => Some(Self::Event),
            2 => Some(Self::Server),
            _ => None,
        }
    }
}

/// Identity of a logical message channel.
///
/// Equality and hashing use `(category, method)` only. The
/// `requires_auth` flag is fixed when the key is built and decides
/// which send queue holds messages that cannot be transmitted yet.
#[derive(Debug, Clone)]
pub struct ActionKey {
    category: ControllerCategory,
    method: String,
    requires_auth: bool,
}

impl ActionKey {
    /// Build a key for `method` under `category`.
    ///
    /// Authorization is required by default; use [`Self::require_auth`]
    /// for channels that may be used before the session is authorized.
    pub fn new(category: ControllerCategory, method: impl Into<String>) -> Self {
        Self {
            category,
            method: method.into(),
            requires_auth: true,
        }
    }

    /// Set whether sending on this key requires an authorized session.
    #[must_use]
    pub fn require_auth(mut self, required: bool) -> Self {
        self.requires_auth = required;
        self
    }

    /// Controller category of this key.
    #[must_use]
    pub fn category(&self) -> ControllerCategory {
        self.category
    }

    /// Method name of this key.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Whether sending on this key requires an authorized session.
    #[must_use]
    pub fn requires_auth(&self) -> bool {
        self.requires_auth
    }
}

// Identity is (category, method); requires_auth is a property of the
// bound key, not part of it.
impl PartialEq for ActionKey {
    fn eq(&self, other: &Self) -> bool {
        self.category == other.category && self.method == other.method
    }
}

impl Eq for ActionKey {}

impl Hash for ActionKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.category.hash(state);
        self.method.hash(state);
    }
}
