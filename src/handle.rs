//! Callback slots and the handler registry.
//!
//! Each bound [`ActionKey`](crate::action::ActionKey) owns one callback
//! slot: an optional typed message callback plus an optional error
//! callback. The slot owns decode-on-receive — the registry hands it
//! the raw body string and the slot deserializes into the type the
//! callback was bound with. Slots are stored type-erased and recovered
//! by downcast when rebinding.

use std::any::Any;
use std::collections::HashMap;

use serde::de::DeserializeOwned;

use crate::action::ActionKey;
use crate::protocol::ErrorPayload;

/// Type-erased callback slot stored in the registry.
pub(crate) trait ErasedHandle: Send {
    /// Decode `raw` and dispatch to the message callback.
    ///
    /// An empty body dispatches the zero value of the bound type.
    /// Returns `false` only when decoding failed; an unbound callback
    /// is a silent no-op.
    fn handle_message(&mut self, raw: &str) -> bool;

    /// Dispatch a hub-reported error to the error callback, if any.
    /// Error delivery cannot fail the pipeline.
    fn handle_error(&mut self, error: &ErrorPayload);

    /// Replace the error callback.
    fn set_error_callback(&mut self, callback: Box<dyn FnMut(ErrorPayload) + Send>);

    /// Remove both callbacks. Idempotent.
    fn clear(&mut self);

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Typed slot: decodes bodies into `T` before dispatch.
struct CallbackHandle<T> {
    on_message: Option<Box<dyn FnMut(T) + Send>>,
    on_error: Option<Box<dyn FnMut(ErrorPayload) + Send>>,
}

impl<T> CallbackHandle<T> {
    fn new() -> Self {
        Self {
            on_message: None,
            on_error: None,
        }
    }
}

impl<T> ErasedHandle for CallbackHandle<T>
where
    T: DeserializeOwned + Default + Send + 'static,
{
    fn handle_message(&mut self, raw: &str) -> bool {
        // Empty-body responses are valid and must still notify the
        // subscriber with a zero-value instance.
        if raw.is_empty() {
            if let Some(callback) = &mut self.on_message {
                callback(T::default());
            }
            return true;
        }

        match serde_json::from_str::<T>(raw) {
            Ok(value) => {
                if let Some(callback) = &mut self.on_message {
                    callback(value);
                }
                true
            }
            Err(_) => false,
        }
    }

    fn handle_error(&mut self, error: &ErrorPayload) {
        if let Some(callback) = &mut self.on_error {
            callback(error.clone());
        }
    }

    fn set_error_callback(&mut self, callback: Box<dyn FnMut(ErrorPayload) + Send>) {
        self.on_error = Some(callback);
    }

    fn clear(&mut self) {
        self.on_message = None;
        self.on_error = None;
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Mapping of action keys to their callback slots.
///
/// At most one entry exists per `(category, method)` pair. Unbinding
/// clears the callbacks but keeps the entry for reuse.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<ActionKey, Box<dyn ErasedHandle>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("bound_keys", &self.handlers.len())
            .finish()
    }
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind (or rebind) the message callback for `key`.
    ///
    /// The first bind creates the slot; later binds replace the
    /// callback in place. Rebinding with a different message type
    /// replaces the whole slot, dropping any error callback with it.
    pub fn bind<T, F>(&mut self, key: &ActionKey, callback: F)
    where
        T: DeserializeOwned + Default + Send + 'static,
        F: FnMut(T) + Send + 'static,
    {
        let slot = self
            .handlers
            .entry(key.clone())
            .or_insert_with(|| Box::new(CallbackHandle::<T>::new()));

        if slot.as_any_mut().downcast_mut::<CallbackHandle<T>>().is_none() {
            log::warn!(
                "Handler for \"{}\" rebound with a different message type",
                key.method()
            );
            *slot = Box::new(CallbackHandle::<T>::new());
        }

        if let Some(handle) = slot.as_any_mut().downcast_mut::<CallbackHandle<T>>() {
            handle.on_message = Some(Box::new(callback));
        }
    }

    /// Bind the error callback for `key`.
    ///
    /// Allowed only after a message callback slot exists for the key;
    /// calling it earlier is a programmer error. Returns whether the
    /// callback was bound.
    pub fn bind_error<F>(&mut self, key: &ActionKey, callback: F) -> bool
    where
        F: FnMut(ErrorPayload) + Send + 'static,
    {
        let Some(slot) = self.handlers.get_mut(key) else {
            debug_assert!(
                false,
                "bind_error is allowed only after bind for the same key: {}",
                key.method()
            );
            log::error!(
                "Error handle for \"{}\" can only be bound after the message handle",
                key.method()
            );
            return false;
        };

        slot.set_error_callback(Box::new(callback));
        true
    }

    /// Clear both callbacks for `key`, keeping the slot for reuse.
    pub fn unbind(&mut self, key: &ActionKey) {
        if let Some(slot) = self.handlers.get_mut(key) {
            slot.clear();
        }
    }

    /// Whether a slot exists for `key`.
    #[must_use]
    pub fn contains(&self, key: &ActionKey) -> bool {
        self.handlers.contains_key(key)
    }

    /// Decode `raw` and dispatch to the message callback bound for
    /// `key`. `None` when no slot exists, otherwise whether the body
    /// decoded.
    pub(crate) fn dispatch_message(&mut self, key: &ActionKey, raw: &str) -> Option<bool> {
        self.handlers.get_mut(key).map(|slot| slot.handle_message(raw))
    }

    /// Dispatch a hub-reported error to the callback bound for `key`.
    /// Returns whether a slot existed.
    pub(crate) fn dispatch_error(&mut self, key: &ActionKey, payload: &ErrorPayload) -> bool {
        match self.handlers.get_mut(key) {
            Some(slot) => {
                slot.handle_error(payload);
                true
            }
            None => false,
        }
    }
}
