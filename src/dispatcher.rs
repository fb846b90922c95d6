use crate::protocol::{Message, View};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

/// Callback invoked for each matching message
///
/// Handlers run on the receive task and must return quickly; slow work
/// should be handed off to a channel or a spawned task.
pub type Handler = Arc<dyn Fn(&Message) + Send + Sync>;

/// Which messages a handler receives
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Route {
    /// Messages whose `msg` equals this string
    Msg(String),
    /// Every message, including unknown categories
    Any,
}

impl From<View> for Route {
    fn from(view: View) -> Self {
        Route::Msg(view.as_str().to_string())
    }
}

/// Handle returned by registration, used to remove the handler again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(Uuid);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Routes decoded messages to registered handlers by message type
#[derive(Default)]
pub struct Dispatcher {
    handlers: RwLock<HashMap<Route, Vec<(HandlerId, Handler)>>>,
}

impl Dispatcher {
    /// Create a dispatcher with no handlers
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a route
    pub fn register<F>(&self, route: impl Into<Route>, handler: F) -> HandlerId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let id = HandlerId(Uuid::new_v4());
        let route = route.into();
        tracing::trace!("Registering handler {} for {:?}", id, route);
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(route)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns false if it was not registered.
    pub fn unregister(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = false;
        handlers.retain(|_, list| {
            let before = list.len();
            list.retain(|(handler_id, _)| *handler_id != id);
            removed |= list.len() != before;
            !list.is_empty()
        });
        removed
    }

    /// Number of registered handlers
    pub fn handler_count(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }

    /// Invoke every handler matching the message, returning how many ran
    ///
    /// Handlers are collected before any is called, so a handler may register
    /// or remove handlers without deadlocking.
    pub fn dispatch(&self, message: &Message) -> usize {
        let matching: Vec<Handler> = {
            let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
            let typed = handlers.get(&Route::Msg(message.msg.clone()));
            let any = handlers.get(&Route::Any);
            typed
                .into_iter()
                .chain(any)
                .flatten()
                .map(|(_, handler)| handler.clone())
                .collect()
        };

        if matching.is_empty() {
            tracing::trace!("No handler for {}", message.msg);
        }

        for handler in &matching {
            handler(message);
        }
        matching.len()
    }
}
