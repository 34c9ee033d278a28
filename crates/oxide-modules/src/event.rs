//! Typed module lifecycle events.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::trace;

/// Where an event originates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Module initialization at boot.
    Boot,
    /// Module routing for one request.
    Request,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Boot => "boot",
            Self::Request => "request",
        })
    }
}

/// A module lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleEvent {
    /// The module was released to run its step.
    Pre { scope: Scope, module: String },
    /// The module finished its step.
    Post { scope: Scope, module: String },
    /// Emitted by a module itself.
    Custom { module: String, key: String },
}

impl ModuleEvent {
    /// Returns the module the event is about.
    pub fn module(&self) -> &str {
        match self {
            Self::Pre { module, .. } | Self::Post { module, .. } | Self::Custom { module, .. } => {
                module
            }
        }
    }
}

/// Receives module events.
pub trait EventListener: Send + Sync {
    /// Called synchronously for every event.
    fn on_event(&self, event: &ModuleEvent);
}

impl<F> EventListener for F
where
    F: Fn(&ModuleEvent) + Send + Sync,
{
    fn on_event(&self, event: &ModuleEvent) {
        self(event);
    }
}

/// Fans events out to the registered listeners.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<Vec<Arc<dyn EventListener>>>,
}

impl EventBus {
    /// Creates a bus with the given listeners.
    pub fn new(listeners: Vec<Arc<dyn EventListener>>) -> Self {
        Self {
            listeners: Arc::new(listeners),
        }
    }

    /// Delivers an event to every listener.
    pub fn emit(&self, event: &ModuleEvent) {
        trace!(?event, "module event");
        for listener in self.listeners.iter() {
            listener.on_event(event);
        }
    }

    /// Returns the number of listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Returns whether there are no listeners.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// A listener that keeps every event, in order.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<ModuleEvent>>,
}

impl EventLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the recorded events.
    pub fn events(&self) -> Vec<ModuleEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the position of the first matching event.
    pub fn position(&self, wanted: &ModuleEvent) -> Option<usize> {
        self.events().iter().position(|e| e == wanted)
    }
}

impl EventListener for EventLog {
    fn on_event(&self, event: &ModuleEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}
