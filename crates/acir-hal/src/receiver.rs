//! [`ReceiveDispatcher`] – fan-out of captured IR signals to listeners.
//!
//! The IR receive path (outside this workspace) turns every completed
//! capture into an immutable [`SignalReceived`] event and hands it to the
//! dispatcher.  Listeners are registered once at startup and are invoked in
//! registration order; the first one that reports
//! [`Disposition::Consumed`] stops propagation.
//!
//! A listener error is logged and does not prevent later listeners from
//! seeing the event.

use std::cell::RefCell;
use std::rc::Rc;

use acir_types::{SignalReceived, StoreError};
use tracing::{debug, warn};

/// What a listener did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The event was handled; later listeners do not see it.
    Consumed,
    /// The event is not for this listener.
    Pass,
}

/// Observer of captured IR signals.
pub trait SignalListener {
    /// React to a captured signal.
    ///
    /// # Errors
    ///
    /// Any [`StoreError`] raised while acting on the signal (for instance a
    /// commit failure while persisting a learned scene).
    fn on_signal(&mut self, event: &SignalReceived) -> Result<Disposition, StoreError>;
}

/// Shared listeners: the dispatcher keeps one handle, the application keeps
/// another to drive the listener (e.g. start a learning session).
impl<T: SignalListener> SignalListener for Rc<RefCell<T>> {
    fn on_signal(&mut self, event: &SignalReceived) -> Result<Disposition, StoreError> {
        let mut inner = self.try_borrow_mut().map_err(|_| StoreError::Busy)?;
        inner.on_signal(event)
    }
}

/// Result of dispatching one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Name of the listener that consumed the event, if any.
    pub consumed_by: Option<String>,
    /// Number of listeners that returned an error.
    pub errors: usize,
}

/// Registry of [`SignalListener`]s.
#[derive(Default)]
pub struct ReceiveDispatcher {
    listeners: Vec<(String, Box<dyn SignalListener>)>,
}

impl ReceiveDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener under `name`.  Listeners run in registration
    /// order.
    pub fn register(&mut self, name: impl Into<String>, listener: Box<dyn SignalListener>) {
        self.listeners.push((name.into(), listener));
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Hand `event` to each listener until one consumes it.
    pub fn dispatch(&mut self, event: &SignalReceived) -> DispatchReport {
        let mut report = DispatchReport::default();
        for (name, listener) in self.listeners.iter_mut() {
            match listener.on_signal(event) {
                Ok(Disposition::Consumed) => {
                    debug!(listener = %name, event = %event.id, "signal consumed");
                    report.consumed_by = Some(name.clone());
                    break;
                }
                Ok(Disposition::Pass) => {}
                Err(e) => {
                    warn!(listener = %name, event = %event.id, error = %e, "signal listener failed");
                    report.errors += 1;
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ------------------------------------------------------------------
    // Test doubles
    // ------------------------------------------------------------------

    struct Recorder {
        seen: Vec<String>,
        consume: bool,
    }

    impl Recorder {
        fn new(consume: bool) -> Self {
            Self {
                seen: Vec::new(),
                consume,
            }
        }
    }

    impl SignalListener for Recorder {
        fn on_signal(&mut self, event: &SignalReceived) -> Result<Disposition, StoreError> {
            self.seen.push(event.raw.clone());
            Ok(if self.consume {
                Disposition::Consumed
            } else {
                Disposition::Pass
            })
        }
    }

    struct Failing;

    impl SignalListener for Failing {
        fn on_signal(&mut self, _event: &SignalReceived) -> Result<Disposition, StoreError> {
            Err(StoreError::Commit("flash busy".to_string()))
        }
    }

    // ------------------------------------------------------------------
    // Tests
    // ------------------------------------------------------------------

    #[test]
    fn first_consumer_stops_propagation() {
        let first = Rc::new(RefCell::new(Recorder::new(true)));
        let second = Rc::new(RefCell::new(Recorder::new(false)));

        let mut dispatcher = ReceiveDispatcher::new();
        dispatcher.register("first", Box::new(first.clone()));
        dispatcher.register("second", Box::new(second.clone()));

        let report = dispatcher.dispatch(&SignalReceived::new("1,2,3", None));
        assert_eq!(report.consumed_by.as_deref(), Some("first"));
        assert_eq!(first.borrow().seen, vec!["1,2,3".to_string()]);
        assert!(second.borrow().seen.is_empty());
    }

    #[test]
    fn passing_listeners_all_see_the_event() {
        let a = Rc::new(RefCell::new(Recorder::new(false)));
        let b = Rc::new(RefCell::new(Recorder::new(false)));

        let mut dispatcher = ReceiveDispatcher::new();
        dispatcher.register("a", Box::new(a.clone()));
        dispatcher.register("b", Box::new(b.clone()));

        let report = dispatcher.dispatch(&SignalReceived::new("5,6", None));
        assert_eq!(report, DispatchReport::default());
        assert_eq!(a.borrow().seen.len(), 1);
        assert_eq!(b.borrow().seen.len(), 1);
    }

    #[test]
    fn listener_error_is_counted_and_propagation_continues() {
        let tail = Rc::new(RefCell::new(Recorder::new(true)));

        let mut dispatcher = ReceiveDispatcher::new();
        dispatcher.register("failing", Box::new(Failing));
        dispatcher.register("tail", Box::new(tail.clone()));
        assert_eq!(dispatcher.len(), 2);

        let report = dispatcher.dispatch(&SignalReceived::new("7", None));
        assert_eq!(report.errors, 1);
        assert_eq!(report.consumed_by.as_deref(), Some("tail"));
    }

    #[test]
    fn busy_shared_listener_reports_busy() {
        let shared = Rc::new(RefCell::new(Recorder::new(true)));
        let mut handle = shared.clone();

        let _guard = shared.borrow_mut();
        let result = handle.on_signal(&SignalReceived::new("8", None));
        assert_eq!(result, Err(StoreError::Busy));
    }
}
