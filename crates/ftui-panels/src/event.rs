#![forbid(unsafe_code)]

//! Lifecycle events and the observer list that delivers them.
//!
//! Runtime operations queue [`PanelEvent`]s while they mutate state and the
//! orchestrator flushes the queue once the operation has finished, so
//! observers always see a consistent runtime and receive events in the order
//! they were produced.
//!
//! Observers are held weakly: [`EventBus::subscribe`] returns a
//! [`Subscription`] guard and dropping the guard unsubscribes. Dead entries
//! are pruned on the next flush.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use crate::config::OpenStrategy;
use crate::layer::LayerKind;
use crate::lifecycle::InstanceId;
use crate::navigation::NavigationContext;
use crate::scheduler::RequestId;

/// Something observable happened to a panel.
#[derive(Debug, Clone, PartialEq)]
pub enum PanelEvent {
    /// A new instance became visible.
    UiOpened {
        ui_name: String,
        instance_id: InstanceId,
        layer: LayerKind,
        /// Host hint from the panel config.
        play_sound: bool,
        /// Show tag actually passed to the panel.
        animation: Option<String>,
    },
    /// An instance was closed (destroyed).
    UiClosed {
        ui_name: String,
        instance_id: InstanceId,
    },
    LoadStart {
        ui_name: String,
        request_id: RequestId,
    },
    LoadComplete {
        ui_name: String,
        request_id: RequestId,
        success: bool,
    },
    /// A hidden instance was shown again.
    InstanceShown {
        ui_name: String,
        instance_id: InstanceId,
    },
    InstanceHidden {
        ui_name: String,
        instance_id: InstanceId,
    },
    InstanceDestroyed {
        ui_name: String,
        instance_id: InstanceId,
        pooled: bool,
    },
    /// A back step closed an instance.
    NavigatedBack {
        ui_name: String,
        instance_id: InstanceId,
        context: NavigationContext,
    },
    /// Opening a panel evicted or hid other instances of it.
    StrategyConflict {
        ui_name: String,
        strategy: OpenStrategy,
        affected: Vec<InstanceId>,
    },
}

/// Discriminant of a [`PanelEvent`], used to filter subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    UiOpened,
    UiClosed,
    LoadStart,
    LoadComplete,
    InstanceShown,
    InstanceHidden,
    InstanceDestroyed,
    NavigatedBack,
    StrategyConflict,
}

impl PanelEvent {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::UiOpened { .. } => EventKind::UiOpened,
            Self::UiClosed { .. } => EventKind::UiClosed,
            Self::LoadStart { .. } => EventKind::LoadStart,
            Self::LoadComplete { .. } => EventKind::LoadComplete,
            Self::InstanceShown { .. } => EventKind::InstanceShown,
            Self::InstanceHidden { .. } => EventKind::InstanceHidden,
            Self::InstanceDestroyed { .. } => EventKind::InstanceDestroyed,
            Self::NavigatedBack { .. } => EventKind::NavigatedBack,
            Self::StrategyConflict { .. } => EventKind::StrategyConflict,
        }
    }

    /// Panel the event concerns.
    #[must_use]
    pub fn ui_name(&self) -> &str {
        match self {
            Self::UiOpened { ui_name, .. }
            | Self::UiClosed { ui_name, .. }
            | Self::LoadStart { ui_name, .. }
            | Self::LoadComplete { ui_name, .. }
            | Self::InstanceShown { ui_name, .. }
            | Self::InstanceHidden { ui_name, .. }
            | Self::InstanceDestroyed { ui_name, .. }
            | Self::NavigatedBack { ui_name, .. }
            | Self::StrategyConflict { ui_name, .. } => ui_name,
        }
    }
}

type ObserverRc = Rc<dyn Fn(&PanelEvent)>;
type ObserverWeak = Weak<dyn Fn(&PanelEvent)>;

struct Observer {
    /// `None` observes every kind.
    kind: Option<EventKind>,
    callback: ObserverWeak,
}

/// RAII guard for an event observer. Dropping it unsubscribes.
pub struct Subscription {
    _guard: ObserverRc,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// Queued, kind-filtered event delivery.
#[derive(Default)]
pub struct EventBus {
    observers: RefCell<Vec<Observer>>,
    queue: VecDeque<PanelEvent>,
    delivered: u64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("observers", &self.observers.borrow().len())
            .field("queued", &self.queue.len())
            .field("delivered", &self.delivered)
            .finish()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe one kind of event.
    pub fn subscribe(&self, kind: EventKind, callback: impl Fn(&PanelEvent) + 'static) -> Subscription {
        self.register(Some(kind), Rc::new(callback))
    }

    /// Observe every event.
    pub fn subscribe_all(&self, callback: impl Fn(&PanelEvent) + 'static) -> Subscription {
        self.register(None, Rc::new(callback))
    }

    fn register(&self, kind: Option<EventKind>, strong: ObserverRc) -> Subscription {
        self.observers.borrow_mut().push(Observer {
            kind,
            callback: Rc::downgrade(&strong),
        });
        Subscription { _guard: strong }
    }

    /// Queue an event for the next flush.
    pub fn emit(&mut self, event: PanelEvent) {
        tracing::trace!(kind = ?event.kind(), ui_name = event.ui_name(), "event queued");
        self.queue.push_back(event);
    }

    /// Deliver every queued event, in order. Returns the number delivered.
    ///
    /// Observers subscribed during a flush start receiving from the next
    /// event onward.
    pub fn flush(&mut self) -> usize {
        let mut count = 0;
        while let Some(event) = self.queue.pop_front() {
            let callbacks: Vec<ObserverRc> = {
                let mut observers = self.observers.borrow_mut();
                observers.retain(|o| o.callback.strong_count() > 0);
                observers
                    .iter()
                    .filter(|o| o.kind.is_none_or(|k| k == event.kind()))
                    .filter_map(|o| o.callback.upgrade())
                    .collect()
            };
            for cb in &callbacks {
                cb(&event);
            }
            count += 1;
        }
        self.delivered += count as u64;
        count
    }

    /// Events waiting for the next flush.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Registered observers, including dead ones not yet pruned.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.observers.borrow().len()
    }

    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered
    }
}
