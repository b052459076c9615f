#![forbid(unsafe_code)]

//! FrankenTUI Panels
//!
//! Orchestration engine for named UI panels: prioritized, concurrency-bounded
//! loading, per-panel open strategies with instance pooling, and one back
//! history shared by every strategy.
//!
//! # Key Components
//!
//! - [`Orchestrator`] - Public facade; open, close, show, hide, go back, tick
//! - [`LoadScheduler`] - Priority-ordered load queue with timeout and cancellation
//! - [`InstanceLifecycle`] - Instance registry, open-strategy resolution, pooling
//! - [`NavigationStack`] - Mixed-strategy back history
//! - [`LayerRegistry`] - Ordered rendering layers and panel assignment
//! - [`PanelAssetSource`] / [`Panel`] - Host-provided loader and panel handles
//!
//! # Role in FrankenTUI
//! `ftui-panels` sits between application code and whatever produces panel
//! content. It never renders or fetches anything itself: the host supplies a
//! [`PanelAssetSource`] and drives the runtime with [`Orchestrator::tick`].
//!
//! # Threading
//! The runtime is single-threaded and tick-driven. Asset sources may finish
//! loads from other threads through a [`LoadTicket`]; completions are applied
//! on the next tick.

pub mod cancellation;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod layer;
pub mod lifecycle;
pub mod navigation;
pub mod orchestrator;
pub mod panel;
pub mod scheduler;

pub use cancellation::{CancellationSource, CancellationToken};
pub use clock::{SessionClock, Stamp};
pub use config::{
    LifecycleSettings, LoadMode, NavigationSettings, OpenOptions, OpenStrategy, PanelConfig,
    PoolSettings, RuntimeConfig, SchedulerSettings, StrategyPriorities,
};
pub use error::{ConfigError, ErrorKind, PanelError, Result};
pub use event::{EventBus, EventKind, PanelEvent, Subscription};
pub use layer::{Layer, LayerKind, LayerRegistry};
pub use lifecycle::{
    ConflictResolution, DestroyedInstance, Instance, InstanceId, InstanceLifecycle,
    InstanceState, InstanceStatus, LifecycleStats,
};
pub use navigation::{NavigationContext, NavigationEntry, NavigationStack, NavigationStats};
pub use orchestrator::{CloseTarget, OpenTicket, Orchestrator, RuntimeStatus};
pub use panel::{Panel, PanelAssetSource, PanelCaps, PanelHandle, Payload, LoadTicket};
pub use scheduler::{
    LoadCallbacks, LoadOutcome, LoadRequest, LoadScheduler, LoadState, QueueStatus, Rejected,
    RequestId, SchedulerStats,
};
