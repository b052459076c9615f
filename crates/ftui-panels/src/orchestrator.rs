#![forbid(unsafe_code)]

//! Public facade tying the scheduler, lifecycle, navigation, and layers
//! together.
//!
//! The host owns one [`Orchestrator`] per UI session, hands it a
//! [`PanelAssetSource`], and calls [`Orchestrator::tick`] once per frame.
//!
//! # Example
//!
//! ```ignore
//! let config = RuntimeConfig::default()
//!     .panel(PanelConfig::new("Settings").layer(LayerKind::Popup))
//!     .panel(PanelConfig::new("Dialog").strategy(OpenStrategy::Stack));
//! let mut ui = Orchestrator::new(MyAssets::default(), config);
//!
//! let _sub = ui.subscribe(EventKind::UiOpened, |e| log_event(e));
//!
//! // Sync open resolves inline.
//! let ticket = ui.open_ui("Settings", Payload::none(), OpenOptions::new().load_mode(LoadMode::Sync))?;
//! assert!(ticket.instance().is_some());
//!
//! // Async open resolves on a later tick.
//! ui.open_ui_async("Dialog", Payload::none(), |result| { /* ... */ });
//! loop {
//!     ui.tick(frame_delta);
//! }
//! ```
//!
//! # Ordering
//!
//! Within one call, existing instances are resolved (closed or hidden) before
//! the new one is shown, and an instance is shown and recorded in history
//! before any success callback runs. Events produced by a call are delivered
//! after the call's state changes are complete, at the end of the call.
//!
//! # Back navigation
//!
//! History spans every strategy. A back step closes the active back-eligible
//! entry with the highest `(priority, timestamp)`. Closing the visible
//! instance of a `Stack` panel re-shows the instance it covered, so repeated
//! back steps unwind a stack one level at a time.

use ahash::AHashMap;
use web_time::Duration;

use crate::clock::SessionClock;
use crate::config::{LoadMode, OpenOptions, OpenStrategy, PanelConfig, RuntimeConfig};
use crate::error::{ConfigError, PanelError, Result};
use crate::event::{EventBus, EventKind, PanelEvent, Subscription};
use crate::layer::{LayerKind, LayerRegistry};
use crate::lifecycle::{ConflictResolution, DestroyedInstance, Instance, InstanceId, InstanceLifecycle, InstanceStatus};
use crate::navigation::NavigationStack;
use crate::panel::{PanelAssetSource, PanelCaps, PanelHandle, Payload};
use crate::scheduler::{
    LoadCallbacks, LoadOutcome, LoadRequest, LoadScheduler, QueueStatus, Rejected, RequestId,
    SchedulerStats,
};

/// Result of a successful open call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenTicket {
    /// The instance is shown and recorded.
    Ready(InstanceId),
    /// The load was scheduled; the outcome arrives through callbacks and
    /// events on a later tick.
    Pending(RequestId),
}

impl OpenTicket {
    #[must_use]
    pub fn instance(self) -> Option<InstanceId> {
        match self {
            Self::Ready(id) => Some(id),
            Self::Pending(_) => None,
        }
    }

    #[must_use]
    pub fn request(self) -> Option<RequestId> {
        match self {
            Self::Pending(id) => Some(id),
            Self::Ready(_) => None,
        }
    }
}

/// What [`Orchestrator::close_ui`] should close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseTarget {
    /// Every live instance of a panel.
    Name(String),
    Instance(InstanceId),
}

impl From<&str> for CloseTarget {
    fn from(name: &str) -> Self {
        Self::Name(name.to_owned())
    }
}

impl From<String> for CloseTarget {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<InstanceId> for CloseTarget {
    fn from(id: InstanceId) -> Self {
        Self::Instance(id)
    }
}

/// Runtime snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RuntimeStatus {
    pub queue: QueueStatus,
    pub instances: InstanceStatus,
    pub layer_count: usize,
    pub pool_size: usize,
    pub history_len: usize,
    pub scheduler: SchedulerStats,
}

/// Panel orchestration runtime.
pub struct Orchestrator<S: PanelAssetSource> {
    source: S,
    configs: AHashMap<String, PanelConfig>,
    synthesize_missing: bool,
    restore_stacked: bool,
    clock: SessionClock,
    layers: LayerRegistry,
    scheduler: LoadScheduler,
    lifecycle: InstanceLifecycle,
    navigation: NavigationStack,
    events: EventBus,
}

impl<S: PanelAssetSource> std::fmt::Debug for Orchestrator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("panels", &self.configs.len())
            .field("now", &self.clock.now())
            .field("scheduler", &self.scheduler)
            .field("lifecycle", &self.lifecycle)
            .field("history", &self.navigation.len())
            .finish_non_exhaustive()
    }
}

impl<S: PanelAssetSource> Orchestrator<S> {
    /// Build a runtime. The panel table in `config` is registered by name;
    /// later entries replace earlier ones with the same name.
    pub fn new(source: S, config: RuntimeConfig) -> Self {
        let RuntimeConfig {
            scheduler,
            pool,
            lifecycle,
            navigation,
            synthesize_missing_configs,
            panels,
        } = config;
        let mut runtime = Self {
            source,
            configs: AHashMap::new(),
            synthesize_missing: synthesize_missing_configs,
            restore_stacked: lifecycle.restore_stacked,
            clock: SessionClock::new(),
            layers: LayerRegistry::new(),
            scheduler: LoadScheduler::new(scheduler),
            lifecycle: InstanceLifecycle::new(lifecycle, pool),
            navigation: NavigationStack::new(navigation),
            events: EventBus::new(),
        };
        for panel in panels {
            if let Err(err) = runtime.register(panel) {
                tracing::warn!(error = %err, "skipping panel config");
            }
        }
        runtime
    }

    /// Validate `config` first, then build.
    pub fn try_new(source: S, config: RuntimeConfig) -> std::result::Result<Self, ConfigError> {
        Ok(Self::new(source, config.validated()?))
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    /// Register or replace a panel config.
    pub fn register(&mut self, mut config: PanelConfig) -> Result<()> {
        if config.name.is_empty() {
            return Err(PanelError::InvalidArgument("panel name is empty".into()));
        }
        if config.asset_path.is_empty() {
            config.asset_path.clone_from(&config.name);
        }
        tracing::debug!(
            ui_name = %config.name,
            strategy = config.open_strategy.as_str(),
            layer = config.layer.as_str(),
            "panel registered"
        );
        self.configs.insert(config.name.clone(), config);
        Ok(())
    }

    pub fn unregister(&mut self, ui_name: &str) -> Option<PanelConfig> {
        self.configs.remove(ui_name)
    }

    #[must_use]
    pub fn panel_config(&self, ui_name: &str) -> Option<&PanelConfig> {
        self.configs.get(ui_name)
    }

    fn resolve_config(&self, ui_name: &str) -> Result<PanelConfig> {
        if ui_name.is_empty() {
            return Err(PanelError::InvalidArgument("panel name is empty".into()));
        }
        if let Some(config) = self.configs.get(ui_name) {
            return Ok(config.clone());
        }
        if self.synthesize_missing {
            tracing::debug!(ui_name, "no config registered, using defaults");
            return Ok(PanelConfig::synthesized(ui_name));
        }
        Err(PanelError::ConfigNotFound {
            ui_name: ui_name.to_owned(),
        })
    }

    // ========================================================================
    // Opening
    // ========================================================================

    /// Open a panel.
    ///
    /// The load mode comes from `options.load_mode`, falling back to the
    /// panel's `default_load_mode`. A sync open (or one served from the pool)
    /// returns [`OpenTicket::Ready`]; an async open returns
    /// [`OpenTicket::Pending`] and finishes on a later [`tick`](Self::tick).
    pub fn open_ui(
        &mut self,
        ui_name: &str,
        payload: Payload,
        options: OpenOptions,
    ) -> Result<OpenTicket> {
        self.open_ui_with(ui_name, payload, options, LoadCallbacks::default())
    }

    /// Open asynchronously and report the outcome through `on_complete`.
    pub fn open_ui_async(
        &mut self,
        ui_name: &str,
        payload: Payload,
        on_complete: impl FnOnce(Result<InstanceId>) + 'static,
    ) {
        let options = OpenOptions::new().load_mode(LoadMode::Async);
        // Failures are reported through `on_complete`.
        let _ = self.open_ui_with(
            ui_name,
            payload,
            options,
            LoadCallbacks::on_complete(on_complete),
        );
    }

    /// Open with caller callbacks.
    ///
    /// Every error this returns has also been passed to the failure callback.
    pub fn open_ui_with(
        &mut self,
        ui_name: &str,
        payload: Payload,
        options: OpenOptions,
        callbacks: LoadCallbacks,
    ) -> Result<OpenTicket> {
        let result = self.begin_open(ui_name, payload, options, callbacks);
        self.events.flush();
        result
    }

    fn begin_open(
        &mut self,
        ui_name: &str,
        payload: Payload,
        options: OpenOptions,
        callbacks: LoadCallbacks,
    ) -> Result<OpenTicket> {
        let config = match self.resolve_config(ui_name) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(ui_name, error = %err, "open rejected");
                callbacks.notify_failure(&err);
                return Err(err);
            }
        };
        let resolved = options.resolve(&config);
        let mode = resolved.default_load_mode;
        let mut request = LoadRequest::new(resolved, payload)
            .priority(options.priority)
            .cancelable(options.cancelable)
            .context(options.context.unwrap_or_default())
            .callbacks(callbacks);

        if let Err(err) = self.lifecycle.check_capacity(request.config()) {
            request.notify_failure(&err);
            return Err(err);
        }

        tracing::info!(
            ui_name,
            strategy = request.config().open_strategy.as_str(),
            layer = request.config().layer.as_str(),
            ?mode,
            "opening panel"
        );

        if let Some(handle) = self.lifecycle.take_pooled(ui_name) {
            return self.finish_open(request, handle).map(OpenTicket::Ready);
        }

        match mode {
            LoadMode::Sync => {
                let outcome = self.scheduler.load_sync(request, &mut self.source);
                self.events.emit(PanelEvent::LoadStart {
                    ui_name: ui_name.to_owned(),
                    request_id: outcome.request().id(),
                });
                self.complete_load(outcome).map(OpenTicket::Ready)
            }
            LoadMode::Async => match self.scheduler.submit(request) {
                Ok(request_id) => {
                    self.events.emit(PanelEvent::LoadStart {
                        ui_name: ui_name.to_owned(),
                        request_id,
                    });
                    Ok(OpenTicket::Pending(request_id))
                }
                Err(Rejected { mut request, error }) => {
                    self.events.emit(PanelEvent::LoadComplete {
                        ui_name: ui_name.to_owned(),
                        request_id: request.id(),
                        success: false,
                    });
                    request.notify_failure(&error);
                    Err(error)
                }
            },
        }
    }

    /// Turn a finished load into an instance and notify the caller.
    fn complete_load(&mut self, outcome: LoadOutcome) -> Result<InstanceId> {
        match outcome {
            LoadOutcome::Loaded { request, handle } => {
                let request_id = request.id();
                let ui_name = request.ui_name().to_owned();
                let result = self.finish_open(request, handle);
                self.events.emit(PanelEvent::LoadComplete {
                    ui_name,
                    request_id,
                    success: result.is_ok(),
                });
                result
            }
            LoadOutcome::Failed { mut request, error } => {
                self.events.emit(PanelEvent::LoadComplete {
                    ui_name: request.ui_name().to_owned(),
                    request_id: request.id(),
                    success: false,
                });
                request.notify_failure(&error);
                Err(error)
            }
        }
    }

    fn finish_open(&mut self, mut request: LoadRequest, handle: PanelHandle) -> Result<InstanceId> {
        match self.materialize(&request, handle) {
            Ok(id) => {
                request.notify_success(id);
                Ok(id)
            }
            Err(err) => {
                tracing::warn!(ui_name = request.ui_name(), error = %err, "open failed");
                request.notify_failure(&err);
                Err(err)
            }
        }
    }

    /// Displace, create, attach, show, then settle conflicts and record.
    fn materialize(&mut self, request: &LoadRequest, handle: PanelHandle) -> Result<InstanceId> {
        let config = request.config();
        let ui_name = config.name.as_str();

        let handle = self.lifecycle.prepare(ui_name, handle, request.payload())?;
        if let Err(err) = self.lifecycle.check_capacity(config) {
            self.lifecycle.recycle(ui_name, handle);
            return Err(err);
        }

        let now = self.clock.stamp();
        let displaced = self.displace(config, None);

        let id = match self
            .lifecycle
            .create(config.clone(), handle, request.payload().clone(), now)
        {
            Ok(id) => id,
            Err(err) => {
                self.restore_displaced(&displaced);
                return Err(err);
            }
        };
        let render_order = self.layers.assign_panel(id, config.layer);
        self.lifecycle.attach(id, config.layer, render_order);

        if let Err(err) = self.lifecycle.show(id, self.clock.stamp()) {
            self.lifecycle.destroy(id, now);
            self.layers.release_panel(id);
            self.restore_displaced(&displaced);
            return Err(err);
        }
        self.settle(config, displaced);

        self.navigation.record_open(
            ui_name,
            id,
            config.open_strategy,
            request.payload().clone(),
            self.clock.stamp(),
            request.navigation_context().clone(),
        );

        let animation = self
            .lifecycle
            .get(id)
            .filter(|i| i.capabilities().contains(PanelCaps::ANIMATED))
            .and_then(|_| config.show_animation.clone());
        tracing::info!(
            ui_name,
            instance_id = id.get(),
            layer = config.layer.as_str(),
            render_order,
            "panel opened"
        );
        self.events.emit(PanelEvent::UiOpened {
            ui_name: ui_name.to_owned(),
            instance_id: id,
            layer: config.layer,
            play_sound: config.play_sound,
            animation,
        });
        Ok(id)
    }

    /// Hide what the open strategy displaces, leaving it alive until the
    /// incoming instance is visible.
    fn displace(&mut self, config: &PanelConfig, incoming: Option<InstanceId>) -> Vec<InstanceId> {
        let now = self.clock.stamp();
        let victims = self.lifecycle.conflict_victims(config, incoming);
        for id in &victims {
            self.lifecycle.hide(*id, now);
        }
        victims
    }

    /// Re-show displaced instances after the incoming one failed.
    fn restore_displaced(&mut self, displaced: &[InstanceId]) {
        let now = self.clock.stamp();
        for id in displaced {
            if let Err(err) = self.lifecycle.show(*id, now) {
                tracing::warn!(instance_id = id.get(), error = %err, "failed to restore displaced panel");
            }
        }
    }

    /// Destroy (or keep hidden, for `Stack`) what [`displace`](Self::displace)
    /// put aside, and report it.
    fn settle(&mut self, config: &PanelConfig, displaced: Vec<InstanceId>) {
        let now = self.clock.stamp();
        let resolutions = self
            .lifecycle
            .settle_conflicts(config.open_strategy, displaced, now);
        self.apply_resolutions(&config.name, config.open_strategy, resolutions);
    }

    fn apply_resolutions(
        &mut self,
        ui_name: &str,
        strategy: OpenStrategy,
        resolutions: Vec<ConflictResolution>,
    ) {
        if resolutions.is_empty() {
            return;
        }
        let mut affected = Vec::with_capacity(resolutions.len());
        for resolution in resolutions {
            match resolution {
                ConflictResolution::Destroyed(record) => {
                    affected.push(record.id);
                    self.after_destroy(&record);
                }
                ConflictResolution::Hidden(id) => {
                    affected.push(id);
                    self.events.emit(PanelEvent::InstanceHidden {
                        ui_name: ui_name.to_owned(),
                        instance_id: id,
                    });
                }
            }
        }
        tracing::debug!(
            ui_name,
            strategy = strategy.as_str(),
            affected = affected.len(),
            "open strategy resolved conflicts"
        );
        self.events.emit(PanelEvent::StrategyConflict {
            ui_name: ui_name.to_owned(),
            strategy,
            affected,
        });
    }

    fn after_destroy(&mut self, record: &DestroyedInstance) {
        self.layers.release_panel(record.id);
        self.navigation.record_close(record.id);
        self.events.emit(PanelEvent::InstanceDestroyed {
            ui_name: record.ui_name.clone(),
            instance_id: record.id,
            pooled: record.pooled,
        });
        self.events.emit(PanelEvent::UiClosed {
            ui_name: record.ui_name.clone(),
            instance_id: record.id,
        });
    }

    // ========================================================================
    // Closing and visibility
    // ========================================================================

    /// Close one instance, or every live instance of a panel. Returns whether
    /// anything was closed.
    pub fn close_ui(&mut self, target: impl Into<CloseTarget>) -> bool {
        let closed = match target.into() {
            CloseTarget::Instance(id) => self.close_instance(id, true),
            CloseTarget::Name(name) => {
                let ids = self.lifecycle.instances_of(&name);
                ids.into_iter()
                    .rev()
                    .filter(|id| self.close_instance(*id, false))
                    .count()
                    > 0
            }
        };
        self.events.flush();
        closed
    }

    /// Close every live instance. Returns the number closed.
    pub fn close_all_ui(&mut self) -> usize {
        let ids = self.lifecycle.ids();
        let closed = ids
            .into_iter()
            .rev()
            .filter(|id| self.close_instance(*id, false))
            .count();
        tracing::info!(closed, "closed all panels");
        self.events.flush();
        closed
    }

    fn close_instance(&mut self, id: InstanceId, restore: bool) -> bool {
        let Some(inst) = self.lifecycle.get(id) else {
            return false;
        };
        let stacked = inst.config().open_strategy == OpenStrategy::Stack;
        let now = self.clock.stamp();
        let Some(record) = self.lifecycle.destroy(id, now) else {
            return false;
        };
        tracing::info!(
            ui_name = %record.ui_name,
            instance_id = id.get(),
            pooled = record.pooled,
            "panel closed"
        );
        self.after_destroy(&record);

        if restore && stacked && record.was_active && self.restore_stacked {
            if let Some(covered) = self.lifecycle.topmost_hidden(&record.ui_name) {
                self.reveal(covered);
            }
        }
        true
    }

    fn reveal(&mut self, id: InstanceId) -> bool {
        let now = self.clock.stamp();
        match self.lifecycle.show(id, now) {
            Ok(()) => {
                if let Some(inst) = self.lifecycle.get(id) {
                    self.events.emit(PanelEvent::InstanceShown {
                        ui_name: inst.ui_name().to_owned(),
                        instance_id: id,
                    });
                }
                true
            }
            Err(err) => {
                tracing::warn!(instance_id = id.get(), error = %err, "failed to re-show panel");
                false
            }
        }
    }

    /// Show a hidden instance again, applying its open strategy.
    ///
    /// The instance becomes the newest history entry of its panel.
    pub fn show_ui(&mut self, id: InstanceId) -> Result<()> {
        let result = self.show_instance(id);
        self.events.flush();
        result
    }

    fn show_instance(&mut self, id: InstanceId) -> Result<()> {
        let Some(inst) = self.lifecycle.get(id) else {
            return Err(PanelError::InvalidArgument(format!(
                "unknown instance {}",
                id.get()
            )));
        };
        if inst.is_active() {
            return Ok(());
        }
        let config = inst.config().clone();
        let payload = inst.payload().clone();
        self.lifecycle.check_capacity(&config)?;

        let displaced = self.displace(&config, Some(id));
        if !self.reveal(id) {
            self.restore_displaced(&displaced);
            return Err(PanelError::creation(&config.name, "panel refused to show"));
        }
        self.settle(&config, displaced);

        let context = self
            .navigation
            .entry(id)
            .map(|e| e.context.clone())
            .unwrap_or_default();
        self.navigation.record_open(
            &config.name,
            id,
            config.open_strategy,
            payload,
            self.clock.stamp(),
            context,
        );
        Ok(())
    }

    /// Hide an instance without destroying it. Returns `false` if it was not
    /// visible.
    pub fn hide_ui(&mut self, id: InstanceId) -> bool {
        let now = self.clock.stamp();
        if !self.lifecycle.hide(id, now) {
            return false;
        }
        if let Some(inst) = self.lifecycle.get(id) {
            self.events.emit(PanelEvent::InstanceHidden {
                ui_name: inst.ui_name().to_owned(),
                instance_id: id,
            });
        }
        self.events.flush();
        true
    }

    /// Close the topmost visible instance on `layer` that closes on
    /// background clicks. Returns whether one was closed.
    pub fn background_clicked(&mut self, layer: LayerKind) -> bool {
        let target = self
            .lifecycle
            .ids()
            .into_iter()
            .filter_map(|id| self.lifecycle.get(id))
            .filter(|i| {
                i.is_active() && i.layer() == layer && i.config().close_on_background_click
            })
            .max_by_key(|i| i.last_show_time())
            .map(Instance::id);
        let Some(id) = target else {
            return false;
        };
        tracing::debug!(layer = layer.as_str(), instance_id = id.get(), "background click");
        let closed = self.close_instance(id, true);
        self.events.flush();
        closed
    }

    // ========================================================================
    // Back navigation
    // ========================================================================

    /// Close the current back target. Returns `false` (and emits nothing) if
    /// there is none.
    pub fn go_back(&mut self) -> bool {
        let done = self.back_step();
        self.events.flush();
        done
    }

    /// Perform up to `count` back steps. Returns how many were performed.
    pub fn go_back_n(&mut self, count: usize) -> usize {
        let mut performed = 0;
        while performed < count && self.back_step() {
            performed += 1;
        }
        self.events.flush();
        performed
    }

    fn back_step(&mut self) -> bool {
        let lifecycle = &self.lifecycle;
        let Some(entry) = self.navigation.back_target(|id| lifecycle.is_active(id)) else {
            return false;
        };
        let id = entry.instance_id;
        self.navigate_back(id, true)
    }

    fn navigate_back(&mut self, id: InstanceId, restore: bool) -> bool {
        let Some(entry) = self.navigation.entry(id) else {
            return false;
        };
        let ui_name = entry.ui_name.clone();
        let context = entry.context.clone();
        if !self.close_instance(id, restore) {
            return false;
        }
        self.navigation.note_back();
        tracing::debug!(ui_name = %ui_name, instance_id = id.get(), "navigated back");
        if context.auto_return_to_source {
            if let Some(source) = context.from_ui.as_deref() {
                self.navigation.schedule_return(source);
            }
        }
        self.events.emit(PanelEvent::NavigatedBack {
            ui_name,
            instance_id: id,
            context,
        });
        true
    }

    /// Close everything opened after the newest active instance of
    /// `ui_name`, leaving it showing. Returns `false` if it is not active.
    pub fn go_back_to(&mut self, ui_name: &str) -> bool {
        let lifecycle = &self.lifecycle;
        let target = self
            .navigation
            .go_back_to_target(ui_name, |id| lifecycle.is_active(id));
        let done = match target {
            Some(id) => self.unwind_to(id),
            None => false,
        };
        self.events.flush();
        done
    }

    /// Like [`go_back_to`](Self::go_back_to), targeting one instance.
    pub fn go_back_to_instance(&mut self, id: InstanceId) -> bool {
        let done = self.unwind_to(id);
        self.events.flush();
        done
    }

    fn unwind_to(&mut self, target: InstanceId) -> bool {
        // Closing a stacked instance can re-show the one it covered, so
        // recompute until nothing newer is active.
        let mut found = false;
        for _ in 0..=self.lifecycle.len() {
            let lifecycle = &self.lifecycle;
            let Some(plan) = self
                .navigation
                .go_back_to_instance_plan(target, |id| lifecycle.is_active(id))
            else {
                break;
            };
            found = true;
            if plan.is_empty() {
                break;
            }
            for id in plan {
                self.navigate_back(id, true);
            }
        }
        found
    }

    /// Close every active back-eligible instance. Returns the number closed.
    pub fn clear_backable(&mut self) -> usize {
        let lifecycle = &self.lifecycle;
        let plan = self.navigation.backable_plan(|id| lifecycle.is_active(id));
        let closed = plan
            .into_iter()
            .filter(|id| self.close_instance(*id, false))
            .count();
        self.events.flush();
        closed
    }

    #[must_use]
    pub fn can_go_back(&self) -> bool {
        self.navigation.can_go_back(|id| self.lifecycle.is_active(id))
    }

    /// Panel a back step would close.
    #[must_use]
    pub fn top_ui(&self) -> Option<&str> {
        self.navigation.top_ui(|id| self.lifecycle.is_active(id))
    }

    // ========================================================================
    // Loads and pool
    // ========================================================================

    /// Cancel a waiting or loading request.
    pub fn cancel_load(&mut self, request_id: RequestId) -> bool {
        self.scheduler.cancel(request_id)
    }

    /// Cancel every cancelable request for `ui_name`.
    pub fn cancel_loads_for(&mut self, ui_name: &str) -> usize {
        self.scheduler.cancel_all_for(ui_name)
    }

    /// Load handles synchronously until the panel's pool holds the configured
    /// initial size. Returns how many were added.
    pub fn prewarm(&mut self, ui_name: &str) -> Result<usize> {
        let config = self.resolve_config(ui_name)?;
        let mut added = 0;
        for _ in 0..self.lifecycle.prewarm_deficit(ui_name) {
            let Some(mut handle) = self.source.load_sync(ui_name, &config) else {
                tracing::warn!(ui_name, added, "prewarm load failed");
                return Err(PanelError::asset(ui_name, "asset source returned no panel"));
            };
            if !handle.capabilities().contains(PanelCaps::REUSABLE) {
                tracing::debug!(ui_name, "panel is not reusable, nothing to prewarm");
                handle.dispose();
                break;
            }
            if !self.lifecycle.recycle(ui_name, handle) {
                break;
            }
            added += 1;
        }
        tracing::debug!(ui_name, added, "pool prewarmed");
        Ok(added)
    }

    /// Dispose pooled handles for one panel, or all. Returns the count.
    pub fn clear_pool(&mut self, ui_name: Option<&str>) -> usize {
        self.lifecycle.clear_pool(ui_name)
    }

    // ========================================================================
    // Tick
    // ========================================================================

    /// Advance the runtime by one frame.
    ///
    /// Order: session clock, load completions and timeouts, promotion of
    /// waiting loads, deferred auto-return opens, periodic history sweep,
    /// event delivery.
    pub fn tick(&mut self, delta: Duration) {
        let _span = tracing::trace_span!("panels.tick", delta_us = delta.as_micros() as u64).entered();
        self.clock.advance(delta);

        for outcome in self.scheduler.tick(delta, &mut self.source) {
            // Failures already went to the request's callbacks.
            let _ = self.complete_load(outcome);
        }

        for ui_name in self.navigation.take_pending_returns() {
            tracing::debug!(ui_name = %ui_name, "auto return");
            if let Err(err) = self.begin_open(
                &ui_name,
                Payload::none(),
                OpenOptions::new(),
                LoadCallbacks::default(),
            ) {
                tracing::warn!(ui_name = %ui_name, error = %err, "auto return failed");
            }
        }

        let lifecycle = &self.lifecycle;
        self.navigation.tick(delta, |id| lifecycle.is_alive(id));
        self.events.flush();
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Whether any instance of `ui_name` is visible.
    #[must_use]
    pub fn is_ui_open(&self, ui_name: &str) -> bool {
        self.lifecycle.active_count(ui_name) > 0
    }

    /// Live instances of `ui_name`, oldest first.
    #[must_use]
    pub fn get_instances(&self, ui_name: &str) -> Vec<&Instance> {
        self.lifecycle
            .instances_of(ui_name)
            .into_iter()
            .filter_map(|id| self.lifecycle.get(id))
            .collect()
    }

    #[must_use]
    pub fn instance(&self, id: InstanceId) -> Option<&Instance> {
        self.lifecycle.get(id)
    }

    #[must_use]
    pub fn status(&self) -> RuntimeStatus {
        RuntimeStatus {
            queue: self.scheduler.status(),
            instances: self.lifecycle.status(),
            layer_count: self.layers.layer_count(),
            pool_size: self.lifecycle.pool_size(),
            history_len: self.navigation.len(),
            scheduler: self.scheduler.stats().clone(),
        }
    }

    /// Override a layer's render order.
    pub fn set_render_order(&mut self, layer: LayerKind, order: i32) {
        self.layers.set_render_order(layer, order);
    }

    /// Groups of layers sharing a render order.
    #[must_use]
    pub fn detect_order_conflicts(&self) -> Vec<Vec<LayerKind>> {
        self.layers.detect_order_conflicts()
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Observe one kind of event. Drop the guard to unsubscribe.
    pub fn subscribe(&self, kind: EventKind, callback: impl Fn(&PanelEvent) + 'static) -> Subscription {
        self.events.subscribe(kind, callback)
    }

    /// Observe every event.
    pub fn subscribe_all(&self, callback: impl Fn(&PanelEvent) + 'static) -> Subscription {
        self.events.subscribe_all(callback)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Session time.
    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    pub fn layers(&self) -> &LayerRegistry {
        &self.layers
    }

    pub fn navigation(&self) -> &NavigationStack {
        &self.navigation
    }

    pub fn scheduler(&self) -> &LoadScheduler {
        &self.scheduler
    }

    pub fn lifecycle(&self) -> &InstanceLifecycle {
        &self.lifecycle
    }
}

impl<S: PanelAssetSource> Drop for Orchestrator<S> {
    fn drop(&mut self) {
        let cancelled = self.scheduler.cancel_all();
        if cancelled > 0 {
            tracing::debug!(cancelled, "cancelled in-flight loads on shutdown");
        }
    }
}
