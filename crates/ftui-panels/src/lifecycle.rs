#![forbid(unsafe_code)]

//! Instance registry, open-strategy conflict resolution, and handle pooling.
//!
//! An [`Instance`] is one live occurrence of a named panel. Its visibility
//! follows a small state machine:
//!
//! ```text
//! Created ─► Showing ─► Shown ─► Hiding ─► Hidden ─► Showing ...
//!               │                 │                  │
//!               ▼                 └──── destroy ─────┴──► Destroying ─► Destroyed
//!             Error
//! ```
//!
//! Panel calls are synchronous, so `Showing`, `Hiding`, and `Destroying` are
//! transient within a single call. A destroyed instance leaves the registry;
//! its final state is reported through [`DestroyedInstance`].
//!
//! # Strategies
//!
//! | Strategy | Before a new instance is shown |
//! |----------|--------------------------------|
//! | `Single` | every active instance of the name is destroyed |
//! | `Multiple` | nothing, unless the hard cap is reached (rejected) |
//! | `Limited` / `Queue` | the oldest active instances are destroyed until one slot is free |
//! | `Stack` | shown instances of the name are hidden |
//!
//! # Pooling
//!
//! Destroyed handles that advertise [`PanelCaps::REUSABLE`] are reset and
//! kept per panel name, up to `max_size`. Opening that name again takes a
//! pooled handle before asking the asset source.

use std::collections::BTreeMap;

use ahash::AHashMap;

use crate::clock::Stamp;
use crate::config::{LifecycleSettings, OpenStrategy, PanelConfig, PoolSettings};
use crate::error::{PanelError, Result};
use crate::layer::LayerKind;
use crate::panel::{PanelCaps, PanelHandle, Payload};

/// Identifier of a panel instance. Never reused within a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct InstanceId(pub(crate) u64);

impl InstanceId {
    /// Raw id value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Instance visibility state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum InstanceState {
    #[default]
    Created,
    Showing,
    Shown,
    Hiding,
    Hidden,
    Destroying,
    Destroyed,
    /// The panel refused to show.
    Error,
}

impl InstanceState {
    /// Counts toward strategy limits and back navigation.
    #[inline]
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Showing | Self::Shown)
    }
}

/// One live panel instance.
pub struct Instance {
    id: InstanceId,
    ui_name: String,
    panel: PanelHandle,
    config: PanelConfig,
    payload: Payload,
    state: InstanceState,
    layer: LayerKind,
    render_order: i32,
    create_time: Stamp,
    last_show_time: Option<Stamp>,
    last_hide_time: Option<Stamp>,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("ui_name", &self.ui_name)
            .field("state", &self.state)
            .field("layer", &self.layer)
            .field("render_order", &self.render_order)
            .field("create_time", &self.create_time)
            .finish_non_exhaustive()
    }
}

impl Instance {
    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn ui_name(&self) -> &str {
        &self.ui_name
    }

    /// Resolved config snapshot the instance was opened with.
    pub fn config(&self) -> &PanelConfig {
        &self.config
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    /// Capabilities of the underlying panel.
    pub fn capabilities(&self) -> PanelCaps {
        self.panel.capabilities()
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn layer(&self) -> LayerKind {
        self.layer
    }

    pub fn render_order(&self) -> i32 {
        self.render_order
    }

    pub fn create_time(&self) -> Stamp {
        self.create_time
    }

    pub fn last_show_time(&self) -> Option<Stamp> {
        self.last_show_time
    }

    pub fn last_hide_time(&self) -> Option<Stamp> {
        self.last_hide_time
    }
}

/// What happened to an instance when it was destroyed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestroyedInstance {
    pub id: InstanceId,
    pub ui_name: String,
    pub layer: LayerKind,
    /// Always `Destroyed`.
    pub state: InstanceState,
    pub destroy_time: Stamp,
    /// Whether it was visible when destroyed.
    pub was_active: bool,
    /// Whether its handle went back to the pool.
    pub pooled: bool,
}

/// Side effect of making room for a new instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictResolution {
    Destroyed(DestroyedInstance),
    Hidden(InstanceId),
}

/// Instance snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct InstanceStatus {
    pub total: usize,
    pub active: usize,
    pub hidden: usize,
    /// Live instance count per panel name.
    pub per_name: BTreeMap<String, usize>,
}

/// Cumulative lifecycle counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct LifecycleStats {
    pub created: u64,
    pub destroyed: u64,
    /// Handles returned to a pool.
    pub pooled: u64,
    /// Instances created from a pooled handle.
    pub reused: u64,
    /// Handles disposed instead of pooled.
    pub disposed: u64,
}

/// Registry of live instances and pooled handles.
pub struct InstanceLifecycle {
    settings: LifecycleSettings,
    pool_settings: PoolSettings,
    instances: BTreeMap<InstanceId, Instance>,
    pools: AHashMap<String, Vec<PanelHandle>>,
    next_id: u64,
    stats: LifecycleStats,
}

impl std::fmt::Debug for InstanceLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceLifecycle")
            .field("instances", &self.instances.len())
            .field("pooled", &self.pool_size())
            .field("stats", &self.stats)
            .finish()
    }
}

impl Default for InstanceLifecycle {
    fn default() -> Self {
        Self::new(LifecycleSettings::default(), PoolSettings::default())
    }
}

impl InstanceLifecycle {
    #[must_use]
    pub fn new(settings: LifecycleSettings, pool_settings: PoolSettings) -> Self {
        Self {
            settings,
            pool_settings,
            instances: BTreeMap::new(),
            pools: AHashMap::new(),
            next_id: 0,
            stats: LifecycleStats::default(),
        }
    }

    // ========================================================================
    // Admission
    // ========================================================================

    /// Refuse a new instance the strategy cannot make room for.
    ///
    /// Only `Multiple` can refuse; every other strategy evicts or hides.
    pub fn check_capacity(&self, config: &PanelConfig) -> Result<()> {
        if config.open_strategy != OpenStrategy::Multiple {
            return Ok(());
        }
        let active = self.active_count(&config.name);
        if active >= self.settings.multiple_hard_cap.max(1) {
            tracing::warn!(
                ui_name = %config.name,
                active,
                cap = self.settings.multiple_hard_cap,
                "multiple strategy cap reached"
            );
            return Err(PanelError::StrategyRejected {
                ui_name: config.name.clone(),
                strategy: OpenStrategy::Multiple,
                active,
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn can_create(&self, config: &PanelConfig) -> bool {
        self.check_capacity(config).is_ok()
    }

    /// Ensure a handle can become an instance.
    pub fn validate_handle(&self, ui_name: &str, handle: &PanelHandle) -> Result<()> {
        let caps = handle.capabilities();
        if !caps.contains(PanelCaps::REQUIRED) {
            return Err(PanelError::creation(
                ui_name,
                format!("panel lacks required capabilities (has {caps:?})"),
            ));
        }
        Ok(())
    }

    /// Instances the open strategy displaces when an instance of
    /// `config.name` becomes visible, oldest first. `incoming` is the
    /// instance about to be shown, if it already exists, and is never listed.
    ///
    /// `Stack` displaces by hiding; every other strategy destroys.
    #[must_use]
    pub fn conflict_victims(&self, config: &PanelConfig, incoming: Option<InstanceId>) -> Vec<InstanceId> {
        let mut active = self.get_active(&config.name);
        active.retain(|id| Some(*id) != incoming);
        match config.open_strategy {
            OpenStrategy::Single | OpenStrategy::Stack => active,
            OpenStrategy::Multiple => Vec::new(),
            OpenStrategy::Limited | OpenStrategy::Queue => {
                let excess = (active.len() + 1).saturating_sub(config.capacity());
                active.into_iter().take(excess).collect()
            }
        }
    }

    /// Apply the open strategy before an instance of `config.name` becomes
    /// visible, in one step. See [`conflict_victims`](Self::conflict_victims).
    pub fn resolve_conflicts(
        &mut self,
        config: &PanelConfig,
        incoming: Option<InstanceId>,
        now: Stamp,
    ) -> Vec<ConflictResolution> {
        let victims = self.conflict_victims(config, incoming);
        self.settle_conflicts(config.open_strategy, victims, now)
    }

    /// Finish displacing `victims`: hide them under `Stack`, destroy them
    /// otherwise. Victims already hidden stay hidden.
    pub fn settle_conflicts(
        &mut self,
        strategy: OpenStrategy,
        victims: Vec<InstanceId>,
        now: Stamp,
    ) -> Vec<ConflictResolution> {
        if strategy == OpenStrategy::Stack {
            return victims
                .into_iter()
                .filter(|id| self.hide(*id, now) || self.is_hidden(*id))
                .map(ConflictResolution::Hidden)
                .collect();
        }
        victims
            .into_iter()
            .filter_map(|id| self.destroy(id, now))
            .map(ConflictResolution::Destroyed)
            .collect()
    }

    // ========================================================================
    // Creation and visibility
    // ========================================================================

    /// Take a pooled handle for `ui_name`, if any.
    pub fn take_pooled(&mut self, ui_name: &str) -> Option<PanelHandle> {
        let handle = self.pools.get_mut(ui_name)?.pop()?;
        self.stats.reused += 1;
        tracing::trace!(ui_name, "reusing pooled panel");
        Some(handle)
    }

    /// Check a freshly obtained handle and bind the payload to it.
    ///
    /// Runs before any existing instance is touched, so a rejected handle
    /// leaves the registry as it was. Rejected handles are disposed (missing
    /// capability) or recycled (bind failure).
    pub fn prepare(
        &mut self,
        ui_name: &str,
        mut handle: PanelHandle,
        payload: &Payload,
    ) -> Result<PanelHandle> {
        if let Err(err) = self.validate_handle(ui_name, &handle) {
            tracing::warn!(ui_name, error = %err, "rejected panel handle");
            self.dispose(ui_name, handle);
            return Err(err);
        }
        if !payload.is_none() && handle.capabilities().contains(PanelCaps::PAYLOAD) {
            if let Err(reason) = handle.bind(payload) {
                tracing::warn!(ui_name, %reason, "panel rejected payload");
                self.recycle(ui_name, handle);
                return Err(PanelError::creation(ui_name, reason));
            }
        }
        Ok(handle)
    }

    /// Register a new instance around a prepared handle.
    ///
    /// The instance starts `Created`; call [`show`](Self::show) to display it.
    pub fn create(
        &mut self,
        config: PanelConfig,
        handle: PanelHandle,
        payload: Payload,
        now: Stamp,
    ) -> Result<InstanceId> {
        if let Err(err) = self.validate_handle(&config.name, &handle) {
            self.dispose(&config.name, handle);
            return Err(err);
        }

        self.next_id += 1;
        let id = InstanceId(self.next_id);
        let layer = config.layer;
        tracing::debug!(instance_id = id.get(), ui_name = %config.name, "instance created");
        self.instances.insert(
            id,
            Instance {
                id,
                ui_name: config.name.clone(),
                panel: handle,
                config,
                payload,
                state: InstanceState::Created,
                layer,
                render_order: layer.default_render_order(),
                create_time: now,
                last_show_time: None,
                last_hide_time: None,
            },
        );
        self.stats.created += 1;
        Ok(id)
    }

    /// Parent an instance's panel to a layer.
    pub fn attach(&mut self, id: InstanceId, layer: LayerKind, render_order: i32) {
        if let Some(inst) = self.instances.get_mut(&id) {
            inst.layer = layer;
            inst.render_order = render_order;
            inst.panel.attach(layer, render_order);
        }
    }

    /// Show a created or hidden instance. Showing an active one is a no-op.
    pub fn show(&mut self, id: InstanceId, now: Stamp) -> Result<()> {
        let Some(inst) = self.instances.get_mut(&id) else {
            return Err(PanelError::InvalidArgument(format!(
                "unknown instance {}",
                id.get()
            )));
        };
        if inst.state.is_active() {
            return Ok(());
        }
        inst.state = InstanceState::Showing;
        let animation = animation_tag(&inst.config, &inst.panel, true);
        if let Err(reason) = inst.panel.show(animation) {
            tracing::warn!(instance_id = id.get(), ui_name = %inst.ui_name, %reason, "panel failed to show");
            inst.state = InstanceState::Error;
            return Err(PanelError::creation(&inst.ui_name, reason));
        }
        inst.state = InstanceState::Shown;
        inst.last_show_time = Some(now);
        tracing::trace!(instance_id = id.get(), ui_name = %inst.ui_name, "instance shown");
        Ok(())
    }

    /// Hide an active instance. Returns `false` if it was not active.
    pub fn hide(&mut self, id: InstanceId, now: Stamp) -> bool {
        let Some(inst) = self.instances.get_mut(&id) else {
            return false;
        };
        if !inst.state.is_active() {
            return false;
        }
        inst.state = InstanceState::Hiding;
        let animation = animation_tag(&inst.config, &inst.panel, false);
        inst.panel.hide(animation);
        inst.state = InstanceState::Hidden;
        inst.last_hide_time = Some(now);
        tracing::trace!(instance_id = id.get(), ui_name = %inst.ui_name, "instance hidden");
        true
    }

    /// Destroy an instance, hiding it first if visible, and pool or dispose
    /// its handle. Returns `None` for unknown ids.
    pub fn destroy(&mut self, id: InstanceId, now: Stamp) -> Option<DestroyedInstance> {
        let was_active = self.hide(id, now);
        let mut inst = self.instances.remove(&id)?;
        let failed = inst.state == InstanceState::Error;
        inst.state = InstanceState::Destroying;
        // A panel that refused to show must not serve later opens.
        let pooled = if failed {
            self.dispose(&inst.ui_name, inst.panel);
            false
        } else {
            self.recycle(&inst.ui_name, inst.panel)
        };
        self.stats.destroyed += 1;
        tracing::debug!(
            instance_id = id.get(),
            ui_name = %inst.ui_name,
            pooled,
            "instance destroyed"
        );
        Some(DestroyedInstance {
            id,
            ui_name: inst.ui_name,
            layer: inst.layer,
            state: InstanceState::Destroyed,
            destroy_time: now,
            was_active,
            pooled,
        })
    }

    /// Return an unused handle to the pool, or dispose it. Returns whether it
    /// was pooled.
    pub fn recycle(&mut self, ui_name: &str, mut handle: PanelHandle) -> bool {
        let reusable = handle.capabilities().contains(PanelCaps::REUSABLE);
        if self.pool_settings.enabled && reusable {
            let max = self.pool_settings.max_size;
            let pool = self.pools.entry(ui_name.to_owned()).or_default();
            if pool.len() < max {
                handle.reset();
                pool.push(handle);
                self.stats.pooled += 1;
                return true;
            }
        }
        self.dispose(ui_name, handle);
        false
    }

    fn dispose(&mut self, ui_name: &str, mut handle: PanelHandle) {
        handle.dispose();
        self.stats.disposed += 1;
        tracing::trace!(ui_name, "panel disposed");
    }

    /// Number of handles [`prewarm`](crate::Orchestrator::prewarm) should add
    /// for `ui_name` to reach the configured initial size.
    #[must_use]
    pub fn prewarm_deficit(&self, ui_name: &str) -> usize {
        if !self.pool_settings.enabled {
            return 0;
        }
        let target = self
            .pool_settings
            .initial_size
            .min(self.pool_settings.max_size);
        target.saturating_sub(self.pool_size_of(ui_name))
    }

    /// Dispose pooled handles for one name, or for every name. Returns the
    /// number disposed.
    pub fn clear_pool(&mut self, ui_name: Option<&str>) -> usize {
        let drained: Vec<PanelHandle> = match ui_name {
            Some(name) => self.pools.remove(name).unwrap_or_default(),
            None => self.pools.drain().flat_map(|(_, v)| v).collect(),
        };
        let count = drained.len();
        for mut handle in drained {
            handle.dispose();
        }
        self.stats.disposed += count as u64;
        count
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Active instances of `ui_name`, oldest first.
    #[must_use]
    pub fn get_active(&self, ui_name: &str) -> Vec<InstanceId> {
        self.instances
            .values()
            .filter(|i| i.ui_name == ui_name && i.state.is_active())
            .map(|i| i.id)
            .collect()
    }

    /// Live (active or hidden) instances of `ui_name`, oldest first.
    #[must_use]
    pub fn instances_of(&self, ui_name: &str) -> Vec<InstanceId> {
        self.instances
            .values()
            .filter(|i| i.ui_name == ui_name)
            .map(|i| i.id)
            .collect()
    }

    /// Every live instance id, oldest first.
    #[must_use]
    pub fn ids(&self) -> Vec<InstanceId> {
        self.instances.keys().copied().collect()
    }

    #[must_use]
    pub fn active_count(&self, ui_name: &str) -> usize {
        self.instances
            .values()
            .filter(|i| i.ui_name == ui_name && i.state.is_active())
            .count()
    }

    /// Hidden instance of `ui_name` that was hidden most recently.
    #[must_use]
    pub fn topmost_hidden(&self, ui_name: &str) -> Option<InstanceId> {
        self.instances
            .values()
            .filter(|i| i.ui_name == ui_name && i.state == InstanceState::Hidden)
            .max_by_key(|i| i.last_hide_time)
            .map(|i| i.id)
    }

    #[must_use]
    pub fn get(&self, id: InstanceId) -> Option<&Instance> {
        self.instances.get(&id)
    }

    #[must_use]
    pub fn is_alive(&self, id: InstanceId) -> bool {
        self.instances.contains_key(&id)
    }

    #[must_use]
    pub fn is_active(&self, id: InstanceId) -> bool {
        self.instances.get(&id).is_some_and(Instance::is_active)
    }

    #[must_use]
    pub fn is_hidden(&self, id: InstanceId) -> bool {
        self.instances
            .get(&id)
            .is_some_and(|i| i.state == InstanceState::Hidden)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Pooled handles for one name.
    #[must_use]
    pub fn pool_size_of(&self, ui_name: &str) -> usize {
        self.pools.get(ui_name).map_or(0, Vec::len)
    }

    /// Pooled handles across all names.
    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.pools.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn status(&self) -> InstanceStatus {
        let mut status = InstanceStatus::default();
        for inst in self.instances.values() {
            status.total += 1;
            if inst.state.is_active() {
                status.active += 1;
            } else if inst.state == InstanceState::Hidden {
                status.hidden += 1;
            }
            *status.per_name.entry(inst.ui_name.clone()).or_default() += 1;
        }
        status
    }

    #[must_use]
    pub fn stats(&self) -> &LifecycleStats {
        &self.stats
    }

    #[must_use]
    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }
}

fn animation_tag<'a>(config: &'a PanelConfig, panel: &PanelHandle, showing: bool) -> Option<&'a str> {
    if !panel.capabilities().contains(PanelCaps::ANIMATED) {
        return None;
    }
    if showing {
        config.show_animation.as_deref()
    } else {
        config.hide_animation.as_deref()
    }
}
