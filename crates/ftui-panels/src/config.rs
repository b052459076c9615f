#![forbid(unsafe_code)]

//! Panel and runtime configuration.
//!
//! A [`PanelConfig`] describes one named panel: where its asset lives, which
//! layer it renders on, and the [`OpenStrategy`] that governs how many
//! instances may coexist. Configs are immutable once resolved for a request;
//! per-call [`OpenOptions`] produce a resolved copy.
//!
//! [`RuntimeConfig`] groups the global scheduler, pool, lifecycle, and
//! navigation settings together with the panel table. With the `config-file`
//! feature it can be loaded from TOML or JSON:
//!
//! ```toml
//! [scheduler]
//! max_concurrent_loads = 2
//! load_timeout_secs = 10.0
//!
//! [[panels]]
//! name = "Settings"
//! asset_path = "ui/settings"
//! layer = "Popup"
//! open_strategy = "Single"
//! ```
//!
//! Every field has a default, so a partial file only overrides what it names.

#[cfg(feature = "config-file")]
use std::path::Path;

use web_time::Duration;

use crate::error::ConfigError;
use crate::layer::LayerKind;
use crate::navigation::NavigationContext;

// ---------------------------------------------------------------------------
// Strategies and modes
// ---------------------------------------------------------------------------

/// Multiplicity policy for a panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OpenStrategy {
    /// One active instance; opening again closes the previous one.
    #[default]
    Single,
    /// Any number of instances up to the global hard cap.
    Multiple,
    /// Up to `max_instances`; the oldest is closed to make room.
    Limited,
    /// New instances hide the current top one; closing restores it.
    Stack,
    /// Up to `max_instances`; the oldest is evicted on demand.
    Queue,
}

impl OpenStrategy {
    /// All strategies.
    pub const ALL: [OpenStrategy; 5] = [
        Self::Single,
        Self::Multiple,
        Self::Limited,
        Self::Stack,
        Self::Queue,
    ];

    /// Whether instances opened under this strategy take part in back history.
    #[must_use]
    pub const fn is_back_eligible(self) -> bool {
        matches!(self, Self::Single | Self::Stack | Self::Limited)
    }

    /// Fixed tie-break priority for back navigation (higher wins).
    #[must_use]
    pub const fn default_priority(self) -> u8 {
        match self {
            Self::Stack => 4,
            Self::Single => 3,
            Self::Limited => 2,
            Self::Multiple => 1,
            Self::Queue => 0,
        }
    }

    /// Stable name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Multiple => "multiple",
            Self::Limited => "limited",
            Self::Stack => "stack",
            Self::Queue => "queue",
        }
    }
}

/// How a panel's asset is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LoadMode {
    /// Resolve inline within the open call.
    Sync,
    /// Schedule through the load queue; resolves on a later tick.
    #[default]
    Async,
}

// ---------------------------------------------------------------------------
// PanelConfig
// ---------------------------------------------------------------------------

/// Configuration of one named panel.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PanelConfig {
    pub name: String,
    /// Opaque asset locator handed to the asset source.
    pub asset_path: String,
    pub layer: LayerKind,
    pub open_strategy: OpenStrategy,
    /// Capacity for `Limited` and `Queue`.
    pub max_instances: usize,
    /// Opaque tag passed to the panel when showing. Not interpreted here.
    pub show_animation: Option<String>,
    /// Opaque tag passed to the panel when hiding.
    pub hide_animation: Option<String>,
    pub default_load_mode: LoadMode,
    pub close_on_background_click: bool,
    pub play_sound: bool,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            asset_path: String::new(),
            layer: LayerKind::Normal,
            open_strategy: OpenStrategy::Single,
            max_instances: 1,
            show_animation: None,
            hide_animation: None,
            default_load_mode: LoadMode::Async,
            close_on_background_click: false,
            play_sound: false,
        }
    }
}

impl PanelConfig {
    /// Config for `name` with the asset path defaulting to the name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            asset_path: name.clone(),
            name,
            ..Self::default()
        }
    }

    /// Default config used for names that were never registered.
    #[must_use]
    pub fn synthesized(name: &str) -> Self {
        Self::new(name)
    }

    #[must_use]
    pub fn asset_path(mut self, path: impl Into<String>) -> Self {
        self.asset_path = path.into();
        self
    }

    #[must_use]
    pub fn layer(mut self, layer: LayerKind) -> Self {
        self.layer = layer;
        self
    }

    #[must_use]
    pub fn strategy(mut self, strategy: OpenStrategy) -> Self {
        self.open_strategy = strategy;
        self
    }

    #[must_use]
    pub fn max_instances(mut self, max: usize) -> Self {
        self.max_instances = max;
        self
    }

    #[must_use]
    pub fn animations(mut self, show: Option<&str>, hide: Option<&str>) -> Self {
        self.show_animation = show.map(str::to_owned);
        self.hide_animation = hide.map(str::to_owned);
        self
    }

    #[must_use]
    pub fn load_mode(mut self, mode: LoadMode) -> Self {
        self.default_load_mode = mode;
        self
    }

    #[must_use]
    pub fn close_on_background_click(mut self, enabled: bool) -> Self {
        self.close_on_background_click = enabled;
        self
    }

    #[must_use]
    pub fn play_sound(mut self, enabled: bool) -> Self {
        self.play_sound = enabled;
        self
    }

    /// Capacity used by `Limited`/`Queue`, never below one.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.max_instances.max(1)
    }
}

// ---------------------------------------------------------------------------
// Per-call options
// ---------------------------------------------------------------------------

/// Per-call overrides for an open request.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Render on this layer instead of the configured one.
    pub layer: Option<LayerKind>,
    /// Drop show/hide animation tags for this instance.
    pub skip_animation: bool,
    /// Force a load mode regardless of config and caller default.
    pub load_mode: Option<LoadMode>,
    /// Scheduling priority; higher is served first.
    pub priority: i32,
    /// Whether the request may be cancelled while waiting or loading.
    pub cancelable: bool,
    /// Navigation context recorded with the instance.
    pub context: Option<NavigationContext>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            layer: None,
            skip_animation: false,
            load_mode: None,
            priority: 0,
            cancelable: true,
            context: None,
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn layer(mut self, layer: LayerKind) -> Self {
        self.layer = Some(layer);
        self
    }

    #[must_use]
    pub fn skip_animation(mut self) -> Self {
        self.skip_animation = true;
        self
    }

    #[must_use]
    pub fn load_mode(mut self, mode: LoadMode) -> Self {
        self.load_mode = Some(mode);
        self
    }

    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn cancelable(mut self, cancelable: bool) -> Self {
        self.cancelable = cancelable;
        self
    }

    #[must_use]
    pub fn context(mut self, context: NavigationContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Produce the config snapshot used for this request.
    #[must_use]
    pub fn resolve(&self, base: &PanelConfig) -> PanelConfig {
        let mut resolved = base.clone();
        if let Some(layer) = self.layer {
            resolved.layer = layer;
        }
        if self.skip_animation {
            resolved.show_animation = None;
            resolved.hide_animation = None;
        }
        if let Some(mode) = self.load_mode {
            resolved.default_load_mode = mode;
        }
        resolved
    }
}

// ---------------------------------------------------------------------------
// Global settings
// ---------------------------------------------------------------------------

/// Load scheduler settings.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SchedulerSettings {
    /// Maximum requests in the Loading state at once. Default: 3.
    pub max_concurrent_loads: usize,
    /// Budget for an async request from submission. Default: 30s.
    pub load_timeout_secs: f64,
    /// Order the waiting list by priority; otherwise FIFO. Default: true.
    pub enable_priority_queue: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_concurrent_loads: 3,
            load_timeout_secs: 30.0,
            enable_priority_queue: true,
        }
    }
}

impl SchedulerSettings {
    #[must_use]
    pub fn max_concurrent_loads(mut self, max: usize) -> Self {
        self.max_concurrent_loads = max;
        self
    }

    #[must_use]
    pub fn load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout_secs = timeout.as_secs_f64();
        self
    }

    #[must_use]
    pub fn priority_queue(mut self, enabled: bool) -> Self {
        self.enable_priority_queue = enabled;
        self
    }

    /// Effective slot count (at least one).
    #[must_use]
    pub fn slots(&self) -> usize {
        self.max_concurrent_loads.max(1)
    }

    /// Timeout as a duration; invalid values fall back to the default.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        seconds(self.load_timeout_secs, 30.0)
    }
}

/// Instance pool settings.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolSettings {
    /// Return reusable handles to the pool on destroy. Default: true.
    pub enabled: bool,
    /// Handles loaded by `prewarm` and reserved per pool. Default: 2.
    pub initial_size: usize,
    /// Maximum pooled handles per panel name. Default: 5.
    pub max_size: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_size: 2,
            max_size: 5,
        }
    }
}

impl PoolSettings {
    /// Pooling disabled.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn max_size(mut self, max: usize) -> Self {
        self.max_size = max;
        self
    }

    #[must_use]
    pub fn initial_size(mut self, size: usize) -> Self {
        self.initial_size = size;
        self
    }
}

/// Instance lifecycle settings.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct LifecycleSettings {
    /// Active-instance cap for the `Multiple` strategy. Default: 10.
    pub multiple_hard_cap: usize,
    /// Re-show the previously hidden instance when a `Stack` top closes.
    /// Default: true.
    pub restore_stacked: bool,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            multiple_hard_cap: 10,
            restore_stacked: true,
        }
    }
}

/// Back-navigation priority for each strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct StrategyPriorities {
    pub stack: u8,
    pub single: u8,
    pub limited: u8,
    pub multiple: u8,
    pub queue: u8,
}

impl Default for StrategyPriorities {
    fn default() -> Self {
        Self {
            stack: OpenStrategy::Stack.default_priority(),
            single: OpenStrategy::Single.default_priority(),
            limited: OpenStrategy::Limited.default_priority(),
            multiple: OpenStrategy::Multiple.default_priority(),
            queue: OpenStrategy::Queue.default_priority(),
        }
    }
}

impl StrategyPriorities {
    /// Priority for `strategy`.
    #[must_use]
    pub const fn of(&self, strategy: OpenStrategy) -> u8 {
        match strategy {
            OpenStrategy::Stack => self.stack,
            OpenStrategy::Single => self.single,
            OpenStrategy::Limited => self.limited,
            OpenStrategy::Multiple => self.multiple,
            OpenStrategy::Queue => self.queue,
        }
    }
}

/// Navigation history settings.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct NavigationSettings {
    /// Maximum history entries; the oldest is evicted beyond this. Default: 50.
    pub max_stack_size: usize,
    /// Period of the stale-entry sweep. Default: 5s.
    pub cleanup_interval_secs: f64,
    pub priorities: StrategyPriorities,
}

impl Default for NavigationSettings {
    fn default() -> Self {
        Self {
            max_stack_size: 50,
            cleanup_interval_secs: 5.0,
            priorities: StrategyPriorities::default(),
        }
    }
}

impl NavigationSettings {
    #[must_use]
    pub fn max_stack_size(mut self, max: usize) -> Self {
        self.max_stack_size = max;
        self
    }

    #[must_use]
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval_secs = interval.as_secs_f64();
        self
    }

    /// Sweep period as a duration.
    #[must_use]
    pub fn cleanup_interval_duration(&self) -> Duration {
        seconds(self.cleanup_interval_secs, 5.0)
    }
}

fn seconds(value: f64, fallback: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_else(|_| Duration::from_secs_f64(fallback))
}

// ---------------------------------------------------------------------------
// RuntimeConfig
// ---------------------------------------------------------------------------

/// Complete runtime configuration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RuntimeConfig {
    pub scheduler: SchedulerSettings,
    pub pool: PoolSettings,
    pub lifecycle: LifecycleSettings,
    pub navigation: NavigationSettings,
    /// Open unregistered names with [`PanelConfig::synthesized`]. Default: true.
    pub synthesize_missing_configs: bool,
    /// Panel table; registered by name at construction.
    pub panels: Vec<PanelConfig>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerSettings::default(),
            pool: PoolSettings::default(),
            lifecycle: LifecycleSettings::default(),
            navigation: NavigationSettings::default(),
            synthesize_missing_configs: true,
            panels: Vec::new(),
        }
    }
}

impl RuntimeConfig {
    #[must_use]
    pub fn scheduler(mut self, scheduler: SchedulerSettings) -> Self {
        self.scheduler = scheduler;
        self
    }

    #[must_use]
    pub fn pool(mut self, pool: PoolSettings) -> Self {
        self.pool = pool;
        self
    }

    #[must_use]
    pub fn lifecycle(mut self, lifecycle: LifecycleSettings) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    #[must_use]
    pub fn navigation(mut self, navigation: NavigationSettings) -> Self {
        self.navigation = navigation;
        self
    }

    #[must_use]
    pub fn synthesize_missing_configs(mut self, enabled: bool) -> Self {
        self.synthesize_missing_configs = enabled;
        self
    }

    #[must_use]
    pub fn panel(mut self, panel: PanelConfig) -> Self {
        self.panels.push(panel);
        self
    }

    /// Check every parameter. An empty list means the config is valid.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.scheduler.max_concurrent_loads == 0 {
            errors.push("scheduler.max_concurrent_loads must be > 0".into());
        }
        let timeout = self.scheduler.load_timeout_secs;
        if !timeout.is_finite() || timeout <= 0.0 {
            errors.push(format!(
                "scheduler.load_timeout_secs must be a positive number, got {timeout}"
            ));
        }
        if self.pool.initial_size > self.pool.max_size {
            errors.push(format!(
                "pool.initial_size ({}) exceeds pool.max_size ({})",
                self.pool.initial_size, self.pool.max_size
            ));
        }
        if self.lifecycle.multiple_hard_cap == 0 {
            errors.push("lifecycle.multiple_hard_cap must be > 0".into());
        }
        if self.navigation.max_stack_size == 0 {
            errors.push("navigation.max_stack_size must be > 0".into());
        }
        let interval = self.navigation.cleanup_interval_secs;
        if !interval.is_finite() || interval <= 0.0 {
            errors.push(format!(
                "navigation.cleanup_interval_secs must be a positive number, got {interval}"
            ));
        }

        let mut seen = ahash::AHashSet::new();
        for panel in &self.panels {
            if panel.name.is_empty() {
                errors.push("panels: entry with empty name".into());
                continue;
            }
            if !seen.insert(panel.name.as_str()) {
                errors.push(format!("panels: duplicate name `{}`", panel.name));
            }
            if matches!(
                panel.open_strategy,
                OpenStrategy::Limited | OpenStrategy::Queue
            ) && panel.max_instances == 0
            {
                errors.push(format!(
                    "panels.{}: max_instances must be > 0 for {:?}",
                    panel.name, panel.open_strategy
                ));
            }
        }

        errors
    }

    /// Return `self` if valid, otherwise the collected validation errors.
    pub fn validated(self) -> Result<Self, ConfigError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load from a TOML string.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validated()
    }

    /// Load from a TOML file.
    #[cfg(feature = "config-file")]
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Load from a JSON string.
    #[cfg(feature = "config-file")]
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validated()
    }

    /// Load from a JSON file.
    #[cfg(feature = "config-file")]
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }
}
