#![forbid(unsafe_code)]

//! Unified back-navigation history across open strategies.
//!
//! Every instance the runtime shows is recorded here as a [`NavigationEntry`]
//! tagged with the strategy it was opened under. Entries opened under
//! `Single`, `Stack`, or `Limited` are back-eligible; `Multiple` and `Queue`
//! entries are kept for bookkeeping only.
//!
//! # Resolving "back"
//!
//! Among the back-eligible entries whose instance is currently active, the
//! back target is the entry with the greatest `(priority, timestamp)` key:
//! strategy priority dominates and the most recent entry wins ties.
//!
//! ```text
//! entries (oldest -> newest)      priority  active
//!   Settings  Single   t=1            3       yes
//!   Dialog    Stack    t=2            4       yes   <- back target
//!   Toast     Limited  t=3            2       yes
//!   Chat      Multiple t=4            1       yes   (not eligible)
//! ```
//!
//! The stack never closes instances itself. It answers which instances a
//! back operation should close; the orchestrator performs the close and
//! then calls [`NavigationStack::record_close`].
//!
//! # Invariants
//!
//! 1. `entries` is sorted by timestamp, oldest first.
//! 2. `entries.len() <= settings.max_stack_size` after every operation.
//! 3. At most one entry per instance id.
//! 4. Entries whose instance died outside the navigation API linger only
//!    until the next periodic sweep.

use std::collections::{BTreeMap, VecDeque};

use web_time::Duration;

use crate::clock::Stamp;
use crate::config::{NavigationSettings, OpenStrategy};
use crate::lifecycle::InstanceId;
use crate::panel::Payload;

/// Why and from where a panel was opened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavigationContext {
    /// Panel the user navigated from.
    pub from_ui: Option<String>,
    pub reason: Option<String>,
    pub parameters: BTreeMap<String, String>,
    /// Reopen `from_ui` after this entry is navigated back.
    pub auto_return_to_source: bool,
}

impl NavigationContext {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_ui(mut self, ui_name: impl Into<String>) -> Self {
        self.from_ui = Some(ui_name.into());
        self
    }

    #[must_use]
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn auto_return(mut self, enabled: bool) -> Self {
        self.auto_return_to_source = enabled;
        self
    }
}

/// One recorded open.
#[derive(Debug, Clone)]
pub struct NavigationEntry {
    pub ui_name: String,
    pub instance_id: InstanceId,
    pub open_strategy: OpenStrategy,
    pub payload: Payload,
    pub timestamp: Stamp,
    /// Derived from the strategy.
    pub can_go_back: bool,
    /// Derived from the strategy via the priority table.
    pub priority: u8,
    pub context: NavigationContext,
}

impl NavigationEntry {
    fn back_key(&self) -> (u8, Stamp) {
        (self.priority, self.timestamp)
    }
}

/// Cumulative navigation counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct NavigationStats {
    pub recorded: u64,
    pub closed: u64,
    /// Entries dropped because the history was full.
    pub evicted: u64,
    /// Stale entries purged by the sweep.
    pub swept: u64,
    pub back_navigations: u64,
}

/// Bounded, strategy-aware navigation history.
#[derive(Debug)]
pub struct NavigationStack {
    entries: Vec<NavigationEntry>,
    settings: NavigationSettings,
    since_sweep: Duration,
    pending_returns: VecDeque<String>,
    stats: NavigationStats,
}

impl Default for NavigationStack {
    fn default() -> Self {
        Self::new(NavigationSettings::default())
    }
}

impl NavigationStack {
    #[must_use]
    pub fn new(settings: NavigationSettings) -> Self {
        Self {
            entries: Vec::new(),
            settings,
            since_sweep: Duration::ZERO,
            pending_returns: VecDeque::new(),
            stats: NavigationStats::default(),
        }
    }

    // ========================================================================
    // Recording
    // ========================================================================

    /// Record a shown instance. Returns the entry evicted to stay in budget.
    pub fn record_open(
        &mut self,
        ui_name: &str,
        instance_id: InstanceId,
        open_strategy: OpenStrategy,
        payload: Payload,
        timestamp: Stamp,
        context: NavigationContext,
    ) -> Option<NavigationEntry> {
        self.entries.retain(|e| e.instance_id != instance_id);

        let entry = NavigationEntry {
            ui_name: ui_name.to_owned(),
            instance_id,
            open_strategy,
            payload,
            timestamp,
            can_go_back: open_strategy.is_back_eligible(),
            priority: self.settings.priorities.of(open_strategy),
            context,
        };
        let idx = self.entries.partition_point(|e| e.timestamp <= timestamp);
        self.entries.insert(idx, entry);
        self.stats.recorded += 1;

        if self.entries.len() > self.settings.max_stack_size.max(1) {
            let evicted = self.entries.remove(0);
            self.stats.evicted += 1;
            tracing::debug!(
                ui_name = %evicted.ui_name,
                instance_id = evicted.instance_id.get(),
                "navigation history full, evicted oldest entry"
            );
            return Some(evicted);
        }
        None
    }

    /// Drop the entry for a closed instance.
    pub fn record_close(&mut self, instance_id: InstanceId) -> Option<NavigationEntry> {
        let idx = self
            .entries
            .iter()
            .position(|e| e.instance_id == instance_id)?;
        self.stats.closed += 1;
        Some(self.entries.remove(idx))
    }

    /// Count a completed back navigation.
    pub(crate) fn note_back(&mut self) {
        self.stats.back_navigations += 1;
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Entry a single back step should close.
    pub fn back_target(&self, is_active: impl Fn(InstanceId) -> bool) -> Option<&NavigationEntry> {
        self.entries
            .iter()
            .filter(|e| e.can_go_back && is_active(e.instance_id))
            .max_by_key(|e| e.back_key())
    }

    /// Whether a back step would close anything.
    pub fn can_go_back(&self, is_active: impl Fn(InstanceId) -> bool) -> bool {
        self.back_target(is_active).is_some()
    }

    /// Name of the panel a back step would close.
    pub fn top_ui(&self, is_active: impl Fn(InstanceId) -> bool) -> Option<&str> {
        self.back_target(is_active).map(|e| e.ui_name.as_str())
    }

    /// Newest active instance of `ui_name`: what going back to a panel by
    /// name returns to.
    pub fn go_back_to_target(
        &self,
        ui_name: &str,
        is_active: impl Fn(InstanceId) -> bool,
    ) -> Option<InstanceId> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.ui_name == ui_name && is_active(e.instance_id))
            .map(|e| e.instance_id)
    }

    /// Instances to close, newest first, so that `instance_id` becomes the
    /// newest active back-eligible entry. `None` if it is not active.
    pub fn go_back_to_instance_plan(
        &self,
        instance_id: InstanceId,
        is_active: impl Fn(InstanceId) -> bool,
    ) -> Option<Vec<InstanceId>> {
        let target = self
            .entries
            .iter()
            .find(|e| e.instance_id == instance_id && is_active(e.instance_id))?;
        Some(self.newer_backable(target.timestamp, &is_active))
    }

    /// Every active back-eligible instance, newest first.
    pub fn backable_plan(&self, is_active: impl Fn(InstanceId) -> bool) -> Vec<InstanceId> {
        self.entries
            .iter()
            .rev()
            .filter(|e| e.can_go_back && is_active(e.instance_id))
            .map(|e| e.instance_id)
            .collect()
    }

    fn newer_backable(
        &self,
        after: Stamp,
        is_active: &impl Fn(InstanceId) -> bool,
    ) -> Vec<InstanceId> {
        self.entries
            .iter()
            .rev()
            .filter(|e| e.timestamp > after && e.can_go_back && is_active(e.instance_id))
            .map(|e| e.instance_id)
            .collect()
    }

    /// Entry for an instance.
    #[must_use]
    pub fn entry(&self, instance_id: InstanceId) -> Option<&NavigationEntry> {
        self.entries.iter().find(|e| e.instance_id == instance_id)
    }

    /// Entries oldest first.
    #[must_use]
    pub fn entries(&self) -> &[NavigationEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> &NavigationStats {
        &self.stats
    }

    #[must_use]
    pub fn settings(&self) -> &NavigationSettings {
        &self.settings
    }

    // ========================================================================
    // Deferred work
    // ========================================================================

    /// Queue a reopen of `ui_name` for the next tick.
    pub fn schedule_return(&mut self, ui_name: &str) {
        tracing::debug!(ui_name, "auto return scheduled");
        self.pending_returns.push_back(ui_name.to_owned());
    }

    /// Take every queued reopen, in scheduling order.
    pub fn take_pending_returns(&mut self) -> Vec<String> {
        self.pending_returns.drain(..).collect()
    }

    #[must_use]
    pub fn pending_return_count(&self) -> usize {
        self.pending_returns.len()
    }

    /// Purge entries whose instance is gone. Returns the number purged.
    pub fn sweep(&mut self, is_alive: impl Fn(InstanceId) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| is_alive(e.instance_id));
        let purged = before - self.entries.len();
        if purged > 0 {
            self.stats.swept += purged as u64;
            tracing::debug!(purged, "swept stale navigation entries");
        }
        purged
    }

    /// Advance the sweep timer and sweep when the interval has elapsed.
    pub fn tick(&mut self, delta: Duration, is_alive: impl Fn(InstanceId) -> bool) -> usize {
        self.since_sweep = self.since_sweep.saturating_add(delta);
        if self.since_sweep < self.settings.cleanup_interval_duration() {
            return 0;
        }
        self.since_sweep = Duration::ZERO;
        self.sweep(is_alive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SessionClock;
    use std::collections::HashSet;

    struct Fixture {
        stack: NavigationStack,
        clock: SessionClock,
        next: u64,
    }

    impl Fixture {
        fn new(settings: NavigationSettings) -> Self {
            Self {
                stack: NavigationStack::new(settings),
                clock: SessionClock::new(),
                next: 0,
            }
        }

        fn open(&mut self, name: &str, strategy: OpenStrategy) -> InstanceId {
            self.next += 1;
            let id = InstanceId(self.next);
            let stamp = self.clock.stamp();
            self.stack.record_open(
                name,
                id,
                strategy,
                Payload::none(),
                stamp,
                NavigationContext::default(),
            );
            id
        }
    }

    fn all(_: InstanceId) -> bool {
        true
    }

    #[test]
    fn empty_stack_cannot_go_back() {
        let stack = NavigationStack::default();
        assert!(!stack.can_go_back(all));
        assert!(stack.top_ui(all).is_none());
    }

    #[test]
    fn non_eligible_entries_are_tracked_but_not_targets() {
        let mut f = Fixture::new(NavigationSettings::default());
        f.open("Chat", OpenStrategy::Multiple);
        f.open("Toast", OpenStrategy::Queue);
        assert_eq!(f.stack.len(), 2);
        assert!(!f.stack.can_go_back(all));
    }

    #[test]
    fn priority_dominates_timestamp() {
        let mut f = Fixture::new(NavigationSettings::default());
        let dialog = f.open("Dialog", OpenStrategy::Stack);
        f.open("Settings", OpenStrategy::Single);
        f.open("Toast", OpenStrategy::Limited);
        let target = f.stack.back_target(all).unwrap();
        assert_eq!(target.instance_id, dialog);
    }

    #[test]
    fn latest_timestamp_breaks_ties() {
        let mut f = Fixture::new(NavigationSettings::default());
        f.open("A", OpenStrategy::Single);
        let b = f.open("B", OpenStrategy::Single);
        assert_eq!(f.stack.back_target(all).unwrap().instance_id, b);
        assert_eq!(f.stack.top_ui(all), Some("B"));
    }

    #[test]
    fn inactive_entries_are_skipped() {
        let mut f = Fixture::new(NavigationSettings::default());
        let a = f.open("A", OpenStrategy::Stack);
        let b = f.open("B", OpenStrategy::Stack);
        let target = f.stack.back_target(|id| id != b).unwrap();
        assert_eq!(target.instance_id, a);
    }

    #[test]
    fn record_close_removes_entry() {
        let mut f = Fixture::new(NavigationSettings::default());
        let a = f.open("A", OpenStrategy::Single);
        assert!(f.stack.record_close(a).is_some());
        assert!(f.stack.record_close(a).is_none());
        assert!(f.stack.is_empty());
        assert_eq!(f.stack.stats().closed, 1);
    }

    #[test]
    fn capacity_evicts_globally_oldest() {
        let mut f = Fixture::new(NavigationSettings::default().max_stack_size(3));
        let first = f.open("Chat", OpenStrategy::Multiple);
        f.open("A", OpenStrategy::Stack);
        f.open("B", OpenStrategy::Single);
        f.open("C", OpenStrategy::Limited);
        assert_eq!(f.stack.len(), 3);
        assert!(f.stack.entry(first).is_none());
        assert_eq!(f.stack.stats().evicted, 1);
    }

    #[test]
    fn go_back_to_closes_newer_eligible_entries_newest_first() {
        let mut f = Fixture::new(NavigationSettings::default());
        f.open("Home", OpenStrategy::Single);
        f.open("Shop", OpenStrategy::Single);
        let chat = f.open("Chat", OpenStrategy::Multiple);
        let dialog = f.open("Dialog", OpenStrategy::Stack);
        let toast = f.open("Toast", OpenStrategy::Limited);

        let shop = f.stack.go_back_to_target("Shop", all).unwrap();
        let plan = f.stack.go_back_to_instance_plan(shop, all).unwrap();
        assert_eq!(plan, vec![toast, dialog]);
        assert!(!plan.contains(&chat));
    }

    #[test]
    fn go_back_to_unknown_name_is_none() {
        let mut f = Fixture::new(NavigationSettings::default());
        f.open("Home", OpenStrategy::Single);
        assert!(f.stack.go_back_to_target("Missing", all).is_none());
    }

    #[test]
    fn go_back_to_picks_newest_generation() {
        let mut f = Fixture::new(NavigationSettings::default());
        let old = f.open("List", OpenStrategy::Limited);
        let mid = f.open("Detail", OpenStrategy::Single);
        let new = f.open("List", OpenStrategy::Limited);
        let after = f.open("Popup", OpenStrategy::Single);

        assert_eq!(f.stack.go_back_to_target("List", all), Some(new));
        assert_eq!(f.stack.go_back_to_instance_plan(new, all).unwrap(), vec![after]);
        assert_eq!(
            f.stack.go_back_to_instance_plan(old, all).unwrap(),
            vec![after, new, mid]
        );
    }

    #[test]
    fn backable_plan_is_newest_first() {
        let mut f = Fixture::new(NavigationSettings::default());
        let a = f.open("A", OpenStrategy::Single);
        f.open("Chat", OpenStrategy::Multiple);
        let b = f.open("B", OpenStrategy::Stack);
        assert_eq!(f.stack.backable_plan(all), vec![b, a]);
    }

    #[test]
    fn sweep_runs_on_interval() {
        let mut f = Fixture::new(
            NavigationSettings::default().cleanup_interval(Duration::from_secs(1)),
        );
        let a = f.open("A", OpenStrategy::Single);
        f.open("B", OpenStrategy::Single);
        let alive: HashSet<InstanceId> = HashSet::new();

        assert_eq!(
            f.stack.tick(Duration::from_millis(500), |id| alive.contains(&id)),
            0
        );
        assert_eq!(f.stack.len(), 2);
        assert_eq!(
            f.stack.tick(Duration::from_millis(500), |id| id == a),
            1
        );
        assert_eq!(f.stack.len(), 1);
        assert_eq!(f.stack.stats().swept, 1);
    }

    #[test]
    fn pending_returns_drain_in_order() {
        let mut stack = NavigationStack::default();
        stack.schedule_return("Home");
        stack.schedule_return("Shop");
        assert_eq!(stack.pending_return_count(), 2);
        assert_eq!(stack.take_pending_returns(), vec!["Home", "Shop"]);
        assert_eq!(stack.pending_return_count(), 0);
    }

    #[test]
    fn rerecording_an_instance_replaces_its_entry() {
        let mut f = Fixture::new(NavigationSettings::default());
        let a = f.open("A", OpenStrategy::Single);
        let stamp = f.clock.stamp();
        f.stack.record_open(
            "A",
            a,
            OpenStrategy::Single,
            Payload::none(),
            stamp,
            NavigationContext::default(),
        );
        assert_eq!(f.stack.len(), 1);
        assert_eq!(f.stack.entry(a).unwrap().timestamp, stamp);
    }

    #[test]
    fn context_builder() {
        let ctx = NavigationContext::new()
            .from_ui("Home")
            .reason("deep link")
            .param("tab", "weapons")
            .auto_return(true);
        assert_eq!(ctx.from_ui.as_deref(), Some("Home"));
        assert_eq!(ctx.parameters.get("tab").map(String::as_str), Some("weapons"));
        assert!(ctx.auto_return_to_source);
    }
}
