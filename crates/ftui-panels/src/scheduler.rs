#![forbid(unsafe_code)]

//! Priority-ordered, concurrency-bounded panel load scheduler.
//!
//! Open requests that need an asynchronous asset load become
//! [`LoadRequest`]s. The scheduler keeps them in two sets:
//!
//! - a **waiting list**, ordered by priority (higher first) and by arrival
//!   among equal priorities, and
//! - a **loading set**, never larger than `max_concurrent_loads`.
//!
//! Each request moves through an explicit state machine:
//!
//! ```text
//!            submit             slot frees (tick)
//!   ──────► Pending ───────────────────────────► Loading
//!              │                                   │
//!              │ cancel / timeout        ticket complete / fail / timeout / cancel
//!              ▼                                   ▼
//!      Cancelled | Failed              Completed | Failed | Cancelled
//! ```
//!
//! Nothing suspends. The host calls [`LoadScheduler::tick`] once per frame;
//! each tick applies the completion signals the asset source sent since the
//! last tick, fails requests that exceeded their budget, and promotes
//! waiting requests into free slots. Synchronous requests bypass the queue
//! through [`LoadScheduler::load_sync`] and resolve inline.
//!
//! # Invariants
//!
//! 1. `loading.len() <= max_concurrent_loads` after every public call.
//! 2. The waiting list is sorted by priority, stable by arrival (when the
//!    priority queue is enabled; FIFO otherwise).
//! 3. No two in-flight requests share `(ui_name, payload identity)`.
//! 4. A request leaves the scheduler exactly once, in a terminal state.
//!
//! # Failure Modes
//!
//! | Condition | Behavior |
//! |-----------|----------|
//! | Identical request in flight | New request fails with `DuplicateRequest` |
//! | Budget exceeded (waiting or loading) | Fails with `Timeout`, token cancelled |
//! | Source returns `None` / ticket fails | Fails with `AssetLoadFailure` |
//! | Signal for unknown request | Ignored (cancelled or timed out earlier) |

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, Sender};

use web_time::Duration;

use crate::cancellation::CancellationSource;
use crate::config::{LoadMode, PanelConfig, SchedulerSettings};
use crate::error::{PanelError, Result};
use crate::lifecycle::InstanceId;
use crate::navigation::NavigationContext;
use crate::panel::{LoadSignal, LoadTicket, PanelAssetSource, PanelHandle, Payload};

/// Identifier of a load request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RequestId(pub(crate) u64);

impl RequestId {
    const UNASSIGNED: Self = Self(0);

    /// Raw id value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Load request state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum LoadState {
    Pending,
    Loading,
    Completed,
    Failed,
    Cancelled,
}

impl LoadState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

type SuccessFn = Box<dyn FnOnce(InstanceId)>;
type FailureFn = Box<dyn FnOnce(&PanelError)>;
type ProgressFn = Box<dyn FnMut(f32)>;
/// Receives the name of the cancelled panel.
type CancelFn = Box<dyn FnOnce(&str)>;

/// Caller callbacks attached to a request.
///
/// Success fires only after the instance is shown and recorded in history.
/// At most one of success, failure, or cancel fires.
#[derive(Default)]
pub struct LoadCallbacks {
    on_success: Option<SuccessFn>,
    on_failure: Option<FailureFn>,
    on_progress: Option<ProgressFn>,
    on_cancel: Option<CancelFn>,
}

impl fmt::Debug for LoadCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadCallbacks")
            .field("on_success", &self.on_success.is_some())
            .field("on_failure", &self.on_failure.is_some())
            .field("on_progress", &self.on_progress.is_some())
            .field("on_cancel", &self.on_cancel.is_some())
            .finish()
    }
}

impl LoadCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_success(mut self, f: impl FnOnce(InstanceId) + 'static) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_failure(mut self, f: impl FnOnce(&PanelError) + 'static) -> Self {
        self.on_failure = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_progress(mut self, f: impl FnMut(f32) + 'static) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_cancel(mut self, f: impl FnOnce() + 'static) -> Self {
        self.on_cancel = Some(Box::new(move |_: &str| f()));
        self
    }

    /// Deliver a failure that happened before a request existed.
    pub(crate) fn notify_failure(mut self, error: &PanelError) {
        if let Some(f) = self.on_failure.take() {
            f(error);
        }
    }

    /// Single completion callback receiving the outcome, cancellation
    /// included.
    pub fn on_complete(f: impl FnOnce(Result<InstanceId>) + 'static) -> Self {
        type CompleteFn = Box<dyn FnOnce(Result<InstanceId>)>;
        let slot: Rc<RefCell<Option<CompleteFn>>> = Rc::new(RefCell::new(Some(Box::new(f))));
        let on_fail = Rc::clone(&slot);
        let on_cancel = Rc::clone(&slot);
        let mut callbacks = Self::new()
            .on_success(move |id| {
                let taken = slot.borrow_mut().take();
                if let Some(f) = taken {
                    f(Ok(id));
                }
            })
            .on_failure(move |err| {
                let taken = on_fail.borrow_mut().take();
                if let Some(f) = taken {
                    f(Err(err.clone()));
                }
            });
        callbacks.on_cancel = Some(Box::new(move |ui_name: &str| {
            let taken = on_cancel.borrow_mut().take();
            if let Some(f) = taken {
                f(Err(PanelError::Cancelled {
                    ui_name: ui_name.to_owned(),
                }));
            }
        }));
        callbacks
    }
}

/// One scheduled unit of work: obtain a panel, then become an instance.
pub struct LoadRequest {
    id: RequestId,
    ui_name: String,
    load_mode: LoadMode,
    payload: Payload,
    config: PanelConfig,
    priority: i32,
    cancelable: bool,
    state: LoadState,
    progress: f32,
    context: NavigationContext,
    callbacks: LoadCallbacks,
    submitted_at: Duration,
    cancel: Option<CancellationSource>,
}

impl fmt::Debug for LoadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadRequest")
            .field("id", &self.id)
            .field("ui_name", &self.ui_name)
            .field("load_mode", &self.load_mode)
            .field("priority", &self.priority)
            .field("cancelable", &self.cancelable)
            .field("state", &self.state)
            .field("progress", &self.progress)
            .finish_non_exhaustive()
    }
}

impl LoadRequest {
    /// New request for `config.name`, async and cancelable by default.
    pub fn new(config: PanelConfig, payload: Payload) -> Self {
        Self {
            id: RequestId::UNASSIGNED,
            ui_name: config.name.clone(),
            load_mode: config.default_load_mode,
            payload,
            config,
            priority: 0,
            cancelable: true,
            state: LoadState::Pending,
            progress: 0.0,
            context: NavigationContext::default(),
            callbacks: LoadCallbacks::default(),
            submitted_at: Duration::ZERO,
            cancel: None,
        }
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
    pub fn load_mode(mut self, mode: LoadMode) -> Self {
        self.load_mode = mode;
        self
    }

    #[must_use]
    pub fn context(mut self, context: NavigationContext) -> Self {
        self.context = context;
        self
    }

    #[must_use]
    pub fn callbacks(mut self, callbacks: LoadCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn ui_name(&self) -> &str {
        &self.ui_name
    }

    pub fn mode(&self) -> LoadMode {
        self.load_mode
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn config(&self) -> &PanelConfig {
        &self.config
    }

    pub fn navigation_context(&self) -> &NavigationContext {
        &self.context
    }

    pub fn request_priority(&self) -> i32 {
        self.priority
    }

    pub fn is_cancelable(&self) -> bool {
        self.cancelable
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    /// Last reported progress in `[0, 1]`.
    pub fn progress(&self) -> f32 {
        self.progress
    }

    fn same_work(&self, other: &Self) -> bool {
        self.ui_name == other.ui_name && self.payload.same_identity(&other.payload)
    }

    pub(crate) fn notify_success(&mut self, instance: InstanceId) {
        self.on_terminal();
        if let Some(f) = self.callbacks.on_success.take() {
            f(instance);
        }
    }

    pub(crate) fn notify_failure(&mut self, error: &PanelError) {
        self.state = LoadState::Failed;
        self.on_terminal();
        if let Some(f) = self.callbacks.on_failure.take() {
            f(error);
        }
    }

    fn notify_progress(&mut self, progress: f32) {
        self.progress = progress;
        if let Some(f) = self.callbacks.on_progress.as_mut() {
            f(progress);
        }
    }

    fn notify_cancel(&mut self) {
        self.state = LoadState::Cancelled;
        if let Some(source) = &self.cancel {
            source.cancel();
        }
        self.on_terminal();
        if let Some(f) = self.callbacks.on_cancel.take() {
            f(&self.ui_name);
        }
    }

    fn on_terminal(&mut self) {
        self.callbacks.on_progress = None;
    }
}

/// Request that finished loading (one way or the other).
pub enum LoadOutcome {
    /// The asset arrived; the request is waiting to become an instance.
    Loaded {
        request: LoadRequest,
        handle: PanelHandle,
    },
    /// The request failed in the scheduler or the asset source.
    Failed {
        request: LoadRequest,
        error: PanelError,
    },
}

impl fmt::Debug for LoadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loaded { request, .. } => f
                .debug_struct("Loaded")
                .field("request", request)
                .finish_non_exhaustive(),
            Self::Failed { request, error } => f
                .debug_struct("Failed")
                .field("request", request)
                .field("error", error)
                .finish(),
        }
    }
}

impl LoadOutcome {
    pub fn request(&self) -> &LoadRequest {
        match self {
            Self::Loaded { request, .. } | Self::Failed { request, .. } => request,
        }
    }
}

/// Request refused at submission.
#[derive(Debug)]
pub struct Rejected {
    pub request: LoadRequest,
    pub error: PanelError,
}

/// Queue snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct QueueStatus {
    pub waiting: usize,
    pub loading: usize,
    pub max_concurrent_loads: usize,
}

/// Cumulative scheduler counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SchedulerStats {
    pub submitted: u64,
    pub sync_loads: u64,
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub timed_out: u64,
    pub duplicates: u64,
    /// Largest loading-set size observed.
    pub peak_loading: usize,
}

/// Load scheduler.
pub struct LoadScheduler {
    settings: SchedulerSettings,
    waiting: VecDeque<LoadRequest>,
    loading: Vec<LoadRequest>,
    sender: Sender<LoadSignal>,
    signals: Receiver<LoadSignal>,
    elapsed: Duration,
    next_id: u64,
    stats: SchedulerStats,
}

impl fmt::Debug for LoadScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadScheduler")
            .field("waiting", &self.waiting.len())
            .field("loading", &self.loading.len())
            .field("elapsed", &self.elapsed)
            .field("settings", &self.settings)
            .finish()
    }
}

impl Default for LoadScheduler {
    fn default() -> Self {
        Self::new(SchedulerSettings::default())
    }
}

impl LoadScheduler {
    #[must_use]
    pub fn new(settings: SchedulerSettings) -> Self {
        let (sender, signals) = mpsc::channel();
        Self {
            settings,
            waiting: VecDeque::new(),
            loading: Vec::new(),
            sender,
            signals,
            elapsed: Duration::ZERO,
            next_id: 0,
            stats: SchedulerStats::default(),
        }
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Queue an asynchronous request. It starts on a later tick.
    pub fn submit(&mut self, mut request: LoadRequest) -> std::result::Result<RequestId, Rejected> {
        request.id = self.allocate_id();
        request.load_mode = LoadMode::Async;
        self.stats.submitted += 1;

        if let Err(error) = self.check_duplicate(&request) {
            request.state = LoadState::Failed;
            return Err(Rejected { request, error });
        }

        request.state = LoadState::Pending;
        request.submitted_at = self.elapsed;
        let id = request.id;

        let idx = if self.settings.enable_priority_queue {
            self.waiting
                .iter()
                .position(|r| r.priority < request.priority)
                .unwrap_or(self.waiting.len())
        } else {
            self.waiting.len()
        };
        tracing::debug!(
            request_id = id.get(),
            ui_name = %request.ui_name,
            priority = request.priority,
            position = idx,
            "load request queued"
        );
        self.waiting.insert(idx, request);
        Ok(id)
    }

    /// Run a synchronous request inline, bypassing the waiting list.
    pub fn load_sync(
        &mut self,
        mut request: LoadRequest,
        source: &mut dyn PanelAssetSource,
    ) -> LoadOutcome {
        request.id = self.allocate_id();
        request.load_mode = LoadMode::Sync;
        self.stats.submitted += 1;
        self.stats.sync_loads += 1;

        if let Err(error) = self.check_duplicate(&request) {
            request.state = LoadState::Failed;
            return LoadOutcome::Failed { request, error };
        }

        request.state = LoadState::Loading;
        let _span = tracing::debug_span!(
            "panel.load_sync",
            request_id = request.id.get(),
            ui_name = %request.ui_name
        )
        .entered();
        match source.load_sync(&request.ui_name, &request.config) {
            Some(handle) => {
                request.state = LoadState::Completed;
                request.progress = 1.0;
                self.stats.completed += 1;
                LoadOutcome::Loaded { request, handle }
            }
            None => {
                request.state = LoadState::Failed;
                self.stats.failed += 1;
                tracing::warn!(ui_name = %request.ui_name, "asset source returned no panel");
                let error = PanelError::asset(&request.ui_name, "asset source returned no panel");
                LoadOutcome::Failed { request, error }
            }
        }
    }

    fn allocate_id(&mut self) -> RequestId {
        self.next_id += 1;
        RequestId(self.next_id)
    }

    fn check_duplicate(&mut self, request: &LoadRequest) -> Result<()> {
        let duplicate = self
            .waiting
            .iter()
            .chain(self.loading.iter())
            .any(|r| r.same_work(request));
        if duplicate {
            self.stats.duplicates += 1;
            tracing::warn!(ui_name = %request.ui_name, "duplicate load request rejected");
            return Err(PanelError::DuplicateRequest {
                ui_name: request.ui_name.clone(),
            });
        }
        Ok(())
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    /// Cancel a waiting or loading request. Returns `false` if the request is
    /// unknown, already finished, or not cancelable.
    pub fn cancel(&mut self, id: RequestId) -> bool {
        if let Some(idx) = self.waiting.iter().position(|r| r.id == id) {
            if !self.waiting[idx].cancelable {
                return false;
            }
            if let Some(request) = self.waiting.remove(idx) {
                self.finish_cancel(request);
            }
            return true;
        }
        if let Some(idx) = self.loading.iter().position(|r| r.id == id) {
            if !self.loading[idx].cancelable {
                return false;
            }
            let request = self.loading.remove(idx);
            self.finish_cancel(request);
            return true;
        }
        false
    }

    /// Cancel every cancelable request for `ui_name`. Returns the count.
    pub fn cancel_all_for(&mut self, ui_name: &str) -> usize {
        let ids: Vec<RequestId> = self
            .waiting
            .iter()
            .chain(self.loading.iter())
            .filter(|r| r.ui_name == ui_name && r.cancelable)
            .map(|r| r.id)
            .collect();
        ids.into_iter().filter(|id| self.cancel(*id)).count()
    }

    /// Cancel everything in flight, cancelable or not. Used at shutdown.
    pub fn cancel_all(&mut self) -> usize {
        let mut count = 0;
        let drained: Vec<LoadRequest> = self
            .waiting
            .drain(..)
            .chain(self.loading.drain(..))
            .collect();
        for request in drained {
            self.finish_cancel(request);
            count += 1;
        }
        count
    }

    fn finish_cancel(&mut self, mut request: LoadRequest) {
        tracing::debug!(
            request_id = request.id.get(),
            ui_name = %request.ui_name,
            "load request cancelled"
        );
        self.stats.cancelled += 1;
        request.notify_cancel();
    }

    // ========================================================================
    // Tick
    // ========================================================================

    /// Advance the scheduler by `delta`.
    ///
    /// Applies completion signals, fails requests past their budget, and
    /// promotes waiting requests into free slots, in that order. Returns the
    /// requests that left the scheduler during this tick.
    pub fn tick(
        &mut self,
        delta: Duration,
        source: &mut dyn PanelAssetSource,
    ) -> Vec<LoadOutcome> {
        self.elapsed = self.elapsed.saturating_add(delta);
        let mut outcomes = Vec::new();
        self.drain_signals(&mut outcomes);
        self.expire(&mut outcomes);
        self.pump(source);
        outcomes
    }

    /// Start waiting requests while slots are free. Returns how many started.
    pub fn pump(&mut self, source: &mut dyn PanelAssetSource) -> usize {
        let mut started = 0;
        while self.loading.len() < self.settings.slots() {
            let Some(mut request) = self.waiting.pop_front() else {
                break;
            };
            let cancel = CancellationSource::new();
            let ticket = LoadTicket::new(
                request.id,
                &request.ui_name,
                self.sender.clone(),
                cancel.token(),
            );
            request.state = LoadState::Loading;
            request.cancel = Some(cancel);
            tracing::debug!(
                request_id = request.id.get(),
                ui_name = %request.ui_name,
                priority = request.priority,
                "load started"
            );
            source.load_async(&request.ui_name, &request.config, ticket);
            self.loading.push(request);
            self.stats.started += 1;
            started += 1;
        }
        self.stats.peak_loading = self.stats.peak_loading.max(self.loading.len());
        started
    }

    fn drain_signals(&mut self, outcomes: &mut Vec<LoadOutcome>) {
        while let Ok(signal) = self.signals.try_recv() {
            match signal {
                LoadSignal::Progress { id, progress } => {
                    if let Some(request) = self.loading.iter_mut().find(|r| r.id == id) {
                        request.notify_progress(progress);
                    }
                }
                LoadSignal::Loaded { id, mut handle } => {
                    let Some(mut request) = self.take_loading(id) else {
                        tracing::debug!(request_id = id.get(), "late completion disposed");
                        handle.dispose();
                        continue;
                    };
                    request.state = LoadState::Completed;
                    request.progress = 1.0;
                    self.stats.completed += 1;
                    tracing::debug!(
                        request_id = id.get(),
                        ui_name = %request.ui_name,
                        "load completed"
                    );
                    outcomes.push(LoadOutcome::Loaded { request, handle });
                }
                LoadSignal::Failed { id, reason } => {
                    let Some(mut request) = self.take_loading(id) else {
                        continue;
                    };
                    request.state = LoadState::Failed;
                    self.stats.failed += 1;
                    tracing::warn!(
                        request_id = id.get(),
                        ui_name = %request.ui_name,
                        %reason,
                        "load failed"
                    );
                    let error = PanelError::asset(&request.ui_name, reason);
                    outcomes.push(LoadOutcome::Failed { request, error });
                }
            }
        }
    }

    fn expire(&mut self, outcomes: &mut Vec<LoadOutcome>) {
        let budget = self.settings.timeout();
        let now = self.elapsed;
        let overdue = |r: &LoadRequest| now.saturating_sub(r.submitted_at) >= budget;

        let mut expired = Vec::new();
        let mut i = 0;
        while i < self.waiting.len() {
            if overdue(&self.waiting[i]) {
                if let Some(request) = self.waiting.remove(i) {
                    expired.push(request);
                }
            } else {
                i += 1;
            }
        }
        let mut i = 0;
        while i < self.loading.len() {
            if overdue(&self.loading[i]) {
                expired.push(self.loading.remove(i));
            } else {
                i += 1;
            }
        }

        for mut request in expired {
            if let Some(source) = &request.cancel {
                source.cancel();
            }
            let waited = now.saturating_sub(request.submitted_at);
            request.state = LoadState::Failed;
            self.stats.timed_out += 1;
            self.stats.failed += 1;
            tracing::warn!(
                request_id = request.id.get(),
                ui_name = %request.ui_name,
                ?waited,
                "load timed out"
            );
            let error = PanelError::Timeout {
                ui_name: request.ui_name.clone(),
                waited,
            };
            outcomes.push(LoadOutcome::Failed { request, error });
        }
    }

    fn take_loading(&mut self, id: RequestId) -> Option<LoadRequest> {
        let idx = self.loading.iter().position(|r| r.id == id)?;
        Some(self.loading.remove(idx))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    #[must_use]
    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    #[must_use]
    pub fn loading_len(&self) -> usize {
        self.loading.len()
    }

    /// Waiting request ids in service order.
    #[must_use]
    pub fn waiting_ids(&self) -> Vec<RequestId> {
        self.waiting.iter().map(|r| r.id).collect()
    }

    /// Loading request ids in start order.
    #[must_use]
    pub fn loading_ids(&self) -> Vec<RequestId> {
        self.loading.iter().map(|r| r.id).collect()
    }

    /// In-flight request by id.
    #[must_use]
    pub fn request(&self, id: RequestId) -> Option<&LoadRequest> {
        self.waiting
            .iter()
            .chain(self.loading.iter())
            .find(|r| r.id == id)
    }

    /// Whether any request for `ui_name` is waiting or loading.
    #[must_use]
    pub fn is_in_flight(&self, ui_name: &str) -> bool {
        self.waiting
            .iter()
            .chain(self.loading.iter())
            .any(|r| r.ui_name == ui_name)
    }

    #[must_use]
    pub fn status(&self) -> QueueStatus {
        QueueStatus {
            waiting: self.waiting.len(),
            loading: self.loading.len(),
            max_concurrent_loads: self.settings.slots(),
        }
    }

    #[must_use]
    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    #[must_use]
    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Scheduler-local session time.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::{Panel, PanelCaps};
    use std::cell::Cell;

    struct Inert;

    impl Panel for Inert {
        fn capabilities(&self) -> PanelCaps {
            PanelCaps::VISIBILITY
        }
        fn show(&mut self, _: Option<&str>) -> std::result::Result<(), String> {
            Ok(())
        }
        fn hide(&mut self, _: Option<&str>) {}
    }

    /// Holds tickets until the test resolves them.
    #[derive(Default)]
    struct Deferred {
        tickets: Vec<LoadTicket>,
        sync_ok: bool,
    }

    impl PanelAssetSource for Deferred {
        fn load_sync(&mut self, _: &str, _: &PanelConfig) -> Option<PanelHandle> {
            self.sync_ok.then(|| Box::new(Inert) as PanelHandle)
        }
        fn load_async(&mut self, _: &str, _: &PanelConfig, ticket: LoadTicket) {
            self.tickets.push(ticket);
        }
    }

    impl Deferred {
        fn complete_all(&mut self) {
            for ticket in self.tickets.drain(..) {
                ticket.complete(Box::new(Inert));
            }
        }
    }

    fn request(name: &str, priority: i32) -> LoadRequest {
        LoadRequest::new(PanelConfig::new(name), Payload::none()).priority(priority)
    }

    fn names(outcomes: &[LoadOutcome]) -> Vec<String> {
        outcomes
            .iter()
            .map(|o| o.request().ui_name().to_owned())
            .collect()
    }

    const FRAME: Duration = Duration::from_millis(16);

    #[test]
    fn waiting_list_is_priority_ordered_and_stable() {
        let mut sched = LoadScheduler::new(SchedulerSettings::default());
        let a = sched.submit(request("a", 1)).unwrap();
        let b = sched.submit(request("b", 5)).unwrap();
        let c = sched.submit(request("c", 1)).unwrap();
        let d = sched.submit(request("d", 5)).unwrap();
        assert_eq!(sched.waiting_ids(), vec![b, d, a, c]);
    }

    #[test]
    fn fifo_when_priority_queue_disabled() {
        let mut sched = LoadScheduler::new(SchedulerSettings::default().priority_queue(false));
        let a = sched.submit(request("a", 1)).unwrap();
        let b = sched.submit(request("b", 9)).unwrap();
        assert_eq!(sched.waiting_ids(), vec![a, b]);
    }

    #[test]
    fn loading_set_is_bounded() {
        let mut sched = LoadScheduler::new(SchedulerSettings::default().max_concurrent_loads(2));
        let mut source = Deferred::default();
        for i in 0..6 {
            sched.submit(request(&format!("p{i}"), i)).unwrap();
        }
        sched.tick(FRAME, &mut source);
        assert_eq!(sched.loading_len(), 2);
        assert_eq!(sched.waiting_len(), 4);
        assert_eq!(source.tickets.len(), 2);
        assert_eq!(sched.stats().peak_loading, 2);
    }

    #[test]
    fn completion_order_follows_priority() {
        let mut sched = LoadScheduler::new(SchedulerSettings::default().max_concurrent_loads(2));
        let mut source = Deferred::default();
        for p in [1, 5, 3, 2, 4] {
            sched.submit(request(&format!("p{p}"), p)).unwrap();
        }
        let mut order = Vec::new();
        sched.tick(FRAME, &mut source);
        for _ in 0..4 {
            assert!(sched.loading_len() <= 2);
            source.complete_all();
            order.extend(names(&sched.tick(FRAME, &mut source)));
        }
        assert_eq!(order, vec!["p5", "p4", "p3", "p2", "p1"]);
    }

    #[test]
    fn duplicate_in_flight_is_rejected() {
        let mut sched = LoadScheduler::default();
        let payload = Payload::new(7_u8);
        sched
            .submit(LoadRequest::new(PanelConfig::new("Shop"), payload.clone()))
            .unwrap();
        let rejected = sched
            .submit(LoadRequest::new(PanelConfig::new("Shop"), payload))
            .unwrap_err();
        assert!(matches!(rejected.error, PanelError::DuplicateRequest { .. }));
        assert_eq!(rejected.request.state(), LoadState::Failed);
        assert_eq!(sched.waiting_len(), 1);
        assert_eq!(sched.stats().duplicates, 1);

        // Different payload identity is different work.
        assert!(
            sched
                .submit(LoadRequest::new(PanelConfig::new("Shop"), Payload::new(7_u8)))
                .is_ok()
        );
    }

    #[test]
    fn duplicate_check_covers_loading_set() {
        let mut sched = LoadScheduler::default();
        let mut source = Deferred::default();
        sched.submit(request("Shop", 0)).unwrap();
        sched.tick(FRAME, &mut source);
        assert_eq!(sched.loading_len(), 1);
        assert!(sched.submit(request("Shop", 0)).is_err());
        let outcome = sched.load_sync(request("Shop", 0), &mut source);
        assert!(matches!(
            outcome,
            LoadOutcome::Failed {
                error: PanelError::DuplicateRequest { .. },
                ..
            }
        ));
    }

    #[test]
    fn sync_load_bypasses_queue() {
        let mut sched = LoadScheduler::new(SchedulerSettings::default().max_concurrent_loads(1));
        let mut source = Deferred {
            sync_ok: true,
            ..Deferred::default()
        };
        sched.submit(request("busy", 0)).unwrap();
        sched.tick(FRAME, &mut source);

        let outcome = sched.load_sync(request("Settings", 0), &mut source);
        assert!(matches!(outcome, LoadOutcome::Loaded { .. }));
        assert_eq!(outcome.request().state(), LoadState::Completed);
        assert_eq!(sched.loading_len(), 1);
    }

    #[test]
    fn sync_null_is_asset_failure() {
        let mut sched = LoadScheduler::default();
        let mut source = Deferred::default();
        let outcome = sched.load_sync(request("Missing", 0), &mut source);
        match outcome {
            LoadOutcome::Failed { error, .. } => {
                assert!(matches!(error, PanelError::AssetLoadFailure { .. }));
            }
            LoadOutcome::Loaded { .. } => panic!("expected failure"),
        }
    }

    #[test]
    fn cancel_waiting_and_loading() {
        let mut sched = LoadScheduler::new(SchedulerSettings::default().max_concurrent_loads(1));
        let mut source = Deferred::default();
        let cancelled = Rc::new(Cell::new(0));
        let hits = Rc::clone(&cancelled);
        let first = sched
            .submit(request("a", 2).callbacks(LoadCallbacks::new().on_cancel(move || {
                hits.set(hits.get() + 1);
            })))
            .unwrap();
        let second = sched.submit(request("b", 1)).unwrap();
        sched.tick(FRAME, &mut source);
        assert_eq!(sched.loading_ids(), vec![first]);

        assert!(sched.cancel(first));
        assert_eq!(cancelled.get(), 1);
        assert!(source.tickets[0].is_cancelled());
        assert!(!sched.cancel(first));

        // Completion after cancel is ignored; the freed slot goes to `b`.
        source.complete_all();
        let outcomes = sched.tick(FRAME, &mut source);
        assert!(outcomes.is_empty());
        assert_eq!(sched.loading_ids(), vec![second]);
        assert_eq!(sched.stats().cancelled, 1);
    }

    #[test]
    fn non_cancelable_request_refuses_cancel() {
        let mut sched = LoadScheduler::default();
        let id = sched.submit(request("a", 0).cancelable(false)).unwrap();
        assert!(!sched.cancel(id));
        assert_eq!(sched.waiting_len(), 1);
        assert_eq!(sched.cancel_all(), 1);
        assert_eq!(sched.waiting_len(), 0);
    }

    #[test]
    fn cancel_all_for_counts_matches() {
        let mut sched = LoadScheduler::default();
        sched.submit(request("Toast", 0)).unwrap();
        sched
            .submit(LoadRequest::new(PanelConfig::new("Toast"), Payload::new(1)))
            .unwrap();
        sched.submit(request("Other", 0)).unwrap();
        assert_eq!(sched.cancel_all_for("Toast"), 2);
        assert!(!sched.is_in_flight("Toast"));
        assert!(sched.is_in_flight("Other"));
    }

    #[test]
    fn timeout_applies_to_waiting_and_loading() {
        let settings = SchedulerSettings::default()
            .max_concurrent_loads(1)
            .load_timeout(Duration::from_secs(1));
        let mut sched = LoadScheduler::new(settings);
        let mut source = Deferred::default();
        sched.submit(request("slow", 1)).unwrap();
        sched.submit(request("queued", 0)).unwrap();
        sched.tick(FRAME, &mut source);
        assert_eq!(sched.loading_len(), 1);

        let outcomes = sched.tick(Duration::from_secs(1), &mut source);
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| matches!(
            o,
            LoadOutcome::Failed {
                error: PanelError::Timeout { .. },
                ..
            }
        )));
        assert!(source.tickets[0].is_cancelled());
        assert_eq!(sched.stats().timed_out, 2);
        assert_eq!(sched.loading_len(), 0);
    }

    #[test]
    fn progress_reaches_callback() {
        let mut sched = LoadScheduler::default();
        let mut source = Deferred::default();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let id = sched
            .submit(request("a", 0).callbacks(
                LoadCallbacks::new().on_progress(move |p| sink.borrow_mut().push(p)),
            ))
            .unwrap();
        sched.tick(FRAME, &mut source);
        source.tickets[0].report_progress(0.25);
        source.tickets[0].report_progress(0.75);
        sched.tick(FRAME, &mut source);
        assert_eq!(*seen.borrow(), vec![0.25, 0.75]);
        assert_eq!(sched.request(id).map(LoadRequest::progress), Some(0.75));
    }

    #[test]
    fn ticket_failure_is_asset_failure() {
        let mut sched = LoadScheduler::default();
        let mut source = Deferred::default();
        sched.submit(request("a", 0)).unwrap();
        sched.tick(FRAME, &mut source);
        source.tickets.pop().unwrap().fail("404");
        let outcomes = sched.tick(FRAME, &mut source);
        assert!(matches!(
            &outcomes[0],
            LoadOutcome::Failed {
                error: PanelError::AssetLoadFailure { reason, .. },
                ..
            } if reason == "404"
        ));
    }

    #[test]
    fn on_complete_fires_once() {
        let results = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&results);
        let mut req = request("a", 0).callbacks(LoadCallbacks::on_complete(move |r| {
            sink.borrow_mut().push(r.is_ok());
        }));
        req.notify_success(InstanceId(3));
        req.notify_failure(&PanelError::InvalidArgument("late".into()));
        assert_eq!(*results.borrow(), vec![true]);
    }
}
