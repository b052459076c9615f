#![forbid(unsafe_code)]

//! Scripted collaborators for exercising `ftui-panels`.
//!
//! - [`ScriptedAssetSource`] hands out [`RecordingPanel`]s. Sync loads
//!   resolve inline; async loads park their ticket until the test completes,
//!   fails, or reports progress on it (or resolve immediately in
//!   auto-complete mode).
//! - [`RecordingPanel`] writes every call the runtime makes into a shared
//!   [`Journal`], so tests can assert on show/hide/reset/dispose order.
//!
//! # Example
//!
//! ```ignore
//! let mut source = ScriptedAssetSource::new();
//! source.fail("Broken");
//! let mut ui = Orchestrator::new(source, RuntimeConfig::default());
//! let ticket = ui.open_ui("Shop", Payload::none(), OpenOptions::new())?;
//! ui.tick(FRAME);                      // load starts
//! ui.source_mut().complete_all();      // asset arrives
//! ui.tick(FRAME);                      // instance is created and shown
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ftui_panels::{
    LayerKind, LoadTicket, Panel, PanelAssetSource, PanelCaps, PanelConfig, PanelHandle, Payload,
    RequestId,
};

/// Typical frame delta for tick-driven tests.
pub const FRAME: Duration = Duration::from_millis(16);

// ---------------------------------------------------------------------------
// Journal
// ---------------------------------------------------------------------------

/// A call the runtime made on a panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelCall {
    Attach { layer: LayerKind, render_order: i32 },
    Bind,
    Show(Option<String>),
    Hide(Option<String>),
    Reset,
    Dispose,
}

/// One journal line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    /// Serial of the panel handle (unique per source).
    pub panel: u64,
    pub ui_name: String,
    pub call: PanelCall,
}

/// Shared, append-only record of panel calls.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<JournalEntry>>>);

impl Journal {
    fn push(&self, entry: JournalEntry) {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
    }

    /// Copy of every entry so far.
    #[must_use]
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Drain every entry.
    pub fn take(&self) -> Vec<JournalEntry> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Calls made on panels of `ui_name`, in order.
    #[must_use]
    pub fn calls_for(&self, ui_name: &str) -> Vec<PanelCall> {
        self.entries()
            .into_iter()
            .filter(|e| e.ui_name == ui_name)
            .map(|e| e.call)
            .collect()
    }

    /// Number of entries matching `pred`.
    #[must_use]
    pub fn count(&self, pred: impl Fn(&JournalEntry) -> bool) -> usize {
        self.entries().iter().filter(|e| pred(e)).count()
    }
}

// ---------------------------------------------------------------------------
// RecordingPanel
// ---------------------------------------------------------------------------

/// Panel that records every call into a [`Journal`].
#[derive(Debug)]
pub struct RecordingPanel {
    serial: u64,
    ui_name: String,
    caps: PanelCaps,
    journal: Journal,
    fail_show: bool,
    reject_payload: bool,
}

impl RecordingPanel {
    pub fn new(serial: u64, ui_name: &str, caps: PanelCaps, journal: Journal) -> Self {
        Self {
            serial,
            ui_name: ui_name.to_owned(),
            caps,
            journal,
            fail_show: false,
            reject_payload: false,
        }
    }

    /// Make `show` fail.
    #[must_use]
    pub fn failing_show(mut self) -> Self {
        self.fail_show = true;
        self
    }

    /// Make `bind` fail.
    #[must_use]
    pub fn rejecting_payload(mut self) -> Self {
        self.reject_payload = true;
        self
    }

    #[must_use]
    pub fn serial(&self) -> u64 {
        self.serial
    }

    fn record(&self, call: PanelCall) {
        self.journal.push(JournalEntry {
            panel: self.serial,
            ui_name: self.ui_name.clone(),
            call,
        });
    }
}

impl Panel for RecordingPanel {
    fn capabilities(&self) -> PanelCaps {
        self.caps
    }

    fn attach(&mut self, layer: LayerKind, render_order: i32) {
        self.record(PanelCall::Attach {
            layer,
            render_order,
        });
    }

    fn bind(&mut self, _payload: &Payload) -> Result<(), String> {
        if self.reject_payload {
            return Err("payload rejected".into());
        }
        self.record(PanelCall::Bind);
        Ok(())
    }

    fn show(&mut self, animation: Option<&str>) -> Result<(), String> {
        if self.fail_show {
            return Err("show failed".into());
        }
        self.record(PanelCall::Show(animation.map(str::to_owned)));
        Ok(())
    }

    fn hide(&mut self, animation: Option<&str>) {
        self.record(PanelCall::Hide(animation.map(str::to_owned)));
    }

    fn reset(&mut self) {
        self.record(PanelCall::Reset);
    }

    fn dispose(&mut self) {
        self.record(PanelCall::Dispose);
    }
}

// ---------------------------------------------------------------------------
// ScriptedAssetSource
// ---------------------------------------------------------------------------

/// How the source treats a panel name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Script {
    /// Sync returns `None`; async fails its ticket.
    Fail,
    /// Handles fail to show.
    FailShow,
    /// Handles reject payloads.
    RejectPayload,
}

/// Asset source driven by the test.
#[derive(Debug, Default)]
pub struct ScriptedAssetSource {
    journal: Journal,
    default_caps: Option<PanelCaps>,
    caps: HashMap<String, PanelCaps>,
    scripts: HashMap<String, Script>,
    auto_complete: bool,
    pending: VecDeque<LoadTicket>,
    requested: Vec<String>,
    next_serial: u64,
    sync_loads: usize,
    async_loads: usize,
}

impl ScriptedAssetSource {
    /// Source producing fully capable panels; async loads wait for the test.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve async loads immediately (applied on the next tick).
    #[must_use]
    pub fn auto_complete(mut self) -> Self {
        self.auto_complete = true;
        self
    }

    /// Capabilities for every panel without an override.
    #[must_use]
    pub fn with_caps(mut self, caps: PanelCaps) -> Self {
        self.default_caps = Some(caps);
        self
    }

    /// Capabilities for one panel name.
    pub fn set_caps(&mut self, ui_name: &str, caps: PanelCaps) {
        self.caps.insert(ui_name.to_owned(), caps);
    }

    /// Every load of `ui_name` fails.
    pub fn fail(&mut self, ui_name: &str) {
        self.scripts.insert(ui_name.to_owned(), Script::Fail);
    }

    /// Panels of `ui_name` load but refuse to show.
    pub fn fail_show(&mut self, ui_name: &str) {
        self.scripts.insert(ui_name.to_owned(), Script::FailShow);
    }

    /// Panels of `ui_name` refuse payloads.
    pub fn reject_payload(&mut self, ui_name: &str) {
        self.scripts.insert(ui_name.to_owned(), Script::RejectPayload);
    }

    /// Undo any script for `ui_name`.
    pub fn heal(&mut self, ui_name: &str) {
        self.scripts.remove(ui_name);
    }

    #[must_use]
    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Build a panel the way a load would.
    pub fn make_panel(&mut self, ui_name: &str) -> PanelHandle {
        self.next_serial += 1;
        let caps = self
            .caps
            .get(ui_name)
            .copied()
            .or(self.default_caps)
            .unwrap_or_else(PanelCaps::all);
        let mut panel = RecordingPanel::new(self.next_serial, ui_name, caps, self.journal.clone());
        match self.scripts.get(ui_name) {
            Some(Script::FailShow) => panel = panel.failing_show(),
            Some(Script::RejectPayload) => panel = panel.rejecting_payload(),
            _ => {}
        }
        Box::new(panel)
    }

    // ========================================================================
    // Pending async loads
    // ========================================================================

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Names of parked loads, oldest first.
    #[must_use]
    pub fn pending_names(&self) -> Vec<String> {
        self.pending.iter().map(|t| t.ui_name().to_owned()).collect()
    }

    /// Request ids of parked loads, oldest first.
    #[must_use]
    pub fn pending_ids(&self) -> Vec<RequestId> {
        self.pending.iter().map(LoadTicket::request_id).collect()
    }

    /// Complete the oldest parked load. Returns `false` if none.
    pub fn complete_next(&mut self) -> bool {
        let Some(ticket) = self.pending.pop_front() else {
            return false;
        };
        let handle = self.make_panel(ticket.ui_name());
        ticket.complete(handle);
        true
    }

    /// Complete one parked load by request id.
    pub fn complete(&mut self, id: RequestId) -> bool {
        let Some(idx) = self.pending.iter().position(|t| t.request_id() == id) else {
            return false;
        };
        let Some(ticket) = self.pending.remove(idx) else {
            return false;
        };
        let handle = self.make_panel(ticket.ui_name());
        ticket.complete(handle);
        true
    }

    /// Complete every parked load. Returns the count.
    pub fn complete_all(&mut self) -> usize {
        let mut count = 0;
        while self.complete_next() {
            count += 1;
        }
        count
    }

    /// Fail the oldest parked load.
    pub fn fail_next(&mut self, reason: &str) -> bool {
        match self.pending.pop_front() {
            Some(ticket) => {
                ticket.fail(reason);
                true
            }
            None => false,
        }
    }

    /// Report progress on every parked load.
    pub fn progress_all(&self, progress: f32) {
        for ticket in &self.pending {
            ticket.report_progress(progress);
        }
    }

    /// Parked loads whose request was cancelled or timed out.
    #[must_use]
    pub fn cancelled_count(&self) -> usize {
        self.pending.iter().filter(|t| t.is_cancelled()).count()
    }

    /// Names passed to either load method, in call order.
    #[must_use]
    pub fn requested(&self) -> &[String] {
        &self.requested
    }

    #[must_use]
    pub fn sync_loads(&self) -> usize {
        self.sync_loads
    }

    #[must_use]
    pub fn async_loads(&self) -> usize {
        self.async_loads
    }
}

impl PanelAssetSource for ScriptedAssetSource {
    fn load_sync(&mut self, ui_name: &str, _config: &PanelConfig) -> Option<PanelHandle> {
        self.sync_loads += 1;
        self.requested.push(ui_name.to_owned());
        if self.scripts.get(ui_name) == Some(&Script::Fail) {
            tracing::debug!(ui_name, "scripted sync failure");
            return None;
        }
        Some(self.make_panel(ui_name))
    }

    fn load_async(&mut self, ui_name: &str, _config: &PanelConfig, ticket: LoadTicket) {
        self.async_loads += 1;
        self.requested.push(ui_name.to_owned());
        if self.scripts.get(ui_name) == Some(&Script::Fail) {
            ticket.fail("scripted failure");
            return;
        }
        if self.auto_complete {
            let handle = self.make_panel(ui_name);
            ticket.complete(handle);
            return;
        }
        self.pending.push_back(ticket);
    }
}
