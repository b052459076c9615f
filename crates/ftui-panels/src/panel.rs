#![forbid(unsafe_code)]

//! Panel handles, payloads, and the asset-source seam.
//!
//! The runtime never builds or renders panels itself. A host-provided
//! [`PanelAssetSource`] turns a panel name into a [`PanelHandle`], either
//! inline ([`PanelAssetSource::load_sync`]) or later through a
//! [`LoadTicket`] ([`PanelAssetSource::load_async`]). Once an instance owns a
//! handle, the runtime drives it only through the narrow [`Panel`] trait.
//!
//! # Async completion
//!
//! A [`LoadTicket`] is a one-shot completion handle. The asset source keeps it
//! while fetching, may report progress, and finally calls
//! [`LoadTicket::complete`] or [`LoadTicket::fail`]. Signals travel over a
//! channel and are applied on the next scheduler tick, so a ticket can be
//! completed from any thread. If the request was cancelled or timed out in
//! the meantime, the signal is ignored and the handle is dropped.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::{self, Sender};

use bitflags::bitflags;

use crate::cancellation::CancellationToken;
use crate::config::PanelConfig;
use crate::layer::LayerKind;
use crate::scheduler::RequestId;

bitflags! {
    /// Capabilities a panel handle advertises.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PanelCaps: u8 {
        /// Can be shown and hidden. Required to become an instance.
        const VISIBILITY = 1 << 0;
        /// Can be reset to an inert state and pooled.
        const REUSABLE   = 1 << 1;
        /// Accepts show/hide animation tags.
        const ANIMATED   = 1 << 2;
        /// Accepts a caller payload.
        const PAYLOAD    = 1 << 3;
    }
}

impl PanelCaps {
    /// Capabilities required for instance creation.
    pub const REQUIRED: Self = Self::VISIBILITY;
}

/// A renderable panel owned by exactly one instance (or one pool slot).
pub trait Panel: Send {
    /// Capabilities of this handle.
    fn capabilities(&self) -> PanelCaps;

    /// Parent the panel to a layer at the given render order.
    fn attach(&mut self, _layer: LayerKind, _render_order: i32) {}

    /// Hand the caller payload to the panel before it is shown.
    fn bind(&mut self, _payload: &Payload) -> Result<(), String> {
        Ok(())
    }

    /// Make the panel visible. `animation` is the opaque show tag, if any.
    fn show(&mut self, animation: Option<&str>) -> Result<(), String>;

    /// Hide the panel. `animation` is the opaque hide tag, if any.
    fn hide(&mut self, animation: Option<&str>);

    /// Return to a canonical inert state before pooling or reuse.
    fn reset(&mut self) {}

    /// Release the panel for good.
    fn dispose(&mut self) {}
}

/// Owned, type-erased panel handle.
pub type PanelHandle = Box<dyn Panel>;

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Opaque caller data attached to an open request.
///
/// Two payloads are the same request payload only if they share the same
/// allocation (or are both empty); contents are never compared.
#[derive(Clone, Default)]
pub struct Payload(Option<Arc<dyn Any + Send + Sync>>);

impl Payload {
    /// Empty payload.
    #[must_use]
    pub const fn none() -> Self {
        Self(None)
    }

    /// Wrap a value.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Some(Arc::new(value)))
    }

    /// Wrap an existing shared value without copying it.
    pub fn from_arc(value: Arc<dyn Any + Send + Sync>) -> Self {
        Self(Some(value))
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    /// Borrow the payload as `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_deref().and_then(|v| v.downcast_ref::<T>())
    }

    /// Allocation address identifying this payload, `None` if empty.
    #[must_use]
    pub fn identity(&self) -> Option<usize> {
        self.0.as_ref().map(|v| Arc::as_ptr(v).cast::<()>() as usize)
    }

    /// Whether both payloads are the same request payload.
    #[must_use]
    pub fn same_identity(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.identity() {
            Some(addr) => write!(f, "Payload({addr:#x})"),
            None => f.write_str("Payload(none)"),
        }
    }
}

// ---------------------------------------------------------------------------
// Asset source
// ---------------------------------------------------------------------------

/// Host-provided panel loader.
pub trait PanelAssetSource {
    /// Load inline. `None` is reported as an asset load failure.
    fn load_sync(&mut self, ui_name: &str, config: &PanelConfig) -> Option<PanelHandle>;

    /// Start a load that resolves through `ticket`.
    fn load_async(&mut self, ui_name: &str, config: &PanelConfig, ticket: LoadTicket);
}

/// Message from a ticket back to the scheduler.
pub(crate) enum LoadSignal {
    Progress { id: RequestId, progress: f32 },
    Loaded { id: RequestId, handle: PanelHandle },
    Failed { id: RequestId, reason: String },
}

/// Completion handle for one asynchronous load.
#[derive(Clone)]
pub struct LoadTicket {
    id: RequestId,
    ui_name: Arc<str>,
    sender: Sender<LoadSignal>,
    cancel: CancellationToken,
}

impl fmt::Debug for LoadTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadTicket")
            .field("id", &self.id)
            .field("ui_name", &self.ui_name)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl LoadTicket {
    pub(crate) fn new(
        id: RequestId,
        ui_name: &str,
        sender: Sender<LoadSignal>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            ui_name: Arc::from(ui_name),
            sender,
            cancel,
        }
    }

    /// Request this ticket belongs to.
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.id
    }

    /// Panel name being loaded.
    #[must_use]
    pub fn ui_name(&self) -> &str {
        &self.ui_name
    }

    /// Whether the scheduler gave up on this load.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token for loaders that want to block or poll on cancellation.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Report progress in `[0, 1]`; out-of-range values are clamped.
    pub fn report_progress(&self, progress: f32) {
        let progress = if progress.is_nan() {
            0.0
        } else {
            progress.clamp(0.0, 1.0)
        };
        // A closed channel means the runtime is gone; nothing to report to.
        let _ = self.sender.send(LoadSignal::Progress {
            id: self.id,
            progress,
        });
    }

    /// Deliver the loaded panel.
    ///
    /// A panel nobody is waiting for any more is disposed on the spot.
    pub fn complete(self, mut handle: PanelHandle) {
        if self.is_cancelled() {
            tracing::debug!(request_id = self.id.get(), ui_name = %self.ui_name, "disposing panel for cancelled load");
            handle.dispose();
            return;
        }
        if let Err(mpsc::SendError(LoadSignal::Loaded { mut handle, .. })) =
            self.sender.send(LoadSignal::Loaded {
                id: self.id,
                handle,
            })
        {
            handle.dispose();
        }
    }

    /// Report that the load failed.
    pub fn fail(self, reason: impl Into<String>) {
        let _ = self.sender.send(LoadSignal::Failed {
            id: self.id,
            reason: reason.into(),
        });
    }
}
