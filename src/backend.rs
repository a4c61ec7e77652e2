// SPDX-License-Identifier: GPL-3.0-or-later

//! The boundary between the layout manager and display hardware.
//!
//! A backend owns hardware outputs and exposes them through [`OutputHandle`]s.
//! All state changes go through [`PendingOutputState`] batches that can be tested
//! before they are committed.

pub mod headless;

use std::rc::Rc;

use smithay::{
    backend::allocator::Fourcc,
    output::Mode,
    utils::{Physical, Size, Transform},
};

use crate::output::OutputHandle;

/// Static information about a hardware output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputInfo {
    /// The connector name, e.g. `DP-1`.
    pub name: String,
    pub make: String,
    pub model: String,
    pub serial: String,
    /// Physical size in millimeters.
    pub physical_size: Size<i32, smithay::utils::Raw>,
    /// Outputs like VR headsets that should be leased instead of managed.
    pub non_desktop: bool,
    /// Whether the output is a window in another compositor and can be resized by the user.
    pub nested: bool,
}

/// A mode advertised by the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvertisedMode {
    pub mode: Mode,
    pub preferred: bool,
}

/// A batch of pending hardware changes.
///
/// Unset fields are left as they currently are on the hardware.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingOutputState {
    pub enabled: Option<bool>,
    /// A mode from the advertised mode list.
    pub mode: Option<Mode>,
    /// A mode which is not in the advertised mode list.
    pub custom_mode: Option<Mode>,
    pub transform: Option<Transform>,
    pub scale: Option<f64>,
    pub adaptive_sync: Option<bool>,
    pub render_format: Option<Fourcc>,
    /// A buffer to present on the next commit.
    pub buffer: Option<Buffer>,
}

impl PendingOutputState {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Whether this batch performs a modeset.
    pub fn sets_mode(&self) -> bool {
        self.mode.is_some() || self.custom_mode.is_some()
    }
}

#[derive(Debug, PartialEq, Eq)]
struct BufferInner {
    id: u64,
    size: Size<i32, Physical>,
}

/// A presented buffer.
///
/// Cloning a buffer retains it and dropping releases it; the backend may reuse
/// the underlying memory once every reference has been dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buffer(Rc<BufferInner>);

impl Buffer {
    pub fn new(id: u64, size: Size<i32, Physical>) -> Self {
        Self(Rc::new(BufferInner { id, size }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn size(&self) -> Size<i32, Physical> {
        self.0.size
    }

    /// The number of live references to this buffer.
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }
}

/// Events a backend reports to the layout manager.
#[derive(Debug, Clone)]
pub enum BackendEvent {
    /// A new output was plugged in.
    NewOutput(OutputHandle),
    /// An output was unplugged.
    OutputDestroyed(OutputHandle),
    /// An output committed a new state.
    Commit {
        output: OutputHandle,
        /// Whether the commit changed the mode. Nested backends do this when resized.
        mode_changed: bool,
        /// The buffer presented by this commit, if any.
        buffer: Option<Buffer>,
    },
    /// An output is ready to draw a new frame.
    Frame(OutputHandle),
}

/// The operations the layout manager needs from display hardware.
///
/// Every method takes a handle previously announced through
/// [`BackendEvent::NewOutput`]. Implementations must treat unknown handles as
/// no-ops or failures, never panic.
pub trait OutputBackend {
    fn output_info(&self, output: OutputHandle) -> Option<OutputInfo>;

    /// The advertised modes, in hardware order.
    fn modes(&self, output: OutputHandle) -> Vec<AdvertisedMode>;
    fn current_mode(&self, output: OutputHandle) -> Option<Mode>;
    /// The current hardware size. Meaningful for backends without mode lists.
    fn current_size(&self, output: OutputHandle) -> Size<i32, Physical>;
    fn is_enabled(&self, output: OutputHandle) -> bool;
    fn transform(&self, output: OutputHandle) -> Transform;
    fn scale(&self, output: OutputHandle) -> f64;
    fn adaptive_sync_enabled(&self, output: OutputHandle) -> bool;
    fn render_format(&self, output: OutputHandle) -> Option<Fourcc>;

    /// Whether modes outside the advertised list can be set.
    ///
    /// DRM connectors cannot, nested and headless outputs can.
    fn supports_custom_modes(&self, output: OutputHandle) -> bool;

    /// Returns whether `state` could be applied without applying it.
    fn test_state(&mut self, output: OutputHandle, state: &PendingOutputState) -> bool;
    /// Applies `state`, returning whether the hardware accepted it.
    fn commit_state(&mut self, output: OutputHandle, state: &PendingOutputState) -> bool;

    /// Initializes rendering for a newly announced output.
    fn init_render(&mut self, output: OutputHandle) -> bool;

    /// Adds a mode parsed from a modeline to the output's advertised mode list.
    fn add_custom_mode(&mut self, output: OutputHandle, mode: Mode);

    /// Forces software cursors on the output so they show up in its buffers.
    fn lock_software_cursors(&mut self, output: OutputHandle, lock: bool);
    /// Requests a [`BackendEvent::Frame`] for the output.
    fn schedule_frame(&mut self, output: OutputHandle);
    /// Builds a pending state that draws `buffer` over the whole output.
    ///
    /// Returns `None` if the buffer could not be imported.
    fn render_buffer_fullscreen(
        &mut self,
        output: OutputHandle,
        buffer: &Buffer,
    ) -> Option<PendingOutputState>;
}
