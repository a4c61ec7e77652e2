// SPDX-License-Identifier: GPL-3.0-or-later

//! An in-memory backend.
//!
//! This backs the fallback output, the simulation binary and the tests. Every
//! commit is recorded so callers can check which hardware changes were made.

use std::collections::{HashMap, VecDeque};

use indexmap::IndexMap;
use smithay::{
    backend::allocator::Fourcc,
    output::Mode,
    utils::{Physical, Size, Transform},
};
use tracing::{debug, warn};

use crate::output::OutputHandle;

use super::{AdvertisedMode, BackendEvent, Buffer, OutputBackend, OutputInfo, PendingOutputState};

/// The description of a connector to plug into a [`HeadlessBackend`].
#[derive(Debug, Clone)]
pub struct Connector {
    pub name: String,
    pub modes: Vec<AdvertisedMode>,
    /// Emulates a DRM connector, which refuses modes outside its mode list.
    pub drm: bool,
    pub non_desktop: bool,
    pub nested: bool,
    /// The size used when the connector has no mode list.
    pub size: Size<i32, Physical>,
}

impl Connector {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            modes: Vec::new(),
            drm: false,
            non_desktop: false,
            nested: false,
            size: (0, 0).into(),
        }
    }

    /// Adds an advertised mode. Refresh is in millihertz.
    pub fn with_mode(mut self, w: i32, h: i32, refresh: i32) -> Self {
        self.modes.push(AdvertisedMode {
            mode: Mode {
                size: (w, h).into(),
                refresh,
            },
            preferred: false,
        });
        self
    }

    /// Adds an advertised mode marked as preferred.
    pub fn with_preferred_mode(mut self, w: i32, h: i32, refresh: i32) -> Self {
        self.modes.push(AdvertisedMode {
            mode: Mode {
                size: (w, h).into(),
                refresh,
            },
            preferred: true,
        });
        self
    }

    pub fn drm(mut self) -> Self {
        self.drm = true;
        self
    }

    pub fn non_desktop(mut self) -> Self {
        self.non_desktop = true;
        self
    }

    pub fn nested(mut self, w: i32, h: i32) -> Self {
        self.nested = true;
        self.size = (w, h).into();
        self
    }

    /// Sets the size reported when the connector has no mode list.
    pub fn with_size(mut self, w: i32, h: i32) -> Self {
        self.size = (w, h).into();
        self
    }
}

/// A commit made on a headless output.
#[derive(Debug, Clone)]
pub struct CommitRecord {
    pub output: OutputHandle,
    pub state: PendingOutputState,
    pub accepted: bool,
}

#[derive(Debug)]
struct HeadlessOutput {
    connector: Connector,
    enabled: bool,
    current_mode: Option<Mode>,
    size: Size<i32, Physical>,
    transform: Transform,
    scale: f64,
    adaptive_sync: bool,
    render_format: Option<Fourcc>,
    render_initialized: bool,
    cursor_locks: u32,
}

#[derive(Debug, Default)]
pub struct HeadlessBackend {
    outputs: IndexMap<OutputHandle, HeadlessOutput>,
    events: VecDeque<BackendEvent>,
    commits: Vec<CommitRecord>,
    scheduled_frames: Vec<OutputHandle>,
    next_buffer_id: u64,

    /// Refuse to enable adaptive sync.
    pub reject_adaptive_sync: bool,
    /// Render formats the hardware refuses.
    pub rejected_formats: Vec<Fourcc>,
    /// Refuse to initialize rendering for new outputs.
    pub fail_render_init: bool,
    /// Refuse every commit that enables an output.
    pub reject_enable: bool,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plugs in a connector and queues a [`BackendEvent::NewOutput`].
    pub fn plug(&mut self, connector: Connector) -> OutputHandle {
        let handle = self.add_output(connector);
        self.events.push_back(BackendEvent::NewOutput(handle));
        handle
    }

    /// Creates an output without announcing it.
    pub fn add_output(&mut self, connector: Connector) -> OutputHandle {
        let handle = OutputHandle::next();
        debug!(name = %connector.name, %handle, "headless: adding output");
        let size = connector.size;
        self.outputs.insert(
            handle,
            HeadlessOutput {
                connector,
                enabled: false,
                current_mode: None,
                size,
                transform: Transform::Normal,
                scale: 1.0,
                adaptive_sync: false,
                render_format: Some(Fourcc::Xrgb8888),
                render_initialized: false,
                cursor_locks: 0,
            },
        );
        handle
    }

    /// Unplugs an output and queues a [`BackendEvent::OutputDestroyed`].
    pub fn unplug(&mut self, output: OutputHandle) {
        if self.outputs.shift_remove(&output).is_some() {
            self.events.push_back(BackendEvent::OutputDestroyed(output));
        }
    }

    /// Emulates the user resizing a nested output's window.
    pub fn resize(&mut self, output: OutputHandle, size: Size<i32, Physical>) {
        let Some(out) = self.outputs.get_mut(&output) else {
            return;
        };
        let refresh = out.current_mode.map(|mode| mode.refresh).unwrap_or_default();
        out.size = size;
        out.current_mode = Some(Mode { size, refresh });
        self.events.push_back(BackendEvent::Commit {
            output,
            mode_changed: true,
            buffer: None,
        });
    }

    /// Emulates the output presenting a new frame, returning the presented buffer.
    pub fn present(&mut self, output: OutputHandle) -> Option<Buffer> {
        let size = self.outputs.get(&output)?.size;
        self.next_buffer_id += 1;
        let buffer = Buffer::new(self.next_buffer_id, size);
        self.events.push_back(BackendEvent::Commit {
            output,
            mode_changed: false,
            buffer: Some(buffer.clone()),
        });
        Some(buffer)
    }

    /// Takes all queued events.
    pub fn drain_events(&mut self) -> Vec<BackendEvent> {
        self.events.drain(..).collect()
    }

    pub fn commits(&self) -> &[CommitRecord] {
        &self.commits
    }

    pub fn clear_commits(&mut self) {
        self.commits.clear();
    }

    /// Takes the outputs that had a frame scheduled since the last call.
    pub fn take_scheduled_frames(&mut self) -> Vec<OutputHandle> {
        std::mem::take(&mut self.scheduled_frames)
    }

    pub fn cursor_locks(&self, output: OutputHandle) -> u32 {
        self.outputs
            .get(&output)
            .map(|out| out.cursor_locks)
            .unwrap_or_default()
    }

    fn accepts(&self, output: &HeadlessOutput, state: &PendingOutputState) -> bool {
        if state.enabled == Some(true) && self.reject_enable {
            return false;
        }

        if state.custom_mode.is_some() && output.connector.drm {
            return false;
        }

        if let Some(mode) = state.mode {
            if !output.connector.modes.iter().any(|adv| adv.mode == mode) {
                return false;
            }
        }

        if state.adaptive_sync == Some(true) && self.reject_adaptive_sync {
            return false;
        }

        if let Some(format) = state.render_format {
            if self.rejected_formats.contains(&format) {
                return false;
            }
        }

        true
    }
}

impl OutputBackend for HeadlessBackend {
    fn output_info(&self, output: OutputHandle) -> Option<OutputInfo> {
        let out = self.outputs.get(&output)?;
        Some(OutputInfo {
            name: out.connector.name.clone(),
            make: "Orrery".to_string(),
            model: "Headless".to_string(),
            serial: "Unknown".to_string(),
            physical_size: (0, 0).into(),
            non_desktop: out.connector.non_desktop,
            nested: out.connector.nested,
        })
    }

    fn modes(&self, output: OutputHandle) -> Vec<AdvertisedMode> {
        self.outputs
            .get(&output)
            .map(|out| out.connector.modes.clone())
            .unwrap_or_default()
    }

    fn current_mode(&self, output: OutputHandle) -> Option<Mode> {
        self.outputs.get(&output)?.current_mode
    }

    fn current_size(&self, output: OutputHandle) -> Size<i32, Physical> {
        self.outputs
            .get(&output)
            .map(|out| out.size)
            .unwrap_or_default()
    }

    fn is_enabled(&self, output: OutputHandle) -> bool {
        self.outputs.get(&output).is_some_and(|out| out.enabled)
    }

    fn transform(&self, output: OutputHandle) -> Transform {
        self.outputs
            .get(&output)
            .map(|out| out.transform)
            .unwrap_or(Transform::Normal)
    }

    fn scale(&self, output: OutputHandle) -> f64 {
        self.outputs.get(&output).map(|out| out.scale).unwrap_or(1.0)
    }

    fn adaptive_sync_enabled(&self, output: OutputHandle) -> bool {
        self.outputs.get(&output).is_some_and(|out| out.adaptive_sync)
    }

    fn render_format(&self, output: OutputHandle) -> Option<Fourcc> {
        self.outputs.get(&output)?.render_format
    }

    fn supports_custom_modes(&self, output: OutputHandle) -> bool {
        self.outputs.get(&output).is_some_and(|out| !out.connector.drm)
    }

    fn test_state(&mut self, output: OutputHandle, state: &PendingOutputState) -> bool {
        self.outputs
            .get(&output)
            .is_some_and(|out| self.accepts(out, state))
    }

    fn commit_state(&mut self, output: OutputHandle, state: &PendingOutputState) -> bool {
        let accepted = self.test_state(output, state);

        self.commits.push(CommitRecord {
            output,
            state: state.clone(),
            accepted,
        });

        if !accepted {
            return false;
        }

        let Some(out) = self.outputs.get_mut(&output) else {
            return false;
        };

        if let Some(enabled) = state.enabled {
            out.enabled = enabled;
        }
        if let Some(mode) = state.mode.or(state.custom_mode) {
            out.current_mode = Some(mode);
            out.size = mode.size;
        }
        if let Some(transform) = state.transform {
            out.transform = transform;
        }
        if let Some(scale) = state.scale {
            out.scale = scale;
        }
        if let Some(adaptive_sync) = state.adaptive_sync {
            out.adaptive_sync = adaptive_sync;
        }
        if let Some(format) = state.render_format {
            out.render_format = Some(format);
        }

        true
    }

    fn init_render(&mut self, output: OutputHandle) -> bool {
        if self.fail_render_init {
            return false;
        }
        match self.outputs.get_mut(&output) {
            Some(out) => {
                out.render_initialized = true;
                true
            }
            None => false,
        }
    }

    fn add_custom_mode(&mut self, output: OutputHandle, mode: Mode) {
        let Some(out) = self.outputs.get_mut(&output) else {
            return;
        };
        if !out.connector.modes.iter().any(|adv| adv.mode == mode) {
            out.connector.modes.push(AdvertisedMode {
                mode,
                preferred: false,
            });
        }
    }

    fn lock_software_cursors(&mut self, output: OutputHandle, lock: bool) {
        let Some(out) = self.outputs.get_mut(&output) else {
            return;
        };
        if lock {
            out.cursor_locks += 1;
        } else if out.cursor_locks == 0 {
            warn!(name = %out.connector.name, "headless: unbalanced software cursor unlock");
        } else {
            out.cursor_locks -= 1;
        }
    }

    fn schedule_frame(&mut self, output: OutputHandle) {
        if self.outputs.contains_key(&output) {
            self.scheduled_frames.push(output);
        }
    }

    fn render_buffer_fullscreen(
        &mut self,
        output: OutputHandle,
        buffer: &Buffer,
    ) -> Option<PendingOutputState> {
        let out = self.outputs.get(&output)?;
        if !out.render_initialized {
            return None;
        }
        Some(PendingOutputState {
            buffer: Some(buffer.clone()),
            ..Default::default()
        })
    }
}

/// Per-output counters used by tests.
pub fn count_modesets(commits: &[CommitRecord]) -> HashMap<OutputHandle, usize> {
    let mut counts = HashMap::new();
    for commit in commits.iter().filter(|commit| commit.state.sets_mode()) {
        *counts.entry(commit.output).or_default() += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drm_connectors_refuse_custom_modes() {
        let mut backend = HeadlessBackend::new();
        let drm = backend.add_output(Connector::new("DP-1").with_mode(1920, 1080, 60_000).drm());
        let nested = backend.add_output(Connector::new("WL-1").nested(800, 600));

        let custom = PendingOutputState {
            custom_mode: Some(Mode {
                size: (1000, 1000).into(),
                refresh: 0,
            }),
            ..Default::default()
        };

        assert!(!backend.test_state(drm, &custom));
        assert!(backend.test_state(nested, &custom));
        assert!(!backend.supports_custom_modes(drm));
    }

    #[test]
    fn commit_applies_fields_and_is_recorded() {
        let mut backend = HeadlessBackend::new();
        let out = backend.add_output(Connector::new("DP-1").with_mode(1920, 1080, 60_000));
        let mode = Mode {
            size: (1920, 1080).into(),
            refresh: 60_000,
        };

        let state = PendingOutputState {
            enabled: Some(true),
            mode: Some(mode),
            scale: Some(2.0),
            ..Default::default()
        };
        assert!(backend.commit_state(out, &state));

        assert!(backend.is_enabled(out));
        assert_eq!(backend.current_mode(out), Some(mode));
        assert_eq!(backend.scale(out), 2.0);
        assert_eq!(backend.commits().len(), 1);
        assert_eq!(count_modesets(backend.commits()).get(&out), Some(&1));
    }

    #[test]
    fn rejected_commits_change_nothing() {
        let mut backend = HeadlessBackend::new();
        let out = backend.add_output(Connector::new("DP-1"));
        backend.reject_adaptive_sync = true;

        let state = PendingOutputState {
            adaptive_sync: Some(true),
            ..Default::default()
        };
        assert!(!backend.commit_state(out, &state));
        assert!(!backend.adaptive_sync_enabled(out));
        assert!(!backend.commits()[0].accepted);
    }

    #[test]
    fn plug_and_unplug_queue_events() {
        let mut backend = HeadlessBackend::new();
        let out = backend.plug(Connector::new("DP-1"));
        backend.unplug(out);

        let events = backend.drain_events();
        assert!(matches!(events[0], BackendEvent::NewOutput(handle) if handle == out));
        assert!(matches!(events[1], BackendEvent::OutputDestroyed(handle) if handle == out));
        assert!(backend.output_info(out).is_none());
    }
}
