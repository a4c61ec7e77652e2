// SPDX-License-Identifier: GPL-3.0-or-later

//! Drives one hardware output through its state transitions.

use std::collections::HashSet;

use smithay::{
    backend::allocator::Fourcc,
    output::{Mode, Output, PhysicalProperties, Scale, Subpixel},
    utils::{Logical, Point, Size},
};
use tracing::{debug, error, info, warn};

use crate::{
    backend::{AdvertisedMode, Buffer, OutputBackend, OutputInfo},
    config::{Config, ModeSetting, PositionSetting},
    output::{
        BitDepth, ChangedFields, ImageSource, OutputHandle, OutputPosition, OutputState, WithState,
        logical_size, mirror::MirrorSubscription, modeline::Modeline, output_logical_size,
        setter::OutputStateSetter,
    },
    signal::{OutputSignal, SignalSink},
};

/// The name of the fallback output.
pub const NOOP_OUTPUT_NAME: &str = "NOOP-1";

const FALLBACK_WIDTH: i32 = 1200;
const FALLBACK_HEIGHT: i32 = 720;

/// The services a controller needs to apply a state.
pub struct ApplyContext<'a> {
    pub backend: &'a mut dyn OutputBackend,
    pub signals: &'a mut dyn SignalSink,
    pub config: &'a Config,
    /// The output named by a mirror state, if it exists and renders its own content.
    pub mirror_source: Option<OutputHandle>,
    /// The output that takes over views if this output's compositor output goes away.
    pub successor: Option<OutputHandle>,
}

/// Render formats to try for a bit depth, most preferred first.
pub fn formats_for_depth(depth: BitDepth) -> &'static [Fourcc] {
    match depth {
        BitDepth::Eight => &[Fourcc::Xrgb8888],
        BitDepth::Ten => &[Fourcc::Xrgb2101010, Fourcc::Xbgr2101010, Fourcc::Xrgb8888],
    }
}

/// The bit depth implied by a render format.
pub fn depth_for_format(format: Option<Fourcc>) -> BitDepth {
    match format {
        Some(Fourcc::Xrgb2101010 | Fourcc::Xbgr2101010) => BitDepth::Ten,
        _ => BitDepth::Eight,
    }
}

/// Finds the advertised mode that best matches `reference`.
///
/// Only modes with the same size are considered. An exact match wins. A reference
/// refresh of 0 picks the preferred mode if there is one, otherwise the highest refresh.
/// Unless `exact` is set, the mode with the closest refresh is picked, preferring the
/// higher refresh when two are equally close.
pub fn find_matching_mode(
    modes: &[AdvertisedMode],
    reference: Mode,
    exact: bool,
) -> Option<Mode> {
    let target = if reference.refresh == 0 {
        i32::MAX
    } else {
        reference.refresh
    };
    let distance = |mode: &Mode| (mode.refresh as i64 - target as i64).abs();

    let mut best: Option<Mode> = None;

    for adv in modes.iter().filter(|adv| adv.mode.size == reference.size) {
        if adv.mode.refresh == reference.refresh {
            return Some(adv.mode);
        }

        if reference.refresh == 0 && adv.preferred {
            return Some(adv.mode);
        }

        if exact {
            continue;
        }

        let replace = match best {
            None => true,
            Some(best) => {
                let (current, best_so_far) = (distance(&adv.mode), distance(&best));
                current < best_so_far
                    || (current == best_so_far && adv.mode.refresh > best.refresh)
            }
        };

        if replace {
            best = Some(adv.mode);
        }
    }

    best
}

#[derive(Debug)]
pub struct OutputController {
    handle: OutputHandle,
    info: OutputInfo,
    is_noop: bool,
    current_state: OutputState,
    setter: OutputStateSetter,
    externally_managed: bool,
    current_bit_depth: BitDepth,
    added_custom_modes: HashSet<String>,
    mirror: Option<MirrorSubscription>,
    output: Option<Output>,
}

impl OutputController {
    pub fn new(handle: OutputHandle, info: OutputInfo) -> Self {
        Self {
            handle,
            info,
            is_noop: false,
            current_state: OutputState::off(),
            setter: OutputStateSetter::new(),
            externally_managed: false,
            current_bit_depth: BitDepth::Eight,
            added_custom_modes: HashSet::new(),
            mirror: None,
            output: None,
        }
    }

    /// Creates the controller of the fallback output.
    pub fn new_noop(handle: OutputHandle, info: OutputInfo) -> Self {
        Self {
            is_noop: true,
            ..Self::new(handle, info)
        }
    }

    pub fn handle(&self) -> OutputHandle {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn info(&self) -> &OutputInfo {
        &self.info
    }

    pub fn is_noop(&self) -> bool {
        self.is_noop
    }

    pub fn current_state(&self) -> &OutputState {
        &self.current_state
    }

    pub fn is_externally_managed(&self) -> bool {
        self.externally_managed
    }

    /// Marks this output as configured by an output management client.
    pub fn set_externally_managed(&mut self, externally_managed: bool) {
        self.externally_managed = externally_managed;
    }

    pub fn current_bit_depth(&self) -> BitDepth {
        self.current_bit_depth
    }

    /// The compositor output, present while this output hosts views.
    pub fn output(&self) -> Option<&Output> {
        self.output.as_ref()
    }

    pub fn mirror(&self) -> Option<&MirrorSubscription> {
        self.mirror.as_ref()
    }

    /// Whether this output should be treated as unconfigured by the config file.
    fn should_ignore_config_state(&self, config: &Config, mode: &ModeSetting) -> bool {
        if self.externally_managed && config.workarounds.use_external_output_configuration {
            // Mirroring can't be expressed through output management,
            // so a mirror in the config file always wins.
            return !matches!(mode, ModeSetting::Mirror(_));
        }

        false
    }

    /// Computes the state this output is configured with.
    ///
    /// This is usually the config file, unless an output management client
    /// configured the output.
    pub fn load_configured_state(
        &mut self,
        config: &Config,
        backend: &mut dyn OutputBackend,
    ) -> OutputState {
        // Custom modes are registered even if the output is externally managed
        self.refresh_custom_modes(config, backend);

        let section = config.output_section(self.name());
        let mode = section.mode();

        if self.should_ignore_config_state(config, &mode) {
            return self.current_state.clone();
        }

        debug!(output = self.name(), "Loaded mode {mode}");

        let mut state = OutputState {
            position: match section.position() {
                PositionSetting::Auto => OutputPosition::Automatic,
                PositionSetting::Fixed(loc) => OutputPosition::Fixed(loc),
            },
            ..OutputState::default()
        };

        match &mode {
            ModeSetting::Auto => {
                state.mode = self.select_default_mode(backend);
                state.source = ImageSource::Direct;
            }
            ModeSetting::Resolution { .. } => {
                let requested = mode.mode().unwrap_or(state.mode);
                state.mode = if self.is_mode_supported(backend, requested) {
                    requested
                } else {
                    warn!(
                        output = self.name(),
                        "Mode {mode} is not supported, using the default mode"
                    );
                    self.select_default_mode(backend)
                };
                state.source = ImageSource::Direct;
            }
            ModeSetting::Off => {
                state.source = ImageSource::Off;
                return state;
            }
            ModeSetting::Mirror(from) => {
                state.source = ImageSource::Mirror(from.clone());
                state.mode = self.select_default_mode(backend);
            }
        }

        state.scale = section.scale();
        state.transform = section.transform();
        state.vrr = section.vrr;
        state.depth = section.depth();
        state
    }

    /// The preferred mode, else the last advertised one, else the current size.
    pub fn select_default_mode(&self, backend: &dyn OutputBackend) -> Mode {
        let modes = backend.modes(self.handle);

        if let Some(preferred) = modes.iter().find(|adv| adv.preferred) {
            return preferred.mode;
        }

        // The last mode is usually also the largest
        if let Some(last) = modes.last() {
            return last.mode;
        }

        // Backends without mode lists, like nested ones
        let size = backend.current_size(self.handle);
        let refresh = backend
            .current_mode(self.handle)
            .map(|mode| mode.refresh)
            .filter(|refresh| *refresh > 0)
            .unwrap_or(0);

        Mode {
            size: (
                if size.w > 0 { size.w } else { FALLBACK_WIDTH },
                if size.h > 0 { size.h } else { FALLBACK_HEIGHT },
            )
                .into(),
            refresh,
        }
    }

    /// Whether a modeset to `mode` can succeed.
    pub fn is_mode_supported(&self, backend: &dyn OutputBackend, mode: Mode) -> bool {
        if backend.supports_custom_modes(self.handle) {
            return true;
        }

        // DRM does not do custom modes, so the size must be in the mode list
        backend
            .modes(self.handle)
            .iter()
            .any(|adv| adv.mode.size == mode.size)
    }

    /// Registers the custom modes in this output's config section.
    pub fn refresh_custom_modes(&mut self, config: &Config, backend: &mut dyn OutputBackend) {
        let section = config.output_section(self.name());
        for modeline in section.custom_modes.iter() {
            self.add_custom_mode(backend, modeline);
        }
    }

    fn add_custom_mode(&mut self, backend: &mut dyn OutputBackend, modeline: &str) {
        if !self.added_custom_modes.insert(modeline.to_string()) {
            return;
        }

        let parsed = match modeline.parse::<Modeline>() {
            Ok(parsed) => parsed,
            Err(err) => {
                error!("Invalid modeline `{modeline}` in config file: {err}");
                return;
            }
        };

        debug!(output = self.name(), "Adding custom mode {}", parsed.name());
        if !backend.supports_custom_modes(self.handle) {
            backend.add_custom_mode(self.handle, parsed.mode());
        }
    }

    /// Whether `state` can be applied to this output.
    pub fn test_state(&self, _state: &OutputState) -> bool {
        true
    }

    /// Applies `state`, ignoring its position.
    ///
    /// The state becomes the current state even if parts of it are rejected
    /// by the hardware.
    pub fn apply_state(&mut self, ctx: &mut ApplyContext<'_>, state: OutputState) {
        let _span = tracy_client::span!("OutputController::apply_state");

        if !self.test_state(&state) {
            return;
        }

        let changed = self.current_state.changed_fields(&state);
        self.current_state = state;

        // Mirrors are set up again below, in case the source changed
        self.teardown_mirror(ctx.backend);

        match self.current_state.source.clone() {
            ImageSource::Off => {
                self.destroy_compositor_output(ctx.signals, ctx.successor);
                self.set_enabled(ctx.backend, false);
                return;
            }
            ImageSource::Dpms => {
                self.set_enabled(ctx.backend, false);
            }
            ImageSource::Direct | ImageSource::Mirror(_) => {
                self.set_enabled(ctx.backend, true);
                let (mode, custom) = (
                    self.current_state.mode,
                    self.current_state.uses_custom_mode,
                );
                self.apply_mode(ctx, mode, custom);
            }
        }

        if self.current_state.source.hosts_views() {
            let backend = &mut *ctx.backend;
            if backend.transform(self.handle) != self.current_state.transform {
                self.setter.pending.transform = Some(self.current_state.transform);
            }
            if backend.scale(self.handle) != self.current_state.scale {
                self.setter.pending.scale = Some(self.current_state.scale);
            }
            self.setter.commit(backend, self.handle);

            self.ensure_compositor_output(ctx);
            self.damage_whole();
            self.emit_configuration_changed(ctx.signals, changed);
        } else {
            self.destroy_compositor_output(ctx.signals, ctx.successor);
            self.setup_mirror(ctx);
        }
    }

    fn set_enabled(&mut self, backend: &mut dyn OutputBackend, enabled: bool) {
        self.setter.pending.enabled = Some(enabled);
        if !enabled {
            self.setter.commit(backend, self.handle);
        }
    }

    fn apply_mode(&mut self, ctx: &mut ApplyContext<'_>, mode: Mode, custom: bool) {
        let _span = tracy_client::span!("OutputController::apply_mode");

        let handle = self.handle;

        if let Some(current) = ctx.backend.current_mode(handle) {
            let same_mode = current == mode
                || (mode.refresh == 0
                    && find_matching_mode(&ctx.backend.modes(handle), mode, custom)
                        == Some(current));

            if same_mode
                && ctx.backend.adaptive_sync_enabled(handle) == self.current_state.vrr
                && self.current_bit_depth == self.current_state.depth
            {
                // Nothing to modeset, only commit the enable
                self.setter.commit(ctx.backend, handle);
                return;
            }
        }

        self.refresh_custom_modes(ctx.config, ctx.backend);

        match find_matching_mode(&ctx.backend.modes(handle), mode, custom) {
            Some(built_in) => self.setter.pending.mode = Some(built_in),
            None => {
                info!(
                    "Couldn't find matching mode {}x{}@{} for output {}. Trying to use custom mode (might not work)",
                    mode.size.w,
                    mode.size.h,
                    mode.refresh as f64 / 1000.0,
                    self.name(),
                );
                self.setter.pending.custom_mode = Some(mode);
            }
        }

        if !self.setter.commit(ctx.backend, handle) {
            warn!(output = self.name(), "Modeset was rejected");
        }

        let vrr = self.current_state.vrr;
        if ctx.backend.adaptive_sync_enabled(handle) != vrr {
            self.setter.pending.adaptive_sync = Some(vrr);
            if self.setter.test_and_commit(ctx.backend, handle) {
                debug!("Changed adaptive sync on output {} to {vrr}", self.name());
            } else {
                error!("Failed to change adaptive sync on output {}", self.name());
            }
        }

        let depth = self.current_state.depth;
        if depth != self.current_bit_depth {
            for format in formats_for_depth(depth) {
                self.setter.pending.render_format = Some(*format);
                if self.setter.test_and_commit(ctx.backend, handle) {
                    self.current_bit_depth = depth;
                    debug!("Set output format to {format:?} on output {}", self.name());
                    break;
                }

                debug!("Failed to set output format {format:?} on output {}", self.name());
            }
        }
    }

    /// The logical size of the output as the hardware is configured now.
    pub fn effective_size(&self, backend: &dyn OutputBackend) -> Size<i32, Logical> {
        match backend.current_mode(self.handle) {
            Some(mode) => logical_size(
                mode.size,
                backend.transform(self.handle),
                backend.scale(self.handle),
            ),
            None => self.current_state.logical_size(),
        }
    }

    fn ensure_compositor_output(&mut self, ctx: &mut ApplyContext<'_>) {
        let backend = &*ctx.backend;
        let mode = backend.current_mode(self.handle).unwrap_or(self.current_state.mode);
        let transform = backend.transform(self.handle);
        let scale = Scale::Fractional(backend.scale(self.handle));

        if let Some(output) = self.output.as_ref() {
            output.change_current_state(Some(mode), Some(transform), Some(scale), None);
            return;
        }

        let output = Output::new(
            self.info.name.clone(),
            PhysicalProperties {
                size: self.info.physical_size,
                subpixel: Subpixel::Unknown,
                make: self.info.make.clone(),
                model: self.info.model.clone(),
            },
        );

        for adv in backend.modes(self.handle) {
            output.add_mode(adv.mode);
            if adv.preferred {
                output.set_preferred(adv.mode);
            }
        }
        output.change_current_state(Some(mode), Some(transform), Some(scale), None);

        info!(output = self.name(), "Created compositor output");
        self.output = Some(output);
        ctx.signals.emit(OutputSignal::Added {
            output: self.handle,
            name: self.info.name.clone(),
        });
    }

    /// Destroys the compositor output, letting views move to `successor`.
    pub fn destroy_compositor_output(
        &mut self,
        signals: &mut dyn SignalSink,
        successor: Option<OutputHandle>,
    ) {
        if self.output.take().is_none() {
            return;
        }

        info!("Disabling output {}", self.name());

        signals.emit(OutputSignal::PreRemove {
            output: self.handle,
            successor,
        });
        signals.emit(OutputSignal::Removed {
            output: self.handle,
        });
    }

    /// Moves the compositor output in the global space.
    pub fn set_location(&self, loc: Point<i32, Logical>) {
        if let Some(output) = self.output.as_ref() {
            if output.current_location() != loc {
                output.change_current_state(None, None, None, Some(loc));
            }
        }
    }

    pub fn damage_whole(&self) {
        if let Some(output) = self.output.as_ref() {
            output.with_state_mut(|state| state.needs_full_redraw = true);
        }
    }

    /// Suspends or resumes rendering on the compositor output.
    pub fn set_inhibited(&self, inhibited: bool) {
        if let Some(output) = self.output.as_ref() {
            output.with_state_mut(|state| state.inhibited = inhibited);
        }
    }

    pub fn is_inhibited(&self) -> bool {
        self.output
            .as_ref()
            .is_some_and(|output| output.with_state(|state| state.inhibited))
    }

    fn setup_mirror(&mut self, ctx: &mut ApplyContext<'_>) {
        let ImageSource::Mirror(from) = &self.current_state.source else {
            return;
        };

        let Some(source) = ctx.mirror_source else {
            // Mirroring an output that is off or powered down would show
            // stale content, so go dark as well
            info!(
                "{}: Cannot mirror from output {from}. Disabling output.",
                self.name()
            );
            self.set_enabled(ctx.backend, false);
            return;
        };

        debug!(output = self.name(), source = %from, "Mirroring output");
        self.mirror = Some(MirrorSubscription::new(
            ctx.backend,
            self.handle,
            source,
            from.clone(),
        ));
    }

    /// Releases everything held for mirroring. Safe to call when not mirroring.
    pub fn teardown_mirror(&mut self, backend: &mut dyn OutputBackend) {
        if let Some(mirror) = self.mirror.take() {
            mirror.teardown(backend);
        }
    }

    /// Handles the mirrored output presenting `buffer`.
    pub fn handle_source_commit(&mut self, backend: &mut dyn OutputBackend, buffer: Buffer) {
        let Some(mirror) = self.mirror.as_mut() else {
            return;
        };

        mirror.retain(buffer);
        backend.schedule_frame(self.handle);
    }

    /// Draws the last mirrored buffer.
    pub fn handle_frame(&mut self, backend: &mut dyn OutputBackend) {
        let Some(mirror) = self.mirror.as_ref() else {
            return;
        };

        let Some(buffer) = mirror.retained() else {
            error!("Got empty buffer on {}", mirror.source_name());
            return;
        };

        let Some(pending) = backend.render_buffer_fullscreen(self.handle, buffer) else {
            error!("Failed to import buffer from {}", mirror.source_name());
            return;
        };

        self.setter.pending = pending;
        self.setter.commit(backend, self.handle);
    }

    /// Adopts a mode set by the backend itself, as nested backends do when resized.
    ///
    /// Returns whether the current state changed.
    pub fn handle_mode_changed(
        &mut self,
        backend: &dyn OutputBackend,
        signals: &mut dyn SignalSink,
    ) -> bool {
        if self.current_state.source != ImageSource::Direct {
            return false;
        }

        let Some(output) = self.output.as_ref() else {
            return false;
        };

        let Some(mode) = backend.current_mode(self.handle) else {
            return false;
        };

        if output_logical_size(output) == Some(self.effective_size(backend)) {
            return false;
        }

        debug!(output = self.name(), "Backend changed mode to {mode:?}");

        self.current_state.mode = mode;
        output.change_current_state(Some(mode), None, None, None);
        self.damage_whole();
        self.emit_configuration_changed(signals, ChangedFields::MODE);

        true
    }

    /// Announces changes of this output's state. The fallback output stays quiet.
    pub fn emit_configuration_changed(&self, signals: &mut dyn SignalSink, changed: ChangedFields) {
        if self.is_noop || changed.is_empty() {
            return;
        }

        signals.emit(OutputSignal::ConfigurationChanged {
            output: self.handle,
            changed,
        });
    }
}
