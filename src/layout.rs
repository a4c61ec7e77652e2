// SPDX-License-Identifier: GPL-3.0-or-later

//! Reconciles the desired output configuration with the hardware.

pub mod space;
pub mod validate;

use std::time::{Duration, Instant};

use indexmap::IndexMap;
use smithay::{
    output::Output,
    utils::{Logical, Point},
};
use tracing::{debug, error, info, warn};

use crate::{
    backend::{
        BackendEvent, OutputBackend, OutputInfo,
        headless::{Connector, HeadlessBackend},
    },
    config::Config,
    output::{
        ChangedFields, ImageSource, OutputConfiguration, OutputHandle, OutputPosition, OutputState,
        controller::{ApplyContext, NOOP_OUTPUT_NAME, OutputController, depth_for_format},
    },
    protocol::{
        output_management::{HeadState, OutputManagementState},
        output_power_management::{OutputPowerManagementState, PowerMode},
    },
    signal::{OutputSignal, SignalSink},
    util::scheduler::{DeferredTask, Scheduler},
};

use self::space::OutputSpace;

/// How long the fallback output lingers after a real output was enabled.
///
/// Output management clients need time to see the new output's global.
pub const NOOP_REMOVAL_DELAY: Duration = Duration::from_millis(1000);

const NOOP_WIDTH: i32 = 1280;
const NOOP_HEIGHT: i32 = 720;

/// Owns every output controller and the spatial layout.
pub struct LayoutManager<B: OutputBackend> {
    backend: B,
    noop_backend: HeadlessBackend,
    noop: Option<OutputController>,
    outputs: IndexMap<OutputHandle, OutputController>,
    leasable: IndexMap<OutputHandle, OutputInfo>,
    space: OutputSpace,
    config: Config,
    signals: Box<dyn SignalSink>,
    scheduler: Scheduler,
    shutting_down: bool,

    pub output_management_state: OutputManagementState,
    pub output_power_management_state: OutputPowerManagementState,
}

impl<B: OutputBackend> std::fmt::Debug for LayoutManager<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayoutManager")
            .field("noop", &self.noop)
            .field("outputs", &self.outputs)
            .field("leasable", &self.leasable)
            .field("space", &self.space)
            .field("shutting_down", &self.shutting_down)
            .finish_non_exhaustive()
    }
}

impl<B: OutputBackend> LayoutManager<B> {
    pub fn new(backend: B, config: Config, signals: impl SignalSink + 'static) -> Self {
        Self {
            backend,
            noop_backend: HeadlessBackend::new(),
            noop: None,
            outputs: IndexMap::new(),
            leasable: IndexMap::new(),
            space: OutputSpace::new(),
            config,
            signals: Box::new(signals),
            scheduler: Scheduler::new(),
            shutting_down: false,
            output_management_state: OutputManagementState::new(),
            output_power_management_state: OutputPowerManagementState::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn space(&self) -> &OutputSpace {
        &self.space
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    /// Replaces the config and applies it.
    pub fn set_config(&mut self, config: Config) {
        self.config = config;
        self.reconfigure_from_config();
    }

    /// Called once the backend announced its initial outputs.
    pub fn backend_started(&mut self) {
        if self.outputs().is_empty() {
            self.ensure_noop_output();
        }
    }

    pub fn handle_backend_event(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::NewOutput(output) => self.add_output(output),
            BackendEvent::OutputDestroyed(output) => self.remove_output(output),
            BackendEvent::Commit {
                output,
                mode_changed,
                buffer,
            } => {
                if mode_changed {
                    self.handle_mode_changed(output);
                }

                if let Some(buffer) = buffer {
                    for controller in self.outputs.values_mut().filter(|controller| {
                        controller
                            .mirror()
                            .is_some_and(|mirror| mirror.source() == output)
                    }) {
                        controller.handle_source_commit(&mut self.backend, buffer.clone());
                    }
                }
            }
            BackendEvent::Frame(output) => {
                if let Some(controller) = self.outputs.get_mut(&output) {
                    controller.handle_frame(&mut self.backend);
                }
            }
        }
    }

    fn handle_mode_changed(&mut self, output: OutputHandle) {
        let Some(controller) = self.outputs.get_mut(&output) else {
            return;
        };

        if !controller.info().nested {
            return;
        }

        if controller.handle_mode_changed(&self.backend, &mut *self.signals) {
            let size = controller.effective_size(&self.backend);
            self.space.set_size(output, size);
            self.sync_locations();
            self.signals.emit(OutputSignal::LayoutConfigurationChanged);
            self.scheduler.run_once(DeferredTask::SendConfiguration);
        }
    }

    fn add_output(&mut self, output: OutputHandle) {
        let Some(info) = self.backend.output_info(output) else {
            warn!(%output, "New output vanished before it could be added");
            return;
        };

        info!(
            "New output: {} (\"{} {} {}\")",
            info.name, info.make, info.model, info.serial
        );

        if info.non_desktop {
            debug!("Not adding non-desktop output {} to the layout", info.name);
            self.leasable.insert(output, info);
            return;
        }

        if !self.backend.init_render(output) {
            error!("Failed to initialize rendering for output {}", info.name);
            return;
        }

        self.outputs.insert(output, OutputController::new(output, info));
        self.reconfigure_from_config();
    }

    fn remove_output(&mut self, output: OutputHandle) {
        if let Some(info) = self.leasable.shift_remove(&output) {
            debug!("Non-desktop output {} went away", info.name);
            return;
        }

        let Some(controller) = self.outputs.get(&output) else {
            return;
        };

        info!("Remove output: {}", controller.name());

        // Disable the output while it still exists so views move off cleanly
        let mut config = self.get_current_configuration();
        if let Some(state) = config.get_mut(&output) {
            *state = OutputState::off();
        }
        self.apply_configuration(&config);

        if let Some(mut controller) = self.outputs.shift_remove(&output) {
            controller.teardown_mirror(&mut self.backend);
        }
        self.output_power_management_state.output_removed(output);
        self.scheduler.run_once(DeferredTask::SendConfiguration);
    }

    /// The current state of every tracked real output.
    pub fn get_current_configuration(&self) -> OutputConfiguration {
        self.outputs
            .iter()
            .map(|(handle, controller)| (*handle, controller.current_state().clone()))
            .collect()
    }

    /// Checks whether `config` can be applied.
    ///
    /// Only a configuration that doesn't name every tracked output exactly once is
    /// rejected. Layout problems are logged.
    pub fn test_configuration(&self, config: &OutputConfiguration) -> bool {
        let _span = tracy_client::span!("LayoutManager::test_configuration");

        if config.len() != self.outputs.len() {
            debug!(
                "Configuration has {} outputs, expected {}",
                config.len(),
                self.outputs.len()
            );
            return false;
        }

        let mut ok = true;
        for (handle, state) in config.iter() {
            match self.outputs.get(handle) {
                Some(controller) => ok &= controller.test_state(state),
                None => {
                    debug!(output = %handle, "Configuration contains an unknown output");
                    return false;
                }
            }
        }

        if validate::has_overlapping_outputs(config) {
            error!("Overlapping outputs in the output configuration, unexpected behavior might occur");
        }

        if validate::all_outputs_disabled(config) {
            warn!("All outputs disabled in the output configuration");
        }

        if validate::has_disjoint_outputs(config) {
            warn!("Outputs in the output configuration do not form one connected region");
        }

        ok
    }

    /// Applies `config`, which must have passed [`Self::test_configuration`].
    pub fn apply_configuration(&mut self, config: &OutputConfiguration) {
        let _span = tracy_client::span!("LayoutManager::apply_configuration");

        // Phase 1: the fallback output must exist before the last real one goes away
        let active = self
            .outputs
            .values()
            .filter(|controller| controller.current_state().source.hosts_views())
            .map(OutputController::handle)
            .collect::<Vec<_>>();
        let remaining = active
            .iter()
            .filter(|handle| {
                config
                    .get(*handle)
                    .is_some_and(|state| state.source.hosts_views())
            })
            .count();
        if !active.is_empty() && remaining == 0 && !self.shutting_down {
            debug!("Configuration disables every output, adding the fallback output first");
            self.ensure_noop_output();
        }

        // Phase 2: disable first to free hardware resources like CRTCs
        for (handle, state) in config.iter().filter(|(_, state)| state.source.is_off()) {
            self.apply_output_state(*handle, state.clone());
            self.unmap(*handle);
        }

        let mut enabled = 0;

        // Phase 3: fixed positions
        for (handle, state) in config.iter().filter(|(_, state)| state.source.hosts_views()) {
            let OutputPosition::Fixed(loc) = state.position else {
                continue;
            };
            enabled += 1;
            self.map(*handle, loc);
            self.apply_output_state(*handle, state.clone());
        }

        // Phase 4: automatic positions, placed around the fixed ones
        for (handle, state) in config.iter().filter(|(_, state)| state.source.hosts_views()) {
            if !state.position.is_automatic() {
                continue;
            }
            enabled += 1;
            self.map_auto(*handle);
            self.apply_output_state(*handle, state.clone());
        }

        // Phase 5: mirrors
        for (handle, state) in config.iter().filter(|(_, state)| state.source.is_mirror()) {
            self.apply_output_state(*handle, state.clone());
            self.unmap(*handle);
        }

        self.sync_locations();

        // Automatic positions are only final now
        for (handle, state) in config.iter() {
            if state.source.hosts_views() && state.position.is_automatic() {
                if let Some(controller) = self.outputs.get(handle) {
                    controller.emit_configuration_changed(&mut *self.signals, ChangedFields::POSITION);
                }
            }
        }

        self.signals.emit(OutputSignal::LayoutConfigurationChanged);

        let noop_active = self.noop.as_ref().is_some_and(|noop| noop.output().is_some());
        if enabled > 0 && noop_active {
            self.scheduler
                .set_timeout(DeferredTask::RemoveNoopOutput, NOOP_REMOVAL_DELAY);
        }

        self.scheduler.run_once(DeferredTask::SendConfiguration);
    }

    /// Tests `config` and applies it if it passes.
    pub fn apply_or_test(&mut self, config: &OutputConfiguration, test_only: bool) -> bool {
        if !self.test_configuration(config) {
            return false;
        }

        if !test_only {
            self.apply_configuration(config);
        }

        true
    }

    /// Loads every output's state from the config and applies it if it changed.
    pub fn reconfigure_from_config(&mut self) {
        let _span = tracy_client::span!("LayoutManager::reconfigure_from_config");

        let config = self.load_configuration();

        if config == self.get_current_configuration() {
            debug!("Output configuration unchanged");
            return;
        }

        if self.test_configuration(&config) {
            self.apply_configuration(&config);
        }
    }

    /// The configuration every tracked output is configured with.
    pub fn load_configuration(&mut self) -> OutputConfiguration {
        self.outputs
            .iter_mut()
            .map(|(handle, controller)| {
                (
                    *handle,
                    controller.load_configured_state(&self.config, &mut self.backend),
                )
            })
            .collect()
    }

    /// Makes sure the fallback output exists and hosts views.
    pub fn ensure_noop_output(&mut self) {
        let _span = tracy_client::span!("LayoutManager::ensure_noop_output");

        if self.noop.is_none() {
            let handle = self.noop_backend.add_output(
                Connector::new(NOOP_OUTPUT_NAME).with_size(NOOP_WIDTH, NOOP_HEIGHT),
            );

            let Some(info) = self.noop_backend.output_info(handle) else {
                error!("Fallback output has no info");
                std::process::exit(1);
            };

            if !self.noop_backend.init_render(handle) {
                error!("Failed to initialize rendering for the fallback output");
                std::process::exit(1);
            }

            self.noop = Some(OutputController::new_noop(handle, info));
        }

        info!("Enabling output {NOOP_OUTPUT_NAME}");

        let Some(noop) = self.noop.as_mut() else {
            return;
        };
        let handle = noop.handle();
        let state = noop.load_configured_state(&self.config, &mut self.noop_backend);
        self.apply_noop_state(state);

        let size = self
            .noop
            .as_ref()
            .map(|noop| noop.effective_size(&self.noop_backend))
            .unwrap_or_default();
        if !self.space.contains(handle) {
            let loc = self.space.add_auto(handle, size);
            self.signals.emit(OutputSignal::LayoutMapped { output: handle, loc });
        }
        self.sync_locations();

        self.scheduler.cancel(DeferredTask::RemoveNoopOutput);
    }

    /// Disables the fallback output if it is active and a real output took over.
    pub fn remove_noop_output(&mut self) {
        let _span = tracy_client::span!("LayoutManager::remove_noop_output");

        let Some(noop) = self.noop.as_ref() else {
            return;
        };

        if noop.current_state().source.is_off() {
            return;
        }

        let real_active = self
            .outputs
            .values()
            .any(|controller| controller.current_state().source.hosts_views());
        if !real_active && !self.shutting_down {
            debug!("No real output is active, keeping {NOOP_OUTPUT_NAME}");
            return;
        }

        info!("Disabling output {NOOP_OUTPUT_NAME}");

        let handle = noop.handle();
        let mut state = noop.current_state().clone();
        state.source = ImageSource::Off;
        self.apply_noop_state(state);
        self.unmap(handle);

        // Let automatically placed outputs move into the freed space
        let config = self.get_current_configuration();
        self.apply_configuration(&config);
    }

    fn apply_noop_state(&mut self, state: OutputState) {
        let successor = self
            .noop
            .as_ref()
            .and_then(|noop| self.successor_for(noop.handle()));

        let Some(noop) = self.noop.as_mut() else {
            return;
        };

        let mut ctx = ApplyContext {
            backend: &mut self.noop_backend,
            signals: &mut *self.signals,
            config: &self.config,
            mirror_source: None,
            successor,
        };
        noop.apply_state(&mut ctx, state);
    }

    fn apply_output_state(&mut self, output: OutputHandle, state: OutputState) {
        let mirror_source = state
            .source
            .mirror_from()
            .and_then(|name| self.mirror_source(name));
        let successor = self.successor_for(output);

        let Some(controller) = self.outputs.get_mut(&output) else {
            error!(%output, "Cannot apply state to unknown output");
            return;
        };

        let mut ctx = ApplyContext {
            backend: &mut self.backend,
            signals: &mut *self.signals,
            config: &self.config,
            mirror_source,
            successor,
        };
        controller.apply_state(&mut ctx, state);

        let size = controller.effective_size(&self.backend);
        self.space.set_size(output, size);
    }

    /// The output a mirror of `name` would copy from, if it renders on its own.
    fn mirror_source(&self, name: &str) -> Option<OutputHandle> {
        self.outputs
            .values()
            .find(|controller| controller.name() == name)
            .filter(|controller| controller.current_state().source == ImageSource::Direct)
            .map(OutputController::handle)
    }

    /// The output views of `output` should move to when it goes away.
    fn successor_for(&self, output: OutputHandle) -> Option<OutputHandle> {
        if self.shutting_down {
            return None;
        }

        self.next_output(output).filter(|next| *next != output)
    }

    fn output_size(&self, output: OutputHandle) -> smithay::utils::Size<i32, Logical> {
        self.outputs
            .get(&output)
            .map(|controller| controller.effective_size(&self.backend))
            .unwrap_or_default()
    }

    fn map(&mut self, output: OutputHandle, loc: Point<i32, Logical>) {
        if !self.outputs.contains_key(&output) {
            return;
        }

        let previous = self.space.geometry(output).map(|geo| geo.loc);
        let size = self.output_size(output);
        self.space.add(output, loc, size);

        if previous != Some(loc) {
            self.signals.emit(OutputSignal::LayoutMapped { output, loc });
        }
    }

    fn map_auto(&mut self, output: OutputHandle) {
        if !self.outputs.contains_key(&output) {
            return;
        }

        let was_mapped = self.space.is_automatic(output);
        let size = self.output_size(output);
        let loc = self.space.add_auto(output, size);

        if !was_mapped {
            self.signals.emit(OutputSignal::LayoutMapped { output, loc });
        }
    }

    fn unmap(&mut self, output: OutputHandle) {
        if self.space.remove(output) {
            self.signals.emit(OutputSignal::LayoutUnmapped { output });
        }
    }

    /// Moves compositor outputs to where the space placed them.
    fn sync_locations(&self) {
        for (handle, geo) in self.space.outputs() {
            if let Some(controller) = self.controller(handle) {
                controller.set_location(geo.loc);
            }
        }
    }

    /// Turns an output's power on or off without touching the layout.
    pub fn set_power_mode(&mut self, output: OutputHandle, powered: bool) {
        let _span = tracy_client::span!("LayoutManager::set_power_mode");

        let mut config = self.get_current_configuration();
        let Some(state) = config.get_mut(&output) else {
            warn!(%output, "Cannot set the power mode of an unknown output");
            return;
        };

        if !state.source.hosts_views() {
            debug!(%output, "Output is not hosting views, ignoring power mode change");
            return;
        }

        debug!(%output, powered, "Setting power mode");

        state.source = if powered {
            ImageSource::Direct
        } else {
            ImageSource::Dpms
        };
        self.apply_configuration(&config);

        if let Some(controller) = self.outputs.get(&output) {
            if controller.is_inhibited() == powered {
                controller.set_inhibited(!powered);
            }
            controller.damage_whole();
        }

        let mode = if powered { PowerMode::On } else { PowerMode::Off };
        self.output_power_management_state.mode_changed(output, mode);
    }

    /// The power mode reported to power management clients.
    pub fn power_mode(&self, output: OutputHandle) -> Option<PowerMode> {
        let controller = self.outputs.get(&output)?;
        Some(if controller.current_state().source.drives_hardware() {
            PowerMode::On
        } else {
            PowerMode::Off
        })
    }

    /// Tears everything down.
    ///
    /// From here on outputs may all go away without the fallback output stepping in.
    pub fn shutdown(&mut self) {
        info!("Shutting down output layout");

        self.shutting_down = true;

        let config = self
            .outputs
            .keys()
            .map(|handle| (*handle, OutputState::off()))
            .collect::<OutputConfiguration>();
        self.apply_configuration(&config);

        for controller in self.outputs.values_mut() {
            controller.teardown_mirror(&mut self.backend);
        }

        if let Some(mut noop) = self.noop.take() {
            noop.destroy_compositor_output(&mut *self.signals, None);
            self.unmap(noop.handle());
        }

        self.scheduler.cancel_all();
    }

    /// Runs deferred work that is due at `now`.
    pub fn dispatch_pending(&mut self, now: Instant) {
        let _span = tracy_client::span!("LayoutManager::dispatch_pending");

        for task in self.scheduler.take_due(now) {
            self.run_task(task);
        }

        // Tasks queue idle work of their own, timers wait for the next dispatch
        loop {
            let idle = self.scheduler.take_idle();
            if idle.is_empty() {
                break;
            }
            for task in idle {
                self.run_task(task);
            }
        }
    }

    /// When [`Self::dispatch_pending`] should be called next.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline(Instant::now())
    }

    fn run_task(&mut self, task: DeferredTask) {
        debug!(?task, "Running deferred task");
        match task {
            DeferredTask::RemoveNoopOutput => self.remove_noop_output(),
            DeferredTask::SendConfiguration => self.send_configuration(),
        }
    }

    /// Advertises the current configuration to output management clients.
    fn send_configuration(&mut self) {
        let heads = self
            .outputs
            .values()
            .map(|controller| {
                let handle = controller.handle();
                let backend = &self.backend;
                HeadState {
                    output: handle,
                    name: controller.name().to_string(),
                    enabled: backend.is_enabled(handle),
                    modes: backend.modes(handle).into_iter().map(|adv| adv.mode).collect(),
                    current_mode: backend.current_mode(handle),
                    position: self
                        .space
                        .geometry(handle)
                        .map(|geo| geo.loc)
                        .unwrap_or_default(),
                    transform: backend.transform(handle),
                    scale: backend.scale(handle),
                    adaptive_sync: backend.adaptive_sync_enabled(handle),
                    depth: depth_for_format(backend.render_format(handle)),
                }
            })
            .collect();

        self.output_management_state.set_configuration(heads);
    }

    /// Outputs that currently host views, including the fallback output.
    pub fn outputs(&self) -> Vec<OutputHandle> {
        self.outputs
            .values()
            .chain(self.noop.iter())
            .filter(|controller| controller.output().is_some())
            .map(OutputController::handle)
            .collect()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs().len()
    }

    /// Every tracked real output, active or not.
    pub fn controllers(&self) -> impl Iterator<Item = &OutputController> {
        self.outputs.values()
    }

    /// The controller of `output`, which may be the fallback output.
    pub fn controller(&self, output: OutputHandle) -> Option<&OutputController> {
        self.outputs
            .get(&output)
            .or_else(|| self.noop.as_ref().filter(|noop| noop.handle() == output))
    }

    pub fn controller_by_name(&self, name: &str) -> Option<&OutputController> {
        self.outputs
            .values()
            .chain(self.noop.iter())
            .find(|controller| controller.name() == name)
    }

    pub fn noop(&self) -> Option<&OutputController> {
        self.noop.as_ref()
    }

    /// The compositor output of `output`.
    pub fn find_output(&self, output: OutputHandle) -> Option<&Output> {
        self.controller(output)?.output()
    }

    pub fn find_output_by_name(&self, name: &str) -> Option<&Output> {
        self.controller_by_name(name)?.output()
    }

    /// The output after `output` among [`Self::outputs`], wrapping around.
    ///
    /// An unknown output gets the first one.
    pub fn next_output(&self, output: OutputHandle) -> Option<OutputHandle> {
        let outputs = self.outputs();
        let next = outputs
            .iter()
            .position(|handle| *handle == output)
            .map(|idx| (idx + 1) % outputs.len())
            .unwrap_or(0);
        outputs.get(next).copied()
    }

    /// The output at the point of the layout closest to `point`, and that point.
    pub fn output_at(
        &self,
        point: Point<f64, Logical>,
    ) -> Option<(OutputHandle, Point<f64, Logical>)> {
        let _span = tracy_client::span!("LayoutManager::output_at");

        let closest = self.space.closest_point(point)?;
        let Some(output) = self.space.output_at(closest) else {
            if !self.shutting_down {
                error!("No output at the closest point {closest:?} to {point:?}");
            }
            return None;
        };

        Some((output, closest))
    }

    /// Outputs offered for leasing instead of being managed.
    pub fn leasable_outputs(&self) -> impl Iterator<Item = (OutputHandle, &OutputInfo)> {
        self.leasable.iter().map(|(handle, info)| (*handle, info))
    }

    /// Hands `outputs` over to output management clients.
    pub(crate) fn mark_externally_managed(
        &mut self,
        outputs: impl IntoIterator<Item = OutputHandle>,
    ) {
        for handle in outputs {
            if let Some(controller) = self.outputs.get_mut(&handle) {
                controller.set_externally_managed(true);
            }
        }
    }

    /// The current location of `output` in the layout.
    pub fn output_location(&self, output: OutputHandle) -> Option<Point<i32, Logical>> {
        self.space.geometry(output).map(|geo| geo.loc)
    }
}
