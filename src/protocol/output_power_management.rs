use std::collections::{HashMap, VecDeque};

use tracing::warn;

use crate::output::OutputHandle;

/// A client's power control object for one output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PowerControl(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerMode {
    On,
    Off,
}

/// Events for the wire layer to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerEvent {
    Mode { control: PowerControl, mode: PowerMode },
    /// The control object is no longer usable.
    Failed { control: PowerControl },
}

#[derive(Debug, Default)]
pub struct OutputPowerManagementState {
    clients: HashMap<OutputHandle, PowerControl>,
    next_id: u32,
    events: VecDeque<PowerEvent>,
}

pub trait OutputPowerManagementHandler {
    fn output_power_management_state(&mut self) -> &mut OutputPowerManagementState;
    /// The current power mode of `output`, or `None` if there is no such output.
    fn power_mode(&self, output: OutputHandle) -> Option<PowerMode>;
    fn set_mode(&mut self, output: OutputHandle, powered: bool);
}

impl OutputPowerManagementState {
    pub fn new() -> Self {
        Self::default()
    }

    fn new_control(&mut self) -> PowerControl {
        self.next_id += 1;
        PowerControl(self.next_id)
    }

    /// Creates a power control object for `output`.
    ///
    /// Only one object may control an output at a time, any further ones fail immediately.
    pub fn get_output_power<D: OutputPowerManagementHandler>(
        state: &mut D,
        output: OutputHandle,
    ) -> PowerControl {
        let mode = state.power_mode(output);
        let power_state = state.output_power_management_state();
        let control = power_state.new_control();

        let Some(mode) = mode else {
            warn!("output-power-management: no output {output}");
            power_state.events.push_back(PowerEvent::Failed { control });
            return control;
        };

        if power_state.clients.contains_key(&output) {
            warn!("output-power-management: {output} already has an active power manager");
            power_state.events.push_back(PowerEvent::Failed { control });
            return control;
        }

        power_state.events.push_back(PowerEvent::Mode { control, mode });
        power_state.clients.insert(output, control);
        control
    }

    pub fn set_mode<D: OutputPowerManagementHandler>(
        state: &mut D,
        control: PowerControl,
        mode: PowerMode,
    ) {
        let Some(output) = state
            .output_power_management_state()
            .clients
            .iter()
            .find_map(|(output, ctl)| (*ctl == control).then_some(*output))
        else {
            return;
        };

        state.set_mode(output, mode == PowerMode::On);
    }

    pub fn destroy(&mut self, control: PowerControl) {
        self.clients.retain(|_, ctl| *ctl != control);
    }

    /// Reports the new mode of `output` to its control object.
    pub fn mode_changed(&mut self, output: OutputHandle, mode: PowerMode) {
        if let Some(control) = self.clients.get(&output).copied() {
            self.events.push_back(PowerEvent::Mode { control, mode });
        }
    }

    pub fn output_removed(&mut self, output: OutputHandle) {
        if let Some(control) = self.clients.remove(&output) {
            self.events.push_back(PowerEvent::Failed { control });
        }
    }

    pub fn drain_events(&mut self) -> Vec<PowerEvent> {
        self.events.drain(..).collect()
    }
}
