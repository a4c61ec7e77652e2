use indexmap::IndexMap;
use tracing::{error, warn};

use crate::{
    backend::OutputBackend,
    layout::LayoutManager,
    output::{
        ImageSource, OutputConfiguration, OutputHandle, OutputPosition, OutputState,
        controller::depth_for_format,
    },
    protocol::{
        output_management::{HeadConfiguration, OutputManagementHandler, OutputManagementState},
        output_power_management::{
            OutputPowerManagementHandler, OutputPowerManagementState, PowerMode,
        },
    },
};

impl<B: OutputBackend> LayoutManager<B> {
    /// Turns a client request into a full configuration.
    ///
    /// Outputs the request doesn't mention keep their current state.
    fn configuration_from_heads(
        &self,
        heads: IndexMap<OutputHandle, HeadConfiguration>,
    ) -> OutputConfiguration {
        let mut config = self.get_current_configuration();

        for (output, head) in heads {
            let Some(controller) = self.controllers().find(|c| c.handle() == output) else {
                error!("output-management: request for unknown output {output}, ignoring");
                continue;
            };

            let state = match head {
                HeadConfiguration::Disabled => OutputState::off(),
                HeadConfiguration::Enabled {
                    mode,
                    custom_mode,
                    position,
                    transform,
                    scale,
                    adaptive_sync,
                } => {
                    let backend = self.backend();
                    let current = controller.current_state();

                    let (mode, uses_custom_mode) = match (mode, custom_mode) {
                        (Some(mode), _) => (mode, false),
                        (None, Some(custom)) => (custom, true),
                        (None, None) => (
                            backend.current_mode(output).unwrap_or(current.mode),
                            current.uses_custom_mode,
                        ),
                    };

                    let position = position
                        .or_else(|| self.output_location(output))
                        .unwrap_or_default();

                    OutputState {
                        source: ImageSource::Direct,
                        mode,
                        uses_custom_mode,
                        position: OutputPosition::Fixed(position),
                        scale: scale.unwrap_or_else(|| backend.scale(output)),
                        transform: transform.unwrap_or_else(|| backend.transform(output)),
                        vrr: adaptive_sync
                            .unwrap_or_else(|| backend.adaptive_sync_enabled(output)),
                        depth: depth_for_format(backend.render_format(output)),
                    }
                }
            };

            config.insert(output, state);
        }

        config
    }

    fn apply_heads(
        &mut self,
        heads: IndexMap<OutputHandle, HeadConfiguration>,
        test_only: bool,
    ) -> bool {
        let named = heads
            .keys()
            .copied()
            .filter(|output| self.controller(*output).is_some())
            .collect::<Vec<_>>();
        let config = self.configuration_from_heads(heads);

        if !self.apply_or_test(&config, test_only) {
            warn!("output-management: configuration rejected");
            return false;
        }

        if !test_only {
            self.mark_externally_managed(named);
        }

        true
    }
}

impl<B: OutputBackend> OutputManagementHandler for LayoutManager<B> {
    fn output_management_state(&mut self) -> &mut OutputManagementState {
        &mut self.output_management_state
    }

    fn apply_configuration(&mut self, heads: IndexMap<OutputHandle, HeadConfiguration>) -> bool {
        self.apply_heads(heads, false)
    }

    fn test_configuration(&mut self, heads: IndexMap<OutputHandle, HeadConfiguration>) -> bool {
        self.apply_heads(heads, true)
    }
}

impl<B: OutputBackend> OutputPowerManagementHandler for LayoutManager<B> {
    fn output_power_management_state(&mut self) -> &mut OutputPowerManagementState {
        &mut self.output_power_management_state
    }

    fn power_mode(&self, output: OutputHandle) -> Option<PowerMode> {
        LayoutManager::power_mode(self, output)
    }

    fn set_mode(&mut self, output: OutputHandle, powered: bool) {
        self.set_power_mode(output, powered);
    }
}
