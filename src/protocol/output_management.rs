use std::collections::VecDeque;

use indexmap::IndexMap;
use smithay::{
    output::Mode,
    utils::{Logical, Point, Transform},
};
use tracing::debug;

use crate::output::{BitDepth, OutputHandle};

/// What a client wants one head to be.
///
/// Unset fields keep the output's current value.
#[derive(Debug, Clone, PartialEq)]
pub enum HeadConfiguration {
    Disabled,
    Enabled {
        /// One of the head's advertised modes.
        mode: Option<Mode>,
        /// A mode the head did not advertise.
        custom_mode: Option<Mode>,
        position: Option<Point<i32, Logical>>,
        transform: Option<Transform>,
        scale: Option<f64>,
        adaptive_sync: Option<bool>,
    },
}

impl HeadConfiguration {
    /// An enabled head with nothing changed.
    pub fn enabled() -> Self {
        HeadConfiguration::Enabled {
            mode: None,
            custom_mode: None,
            position: None,
            transform: None,
            scale: None,
            adaptive_sync: None,
        }
    }
}

/// A client's test or apply request.
#[derive(Debug, Clone)]
pub struct ConfigurationRequest {
    /// The serial of the configuration the client based this request on.
    pub serial: u32,
    pub heads: IndexMap<OutputHandle, HeadConfiguration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigurationResult {
    Succeeded,
    Failed,
    /// The configuration changed since the client last saw it.
    Cancelled,
}

/// The advertised state of one head.
#[derive(Debug, Clone, PartialEq)]
pub struct HeadState {
    pub output: OutputHandle,
    pub name: String,
    pub enabled: bool,
    pub modes: Vec<Mode>,
    pub current_mode: Option<Mode>,
    /// The position in the layout, or the origin when not in the layout.
    pub position: Point<i32, Logical>,
    pub transform: Transform,
    pub scale: f64,
    pub adaptive_sync: bool,
    pub depth: BitDepth,
}

/// Events for the wire layer to send.
#[derive(Debug, Clone, PartialEq)]
pub enum HeadEvent {
    /// A head was added or changed.
    Head(HeadState),
    /// A head went away.
    Finished(OutputHandle),
    /// All changes of one advertisement were sent.
    Done { serial: u32 },
}

pub trait OutputManagementHandler {
    fn output_management_state(&mut self) -> &mut OutputManagementState;
    fn apply_configuration(&mut self, heads: IndexMap<OutputHandle, HeadConfiguration>) -> bool;
    fn test_configuration(&mut self, heads: IndexMap<OutputHandle, HeadConfiguration>) -> bool;
}

#[derive(Debug, Default)]
pub struct OutputManagementState {
    serial: u32,
    heads: IndexMap<OutputHandle, HeadState>,
    events: VecDeque<HeadEvent>,
}

impl OutputManagementState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The serial of the last advertised configuration.
    pub fn serial(&self) -> u32 {
        self.serial
    }

    pub fn heads(&self) -> impl Iterator<Item = &HeadState> {
        self.heads.values()
    }

    pub fn head(&self, output: OutputHandle) -> Option<&HeadState> {
        self.heads.get(&output)
    }

    /// Advertises a new configuration.
    ///
    /// Only heads that changed are sent. Requests based on an older serial get cancelled.
    pub fn set_configuration(&mut self, heads: Vec<HeadState>) {
        self.serial = self.serial.wrapping_add(1);

        let heads = heads
            .into_iter()
            .map(|head| (head.output, head))
            .collect::<IndexMap<_, _>>();

        for output in self.heads.keys().filter(|output| !heads.contains_key(*output)) {
            self.events.push_back(HeadEvent::Finished(*output));
        }

        for head in heads.values() {
            if self.heads.get(&head.output) != Some(head) {
                self.events.push_back(HeadEvent::Head(head.clone()));
            }
        }

        self.events.push_back(HeadEvent::Done {
            serial: self.serial,
        });
        self.heads = heads;
    }

    pub fn drain_events(&mut self) -> Vec<HeadEvent> {
        self.events.drain(..).collect()
    }

    /// Handles a client's test or apply request.
    pub fn configure<D: OutputManagementHandler>(
        state: &mut D,
        request: ConfigurationRequest,
        test_only: bool,
    ) -> ConfigurationResult {
        let serial = state.output_management_state().serial;
        if request.serial != serial {
            debug!(
                "output-management: configuration serial {} is stale, current is {serial}",
                request.serial
            );
            return ConfigurationResult::Cancelled;
        }

        let success = if test_only {
            state.test_configuration(request.heads)
        } else {
            state.apply_configuration(request.heads)
        };

        if success {
            ConfigurationResult::Succeeded
        } else {
            ConfigurationResult::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(output: OutputHandle, enabled: bool) -> HeadState {
        HeadState {
            output,
            name: format!("HEAD-{}", output.id()),
            enabled,
            modes: Vec::new(),
            current_mode: None,
            position: (0, 0).into(),
            transform: Transform::Normal,
            scale: 1.0,
            adaptive_sync: false,
            depth: BitDepth::Eight,
        }
    }

    #[test]
    fn only_changed_heads_are_sent() {
        let mut state = OutputManagementState::new();
        let a = OutputHandle::next();
        let b = OutputHandle::next();

        state.set_configuration(vec![head(a, true), head(b, true)]);
        assert_eq!(state.drain_events().len(), 3);

        state.set_configuration(vec![head(a, false), head(b, true)]);
        assert_eq!(
            state.drain_events(),
            vec![
                HeadEvent::Head(head(a, false)),
                HeadEvent::Done { serial: 2 }
            ]
        );

        state.set_configuration(vec![head(a, false)]);
        assert_eq!(
            state.drain_events(),
            vec![HeadEvent::Finished(b), HeadEvent::Done { serial: 3 }]
        );
        assert_eq!(state.heads().count(), 1);
    }
}
