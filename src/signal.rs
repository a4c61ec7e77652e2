use std::{cell::RefCell, rc::Rc};

use smithay::{
    reexports::calloop::channel::Sender,
    utils::{Logical, Point},
};

use crate::output::{ChangedFields, OutputHandle};

/// Notifications about the compositor-facing side of outputs.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputSignal {
    /// A compositor output was created.
    Added { output: OutputHandle, name: String },
    /// A compositor output is about to be destroyed.
    ///
    /// `successor` is the output views should move to, or `None` when shutting down
    /// or when no other output exists.
    PreRemove {
        output: OutputHandle,
        successor: Option<OutputHandle>,
    },
    /// A compositor output was destroyed.
    Removed { output: OutputHandle },
    /// The state of a compositor output changed.
    ConfigurationChanged {
        output: OutputHandle,
        changed: ChangedFields,
    },
    /// Sent once after every application of a configuration.
    LayoutConfigurationChanged,
    /// An output was placed in the spatial layout.
    LayoutMapped {
        output: OutputHandle,
        loc: Point<i32, Logical>,
    },
    /// An output was taken out of the spatial layout.
    LayoutUnmapped { output: OutputHandle },
}

/// Receives [`OutputSignal`]s.
pub trait SignalSink {
    fn emit(&mut self, signal: OutputSignal);
}

/// A sink that records every signal, for inspection by tests and tools.
///
/// Clones share the same record.
#[derive(Debug, Default, Clone)]
pub struct SignalRecorder {
    signals: Rc<RefCell<Vec<OutputSignal>>>,
}

impl SignalRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes everything recorded so far.
    pub fn take(&self) -> Vec<OutputSignal> {
        std::mem::take(&mut *self.signals.borrow_mut())
    }
}

impl SignalSink for SignalRecorder {
    fn emit(&mut self, signal: OutputSignal) {
        self.signals.borrow_mut().push(signal);
    }
}

impl SignalSink for Sender<OutputSignal> {
    fn emit(&mut self, signal: OutputSignal) {
        if let Err(err) = self.send(signal) {
            tracing::error!("Error sending output signal: {err}");
        }
    }
}
