// SPDX-License-Identifier: GPL-3.0-or-later

use crate::{
    backend::{OutputBackend, PendingOutputState},
    output::OutputHandle,
};

/// Accumulates hardware changes for one output until they are tested or committed.
#[derive(Debug, Default)]
pub struct OutputStateSetter {
    pub pending: PendingOutputState,
}

impl OutputStateSetter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discards all pending changes.
    pub fn reset(&mut self) {
        self.pending = PendingOutputState::default();
    }

    /// Commits all pending changes on the output.
    ///
    /// The pending state is reset whether or not the commit succeeded.
    pub fn commit(&mut self, backend: &mut dyn OutputBackend, output: OutputHandle) -> bool {
        let committed = backend.commit_state(output, &self.pending);
        self.reset();
        committed
    }

    /// Tests whether the pending changes could be applied. Does not reset.
    pub fn test(&self, backend: &mut dyn OutputBackend, output: OutputHandle) -> bool {
        backend.test_state(output, &self.pending)
    }

    /// Tests the pending changes and commits them if they can be applied.
    ///
    /// The pending state is reset in both cases.
    pub fn test_and_commit(&mut self, backend: &mut dyn OutputBackend, output: OutputHandle) -> bool {
        if self.test(backend, output) {
            self.commit(backend, output);
            true
        } else {
            self.reset();
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::headless::{Connector, HeadlessBackend};

    use super::*;

    #[test]
    fn commit_resets_even_on_failure() {
        let mut backend = HeadlessBackend::new();
        backend.reject_adaptive_sync = true;
        let out = backend.add_output(Connector::new("DP-1"));

        let mut setter = OutputStateSetter::new();
        setter.pending.adaptive_sync = Some(true);

        assert!(!setter.commit(&mut backend, out));
        assert!(setter.pending.is_empty());
    }

    #[test]
    fn test_keeps_pending_state() {
        let mut backend = HeadlessBackend::new();
        let out = backend.add_output(Connector::new("DP-1"));

        let mut setter = OutputStateSetter::new();
        setter.pending.enabled = Some(true);

        assert!(setter.test(&mut backend, out));
        assert_eq!(setter.pending.enabled, Some(true));
        assert!(backend.commits().is_empty());
    }

    #[test]
    fn test_and_commit_only_commits_feasible_state() {
        let mut backend = HeadlessBackend::new();
        backend.reject_adaptive_sync = true;
        let out = backend.add_output(Connector::new("DP-1"));

        let mut setter = OutputStateSetter::new();
        setter.pending.adaptive_sync = Some(true);
        assert!(!setter.test_and_commit(&mut backend, out));
        assert!(setter.pending.is_empty());
        assert!(backend.commits().is_empty());

        setter.pending.enabled = Some(true);
        assert!(setter.test_and_commit(&mut backend, out));
        assert!(setter.pending.is_empty());
        assert_eq!(backend.commits().len(), 1);
        assert!(backend.is_enabled(out));
    }
}
