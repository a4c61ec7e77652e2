// SPDX-License-Identifier: GPL-3.0-or-later

use tracing::trace;

use crate::{
    backend::{Buffer, OutputBackend},
    output::OutputHandle,
};

/// The resources an output holds while it mirrors another one.
///
/// Creating a subscription forces software cursors on the source so they end up
/// in its buffers. The latest buffer the source presented is retained until the
/// next one arrives. Everything is released by [`MirrorSubscription::teardown`].
#[derive(Debug)]
pub struct MirrorSubscription {
    source: OutputHandle,
    source_name: String,
    retained: Option<Buffer>,
}

impl MirrorSubscription {
    pub fn new(
        backend: &mut dyn OutputBackend,
        target: OutputHandle,
        source: OutputHandle,
        source_name: String,
    ) -> Self {
        backend.lock_software_cursors(source, true);
        backend.schedule_frame(target);

        Self {
            source,
            source_name,
            retained: None,
        }
    }

    pub fn source(&self) -> OutputHandle {
        self.source
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Retains the buffer the source just presented, releasing the previous one.
    pub fn retain(&mut self, buffer: Buffer) {
        trace!(source = %self.source_name, id = buffer.id(), "Retaining mirrored buffer");
        self.retained = Some(buffer);
    }

    pub fn retained(&self) -> Option<&Buffer> {
        self.retained.as_ref()
    }

    /// Releases the retained buffer and the cursor lock on the source.
    pub fn teardown(self, backend: &mut dyn OutputBackend) {
        backend.lock_software_cursors(self.source, false);
    }
}
