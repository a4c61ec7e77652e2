//! Deferred work for the layout manager.
//!
//! Nothing here touches the event loop directly. The owner asks for due tasks
//! with [`Scheduler::take_due`] once per loop iteration and uses
//! [`Scheduler::next_deadline`] to compute how long the loop may sleep.

use std::time::{Duration, Instant};

use indexmap::{IndexMap, IndexSet};

/// Work that runs outside of the call that requested it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeferredTask {
    /// Disable the fallback output if a real output has taken over.
    RemoveNoopOutput,
    /// Advertise the current configuration to output management clients.
    SendConfiguration,
}

#[derive(Debug, Default)]
pub struct Scheduler {
    timers: IndexMap<DeferredTask, Instant>,
    idle: IndexSet<DeferredTask>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a one-shot timer for `task`, replacing any previous deadline for it.
    pub fn set_timeout(&mut self, task: DeferredTask, delay: Duration) {
        self.set_deadline(task, Instant::now() + delay);
    }

    pub fn set_deadline(&mut self, task: DeferredTask, deadline: Instant) {
        self.timers.insert(task, deadline);
    }

    /// Queues `task` to run on the next dispatch. Queuing an already queued task does nothing.
    pub fn run_once(&mut self, task: DeferredTask) {
        self.idle.insert(task);
    }

    /// Revokes both the timer and the idle entry for `task`.
    pub fn cancel(&mut self, task: DeferredTask) {
        self.timers.shift_remove(&task);
        self.idle.shift_remove(&task);
    }

    pub fn cancel_all(&mut self) {
        self.timers.clear();
        self.idle.clear();
    }

    pub fn deadline(&self, task: DeferredTask) -> Option<Instant> {
        self.timers.get(&task).copied()
    }

    pub fn is_queued(&self, task: DeferredTask) -> bool {
        self.idle.contains(&task)
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty() && self.idle.is_empty()
    }

    /// The earliest timer deadline.
    ///
    /// Returns `now` when idle work is queued so the caller does not sleep.
    pub fn next_deadline(&self, now: Instant) -> Option<Instant> {
        if !self.idle.is_empty() {
            return Some(now);
        }
        self.timers.values().min().copied()
    }

    /// Removes and returns every task that should run at `now`.
    ///
    /// Expired timers come first, earliest deadline first, followed by the idle
    /// queue in the order it was filled.
    pub fn take_due(&mut self, now: Instant) -> Vec<DeferredTask> {
        let mut expired = self
            .timers
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(task, deadline)| (*task, *deadline))
            .collect::<Vec<_>>();
        expired.sort_by_key(|(_, deadline)| *deadline);

        for (task, _) in expired.iter() {
            self.timers.shift_remove(task);
        }

        expired
            .into_iter()
            .map(|(task, _)| task)
            .chain(self.idle.drain(..))
            .collect()
    }

    /// Removes and returns the idle queue, leaving timers alone.
    pub fn take_idle(&mut self) -> Vec<DeferredTask> {
        self.idle.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_tasks_run_once() {
        let mut scheduler = Scheduler::new();
        scheduler.run_once(DeferredTask::SendConfiguration);
        scheduler.run_once(DeferredTask::SendConfiguration);

        let now = Instant::now();
        assert_eq!(scheduler.next_deadline(now), Some(now));
        assert_eq!(
            scheduler.take_due(now),
            vec![DeferredTask::SendConfiguration]
        );
        assert!(scheduler.take_due(now).is_empty());
        assert!(scheduler.is_empty());
    }

    #[test]
    fn timers_fire_only_after_their_deadline() {
        let mut scheduler = Scheduler::new();
        let start = Instant::now();
        scheduler.set_deadline(DeferredTask::RemoveNoopOutput, start + Duration::from_millis(1000));

        assert!(scheduler.take_due(start + Duration::from_millis(999)).is_empty());
        assert_eq!(
            scheduler.next_deadline(start),
            Some(start + Duration::from_millis(1000))
        );
        assert_eq!(
            scheduler.take_due(start + Duration::from_millis(1000)),
            vec![DeferredTask::RemoveNoopOutput]
        );
        assert_eq!(scheduler.next_deadline(start), None);
    }

    #[test]
    fn rearming_replaces_the_deadline() {
        let mut scheduler = Scheduler::new();
        let start = Instant::now();
        scheduler.set_deadline(DeferredTask::RemoveNoopOutput, start + Duration::from_millis(100));
        scheduler.set_deadline(DeferredTask::RemoveNoopOutput, start + Duration::from_millis(500));

        assert!(scheduler.take_due(start + Duration::from_millis(200)).is_empty());
        assert_eq!(
            scheduler.take_due(start + Duration::from_millis(500)),
            vec![DeferredTask::RemoveNoopOutput]
        );
    }

    #[test]
    fn cancel_revokes_timers_and_idle_entries() {
        let mut scheduler = Scheduler::new();
        let start = Instant::now();
        scheduler.set_deadline(DeferredTask::RemoveNoopOutput, start);
        scheduler.run_once(DeferredTask::SendConfiguration);

        scheduler.cancel(DeferredTask::RemoveNoopOutput);
        assert_eq!(scheduler.deadline(DeferredTask::RemoveNoopOutput), None);
        assert!(scheduler.is_queued(DeferredTask::SendConfiguration));

        scheduler.cancel_all();
        assert!(scheduler.take_due(start).is_empty());
    }

    #[test]
    fn expired_timers_run_before_idle_work() {
        let mut scheduler = Scheduler::new();
        let start = Instant::now();
        scheduler.run_once(DeferredTask::SendConfiguration);
        scheduler.set_deadline(DeferredTask::RemoveNoopOutput, start);

        assert_eq!(
            scheduler.take_due(start),
            vec![
                DeferredTask::RemoveNoopOutput,
                DeferredTask::SendConfiguration
            ]
        );
    }
}
