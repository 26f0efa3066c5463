// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A running record of what an orchestration run did.

use crate::readiness::{Checkpoint, CheckpointOutcome};
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

/// Orchestration phases, in the order a run passes through them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Classifying,
    Fetching,
    Staging,
    Executing,
    Certifying,
    AgentConverge,
    ServiceWait,
    Finalizing,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    Skipped { reason: &'static str },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunEventKind {
    PhaseStarted(Phase),
    HostStep { phase: Phase, host: String, outcome: StepOutcome },
    Checkpoint {
        checkpoint: Checkpoint,
        host: String,
        outcome: CheckpointOutcome,
    },
    Completed,
}

#[derive(Clone, Debug)]
pub struct RunEvent {
    pub at: Instant,
    pub kind: RunEventKind,
}

impl RunEvent {
    /// How long ago this event happened.
    pub fn age(&self) -> Duration {
        self.at.elapsed()
    }
}

#[derive(Clone, Debug, Default)]
pub struct RunLog {
    current: Option<Phase>,
    events: Vec<RunEvent>,
}

impl RunLog {
    pub fn current_phase(&self) -> Option<Phase> {
        self.current
    }

    pub fn events(&self) -> &[RunEvent] {
        &self.events
    }

    pub fn kinds(&self) -> impl Iterator<Item = &RunEventKind> {
        self.events.iter().map(|event| &event.kind)
    }

    /// Phases in the order they were first entered.
    pub fn phases(&self) -> Vec<Phase> {
        let mut phases = Vec::new();
        for kind in self.kinds() {
            let phase = match kind {
                RunEventKind::PhaseStarted(phase)
                | RunEventKind::HostStep { phase, .. } => *phase,
                RunEventKind::Checkpoint { .. } | RunEventKind::Completed => {
                    continue
                }
            };
            if !phases.contains(&phase) {
                phases.push(phase);
            }
        }
        phases
    }

    /// Hosts that recorded a step in `phase`, with the outcome, in order.
    pub fn host_steps(&self, phase: Phase) -> Vec<(&str, &StepOutcome)> {
        self.kinds()
            .filter_map(|kind| match kind {
                RunEventKind::HostStep { phase: p, host, outcome }
                    if *p == phase =>
                {
                    Some((host.as_str(), outcome))
                }
                _ => None,
            })
            .collect()
    }

    pub fn checkpoints(&self) -> Vec<(Checkpoint, &str, &CheckpointOutcome)> {
        self.kinds()
            .filter_map(|kind| match kind {
                RunEventKind::Checkpoint { checkpoint, host, outcome } => {
                    Some((*checkpoint, host.as_str(), outcome))
                }
                _ => None,
            })
            .collect()
    }

    pub fn is_completed(&self) -> bool {
        self.kinds().any(|kind| *kind == RunEventKind::Completed)
    }

    fn push(&mut self, kind: RunEventKind) {
        self.events.push(RunEvent { at: Instant::now(), kind });
    }
}

/// Shared handle to a [`RunLog`].
///
/// The lock is only held long enough to push an event or clone the log.
#[derive(Clone, Debug, Default)]
pub struct RunLogHandle {
    inner: Arc<StdMutex<RunLog>>,
}

impl RunLogHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> RunLog {
        self.lock().clone()
    }

    pub(crate) fn reset(&self) {
        *self.lock() = RunLog::default();
    }

    pub(crate) fn phase_started(&self, phase: Phase) {
        let mut log = self.lock();
        log.current = Some(phase);
        log.push(RunEventKind::PhaseStarted(phase));
    }

    pub(crate) fn host_step(
        &self,
        phase: Phase,
        host: &str,
        outcome: StepOutcome,
    ) {
        let mut log = self.lock();
        log.current = Some(phase);
        log.push(RunEventKind::HostStep {
            phase,
            host: host.to_owned(),
            outcome,
        });
    }

    pub(crate) fn checkpoint(
        &self,
        checkpoint: Checkpoint,
        host: &str,
        outcome: CheckpointOutcome,
    ) {
        self.lock().push(RunEventKind::Checkpoint {
            checkpoint,
            host: host.to_owned(),
            outcome,
        });
    }

    pub(crate) fn completed(&self) {
        let mut log = self.lock();
        log.current = Some(Phase::Done);
        log.push(RunEventKind::PhaseStarted(Phase::Done));
        log.push(RunEventKind::Completed);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RunLog> {
        // A panic while holding the lock can't leave a half-pushed event.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order_and_host_steps() {
        let handle = RunLogHandle::new();
        handle.phase_started(Phase::Classifying);
        handle.phase_started(Phase::Fetching);
        handle.host_step(Phase::Fetching, "a", StepOutcome::Completed);
        handle.host_step(
            Phase::Fetching,
            "b",
            StepOutcome::Skipped { reason: "no artifact" },
        );
        handle.host_step(Phase::Executing, "a", StepOutcome::Completed);
        handle.checkpoint(
            Checkpoint::Console,
            "a",
            CheckpointOutcome::Ready { attempts: 2 },
        );
        handle.host_step(Phase::Executing, "b", StepOutcome::Completed);
        handle.completed();

        let log = handle.snapshot();
        assert_eq!(
            log.phases(),
            [Phase::Classifying, Phase::Fetching, Phase::Executing, Phase::Done]
        );
        assert_eq!(
            log.host_steps(Phase::Fetching),
            [
                ("a", &StepOutcome::Completed),
                ("b", &StepOutcome::Skipped { reason: "no artifact" }),
            ]
        );
        assert_eq!(log.checkpoints().len(), 1);
        assert!(log.is_completed());
        assert_eq!(log.current_phase(), Some(Phase::Done));
        assert!(log.events()[0].age() >= log.events()[1].age());
    }
}
