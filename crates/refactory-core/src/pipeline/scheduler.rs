//! Periodic trigger with a run lock: at most one pass is ever in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::errors::RefactoryResult;
use crate::pipeline::orchestrator::{ChangeRequestReport, Orchestrator, PassReport};

const STOP_POLL_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub enum PassOutcome {
    Completed(PassReport),
    /// Another pass held the run lock.
    Skipped,
    /// `scheduler_enabled` is off.
    Disabled,
}

pub struct Poller {
    orchestrator: Orchestrator,
    run_lock: Mutex<()>,
}

impl Poller {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator,
            run_lock: Mutex::new(()),
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Run one pass unless one is already running.
    pub fn trigger(&self) -> PassOutcome {
        if !self.orchestrator.config().scheduler_enabled {
            debug!("Scheduler disabled, ignoring trigger");
            return PassOutcome::Disabled;
        }
        let Some(_guard) = self.run_lock.try_lock() else {
            warn!("Previous polling pass still running, skipping trigger");
            return PassOutcome::Skipped;
        };
        PassOutcome::Completed(self.orchestrator.poll_pass())
    }

    /// Process one change request, waiting for any running pass to finish.
    pub fn run_single(
        &self,
        project_external_id: i64,
        external_number: i64,
    ) -> RefactoryResult<Option<ChangeRequestReport>> {
        let _guard = self.run_lock.lock();
        self.orchestrator
            .process_single(project_external_id, external_number)
    }

    /// Trigger a pass every `poll_interval_secs` until `stop` is set.
    /// Returns the number of completed passes.
    pub fn run_until(&self, stop: &AtomicBool) -> usize {
        let interval = Duration::from_secs(self.orchestrator.config().poll_interval_secs);
        info!("Poller started with interval {:?}", interval);
        let mut completed = 0;
        while !stop.load(Ordering::Relaxed) {
            if let PassOutcome::Completed(_) = self.trigger() {
                completed += 1;
            }
            let deadline = Instant::now() + interval;
            loop {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                std::thread::sleep(STOP_POLL_SLICE.min(deadline - now));
            }
        }
        info!("Poller stopped after {} passes", completed);
        completed
    }
}
