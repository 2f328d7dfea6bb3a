// Homing orchestrator
//
// Runs every module's homing step each tick until all of them have reported
// zeroed, then stops everything and latches DONE. Teleop must not start
// until the orchestrator is DONE: before that the turning encoders have no
// known reference.

use tracing::{error, info, warn};

use super::module::HomingReport;

/// A module that can be homed
pub trait Homeable {
    type Error;

    fn name(&self) -> &str;

    fn run_homing_step(&mut self) -> Result<HomingReport, Self::Error>;

    fn stop(&mut self) -> Result<(), Self::Error>;
}

/// How homing ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomingOutcome {
    /// Every module reported zeroed
    Completed,
    /// Aborted by an operator before every module was zeroed
    Cancelled,
    /// Stopped without a reference: timed out, or driven with the wrong modules
    Faulted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomingState {
    Running,
    Done(HomingOutcome),
}

pub struct HomingOrchestrator {
    zeroed: Vec<bool>,
    state: HomingState,
    ticks: u64,
}

impl HomingOrchestrator {
    /// Begin homing `module_count` modules
    pub fn start(module_count: usize) -> Self {
        info!("Homing {} modules", module_count);
        Self {
            zeroed: vec![false; module_count],
            state: HomingState::Running,
            ticks: 0,
        }
    }

    pub fn state(&self) -> HomingState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, HomingState::Done(_))
    }

    pub fn outcome(&self) -> Option<HomingOutcome> {
        match self.state {
            HomingState::Done(outcome) => Some(outcome),
            HomingState::Running => None,
        }
    }

    /// Per-module completion flags, in module order
    pub fn zeroed(&self) -> &[bool] {
        &self.zeroed
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Run one homing step on every module still homing.
    ///
    /// Returns `(module index, report)` for each module stepped this tick,
    /// for telemetry. After DONE this does nothing.
    pub fn tick<M: Homeable>(
        &mut self,
        modules: &mut [M],
    ) -> Result<Vec<(usize, HomingReport)>, M::Error> {
        if self.is_complete() {
            return Ok(Vec::new());
        }
        if modules.len() != self.zeroed.len() {
            error!(
                "Homing started for {} modules but ticked with {}",
                self.zeroed.len(),
                modules.len()
            );
            self.finish(modules, HomingOutcome::Faulted)?;
            return Ok(Vec::new());
        }
        self.ticks += 1;

        let mut reports = Vec::with_capacity(modules.len());
        for (index, module) in modules.iter_mut().enumerate() {
            if self.zeroed[index] {
                continue;
            }
            let report = module.run_homing_step()?;
            if report.zeroed {
                info!("{} homed after {} ticks", module.name(), self.ticks);
                self.zeroed[index] = true;
            }
            reports.push((index, report));
        }

        if self.zeroed.iter().all(|&z| z) {
            self.finish(modules, HomingOutcome::Completed)?;
        }
        Ok(reports)
    }

    /// Abort homing on operator request, stopping every module. No-op once DONE.
    pub fn cancel<M: Homeable>(&mut self, modules: &mut [M]) -> Result<(), M::Error> {
        self.abort(modules, HomingOutcome::Cancelled)
    }

    /// Abort homing as a fault (e.g. it took too long). No-op once DONE.
    pub fn fault<M: Homeable>(&mut self, modules: &mut [M]) -> Result<(), M::Error> {
        self.abort(modules, HomingOutcome::Faulted)
    }

    fn abort<M: Homeable>(
        &mut self,
        modules: &mut [M],
        outcome: HomingOutcome,
    ) -> Result<(), M::Error> {
        if self.is_complete() {
            return Ok(());
        }
        let pending: Vec<&str> = modules
            .iter()
            .zip(&self.zeroed)
            .filter(|(_, zeroed)| !**zeroed)
            .map(|(module, _)| module.name())
            .collect();
        warn!("Homing aborted ({:?}) with {:?} not zeroed", outcome, pending);
        self.finish(modules, outcome)
    }

    fn finish<M: Homeable>(
        &mut self,
        modules: &mut [M],
        outcome: HomingOutcome,
    ) -> Result<(), M::Error> {
        self.state = HomingState::Done(outcome);
        // Stop everything even if one module fails, then report the first error
        let mut first_error = None;
        for module in modules.iter_mut() {
            if let Err(e) = module.stop() {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        info!("Homing done: {:?} after {} ticks", outcome, self.ticks);
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Module that zeroes after a fixed number of steps
    struct FakeModule {
        name: String,
        steps_to_zero: u32,
        steps: u32,
        stops: u32,
        fail_stop: bool,
    }

    impl FakeModule {
        fn new(name: &str, steps_to_zero: u32) -> Self {
            Self {
                name: name.to_string(),
                steps_to_zero,
                steps: 0,
                stops: 0,
                fail_stop: false,
            }
        }
    }

    impl Homeable for FakeModule {
        type Error = String;

        fn name(&self) -> &str {
            &self.name
        }

        fn run_homing_step(&mut self) -> Result<HomingReport, String> {
            self.steps += 1;
            let zeroed = self.steps >= self.steps_to_zero;
            Ok(HomingReport {
                zeroed,
                unclamped: 0.05,
                output: if zeroed { 0.0 } else { 0.05 },
                sensor_anomaly: false,
            })
        }

        fn stop(&mut self) -> Result<(), String> {
            self.stops += 1;
            if self.fail_stop {
                Err(format!("{} stop failed", self.name))
            } else {
                Ok(())
            }
        }
    }

    fn four(steps: [u32; 4]) -> Vec<FakeModule> {
        ["fl", "fr", "bl", "br"]
            .iter()
            .zip(steps)
            .map(|(name, n)| FakeModule::new(name, n))
            .collect()
    }

    #[test]
    fn test_completes_only_when_all_zeroed() {
        let mut modules = four([1, 3, 2, 5]);
        let mut homing = HomingOrchestrator::start(modules.len());

        for tick in 1..5 {
            homing.tick(&mut modules).unwrap();
            assert_eq!(homing.state(), HomingState::Running, "tick {}", tick);
        }
        homing.tick(&mut modules).unwrap();
        assert_eq!(homing.state(), HomingState::Done(HomingOutcome::Completed));
        assert!(homing.is_complete());
        assert_eq!(homing.ticks(), 5);
    }

    #[test]
    fn test_zeroed_modules_are_skipped() {
        let mut modules = four([1, 3, 2, 5]);
        let mut homing = HomingOrchestrator::start(modules.len());
        while !homing.is_complete() {
            homing.tick(&mut modules).unwrap();
        }
        let steps: Vec<u32> = modules.iter().map(|m| m.steps).collect();
        assert_eq!(steps, vec![1, 3, 2, 5]);
    }

    #[test]
    fn test_reports_cover_stepped_modules() {
        let mut modules = four([1, 2, 2, 2]);
        let mut homing = HomingOrchestrator::start(modules.len());
        let first = homing.tick(&mut modules).unwrap();
        assert_eq!(first.len(), 4);
        assert!(first[0].1.zeroed);
        let second = homing.tick(&mut modules).unwrap();
        let indices: Vec<usize> = second.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert_eq!(homing.zeroed(), &[true, true, true, true]);
    }

    #[test]
    fn test_no_ticks_after_done() {
        let mut modules = four([1, 1, 1, 1]);
        let mut homing = HomingOrchestrator::start(modules.len());
        homing.tick(&mut modules).unwrap();
        assert!(homing.is_complete());

        for _ in 0..3 {
            assert!(homing.tick(&mut modules).unwrap().is_empty());
        }
        assert!(modules.iter().all(|m| m.steps == 1));
        assert_eq!(homing.ticks(), 1);
    }

    #[test]
    fn test_done_stops_every_module() {
        let mut modules = four([1, 2, 1, 1]);
        let mut homing = HomingOrchestrator::start(modules.len());
        homing.tick(&mut modules).unwrap();
        assert!(modules.iter().all(|m| m.stops == 0));
        homing.tick(&mut modules).unwrap();
        assert!(modules.iter().all(|m| m.stops == 1));
    }

    #[test]
    fn test_cancel_stops_and_latches() {
        let mut modules = four([10, 10, 1, 10]);
        let mut homing = HomingOrchestrator::start(modules.len());
        homing.tick(&mut modules).unwrap();
        homing.cancel(&mut modules).unwrap();
        assert_eq!(homing.outcome(), Some(HomingOutcome::Cancelled));
        assert!(modules.iter().all(|m| m.stops == 1));

        assert!(homing.tick(&mut modules).unwrap().is_empty());
        homing.cancel(&mut modules).unwrap();
        assert!(modules.iter().all(|m| m.stops == 1));
    }

    #[test]
    fn test_stop_failure_still_stops_others() {
        let mut modules = four([1, 1, 1, 1]);
        modules[1].fail_stop = true;
        let mut homing = HomingOrchestrator::start(modules.len());
        let result = homing.tick(&mut modules);
        assert_eq!(result.unwrap_err(), "fr stop failed");
        assert!(homing.is_complete());
        assert!(modules.iter().all(|m| m.stops == 1));
    }

    #[test]
    fn test_fault_latches_faulted() {
        let mut modules = four([10, 10, 10, 10]);
        let mut homing = HomingOrchestrator::start(modules.len());
        homing.tick(&mut modules).unwrap();
        homing.fault(&mut modules).unwrap();
        assert_eq!(homing.outcome(), Some(HomingOutcome::Faulted));
        assert!(modules.iter().all(|m| m.stops == 1));

        // later aborts do not change the outcome
        homing.cancel(&mut modules).unwrap();
        assert_eq!(homing.outcome(), Some(HomingOutcome::Faulted));
    }

    #[test]
    fn test_fewer_modules_than_started_faults() {
        let mut modules = four([1, 1, 1, 1]);
        let mut homing = HomingOrchestrator::start(5);
        assert!(homing.tick(&mut modules).unwrap().is_empty());
        assert_eq!(homing.outcome(), Some(HomingOutcome::Faulted));
        assert!(modules.iter().all(|m| m.steps == 0));
        assert!(modules.iter().all(|m| m.stops == 1));
    }

    #[test]
    fn test_more_modules_than_started_faults() {
        let mut modules = four([1, 1, 1, 1]);
        let mut homing = HomingOrchestrator::start(3);
        homing.tick(&mut modules).unwrap();
        assert_eq!(homing.outcome(), Some(HomingOutcome::Faulted));
        assert!(modules.iter().all(|m| m.steps == 0));
        assert_eq!(homing.ticks(), 0);
    }

    #[test]
    fn test_empty_drivetrain_completes_on_first_tick() {
        let mut modules: Vec<FakeModule> = Vec::new();
        let mut homing = HomingOrchestrator::start(0);
        homing.tick(&mut modules).unwrap();
        assert_eq!(homing.outcome(), Some(HomingOutcome::Completed));
    }
}
