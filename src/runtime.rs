// 50 Hz control loop: homing phase, then teleop with a watchdog
// Teleop targets older than CMD_TIMEOUT stop every module, so a crashed
// kinematics publisher cannot leave the wheels driving.

use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::{debug, info, warn};

// local imports
use crate::config::{
    CMD_TIMEOUT, LOOP_HZ, RuntimeConfig, TOPIC_CMD_MODULES, TOPIC_CMD_OPERATOR, TOPIC_HEALTH,
    TOPIC_STATE_HOMING, TOPIC_STATE_MODULES,
};
use crate::hardware::feetech::FeetechBackend;
use crate::hardware::sim::SimBackend;
use crate::hardware::{HardwareBackend, HardwareError};
use crate::messages::{
    HomingSample, ModuleTargets, ModuleTelemetry, OperatorCommand, RuntimeHealth,
};
use crate::swerve::{HomingOrchestrator, HomingOutcome, SwerveModule};

/// Acquire and configure every module. Any failure aborts startup.
pub fn open_modules(
    backend: &mut dyn HardwareBackend,
    config: &RuntimeConfig,
) -> Result<Vec<SwerveModule>, HardwareError> {
    config
        .modules
        .iter()
        .map(|module| {
            let devices = backend.open_module(module)?;
            SwerveModule::new(module, &config.constants, &config.homing, devices)
        })
        .collect()
}

/// What one control tick produced, ready to publish
#[derive(Debug, Default)]
pub struct TickOutput {
    pub homing: Vec<HomingSample>,
    pub modules: Vec<ModuleTelemetry>,
}

pub struct Runtime {
    modules: Vec<SwerveModule>,
    homing: HomingOrchestrator,
    homing_started_at: Instant,
    homing_timeout: Duration,
    latest_targets: Option<ModuleTargets>,
    targets_received_at: Instant,
    health: RuntimeHealth,
}

impl Runtime {
    pub fn new(modules: Vec<SwerveModule>, homing_timeout: Duration, now: Instant) -> Self {
        let homing = HomingOrchestrator::start(modules.len());
        Self {
            modules,
            homing,
            homing_started_at: now,
            homing_timeout,
            latest_targets: None,
            targets_received_at: now,
            health: RuntimeHealth::Homing,
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    pub fn homing(&self) -> &HomingOrchestrator {
        &self.homing
    }

    /// Process incoming per-module targets
    pub fn on_targets(&mut self, targets: ModuleTargets, now: Instant) {
        if !self.homing.is_complete() {
            debug!("Ignoring targets while homing");
            return;
        }
        if targets.states.len() != self.modules.len() {
            warn!(
                "Ignoring targets for {} modules, drivetrain has {}",
                targets.states.len(),
                self.modules.len()
            );
            return;
        }
        self.latest_targets = Some(targets);
        self.targets_received_at = now;
    }

    pub fn on_operator(&mut self, command: OperatorCommand) -> Result<(), HardwareError> {
        info!("Operator command: {:?}", command);
        match command {
            OperatorCommand::AbortHoming => self.homing.cancel(&mut self.modules),
            OperatorCommand::ToggleIdleMode => {
                for module in &mut self.modules {
                    module.toggle_idle_mode()?;
                }
                Ok(())
            }
        }
    }

    /// Run one control period
    pub fn step(&mut self, now: Instant) -> Result<TickOutput, HardwareError> {
        let mut output = TickOutput::default();

        match self.homing.outcome() {
            None => output.homing = self.step_homing(now)?,
            Some(HomingOutcome::Faulted) => self.stop_all()?,
            Some(_) => self.step_teleop(now)?,
        }

        for module in &mut self.modules {
            output.modules.push(ModuleTelemetry {
                module: module.name().to_string(),
                absolute_deg: module.absolute_position()?,
                position: module.position()?,
                state: module.state()?,
            });
        }
        Ok(output)
    }

    fn step_homing(&mut self, now: Instant) -> Result<Vec<HomingSample>, HardwareError> {
        let elapsed = now.saturating_duration_since(self.homing_started_at);
        if elapsed > self.homing_timeout {
            warn!("Homing did not converge within {:?}, stopping", self.homing_timeout);
            self.health = RuntimeHealth::HomingFault;
            self.homing.fault(&mut self.modules)?;
            return Ok(Vec::new());
        }

        let reports = self.homing.tick(&mut self.modules)?;
        let samples = reports
            .iter()
            .map(|(index, report)| HomingSample::new(self.modules[*index].name(), report))
            .collect();

        match self.homing.outcome() {
            Some(HomingOutcome::Completed) => {
                info!("All modules homed, teleop enabled");
                self.health = RuntimeHealth::CmdStale;
            }
            Some(HomingOutcome::Cancelled) => {
                warn!("Homing cancelled, teleop enabled without a verified reference");
                self.health = RuntimeHealth::CmdStale;
            }
            Some(HomingOutcome::Faulted) => self.health = RuntimeHealth::HomingFault,
            None => self.health = RuntimeHealth::Homing,
        }
        Ok(samples)
    }

    /// Apply the latest targets, or stop if they are stale
    fn step_teleop(&mut self, now: Instant) -> Result<(), HardwareError> {
        let age = now.saturating_duration_since(self.targets_received_at);

        if let Some(targets) = self.latest_targets.as_ref().filter(|_| age <= CMD_TIMEOUT) {
            self.health = RuntimeHealth::Ok;
            for (module, state) in self.modules.iter_mut().zip(&targets.states) {
                module.set_desired_state(*state)?;
            }
            return Ok(());
        }

        // Watchdog triggered - stop the drivetrain
        if self.health != RuntimeHealth::CmdStale {
            warn!("Targets stale ({:?} old), stopping modules", age);
        }
        self.health = RuntimeHealth::CmdStale;
        self.stop_all()
    }

    pub fn stop_all(&mut self) -> Result<(), HardwareError> {
        for module in &mut self.modules {
            module.stop()?;
        }
        Ok(())
    }
}

/// How the runtime reaches its hardware
#[derive(Debug, Clone)]
pub enum Backend {
    Sim,
    Feetech { port: String },
}

fn open_backend(
    backend: &Backend,
    config: &RuntimeConfig,
) -> Result<Box<dyn HardwareBackend>, HardwareError> {
    match backend {
        Backend::Sim => {
            info!("Using simulated modules");
            Ok(Box::new(SimBackend::new(config.sim)))
        }
        Backend::Feetech { port } => Ok(Box::new(FeetechBackend::open(port)?)),
    }
}

pub async fn run(
    config: RuntimeConfig,
    backend: Backend,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut hardware = open_backend(&backend, &config)?;
    let modules = open_modules(hardware.as_mut(), &config)?;

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let sub_targets = session.declare_subscriber(TOPIC_CMD_MODULES).await?;
    let sub_operator = session.declare_subscriber(TOPIC_CMD_OPERATOR).await?;
    let pub_modules = session.declare_publisher(TOPIC_STATE_MODULES).await?;
    let pub_homing = session.declare_publisher(TOPIC_STATE_HOMING).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let period = Duration::from_millis(1000 / LOOP_HZ);
    let mut runtime = Runtime::new(modules, config.homing.timeout(), Instant::now());
    let mut tick = interval(period);
    // One listener for the whole run so a SIGINT during a tick is not lost
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        "Runtime started: {}Hz loop, {}ms watchdog timeout, {}ms homing timeout",
        LOOP_HZ,
        CMD_TIMEOUT.as_millis(),
        config.homing.timeout_ms
    );
    info!("Subscribed to: {}, {}", TOPIC_CMD_MODULES, TOPIC_CMD_OPERATOR);
    info!(
        "Publishing to: {}, {}, {}",
        TOPIC_STATE_MODULES, TOPIC_STATE_HOMING, TOPIC_HEALTH
    );

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = &mut shutdown => {
                info!("Shutting down");
                runtime.stop_all()?;
                return Ok(());
            }
        }
        let now = Instant::now();

        // 1. Drain pending operator commands and targets (non-blocking), keep latest target
        while let Ok(Some(sample)) = sub_operator.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<OperatorCommand>(&payload) {
                Ok(command) => runtime.on_operator(command)?,
                Err(e) => warn!("Failed to parse operator command: {}", e),
            }
        }
        while let Ok(Some(sample)) = sub_targets.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<ModuleTargets>(&payload) {
                Ok(targets) => runtime.on_targets(targets, now),
                Err(e) => warn!("Failed to parse targets: {}", e),
            }
        }

        // 2. Advance the plant (simulation only) and run the control step
        hardware.step(period.as_secs_f64());
        let output = runtime.step(now)?;

        // 3. Publish telemetry
        if !output.homing.is_empty() {
            pub_homing.put(serde_json::to_string(&output.homing)?).await?;
        }
        pub_modules.put(serde_json::to_string(&output.modules)?).await?;

        // 4. Publish health
        let health_json = serde_json::to_string(&runtime.health())?;
        pub_health.put(health_json).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::sim::SimHandle;
    use crate::swerve::{HomingState, ModuleState};

    const DT: Duration = Duration::from_millis(20);

    struct Bench {
        backend: SimBackend,
        runtime: Runtime,
        now: Instant,
    }

    impl Bench {
        fn new(config: &RuntimeConfig) -> Self {
            let mut backend = SimBackend::new(config.sim);
            let modules = open_modules(&mut backend, config).unwrap();
            let now = Instant::now();
            let runtime = Runtime::new(modules, config.homing.timeout(), now);
            Self {
                backend,
                runtime,
                now,
            }
        }

        fn wheels(&self) -> Vec<SimHandle> {
            self.backend.wheels().to_vec()
        }

        fn tick(&mut self) -> TickOutput {
            self.now += DT;
            self.backend.step(DT.as_secs_f64());
            self.runtime.step(self.now).unwrap()
        }

        fn home(&mut self) {
            for _ in 0..500 {
                self.tick();
                if self.runtime.homing().is_complete() {
                    return;
                }
            }
            panic!("homing did not finish");
        }

        fn targets(&self, speed: f64, angle_deg: f64) -> ModuleTargets {
            ModuleTargets {
                states: vec![ModuleState::from_degrees(speed, angle_deg); 4],
            }
        }
    }

    #[test]
    fn test_open_modules_fails_on_missing_device() {
        let config = RuntimeConfig::default();
        let mut backend = SimBackend::new(config.sim);
        backend.set_offline(config.modules[2].drive_motor_id);
        let result = open_modules(&mut backend, &config);
        assert!(matches!(result, Err(HardwareError::DeviceUnavailable { .. })));
    }

    #[test]
    fn test_homing_converges_then_waits_for_targets() {
        let mut bench = Bench::new(&RuntimeConfig::default());
        let first = bench.tick();
        assert_eq!(first.homing.len(), 4);
        assert_eq!(bench.runtime.health(), RuntimeHealth::Homing);

        bench.home();
        assert_eq!(
            bench.runtime.homing().state(),
            HomingState::Done(HomingOutcome::Completed)
        );
        for wheel in bench.wheels() {
            let distance = (wheel.steer_deg() - 180.0).abs();
            assert!(distance < 1.0, "wheel settled {} deg from home", distance);
            assert_eq!(wheel.turning_output(), 0.0);
        }

        let output = bench.tick();
        assert!(output.homing.is_empty());
        assert_eq!(output.modules.len(), 4);
        assert_eq!(bench.runtime.health(), RuntimeHealth::CmdStale);
    }

    #[test]
    fn test_targets_ignored_while_homing() {
        let mut bench = Bench::new(&RuntimeConfig::default());
        let targets = bench.targets(1.0, 0.0);
        bench.runtime.on_targets(targets, bench.now);
        bench.tick();
        assert!(bench.wheels().iter().all(|w| w.drive_output() == 0.0));
    }

    #[test]
    fn test_teleop_applies_targets_until_stale() {
        let mut bench = Bench::new(&RuntimeConfig::default());
        bench.home();

        let targets = bench.targets(2.25, 0.0);
        bench.runtime.on_targets(targets, bench.now);
        bench.tick();
        assert_eq!(bench.runtime.health(), RuntimeHealth::Ok);
        for wheel in bench.wheels() {
            assert!((wheel.drive_output() - 0.5).abs() < 1e-9);
        }

        // no fresh targets for longer than the watchdog allows
        for _ in 0..15 {
            bench.tick();
        }
        assert_eq!(bench.runtime.health(), RuntimeHealth::CmdStale);
        for wheel in bench.wheels() {
            assert_eq!(wheel.drive_output(), 0.0);
            assert_eq!(wheel.turning_output(), 0.0);
        }
    }

    #[test]
    fn test_targets_with_wrong_module_count_are_rejected() {
        let mut bench = Bench::new(&RuntimeConfig::default());
        bench.home();
        let targets = ModuleTargets {
            states: vec![ModuleState::from_degrees(1.0, 0.0); 3],
        };
        bench.runtime.on_targets(targets, bench.now);
        bench.tick();
        assert_eq!(bench.runtime.health(), RuntimeHealth::CmdStale);
    }

    #[test]
    fn test_homing_timeout_faults_and_blocks_teleop() {
        let mut config = RuntimeConfig::default();
        config.homing.timeout_ms = 100;
        // a stuck sensor never reaches the band
        let mut bench = Bench::new(&config);
        bench.wheels()[0].force_absolute_reading(Some(90.0));

        for _ in 0..10 {
            bench.tick();
        }
        assert_eq!(bench.runtime.health(), RuntimeHealth::HomingFault);
        assert_eq!(
            bench.runtime.homing().outcome(),
            Some(HomingOutcome::Faulted)
        );

        let targets = bench.targets(1.0, 0.0);
        bench.runtime.on_targets(targets, bench.now);
        bench.tick();
        assert_eq!(bench.runtime.health(), RuntimeHealth::HomingFault);
        assert!(bench.wheels().iter().all(|w| w.drive_output() == 0.0));
        assert!(bench.wheels().iter().all(|w| w.turning_output() == 0.0));
    }

    #[test]
    fn test_operator_abort_stops_modules_and_enables_teleop() {
        let mut bench = Bench::new(&RuntimeConfig::default());
        bench.tick();
        assert!(bench.wheels().iter().any(|w| w.turning_output() != 0.0));

        bench.runtime.on_operator(OperatorCommand::AbortHoming).unwrap();
        assert!(bench.wheels().iter().all(|w| w.turning_output() == 0.0));
        assert_eq!(
            bench.runtime.homing().outcome(),
            Some(HomingOutcome::Cancelled)
        );

        let targets = bench.targets(1.0, 0.0);
        bench.runtime.on_targets(targets, bench.now);
        bench.tick();
        assert_eq!(bench.runtime.health(), RuntimeHealth::Ok);
    }

    #[test]
    fn test_operator_toggles_idle_mode() {
        let mut bench = Bench::new(&RuntimeConfig::default());
        bench
            .runtime
            .on_operator(OperatorCommand::ToggleIdleMode)
            .unwrap();
        for wheel in bench.wheels() {
            assert_eq!(wheel.turning_idle_mode(), crate::hardware::IdleMode::Brake);
        }
    }
}
