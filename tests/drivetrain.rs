// Bring up a simulated four-module drivetrain, home it, then drive it

use swerve_runtime::config::RuntimeConfig;
use swerve_runtime::hardware::HardwareBackend;
use swerve_runtime::hardware::sim::SimBackend;
use swerve_runtime::runtime::open_modules;
use swerve_runtime::swerve::{HomingOrchestrator, HomingOutcome, HomingState, ModuleState};

const DT: f64 = 0.02;

#[test]
fn test_home_then_drive() {
    let config = RuntimeConfig::default();
    let mut backend = SimBackend::new(config.sim);
    let mut modules = open_modules(&mut backend, &config).unwrap();
    let mut homing = HomingOrchestrator::start(modules.len());

    let mut ticks = 0;
    while !homing.is_complete() {
        assert!(ticks < 500, "homing still running after {} ticks", ticks);
        backend.step(DT);
        for (_, report) in homing.tick(&mut modules).unwrap() {
            assert!(!report.sensor_anomaly);
            assert!(report.output.abs() <= 0.1);
        }
        ticks += 1;
    }
    assert_eq!(homing.state(), HomingState::Done(HomingOutcome::Completed));

    for (module, wheel) in modules.iter_mut().zip(backend.wheels()) {
        assert!(module.check_zeroed().unwrap(), "{} not zeroed", module.name());
        assert!((wheel.steer_deg() - 180.0).abs() < 1.0);
        // steering is measured from where homing left it
        assert!(module.state().unwrap().angle.abs() < 1e-6);
    }

    let target = ModuleState::from_degrees(1.0, 45.0);
    for _ in 0..50 {
        backend.step(DT);
        for module in modules.iter_mut() {
            module.set_desired_state(target).unwrap();
        }
    }

    for module in modules.iter_mut() {
        let state = module.state().unwrap();
        assert!(
            (state.angle - 45f64.to_radians()).abs() < 0.05,
            "{} steered to {} rad",
            module.name(),
            state.angle
        );
        assert!((state.speed - 1.0).abs() < 0.1);
        assert!(module.position().unwrap().distance > 0.5);
    }

    // a dead-band target stops everything
    for module in modules.iter_mut() {
        module
            .set_desired_state(ModuleState::from_degrees(0.0005, 90.0))
            .unwrap();
    }
    assert!(backend.wheels().iter().all(|w| w.drive_output() == 0.0));
    assert!(backend.wheels().iter().all(|w| w.turning_output() == 0.0));
}

#[test]
fn test_relative_encoders_survive_homing() {
    let config = RuntimeConfig::default();
    let mut backend = SimBackend::new(config.sim);
    let mut modules = open_modules(&mut backend, &config).unwrap();
    let mut homing = HomingOrchestrator::start(modules.len());

    while !homing.is_complete() {
        backend.step(DT);
        homing.tick(&mut modules).unwrap();
    }

    // front_left started at 30 deg and turned about 150 deg to reach home
    let turned = modules[0].turning_position().unwrap().to_degrees();
    assert!((turned - 150.0).abs() < 2.0, "turned {} deg", turned);
}
