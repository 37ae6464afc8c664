/*!
 * Adaptive Spin-Wait Tests
 * Phase transitions and configuration-driven behavior
 */

use pretty_assertions::assert_eq;
use slabkit::core::sync::wait::{step_for, SpinStep};
use slabkit::{AdaptiveSpinWait, SpinConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_yield_transition_at_threshold() {
    let mut spin = AdaptiveSpinWait::new();
    let multi_core = slabkit::core::sync::wait::processor_count() > 1;

    for _ in 0..10 {
        assert_eq!(spin.next_spin_will_yield(), !multi_core);
        spin.spin_once();
    }
    assert!(spin.next_spin_will_yield());
}

#[test]
fn test_custom_thresholds_from_json() {
    let config: SpinConfig =
        serde_json::from_str(r#"{ "yield_threshold": 2, "sleep0_every": 3, "sleep_threshold": 6 }"#).unwrap();
    assert_eq!(config.max_spin_cycles, None);
    assert!(config.validate().is_ok());

    let steps: Vec<_> = (0..8).map(|count| step_for(count, &config, 8)).collect();
    assert_eq!(
        steps,
        vec![
            SpinStep::Spin(1),
            SpinStep::Spin(2),
            SpinStep::Yield,
            SpinStep::Yield,
            SpinStep::Sleep0,
            SpinStep::Yield,
            SpinStep::Sleep1,
            SpinStep::Sleep1,
        ]
    );
}

#[test]
fn test_sleep_phase_actually_sleeps() {
    let mut spin = AdaptiveSpinWait::with_sleep_threshold(Some(0));
    // skip the spin phase
    while !spin.next_spin_will_yield() {
        spin.spin_once();
    }

    let start = Instant::now();
    for _ in 0..3 {
        spin.spin_once();
    }
    assert!(start.elapsed() >= Duration::from_millis(3));
}

#[test]
fn test_spin_until_observes_other_thread() {
    let flag = Arc::new(AtomicBool::new(false));
    let setter = {
        let flag = Arc::clone(&flag);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            flag.store(true, Ordering::Release);
        })
    };

    let mut spin = AdaptiveSpinWait::with_config(SpinConfig::cooperative());
    spin.spin_until(|| flag.load(Ordering::Acquire));
    assert!(spin.count() > 0);
    setter.join().unwrap();
}
