//! Demonstration of offline nap detection.
//!
//! This example shows how to:
//! 1. Feed accelerometer samples through the motion processor
//! 2. Apply an HRV baseline and live HRV readings
//! 3. Tick the nap pipeline and watch state transitions
//! 4. Observe the countdown rebasing to sleep onset and the wake request
//!
//! Run with: cargo run --example nap_demo

use chrono::{Duration, Utc};
use napwatch::{
    config::Config,
    core::{BaselineUpdate, EngineEvent, MotionProcessor},
    session::NapPipeline,
    sources::{AccelerationSample, HrvReading},
};

fn main() {
    println!("napwatch - Nap Demo");
    println!("===================");
    println!();

    let mut config = Config::default();
    config.session.nap_duration = std::time::Duration::from_secs(10 * 60);

    let start = Utc::now();
    let mut motion = MotionProcessor::new(config.motion.clone());
    let mut pipeline = NapPipeline::new(&config, start);

    pipeline.apply_baseline(BaselineUpdate {
        computed_at: start,
        all_day: Some(48.0),
        all_day_count: 168,
        daytime: Some(50.0),
        daytime_count: 112,
    });
    println!("Baseline HRV: 50.0 ms, threshold {:.1} ms", 50.0 * config.hrv.multiplier);
    println!("Nap budget: {} min", config.session.nap_duration.as_secs() / 60);
    println!();

    // Two restless minutes, then still. HRV rises as the wearer relaxes.
    for second in 0..3_600 {
        let now = start + Duration::seconds(second);
        let sway = if second < 120 { 0.5 } else { 0.003 };
        let sample = AccelerationSample::new(now, sway, 0.0, 1.0);
        pipeline.apply_motion_report(motion.ingest_acceleration(&sample));

        if second % 300 == 0 {
            let hrv = if second < 300 { 46.0 } else { 63.0 };
            pipeline.ingest_hrv(HrvReading::new(now, hrv));
        }

        let outcome = pipeline.tick(now);
        for event in &outcome.events {
            match event {
                EngineEvent::StateChanged(t) => {
                    println!("[{:>5}s] {} -> {}", second, t.from, t.to);
                }
                EngineEvent::CountdownRebased { reference, deadline } => {
                    println!(
                        "[{:>5}s] onset at +{}s, wake at +{}s",
                        second,
                        (*reference - start).num_seconds(),
                        (*deadline - start).num_seconds()
                    );
                }
                EngineEvent::WakeTriggered { strength, .. } => {
                    println!("[{:>5}s] wake (strength {})", second, strength);
                }
                _ => {}
            }
        }

        if outcome.wake.is_some() {
            break;
        }
    }

    pipeline.stop(Utc::now());
    println!();
    println!("Final state: {}", pipeline.state());
    println!("Motion threshold: {:.4} g", motion.threshold());
}
