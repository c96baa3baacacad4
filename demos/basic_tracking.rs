//! Replay a short synthetic run through the tracking pipeline.
//!
//! Run with: cargo run --example basic_tracking

use std::sync::Arc;

use trailpaint::{ActivityType, FixedClock, PipelineEvent, RawFix, SplitUnit, TrackingPipeline};

fn main() {
    let start = 1_700_000_000.0;
    let clock = Arc::new(FixedClock::new(start));

    let mut pipeline = TrackingPipeline::for_activity(ActivityType::Run)
        .with_clock(clock.clone())
        .with_split_unit(SplitUnit::Kilometers);

    pipeline.subscribe(|event| match event {
        PipelineEvent::FixRejected { fix, reason } => {
            println!("  t={:>4.0}s rejected: {:?}", fix.timestamp - 1_700_000_000.0, reason)
        }
        PipelineEvent::Paused { timestamp } => {
            println!("  t={:>4.0}s auto-pause", timestamp - 1_700_000_000.0)
        }
        PipelineEvent::Resumed { timestamp } => {
            println!("  t={:>4.0}s auto-resume", timestamp - 1_700_000_000.0)
        }
        PipelineEvent::SplitCompleted { split } => println!(
            "  split {}: {:.0}s, pace {}:{:02}/km",
            split.index,
            split.duration,
            (split.pace / 60.0) as u32,
            (split.pace % 60.0) as u32
        ),
        PipelineEvent::FixSmoothed { .. } => {}
    });

    println!("Basic Tracking Example\n");

    // 3 m/s north out of London, with a 20 s stop at a traffic light
    // and the occasional poor fix.
    let mut latitude = 51.5074;
    for second in 0..900 {
        let t = start + second as f64;
        clock.set(t);

        let stopped = (300..320).contains(&second);
        let speed = if stopped { 0.1 } else { 3.0 };
        // While stopped the receiver wanders a few meters either side.
        let wander = if stopped && second % 2 == 0 { 6.0 / 111_320.0 } else { 0.0 };
        if !stopped {
            latitude += 3.0 / 111_320.0;
        }

        let accuracy = if second % 97 == 0 { 35.0 } else { 4.0 };
        let fix = RawFix::new(latitude + wander, -0.1278, t)
            .with_accuracy(accuracy)
            .with_speed(speed)
            .with_altitude(20.0 + second as f64 * 0.02, 3.0);

        pipeline.process(fix);
    }

    let stats = pipeline.statistics();
    println!(
        "\nFixes: {} total, {} accepted ({:.0}%)",
        stats.filter.total,
        stats.filter.accepted,
        stats.filter.acceptance_rate() * 100.0
    );
    println!("Distance: {:.0}m in {} splits", stats.total_distance, stats.completed_splits);
    println!("Paused for {:.0}s", stats.total_paused_seconds);
}
