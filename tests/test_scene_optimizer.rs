//! Scene optimizer control-loop scenarios.

use afterglow::optimizer::{
    Optimization, OptimizerOptions, PrioritizedOptimization, QualityControls, SceneOptimizer,
};
use std::cell::Cell;
use std::rc::Rc;

#[test]
fn test_priority_zero_runs_to_completion_before_priority_one() {
    let mut optimizer = SceneOptimizer::new(OptimizerOptions {
        target_frame_rate: 60.0,
        tracker_duration_ms: 1000,
        optimizations: vec![
            PrioritizedOptimization {
                priority: 0,
                optimization: Optimization::TextureSize { floor: 256 },
            },
            PrioritizedOptimization {
                priority: 0,
                optimization: Optimization::Shadows,
            },
            PrioritizedOptimization {
                priority: 1,
                optimization: Optimization::PostProcesses,
            },
        ],
    });
    let mut controls = QualityControls::default();
    optimizer.start();

    // Tier 0 needs two ticks before the texture optimization reaches its
    // floor; post-processes must stay untouched the whole time.
    optimizer.tick(1_000, 30.0, &mut controls);
    assert!(!controls.shadows_enabled);
    assert_eq!(controls.max_texture_size, 512);
    assert!(controls.post_processes_enabled);
    assert_eq!(optimizer.current_priority(), Some(0));

    optimizer.tick(2_000, 30.0, &mut controls);
    assert_eq!(controls.max_texture_size, 256);
    assert!(controls.post_processes_enabled);
    assert_eq!(optimizer.current_priority(), Some(1));

    optimizer.tick(3_000, 30.0, &mut controls);
    assert!(!controls.post_processes_enabled);
}

#[test]
fn test_loop_stops_once_target_reached() {
    let mut optimizer = SceneOptimizer::new(OptimizerOptions::degradation_pipeline(60.0));
    let mut controls = QualityControls::default();
    let success = Rc::new(Cell::new(false));
    let sink = success.clone();
    optimizer.on_success.add(move |_, _| sink.set(true), -1, false);
    optimizer.start();

    optimizer.tick(10_000, 30.0, &mut controls);
    optimizer.tick(20_000, 61.0, &mut controls);
    assert!(success.get());
    assert!(!optimizer.is_running());

    // further ticks are inert
    let snapshot = controls.clone();
    optimizer.tick(30_000, 20.0, &mut controls);
    assert_eq!(controls, snapshot);
}

#[test]
fn test_start_stop_reset_cycle() {
    let mut optimizer = SceneOptimizer::new(OptimizerOptions::degradation_pipeline(60.0));
    let mut controls = QualityControls::default();
    optimizer.start();
    optimizer.tick(10_000, 30.0, &mut controls);
    assert_eq!(optimizer.current_priority(), Some(1));

    optimizer.stop();
    optimizer.tick(20_000, 30.0, &mut controls);
    assert_eq!(optimizer.current_priority(), Some(1));

    optimizer.reset();
    assert_eq!(optimizer.current_priority(), Some(0));
}
