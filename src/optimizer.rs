//! Scene optimizer loop
//!
//! A discrete control loop: every `tracker_duration_ms` it samples the
//! frame rate and, while below target, applies every optimization at the
//! current priority tier. It advances to the next tier only once every
//! optimization at the current tier reports it has reached its terminal
//! state, succeeds when the target is met, and fails when the tiers are
//! exhausted. Optimizations mutate an explicit [`QualityControls`] struct
//! owned by the host.

use crate::events::Observable;

/// The quality knobs the optimizer is allowed to degrade.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct QualityControls {
    pub meshes_merged: bool,
    pub shadows_enabled: bool,
    pub lens_flares_enabled: bool,
    pub post_processes_enabled: bool,
    pub particles_enabled: bool,
    /// Upper bound applied to effect/render textures.
    pub max_texture_size: u32,
    pub render_targets_enabled: bool,
    /// 1.0 = native resolution; higher renders fewer pixels.
    pub hardware_scaling: f32,
}

impl Default for QualityControls {
    fn default() -> Self {
        Self {
            meshes_merged: false,
            shadows_enabled: true,
            lens_flares_enabled: true,
            post_processes_enabled: true,
            particles_enabled: true,
            max_texture_size: 1024,
            render_targets_enabled: true,
            hardware_scaling: 1.0,
        }
    }
}

/// One degradation step. `apply` is idempotent and reports whether the
/// optimization has reached its terminal state.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Optimization {
    MergeMeshes,
    Shadows,
    LensFlares,
    PostProcesses,
    Particles,
    /// Halve texture sizes down to `floor`.
    TextureSize { floor: u32 },
    RenderTargets,
    /// Step the hardware scaling level up to `maximum`.
    HardwareScaling { maximum: f32, step: f32 },
}

impl Optimization {
    pub fn label(&self) -> &'static str {
        match self {
            Optimization::MergeMeshes => "merge meshes",
            Optimization::Shadows => "shadows",
            Optimization::LensFlares => "lens flares",
            Optimization::PostProcesses => "post-processes",
            Optimization::Particles => "particles",
            Optimization::TextureSize { .. } => "texture size",
            Optimization::RenderTargets => "render targets",
            Optimization::HardwareScaling { .. } => "hardware scaling",
        }
    }

    /// Apply one step. Returns true once nothing further can be degraded.
    pub fn apply(&self, controls: &mut QualityControls) -> bool {
        match self {
            Optimization::MergeMeshes => {
                controls.meshes_merged = true;
                true
            }
            Optimization::Shadows => {
                controls.shadows_enabled = false;
                true
            }
            Optimization::LensFlares => {
                controls.lens_flares_enabled = false;
                true
            }
            Optimization::PostProcesses => {
                controls.post_processes_enabled = false;
                true
            }
            Optimization::Particles => {
                controls.particles_enabled = false;
                true
            }
            Optimization::TextureSize { floor } => {
                if controls.max_texture_size <= *floor {
                    return true;
                }
                controls.max_texture_size = (controls.max_texture_size / 2).max(*floor);
                controls.max_texture_size <= *floor
            }
            Optimization::RenderTargets => {
                controls.render_targets_enabled = false;
                true
            }
            Optimization::HardwareScaling { maximum, step } => {
                if controls.hardware_scaling >= *maximum {
                    return true;
                }
                controls.hardware_scaling = (controls.hardware_scaling + step).min(*maximum);
                controls.hardware_scaling >= *maximum
            }
        }
    }
}

/// An optimization bound to a priority tier (lower runs first).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PrioritizedOptimization {
    pub priority: u32,
    pub optimization: Optimization,
}

/// Optimizer configuration.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OptimizerOptions {
    pub target_frame_rate: f64,
    pub tracker_duration_ms: u64,
    pub optimizations: Vec<PrioritizedOptimization>,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        Self::degradation_pipeline(60.0)
    }
}

impl OptimizerOptions {
    /// The standard tier ordering: cheap/low-visual-cost first, hardware
    /// resolution scale last.
    pub fn degradation_pipeline(target_frame_rate: f64) -> Self {
        let optimizations = vec![
            PrioritizedOptimization {
                priority: 0,
                optimization: Optimization::MergeMeshes,
            },
            PrioritizedOptimization {
                priority: 0,
                optimization: Optimization::Shadows,
            },
            PrioritizedOptimization {
                priority: 0,
                optimization: Optimization::LensFlares,
            },
            PrioritizedOptimization {
                priority: 1,
                optimization: Optimization::PostProcesses,
            },
            PrioritizedOptimization {
                priority: 1,
                optimization: Optimization::Particles,
            },
            PrioritizedOptimization {
                priority: 2,
                optimization: Optimization::TextureSize { floor: 256 },
            },
            PrioritizedOptimization {
                priority: 3,
                optimization: Optimization::RenderTargets,
            },
            PrioritizedOptimization {
                priority: 4,
                optimization: Optimization::HardwareScaling {
                    maximum: 2.0,
                    step: 0.25,
                },
            },
        ];
        Self {
            target_frame_rate,
            tracker_duration_ms: 2000,
            optimizations,
        }
    }
}

/// Closed-loop FPS controller over a [`QualityControls`] struct.
pub struct SceneOptimizer {
    options: OptimizerOptions,
    running: bool,
    current_priority: Option<u32>,
    last_tick_ms: Option<u64>,
    /// Notified with the reached frame rate when the target is met.
    pub on_success: Observable<f64>,
    /// Notified with the final frame rate when every tier is exhausted.
    pub on_failure: Observable<f64>,
}

impl SceneOptimizer {
    pub fn new(options: OptimizerOptions) -> Self {
        let current_priority = options.optimizations.iter().map(|o| o.priority).min();
        Self {
            options,
            running: false,
            current_priority,
            last_tick_ms: None,
            on_success: Observable::new(),
            on_failure: Observable::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Current priority tier, `None` once exhausted.
    pub fn current_priority(&self) -> Option<u32> {
        self.current_priority
    }

    pub fn target_frame_rate(&self) -> f64 {
        self.options.target_frame_rate
    }

    pub fn start(&mut self) {
        self.running = true;
        self.last_tick_ms = None;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Restart from the lowest priority tier.
    pub fn reset(&mut self) {
        self.current_priority = self.options.optimizations.iter().map(|o| o.priority).min();
        self.last_tick_ms = None;
    }

    fn next_priority(&self, after: u32) -> Option<u32> {
        self.options
            .optimizations
            .iter()
            .map(|o| o.priority)
            .filter(|p| *p > after)
            .min()
    }

    /// Advance the control loop. `now_ms` is the host clock; ticks closer
    /// together than `tracker_duration_ms` are ignored.
    pub fn tick(&mut self, now_ms: u64, fps: f64, controls: &mut QualityControls) {
        if !self.running {
            return;
        }
        if let Some(last) = self.last_tick_ms {
            if now_ms.saturating_sub(last) < self.options.tracker_duration_ms {
                return;
            }
        }
        self.last_tick_ms = Some(now_ms);

        if fps >= self.options.target_frame_rate {
            log::info!(
                "scene optimizer reached {:.1} fps (target {:.1})",
                fps,
                self.options.target_frame_rate
            );
            self.running = false;
            self.on_success.notify(&fps, -1);
            return;
        }

        let Some(priority) = self.current_priority else {
            self.running = false;
            self.on_failure.notify(&fps, -1);
            return;
        };

        let mut all_terminal = true;
        for entry in &self.options.optimizations {
            if entry.priority != priority {
                continue;
            }
            let terminal = entry.optimization.apply(controls);
            log::debug!(
                "optimizer applied '{}' at priority {} (terminal: {})",
                entry.optimization.label(),
                priority,
                terminal
            );
            all_terminal &= terminal;
        }

        if all_terminal {
            self.current_priority = self.next_priority(priority);
            if self.current_priority.is_none() {
                log::warn!(
                    "scene optimizer exhausted all tiers at {:.1} fps (target {:.1})",
                    fps,
                    self.options.target_frame_rate
                );
                self.running = false;
                self.on_failure.notify(&fps, -1);
            }
        }
    }
}
