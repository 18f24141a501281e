//! afterglow — post-processing compositing core
//!
//! Renders auxiliary full-scene effects (glow, highlight outlining) into
//! off-screen targets, blurs them through chained post-process passes, and
//! composites the result back onto the main frame buffer with alpha-blend
//! and stencil state. The scene and the GPU are consumed through narrow
//! traits ([`scene::SceneContext`], [`device::GraphicsDevice`]); a software
//! reference device backs the test suite.
//!
//! Per frame, the host drives:
//!
//! 1. [`compositor::EffectCompositor::begin_frame`] — every active layer's
//!    off-screen pass and blur chain, before the main camera draw;
//! 2. its own scene rendering, calling
//!    [`compositor::EffectCompositor::composite_group`] at rendering-group
//!    boundaries with the main framebuffer bound;
//! 3. [`compositor::EffectCompositor::end_frame`] — the remaining composite
//!    draws, viewport resize reconciliation and stencil state restore.

pub mod compositor;
pub mod device;
pub mod error;
pub mod events;
pub mod layers;
pub mod optimizer;
pub mod passes;
pub mod scene;
pub mod target;

pub use compositor::EffectCompositor;
pub use device::{DeviceCaps, GraphicsDevice, HeadlessDevice};
pub use error::{RenderError, RenderResult};
pub use events::{EventState, Observable, ObserverHandle};
pub use layers::{EffectLayer, GlowLayerOptions, HighlightLayerOptions, LayerSnapshot};
pub use optimizer::{OptimizerOptions, QualityControls, SceneOptimizer};
pub use passes::{BlurPass, PassChain};
pub use scene::{Renderable, RenderableId, SceneContext, SimpleMesh, SimpleScene};
pub use target::{OffScreenTarget, TargetSize};
