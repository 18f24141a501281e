//! Stencil/composite coordination
//!
//! The [`EffectCompositor`] owns the active effect layers and fixes the
//! per-camera ordering: every layer's off-screen pass runs before the main
//! camera draw, the shared stencil is enabled only while a layer needs it,
//! composite draws interleave with the main scene's rendering-group
//! boundaries, and the previous stencil state is restored after the frame.
//! A fault in one layer never aborts its siblings.

use crate::device::GraphicsDevice;
use crate::error::RenderResult;
use crate::layers::EffectLayer;
use crate::scene::SceneContext;

/// Orchestrates effect layers around the main camera draw.
pub struct EffectCompositor {
    layers: Vec<EffectLayer>,
    render_effects: bool,
    needs_stencil: bool,
    previous_stencil: bool,
    in_frame: bool,
}

impl Default for EffectCompositor {
    fn default() -> Self {
        Self::new()
    }
}

impl EffectCompositor {
    pub fn new() -> Self {
        Self {
            layers: Vec::new(),
            render_effects: false,
            needs_stencil: false,
            previous_stencil: false,
            in_frame: false,
        }
    }

    /// Add a layer, returning its index.
    pub fn add_layer(&mut self, layer: EffectLayer) -> usize {
        self.layers.push(layer);
        self.layers.len() - 1
    }

    /// Remove and return a layer. The caller disposes it.
    pub fn take_layer(&mut self, index: usize) -> Option<EffectLayer> {
        if index < self.layers.len() {
            Some(self.layers.remove(index))
        } else {
            None
        }
    }

    pub fn layer(&self, index: usize) -> Option<&EffectLayer> {
        self.layers.get(index)
    }

    pub fn layer_mut(&mut self, index: usize) -> Option<&mut EffectLayer> {
        self.layers.get_mut(index)
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Whether any composite work happens this frame.
    pub fn render_effects(&self) -> bool {
        self.render_effects
    }

    /// Whether any active layer requires the shared stencil buffer.
    pub fn needs_stencil(&self) -> bool {
        self.layers
            .iter()
            .any(|l| l.should_render() && l.needs_stencil())
    }

    /// Phase 1+2: render every active layer's off-screen pass before the
    /// main camera draw, then enable the shared stencil if required. Layer
    /// failures are logged and skipped so siblings still render.
    pub fn begin_frame(
        &mut self,
        device: &mut dyn GraphicsDevice,
        scene: &dyn SceneContext,
    ) -> RenderResult<()> {
        self.render_effects = self.layers.iter().any(|l| l.should_render());
        self.needs_stencil = self.needs_stencil();
        self.in_frame = true;
        if !self.render_effects {
            return Ok(());
        }

        for layer in &mut self.layers {
            if !layer.should_render() {
                continue;
            }
            if let Err(err) = layer.render(device, scene) {
                log::warn!("effect layer '{}' render failed: {}", layer.name(), err);
            }
        }

        self.previous_stencil = device.stencil_enabled();
        if self.needs_stencil {
            device.set_stencil_enabled(true);
        }
        Ok(())
    }

    /// Phase 3, per rendering group: composite every layer pinned to
    /// `group_id` right after that group's opaque/alpha draws. The main
    /// framebuffer must be bound.
    pub fn composite_group(
        &mut self,
        device: &mut dyn GraphicsDevice,
        group_id: i32,
    ) -> RenderResult<()> {
        if !self.render_effects {
            return Ok(());
        }
        for layer in &mut self.layers {
            if layer.rendering_group_id() != group_id {
                continue;
            }
            if let Err(err) = layer.composite(device) {
                log::warn!("effect layer '{}' composite failed: {}", layer.name(), err);
            }
        }
        Ok(())
    }

    /// Phase 3 tail + 4: composite the group `-1` layers after all groups,
    /// reconcile sizes against the live viewport, and restore the previous
    /// stencil state.
    pub fn end_frame(
        &mut self,
        device: &mut dyn GraphicsDevice,
        scene: &dyn SceneContext,
    ) -> RenderResult<()> {
        if !self.in_frame {
            return Ok(());
        }
        if self.render_effects {
            self.composite_group(device, -1)?;
            device.set_stencil_enabled(self.previous_stencil);

            let viewport = scene.viewport();
            for layer in &mut self.layers {
                if let Err(err) = layer.reconcile_size(device, viewport) {
                    log::warn!("effect layer '{}' resize failed: {}", layer.name(), err);
                }
            }
        }
        self.in_frame = false;
        Ok(())
    }

    /// Dispose every layer and its device resources.
    pub fn dispose(&mut self, device: &mut dyn GraphicsDevice) {
        for layer in &mut self.layers {
            layer.dispose(device);
        }
        self.layers.clear();
    }
}
