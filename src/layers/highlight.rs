//! Highlight layer
//!
//! Outlines explicitly registered meshes. The off-screen map holds each
//! mesh's highlight color; two composite draws blend it back — an inner pass
//! where the stencil marks the object's own pixels and an outer pass where
//! it does not — with the stencil write mask at zero so the main scene's
//! depth/stencil contents survive.

use super::CompositePass;
use crate::device::{BlendMode, DrawUniforms, StencilCompare, StencilState};
use crate::passes::{BlurPass, PassChain};
use crate::scene::{MaterialInfo, RenderableId};
use glam::Vec2;
use std::collections::BTreeMap;

/// Alpha threshold separating the stroke edge in stroke mode.
const STROKE_THRESHOLD: f32 = 0.5;

/// Highlight construction and runtime options.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HighlightLayerOptions {
    /// Off-screen map size as a fraction of the viewport.
    pub main_texture_ratio: f32,
    /// Horizontal blur width multiplier.
    pub blur_horizontal_size: f32,
    /// Vertical blur width multiplier.
    pub blur_vertical_size: f32,
    /// Composite the halo inside the object's silhouette.
    pub inner_glow: bool,
    /// Composite the halo outside the object's silhouette.
    pub outer_glow: bool,
    /// Threshold alpha into a crisp outline edge.
    pub stroke: bool,
    /// Blend mode of the composite draws.
    pub alpha_blending_mode: BlendMode,
    /// Stencil reference value the main scene tagged this layer's meshes with.
    pub stencil_reference: u32,
}

impl Default for HighlightLayerOptions {
    fn default() -> Self {
        Self {
            main_texture_ratio: 0.5,
            blur_horizontal_size: 1.0,
            blur_vertical_size: 1.0,
            inner_glow: true,
            outer_glow: true,
            stroke: false,
            alpha_blending_mode: BlendMode::Additive,
            stencil_reference: 1,
        }
    }
}

/// A mesh registered on a highlight layer.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HighlightedMesh {
    pub color: [f32; 4],
    /// Take the outline color from the material's emissive instead.
    pub emissive_only: bool,
}

/// Runtime state of a highlight layer.
pub struct HighlightState {
    options: HighlightLayerOptions,
    meshes: BTreeMap<RenderableId, HighlightedMesh>,
}

impl HighlightState {
    pub(crate) fn new(options: HighlightLayerOptions) -> Self {
        Self {
            options,
            meshes: BTreeMap::new(),
        }
    }

    pub fn options(&self) -> &HighlightLayerOptions {
        &self.options
    }

    pub fn has_meshes(&self) -> bool {
        !self.meshes.is_empty()
    }

    pub fn contains(&self, id: RenderableId) -> bool {
        self.meshes.contains_key(&id)
    }

    pub fn mesh_entries(&self) -> Vec<(RenderableId, HighlightedMesh)> {
        self.meshes
            .iter()
            .map(|(id, mesh)| (*id, mesh.clone()))
            .collect()
    }

    pub(crate) fn add_mesh(&mut self, id: RenderableId, color: [f32; 4], emissive_only: bool) {
        self.meshes.insert(
            id,
            HighlightedMesh {
                color,
                emissive_only,
            },
        );
    }

    pub(crate) fn remove_mesh(&mut self, id: RenderableId) -> bool {
        self.meshes.remove(&id).is_some()
    }

    pub(crate) fn record_kernel(&mut self, ideal: f32) {
        self.options.blur_horizontal_size = ideal / 16.0;
        self.options.blur_vertical_size = ideal / 16.0;
    }

    pub(crate) fn map_color(&self, id: RenderableId, material: &MaterialInfo) -> [f32; 4] {
        match self.meshes.get(&id) {
            Some(mesh) if mesh.emissive_only => material.emissive_color,
            Some(mesh) => mesh.color,
            None => [1.0, 1.0, 1.0, 1.0],
        }
    }

    /// Two separable blur passes at the map's own resolution.
    pub(crate) fn build_chain(&self) -> PassChain {
        PassChain::new(
            vec![
                Box::new(BlurPass::new(
                    "highlight_blur_h",
                    Vec2::new(1.0, 0.0),
                    16.0 * self.options.blur_horizontal_size,
                )),
                Box::new(BlurPass::new(
                    "highlight_blur_v",
                    Vec2::new(0.0, 1.0),
                    16.0 * self.options.blur_vertical_size,
                )),
            ],
            crate::device::PixelFormat::Rgba8,
        )
    }

    pub(crate) fn merge_defines(&self) -> String {
        let mut defines = "#define HIGHLIGHT\n".to_string();
        if self.options.stroke {
            defines.push_str("#define STROKE\n");
        }
        defines
    }

    /// Inner pass first (stencil less-or-equal against the layer reference),
    /// then outer (not-equal). Write mask stays zero.
    pub(crate) fn composite_passes(&self) -> Vec<CompositePass> {
        let threshold = if self.options.stroke {
            STROKE_THRESHOLD
        } else {
            0.0
        };
        let uniforms = DrawUniforms {
            color: [1.0, 1.0, 1.0, 1.0],
            params: [1.0, threshold, 0.0, 0.0],
            ..Default::default()
        };
        let mut passes = Vec::with_capacity(2);
        if self.options.inner_glow {
            passes.push(CompositePass {
                stencil: Some(StencilState::read_only(
                    StencilCompare::LessEqual,
                    self.options.stencil_reference,
                )),
                blend: self.options.alpha_blending_mode,
                uniforms,
            });
        }
        if self.options.outer_glow {
            passes.push(CompositePass {
                stencil: Some(StencilState::read_only(
                    StencilCompare::NotEqual,
                    self.options.stencil_reference,
                )),
                blend: self.options.alpha_blending_mode,
                uniforms,
            });
        }
        passes
    }
}
