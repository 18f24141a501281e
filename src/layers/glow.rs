//! Glow layer
//!
//! Renders every non-excluded mesh's emissive contribution into the
//! off-screen map, downsamples, blurs separably, and composites the result
//! additively. No stencil involvement; alpha-blended meshes are skipped.

use super::CompositePass;
use crate::device::{BlendMode, DrawUniforms};
use crate::passes::{BlurPass, DownsamplePass, PassChain};
use crate::scene::MaterialInfo;
use glam::Vec2;

/// Glow construction and runtime options.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GlowLayerOptions {
    /// Off-screen map size as a fraction of the viewport.
    pub main_texture_ratio: f32,
    /// Ideal blur kernel; rounded to the nearest best kernel.
    pub blur_kernel_size: f32,
    /// Composite intensity multiplier.
    pub intensity: f32,
}

impl Default for GlowLayerOptions {
    fn default() -> Self {
        Self {
            main_texture_ratio: 0.5,
            blur_kernel_size: 32.0,
            intensity: 1.0,
        }
    }
}

/// Runtime state of a glow layer.
pub struct GlowState {
    options: GlowLayerOptions,
}

impl GlowState {
    pub(crate) fn new(options: GlowLayerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &GlowLayerOptions {
        &self.options
    }

    pub fn intensity(&self) -> f32 {
        self.options.intensity
    }

    /// Returns true when the value changed.
    pub(crate) fn set_intensity(&mut self, intensity: f32) -> bool {
        if (self.options.intensity - intensity).abs() < f32::EPSILON {
            return false;
        }
        self.options.intensity = intensity;
        true
    }

    pub(crate) fn record_kernel(&mut self, ideal: f32) {
        self.options.blur_kernel_size = ideal;
    }

    pub(crate) fn map_color(&self, material: &MaterialInfo) -> [f32; 4] {
        material.emissive_color
    }

    /// Downsample to half resolution, then blur horizontally and vertically.
    pub(crate) fn build_chain(&self) -> PassChain {
        let kernel = self.options.blur_kernel_size;
        PassChain::new(
            vec![
                Box::new(DownsamplePass::new("glow_downsample")),
                Box::new(BlurPass::new("glow_blur_h", Vec2::new(1.0, 0.0), kernel)),
                Box::new(BlurPass::new("glow_blur_v", Vec2::new(0.0, 1.0), kernel)),
            ],
            crate::device::PixelFormat::Rgba8,
        )
    }

    pub(crate) fn merge_defines(&self) -> String {
        "#define GLOW\n".to_string()
    }

    /// Single additive composite draw.
    pub(crate) fn composite_passes(&self) -> Vec<CompositePass> {
        vec![CompositePass {
            stencil: None,
            blend: BlendMode::Additive,
            uniforms: DrawUniforms {
                color: [1.0, 1.0, 1.0, 1.0],
                params: [self.options.intensity, 0.0, 0.0, 0.0],
                ..Default::default()
            },
        }]
    }
}
