//! Separable Gaussian blur passes
//!
//! Kernel sizes are rounded to the nearest "good" kernel — odd, with
//! `floor(k/2)` even — so nearby requested sizes collapse onto the same
//! compiled shader variant. Weights are evaluated over the kernel domain
//! mapped to [-1, 1] with sigma = 1/3 and normalized; adjacent same-side
//! taps are then merged into single bilinear samples, halving the number of
//! texture fetches while keeping the weight sum at 1.

use super::PostProcessPass;
use crate::device::{
    BlendMode, DrawCommand, DrawUniforms, GraphicsDevice, ShaderHandle, TextureHandle,
};
use crate::error::RenderResult;
use glam::Vec2;

const BLUR_SOURCE: &str = include_str!("../shaders/blur.wgsl");
const DOWNSAMPLE_SOURCE: &str = include_str!("../shaders/downsample.wgsl");

/// Round an ideal kernel to the nearest size whose shader variant can be
/// shared: odd, with `floor(k/2)` even.
///
/// The search order `[v, v-1, v+1, v-2, v+2]` is asymmetric on purpose
/// (rounds down before up at equal distance); it decides which cached
/// variants get reused and must not be reordered.
pub fn nearest_best_kernel(ideal: f32) -> u32 {
    let v = ideal.round() as i32;
    for k in [v, v - 1, v + 1, v - 2, v + 2] {
        if k > 0 && k % 2 != 0 && (k / 2) % 2 == 0 {
            return k.max(3) as u32;
        }
    }
    v.max(3) as u32
}

fn gaussian_weight(x: f32) -> f32 {
    // 3-sigma truncation over [-1, 1]
    let sigma = 1.0f32 / 3.0;
    let denominator = (2.0 * std::f32::consts::PI).sqrt() * sigma;
    (-(x * x) / (2.0 * sigma * sigma)).exp() / denominator
}

/// Merged bilinear sample offsets/weights for one blur direction.
#[derive(Debug, Clone, PartialEq)]
pub struct BlurSamples {
    /// Texel offsets, ascending, center included.
    pub offsets: Vec<f32>,
    /// Matching weights, summing to 1.
    pub weights: Vec<f32>,
}

impl BlurSamples {
    /// Build the merged sample set for an already-rounded `kernel`.
    pub fn build(kernel: u32) -> Self {
        let half = (kernel / 2) as i32;
        let mut offsets = Vec::with_capacity(kernel as usize);
        let mut weights = Vec::with_capacity(kernel as usize);
        let mut total = 0.0f32;
        for tap in -half..=half {
            let u = if half == 0 {
                0.0
            } else {
                tap as f32 / half as f32
            };
            let w = gaussian_weight(u);
            offsets.push(tap as f32);
            weights.push(w);
            total += w;
        }
        for w in &mut weights {
            *w /= total;
        }

        // Merge adjacent same-side taps into single bilinear fetches. With
        // floor(k/2) even each side pairs up exactly; a leftover lone tap
        // (kernel 3) stays unmerged.
        fn merge_side(
            offsets: &[f32],
            weights: &[f32],
            range: std::ops::Range<usize>,
            out_offsets: &mut Vec<f32>,
            out_weights: &mut Vec<f32>,
        ) {
            let mut i = range.start;
            while i < range.end {
                if i + 1 < range.end {
                    let w = weights[i] + weights[i + 1];
                    let o = (offsets[i] * weights[i] + offsets[i + 1] * weights[i + 1]) / w;
                    out_offsets.push(o);
                    out_weights.push(w);
                    i += 2;
                } else {
                    out_offsets.push(offsets[i]);
                    out_weights.push(weights[i]);
                    i += 1;
                }
            }
        }

        let center = half as usize;
        let mut merged_offsets = Vec::new();
        let mut merged_weights = Vec::new();
        merge_side(&offsets, &weights, 0..center, &mut merged_offsets, &mut merged_weights);
        merged_offsets.push(0.0);
        merged_weights.push(weights[center]);
        merge_side(
            &offsets,
            &weights,
            center + 1..offsets.len(),
            &mut merged_offsets,
            &mut merged_weights,
        );

        Self {
            offsets: merged_offsets,
            weights: merged_weights,
        }
    }

    /// The define string keying the compiled shader variant. Byte-identical
    /// defines reuse the cached program.
    pub fn defines(&self, kernel: u32) -> String {
        let mut out = format!(
            "#define BLUR\n#define KERNEL {}\n#define SAMPLES {}\n",
            kernel,
            self.offsets.len()
        );
        for (index, (offset, weight)) in self.offsets.iter().zip(&self.weights).enumerate() {
            out.push_str(&format!(
                "#define O{} {:.6}\n#define W{} {:.6}\n",
                index, offset, index, weight
            ));
        }
        out
    }
}

/// One direction of a separable Gaussian blur.
pub struct BlurPass {
    name: String,
    direction: Vec2,
    kernel: u32,
    samples: BlurSamples,
    defines: String,
    shader: Option<ShaderHandle>,
    compiled_defines: String,
    failed: bool,
}

impl BlurPass {
    pub fn new(name: &str, direction: Vec2, ideal_kernel: f32) -> Self {
        let kernel = nearest_best_kernel(ideal_kernel);
        let samples = BlurSamples::build(kernel);
        let defines = samples.defines(kernel);
        Self {
            name: name.to_string(),
            direction,
            kernel,
            samples,
            defines,
            shader: None,
            compiled_defines: String::new(),
            failed: false,
        }
    }

    pub fn kernel(&self) -> u32 {
        self.kernel
    }

    pub fn samples(&self) -> &BlurSamples {
        &self.samples
    }
}

impl PostProcessPass for BlurPass {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_ready(&self) -> bool {
        self.shader.is_some() && self.compiled_defines == self.defines
    }

    fn prepare(&mut self, device: &mut dyn GraphicsDevice) -> RenderResult<()> {
        if self.is_ready() || self.failed {
            return Ok(());
        }
        if let Some(old) = self.shader.take() {
            device.destroy_shader(old);
        }
        match device.create_shader(&self.name, BLUR_SOURCE, &self.defines) {
            Ok(shader) => {
                self.shader = Some(shader);
                self.compiled_defines = self.defines.clone();
                Ok(())
            }
            Err(err) => {
                self.failed = true;
                Err(err)
            }
        }
    }

    fn apply(
        &mut self,
        device: &mut dyn GraphicsDevice,
        input: TextureHandle,
        _output_size: (u32, u32),
    ) -> RenderResult<()> {
        let Some(shader) = self.shader else {
            return Ok(());
        };
        let uniforms = DrawUniforms {
            params: [
                self.kernel as f32,
                0.0,
                self.direction.x,
                self.direction.y,
            ],
            ..Default::default()
        };
        device.draw(&DrawCommand {
            shader,
            textures: &[input],
            uniforms,
            index_count: 6,
            blend: BlendMode::Opaque,
            stencil: None,
            cull_back_faces: false,
            invert_winding: false,
        })
    }

    fn set_kernel(&mut self, ideal: f32) -> bool {
        let kernel = nearest_best_kernel(ideal);
        if kernel == self.kernel {
            return false;
        }
        self.kernel = kernel;
        self.samples = BlurSamples::build(kernel);
        self.defines = self.samples.defines(kernel);
        self.failed = false;
        true
    }

    fn dispose(&mut self, device: &mut dyn GraphicsDevice) {
        if let Some(shader) = self.shader.take() {
            device.destroy_shader(shader);
        }
    }
}

/// Half-resolution downsample feeding the blur passes.
pub struct DownsamplePass {
    name: String,
    shader: Option<ShaderHandle>,
    failed: bool,
}

impl DownsamplePass {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            shader: None,
            failed: false,
        }
    }
}

impl PostProcessPass for DownsamplePass {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_scale(&self) -> f32 {
        0.5
    }

    fn is_ready(&self) -> bool {
        self.shader.is_some()
    }

    fn prepare(&mut self, device: &mut dyn GraphicsDevice) -> RenderResult<()> {
        if self.shader.is_some() || self.failed {
            return Ok(());
        }
        match device.create_shader(&self.name, DOWNSAMPLE_SOURCE, "#define DOWNSAMPLE\n") {
            Ok(shader) => {
                self.shader = Some(shader);
                Ok(())
            }
            Err(err) => {
                self.failed = true;
                Err(err)
            }
        }
    }

    fn apply(
        &mut self,
        device: &mut dyn GraphicsDevice,
        input: TextureHandle,
        _output_size: (u32, u32),
    ) -> RenderResult<()> {
        let Some(shader) = self.shader else {
            return Ok(());
        };
        device.draw(&DrawCommand {
            shader,
            textures: &[input],
            uniforms: DrawUniforms::default(),
            index_count: 6,
            blend: BlendMode::Opaque,
            stencil: None,
            cull_back_faces: false,
            invert_winding: false,
        })
    }

    fn dispose(&mut self, device: &mut dyn GraphicsDevice) {
        if let Some(shader) = self.shader.take() {
            device.destroy_shader(shader);
        }
    }
}
