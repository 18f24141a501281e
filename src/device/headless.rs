//! Software reference device
//!
//! A CPU implementation of [`GraphicsDevice`] with real per-pixel blend and
//! stencil semantics. It backs the test suite and headless CI runs:
//! everything renders off-screen and reads back, no GPU required.
//!
//! Draw calls are interpreted by shader family (the `name` passed to
//! `create_shader`): `blur` and `downsample` resample their slot-0 input,
//! `merge` samples, scales and blends the blurred source onto the bound
//! target, and map shaders fill with the staged flat color. Geometry is not
//! rasterized; a draw covers the full target, which is the resolution-exact
//! approximation the compositing tests need.

use super::{
    BlendMode, DeviceCaps, DrawCommand, FramebufferHandle, GraphicsDevice, PixelFormat,
    ShaderHandle, StencilCompare, TextureDesc, TextureHandle, TextureKind,
};
use crate::error::{RenderError, RenderResult};
use std::collections::HashMap;

struct CpuTexture {
    width: u32,
    height: u32,
    kind: TextureKind,
    #[allow(dead_code)]
    format: PixelFormat,
    mipmaps: bool,
    /// Per-layer RGBA float pixels.
    layers: Vec<Vec<[f32; 4]>>,
    /// Per-layer stencil bytes.
    stencil: Vec<Vec<u8>>,
    mip_generations: u32,
}

struct CpuFramebuffer {
    texture: TextureHandle,
    layer: u32,
    #[allow(dead_code)]
    depth_stencil: bool,
}

struct CpuShader {
    name: String,
    defines: String,
}

/// CPU-backed [`GraphicsDevice`].
pub struct HeadlessDevice {
    caps: DeviceCaps,
    textures: HashMap<u64, CpuTexture>,
    framebuffers: HashMap<u64, CpuFramebuffer>,
    shaders: HashMap<u64, CpuShader>,
    bound: Option<FramebufferHandle>,
    stencil_enabled: bool,
    next_id: u64,
    /// Shader compiles whose define string contains this token fail; used to
    /// exercise the compile-failure path.
    fail_define_token: Option<String>,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new(DeviceCaps::default())
    }
}

impl HeadlessDevice {
    pub fn new(caps: DeviceCaps) -> Self {
        Self {
            caps,
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            shaders: HashMap::new(),
            bound: None,
            stencil_enabled: false,
            next_id: 1,
            fail_define_token: None,
        }
    }

    fn fresh_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Make every shader compile whose defines contain `token` fail.
    pub fn set_fail_define_token(&mut self, token: Option<String>) {
        self.fail_define_token = token;
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn live_shaders(&self) -> usize {
        self.shaders.len()
    }

    pub fn texture_size(&self, texture: TextureHandle) -> Option<(u32, u32)> {
        self.textures.get(&texture.raw()).map(|t| (t.width, t.height))
    }

    pub fn mipmap_generations(&self, texture: TextureHandle) -> u32 {
        self.textures
            .get(&texture.raw())
            .map(|t| t.mip_generations)
            .unwrap_or(0)
    }

    pub fn shader_defines(&self, shader: ShaderHandle) -> Option<&str> {
        self.shaders.get(&shader.raw()).map(|s| s.defines.as_str())
    }

    pub fn read_pixel(&self, texture: TextureHandle, layer: u32, x: u32, y: u32) -> Option<[f32; 4]> {
        let tex = self.textures.get(&texture.raw())?;
        let pixels = tex.layers.get(layer as usize)?;
        pixels.get((y * tex.width + x) as usize).copied()
    }

    /// Fill a layer's stencil buffer with `value` (stands in for the main
    /// scene's stencil writes in tests).
    pub fn write_stencil(&mut self, texture: TextureHandle, layer: u32, value: u8) {
        if let Some(tex) = self.textures.get_mut(&texture.raw()) {
            if let Some(buf) = tex.stencil.get_mut(layer as usize) {
                buf.fill(value);
            }
        }
    }

    fn sample(tex: &CpuTexture, layer: u32, x: i64, y: i64) -> [f32; 4] {
        let cx = x.clamp(0, tex.width as i64 - 1) as u32;
        let cy = y.clamp(0, tex.height as i64 - 1) as u32;
        tex.layers[layer as usize][(cy * tex.width + cx) as usize]
    }

    fn stencil_passes(compare: StencilCompare, reference: u32, stored: u8) -> bool {
        let stored = stored as u32;
        match compare {
            StencilCompare::Always => true,
            StencilCompare::Equal => reference == stored,
            StencilCompare::NotEqual => reference != stored,
            StencilCompare::LessEqual => reference <= stored,
        }
    }

    fn blend(mode: BlendMode, src: [f32; 4], dst: [f32; 4]) -> [f32; 4] {
        match mode {
            BlendMode::Opaque => src,
            BlendMode::Additive => [
                (dst[0] + src[0]).min(1.0),
                (dst[1] + src[1]).min(1.0),
                (dst[2] + src[2]).min(1.0),
                (dst[3] + src[3]).min(1.0),
            ],
            BlendMode::AlphaBlend => {
                let a = src[3];
                [
                    src[0] * a + dst[0] * (1.0 - a),
                    src[1] * a + dst[1] * (1.0 - a),
                    src[2] * a + dst[2] * (1.0 - a),
                    a + dst[3] * (1.0 - a),
                ]
            }
        }
    }
}

impl GraphicsDevice for HeadlessDevice {
    fn caps(&self) -> &DeviceCaps {
        &self.caps
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> RenderResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(RenderError::device(format!(
                "zero-sized texture '{}'",
                desc.label
            )));
        }
        if desc.width > self.caps.max_texture_size || desc.height > self.caps.max_texture_size {
            return Err(RenderError::capability(format!(
                "texture '{}' {}x{} exceeds device maximum {}",
                desc.label, desc.width, desc.height, self.caps.max_texture_size
            )));
        }
        let layer_count = desc.kind.layer_count() as usize;
        let pixels = (desc.width * desc.height) as usize;
        let id = self.fresh_id();
        self.textures.insert(
            id,
            CpuTexture {
                width: desc.width,
                height: desc.height,
                kind: desc.kind,
                format: desc.format,
                mipmaps: desc.mipmaps,
                layers: vec![vec![[0.0; 4]; pixels]; layer_count],
                stencil: vec![vec![0u8; pixels]; layer_count],
                mip_generations: 0,
            },
        );
        Ok(TextureHandle::from_raw(id))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture.raw());
    }

    fn create_framebuffer(
        &mut self,
        color: TextureHandle,
        layer: u32,
        depth_stencil: bool,
    ) -> RenderResult<FramebufferHandle> {
        let tex = self
            .textures
            .get(&color.raw())
            .ok_or_else(|| RenderError::device("framebuffer color texture does not exist"))?;
        if layer >= tex.kind.layer_count() {
            return Err(RenderError::device(format!(
                "framebuffer layer {} out of range",
                layer
            )));
        }
        let id = self.fresh_id();
        self.framebuffers.insert(
            id,
            CpuFramebuffer {
                texture: color,
                layer,
                depth_stencil,
            },
        );
        Ok(FramebufferHandle::from_raw(id))
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.framebuffers.remove(&framebuffer.raw());
        if self.bound == Some(framebuffer) {
            self.bound = None;
        }
    }

    fn bind_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        if self.framebuffers.contains_key(&framebuffer.raw()) {
            self.bound = Some(framebuffer);
        }
    }

    fn unbind_framebuffer(&mut self) {
        self.bound = None;
    }

    fn clear(&mut self, color: [f32; 4], _clear_depth: bool, clear_stencil: bool) {
        let Some(bound) = self.bound else { return };
        let Some(fb) = self.framebuffers.get(&bound.raw()) else {
            return;
        };
        let layer = fb.layer as usize;
        if let Some(tex) = self.textures.get_mut(&fb.texture.raw()) {
            tex.layers[layer].fill(color);
            if clear_stencil {
                tex.stencil[layer].fill(0);
            }
        }
    }

    fn create_shader(
        &mut self,
        name: &str,
        source: &str,
        defines: &str,
    ) -> RenderResult<ShaderHandle> {
        if source.is_empty() {
            return Err(RenderError::shader(format!("shader '{}' has no source", name)));
        }
        if let Some(token) = &self.fail_define_token {
            if defines.contains(token.as_str()) {
                return Err(RenderError::shader(format!(
                    "shader '{}' failed to compile with defines: {}",
                    name, token
                )));
            }
        }
        let id = self.fresh_id();
        self.shaders.insert(
            id,
            CpuShader {
                name: name.to_string(),
                defines: defines.to_string(),
            },
        );
        Ok(ShaderHandle::from_raw(id))
    }

    fn destroy_shader(&mut self, shader: ShaderHandle) {
        self.shaders.remove(&shader.raw());
    }

    fn set_stencil_enabled(&mut self, enabled: bool) -> bool {
        let previous = self.stencil_enabled;
        self.stencil_enabled = enabled;
        previous
    }

    fn stencil_enabled(&self) -> bool {
        self.stencil_enabled
    }

    fn draw(&mut self, command: &DrawCommand) -> RenderResult<()> {
        let bound = self
            .bound
            .ok_or_else(|| RenderError::render("draw with no framebuffer bound"))?;
        let fb = self
            .framebuffers
            .get(&bound.raw())
            .ok_or_else(|| RenderError::render("bound framebuffer was destroyed"))?;
        let shader = self
            .shaders
            .get(&command.shader.raw())
            .ok_or_else(|| RenderError::render("draw with unknown shader"))?;

        let target = fb.texture;
        let layer = fb.layer;
        let (width, height) = {
            let tex = self
                .textures
                .get(&target.raw())
                .ok_or_else(|| RenderError::render("bound framebuffer lost its texture"))?;
            (tex.width, tex.height)
        };

        // Resolve the source color for every output pixel, then blend.
        let family = shader.name.clone();
        let input = command.textures.first().copied();
        let uniforms = command.uniforms;
        let stencil_test = if self.stencil_enabled {
            command.stencil
        } else {
            None
        };

        let mut out = vec![[0.0f32; 4]; (width * height) as usize];
        for y in 0..height {
            for x in 0..width {
                let idx = (y * width + x) as usize;
                out[idx] = if family.contains("blur") {
                    let (tex, in_layer) = self.resolve_input(input)?;
                    let kernel = uniforms.params[0].max(1.0) as i64;
                    let (dx, dy) = (uniforms.params[2], uniforms.params[3]);
                    let sx = (x as f32 * tex.width as f32 / width as f32) as i64;
                    let sy = (y as f32 * tex.height as f32 / height as f32) as i64;
                    let half = kernel / 2;
                    let mut acc = [0.0f32; 4];
                    let mut total = 0.0f32;
                    for tap in -half..=half {
                        let px = sx + (tap as f32 * dx) as i64;
                        let py = sy + (tap as f32 * dy) as i64;
                        let sample = Self::sample(tex, in_layer, px, py);
                        for c in 0..4 {
                            acc[c] += sample[c];
                        }
                        total += 1.0;
                    }
                    [acc[0] / total, acc[1] / total, acc[2] / total, acc[3] / total]
                } else if family.contains("downsample") {
                    let (tex, in_layer) = self.resolve_input(input)?;
                    let sx = (x as f32 * tex.width as f32 / width as f32) as i64;
                    let sy = (y as f32 * tex.height as f32 / height as f32) as i64;
                    let mut acc = [0.0f32; 4];
                    for (ox, oy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                        let sample = Self::sample(tex, in_layer, sx + ox, sy + oy);
                        for c in 0..4 {
                            acc[c] += sample[c] * 0.25;
                        }
                    }
                    acc
                } else if family.contains("merge") {
                    let (tex, in_layer) = self.resolve_input(input)?;
                    let sx = (x as f32 * tex.width as f32 / width as f32) as i64;
                    let sy = (y as f32 * tex.height as f32 / height as f32) as i64;
                    let sample = Self::sample(tex, in_layer, sx, sy);
                    let intensity = uniforms.params[0];
                    let threshold = uniforms.params[1];
                    let mut alpha = sample[3];
                    if threshold > 0.0 {
                        alpha = if alpha > threshold { 1.0 } else { 0.0 };
                    }
                    [
                        sample[0] * uniforms.color[0] * intensity,
                        sample[1] * uniforms.color[1] * intensity,
                        sample[2] * uniforms.color[2] * intensity,
                        alpha * uniforms.color[3] * intensity,
                    ]
                } else {
                    // Map shaders fill with the staged flat color.
                    uniforms.color
                };
            }
        }

        let tex = self
            .textures
            .get_mut(&target.raw())
            .ok_or_else(|| RenderError::render("bound framebuffer lost its texture"))?;
        let layer = layer as usize;
        for y in 0..height {
            for x in 0..width {
                let idx = (y * width + x) as usize;
                if let Some(stencil) = stencil_test {
                    let stored = tex.stencil[layer][idx];
                    if !Self::stencil_passes(stencil.compare, stencil.reference, stored) {
                        continue;
                    }
                    if stencil.write_mask != 0 {
                        tex.stencil[layer][idx] = (stencil.reference & stencil.write_mask) as u8;
                    }
                }
                let dst = tex.layers[layer][idx];
                tex.layers[layer][idx] = Self::blend(command.blend, out[idx], dst);
            }
        }
        Ok(())
    }

    fn generate_mipmaps(&mut self, texture: TextureHandle) {
        if let Some(tex) = self.textures.get_mut(&texture.raw()) {
            if tex.mipmaps {
                tex.mip_generations += 1;
            }
        }
    }
}

impl HeadlessDevice {
    fn resolve_input(&self, input: Option<TextureHandle>) -> RenderResult<(&CpuTexture, u32)> {
        let handle =
            input.ok_or_else(|| RenderError::render("post-process draw with no input texture"))?;
        let tex = self
            .textures
            .get(&handle.raw())
            .ok_or_else(|| RenderError::render("input texture was destroyed"))?;
        Ok((tex, 0))
    }
}
