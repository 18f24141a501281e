//! Abstract graphics device interface
//!
//! The compositing core never talks to a GPU API directly. Everything it
//! needs — texture and framebuffer lifecycle, blend and stencil state, shader
//! programs compiled from source plus a define string, indexed draws — goes
//! through the [`GraphicsDevice`] trait. A software reference implementation
//! lives in [`headless`] and backs the test suite.

pub mod headless;

use crate::error::RenderResult;
use bytemuck::{Pod, Zeroable};

pub use headless::HeadlessDevice;

/// Opaque handle to a device texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(u64);

/// Opaque handle to a device framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferHandle(u64);

/// Opaque handle to a compiled shader program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderHandle(u64);

impl TextureHandle {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl FramebufferHandle {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl ShaderHandle {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Texture topology: flat, cube (6 faces) or layered array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureKind {
    D2,
    Cube,
    Array(u32),
}

impl TextureKind {
    /// Number of render-pass identifiers (faces/layers) a target of this
    /// kind is drawn with.
    pub fn layer_count(&self) -> u32 {
        match self {
            TextureKind::D2 => 1,
            TextureKind::Cube => 6,
            TextureKind::Array(layers) => (*layers).max(1),
        }
    }
}

/// Pixel formats the core allocates off-screen targets with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PixelFormat {
    Rgba8,
    Rgba16Float,
    Rgba32Float,
}

/// Descriptor for an off-screen texture allocation.
#[derive(Debug, Clone)]
pub struct TextureDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub kind: TextureKind,
    pub mipmaps: bool,
    pub sample_count: u32,
}

impl Default for TextureDesc {
    fn default() -> Self {
        Self {
            label: String::new(),
            width: 0,
            height: 0,
            format: PixelFormat::Rgba8,
            kind: TextureKind::D2,
            mipmaps: false,
            sample_count: 1,
        }
    }
}

/// Alpha-blend state for a draw call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BlendMode {
    /// Source replaces destination.
    Opaque,
    /// `dst + src` — the default for glow composites.
    Additive,
    /// `src * a + dst * (1 - a)` — classic alpha blending.
    AlphaBlend,
}

/// Stencil comparison functions, carrying the engine-level numeric values
/// hosts serialize and exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum StencilCompare {
    LessEqual = 514,
    Equal = 515,
    NotEqual = 517,
    Always = 519,
}

/// Full stencil test/write state for a draw call.
///
/// Composite draws keep `write_mask` at zero so the stencil contents written
/// by the main scene survive the effect pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StencilState {
    pub compare: StencilCompare,
    pub reference: u32,
    pub read_mask: u32,
    pub write_mask: u32,
}

impl StencilState {
    /// Read-only stencil test against `reference`.
    pub fn read_only(compare: StencilCompare, reference: u32) -> Self {
        Self {
            compare,
            reference,
            read_mask: 0xff,
            write_mask: 0,
        }
    }
}

/// Uniform block staged to the device for every draw.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct DrawUniforms {
    pub world: [f32; 16],
    pub view_projection: [f32; 16],
    pub color: [f32; 4],
    /// x: intensity or kernel width, y: alpha threshold, z/w: direction.
    pub params: [f32; 4],
}

impl Default for DrawUniforms {
    fn default() -> Self {
        Self {
            world: glam::Mat4::IDENTITY.to_cols_array(),
            view_projection: glam::Mat4::IDENTITY.to_cols_array(),
            color: [1.0, 1.0, 1.0, 1.0],
            params: [1.0, 0.0, 0.0, 0.0],
        }
    }
}

/// A single indexed draw against the currently bound framebuffer.
#[derive(Debug)]
pub struct DrawCommand<'a> {
    pub shader: ShaderHandle,
    /// Input textures, bound in slot order. Slot 0 is the sampled source for
    /// post-process and composite draws.
    pub textures: &'a [TextureHandle],
    pub uniforms: DrawUniforms,
    pub index_count: u32,
    pub blend: BlendMode,
    pub stencil: Option<StencilState>,
    pub cull_back_faces: bool,
    /// Flip winding for negatively scaled world transforms.
    pub invert_winding: bool,
}

/// Device capability report.
///
/// Requested target sizes are clamped against these limits instead of
/// erroring; see [`DeviceCaps::clamp_texture_size`].
#[derive(Debug, Clone)]
pub struct DeviceCaps {
    /// Backend identifier (vulkan, dx12, metal, gl, software)
    pub backend: String,
    /// Maximum 2D texture dimension
    pub max_texture_size: u32,
    /// Device only supports power-of-two texture dimensions
    pub requires_pow2: bool,
    /// Maximum supported MSAA sample count
    pub max_samples: u32,
}

impl Default for DeviceCaps {
    fn default() -> Self {
        Self {
            backend: "software".to_string(),
            max_texture_size: 16384,
            requires_pow2: false,
            max_samples: 4,
        }
    }
}

impl DeviceCaps {
    /// Clamp a requested size to what the device can allocate.
    ///
    /// Oversized requests are floored to the device maximum; on devices that
    /// require power-of-two textures each dimension is rounded to the nearest
    /// power of two before clamping. Never fails.
    pub fn clamp_texture_size(&self, width: u32, height: u32) -> (u32, u32) {
        let clamp = |dim: u32| {
            let dim = dim.max(1);
            let dim = if self.requires_pow2 {
                nearest_pow2(dim)
            } else {
                dim
            };
            dim.min(self.max_texture_size)
        };
        (clamp(width), clamp(height))
    }
}

fn nearest_pow2(value: u32) -> u32 {
    if value.is_power_of_two() {
        return value;
    }
    let above = value.next_power_of_two();
    let below = above / 2;
    if value - below < above - value {
        below
    } else {
        above
    }
}

/// The narrow device contract the compositing core consumes.
///
/// All GPU resources are exclusively owned by the component that created
/// them; cross-component interaction happens through these calls only.
pub trait GraphicsDevice {
    fn caps(&self) -> &DeviceCaps;

    fn create_texture(&mut self, desc: &TextureDesc) -> RenderResult<TextureHandle>;
    fn destroy_texture(&mut self, texture: TextureHandle);

    /// Create a framebuffer rendering into one face/layer of `color`.
    fn create_framebuffer(
        &mut self,
        color: TextureHandle,
        layer: u32,
        depth_stencil: bool,
    ) -> RenderResult<FramebufferHandle>;
    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle);

    fn bind_framebuffer(&mut self, framebuffer: FramebufferHandle);
    fn unbind_framebuffer(&mut self);

    /// Clear the currently bound framebuffer.
    fn clear(&mut self, color: [f32; 4], clear_depth: bool, clear_stencil: bool);

    /// Compile a shader program from source plus a define string. The define
    /// string is the variant cache key; byte-identical defines must yield an
    /// equivalent program.
    fn create_shader(&mut self, name: &str, source: &str, defines: &str)
        -> RenderResult<ShaderHandle>;
    fn destroy_shader(&mut self, shader: ShaderHandle);

    /// Toggle the global stencil test, returning the previous state so the
    /// caller can restore it.
    fn set_stencil_enabled(&mut self, enabled: bool) -> bool;
    fn stencil_enabled(&self) -> bool;

    fn draw(&mut self, command: &DrawCommand) -> RenderResult<()>;

    /// Regenerate the mip chain of `texture`.
    fn generate_mipmaps(&mut self, texture: TextureHandle);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_respects_device_maximum() {
        let caps = DeviceCaps {
            max_texture_size: 2048,
            ..Default::default()
        };
        assert_eq!(caps.clamp_texture_size(4096, 1024), (2048, 1024));
    }

    #[test]
    fn test_clamp_rounds_to_nearest_pow2_when_required() {
        let caps = DeviceCaps {
            requires_pow2: true,
            ..Default::default()
        };
        assert_eq!(caps.clamp_texture_size(300, 700), (256, 512));
        assert_eq!(caps.clamp_texture_size(384, 768), (512, 1024));
        assert_eq!(caps.clamp_texture_size(512, 1), (512, 1));
    }

    #[test]
    fn test_layer_counts() {
        assert_eq!(TextureKind::D2.layer_count(), 1);
        assert_eq!(TextureKind::Cube.layer_count(), 6);
        assert_eq!(TextureKind::Array(4).layer_count(), 4);
    }
}
