//! Post-process pass chains
//!
//! A [`PassChain`] owns an ordered list of shader passes plus one
//! intermediate texture per stage. Execution ping-pongs: the output of pass
//! *i* is bound as the input of pass *i+1*, and the final stage's texture is
//! what the effect layer composites with. Only the first stage auto-clears;
//! later stages keep their accumulated contents unless a pass opts in.

pub mod blur;

use crate::device::{
    FramebufferHandle, GraphicsDevice, PixelFormat, TextureDesc, TextureHandle, TextureKind,
};
use crate::error::RenderResult;

pub use blur::{nearest_best_kernel, BlurPass, BlurSamples, DownsamplePass};

/// A single shader pass in a chain.
pub trait PostProcessPass {
    fn name(&self) -> &str;

    /// Output resolution relative to the previous stage (0.5 = half).
    fn output_scale(&self) -> f32 {
        1.0
    }

    /// Whether the chain clears this stage before applying the pass. The
    /// first stage is always cleared.
    fn auto_clear(&self) -> bool {
        false
    }

    /// Ready once the pass's shader variant compiled.
    fn is_ready(&self) -> bool;

    /// Compile or refresh the shader variant. Cheap when nothing changed.
    fn prepare(&mut self, device: &mut dyn GraphicsDevice) -> RenderResult<()>;

    /// Issue the pass draw, sampling `input`, into the bound framebuffer.
    fn apply(
        &mut self,
        device: &mut dyn GraphicsDevice,
        input: TextureHandle,
        output_size: (u32, u32),
    ) -> RenderResult<()>;

    /// Retune the blur kernel, if this pass has one. Returns true when the
    /// pass changed and will recompile at the next prepare.
    fn set_kernel(&mut self, _ideal: f32) -> bool {
        false
    }

    fn dispose(&mut self, device: &mut dyn GraphicsDevice);
}

struct Stage {
    texture: TextureHandle,
    framebuffer: FramebufferHandle,
    size: (u32, u32),
}

/// Ordered list of post-process passes with per-stage intermediates.
pub struct PassChain {
    passes: Vec<Box<dyn PostProcessPass>>,
    stages: Vec<Stage>,
    format: PixelFormat,
    base_size: (u32, u32),
    warned: Vec<bool>,
    disposed: bool,
}

impl PassChain {
    pub fn new(passes: Vec<Box<dyn PostProcessPass>>, format: PixelFormat) -> Self {
        let warned = vec![false; passes.len()];
        Self {
            passes,
            stages: Vec::new(),
            format,
            base_size: (0, 0),
            warned,
            disposed: false,
        }
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Allocate per-stage intermediates for a chain fed at `base_size` and
    /// compile every pass.
    pub fn prepare(
        &mut self,
        device: &mut dyn GraphicsDevice,
        base_size: (u32, u32),
    ) -> RenderResult<()> {
        if self.disposed {
            return Ok(());
        }
        self.release_stages(device);
        self.base_size = base_size;

        let mut size = base_size;
        for (index, pass) in self.passes.iter().enumerate() {
            let scale = pass.output_scale();
            size = (
                ((size.0 as f32 * scale) as u32).max(1),
                ((size.1 as f32 * scale) as u32).max(1),
            );
            let texture = device.create_texture(&TextureDesc {
                label: format!("pass_{}_{}", index, pass.name()),
                width: size.0,
                height: size.1,
                format: self.format,
                kind: TextureKind::D2,
                mipmaps: false,
                sample_count: 1,
            })?;
            let framebuffer = match device.create_framebuffer(texture, 0, false) {
                Ok(fb) => fb,
                Err(err) => {
                    device.destroy_texture(texture);
                    self.release_stages(device);
                    return Err(err);
                }
            };
            self.stages.push(Stage {
                texture,
                framebuffer,
                size,
            });
        }
        self.ensure_prepared(device);
        Ok(())
    }

    /// Recreate the intermediates at a new base resolution (viewport resize).
    pub fn rebuild(
        &mut self,
        device: &mut dyn GraphicsDevice,
        base_size: (u32, u32),
    ) -> RenderResult<()> {
        self.prepare(device, base_size)
    }

    fn ensure_prepared(&mut self, device: &mut dyn GraphicsDevice) {
        for (index, pass) in self.passes.iter_mut().enumerate() {
            if let Err(err) = pass.prepare(device) {
                if !self.warned[index] {
                    log::warn!("post-process pass '{}' not ready: {}", pass.name(), err);
                    self.warned[index] = true;
                }
            } else {
                self.warned[index] = false;
            }
        }
    }

    /// All passes compiled and stage textures allocated.
    pub fn is_ready(&self) -> bool {
        !self.disposed
            && self.stages.len() == self.passes.len()
            && self.passes.iter().all(|p| p.is_ready())
    }

    /// Run the chain over `source`. Returns the final stage's texture, or
    /// `None` while any pass is still compiling (the caller skips
    /// compositing for the frame).
    pub fn process(
        &mut self,
        device: &mut dyn GraphicsDevice,
        source: TextureHandle,
    ) -> RenderResult<Option<TextureHandle>> {
        if self.disposed || self.passes.is_empty() {
            return Ok(None);
        }
        self.ensure_prepared(device);
        if !self.is_ready() {
            return Ok(None);
        }

        let mut input = source;
        for (index, (pass, stage)) in self.passes.iter_mut().zip(&self.stages).enumerate() {
            device.bind_framebuffer(stage.framebuffer);
            if index == 0 || pass.auto_clear() {
                device.clear([0.0; 4], false, false);
            }
            let result = pass.apply(device, input, stage.size);
            device.unbind_framebuffer();
            result?;
            input = stage.texture;
        }
        Ok(Some(input))
    }

    /// The last stage's texture once the chain ran.
    pub fn output(&self) -> Option<TextureHandle> {
        self.stages.last().map(|s| s.texture)
    }

    pub fn output_size(&self) -> Option<(u32, u32)> {
        self.stages.last().map(|s| s.size)
    }

    /// Retune every blur pass in the chain. Returns true when any pass
    /// changed (recompile happens at the next process call).
    pub fn set_kernel(&mut self, ideal: f32) -> bool {
        let mut dirty = false;
        for pass in &mut self.passes {
            dirty |= pass.set_kernel(ideal);
        }
        dirty
    }

    fn release_stages(&mut self, device: &mut dyn GraphicsDevice) {
        for stage in self.stages.drain(..) {
            device.destroy_framebuffer(stage.framebuffer);
            device.destroy_texture(stage.texture);
        }
    }

    pub fn dispose(&mut self, device: &mut dyn GraphicsDevice) {
        if self.disposed {
            return;
        }
        self.release_stages(device);
        for pass in &mut self.passes {
            pass.dispose(device);
        }
        self.disposed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HeadlessDevice;
    use glam::Vec2;

    fn chain_with_blur() -> PassChain {
        PassChain::new(
            vec![
                Box::new(DownsamplePass::new("downsample")),
                Box::new(BlurPass::new("blur_h", Vec2::new(1.0, 0.0), 9.0)),
                Box::new(BlurPass::new("blur_v", Vec2::new(0.0, 1.0), 9.0)),
            ],
            PixelFormat::Rgba8,
        )
    }

    #[test]
    fn test_chain_stage_sizes_follow_output_scale() {
        let mut device = HeadlessDevice::default();
        let mut chain = chain_with_blur();
        chain.prepare(&mut device, (64, 64)).unwrap();
        assert!(chain.is_ready());
        assert_eq!(chain.output_size(), Some((32, 32)));
        chain.dispose(&mut device);
    }

    #[test]
    fn test_chain_processes_in_order_and_outputs_last_stage() {
        let mut device = HeadlessDevice::default();
        let mut chain = chain_with_blur();
        chain.prepare(&mut device, (16, 16)).unwrap();

        let source = device
            .create_texture(&TextureDesc {
                label: "source".into(),
                width: 16,
                height: 16,
                ..Default::default()
            })
            .unwrap();
        let fb = device.create_framebuffer(source, 0, false).unwrap();
        device.bind_framebuffer(fb);
        device.clear([1.0, 0.0, 0.0, 1.0], false, false);
        device.unbind_framebuffer();

        let output = chain.process(&mut device, source).unwrap().unwrap();
        assert_eq!(Some(output), chain.output());
        // A constant field survives downsample + separable blur unchanged.
        let pixel = device.read_pixel(output, 0, 4, 4).unwrap();
        assert!((pixel[0] - 1.0).abs() < 1e-4);
        assert!((pixel[3] - 1.0).abs() < 1e-4);
        chain.dispose(&mut device);
    }

    #[test]
    fn test_unready_chain_skips_processing() {
        let mut device = HeadlessDevice::default();
        device.set_fail_define_token(Some("#define BLUR".into()));
        let mut chain = chain_with_blur();
        chain.prepare(&mut device, (16, 16)).unwrap();
        assert!(!chain.is_ready());

        let source = device
            .create_texture(&TextureDesc {
                label: "source".into(),
                width: 16,
                height: 16,
                ..Default::default()
            })
            .unwrap();
        assert!(chain.process(&mut device, source).unwrap().is_none());
        chain.dispose(&mut device);
    }

    #[test]
    fn test_rebuild_keeps_handle_count_stable() {
        let mut device = HeadlessDevice::default();
        let mut chain = chain_with_blur();
        chain.prepare(&mut device, (64, 64)).unwrap();
        let textures = device.live_textures();
        chain.rebuild(&mut device, (32, 32)).unwrap();
        assert_eq!(device.live_textures(), textures);
        assert_eq!(chain.output_size(), Some((16, 16)));
        chain.dispose(&mut device);
    }
}
