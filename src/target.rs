//! Off-screen render targets
//!
//! An [`OffScreenTarget`] owns exactly one device texture plus one
//! framebuffer per face/layer. It carries the refresh-rate policy deciding
//! which frames actually re-render, resizes atomically (dispose + recreate,
//! no partial state), and notifies resize/after-unbind observers so
//! dependent pass chains can follow along.

use crate::device::{
    FramebufferHandle, GraphicsDevice, PixelFormat, TextureDesc, TextureHandle, TextureKind,
};
use crate::error::RenderResult;
use crate::events::Observable;

/// Render exactly once, then never again (until the counter is reset).
pub const REFRESH_RATE_RENDER_ONCE: u32 = 0;
/// Re-render every frame.
pub const REFRESH_RATE_RENDER_EVERY_FRAME: u32 = 1;

/// Requested size of an off-screen target.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum TargetSize {
    Fixed { width: u32, height: u32 },
    /// Fraction of the live viewport, re-resolved every frame.
    ViewportRatio(f32),
}

impl TargetSize {
    /// Resolve against the viewport and clamp to device limits. Capability
    /// overflow clamps, it never errors.
    pub fn resolve(&self, viewport: (u32, u32), device: &dyn GraphicsDevice) -> (u32, u32) {
        let (width, height) = match *self {
            TargetSize::Fixed { width, height } => (width, height),
            TargetSize::ViewportRatio(ratio) => (
                ((viewport.0 as f32 * ratio) as u32).max(1),
                ((viewport.1 as f32 * ratio) as u32).max(1),
            ),
        };
        device.caps().clamp_texture_size(width, height)
    }
}

/// Creation options for an [`OffScreenTarget`].
#[derive(Debug, Clone)]
pub struct TargetOptions {
    pub format: PixelFormat,
    pub kind: TextureKind,
    pub mipmaps: bool,
    pub sample_count: u32,
    pub depth_stencil: bool,
    pub auto_clear: bool,
    pub clear_color: [f32; 4],
}

impl Default for TargetOptions {
    fn default() -> Self {
        Self {
            format: PixelFormat::Rgba8,
            kind: TextureKind::D2,
            mipmaps: false,
            sample_count: 1,
            depth_stencil: false,
            auto_clear: true,
            clear_color: [0.0, 0.0, 0.0, 0.0],
        }
    }
}

/// A GPU texture + framebuffer pair used as a render destination.
pub struct OffScreenTarget {
    name: String,
    requested: TargetSize,
    options: TargetOptions,
    size: (u32, u32),
    texture: Option<TextureHandle>,
    framebuffers: Vec<FramebufferHandle>,
    refresh_rate: u32,
    refresh_id: i32,
    disposed: bool,
    /// Notified with the new size after every successful resize.
    pub on_resize: Observable<(u32, u32)>,
    /// Notified after the final face/layer unbind of a render.
    pub on_after_unbind: Observable<()>,
}

impl OffScreenTarget {
    pub fn new(
        device: &mut dyn GraphicsDevice,
        name: &str,
        requested: TargetSize,
        viewport: (u32, u32),
        options: TargetOptions,
    ) -> RenderResult<Self> {
        let size = requested.resolve(viewport, device);
        let mut target = Self {
            name: name.to_string(),
            requested,
            options,
            size,
            texture: None,
            framebuffers: Vec::new(),
            refresh_rate: REFRESH_RATE_RENDER_EVERY_FRAME,
            refresh_id: -1,
            disposed: false,
            on_resize: Observable::new(),
            on_after_unbind: Observable::new(),
        };
        target.create_resources(device)?;
        Ok(target)
    }

    fn create_resources(&mut self, device: &mut dyn GraphicsDevice) -> RenderResult<()> {
        let texture = device.create_texture(&TextureDesc {
            label: self.name.clone(),
            width: self.size.0,
            height: self.size.1,
            format: self.options.format,
            kind: self.options.kind,
            mipmaps: self.options.mipmaps,
            sample_count: self.options.sample_count,
        })?;
        let mut framebuffers = Vec::with_capacity(self.options.kind.layer_count() as usize);
        for layer in 0..self.options.kind.layer_count() {
            match device.create_framebuffer(texture, layer, self.options.depth_stencil) {
                Ok(fb) => framebuffers.push(fb),
                Err(err) => {
                    // Unwind the partial allocation so resize stays atomic.
                    for fb in framebuffers {
                        device.destroy_framebuffer(fb);
                    }
                    device.destroy_texture(texture);
                    return Err(err);
                }
            }
        }
        self.texture = Some(texture);
        self.framebuffers = framebuffers;
        Ok(())
    }

    fn release_resources(&mut self, device: &mut dyn GraphicsDevice) {
        for fb in self.framebuffers.drain(..) {
            device.destroy_framebuffer(fb);
        }
        if let Some(texture) = self.texture.take() {
            device.destroy_texture(texture);
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn texture(&self) -> Option<TextureHandle> {
        self.texture
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn requested_size(&self) -> TargetSize {
        self.requested
    }

    pub fn set_requested_size(&mut self, requested: TargetSize) {
        self.requested = requested;
    }

    /// Color the target clears to before each render.
    pub fn set_clear_color(&mut self, color: [f32; 4]) {
        self.options.clear_color = color;
    }

    pub fn refresh_rate(&self) -> u32 {
        self.refresh_rate
    }

    /// Change the refresh policy and restart the counter.
    pub fn set_refresh_rate(&mut self, rate: u32) {
        self.refresh_rate = rate;
        self.reset_refresh_counter();
    }

    /// Force a re-render attempt on the next eligible frame. Called when a
    /// sub-mesh was not ready so the frame is retried instead of skipped for
    /// good.
    pub fn reset_refresh_counter(&mut self) {
        self.refresh_id = -1;
    }

    /// Refresh-rate gate: true on the first call ever; thereafter rate 0
    /// never re-renders, rate 1 renders every call, rate N every Nth call.
    pub fn should_render(&mut self) -> bool {
        if self.disposed {
            return false;
        }
        if self.refresh_id == -1 {
            self.refresh_id = 1;
            return true;
        }
        if self.refresh_rate == self.refresh_id as u32 {
            self.refresh_id = 1;
            return true;
        }
        self.refresh_id += 1;
        false
    }

    /// Render into the target: bind each face/layer framebuffer, clear
    /// (unless auto-clear is off), invoke `draw` with the pass identifier,
    /// unbind. Cube targets regenerate mips after the final face only.
    pub fn render(
        &mut self,
        device: &mut dyn GraphicsDevice,
        mut draw: impl FnMut(&mut dyn GraphicsDevice, u32) -> RenderResult<()>,
    ) -> RenderResult<()> {
        if self.disposed {
            return Ok(());
        }
        let layer_count = self.options.kind.layer_count();
        for layer in 0..layer_count {
            device.bind_framebuffer(self.framebuffers[layer as usize]);
            if self.options.auto_clear {
                device.clear(self.options.clear_color, true, self.options.depth_stencil);
            }
            let result = draw(device, layer);
            device.unbind_framebuffer();
            result?;

            if self.options.kind == TextureKind::Cube && layer == layer_count - 1 {
                if let Some(texture) = self.texture {
                    if self.options.mipmaps {
                        device.generate_mipmaps(texture);
                    }
                }
            }
        }
        self.on_after_unbind.notify(&(), -1);
        Ok(())
    }

    /// Dispose and recreate the texture/framebuffers at `size`. Atomic: on
    /// failure the old resources are already gone but no half-created state
    /// is kept. Notifies resize observers on success.
    pub fn resize(
        &mut self,
        device: &mut dyn GraphicsDevice,
        size: (u32, u32),
    ) -> RenderResult<()> {
        if self.disposed {
            return Ok(());
        }
        let size = device.caps().clamp_texture_size(size.0, size.1);
        self.release_resources(device);
        self.size = size;
        self.create_resources(device)?;
        self.reset_refresh_counter();
        self.on_resize.notify(&size, -1);
        Ok(())
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Release device resources. Every later operation is a no-op.
    pub fn dispose(&mut self, device: &mut dyn GraphicsDevice) {
        if self.disposed {
            return;
        }
        self.release_resources(device);
        self.on_resize.clear();
        self.on_after_unbind.clear();
        self.disposed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HeadlessDevice;

    fn make_target(device: &mut HeadlessDevice, rate: u32) -> OffScreenTarget {
        let mut target = OffScreenTarget::new(
            device,
            "test",
            TargetSize::Fixed {
                width: 8,
                height: 8,
            },
            (64, 64),
            TargetOptions::default(),
        )
        .unwrap();
        target.set_refresh_rate(rate);
        target
    }

    fn gate_sequence(target: &mut OffScreenTarget, calls: usize) -> Vec<bool> {
        (0..calls).map(|_| target.should_render()).collect()
    }

    #[test]
    fn test_refresh_rate_zero_renders_exactly_once() {
        let mut device = HeadlessDevice::default();
        let mut target = make_target(&mut device, REFRESH_RATE_RENDER_ONCE);
        assert_eq!(
            gate_sequence(&mut target, 5),
            vec![true, false, false, false, false]
        );
    }

    #[test]
    fn test_refresh_rate_one_renders_every_frame() {
        let mut device = HeadlessDevice::default();
        let mut target = make_target(&mut device, REFRESH_RATE_RENDER_EVERY_FRAME);
        assert_eq!(gate_sequence(&mut target, 4), vec![true; 4]);
    }

    #[test]
    fn test_refresh_rate_two_renders_every_other_frame() {
        let mut device = HeadlessDevice::default();
        let mut target = make_target(&mut device, 2);
        assert_eq!(
            gate_sequence(&mut target, 5),
            vec![true, false, true, false, true]
        );
    }

    #[test]
    fn test_refresh_rate_three_renders_every_third_frame() {
        let mut device = HeadlessDevice::default();
        let mut target = make_target(&mut device, 3);
        assert_eq!(
            gate_sequence(&mut target, 7),
            vec![true, false, false, true, false, false, true]
        );
    }

    #[test]
    fn test_counter_reset_forces_rerender() {
        let mut device = HeadlessDevice::default();
        let mut target = make_target(&mut device, REFRESH_RATE_RENDER_ONCE);
        assert!(target.should_render());
        assert!(!target.should_render());
        target.reset_refresh_counter();
        assert!(target.should_render());
    }

    #[test]
    fn test_resize_is_atomic_and_leak_free() {
        let mut device = HeadlessDevice::default();
        let mut target = make_target(&mut device, 1);
        let before = device.live_textures();
        target.resize(&mut device, (16, 16)).unwrap();
        target.resize(&mut device, (16, 16)).unwrap();
        assert_eq!(device.live_textures(), before);
        assert_eq!(
            device.texture_size(target.texture().unwrap()),
            Some((16, 16))
        );
        target.dispose(&mut device);
        assert_eq!(device.live_textures(), before - 1);
    }

    #[test]
    fn test_resize_notifies_observers() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let mut device = HeadlessDevice::default();
        let mut target = make_target(&mut device, 1);
        let observed = Rc::new(RefCell::new(None));
        let sink = observed.clone();
        target.on_resize.add(
            move |size, _| {
                *sink.borrow_mut() = Some(*size);
            },
            -1,
            false,
        );
        target.resize(&mut device, (32, 16)).unwrap();
        assert_eq!(*observed.borrow(), Some((32, 16)));
    }

    #[test]
    fn test_cube_target_regenerates_mips_after_last_face() {
        let mut device = HeadlessDevice::default();
        let mut target = OffScreenTarget::new(
            &mut device,
            "cube",
            TargetSize::Fixed {
                width: 8,
                height: 8,
            },
            (64, 64),
            TargetOptions {
                kind: TextureKind::Cube,
                mipmaps: true,
                ..Default::default()
            },
        )
        .unwrap();
        let mut passes = Vec::new();
        target
            .render(&mut device, |_, pass| {
                passes.push(pass);
                Ok(())
            })
            .unwrap();
        assert_eq!(passes, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(device.mipmap_generations(target.texture().unwrap()), 1);
        target.dispose(&mut device);
    }

    #[test]
    fn test_disposed_target_is_noop() {
        let mut device = HeadlessDevice::default();
        let mut target = make_target(&mut device, 1);
        target.dispose(&mut device);
        assert!(!target.should_render());
        assert!(target.render(&mut device, |_, _| panic!("draw on disposed")).is_ok());
        assert!(target.resize(&mut device, (4, 4)).is_ok());
    }
}
