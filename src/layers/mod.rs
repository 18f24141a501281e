//! Effect layers
//!
//! An [`EffectLayer`] renders a filtered subset of the scene into an
//! off-screen target, drives a blur chain over it, and composites the result
//! back onto the main frame. The per-frame protocol is: readiness (resolve
//! and cache shader variants per sub-mesh), off-screen render, pass chain,
//! composite draw, resize reconciliation. Two variants exist — glow and
//! highlight — as a closed set of tagged behaviors selected at construction.

pub mod defines;
pub mod glow;
pub mod highlight;

use crate::device::{
    BlendMode, DrawCommand, DrawUniforms, GraphicsDevice, PixelFormat, ShaderHandle, StencilState,
    TextureHandle,
};
use crate::error::{RenderError, RenderResult};
use crate::events::Observable;
use crate::passes::PassChain;
use crate::scene::{RenderableId, SceneContext};
use crate::target::{OffScreenTarget, TargetOptions, TargetSize};
use std::collections::{BTreeSet, HashMap};

pub use glow::GlowLayerOptions;
pub use highlight::{HighlightLayerOptions, HighlightedMesh};

const EFFECT_MAP_SOURCE: &str = include_str!("../shaders/effect_map.wgsl");
const MERGE_SOURCE: &str = include_str!("../shaders/merge.wgsl");

/// Cached shader variant for one (renderable, sub-mesh) pair.
#[derive(Default)]
struct DrawWrapper {
    defines: String,
    shader: Option<ShaderHandle>,
    /// Compile failed; the sub-mesh stays excluded until its defines change.
    failed: bool,
}

/// Closed set of effect behaviors.
pub enum LayerVariant {
    Glow(glow::GlowState),
    Highlight(highlight::HighlightState),
}

/// One composite draw of a layer's internal render.
pub(crate) struct CompositePass {
    pub(crate) stencil: Option<StencilState>,
    pub(crate) blend: BlendMode,
    pub(crate) uniforms: DrawUniforms,
}

impl LayerVariant {
    fn effect_define(&self) -> &'static str {
        match self {
            LayerVariant::Glow(_) => "GLOW",
            LayerVariant::Highlight(_) => "HIGHLIGHT",
        }
    }

    fn allows_blended(&self) -> bool {
        match self {
            LayerVariant::Glow(_) => false,
            LayerVariant::Highlight(_) => true,
        }
    }

    fn needs_stencil(&self) -> bool {
        matches!(self, LayerVariant::Highlight(_))
    }

    fn has_work(&self) -> bool {
        match self {
            LayerVariant::Glow(_) => true,
            LayerVariant::Highlight(state) => state.has_meshes(),
        }
    }

    fn accepts(&self, id: RenderableId) -> bool {
        match self {
            LayerVariant::Glow(_) => true,
            LayerVariant::Highlight(state) => state.contains(id),
        }
    }

    fn map_color(&self, id: RenderableId, material: &crate::scene::MaterialInfo) -> [f32; 4] {
        match self {
            LayerVariant::Glow(state) => state.map_color(material),
            LayerVariant::Highlight(state) => state.map_color(id, material),
        }
    }

    fn build_chain(&self) -> PassChain {
        match self {
            LayerVariant::Glow(state) => state.build_chain(),
            LayerVariant::Highlight(state) => state.build_chain(),
        }
    }

    fn merge_defines(&self) -> String {
        match self {
            LayerVariant::Glow(state) => state.merge_defines(),
            LayerVariant::Highlight(state) => state.merge_defines(),
        }
    }

    fn composite_passes(&self) -> Vec<CompositePass> {
        match self {
            LayerVariant::Glow(state) => state.composite_passes(),
            LayerVariant::Highlight(state) => state.composite_passes(),
        }
    }

    fn record_kernel(&mut self, ideal: f32) {
        match self {
            LayerVariant::Glow(state) => state.record_kernel(ideal),
            LayerVariant::Highlight(state) => state.record_kernel(ideal),
        }
    }

    fn snapshot(&self) -> VariantSnapshot {
        match self {
            LayerVariant::Glow(state) => VariantSnapshot::Glow {
                options: state.options().clone(),
            },
            LayerVariant::Highlight(state) => VariantSnapshot::Highlight {
                options: state.options().clone(),
                meshes: state.mesh_entries(),
            },
        }
    }
}

struct PendingDraw {
    shader: ShaderHandle,
    world: [f32; 16],
    color: [f32; 4],
    index_count: u32,
    blend: BlendMode,
    cull_back_faces: bool,
    invert_winding: bool,
}

/// A compositing stage rendering a filtered scene subset off-screen and
/// blending its blurred version back onto the main image.
pub struct EffectLayer {
    name: String,
    variant: LayerVariant,
    neutral_color: [f32; 4],
    enabled: bool,
    rendering_group_id: i32,
    target: OffScreenTarget,
    chain: PassChain,
    wrappers: HashMap<(RenderableId, u32), DrawWrapper>,
    excluded: BTreeSet<RenderableId>,
    included_only: BTreeSet<RenderableId>,
    merge_shader: Option<ShaderHandle>,
    merge_defines: String,
    merge_failed: bool,
    blurred: Option<TextureHandle>,
    disposed: bool,
    pub on_before_render: Observable<()>,
    pub on_before_compose: Observable<()>,
    pub on_after_compose: Observable<()>,
    pub on_size_changed: Observable<(u32, u32)>,
}

impl EffectLayer {
    /// Create a glow layer.
    pub fn glow(
        device: &mut dyn GraphicsDevice,
        viewport: (u32, u32),
        name: &str,
        options: GlowLayerOptions,
    ) -> RenderResult<Self> {
        let ratio = options.main_texture_ratio;
        let variant = LayerVariant::Glow(glow::GlowState::new(options));
        Self::new_internal(device, viewport, name, ratio, variant)
    }

    /// Create a highlight layer.
    pub fn highlight(
        device: &mut dyn GraphicsDevice,
        viewport: (u32, u32),
        name: &str,
        options: HighlightLayerOptions,
    ) -> RenderResult<Self> {
        let ratio = options.main_texture_ratio;
        let variant = LayerVariant::Highlight(highlight::HighlightState::new(options));
        Self::new_internal(device, viewport, name, ratio, variant)
    }

    fn new_internal(
        device: &mut dyn GraphicsDevice,
        viewport: (u32, u32),
        name: &str,
        ratio: f32,
        variant: LayerVariant,
    ) -> RenderResult<Self> {
        let neutral_color = [0.0, 0.0, 0.0, 0.0];
        let target = OffScreenTarget::new(
            device,
            &format!("{}_map", name),
            TargetSize::ViewportRatio(ratio),
            viewport,
            TargetOptions {
                format: PixelFormat::Rgba8,
                depth_stencil: variant.needs_stencil(),
                clear_color: neutral_color,
                ..Default::default()
            },
        )?;
        let mut chain = variant.build_chain();
        chain.prepare(device, target.size())?;

        Ok(Self {
            name: name.to_string(),
            variant,
            neutral_color,
            enabled: true,
            rendering_group_id: -1,
            target,
            chain,
            wrappers: HashMap::new(),
            excluded: BTreeSet::new(),
            included_only: BTreeSet::new(),
            merge_shader: None,
            merge_defines: String::new(),
            merge_failed: false,
            blurred: None,
            disposed: false,
            on_before_render: Observable::new(),
            on_before_compose: Observable::new(),
            on_after_compose: Observable::new(),
            on_size_changed: Observable::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn neutral_color(&self) -> [f32; 4] {
        self.neutral_color
    }

    /// Background the off-screen map clears to.
    pub fn set_neutral_color(&mut self, color: [f32; 4]) {
        self.neutral_color = color;
        self.target.set_clear_color(color);
    }

    pub fn rendering_group_id(&self) -> i32 {
        self.rendering_group_id
    }

    /// `-1` composites after all rendering groups; a specific id composites
    /// right after that group's draws.
    pub fn set_rendering_group_id(&mut self, group: i32) {
        self.rendering_group_id = group;
    }

    pub fn variant(&self) -> &LayerVariant {
        &self.variant
    }

    pub fn as_glow(&self) -> Option<&glow::GlowState> {
        match &self.variant {
            LayerVariant::Glow(state) => Some(state),
            _ => None,
        }
    }

    pub fn as_highlight(&self) -> Option<&highlight::HighlightState> {
        match &self.variant {
            LayerVariant::Highlight(state) => Some(state),
            _ => None,
        }
    }

    /// Whether the layer's composite needs the shared stencil buffer.
    pub fn needs_stencil(&self) -> bool {
        self.variant.needs_stencil()
    }

    /// Whether the layer has any work this frame.
    pub fn should_render(&self) -> bool {
        self.enabled && !self.disposed && self.variant.has_work()
    }

    /// Visibility filter: rendering-group and inclusion/exclusion sets plus
    /// the variant's own registration check.
    pub fn has_mesh(&self, id: RenderableId) -> bool {
        if self.excluded.contains(&id) {
            return false;
        }
        if !self.included_only.is_empty() && !self.included_only.contains(&id) {
            return false;
        }
        self.variant.accepts(id)
    }

    pub fn add_excluded_mesh(&mut self, id: RenderableId) {
        self.excluded.insert(id);
    }

    pub fn remove_excluded_mesh(&mut self, id: RenderableId) {
        self.excluded.remove(&id);
    }

    pub fn add_included_only_mesh(&mut self, id: RenderableId) {
        self.included_only.insert(id);
    }

    pub fn remove_included_only_mesh(&mut self, id: RenderableId) {
        self.included_only.remove(&id);
    }

    /// Register a mesh on a highlight layer with its outline color. Returns
    /// false on glow layers, which select by emissive instead.
    pub fn add_mesh(&mut self, id: RenderableId, color: [f32; 4], emissive_only: bool) -> bool {
        match &mut self.variant {
            LayerVariant::Highlight(state) => {
                state.add_mesh(id, color, emissive_only);
                true
            }
            LayerVariant::Glow(_) => {
                log::debug!("add_mesh ignored on glow layer '{}'", self.name);
                false
            }
        }
    }

    pub fn remove_mesh(&mut self, id: RenderableId) -> bool {
        match &mut self.variant {
            LayerVariant::Highlight(state) => state.remove_mesh(id),
            LayerVariant::Glow(_) => false,
        }
    }

    /// Glow intensity applied at composite time.
    pub fn set_intensity(&mut self, intensity: f32) -> bool {
        match &mut self.variant {
            LayerVariant::Glow(state) => state.set_intensity(intensity),
            LayerVariant::Highlight(_) => false,
        }
    }

    /// Retune the blur kernel. Returns true when the chain changed; the
    /// recompile happens on the next render.
    pub fn set_blur_kernel_size(&mut self, ideal: f32) -> bool {
        let dirty = self.chain.set_kernel(ideal);
        if dirty {
            self.variant.record_kernel(ideal);
        }
        dirty
    }

    pub fn main_texture(&self) -> Option<TextureHandle> {
        self.target.texture()
    }

    pub fn blurred_texture(&self) -> Option<TextureHandle> {
        self.blurred
    }

    pub fn main_texture_size(&self) -> (u32, u32) {
        self.target.size()
    }

    /// Off-screen phase: resolve shader variants for every candidate
    /// sub-mesh, render the filtered list into the target, then drive the
    /// pass chain. Not-ready sub-meshes reset the refresh counter so the
    /// frame is retried instead of dropped.
    pub fn render(
        &mut self,
        device: &mut dyn GraphicsDevice,
        scene: &dyn SceneContext,
    ) -> RenderResult<()> {
        if self.disposed || !self.should_render() {
            return Ok(());
        }
        self.on_before_render.notify(&(), -1);
        if !self.target.should_render() {
            return Ok(());
        }

        let effect_define = self.variant.effect_define();
        let allows_blended = self.variant.allows_blended();

        let mut draws: Vec<PendingDraw> = Vec::new();
        let mut all_ready = true;
        for id in scene.renderable_ids() {
            if !self.has_mesh(id) {
                continue;
            }
            let Some(renderable) = scene.renderable(id) else {
                continue;
            };
            if !renderable.is_visible() {
                continue;
            }
            let world = renderable.world_matrix();
            let invert_winding = world.determinant() < 0.0;
            for sub in renderable.sub_meshes() {
                if sub.material.needs_alpha_blending && !allows_blended {
                    continue;
                }
                if !renderable.is_ready(sub.features.instanced) {
                    all_ready = false;
                    continue;
                }
                let color = self.variant.map_color(id, &sub.material);
                let defines = defines::sub_mesh_defines(effect_define, &sub.features, &sub.material);
                let wrapper = self.wrappers.entry((id, sub.index)).or_default();
                if wrapper.defines != defines {
                    if let Some(old) = wrapper.shader.take() {
                        device.destroy_shader(old);
                    }
                    wrapper.failed = false;
                    wrapper.defines = defines.clone();
                }
                if wrapper.failed {
                    continue;
                }
                if wrapper.shader.is_none() {
                    match device.create_shader("effect_map", EFFECT_MAP_SOURCE, &defines) {
                        Ok(shader) => wrapper.shader = Some(shader),
                        Err(err) => {
                            log::warn!(
                                "effect map variant failed for mesh {} sub {}: {}",
                                id,
                                sub.index,
                                err
                            );
                            wrapper.failed = true;
                            continue;
                        }
                    }
                }
                let shader = match wrapper.shader {
                    Some(shader) => shader,
                    None => continue,
                };
                draws.push(PendingDraw {
                    shader,
                    world: world.to_cols_array(),
                    color,
                    index_count: sub.index_count,
                    blend: if sub.material.needs_alpha_blending {
                        BlendMode::AlphaBlend
                    } else {
                        BlendMode::Opaque
                    },
                    cull_back_faces: sub.material.back_face_culling,
                    invert_winding,
                });
            }
        }
        if !all_ready {
            self.target.reset_refresh_counter();
        }

        self.target.render(device, |device, _pass| {
            for draw in &draws {
                device.draw(&DrawCommand {
                    shader: draw.shader,
                    textures: &[],
                    uniforms: DrawUniforms {
                        world: draw.world,
                        color: draw.color,
                        ..Default::default()
                    },
                    index_count: draw.index_count,
                    blend: draw.blend,
                    stencil: None,
                    cull_back_faces: draw.cull_back_faces,
                    invert_winding: draw.invert_winding,
                })?;
            }
            Ok(())
        })?;

        // Post-unbind: the blurred result for this frame's composite.
        if let Some(source) = self.target.texture() {
            self.blurred = self.chain.process(device, source)?;
        }
        Ok(())
    }

    fn ensure_merge_shader(&mut self, device: &mut dyn GraphicsDevice) {
        let defines = self.variant.merge_defines();
        if self.merge_defines != defines {
            if let Some(old) = self.merge_shader.take() {
                device.destroy_shader(old);
            }
            self.merge_failed = false;
            self.merge_defines = defines;
        }
        if self.merge_shader.is_some() || self.merge_failed {
            return;
        }
        match device.create_shader("merge", MERGE_SOURCE, &self.merge_defines) {
            Ok(shader) => self.merge_shader = Some(shader),
            Err(err) => {
                log::warn!("merge shader failed for layer '{}': {}", self.name, err);
                self.merge_failed = true;
            }
        }
    }

    /// Composite the blurred texture onto the currently bound framebuffer.
    /// Silently skips while the chain is still compiling — a partial blend
    /// is never drawn.
    pub fn composite(&mut self, device: &mut dyn GraphicsDevice) -> RenderResult<()> {
        if self.disposed || !self.should_render() {
            return Ok(());
        }
        let Some(blurred) = self.blurred else {
            return Ok(());
        };
        if !self.chain.is_ready() {
            return Ok(());
        }
        self.ensure_merge_shader(device);
        let Some(merge) = self.merge_shader else {
            return Ok(());
        };

        self.on_before_compose.notify(&(), -1);
        for pass in self.variant.composite_passes() {
            device.draw(&DrawCommand {
                shader: merge,
                textures: &[blurred],
                uniforms: pass.uniforms,
                index_count: 6,
                blend: pass.blend,
                stencil: pass.stencil,
                cull_back_faces: false,
                invert_winding: false,
            })?;
        }
        self.on_after_compose.notify(&(), -1);
        Ok(())
    }

    /// Per-frame resize reconciliation: recompute the desired size from the
    /// live viewport and rebuild the target + chain on mismatch. This is how
    /// layers stay resolution-correct without a resize event reaching them.
    pub fn reconcile_size(
        &mut self,
        device: &mut dyn GraphicsDevice,
        viewport: (u32, u32),
    ) -> RenderResult<()> {
        if self.disposed {
            return Ok(());
        }
        let desired = self.target.requested_size().resolve(viewport, device);
        if desired == self.target.size() {
            return Ok(());
        }
        self.target.resize(device, desired)?;
        self.chain.rebuild(device, desired)?;
        self.blurred = None;
        self.on_size_changed.notify(&desired, -1);
        Ok(())
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Release every device resource. Later operations are no-ops.
    pub fn dispose(&mut self, device: &mut dyn GraphicsDevice) {
        if self.disposed {
            return;
        }
        self.target.dispose(device);
        self.chain.dispose(device);
        for (_, wrapper) in self.wrappers.drain() {
            if let Some(shader) = wrapper.shader {
                device.destroy_shader(shader);
            }
        }
        if let Some(shader) = self.merge_shader.take() {
            device.destroy_shader(shader);
        }
        self.on_before_render.clear();
        self.on_before_compose.clear();
        self.on_after_compose.clear();
        self.on_size_changed.clear();
        self.disposed = true;
    }

    /// Persistable snapshot of the layer.
    pub fn snapshot(&self) -> LayerSnapshot {
        LayerSnapshot {
            name: self.name.clone(),
            neutral_color: self.neutral_color,
            enabled: self.enabled,
            rendering_group_id: self.rendering_group_id,
            excluded: self.excluded.iter().copied().collect(),
            included_only: self.included_only.iter().copied().collect(),
            variant: self.variant.snapshot(),
        }
    }

    /// Rebuild a layer from a snapshot.
    pub fn from_snapshot(
        device: &mut dyn GraphicsDevice,
        viewport: (u32, u32),
        snapshot: &LayerSnapshot,
    ) -> RenderResult<Self> {
        let mut layer = match &snapshot.variant {
            VariantSnapshot::Glow { options } => {
                Self::glow(device, viewport, &snapshot.name, options.clone())?
            }
            VariantSnapshot::Highlight { options, meshes } => {
                let mut layer =
                    Self::highlight(device, viewport, &snapshot.name, options.clone())?;
                for (id, mesh) in meshes {
                    layer.add_mesh(*id, mesh.color, mesh.emissive_only);
                }
                layer
            }
        };
        layer.set_neutral_color(snapshot.neutral_color);
        layer.enabled = snapshot.enabled;
        layer.rendering_group_id = snapshot.rendering_group_id;
        layer.excluded = snapshot.excluded.iter().copied().collect();
        layer.included_only = snapshot.included_only.iter().copied().collect();
        Ok(layer)
    }

    /// Serialize to plain JSON data.
    pub fn serialize(&self) -> RenderResult<serde_json::Value> {
        serde_json::to_value(self.snapshot()).map_err(|e| RenderError::render(e.to_string()))
    }

    /// Parse a layer back from [`EffectLayer::serialize`] output.
    pub fn parse(
        device: &mut dyn GraphicsDevice,
        viewport: (u32, u32),
        value: &serde_json::Value,
    ) -> RenderResult<Self> {
        let snapshot: LayerSnapshot = serde_json::from_value(value.clone())
            .map_err(|e| RenderError::render(e.to_string()))?;
        Self::from_snapshot(device, viewport, &snapshot)
    }
}

/// Persisted layer state.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LayerSnapshot {
    pub name: String,
    pub neutral_color: [f32; 4],
    pub enabled: bool,
    pub rendering_group_id: i32,
    pub excluded: Vec<RenderableId>,
    pub included_only: Vec<RenderableId>,
    pub variant: VariantSnapshot,
}

/// Persisted per-variant options.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind")]
pub enum VariantSnapshot {
    Glow {
        options: GlowLayerOptions,
    },
    Highlight {
        options: HighlightLayerOptions,
        meshes: Vec<(RenderableId, HighlightedMesh)>,
    },
}
