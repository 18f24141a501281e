//! Scene collaborator interfaces
//!
//! The compositing core consumes the scene through narrow traits: a
//! [`SceneContext`] exposing the viewport, renderable enumeration and
//! lookup-by-id, and [`Renderable`] exposing readiness, world transform and
//! sub-mesh descriptions. Effect layers store plain ids and resolve them
//! through the scene when needed, never object references.
//!
//! [`SimpleScene`] and [`SimpleMesh`] are a minimal concrete implementation
//! used by the test suite and as host-integration reference.

use glam::Mat4;
use std::collections::BTreeMap;

/// Stable unique identifier of a renderable object.
pub type RenderableId = u64;

/// Mesh/material feature flags driving shader-variant selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MeshFeatures {
    /// UV set index of the diffuse texture, if present.
    pub diffuse_uv: Option<u32>,
    /// UV set index of the opacity texture, if present.
    pub opacity_uv: Option<u32>,
    /// UV set index of the emissive texture, if present.
    pub emissive_uv: Option<u32>,
    /// Vertex colors carry alpha.
    pub vertex_alpha: bool,
    /// Bones influencing each vertex (0 = not skinned).
    pub bone_influencers: u32,
    /// Bone matrices sampled from a texture instead of a uniform array.
    pub bones_in_texture: bool,
    /// Active morph target count.
    pub morph_targets: u32,
    /// Morph deltas sampled from a texture instead of vertex attributes.
    pub morphs_in_texture: bool,
    /// Hardware instancing.
    pub instanced: bool,
    /// Thin instances (matrix buffer without per-instance world updates).
    pub thin_instances: bool,
}

/// The slice of material state the core needs for filtering and drawing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialInfo {
    pub needs_alpha_blending: bool,
    pub back_face_culling: bool,
    pub emissive_color: [f32; 4],
    /// Use the material's own bind routine for the effect map render instead
    /// of a generated variant (pass-through materials).
    pub use_own_material: bool,
}

impl Default for MaterialInfo {
    fn default() -> Self {
        Self {
            needs_alpha_blending: false,
            back_face_culling: true,
            emissive_color: [0.0, 0.0, 0.0, 1.0],
            use_own_material: false,
        }
    }
}

/// One drawable sub-mesh of a renderable.
#[derive(Debug, Clone)]
pub struct SubMeshDesc {
    pub index: u32,
    pub material: MaterialInfo,
    pub features: MeshFeatures,
    pub index_count: u32,
}

/// Renderable query interface the effect layers consume.
pub trait Renderable {
    fn unique_id(&self) -> RenderableId;
    /// Whether the renderable's own resources are ready to draw.
    fn is_ready(&self, use_instances: bool) -> bool;
    fn world_matrix(&self) -> Mat4;
    fn sub_meshes(&self) -> &[SubMeshDesc];
    fn is_visible(&self) -> bool {
        true
    }
}

/// Scene lifecycle interface the core consumes.
pub trait SceneContext {
    /// Current viewport size in pixels.
    fn viewport(&self) -> (u32, u32);
    /// Ids of every renderable in the scene, in draw order.
    fn renderable_ids(&self) -> Vec<RenderableId>;
    /// Weak lookup by id; `None` once the object left the scene.
    fn renderable(&self, id: RenderableId) -> Option<&dyn Renderable>;
    /// Number of rendering groups (ids `0..count`).
    fn rendering_group_count(&self) -> i32 {
        4
    }
    /// Most recent frames-per-second sample.
    fn current_fps(&self) -> f64;
}

/// Minimal mesh record for [`SimpleScene`].
#[derive(Debug, Clone)]
pub struct SimpleMesh {
    pub id: RenderableId,
    pub world: Mat4,
    pub sub_meshes: Vec<SubMeshDesc>,
    pub ready: bool,
    pub visible: bool,
}

impl SimpleMesh {
    pub fn new(id: RenderableId, sub_meshes: Vec<SubMeshDesc>) -> Self {
        Self {
            id,
            world: Mat4::IDENTITY,
            sub_meshes,
            ready: true,
            visible: true,
        }
    }

    /// Single-sub-mesh convenience constructor.
    pub fn with_material(id: RenderableId, material: MaterialInfo) -> Self {
        Self::new(
            id,
            vec![SubMeshDesc {
                index: 0,
                material,
                features: MeshFeatures::default(),
                index_count: 36,
            }],
        )
    }
}

impl Renderable for SimpleMesh {
    fn unique_id(&self) -> RenderableId {
        self.id
    }

    fn is_ready(&self, _use_instances: bool) -> bool {
        self.ready
    }

    fn world_matrix(&self) -> Mat4 {
        self.world
    }

    fn sub_meshes(&self) -> &[SubMeshDesc] {
        &self.sub_meshes
    }

    fn is_visible(&self) -> bool {
        self.visible
    }
}

/// Reference [`SceneContext`] implementation over a flat mesh map.
pub struct SimpleScene {
    meshes: BTreeMap<RenderableId, SimpleMesh>,
    viewport: (u32, u32),
    fps: f64,
}

impl SimpleScene {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            meshes: BTreeMap::new(),
            viewport: (width, height),
            fps: 60.0,
        }
    }

    pub fn add_mesh(&mut self, mesh: SimpleMesh) {
        self.meshes.insert(mesh.id, mesh);
    }

    pub fn remove_mesh(&mut self, id: RenderableId) -> bool {
        self.meshes.remove(&id).is_some()
    }

    pub fn mesh_mut(&mut self, id: RenderableId) -> Option<&mut SimpleMesh> {
        self.meshes.get_mut(&id)
    }

    pub fn set_viewport(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
    }

    pub fn set_fps(&mut self, fps: f64) {
        self.fps = fps;
    }
}

impl SceneContext for SimpleScene {
    fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    fn renderable_ids(&self) -> Vec<RenderableId> {
        self.meshes.keys().copied().collect()
    }

    fn renderable(&self, id: RenderableId) -> Option<&dyn Renderable> {
        self.meshes.get(&id).map(|m| m as &dyn Renderable)
    }

    fn current_fps(&self) -> f64 {
        self.fps
    }
}
