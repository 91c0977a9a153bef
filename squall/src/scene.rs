// Scene graph and draw list building
//
// Nodes live in one arena and point at each other by index. A node
// either carries a mesh or is a plain grouping transform. Every
// frame the tree is walked once to refresh world transforms and once
// to emit RenderObjects into the DrawContext, which the frame driver
// then culls, sorts and records.

use ash::vk;
use ash::vk::Handle;
use bitflags::bitflags;
use cgmath::{InnerSpace, Matrix4, Quaternion, SquareMatrix, Vector3, Vector4};

use crate::descriptor::DescAllocator;
use crate::material::{MaterialInstance, MaterialPass, SamplerDesc};
use crate::resource::{AllocatedBuffer, AllocatedImage, GpuMeshBuffers};

use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// The interleaved vertex record every mesh uses.
///
/// uv coordinates are split around the normal to match the std430
/// layout the vertex shader reads through the buffer address.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct Vertex {
    pub position: [f32; 3],
    pub uv_x: f32,
    pub normal: [f32; 3],
    pub uv_y: f32,
    pub color: [f32; 4],
}

impl Default for Vertex {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            uv_x: 0.0,
            normal: [1.0, 0.0, 0.0],
            uv_y: 0.0,
            color: [1.0; 4],
        }
    }
}

// Equality and hashing go through the bit patterns of each lane so
// deduplication is deterministic. Float comparison semantics (NaN,
// signed zero) are exactly what we do not want here.
impl PartialEq for Vertex {
    fn eq(&self, other: &Self) -> bool {
        let bits = |v: &Vertex| {
            let mut b = [0u32; 12];
            for (i, f) in v
                .position
                .iter()
                .chain(std::iter::once(&v.uv_x))
                .chain(v.normal.iter())
                .chain(std::iter::once(&v.uv_y))
                .chain(v.color.iter())
                .enumerate()
            {
                b[i] = f.to_bits();
            }
            b
        };
        bits(self) == bits(other)
    }
}

impl Eq for Vertex {}

impl Hash for Vertex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for f in self
            .position
            .iter()
            .chain(std::iter::once(&self.uv_x))
            .chain(self.normal.iter())
            .chain(std::iter::once(&self.uv_y))
            .chain(self.color.iter())
        {
            f.to_bits().hash(state);
        }
    }
}

/// Axis aligned bounds of a surface in mesh-local space.
#[derive(Copy, Clone, Debug)]
pub struct Bounds {
    pub origin: Vector3<f32>,
    pub extents: Vector3<f32>,
    pub sphere_radius: f32,
}

impl Bounds {
    /// Bounds over the vertices a surface's index range touches.
    pub fn from_surface(vertices: &[Vertex], indices: &[u32]) -> Self {
        if indices.is_empty() || vertices.is_empty() {
            return Self {
                origin: Vector3::new(0.0, 0.0, 0.0),
                extents: Vector3::new(0.0, 0.0, 0.0),
                sphere_radius: 0.0,
            };
        }

        let first = vertices[indices[0] as usize].position;
        let mut minpos = Vector3::new(first[0], first[1], first[2]);
        let mut maxpos = minpos;

        for idx in indices.iter() {
            let p = vertices[*idx as usize].position;
            minpos.x = minpos.x.min(p[0]);
            minpos.y = minpos.y.min(p[1]);
            minpos.z = minpos.z.min(p[2]);
            maxpos.x = maxpos.x.max(p[0]);
            maxpos.y = maxpos.y.max(p[1]);
            maxpos.z = maxpos.z.max(p[2]);
        }

        let origin = (maxpos + minpos) / 2.0;
        let extents = (maxpos - minpos) / 2.0;
        Self {
            origin: origin,
            extents: extents,
            sphere_radius: extents.magnitude(),
        }
    }
}

// ---------------------------------------------------------------
// Loader facing data. The asset loader collaborator produces these;
// the renderer turns them into a live Scene.
// ---------------------------------------------------------------

/// One surface of a mesh: an index range plus the material driving
/// it.
#[derive(Clone, Debug)]
pub struct SurfaceData {
    pub start_index: u32,
    pub count: u32,
    /// Index into SceneData::materials; None selects the default
    /// material.
    pub material: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct MeshData {
    pub name: String,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub surfaces: Vec<SurfaceData>,
}

/// Decoded RGBA8 pixels for one texture.
#[derive(Clone)]
pub struct TextureData {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub mipmapped: bool,
}

#[derive(Clone, Debug)]
pub struct MaterialData {
    pub name: String,
    pub pass: MaterialPass,
    pub color_factors: [f32; 4],
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    /// Emissive color with any strength extension premultiplied.
    pub emissive_factor: [f32; 3],
    pub color_texture: Option<usize>,
    pub color_sampler: Option<usize>,
    pub metal_rough_texture: Option<usize>,
    pub metal_rough_sampler: Option<usize>,
}

/// A local transform, either a full matrix or decomposed TRS.
#[derive(Clone, Debug)]
pub enum NodeTransform {
    Matrix([[f32; 4]; 4]),
    Trs {
        translation: [f32; 3],
        /// xyzw quaternion
        rotation: [f32; 4],
        scale: [f32; 3],
    },
}

impl NodeTransform {
    pub fn to_matrix(&self) -> Matrix4<f32> {
        match self {
            NodeTransform::Matrix(cols) => Matrix4::from(*cols),
            NodeTransform::Trs {
                translation,
                rotation,
                scale,
            } => {
                let t = Matrix4::from_translation(Vector3::new(
                    translation[0],
                    translation[1],
                    translation[2],
                ));
                let r: Matrix4<f32> = Quaternion::new(
                    rotation[3],
                    rotation[0],
                    rotation[1],
                    rotation[2],
                )
                .into();
                let s = Matrix4::from_nonuniform_scale(scale[0], scale[1], scale[2]);
                t * r * s
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct NodeData {
    pub name: String,
    pub transform: NodeTransform,
    /// Index into SceneData::meshes.
    pub mesh: Option<usize>,
    /// Indices into SceneData::nodes.
    pub children: Vec<usize>,
}

/// Everything the loader hands over for one scene.
#[derive(Clone, Default)]
pub struct SceneData {
    pub meshes: Vec<MeshData>,
    pub materials: Vec<MaterialData>,
    pub textures: Vec<TextureData>,
    pub samplers: Vec<SamplerDesc>,
    pub nodes: Vec<NodeData>,
}

impl Default for TextureData {
    fn default() -> Self {
        Self {
            pixels: Vec::new(),
            width: 0,
            height: 0,
            mipmapped: false,
        }
    }
}

// ---------------------------------------------------------------
// Live scene
// ---------------------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NodeId(pub(crate) usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MeshId(pub(crate) usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MaterialId(pub(crate) usize);

/// What a node contributes to the frame.
#[derive(Copy, Clone, Debug)]
pub enum NodeKind {
    Empty,
    Mesh(MeshId),
}

/// One node record in the arena.
pub struct Node {
    pub name: String,
    pub local: Matrix4<f32>,
    pub(crate) world: Matrix4<f32>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub kind: NodeKind,
}

/// A mesh asset resident on the GPU.
pub struct MeshAsset {
    pub name: String,
    pub surfaces: Vec<GpuSurface>,
    pub buffers: GpuMeshBuffers,
}

/// A surface with its material resolved to an id.
#[derive(Copy, Clone, Debug)]
pub struct GpuSurface {
    pub start_index: u32,
    pub count: u32,
    pub material: MaterialId,
    pub bounds: Bounds,
}

/// One draw emitted into the DrawContext. Lives only within a single
/// frame.
#[derive(Copy, Clone)]
pub struct RenderObject {
    pub index_count: u32,
    pub first_index: u32,
    pub index_buffer: vk::Buffer,
    pub vertex_buffer_address: vk::DeviceAddress,
    pub material: MaterialId,
    pub pipeline: vk::Pipeline,
    /// The material set for the frame slot this context was built
    /// for.
    pub material_set: vk::DescriptorSet,
    pub transform: Matrix4<f32>,
    pub bounds: Bounds,
}

/// The per-frame draw lists.
///
/// The transparent list keeps scene emission order; there is no back
/// to front sort, so blending correctness depends on the order nodes
/// were emitted.
pub struct DrawContext {
    pub opaque: Vec<RenderObject>,
    pub transparent: Vec<RenderObject>,
    pub frame_index: u64,
}

impl DrawContext {
    pub fn new() -> Self {
        Self {
            opaque: Vec::new(),
            transparent: Vec::new(),
            frame_index: 0,
        }
    }

    pub fn clear(&mut self, frame_index: u64) {
        self.opaque.clear();
        self.transparent.clear();
        self.frame_index = frame_index;
    }
}

/// An exported point light from an emissive surface.
#[derive(Copy, Clone, Debug)]
pub struct PointLight {
    pub position: Vector4<f32>,
    pub color: Vector4<f32>,
}

bitflags! {
    /// Dirty state the driver consumes during update_scene.
    pub struct SceneFlags: u32 {
        const TRANSFORMS_DIRTY = 1;
        const LIGHTS_DIRTY = 2;
    }
}

/// A loaded scene with its GPU resources.
///
/// All resources are owned here and released when the scene drops,
/// after a device idle wait so nothing in flight is pulled out from
/// under the GPU.
pub struct Scene {
    pub(crate) sc_dev: Arc<crate::device::Device>,

    pub(crate) sc_nodes: Vec<Node>,
    pub(crate) sc_top_nodes: Vec<NodeId>,
    pub(crate) sc_meshes: Vec<MeshAsset>,
    pub(crate) sc_materials: Vec<MaterialInstance>,
    pub(crate) sc_images: Vec<AllocatedImage>,
    pub(crate) sc_samplers: Vec<vk::Sampler>,
    pub(crate) sc_material_buffer: Option<AllocatedBuffer>,
    pub(crate) sc_desc_alloc: DescAllocator,

    pub(crate) sc_flags: SceneFlags,
}

impl Scene {
    pub fn node(&self, id: NodeId) -> &Node {
        &self.sc_nodes[id.0]
    }

    pub fn top_nodes(&self) -> &[NodeId] {
        &self.sc_top_nodes
    }

    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.sc_nodes
            .iter()
            .position(|n| n.name == name)
            .map(NodeId)
    }

    /// Replace a node's local transform. World transforms are
    /// refreshed lazily at the next update_scene.
    pub fn set_local_transform(&mut self, id: NodeId, local: Matrix4<f32>) {
        self.sc_nodes[id.0].local = local;
        self.sc_flags |= SceneFlags::TRANSFORMS_DIRTY;
    }

    /// Pre-multiply a rotation onto every top level node. This is
    /// the scene animation hook the demo uses.
    pub fn rotate_top_nodes(&mut self, rot: Matrix4<f32>) {
        for id in self.sc_top_nodes.clone() {
            let local = self.sc_nodes[id.0].local;
            self.sc_nodes[id.0].local = rot * local;
        }
        self.sc_flags |= SceneFlags::TRANSFORMS_DIRTY;
    }

    pub fn transforms_dirty(&self) -> bool {
        self.sc_flags.contains(SceneFlags::TRANSFORMS_DIRTY)
    }

    /// Recompute world transforms for the whole forest.
    pub fn refresh_transforms(&mut self) {
        refresh_transform_arena(&mut self.sc_nodes, &self.sc_top_nodes);
        self.sc_flags.remove(SceneFlags::TRANSFORMS_DIRTY);
    }

    /// The world transform as of the last refresh.
    pub fn world_transform(&self, id: NodeId) -> Matrix4<f32> {
        self.sc_nodes[id.0].world
    }

    /// Emit RenderObjects for every mesh node into `ctx`.
    ///
    /// One record per surface, tagged with the node's current world
    /// transform and the material set for `frame_slot`. Transparent
    /// surfaces land in their own list in emission order.
    pub fn emit_draws(&self, ctx: &mut DrawContext, frame_slot: usize) {
        emit_draw_records(
            &self.sc_nodes,
            &self.sc_meshes,
            &self.sc_materials,
            ctx,
            frame_slot,
        );
    }

    pub fn material(&self, id: MaterialId) -> &MaterialInstance {
        &self.sc_materials[id.0]
    }

    /// Export a point light for every emissive surface.
    pub fn emissive_lights(&self, intensity_multiplier: f32) -> Vec<PointLight> {
        collect_emissive_lights(
            &self.sc_nodes,
            &self.sc_meshes,
            &self.sc_materials,
            intensity_multiplier,
        )
    }
}

/// Top-down world transform refresh over the arena.
///
/// world = parent world * local. The arena is indexed, so recursion
/// is a small explicit stack instead of pointer chasing. The loader
/// guarantees the forest is acyclic.
pub(crate) fn refresh_transform_arena(nodes: &mut [Node], top_nodes: &[NodeId]) {
    let mut stack: Vec<(NodeId, Matrix4<f32>)> = top_nodes
        .iter()
        .map(|id| (*id, Matrix4::identity()))
        .collect();

    while let Some((id, parent_world)) = stack.pop() {
        let world = parent_world * nodes[id.0].local;
        nodes[id.0].world = world;

        for child in nodes[id.0].children.clone() {
            stack.push((child, world));
        }
    }
}

/// Walk the arena and emit one RenderObject per mesh surface.
pub(crate) fn emit_draw_records(
    nodes: &[Node],
    meshes: &[MeshAsset],
    materials: &[MaterialInstance],
    ctx: &mut DrawContext,
    frame_slot: usize,
) {
    for node in nodes.iter() {
        let mesh_id = match node.kind {
            NodeKind::Mesh(id) => id,
            NodeKind::Empty => continue,
        };
        let mesh = &meshes[mesh_id.0];

        for surface in mesh.surfaces.iter() {
            let material = &materials[surface.material.0];

            let obj = RenderObject {
                index_count: surface.count,
                first_index: surface.start_index,
                index_buffer: mesh.buffers.index_buffer.buffer,
                vertex_buffer_address: mesh.buffers.vertex_buffer_address,
                material: surface.material,
                pipeline: material.pipeline.pipeline,
                material_set: material.sets[frame_slot % material.sets.len()],
                transform: node.world,
                bounds: surface.bounds,
            };

            match material.pass {
                MaterialPass::Transparent => ctx.transparent.push(obj),
                MaterialPass::Opaque => ctx.opaque.push(obj),
            }
        }
    }
}

/// Gather a point light for every emissive surface.
///
/// The light sits at the surface bounds origin moved to world space;
/// color carries the emissive factor with the intensity multiplier
/// in w.
pub(crate) fn collect_emissive_lights(
    nodes: &[Node],
    meshes: &[MeshAsset],
    materials: &[MaterialInstance],
    intensity_multiplier: f32,
) -> Vec<PointLight> {
    let mut lights = Vec::new();

    for node in nodes.iter() {
        let mesh_id = match node.kind {
            NodeKind::Mesh(id) => id,
            NodeKind::Empty => continue,
        };

        for surface in meshes[mesh_id.0].surfaces.iter() {
            let emissive = materials[surface.material.0].constants.emissive_factors;
            let strength = Vector3::new(emissive.x, emissive.y, emissive.z).magnitude();
            if strength <= 0.001 {
                continue;
            }

            let center = node.world
                * Vector4::new(
                    surface.bounds.origin.x,
                    surface.bounds.origin.y,
                    surface.bounds.origin.z,
                    1.0,
                );

            lights.push(PointLight {
                position: center,
                color: Vector4::new(emissive.x, emissive.y, emissive.z, intensity_multiplier),
            });
        }
    }

    lights
}

impl Drop for Scene {
    fn drop(&mut self) {
        // everything here may still be referenced by in-flight
        // frames, so drain the queues first
        self.sc_dev.wait_idle();

        let dev = self.sc_dev.clone();

        self.sc_desc_alloc.destroy(&dev.dev);

        unsafe {
            for sampler in self.sc_samplers.drain(..) {
                dev.dev.destroy_sampler(sampler, None);
            }

            if let Some(buf) = self.sc_material_buffer.take() {
                dev.dev.destroy_buffer(buf.buffer, None);
                dev.dev.free_memory(buf.memory, None);
            }

            for img in self.sc_images.drain(..) {
                dev.dev.destroy_image_view(img.view, None);
                dev.dev.destroy_image(img.image, None);
                dev.dev.free_memory(img.memory, None);
            }

            for mesh in self.sc_meshes.drain(..) {
                let b = mesh.buffers;
                dev.dev.destroy_buffer(b.index_buffer.buffer, None);
                dev.dev.free_memory(b.index_buffer.memory, None);
                dev.dev.destroy_buffer(b.vertex_buffer.buffer, None);
                dev.dev.free_memory(b.vertex_buffer.memory, None);
            }
        }
    }
}

// ---------------------------------------------------------------
// Visibility and ordering
// ---------------------------------------------------------------

/// Clip space culling test.
///
/// The eight corners of origin +- extents are pushed through
/// viewproj * world and divided by w; the object survives unless its
/// clip space box lies strictly outside the view volume. Depth runs
/// reverse-Z, so the z interval is [0, 1] with near at 1.
pub fn is_visible(obj: &RenderObject, viewproj: &Matrix4<f32>) -> bool {
    let corners = [
        Vector3::new(1.0, 1.0, 1.0),
        Vector3::new(1.0, 1.0, -1.0),
        Vector3::new(1.0, -1.0, 1.0),
        Vector3::new(1.0, -1.0, -1.0),
        Vector3::new(-1.0, 1.0, 1.0),
        Vector3::new(-1.0, 1.0, -1.0),
        Vector3::new(-1.0, -1.0, 1.0),
        Vector3::new(-1.0, -1.0, -1.0),
    ];

    let matrix = viewproj * obj.transform;

    let mut min: Vector3<f32> = Vector3::new(1.5, 1.5, 1.5);
    let mut max: Vector3<f32> = Vector3::new(-1.5, -1.5, -1.5);

    for c in corners.iter() {
        let p = obj.bounds.origin
            + Vector3::new(
                c.x * obj.bounds.extents.x,
                c.y * obj.bounds.extents.y,
                c.z * obj.bounds.extents.z,
            );
        let v = matrix * Vector4::new(p.x, p.y, p.z, 1.0);

        // perspective correction
        let x = v.x / v.w;
        let y = v.y / v.w;
        let z = v.z / v.w;

        min.x = min.x.min(x);
        min.y = min.y.min(y);
        min.z = min.z.min(z);
        max.x = max.x.max(x);
        max.y = max.y.max(y);
        max.z = max.z.max(z);
    }

    // check the clip space box against the view volume
    !(min.z > 1.0 || max.z < 0.0 || min.x > 1.0 || max.x < -1.0 || min.y > 1.0 || max.y < -1.0)
}

/// Visible opaque draws in submission order.
///
/// Returns indices into `ctx.opaque`, culled and stable sorted by
/// (pipeline, material, index buffer) so state changes between
/// consecutive draws collapse.
pub fn visible_sorted_opaque(ctx: &DrawContext, viewproj: &Matrix4<f32>) -> Vec<usize> {
    let mut draws: Vec<usize> = (0..ctx.opaque.len())
        .filter(|i| is_visible(&ctx.opaque[*i], viewproj))
        .collect();

    draws.sort_by_key(|i| {
        let obj = &ctx.opaque[*i];
        (
            obj.pipeline.as_raw(),
            obj.material.0,
            obj.index_buffer.as_raw(),
        )
    });

    draws
}
