// Squall unit tests
//
// Everything here runs without a GPU: arena transforms, culling and
// ordering, the layout transition table, allocator arithmetic, the
// swapchain selection policy, and the bit layout contracts the
// shaders depend on.

use crate as sq;

use ash::vk;
use ash::vk::Handle;
use cgmath::{Matrix4, SquareMatrix, Vector3, Vector4};
use memoffset::offset_of;

use sq::deletion::{DeleteRecord, DeletionQueue};
use sq::descriptor::grow_sets_per_pool;
use sq::material::{
    GpuDrawPushConstants, MaterialConstants, MaterialInstance, MaterialPass, MaterialPipeline,
};
use sq::pipeline::ComputePushConstants;
use sq::renderer::{build_projection, CameraInfo, GpuSceneData};
use sq::resource::{mip_level_count, uniform_stride, AllocatedBuffer, GpuMeshBuffers};
use sq::scene::{
    collect_emissive_lights, emit_draw_records, is_visible, refresh_transform_arena,
    visible_sorted_opaque, Bounds, DrawContext, GpuSurface, MaterialId, MeshAsset, MeshId, Node,
    NodeId, NodeKind, NodeTransform, RenderObject, Vertex,
};
use sq::swapchain::{select_extent, select_image_count, select_present_mode, select_surface_format};
use sq::PresentPreference;

// ---------------------------------------------------------------
// helpers for building CPU-side scene pieces with fake handles
// ---------------------------------------------------------------

fn fake_buffer(raw: u64) -> AllocatedBuffer {
    AllocatedBuffer {
        buffer: vk::Buffer::from_raw(raw),
        memory: vk::DeviceMemory::null(),
        size: 0,
        mapping: std::ptr::null_mut(),
        address: None,
    }
}

fn fake_mesh(index_buffer_raw: u64, surfaces: Vec<GpuSurface>) -> MeshAsset {
    MeshAsset {
        name: "test mesh".to_string(),
        surfaces: surfaces,
        buffers: GpuMeshBuffers {
            index_buffer: fake_buffer(index_buffer_raw),
            vertex_buffer: fake_buffer(index_buffer_raw + 1),
            vertex_buffer_address: 0x1000,
        },
    }
}

fn fake_material(pass: MaterialPass, pipeline_raw: u64, emissive: [f32; 3]) -> MaterialInstance {
    let mut constants = MaterialConstants::default();
    constants.emissive_factors = Vector4::new(emissive[0], emissive[1], emissive[2], 0.0);

    MaterialInstance {
        pass: pass,
        pipeline: MaterialPipeline {
            pipeline: vk::Pipeline::from_raw(pipeline_raw),
            layout: vk::PipelineLayout::null(),
        },
        sets: vec![vk::DescriptorSet::null(), vk::DescriptorSet::null()],
        constants: constants,
    }
}

fn unit_bounds() -> Bounds {
    Bounds {
        origin: Vector3::new(0.0, 0.0, 0.0),
        extents: Vector3::new(1.0, 1.0, 1.0),
        sphere_radius: 3.0f32.sqrt(),
    }
}

fn plain_node(local: Matrix4<f32>, kind: NodeKind) -> Node {
    Node {
        name: String::new(),
        local: local,
        world: Matrix4::identity(),
        parent: None,
        children: Vec::new(),
        kind: kind,
    }
}

fn fake_object(pipeline: u64, material: usize, index_buffer: u64) -> RenderObject {
    RenderObject {
        index_count: 3,
        first_index: 0,
        index_buffer: vk::Buffer::from_raw(index_buffer),
        vertex_buffer_address: 0x1000,
        material: MaterialId(material),
        pipeline: vk::Pipeline::from_raw(pipeline),
        material_set: vk::DescriptorSet::null(),
        transform: Matrix4::identity(),
        bounds: unit_bounds(),
    }
}

// ---------------------------------------------------------------
// scene graph
// ---------------------------------------------------------------

#[test]
fn world_transforms_are_ancestor_products() {
    // root -> child -> grandchild, each translated along x
    let mut nodes = vec![
        plain_node(
            Matrix4::from_translation(Vector3::new(1.0, 0.0, 0.0)),
            NodeKind::Empty,
        ),
        plain_node(
            Matrix4::from_translation(Vector3::new(2.0, 0.0, 0.0)),
            NodeKind::Empty,
        ),
        plain_node(
            Matrix4::from_translation(Vector3::new(4.0, 0.0, 0.0)),
            NodeKind::Empty,
        ),
    ];
    nodes[0].children.push(NodeId(1));
    nodes[1].parent = Some(NodeId(0));
    nodes[1].children.push(NodeId(2));
    nodes[2].parent = Some(NodeId(1));

    refresh_transform_arena(&mut nodes, &[NodeId(0)]);

    let expected = [1.0, 3.0, 7.0];
    for (node, x) in nodes.iter().zip(expected.iter()) {
        assert!((node.world.w.x - x).abs() < 1e-6);
        let p = node.world * Vector4::new(0.0, 0.0, 0.0, 1.0);
        assert!((p.x - x).abs() < 1e-6);
    }
}

#[test]
fn refresh_is_idempotent() {
    let mut nodes = vec![plain_node(
        Matrix4::from_translation(Vector3::new(5.0, -1.0, 2.0)),
        NodeKind::Empty,
    )];

    refresh_transform_arena(&mut nodes, &[NodeId(0)]);
    let first = nodes[0].world;
    refresh_transform_arena(&mut nodes, &[NodeId(0)]);

    assert_eq!(first, nodes[0].world);
}

#[test]
fn trs_transform_composes_in_order() {
    // translation applies after scale
    let t = NodeTransform::Trs {
        translation: [1.0, 2.0, 3.0],
        rotation: [0.0, 0.0, 0.0, 1.0],
        scale: [2.0, 2.0, 2.0],
    };
    let m = t.to_matrix();

    let p = m * Vector4::new(1.0, 0.0, 0.0, 1.0);
    assert!((p.x - 3.0).abs() < 1e-6);
    assert!((p.y - 2.0).abs() < 1e-6);
    assert!((p.z - 3.0).abs() < 1e-6);
}

#[test]
fn draw_context_splits_passes() {
    let materials = vec![
        fake_material(MaterialPass::Opaque, 1, [0.0; 3]),
        fake_material(MaterialPass::Transparent, 2, [0.0; 3]),
    ];
    let meshes = vec![
        fake_mesh(
            10,
            vec![GpuSurface {
                start_index: 0,
                count: 3,
                material: MaterialId(0),
                bounds: unit_bounds(),
            }],
        ),
        fake_mesh(
            20,
            vec![GpuSurface {
                start_index: 0,
                count: 3,
                material: MaterialId(1),
                bounds: unit_bounds(),
            }],
        ),
    ];
    let mut nodes = vec![
        plain_node(Matrix4::identity(), NodeKind::Mesh(MeshId(0))),
        plain_node(Matrix4::identity(), NodeKind::Mesh(MeshId(1))),
    ];
    refresh_transform_arena(&mut nodes, &[NodeId(0), NodeId(1)]);

    let mut ctx = DrawContext::new();
    emit_draw_records(&nodes, &meshes, &materials, &mut ctx, 0);

    assert_eq!(ctx.opaque.len(), 1);
    assert_eq!(ctx.transparent.len(), 1);
}

// ---------------------------------------------------------------
// culling and ordering
// ---------------------------------------------------------------

#[test]
fn object_at_origin_is_visible() {
    let obj = fake_object(1, 0, 1);
    assert!(is_visible(&obj, &Matrix4::identity()));
}

#[test]
fn object_far_outside_is_culled() {
    let mut obj = fake_object(1, 0, 1);
    obj.transform = Matrix4::from_translation(Vector3::new(10.0, 0.0, 0.0));
    assert!(!is_visible(&obj, &Matrix4::identity()));

    obj.transform = Matrix4::from_translation(Vector3::new(0.0, -10.0, 0.0));
    assert!(!is_visible(&obj, &Matrix4::identity()));
}

#[test]
fn camera_facing_triangle_survives_culling() {
    // camera at (0,0,3) looking at the origin, 70 degree fov
    let camera = CameraInfo {
        view: Matrix4::look_at(
            cgmath::Point3::new(0.0, 0.0, 3.0),
            cgmath::Point3::new(0.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
        ),
        fov_y: 70.0,
        near: 0.1,
        far: 10000.0,
    };
    let proj = build_projection(&camera, 1.0);
    let viewproj = proj * camera.view;

    let obj = fake_object(1, 0, 1);
    assert!(is_visible(&obj, &viewproj));

    // behind the camera
    let mut behind = fake_object(1, 0, 1);
    behind.transform = Matrix4::from_translation(Vector3::new(0.0, 0.0, 20.0));
    assert!(!is_visible(&behind, &viewproj));
}

#[test]
fn opaque_sort_groups_state() {
    let mut ctx = DrawContext::new();
    ctx.opaque.push(fake_object(2, 5, 30));
    ctx.opaque.push(fake_object(1, 3, 20));
    ctx.opaque.push(fake_object(2, 4, 10));
    ctx.opaque.push(fake_object(1, 3, 10));

    let order = visible_sorted_opaque(&ctx, &Matrix4::identity());
    assert_eq!(order.len(), 4);

    let keys: Vec<(u64, usize, u64)> = order
        .iter()
        .map(|i| {
            let o = &ctx.opaque[*i];
            (o.pipeline.as_raw(), o.material.0, o.index_buffer.as_raw())
        })
        .collect();

    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
}

#[test]
fn opaque_sort_is_stable() {
    let mut ctx = DrawContext::new();
    // identical keys; transforms distinguish the records
    for i in 0..3 {
        let mut obj = fake_object(1, 1, 1);
        obj.transform = Matrix4::from_translation(Vector3::new(0.0, 0.0, i as f32 * 0.1));
        ctx.opaque.push(obj);
    }

    let order = visible_sorted_opaque(&ctx, &Matrix4::identity());
    assert_eq!(order, vec![0, 1, 2]);
}

#[test]
fn sorted_draws_bind_each_state_once() {
    // two meshes sharing one material must produce exactly one
    // pipeline bind and one material-set bind
    let mut ctx = DrawContext::new();
    ctx.opaque.push(fake_object(7, 2, 40));
    ctx.opaque.push(fake_object(7, 2, 41));

    let order = visible_sorted_opaque(&ctx, &Matrix4::identity());

    let mut pipeline_binds = 0;
    let mut material_binds = 0;
    let mut index_binds = 0;
    let mut last_pipeline = vk::Pipeline::null();
    let mut last_material: Option<MaterialId> = None;
    let mut last_index = vk::Buffer::null();

    for i in order.iter() {
        let obj = &ctx.opaque[*i];
        if obj.pipeline != last_pipeline {
            last_pipeline = obj.pipeline;
            pipeline_binds += 1;
        }
        if last_material != Some(obj.material) {
            last_material = Some(obj.material);
            material_binds += 1;
        }
        if obj.index_buffer != last_index {
            last_index = obj.index_buffer;
            index_binds += 1;
        }
    }

    assert_eq!(pipeline_binds, 1);
    assert_eq!(material_binds, 1);
    assert_eq!(index_binds, 2);
}

// ---------------------------------------------------------------
// emissive light export
// ---------------------------------------------------------------

#[test]
fn emissive_surface_exports_one_light() {
    let materials = vec![
        fake_material(MaterialPass::Opaque, 1, [0.0; 3]),
        fake_material(MaterialPass::Transparent, 2, [3.0, 2.0, 1.0]),
    ];
    let meshes = vec![fake_mesh(
        10,
        vec![
            GpuSurface {
                start_index: 0,
                count: 3,
                material: MaterialId(0),
                bounds: unit_bounds(),
            },
            GpuSurface {
                start_index: 3,
                count: 3,
                material: MaterialId(1),
                bounds: unit_bounds(),
            },
        ],
    )];
    let mut nodes = vec![plain_node(
        Matrix4::from_translation(Vector3::new(1.0, 2.0, 3.0)),
        NodeKind::Mesh(MeshId(0)),
    )];
    refresh_transform_arena(&mut nodes, &[NodeId(0)]);

    let lights = collect_emissive_lights(&nodes, &meshes, &materials, 0.5);
    assert_eq!(lights.len(), 1);
    assert!((lights[0].position.x - 1.0).abs() < 1e-6);
    assert!((lights[0].position.y - 2.0).abs() < 1e-6);
    assert!((lights[0].position.z - 3.0).abs() < 1e-6);
    assert_eq!(lights[0].color.w, 0.5);
}

#[test]
fn all_opaque_scene_exports_no_lights() {
    let materials = vec![fake_material(MaterialPass::Opaque, 1, [0.0; 3])];
    let meshes = vec![fake_mesh(
        10,
        vec![GpuSurface {
            start_index: 0,
            count: 3,
            material: MaterialId(0),
            bounds: unit_bounds(),
        }],
    )];
    let mut nodes = vec![plain_node(Matrix4::identity(), NodeKind::Mesh(MeshId(0)))];
    refresh_transform_arena(&mut nodes, &[NodeId(0)]);

    assert!(collect_emissive_lights(&nodes, &meshes, &materials, 1.0).is_empty());
}

// ---------------------------------------------------------------
// projection
// ---------------------------------------------------------------

#[test]
fn projection_is_reverse_z() {
    let camera = CameraInfo {
        view: Matrix4::identity(),
        fov_y: 70.0,
        near: 0.1,
        far: 100.0,
    };
    let proj = build_projection(&camera, 16.0 / 9.0);

    // the near plane lands at depth 1, the far plane at depth 0
    let near_clip = proj * Vector4::new(0.0, 0.0, -0.1, 1.0);
    let far_clip = proj * Vector4::new(0.0, 0.0, -100.0, 1.0);

    assert!((near_clip.z / near_clip.w - 1.0).abs() < 1e-3);
    assert!((far_clip.z / far_clip.w).abs() < 1e-3);
}

#[test]
fn projection_flips_y() {
    let camera = CameraInfo {
        view: Matrix4::identity(),
        fov_y: 70.0,
        near: 0.1,
        far: 100.0,
    };
    let proj = build_projection(&camera, 1.0);

    // a point above the axis in view space ends below it in clip
    // space, matching gltf conventions
    let up = proj * Vector4::new(0.0, 1.0, -1.0, 1.0);
    assert!(up.y / up.w < 0.0);
}

// ---------------------------------------------------------------
// vertex hashing
// ---------------------------------------------------------------

#[test]
fn vertex_equality_is_bit_pattern() {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let a = Vertex {
        position: [1.0, 2.0, 3.0],
        ..Default::default()
    };
    let b = a;
    assert_eq!(a, b);

    let hash = |v: &Vertex| {
        let mut h = DefaultHasher::new();
        v.hash(&mut h);
        h.finish()
    };
    assert_eq!(hash(&a), hash(&b));

    // negative zero is a different bit pattern on purpose
    let mut neg = a;
    neg.position[0] = -0.0;
    let mut pos = a;
    pos.position[0] = 0.0;
    assert_ne!(neg, pos);

    // NaN equals itself by bits, so dedup maps stay consistent
    let mut nan1 = a;
    nan1.uv_x = f32::NAN;
    let nan2 = nan1;
    assert_eq!(nan1, nan2);
    assert_eq!(hash(&nan1), hash(&nan2));
}

#[test]
fn vertex_dedup_through_hashmap() {
    use std::collections::HashMap;

    let verts = [
        Vertex {
            position: [0.0, 0.0, 0.0],
            ..Default::default()
        },
        Vertex {
            position: [1.0, 0.0, 0.0],
            ..Default::default()
        },
        Vertex {
            position: [0.0, 0.0, 0.0],
            ..Default::default()
        },
    ];

    let mut seen: HashMap<Vertex, u32> = HashMap::new();
    let mut unique = 0;
    for v in verts.iter() {
        seen.entry(*v).or_insert_with(|| {
            unique += 1;
            unique
        });
    }

    assert_eq!(seen.len(), 2);
}

// ---------------------------------------------------------------
// bit layout contracts
// ---------------------------------------------------------------

#[test]
fn vertex_layout_matches_shader() {
    assert_eq!(std::mem::size_of::<Vertex>(), 48);
    assert_eq!(offset_of!(Vertex, position), 0);
    assert_eq!(offset_of!(Vertex, uv_x), 12);
    assert_eq!(offset_of!(Vertex, normal), 16);
    assert_eq!(offset_of!(Vertex, uv_y), 28);
    assert_eq!(offset_of!(Vertex, color), 32);
}

#[test]
fn scene_uniform_layout_is_std140() {
    assert_eq!(std::mem::size_of::<GpuSceneData>(), 240);
    assert_eq!(offset_of!(GpuSceneData, view), 0);
    assert_eq!(offset_of!(GpuSceneData, proj), 64);
    assert_eq!(offset_of!(GpuSceneData, viewproj), 128);
    assert_eq!(offset_of!(GpuSceneData, ambient_color), 192);
    assert_eq!(offset_of!(GpuSceneData, sunlight_direction), 208);
    assert_eq!(offset_of!(GpuSceneData, sunlight_color), 224);
}

#[test]
fn draw_push_constants_layout() {
    assert_eq!(offset_of!(GpuDrawPushConstants, world_matrix), 0);
    assert_eq!(offset_of!(GpuDrawPushConstants, vertex_buffer), 64);
    assert_eq!(std::mem::size_of::<GpuDrawPushConstants>(), 72);
}

#[test]
fn compute_push_constants_are_four_vec4() {
    assert_eq!(std::mem::size_of::<ComputePushConstants>(), 64);
}

#[test]
fn material_constants_fill_a_256_byte_range() {
    assert_eq!(std::mem::size_of::<MaterialConstants>(), 256);
    assert_eq!(offset_of!(MaterialConstants, color_factors), 0);
    assert_eq!(offset_of!(MaterialConstants, metal_rough_factors), 16);
    assert_eq!(offset_of!(MaterialConstants, emissive_factors), 32);
}

// ---------------------------------------------------------------
// layout transitions
// ---------------------------------------------------------------

#[test]
fn transition_table_covers_the_frame_sequence() {
    use vk::ImageLayout as L;

    let required = [
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL),
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL),
        (L::UNDEFINED, L::GENERAL),
        (L::GENERAL, L::COLOR_ATTACHMENT_OPTIMAL),
        (L::UNDEFINED, L::DEPTH_ATTACHMENT_OPTIMAL),
        (L::COLOR_ATTACHMENT_OPTIMAL, L::TRANSFER_SRC_OPTIMAL),
        (L::TRANSFER_DST_OPTIMAL, L::COLOR_ATTACHMENT_OPTIMAL),
        (L::COLOR_ATTACHMENT_OPTIMAL, L::PRESENT_SRC_KHR),
        (L::TRANSFER_DST_OPTIMAL, L::TRANSFER_SRC_OPTIMAL),
        (L::TRANSFER_SRC_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL),
    ];

    for (old, new) in required.iter() {
        assert!(
            sq::barrier::transition_masks(*old, *new).is_ok(),
            "missing transition {:?} -> {:?}",
            old,
            new
        );
    }
}

#[test]
fn undefined_transitions_have_no_source_access() {
    use vk::ImageLayout as L;

    let masks = sq::barrier::transition_masks(L::UNDEFINED, L::TRANSFER_DST_OPTIMAL).unwrap();
    assert_eq!(masks.src_stage, vk::PipelineStageFlags2::TOP_OF_PIPE);
    assert_eq!(masks.src_access, vk::AccessFlags2::empty());
    assert_eq!(masks.dst_stage, vk::PipelineStageFlags2::TRANSFER);
    assert_eq!(masks.dst_access, vk::AccessFlags2::TRANSFER_WRITE);
}

#[test]
fn unknown_transition_is_rejected() {
    use vk::ImageLayout as L;

    assert_eq!(
        sq::barrier::transition_masks(L::PRESENT_SRC_KHR, L::GENERAL).err(),
        Some(sq::SquallError::INVALID_TRANSITION)
    );
}

// ---------------------------------------------------------------
// descriptors, deletion, misc policy
// ---------------------------------------------------------------

#[test]
fn pool_growth_is_half_again_clamped() {
    assert_eq!(grow_sets_per_pool(1000), 1500);
    assert_eq!(grow_sets_per_pool(4), 6);

    let mut size = 10;
    for _ in 0..32 {
        size = grow_sets_per_pool(size);
    }
    assert_eq!(size, 4092);
}

#[test]
fn deletion_queue_flushes_lifo() {
    let mut queue = DeletionQueue::new();
    queue.push(DeleteRecord::Sampler(vk::Sampler::from_raw(1)));
    queue.push(DeleteRecord::Pipeline(vk::Pipeline::from_raw(2)));
    queue.push(DeleteRecord::ImageView(vk::ImageView::from_raw(3)));

    let drained = queue.drain_lifo();
    assert_eq!(
        drained,
        vec![
            DeleteRecord::ImageView(vk::ImageView::from_raw(3)),
            DeleteRecord::Pipeline(vk::Pipeline::from_raw(2)),
            DeleteRecord::Sampler(vk::Sampler::from_raw(1)),
        ]
    );
    assert!(queue.is_empty());
}

#[test]
fn slot_states_cycle() {
    use sq::frame::SlotState;

    assert_eq!(SlotState::Idle.next(), SlotState::Recording);
    assert_eq!(SlotState::Recording.next(), SlotState::Submitted);
    assert_eq!(SlotState::Submitted.next(), SlotState::Idle);
}

#[test]
fn mip_count_is_full_chain() {
    assert_eq!(mip_level_count(1, 1), 1);
    assert_eq!(mip_level_count(16, 16), 5);
    assert_eq!(mip_level_count(2048, 1024), 12);
    assert_eq!(mip_level_count(3, 2), 2);
}

#[test]
fn uniform_stride_respects_alignment() {
    // the 256 byte material block already satisfies every alignment
    // vulkan allows (powers of two up to 256)
    let block = std::mem::size_of::<MaterialConstants>() as u64;
    for align in [16u64, 64, 256] {
        assert_eq!(uniform_stride(block, align), block);
    }

    // smaller blocks round up
    assert_eq!(uniform_stride(48, 64), 64);
    assert_eq!(uniform_stride(64, 64), 64);
    assert_eq!(uniform_stride(65, 64), 128);
    assert_eq!(uniform_stride(1, 256), 256);
    // a zero alignment report falls back to tight packing
    assert_eq!(uniform_stride(48, 0), 48);
}

// ---------------------------------------------------------------
// swapchain policy
// ---------------------------------------------------------------

fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
    vk::SurfaceCapabilitiesKHR {
        min_image_count: min,
        max_image_count: max,
        current_extent: vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        },
        min_image_extent: vk::Extent2D {
            width: 1,
            height: 1,
        },
        max_image_extent: vk::Extent2D {
            width: 4096,
            height: 4096,
        },
        ..Default::default()
    }
}

#[test]
fn surface_format_prefers_srgb_bgra() {
    let formats = [
        vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        },
        vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        },
    ];

    let chosen = select_surface_format(&formats).unwrap();
    assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);

    // fall back to whatever the surface lists first
    let only = [formats[0]];
    assert_eq!(
        select_surface_format(&only).unwrap().format,
        vk::Format::R8G8B8A8_UNORM
    );

    assert!(select_surface_format(&[]).is_err());
}

#[test]
fn present_mode_honors_preference() {
    let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];

    assert_eq!(
        select_present_mode(&modes, PresentPreference::Mailbox),
        vk::PresentModeKHR::MAILBOX
    );
    assert_eq!(
        select_present_mode(&modes, PresentPreference::Fifo),
        vk::PresentModeKHR::FIFO
    );
    // no mailbox on offer
    assert_eq!(
        select_present_mode(&[vk::PresentModeKHR::FIFO], PresentPreference::Mailbox),
        vk::PresentModeKHR::FIFO
    );
}

#[test]
fn image_count_is_triple_buffered_within_limits() {
    // plenty of room: triple buffer
    assert_eq!(select_image_count(&caps(2, 0)), 3);
    // surface demands more than three
    assert_eq!(select_image_count(&caps(4, 8)), 4);
    // capped by the surface maximum
    assert_eq!(select_image_count(&caps(1, 2)), 2);
    // min+1 <= count <= max always holds when a max exists
    for min in 1..4 {
        for max in min..6 {
            let n = select_image_count(&caps(min, max));
            assert!(n >= min && n <= max);
        }
    }
}

#[test]
fn extent_follows_surface_or_window() {
    // the sentinel defers to the window size, clamped
    let c = caps(2, 0);
    assert_eq!(
        select_extent(&c, (800, 600)),
        vk::Extent2D {
            width: 800,
            height: 600
        }
    );
    assert_eq!(
        select_extent(&c, (100000, 5)),
        vk::Extent2D {
            width: 4096,
            height: 5
        }
    );

    // a concrete surface extent wins over the window
    let mut fixed = caps(2, 0);
    fixed.current_extent = vk::Extent2D {
        width: 1280,
        height: 720,
    };
    assert_eq!(
        select_extent(&fixed, (800, 600)),
        vk::Extent2D {
            width: 1280,
            height: 720
        }
    );
}

// ---------------------------------------------------------------
// bounds
// ---------------------------------------------------------------

#[test]
fn surface_bounds_cover_indexed_vertices() {
    let verts = [
        Vertex {
            position: [-1.0, -1.0, 0.0],
            ..Default::default()
        },
        Vertex {
            position: [1.0, -1.0, 0.0],
            ..Default::default()
        },
        Vertex {
            position: [0.0, 1.0, 0.0],
            ..Default::default()
        },
        // not referenced by the surface, must not affect bounds
        Vertex {
            position: [100.0, 100.0, 100.0],
            ..Default::default()
        },
    ];

    let bounds = Bounds::from_surface(&verts, &[0, 1, 2]);
    assert!((bounds.origin.x - 0.0).abs() < 1e-6);
    assert!((bounds.origin.y - 0.0).abs() < 1e-6);
    assert!((bounds.extents.x - 1.0).abs() < 1e-6);
    assert!((bounds.extents.y - 1.0).abs() < 1e-6);
    assert!((bounds.extents.z - 0.0).abs() < 1e-6);
}
