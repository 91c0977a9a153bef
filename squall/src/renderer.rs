// The frame driver
//
// This is the top level state machine: acquire, record the compute
// background, run the geometry pass, blit to the swapchain, let the
// overlay draw, present. It owns every subsystem below it and is the
// only thing that mutates GPU state.
#![allow(dead_code)]

use ash::vk;
use cgmath::{Angle, Deg, Matrix4, SquareMatrix, Vector4};

use crate::descriptor::{DescAllocator, DescLayoutBuilder, DescLayoutCache, DescWriter, PoolSizeRatio};
use crate::device::Device;
use crate::frame::FrameRing;
use crate::instance::Instance;
use crate::material::{
    GpuDrawPushConstants, MaterialConstants, MaterialRegistry, MaterialResources,
};
use crate::pipeline::{
    create_background_effects, select_depth_format, ComputeEffect, PipelineCache,
};
use crate::resource::{self, AllocatedImage, Allocator};
use crate::scene::{
    visible_sorted_opaque, Bounds, DrawContext, GpuSurface, MaterialId, MeshAsset, MeshId, Node,
    NodeId, NodeKind, RenderObject, Scene, SceneData, SceneFlags,
};
use crate::swapchain::Swapchain;
use crate::window::{Overlay, WindowSystem};
use crate::{barrier, CreateInfo, Result, SquallError};

use ash::extensions::khr;
use std::sync::Arc;

/// The HDR offscreen target everything renders into before the blit.
const DRAW_IMAGE_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;

/// The scene wide uniform block, std140 compatible.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct GpuSceneData {
    pub view: Matrix4<f32>,
    pub proj: Matrix4<f32>,
    pub viewproj: Matrix4<f32>,
    pub ambient_color: Vector4<f32>,
    pub sunlight_direction: Vector4<f32>,
    pub sunlight_color: Vector4<f32>,
}

impl Default for GpuSceneData {
    fn default() -> Self {
        Self {
            view: Matrix4::identity(),
            proj: Matrix4::identity(),
            viewproj: Matrix4::identity(),
            ambient_color: Vector4::new(1.0, 1.0, 1.0, 0.1),
            sunlight_direction: Vector4::new(0.0, 1.0, 0.0, 1.0),
            sunlight_color: Vector4::new(1.0, 1.0, 1.0, 1.0),
        }
    }
}

/// What the camera collaborator feeds in each frame. The projection
/// is derived here so reverse-Z stays an internal detail.
#[derive(Copy, Clone)]
pub struct CameraInfo {
    pub view: Matrix4<f32>,
    /// Vertical field of view in degrees.
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

/// Per frame counters.
#[derive(Copy, Clone, Debug, Default)]
pub struct EngineStats {
    pub frame_number: u64,
    pub drawcall_count: u32,
    pub triangle_count: u32,
}

/// Right handed perspective with depth mapped into [0, 1].
///
/// Column major, y up, looking down -z. Callers get reverse-Z by
/// swapping the near/far arguments, which maps the near plane to
/// depth 1 and the far plane to depth 0.
pub fn perspective_zo(fov_y: Deg<f32>, aspect: f32, near: f32, far: f32) -> Matrix4<f32> {
    let f = 1.0 / (fov_y / 2.0).tan();

    Matrix4::new(
        f / aspect, 0.0, 0.0, 0.0, //
        0.0, f, 0.0, 0.0, //
        0.0, 0.0, far / (near - far), -1.0, //
        0.0, 0.0, -(far * near) / (far - near), 0.0, //
    )
}

/// Build the projection the mesh pass uses: reverse-Z with the Y
/// axis flipped to match the gltf/vulkan handedness mismatch.
pub fn build_projection(camera: &CameraInfo, aspect: f32) -> Matrix4<f32> {
    // near/far swapped on purpose, see perspective_zo
    let mut proj = perspective_zo(Deg(camera.fov_y), aspect, camera.far, camera.near);
    proj.y.y *= -1.0;
    proj
}

pub struct Renderer {
    r_inst: Arc<Instance>,
    r_dev: Arc<Device>,
    r_alloc: Allocator,
    r_swapchain: Swapchain,
    r_frames: FrameRing,

    /// offscreen HDR color target
    r_draw_image: AllocatedImage,
    /// reverse-Z depth target, sized with the draw image
    r_depth_image: AllocatedImage,
    r_draw_extent: vk::Extent2D,

    r_layout_cache: DescLayoutCache,
    r_pipeline_cache: PipelineCache,

    /// set 0 of the mesh pass: the scene uniform
    r_scene_layout: vk::DescriptorSetLayout,

    /// the compute background's view of the draw image
    r_draw_image_layout: vk::DescriptorSetLayout,
    r_draw_image_desc: vk::DescriptorSet,
    r_global_descs: DescAllocator,

    r_compute_layout: vk::PipelineLayout,
    r_effects: Vec<ComputeEffect>,
    r_current_effect: usize,

    r_materials: MaterialRegistry,

    r_scene_data: GpuSceneData,
    r_draw_ctx: DrawContext,

    /// sticky resize signal from the window system
    r_resize_requested: bool,
    /// last reported framebuffer size; zero parks the driver
    r_fb_size: (u32, u32),

    r_stats: EngineStats,
}

impl Renderer {
    pub fn new(info: &CreateInfo, win: &dyn WindowSystem) -> Result<Self> {
        // the core requires both 1.3 features; the knobs exist so a
        // caller can be explicit, not so they can be turned off
        if !info.enable_synchronization2 || !info.enable_dynamic_rendering {
            log::error!("synchronization2 and dynamic rendering are required by this renderer");
            return Err(SquallError::INVALID);
        }
        let frames = info.max_frames_in_flight.max(1);

        let instance = Arc::new(Instance::new(info, win)?);

        let surface_loader = khr::Surface::new(&instance.loader, &instance.inst);
        let surface = win.create_surface(&instance.loader, &instance.inst)?;

        let dev = Arc::new(Device::new(
            instance.clone(),
            &surface_loader,
            surface,
            info,
        )?);
        let alloc = Allocator::new(dev.clone())?;

        let fb_size = win.framebuffer_size();
        let swapchain = Swapchain::new(dev.clone(), surface_loader, surface, info, fb_size)?;

        let extent = swapchain.extent();
        let (draw_image, depth_image) = Self::create_draw_images(&dev, &alloc, extent)?;

        let mut layout_cache = DescLayoutCache::new();
        let mut pipeline_cache = PipelineCache::new();

        let scene_layout = DescLayoutBuilder::new()
            .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER)
            .build(
                &dev.dev,
                &mut layout_cache,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            )?;

        let draw_image_layout = DescLayoutBuilder::new()
            .add_binding(0, vk::DescriptorType::STORAGE_IMAGE)
            .build(&dev.dev, &mut layout_cache, vk::ShaderStageFlags::COMPUTE)?;

        let mut global_descs = DescAllocator::new(
            &dev.dev,
            10,
            &[PoolSizeRatio {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                ratio: 1.0,
            }],
        )?;
        let draw_image_desc = global_descs.allocate(&dev.dev, draw_image_layout)?;
        Self::write_draw_image_desc(&dev, draw_image_desc, draw_image.view);

        let (compute_layout, effects) = create_background_effects(&dev, draw_image_layout)?;

        let materials = MaterialRegistry::new(
            &dev,
            &alloc,
            &mut layout_cache,
            &mut pipeline_cache,
            scene_layout,
            DRAW_IMAGE_FORMAT,
            depth_image.format,
            frames,
        )?;

        let frame_ring = FrameRing::new(
            &dev,
            &alloc,
            frames,
            std::mem::size_of::<GpuSceneData>() as u64,
        )?;

        Ok(Self {
            r_inst: instance,
            r_dev: dev,
            r_alloc: alloc,
            r_swapchain: swapchain,
            r_frames: frame_ring,
            r_draw_image: draw_image,
            r_depth_image: depth_image,
            r_draw_extent: extent,
            r_layout_cache: layout_cache,
            r_pipeline_cache: pipeline_cache,
            r_scene_layout: scene_layout,
            r_draw_image_layout: draw_image_layout,
            r_draw_image_desc: draw_image_desc,
            r_global_descs: global_descs,
            r_compute_layout: compute_layout,
            r_effects: effects,
            r_current_effect: 0,
            r_materials: materials,
            r_scene_data: GpuSceneData::default(),
            r_draw_ctx: DrawContext::new(),
            r_resize_requested: false,
            r_fb_size: fb_size,
            r_stats: EngineStats::default(),
        })
    }

    /// Create the offscreen color and depth targets at `extent`.
    fn create_draw_images(
        dev: &Arc<Device>,
        alloc: &Allocator,
        extent: vk::Extent2D,
    ) -> Result<(AllocatedImage, AllocatedImage)> {
        let draw_usage = vk::ImageUsageFlags::TRANSFER_SRC
            | vk::ImageUsageFlags::TRANSFER_DST
            | vk::ImageUsageFlags::STORAGE
            | vk::ImageUsageFlags::COLOR_ATTACHMENT;
        let draw_image = alloc.create_image(extent, DRAW_IMAGE_FORMAT, draw_usage, false)?;

        let depth_format = select_depth_format(dev)?;
        let depth_image = alloc.create_image(
            extent,
            depth_format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            false,
        )?;

        Ok((draw_image, depth_image))
    }

    fn write_draw_image_desc(dev: &Device, set: vk::DescriptorSet, view: vk::ImageView) {
        let mut writer = DescWriter::new();
        writer.write_image(
            0,
            view,
            vk::Sampler::null(),
            vk::ImageLayout::GENERAL,
            vk::DescriptorType::STORAGE_IMAGE,
        );
        writer.update_set(&dev.dev, set);
    }

    pub fn request_resize(&mut self, size: (u32, u32)) {
        self.r_fb_size = size;
        self.r_resize_requested = true;
    }

    pub fn set_background_effect(&mut self, index: usize) {
        if index < self.r_effects.len() {
            self.r_current_effect = index;
        }
    }

    pub fn background_effect_count(&self) -> usize {
        self.r_effects.len()
    }

    pub fn stats(&self) -> EngineStats {
        self.r_stats
    }

    // -----------------------------------------------------------
    // Scene loading
    // -----------------------------------------------------------

    /// Turn loader output into a live Scene.
    ///
    /// Uploads textures and meshes through the staging path, writes
    /// material sets, and builds the node arena. Texture payloads
    /// that fail to validate fall back to the checkerboard and log;
    /// structural problems in the data are an error.
    pub fn load_scene(&mut self, data: &SceneData) -> Result<Scene> {
        let dev = self.r_dev.clone();
        let frames = self.r_frames.slot_count();

        // scene owned descriptor pool, sized by material count
        let ratios = [
            PoolSizeRatio {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                ratio: 3.0,
            },
            PoolSizeRatio {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                ratio: 3.0,
            },
            PoolSizeRatio {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                ratio: 1.0,
            },
        ];
        let max_sets = ((data.materials.len() + 1) * frames).max(4) as u32;
        let mut desc_alloc = DescAllocator::new(&dev.dev, max_sets, &ratios)?;

        // textures: a failed payload becomes the checkerboard
        let mut images: Vec<AllocatedImage> = Vec::new();
        let mut texture_views: Vec<vk::ImageView> = Vec::new();
        for (i, tex) in data.textures.iter().enumerate() {
            let extent = vk::Extent2D {
                width: tex.width,
                height: tex.height,
            };
            match self.r_alloc.upload_texture(
                &tex.pixels,
                extent,
                vk::Format::R8G8B8A8_UNORM,
                tex.mipmapped,
            ) {
                Ok(img) => {
                    texture_views.push(img.view);
                    images.push(img);
                }
                Err(e) => {
                    log::error!("failed to load texture {}: {}, using checkerboard", i, e);
                    texture_views.push(self.r_materials.m_checkerboard.view);
                }
            }
        }

        let mut samplers = Vec::new();
        for desc in data.samplers.iter() {
            samplers.push(MaterialRegistry::create_sampler_from_desc(&dev, desc)?);
        }

        // one uniform range per material; the stride rounds the
        // block up to the device's offset alignment
        let stride = resource::uniform_stride(
            std::mem::size_of::<MaterialConstants>() as u64,
            dev.min_ubo_alignment(),
        );
        let material_count = data.materials.len();
        let material_buffer = self
            .r_alloc
            .create_host_buffer(
                crate::resource::HostBufferUse::Uniform,
                stride * (material_count.max(1)) as u64,
            )?;

        let mut materials = Vec::with_capacity(material_count + 1);
        for (i, mat) in data.materials.iter().enumerate() {
            let mut constants = MaterialConstants::default();
            constants.color_factors = Vector4::new(
                mat.color_factors[0],
                mat.color_factors[1],
                mat.color_factors[2],
                mat.color_factors[3],
            );
            constants.metal_rough_factors =
                Vector4::new(mat.metallic_factor, mat.roughness_factor, 0.0, 0.0);
            constants.emissive_factors = Vector4::new(
                mat.emissive_factor[0],
                mat.emissive_factor[1],
                mat.emissive_factor[2],
                0.0,
            );
            self.r_alloc
                .write_to_buffer(&material_buffer, (i as u64 * stride) as usize, &[constants])?;

            let resolve_view = |tex: Option<usize>| -> Result<vk::ImageView> {
                match tex {
                    Some(t) => texture_views
                        .get(t)
                        .copied()
                        .ok_or(SquallError::INVALID_SCENE_DATA),
                    None => Ok(self.r_materials.m_white.view),
                }
            };
            let resolve_sampler = |s: Option<usize>| -> Result<vk::Sampler> {
                match s {
                    Some(s) => samplers
                        .get(s)
                        .copied()
                        .ok_or(SquallError::INVALID_SCENE_DATA),
                    None => Ok(self.r_materials.m_sampler_linear),
                }
            };

            let resources = MaterialResources {
                color_view: resolve_view(mat.color_texture)?,
                color_sampler: resolve_sampler(mat.color_sampler)?,
                metal_rough_view: resolve_view(mat.metal_rough_texture)?,
                metal_rough_sampler: resolve_sampler(mat.metal_rough_sampler)?,
                data_buffer: material_buffer.buffer,
                data_offset: i as u64 * stride,
            };

            materials.push(self.r_materials.write_material(
                &dev,
                mat.pass,
                constants,
                &resources,
                &mut desc_alloc,
                frames,
            )?);
        }

        // the default material always sits at the end so surfaces
        // without one have something to point at
        let default_id = MaterialId(materials.len());
        materials.push(self.r_materials.m_default.clone());

        // meshes
        let mut meshes = Vec::with_capacity(data.meshes.len());
        for mesh in data.meshes.iter() {
            // every surface indexes one contiguous vertex array
            if mesh
                .indices
                .iter()
                .any(|i| *i as usize >= mesh.vertices.len())
            {
                return Err(SquallError::INVALID_SCENE_DATA);
            }

            let mut surfaces = Vec::with_capacity(mesh.surfaces.len());
            for surf in mesh.surfaces.iter() {
                let start = surf.start_index as usize;
                let end = start + surf.count as usize;
                if end > mesh.indices.len() {
                    return Err(SquallError::INVALID_SCENE_DATA);
                }

                let material = match surf.material {
                    Some(m) if m < material_count => MaterialId(m),
                    Some(_) => return Err(SquallError::INVALID_SCENE_DATA),
                    None => default_id,
                };

                surfaces.push(GpuSurface {
                    start_index: surf.start_index,
                    count: surf.count,
                    material: material,
                    bounds: Bounds::from_surface(&mesh.vertices, &mesh.indices[start..end]),
                });
            }

            let buffers = self.r_alloc.upload_mesh(&mesh.vertices, &mesh.indices)?;

            meshes.push(MeshAsset {
                name: mesh.name.clone(),
                surfaces: surfaces,
                buffers: buffers,
            });
        }

        // nodes: one pass to build the arena, one to wire parents
        let mut nodes = Vec::with_capacity(data.nodes.len());
        for node in data.nodes.iter() {
            let kind = match node.mesh {
                Some(m) if m < meshes.len() => NodeKind::Mesh(MeshId(m)),
                Some(_) => return Err(SquallError::INVALID_SCENE_DATA),
                None => NodeKind::Empty,
            };

            nodes.push(Node {
                name: node.name.clone(),
                local: node.transform.to_matrix(),
                world: Matrix4::identity(),
                parent: None,
                children: Vec::new(),
                kind: kind,
            });
        }

        for (i, node) in data.nodes.iter().enumerate() {
            for child in node.children.iter() {
                if *child >= nodes.len() || *child == i {
                    return Err(SquallError::INVALID_SCENE_DATA);
                }
                if nodes[*child].parent.is_some() {
                    // a node with two parents is not a tree
                    return Err(SquallError::INVALID_SCENE_DATA);
                }
                nodes[*child].parent = Some(NodeId(i));
                nodes[i].children.push(NodeId(*child));
            }
        }

        let top_nodes: Vec<NodeId> = nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.parent.is_none())
            .map(|(i, _)| NodeId(i))
            .collect();

        let mut scene = Scene {
            sc_dev: dev,
            sc_nodes: nodes,
            sc_top_nodes: top_nodes,
            sc_meshes: meshes,
            sc_materials: materials,
            sc_images: images,
            sc_samplers: samplers,
            sc_material_buffer: Some(material_buffer),
            sc_desc_alloc: desc_alloc,
            sc_flags: SceneFlags::TRANSFORMS_DIRTY,
        };
        scene.refresh_transforms();

        Ok(scene)
    }

    // -----------------------------------------------------------
    // Frame loop
    // -----------------------------------------------------------

    /// Rebuild the draw lists and scene data for this frame.
    ///
    /// The uniform bytes are written later, once the slot fence has
    /// signaled, so an in-flight frame never sees a partial update.
    fn update_scene(&mut self, scene: &mut Scene, camera: &CameraInfo) {
        if scene.transforms_dirty() {
            scene.refresh_transforms();
        }

        let frame_number = self.r_frames.frame_number();
        let slot_index = (frame_number % self.r_frames.slot_count() as u64) as usize;
        self.r_draw_ctx.clear(frame_number);
        scene.emit_draws(&mut self.r_draw_ctx, slot_index);

        let aspect = self.r_draw_extent.width as f32 / self.r_draw_extent.height.max(1) as f32;
        let proj = build_projection(camera, aspect);

        self.r_scene_data.view = camera.view;
        self.r_scene_data.proj = proj;
        self.r_scene_data.viewproj = proj * camera.view;
    }

    /// Recreate the swapchain and the draw targets after a resize.
    fn handle_resize(&mut self) -> Result<()> {
        self.r_swapchain.recreate(self.r_fb_size)?;

        let dev = self.r_dev.clone();
        let extent = self.r_swapchain.extent();

        // everything in flight drained inside recreate, so the old
        // targets can die immediately
        let (new_draw, new_depth) = Self::create_draw_images(&dev, &self.r_alloc, extent)?;
        let old_draw = std::mem::replace(&mut self.r_draw_image, new_draw);
        let old_depth = std::mem::replace(&mut self.r_depth_image, new_depth);
        self.r_alloc.destroy_image(old_draw);
        self.r_alloc.destroy_image(old_depth);

        Self::write_draw_image_desc(&dev, self.r_draw_image_desc, self.r_draw_image.view);

        self.r_resize_requested = false;
        log::debug!("resized to {}x{}", extent.width, extent.height);

        Ok(())
    }

    /// Draw and present one frame, per the state machine.
    pub fn draw_frame(
        &mut self,
        scene: &mut Scene,
        camera: &CameraInfo,
        overlay: Option<&mut dyn Overlay>,
    ) -> Result<()> {
        // a zero framebuffer means the window is minimized; park
        // with no submits until it comes back
        if self.r_fb_size.0 == 0 || self.r_fb_size.1 == 0 {
            return Ok(());
        }

        if self.r_resize_requested {
            self.handle_resize()?;
        }

        self.update_scene(scene, camera);

        let dev = self.r_dev.clone();

        // claim the slot: fence wait, deletion flush, descriptor
        // reset. Fatal if the fence never signals.
        self.r_frames.begin_slot(&dev)?;

        let (cbuf, image_available, render_finished, fence) = {
            let slot = self.r_frames.current();
            (
                slot.cbuf,
                slot.image_available,
                slot.render_finished,
                slot.fence,
            )
        };

        // now that the fence signaled the previous reader of this
        // slot's uniform buffer is done with it
        {
            let scene_data = self.r_scene_data;
            let slot = self.r_frames.current();
            self.r_alloc
                .write_to_buffer(&slot.scene_ubo, 0, &[scene_data])?;
        }

        let (image_index, suboptimal) = match self.r_swapchain.acquire(image_available) {
            Ok(pair) => pair,
            Err(SquallError::OUT_OF_DATE) => {
                // skip this frame entirely; the fence is still
                // signaled so the slot can be reclaimed next time
                self.r_resize_requested = true;
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if suboptimal {
            self.r_resize_requested = true;
        }

        // from here on the frame must submit, so the fence can be
        // reset now
        self.r_frames.arm_slot(&dev)?;

        self.r_draw_extent = vk::Extent2D {
            width: self
                .r_draw_image
                .extent
                .width
                .min(self.r_swapchain.extent().width),
            height: self
                .r_draw_image
                .extent
                .height
                .min(self.r_swapchain.extent().height),
        };

        dev.cbuf_begin_recording(cbuf, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;

        // background compute writes the draw image in GENERAL
        barrier::transition_image(
            &dev,
            cbuf,
            self.r_draw_image.image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::GENERAL,
            1,
        )?;
        self.record_background(cbuf);

        barrier::transition_image(
            &dev,
            cbuf,
            self.r_draw_image.image,
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            1,
        )?;
        barrier::transition_image(
            &dev,
            cbuf,
            self.r_depth_image.image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            1,
        )?;

        self.record_geometry(cbuf)?;

        // move the finished frame onto the swapchain image
        let swap_image = self.r_swapchain.d_images[image_index as usize];
        let swap_view = self.r_swapchain.d_views[image_index as usize];
        let swap_extent = self.r_swapchain.extent();

        barrier::transition_image(
            &dev,
            cbuf,
            self.r_draw_image.image,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            1,
        )?;
        barrier::transition_image(
            &dev,
            cbuf,
            swap_image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            1,
        )?;

        resource::copy_image_to_image(
            &dev,
            cbuf,
            self.r_draw_image.image,
            swap_image,
            self.r_draw_extent,
            swap_extent,
        );

        barrier::transition_image(
            &dev,
            cbuf,
            swap_image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            1,
        )?;

        if let Some(overlay) = overlay {
            self.record_overlay(cbuf, swap_view, swap_extent, overlay);
        }

        barrier::transition_image(
            &dev,
            cbuf,
            swap_image,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
            1,
        )?;

        dev.cbuf_end_recording(cbuf)?;

        // wait for the image at color output, signal the present
        // semaphore once all graphics work retires
        let cbuf_infos = [vk::CommandBufferSubmitInfo::builder()
            .command_buffer(cbuf)
            .build()];
        let wait_infos = [vk::SemaphoreSubmitInfo::builder()
            .semaphore(image_available)
            .stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
            .build()];
        let signal_infos = [vk::SemaphoreSubmitInfo::builder()
            .semaphore(render_finished)
            .stage_mask(vk::PipelineStageFlags2::ALL_GRAPHICS)
            .build()];
        let submits = [vk::SubmitInfo2::builder()
            .command_buffer_infos(&cbuf_infos)
            .wait_semaphore_infos(&wait_infos)
            .signal_semaphore_infos(&signal_infos)
            .build()];

        unsafe {
            dev.dev
                .queue_submit2(dev.graphics.queue, &submits, fence)
                .or(Err(SquallError::DEVICE_LOST))?;
        }
        self.r_frames.mark_submitted();

        match self.r_swapchain.present(image_index, render_finished) {
            Ok(()) => {}
            Err(SquallError::OUT_OF_DATE) => {
                self.r_resize_requested = true;
            }
            Err(e) => return Err(e),
        }

        self.r_frames.advance();
        self.r_stats.frame_number = self.r_frames.frame_number();

        Ok(())
    }

    /// Dispatch the selected background effect over the draw image.
    fn record_background(&mut self, cbuf: vk::CommandBuffer) {
        let dev = &self.r_dev;
        let effect = &self.r_effects[self.r_current_effect];

        unsafe {
            dev.dev
                .cmd_bind_pipeline(cbuf, vk::PipelineBindPoint::COMPUTE, effect.pipeline);
            dev.dev.cmd_bind_descriptor_sets(
                cbuf,
                vk::PipelineBindPoint::COMPUTE,
                self.r_compute_layout,
                0,
                &[self.r_draw_image_desc],
                &[],
            );
            dev.dev.cmd_push_constants(
                cbuf,
                self.r_compute_layout,
                vk::ShaderStageFlags::COMPUTE,
                0,
                std::slice::from_raw_parts(
                    &effect.data as *const _ as *const u8,
                    std::mem::size_of_val(&effect.data),
                ),
            );
            // 16x16 workgroups cover the draw extent
            dev.dev.cmd_dispatch(
                cbuf,
                (self.r_draw_extent.width + 15) / 16,
                (self.r_draw_extent.height + 15) / 16,
                1,
            );
        }
    }

    /// Record the geometry pass over the culled, sorted draw lists.
    ///
    /// Pipeline, material set and index buffer are rebound only when
    /// they change between consecutive draws.
    fn record_geometry(&mut self, cbuf: vk::CommandBuffer) -> Result<()> {
        let dev = self.r_dev.clone();

        self.r_stats.drawcall_count = 0;
        self.r_stats.triangle_count = 0;

        // the scene set is allocated fresh from this slot's
        // allocator every frame and aimed at the slot's ubo
        let global_desc = {
            let scene_layout = self.r_scene_layout;
            let slot = self.r_frames.current();
            let set = slot.descs.allocate(&dev.dev, scene_layout)?;

            let mut writer = DescWriter::new();
            writer.write_buffer(
                0,
                slot.scene_ubo.buffer,
                0,
                std::mem::size_of::<GpuSceneData>() as u64,
                vk::DescriptorType::UNIFORM_BUFFER,
            );
            writer.update_set(&dev.dev, set);
            set
        };

        let opaque_draws = visible_sorted_opaque(&self.r_draw_ctx, &self.r_scene_data.viewproj);

        let color_attachments = [vk::RenderingAttachmentInfo::builder()
            .image_view(self.r_draw_image.view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            // the compute background already filled the image
            .load_op(vk::AttachmentLoadOp::LOAD)
            .store_op(vk::AttachmentStoreOp::STORE)
            .build()];
        let depth_attachment = vk::RenderingAttachmentInfo::builder()
            .image_view(self.r_depth_image.view)
            .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            // reverse-Z clears to the far plane at 0
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 0.0,
                    stencil: 0,
                },
            })
            .build();

        let rendering_info = vk::RenderingInfo::builder()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.r_draw_extent,
            })
            .layer_count(1)
            .color_attachments(&color_attachments)
            .depth_attachment(&depth_attachment)
            .build();

        unsafe {
            dev.dev.cmd_begin_rendering(cbuf, &rendering_info);

            dev.dev.cmd_set_viewport(
                cbuf,
                0,
                &[vk::Viewport {
                    x: 0.0,
                    y: 0.0,
                    width: self.r_draw_extent.width as f32,
                    height: self.r_draw_extent.height as f32,
                    min_depth: 0.0,
                    max_depth: 1.0,
                }],
            );
            dev.dev.cmd_set_scissor(
                cbuf,
                0,
                &[vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: self.r_draw_extent,
                }],
            );
        }

        let mut last_pipeline = vk::Pipeline::null();
        let mut last_material: Option<MaterialId> = None;
        let mut last_index_buffer = vk::Buffer::null();

        // split borrows so the closure-free draw body can touch
        // stats while iterating the lists
        let ctx = &self.r_draw_ctx;
        let stats = &mut self.r_stats;
        let pipes = &self.r_materials.m_pipes;

        let mut record_object = |obj: &RenderObject| unsafe {
            if obj.pipeline != last_pipeline {
                last_pipeline = obj.pipeline;
                dev.dev
                    .cmd_bind_pipeline(cbuf, vk::PipelineBindPoint::GRAPHICS, obj.pipeline);
                dev.dev.cmd_bind_descriptor_sets(
                    cbuf,
                    vk::PipelineBindPoint::GRAPHICS,
                    pipes.opaque.layout,
                    0,
                    &[global_desc],
                    &[],
                );
            }
            if last_material != Some(obj.material) {
                last_material = Some(obj.material);
                dev.dev.cmd_bind_descriptor_sets(
                    cbuf,
                    vk::PipelineBindPoint::GRAPHICS,
                    pipes.opaque.layout,
                    1,
                    &[obj.material_set],
                    &[],
                );
            }
            if obj.index_buffer != last_index_buffer {
                last_index_buffer = obj.index_buffer;
                dev.dev
                    .cmd_bind_index_buffer(cbuf, obj.index_buffer, 0, vk::IndexType::UINT32);
            }

            let push_constants = GpuDrawPushConstants {
                world_matrix: obj.transform,
                vertex_buffer: obj.vertex_buffer_address,
            };
            dev.dev.cmd_push_constants(
                cbuf,
                pipes.opaque.layout,
                vk::ShaderStageFlags::VERTEX,
                0,
                std::slice::from_raw_parts(
                    &push_constants as *const _ as *const u8,
                    std::mem::size_of::<GpuDrawPushConstants>(),
                ),
            );

            dev.dev
                .cmd_draw_indexed(cbuf, obj.index_count, 1, obj.first_index, 0, 0);
            stats.drawcall_count += 1;
            stats.triangle_count += obj.index_count / 3;
        };

        for i in opaque_draws.iter() {
            record_object(&ctx.opaque[*i]);
        }
        // transparent surfaces keep their emission order
        for obj in ctx.transparent.iter() {
            record_object(obj);
        }

        unsafe {
            dev.dev.cmd_end_rendering(cbuf);
        }

        Ok(())
    }

    /// Let the overlay collaborator draw into the swapchain view.
    fn record_overlay(
        &mut self,
        cbuf: vk::CommandBuffer,
        view: vk::ImageView,
        extent: vk::Extent2D,
        overlay: &mut dyn Overlay,
    ) {
        let dev = &self.r_dev;

        let color_attachments = [vk::RenderingAttachmentInfo::builder()
            .image_view(view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::LOAD)
            .store_op(vk::AttachmentStoreOp::STORE)
            .build()];
        let rendering_info = vk::RenderingInfo::builder()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: extent,
            })
            .layer_count(1)
            .color_attachments(&color_attachments)
            .build();

        unsafe {
            dev.dev.cmd_begin_rendering(cbuf, &rendering_info);
        }

        overlay.record(&dev.dev, cbuf, extent);

        unsafe {
            dev.dev.cmd_end_rendering(cbuf);
        }
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        let dev = self.r_dev.clone();

        // drain all frames, then unwind in roughly reverse creation
        // order: frame state, materials, pipelines, descriptors,
        // draw targets, then the swapchain and device.
        dev.wait_idle();

        self.r_frames.destroy(&dev, &self.r_alloc);
        self.r_materials.destroy(&dev, &self.r_alloc);

        unsafe {
            for effect in self.r_effects.drain(..) {
                dev.dev.destroy_pipeline(effect.pipeline, None);
            }
            dev.dev.destroy_pipeline_layout(self.r_compute_layout, None);
        }

        self.r_pipeline_cache.destroy(&dev);
        self.r_global_descs.destroy(&dev.dev);
        self.r_layout_cache.destroy(&dev.dev);

        let draw = std::mem::replace(&mut self.r_draw_image, null_image());
        let depth = std::mem::replace(&mut self.r_depth_image, null_image());
        self.r_alloc.destroy_image(draw);
        self.r_alloc.destroy_image(depth);

        // swapchain, allocator, device and instance unwind through
        // their own Drop impls in field order
    }
}

fn null_image() -> AllocatedImage {
    AllocatedImage {
        image: vk::Image::null(),
        view: vk::ImageView::null(),
        memory: vk::DeviceMemory::null(),
        extent: vk::Extent2D::default(),
        format: vk::Format::UNDEFINED,
        mip_levels: 1,
    }
}
