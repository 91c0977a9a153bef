// Material registry
//
// Owns the default textures and samplers, the canonical material
// descriptor layout, and the opaque/transparent mesh pipelines. A
// material instance is a pass class, a pipeline, and one descriptor
// set per frame slot binding the factor range plus the image slots.

use ash::vk;
use cgmath::{Matrix4, Vector4};

use crate::descriptor::{DescAllocator, DescLayoutBuilder, DescLayoutCache, DescWriter, PoolSizeRatio};
use crate::device::Device;
use crate::pipeline::{create_mesh_shaders, BlendMode, PipelineBuilder, PipelineCache};
use crate::resource::{AllocatedBuffer, AllocatedImage, Allocator, HostBufferUse};
use crate::{Result, SquallError};

/// Which pass a material renders in.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MaterialPass {
    Opaque,
    Transparent,
}

/// Per-draw push constants for the mesh pass.
///
/// The world matrix sits at offset 0 for the vertex stage, the
/// vertex buffer device address right behind it.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct GpuDrawPushConstants {
    pub world_matrix: Matrix4<f32>,
    pub vertex_buffer: vk::DeviceAddress,
}

/// The std140 uniform block backing one material.
///
/// colorFactors multiplies the base color texture; the metal-rough
/// vector keeps metallic in x and roughness in y. Emissive drives
/// the point light export. Padded out to a 256 byte stride so
/// per-material ranges satisfy the uniform offset alignment.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct MaterialConstants {
    pub color_factors: Vector4<f32>,
    pub metal_rough_factors: Vector4<f32>,
    pub emissive_factors: Vector4<f32>,
    pub extra: [Vector4<f32>; 13],
}

impl Default for MaterialConstants {
    fn default() -> Self {
        Self {
            color_factors: Vector4::new(1.0, 1.0, 1.0, 1.0),
            metal_rough_factors: Vector4::new(1.0, 0.5, 0.0, 0.0),
            emissive_factors: Vector4::new(0.0, 0.0, 0.0, 0.0),
            extra: [Vector4::new(0.0, 0.0, 0.0, 0.0); 13],
        }
    }
}

/// Filter selection as the asset loader reports it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FilterMode {
    Nearest,
    Linear,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MipmapMode {
    Nearest,
    Linear,
}

/// A sampler description from the loader.
#[derive(Copy, Clone, Debug)]
pub struct SamplerDesc {
    pub mag: FilterMode,
    pub min: FilterMode,
    pub mipmap: MipmapMode,
}

pub(crate) fn extract_filter(mode: FilterMode) -> vk::Filter {
    match mode {
        FilterMode::Nearest => vk::Filter::NEAREST,
        FilterMode::Linear => vk::Filter::LINEAR,
    }
}

pub(crate) fn extract_mipmap_mode(mode: MipmapMode) -> vk::SamplerMipmapMode {
    match mode {
        MipmapMode::Nearest => vk::SamplerMipmapMode::NEAREST,
        MipmapMode::Linear => vk::SamplerMipmapMode::LINEAR,
    }
}

/// A pipeline handle paired with its layout.
#[derive(Copy, Clone)]
pub struct MaterialPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

/// The two canonical mesh pipelines. They share one pipeline layout
/// since the bindings are identical.
pub struct MaterialPipelines {
    pub opaque: MaterialPipeline,
    pub transparent: MaterialPipeline,
    pub material_layout: vk::DescriptorSetLayout,
}

/// A live material.
#[derive(Clone)]
pub struct MaterialInstance {
    pub pass: MaterialPass,
    pub pipeline: MaterialPipeline,
    /// One set per frame slot, all binding the same resources.
    pub sets: Vec<vk::DescriptorSet>,
    pub constants: MaterialConstants,
}

/// The image and buffer slots a material set binds.
pub struct MaterialResources {
    pub color_view: vk::ImageView,
    pub color_sampler: vk::Sampler,
    pub metal_rough_view: vk::ImageView,
    pub metal_rough_sampler: vk::Sampler,
    pub data_buffer: vk::Buffer,
    pub data_offset: vk::DeviceSize,
}

/// Registry of material state shared by every scene.
pub struct MaterialRegistry {
    /// 1x1 substitutes for absent textures
    pub m_white: AllocatedImage,
    pub m_grey: AllocatedImage,
    pub m_black: AllocatedImage,
    /// 16x16 magenta/black checkerboard for load failures
    pub m_checkerboard: AllocatedImage,

    pub m_sampler_linear: vk::Sampler,
    pub m_sampler_nearest: vk::Sampler,

    pub m_pipes: MaterialPipelines,

    /// Allocator for registry owned sets (the default material)
    m_desc_alloc: DescAllocator,
    m_default_buffer: AllocatedBuffer,
    pub m_default: MaterialInstance,
}

impl MaterialRegistry {
    /// Build the default textures.
    ///
    /// All of them are tiny RGBA8 uploads; the checkerboard is the
    /// one that shows up when a texture fails to load.
    fn create_default_images(
        alloc: &Allocator,
    ) -> Result<(AllocatedImage, AllocatedImage, AllocatedImage, AllocatedImage)> {
        let one = vk::Extent2D {
            width: 1,
            height: 1,
        };
        let fmt = vk::Format::R8G8B8A8_UNORM;

        let white = alloc.upload_texture(&[255, 255, 255, 255], one, fmt, false)?;
        let grey = alloc.upload_texture(&[168, 168, 168, 255], one, fmt, false)?;
        let black = alloc.upload_texture(&[0, 0, 0, 255], one, fmt, false)?;

        let magenta: [u8; 4] = [255, 0, 255, 255];
        let black_px: [u8; 4] = [0, 0, 0, 255];
        let mut pixels = Vec::with_capacity(16 * 16 * 4);
        for y in 0..16u32 {
            for x in 0..16u32 {
                let px = if (x % 2) ^ (y % 2) != 0 {
                    &magenta
                } else {
                    &black_px
                };
                pixels.extend_from_slice(px);
            }
        }
        let checkerboard = alloc.upload_texture(
            &pixels,
            vk::Extent2D {
                width: 16,
                height: 16,
            },
            fmt,
            false,
        )?;

        Ok((white, grey, black, checkerboard))
    }

    /// The default color sampler: linear with the device's maximum
    /// anisotropy, mipmapping enabled across the whole chain.
    fn create_linear_sampler(dev: &Device) -> Result<vk::Sampler> {
        let info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(true)
            .max_anisotropy(dev.max_anisotropy())
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE);

        unsafe {
            dev.dev
                .create_sampler(&info, None)
                .or(Err(SquallError::INVALID))
        }
    }

    /// Nearest sampler, used for the debug checkerboard.
    fn create_nearest_sampler(dev: &Device) -> Result<vk::Sampler> {
        let info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::NEAREST)
            .min_filter(vk::Filter::NEAREST)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE);

        unsafe {
            dev.dev
                .create_sampler(&info, None)
                .or(Err(SquallError::INVALID))
        }
    }

    /// Create a sampler matching a loader description.
    pub fn create_sampler_from_desc(dev: &Device, desc: &SamplerDesc) -> Result<vk::Sampler> {
        let info = vk::SamplerCreateInfo::builder()
            .mag_filter(extract_filter(desc.mag))
            .min_filter(extract_filter(desc.min))
            .mipmap_mode(extract_mipmap_mode(desc.mipmap))
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE);

        unsafe {
            dev.dev
                .create_sampler(&info, None)
                .or(Err(SquallError::INVALID))
        }
    }

    pub fn new(
        dev: &Device,
        alloc: &Allocator,
        layout_cache: &mut DescLayoutCache,
        pipeline_cache: &mut PipelineCache,
        scene_layout: vk::DescriptorSetLayout,
        color_format: vk::Format,
        depth_format: vk::Format,
        frames: usize,
    ) -> Result<Self> {
        let (white, grey, black, checkerboard) = Self::create_default_images(alloc)?;
        let sampler_linear = Self::create_linear_sampler(dev)?;
        let sampler_nearest = Self::create_nearest_sampler(dev)?;

        // the canonical three binding layout: factors, base color,
        // metal-rough
        let material_layout = DescLayoutBuilder::new()
            .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER)
            .add_binding(1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .add_binding(2, vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .build(
                &dev.dev,
                layout_cache,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            )?;

        let set_layouts = [scene_layout, material_layout];
        let push_ranges = [vk::PushConstantRange::builder()
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .offset(0)
            .size(std::mem::size_of::<GpuDrawPushConstants>() as u32)
            .build()];

        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_ranges)
            .build();
        let pipe_layout = unsafe {
            dev.dev
                .create_pipeline_layout(&layout_info, None)
                .or(Err(SquallError::COULD_NOT_CREATE_PIPELINE))?
        };

        let (vert, frag) = create_mesh_shaders(dev)?;

        let opaque_pipeline = pipeline_cache.get_or_build(
            dev,
            &PipelineBuilder::new(vert, frag, pipe_layout, color_format, depth_format),
        )?;
        let transparent_pipeline = pipeline_cache.get_or_build(
            dev,
            &PipelineBuilder::new(vert, frag, pipe_layout, color_format, depth_format)
                .blend(BlendMode::Additive)
                .depth_write(false),
        )?;

        unsafe {
            dev.dev.destroy_shader_module(vert, None);
            dev.dev.destroy_shader_module(frag, None);
        }

        let pipes = MaterialPipelines {
            opaque: MaterialPipeline {
                pipeline: opaque_pipeline,
                layout: pipe_layout,
            },
            transparent: MaterialPipeline {
                pipeline: transparent_pipeline,
                layout: pipe_layout,
            },
            material_layout: material_layout,
        };

        // small persistent allocator for registry owned sets
        let ratios = [
            PoolSizeRatio {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                ratio: 1.0,
            },
            PoolSizeRatio {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                ratio: 2.0,
            },
        ];
        let mut desc_alloc = DescAllocator::new(&dev.dev, 8 * frames as u32, &ratios)?;

        // the default material: checkerboard everywhere so a missing
        // material is impossible to miss
        let default_buffer = alloc.create_host_buffer(
            HostBufferUse::Uniform,
            std::mem::size_of::<MaterialConstants>() as u64,
        )?;
        let default_constants = MaterialConstants::default();
        alloc.write_to_buffer(&default_buffer, 0, &[default_constants])?;

        // the debug checkerboard is always sampled nearest
        let default_resources = MaterialResources {
            color_view: checkerboard.view,
            color_sampler: sampler_nearest,
            metal_rough_view: checkerboard.view,
            metal_rough_sampler: sampler_nearest,
            data_buffer: default_buffer.buffer,
            data_offset: 0,
        };
        let default = Self::write_material_with(
            dev,
            &pipes,
            MaterialPass::Opaque,
            default_constants,
            &default_resources,
            &mut desc_alloc,
            frames,
        )?;

        Ok(Self {
            m_white: white,
            m_grey: grey,
            m_black: black,
            m_checkerboard: checkerboard,
            m_sampler_linear: sampler_linear,
            m_sampler_nearest: sampler_nearest,
            m_pipes: pipes,
            m_desc_alloc: desc_alloc,
            m_default_buffer: default_buffer,
            m_default: default,
        })
    }

    /// Build a material instance: pick the pipeline for the pass and
    /// write one descriptor set per frame slot.
    pub fn write_material(
        &self,
        dev: &Device,
        pass: MaterialPass,
        constants: MaterialConstants,
        resources: &MaterialResources,
        desc_alloc: &mut DescAllocator,
        frames: usize,
    ) -> Result<MaterialInstance> {
        Self::write_material_with(dev, &self.m_pipes, pass, constants, resources, desc_alloc, frames)
    }

    fn write_material_with(
        dev: &Device,
        pipes: &MaterialPipelines,
        pass: MaterialPass,
        constants: MaterialConstants,
        resources: &MaterialResources,
        desc_alloc: &mut DescAllocator,
        frames: usize,
    ) -> Result<MaterialInstance> {
        let pipeline = match pass {
            MaterialPass::Opaque => pipes.opaque,
            MaterialPass::Transparent => pipes.transparent,
        };

        let mut sets = Vec::with_capacity(frames);
        for _ in 0..frames {
            let set = desc_alloc.allocate(&dev.dev, pipes.material_layout)?;

            let mut writer = DescWriter::new();
            writer.write_buffer(
                0,
                resources.data_buffer,
                resources.data_offset,
                std::mem::size_of::<MaterialConstants>() as u64,
                vk::DescriptorType::UNIFORM_BUFFER,
            );
            writer.write_image(
                1,
                resources.color_view,
                resources.color_sampler,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            );
            writer.write_image(
                2,
                resources.metal_rough_view,
                resources.metal_rough_sampler,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            );
            writer.update_set(&dev.dev, set);

            sets.push(set);
        }

        Ok(MaterialInstance {
            pass: pass,
            pipeline: pipeline,
            sets: sets,
            constants: constants,
        })
    }

    /// Tear down registry owned resources. Pipelines and layouts are
    /// owned by the caches and die with them.
    pub fn destroy(&mut self, dev: &Device, alloc: &Allocator) {
        self.m_desc_alloc.destroy(&dev.dev);

        unsafe {
            dev.dev.destroy_pipeline_layout(self.m_pipes.opaque.layout, None);
            dev.dev.destroy_sampler(self.m_sampler_linear, None);
            dev.dev.destroy_sampler(self.m_sampler_nearest, None);
        }

        let buffer = std::mem::replace(
            &mut self.m_default_buffer,
            AllocatedBuffer {
                buffer: vk::Buffer::null(),
                memory: vk::DeviceMemory::null(),
                size: 0,
                mapping: std::ptr::null_mut(),
                address: None,
            },
        );
        alloc.destroy_buffer(buffer);

        for img in [
            std::mem::replace(&mut self.m_white, null_image()),
            std::mem::replace(&mut self.m_grey, null_image()),
            std::mem::replace(&mut self.m_black, null_image()),
            std::mem::replace(&mut self.m_checkerboard, null_image()),
        ] {
            alloc.destroy_image(img);
        }
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
