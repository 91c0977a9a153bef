// Pipeline construction and caching
//
// Graphics pipelines target dynamic rendering, so the builder tracks
// attachment formats instead of a render pass. The compiled SPIR-V
// ships inside the crate and is embedded at build time; the GLSL it
// was compiled from sits next to the .spv files for reference.

use ash::{util, vk};
use cgmath::Vector4;

use crate::device::Device;
use crate::{Result, SquallError};

use std::collections::HashMap;
use std::ffi::CString;
use std::io::Cursor;

/// Create a vkShaderModule from an embedded SPIR-V blob.
///
/// `cursor` is accepted by ash's helper function, `read_spv`, which
/// handles the endianness and alignment checks for us.
pub(crate) fn create_shader_module(
    dev: &Device,
    cursor: &mut Cursor<&'static [u8]>,
) -> Result<vk::ShaderModule> {
    let code = util::read_spv(cursor).map_err(|e| {
        log::error!("could not read embedded spv: {}", e);
        SquallError::COULD_NOT_LOAD_SHADER
    })?;

    let info = vk::ShaderModuleCreateInfo::builder().code(&code);

    unsafe {
        dev.dev
            .create_shader_module(&info, None)
            .or(Err(SquallError::COULD_NOT_LOAD_SHADER))
    }
}

/// The vertex/fragment module pair for the mesh pass.
pub(crate) fn create_mesh_shaders(
    dev: &Device,
) -> Result<(vk::ShaderModule, vk::ShaderModule)> {
    let vert = create_shader_module(
        dev,
        &mut Cursor::new(&include_bytes!("./shaders/mesh.vert.spv")[..]),
    )?;
    let frag = create_shader_module(
        dev,
        &mut Cursor::new(&include_bytes!("./shaders/mesh.frag.spv")[..]),
    )?;

    Ok((vert, frag))
}

/// Probe for a supported depth attachment format.
///
/// D32 is what we want; some hardware only exposes the combined
/// depth/stencil variants, which are equivalent for our purposes.
pub fn select_depth_format(dev: &Device) -> Result<vk::Format> {
    let candidates = [
        vk::Format::D32_SFLOAT,
        vk::Format::D32_SFLOAT_S8_UINT,
        vk::Format::D24_UNORM_S8_UINT,
    ];

    for format in candidates.iter() {
        let props = unsafe {
            dev.inst
                .inst
                .get_physical_device_format_properties(dev.pdev, *format)
        };

        if props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        {
            return Ok(*format);
        }
    }

    Err(SquallError::FORMAT_NOT_SUPPORTED)
}

/// Blend states the material pass classes use.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BlendMode {
    None,
    Additive,
}

/// Everything that distinguishes one graphics pipeline from another
/// here. Doubles as the cache key.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct GraphicsPipelineDesc {
    pub vert: vk::ShaderModule,
    pub frag: vk::ShaderModule,
    pub blend: BlendMode,
    pub depth_write: bool,
    pub cull_mode: vk::CullModeFlags,
    pub color_format: vk::Format,
    pub depth_format: vk::Format,
}

/// Configure and create a graphics pipeline
///
/// The fixed function setup follows the mesh pass: triangle lists,
/// filled polygons, reverse-Z depth compare, dynamic viewport and
/// scissor. Everything else is driven by the desc.
pub struct PipelineBuilder {
    desc: GraphicsPipelineDesc,
    layout: vk::PipelineLayout,
}

impl PipelineBuilder {
    pub fn new(
        vert: vk::ShaderModule,
        frag: vk::ShaderModule,
        layout: vk::PipelineLayout,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> Self {
        Self {
            desc: GraphicsPipelineDesc {
                vert: vert,
                frag: frag,
                blend: BlendMode::None,
                depth_write: true,
                // glTF content is frequently double sided, so the
                // default stays permissive
                cull_mode: vk::CullModeFlags::NONE,
                color_format: color_format,
                depth_format: depth_format,
            },
            layout: layout,
        }
    }

    pub fn blend(mut self, blend: BlendMode) -> Self {
        self.desc.blend = blend;
        self
    }

    pub fn depth_write(mut self, write: bool) -> Self {
        self.desc.depth_write = write;
        self
    }

    pub fn cull_mode(mut self, mode: vk::CullModeFlags) -> Self {
        self.desc.cull_mode = mode;
        self
    }

    pub fn desc(&self) -> GraphicsPipelineDesc {
        self.desc
    }

    /// Create the pipeline described by the current state.
    pub fn build(&self, dev: &Device) -> Result<vk::Pipeline> {
        // This is a really annoying issue with CString ptrs: if the
        // CString doesn't outlive the create call the entrypoint
        // pointer goes stale, so it lives here.
        let program_entrypoint_name = CString::new("main").unwrap();

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo {
                module: self.desc.vert,
                p_name: program_entrypoint_name.as_ptr(),
                stage: vk::ShaderStageFlags::VERTEX,
                ..Default::default()
            },
            vk::PipelineShaderStageCreateInfo {
                module: self.desc.frag,
                p_name: program_entrypoint_name.as_ptr(),
                stage: vk::ShaderStageFlags::FRAGMENT,
                ..Default::default()
            },
        ];

        // vertices are pulled from the SSBO through its device
        // address, so there is no vertex input state to describe
        let vertex_info = vk::PipelineVertexInputStateCreateInfo::builder();

        let assembly = vk::PipelineInputAssemblyStateCreateInfo {
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            ..Default::default()
        };

        // viewport and scissor are dynamic; only the counts matter
        let viewport_info = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let raster_info = vk::PipelineRasterizationStateCreateInfo {
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            cull_mode: self.desc.cull_mode,
            line_width: 1.0,
            polygon_mode: vk::PolygonMode::FILL,
            ..Default::default()
        };

        let multisample_info = vk::PipelineMultisampleStateCreateInfo {
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            ..Default::default()
        };

        // reverse-Z: near is 1.0, far is 0.0, greater wins
        let depth_info = vk::PipelineDepthStencilStateCreateInfo {
            depth_test_enable: 1,
            depth_write_enable: self.desc.depth_write as u32,
            depth_compare_op: vk::CompareOp::GREATER_OR_EQUAL,
            ..Default::default()
        };

        let blend_attachment_states = [match self.desc.blend {
            BlendMode::None => vk::PipelineColorBlendAttachmentState {
                blend_enable: 0,
                color_write_mask: vk::ColorComponentFlags::RGBA,
                ..Default::default()
            },
            BlendMode::Additive => vk::PipelineColorBlendAttachmentState {
                blend_enable: 1,
                src_color_blend_factor: vk::BlendFactor::SRC_ALPHA,
                dst_color_blend_factor: vk::BlendFactor::ONE,
                color_blend_op: vk::BlendOp::ADD,
                src_alpha_blend_factor: vk::BlendFactor::ONE,
                dst_alpha_blend_factor: vk::BlendFactor::ZERO,
                alpha_blend_op: vk::BlendOp::ADD,
                color_write_mask: vk::ColorComponentFlags::RGBA,
            },
        }];

        let blend_info =
            vk::PipelineColorBlendStateCreateInfo::builder().attachments(&blend_attachment_states);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_info =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        // dynamic rendering replaces the render pass with the
        // attachment formats right here
        let color_formats = [self.desc.color_format];
        let mut rendering_info = vk::PipelineRenderingCreateInfo::builder()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(self.desc.depth_format)
            .build();

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_info)
            .input_assembly_state(&assembly)
            .viewport_state(&viewport_info)
            .rasterization_state(&raster_info)
            .multisample_state(&multisample_info)
            .depth_stencil_state(&depth_info)
            .color_blend_state(&blend_info)
            .dynamic_state(&dynamic_info)
            .layout(self.layout)
            .push_next(&mut rendering_info)
            .build();

        unsafe {
            Ok(dev
                .dev
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .or(Err(SquallError::COULD_NOT_CREATE_PIPELINE))?[0])
        }
    }
}

/// Cache of built graphics pipelines.
///
/// Keyed on the full builder state; the two canonical material
/// pipelines land here, and asking for the same state twice hands
/// back the same handle.
pub struct PipelineCache {
    pipelines: HashMap<GraphicsPipelineDesc, vk::Pipeline>,
}

impl PipelineCache {
    pub fn new() -> Self {
        Self {
            pipelines: HashMap::new(),
        }
    }

    pub fn get_or_build(
        &mut self,
        dev: &Device,
        builder: &PipelineBuilder,
    ) -> Result<vk::Pipeline> {
        let desc = builder.desc();
        if let Some(p) = self.pipelines.get(&desc) {
            return Ok(*p);
        }

        let pipeline = builder.build(dev)?;
        self.pipelines.insert(desc, pipeline);
        Ok(pipeline)
    }

    pub fn destroy(&mut self, dev: &Device) {
        for (_, p) in self.pipelines.drain() {
            unsafe {
                dev.dev.destroy_pipeline(p, None);
            }
        }
    }
}

/// Push constants for the background compute effects.
///
/// Four generic vec4s; each effect decides what they mean.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct ComputePushConstants {
    pub data1: Vector4<f32>,
    pub data2: Vector4<f32>,
    pub data3: Vector4<f32>,
    pub data4: Vector4<f32>,
}

impl Default for ComputePushConstants {
    fn default() -> Self {
        let zero = Vector4::new(0.0, 0.0, 0.0, 0.0);
        Self {
            data1: zero,
            data2: zero,
            data3: zero,
            data4: zero,
        }
    }
}

/// One selectable compute background.
pub struct ComputeEffect {
    pub name: &'static str,
    pub pipeline: vk::Pipeline,
    pub data: ComputePushConstants,
}

/// Build the background effect set.
///
/// Both effects write the draw image through the same layout:
/// set 0 = the storage image, push constants as above. The shader
/// modules are destroyed right away, the pipelines keep them alive
/// internally.
pub fn create_background_effects(
    dev: &Device,
    draw_image_layout: vk::DescriptorSetLayout,
) -> Result<(vk::PipelineLayout, Vec<ComputeEffect>)> {
    let set_layouts = [draw_image_layout];
    let push_ranges = [vk::PushConstantRange::builder()
        .stage_flags(vk::ShaderStageFlags::COMPUTE)
        .offset(0)
        .size(std::mem::size_of::<ComputePushConstants>() as u32)
        .build()];

    let layout_info = vk::PipelineLayoutCreateInfo::builder()
        .set_layouts(&set_layouts)
        .push_constant_ranges(&push_ranges)
        .build();
    let layout = unsafe {
        dev.dev
            .create_pipeline_layout(&layout_info, None)
            .or(Err(SquallError::COULD_NOT_CREATE_PIPELINE))?
    };

    let program_entrypoint_name = CString::new("main").unwrap();

    let build_effect = |name: &'static str,
                        spv: &'static [u8],
                        data: ComputePushConstants|
     -> Result<ComputeEffect> {
        let module = create_shader_module(dev, &mut Cursor::new(spv))?;

        let stage = vk::PipelineShaderStageCreateInfo {
            module: module,
            p_name: program_entrypoint_name.as_ptr(),
            stage: vk::ShaderStageFlags::COMPUTE,
            ..Default::default()
        };

        let pipe_info = vk::ComputePipelineCreateInfo::builder()
            .stage(stage)
            .layout(layout)
            .build();
        let pipeline = unsafe {
            dev.dev
                .create_compute_pipelines(vk::PipelineCache::null(), &[pipe_info], None)
                .or(Err(SquallError::COULD_NOT_CREATE_PIPELINE))?[0]
        };

        unsafe {
            dev.dev.destroy_shader_module(module, None);
        }

        Ok(ComputeEffect {
            name: name,
            pipeline: pipeline,
            data: data,
        })
    };

    let gradient = build_effect("gradient", &include_bytes!("./shaders/gradient.spv")[..], {
        let mut data = ComputePushConstants::default();
        data.data1 = Vector4::new(1.0, 0.0, 0.0, 1.0);
        data.data2 = Vector4::new(0.0, 0.0, 1.0, 1.0);
        data
    })?;
    let sky = build_effect("sky", &include_bytes!("./shaders/sky.spv")[..], {
        let mut data = ComputePushConstants::default();
        data.data1 = Vector4::new(0.1, 0.2, 0.4, 0.97);
        data
    })?;

    Ok((layout, vec![gradient, sky]))
}
