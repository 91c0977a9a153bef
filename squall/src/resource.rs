// GPU resource allocation and the staging upload path
//
// Buffers and images are created here with usage driven memory
// placement. Uploads from the CPU go through transient host visible
// staging buffers and a dedicated immediate submit context, which is
// also where one-off layout transitions and mip generation run.

use ash::vk;

use crate::barrier;
use crate::device::Device;
use crate::{Result, SquallError};

use std::sync::Arc;

/// Bound on the immediate submit fence wait, in nanoseconds.
const IMMEDIATE_TIMEOUT: u64 = 10_000_000_000;

/// A device buffer and the memory backing it.
///
/// `mapping` is non-null only for the host visible classes, which are
/// mapped persistently at creation. `address` is recorded when the
/// buffer was created with device address usage.
pub struct AllocatedBuffer {
    pub buffer: vk::Buffer,
    pub(crate) memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
    pub(crate) mapping: *mut u8,
    pub address: Option<vk::DeviceAddress>,
}

/// An image, its default view, and the memory backing it.
pub struct AllocatedImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub(crate) memory: vk::DeviceMemory,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub mip_levels: u32,
}

/// The index/vertex buffer pair for one uploaded mesh.
///
/// The vertex buffer is an SSBO fetched through its device address
/// from the vertex shader, so there is no vertex input state at all.
pub struct GpuMeshBuffers {
    pub index_buffer: AllocatedBuffer,
    pub vertex_buffer: AllocatedBuffer,
    pub vertex_buffer_address: vk::DeviceAddress,
}

/// Usage classes for device local buffers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BufferUse {
    Index,
    /// Vertex pulling SSBO. Created with device address usage, and
    /// the address is recorded on return.
    Vertex,
    Uniform,
    Storage,
}

/// Usage classes for host visible buffers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HostBufferUse {
    /// Sequential write staging source.
    Upload,
    /// Coherent readback destination.
    Readback,
    /// Persistently mapped uniform data written every frame.
    Uniform,
}

/// Number of mip levels for a full chain over `width` x `height`.
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// Stride between uniform ranges packed into one buffer: the block
/// size rounded up to the device's offset alignment (always a power
/// of two).
pub fn uniform_stride(block: vk::DeviceSize, alignment: vk::DeviceSize) -> vk::DeviceSize {
    let alignment = alignment.max(1);
    (block + alignment - 1) & !(alignment - 1)
}

/// The resource allocator.
///
/// Owns the immediate submit context: one command pool, one primary
/// command buffer, and a fence, all on the graphics queue so that
/// copies, blits and layout transitions can share it.
pub struct Allocator {
    pub(crate) dev: Arc<Device>,
    imm_pool: vk::CommandPool,
    imm_cbuf: vk::CommandBuffer,
    imm_fence: vk::Fence,
}

impl Allocator {
    pub fn new(dev: Arc<Device>) -> Result<Self> {
        let imm_pool = dev.create_command_pool(dev.graphics.family)?;
        let imm_cbuf = dev.create_command_buffers(imm_pool, 1)?[0];

        let imm_fence = unsafe {
            dev.dev
                .create_fence(&vk::FenceCreateInfo::builder(), None)
                .or(Err(SquallError::INVALID))?
        };

        Ok(Self {
            dev: dev,
            imm_pool: imm_pool,
            imm_cbuf: imm_cbuf,
            imm_fence: imm_fence,
        })
    }

    /// Allocates a buffer/memory pair of size `size`.
    ///
    /// There are two components to a memory backed resource in
    /// vulkan: the vkBuffer itself, and the vkDeviceMemory region
    /// bound behind it. Both are returned inside the AllocatedBuffer
    /// and both are released together.
    fn create_buffer_internal(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        flags: vk::MemoryPropertyFlags,
        device_address: bool,
        map: bool,
    ) -> Result<AllocatedBuffer> {
        let dev = &self.dev;

        let create_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .build();

        let buffer = unsafe {
            dev.dev
                .create_buffer(&create_info, None)
                .or(Err(SquallError::COULD_NOT_CREATE_BUFFER))?
        };
        let req = unsafe { dev.dev.get_buffer_memory_requirements(buffer) };
        // find the memory type that best suits our requirements
        let index = Device::find_memory_type_index(&dev.mem_props, &req, flags)
            .ok_or(SquallError::OUT_OF_MEMORY)?;

        // buffers that hand out GPU addresses need the allocation
        // flagged as well, not just the buffer usage bits
        let mut alloc_flags = vk::MemoryAllocateFlagsInfo::builder()
            .flags(vk::MemoryAllocateFlags::DEVICE_ADDRESS)
            .build();
        let mut alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(req.size)
            .memory_type_index(index);
        if device_address {
            alloc_info = alloc_info.push_next(&mut alloc_flags);
        }

        let memory = unsafe {
            dev.dev
                .allocate_memory(&alloc_info, None)
                .or(Err(SquallError::OUT_OF_MEMORY))?
        };
        unsafe {
            dev.dev
                .bind_buffer_memory(buffer, memory, 0)
                .or(Err(SquallError::OUT_OF_MEMORY))?
        };

        let mapping = if map {
            unsafe {
                dev.dev
                    .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
                    .or(Err(SquallError::OUT_OF_MEMORY))? as *mut u8
            }
        } else {
            std::ptr::null_mut()
        };

        let address = if device_address {
            let info = vk::BufferDeviceAddressInfo::builder().buffer(buffer).build();
            Some(unsafe { dev.dev.get_buffer_device_address(&info) })
        } else {
            None
        };

        Ok(AllocatedBuffer {
            buffer: buffer,
            memory: memory,
            size: size,
            mapping: mapping,
            address: address,
        })
    }

    /// Create a device local buffer for one of the usage classes.
    pub fn create_device_buffer(
        &self,
        usage: BufferUse,
        size: vk::DeviceSize,
    ) -> Result<AllocatedBuffer> {
        let (vk_usage, device_address) = match usage {
            BufferUse::Index => (
                vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
                false,
            ),
            BufferUse::Vertex => (
                vk::BufferUsageFlags::STORAGE_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_DST
                    | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
                true,
            ),
            BufferUse::Uniform => (
                vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
                false,
            ),
            BufferUse::Storage => (
                vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
                false,
            ),
        };

        self.create_buffer_internal(
            size,
            vk_usage,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            device_address,
            false,
        )
    }

    /// Create a persistently mapped host visible buffer.
    pub fn create_host_buffer(
        &self,
        usage: HostBufferUse,
        size: vk::DeviceSize,
    ) -> Result<AllocatedBuffer> {
        let (vk_usage, flags) = match usage {
            HostBufferUse::Upload => (
                vk::BufferUsageFlags::TRANSFER_SRC,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            ),
            HostBufferUse::Readback => (
                vk::BufferUsageFlags::TRANSFER_DST,
                vk::MemoryPropertyFlags::HOST_VISIBLE
                    | vk::MemoryPropertyFlags::HOST_COHERENT
                    | vk::MemoryPropertyFlags::HOST_CACHED,
            ),
            HostBufferUse::Uniform => (
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            ),
        };

        self.create_buffer_internal(size, vk_usage, flags, false, true)
    }

    /// Write `data` into a mapped buffer at `offset` bytes.
    pub fn write_to_buffer<T: Copy>(
        &self,
        buf: &AllocatedBuffer,
        offset: usize,
        data: &[T],
    ) -> Result<()> {
        if buf.mapping.is_null() {
            return Err(SquallError::INVALID);
        }
        let bytes = std::mem::size_of_val(data);
        if offset + bytes > buf.size as usize {
            return Err(SquallError::INVALID);
        }

        unsafe {
            // rust doesn't have a raw memcpy, so we go through a
            // byte slice view of the mapping
            let src = std::slice::from_raw_parts(data.as_ptr() as *const u8, bytes);
            let dst = std::slice::from_raw_parts_mut(buf.mapping.add(offset), bytes);
            dst.copy_from_slice(src);
        }

        Ok(())
    }

    /// Create a vkImage and the resources needed to use it
    ///   (vkImageView and vkDeviceMemory)
    ///
    /// The default view covers every mip level, with the aspect mask
    /// derived from the format.
    pub fn create_image(
        &self,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        mipmapped: bool,
    ) -> Result<AllocatedImage> {
        let dev = &self.dev;
        let mip_levels = if mipmapped {
            mip_level_count(extent.width, extent.height)
        } else {
            1
        };

        let create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(mip_levels)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let image = unsafe {
            dev.dev
                .create_image(&create_info, None)
                .or(Err(SquallError::COULD_NOT_CREATE_IMAGE))?
        };

        let mem_reqs = unsafe { dev.dev.get_image_memory_requirements(image) };
        let memtype_index = Device::find_memory_type_index(
            &dev.mem_props,
            &mem_reqs,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )
        .ok_or(SquallError::OUT_OF_MEMORY)?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(mem_reqs.size)
            .memory_type_index(memtype_index);

        let image_memory = unsafe {
            dev.dev
                .allocate_memory(&alloc_info, None)
                .or(Err(SquallError::OUT_OF_MEMORY))?
        };
        unsafe {
            dev.dev
                .bind_image_memory(image, image_memory, 0)
                .or(Err(SquallError::OUT_OF_MEMORY))?
        };

        let aspect = match format {
            vk::Format::D32_SFLOAT
            | vk::Format::D32_SFLOAT_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D16_UNORM => vk::ImageAspectFlags::DEPTH,
            _ => vk::ImageAspectFlags::COLOR,
        };

        let view_info = vk::ImageViewCreateInfo::builder()
            .subresource_range(
                vk::ImageSubresourceRange::builder()
                    .aspect_mask(aspect)
                    .level_count(mip_levels)
                    .layer_count(1)
                    .build(),
            )
            .image(image)
            .format(format)
            .view_type(vk::ImageViewType::TYPE_2D);

        let view = unsafe {
            dev.dev
                .create_image_view(&view_info, None)
                .or(Err(SquallError::COULD_NOT_CREATE_IMAGE))?
        };

        Ok(AllocatedImage {
            image: image,
            view: view,
            memory: image_memory,
            extent: extent,
            format: format,
            mip_levels: mip_levels,
        })
    }

    /// Record and synchronously execute a batch of commands.
    ///
    /// This is for work that has to happen outside the frame loop:
    /// uploads, one-off layout transitions, mip generation. The
    /// fence wait is bounded; expiry means the device is gone.
    pub fn immediate_submit<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer) -> Result<()>,
    {
        let dev = &self.dev;

        unsafe {
            dev.dev
                .reset_fences(&[self.imm_fence])
                .or(Err(SquallError::INVALID))?;
        }

        dev.cbuf_begin_recording(self.imm_cbuf, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        record(self.imm_cbuf)?;
        dev.cbuf_end_recording(self.imm_cbuf)?;

        let cbuf_infos = [vk::CommandBufferSubmitInfo::builder()
            .command_buffer(self.imm_cbuf)
            .build()];
        let submits = [vk::SubmitInfo2::builder()
            .command_buffer_infos(&cbuf_infos)
            .build()];

        unsafe {
            dev.dev
                .queue_submit2(dev.graphics.queue, &submits, self.imm_fence)
                .or(Err(SquallError::DEVICE_LOST))?;

            match dev
                .dev
                .wait_for_fences(&[self.imm_fence], true, IMMEDIATE_TIMEOUT)
            {
                Ok(_) => Ok(()),
                Err(vk::Result::TIMEOUT) => Err(SquallError::DEVICE_LOST),
                Err(_) => Err(SquallError::DEVICE_LOST),
            }
        }
    }

    /// Upload a mesh into device local index/vertex buffers.
    ///
    /// One combined staging buffer holds the vertices at offset 0 and
    /// the indices right after them; a single immediate submit then
    /// issues both copies. The staging buffer dies as soon as the
    /// fence signals.
    pub fn upload_mesh<V: Copy>(
        &self,
        vertices: &[V],
        indices: &[u32],
    ) -> Result<GpuMeshBuffers> {
        let vertex_bytes = std::mem::size_of_val(vertices) as vk::DeviceSize;
        let index_bytes = std::mem::size_of_val(indices) as vk::DeviceSize;

        let vertex_buffer = self.create_device_buffer(BufferUse::Vertex, vertex_bytes)?;
        let index_buffer = self.create_device_buffer(BufferUse::Index, index_bytes)?;
        let address = vertex_buffer.address.ok_or(SquallError::INVALID)?;

        let staging = self.create_host_buffer(HostBufferUse::Upload, vertex_bytes + index_bytes)?;
        self.write_to_buffer(&staging, 0, vertices)?;
        self.write_to_buffer(&staging, vertex_bytes as usize, indices)?;

        self.immediate_submit(|cbuf| {
            let vertex_copy = [vk::BufferCopy::builder()
                .src_offset(0)
                .dst_offset(0)
                .size(vertex_bytes)
                .build()];
            let index_copy = [vk::BufferCopy::builder()
                .src_offset(vertex_bytes)
                .dst_offset(0)
                .size(index_bytes)
                .build()];

            unsafe {
                self.dev
                    .dev
                    .cmd_copy_buffer(cbuf, staging.buffer, vertex_buffer.buffer, &vertex_copy);
                self.dev
                    .dev
                    .cmd_copy_buffer(cbuf, staging.buffer, index_buffer.buffer, &index_copy);
            }
            Ok(())
        })?;

        self.destroy_buffer(staging);

        Ok(GpuMeshBuffers {
            index_buffer: index_buffer,
            vertex_buffer: vertex_buffer,
            vertex_buffer_address: address,
        })
    }

    /// Upload RGBA8 pixels into a sampled image.
    ///
    /// The image ends in SHADER_READ_ONLY_OPTIMAL across all levels.
    /// When `mipmapped` is set the chain is filled by iterative blits,
    /// which requires the format to support linear filtering.
    pub fn upload_texture(
        &self,
        pixels: &[u8],
        extent: vk::Extent2D,
        format: vk::Format,
        mipmapped: bool,
    ) -> Result<AllocatedImage> {
        // RGBA8 is the canonical channel count on this path
        let data_size = extent.width as usize * extent.height as usize * 4;
        if pixels.len() != data_size {
            return Err(SquallError::INVALID_SCENE_DATA);
        }

        if mipmapped {
            self.check_linear_blit(format)?;
        }

        let staging = self.create_host_buffer(HostBufferUse::Upload, data_size as u64)?;
        self.write_to_buffer(&staging, 0, pixels)?;

        let usage = vk::ImageUsageFlags::SAMPLED
            | vk::ImageUsageFlags::TRANSFER_DST
            | vk::ImageUsageFlags::TRANSFER_SRC;
        let image = self.create_image(extent, format, usage, mipmapped)?;

        self.immediate_submit(|cbuf| {
            barrier::transition_image(
                &self.dev,
                cbuf,
                image.image,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                image.mip_levels,
            )?;

            let copy_region = [vk::BufferImageCopy::builder()
                .buffer_offset(0)
                // 0 means tightly packed
                .buffer_row_length(0)
                .buffer_image_height(0)
                .image_subresource(
                    vk::ImageSubresourceLayers::builder()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .mip_level(0)
                        .base_array_layer(0)
                        .layer_count(1)
                        .build(),
                )
                .image_extent(vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                })
                .build()];

            unsafe {
                self.dev.dev.cmd_copy_buffer_to_image(
                    cbuf,
                    staging.buffer,
                    image.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &copy_region,
                );
            }

            if image.mip_levels > 1 {
                self.record_mip_chain(cbuf, &image)
            } else {
                barrier::transition_image(
                    &self.dev,
                    cbuf,
                    image.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    1,
                )
            }
        })?;

        self.destroy_buffer(staging);

        Ok(image)
    }

    /// Fatal per-texture check: mip blits need the format to
    /// advertise linear filter support.
    fn check_linear_blit(&self, format: vk::Format) -> Result<()> {
        let props = unsafe {
            self.dev
                .inst
                .inst
                .get_physical_device_format_properties(self.dev.pdev, format)
        };

        if !props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
        {
            log::error!("format {:?} does not support linear blitting", format);
            return Err(SquallError::BLIT_NOT_SUPPORTED);
        }
        Ok(())
    }

    /// Fill the mip chain of `image` by halving blits.
    ///
    /// Level i is moved to TRANSFER_SRC, blitted into level i+1, and
    /// retired to SHADER_READ_ONLY. The last level follows once the
    /// loop finishes. Assumes every level starts in TRANSFER_DST.
    fn record_mip_chain(&self, cbuf: vk::CommandBuffer, image: &AllocatedImage) -> Result<()> {
        let mut mip_width = image.extent.width as i32;
        let mut mip_height = image.extent.height as i32;

        for level in 1..image.mip_levels {
            barrier::transition_image_range(
                &self.dev,
                cbuf,
                image.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                level - 1,
                1,
            )?;

            let dst_width = if mip_width > 1 { mip_width / 2 } else { 1 };
            let dst_height = if mip_height > 1 { mip_height / 2 } else { 1 };

            let blit = [vk::ImageBlit2::builder()
                .src_offsets([
                    vk::Offset3D { x: 0, y: 0, z: 0 },
                    vk::Offset3D {
                        x: mip_width,
                        y: mip_height,
                        z: 1,
                    },
                ])
                .dst_offsets([
                    vk::Offset3D { x: 0, y: 0, z: 0 },
                    vk::Offset3D {
                        x: dst_width,
                        y: dst_height,
                        z: 1,
                    },
                ])
                .src_subresource(
                    vk::ImageSubresourceLayers::builder()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .mip_level(level - 1)
                        .base_array_layer(0)
                        .layer_count(1)
                        .build(),
                )
                .dst_subresource(
                    vk::ImageSubresourceLayers::builder()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .mip_level(level)
                        .base_array_layer(0)
                        .layer_count(1)
                        .build(),
                )
                .build()];

            let blit_info = vk::BlitImageInfo2::builder()
                .src_image(image.image)
                .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                .dst_image(image.image)
                .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .filter(vk::Filter::LINEAR)
                .regions(&blit)
                .build();

            unsafe {
                self.dev.dev.cmd_blit_image2(cbuf, &blit_info);
            }

            barrier::transition_image_range(
                &self.dev,
                cbuf,
                image.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                level - 1,
                1,
            )?;

            mip_width = dst_width;
            mip_height = dst_height;
        }

        barrier::transition_image_range(
            &self.dev,
            cbuf,
            image.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            image.mip_levels - 1,
            1,
        )
    }

    /// Copy a device buffer back to the host.
    ///
    /// A transient readback buffer is used; this stalls on the
    /// immediate fence, so it is only for tooling and tests.
    pub fn readback_buffer(&self, src: vk::Buffer, size: vk::DeviceSize) -> Result<Vec<u8>> {
        let readback = self.create_host_buffer(HostBufferUse::Readback, size)?;

        self.immediate_submit(|cbuf| {
            let region = [vk::BufferCopy::builder().size(size).build()];
            unsafe {
                self.dev
                    .dev
                    .cmd_copy_buffer(cbuf, src, readback.buffer, &region);
            }
            Ok(())
        })?;

        let mut out = vec![0u8; size as usize];
        unsafe {
            let mapped = std::slice::from_raw_parts(readback.mapping, size as usize);
            out.copy_from_slice(mapped);
        }

        self.destroy_buffer(readback);
        Ok(out)
    }

    pub fn destroy_buffer(&self, buf: AllocatedBuffer) {
        unsafe {
            self.dev.dev.destroy_buffer(buf.buffer, None);
            self.dev.dev.free_memory(buf.memory, None);
        }
    }

    pub fn destroy_image(&self, img: AllocatedImage) {
        unsafe {
            self.dev.dev.destroy_image_view(img.view, None);
            self.dev.dev.destroy_image(img.image, None);
            self.dev.dev.free_memory(img.memory, None);
        }
    }
}

/// Blit one color image into another, scaling on extent mismatch.
///
/// Source must be in TRANSFER_SRC, destination in TRANSFER_DST. The
/// frame driver uses this to move the HDR draw image onto the
/// swapchain image.
pub(crate) fn copy_image_to_image(
    dev: &Device,
    cbuf: vk::CommandBuffer,
    src: vk::Image,
    dst: vk::Image,
    src_extent: vk::Extent2D,
    dst_extent: vk::Extent2D,
) {
    let blit = [vk::ImageBlit2::builder()
        .src_offsets([
            vk::Offset3D { x: 0, y: 0, z: 0 },
            vk::Offset3D {
                x: src_extent.width as i32,
                y: src_extent.height as i32,
                z: 1,
            },
        ])
        .dst_offsets([
            vk::Offset3D { x: 0, y: 0, z: 0 },
            vk::Offset3D {
                x: dst_extent.width as i32,
                y: dst_extent.height as i32,
                z: 1,
            },
        ])
        .src_subresource(
            vk::ImageSubresourceLayers::builder()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .mip_level(0)
                .base_array_layer(0)
                .layer_count(1)
                .build(),
        )
        .dst_subresource(
            vk::ImageSubresourceLayers::builder()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .mip_level(0)
                .base_array_layer(0)
                .layer_count(1)
                .build(),
        )
        .build()];

    let blit_info = vk::BlitImageInfo2::builder()
        .src_image(src)
        .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
        .dst_image(dst)
        .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .filter(vk::Filter::LINEAR)
        .regions(&blit)
        .build();

    unsafe {
        dev.dev.cmd_blit_image2(cbuf, &blit_info);
    }
}

impl Drop for Allocator {
    fn drop(&mut self) {
        unsafe {
            self.dev.dev.destroy_fence(self.imm_fence, None);
            self.dev.dev.destroy_command_pool(self.imm_pool, None);
        }
    }
}
