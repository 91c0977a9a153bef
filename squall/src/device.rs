// Vulkan device representation
//
// This stores per-GPU state: physical device selection, the logical
// device, the queue handles, and the low level memory helpers that
// everything above allocates through.

use ash::extensions::khr;
use ash::vk;

use crate::instance::Instance;
use crate::{CreateInfo, Result, SquallError};

use std::ffi::CStr;
use std::sync::Arc;

/// The queue tuple for one role.
#[derive(Copy, Clone, Debug)]
pub(crate) struct QueueInfo {
    pub queue: vk::Queue,
    pub family: u32,
}

/// Squall Device
///
/// This holds all of the Vulkan state for one GPU. Queue handles are
/// fixed at creation: a graphics family is required, presentation may
/// share it, and a dedicated transfer family is used when the
/// hardware has one.
pub struct Device {
    pub(crate) inst: Arc<Instance>,
    /// the logical device we are using
    pub(crate) dev: ash::Device,
    /// the physical device selected to display to
    pub(crate) pdev: vk::PhysicalDevice,
    pub(crate) pdev_props: vk::PhysicalDeviceProperties,
    pub(crate) mem_props: vk::PhysicalDeviceMemoryProperties,

    pub(crate) graphics: QueueInfo,
    pub(crate) present: QueueInfo,
    pub(crate) transfer: QueueInfo,
}

impl Device {
    /// Check that the required 1.2/1.3 features are all present.
    ///
    /// The renderer depends on dynamic rendering, synchronization2,
    /// buffer device address, descriptor indexing, and anisotropic
    /// filtering. A device that misses any of them is skipped.
    fn supports_required_features(inst: &ash::Instance, pdev: vk::PhysicalDevice) -> bool {
        let mut features13 = vk::PhysicalDeviceVulkan13Features::builder().build();
        let mut features12 = vk::PhysicalDeviceVulkan12Features::builder().build();
        let mut features2 = vk::PhysicalDeviceFeatures2::builder()
            .push_next(&mut features12)
            .push_next(&mut features13)
            .build();

        unsafe { inst.get_physical_device_features2(pdev, &mut features2) };

        features2.features.sampler_anisotropy != 0
            && features12.buffer_device_address != 0
            && features12.descriptor_indexing != 0
            && features13.dynamic_rendering != 0
            && features13.synchronization2 != 0
    }

    /// Check that the device exposes the swapchain extension.
    fn supports_swapchain(inst: &ash::Instance, pdev: vk::PhysicalDevice) -> bool {
        let exts = match unsafe { inst.enumerate_device_extension_properties(pdev) } {
            Ok(e) => e,
            Err(_) => return false,
        };

        exts.iter().any(|ext| {
            let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
            name == khr::Swapchain::name()
        })
    }

    /// Choose a vkPhysicalDevice.
    ///
    /// Discrete GPUs win over integrated ones, everything else is
    /// rejected. Candidates that miss a required feature, the
    /// swapchain extension, or the 1.3 API level are skipped.
    pub(crate) fn select_pdev(inst: &ash::Instance) -> Result<vk::PhysicalDevice> {
        let pdevices = unsafe {
            inst.enumerate_physical_devices()
                .or(Err(SquallError::NO_SUITABLE_DEVICE))?
        };

        let mut best: Option<(u32, vk::PhysicalDevice)> = None;
        for pdev in pdevices.iter() {
            let props = unsafe { inst.get_physical_device_properties(*pdev) };

            if props.api_version < vk::API_VERSION_1_3 {
                continue;
            }
            if !Self::supports_required_features(inst, *pdev) {
                continue;
            }
            if !Self::supports_swapchain(inst, *pdev) {
                continue;
            }

            let score = match props.device_type {
                vk::PhysicalDeviceType::DISCRETE_GPU => 2,
                vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
                _ => continue,
            };

            if best.map(|(s, _)| score > s).unwrap_or(true) {
                best = Some((score, *pdev));
            }
        }

        best.map(|(_, p)| p).ok_or(SquallError::NO_SUITABLE_DEVICE)
    }

    /// Choose a queue family matching `flags`.
    ///
    /// returns an index into the array of queue types. When `exclude`
    /// is set, families that also carry those flags are skipped, which
    /// is how we find transfer-only families.
    fn select_queue_family(
        inst: &ash::Instance,
        pdev: vk::PhysicalDevice,
        flags: vk::QueueFlags,
        exclude: vk::QueueFlags,
    ) -> Option<u32> {
        // get the properties per queue family
        unsafe { inst.get_physical_device_queue_family_properties(pdev) }
            .iter()
            .enumerate()
            .filter_map(|(index, info)| {
                match info.queue_flags.contains(flags) && !info.queue_flags.intersects(exclude) {
                    true => Some(index as u32),
                    false => None,
                }
            })
            .nth(0)
    }

    /// Choose the queue family used for presentation.
    ///
    /// The graphics family is preferred so the swapchain can use
    /// exclusive sharing, otherwise the first family that can present
    /// to the surface is taken.
    fn select_present_family(
        inst: &ash::Instance,
        pdev: vk::PhysicalDevice,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
        graphics_family: u32,
    ) -> Result<u32> {
        let count =
            unsafe { inst.get_physical_device_queue_family_properties(pdev) }.len() as u32;

        let supported = |family: u32| unsafe {
            surface_loader
                .get_physical_device_surface_support(pdev, family, surface)
                .unwrap_or(false)
        };

        if supported(graphics_family) {
            return Ok(graphics_family);
        }

        (0..count)
            .find(|f| supported(*f))
            .ok_or(SquallError::VK_SURF_NOT_SUPPORTED)
    }

    /// Create a vkDevice from a vkPhysicalDevice
    ///
    /// One queue is created in each of the unique families handed in.
    /// The 1.2/1.3 feature chain enables exactly what the renderer
    /// depends on, nothing else.
    fn create_device(
        inst: &ash::Instance,
        pdev: vk::PhysicalDevice,
        families: &[u32],
    ) -> Result<ash::Device> {
        let dev_extension_names = [khr::Swapchain::name().as_ptr()];

        let features = vk::PhysicalDeviceFeatures::builder()
            .sampler_anisotropy(true)
            .build();
        let mut features12 = vk::PhysicalDeviceVulkan12Features::builder()
            .buffer_device_address(true)
            .descriptor_indexing(true)
            .build();
        let mut features13 = vk::PhysicalDeviceVulkan13Features::builder()
            .dynamic_rendering(true)
            .synchronization2(true)
            .build();

        // for now we only have one queue per family, so one priority
        let priorities = [1.0];
        let mut queue_infos = Vec::new();
        let mut seen: Vec<u32> = Vec::new();
        for i in families {
            if seen.contains(i) {
                continue;
            }
            seen.push(*i);
            queue_infos.push(
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(*i)
                    .queue_priorities(&priorities)
                    .build(),
            );
        }

        let dev_create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(queue_infos.as_slice())
            .enabled_extension_names(&dev_extension_names)
            .enabled_features(&features)
            .push_next(&mut features12)
            .push_next(&mut features13)
            .build();

        unsafe {
            inst.create_device(pdev, &dev_create_info, None)
                .or(Err(SquallError::NO_SUITABLE_DEVICE))
        }
    }

    /// Create a new Device against a surface.
    ///
    /// The surface is needed up front so the present family can be
    /// validated during selection rather than at first use.
    pub fn new(
        instance: Arc<Instance>,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
        _info: &CreateInfo,
    ) -> Result<Self> {
        let pdev = Self::select_pdev(&instance.inst)?;
        let pdev_props = unsafe { instance.inst.get_physical_device_properties(pdev) };
        let mem_props = unsafe { instance.inst.get_physical_device_memory_properties(pdev) };

        let graphics_family =
            Self::select_queue_family(&instance.inst, pdev, vk::QueueFlags::GRAPHICS, vk::QueueFlags::empty())
                .ok_or(SquallError::NO_SUITABLE_DEVICE)?;
        let present_family = Self::select_present_family(
            &instance.inst,
            pdev,
            surface_loader,
            surface,
            graphics_family,
        )?;
        // prefer a transfer-only family for uploads, fall back to the
        // graphics family when the hardware doesn't have one
        let transfer_family = Self::select_queue_family(
            &instance.inst,
            pdev,
            vk::QueueFlags::TRANSFER,
            vk::QueueFlags::GRAPHICS,
        )
        .unwrap_or(graphics_family);

        let dev = Self::create_device(
            &instance.inst,
            pdev,
            &[graphics_family, present_family, transfer_family],
        )?;

        let graphics_queue = unsafe { dev.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { dev.get_device_queue(present_family, 0) };
        let transfer_queue = unsafe { dev.get_device_queue(transfer_family, 0) };

        log::debug!(
            "Selected queue families: graphics {} present {} transfer {}",
            graphics_family,
            present_family,
            transfer_family
        );

        Ok(Self {
            inst: instance,
            dev: dev,
            pdev: pdev,
            pdev_props: pdev_props,
            mem_props: mem_props,
            graphics: QueueInfo {
                queue: graphics_queue,
                family: graphics_family,
            },
            present: QueueInfo {
                queue: present_queue,
                family: present_family,
            },
            transfer: QueueInfo {
                queue: transfer_queue,
                family: transfer_family,
            },
        })
    }

    /// returns a new vkCommandPool for `queue_family`
    ///
    /// Command buffers are allocated from command pools. That's about
    /// all they do. They just manage memory.
    pub(crate) fn create_command_pool(&self, queue_family: u32) -> Result<vk::CommandPool> {
        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family);

        unsafe {
            self.dev
                .create_command_pool(&pool_create_info, None)
                .or(Err(SquallError::INVALID))
        }
    }

    /// Allocate a vec of vkCommandBuffers from `pool`
    ///
    /// Command buffer is shortened to `cbuf` in many areas of the
    /// code.
    pub(crate) fn create_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let cbuf_allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_buffer_count(count)
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY);

        unsafe {
            self.dev
                .allocate_command_buffers(&cbuf_allocate_info)
                .or(Err(SquallError::INVALID))
        }
    }

    /// Returns an index into the array of memory types for the memory
    /// properties
    ///
    /// Memory types specify the location and accessability of memory.
    /// Device local memory is resident on the GPU, while host visible
    /// memory can be written from the system side.
    pub(crate) fn find_memory_type_index(
        props: &vk::PhysicalDeviceMemoryProperties,
        reqs: &vk::MemoryRequirements,
        flags: vk::MemoryPropertyFlags,
    ) -> Option<u32> {
        for (i, mem_type) in props.memory_types.iter().enumerate() {
            // Bit i of memory_type_bits will be set if the resource
            // supports the ith memory type in props.
            if (reqs.memory_type_bits >> i) & 1 == 1 && mem_type.property_flags.contains(flags) {
                return Some(i as u32);
            }
        }
        None
    }

    /// Record but do not submit a command buffer.
    pub(crate) fn cbuf_begin_recording(
        &self,
        cbuf: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> Result<()> {
        unsafe {
            // first reset the buffer so we know it is empty
            self.dev
                .reset_command_buffer(cbuf, vk::CommandBufferResetFlags::empty())
                .or(Err(SquallError::RECORDING_FAILED))?;

            let record_info = vk::CommandBufferBeginInfo::builder().flags(flags);

            self.dev
                .begin_command_buffer(cbuf, &record_info)
                .or(Err(SquallError::RECORDING_FAILED))
        }
    }

    /// Close out recording on a command buffer.
    pub(crate) fn cbuf_end_recording(&self, cbuf: vk::CommandBuffer) -> Result<()> {
        unsafe {
            self.dev
                .end_command_buffer(cbuf)
                .or(Err(SquallError::RECORDING_FAILED))
        }
    }

    /// Block until the GPU has finished all submitted work.
    ///
    /// Used while recreating the swapchain and at shutdown.
    pub(crate) fn wait_idle(&self) {
        unsafe {
            // if this fails we are tearing down anyway
            let _ = self.dev.device_wait_idle();
        }
    }

    /// The device limit on sampler anisotropy, used by the default
    /// linear sampler.
    pub(crate) fn max_anisotropy(&self) -> f32 {
        self.pdev_props.limits.max_sampler_anisotropy
    }

    /// Minimum alignment for uniform buffer offsets, used to stride
    /// per-material constant ranges.
    pub(crate) fn min_ubo_alignment(&self) -> u64 {
        self.pdev_props.limits.min_uniform_buffer_offset_alignment
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            // first wait for the device to finish working
            let _ = self.dev.device_wait_idle();
            self.dev.destroy_device(None);
        }
    }
}
