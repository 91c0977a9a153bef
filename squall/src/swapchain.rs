// Swapchain management
//
// Owns the surface bound image ring and its recreation on resize or
// out-of-date results. The selection helpers are plain functions over
// the queried candidate lists so the policy is easy to verify.

use ash::extensions::khr;
use ash::vk;

use crate::device::Device;
use crate::{CreateInfo, PresentPreference, Result, SquallError};

use std::sync::Arc;

/// Bound on the acquire wait, in nanoseconds.
const ACQUIRE_TIMEOUT: u64 = 1_000_000_000;

/// choose a vkSurfaceFormatKHR for the vkSurfaceKHR
///
/// 8-bit sRGB BGRA is preferred; if the surface doesn't expose it we
/// take whatever it lists first.
pub fn select_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Result<vk::SurfaceFormatKHR> {
    if formats.is_empty() {
        return Err(SquallError::INVALID_FORMAT);
    }

    Ok(formats
        .iter()
        .find(|fmt| {
            fmt.format == vk::Format::B8G8R8A8_SRGB
                && fmt.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .copied()
        .unwrap_or(formats[0]))
}

/// Pick the present mode.
///
/// Mailbox when preferred and available, FIFO otherwise. FIFO is
/// always supported so this cannot fail.
pub fn select_present_mode(
    modes: &[vk::PresentModeKHR],
    preference: PresentPreference,
) -> vk::PresentModeKHR {
    match preference {
        PresentPreference::Mailbox => modes
            .iter()
            .cloned()
            .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
            .unwrap_or(vk::PresentModeKHR::FIFO),
        PresentPreference::Fifo => vk::PresentModeKHR::FIFO,
    }
}

/// How many images the swapchain should hold: at least triple
/// buffered, never below the surface minimum, capped by the surface
/// maximum when one is reported.
pub fn select_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let mut count = caps.min_image_count.max(3);
    if caps.max_image_count > 0 && count > caps.max_image_count {
        count = caps.max_image_count;
    }
    count
}

/// Resolve the swapchain extent.
///
/// Normally the surface dictates it. The u32::MAX sentinel means the
/// surface defers to the window, so we clamp the framebuffer size
/// into the supported range.
pub fn select_extent(caps: &vk::SurfaceCapabilitiesKHR, fb_size: (u32, u32)) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    vk::Extent2D {
        width: fb_size
            .0
            .max(caps.min_image_extent.width)
            .min(caps.max_image_extent.width),
        height: fb_size
            .1
            .max(caps.min_image_extent.height)
            .min(caps.max_image_extent.height),
    }
}

/// The swapchain and its image ring.
pub struct Swapchain {
    d_dev: Arc<Device>,

    // the actual surface (KHR extension)
    pub(crate) d_surface_loader: khr::Surface,
    pub(crate) d_surface: vk::SurfaceKHR,

    /// loads swapchain extension
    pub(crate) d_swapchain_loader: khr::Swapchain,
    /// the actual swapchain
    pub(crate) d_swapchain: vk::SwapchainKHR,

    pub(crate) d_surface_format: vk::SurfaceFormatKHR,
    pub(crate) d_present_mode: vk::PresentModeKHR,
    pub(crate) d_resolution: vk::Extent2D,

    /// a set of images belonging to swapchain
    pub(crate) d_images: Vec<vk::Image>,
    /// views describing how to access the images
    pub(crate) d_views: Vec<vk::ImageView>,
}

impl Swapchain {
    /// Build a new swapchain against `surface`.
    ///
    /// Ownership of the surface moves in here; it is destroyed with
    /// the swapchain.
    pub fn new(
        dev: Arc<Device>,
        surface_loader: khr::Surface,
        surface: vk::SurfaceKHR,
        info: &CreateInfo,
        fb_size: (u32, u32),
    ) -> Result<Self> {
        let formats = unsafe {
            surface_loader
                .get_physical_device_surface_formats(dev.pdev, surface)
                .or(Err(SquallError::INVALID_FORMAT))?
        };
        let modes = unsafe {
            surface_loader
                .get_physical_device_surface_present_modes(dev.pdev, surface)
                .or(Err(SquallError::COULD_NOT_CREATE_SWAPCHAIN))?
        };

        let surface_format = select_surface_format(&formats)?;
        let present_mode = select_present_mode(&modes, info.preferred_present_mode);

        let swapchain_loader = khr::Swapchain::new(&dev.inst.inst, &dev.dev);

        let mut ret = Self {
            d_dev: dev,
            d_surface_loader: surface_loader,
            d_surface: surface,
            d_swapchain_loader: swapchain_loader,
            d_swapchain: vk::SwapchainKHR::null(),
            d_surface_format: surface_format,
            d_present_mode: present_mode,
            d_resolution: vk::Extent2D::default(),
            d_images: Vec::new(),
            d_views: Vec::new(),
        };

        ret.create_swapchain(fb_size)?;
        ret.select_images_and_views()?;

        Ok(ret)
    }

    pub fn image_count(&self) -> usize {
        self.d_images.len()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.d_resolution
    }

    pub fn format(&self) -> vk::Format {
        self.d_surface_format.format
    }

    /// Populates this display with a new vkSwapchain
    ///
    /// The old swapchain is never handed to the create info; we rely
    /// on the device idle wait in the recreate path instead, which
    /// keeps ownership simple.
    fn create_swapchain(&mut self, fb_size: (u32, u32)) -> Result<()> {
        let caps = unsafe {
            self.d_surface_loader
                .get_physical_device_surface_capabilities(self.d_dev.pdev, self.d_surface)
                .or(Err(SquallError::COULD_NOT_CREATE_SWAPCHAIN))?
        };

        let desired_image_count = select_image_count(&caps);
        self.d_resolution = select_extent(&caps, fb_size);

        let transform = if caps
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            caps.current_transform
        };

        // the swapchain image receives the blit from the draw image
        // and then the overlay pass renders into it directly
        let usage = vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST;

        let queue_families = [self.d_dev.graphics.family, self.d_dev.present.family];
        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.d_surface)
            .min_image_count(desired_image_count)
            .image_color_space(self.d_surface_format.color_space)
            .image_format(self.d_surface_format.format)
            .image_extent(self.d_resolution)
            .image_usage(usage)
            .pre_transform(transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(self.d_present_mode)
            .clipped(true)
            .image_array_layers(1)
            .old_swapchain(vk::SwapchainKHR::null());

        // exclusive when one family does both jobs, otherwise both
        // families share the images concurrently
        if self.d_dev.graphics.family == self.d_dev.present.family {
            create_info = create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE);
        } else {
            create_info = create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&queue_families);
        }

        self.d_swapchain = unsafe {
            self.d_swapchain_loader
                .create_swapchain(&create_info, None)
                .or(Err(SquallError::COULD_NOT_CREATE_SWAPCHAIN))?
        };

        log::debug!(
            "Created swapchain: {}x{} {:?} {:?}",
            self.d_resolution.width,
            self.d_resolution.height,
            self.d_surface_format.format,
            self.d_present_mode
        );

        Ok(())
    }

    /// Get the vkImages for the swapchain, and create vkImageViews
    /// for them.
    fn select_images_and_views(&mut self) -> Result<()> {
        let images = unsafe {
            self.d_swapchain_loader
                .get_swapchain_images(self.d_swapchain)
                .or(Err(SquallError::COULD_NOT_CREATE_IMAGE))?
        };

        let mut image_views = Vec::new();
        for image in images.iter() {
            let create_info = vk::ImageViewCreateInfo::builder()
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.d_surface_format.format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image(*image)
                .build();

            unsafe {
                image_views.push(
                    self.d_dev
                        .dev
                        .create_image_view(&create_info, None)
                        .or(Err(SquallError::COULD_NOT_CREATE_IMAGE))?,
                );
            }
        }

        self.d_images = images;
        self.d_views = image_views;

        Ok(())
    }

    /// Tear down all the swapchain-dependent objects we created.
    fn destroy_swapchain(&mut self) {
        unsafe {
            for view in self.d_views.drain(..) {
                self.d_dev.dev.destroy_image_view(view, None);
            }

            self.d_swapchain_loader
                .destroy_swapchain(self.d_swapchain, None);
            self.d_swapchain = vk::SwapchainKHR::null();
        }
    }

    /// Recreate our swapchain.
    ///
    /// This will be done on VK_ERROR_OUT_OF_DATE_KHR or when the
    /// window system signals a resize. All in-flight work is drained
    /// first so the old images can go away safely.
    pub fn recreate(&mut self, fb_size: (u32, u32)) -> Result<()> {
        self.d_dev.wait_idle();

        self.destroy_swapchain();
        self.create_swapchain(fb_size)?;
        self.select_images_and_views()?;

        Ok(())
    }

    /// Acquire the next image to render into.
    ///
    /// `sema` is the frame's image-available semaphore. Returns the
    /// image index plus whether the surface reported suboptimal, in
    /// which case the caller finishes the frame but schedules a
    /// recreate.
    pub fn acquire(&mut self, sema: vk::Semaphore) -> Result<(u32, bool)> {
        unsafe {
            match self.d_swapchain_loader.acquire_next_image(
                self.d_swapchain,
                ACQUIRE_TIMEOUT,
                sema,
                vk::Fence::null(),
            ) {
                Ok((index, suboptimal)) => Ok((index, suboptimal)),
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(SquallError::OUT_OF_DATE),
                Err(vk::Result::SUBOPTIMAL_KHR) => Err(SquallError::OUT_OF_DATE),
                Err(vk::Result::TIMEOUT) => Err(SquallError::COULD_NOT_ACQUIRE_NEXT_IMAGE),
                Err(vk::Result::ERROR_DEVICE_LOST) => Err(SquallError::DEVICE_LOST),
                Err(_) => Err(SquallError::COULD_NOT_ACQUIRE_NEXT_IMAGE),
            }
        }
    }

    /// Present `index` to the screen.
    ///
    /// Waits on the frame's render-finished semaphore. A suboptimal
    /// result comes back as OUT_OF_DATE so the driver schedules a
    /// recreate for the next frame boundary.
    pub fn present(&mut self, index: u32, wait_sema: vk::Semaphore) -> Result<()> {
        let wait_semas = [wait_sema];
        let swapchains = [self.d_swapchain];
        let indices = [index];
        let info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semas)
            .swapchains(&swapchains)
            .image_indices(&indices);

        unsafe {
            match self
                .d_swapchain_loader
                .queue_present(self.d_dev.present.queue, &info)
            {
                Ok(false) => Ok(()),
                // VK_SUBOPTIMAL_KHR is a success code, but we still
                // want a recreate out of it
                Ok(true) => Err(SquallError::OUT_OF_DATE),
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(SquallError::OUT_OF_DATE),
                Err(vk::Result::SUBOPTIMAL_KHR) => Err(SquallError::OUT_OF_DATE),
                Err(vk::Result::ERROR_DEVICE_LOST) => Err(SquallError::DEVICE_LOST),
                Err(_) => Err(SquallError::PRESENT_FAILED),
            }
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.d_dev.wait_idle();
        self.destroy_swapchain();
        unsafe {
            self.d_surface_loader.destroy_surface(self.d_surface, None);
        }
    }
}
