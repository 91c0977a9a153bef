// Window system and overlay collaborator traits
//
// The renderer never talks to a window library directly. Whatever
// owns the window implements WindowSystem and hands it in during
// construction; after that, only the resize signal and framebuffer
// size flow back in through Squall::request_resize.

use ash::vk;

use crate::Result;

use std::ffi::CString;

/// The windowing collaborator.
pub trait WindowSystem {
    /// Instance extensions this window system needs, typically the
    /// surface extension plus a platform one.
    fn instance_extensions(&self) -> Result<Vec<CString>>;

    /// Mint a VkSurfaceKHR against `inst`. Ownership of the surface
    /// transfers to the renderer.
    fn create_surface(&self, entry: &ash::Entry, inst: &ash::Instance)
        -> Result<vk::SurfaceKHR>;

    /// Current framebuffer size in pixels. May be zero when the
    /// window is minimized.
    fn framebuffer_size(&self) -> (u32, u32);
}

/// The immediate mode UI collaborator.
///
/// Invoked inside the final dynamic rendering pass that targets the
/// swapchain image, after the draw image blit.
pub trait Overlay {
    fn record(&mut self, dev: &ash::Device, cbuf: vk::CommandBuffer, extent: vk::Extent2D);
}
