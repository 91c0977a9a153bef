// SDL2 backend for generic window system controls
//
// SDL is the general purpose glue backend: it should work most
// places, which is exactly what we want from the demo path.

use ash::vk;

use crate::window::WindowSystem;
use crate::{Result, SquallError};

use std::ffi::CString;

/// A WindowSystem over an sdl2 window.
///
/// Borrows the window; it is only needed while the Squall context is
/// being constructed.
pub struct SdlWindowSystem<'a> {
    sdl_window: &'a sdl2::video::Window,
}

impl<'a> SdlWindowSystem<'a> {
    pub fn new(window: &'a sdl2::video::Window) -> Self {
        Self { sdl_window: window }
    }
}

impl<'a> WindowSystem for SdlWindowSystem<'a> {
    fn instance_extensions(&self) -> Result<Vec<CString>> {
        let names = self.sdl_window.vulkan_instance_extensions().map_err(|e| {
            log::error!("SDL2 vulkan_instance_extensions failed: {}", e);
            SquallError::COULD_NOT_CREATE_SURFACE
        })?;

        names
            .into_iter()
            .map(|n| CString::new(n).or(Err(SquallError::COULD_NOT_CREATE_SURFACE)))
            .collect()
    }

    fn create_surface(
        &self,
        _entry: &ash::Entry,
        inst: &ash::Instance,
    ) -> Result<vk::SurfaceKHR> {
        use vk::Handle;

        // we need to convert our ash instance into the raw vk
        // instance pointer sdl expects
        let raw_surf = self
            .sdl_window
            .vulkan_create_surface(inst.handle().as_raw() as usize)
            .map_err(|e| {
                log::error!("SDL2 vulkan_create_surface failed: {}", e);
                SquallError::COULD_NOT_CREATE_SURFACE
            })?;

        Ok(vk::SurfaceKHR::from_raw(raw_surf))
    }

    fn framebuffer_size(&self) -> (u32, u32) {
        self.sdl_window.vulkan_drawable_size()
    }
}
