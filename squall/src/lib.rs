// The Squall renderer
//
// A Vulkan frame graph and GPU resource lifecycle core. It drives a
// double buffered render loop over a swapchain, records command
// streams for a loaded scene, and pushes mesh/image data to the GPU
// through a transient staging path.

mod barrier;
mod deletion;
mod descriptor;
mod device;
mod error;
mod frame;
mod instance;
mod material;
mod pipeline;
mod renderer;
mod resource;
mod scene;
mod swapchain;
mod window;

#[cfg(feature = "sdl")]
mod sdl;

#[cfg(test)]
mod tests;

pub use error::{Result, SquallError};
pub use material::{FilterMode, MaterialConstants, MaterialPass, MipmapMode, SamplerDesc};
pub use renderer::{CameraInfo, EngineStats, GpuSceneData, Renderer};
pub use scene::{
    Bounds, DrawContext, MaterialData, MaterialId, MeshData, NodeData, NodeId, NodeTransform,
    PointLight, RenderObject, Scene, SceneData, SurfaceData, TextureData, Vertex,
};
pub use window::{Overlay, WindowSystem};

#[cfg(feature = "sdl")]
pub use sdl::SdlWindowSystem;

/// Preferred presentation mode for the swapchain.
///
/// Mailbox is used when the surface supports it, otherwise we always
/// fall back to FIFO, which is guaranteed to exist.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PresentPreference {
    Mailbox,
    Fifo,
}

/// Parameters for constructing a Squall context.
///
/// These are the recognized knobs. Everything else about the device
/// is decided by the renderer itself.
#[derive(Clone, Debug)]
pub struct CreateInfo {
    pub app_name: String,
    pub enable_validation: bool,
    pub enable_synchronization2: bool,
    pub enable_dynamic_rendering: bool,
    pub preferred_present_mode: PresentPreference,
    pub max_frames_in_flight: usize,
}

impl CreateInfo {
    pub fn builder() -> CreateInfoBuilder {
        CreateInfoBuilder {
            ci: CreateInfo::default(),
        }
    }
}

impl Default for CreateInfo {
    fn default() -> Self {
        Self {
            app_name: "squall".to_string(),
            enable_validation: cfg!(debug_assertions),
            enable_synchronization2: true,
            enable_dynamic_rendering: true,
            preferred_present_mode: PresentPreference::Mailbox,
            max_frames_in_flight: 2,
        }
    }
}

pub struct CreateInfoBuilder {
    ci: CreateInfo,
}

impl CreateInfoBuilder {
    pub fn app_name(mut self, name: &str) -> Self {
        self.ci.app_name = name.to_string();
        self
    }

    pub fn enable_validation(mut self, enable: bool) -> Self {
        self.ci.enable_validation = enable;
        self
    }

    pub fn enable_synchronization2(mut self, enable: bool) -> Self {
        self.ci.enable_synchronization2 = enable;
        self
    }

    pub fn enable_dynamic_rendering(mut self, enable: bool) -> Self {
        self.ci.enable_dynamic_rendering = enable;
        self
    }

    pub fn preferred_present_mode(mut self, mode: PresentPreference) -> Self {
        self.ci.preferred_present_mode = mode;
        self
    }

    pub fn max_frames_in_flight(mut self, frames: usize) -> Self {
        self.ci.max_frames_in_flight = frames;
        self
    }

    pub fn build(self) -> CreateInfo {
        self.ci
    }
}

/// The public facing context.
///
/// This is a thin wrapper around the Renderer, which holds all of the
/// vulkan state. The window system collaborator is only needed during
/// construction, to mint a surface and report the initial size.
pub struct Squall {
    sq_rend: Renderer,
}

impl Squall {
    pub fn new(info: &CreateInfo, win: &dyn WindowSystem) -> Result<Self> {
        Ok(Self {
            sq_rend: Renderer::new(info, win)?,
        })
    }

    /// Turn loader output into a live scene with GPU resources.
    pub fn load_scene(&mut self, data: &SceneData) -> Result<Scene> {
        self.sq_rend.load_scene(data)
    }

    /// Draw and present one frame.
    ///
    /// Transient swapchain conditions are handled internally by
    /// skipping the frame and scheduling a recreate; only fatal
    /// errors are returned.
    pub fn draw_frame(
        &mut self,
        scene: &mut Scene,
        camera: &CameraInfo,
        overlay: Option<&mut dyn Overlay>,
    ) -> Result<()> {
        self.sq_rend.draw_frame(scene, camera, overlay)
    }

    /// Signal that the framebuffer was resized.
    ///
    /// This is the sticky resize flag described by the window system
    /// contract. The driver clears it when it recreates the swapchain
    /// at the top of the next frame. A zero size parks the driver.
    pub fn request_resize(&mut self, size: (u32, u32)) {
        self.sq_rend.request_resize(size);
    }

    /// Select the compute background effect by index.
    pub fn set_background_effect(&mut self, index: usize) {
        self.sq_rend.set_background_effect(index);
    }

    pub fn background_effect_count(&self) -> usize {
        self.sq_rend.background_effect_count()
    }

    pub fn stats(&self) -> EngineStats {
        self.sq_rend.stats()
    }
}
