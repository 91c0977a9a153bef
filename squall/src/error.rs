// Squall error types
//
// Every fallible component returns one of these. The frame driver is
// the only place that classifies them: OUT_OF_DATE is recovered by
// scheduling a swapchain recreate, everything else is fatal.

#![allow(non_camel_case_types)]
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SquallError>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum SquallError {
    #[error("No suitable GPU was found")]
    NO_SUITABLE_DEVICE,
    #[error("A required Vulkan feature or extension is missing")]
    VK_NOT_ALL_FEATURES_AVAILABLE,
    #[error("Could not find a queue family for this surface")]
    VK_SURF_NOT_SUPPORTED,
    #[error("Could not create a window system surface")]
    COULD_NOT_CREATE_SURFACE,
    #[error("Could not create a swapchain")]
    COULD_NOT_CREATE_SWAPCHAIN,
    #[error("Could not create an image")]
    COULD_NOT_CREATE_IMAGE,
    #[error("Could not create a buffer")]
    COULD_NOT_CREATE_BUFFER,
    #[error("Could not allocate device memory")]
    OUT_OF_MEMORY,
    #[error("No supported surface format was found")]
    INVALID_FORMAT,
    #[error("Format does not support the requested operation")]
    FORMAT_NOT_SUPPORTED,
    #[error("Image format does not support linear blitting")]
    BLIT_NOT_SUPPORTED,
    #[error("The swapchain is out of date and must be recreated")]
    OUT_OF_DATE,
    #[error("Could not acquire the next swapchain image")]
    COULD_NOT_ACQUIRE_NEXT_IMAGE,
    #[error("Presentation failed")]
    PRESENT_FAILED,
    #[error("The device was lost")]
    DEVICE_LOST,
    #[error("Timed out waiting for the GPU")]
    TIMEOUT,
    #[error("Could not load a shader module")]
    COULD_NOT_LOAD_SHADER,
    #[error("Could not create a pipeline")]
    COULD_NOT_CREATE_PIPELINE,
    #[error("Could not allocate a descriptor set")]
    COULD_NOT_ALLOCATE_DESCRIPTOR,
    #[error("No handler for this image layout transition")]
    INVALID_TRANSITION,
    #[error("Recording this command failed")]
    RECORDING_FAILED,
    #[error("The provided scene data is malformed")]
    INVALID_SCENE_DATA,
    #[error("An invalid argument was provided")]
    INVALID,
}
