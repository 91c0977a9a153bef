// Vulkan rendering instance
//
// This holds the common instance level state: the entry loader, the
// instance itself, and the debug reporting hookup.

use ash::extensions::ext;
use ash::{vk, Entry};

use crate::window::WindowSystem;
use crate::{CreateInfo, Result, SquallError};

use std::ffi::{CStr, CString};
use std::os::raw::c_void;

// this happy little debug callback prints any errors/warnings the
// validation layers throw at us
unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_types: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> u32 {
    let msg = CStr::from_ptr(p_callback_data.as_ref().unwrap().p_message);

    if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("[VK][{:?}] {:?}", message_types, msg);
    } else {
        log::debug!("[VK][{:?}][{:?}] {:?}", message_severity, message_types, msg);
    }

    vk::FALSE
}

/// A Vulkan Instance
///
/// This is our basic vulkan session. Devices and surfaces are created
/// from this, and it must outlive both of them.
pub struct Instance {
    /// debug callback sugar mentioned earlier
    debug: Option<(ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,

    /// the entry just loads function pointers from the dynamic library
    pub(crate) loader: Entry,
    /// the big vulkan instance.
    pub(crate) inst: ash::Instance,
}

impl Instance {
    /// Creates a new debug reporter and registers our function
    /// for debug callbacks so we get nice error messages
    fn setup_debug(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
            )
            .pfn_user_callback(Some(vulkan_debug_callback));

        let dr_loader = ext::DebugUtils::new(entry, instance);
        let callback = unsafe {
            dr_loader
                .create_debug_utils_messenger(&debug_info, None)
                .or(Err(SquallError::INVALID))?
        };
        Ok((dr_loader, callback))
    }

    /// Create a vkInstance
    ///
    /// The instance extension list comes from the window system
    /// collaborator, since it knows what platform surface extension
    /// it needs. We only ever add debug utils on top of that.
    pub fn new(info: &CreateInfo, win: &dyn WindowSystem) -> Result<Self> {
        let entry = Entry::linked();
        let app_name = CString::new(info.app_name.as_str()).or(Err(SquallError::INVALID))?;

        let layer_names: Vec<CString> = if info.enable_validation {
            vec![CString::new("VK_LAYER_KHRONOS_validation").unwrap()]
        } else {
            Vec::new()
        };
        let layer_names_raw: Vec<*const i8> = layer_names
            .iter()
            .map(|raw_name: &CString| raw_name.as_ptr())
            .collect();

        let ext_names = win.instance_extensions()?;
        let mut extension_names_raw: Vec<*const i8> =
            ext_names.iter().map(|n| n.as_ptr()).collect();
        if info.enable_validation {
            extension_names_raw.push(ext::DebugUtils::name().as_ptr());
        }

        let appinfo = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(0)
            .engine_name(&app_name)
            .engine_version(0)
            .api_version(vk::API_VERSION_1_3)
            .build();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&appinfo)
            .enabled_layer_names(&layer_names_raw)
            .enabled_extension_names(&extension_names_raw)
            .build();

        let instance: ash::Instance = unsafe {
            entry
                .create_instance(&create_info, None)
                .or(Err(SquallError::NO_SUITABLE_DEVICE))?
        };

        let debug = if info.enable_validation {
            Some(Self::setup_debug(&entry, &instance)?)
        } else {
            None
        };

        Ok(Self {
            loader: entry,
            inst: instance,
            debug: debug,
        })
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let Some((loader, callback)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(callback, None);
            }
            self.inst.destroy_instance(None);
        }
    }
}
