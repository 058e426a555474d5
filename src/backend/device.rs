// Vulkan device bootstrap - instance, surface, queue, logical device
//
// Responsibilities:
// - Instance creation with the window system's required extensions
// - Validation layer + debug messenger wiring (optional)
// - Physical device and queue family selection
// - Logical device, queue, command pool, memory property table

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::{c_char, c_void, CStr, CString};

/// Shared device context every GPU resource is created against.
///
/// Owns the instance, surface, logical device, the single graphics+present
/// queue and the command pool. Created once at startup, dropped at exit.
pub struct DeviceContext {
    pub queue: vk::Queue,
    pub queue_family_index: u32,
    pub command_pool: vk::CommandPool,
    pub device: ash::Device,
    pub swapchain_loader: ash::khr::swapchain::Device,

    pub surface: vk::SurfaceKHR,
    pub surface_loader: ash::khr::surface::Instance,
    pub surface_format: vk::SurfaceFormatKHR,

    pub physical_device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,

    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    pub instance: ash::Instance,
    _entry: ash::Entry,
}

impl DeviceContext {
    /// Bring up the full device context against a window.
    pub fn new<W>(window: &W, app_name: &str, enable_validation: bool) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        log::info!("Creating Vulkan device context: {}", app_name);

        let entry = unsafe { ash::Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        let display_handle = window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();
        let window_handle = window
            .window_handle()
            .context("Failed to get window handle")?
            .as_raw();

        let instance = Self::create_instance(&entry, app_name, display_handle, enable_validation)?;

        let debug_utils = if enable_validation {
            Some(Self::create_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        let surface = unsafe {
            ash_window::create_surface(&entry, &instance, display_handle, window_handle, None)
        }
        .context("Failed to create window surface")?;
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

        // First enumerated device, no scoring
        let physical_device = Self::pick_physical_device(&instance)?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        let queue_family_index =
            Self::find_queue_family(&instance, physical_device, &surface_loader, surface)?;
        log::info!("Using queue family {}", queue_family_index);

        let device = Self::create_logical_device(&instance, physical_device, queue_family_index)?;
        let queue = unsafe { device.get_device_queue(queue_family_index, 0) };

        let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);

        let surface_format = Self::query_surface_format(&surface_loader, physical_device, surface)?;
        log::info!("Surface format: {:?}", surface_format.format);

        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        Ok(Self {
            queue,
            queue_family_index,
            command_pool,
            device,
            swapchain_loader,
            surface,
            surface_loader,
            surface_format,
            physical_device,
            properties,
            memory_properties,
            debug_utils,
            instance,
            _entry: entry,
        })
    }

    fn create_instance(
        entry: &ash::Entry,
        app_name: &str,
        display_handle: raw_window_handle::RawDisplayHandle,
        enable_validation: bool,
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name)?;

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&app_name_cstr)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_0);

        // Presentation extensions for this platform, plus debug utils when validating
        let mut extensions: Vec<*const c_char> =
            ash_window::enumerate_required_extensions(display_handle)
                .context("Failed to query required surface extensions")?
                .to_vec();
        if enable_validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let mut layers: Vec<*const c_char> = Vec::new();
        if enable_validation {
            let wanted = c"VK_LAYER_KHRONOS_validation";
            let available = unsafe { entry.enumerate_instance_layer_properties() }
                .context("Failed to enumerate instance layers")?;
            let found = available
                .iter()
                .any(|props| unsafe { CStr::from_ptr(props.layer_name.as_ptr()) } == wanted);
            if found {
                layers.push(wanted.as_ptr());
            } else {
                log::warn!("Validation requested but VK_LAYER_KHRONOS_validation is unavailable");
            }
        }

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        Ok(instance)
    }

    fn create_debug_messenger(
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to create debug messenger")?;

        Ok((debug_utils, messenger))
    }

    fn pick_physical_device(instance: &ash::Instance) -> Result<vk::PhysicalDevice> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .context("Failed to enumerate physical devices")?;
        log::info!("Found {} GPU(s)", devices.len());

        devices
            .first()
            .copied()
            .context("No Vulkan-capable GPU found")
    }

    /// First queue family that supports both graphics and presenting to the surface.
    fn find_queue_family(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        surface_loader: &ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> Result<u32> {
        let families =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

        for (index, family) in families.iter().enumerate() {
            let supports_graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
            let supports_present = unsafe {
                surface_loader.get_physical_device_surface_support(
                    physical_device,
                    index as u32,
                    surface,
                )
            }
            .unwrap_or(false);

            if supports_graphics && supports_present {
                return Ok(index as u32);
            }
        }

        anyhow::bail!("No queue family supports both graphics and presentation")
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
    ) -> Result<ash::Device> {
        // The swapchain extension is non-negotiable for a presenting device
        let available = unsafe { instance.enumerate_device_extension_properties(physical_device) }
            .context("Failed to enumerate device extensions")?;
        let has_swapchain = available.iter().any(|props| {
            let name = unsafe { CStr::from_ptr(props.extension_name.as_ptr()) };
            name == ash::khr::swapchain::NAME
        });
        anyhow::ensure!(has_swapchain, "Device does not support the swapchain extension");

        let queue_priorities = [1.0f32];
        let queue_create_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family_index)
            .queue_priorities(&queue_priorities);

        let extensions = [ash::khr::swapchain::NAME.as_ptr()];

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_extension_names(&extensions);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")?;

        Ok(device)
    }

    fn query_surface_format(
        surface_loader: &ash::khr::surface::Instance,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<vk::SurfaceFormatKHR> {
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)
        }
        .context("Failed to query surface formats")?;

        // First reported format, same policy as device selection
        formats.first().copied().context("Surface reports no formats")
    }

    /// Memory type index satisfying `type_bits` and `flags`, if any.
    pub fn memory_type_index(
        &self,
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    ) -> Option<u32> {
        find_memory_type(&self.memory_properties, type_bits, flags)
    }

    /// Wait for the device to drain all submitted work.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device context...");
        let _ = self.wait_idle();

        unsafe {
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Lowest memory type index whose bit is set in `type_bits` and whose
/// property flags are a superset of `required`. `None` means the device has
/// no usable memory type for the request; callers treat that as fatal.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..memory_properties.memory_type_count).find(|&i| {
        let has_type = type_bits & (1 << i) != 0;
        let has_properties = memory_properties.memory_types[i as usize]
            .property_flags
            .contains(required);
        has_type && has_properties
    })
}

// Forwards validation messages into the log without aborting
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[vulkan {:?}] {}", message_type, message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[vulkan {:?}] {}", message_type, message.to_string_lossy());
        }
        _ => {
            log::debug!("[vulkan {:?}] {}", message_type, message.to_string_lossy());
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties_with(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (i, &f) in flags.iter().enumerate() {
            props.memory_types[i].property_flags = f;
        }
        props
    }

    #[test]
    fn selects_lowest_matching_index() {
        let props = properties_with(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);

        let index = find_memory_type(&props, 0b111, vk::MemoryPropertyFlags::HOST_VISIBLE);
        assert_eq!(index, Some(1));
    }

    #[test]
    fn respects_type_bitmask() {
        let props = properties_with(&[
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        ]);

        // Type 0 matches the flags but is excluded by the mask
        let index = find_memory_type(&props, 0b10, vk::MemoryPropertyFlags::HOST_VISIBLE);
        assert_eq!(index, Some(1));
    }

    #[test]
    fn requires_flag_superset() {
        let props = properties_with(&[
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);

        let index = find_memory_type(
            &props,
            0b11,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        );
        assert_eq!(index, Some(1));
    }

    #[test]
    fn returns_none_when_nothing_qualifies() {
        let props = properties_with(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        ]);

        let index = find_memory_type(&props, 0b01, vk::MemoryPropertyFlags::HOST_VISIBLE);
        assert_eq!(index, None);

        let index = find_memory_type(&props, 0, vk::MemoryPropertyFlags::HOST_VISIBLE);
        assert_eq!(index, None);
    }

    #[test]
    fn device_local_request_skips_host_types() {
        let props = properties_with(&[
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);

        let index = find_memory_type(&props, 0b11, vk::MemoryPropertyFlags::DEVICE_LOCAL);
        assert_eq!(index, Some(1));
    }
}
