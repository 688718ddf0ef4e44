//! Vulkan context: instance, surface, physical device, logical device, and queues.

use ash::khr::{surface, swapchain};
use ash::{vk, Device, Entry, Instance};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::CStr;
use std::os::raw::c_char;

use super::{APP_NAME, ENGINE_NAME, ENGINE_VERSION, REQUIRED_VK_VERSION};
use crate::error::{RenderError, Result, VkResultExt, VkVersion};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Queue family indices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Graphics and present family, once both are known.
    pub fn pair(&self) -> Option<(u32, u32)> {
        Some((self.graphics?, self.present?))
    }
}

/// Core Vulkan objects shared by every other runtime part.
pub struct VulkanContext {
    pub entry: Entry,
    pub instance: Instance,
    pub surface: vk::SurfaceKHR,
    pub physical_device: vk::PhysicalDevice,
    pub device: Device,
    pub graphics_family: u32,
    pub present_family: u32,

    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,

    pub surface_loader: surface::Instance,
    pub swapchain_loader: swapchain::Device,

    pub device_properties: vk::PhysicalDeviceProperties,

    debug_messenger: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanContext {
    /// Create instance, surface and device for a native window.
    ///
    /// # Safety
    /// The window handles must be valid and outlive the context.
    pub unsafe fn new(
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
        enable_validation: bool,
    ) -> Result<Self> {
        let entry = Entry::linked();

        let api_version = entry
            .try_enumerate_instance_version()
            .context("vkEnumerateInstanceVersion")?
            .unwrap_or(vk::API_VERSION_1_0);
        check_instance_version(api_version)?;

        let instance = Self::create_instance(&entry, display_handle, enable_validation)?;
        let mut rollback = Rollback::default();
        rollback.push({
            let instance = instance.clone();
            move || unsafe { instance.destroy_instance(None) }
        });

        let debug_messenger = if enable_validation {
            match Self::setup_debug_messenger(&entry, &instance) {
                Ok(messenger) => Some(messenger),
                Err(err) => {
                    log::warn!("Validation requested but debug messenger unavailable: {err}");
                    None
                }
            }
        } else {
            None
        };
        if let Some((loader, messenger)) = &debug_messenger {
            let (loader, messenger) = (loader.clone(), *messenger);
            rollback.push(move || unsafe { loader.destroy_debug_utils_messenger(messenger, None) });
        }

        let surface_loader = surface::Instance::new(&entry, &instance);

        let surface = ash_window::create_surface(&entry, &instance, display_handle, window_handle, None)
            .map_err(|result| RenderError::Surface(format!("vkCreateSurfaceKHR failed: {result:?}")))?;
        rollback.push({
            let surface_loader = surface_loader.clone();
            move || unsafe { surface_loader.destroy_surface(surface, None) }
        });

        let (physical_device, families) =
            Self::pick_physical_device(&instance, &surface_loader, surface)?;
        let (graphics_family, present_family) = families.pair().ok_or(RenderError::NoSuitableDevice)?;

        let device_properties = instance.get_physical_device_properties(physical_device);

        let device = Self::create_logical_device(&instance, physical_device, graphics_family, present_family)?;
        // From here on `Drop` owns everything.
        rollback.disarm();

        let graphics_queue = device.get_device_queue(graphics_family, 0);
        let present_queue = device.get_device_queue(present_family, 0);

        let swapchain_loader = swapchain::Device::new(&instance, &device);

        Ok(Self {
            entry,
            instance,
            surface,
            physical_device,
            device,
            graphics_family,
            present_family,
            graphics_queue,
            present_queue,
            surface_loader,
            swapchain_loader,
            device_properties,
            debug_messenger,
        })
    }

    /// Create Vulkan instance with the window system's surface extensions.
    unsafe fn create_instance(
        entry: &Entry,
        display_handle: RawDisplayHandle,
        enable_validation: bool,
    ) -> Result<Instance> {
        let app_info = vk::ApplicationInfo::default()
            .application_name(APP_NAME)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(ENGINE_NAME)
            .engine_version(ENGINE_VERSION)
            .api_version(REQUIRED_VK_VERSION);

        let mut extensions = ash_window::enumerate_required_extensions(display_handle)
            .context("vkEnumerateInstanceExtensionProperties")?
            .to_vec();

        if enable_validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let layer_name_ptrs: Vec<*const c_char> = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_name_ptrs);

        entry.create_instance(&create_info, None).context("vkCreateInstance")
    }

    /// Route validation messages into `log`.
    unsafe fn setup_debug_messenger(
        entry: &Entry,
        instance: &Instance,
    ) -> Result<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = debug_utils
            .create_debug_utils_messenger(&create_info, None)
            .context("vkCreateDebugUtilsMessengerEXT")?;

        Ok((debug_utils, messenger))
    }

    /// Select the best physical device that can present to `surface`.
    unsafe fn pick_physical_device(
        instance: &Instance,
        surface_loader: &surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> Result<(vk::PhysicalDevice, QueueFamilyIndices)> {
        let devices = instance
            .enumerate_physical_devices()
            .context("vkEnumeratePhysicalDevices")?;

        let best = devices
            .iter()
            .filter_map(|&device| {
                let families = Self::find_queue_families(instance, device, surface_loader, surface);
                if !families.is_complete() || !Self::supports_swapchain(instance, device) {
                    return None;
                }
                let props = instance.get_physical_device_properties(device);
                let memory_props = instance.get_physical_device_memory_properties(device);
                let local_bytes: u64 = memory_props.memory_heaps[..memory_props.memory_heap_count as usize]
                    .iter()
                    .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
                    .map(|heap| heap.size)
                    .sum();
                Some((device, families, score_device(props.device_type, local_bytes)))
            })
            .max_by_key(|&(_, _, score)| score);

        let (physical_device, families, _) = best.ok_or(RenderError::NoSuitableDevice)?;

        let props = instance.get_physical_device_properties(physical_device);
        let name = CStr::from_ptr(props.device_name.as_ptr()).to_string_lossy();
        log::info!(
            "Selected GPU: {} (Vulkan {}.{}.{})",
            name,
            vk::api_version_major(props.api_version),
            vk::api_version_minor(props.api_version),
            vk::api_version_patch(props.api_version)
        );

        Ok((physical_device, families))
    }

    unsafe fn supports_swapchain(instance: &Instance, device: vk::PhysicalDevice) -> bool {
        instance
            .enumerate_device_extension_properties(device)
            .map(|extensions| {
                extensions
                    .iter()
                    .any(|e| CStr::from_ptr(e.extension_name.as_ptr()) == swapchain::NAME)
            })
            .unwrap_or(false)
    }

    /// Find queue family indices for a physical device.
    unsafe fn find_queue_families(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface_loader: &surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> QueueFamilyIndices {
        let queue_families = instance.get_physical_device_queue_family_properties(device);

        let mut indices = QueueFamilyIndices::default();

        for (i, family) in queue_families.iter().enumerate() {
            let i = i as u32;
            let graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
            let present = surface_loader
                .get_physical_device_surface_support(device, i, surface)
                .unwrap_or(false);

            // A family doing both wins.
            if graphics && present {
                return QueueFamilyIndices {
                    graphics: Some(i),
                    present: Some(i),
                };
            }
            if graphics && indices.graphics.is_none() {
                indices.graphics = Some(i);
            }
            if present && indices.present.is_none() {
                indices.present = Some(i);
            }
        }

        indices
    }

    unsafe fn create_logical_device(
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        graphics_family: u32,
        present_family: u32,
    ) -> Result<Device> {
        let mut unique_families = vec![graphics_family];
        if present_family != graphics_family {
            unique_families.push(present_family);
        }

        let queue_priorities = [1.0f32];
        let queue_create_infos: Vec<_> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        let extensions: [*const c_char; 1] = [swapchain::NAME.as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        instance
            .create_device(physical_device, &create_info, None)
            .context("vkCreateDevice")
    }

    /// Wait for all device operations to complete.
    pub fn wait_idle(&self) {
        // SAFETY: the device is alive for the lifetime of the context.
        unsafe {
            if let Err(result) = self.device.device_wait_idle() {
                log::warn!("vkDeviceWaitIdle failed: {result:?}");
            }
        }
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        // SAFETY: every child object was destroyed by the runtime before the
        // context is dropped.
        unsafe {
            self.wait_idle();
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);

            if let Some((loader, messenger)) = self.debug_messenger.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

/// Fails when the loader is older than the runtime needs.
pub fn check_instance_version(api_version: u32) -> Result<()> {
    if api_version < REQUIRED_VK_VERSION {
        return Err(RenderError::UnsupportedVersion {
            required: VkVersion(REQUIRED_VK_VERSION),
            found: VkVersion(api_version),
        });
    }
    Ok(())
}

/// Destroys partially created setup objects, newest first, unless disarmed.
#[derive(Default)]
struct Rollback {
    steps: Vec<Box<dyn FnOnce()>>,
}

impl Rollback {
    fn push(&mut self, step: impl FnOnce() + 'static) {
        self.steps.push(Box::new(step));
    }

    fn disarm(&mut self) {
        self.steps.clear();
    }
}

impl Drop for Rollback {
    fn drop(&mut self) {
        while let Some(step) = self.steps.pop() {
            step();
        }
    }
}

/// Rank a device: discrete beats integrated, then more local memory wins.
pub fn score_device(device_type: vk::PhysicalDeviceType, local_memory_bytes: u64) -> u64 {
    let type_score = match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 10_000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1_000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 100,
        _ => 1,
    };
    type_score + local_memory_bytes / (1024 * 1024)
}

/// Debug callback for validation layers.
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _ty: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*data).p_message).to_string_lossy();

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("[vulkan] {message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::warn!("[vulkan] {message}");
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_families_complete() {
        let mut families = QueueFamilyIndices::default();
        assert!(!families.is_complete());
        assert_eq!(families.pair(), None);

        families.graphics = Some(0);
        assert!(!families.is_complete());

        families.present = Some(2);
        assert!(families.is_complete());
        assert_eq!(families.pair(), Some((0, 2)));
    }

    #[test]
    fn test_discrete_beats_integrated() {
        let gib = 1024 * 1024 * 1024;
        let discrete = score_device(vk::PhysicalDeviceType::DISCRETE_GPU, 2 * gib);
        let integrated = score_device(vk::PhysicalDeviceType::INTEGRATED_GPU, 8 * gib);
        assert!(discrete > integrated);
    }

    #[test]
    fn test_memory_breaks_ties() {
        let small = score_device(vk::PhysicalDeviceType::DISCRETE_GPU, 1024 * 1024 * 1024);
        let large = score_device(vk::PhysicalDeviceType::DISCRETE_GPU, 4 * 1024 * 1024 * 1024);
        assert!(large > small);
        assert_eq!(small, 10_000 + 1024);
    }

    #[test]
    fn test_cpu_device_still_ranked() {
        assert_eq!(score_device(vk::PhysicalDeviceType::CPU, 0), 1);
    }

    // ==== setup ====

    #[test]
    fn test_old_loader_rejected() {
        assert!(check_instance_version(vk::API_VERSION_1_1).is_ok());
        assert!(check_instance_version(vk::API_VERSION_1_3).is_ok());
        match check_instance_version(vk::API_VERSION_1_0) {
            Err(RenderError::UnsupportedVersion { required, found }) => {
                assert_eq!(required, VkVersion(REQUIRED_VK_VERSION));
                assert_eq!(found, VkVersion(vk::API_VERSION_1_0));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_rollback_destroys_newest_first() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let destroyed = Rc::new(RefCell::new(Vec::new()));
        {
            let mut rollback = Rollback::default();
            for name in ["instance", "messenger", "surface"] {
                let destroyed = Rc::clone(&destroyed);
                rollback.push(move || destroyed.borrow_mut().push(name));
            }
        }
        assert_eq!(*destroyed.borrow(), vec!["surface", "messenger", "instance"]);
    }

    #[test]
    fn test_disarmed_rollback_keeps_objects() {
        use std::cell::Cell;
        use std::rc::Rc;

        let destroyed = Rc::new(Cell::new(0));
        {
            let mut rollback = Rollback::default();
            let counter = Rc::clone(&destroyed);
            rollback.push(move || counter.set(counter.get() + 1));
            rollback.disarm();
        }
        assert_eq!(destroyed.get(), 0);
    }
}
