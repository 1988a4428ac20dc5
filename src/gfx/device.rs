//! Physical device selection and logical device creation.

use crate::gfx::consts::{
    EXTENSION_VALIDATION_LAYER, PORTABILITY_MACOS_VERSION, REQUIRED_DEVICE_EXTENSIONS,
    VALIDATION_ENABLED,
};
use crate::gfx::error::{GfxError, SuitabilityError};
use crate::gfx::queuefamily::QueueFamilyIndices;
use crate::gfx::swapchain::SwapchainSupport;
use anyhow::{Result, anyhow};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::ffi::c_char;
use vulkanalia::vk::{DeviceV1_0, HasBuilder, InstanceV1_0};
use vulkanalia::{Device, Entry, Instance, vk};

/// Everything tied to the chosen GPU. Fixed for the lifetime of the renderer.
#[derive(Clone, Debug)]
pub struct DeviceContext {
    pub physical_device: vk::PhysicalDevice,
    pub device: Device,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub indices: QueueFamilyIndices,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub anisotropy: bool,
}

impl DeviceContext {
    pub unsafe fn new(entry: &Entry, instance: &Instance, surface: vk::SurfaceKHR) -> Result<Self> {
        unsafe {
            let (physical_device, indices) = pick_physical_device(instance, surface)?;
            let features = instance.get_physical_device_features(physical_device);
            let anisotropy = features.sampler_anisotropy == vk::TRUE;

            let device = create_logical_device(entry, instance, physical_device, indices, anisotropy)?;
            let graphics_queue = device.get_device_queue(indices.graphics, 0);
            let present_queue = device.get_device_queue(indices.present, 0);
            let memory_properties = instance.get_physical_device_memory_properties(physical_device);

            Ok(Self {
                physical_device,
                device,
                graphics_queue,
                present_queue,
                indices,
                memory_properties,
                anisotropy,
            })
        }
    }

    /// Destroys the logical device. Everything created from it must be gone already.
    pub unsafe fn destroy(&mut self) {
        unsafe { self.device.destroy_device(None) }
    }
}

unsafe fn check_physical_device(
    instance: &Instance,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
) -> Result<QueueFamilyIndices> {
    unsafe {
        let indices = QueueFamilyIndices::get(instance, surface, physical_device)?;

        check_physical_device_extensions(instance, physical_device)?;

        let support = SwapchainSupport::get(instance, surface, physical_device)?;
        if support.formats.is_empty() || support.present_modes.is_empty() {
            return Err(anyhow!(SuitabilityError("swapchain support")));
        }

        Ok(indices)
    }
}

unsafe fn check_physical_device_extensions(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<()> {
    let extensions = unsafe {
        instance
            .enumerate_device_extension_properties(physical_device, None)?
            .iter()
            .map(|e| e.extension_name)
            .collect::<HashSet<_>>()
    };

    if REQUIRED_DEVICE_EXTENSIONS.iter().all(|e| extensions.contains(e)) {
        Ok(())
    } else {
        Err(anyhow!(SuitabilityError("required device extensions")))
    }
}

/// Picks the first device that passes every check; no scoring.
unsafe fn pick_physical_device(
    instance: &Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, QueueFamilyIndices)> {
    unsafe {
        let physical_devices = instance.enumerate_physical_devices()?;
        if physical_devices.is_empty() {
            return Err(anyhow!(GfxError::NoSuitableDevice));
        }

        for physical_device in physical_devices {
            let properties = instance.get_physical_device_properties(physical_device);

            match check_physical_device(instance, surface, physical_device) {
                Ok(indices) => {
                    info!("Selected physical device (`{}`).", properties.device_name);
                    debug!("Queue families: {indices:?}");
                    return Ok((physical_device, indices));
                }
                Err(error) => warn!(
                    "Skipping physical device (`{}`): {}",
                    properties.device_name, error
                ),
            }
        }
    }

    Err(anyhow!(GfxError::NoCompleteQueueFamilies))
}

unsafe fn create_logical_device(
    entry: &Entry,
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
    indices: QueueFamilyIndices,
    anisotropy: bool,
) -> Result<Device> {
    let unique_families = HashSet::from([indices.graphics, indices.present]);

    let queue_priorities = &[1.0];
    let queue_infos = unique_families
        .iter()
        .map(|i| {
            vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(*i)
                .queue_priorities(queue_priorities)
        })
        .collect::<Vec<_>>();

    let layers: Vec<*const c_char> = if VALIDATION_ENABLED {
        vec![EXTENSION_VALIDATION_LAYER.as_ptr()]
    } else {
        Vec::new()
    };

    let mut extensions = REQUIRED_DEVICE_EXTENSIONS
        .iter()
        .map(|n| n.as_ptr())
        .collect::<Vec<_>>();

    // Required by Vulkan SDK on macOS since 1.3.216.
    if cfg!(target_os = "macos") && entry.version()? >= PORTABILITY_MACOS_VERSION {
        extensions.push(vk::KHR_PORTABILITY_SUBSET_EXTENSION.name.as_ptr());
    }

    let features = vk::PhysicalDeviceFeatures::builder().sampler_anisotropy(anisotropy);

    let info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_infos)
        .enabled_layer_names(&layers)
        .enabled_extension_names(&extensions)
        .enabled_features(&features);

    Ok(unsafe { instance.create_device(physical_device, &info, None)? })
}
