//! Vulkan instance creation, including validation layers and the debug messenger.

use crate::gfx::consts::{EXTENSION_VALIDATION_LAYER, PORTABILITY_MACOS_VERSION, VALIDATION_ENABLED};
use crate::gfx::debug::logging::messenger_info;
use crate::gfx::error::GfxError;
use anyhow::{Result, anyhow};
use log::{debug, info};
use std::collections::HashSet;
use std::ffi::c_char;
use vulkanalia::vk::{EntryV1_0, ExtDebugUtilsExtension, Handle, HasBuilder, InstanceV1_0};
use vulkanalia::{Entry, Instance, vk, window as vk_window};
use winit::window::Window;

struct InstanceConfig {
    extensions: Vec<*const c_char>,
    flags: vk::InstanceCreateFlags,
    layers: Vec<*const c_char>,
}

unsafe fn instance_config(window: &Window, entry: &Entry) -> Result<InstanceConfig> {
    let mut extensions = vk_window::get_required_instance_extensions(window)
        .iter()
        .map(|e| e.as_ptr())
        .collect::<Vec<_>>();

    let available_layers = unsafe {
        entry
            .enumerate_instance_layer_properties()?
            .iter()
            .map(|l| l.layer_name)
            .collect::<HashSet<_>>()
    };

    if VALIDATION_ENABLED && !available_layers.contains(&EXTENSION_VALIDATION_LAYER) {
        return Err(anyhow!(GfxError::MissingValidationLayer));
    }

    let layers = if VALIDATION_ENABLED {
        extensions.push(vk::EXT_DEBUG_UTILS_EXTENSION.name.as_ptr());
        vec![EXTENSION_VALIDATION_LAYER.as_ptr()]
    } else {
        Vec::new()
    };

    let flags = if cfg!(target_os = "macos") && entry.version()? >= PORTABILITY_MACOS_VERSION {
        info!("Enabling extensions for macOS portability.");
        extensions.push(vk::KHR_GET_PHYSICAL_DEVICE_PROPERTIES2_EXTENSION.name.as_ptr());
        extensions.push(vk::KHR_PORTABILITY_ENUMERATION_EXTENSION.name.as_ptr());
        vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR
    } else {
        vk::InstanceCreateFlags::empty()
    };

    Ok(InstanceConfig {
        extensions,
        flags,
        layers,
    })
}

/// Creates the instance and, when validation is on, its debug messenger.
/// The messenger is null otherwise.
pub unsafe fn create_instance(
    window: &Window,
    entry: &Entry,
    title: &str,
) -> Result<(Instance, vk::DebugUtilsMessengerEXT)> {
    unsafe {
        let application_name = format!("{title}\0");
        let application_info = vk::ApplicationInfo::builder()
            .application_name(application_name.as_bytes())
            .application_version(vk::make_version(0, 1, 0))
            .engine_name(b"vkviewer\0")
            .engine_version(vk::make_version(0, 1, 0))
            .api_version(vk::make_version(1, 0, 0));

        let config = instance_config(window, entry)?;

        let mut info = vk::InstanceCreateInfo::builder()
            .application_info(&application_info)
            .enabled_layer_names(&config.layers)
            .enabled_extension_names(&config.extensions)
            .flags(config.flags);

        // Chained so that instance creation and destruction are covered too.
        let mut debug_info = messenger_info();
        if VALIDATION_ENABLED {
            debug!("Vulkan validation layers are enabled.");
            info = info.push_next(&mut debug_info);
        }

        let instance = entry.create_instance(&info, None)?;

        let messenger = if VALIDATION_ENABLED {
            match instance.create_debug_utils_messenger_ext(&messenger_info(), None) {
                Ok(messenger) => messenger,
                Err(e) => {
                    instance.destroy_instance(None);
                    return Err(e.into());
                }
            }
        } else {
            vk::DebugUtilsMessengerEXT::null()
        };

        Ok((instance, messenger))
    }
}
