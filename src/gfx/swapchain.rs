//! Swapchain negotiation and the per-generation swapchain state.
//!
//! The `choose_*` functions are pure so that the negotiation rules can be
//! checked without a surface.

use crate::gfx::consts::{PREFERRED_COLOR_SPACE, PREFERRED_SURFACE_FORMAT};
use crate::gfx::device::DeviceContext;
use crate::gfx::error::GfxError;
use crate::gfx::layout::create_image_view;
use crate::gfx::queuefamily::QueueFamilyIndices;
use anyhow::{Result, anyhow};
use log::{debug, info};
use vulkanalia::vk::{DeviceV1_0, Handle, HasBuilder, KhrSurfaceExtension, KhrSwapchainExtension};
use vulkanalia::{Device, Instance, vk};

#[derive(Clone, Debug)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub unsafe fn get(
        instance: &Instance,
        surface: vk::SurfaceKHR,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        unsafe {
            Ok(Self {
                capabilities: instance
                    .get_physical_device_surface_capabilities_khr(physical_device, surface)?,
                formats: instance.get_physical_device_surface_formats_khr(physical_device, surface)?,
                present_modes: instance
                    .get_physical_device_surface_present_modes_khr(physical_device, surface)?,
            })
        }
    }
}

/// A lone `UNDEFINED` entry means the surface accepts anything.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    let preferred = vk::SurfaceFormatKHR {
        format: PREFERRED_SURFACE_FORMAT,
        color_space: PREFERRED_COLOR_SPACE,
    };

    match formats {
        [] => preferred,
        [only] if only.format == vk::Format::UNDEFINED => preferred,
        _ => formats
            .iter()
            .find(|f| f.format == preferred.format && f.color_space == preferred.color_space)
            .copied()
            .unwrap_or(formats[0]),
    }
}

pub fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Uses the surface's extent unless it reports `u32::MAX`, in which case the
/// window size is clamped into the supported range.
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, window_size: (u32, u32)) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let min = capabilities.min_image_extent;
    let max = capabilities.max_image_extent;
    vk::Extent2D {
        width: window_size.0.clamp(min.width, max.width),
        height: window_size.1.clamp(min.height, max.height),
    }
}

/// One more than the minimum; a maximum of zero means unbounded.
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count != 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

pub fn choose_sharing(indices: QueueFamilyIndices) -> (vk::SharingMode, Vec<u32>) {
    if indices.is_shared() {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (vk::SharingMode::CONCURRENT, vec![indices.graphics, indices.present])
    }
}

#[derive(Clone, Debug, Default)]
pub struct SwapchainState {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl SwapchainState {
    /// Builds a new chain. `previous` is handed to the driver as the old
    /// swapchain and destroyed afterwards, whether or not creation succeeded;
    /// its views must already be gone.
    pub unsafe fn new(
        instance: &Instance,
        ctx: &DeviceContext,
        surface: vk::SurfaceKHR,
        window_size: (u32, u32),
        previous: vk::SwapchainKHR,
    ) -> Result<Self> {
        unsafe {
            let result = Self::create(instance, ctx, surface, window_size, previous);
            if !previous.is_null() {
                ctx.device.destroy_swapchain_khr(previous, None);
            }
            result
        }
    }

    unsafe fn create(
        instance: &Instance,
        ctx: &DeviceContext,
        surface: vk::SurfaceKHR,
        window_size: (u32, u32),
        previous: vk::SwapchainKHR,
    ) -> Result<Self> {
        unsafe {
            let support = SwapchainSupport::get(instance, surface, ctx.physical_device)?;

            let surface_format = choose_surface_format(&support.formats);
            let present_mode = choose_present_mode(&support.present_modes);
            let extent = choose_extent(&support.capabilities, window_size);
            let image_count = choose_image_count(&support.capabilities);
            let (sharing_mode, family_indices) = choose_sharing(ctx.indices);

            let info = vk::SwapchainCreateInfoKHR::builder()
                .surface(surface)
                .min_image_count(image_count)
                .image_format(surface_format.format)
                .image_color_space(surface_format.color_space)
                .image_extent(extent)
                .image_array_layers(1)
                .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
                .image_sharing_mode(sharing_mode)
                .queue_family_indices(&family_indices)
                .pre_transform(support.capabilities.current_transform)
                .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
                .present_mode(present_mode)
                .clipped(true)
                .old_swapchain(previous);

            let swapchain = ctx
                .device
                .create_swapchain_khr(&info, None)
                .map_err(|code| anyhow!(GfxError::SwapchainCreation(code)))?;

            let mut state = Self {
                swapchain,
                images: Vec::new(),
                views: Vec::new(),
                format: surface_format.format,
                extent,
            };
            if let Err(e) = state.create_views(&ctx.device) {
                state.destroy(&ctx.device);
                return Err(e);
            }

            info!(
                "Swapchain acquired ({} images, {:?}, {:?}, {:?})",
                state.images.len(),
                surface_format.format,
                present_mode,
                extent
            );

            Ok(state)
        }
    }

    /// Views created before a failure stay in `self.views` for the caller to release.
    unsafe fn create_views(&mut self, device: &Device) -> Result<()> {
        unsafe {
            self.images = device.get_swapchain_images_khr(self.swapchain)?;
            for image in &self.images {
                let view = create_image_view(device, *image, self.format, vk::ImageAspectFlags::COLOR)?;
                self.views.push(view);
            }
        }
        Ok(())
    }

    /// Destroys the image views only, keeping the chain itself alive so it
    /// can be passed on as `previous`.
    pub unsafe fn destroy_views(&mut self, device: &Device) {
        unsafe {
            self.views
                .drain(..)
                .for_each(|v| device.destroy_image_view(v, None));
        }
        debug!("Swapchain image views destroyed.");
    }

    /// Takes the chain handle out, leaving this state empty.
    pub fn take(&mut self) -> vk::SwapchainKHR {
        self.images.clear();
        std::mem::take(&mut self.swapchain)
    }

    pub unsafe fn destroy(&mut self, device: &Device) {
        unsafe {
            self.destroy_views(device);
            let swapchain = self.take();
            if !swapchain.is_null() {
                device.destroy_swapchain_khr(swapchain, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    fn pair(format: vk::SurfaceFormatKHR) -> (vk::Format, vk::ColorSpaceKHR) {
        (format.format, format.color_space)
    }

    fn bounded(min: (u32, u32), max: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: min.0,
                height: min.1,
            },
            max_image_extent: vk::Extent2D {
                width: max.0,
                height: max.1,
            },
            ..Default::default()
        }
    }

    #[test]
    fn finds_preferred_format_regardless_of_order() {
        let preferred = format(PREFERRED_SURFACE_FORMAT, PREFERRED_COLOR_SPACE);
        let other = format(vk::Format::R8G8B8A8_SRGB, PREFERRED_COLOR_SPACE);

        assert_eq!(pair(choose_surface_format(&[other, preferred])), pair(preferred));
        assert_eq!(pair(choose_surface_format(&[preferred, other])), pair(preferred));
    }

    #[test]
    fn falls_back_to_first_format() {
        let first = format(vk::Format::R8G8B8A8_SRGB, PREFERRED_COLOR_SPACE);
        let second = format(PREFERRED_SURFACE_FORMAT, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT);

        assert_eq!(pair(choose_surface_format(&[first, second])), pair(first));
    }

    #[test]
    fn undefined_format_means_any() {
        let undefined = format(vk::Format::UNDEFINED, PREFERRED_COLOR_SPACE);

        let chosen = choose_surface_format(&[undefined]);
        assert_eq!(chosen.format, PREFERRED_SURFACE_FORMAT);
        assert_eq!(chosen.color_space, PREFERRED_COLOR_SPACE);
    }

    #[test]
    fn mailbox_preferred_over_fifo() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);

        let modes = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn extent_clamped_when_surface_defers_to_window() {
        let capabilities = bounded((1, 1), (4096, 4096));

        let extent = choose_extent(&capabilities, (8000, 100));
        assert_eq!((extent.width, extent.height), (4096, 100));

        let extent = choose_extent(&capabilities, (0, 0));
        assert_eq!((extent.width, extent.height), (1, 1));
    }

    #[test]
    fn extent_follows_surface_when_defined() {
        let mut capabilities = bounded((1, 1), (4096, 4096));
        capabilities.current_extent = vk::Extent2D {
            width: 800,
            height: 600,
        };

        let extent = choose_extent(&capabilities, (1920, 1080));
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn image_count_respects_maximum() {
        let mut capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&capabilities), 3);

        capabilities.max_image_count = 2;
        assert_eq!(choose_image_count(&capabilities), 2);
    }

    #[test]
    fn sharing_depends_on_family_aliasing() {
        let (mode, families) = choose_sharing(QueueFamilyIndices {
            graphics: 0,
            present: 0,
        });
        assert_eq!(mode, vk::SharingMode::EXCLUSIVE);
        assert!(families.is_empty());

        let (mode, families) = choose_sharing(QueueFamilyIndices {
            graphics: 0,
            present: 2,
        });
        assert_eq!(mode, vk::SharingMode::CONCURRENT);
        assert_eq!(families, vec![0, 2]);
    }
}
