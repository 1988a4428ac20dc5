use crate::gfx::layout::create_image_view;
use crate::gfx::memory::{AllocatedImage, DeviceResource, ImageSpec, Scoped};
use crate::gfx::transfer::TransferContext;
use anyhow::Result;
use log::debug;
use vulkanalia::vk::{DeviceV1_0, Handle};
use vulkanalia::{Device, vk};

/// Depth attachment sized to the swapchain; rebuilt with it.
#[derive(Clone, Debug, Default)]
pub struct DepthResources {
    pub image: AllocatedImage,
    pub view: vk::ImageView,
}

impl DepthResources {
    pub unsafe fn new(transfer: &TransferContext, format: vk::Format, extent: vk::Extent2D) -> Result<Self> {
        unsafe {
            let device = transfer.device;
            let image = transfer.create_image(ImageSpec {
                extent,
                format,
                tiling: vk::ImageTiling::OPTIMAL,
                initial_layout: vk::ImageLayout::UNDEFINED,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                properties: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            })?;
            let mut depth = Scoped::new(device, Self { image, ..Default::default() });

            depth.view = create_image_view(device, depth.image.image, format, vk::ImageAspectFlags::DEPTH)?;
            transfer.transition_image_layout(
                depth.image.image,
                format,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            )?;

            debug!("Depth buffer created ({format:?}, {}x{}).", extent.width, extent.height);
            Ok(depth.into_inner())
        }
    }
}

impl DeviceResource for DepthResources {
    unsafe fn destroy(&mut self, device: &Device) {
        unsafe {
            if !self.view.is_null() {
                device.destroy_image_view(self.view, None);
            }
            self.image.destroy(device);
        }
        *self = Self::default();
    }
}
