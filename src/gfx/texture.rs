use crate::gfx::assets::TexturePixels;
use crate::gfx::consts::TEXTURE_FORMAT;
use crate::gfx::layout::create_image_view;
use crate::gfx::memory::{AllocatedImage, DeviceResource, Scoped};
use crate::gfx::transfer::TransferContext;
use anyhow::Result;
use vulkanalia::vk::{DeviceV1_0, Handle, HasBuilder};
use vulkanalia::{Device, vk};

const MAX_ANISOTROPY: f32 = 16.0;

/// The sampled texture bound at descriptor binding 1.
#[derive(Clone, Debug, Default)]
pub struct Texture {
    pub image: AllocatedImage,
    pub view: vk::ImageView,
    pub sampler: vk::Sampler,
}

impl Texture {
    pub unsafe fn new(transfer: &TransferContext, pixels: &TexturePixels, anisotropy: bool) -> Result<Self> {
        unsafe {
            let device = transfer.device;
            let mut texture = Scoped::new(
                device,
                Self {
                    image: transfer.upload_texture(pixels)?,
                    ..Default::default()
                },
            );

            texture.view = create_image_view(
                device,
                texture.image.image,
                TEXTURE_FORMAT,
                vk::ImageAspectFlags::COLOR,
            )?;
            texture.sampler = create_sampler(device, anisotropy)?;

            Ok(texture.into_inner())
        }
    }
}

impl DeviceResource for Texture {
    unsafe fn destroy(&mut self, device: &Device) {
        unsafe {
            if !self.sampler.is_null() {
                device.destroy_sampler(self.sampler, None);
            }
            if !self.view.is_null() {
                device.destroy_image_view(self.view, None);
            }
            self.image.destroy(device);
        }
        *self = Self::default();
    }
}

unsafe fn create_sampler(device: &Device, anisotropy: bool) -> Result<vk::Sampler> {
    let info = vk::SamplerCreateInfo::builder()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .anisotropy_enable(anisotropy)
        .max_anisotropy(if anisotropy { MAX_ANISOTROPY } else { 1.0 })
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false)
        .compare_enable(false)
        .compare_op(vk::CompareOp::ALWAYS)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .min_lod(0.0)
        .max_lod(0.0)
        .mip_lod_bias(0.0);

    Ok(unsafe { device.create_sampler(&info, None)? })
}
