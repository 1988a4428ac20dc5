use crate::gfx::texture::Texture;
use crate::gfx::vertex::UniformBufferObject;
use anyhow::Result;
use vulkanalia::vk::{DeviceV1_0, Handle, HasBuilder};
use vulkanalia::{Device, vk};

/// One pool holding the one descriptor set the pipeline binds.
#[derive(Copy, Clone, Debug, Default)]
pub struct Descriptors {
    pub pool: vk::DescriptorPool,
    pub set: vk::DescriptorSet,
}

impl Descriptors {
    pub unsafe fn new(
        device: &Device,
        layout: vk::DescriptorSetLayout,
        uniform_buffer: vk::Buffer,
        texture: &Texture,
    ) -> Result<Self> {
        unsafe {
            let ubo_size = vk::DescriptorPoolSize::builder()
                .type_(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(1);
            let sampler_size = vk::DescriptorPoolSize::builder()
                .type_(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(1);

            let pool_sizes = &[ubo_size, sampler_size];
            let info = vk::DescriptorPoolCreateInfo::builder()
                .pool_sizes(pool_sizes)
                .max_sets(1);
            let pool = device.create_descriptor_pool(&info, None)?;

            let layouts = &[layout];
            let info = vk::DescriptorSetAllocateInfo::builder()
                .descriptor_pool(pool)
                .set_layouts(layouts);
            let set = match device.allocate_descriptor_sets(&info) {
                Ok(sets) => sets[0],
                Err(e) => {
                    device.destroy_descriptor_pool(pool, None);
                    return Err(e.into());
                }
            };

            let info = vk::DescriptorBufferInfo::builder()
                .buffer(uniform_buffer)
                .offset(0)
                .range(size_of::<UniformBufferObject>() as u64);
            let buffer_info = &[info];
            let ubo_write = vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(0)
                .dst_array_element(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(buffer_info);

            let info = vk::DescriptorImageInfo::builder()
                .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .image_view(texture.view)
                .sampler(texture.sampler);
            let image_info = &[info];
            let sampler_write = vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(1)
                .dst_array_element(0)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(image_info);

            device.update_descriptor_sets(&[ubo_write, sampler_write], &[] as &[vk::CopyDescriptorSet]);

            Ok(Self { pool, set })
        }
    }

    /// Destroying the pool frees the set with it.
    pub unsafe fn destroy(&mut self, device: &Device) {
        if !self.pool.is_null() {
            unsafe { device.destroy_descriptor_pool(self.pool, None) }
        }
        *self = Self::default();
    }
}
