//! Staged uploads into device-local memory.
//!
//! Every copy and layout transition goes through a single-use command buffer
//! that is submitted to the graphics queue and waited on before returning, so
//! callers may release staging resources as soon as a call completes.

use crate::gfx::assets::TexturePixels;
use crate::gfx::consts::TEXTURE_FORMAT;
use crate::gfx::device::DeviceContext;
use crate::gfx::layout::{aspect_mask, require_transition, single_subresource};
use crate::gfx::memory::{AllocatedBuffer, AllocatedImage, ImageSpec, Scoped};
use anyhow::{Result, bail};
use log::debug;
use vulkanalia::vk::{DeviceV1_0, Handle, HasBuilder};
use vulkanalia::{Device, vk};

const STAGING_MEMORY: vk::MemoryPropertyFlags =
    vk::MemoryPropertyFlags::HOST_VISIBLE.union(vk::MemoryPropertyFlags::HOST_COHERENT);

/// Writes the `row_bytes`-long rows of tightly packed `src` into
/// `dst`, where consecutive rows start `row_pitch` bytes apart.
pub fn copy_rows(src: &[u8], dst: &mut [u8], row_bytes: usize, row_pitch: usize) {
    for (row, chunk) in src.chunks_exact(row_bytes).enumerate() {
        let start = row * row_pitch;
        dst[start..start + row_bytes].copy_from_slice(chunk);
    }
}

#[derive(Copy, Clone)]
pub struct TransferContext<'a> {
    pub device: &'a Device,
    pub memory_properties: &'a vk::PhysicalDeviceMemoryProperties,
    pub command_pool: vk::CommandPool,
    pub queue: vk::Queue,
}

impl<'a> TransferContext<'a> {
    pub fn new(ctx: &'a DeviceContext, command_pool: vk::CommandPool) -> Self {
        Self {
            device: &ctx.device,
            memory_properties: &ctx.memory_properties,
            command_pool,
            queue: ctx.graphics_queue,
        }
    }

    pub unsafe fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<AllocatedBuffer> {
        unsafe { AllocatedBuffer::new(self.device, self.memory_properties, size, usage, properties) }
    }

    pub unsafe fn create_image(&self, spec: ImageSpec) -> Result<AllocatedImage> {
        unsafe { AllocatedImage::new(self.device, self.memory_properties, spec) }
    }

    /// Records into a fresh primary command buffer, submits it and blocks
    /// until the queue is idle. The buffer is freed on every path.
    pub unsafe fn single_use<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(&Device, vk::CommandBuffer),
    {
        unsafe {
            let info = vk::CommandBufferAllocateInfo::builder()
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_pool(self.command_pool)
                .command_buffer_count(1);

            let command_buffer = self.device.allocate_command_buffers(&info)?[0];
            let result = self.submit_and_wait(command_buffer, record);
            self.device.free_command_buffers(self.command_pool, &[command_buffer]);

            result
        }
    }

    unsafe fn submit_and_wait<F>(&self, command_buffer: vk::CommandBuffer, record: F) -> Result<()>
    where
        F: FnOnce(&Device, vk::CommandBuffer),
    {
        unsafe {
            let info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.device.begin_command_buffer(command_buffer, &info)?;

            record(self.device, command_buffer);

            self.device.end_command_buffer(command_buffer)?;

            let command_buffers = &[command_buffer];
            let info = vk::SubmitInfo::builder().command_buffers(command_buffers);
            self.device.queue_submit(self.queue, &[info], vk::Fence::null())?;
            self.device.queue_wait_idle(self.queue)?;
        }

        Ok(())
    }

    pub unsafe fn copy_buffer(
        &self,
        source: vk::Buffer,
        destination: vk::Buffer,
        size: vk::DeviceSize,
    ) -> Result<()> {
        unsafe {
            self.single_use(|device, cb| {
                let region = vk::BufferCopy::builder().size(size);
                device.cmd_copy_buffer(cb, source, destination, &[region]);
            })
        }
    }

    /// Copies the whole color subresource of `source` into `destination`.
    /// Both images must already be in their transfer layouts.
    pub unsafe fn copy_image(
        &self,
        source: vk::Image,
        destination: vk::Image,
        extent: vk::Extent2D,
    ) -> Result<()> {
        let subresource = vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        };

        let region = vk::ImageCopy::builder()
            .src_subresource(subresource)
            .src_offset(vk::Offset3D::default())
            .dst_subresource(subresource)
            .dst_offset(vk::Offset3D::default())
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            });

        unsafe {
            self.single_use(|device, cb| {
                device.cmd_copy_image(
                    cb,
                    source,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    destination,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            })
        }
    }

    pub unsafe fn transition_image_layout(
        &self,
        image: vk::Image,
        format: vk::Format,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) -> Result<()> {
        let masks = require_transition(old_layout, new_layout)?;

        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(single_subresource(aspect_mask(format, new_layout)))
            .src_access_mask(masks.src_access)
            .dst_access_mask(masks.dst_access);

        unsafe {
            self.single_use(|device, cb| {
                device.cmd_pipeline_barrier(
                    cb,
                    masks.src_stage,
                    masks.dst_stage,
                    vk::DependencyFlags::empty(),
                    &[] as &[vk::MemoryBarrier],
                    &[] as &[vk::BufferMemoryBarrier],
                    &[barrier],
                );
            })
        }
    }

    /// Uploads `data` into a new device-local buffer through a host-visible
    /// staging buffer. An empty slice yields a null buffer and allocates nothing.
    pub unsafe fn upload_buffer<T: Copy>(
        &self,
        data: &[T],
        usage: vk::BufferUsageFlags,
    ) -> Result<AllocatedBuffer> {
        let size = size_of_val(data) as vk::DeviceSize;
        if size == 0 {
            return Ok(AllocatedBuffer::default());
        }

        unsafe {
            let staging = Scoped::new(
                self.device,
                self.create_buffer(size, vk::BufferUsageFlags::TRANSFER_SRC, STAGING_MEMORY)?,
            );
            staging.write(self.device, data)?;

            let buffer = Scoped::new(
                self.device,
                self.create_buffer(
                    size,
                    usage | vk::BufferUsageFlags::TRANSFER_DST,
                    vk::MemoryPropertyFlags::DEVICE_LOCAL,
                )?,
            );
            self.copy_buffer(staging.buffer, buffer.buffer, size)?;

            debug!("Uploaded {size} bytes ({usage:?}).");
            Ok(buffer.into_inner())
        }
    }

    /// Uploads RGBA8 pixels into a sampled, optimally tiled image left in
    /// `SHADER_READ_ONLY_OPTIMAL`.
    pub unsafe fn upload_texture(&self, pixels: &TexturePixels) -> Result<AllocatedImage> {
        if pixels.width == 0 || pixels.height == 0 {
            bail!("Cannot upload an empty {}x{} texture.", pixels.width, pixels.height);
        }

        let extent = vk::Extent2D {
            width: pixels.width,
            height: pixels.height,
        };

        unsafe {
            let staging = Scoped::new(
                self.device,
                self.create_image(ImageSpec {
                    extent,
                    format: TEXTURE_FORMAT,
                    tiling: vk::ImageTiling::LINEAR,
                    initial_layout: vk::ImageLayout::PREINITIALIZED,
                    usage: vk::ImageUsageFlags::TRANSFER_SRC,
                    properties: STAGING_MEMORY,
                })?,
            );
            self.write_linear_image(&staging, pixels)?;

            let texture = Scoped::new(
                self.device,
                self.create_image(ImageSpec {
                    extent,
                    format: TEXTURE_FORMAT,
                    tiling: vk::ImageTiling::OPTIMAL,
                    initial_layout: vk::ImageLayout::PREINITIALIZED,
                    usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
                    properties: vk::MemoryPropertyFlags::DEVICE_LOCAL,
                })?,
            );

            self.transition_image_layout(
                staging.image,
                TEXTURE_FORMAT,
                vk::ImageLayout::PREINITIALIZED,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            )?;
            self.transition_image_layout(
                texture.image,
                TEXTURE_FORMAT,
                vk::ImageLayout::PREINITIALIZED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            )?;
            self.copy_image(staging.image, texture.image, extent)?;
            self.transition_image_layout(
                texture.image,
                TEXTURE_FORMAT,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )?;

            debug!("Uploaded {}x{} texture.", pixels.width, pixels.height);
            Ok(texture.into_inner())
        }
    }

    /// Linear images may pad each row; the driver reports the pitch.
    unsafe fn write_linear_image(&self, image: &AllocatedImage, pixels: &TexturePixels) -> Result<()> {
        unsafe {
            let subresource = vk::ImageSubresource::builder()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .mip_level(0)
                .array_layer(0);
            let layout = self.device.get_image_subresource_layout(image.image, &subresource);

            let row_bytes = pixels.width as usize * 4;
            let row_pitch = layout.row_pitch as usize;
            let len = row_pitch * (pixels.height as usize - 1) + row_bytes;

            let mapped = self.device.map_memory(
                image.memory,
                layout.offset,
                vk::WHOLE_SIZE as vk::DeviceSize,
                vk::MemoryMapFlags::empty(),
            )?;
            let dst = std::slice::from_raw_parts_mut(mapped.cast::<u8>(), len);
            copy_rows(&pixels.rgba, dst, row_bytes, row_pitch);
            self.device.unmap_memory(image.memory);
        }

        Ok(())
    }
}
