//! Command pool, framebuffers and the per-image draw command buffers.

use crate::gfx::pipeline::RenderPipeline;
use anyhow::Result;
use log::debug;
use vulkanalia::vk::{DeviceV1_0, HasBuilder};
use vulkanalia::{Device, vk};

const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

pub unsafe fn create_command_pool(device: &Device, graphics_family: u32) -> Result<vk::CommandPool> {
    let info = vk::CommandPoolCreateInfo::builder()
        .flags(vk::CommandPoolCreateFlags::empty())
        .queue_family_index(graphics_family);

    Ok(unsafe { device.create_command_pool(&info, None)? })
}

/// One framebuffer per swapchain view, each sharing the single depth view when present.
pub unsafe fn create_framebuffers(
    device: &Device,
    render_pass: vk::RenderPass,
    color_views: &[vk::ImageView],
    depth_view: Option<vk::ImageView>,
    extent: vk::Extent2D,
) -> Result<Vec<vk::Framebuffer>> {
    let framebuffers = color_views
        .iter()
        .map(|view| {
            let attachments = match depth_view {
                Some(depth) => vec![*view, depth],
                None => vec![*view],
            };
            let create_info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);

            unsafe { device.create_framebuffer(&create_info, None) }
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(framebuffers)
}

/// What a recorded frame draws.
#[derive(Copy, Clone, Debug)]
pub struct DrawResources {
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
    pub descriptor_set: vk::DescriptorSet,
}

/// Everything a command buffer is recorded against. All of it belongs to
/// the current swapchain generation.
#[derive(Copy, Clone, Debug)]
pub struct RecordTarget<'a> {
    pub render_pass: vk::RenderPass,
    pub pipeline: &'a RenderPipeline,
    pub framebuffers: &'a [vk::Framebuffer],
    pub extent: vk::Extent2D,
    pub with_depth: bool,
}

pub fn clear_values(with_depth: bool) -> Vec<vk::ClearValue> {
    let mut values = vec![vk::ClearValue {
        color: vk::ClearColorValue { float32: CLEAR_COLOR },
    }];
    if with_depth {
        values.push(vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        });
    }
    values
}

/// Allocates and records one primary command buffer per framebuffer.
pub unsafe fn record_command_buffers(
    device: &Device,
    command_pool: vk::CommandPool,
    target: RecordTarget,
    draw: DrawResources,
) -> Result<Vec<vk::CommandBuffer>> {
    unsafe {
        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(target.framebuffers.len() as u32);

        let command_buffers = device.allocate_command_buffers(&allocate_info)?;

        for (cb, framebuffer) in command_buffers.iter().zip(target.framebuffers) {
            if let Err(e) = record(device, *cb, *framebuffer, &target, &draw) {
                device.free_command_buffers(command_pool, &command_buffers);
                return Err(e);
            }
        }

        debug!("Recorded {} command buffers.", command_buffers.len());
        Ok(command_buffers)
    }
}

unsafe fn record(
    device: &Device,
    cb: vk::CommandBuffer,
    framebuffer: vk::Framebuffer,
    target: &RecordTarget,
    draw: &DrawResources,
) -> Result<()> {
    unsafe {
        let info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE);
        device.begin_command_buffer(cb, &info)?;

        let render_area = vk::Rect2D::builder()
            .offset(vk::Offset2D::default())
            .extent(target.extent);

        let clear_values = clear_values(target.with_depth);
        let info = vk::RenderPassBeginInfo::builder()
            .render_pass(target.render_pass)
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(&clear_values);

        device.cmd_begin_render_pass(cb, &info, vk::SubpassContents::INLINE);

        // An empty mesh still clears the frame.
        if draw.index_count > 0 {
            device.cmd_bind_pipeline(cb, vk::PipelineBindPoint::GRAPHICS, target.pipeline.pipeline);
            device.cmd_bind_vertex_buffers(cb, 0, &[draw.vertex_buffer], &[0]);
            device.cmd_bind_index_buffer(cb, draw.index_buffer, 0, vk::IndexType::UINT32);
            device.cmd_bind_descriptor_sets(
                cb,
                vk::PipelineBindPoint::GRAPHICS,
                target.pipeline.layout,
                0,
                &[draw.descriptor_set],
                &[],
            );
            device.cmd_draw_indexed(cb, draw.index_count, 1, 0, 0, 0);
        }

        device.cmd_end_render_pass(cb);
        device.end_command_buffer(cb)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clears_to_opaque_black_and_far_depth() {
        let values = clear_values(true);
        assert_eq!(values.len(), 2);

        unsafe {
            assert_eq!(values[0].color.float32, [0.0, 0.0, 0.0, 1.0]);
            assert_eq!(values[1].depth_stencil.depth, 1.0);
            assert_eq!(values[1].depth_stencil.stencil, 0);
        }
    }

    #[test]
    fn no_depth_clear_without_depth_attachment() {
        assert_eq!(clear_values(false).len(), 1);
    }
}
