use crate::gfx::consts::DEPTH_FORMAT_CANDIDATES;
use crate::gfx::error::GfxError;
use anyhow::{Result, anyhow};
use log::debug;
use vulkanalia::vk::{DeviceV1_0, HasBuilder, InstanceV1_0};
use vulkanalia::{Device, Instance, vk};

/// First candidate whose optimal tiling supports use as a depth attachment.
pub fn pick_depth_format<F>(candidates: &[vk::Format], mut optimal_features: F) -> Result<vk::Format>
where
    F: FnMut(vk::Format) -> vk::FormatFeatureFlags,
{
    candidates
        .iter()
        .copied()
        .find(|f| optimal_features(*f).contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT))
        .ok_or_else(|| anyhow!(GfxError::UnsupportedDepthFormat))
}

pub unsafe fn find_depth_format(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<vk::Format> {
    pick_depth_format(DEPTH_FORMAT_CANDIDATES, |format| unsafe {
        instance
            .get_physical_device_format_properties(physical_device, format)
            .optimal_tiling_features
    })
}

/// Destination half of the `EXTERNAL -> 0` dependency. Attachment writes
/// must wait until the presentation engine has released the image.
pub fn external_dependency(with_depth: bool) -> (vk::PipelineStageFlags, vk::AccessFlags) {
    let mut stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
    let mut access = vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE;

    if with_depth {
        stages |= vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        access |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
    }

    (stages, access)
}

pub unsafe fn build_render_pass(
    device: &Device,
    color_format: vk::Format,
    depth_format: Option<vk::Format>,
) -> Result<vk::RenderPass> {
    let color_attachment = vk::AttachmentDescription::builder()
        .format(color_format)
        .samples(vk::SampleCountFlags::_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);

    let color_attachment_ref = vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

    let depth_attachment_ref = vk::AttachmentReference::builder()
        .attachment(1)
        .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

    let mut attachments = vec![color_attachment];
    let color_attachments = &[color_attachment_ref];
    let mut subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(color_attachments);

    if let Some(format) = depth_format {
        attachments.push(
            vk::AttachmentDescription::builder()
                .format(format)
                .samples(vk::SampleCountFlags::_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
        );
        subpass = subpass.depth_stencil_attachment(&depth_attachment_ref);
    }

    let (dst_stage, dst_access) = external_dependency(depth_format.is_some());
    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(dst_stage)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(dst_stage)
        .dst_access_mask(dst_access);

    let subpasses = &[subpass];
    let dependencies = &[dependency];
    let info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(subpasses)
        .dependencies(dependencies);

    let render_pass = unsafe { device.create_render_pass(&info, None) }
        .map_err(|code| anyhow!(GfxError::PipelineCreation { stage: "render pass", code }))?;
    debug!("Render pass created ({color_format:?}, depth {depth_format:?}).");

    Ok(render_pass)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_supported_depth_format_wins() {
        let format = pick_depth_format(DEPTH_FORMAT_CANDIDATES, |f| {
            if f == vk::Format::D32_SFLOAT {
                vk::FormatFeatureFlags::SAMPLED_IMAGE
            } else {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            }
        })
        .unwrap();

        assert_eq!(format, vk::Format::D32_SFLOAT_S8_UINT);
    }

    #[test]
    fn no_depth_format_is_an_error() {
        let error = pick_depth_format(DEPTH_FORMAT_CANDIDATES, |_| vk::FormatFeatureFlags::empty())
            .unwrap_err();
        assert!(matches!(
            error.downcast_ref::<GfxError>(),
            Some(GfxError::UnsupportedDepthFormat)
        ));
    }

    #[test]
    fn dependency_waits_for_color_output() {
        let (stages, access) = external_dependency(false);
        assert_eq!(stages, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert!(access.contains(vk::AccessFlags::COLOR_ATTACHMENT_READ));
        assert!(access.contains(vk::AccessFlags::COLOR_ATTACHMENT_WRITE));

        let (stages, access) = external_dependency(true);
        assert!(stages.contains(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS));
        assert!(access.contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
    }
}
