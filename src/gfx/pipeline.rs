use crate::gfx::consts::SHADER_ENTRY_POINT;
use crate::gfx::error::GfxError;
use crate::gfx::vertex::Vertex;
use anyhow::{Result, anyhow};
use log::trace;
use vulkanalia::bytecode::Bytecode;
use vulkanalia::vk::{DeviceV1_0, Handle, HasBuilder};
use vulkanalia::{Device, vk};

fn creation_error(stage: &'static str) -> impl Fn(vk::ErrorCode) -> anyhow::Error {
    move |code| anyhow!(GfxError::PipelineCreation { stage, code })
}

/// SPIR-V for both programmable stages, read once at startup.
#[derive(Clone, Debug, Default)]
pub struct ShaderBytecode {
    pub vertex: Vec<u8>,
    pub fragment: Vec<u8>,
}

#[derive(Clone, Debug, Default)]
pub struct ShaderModule {
    pub module: vk::ShaderModule,
}

impl ShaderModule {
    pub unsafe fn new(device: &Device, bytecode: &[u8]) -> Result<Self> {
        let bytecode = Bytecode::new(bytecode)?;
        // code_size is not derived from code() and must be set explicitly.
        let info = vk::ShaderModuleCreateInfo::builder()
            .code(bytecode.code())
            .code_size(bytecode.code_size());

        let module = unsafe { device.create_shader_module(&info, None) }
            .map_err(creation_error("shader module"))?;

        Ok(Self { module })
    }

    pub unsafe fn destroy(&mut self, device: &Device) {
        if !self.module.is_null() {
            unsafe { device.destroy_shader_module(self.module, None) }
            self.module = vk::ShaderModule::null();
        }
    }
}

/// Binding 0 is the uniform buffer (vertex stage), binding 1 the texture sampler (fragment stage).
pub unsafe fn create_descriptor_set_layout(device: &Device) -> Result<vk::DescriptorSetLayout> {
    let ubo_binding = vk::DescriptorSetLayoutBinding::builder()
        .binding(0)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .descriptor_count(1)
        .stage_flags(vk::ShaderStageFlags::VERTEX);

    let sampler_binding = vk::DescriptorSetLayoutBinding::builder()
        .binding(1)
        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        .descriptor_count(1)
        .stage_flags(vk::ShaderStageFlags::FRAGMENT);

    let bindings = &[ubo_binding, sampler_binding];
    let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(bindings);

    unsafe { device.create_descriptor_set_layout(&info, None) }
        .map_err(creation_error("descriptor set layout"))
}

#[derive(Clone, Debug, Default)]
pub struct RenderPipeline {
    pub layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
}

impl RenderPipeline {
    /// Builds the single graphics pipeline. Viewport and scissor are baked in,
    /// so the pipeline is rebuilt whenever `extent` changes.
    pub unsafe fn new(
        device: &Device,
        render_pass: vk::RenderPass,
        set_layout: vk::DescriptorSetLayout,
        extent: vk::Extent2D,
        shaders: &ShaderBytecode,
        depth_test: bool,
    ) -> Result<Self> {
        trace!("Compiling render pipeline ({}x{})", extent.width, extent.height);

        unsafe {
            let mut vert = ShaderModule::new(device, &shaders.vertex)?;
            let mut frag = match ShaderModule::new(device, &shaders.fragment) {
                Ok(frag) => frag,
                Err(e) => {
                    vert.destroy(device);
                    return Err(e);
                }
            };

            let result = Self::build(device, render_pass, set_layout, extent, &vert, &frag, depth_test);

            vert.destroy(device);
            frag.destroy(device);

            result
        }
    }

    unsafe fn build(
        device: &Device,
        render_pass: vk::RenderPass,
        set_layout: vk::DescriptorSetLayout,
        extent: vk::Extent2D,
        vert: &ShaderModule,
        frag: &ShaderModule,
        depth_test: bool,
    ) -> Result<Self> {
        let vert_stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vert.module)
            .name(SHADER_ENTRY_POINT);

        let frag_stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(frag.module)
            .name(SHADER_ENTRY_POINT);

        let binding_descriptions = &[Vertex::binding_description()];
        let attribute_descriptions = Vertex::attribute_descriptions();
        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(binding_descriptions)
            .vertex_attribute_descriptions(&attribute_descriptions);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewport = vk::Viewport::builder()
            .x(0.0)
            .y(0.0)
            .width(extent.width as f32)
            .height(extent.height as f32)
            .min_depth(0.0)
            .max_depth(1.0);

        let scissor = vk::Rect2D::builder()
            .offset(vk::Offset2D { x: 0, y: 0 })
            .extent(extent);

        let viewports = &[viewport];
        let scissors = &[scissor];
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(viewports)
            .scissors(scissors);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::_1);

        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(depth_test)
            .depth_write_enable(depth_test)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0)
            .stencil_test_enable(false);

        let attachment = vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::all())
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD);

        let attachments = &[attachment];
        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(attachments)
            .blend_constants([0.0, 0.0, 0.0, 0.0]);

        let set_layouts = &[set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(set_layouts);
        let layout = unsafe { device.create_pipeline_layout(&layout_info, None) }
            .map_err(creation_error("pipeline layout"))?;

        let stages = &[vert_stage, frag_stage];
        let info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0)
            .base_pipeline_handle(vk::Pipeline::null())
            .base_pipeline_index(-1);

        let pipeline = match unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
        } {
            Ok((pipelines, _)) => pipelines[0],
            Err(code) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                return Err(creation_error("graphics pipeline")(code));
            }
        };

        Ok(Self { layout, pipeline })
    }

    pub unsafe fn destroy(&mut self, device: &Device) {
        unsafe {
            if !self.pipeline.is_null() {
                device.destroy_pipeline(self.pipeline, None);
            }
            if !self.layout.is_null() {
                device.destroy_pipeline_layout(self.layout, None);
            }
        }
        *self = Self::default();
    }
}
