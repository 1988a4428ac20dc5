//! The renderer: owns every Vulkan object and implements the frame backend.
//!
//! Destruction order is fixed by [`Renderer`]'s `Drop`: swapchain-derived
//! objects, then the remaining device-derived objects, then the device, then
//! the messenger and surface, and the instance last.

use crate::gfx::assets::{MeshData, TexturePixels, read_shader};
use crate::gfx::commands::{
    DrawResources, RecordTarget, create_command_pool, create_framebuffers, record_command_buffers,
};
use crate::gfx::config::AppConfig;
use crate::gfx::consts::VALIDATION_ENABLED;
use crate::gfx::depth::DepthResources;
use crate::gfx::descriptor::Descriptors;
use crate::gfx::device::DeviceContext;
use crate::gfx::frame::{AcquireOutcome, FrameBackend, PresentOutcome, acquire_outcome, present_outcome};
use crate::gfx::instance::create_instance;
use crate::gfx::memory::{AllocatedBuffer, DeviceResource};
use crate::gfx::pipeline::{RenderPipeline, ShaderBytecode, create_descriptor_set_layout};
use crate::gfx::renderpass::{build_render_pass, find_depth_format};
use crate::gfx::swapchain::SwapchainState;
use crate::gfx::texture::Texture;
use crate::gfx::transfer::TransferContext;
use crate::gfx::vertex::UniformBufferObject;
use anyhow::{Result, anyhow};
use log::{debug, info, warn};
use std::time::Instant;
use vulkanalia::loader::{LIBRARY, LibloadingLoader};
use vulkanalia::vk::{
    DeviceV1_0, ExtDebugUtilsExtension, Handle, HasBuilder, InstanceV1_0, KhrSurfaceExtension,
    KhrSwapchainExtension,
};
use vulkanalia::{Entry, Instance, vk, window as vk_window};
use winit::window::Window;

pub struct Renderer {
    _entry: Entry,
    instance: Instance,
    messenger: vk::DebugUtilsMessengerEXT,
    surface: vk::SurfaceKHR,
    ctx: DeviceContext,

    command_pool: vk::CommandPool,
    shaders: ShaderBytecode,
    depth_format: vk::Format,
    descriptor_set_layout: vk::DescriptorSetLayout,

    // Swapchain generation.
    swapchain: SwapchainState,
    depth: DepthResources,
    render_pass: vk::RenderPass,
    pipeline: RenderPipeline,
    framebuffers: Vec<vk::Framebuffer>,
    command_buffers: Vec<vk::CommandBuffer>,

    texture: Texture,
    vertex_buffer: AllocatedBuffer,
    index_buffer: AllocatedBuffer,
    index_count: u32,
    uniform_staging: AllocatedBuffer,
    uniform_buffer: AllocatedBuffer,
    descriptors: Descriptors,

    image_available: vk::Semaphore,
    render_finished: vk::Semaphore,

    window_size: (u32, u32),
    start: Instant,
}

impl Renderer {
    pub unsafe fn create(window: &Window, config: &AppConfig) -> Result<Self> {
        unsafe {
            let loader = LibloadingLoader::new(LIBRARY)?;
            let entry = Entry::new(loader).map_err(|b| anyhow!("{}", b))?;
            let (instance, messenger) = create_instance(window, &entry, &config.title)?;

            // The surface must exist before a device can be checked against it.
            let created = vk_window::create_surface(&instance, &window, &window)
                .map_err(anyhow::Error::from)
                .and_then(|surface| match DeviceContext::new(&entry, &instance, surface) {
                    Ok(ctx) => Ok((surface, ctx)),
                    Err(e) => {
                        instance.destroy_surface_khr(surface, None);
                        Err(e)
                    }
                });
            let (surface, ctx) = match created {
                Ok(created) => created,
                Err(e) => {
                    if !messenger.is_null() {
                        instance.destroy_debug_utils_messenger_ext(messenger, None);
                    }
                    instance.destroy_instance(None);
                    return Err(e);
                }
            };

            let size = window.inner_size();
            let mut renderer = Self {
                _entry: entry,
                instance,
                messenger,
                surface,
                ctx,
                command_pool: vk::CommandPool::null(),
                shaders: ShaderBytecode::default(),
                depth_format: vk::Format::UNDEFINED,
                descriptor_set_layout: vk::DescriptorSetLayout::null(),
                swapchain: SwapchainState::default(),
                depth: DepthResources::default(),
                render_pass: vk::RenderPass::null(),
                pipeline: RenderPipeline::default(),
                framebuffers: Vec::new(),
                command_buffers: Vec::new(),
                texture: Texture::default(),
                vertex_buffer: AllocatedBuffer::default(),
                index_buffer: AllocatedBuffer::default(),
                index_count: 0,
                uniform_staging: AllocatedBuffer::default(),
                uniform_buffer: AllocatedBuffer::default(),
                descriptors: Descriptors::default(),
                image_available: vk::Semaphore::null(),
                render_finished: vk::Semaphore::null(),
                window_size: (size.width, size.height),
                start: Instant::now(),
            };

            // From here on, a failure drops `renderer`, which releases whatever was built.
            renderer.init(config)?;
            Ok(renderer)
        }
    }

    unsafe fn init(&mut self, config: &AppConfig) -> Result<()> {
        unsafe {
            self.shaders = ShaderBytecode {
                vertex: read_shader(&config.vertex_shader)?,
                fragment: read_shader(&config.fragment_shader)?,
            };
            let mesh = MeshData::load(&config.model)?;
            let pixels = TexturePixels::load(&config.texture)?;

            let device = &self.ctx.device;
            self.command_pool = create_command_pool(device, self.ctx.indices.graphics)?;
            self.depth_format = find_depth_format(&self.instance, self.ctx.physical_device)?;
            self.descriptor_set_layout = create_descriptor_set_layout(device)?;

            let transfer = TransferContext::new(&self.ctx, self.command_pool);
            self.texture = Texture::new(&transfer, &pixels, self.ctx.anisotropy)?;
            self.vertex_buffer = transfer.upload_buffer(&mesh.vertices, vk::BufferUsageFlags::VERTEX_BUFFER)?;
            self.index_buffer = transfer.upload_buffer(&mesh.indices, vk::BufferUsageFlags::INDEX_BUFFER)?;
            self.index_count = mesh.indices.len() as u32;

            let ubo_size = size_of::<UniformBufferObject>() as vk::DeviceSize;
            self.uniform_staging = transfer.create_buffer(
                ubo_size,
                vk::BufferUsageFlags::TRANSFER_SRC,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )?;
            self.uniform_buffer = transfer.create_buffer(
                ubo_size,
                vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )?;
            self.descriptors = Descriptors::new(
                device,
                self.descriptor_set_layout,
                self.uniform_buffer.buffer,
                &self.texture,
            )?;

            let semaphore_info = vk::SemaphoreCreateInfo::builder();
            self.image_available = device.create_semaphore(&semaphore_info, None)?;
            self.render_finished = device.create_semaphore(&semaphore_info, None)?;

            self.replace_swapchain()?;
            self.build_swapchain_resources()?;
        }

        info!("Renderer ready ({} indices).", self.index_count);
        Ok(())
    }

    /// Size used when the surface leaves the extent up to the application.
    pub fn set_window_size(&mut self, width: u32, height: u32) {
        self.window_size = (width, height);
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    fn transfer(&self) -> TransferContext<'_> {
        TransferContext::new(&self.ctx, self.command_pool)
    }
}

impl FrameBackend for Renderer {
    fn acquire_next_image(&mut self) -> Result<AcquireOutcome> {
        let result = unsafe {
            self.ctx.device.acquire_next_image_khr(
                self.swapchain.swapchain,
                u64::MAX,
                self.image_available,
                vk::Fence::null(),
            )
        };
        acquire_outcome(result)
    }

    fn update_uniforms(&mut self, _image_index: u32) -> Result<()> {
        let ubo = UniformBufferObject::at_time(self.start.elapsed().as_secs_f32(), self.swapchain.extent);

        unsafe {
            self.uniform_staging.write(&self.ctx.device, &[ubo])?;
            self.transfer().copy_buffer(
                self.uniform_staging.buffer,
                self.uniform_buffer.buffer,
                self.uniform_buffer.size,
            )
        }
    }

    fn submit(&mut self, image_index: u32) -> Result<()> {
        let wait_semaphores = &[self.image_available];
        let wait_stages = &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = &[self.command_buffers[image_index as usize]];
        let signal_semaphores = &[self.render_finished];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(wait_semaphores)
            .wait_dst_stage_mask(wait_stages)
            .command_buffers(command_buffers)
            .signal_semaphores(signal_semaphores);

        unsafe {
            self.ctx
                .device
                .queue_submit(self.ctx.graphics_queue, &[submit_info], vk::Fence::null())?;
        }
        Ok(())
    }

    fn present(&mut self, image_index: u32) -> Result<PresentOutcome> {
        let wait_semaphores = &[self.render_finished];
        let swapchains = &[self.swapchain.swapchain];
        let image_indices = &[image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(swapchains)
            .image_indices(image_indices);

        let result = unsafe { self.ctx.device.queue_present_khr(self.ctx.present_queue, &present_info) };
        let outcome = present_outcome(result)?;

        // Without fences, this is what keeps a single frame in flight: both
        // semaphores are free again before the next acquire.
        unsafe { self.ctx.device.queue_wait_idle(self.ctx.present_queue)? };

        Ok(outcome)
    }

    fn wait_idle(&mut self) -> Result<()> {
        unsafe { self.ctx.device.device_wait_idle()? };
        Ok(())
    }

    fn release_swapchain_resources(&mut self) {
        let device = &self.ctx.device;
        unsafe {
            if !self.command_buffers.is_empty() {
                device.free_command_buffers(self.command_pool, &self.command_buffers);
                self.command_buffers.clear();
            }
            self.framebuffers
                .drain(..)
                .for_each(|f| device.destroy_framebuffer(f, None));
            self.pipeline.destroy(device);
            if !self.render_pass.is_null() {
                device.destroy_render_pass(self.render_pass, None);
                self.render_pass = vk::RenderPass::null();
            }
            self.depth.destroy(device);
            self.swapchain.destroy_views(device);
        }
        debug!("Swapchain resources released.");
    }

    fn replace_swapchain(&mut self) -> Result<()> {
        let previous = self.swapchain.take();
        self.swapchain = unsafe {
            SwapchainState::new(&self.instance, &self.ctx, self.surface, self.window_size, previous)?
        };
        Ok(())
    }

    fn build_swapchain_resources(&mut self) -> Result<()> {
        unsafe {
            let extent = self.swapchain.extent;
            self.depth = DepthResources::new(&self.transfer(), self.depth_format, extent)?;

            let device = &self.ctx.device;
            self.render_pass = build_render_pass(device, self.swapchain.format, Some(self.depth_format))?;
            self.pipeline = RenderPipeline::new(
                device,
                self.render_pass,
                self.descriptor_set_layout,
                extent,
                &self.shaders,
                true,
            )?;
            self.framebuffers = create_framebuffers(
                device,
                self.render_pass,
                &self.swapchain.views,
                Some(self.depth.view),
                extent,
            )?;
            self.command_buffers = record_command_buffers(
                device,
                self.command_pool,
                RecordTarget {
                    render_pass: self.render_pass,
                    pipeline: &self.pipeline,
                    framebuffers: &self.framebuffers,
                    extent,
                    with_depth: true,
                },
                DrawResources {
                    vertex_buffer: self.vertex_buffer.buffer,
                    index_buffer: self.index_buffer.buffer,
                    index_count: self.index_count,
                    descriptor_set: self.descriptors.set,
                },
            )?;
        }
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.ctx.device.device_wait_idle() {
                warn!("Failed to wait for device idle during teardown: {e}");
            }

            self.release_swapchain_resources();
            self.swapchain.destroy(&self.ctx.device);

            let device = &self.ctx.device;
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_semaphore(self.image_available, None);
            self.descriptors.destroy(device);
            self.uniform_buffer.destroy(device);
            self.uniform_staging.destroy(device);
            self.index_buffer.destroy(device);
            self.vertex_buffer.destroy(device);
            self.texture.destroy(device);
            device.destroy_descriptor_set_layout(self.descriptor_set_layout, None);
            device.destroy_command_pool(self.command_pool, None);

            self.ctx.destroy();

            if VALIDATION_ENABLED && !self.messenger.is_null() {
                self.instance
                    .destroy_debug_utils_messenger_ext(self.messenger, None);
            }
            self.instance.destroy_surface_khr(self.surface, None);
            self.instance.destroy_instance(None);
        }

        info!("Vulkan instance destroyed successfully.");
    }
}
