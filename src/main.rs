// Glimmer - a small standalone Vulkan renderer
//
// Brings up a device, uploads a textured quad through a staging image, and
// drives a fully serialized render loop: one frame outstanding, every
// submission followed by a queue-idle wait.

mod assets;
mod backend;
mod config;
mod scene;

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Fullscreen, Window, WindowAttributes},
};

use assets::PixelData;
use backend::{
    commands, image, pipeline, shader, CommandSubmitter, DeviceContext, ImageResource,
    IndexBuffer, SamplerResource, Swapchain, UniformBuffer, VertexBuffer,
};
use config::Config;
use scene::{Camera, SceneUniforms};

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let config = Config::load();
    log::info!("Starting glimmer");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen {
            "fullscreen"
        } else {
            "windowed"
        }
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

/// All window and GPU state. Field order matters: the RAII resources are
/// declared before the device context so they drop while it is still alive;
/// the raw fixed-function handles are destroyed explicitly in Drop.
struct App {
    config: Config,
    window: Option<Arc<Window>>,

    pipeline: vk::Pipeline,
    pipeline_layout: vk::PipelineLayout,
    descriptor_pool: vk::DescriptorPool,
    descriptor_set_layout: vk::DescriptorSetLayout,
    descriptor_set: vk::DescriptorSet,
    framebuffers: Vec<vk::Framebuffer>,
    render_pass: vk::RenderPass,

    vertices: Option<VertexBuffer>,
    indices: Option<IndexBuffer>,
    uniforms: Option<UniformBuffer>,
    sampler: Option<SamplerResource>,
    depth: Option<ImageResource>,
    commands: Option<CommandSubmitter>,
    swapchain: Option<Swapchain>,
    ctx: Option<DeviceContext>,

    camera: Camera,
    minimized: bool,
    resize_warned: bool,

    frame_count: u32,
    last_fps_update: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            window: None,
            pipeline: vk::Pipeline::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            descriptor_pool: vk::DescriptorPool::null(),
            descriptor_set_layout: vk::DescriptorSetLayout::null(),
            descriptor_set: vk::DescriptorSet::null(),
            framebuffers: Vec::new(),
            render_pass: vk::RenderPass::null(),
            vertices: None,
            indices: None,
            uniforms: None,
            sampler: None,
            depth: None,
            commands: None,
            swapchain: None,
            ctx: None,
            camera: Camera::default(),
            minimized: false,
            resize_warned: false,
            frame_count: 0,
            last_fps_update: Instant::now(),
        }
    }

    fn init_vulkan(&mut self, window: Arc<Window>) -> Result<()> {
        anyhow::ensure!(
            self.ctx.is_none() && self.swapchain.is_none(),
            "Swapchain recreation is not supported"
        );

        let enable_validation = cfg!(debug_assertions) && self.config.debug.validation_layers;
        let ctx = DeviceContext::new(window.as_ref(), &self.config.window.title, enable_validation)?;

        let size = window.inner_size();
        let swapchain = Swapchain::new(&ctx, size.width, size.height)?;
        let extent = swapchain.extent;

        let mut commands = CommandSubmitter::new(&ctx)?;

        // Depth buffer, established once
        let mut depth = ImageResource::device_local(
            &ctx,
            extent,
            1,
            1,
            pipeline::DEPTH_FORMAT,
            vk::SampleCountFlags::TYPE_1,
            vk::ImageTiling::OPTIMAL,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        )?;
        depth.transition_layout(
            &ctx,
            &mut commands,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        )?;

        // Texture: decode, fill a linear staging image, copy to the
        // device-local image, leave it shader-readable
        let pixels = PixelData::load(&self.config.scene.texture)?;
        let texture_extent = vk::Extent2D {
            width: pixels.width,
            height: pixels.height,
        };

        let mut staging = ImageResource::host_visible(
            &ctx,
            texture_extent,
            1,
            1,
            vk::Format::R8G8B8A8_UNORM,
            vk::SampleCountFlags::TYPE_1,
            vk::ImageTiling::LINEAR,
            vk::ImageUsageFlags::TRANSFER_SRC,
        )?;
        staging.copy_from_pixels(&pixels.pixels, pixels.width, pixels.height)?;

        let mut texture = ImageResource::device_local(
            &ctx,
            texture_extent,
            1,
            1,
            vk::Format::R8G8B8A8_UNORM,
            vk::SampleCountFlags::TYPE_1,
            vk::ImageTiling::OPTIMAL,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        )?;
        texture.transition_layout(&ctx, &mut commands, vk::ImageLayout::TRANSFER_DST_OPTIMAL)?;
        texture.copy_from_image(&ctx, &mut commands, &mut staging)?;
        texture.transition_layout(&ctx, &mut commands, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)?;

        // The staging image must survive until the recorded copy has run
        commands.submit_setup(&ctx)?;
        drop(staging);

        let sampler = SamplerResource::new(&ctx, texture)?;

        let mut uniforms = UniformBuffer::new(
            &ctx,
            std::mem::size_of::<SceneUniforms>() as vk::DeviceSize,
            vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        let initial = self.camera.uniforms(extent.width, extent.height);
        uniforms.map()?.write(bytemuck::bytes_of(&initial));

        let mut vertices = VertexBuffer::new(&ctx, &scene::quad_vertices(), 0, scene::QUAD_STRIDE)?;
        vertices
            .layout
            .push_attribute(0, vk::Format::R32G32B32_SFLOAT, 0);
        vertices
            .layout
            .push_attribute(1, vk::Format::R32G32B32A32_SFLOAT, 12);

        let indices = IndexBuffer::new(&ctx, &scene::quad_indices())?;
        log::info!(
            "Scene: {} vertices, {} indices",
            vertices.vertex_count(),
            indices.count()
        );

        let descriptor_set_layout = pipeline::create_descriptor_set_layout(&ctx)?;
        let pipeline_layout = pipeline::create_pipeline_layout(&ctx, descriptor_set_layout)?;
        let render_pass = pipeline::create_render_pass(&ctx, ctx.surface_format.format)?;

        let vert_shader = shader::load_shader_module(&ctx, &self.config.shaders.vertex)?;
        let frag_shader = shader::load_shader_module(&ctx, &self.config.shaders.fragment)?;
        let graphics_pipeline = pipeline::create_graphics_pipeline(
            &ctx,
            render_pass,
            pipeline_layout,
            &vertices.layout,
            vert_shader,
            frag_shader,
        )?;
        unsafe {
            ctx.device.destroy_shader_module(vert_shader, None);
            ctx.device.destroy_shader_module(frag_shader, None);
        }

        let descriptor_pool = pipeline::create_descriptor_pool(&ctx)?;
        let descriptor_set =
            pipeline::allocate_descriptor_set(&ctx, descriptor_pool, descriptor_set_layout)?;
        pipeline::write_descriptor_set(&ctx, descriptor_set, &uniforms, &sampler);

        let framebuffers = pipeline::create_framebuffers(
            &ctx,
            &swapchain.image_views,
            depth.view(),
            render_pass,
            extent,
        )?;

        self.pipeline = graphics_pipeline;
        self.pipeline_layout = pipeline_layout;
        self.descriptor_pool = descriptor_pool;
        self.descriptor_set_layout = descriptor_set_layout;
        self.descriptor_set = descriptor_set;
        self.framebuffers = framebuffers;
        self.render_pass = render_pass;
        self.vertices = Some(vertices);
        self.indices = Some(indices);
        self.uniforms = Some(uniforms);
        self.sampler = Some(sampler);
        self.depth = Some(depth);
        self.commands = Some(commands);
        self.swapchain = Some(swapchain);
        self.ctx = Some(ctx);

        log::info!("Vulkan initialized");
        Ok(())
    }

    /// One fully serialized frame:
    /// acquire -> transition -> record -> submit -> present -> idle.
    fn render_frame(&mut self) -> Result<()> {
        if self.minimized {
            return Ok(());
        }

        let ctx = self.ctx.as_ref().context("Device not initialized")?;
        let swapchain = self.swapchain.as_mut().context("Swapchain not initialized")?;
        let commands = self.commands.as_mut().context("Commands not initialized")?;
        let uniforms = self.uniforms.as_mut().context("Uniforms not initialized")?;
        let vertices = self.vertices.as_ref().context("Vertices not initialized")?;

        // Fresh semaphore per acquire, destroyed after the present
        let semaphore = commands::create_semaphore(ctx)?;

        swapchain.acquire_next_image(semaphore)?;
        let image_index = swapchain.current_image();

        // Hand-off from the presentation engine to rendering
        let setup_cmd = commands.setup_buffer(ctx)?;
        image::record_layout_barrier(
            &ctx.device,
            setup_cmd,
            swapchain.current_image_handle(),
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
        commands.submit_setup(ctx)?;

        let extent = swapchain.extent;
        let frame_uniforms = self.camera.uniforms(extent.width, extent.height);
        uniforms.map()?.write(bytemuck::bytes_of(&frame_uniforms));

        record_draw_commands(
            ctx,
            commands.draw_buffer(),
            self.render_pass,
            self.framebuffers[image_index as usize],
            extent,
            self.pipeline,
            self.pipeline_layout,
            self.descriptor_set,
            vertices,
            self.config.graphics.clear_color,
            swapchain.current_image_handle(),
        )?;

        commands.submit_draw(ctx, semaphore)?;

        swapchain.present(ctx.queue)?;
        unsafe { ctx.device.queue_wait_idle(ctx.queue) }
            .context("Failed to wait after present")?;

        unsafe {
            ctx.device.destroy_semaphore(semaphore, None);
        }

        Ok(())
    }

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        self.frame_count += 1;
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;
            if let Some(ref window) = self.window {
                window.set_title(&format!("{} - {:.0} FPS", self.config.window.title, fps));
            }
            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));
        if self.config.window.fullscreen {
            window_attributes = window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        if let Err(e) = self.init_vulkan(window.clone()) {
            log::error!("Failed to initialize Vulkan: {:?}", e);
            event_loop.exit();
            return;
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                if let Some(ref ctx) = self.ctx {
                    let _ = ctx.wait_idle();
                }
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                self.minimized = size.width == 0 || size.height == 0;
                if !self.minimized && self.swapchain.is_some() && !self.resize_warned {
                    log::warn!(
                        "Window resized to {}x{}; swapchain recreation is unsupported, \
                         rendering continues at the original size",
                        size.width,
                        size.height
                    );
                    self.resize_warned = true;
                }
            }

            WindowEvent::RedrawRequested => {
                if let Err(e) = self.render_frame() {
                    // Native call failures are not recoverable
                    log::error!("Render error: {:?}", e);
                    event_loop.exit();
                    return;
                }
                self.update_fps();
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() {
                    if let PhysicalKey::Code(KeyCode::Escape) = event.physical_key {
                        log::info!("ESC pressed, exiting...");
                        event_loop.exit();
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        log::info!("Cleaning up...");

        if let Some(ref ctx) = self.ctx {
            let _ = ctx.wait_idle();

            unsafe {
                if self.pipeline != vk::Pipeline::null() {
                    ctx.device.destroy_pipeline(self.pipeline, None);
                }
                if self.pipeline_layout != vk::PipelineLayout::null() {
                    ctx.device.destroy_pipeline_layout(self.pipeline_layout, None);
                }
                if self.descriptor_pool != vk::DescriptorPool::null() {
                    ctx.device.destroy_descriptor_pool(self.descriptor_pool, None);
                }
                if self.descriptor_set_layout != vk::DescriptorSetLayout::null() {
                    ctx.device
                        .destroy_descriptor_set_layout(self.descriptor_set_layout, None);
                }
                for &framebuffer in &self.framebuffers {
                    ctx.device.destroy_framebuffer(framebuffer, None);
                }
                if self.render_pass != vk::RenderPass::null() {
                    ctx.device.destroy_render_pass(self.render_pass, None);
                }
            }
        }
        // Remaining resources drop field-by-field, context last
    }
}

/// Record one frame into the draw buffer: clear, bind, draw the quad, then
/// barrier the back buffer into the present layout.
#[allow(clippy::too_many_arguments)]
fn record_draw_commands(
    ctx: &DeviceContext,
    cmd: vk::CommandBuffer,
    render_pass: vk::RenderPass,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
    pipeline: vk::Pipeline,
    pipeline_layout: vk::PipelineLayout,
    descriptor_set: vk::DescriptorSet,
    vertices: &VertexBuffer,
    clear_color: [f32; 4],
    swap_image: vk::Image,
) -> Result<()> {
    let clear_values = [
        vk::ClearValue {
            color: vk::ClearColorValue {
                float32: clear_color,
            },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        },
    ];

    let render_pass_info = vk::RenderPassBeginInfo::default()
        .render_pass(render_pass)
        .framebuffer(framebuffer)
        .render_area(vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        })
        .clear_values(&clear_values);

    unsafe {
        let begin_info = vk::CommandBufferBeginInfo::default();
        ctx.device
            .begin_command_buffer(cmd, &begin_info)
            .context("Failed to begin draw command buffer")?;

        ctx.device
            .cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
        ctx.device
            .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
        ctx.device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            pipeline_layout,
            0,
            &[descriptor_set],
            &[],
        );

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        ctx.device.cmd_set_viewport(cmd, 0, &[viewport]);

        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        ctx.device.cmd_set_scissor(cmd, 0, &[scissor]);

        ctx.device.cmd_bind_vertex_buffers(
            cmd,
            vertices.layout.binding(),
            &[vertices.buffer()],
            &[0],
        );
        ctx.device.cmd_draw(cmd, vertices.vertex_count(), 1, 0, 0);

        ctx.device.cmd_end_render_pass(cmd);

        // Hand the back buffer to the presentation engine
        let present_barrier = vk::ImageMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .dst_access_mask(vk::AccessFlags::MEMORY_READ)
            .old_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(swap_image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        ctx.device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[present_barrier],
        );

        ctx.device
            .end_command_buffer(cmd)
            .context("Failed to end draw command buffer")?;
    }

    Ok(())
}
