// Command buffer roles and the synchronous submit protocol
//
// Two command buffers with distinct roles:
// - setup: lazily allocated, accumulates resource transitions and copies
//   between submits
// - draw:  allocated once at startup, re-recorded every frame
//
// Every submission here is followed by a full queue-idle wait. There is
// deliberately no overlap between host and device work.

use anyhow::{Context, Result};
use ash::vk;

use super::device::DeviceContext;

pub struct CommandSubmitter {
    setup: Option<vk::CommandBuffer>,
    setup_recording: bool,
    draw: vk::CommandBuffer,
    command_pool: vk::CommandPool,
    device: ash::Device,
}

impl CommandSubmitter {
    pub fn new(ctx: &DeviceContext) -> Result<Self> {
        let draw = allocate_command_buffer(ctx)?;

        Ok(Self {
            setup: None,
            setup_recording: false,
            draw,
            command_pool: ctx.command_pool,
            device: ctx.device.clone(),
        })
    }

    /// The per-frame draw command buffer.
    pub fn draw_buffer(&self) -> vk::CommandBuffer {
        self.draw
    }

    /// The setup command buffer, allocated on first use and opened for
    /// recording if it is not already. Recorded work does not reach the GPU
    /// until [`submit_setup`](Self::submit_setup) runs.
    pub fn setup_buffer(&mut self, ctx: &DeviceContext) -> Result<vk::CommandBuffer> {
        let cmd = match self.setup {
            Some(cmd) => cmd,
            None => {
                let cmd = allocate_command_buffer(ctx)?;
                self.setup = Some(cmd);
                cmd
            }
        };

        if !self.setup_recording {
            let begin_info = vk::CommandBufferBeginInfo::default();
            unsafe { ctx.device.begin_command_buffer(cmd, &begin_info) }
                .context("Failed to begin setup command buffer")?;
            self.setup_recording = true;
        }

        Ok(cmd)
    }

    /// Submit everything recorded on the setup buffer and block until the
    /// queue is idle. No-op when nothing was recorded.
    pub fn submit_setup(&mut self, ctx: &DeviceContext) -> Result<()> {
        let Some(cmd) = self.setup else {
            return Ok(());
        };
        if !self.setup_recording {
            return Ok(());
        }

        unsafe { ctx.device.end_command_buffer(cmd) }
            .context("Failed to end setup command buffer")?;
        self.setup_recording = false;

        let command_buffers = [cmd];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);

        unsafe {
            ctx.device
                .queue_submit(ctx.queue, &[submit_info], vk::Fence::null())
                .context("Failed to submit setup command buffer")?;
            ctx.device
                .queue_wait_idle(ctx.queue)
                .context("Failed to wait for setup submission")?;
        }

        Ok(())
    }

    /// Submit the draw buffer, gated on `wait_semaphore` at the
    /// color-attachment-output stage, and block until the queue is idle.
    pub fn submit_draw(&self, ctx: &DeviceContext, wait_semaphore: vk::Semaphore) -> Result<()> {
        let wait_semaphores = [wait_semaphore];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [self.draw];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers);

        unsafe {
            ctx.device
                .queue_submit(ctx.queue, &[submit_info], vk::Fence::null())
                .context("Failed to submit draw command buffer")?;
            ctx.device
                .queue_wait_idle(ctx.queue)
                .context("Failed to wait for draw submission")?;
        }

        Ok(())
    }
}

impl Drop for CommandSubmitter {
    fn drop(&mut self) {
        let mut buffers = vec![self.draw];
        if let Some(setup) = self.setup.take() {
            buffers.push(setup);
        }
        unsafe {
            self.device.free_command_buffers(self.command_pool, &buffers);
        }
    }
}

fn allocate_command_buffer(ctx: &DeviceContext) -> Result<vk::CommandBuffer> {
    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(ctx.command_pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);

    let buffers = unsafe { ctx.device.allocate_command_buffers(&alloc_info) }
        .context("Failed to allocate command buffer")?;
    Ok(buffers[0])
}

/// Plain binary semaphore; the frame loop creates one per acquire and
/// destroys it after the matching present.
pub fn create_semaphore(ctx: &DeviceContext) -> Result<vk::Semaphore> {
    let info = vk::SemaphoreCreateInfo::default();
    unsafe { ctx.device.create_semaphore(&info, None) }.context("Failed to create semaphore")
}
