// Command recording
//
// A pool with one primary buffer per frame slot. Buffers are reset and
// re-recorded every frame; the fence protocol guarantees the GPU is done
// with a slot before its buffer is touched again.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;

/// Everything one draw pass needs, borrowed from the owning scheduler.
/// All fields are non-owning handles valid for the duration of the call.
pub struct DrawContext {
    pub render_pass: vk::RenderPass,
    pub pipeline: vk::Pipeline,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub vertex_buffer: vk::Buffer,
    pub vertex_count: u32,
    pub clear_color: [f32; 4],
}

pub struct CommandRecorder {
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
    device: Arc<VulkanDevice>,
}

impl CommandRecorder {
    /// Create the pool and allocate one reusable buffer per frame slot.
    /// Neither is recreated on surface invalidation.
    pub fn new(device: Arc<VulkanDevice>, frame_count: usize) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.graphics_queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(frame_count as u32);

        let buffers = match unsafe { device.device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers,
            Err(e) => {
                unsafe { device.device.destroy_command_pool(pool, None) };
                return Err(e).context("Failed to allocate command buffers");
            }
        };

        log::info!("Allocated {} command buffers", buffers.len());

        Ok(Self {
            pool,
            buffers,
            device,
        })
    }

    /// Re-record the slot's buffer for one draw pass over `ctx`.
    ///
    /// Touches only the single buffer belonging to `slot`. The caller must
    /// have observed the slot's fence signaled before calling this.
    pub fn record(&self, slot: usize, ctx: &DrawContext) -> Result<vk::CommandBuffer> {
        let cmd = self.buffers[slot];
        let device = &self.device.device;

        unsafe {
            device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .context("Failed to reset command buffer")?;

            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device
                .begin_command_buffer(cmd, &begin_info)
                .context("Failed to begin command buffer")?;

            let clear_values = [vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: ctx.clear_color,
                },
            }];
            let pass_info = vk::RenderPassBeginInfo::builder()
                .render_pass(ctx.render_pass)
                .framebuffer(ctx.framebuffer)
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: ctx.extent,
                })
                .clear_values(&clear_values);
            device.cmd_begin_render_pass(cmd, &pass_info, vk::SubpassContents::INLINE);

            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, ctx.pipeline);

            // Viewport and scissor are dynamic pipeline state, re-specified
            // from the current extent.
            let viewport = vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: ctx.extent.width as f32,
                height: ctx.extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            device.cmd_set_viewport(cmd, 0, &[viewport]);

            let scissor = vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: ctx.extent,
            };
            device.cmd_set_scissor(cmd, 0, &[scissor]);

            device.cmd_bind_vertex_buffers(cmd, 0, &[ctx.vertex_buffer], &[0]);
            device.cmd_draw(cmd, ctx.vertex_count, 1, 0, 0);

            device.cmd_end_render_pass(cmd);
            device
                .end_command_buffer(cmd)
                .context("Failed to end command buffer")?;
        }

        Ok(cmd)
    }
}

impl Drop for CommandRecorder {
    fn drop(&mut self) {
        // Destroying the pool frees its buffers.
        unsafe { self.device.device.destroy_command_pool(self.pool, None) };
    }
}
