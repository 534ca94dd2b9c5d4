// Synchronization primitives
//
// One fence plus an image-acquired / render-finished semaphore pair per
// frame slot. The fence is the CPU-visible "slot is reusable" signal; the
// semaphores order acquire -> render -> present on the GPU timeline.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;

/// Synchronization objects for a single frame slot.
struct FrameSync {
    image_acquired: vk::Semaphore,
    render_finished: vk::Semaphore,
    in_flight_fence: vk::Fence,
}

impl FrameSync {
    fn new(device: &VulkanDevice) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Start signaled so the first frame does not wait on a fence that
        // nothing will ever signal.
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            Ok(Self {
                image_acquired: device.device.create_semaphore(&semaphore_info, None)?,
                render_finished: device.device.create_semaphore(&semaphore_info, None)?,
                in_flight_fence: device.device.create_fence(&fence_info, None)?,
            })
        }
    }
}

/// Per-slot synchronization objects for every frame in flight.
///
/// Created once at startup and never rebuilt; surface recreation does not
/// touch these.
pub struct FrameSyncSet {
    frames: Vec<FrameSync>,
    device: Arc<VulkanDevice>,
}

impl FrameSyncSet {
    pub fn new(device: Arc<VulkanDevice>, frame_count: usize) -> Result<Self> {
        let frames = (0..frame_count)
            .map(|_| FrameSync::new(&device))
            .collect::<Result<Vec<_>>>()
            .context("Failed to create frame synchronization objects")?;

        log::info!("Created synchronization for {} frames in flight", frame_count);

        Ok(Self { frames, device })
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn image_acquired(&self, slot: usize) -> vk::Semaphore {
        self.frames[slot].image_acquired
    }

    pub fn render_finished(&self, slot: usize) -> vk::Semaphore {
        self.frames[slot].render_finished
    }

    pub fn fence(&self, slot: usize) -> vk::Fence {
        self.frames[slot].in_flight_fence
    }

    /// Block until the slot's previous submission has retired.
    pub fn wait(&self, slot: usize, timeout_ns: u64) -> Result<()> {
        unsafe {
            self.device
                .device
                .wait_for_fences(&[self.frames[slot].in_flight_fence], true, timeout_ns)
        }
        .with_context(|| format!("Fence for frame slot {slot} was not signaled within the wait bound"))
    }

    /// Reset the slot's fence to unsignaled. Only valid after `wait` returned.
    pub fn reset(&self, slot: usize) -> Result<()> {
        unsafe {
            self.device
                .device
                .reset_fences(&[self.frames[slot].in_flight_fence])
        }
        .context("Failed to reset frame fence")
    }
}

impl Drop for FrameSyncSet {
    fn drop(&mut self) {
        unsafe {
            for sync in &self.frames {
                self.device.device.destroy_semaphore(sync.image_acquired, None);
                self.device.device.destroy_semaphore(sync.render_finished, None);
                self.device.device.destroy_fence(sync.in_flight_fence, None);
            }
        }
    }
}
