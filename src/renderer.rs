// Frame scheduling
//
// Owns every Vulkan resource behind the window surface and drives the
// steady-state loop: wait on the slot fence, acquire an image, record,
// submit, present, advance. Surface invalidation from any source funnels
// into a single recreation path that rebuilds only the surface-derived
// bundle.
//
// FRAME TIMELINE (slot s):
//   wait Fence[s] -> acquire (signals acquired[s]) -> reset Fence[s]
//   -> record[s] -> submit (waits acquired[s], signals finished[s] + Fence[s])
//   -> present (waits finished[s]) -> s = (s + 1) % F

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use winit::window::Window;

use crate::backend::buffer::{VertexBuffer, TRIANGLE_VERTICES};
use crate::backend::commands::{CommandRecorder, DrawContext};
use crate::backend::pipeline::GraphicsPipeline;
use crate::backend::swapchain::{self, AcquireOutcome, PresentOutcome, SurfaceResources};
use crate::backend::sync::FrameSyncSet;
use crate::backend::VulkanDevice;
use crate::config::Config;

/// Upper bound on a slot-fence wait. Exceeding it means the GPU timeline
/// has stalled; the protocol treats that as unrecoverable.
const FENCE_WAIT_TIMEOUT_NS: u64 = 10_000_000_000;

const VERT_SHADER_PATH: &str = "shaders/triangle.vert.spv";
const FRAG_SHADER_PATH: &str = "shaders/triangle.frag.spv";

/// What a call to [`Renderer::draw_frame`] did.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FrameOutcome {
    /// A frame was submitted and queued for presentation.
    Presented,
    /// The surface was invalidated; resources were rebuilt and the same
    /// frame slot will be retried next iteration.
    Recreated,
}

/// Owned surface handle, dropped after everything built on top of it.
struct WindowSurface {
    surface: vk::SurfaceKHR,
    loader: khr::Surface,
}

impl Drop for WindowSurface {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.surface, None) };
    }
}

pub struct Renderer {
    // Field order is teardown order: bundle, recorder, sync, vertex data,
    // pipeline, surface, device.
    surface_resources: Option<SurfaceResources>,
    recorder: CommandRecorder,
    sync: FrameSyncSet,
    vertex_buffer: VertexBuffer,
    pipeline: GraphicsPipeline,
    surface: WindowSurface,
    device: Arc<VulkanDevice>,

    surface_format: vk::SurfaceFormatKHR,
    preferred_present_mode: vk::PresentModeKHR,
    clear_color: [f32; 4],
    current_frame: usize,
}

impl Renderer {
    /// Build the whole pipeline against `window`, collaborators first.
    pub fn new(window: &Window, config: &Config) -> Result<Self> {
        let enable_validation = cfg!(debug_assertions) && config.debug.validation_layers;

        let display_handle = window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();
        let window_handle = window
            .window_handle()
            .context("Failed to get window handle")?
            .as_raw();

        let device = VulkanDevice::new(&config.window.title, display_handle, enable_validation)?;

        let loader = khr::Surface::new(device.entry(), &device.instance);
        let surface_handle = unsafe {
            ash_window::create_surface(
                device.entry(),
                &device.instance,
                display_handle,
                window_handle,
                None,
            )
        }
        .context("Failed to create window surface")?;
        let surface = WindowSurface {
            surface: surface_handle,
            loader,
        };

        let supported = unsafe {
            surface.loader.get_physical_device_surface_support(
                device.physical_device,
                device.graphics_queue_family,
                surface.surface,
            )
        }
        .context("Failed to query surface support")?;
        if !supported {
            anyhow::bail!("The graphics queue cannot present to this surface");
        }

        let surface_format = swapchain::select_surface_format(&device, &surface.loader, surface.surface)?;
        let preferred_present_mode = config.graphics.get_present_mode();

        let pipeline = GraphicsPipeline::new(
            device.clone(),
            surface_format.format,
            Path::new(VERT_SHADER_PATH),
            Path::new(FRAG_SHADER_PATH),
        )?;

        let vertex_buffer = VertexBuffer::new(device.clone(), &TRIANGLE_VERTICES)?;

        let frame_count = config.graphics.max_frames_in_flight;
        let sync = FrameSyncSet::new(device.clone(), frame_count)?;
        let recorder = CommandRecorder::new(device.clone(), frame_count)?;

        let size = window.inner_size();
        let surface_resources = SurfaceResources::new(
            device.clone(),
            surface.surface,
            &surface.loader,
            pipeline.render_pass,
            surface_format,
            preferred_present_mode,
            (size.width, size.height),
        )?;

        log::info!("Renderer initialized");

        Ok(Self {
            surface_resources: Some(surface_resources),
            recorder,
            sync,
            vertex_buffer,
            pipeline,
            surface,
            device,
            surface_format,
            preferred_present_mode,
            clear_color: config.graphics.clear_color,
            current_frame: 0,
        })
    }

    /// Run one iteration of the frame loop.
    ///
    /// `resize_requested` is the window host's resize flag, consumed by the
    /// caller once per frame; it folds into the post-present recreation
    /// decision. The frame slot advances only on a clean present.
    pub fn draw_frame(&mut self, window: &Window, resize_requested: bool) -> Result<FrameOutcome> {
        let slot = self.current_frame;

        self.sync.wait(slot, FENCE_WAIT_TIMEOUT_NS)?;

        let resources = self
            .surface_resources
            .as_ref()
            .context("Surface resources not initialized")?;

        let (image_index, acquire_suboptimal) =
            match resources.acquire_next_image(self.sync.image_acquired(slot))? {
                AcquireOutcome::Ready {
                    image_index,
                    suboptimal,
                } => (image_index, suboptimal),
                AcquireOutcome::OutOfDate => {
                    log::debug!("Swapchain out of date during acquire");
                    self.recreate_surface_resources(window)?;
                    return Ok(FrameOutcome::Recreated);
                }
            };

        // The wait above proved the slot's previous submission retired; only
        // now is it safe to unsignal the fence and touch the slot's buffer.
        self.sync.reset(slot)?;

        let ctx = DrawContext {
            render_pass: self.pipeline.render_pass,
            pipeline: self.pipeline.pipeline,
            framebuffer: resources.framebuffer(image_index),
            extent: resources.extent(),
            vertex_buffer: self.vertex_buffer.buffer,
            vertex_count: self.vertex_buffer.vertex_count(),
            clear_color: self.clear_color,
        };
        let cmd = self.recorder.record(slot, &ctx)?;

        self.submit(slot, cmd)?;

        let outcome =
            resources.present(self.device.graphics_queue, image_index, self.sync.render_finished(slot))?;

        if should_recreate_after_present(outcome, acquire_suboptimal, resize_requested) {
            log::debug!("Surface invalidated after present ({outcome:?})");
            self.recreate_surface_resources(window)?;
            return Ok(FrameOutcome::Recreated);
        }

        self.current_frame = next_frame_slot(slot, self.sync.frame_count());
        Ok(FrameOutcome::Presented)
    }

    /// Submit the recorded buffer for `slot`: wait for the acquired image at
    /// color output, signal render-finished, and fence the slot.
    fn submit(&self, slot: usize, cmd: vk::CommandBuffer) -> Result<()> {
        let wait_semaphores = [self.sync.image_acquired(slot)];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [self.sync.render_finished(slot)];
        let command_buffers = [cmd];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info.build()],
                self.sync.fence(slot),
            )
        }
        .context("Failed to submit graphics queue")
    }

    /// Tear down and rebuild everything derived from the surface extent.
    ///
    /// Blocks while the drawable is zero-sized, then requires a fully idle
    /// device before releasing the old bundle. Synchronization objects, the
    /// command pool, and the viewport-dynamic pipeline are left alone.
    fn recreate_surface_resources(&mut self, window: &Window) -> Result<()> {
        let (width, height) = wait_for_drawable_extent(
            || {
                let size = window.inner_size();
                (size.width, size.height)
            },
            || std::thread::sleep(Duration::from_millis(20)),
        );

        self.device.wait_idle()?;

        // The old bundle must be fully gone before the surface will accept
        // a new swapchain.
        self.surface_resources = None;

        let resources = SurfaceResources::new(
            self.device.clone(),
            self.surface.surface,
            &self.surface.loader,
            self.pipeline.render_pass,
            self.surface_format,
            self.preferred_present_mode,
            (width, height),
        )?;
        self.surface_resources = Some(resources);

        log::info!("Surface resources recreated at {}x{}", width, height);
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        // Nothing owned here may be released while the GPU still references
        // it; field order handles the rest.
        if let Err(e) = self.device.wait_idle() {
            log::error!("Device wait failed during renderer teardown: {e:#}");
        }
    }
}

fn next_frame_slot(current: usize, frames_in_flight: usize) -> usize {
    (current + 1) % frames_in_flight
}

/// Post-present decision: any of the three invalidation signals triggers
/// exactly one recreation pass.
fn should_recreate_after_present(
    outcome: PresentOutcome,
    acquire_suboptimal: bool,
    resize_requested: bool,
) -> bool {
    outcome != PresentOutcome::Presented || acquire_suboptimal || resize_requested
}

fn extent_is_renderable(width: u32, height: u32) -> bool {
    width > 0 && height > 0
}

/// Poll the drawable size until both dimensions are non-zero, parking
/// between polls. A minimized window sits here until it is restored.
fn wait_for_drawable_extent(
    mut drawable_size: impl FnMut() -> (u32, u32),
    mut park: impl FnMut(),
) -> (u32, u32) {
    loop {
        let (width, height) = drawable_size();
        if extent_is_renderable(width, height) {
            return (width, height);
        }
        park();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    #[test]
    fn slots_alternate_under_steady_presents() {
        // Two frames in flight, a three-image queue: ten clean frames use
        // slots 0/1/0/1/... while image indices cycle independently.
        let mut slot = 0;
        let mut image = 0u32;
        let mut presented = Vec::new();

        for _ in 0..10 {
            assert!(!should_recreate_after_present(
                PresentOutcome::Presented,
                false,
                false
            ));
            presented.push((slot, image));
            image = (image + 1) % 3;
            slot = next_frame_slot(slot, 2);
        }

        assert_eq!(presented.len(), 10);
        let slots: Vec<usize> = presented.iter().map(|&(s, _)| s).collect();
        assert_eq!(slots, vec![0, 1, 0, 1, 0, 1, 0, 1, 0, 1]);
        assert!(presented.iter().all(|&(_, i)| i < 3));
    }

    #[test]
    fn out_of_date_acquire_retries_on_the_same_slot() {
        // Iteration 5's acquire comes back out of date: the frame counter
        // stays put and the next iteration reuses the slot.
        let mut slot = 0;
        let mut used = Vec::new();

        for i in 0..8 {
            used.push(slot);
            let acquire_out_of_date = i == 5;
            if acquire_out_of_date {
                // Recreation path: return without advancing.
                continue;
            }
            slot = next_frame_slot(slot, 2);
        }

        assert_eq!(used, vec![0, 1, 0, 1, 0, 1, 1, 0]);
    }

    #[test]
    fn concurrent_invalidation_signals_collapse_to_one_recreation() {
        // Suboptimal present and a raised resize flag at the same time is
        // still a single recreation decision.
        assert!(should_recreate_after_present(
            PresentOutcome::Suboptimal,
            false,
            true
        ));
    }

    #[test]
    fn each_invalidation_signal_triggers_recreation() {
        assert!(should_recreate_after_present(
            PresentOutcome::OutOfDate,
            false,
            false
        ));
        assert!(should_recreate_after_present(
            PresentOutcome::Suboptimal,
            false,
            false
        ));
        assert!(should_recreate_after_present(
            PresentOutcome::Presented,
            true,
            false
        ));
        assert!(should_recreate_after_present(
            PresentOutcome::Presented,
            false,
            true
        ));
        assert!(!should_recreate_after_present(
            PresentOutcome::Presented,
            false,
            false
        ));
    }

    #[test]
    fn zero_extent_blocks_until_drawable() {
        // A half-collapsed drawable (0, 480) is not renderable; recreation
        // polls until both dimensions are positive.
        let sizes = RefCell::new(vec![(0, 480), (0, 480), (800, 600)]);
        let parks = Cell::new(0);

        let extent = wait_for_drawable_extent(
            || sizes.borrow_mut().remove(0),
            || parks.set(parks.get() + 1),
        );

        assert_eq!(extent, (800, 600));
        assert_eq!(parks.get(), 2);
    }

    #[test]
    fn renderable_extent_requires_both_dimensions() {
        assert!(extent_is_renderable(800, 600));
        assert!(!extent_is_renderable(0, 480));
        assert!(!extent_is_renderable(640, 0));
        assert!(!extent_is_renderable(0, 0));
    }

    #[test]
    fn frame_slots_wrap() {
        assert_eq!(next_frame_slot(0, 2), 1);
        assert_eq!(next_frame_slot(1, 2), 0);
        assert_eq!(next_frame_slot(2, 3), 0);
    }
}
