//! Per-frame acquire/record/submit/present orchestration.

use anyhow::Context as _;
use ash::vk;
use winit::window::Window;

use crate::{
    command::{CommandBuffer, CommandPool},
    context::Context,
    device::{Device, DeviceSearchStrategy},
    swapchain::Swapchain,
    sync::{Fence, Semaphore},
    Error, Result,
};

/// Drives the double-buffered present cycle: acquire image, record commands,
/// submit, present.
///
/// Exactly one command buffer is reused (reset, not reallocated) every frame,
/// and at most one frame's commands are in flight at any time; the
/// post-submit fence wait bounds each frame before the next begins. Frame
/// pipelining is an explicit non-goal.
pub struct Renderer {
    // Field order doubles as drop order: sync objects and the command buffer
    // go before the pool, everything before the device.
    image_available: Semaphore,
    rendering_done: Semaphore,
    command_buffer: CommandBuffer,
    command_pool: CommandPool,
    swapchain: Swapchain,
    device: Device,
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("device", &self.device)
            .field("swapchain", &self.swapchain)
            .finish_non_exhaustive()
    }
}

impl Renderer {
    /// Select a device on `context` with the given strategy, then build the
    /// command pool, single reusable command buffer, swapchain (sized to the
    /// window) and the two per-renderer semaphores.
    pub fn new(
        context: &Context,
        window: &Window,
        strategy: DeviceSearchStrategy,
        only_dedicated: bool,
    ) -> Result<Self> {
        tracing::debug!("creating renderer");

        let device = context.find_device(strategy, only_dedicated)?;
        let command_pool = CommandPool::new(&device)?;
        let command_buffer = command_pool
            .allocate_command_buffers(1)?
            .pop()
            .context("command buffer allocation returned no buffers")?;

        let size = window.inner_size();
        let extent = vk::Extent2D {
            width: size.width,
            height: size.height,
        };
        let swapchain = Swapchain::new(context, &device, extent)?;

        let image_available = Semaphore::new(&device)?;
        let rendering_done = Semaphore::new(&device)?;

        tracing::debug!("created renderer on `{}`", device.name());

        Ok(Self {
            image_available,
            rendering_done,
            command_buffer,
            command_pool,
            swapchain,
            device,
        })
    }

    /// Render one frame with a no-op draw pass: the acquired image is
    /// cleared to opaque black and presented.
    pub fn render(&mut self) -> Result<()> {
        self.render_with(|_| Ok(()))
    }

    /// Render one frame, invoking `draw` inside the dynamic-rendering pass
    /// over the acquired image.
    ///
    /// Any driver call returning non-success aborts the frame immediately
    /// with a propagated error; there is no partial-frame recovery and no
    /// swapchain recreation on out-of-date results.
    pub fn render_with(&mut self, draw: impl FnOnce(&CommandBuffer) -> Result<()>) -> Result<()> {
        // Discard last frame's recording.
        self.command_pool.reset()?;
        self.command_buffer.reset()?;

        let image_index = self.swapchain.next_image(&self.image_available)?;
        let image = self.swapchain.current_image()?;
        let image_view = self.swapchain.current_image_view()?;

        self.command_buffer
            .begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;

        transition_image(
            &self.device,
            &self.command_buffer,
            image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        )?;

        let clear_value = vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [0.0, 0.0, 0.0, 1.0],
            },
        };
        let color_attachment = vk::RenderingAttachmentInfo::builder()
            .image_view(image_view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(clear_value);
        let rendering_info = vk::RenderingInfo::builder()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.swapchain.extent(),
            })
            .layer_count(1)
            .color_attachments(std::slice::from_ref(&color_attachment));

        unsafe {
            self.device
                .cmd_begin_rendering(self.command_buffer.handle(), &rendering_info);
        }
        draw(&self.command_buffer)?;
        unsafe {
            self.device.cmd_end_rendering(self.command_buffer.handle());
        }

        transition_image(
            &self.device,
            &self.command_buffer,
            image,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        )?;

        self.command_buffer.end()?;

        // Submit, bounded by a fresh one-shot fence. The fence wait keeps the
        // single command buffer from being reused while the GPU still owns it.
        let submit_fence = Fence::new(&self.device)?;
        let wait_semaphores = [self.image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [self.command_buffer.handle()];
        let signal_semaphores = [self.rendering_done.handle()];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);
        unsafe {
            self.device.queue_submit(
                self.device.queue(),
                std::slice::from_ref(&submit_info),
                submit_fence.handle(),
            )
        }
        .map_err(|code| Error::driver("failed to submit frame", code))?;
        submit_fence.wait_for(None)?;

        let swapchains = [self.swapchain.handle()];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&signal_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        unsafe {
            self.swapchain
                .loader()
                .queue_present(self.device.queue(), &present_info)
        }
        .map_err(|code| Error::driver("failed to present frame", code))?;

        Ok(())
    }

    /// The device this renderer submits to. Exposed for overlay subsystems
    /// that hook into the same queue.
    #[inline]
    #[must_use]
    pub fn device(&self) -> &Device {
        &self.device
    }

    #[inline]
    #[must_use]
    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    #[inline]
    #[must_use]
    pub fn command_buffer(&self) -> &CommandBuffer {
        &self.command_buffer
    }
}

/// Record a pipeline barrier transitioning `image` between the given layouts.
/// Fails for transition pairs outside the supported table.
fn transition_image(
    device: &Device,
    command_buffer: &CommandBuffer,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> Result<()> {
    let (src_access_mask, dst_access_mask) = access_mask_flags(old_layout, new_layout)
        .with_context(|| {
            format!("unsupported image layout transition: {old_layout:?} -> {new_layout:?}")
        })?;
    let (src_stage_mask, dst_stage_mask) = stage_mask_flags(old_layout, new_layout)
        .with_context(|| {
            format!("unsupported image layout transition: {old_layout:?} -> {new_layout:?}")
        })?;

    let barrier = vk::ImageMemoryBarrier::builder()
        .src_access_mask(src_access_mask)
        .dst_access_mask(dst_access_mask)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(
            vk::ImageSubresourceRange::builder()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .base_mip_level(0)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(1)
                .build(),
        );

    unsafe {
        device.cmd_pipeline_barrier(
            command_buffer.handle(),
            src_stage_mask,
            dst_stage_mask,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            std::slice::from_ref(&barrier),
        );
    }
    Ok(())
}

/// Source and destination access masks for the supported layout-transition
/// pairs; `None` for any pair outside the table.
#[must_use]
pub fn access_mask_flags(
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> Option<(vk::AccessFlags, vk::AccessFlags)> {
    match (old_layout, new_layout) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => {
            Some((vk::AccessFlags::NONE, vk::AccessFlags::TRANSFER_WRITE))
        }
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL) => {
            Some((vk::AccessFlags::NONE, vk::AccessFlags::NONE))
        }
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => {
            Some((vk::AccessFlags::TRANSFER_WRITE, vk::AccessFlags::SHADER_READ))
        }
        (vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, vk::ImageLayout::PRESENT_SRC_KHR) => {
            Some((vk::AccessFlags::NONE, vk::AccessFlags::NONE))
        }
        _ => None,
    }
}

/// Pipeline stage masks matching the transitions in [`access_mask_flags`].
fn stage_mask_flags(
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> Option<(vk::PipelineStageFlags, vk::PipelineStageFlags)> {
    match (old_layout, new_layout) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => Some((
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
        )),
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL) => Some((
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        )),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => {
            Some((
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
            ))
        }
        (vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, vk::ImageLayout::PRESENT_SRC_KHR) => Some((
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_masks_for_transfer_destination() {
        assert_eq!(
            access_mask_flags(
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL
            ),
            Some((vk::AccessFlags::NONE, vk::AccessFlags::TRANSFER_WRITE))
        );
    }

    #[test]
    fn access_masks_for_color_attachment() {
        assert_eq!(
            access_mask_flags(
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
            ),
            Some((vk::AccessFlags::NONE, vk::AccessFlags::NONE))
        );
    }

    #[test]
    fn access_masks_for_shader_read() {
        assert_eq!(
            access_mask_flags(
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
            ),
            Some((vk::AccessFlags::TRANSFER_WRITE, vk::AccessFlags::SHADER_READ))
        );
    }

    #[test]
    fn access_masks_for_present() {
        assert_eq!(
            access_mask_flags(
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::ImageLayout::PRESENT_SRC_KHR
            ),
            Some((vk::AccessFlags::NONE, vk::AccessFlags::NONE))
        );
    }

    #[test]
    fn unknown_transitions_have_no_masks() {
        assert_eq!(
            access_mask_flags(
                vk::ImageLayout::PRESENT_SRC_KHR,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
            ),
            None
        );
        assert_eq!(
            access_mask_flags(vk::ImageLayout::GENERAL, vk::ImageLayout::GENERAL),
            None
        );
    }

    #[test]
    fn stage_masks_cover_the_same_table() {
        let pairs = [
            (
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ),
            (
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ),
            (
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ),
            (
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::ImageLayout::PRESENT_SRC_KHR,
            ),
        ];
        for (old_layout, new_layout) in pairs {
            assert!(access_mask_flags(old_layout, new_layout).is_some());
            assert!(stage_mask_flags(old_layout, new_layout).is_some());
        }
        assert_eq!(
            stage_mask_flags(vk::ImageLayout::GENERAL, vk::ImageLayout::GENERAL),
            None
        );
    }
}
