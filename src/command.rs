//! Command pool and command buffer wrappers.

use ash::vk;

use crate::{device::Device, Error, Result};

/// A device-scoped allocation arena for command buffers, bound to the
/// device's single graphics queue family.
///
/// The pool is created with the reset-individual-buffer capability so buffers
/// can be reset and re-recorded without a pool-wide reset. It must be dropped
/// before the [`Device`] it was created from.
pub struct CommandPool {
    device: ash::Device,
    handle: vk::CommandPool,
}

impl std::fmt::Debug for CommandPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandPool").finish_non_exhaustive()
    }
}

impl CommandPool {
    /// Create a command pool on the device's graphics queue family.
    pub fn new(device: &Device) -> Result<Self> {
        tracing::debug!("creating command pool");

        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(0);
        let handle = unsafe { device.create_command_pool(&pool_create_info, None) }
            .map_err(|code| Error::driver("failed to create command pool", code))?;

        tracing::debug!("created command pool successfully");

        Ok(Self {
            device: (**device).clone(),
            handle,
        })
    }

    /// Allocate `count` primary command buffers from this pool.
    ///
    /// The returned buffers hold a non-owning back-reference to this pool,
    /// used only to free the allocation on drop; they must not outlive the
    /// pool.
    pub fn allocate_command_buffers(&self, count: u32) -> Result<Vec<CommandBuffer>> {
        let buffer_alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.handle)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        let buffers = unsafe { self.device.allocate_command_buffers(&buffer_alloc_info) }
            .map_err(|code| Error::driver("failed to allocate command buffers", code))?;
        Ok(buffers
            .into_iter()
            .map(|handle| CommandBuffer {
                device: self.device.clone(),
                pool: self.handle,
                handle,
            })
            .collect())
    }

    /// Reset the whole pool, returning its resources to the system.
    pub fn reset(&self) -> Result<()> {
        unsafe {
            self.device
                .reset_command_pool(self.handle, vk::CommandPoolResetFlags::RELEASE_RESOURCES)
        }
        .map_err(|code| Error::driver("failed to reset command pool", code))
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.handle, None);
        }
    }
}

/// A recorded sequence of GPU commands, allocated from a [`CommandPool`].
pub struct CommandBuffer {
    device: ash::Device,
    // Non-owning back-reference, used only to free the allocation.
    pool: vk::CommandPool,
    handle: vk::CommandBuffer,
}

impl std::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBuffer").finish_non_exhaustive()
    }
}

impl CommandBuffer {
    /// Begin recording with the given usage flags. Fails with a forwarded
    /// driver error if the buffer is not in a resettable state.
    pub fn begin(&self, usage: vk::CommandBufferUsageFlags) -> Result<()> {
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(usage);
        unsafe { self.device.begin_command_buffer(self.handle, &begin_info) }
            .map_err(|code| Error::driver("failed to begin command buffer", code))
    }

    /// End recording.
    pub fn end(&self) -> Result<()> {
        unsafe { self.device.end_command_buffer(self.handle) }
            .map_err(|code| Error::driver("failed to end command buffer", code))
    }

    /// Reset this buffer so it can be re-recorded, discarding any previous
    /// recording.
    pub fn reset(&self) -> Result<()> {
        unsafe {
            self.device
                .reset_command_buffer(self.handle, vk::CommandBufferResetFlags::empty())
        }
        .map_err(|code| Error::driver("failed to reset command buffer", code))
    }

    /// The raw handle, for recording through the [`ash::Device`] entry points.
    #[inline]
    #[must_use]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device
                .free_command_buffers(self.pool, std::slice::from_ref(&self.handle));
        }
    }
}
