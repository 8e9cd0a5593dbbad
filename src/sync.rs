//! Fence and semaphore wrappers.

use ash::vk;
use std::time::Duration;

use crate::{device::Device, Error, Result};

/// A GPU-to-CPU synchronization primitive: the host blocks in
/// [`wait_for`](Fence::wait_for) until the GPU signals completion.
///
/// Created unsignaled, used for a single wait and dropped afterwards in the
/// one-shot pattern.
pub struct Fence {
    device: ash::Device,
    handle: vk::Fence,
}

impl std::fmt::Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fence").finish_non_exhaustive()
    }
}

impl Fence {
    /// Create an unsignaled fence on `device`.
    pub fn new(device: &Device) -> Result<Self> {
        let fence_create_info = vk::FenceCreateInfo::builder();
        let handle = unsafe { device.create_fence(&fence_create_info, None) }
            .map_err(|code| Error::driver("failed to create fence", code))?;
        Ok(Self {
            device: (**device).clone(),
            handle,
        })
    }

    /// Block the calling thread until the fence signals or `timeout` elapses.
    /// `None` waits effectively unbounded. A timeout surfaces as a driver
    /// error.
    pub fn wait_for(&self, timeout: Option<Duration>) -> Result<()> {
        let timeout_ns = timeout.map_or(u64::MAX, |timeout| {
            u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
        });
        unsafe {
            self.device
                .wait_for_fences(std::slice::from_ref(&self.handle), true, timeout_ns)
        }
        .map_err(|code| Error::driver("failed to wait for fence", code))
    }

    #[inline]
    #[must_use]
    pub fn handle(&self) -> vk::Fence {
        self.handle
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.handle, None);
        }
    }
}

/// A GPU-to-GPU synchronization primitive ordering queue operations. Never
/// observed by the host.
pub struct Semaphore {
    device: ash::Device,
    handle: vk::Semaphore,
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Semaphore").finish_non_exhaustive()
    }
}

impl Semaphore {
    /// Create a binary semaphore on `device`.
    pub fn new(device: &Device) -> Result<Self> {
        let semaphore_create_info = vk::SemaphoreCreateInfo::builder();
        let handle = unsafe { device.create_semaphore(&semaphore_create_info, None) }
            .map_err(|code| Error::driver("failed to create semaphore", code))?;
        Ok(Self {
            device: (**device).clone(),
            handle,
        })
    }

    #[inline]
    #[must_use]
    pub fn handle(&self) -> vk::Semaphore {
        self.handle
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.handle, None);
        }
    }
}
