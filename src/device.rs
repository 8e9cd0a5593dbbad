//! Physical device selection and the logical device wrapper.

use anyhow::Context as _;
use ash::{extensions::khr, vk};
use derive_more::{Deref, DerefMut};
use std::ffi::CStr;

use crate::{
    command::{CommandBuffer, CommandPool},
    sync::Fence,
    Error, Result,
};

/// Policy for picking a physical device among the enumerated candidates,
/// ranked by total device-local heap size.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[must_use]
pub enum DeviceSearchStrategy {
    /// Pick the device with the largest device-local heap.
    HighestPerformance,
    /// Pick the device with the smallest device-local heap.
    LowestPerformance,
}

/// A selected physical device paired with its logical device and the single
/// graphics queue.
///
/// Queue-family selection is intentionally simplified: exactly one queue is
/// created on family index 0 with priority 1.0. Multi-queue support is a
/// known v1 limitation.
///
/// The logical device must be destroyed before the owning
/// [`Context`](crate::Context); every [`CommandPool`],
/// [`Swapchain`](crate::Swapchain), [`Fence`] and
/// [`Semaphore`](crate::Semaphore) created from it must be dropped first.
#[derive(Deref, DerefMut)]
#[must_use]
pub struct Device {
    physical: vk::PhysicalDevice,
    #[deref]
    #[deref_mut]
    handle: ash::Device,
    properties: vk::PhysicalDeviceProperties,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    queue: vk::Queue,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}

/// A physical device with the attributes the selection policy ranks on.
#[derive(Debug, Copy, Clone)]
struct Candidate {
    physical_device: vk::PhysicalDevice,
    heap_size: u64,
    dedicated: bool,
}

impl Device {
    /// Enumerate physical devices, rank them by device-local heap size and
    /// construct the logical device for the winner.
    pub(crate) fn select(
        instance: &ash::Instance,
        strategy: DeviceSearchStrategy,
        only_dedicated: bool,
    ) -> Result<Self> {
        tracing::debug!("selecting physical device");

        let physical_devices = unsafe { instance.enumerate_physical_devices() }
            .map_err(|code| Error::driver("failed to enumerate physical devices", code))?;

        let candidates = physical_devices
            .into_iter()
            .map(|physical_device| {
                let memory =
                    unsafe { instance.get_physical_device_memory_properties(physical_device) };
                let properties =
                    unsafe { instance.get_physical_device_properties(physical_device) };
                Candidate {
                    physical_device,
                    heap_size: device_local_heap_size(&memory),
                    dedicated: properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU,
                }
            })
            .collect();

        let selected = pick_candidate(candidates, strategy, only_dedicated)?;
        Self::create(instance, selected.physical_device)
    }

    /// Create the logical device and graphics queue for `physical_device`.
    fn create(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Result<Self> {
        tracing::debug!("creating logical device");

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        let queue_priorities = [1.0];
        let queue_create_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(0)
            .queue_priorities(&queue_priorities)
            .build();
        let enabled_extensions = [khr::Swapchain::name().as_ptr()];
        let mut vulkan13_features =
            vk::PhysicalDeviceVulkan13Features::builder().dynamic_rendering(true);
        let device_create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_extension_names(&enabled_extensions)
            .push_next(&mut vulkan13_features);

        // SAFETY: All create_info values are set correctly above with valid lifetimes.
        let handle =
            unsafe { instance.create_device(physical_device, &device_create_info, None) }
                .map_err(|code| Error::driver("failed to create logical device", code))?;
        let queue = unsafe { handle.get_device_queue(0, 0) };

        let device = Self {
            physical: physical_device,
            handle,
            properties,
            memory_properties,
            queue,
        };
        tracing::debug!("created logical device for `{}`", device.name());
        Ok(device)
    }

    /// The device name from the properties snapshot.
    #[must_use]
    pub fn name(&self) -> String {
        // SAFETY: device_name is provided by the driver and is a valid CStr.
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .to_string()
    }

    /// Allocate a temporary pool and buffer, record with the supplied
    /// function, submit to the graphics queue and block until the GPU
    /// finishes. The temporary pool, buffer and fence are released on every
    /// exit path, including when `record` fails.
    pub fn emit_command_buffer(
        &self,
        record: impl FnOnce(&CommandBuffer) -> Result<()>,
    ) -> Result<()> {
        tracing::debug!("submitting one-shot command buffer");

        let pool = CommandPool::new(self)?;
        let mut buffers = pool.allocate_command_buffers(1)?;
        let buffer = buffers
            .pop()
            .context("command buffer allocation returned no buffers")?;
        let fence = Fence::new(self)?;

        buffer.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        record(&buffer)?;
        buffer.end()?;

        let command_buffers = [buffer.handle()];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
        unsafe {
            self.handle
                .queue_submit(self.queue, std::slice::from_ref(&submit_info), fence.handle())
        }
        .map_err(|code| Error::driver("failed to submit one-shot command buffer", code))?;
        fence.wait_for(None)?;

        tracing::debug!("one-shot command buffer completed");
        Ok(())
    }

    /// Find a memory type index satisfying `type_filter` and `properties`, or
    /// `None` if the device offers no such memory.
    #[must_use]
    pub fn memory_type_index(
        &self,
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> Option<u32> {
        find_memory_type(&self.memory_properties, type_filter, properties)
    }

    #[inline]
    #[must_use]
    pub fn physical(&self) -> vk::PhysicalDevice {
        self.physical
    }

    #[inline]
    #[must_use]
    pub fn queue(&self) -> vk::Queue {
        self.queue
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        tracing::debug!("destroying logical device");
        unsafe {
            self.handle.destroy_device(None);
        }
    }
}

/// Sum the sizes of all memory heaps flagged `DEVICE_LOCAL`.
fn device_local_heap_size(memory: &vk::PhysicalDeviceMemoryProperties) -> u64 {
    memory.memory_heaps[..memory.memory_heap_count as usize]
        .iter()
        .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|heap| heap.size)
        .sum()
}

/// Apply the dedicated-only filter, stable-sort ascending by heap size and
/// pick according to `strategy`. Candidates with equal heap sizes keep their
/// enumeration order.
fn pick_candidate(
    mut candidates: Vec<Candidate>,
    strategy: DeviceSearchStrategy,
    only_dedicated: bool,
) -> Result<Candidate> {
    if only_dedicated {
        candidates.retain(|candidate| candidate.dedicated);
    }
    candidates.sort_by_key(|candidate| candidate.heap_size);
    let selected = match strategy {
        DeviceSearchStrategy::HighestPerformance => candidates.pop(),
        DeviceSearchStrategy::LowestPerformance => candidates.into_iter().next(),
    };
    selected.ok_or(Error::NoMatchingDevice)
}

/// Search `memory` for a type index matching `type_filter` with all of
/// `properties` set.
fn find_memory_type(
    memory: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..memory.memory_type_count).find(|&index| {
        let suitable = (type_filter & (1 << index)) != 0;
        let memory_type = memory.memory_types[index as usize];
        suitable && memory_type.property_flags.contains(properties)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn candidate(id: u64, heap_size: u64, dedicated: bool) -> Candidate {
        Candidate {
            physical_device: vk::PhysicalDevice::from_raw(id),
            heap_size,
            dedicated,
        }
    }

    #[test]
    fn highest_performance_picks_largest_heap() {
        let candidates = vec![
            candidate(1, 2 << 30, false),
            candidate(2, 8 << 30, true),
            candidate(3, 4 << 30, true),
        ];
        let selected =
            pick_candidate(candidates, DeviceSearchStrategy::HighestPerformance, false)
                .expect("selection should succeed");
        assert_eq!(selected.physical_device.as_raw(), 2);
    }

    #[test]
    fn lowest_performance_picks_smallest_heap() {
        let candidates = vec![
            candidate(1, 2 << 30, false),
            candidate(2, 8 << 30, true),
            candidate(3, 4 << 30, true),
        ];
        let selected =
            pick_candidate(candidates, DeviceSearchStrategy::LowestPerformance, false)
                .expect("selection should succeed");
        assert_eq!(selected.physical_device.as_raw(), 1);
    }

    #[test]
    fn equal_heaps_stay_in_enumeration_order() {
        let candidates = vec![
            candidate(1, 4 << 30, false),
            candidate(2, 4 << 30, false),
        ];
        let selected =
            pick_candidate(candidates, DeviceSearchStrategy::HighestPerformance, false)
                .expect("selection should succeed");
        // Stable sort keeps enumeration order for equal keys, so the last
        // enumerated device wins for the highest-performance strategy.
        assert_eq!(selected.physical_device.as_raw(), 2);
    }

    #[test]
    fn dedicated_filter_rejects_integrated_devices() {
        let candidates = vec![
            candidate(1, 16 << 30, false),
            candidate(2, 2 << 30, true),
        ];
        let selected = pick_candidate(candidates, DeviceSearchStrategy::HighestPerformance, true)
            .expect("selection should succeed");
        assert_eq!(selected.physical_device.as_raw(), 2);
    }

    #[test]
    fn dedicated_filter_with_no_discrete_gpu_fails() {
        let candidates = vec![
            candidate(1, 16 << 30, false),
            candidate(2, 2 << 30, false),
        ];
        let result = pick_candidate(candidates, DeviceSearchStrategy::HighestPerformance, true);
        assert!(matches!(result, Err(Error::NoMatchingDevice)));
    }

    #[test]
    fn empty_candidate_list_fails() {
        let result = pick_candidate(vec![], DeviceSearchStrategy::LowestPerformance, false);
        assert!(matches!(result, Err(Error::NoMatchingDevice)));
    }

    #[test]
    fn heap_size_sums_only_device_local_heaps() {
        let mut memory = vk::PhysicalDeviceMemoryProperties::default();
        memory.memory_heap_count = 3;
        memory.memory_heaps[0] = vk::MemoryHeap {
            size: 4 << 30,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
        };
        memory.memory_heaps[1] = vk::MemoryHeap {
            size: 16 << 30,
            flags: vk::MemoryHeapFlags::empty(),
        };
        memory.memory_heaps[2] = vk::MemoryHeap {
            size: 2 << 30,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL | vk::MemoryHeapFlags::MULTI_INSTANCE,
        };
        assert_eq!(device_local_heap_size(&memory), 6 << 30);
    }

    #[test]
    fn heap_size_is_zero_without_device_local_heaps() {
        let mut memory = vk::PhysicalDeviceMemoryProperties::default();
        memory.memory_heap_count = 1;
        memory.memory_heaps[0] = vk::MemoryHeap {
            size: 8 << 30,
            flags: vk::MemoryHeapFlags::empty(),
        };
        assert_eq!(device_local_heap_size(&memory), 0);
    }

    #[test]
    fn memory_type_search_honors_filter_and_flags() {
        let mut memory = vk::PhysicalDeviceMemoryProperties::default();
        memory.memory_type_count = 3;
        memory.memory_types[0] = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            heap_index: 0,
        };
        memory.memory_types[1] = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT,
            heap_index: 1,
        };
        memory.memory_types[2] = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::HOST_VISIBLE,
            heap_index: 1,
        };

        let host_visible = vk::MemoryPropertyFlags::HOST_VISIBLE
            | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert_eq!(find_memory_type(&memory, 0b111, host_visible), Some(1));
        // Type 1 masked out by the filter; no other type has both flags.
        assert_eq!(find_memory_type(&memory, 0b101, host_visible), None);
        assert_eq!(
            find_memory_type(&memory, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            Some(0)
        );
    }
}
