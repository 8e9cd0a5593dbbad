//! Vulkan swapchain.

use ash::{extensions::khr, vk};

use crate::{context::Context, device::Device, sync::Semaphore, Error, Result};

/// The double-buffered image count requested at construction.
pub const DEFAULT_IMAGE_COUNT: u32 = 2;

/// Owns the presentable images and image views and mediates acquire/present.
///
/// Created with a BGRA8-unorm sRGB-nonlinear format, FIFO (vsync-locked)
/// present mode and the extent of the window at construction time. The image
/// count is fixed for the lifetime of the swapchain; window-resize handling
/// and swapchain recreation are explicitly unimplemented.
///
/// Must be dropped before the [`Device`] that created it.
pub struct Swapchain {
    device: ash::Device,
    loader: khr::Swapchain,
    handle: vk::SwapchainKHR,
    format: vk::Format,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    current_image: Option<u32>,
}

impl std::fmt::Debug for Swapchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Swapchain")
            .field("extent", &self.extent)
            .field("image_count", &self.images.len())
            .finish_non_exhaustive()
    }
}

impl Swapchain {
    /// Create a swapchain over the context's surface with `extent` taken from
    /// the current window size.
    pub fn new(context: &Context, device: &Device, extent: vk::Extent2D) -> Result<Self> {
        tracing::debug!("creating swapchain: {extent:?}");

        let capabilities = context.surface_capabilities(device)?;
        let min_image_count = clamp_image_count(DEFAULT_IMAGE_COUNT, &capabilities);
        let format = vk::Format::B8G8R8A8_UNORM;

        let swapchain_create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(context.surface())
            .min_image_count(min_image_count)
            .image_format(format)
            .image_color_space(vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .image_extent(extent)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(vk::SurfaceTransformFlagsKHR::IDENTITY)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(vk::PresentModeKHR::FIFO)
            .clipped(true)
            .image_array_layers(1);

        let loader = khr::Swapchain::new(context.instance(), device);
        // SAFETY: All create_info values are set correctly above with valid lifetimes.
        let handle = unsafe { loader.create_swapchain(&swapchain_create_info, None) }
            .map_err(|code| Error::driver("failed to create swapchain", code))?;

        let images = unsafe { loader.get_swapchain_images(handle) }
            .map_err(|code| Error::driver("failed to get swapchain images", code))?;

        let image_views = images
            .iter()
            .map(|&image| {
                let image_view_create_info = vk::ImageViewCreateInfo::builder()
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(format)
                    .components(vk::ComponentMapping::default())
                    .subresource_range(
                        vk::ImageSubresourceRange::builder()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .base_mip_level(0)
                            .level_count(1)
                            .base_array_layer(0)
                            .layer_count(1)
                            .build(),
                    )
                    .image(image);
                unsafe { device.create_image_view(&image_view_create_info, None) }
                    .map_err(|code| Error::driver("failed to create image view", code))
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!("created swapchain with {} image(s)", images.len());

        Ok(Self {
            device: (**device).clone(),
            loader,
            handle,
            format,
            extent,
            images,
            image_views,
            current_image: None,
        })
    }

    /// Acquire the next available image index, signaling `image_available`
    /// when the image becomes usable. Acquisition failures (including
    /// out-of-date surfaces) propagate to the caller; no recreation is
    /// attempted.
    pub fn next_image(&mut self, image_available: &Semaphore) -> Result<u32> {
        let (index, _is_suboptimal) = unsafe {
            self.loader.acquire_next_image(
                self.handle,
                u64::MAX,
                image_available.handle(),
                vk::Fence::null(),
            )
        }
        .map_err(|code| Error::driver("failed to acquire next image", code))?;
        self.current_image = Some(index);
        Ok(index)
    }

    /// The image acquired by the last successful [`next_image`] call.
    ///
    /// [`next_image`]: Self::next_image
    pub fn current_image(&self) -> Result<vk::Image> {
        let index = self.current_image_index()?;
        Ok(self.images[index as usize])
    }

    /// The image view for the last acquired image.
    pub fn current_image_view(&self) -> Result<vk::ImageView> {
        let index = self.current_image_index()?;
        Ok(self.image_views[index as usize])
    }

    /// The index of the last acquired image, or [`Error::NoAcquiredImage`]
    /// before any acquisition.
    pub fn current_image_index(&self) -> Result<u32> {
        self.current_image.ok_or(Error::NoAcquiredImage)
    }

    /// Number of presentable images owned by this swapchain.
    #[inline]
    #[must_use]
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    #[inline]
    #[must_use]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    #[must_use]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub(crate) fn loader(&self) -> &khr::Swapchain {
        &self.loader
    }

    pub(crate) fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        tracing::debug!("destroying swapchain");
        unsafe {
            for image_view in self.image_views.iter().copied() {
                self.device.destroy_image_view(image_view, None);
            }
            self.loader.destroy_swapchain(self.handle, None);
        }
    }
}

/// Clamp the requested image count into the surface's supported range. A
/// `max_image_count` of zero means the surface imposes no upper bound.
fn clamp_image_count(requested: u32, capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = requested.max(capabilities.min_image_count);
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            ..Default::default()
        }
    }

    #[test]
    fn image_count_keeps_request_inside_range() {
        assert_eq!(clamp_image_count(2, &capabilities(1, 8)), 2);
        assert_eq!(clamp_image_count(2, &capabilities(2, 2)), 2);
    }

    #[test]
    fn image_count_raised_to_surface_minimum() {
        assert_eq!(clamp_image_count(2, &capabilities(3, 8)), 3);
    }

    #[test]
    fn image_count_capped_at_surface_maximum() {
        assert_eq!(clamp_image_count(4, &capabilities(1, 3)), 3);
    }

    #[test]
    fn zero_maximum_means_unbounded() {
        assert_eq!(clamp_image_count(2, &capabilities(1, 0)), 2);
        assert_eq!(clamp_image_count(16, &capabilities(1, 0)), 16);
    }
}
