#![doc = include_str!("../README.md")]
#![warn(
    anonymous_parameters,
    bare_trait_objects,
    clippy::branches_sharing_code,
    clippy::map_unwrap_or,
    clippy::match_wildcard_for_single_variants,
    clippy::must_use_candidate,
    clippy::needless_for_each,
    clippy::redundant_closure_for_method_calls,
    clippy::semicolon_if_nothing_returned,
    clippy::unreadable_literal,
    clippy::unwrap_used,
    clippy::expect_used,
    deprecated_in_future,
    ellipsis_inclusive_range_patterns,
    future_incompatible,
    missing_copy_implementations,
    missing_debug_implementations,
    nonstandard_style,
    rust_2018_compatibility,
    rust_2018_idioms,
    rust_2021_compatibility,
    rustdoc::bare_urls,
    rustdoc::broken_intra_doc_links,
    rustdoc::invalid_html_tags,
    rustdoc::invalid_rust_codeblocks,
    rustdoc::private_intra_doc_links,
    single_use_lifetimes,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unused,
    variant_size_differences
)]

use ash::vk;

pub mod command;
pub mod config;
pub mod context;
mod debug;
pub mod device;
pub mod renderer;
pub mod swapchain;
pub mod sync;

pub use command::{CommandBuffer, CommandPool};
pub use config::ContextConfig;
pub use context::Context;
pub use device::{Device, DeviceSearchStrategy};
pub use renderer::{access_mask_flags, Renderer};
pub use swapchain::Swapchain;
pub use sync::{Fence, Semaphore};

/// Results that can be returned from this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can be returned from this crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Instance, device, surface or swapchain creation failed. Fatal to the
    /// constructing call.
    #[error("initialization failed: {0}")]
    Init(String),
    /// `find_device` filtered every candidate out.
    #[error("no matching physical device found")]
    NoMatchingDevice,
    /// A swapchain image accessor was called before any successful
    /// `next_image` acquisition.
    #[error("no swapchain image has been acquired")]
    NoAcquiredImage,
    /// A driver call returned a non-success code.
    #[error("{operation}: {message} ({code:?})")]
    Driver {
        operation: &'static str,
        message: &'static str,
        code: vk::Result,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Wrap a raw [`vk::Result`] with the operation that produced it.
    pub(crate) fn driver(operation: &'static str, code: vk::Result) -> Self {
        Self::Driver {
            operation,
            message: vk_error_message(code),
            code,
        }
    }
}

impl From<vk::Result> for Error {
    fn from(code: vk::Result) -> Self {
        Self::driver("vulkan call failed", code)
    }
}

/// Translate a driver result code into a short human-readable string.
/// Unmapped codes fall back to `"Unknown"`.
#[must_use]
pub fn vk_error_message(code: vk::Result) -> &'static str {
    match code {
        vk::Result::SUCCESS => "Succeeded",
        vk::Result::ERROR_DEVICE_LOST => "Device lost",
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => "Out of device memory",
        vk::Result::ERROR_OUT_OF_HOST_MEMORY => "Out of host memory",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_lookup() {
        assert_eq!(vk_error_message(vk::Result::SUCCESS), "Succeeded");
        assert_eq!(vk_error_message(vk::Result::ERROR_DEVICE_LOST), "Device lost");
        assert_eq!(
            vk_error_message(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            "Out of device memory"
        );
        assert_eq!(
            vk_error_message(vk::Result::ERROR_OUT_OF_HOST_MEMORY),
            "Out of host memory"
        );
    }

    #[test]
    fn error_message_falls_back_to_unknown() {
        assert_eq!(vk_error_message(vk::Result::ERROR_SURFACE_LOST_KHR), "Unknown");
        assert_eq!(vk_error_message(vk::Result::TIMEOUT), "Unknown");
    }

    #[test]
    fn driver_error_carries_operation_and_code() {
        let err = Error::driver("failed to acquire next image", vk::Result::ERROR_DEVICE_LOST);
        let text = err.to_string();
        assert!(text.contains("failed to acquire next image"));
        assert!(text.contains("Device lost"));
    }
}
