//! Vulkan debug-utils messenger.

use anyhow::Context as _;
use ash::{extensions::ext, vk};
use std::ffi::{c_void, CStr};

use crate::Result;

pub(crate) const VALIDATION_LAYER_NAME: &CStr =
    // SAFETY: This static string has been verified as a valid CStr.
    unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_LAYER_KHRONOS_validation\0") };

/// Debug-utils extension loader paired with an installed messenger.
pub(crate) struct DebugMessenger {
    utils: ext::DebugUtils,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    /// Install a [`vk::DebugUtilsMessengerEXT`] that forwards driver messages
    /// to `tracing`. Fire-and-forget: the callback never blocks the caller.
    pub(crate) fn create(entry: &ash::Entry, instance: &ash::Instance) -> Result<Self> {
        tracing::debug!("creating debug utils messenger");

        let utils = ext::DebugUtils::new(entry, instance);
        let debug_create_info = build_debug_create_info();
        // SAFETY: All create_info values are set correctly above with valid lifetimes.
        let messenger = unsafe { utils.create_debug_utils_messenger(&debug_create_info, None) }
            .context("failed to create debug utils messenger")?;

        tracing::debug!("created debug utils messenger successfully");

        Ok(Self { utils, messenger })
    }

    pub(crate) unsafe fn destroy(&mut self) {
        self.utils
            .destroy_debug_utils_messenger(self.messenger, None);
    }
}

/// Build [`vk::DebugUtilsMessengerCreateInfoEXT`] with the severities and
/// message types this crate cares about.
pub(crate) fn build_debug_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT {
    vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
        )
        .pfn_user_callback(Some(debug_callback))
        .build()
}

/// Callback invoked by the driver when validation or diagnostic messages are
/// emitted.
extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    msg_type: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _: *mut c_void,
) -> vk::Bool32 {
    let msg_type = match msg_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "[General]",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "[Performance]",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "[Validation]",
        _ => "[Unknown]",
    };
    // SAFETY: This message is provided by the driver and is a valid CStr.
    let message = unsafe { CStr::from_ptr((*data).p_message) }.to_string_lossy();
    if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        tracing::error!("{msg_type} {message}");
    } else if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        tracing::warn!("{msg_type} {message}");
    } else if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::INFO {
        tracing::debug!("{msg_type} {message}");
    } else {
        tracing::trace!("{msg_type} {message}");
    }
    vk::FALSE
}
