//! Vulkan instance, debug messenger and window surface.

use anyhow::Context as _;
use ash::{extensions::khr, vk};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use semver::Version;
use std::ffi::{CStr, CString};
use winit::window::Window;

use crate::{
    config::ContextConfig,
    debug::{self, DebugMessenger},
    device::{Device, DeviceSearchStrategy},
    Error, Result,
};

/// Owns the Vulkan instance, the optional debug messenger and the
/// presentation surface bound to the window.
///
/// The `Context` is created once at startup and must be destroyed last, after
/// every [`Device`], [`Swapchain`](crate::Swapchain) and
/// [`Renderer`](crate::Renderer) created from it.
pub struct Context {
    // Keeps the loaded driver library alive for the instance's lifetime.
    _entry: ash::Entry,
    instance: ash::Instance,
    debug: Option<DebugMessenger>,
    surface_loader: khr::Surface,
    surface: vk::SurfaceKHR,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context").finish_non_exhaustive()
    }
}

impl Context {
    /// Create the Vulkan instance with the window-system extensions required
    /// by `window`, plus the validation layer and debug messenger when
    /// `config` requests them, and bind a presentation surface to the window.
    ///
    /// Fails with an initialization error if a requested layer, a required
    /// instance extension or the surface itself is unavailable.
    pub fn new(window: &Window, name: &str, version: &str, config: ContextConfig) -> Result<Self> {
        tracing::debug!("creating vulkan context");

        let entry = ash::Entry::linked();

        if config.enable_validation && !validation_layer_available(&entry)? {
            return Err(Error::Init(format!(
                "validation layer {:?} is not available",
                debug::VALIDATION_LAYER_NAME
            )));
        }

        let instance = create_instance(&entry, window, name, version, config)?;

        let debug = if config.enable_debug_messenger {
            Some(DebugMessenger::create(&entry, &instance)?)
        } else {
            None
        };

        let surface_loader = khr::Surface::new(&entry, &instance);
        // SAFETY: The raw handles come from a live winit window; the caller
        // keeps the window alive for the lifetime of this context.
        let surface = unsafe {
            ash_window::create_surface(
                &entry,
                &instance,
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )
        }
        .map_err(|code| Error::driver("failed to create window surface", code))?;

        tracing::debug!("created vulkan context successfully");

        Ok(Self {
            _entry: entry,
            instance,
            debug,
            surface_loader,
            surface,
        })
    }

    /// Select a physical device by heap-size policy and construct its logical
    /// device and graphics queue. See [`DeviceSearchStrategy`].
    ///
    /// With `only_dedicated`, integrated and virtual GPUs are filtered out and
    /// the call fails with [`Error::NoMatchingDevice`] when no discrete GPU is
    /// present. Candidates with equal heap sizes keep their enumeration
    /// order, so the tie-break is implementation-defined but deterministic.
    pub fn find_device(
        &self,
        strategy: DeviceSearchStrategy,
        only_dedicated: bool,
    ) -> Result<Device> {
        Device::select(&self.instance, strategy, only_dedicated)
    }

    /// Query the surface capabilities supported by `device` (minimum image
    /// count, extents and so on). Used by overlay subsystems that need to
    /// match the swapchain's image-count configuration.
    pub fn surface_capabilities(&self, device: &Device) -> Result<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(device.physical(), self.surface)
        }
        .map_err(|code| Error::driver("failed to query surface capabilities", code))
    }

    #[inline]
    #[must_use]
    pub(crate) fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    #[inline]
    #[must_use]
    pub(crate) fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }
}

impl Drop for Context {
    /// Destroys the surface and debug messenger before the instance.
    fn drop(&mut self) {
        tracing::debug!("destroying vulkan context");
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some(debug) = &mut self.debug {
                debug.destroy();
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Whether the Khronos validation layer is installed on this host.
fn validation_layer_available(entry: &ash::Entry) -> Result<bool> {
    let layers = entry
        .enumerate_instance_layer_properties()
        .map_err(|code| Error::driver("failed to enumerate instance layers", code))?;
    Ok(layers.iter().any(is_validation_layer))
}

/// Whether `layer` is the Khronos validation layer.
fn is_validation_layer(layer: &vk::LayerProperties) -> bool {
    // SAFETY: layer_name is provided by the driver and is a valid CStr.
    let layer_name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
    layer_name == debug::VALIDATION_LAYER_NAME
}

/// Create the [`ash::Instance`] for this context.
fn create_instance(
    entry: &ash::Entry,
    window: &Window,
    name: &str,
    version: &str,
    config: ContextConfig,
) -> Result<ash::Instance> {
    tracing::debug!("creating vulkan instance");

    let application_name =
        CString::new(name).with_context(|| format!("failed to convert `{name}` to CString"))?;
    let application_version = Version::parse(version)
        .with_context(|| format!("failed to parse version: {version}"))?;
    let engine_name = CString::new(env!("CARGO_PKG_NAME"))
        .context("failed to convert crate name to CString")?;
    let application_info = vk::ApplicationInfo::builder()
        .application_name(&application_name)
        .application_version(vk::make_api_version(
            0,
            application_version.major as u32,
            application_version.minor as u32,
            application_version.patch as u32,
        ))
        .engine_name(&engine_name)
        .engine_version(vk::make_api_version(0, 1, 0, 0))
        .api_version(vk::API_VERSION_1_3);

    let mut enabled_extension_names =
        ash_window::enumerate_required_extensions(window.raw_display_handle())
            .map_err(|code| Error::driver("failed to query required instance extensions", code))?
            .to_vec();
    if config.enable_debug_messenger {
        enabled_extension_names.push(ash::extensions::ext::DebugUtils::name().as_ptr());
    }

    let enabled_layer_names = if config.enable_validation {
        vec![debug::VALIDATION_LAYER_NAME.as_ptr()]
    } else {
        vec![]
    };

    let create_info = vk::InstanceCreateInfo::builder()
        .application_info(&application_info)
        .enabled_extension_names(&enabled_extension_names)
        .enabled_layer_names(&enabled_layer_names);

    // Captures messages emitted during instance creation itself.
    let mut debug_create_info = debug::build_debug_create_info();
    let create_info = if config.enable_debug_messenger {
        create_info.push_next(&mut debug_create_info)
    } else {
        create_info
    };

    // SAFETY: All create_info values are set correctly above with valid lifetimes.
    let instance = unsafe { entry.create_instance(&create_info, None) }
        .map_err(|code| Error::driver("failed to create vulkan instance", code))?;

    tracing::debug!("created vulkan instance successfully");

    Ok(instance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::raw::c_char;

    fn layer(name: &str) -> vk::LayerProperties {
        let mut layer = vk::LayerProperties::default();
        for (dst, src) in layer.layer_name.iter_mut().zip(name.bytes()) {
            *dst = src as c_char;
        }
        layer
    }

    #[test]
    fn recognizes_the_khronos_validation_layer() {
        assert!(is_validation_layer(&layer("VK_LAYER_KHRONOS_validation")));
    }

    #[test]
    fn rejects_other_layer_names() {
        assert!(!is_validation_layer(&layer("VK_LAYER_LUNARG_api_dump")));
        assert!(!is_validation_layer(&layer(
            "VK_LAYER_KHRONOS_validation_extra"
        )));
        assert!(!is_validation_layer(&layer("")));
    }
}
