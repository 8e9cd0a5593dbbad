//! Context configuration.

/// Runtime switches for the debug tooling installed at [`Context`] creation.
///
/// These replace a compile-time validation-layer toggle: callers decide
/// explicitly whether the Khronos validation layer and the debug-utils
/// messenger are requested. The [`Default`] follows the build profile, so a
/// debug build gets both and a release build gets neither.
///
/// [`Context`]: crate::Context
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[must_use]
pub struct ContextConfig {
    /// Request the `VK_LAYER_KHRONOS_validation` instance layer. Context
    /// creation fails if the layer is requested but not installed.
    pub enable_validation: bool,
    /// Install a debug-utils messenger that forwards driver and validation
    /// messages to `tracing`.
    pub enable_debug_messenger: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            enable_validation: cfg!(debug_assertions),
            enable_debug_messenger: cfg!(debug_assertions),
        }
    }
}

impl ContextConfig {
    /// A configuration with all debug tooling disabled, regardless of the
    /// build profile.
    pub fn disabled() -> Self {
        Self {
            enable_validation: false,
            enable_debug_messenger: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_follows_build_profile() {
        let config = ContextConfig::default();
        assert_eq!(config.enable_validation, cfg!(debug_assertions));
        assert_eq!(config.enable_debug_messenger, cfg!(debug_assertions));
    }

    #[test]
    fn disabled_turns_everything_off() {
        let config = ContextConfig::disabled();
        assert!(!config.enable_validation);
        assert!(!config.enable_debug_messenger);
    }
}
