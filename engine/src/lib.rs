pub mod hw;

use hw::AudioHardware;
use std::sync::Arc;

/// True when the in-process simulator stands in for real hardware: always
/// off macOS, and on macOS when `IOHAL_FORCE_SIMULATOR` is set.
pub fn simulator_selected() -> bool {
    !cfg!(target_os = "macos") || hw::config::env_flag(hw::config::FORCE_SIMULATOR_ENV)
}

/// The platform's audio hardware: CoreAudio on macOS, otherwise the
/// simulator populated with its default devices.
pub fn default_hardware() -> Arc<dyn AudioHardware> {
    #[cfg(target_os = "macos")]
    if !simulator_selected() {
        tracing::info!("using CoreAudio hardware");
        return Arc::new(hw::coreaudio::CoreAudioHardware::new());
    }
    tracing::info!("using simulated hardware");
    Arc::new(hw::SimulatedHardware::with_default_devices())
}
