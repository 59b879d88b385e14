pub mod channel_map;
pub mod config;
#[cfg(target_os = "macos")]
pub mod coreaudio;
pub mod duplex;
pub mod enumerate;
pub mod error;
pub mod error_fmt;
pub mod formats;
pub mod ioproc;
pub mod latency;
pub mod mask;
pub mod options;
pub mod refresh;
pub mod retry;
pub mod scratch;
pub mod session;
pub mod sim;
pub mod traits;
pub mod types;

pub use self::duplex::{AudioIoDevice, DeviceLayout};
pub use self::enumerate::DeviceEnumerator;
pub use self::error::{HwError, HwResult};
pub use self::options::{HwOptions, RetryPolicy};
pub use self::scratch::{InputBuffers, OutputBuffers};
pub use self::session::{DeviceSession, SessionState};
pub use self::sim::{SimDeviceSpec, SimulatedHardware};
pub use self::traits::{AudioHardware, AudioIoCallback};
pub use self::types::{DeviceId, DeviceSnapshot, Direction};
