pub mod device;
pub mod driver;
pub mod ioproc;
pub mod latency;
pub mod listener;

pub use self::driver::CoreAudioHardware;
