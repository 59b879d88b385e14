use anyhow::{Context, Result};
use iohal_engine::hw::HwOptions;
use iohal_engine::hw::config::apply_env_overrides;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ToneConfig {
    pub frequency: f64,
    /// Linear gain applied to the sine.
    pub gain: f32,
}

impl Default for ToneConfig {
    fn default() -> Self {
        Self {
            frequency: 440.0,
            gain: 0.1,
        }
    }
}

/// Contents of the `run` configuration file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Output device name as listed by `iohal list`; empty picks the default.
    pub output_device: String,
    /// Input device name; empty uses no separate input device.
    pub input_device: String,
    /// With no input device, pair the output with a related input device.
    pub pair_related: bool,
    pub input_channels: usize,
    pub output_channels: usize,
    /// Zero keeps the device's current rate.
    pub sample_rate: f64,
    /// Zero picks the device's default size.
    pub buffer_size: usize,
    /// Stop after this many seconds; runs until Ctrl-C when absent.
    pub duration_secs: Option<u64>,
    pub tone: ToneConfig,
    pub hw: HwOptions,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_device: String::new(),
            input_device: String::new(),
            pair_related: true,
            input_channels: 2,
            output_channels: 2,
            sample_rate: 0.0,
            buffer_size: 0,
            duration_secs: None,
            tone: ToneConfig::default(),
            hw: HwOptions::default(),
        }
    }
}

impl AppConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid configuration")
    }

    /// Reads `path`, or starts from defaults without one, then applies
    /// `IOHAL_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                Self::from_toml(&text).with_context(|| format!("parsing {}", path.display()))?
            }
            None => Self::default(),
        };
        apply_env_overrides(&mut config.hw);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_keys_use_defaults() {
        let config = AppConfig::from_toml("output_device = \"Studio Interface\"").unwrap();
        assert_eq!(config.output_device, "Studio Interface");
        assert_eq!(config.output_channels, 2);
        assert_eq!(config.tone, ToneConfig::default());
        assert_eq!(config.hw, HwOptions::default());
    }

    #[test]
    fn hw_table_maps_to_options() {
        let config = AppConfig::from_toml(
            r#"
            sample_rate = 96000.0
            buffer_size = 256
            duration_secs = 3

            [tone]
            frequency = 1000.0

            [hw]
            refresh_debounce_ms = 250
            max_buffer_size = 4096

            [hw.settle]
            attempts = 10
            delay_ms = 20
            backoff = 1.5
            "#,
        )
        .unwrap();
        assert_eq!(config.sample_rate, 96_000.0);
        assert_eq!(config.buffer_size, 256);
        assert_eq!(config.duration_secs, Some(3));
        assert_eq!(config.tone.frequency, 1000.0);
        assert_eq!(config.tone.gain, 0.1);
        assert_eq!(config.hw.refresh_debounce_ms, 250);
        assert_eq!(config.hw.max_buffer_size, 4096);
        assert_eq!(config.hw.settle.attempts, 10);
        assert_eq!(config.hw.settle.backoff, 1.5);
        assert_eq!(config.hw.stop, HwOptions::default().stop);
    }

    #[test]
    fn loads_from_a_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "input_device = \"USB Microphone\"").unwrap();
        writeln!(file, "input_channels = 1").unwrap();
        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.input_device, "USB Microphone");
        assert_eq!(config.input_channels, 1);
    }

    #[test]
    fn bad_files_name_the_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "buffer_size = \"large\"").unwrap();
        let err = AppConfig::load(Some(file.path())).unwrap_err();
        assert!(format!("{err:#}").contains(&file.path().display().to_string()));
    }
}
