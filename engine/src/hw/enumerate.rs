//! Discovers devices and builds `AudioIoDevice`s from user-facing names.

use super::duplex::{AudioIoDevice, DeviceLayout};
use super::error::{HwError, HwResult};
use super::options::HwOptions;
use super::session::related_input_for;
use super::traits::AudioHardware;
use super::types::{DeviceId, Direction};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq)]
struct ScanResult {
    input_names: Vec<String>,
    output_names: Vec<String>,
    input_ids: Vec<DeviceId>,
    output_ids: Vec<DeviceId>,
}

impl ScanResult {
    fn names(&self, direction: Direction) -> &[String] {
        match direction {
            Direction::Input => &self.input_names,
            Direction::Output => &self.output_names,
        }
    }

    fn ids(&self, direction: Direction) -> &[DeviceId] {
        match direction {
            Direction::Input => &self.input_ids,
            Direction::Output => &self.output_ids,
        }
    }
}

/// Makes every name unique by suffixing " (n)" to all instances of a
/// repeated name, counting from 1.
pub fn append_numbers_to_duplicates(names: &mut [String]) {
    let mut totals: HashMap<String, usize> = HashMap::new();
    for name in names.iter() {
        *totals.entry(name.clone()).or_default() += 1;
    }
    let mut seen: HashMap<String, usize> = HashMap::new();
    for name in names.iter_mut() {
        if totals.get(name.as_str()).copied().unwrap_or(0) < 2 {
            continue;
        }
        let n = seen.entry(name.clone()).or_default();
        *n += 1;
        *name = format!("{name} ({n})");
    }
}

pub struct DeviceEnumerator {
    hw: Arc<dyn AudioHardware>,
    options: HwOptions,
    scanned: Option<ScanResult>,
}

impl DeviceEnumerator {
    pub fn new(hw: Arc<dyn AudioHardware>, options: HwOptions) -> Self {
        Self {
            hw,
            options,
            scanned: None,
        }
    }

    pub fn hardware(&self) -> &Arc<dyn AudioHardware> {
        &self.hw
    }

    /// Lists every device, splitting them into input- and output-capable
    /// lists. A duplex device appears in both.
    pub fn scan(&mut self) -> HwResult<(Vec<String>, Vec<String>)> {
        let mut result = ScanResult::default();
        for id in self.hw.device_ids()? {
            let name = match self.hw.device_name(id) {
                Ok(name) => name,
                Err(e) => {
                    debug!("skipping device {}: {}", id, e);
                    continue;
                }
            };
            let channels = |direction| {
                self.hw
                    .stream_layout(id, direction)
                    .map(|l| l.total_channels())
                    .unwrap_or(0)
            };
            if channels(Direction::Input) > 0 {
                result.input_names.push(name.clone());
                result.input_ids.push(id);
            }
            if channels(Direction::Output) > 0 {
                result.output_names.push(name);
                result.output_ids.push(id);
            }
        }
        append_numbers_to_duplicates(&mut result.input_names);
        append_numbers_to_duplicates(&mut result.output_names);
        info!(
            "found {} input and {} output devices",
            result.input_names.len(),
            result.output_names.len()
        );
        let names = (result.input_names.clone(), result.output_names.clone());
        self.scanned = Some(result);
        Ok(names)
    }

    fn scanned(&self) -> HwResult<&ScanResult> {
        self.scanned.as_ref().ok_or(HwError::NotScanned)
    }

    pub fn device_names(&self, direction: Direction) -> HwResult<Vec<String>> {
        Ok(self.scanned()?.names(direction).to_vec())
    }

    /// Position of the system default device in the scanned list, or 0.
    pub fn default_index(&self, direction: Direction) -> HwResult<usize> {
        let scanned = self.scanned()?;
        let default = match self.hw.default_device(direction) {
            Ok(id) => id,
            Err(e) => {
                debug!("no default {} device: {}", direction.label(), e);
                return Ok(0);
            }
        };
        Ok(scanned
            .ids(direction)
            .iter()
            .position(|&id| id == default)
            .unwrap_or(0))
    }

    /// Index of `device` in the scanned list for `direction`, if it was
    /// created by this enumerator and uses that direction.
    pub fn index_of(&self, device: &AudioIoDevice, direction: Direction) -> HwResult<Option<usize>> {
        self.scanned()?;
        Ok(device.index(direction))
    }

    pub fn has_separate_inputs_and_outputs(&self) -> bool {
        true
    }

    fn lookup(&self, direction: Direction, name: &str) -> HwResult<Option<(usize, DeviceId)>> {
        if name.is_empty() {
            return Ok(None);
        }
        let scanned = self.scanned()?;
        scanned
            .names(direction)
            .iter()
            .position(|n| n == name)
            .map(|index| Some((index, scanned.ids(direction)[index])))
            .ok_or_else(|| HwError::DeviceNotFound(name.to_string()))
    }

    /// Builds a device from scanned names. Empty names leave that direction
    /// unused; different devices for each direction are paired.
    pub fn create_device(&self, output_name: &str, input_name: &str) -> HwResult<AudioIoDevice> {
        let output = self.lookup(Direction::Output, output_name)?;
        let input = self.lookup(Direction::Input, input_name)?;
        if output.is_none() && input.is_none() {
            return Err(HwError::DeviceNotFound(String::new()));
        }
        let output_id = output.map(|(_, id)| id).unwrap_or(DeviceId::INVALID);
        let input_id = input.map(|(_, id)| id).unwrap_or(DeviceId::INVALID);
        let name = if output_name.is_empty() {
            input_name
        } else {
            output_name
        };
        let layout = DeviceLayout::for_devices(Arc::clone(&self.hw), output_id, input_id, self.options);
        Ok(AudioIoDevice::new(name, layout)
            .with_indices(output.map(|(i, _)| i), input.map(|(i, _)| i)))
    }

    /// Builds a device for an output name, pairing it with a related
    /// input-only device when the hardware reports one.
    pub fn create_device_with_related(&self, output_name: &str) -> HwResult<AudioIoDevice> {
        let Some((index, output_id)) = self.lookup(Direction::Output, output_name)? else {
            return Err(HwError::DeviceNotFound(String::new()));
        };
        let input_id = related_input_for(self.hw.as_ref(), output_id);
        let input_index = input_id.and_then(|id| {
            self.scanned
                .as_ref()
                .and_then(|s| s.input_ids.iter().position(|&i| i == id))
        });
        let layout = DeviceLayout::for_devices(
            Arc::clone(&self.hw),
            output_id,
            input_id.unwrap_or(DeviceId::INVALID),
            self.options,
        );
        Ok(AudioIoDevice::new(output_name, layout).with_indices(Some(index), input_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::sim::{SimDeviceSpec, SimulatedHardware};

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn duplicates_get_suffixes_on_every_instance() {
        let mut list = names(&["A", "B", "A", "C", "A", "B"]);
        append_numbers_to_duplicates(&mut list);
        assert_eq!(list, names(&["A (1)", "B (1)", "A (2)", "C", "A (3)", "B (2)"]));
    }

    #[test]
    fn queries_before_scan_are_rejected() {
        let hw: Arc<dyn AudioHardware> = Arc::new(SimulatedHardware::with_default_devices());
        let enumerator = DeviceEnumerator::new(hw, HwOptions::default());
        assert_eq!(enumerator.device_names(Direction::Input), Err(HwError::NotScanned));
        assert_eq!(enumerator.default_index(Direction::Output), Err(HwError::NotScanned));
        assert!(matches!(
            enumerator.create_device("Built-in Audio", ""),
            Err(HwError::NotScanned)
        ));
    }

    #[test]
    fn scan_partitions_by_direction() {
        let hw: Arc<dyn AudioHardware> = Arc::new(SimulatedHardware::with_default_devices());
        let mut enumerator = DeviceEnumerator::new(hw, HwOptions::default());
        let (inputs, outputs) = enumerator.scan().unwrap();
        assert_eq!(
            inputs,
            names(&["Built-in Audio", "USB Microphone", "Studio Interface"])
        );
        assert_eq!(outputs, names(&["Built-in Audio", "Studio Interface"]));
        assert_eq!(enumerator.default_index(Direction::Input).unwrap(), 0);
    }

    #[test]
    fn default_index_falls_back_to_zero() {
        let sim = Arc::new(SimulatedHardware::new());
        sim.add_device(SimDeviceSpec::output("a", 2));
        let b = sim.add_device(SimDeviceSpec::output("b", 2));
        let hw: Arc<dyn AudioHardware> = sim.clone();
        let mut enumerator = DeviceEnumerator::new(hw, HwOptions::default());
        enumerator.scan().unwrap();
        sim.set_default(Direction::Output, b);
        assert_eq!(enumerator.default_index(Direction::Output).unwrap(), 1);
        sim.set_default(Direction::Output, DeviceId(77));
        assert_eq!(enumerator.default_index(Direction::Output).unwrap(), 0);
    }

    #[test]
    fn unknown_names_are_reported() {
        let hw: Arc<dyn AudioHardware> = Arc::new(SimulatedHardware::with_default_devices());
        let mut enumerator = DeviceEnumerator::new(hw, HwOptions::default());
        enumerator.scan().unwrap();
        assert!(matches!(
            enumerator.create_device("Nope", ""),
            Err(HwError::DeviceNotFound(name)) if name == "Nope"
        ));
    }

    #[test]
    fn related_devices_pair_up() {
        let hw: Arc<dyn AudioHardware> = Arc::new(SimulatedHardware::with_default_devices());
        let mut enumerator = DeviceEnumerator::new(hw, HwOptions::default());
        enumerator.scan().unwrap();
        let device = enumerator
            .create_device_with_related("Studio Interface")
            .unwrap();
        assert!(device.layout().is_paired());
        assert_eq!(enumerator.index_of(&device, Direction::Output).unwrap(), Some(1));
        assert_eq!(enumerator.index_of(&device, Direction::Input).unwrap(), Some(2));

        let single = enumerator.create_device_with_related("Built-in Audio").unwrap();
        assert!(!single.layout().is_paired());
    }
}
