//! Simulated devices and the names derived from them

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prefix of every group created or used by the automation
pub const GROUP_PREFIX: &str = "autotests_";

/// A simulated device registered in the portal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub serial_number: String,
    pub device_type: String,
    pub model: String,
    #[serde(default)]
    pub group: Option<String>,
}

impl Device {
    /// Build the device at `index` (zero-based) of a family: `{family}-{index + 1}`
    pub fn from_family(
        family: &str,
        index: usize,
        device_type: &str,
        model: &str,
        group: Option<&str>,
    ) -> Self {
        Self {
            serial_number: format!("{}-{}", family, index + 1),
            device_type: device_type.to_string(),
            model: model.to_string(),
            group: group.map(String::from),
        }
    }

    /// Target group name for this device.
    ///
    /// The last `-` segment of the serial number is dropped so that every
    /// device of a family shares one group, e.g. `TEST-SWFOTA-C-3` maps to
    /// `autotests_TEST-SWFOTA-C`.
    pub fn group_name(&self) -> String {
        let family = match self.serial_number.rfind('-') {
            Some(pos) => &self.serial_number[..pos],
            None => "",
        };
        format!("{}{}", GROUP_PREFIX, family)
    }

    /// Folder holding this device's emulator trees: `{root}/{serial}_{type}`
    pub fn folder(&self, devices_root: &Path) -> PathBuf {
        devices_root.join(format!("{}_{}", self.serial_number, self.device_type))
    }
}

/// Expand a device family into `count` devices
pub fn family(
    family: &str,
    count: usize,
    device_type: &str,
    model: &str,
    group: Option<&str>,
) -> Vec<Device> {
    (0..count)
        .map(|i| Device::from_family(family, i, device_type, model, group))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_numbers_are_one_based() {
        let devices = family("TEST-SWFOTA-C", 3, "GA-0000180", "Acupulse - 40W ST", None);
        let serials: Vec<_> = devices.iter().map(|d| d.serial_number.as_str()).collect();
        assert_eq!(serials, ["TEST-SWFOTA-C-1", "TEST-SWFOTA-C-2", "TEST-SWFOTA-C-3"]);
    }

    #[test]
    fn test_group_name_drops_device_index() {
        let device = Device::from_family("TEST-SWFOTA-E", 0, "GA-0006200LMX", "Stellar - System", Some("M22"));
        assert_eq!(device.group_name(), "autotests_TEST-SWFOTA-E");
        assert_eq!(device.group.as_deref(), Some("M22"));
    }

    #[test]
    fn test_group_name_without_separator() {
        let device = Device {
            serial_number: "SN1".to_string(),
            device_type: "T".to_string(),
            model: "M".to_string(),
            group: None,
        };
        assert_eq!(device.group_name(), GROUP_PREFIX);
    }

    #[test]
    fn test_device_folder() {
        let device = Device::from_family("FAM", 1, "GA-1", "Model", None);
        assert_eq!(
            device.folder(Path::new("/devices")),
            PathBuf::from("/devices/FAM-2_GA-1")
        );
    }
}
