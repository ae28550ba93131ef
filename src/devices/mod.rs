//! Audio device enumeration and classification.
//!
//! Entries are ephemeral snapshots of the host enumeration; indices are
//! positions in that enumeration and may change between calls, which is
//! why name-based lookup exists. Enumeration failures never fail hard;
//! they are logged and an empty list is returned.

pub mod auto_detect;
pub mod probe;

use std::fmt;

use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;

/// Host operating system family, for device-name classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    MacOs,
    Windows,
    Linux,
    Unknown,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Platform::MacOs
        } else if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "linux") {
            Platform::Linux
        } else {
            Platform::Unknown
        }
    }
}

/// One audio endpoint as seen by the host.
#[derive(Debug, Clone, Serialize)]
pub struct AudioDevice {
    pub index: usize,
    pub name: String,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
    pub default_sample_rate: u32,
    pub is_input: bool,
    pub is_output: bool,
    pub is_loopback: bool,
    pub is_virtual: bool,
}

impl AudioDevice {
    /// Whether this device can be opened for capture.
    pub fn can_capture(&self) -> bool {
        self.is_input || self.is_loopback
    }
}

impl fmt::Display for AudioDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds = Vec::new();
        if self.is_input {
            kinds.push("input");
        }
        if self.is_output {
            kinds.push("output");
        }
        if self.is_loopback {
            kinds.push("loopback");
        }
        if self.is_virtual {
            kinds.push("virtual");
        }
        let kind = if kinds.is_empty() {
            "unknown".to_string()
        } else {
            kinds.join(", ")
        };
        write!(f, "[{}] {} ({})", self.index, self.name, kind)
    }
}

fn is_virtual_name(name: &str) -> bool {
    let name = name.to_lowercase();
    [
        "blackhole",
        "soundflower",
        "loopback",
        "virtual",
        "vb-audio",
        "cable",
        "aggregate",
    ]
    .iter()
    .any(|indicator| name.contains(indicator))
}

fn is_loopback_name(name: &str, platform: Platform) -> bool {
    let name = name.to_lowercase();
    match platform {
        Platform::Linux => name.contains(".monitor") || name.contains("monitor of"),
        Platform::MacOs => name.contains("blackhole") || name.contains("loopback"),
        Platform::Windows => name.contains("cable") && name.contains("output"),
        Platform::Unknown => false,
    }
}

/// Snapshot of all host audio devices. Never fails hard.
pub fn list_devices() -> Vec<AudioDevice> {
    list_devices_for(Platform::current())
}

fn list_devices_for(platform: Platform) -> Vec<AudioDevice> {
    let host = cpal::default_host();

    let raw_devices = match host.devices() {
        Ok(devices) => devices,
        Err(e) => {
            tracing::error!("device enumeration failed: {}", e);
            return Vec::new();
        }
    };

    let mut devices = Vec::new();
    for (index, device) in raw_devices.enumerate() {
        let name = device
            .name()
            .unwrap_or_else(|_| format!("Device {}", index));

        let max_input_channels = device
            .supported_input_configs()
            .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
            .unwrap_or(0);
        let max_output_channels = device
            .supported_output_configs()
            .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
            .unwrap_or(0);

        let default_sample_rate = device
            .default_input_config()
            .ok()
            .map(|c| c.sample_rate().0)
            .or_else(|| device.default_output_config().ok().map(|c| c.sample_rate().0))
            .unwrap_or(44_100);

        devices.push(AudioDevice {
            index,
            is_input: max_input_channels > 0,
            is_output: max_output_channels > 0,
            is_loopback: is_loopback_name(&name, platform),
            is_virtual: is_virtual_name(&name),
            max_input_channels,
            max_output_channels,
            default_sample_rate,
            name,
        });
    }

    devices
}

/// Devices that can capture audio (inputs and loopbacks).
pub fn list_capture_devices() -> Vec<AudioDevice> {
    list_devices().into_iter().filter(|d| d.can_capture()).collect()
}

/// Loopback and virtual devices suitable for system-audio capture.
pub fn list_loopback_devices() -> Vec<AudioDevice> {
    list_devices()
        .into_iter()
        .filter(|d| d.is_loopback || d.is_virtual)
        .collect()
}

pub fn get_by_index(index: usize) -> Option<AudioDevice> {
    list_devices().into_iter().find(|d| d.index == index)
}

/// Case-insensitive lookup by name; `partial` matches substrings.
pub fn get_by_name(name: &str, partial: bool) -> Option<AudioDevice> {
    let needle = name.to_lowercase();
    list_devices().into_iter().find(|d| {
        let hay = d.name.to_lowercase();
        if partial {
            hay.contains(&needle)
        } else {
            hay == needle
        }
    })
}

/// Best loopback candidate for system-audio capture, in the platform's
/// preference order.
pub fn find_best_loopback() -> Option<AudioDevice> {
    find_best_loopback_in(&list_devices(), Platform::current())
}

fn find_best_loopback_in(devices: &[AudioDevice], platform: Platform) -> Option<AudioDevice> {
    match platform {
        Platform::MacOs => {
            if let Some(d) = devices
                .iter()
                .find(|d| d.name.to_lowercase().contains("blackhole") && d.is_input)
            {
                return Some(d.clone());
            }
            if let Some(d) = devices.iter().find(|d| d.is_loopback && d.is_input) {
                return Some(d.clone());
            }
        }
        Platform::Windows => {
            if let Some(d) = devices
                .iter()
                .find(|d| d.name.to_lowercase().contains("cable output") && d.is_input)
            {
                return Some(d.clone());
            }
        }
        Platform::Linux => {
            if let Some(d) = devices
                .iter()
                .find(|d| d.name.to_lowercase().contains(".monitor") && d.is_input)
            {
                return Some(d.clone());
            }
        }
        Platform::Unknown => {}
    }

    // Generic fallback: any virtual input device
    devices
        .iter()
        .find(|d| d.is_virtual && d.is_input)
        .cloned()
}

/// System default input device, if any.
pub fn default_input() -> Option<AudioDevice> {
    let host = cpal::default_host();
    let name = host.default_input_device()?.name().ok()?;
    list_devices().into_iter().find(|d| d.name == name)
}

/// System default output device, if any.
pub fn default_output() -> Option<AudioDevice> {
    let host = cpal::default_host();
    let name = host.default_output_device()?.name().ok()?;
    list_devices().into_iter().find(|d| d.name == name)
}

/// Resolve the cpal handle for a device by its enumeration position.
pub(crate) fn cpal_device_by_index(index: usize) -> Option<cpal::Device> {
    let host = cpal::default_host();
    host.devices().ok()?.nth(index)
}

/// Presence of the platform's virtual audio driver.
#[derive(Debug, Clone, Serialize)]
pub struct DriverStatus {
    pub installed: bool,
    pub driver_name: String,
    pub device_name: Option<String>,
    pub install_instructions: Option<String>,
}

/// Check whether a loopback-capable driver is present, with install
/// instructions when it is not.
pub fn driver_status() -> DriverStatus {
    driver_status_in(&list_devices(), Platform::current())
}

fn driver_status_in(devices: &[AudioDevice], platform: Platform) -> DriverStatus {
    match platform {
        Platform::MacOs => {
            let device = devices
                .iter()
                .find(|d| d.name.to_lowercase().contains("blackhole"));
            DriverStatus {
                installed: device.is_some(),
                driver_name: "BlackHole".to_string(),
                device_name: device.map(|d| d.name.clone()),
                install_instructions: device.is_none().then(|| {
                    "Install BlackHole using Homebrew:\n  brew install blackhole-2ch\n\n\
                     Or download from: https://existential.audio/blackhole/"
                        .to_string()
                }),
            }
        }
        Platform::Windows => {
            let device = devices.iter().find(|d| {
                let name = d.name.to_lowercase();
                name.contains("cable") && (name.contains("vb") || name.contains("virtual"))
            });
            DriverStatus {
                installed: device.is_some(),
                driver_name: "VB-CABLE".to_string(),
                device_name: device.map(|d| d.name.clone()),
                install_instructions: device.is_none().then(|| {
                    "Download VB-CABLE from: https://vb-audio.com/Cable/\n\
                     Run the installer as Administrator."
                        .to_string()
                }),
            }
        }
        Platform::Linux => {
            let device = devices
                .iter()
                .find(|d| d.name.to_lowercase().contains(".monitor"));
            DriverStatus {
                installed: device.is_some(),
                driver_name: "PulseAudio Monitor".to_string(),
                device_name: device.map(|d| d.name.clone()),
                install_instructions: device.is_none().then(|| {
                    "PulseAudio should be pre-installed. If not:\n\
                     \x20 Ubuntu/Debian: sudo apt install pulseaudio\n\
                     \x20 Fedora: sudo dnf install pulseaudio\n\
                     \x20 Arch: sudo pacman -S pulseaudio"
                        .to_string()
                }),
            }
        }
        Platform::Unknown => DriverStatus {
            installed: false,
            driver_name: "Unknown".to_string(),
            device_name: None,
            install_instructions: Some("Unsupported platform.".to_string()),
        },
    }
}
