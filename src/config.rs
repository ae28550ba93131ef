//! Typed configuration with explicit defaults.
//!
//! Every section deserializes with `#[serde(default)]`, so a partial
//! document fills in defaults for missing keys and unknown keys are
//! ignored. How the document reaches this crate (file, CLI flags, env)
//! is the caller's business.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Recording parameters consumed by the chunked recorder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingSettings {
    /// Length of each persisted chunk, in seconds.
    pub chunk_duration_seconds: u32,
    pub sample_rate: u32,
    pub channels: u16,
    /// RMS threshold (float32 domain) below which a chunk counts as silent.
    pub silence_threshold: f32,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            chunk_duration_seconds: 30,
            sample_rate: 16_000,
            channels: 1,
            silence_threshold: 0.01,
        }
    }
}

/// Session segmentation policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Sustained silence that closes the current session, in seconds.
    pub silence_gap_seconds: u32,
    /// Sessions with less non-silent audio than this are discarded.
    pub min_session_duration: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            silence_gap_seconds: 10,
            min_session_duration: 10,
        }
    }
}

/// Device selection and hot-swap behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub auto_detect: bool,
    /// Probe alternate devices when the current one stays silent.
    pub auto_switch: bool,
    /// Silence duration that triggers an alternate-device probe, in seconds.
    pub silence_timeout_for_switch: f64,
    /// Device name resolved at startup; wins over any explicit index.
    pub preferred_device: Option<String>,
    pub fallback_devices: Vec<String>,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            auto_detect: true,
            auto_switch: true,
            silence_timeout_for_switch: 5.0,
            preferred_device: None,
            fallback_devices: vec![
                "Voicemeeter Out B1".to_string(),
                "Stereo Mix".to_string(),
                "CABLE Output".to_string(),
            ],
        }
    }
}

/// Where chunk files and the session catalog live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub data_dir: PathBuf,
    pub retention_days: u32,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            retention_days: 30,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("audiolog_data")
}

/// Full configuration consumed by the recorder and device supervisor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AudiologConfig {
    pub recording: RecordingSettings,
    pub session: SessionSettings,
    pub device: DeviceSettings,
    pub storage: StorageSettings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AudiologConfig::default();

        assert_eq!(config.recording.chunk_duration_seconds, 30);
        assert_eq!(config.recording.sample_rate, 16_000);
        assert_eq!(config.recording.channels, 1);
        assert_eq!(config.recording.silence_threshold, 0.01);
        assert_eq!(config.session.silence_gap_seconds, 10);
        assert_eq!(config.session.min_session_duration, 10);
        assert!(config.device.auto_detect);
        assert!(config.device.auto_switch);
        assert_eq!(config.device.silence_timeout_for_switch, 5.0);
        assert!(config.device.preferred_device.is_none());
        assert_eq!(config.device.fallback_devices.len(), 3);
        assert_eq!(config.storage.retention_days, 30);
    }

    #[test]
    fn test_partial_document_takes_defaults() {
        let config: AudiologConfig = serde_json::from_str(
            r#"{ "recording": { "sample_rate": 48000 }, "session": {} }"#,
        )
        .unwrap();

        assert_eq!(config.recording.sample_rate, 48_000);
        // untouched keys fall back to defaults
        assert_eq!(config.recording.chunk_duration_seconds, 30);
        assert_eq!(config.session.silence_gap_seconds, 10);
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let config: AudiologConfig = serde_json::from_str(
            r#"{ "recording": { "bitrate": 320 }, "dashboard": { "port": 8080 } }"#,
        )
        .unwrap();

        assert_eq!(config.recording.sample_rate, 16_000);
    }

    #[test]
    fn test_roundtrip() {
        let mut config = AudiologConfig::default();
        config.device.preferred_device = Some("BlackHole 2ch".to_string());

        let json = serde_json::to_string(&config).unwrap();
        let back: AudiologConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(
            back.device.preferred_device.as_deref(),
            Some("BlackHole 2ch")
        );
    }
}
