//! Automatic capture-device selection.
//!
//! Scans every capture-capable device with a short probe and picks the
//! one actually carrying signal, virtual devices first. Falls back to the
//! platform's best loopback, then the host default input.

use super::probe::{probe_device, ProbeResult};
use super::{default_input, find_best_loopback, list_devices, AudioDevice};

/// Device-name substrings excluded from scans so a hot microphone never
/// wins over the loopback carrying the actual playback.
pub const MIC_KEYWORDS: &[&str] = &["microphone", "mic", "webcam"];

/// Parameters for one scan pass.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub probe_duration: f64,
    pub threshold: f32,
    pub prefer_virtual: bool,
    pub exclude_keywords: Vec<String>,
    pub exclude_indices: Vec<usize>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            probe_duration: 0.5,
            threshold: 0.001,
            prefer_virtual: true,
            exclude_keywords: Vec::new(),
            exclude_indices: Vec::new(),
        }
    }
}

/// A device observed carrying signal, with the level seen during the scan.
#[derive(Debug, Clone)]
pub struct ActiveDevice {
    pub device: AudioDevice,
    pub rms_level: f32,
}

/// Probe all eligible capture devices and return the loudest one above
/// the threshold, or `None` when everything is quiet.
pub fn find_active_device(sample_rate: u32, options: &ScanOptions) -> Option<ActiveDevice> {
    let mut candidates: Vec<AudioDevice> = list_devices()
        .into_iter()
        .filter(|d| d.can_capture())
        .filter(|d| !options.exclude_indices.contains(&d.index))
        .filter(|d| {
            let name = d.name.to_lowercase();
            !options
                .exclude_keywords
                .iter()
                .any(|keyword| name.contains(&keyword.to_lowercase()))
        })
        .collect();

    if options.prefer_virtual {
        // stable partition: virtual/loopback devices scan first
        candidates.sort_by_key(|d| !(d.is_virtual || d.is_loopback));
    }

    tracing::debug!("scanning {} capture device(s) for signal", candidates.len());

    let mut results: Vec<ProbeResult> = Vec::new();
    for device in &candidates {
        if let Some(result) = probe_device(
            device.index,
            options.probe_duration,
            sample_rate,
            options.threshold,
        ) {
            match &result.error {
                Some(e) => tracing::debug!("  [{}] {}: probe error: {}", device.index, device.name, e),
                None => tracing::debug!(
                    "  [{}] {}: RMS {:.6}",
                    device.index,
                    device.name,
                    result.rms_level
                ),
            }
            results.push(result);
        }
    }

    let best = results
        .into_iter()
        .filter(|r| r.has_signal)
        .max_by(|a, b| a.rms_level.total_cmp(&b.rms_level))?;

    tracing::info!(
        "active device found: [{}] {} (RMS {:.6}, peak {:.6})",
        best.device.index,
        best.device.name,
        best.rms_level,
        best.peak_level
    );

    Some(ActiveDevice {
        device: best.device,
        rms_level: best.rms_level,
    })
}

/// Pick a capture device for the recorder:
/// 1. a device that is audibly carrying signal right now,
/// 2. else the platform's best loopback,
/// 3. else the host default input.
pub fn auto_select_capture_device(sample_rate: u32) -> Option<AudioDevice> {
    let options = ScanOptions {
        probe_duration: 0.3,
        threshold: 0.0005,
        prefer_virtual: true,
        exclude_keywords: MIC_KEYWORDS.iter().map(|k| k.to_string()).collect(),
        exclude_indices: Vec::new(),
    };

    if let Some(active) = find_active_device(sample_rate, &options) {
        return Some(active.device);
    }

    if let Some(loopback) = find_best_loopback() {
        tracing::info!(
            "no active signal; using best loopback: [{}] {}",
            loopback.index,
            loopback.name
        );
        return Some(loopback);
    }

    let fallback = default_input();
    if let Some(device) = &fallback {
        tracing::info!("falling back to default input: [{}] {}", device.index, device.name);
    }
    fallback
}
