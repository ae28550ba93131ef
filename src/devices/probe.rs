//! Short-duration RMS probe of a single device.
//!
//! Used by auto-selection at startup and by the supervisor when hunting
//! for a replacement source. A probe opens its own short-lived stream and
//! must never be pointed at the device the recorder currently holds.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};
use serde::Serialize;

use super::{cpal_device_by_index, get_by_index, AudioDevice};
use crate::audio::rms;
use crate::error::{AudiologError, AudiologResult};

/// Result of probing one device. `error` carries a per-device failure
/// without propagating it further.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub device: AudioDevice,
    pub rms_level: f32,
    pub peak_level: f32,
    pub has_signal: bool,
    pub error: Option<String>,
}

/// Probe one device for `duration` seconds and measure RMS and peak.
///
/// Returns `None` when the device does not exist or cannot capture;
/// returns an error record (never `Err`) when the stream fails.
pub fn probe_device(
    device_index: usize,
    duration: f64,
    sample_rate: u32,
    threshold: f32,
) -> Option<ProbeResult> {
    let device = get_by_index(device_index)?;
    if !device.can_capture() {
        return None;
    }

    let channels = device.max_input_channels.min(2);
    if channels == 0 {
        return None;
    }

    match capture_briefly(device_index, duration, sample_rate, channels) {
        Ok(samples) if samples.is_empty() => Some(ProbeResult {
            device,
            rms_level: 0.0,
            peak_level: 0.0,
            has_signal: false,
            error: Some("No data captured".to_string()),
        }),
        Ok(samples) => {
            let rms_level = rms(&samples);
            let peak_level = samples.iter().fold(0.0f32, |peak, &s| peak.max(s.abs()));
            Some(ProbeResult {
                device,
                rms_level,
                peak_level,
                has_signal: rms_level > threshold,
                error: None,
            })
        }
        Err(e) => {
            tracing::debug!("probe of device {} failed: {}", device_index, e);
            Some(ProbeResult {
                device,
                rms_level: 0.0,
                peak_level: 0.0,
                has_signal: false,
                error: Some(e.to_string()),
            })
        }
    }
}

fn capture_briefly(
    device_index: usize,
    duration: f64,
    sample_rate: u32,
    channels: u16,
) -> AudiologResult<Vec<f32>> {
    let device = cpal_device_by_index(device_index)
        .ok_or_else(|| AudiologError::ProbeFailed(format!("no device at index {}", device_index)))?;

    let config = StreamConfig {
        channels,
        sample_rate: SampleRate(sample_rate),
        buffer_size: BufferSize::Fixed(1024),
    };

    let collected: Arc<Mutex<Vec<f32>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = collected.clone();

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                sink.lock()
                    .expect("Probe buffer mutex poisoned")
                    .extend_from_slice(data);
            },
            |err| {
                tracing::debug!("probe stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudiologError::ProbeFailed(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AudiologError::ProbeFailed(e.to_string()))?;

    std::thread::sleep(Duration::from_secs_f64(duration));
    drop(stream);

    let mut guard = collected.lock().expect("Probe buffer mutex poisoned");
    Ok(std::mem::take(&mut *guard))
}
