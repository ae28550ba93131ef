//! Frame-level voice activity detection.
//!
//! The segmentation state machine here is the interesting part: audio is
//! cut into fixed 30 ms frames, each frame is judged voiced/unvoiced by a
//! WebRTC VAD, and a ring buffer of recent judgements provides hysteresis
//! so isolated frames cannot open or close a voiced segment. A segment
//! opens when more than 90% of the ring is voiced and closes when more
//! than 90% is unvoiced.
//!
//! The per-frame "is this speech?" primitive is swappable (see
//! [`speech_ratio_with`]), which keeps the state machine testable without
//! the native backend.

use std::collections::VecDeque;

use webrtc_vad::{Vad, VadMode};

use crate::error::{AudiologError, AudiologResult};

/// VAD frame length. WebRTC VAD accepts 10, 20 or 30 ms.
pub const FRAME_DURATION_MS: usize = 30;

/// Hysteresis window: ring buffer covers this much trailing audio.
pub const PADDING_DURATION_MS: usize = 300;

/// Map a sample rate to the backend's supported set.
fn supported_rate(sample_rate: u32) -> Option<webrtc_vad::SampleRate> {
    match sample_rate {
        8_000 => Some(webrtc_vad::SampleRate::Rate8kHz),
        16_000 => Some(webrtc_vad::SampleRate::Rate16kHz),
        32_000 => Some(webrtc_vad::SampleRate::Rate32kHz),
        48_000 => Some(webrtc_vad::SampleRate::Rate48kHz),
        _ => None,
    }
}

/// Fraction of `pcm` (mono, 16-bit) covered by voiced segments, using the
/// WebRTC backend at aggressiveness 3 (biased toward silence).
///
/// Fails with [`AudiologError::ClassifierUnavailable`] when the sample
/// rate is unsupported; callers are expected to degrade to RMS-only
/// silence detection.
pub fn speech_ratio(pcm: &[i16], sample_rate: u32) -> AudiologResult<f32> {
    let rate = supported_rate(sample_rate).ok_or_else(|| {
        AudiologError::ClassifierUnavailable(format!(
            "unsupported sample rate {} (need 8000/16000/32000/48000)",
            sample_rate
        ))
    })?;

    let mut vad = Vad::new_with_rate_and_mode(rate, VadMode::VeryAggressive);
    speech_ratio_with(pcm, sample_rate, |frame| vad.is_voice_segment(frame).ok())
}

/// Same as [`speech_ratio`] but with an injectable frame oracle. The
/// oracle returns `None` when the backend cannot judge a frame, which
/// fails the whole computation.
pub fn speech_ratio_with<F>(pcm: &[i16], sample_rate: u32, mut is_speech: F) -> AudiologResult<f32>
where
    F: FnMut(&[i16]) -> Option<bool>,
{
    if pcm.is_empty() {
        return Ok(0.0);
    }

    let frame_len = sample_rate as usize * FRAME_DURATION_MS / 1000;
    if frame_len == 0 {
        return Err(AudiologError::ClassifierUnavailable(
            "cannot frame audio at zero sample rate".to_string(),
        ));
    }

    let ring_cap = PADDING_DURATION_MS / FRAME_DURATION_MS;
    let mut ring: VecDeque<bool> = VecDeque::with_capacity(ring_cap);
    let mut triggered = false;
    let mut segment_frames: usize = 0;
    let mut voiced_frames_total: usize = 0;

    // Only full frames are judged; a trailing partial frame counts toward
    // the denominator but never toward voiced samples.
    let full_frames = pcm.len() / frame_len;
    for idx in 0..full_frames {
        let frame = &pcm[idx * frame_len..(idx + 1) * frame_len];
        let voiced = is_speech(frame).ok_or_else(|| {
            AudiologError::ClassifierUnavailable("backend rejected a frame".to_string())
        })?;

        if ring.len() == ring_cap {
            ring.pop_front();
        }
        ring.push_back(voiced);

        if !triggered {
            let num_voiced = ring.iter().filter(|&&v| v).count();
            if num_voiced as f32 > 0.9 * ring_cap as f32 {
                triggered = true;
                segment_frames = ring.len();
                ring.clear();
            }
        } else {
            segment_frames += 1;
            let num_unvoiced = ring.iter().filter(|&&v| !v).count();
            if num_unvoiced as f32 > 0.9 * ring_cap as f32 {
                triggered = false;
                voiced_frames_total += segment_frames;
                segment_frames = 0;
                ring.clear();
            }
        }
    }

    voiced_frames_total += segment_frames;

    let voiced_samples = voiced_frames_total * frame_len;
    Ok(voiced_samples as f32 / pcm.len() as f32)
}
