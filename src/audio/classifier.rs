//! Per-chunk silence classification: RMS gate plus VAD speech ratio.

use std::sync::Arc;

use crate::audio::{downmix_to_mono, rms, to_i16_pcm, vad};

/// Chunks whose voiced fraction falls below this are treated as silent
/// even when their RMS clears the threshold. Rejects fans, room tone and
/// media stingers that are loud but carry no speech.
pub const MIN_SPEECH_RATIO: f32 = 0.05;

/// Injectable 30 ms frame judgement, `None` meaning "backend failed".
pub type FrameOracle = dyn Fn(&[i16]) -> Option<bool> + Send + Sync;

/// Verdict for one chunk of PCM.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkVerdict {
    pub rms: f32,
    pub speech_ratio: f32,
    pub is_silent: bool,
}

/// Classifies PCM chunks with the dual silence gate:
/// `is_silent = rms < silence_threshold || speech_ratio < 0.05`.
pub struct ChunkClassifier {
    sample_rate: u32,
    channels: u16,
    silence_threshold: f32,
    oracle: Option<Arc<FrameOracle>>,
}

impl ChunkClassifier {
    pub fn new(sample_rate: u32, channels: u16, silence_threshold: f32) -> Self {
        Self {
            sample_rate,
            channels,
            silence_threshold,
            oracle: None,
        }
    }

    /// Replace the WebRTC backend with a custom frame oracle.
    pub fn with_oracle(
        sample_rate: u32,
        channels: u16,
        silence_threshold: f32,
        oracle: Arc<FrameOracle>,
    ) -> Self {
        Self {
            sample_rate,
            channels,
            silence_threshold,
            oracle: Some(oracle),
        }
    }

    /// Classify one interleaved float chunk.
    ///
    /// A failed or unavailable VAD forces `speech_ratio` to 0 so the RMS
    /// gate alone governs silence; the pipeline never fails on this path.
    pub fn classify(&self, samples: &[f32]) -> ChunkVerdict {
        let rms_level = rms(samples);

        let pcm = to_i16_pcm(samples);
        let mono = downmix_to_mono(&pcm, self.channels);

        let speech_ratio = match self.run_vad(&mono) {
            Ok(ratio) => ratio,
            Err(e) => {
                tracing::debug!("VAD unavailable, falling back to RMS gate: {}", e);
                0.0
            }
        };

        ChunkVerdict {
            rms: rms_level,
            speech_ratio,
            is_silent: rms_level < self.silence_threshold || speech_ratio < MIN_SPEECH_RATIO,
        }
    }

    fn run_vad(&self, mono: &[i16]) -> crate::error::AudiologResult<f32> {
        match &self.oracle {
            Some(oracle) => vad::speech_ratio_with(mono, self.sample_rate, |frame| oracle(frame)),
            None => vad::speech_ratio(mono, self.sample_rate),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier(oracle: impl Fn(&[i16]) -> Option<bool> + Send + Sync + 'static) -> ChunkClassifier {
        ChunkClassifier::with_oracle(16_000, 1, 0.01, Arc::new(oracle))
    }

    fn tone(len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (i as f32 * 0.3).sin())
            .collect()
    }

    #[test]
    fn test_quiet_chunk_is_silent() {
        let verdict = classifier(|_| Some(true)).classify(&vec![0.0; 16_000]);
        assert!(verdict.is_silent);
        assert_eq!(verdict.rms, 0.0);
    }

    #[test]
    fn test_speech_chunk_is_not_silent() {
        let verdict = classifier(|_| Some(true)).classify(&tone(160_000, 0.3));
        assert!(!verdict.is_silent);
        assert!(verdict.rms > 0.01);
        assert!(verdict.speech_ratio >= MIN_SPEECH_RATIO);
    }

    #[test]
    fn test_loud_non_speech_is_silent() {
        // High RMS but the oracle sees no speech: the dual gate rejects it.
        let verdict = classifier(|_| Some(false)).classify(&tone(160_000, 0.3));
        assert!(verdict.is_silent);
        assert!(verdict.rms > 0.01);
        assert_eq!(verdict.speech_ratio, 0.0);
    }

    #[test]
    fn test_backend_failure_degrades_to_rms_gate() {
        let verdict = classifier(|_| None).classify(&tone(160_000, 0.3));
        assert_eq!(verdict.speech_ratio, 0.0);
        // ratio of 0 still trips the speech-ratio gate
        assert!(verdict.is_silent);
    }

    #[test]
    fn test_dual_gate_invariant() {
        for (samples, oracle_says) in [
            (tone(160_000, 0.3), true),
            (tone(160_000, 0.3), false),
            (vec![0.0; 160_000], true),
        ] {
            let verdict =
                classifier(move |_| Some(oracle_says)).classify(&samples);
            assert_eq!(
                verdict.is_silent,
                verdict.rms < 0.01 || verdict.speech_ratio < MIN_SPEECH_RATIO
            );
        }
    }
}
