//! Persists PCM chunks as 16-bit WAV files under date-partitioned folders.

use std::path::PathBuf;

use chrono::{DateTime, Local};
use hound::{SampleFormat, WavSpec, WavWriter};

use crate::audio::f32_to_i16;
use crate::error::AudiologResult;

/// Writes chunk files as `data_dir/YYYY-MM-DD/HH-MM-SS_NNNN.wav`.
#[derive(Debug, Clone)]
pub struct ChunkWriter {
    data_dir: PathBuf,
    sample_rate: u32,
    channels: u16,
}

impl ChunkWriter {
    pub fn new(data_dir: impl Into<PathBuf>, sample_rate: u32, channels: u16) -> Self {
        Self {
            data_dir: data_dir.into(),
            sample_rate,
            channels,
        }
    }

    /// Write one chunk and return its path relative to `data_dir`.
    ///
    /// Floats are clipped to [-1, 1] and scaled to signed 16-bit. The day
    /// folder is created on demand. Any failure surfaces to the caller so
    /// the chunk counter does not advance on a dropped chunk.
    pub fn write_chunk(
        &self,
        samples: &[f32],
        timestamp: DateTime<Local>,
        index: u64,
    ) -> AudiologResult<String> {
        let day = timestamp.format("%Y-%m-%d").to_string();
        let day_dir = self.data_dir.join(&day);
        std::fs::create_dir_all(&day_dir)?;

        let filename = format!("{}_{:04}.wav", timestamp.format("%H-%M-%S"), index);
        let path = day_dir.join(&filename);

        let spec = WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };

        let mut writer = WavWriter::create(&path, spec)?;
        for &sample in samples {
            writer.write_sample(f32_to_i16(sample))?;
        }
        writer.finalize()?;

        Ok(format!("{}/{}", day, filename))
    }
}
