//! Exclusive PCM input stream on one device.
//!
//! `cpal::Stream` is not `Send` on every host, so the stream lives on a
//! dedicated thread for its whole life; this handle only carries the
//! command channel and stop flag. The registered sink runs on the host's
//! real-time callback thread and must not block or allocate beyond a
//! short queue append.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};

use crate::error::{AudiologError, AudiologResult};

/// Stream parameters requested from the host.
#[derive(Debug, Clone, Copy)]
pub struct StreamParams {
    pub sample_rate: u32,
    pub channels: u16,
    pub blocksize: u32,
}

impl StreamParams {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            blocksize: 1024,
        }
    }
}

/// Frame consumer invoked on the real-time callback thread.
pub type FrameSink = Arc<dyn Fn(&[f32]) + Send + Sync>;

enum SourceCommand {
    Stop,
}

/// A running input stream. Stopping is terminal; capturing again means
/// opening a new instance.
pub struct AudioSource {
    command_tx: mpsc::Sender<SourceCommand>,
    thread_handle: Option<thread::JoinHandle<()>>,
    stop_flag: Arc<AtomicBool>,
    stopped: bool,
}

impl AudioSource {
    /// Open a float32 input stream on the device at `device_index`
    /// (host default input when `None`) and start delivering frames to
    /// `sink`.
    ///
    /// The stream is built on its own thread; build failures are reported
    /// back synchronously as [`AudiologError::DeviceUnavailable`] carrying
    /// the host's reason string.
    pub fn open(
        device_index: Option<usize>,
        params: StreamParams,
        sink: FrameSink,
    ) -> AudiologResult<Self> {
        let (command_tx, command_rx) = mpsc::channel::<SourceCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();

        let stop_flag = Arc::new(AtomicBool::new(false));
        let callback_flag = stop_flag.clone();

        let thread_handle = thread::spawn(move || {
            let stream = match build_stream(device_index, params, sink, callback_flag) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            tracing::debug!("audio stream running on dedicated thread");

            loop {
                match command_rx.recv_timeout(Duration::from_millis(100)) {
                    Ok(SourceCommand::Stop) => break,
                    Err(mpsc::RecvTimeoutError::Timeout) => continue,
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }

            drop(stream);
            tracing::debug!("audio stream thread shut down");
        });

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => Ok(Self {
                command_tx,
                thread_handle: Some(thread_handle),
                stop_flag,
                stopped: false,
            }),
            Ok(Err(reason)) => {
                let _ = thread_handle.join();
                Err(AudiologError::DeviceUnavailable(reason))
            }
            Err(_) => Err(AudiologError::DeviceUnavailable(
                "stream open timed out".to_string(),
            )),
        }
    }

    /// Stop and close the stream. Idempotent.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        self.stop_flag.store(true, Ordering::Release);
        let _ = self.command_tx.send(SourceCommand::Stop);

        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                tracing::warn!("audio stream thread panicked during shutdown");
            }
        }
    }
}

impl Drop for AudioSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_stream(
    device_index: Option<usize>,
    params: StreamParams,
    sink: FrameSink,
    stop_flag: Arc<AtomicBool>,
) -> Result<cpal::Stream, String> {
    let host = cpal::default_host();

    let device = match device_index {
        Some(index) => host
            .devices()
            .map_err(|e| format!("device enumeration failed: {}", e))?
            .nth(index)
            .ok_or_else(|| format!("no device at index {}", index))?,
        None => host
            .default_input_device()
            .ok_or_else(|| "no default input device".to_string())?,
    };

    let name = device.name().unwrap_or_else(|_| "<unknown>".to_string());
    tracing::info!(
        "opening input stream on '{}' ({} Hz, {} ch, blocksize {})",
        name,
        params.sample_rate,
        params.channels,
        params.blocksize
    );

    let config = StreamConfig {
        channels: params.channels,
        sample_rate: SampleRate(params.sample_rate),
        buffer_size: BufferSize::Fixed(params.blocksize),
    };

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if stop_flag.load(Ordering::Acquire) {
                    return;
                }
                sink(data);
            },
            |err| {
                tracing::error!("audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| format!("failed to build input stream: {}", e))?;

    stream
        .play()
        .map_err(|e| format!("failed to start input stream: {}", e))?;

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_params_default_blocksize() {
        let params = StreamParams::new(16_000, 1);
        assert_eq!(params.blocksize, 1024);
        assert_eq!(params.sample_rate, 16_000);
        assert_eq!(params.channels, 1);
    }

    #[test]
    fn test_open_on_absurd_index_fails_with_reason() {
        // Index far past any real enumeration either fails to resolve or
        // the host has no devices at all; both surface DeviceUnavailable.
        let sink: FrameSink = Arc::new(|_| {});
        let result = AudioSource::open(Some(usize::MAX), StreamParams::new(16_000, 1), sink);
        assert!(matches!(
            result,
            Err(AudiologError::DeviceUnavailable(_))
        ));
    }
}
