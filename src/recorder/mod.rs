//! # Chunked recorder
//!
//! The orchestrator that owns the audio source and turns an endless PCM
//! stream into silence-delimited sessions:
//!
//! - the real-time callback publishes the instantaneous RMS, refreshes
//!   the last-sound clock and copies each block into a bounded queue;
//! - a **chunker** thread drains that queue on a 100 ms tick, splits off
//!   exact chunk-sized slabs (remainders carry over), classifies and
//!   persists each chunk, and advances the session state machine;
//! - a **monitor** thread watches the last-sound clock and, after the
//!   configured silence timeout, asks the device supervisor to look for
//!   a source that is actually playing something.
//!
//! Lifecycle callbacks fire synchronously on the chunker thread, in
//! order: `on_chunk_saved` for a chunk precedes any session event that
//! involves it, `on_session_created` precedes the saves of all later
//! chunks of that session, and `on_session_completed` comes after the
//! session's last chunk. Subscribers run under catch-unwind so a buggy
//! one cannot take down the pipeline.

pub mod supervisor;

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::audio::classifier::{ChunkClassifier, MIN_SPEECH_RATIO};
use crate::audio::source::{AudioSource, FrameSink, StreamParams};
use crate::audio::writer::ChunkWriter;
use crate::audio::rms;
use crate::config::AudiologConfig;
use crate::devices;
use crate::devices::auto_detect;
use crate::error::AudiologResult;
use crate::session::store::SessionStore;
use crate::session::{AudioChunk, Session};
use supervisor::{DeviceSupervisor, DeviceSwitcher};

const CHUNKER_TICK: Duration = Duration::from_millis(100);
const MONITOR_TICK: Duration = Duration::from_secs(1);

/// Cap on queued callback blocks. At 1024-sample blocks and 16 kHz this
/// is several minutes of backlog; past it the callback drops blocks
/// instead of growing without bound.
const MAX_PENDING_BLOCKS: usize = 4096;

/// Snapshot of the recorder's externally visible state.
#[derive(Debug, Clone, Serialize)]
pub struct RecorderStatus {
    pub is_recording: bool,
    pub current_session_id: Option<String>,
    pub chunk_count: u64,
    pub total_duration_seconds: f64,
    pub last_chunk_time: Option<DateTime<Local>>,
}

type ChunkCallback = Box<dyn Fn(&AudioChunk) + Send>;
type SessionCallback = Box<dyn Fn(&Session) + Send>;
type DeviceCallback = Box<dyn Fn(usize, &str) + Send>;

#[derive(Default)]
struct CallbackRegistry {
    chunk_saved: Mutex<Vec<ChunkCallback>>,
    session_created: Mutex<Vec<SessionCallback>>,
    session_completed: Mutex<Vec<SessionCallback>>,
    device_changed: Mutex<Vec<DeviceCallback>>,
}

/// State shared with the real-time callback. Only atomics and a short
/// queue append happen on that thread.
struct AudioShared {
    queue: Mutex<VecDeque<Vec<f32>>>,
    instant_rms_bits: AtomicU32,
    /// Milliseconds since `started_at`; 0 means no sound seen yet.
    last_sound_millis: AtomicU64,
    started_at: Instant,
    silence_threshold: f32,
}

/// Chunker-owned mutable state, behind a single mutex.
#[derive(Default)]
struct ChunkerState {
    chunk_count: u64,
    total_duration: f64,
    last_chunk_time: Option<DateTime<Local>>,
    current_session: Option<Session>,
    consecutive_silence: u32,
}

enum SessionEvent {
    Created(Session),
    Completed(Session),
}

struct RecorderInner {
    config: AudiologConfig,
    store: SessionStore,
    classifier: ChunkClassifier,
    writer: ChunkWriter,
    supervisor: DeviceSupervisor,
    audio: Arc<AudioShared>,
    device: Mutex<Option<usize>>,
    source: Mutex<Option<AudioSource>>,
    state: Mutex<ChunkerState>,
    callbacks: CallbackRegistry,
    recording: AtomicBool,
    stop_flag: AtomicBool,
    chunker_handle: Mutex<Option<JoinHandle<()>>>,
    monitor_handle: Mutex<Option<JoinHandle<()>>>,
}

/// Continuous recorder producing fixed-length chunks grouped into
/// silence-delimited sessions.
pub struct ChunkedRecorder {
    inner: Arc<RecorderInner>,
}

impl ChunkedRecorder {
    /// Recorder that resolves its device at `start()`.
    pub fn new(config: AudiologConfig) -> AudiologResult<Self> {
        Self::build(config, None, None)
    }

    /// Recorder pinned to an explicit device index (a configured
    /// `preferred_device` name still wins at `start()`).
    pub fn with_device(config: AudiologConfig, device_index: usize) -> AudiologResult<Self> {
        Self::build(config, Some(device_index), None)
    }

    fn build(
        config: AudiologConfig,
        device_index: Option<usize>,
        classifier: Option<ChunkClassifier>,
    ) -> AudiologResult<Self> {
        let store = SessionStore::open(&config.storage.data_dir)?;
        let classifier = classifier.unwrap_or_else(|| {
            ChunkClassifier::new(
                config.recording.sample_rate,
                config.recording.channels,
                config.recording.silence_threshold,
            )
        });
        let writer = ChunkWriter::new(
            &config.storage.data_dir,
            config.recording.sample_rate,
            config.recording.channels,
        );
        let supervisor = DeviceSupervisor::new(config.recording.sample_rate);
        let audio = Arc::new(AudioShared {
            queue: Mutex::new(VecDeque::new()),
            instant_rms_bits: AtomicU32::new(0),
            last_sound_millis: AtomicU64::new(0),
            started_at: Instant::now(),
            silence_threshold: config.recording.silence_threshold,
        });

        Ok(Self {
            inner: Arc::new(RecorderInner {
                config,
                store,
                classifier,
                writer,
                supervisor,
                audio,
                device: Mutex::new(device_index),
                source: Mutex::new(None),
                state: Mutex::new(ChunkerState::default()),
                callbacks: CallbackRegistry::default(),
                recording: AtomicBool::new(false),
                stop_flag: AtomicBool::new(false),
                chunker_handle: Mutex::new(None),
                monitor_handle: Mutex::new(None),
            }),
        })
    }

    /// Resolve a device, open the stream and spawn the worker threads.
    /// Returns `false` (with a log line) when the device cannot be
    /// opened.
    pub fn start(&self) -> bool {
        let inner = &self.inner;
        if inner.recording.load(Ordering::Acquire) {
            tracing::warn!("already recording");
            return false;
        }

        let mut device_index = *inner.device.lock().expect("Device mutex poisoned");

        // A configured name wins over any cached index: host indices
        // re-number between runs.
        if let Some(preferred) = &inner.config.device.preferred_device {
            match devices::get_by_name(preferred, true) {
                Some(found) => {
                    tracing::info!(
                        "device name matched: '{}' -> [{}] {}",
                        preferred,
                        found.index,
                        found.name
                    );
                    device_index = Some(found.index);
                }
                None => tracing::warn!("preferred device not found: '{}'", preferred),
            }
        }

        if device_index.is_none() && inner.config.device.auto_detect {
            if let Some(device) =
                auto_detect::auto_select_capture_device(inner.config.recording.sample_rate)
            {
                tracing::info!("auto-selected device: [{}] {}", device.index, device.name);
                device_index = Some(device.index);
            }
        }

        match AudioSource::open(device_index, inner.stream_params(), inner.frame_sink()) {
            Ok(source) => {
                *inner.source.lock().expect("Source mutex poisoned") = Some(source);
                *inner.device.lock().expect("Device mutex poisoned") = device_index;
            }
            Err(e) => {
                tracing::error!("failed to start stream: {}", e);
                return false;
            }
        }

        inner.stop_flag.store(false, Ordering::Release);

        let chunker = {
            let inner = inner.clone();
            thread::spawn(move || chunker_loop(inner))
        };
        *inner.chunker_handle.lock().expect("Thread handle mutex poisoned") = Some(chunker);

        let monitor = {
            let inner = inner.clone();
            thread::spawn(move || monitor_loop(inner))
        };
        *inner.monitor_handle.lock().expect("Thread handle mutex poisoned") = Some(monitor);

        inner.recording.store(true, Ordering::Release);
        tracing::info!("chunked recording started");
        true
    }

    /// Stop the workers, flush any ≥1 s partial buffer as a final chunk,
    /// complete the current session and close the stream. Best-effort;
    /// always runs to completion.
    pub fn stop(&self) {
        let inner = &self.inner;
        if !inner.recording.load(Ordering::Acquire) {
            return;
        }

        inner.stop_flag.store(true, Ordering::Release);

        // The chunker drains its queue and flushes the partial buffer
        // before exiting; it observes the stop flag within one tick.
        if let Some(handle) = inner
            .chunker_handle
            .lock()
            .expect("Thread handle mutex poisoned")
            .take()
        {
            if handle.join().is_err() {
                tracing::warn!("chunker thread panicked");
            }
        }
        if let Some(handle) = inner
            .monitor_handle
            .lock()
            .expect("Thread handle mutex poisoned")
            .take()
        {
            if handle.join().is_err() {
                tracing::warn!("monitor thread panicked");
            }
        }

        let events = {
            let mut state = inner.state.lock().expect("Recorder state mutex poisoned");
            inner.complete_current_session_locked(&mut state)
        };
        inner.emit_session_events(events);

        if let Some(mut source) = inner.source.lock().expect("Source mutex poisoned").take() {
            source.stop();
        }

        inner.recording.store(false, Ordering::Release);
        tracing::info!("chunked recording stopped");
    }

    /// Atomically replace the capture stream with one on `device_index`,
    /// keeping session state. Returns `false` when the new device cannot
    /// be opened.
    pub fn switch_device(&self, device_index: usize) -> bool {
        self.inner.switch_device_impl(device_index)
    }

    pub fn status(&self) -> RecorderStatus {
        let state = self.inner.state.lock().expect("Recorder state mutex poisoned");
        RecorderStatus {
            is_recording: self.inner.recording.load(Ordering::Acquire),
            current_session_id: state.current_session.as_ref().map(|s| s.session_id.clone()),
            chunk_count: state.chunk_count,
            total_duration_seconds: state.total_duration,
            last_chunk_time: state.last_chunk_time,
        }
    }

    /// The catalog this recorder writes to.
    pub fn store(&self) -> &SessionStore {
        &self.inner.store
    }

    pub fn on_chunk_saved(&self, callback: impl Fn(&AudioChunk) + Send + 'static) {
        self.inner
            .callbacks
            .chunk_saved
            .lock()
            .expect("Callback mutex poisoned")
            .push(Box::new(callback));
    }

    pub fn on_session_created(&self, callback: impl Fn(&Session) + Send + 'static) {
        self.inner
            .callbacks
            .session_created
            .lock()
            .expect("Callback mutex poisoned")
            .push(Box::new(callback));
    }

    pub fn on_session_completed(&self, callback: impl Fn(&Session) + Send + 'static) {
        self.inner
            .callbacks
            .session_completed
            .lock()
            .expect("Callback mutex poisoned")
            .push(Box::new(callback));
    }

    pub fn on_device_changed(&self, callback: impl Fn(usize, &str) + Send + 'static) {
        self.inner
            .callbacks
            .device_changed
            .lock()
            .expect("Callback mutex poisoned")
            .push(Box::new(callback));
    }
}

impl Drop for ChunkedRecorder {
    fn drop(&mut self) {
        self.stop();
    }
}

impl RecorderInner {
    fn stream_params(&self) -> StreamParams {
        StreamParams::new(
            self.config.recording.sample_rate,
            self.config.recording.channels,
        )
    }

    /// The real-time frame consumer: atomics plus a bounded queue append.
    fn frame_sink(&self) -> FrameSink {
        let audio = self.audio.clone();
        Arc::new(move |data: &[f32]| {
            let level = rms(data);
            audio.instant_rms_bits.store(level.to_bits(), Ordering::Relaxed);
            if level > audio.silence_threshold {
                audio.last_sound_millis.store(
                    audio.started_at.elapsed().as_millis() as u64,
                    Ordering::Relaxed,
                );
            }

            let mut queue = audio.queue.lock().expect("Frame queue mutex poisoned");
            if queue.len() < MAX_PENDING_BLOCKS {
                queue.push_back(data.to_vec());
            }
            // over the cap the block is dropped; the queue never grows
            // unbounded
        })
    }

    fn switch_device_impl(&self, new_index: usize) -> bool {
        let current = *self.device.lock().expect("Device mutex poisoned");
        tracing::info!("switching device: {:?} -> {}", current, new_index);

        if let Some(mut old) = self.source.lock().expect("Source mutex poisoned").take() {
            old.stop();
        }

        match AudioSource::open(Some(new_index), self.stream_params(), self.frame_sink()) {
            Ok(new_source) => {
                *self.source.lock().expect("Source mutex poisoned") = Some(new_source);
                *self.device.lock().expect("Device mutex poisoned") = Some(new_index);
                self.state
                    .lock()
                    .expect("Recorder state mutex poisoned")
                    .consecutive_silence = 0;

                let name = devices::get_by_index(new_index)
                    .map(|d| d.name)
                    .unwrap_or_else(|| format!("Device {}", new_index));
                tracing::info!("device switched: [{}] {}", new_index, name);
                self.emit_device_changed(new_index, &name);
                true
            }
            Err(e) => {
                tracing::error!("device switch failed: {}", e);
                false
            }
        }
    }

    fn save_session(&self, session: &Session) {
        // In-memory state stays authoritative; the next successful save
        // reconciles the catalog.
        if let Err(e) = self.store.save(session) {
            tracing::warn!("session save failed: {}", e);
        }
    }

    fn remove_chunk_file(&self, relative_path: &str) {
        let path = self.config.storage.data_dir.join(relative_path);
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!("chunk file removed: {}", path.display()),
            Err(e) => tracing::error!("failed to remove {}: {}", path.display(), e),
        }
    }

    /// Close out the current session: too-short sessions are deleted from
    /// the catalog without a completion event, everything else is marked
    /// completed and saved.
    fn complete_current_session_locked(&self, state: &mut ChunkerState) -> Vec<SessionEvent> {
        let Some(mut session) = state.current_session.take() else {
            return Vec::new();
        };
        state.consecutive_silence = 0;

        let duration = session.duration_seconds();
        if duration < self.config.session.min_session_duration as f64 {
            tracing::debug!("session discarded (too short): {:.1}s", duration);
            if let Err(e) = self.store.delete(&session.session_id, false) {
                tracing::warn!("failed to delete short session: {}", e);
            }
            return Vec::new();
        }

        session.complete();
        self.save_session(&session);
        tracing::info!("session completed: {} ({:.1}s)", session.session_id, duration);
        vec![SessionEvent::Completed(session)]
    }

    fn emit_chunk_saved(&self, chunk: &AudioChunk) {
        let callbacks = self.callbacks.chunk_saved.lock().expect("Callback mutex poisoned");
        for callback in callbacks.iter() {
            if catch_unwind(AssertUnwindSafe(|| callback(chunk))).is_err() {
                tracing::error!("chunk callback panicked");
            }
        }
    }

    fn emit_session_events(&self, events: Vec<SessionEvent>) {
        for event in events {
            match event {
                SessionEvent::Created(session) => {
                    let callbacks = self
                        .callbacks
                        .session_created
                        .lock()
                        .expect("Callback mutex poisoned");
                    for callback in callbacks.iter() {
                        if catch_unwind(AssertUnwindSafe(|| callback(&session))).is_err() {
                            tracing::error!("session created callback panicked");
                        }
                    }
                }
                SessionEvent::Completed(session) => {
                    let callbacks = self
                        .callbacks
                        .session_completed
                        .lock()
                        .expect("Callback mutex poisoned");
                    for callback in callbacks.iter() {
                        if catch_unwind(AssertUnwindSafe(|| callback(&session))).is_err() {
                            tracing::error!("session completed callback panicked");
                        }
                    }
                }
            }
        }
    }

    fn emit_device_changed(&self, index: usize, name: &str) {
        let callbacks = self
            .callbacks
            .device_changed
            .lock()
            .expect("Callback mutex poisoned");
        for callback in callbacks.iter() {
            if catch_unwind(AssertUnwindSafe(|| callback(index, name))).is_err() {
                tracing::error!("device callback panicked");
            }
        }
    }
}

impl DeviceSwitcher for RecorderInner {
    fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    fn current_device(&self) -> Option<usize> {
        *self.device.lock().expect("Device mutex poisoned")
    }

    fn recent_rms(&self) -> f32 {
        f32::from_bits(self.audio.instant_rms_bits.load(Ordering::Relaxed))
    }

    fn switch_device(&self, device_index: usize) -> bool {
        self.switch_device_impl(device_index)
    }
}

fn request_probe(inner: &Arc<RecorderInner>) {
    let switcher: Arc<dyn DeviceSwitcher> = inner.clone();
    inner.supervisor.maybe_probe(switcher);
}

/// Drain the frame queue, cut exact chunk-sized slabs and run each one
/// through classification, persistence and the session machine. On stop,
/// a partial buffer of at least one second becomes a final chunk.
fn chunker_loop(inner: Arc<RecorderInner>) {
    tracing::info!("chunk processing loop started");

    let recording = &inner.config.recording;
    let samples_per_chunk = recording.chunk_duration_seconds as usize
        * recording.sample_rate as usize
        * recording.channels as usize;
    let min_final_samples = recording.sample_rate as usize * recording.channels as usize;

    let mut pending: Vec<f32> = Vec::new();

    loop {
        let stopping = inner.stop_flag.load(Ordering::Acquire);
        if !stopping {
            thread::sleep(CHUNKER_TICK);
        }

        {
            let mut queue = inner.audio.queue.lock().expect("Frame queue mutex poisoned");
            while let Some(block) = queue.pop_front() {
                pending.extend_from_slice(&block);
            }
        }

        while pending.len() >= samples_per_chunk {
            let rest = pending.split_off(samples_per_chunk);
            let slab = std::mem::replace(&mut pending, rest);
            process_slab(&inner, &slab);
        }

        if stopping {
            if pending.len() >= min_final_samples {
                let slab = std::mem::take(&mut pending);
                process_slab(&inner, &slab);
            }
            break;
        }
    }

    tracing::info!("chunk processing loop stopped");
}

/// Classify, persist and account one slab of PCM, then advance the
/// session state machine. A write failure drops the chunk without
/// advancing the counter; recording continues.
fn process_slab(inner: &Arc<RecorderInner>, samples: &[f32]) {
    if samples.is_empty() {
        return;
    }

    let verdict = inner.classifier.classify(samples);
    let now = Local::now();

    let index = {
        let state = inner.state.lock().expect("Recorder state mutex poisoned");
        state.chunk_count + 1
    };

    let file_path = match inner.writer.write_chunk(samples, now, index) {
        Ok(path) => path,
        Err(e) => {
            tracing::warn!("chunk write failed, dropping chunk: {}", e);
            return;
        }
    };

    let recording = &inner.config.recording;
    let duration_seconds =
        samples.len() as f64 / (recording.sample_rate as f64 * recording.channels as f64);

    let chunk = AudioChunk {
        file_path,
        timestamp: now,
        duration_seconds,
        index,
        rms_level: verdict.rms,
        is_silent: verdict.is_silent,
        speech_ratio: verdict.speech_ratio,
    };

    {
        let mut state = inner.state.lock().expect("Recorder state mutex poisoned");
        state.chunk_count = index;
        state.total_duration += duration_seconds;
        state.last_chunk_time = Some(now);
    }

    tracing::debug!(
        "chunk saved: {} (RMS {:.4}, VAD {:.1}%, silent: {})",
        chunk.file_path,
        chunk.rms_level,
        chunk.speech_ratio * 100.0,
        chunk.is_silent
    );

    inner.emit_chunk_saved(&chunk);

    let events = handle_session(inner, &chunk);
    inner.emit_session_events(events);
}

/// The session state machine, driven once per chunk.
fn handle_session(inner: &Arc<RecorderInner>, chunk: &AudioChunk) -> Vec<SessionEvent> {
    let chunk_duration = inner.config.recording.chunk_duration_seconds;
    let n_silence = inner.config.session.silence_gap_seconds / chunk_duration;
    // a gap shorter than one chunk still requires the closing chunk to
    // be silent
    let close_threshold = n_silence.max(1);

    let mut events = Vec::new();
    let mut trigger_probe = false;

    {
        let mut state = inner.state.lock().expect("Recorder state mutex poisoned");

        if chunk.is_silent {
            state.consecutive_silence += 1;
        } else {
            state.consecutive_silence = 0;
        }

        if state.current_session.is_none() {
            if !chunk.is_silent {
                let mut session = Session::create_new(chunk.timestamp);
                session.add_chunk(chunk.clone());
                inner.save_session(&session);
                tracing::info!("new session started: {}", session.session_id);

                state.current_session = Some(session);

                if chunk.speech_ratio < MIN_SPEECH_RATIO {
                    // Opened purely on an RMS spike with no detected
                    // speech: discard on the spot, file included.
                    tracing::info!(
                        "session cancelled (no speech in opening chunk: {:.1}%)",
                        chunk.speech_ratio * 100.0
                    );
                    inner.remove_chunk_file(&chunk.file_path);
                    events.extend(inner.complete_current_session_locked(&mut state));
                } else {
                    let snapshot = state
                        .current_session
                        .as_ref()
                        .expect("session just created")
                        .clone();
                    events.push(SessionEvent::Created(snapshot));
                }
            }
            return events;
        }

        let session = state
            .current_session
            .as_mut()
            .expect("session checked above");
        session.add_chunk(chunk.clone());
        let snapshot = session.clone();
        inner.save_session(&snapshot);

        if state.consecutive_silence >= close_threshold {
            events.extend(inner.complete_current_session_locked(&mut state));
        }

        if inner.config.device.auto_switch
            && chunk.is_silent
            && state.consecutive_silence as f64 * chunk_duration as f64
                >= inner.config.device.silence_timeout_for_switch
        {
            trigger_probe = true;
        }
    }

    if trigger_probe {
        request_probe(inner);
    }

    events
}

/// Watch the last-sound clock and ask the supervisor for a probe when
/// the source has been silent past the configured timeout.
fn monitor_loop(inner: Arc<RecorderInner>) {
    tracing::info!("silence monitor thread started");

    while !inner.stop_flag.load(Ordering::Acquire) {
        thread::sleep(MONITOR_TICK);

        if !inner.recording.load(Ordering::Acquire) {
            continue;
        }
        if !inner.config.device.auto_switch {
            continue;
        }

        let last = inner.audio.last_sound_millis.load(Ordering::Relaxed);
        if last == 0 {
            // nothing heard since start; auto-selection already did its best
            continue;
        }

        let now = inner.audio.started_at.elapsed().as_millis() as u64;
        let elapsed = now.saturating_sub(last);
        let timeout_ms = (inner.config.device.silence_timeout_for_switch * 1000.0) as u64;

        if elapsed > timeout_ms {
            tracing::debug!(
                "🔇 sustained silence ({:.1}s), requesting device scan",
                elapsed as f64 / 1000.0
            );
            request_probe(&inner);

            // push the clock forward so the next tick does not retrigger
            // before the probe resolves
            inner
                .audio
                .last_sound_millis
                .store(now.saturating_sub(timeout_ms / 2), Ordering::Relaxed);
        }
    }

    tracing::info!("silence monitor thread stopped");
}
