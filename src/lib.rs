//! # audiolog
//!
//! An always-on system-audio recorder. It captures whatever the machine's
//! loopback device is playing, slices the stream into fixed-length WAV
//! chunks, groups chunks into silence-delimited sessions and keeps a
//! durable SQLite catalog of everything it recorded.
//!
//! ## Architecture
//!
//! - [`devices`] - host device enumeration, loopback classification,
//!   signal probes and automatic capture-device selection
//! - [`audio`] - the capture stream, chunk classification (RMS + VAD)
//!   and WAV chunk writing
//! - [`session`] - the session/chunk data model and the SQLite-backed
//!   [`SessionStore`]
//! - [`recorder`] - the [`ChunkedRecorder`] orchestrator and the device
//!   supervisor that hot-swaps silent sources
//! - [`config`], [`logging`], [`error`] - ambient plumbing
//!
//! ## Usage
//!
//! ```rust,no_run
//! use audiolog::{AudiologConfig, ChunkedRecorder};
//!
//! # fn main() -> audiolog::AudiologResult<()> {
//! let recorder = ChunkedRecorder::new(AudiologConfig::default())?;
//! recorder.on_session_completed(|session| {
//!     println!("recorded {:.0}s: {}", session.duration_seconds(), session.session_id);
//! });
//!
//! if recorder.start() {
//!     std::thread::sleep(std::time::Duration::from_secs(3600));
//!     recorder.stop();
//! }
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod config;
pub mod devices;
pub mod error;
pub mod logging;
pub mod recorder;
pub mod session;

pub use config::AudiologConfig;
pub use error::{AudiologError, AudiologResult};
pub use recorder::supervisor::{DeviceSupervisor, DeviceSwitcher};
pub use recorder::{ChunkedRecorder, RecorderStatus};
pub use session::store::{SessionQuery, SessionStore, StoreStats};
pub use session::{AudioChunk, Session, SessionStatus, TranscriptionStatus};
