/// Central error type for the audiolog pipeline.
///
/// The audio path itself never propagates these upward: every failure on
/// the callback → chunker path is converted into a degradation (chunk
/// dropped, VAD bypassed, probe recorded as failed) and logged. The
/// variants exist so the layers below the recorder can use `?` normally.
#[derive(Debug, thiserror::Error)]
pub enum AudiologError {
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Voice activity backend unavailable: {0}")]
    ClassifierUnavailable(String),

    #[error("Chunk write failed: {0}")]
    WriteFailed(#[from] hound::Error),

    #[error("Session catalog error: {0}")]
    StoreFailed(#[from] rusqlite::Error),

    #[error("Device probe failed: {0}")]
    ProbeFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for audiolog operations
pub type AudiologResult<T> = Result<T, AudiologError>;
