//! Session data model.
//!
//! A session owns its chunks by value; there are no back-pointers from a
//! chunk to its session, so the whole document serializes trivially and
//! the serialized form is the catalog's unit of truth.

pub mod store;

use chrono::{DateTime, Duration, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One recorded chunk. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioChunk {
    /// Path relative to the data directory: `YYYY-MM-DD/HH-MM-SS_NNNN.wav`.
    pub file_path: String,
    /// Wall clock at capture end.
    pub timestamp: DateTime<Local>,
    pub duration_seconds: f64,
    /// 1-based within the recorder's lifetime.
    pub index: u64,
    #[serde(default)]
    pub rms_level: f32,
    #[serde(default)]
    pub is_silent: bool,
    #[serde(default)]
    pub speech_ratio: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Recording,
    Completed,
    Exported,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Recording => "recording",
            SessionStatus::Completed => "completed",
            SessionStatus::Exported => "exported",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptionStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TranscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranscriptionStatus::Pending => "pending",
            TranscriptionStatus::Processing => "processing",
            TranscriptionStatus::Completed => "completed",
            TranscriptionStatus::Failed => "failed",
        }
    }
}

/// A contiguous run of audio delimited by silence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub start_time: DateTime<Local>,
    #[serde(default)]
    pub end_time: Option<DateTime<Local>>,
    #[serde(default)]
    pub chunks: Vec<AudioChunk>,
    #[serde(default)]
    pub status: SessionStatus,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub transcription_status: TranscriptionStatus,
    #[serde(default)]
    pub transcription_path: Option<String>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
}

impl Session {
    /// Create a fresh session starting at `start_time`, with an id of the
    /// form `sess_YYYYMMDD_HHMMSS_<6 hex>`.
    pub fn create_new(start_time: DateTime<Local>) -> Self {
        let token = Uuid::new_v4().simple().to_string();
        let session_id = format!(
            "sess_{}_{}",
            start_time.format("%Y%m%d_%H%M%S"),
            &token[..6]
        );

        Self {
            session_id,
            start_time,
            end_time: None,
            chunks: Vec::new(),
            status: SessionStatus::Recording,
            tags: Vec::new(),
            transcription_status: TranscriptionStatus::Pending,
            transcription_path: None,
            notes: String::new(),
            title: String::new(),
            summary: String::new(),
        }
    }

    /// Append a chunk and advance `end_time` past it.
    pub fn add_chunk(&mut self, chunk: AudioChunk) {
        self.end_time =
            Some(chunk.timestamp + Duration::milliseconds((chunk.duration_seconds * 1000.0) as i64));
        self.chunks.push(chunk);
    }

    pub fn add_tag(&mut self, tag: &str) {
        if !self.tags.iter().any(|t| t == tag) {
            self.tags.push(tag.to_string());
        }
    }

    pub fn remove_tag(&mut self, tag: &str) {
        self.tags.retain(|t| t != tag);
    }

    /// Mark the session completed, deriving `end_time` from the last
    /// chunk when it has not been set yet.
    pub fn complete(&mut self) {
        self.status = SessionStatus::Completed;
        if self.end_time.is_none() {
            if let Some(last) = self.chunks.last() {
                self.end_time = Some(
                    last.timestamp + Duration::milliseconds((last.duration_seconds * 1000.0) as i64),
                );
            }
        }
    }

    /// Total duration of the non-silent chunks, in seconds.
    pub fn duration_seconds(&self) -> f64 {
        self.chunks
            .iter()
            .filter(|c| !c.is_silent)
            .map(|c| c.duration_seconds)
            .sum()
    }

    /// Number of chunks, silent ones included.
    pub fn total_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Mean RMS over the non-silent chunks; 0 when there are none.
    pub fn avg_rms(&self) -> f32 {
        let non_silent: Vec<&AudioChunk> = self.chunks.iter().filter(|c| !c.is_silent).collect();
        if non_silent.is_empty() {
            return 0.0;
        }
        non_silent.iter().map(|c| c.rms_level).sum::<f32>() / non_silent.len() as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 5, 2, h, m, s).unwrap()
    }

    fn chunk(index: u64, silent: bool, rms: f32) -> AudioChunk {
        AudioChunk {
            file_path: format!("2026-05-02/10-00-0{}_{:04}.wav", index, index),
            timestamp: at(10, 0, index as u32 * 10),
            duration_seconds: 10.0,
            index,
            rms_level: rms,
            is_silent: silent,
            speech_ratio: if silent { 0.0 } else { 0.8 },
        }
    }

    #[test]
    fn test_session_id_grammar() {
        let session = Session::create_new(at(14, 30, 5));
        assert!(session.session_id.starts_with("sess_20260502_143005_"));

        let suffix = session.session_id.rsplit('_').next().unwrap();
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit() && !c.is_uppercase()));
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = Session::create_new(at(14, 30, 5));
        let b = Session::create_new(at(14, 30, 5));
        assert_ne!(a.session_id, b.session_id);
    }

    #[test]
    fn test_add_chunk_advances_end_time() {
        let mut session = Session::create_new(at(10, 0, 0));
        session.add_chunk(chunk(1, false, 0.2));

        // chunk timestamped 10:00:10, 10 s long
        let expected = at(10, 0, 10) + Duration::seconds(10);
        assert_eq!(session.end_time, Some(expected));
        assert_eq!(session.total_chunks(), 1);
    }

    #[test]
    fn test_duration_counts_only_non_silent() {
        let mut session = Session::create_new(at(10, 0, 0));
        session.add_chunk(chunk(1, false, 0.2));
        session.add_chunk(chunk(2, true, 0.001));
        session.add_chunk(chunk(3, false, 0.4));

        assert_eq!(session.duration_seconds(), 20.0);
        assert_eq!(session.total_chunks(), 3);
    }

    #[test]
    fn test_avg_rms_over_non_silent() {
        let mut session = Session::create_new(at(10, 0, 0));
        session.add_chunk(chunk(1, false, 0.2));
        session.add_chunk(chunk(2, true, 0.9));
        session.add_chunk(chunk(3, false, 0.4));

        assert!((session.avg_rms() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_avg_rms_zero_when_all_silent() {
        let mut session = Session::create_new(at(10, 0, 0));
        session.add_chunk(chunk(1, true, 0.5));
        assert_eq!(session.avg_rms(), 0.0);
    }

    #[test]
    fn test_tags_are_set_like() {
        let mut session = Session::create_new(at(10, 0, 0));
        session.add_tag("meeting");
        session.add_tag("meeting");
        session.add_tag("standup");
        assert_eq!(session.tags, vec!["meeting", "standup"]);

        session.remove_tag("meeting");
        assert_eq!(session.tags, vec!["standup"]);
        session.remove_tag("absent");
        assert_eq!(session.tags, vec!["standup"]);
    }

    #[test]
    fn test_complete_derives_end_time_from_last_chunk() {
        let mut session = Session::create_new(at(10, 0, 0));
        session.add_chunk(chunk(1, false, 0.2));
        session.end_time = None;
        session.complete();

        assert_eq!(session.status, SessionStatus::Completed);
        // last chunk started at 10:00:10 and ran 10 s
        assert_eq!(session.end_time, Some(at(10, 0, 20)));
    }

    #[test]
    fn test_serde_roundtrip_preserves_all_fields() {
        let mut session = Session::create_new(at(10, 0, 0));
        session.add_chunk(chunk(1, false, 0.2));
        session.add_chunk(chunk(2, true, 0.01));
        session.add_tag("call");
        session.notes = "quarterly review".to_string();
        session.title = "Q2 review".to_string();
        session.summary = "numbers discussed".to_string();
        session.transcription_status = TranscriptionStatus::Processing;
        session.transcription_path = Some("transcripts/x.txt".to_string());
        session.complete();

        let json = serde_json::to_string(&session).unwrap();
        let back: Session = serde_json::from_str(&json).unwrap();

        assert_eq!(back, session);
        // chunk order survives
        assert_eq!(back.chunks[0].index, 1);
        assert_eq!(back.chunks[1].index, 2);
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(SessionStatus::Recording.as_str(), "recording");
        assert_eq!(SessionStatus::Completed.as_str(), "completed");
        assert_eq!(SessionStatus::Exported.as_str(), "exported");
        assert_eq!(TranscriptionStatus::Pending.as_str(), "pending");

        let json = serde_json::to_string(&SessionStatus::Exported).unwrap();
        assert_eq!(json, "\"exported\"");
    }
}
