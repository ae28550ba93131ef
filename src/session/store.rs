//! Durable session catalog backed by a single SQLite file.
//!
//! The `data` column holds the canonical serialized session document;
//! the remaining columns are denormalized projections that exist only so
//! queries can use indices. Every operation opens a short-lived exclusive
//! connection, which keeps the store single-writer but many-reader safe
//! across threads.

use std::path::{Path, PathBuf};

use chrono::{Duration, Local, NaiveDate};
use hound::{SampleFormat, WavSpec, WavWriter};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use super::{Session, SessionStatus};
use crate::error::AudiologResult;

/// Query parameters for [`SessionStore::list`].
#[derive(Debug, Clone, Default)]
pub struct SessionQuery {
    /// Calendar day the session started on.
    pub date: Option<NaiveDate>,
    pub status: Option<SessionStatus>,
    /// Tag membership.
    pub tag: Option<String>,
    /// 0 means the default of 100.
    pub limit: u32,
}

/// Storage statistics.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total_sessions: u64,
    pub recording_sessions: u64,
    pub transcribed_sessions: u64,
    pub disk_usage_bytes: u64,
    pub disk_usage_mb: f64,
}

/// Session catalog at `data_dir/sessions.db`.
#[derive(Debug, Clone)]
pub struct SessionStore {
    data_dir: PathBuf,
    db_path: PathBuf,
}

impl SessionStore {
    /// Open (creating if needed) the catalog under `data_dir`, migrating
    /// the schema in place.
    pub fn open(data_dir: impl Into<PathBuf>) -> AudiologResult<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;

        let store = Self {
            db_path: data_dir.join("sessions.db"),
            data_dir,
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn connect(&self) -> AudiologResult<Connection> {
        Ok(Connection::open(&self.db_path)?)
    }

    fn init_schema(&self) -> AudiologResult<()> {
        let conn = self.connect()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                start_time TEXT NOT NULL,
                end_time TEXT,
                status TEXT DEFAULT 'recording',
                tags TEXT DEFAULT '[]',
                transcription_status TEXT DEFAULT 'pending',
                transcription_path TEXT,
                notes TEXT DEFAULT '',
                title TEXT DEFAULT '',
                summary TEXT DEFAULT '',
                data TEXT NOT NULL
            )",
            [],
        )?;

        // Catalogs created by older builds predate these columns.
        for column in ["title", "summary"] {
            let sql = format!("ALTER TABLE sessions ADD COLUMN {} TEXT DEFAULT ''", column);
            if let Err(e) = conn.execute(&sql, []) {
                if !e.to_string().contains("duplicate column name") {
                    return Err(e.into());
                }
            }
        }

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_sessions_start_time ON sessions(start_time)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status)",
            [],
        )?;

        Ok(())
    }

    /// Upsert a session by id. The serialized document is authoritative;
    /// the projected columns are refreshed alongside it.
    pub fn save(&self, session: &Session) -> AudiologResult<()> {
        let conn = self.connect()?;

        conn.execute(
            "INSERT OR REPLACE INTO sessions
             (session_id, start_time, end_time, status, tags,
              transcription_status, transcription_path, notes, title, summary, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                session.session_id,
                session.start_time.to_rfc3339(),
                session.end_time.map(|t| t.to_rfc3339()),
                session.status.as_str(),
                serde_json::to_string(&session.tags)?,
                session.transcription_status.as_str(),
                session.transcription_path,
                session.notes,
                session.title,
                session.summary,
                serde_json::to_string(session)?,
            ],
        )?;

        tracing::debug!("session saved: {}", session.session_id);
        Ok(())
    }

    pub fn get(&self, session_id: &str) -> AudiologResult<Option<Session>> {
        let conn = self.connect()?;

        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM sessions WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;

        match data {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// List sessions, newest first by start time.
    pub fn list(&self, query: &SessionQuery) -> AudiologResult<Vec<Session>> {
        let mut sql = "SELECT data FROM sessions WHERE 1=1".to_string();
        let mut args: Vec<String> = Vec::new();

        if let Some(date) = query.date {
            sql.push_str(&format!(" AND start_time LIKE ?{}", args.len() + 1));
            args.push(format!("{}%", date.format("%Y-%m-%d")));
        }
        if let Some(status) = query.status {
            sql.push_str(&format!(" AND status = ?{}", args.len() + 1));
            args.push(status.as_str().to_string());
        }
        if let Some(tag) = &query.tag {
            sql.push_str(&format!(" AND tags LIKE ?{}", args.len() + 1));
            args.push(format!("%\"{}\"%", tag));
        }

        let limit = if query.limit == 0 { 100 } else { query.limit };
        sql.push_str(&format!(" ORDER BY start_time DESC LIMIT {}", limit));

        let conn = self.connect()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), |row| {
            row.get::<_, String>(0)
        })?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(serde_json::from_str(&row?)?);
        }
        Ok(sessions)
    }

    /// All sessions that started on the given calendar day.
    pub fn list_by_date(&self, date: NaiveDate) -> AudiologResult<Vec<Session>> {
        self.list(&SessionQuery {
            date: Some(date),
            ..Default::default()
        })
    }

    /// Today's sessions.
    pub fn today_sessions(&self) -> AudiologResult<Vec<Session>> {
        self.list_by_date(Local::now().date_naive())
    }

    /// Delete a session; with `delete_files` its chunk files go too.
    /// Returns `false` when the id was not present.
    pub fn delete(&self, session_id: &str, delete_files: bool) -> AudiologResult<bool> {
        let Some(session) = self.get(session_id)? else {
            return Ok(false);
        };

        if delete_files {
            for chunk in &session.chunks {
                let chunk_path = self.data_dir.join(&chunk.file_path);
                if chunk_path.exists() {
                    if let Err(e) = std::fs::remove_file(&chunk_path) {
                        tracing::warn!("failed to remove {}: {}", chunk_path.display(), e);
                    }
                }
            }
        }

        let conn = self.connect()?;
        conn.execute(
            "DELETE FROM sessions WHERE session_id = ?1",
            params![session_id],
        )?;

        tracing::info!("session deleted: {}", session_id);
        Ok(true)
    }

    /// Sessions that started more than `days` days ago.
    pub fn get_older_than(&self, days: i64) -> AudiologResult<Vec<Session>> {
        let cutoff = (Local::now() - Duration::days(days)).to_rfc3339();

        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT data FROM sessions WHERE start_time < ?1")?;
        let rows = stmt.query_map(params![cutoff], |row| row.get::<_, String>(0))?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(serde_json::from_str(&row?)?);
        }
        Ok(sessions)
    }

    /// Expire sessions past the retention window. Returns how many were
    /// removed.
    pub fn cleanup(&self, retention_days: i64, delete_files: bool) -> AudiologResult<usize> {
        let old_sessions = self.get_older_than(retention_days)?;
        let mut count = 0;

        for session in old_sessions {
            if self.delete(&session.session_id, delete_files)? {
                count += 1;
            }
        }

        tracing::info!("cleanup removed {} old session(s)", count);
        Ok(count)
    }

    /// Concatenate a session's non-silent chunks into a single WAV under
    /// `data_dir/exports/` (or `output` when given) and mark the session
    /// exported. Returns `None` when the session is missing or has no
    /// readable audio.
    pub fn export(
        &self,
        session_id: &str,
        output: Option<PathBuf>,
    ) -> AudiologResult<Option<PathBuf>> {
        let Some(mut session) = self.get(session_id)? else {
            tracing::error!("cannot export unknown session: {}", session_id);
            return Ok(None);
        };

        let output_path = match output {
            Some(path) => path,
            None => {
                let exports_dir = self.data_dir.join("exports");
                std::fs::create_dir_all(&exports_dir)?;
                exports_dir.join(format!("{}.wav", session_id))
            }
        };

        let mut merged: Vec<i16> = Vec::new();
        let mut format: Option<(u32, u16)> = None;

        for chunk in &session.chunks {
            if chunk.is_silent {
                continue;
            }

            let chunk_path = self.data_dir.join(&chunk.file_path);
            if !chunk_path.exists() {
                tracing::warn!("chunk file missing: {}", chunk_path.display());
                continue;
            }

            match hound::WavReader::open(&chunk_path) {
                Ok(mut reader) => {
                    if format.is_none() {
                        let spec = reader.spec();
                        format = Some((spec.sample_rate, spec.channels));
                    }
                    for sample in reader.samples::<i16>() {
                        match sample {
                            Ok(s) => merged.push(s),
                            Err(e) => {
                                tracing::error!(
                                    "failed reading {}: {}",
                                    chunk_path.display(),
                                    e
                                );
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("failed opening {}: {}", chunk_path.display(), e);
                }
            }
        }

        if merged.is_empty() {
            tracing::error!("no audio to export for {}", session_id);
            return Ok(None);
        }

        let (sample_rate, channels) = format.unwrap_or((16_000, 1));
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };

        let mut writer = WavWriter::create(&output_path, spec)?;
        for sample in merged {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;

        session.status = SessionStatus::Exported;
        self.save(&session)?;

        tracing::info!("session exported: {}", output_path.display());
        Ok(Some(output_path))
    }

    /// Counters plus the disk footprint of all chunk files.
    pub fn stats(&self) -> AudiologResult<StoreStats> {
        let conn = self.connect()?;

        let total_sessions: i64 =
            conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
        let recording_sessions: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sessions WHERE status = 'recording'",
            [],
            |row| row.get(0),
        )?;
        let transcribed_sessions: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sessions WHERE transcription_status = 'completed'",
            [],
            |row| row.get(0),
        )?;

        let disk_usage_bytes = wav_bytes_under(&self.data_dir);

        Ok(StoreStats {
            total_sessions: total_sessions as u64,
            recording_sessions: recording_sessions as u64,
            transcribed_sessions: transcribed_sessions as u64,
            disk_usage_bytes,
            disk_usage_mb: disk_usage_bytes as f64 / (1024.0 * 1024.0),
        })
    }
}

fn wav_bytes_under(dir: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };

    let mut total = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            total += wav_bytes_under(&path);
        } else if path.extension().is_some_and(|ext| ext == "wav") {
            total += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }
    total
}
