//! Integration tests for the session catalog: round-trip and export laws.

use audiolog::{AudioChunk, Session, SessionQuery, SessionStatus, SessionStore};
use chrono::{DateTime, Duration, Local, TimeZone};
use hound::{SampleFormat, WavSpec, WavWriter};
use tempfile::tempdir;

const RATE: u32 = 16_000;

fn at(h: u32, m: u32) -> DateTime<Local> {
    Local.with_ymd_and_hms(2026, 6, 10, h, m, 0).unwrap()
}

/// Write a real chunk file and return the matching chunk record.
fn write_chunk_file(
    data_dir: &std::path::Path,
    index: u64,
    seconds: f64,
    amplitude: f32,
    silent: bool,
) -> AudioChunk {
    let rel = format!("2026-06-10/09-00-{:02}_{:04}.wav", index, index);
    let path = data_dir.join(&rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();

    let spec = WavSpec {
        channels: 1,
        sample_rate: RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(&path, spec).unwrap();
    let total = (seconds * RATE as f64) as usize;
    for i in 0..total {
        let sample = (amplitude * (i as f32 * 0.35).sin() * 32767.0) as i16;
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();

    AudioChunk {
        file_path: rel,
        timestamp: at(9, 0) + Duration::seconds(index as i64 * 10),
        duration_seconds: seconds,
        index,
        rms_level: if silent { 0.0 } else { amplitude / 2.0 },
        is_silent: silent,
        speech_ratio: if silent { 0.0 } else { 0.8 },
    }
}

#[test]
fn test_save_get_equality_through_public_api() {
    let dir = tempdir().unwrap();
    let store = SessionStore::open(dir.path()).unwrap();

    let mut session = Session::create_new(at(9, 0));
    session.add_chunk(write_chunk_file(dir.path(), 1, 2.0, 0.3, false));
    session.add_chunk(write_chunk_file(dir.path(), 2, 2.0, 0.0, true));
    session.add_tag("meeting");
    session.notes = "weekly sync".to_string();
    session.complete();

    store.save(&session).unwrap();
    let loaded = store.get(&session.session_id).unwrap().unwrap();

    assert_eq!(loaded, session);
    assert_eq!(loaded.chunks.len(), 2);
    assert_eq!(loaded.chunks[0].index, 1);
    assert_eq!(loaded.status, SessionStatus::Completed);
}

#[test]
fn test_export_concatenates_non_silent_chunks() {
    let dir = tempdir().unwrap();
    let store = SessionStore::open(dir.path()).unwrap();

    let mut session = Session::create_new(at(9, 0));
    session.add_chunk(write_chunk_file(dir.path(), 1, 3.0, 0.3, false));
    session.add_chunk(write_chunk_file(dir.path(), 2, 3.0, 0.0, true));
    session.add_chunk(write_chunk_file(dir.path(), 3, 2.0, 0.3, false));
    session.complete();
    store.save(&session).unwrap();

    let exported = store.export(&session.session_id, None).unwrap().unwrap();
    assert_eq!(
        exported,
        dir.path().join("exports").join(format!("{}.wav", session.session_id))
    );

    // exported duration equals the sum of non-silent chunk durations
    let reader = hound::WavReader::open(&exported).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.sample_rate, RATE);
    assert_eq!(spec.channels, 1);
    let exported_seconds = reader.duration() as f64 / spec.sample_rate as f64;
    assert!((exported_seconds - 5.0).abs() < 0.05);

    // the session transitions to exported
    let loaded = store.get(&session.session_id).unwrap().unwrap();
    assert_eq!(loaded.status, SessionStatus::Exported);
}

#[test]
fn test_export_unknown_session_is_none() {
    let dir = tempdir().unwrap();
    let store = SessionStore::open(dir.path()).unwrap();
    assert!(store
        .export("sess_20260610_090000_ffffff", None)
        .unwrap()
        .is_none());
}

#[test]
fn test_export_all_silent_session_is_none() {
    let dir = tempdir().unwrap();
    let store = SessionStore::open(dir.path()).unwrap();

    let mut session = Session::create_new(at(9, 0));
    session.add_chunk(write_chunk_file(dir.path(), 1, 2.0, 0.0, true));
    store.save(&session).unwrap();

    assert!(store.export(&session.session_id, None).unwrap().is_none());
    // status untouched
    let loaded = store.get(&session.session_id).unwrap().unwrap();
    assert_eq!(loaded.status, SessionStatus::Recording);
}

#[test]
fn test_export_to_explicit_path() {
    let dir = tempdir().unwrap();
    let store = SessionStore::open(dir.path()).unwrap();

    let mut session = Session::create_new(at(9, 0));
    session.add_chunk(write_chunk_file(dir.path(), 1, 1.0, 0.3, false));
    store.save(&session).unwrap();

    let target = dir.path().join("custom.wav");
    let exported = store
        .export(&session.session_id, Some(target.clone()))
        .unwrap()
        .unwrap();
    assert_eq!(exported, target);
    assert!(target.exists());
}

#[test]
fn test_list_and_cleanup_through_public_api() {
    let dir = tempdir().unwrap();
    let store = SessionStore::open(dir.path()).unwrap();

    let mut old = Session::create_new(Local::now() - Duration::days(45));
    old.add_chunk(write_chunk_file(dir.path(), 1, 1.0, 0.3, false));
    old.complete();
    store.save(&old).unwrap();

    let mut fresh = Session::create_new(Local::now());
    fresh.add_chunk(write_chunk_file(dir.path(), 2, 1.0, 0.3, false));
    store.save(&fresh).unwrap();

    assert_eq!(store.list(&SessionQuery::default()).unwrap().len(), 2);

    let old_file = dir.path().join(&old.chunks[0].file_path);
    assert!(old_file.exists());

    let removed = store.cleanup(30, true).unwrap();
    assert_eq!(removed, 1);
    assert!(!old_file.exists());

    let remaining = store.list(&SessionQuery::default()).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].session_id, fresh.session_id);

    let stats = store.stats().unwrap();
    assert_eq!(stats.total_sessions, 1);
}
