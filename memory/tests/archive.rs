use continuity_memory::MemoryError;
use continuity_memory::archive::DECISIONS_FILE;
use continuity_memory::archive::HASH_FILE;
use continuity_memory::archive::INDEX_FILE;
use continuity_memory::archive::METADATA_FILE;
use continuity_memory::archive::SUMMARY_FILE;
use continuity_memory::archive::SessionArchive;
use continuity_memory::context;
use continuity_memory::extract::SessionExtractor;
use continuity_memory::extract::SessionInput;
use continuity_memory::types::Message;
use continuity_memory::types::SessionMemory;
use pretty_assertions::assert_eq;
use std::fs;

fn session(id: &str, day: u32) -> SessionMemory {
    let extractor = SessionExtractor::with_defaults(10_000).unwrap();
    extractor
        .extract(SessionInput {
            session_id: Some(id.to_string()),
            timestamp: Some(format!("2025-01-{day:02}T10:00:00Z")),
            files_changed: vec![format!("src/{id}.rs")],
            warnings: vec![format!("{id} left the migration half applied")],
            ..SessionInput::new(vec![
                Message::user(format!("I want to finish the {id} importer today.")),
                Message::assistant(format!(
                    "I'll rewrite the {id} importer because the parser drops rows. Next: add a regression test for {id}."
                )),
                Message::user("No, keep the parser and fix the row filter"),
            ])
        })
        .unwrap()
}

#[test]
fn save_then_load_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let archive = SessionArchive::new(dir.path());
    let memory = session("alpha", 1);

    let path = archive.save(&memory).unwrap();
    assert_eq!(path, dir.path().join("alpha"));
    for file in [METADATA_FILE, DECISIONS_FILE, SUMMARY_FILE, HASH_FILE] {
        assert!(path.join(file).is_file(), "missing {file}");
    }
    assert_eq!(
        fs::read_to_string(path.join(HASH_FILE)).unwrap(),
        format!("{}\n", memory.integrity_hash)
    );

    let loaded = archive.load_verified("alpha").unwrap();
    assert_eq!(loaded, memory);
    assert!(archive.verify_integrity("alpha"));
}

#[test]
fn save_reseals_a_modified_record() {
    let dir = tempfile::tempdir().unwrap();
    let archive = SessionArchive::new(dir.path());
    let mut memory = session("alpha", 1);
    memory.successor_priorities.push("ship it".to_string());

    archive.save(&memory).unwrap();
    assert!(archive.verify_integrity("alpha"));
    let loaded = archive.load_session("alpha").unwrap();
    assert_ne!(loaded.integrity_hash, memory.integrity_hash);
}

#[test]
fn edited_summary_fails_verification() {
    let dir = tempfile::tempdir().unwrap();
    let archive = SessionArchive::new(dir.path());
    archive.save(&session("alpha", 1)).unwrap();

    let summary = dir.path().join("alpha").join(SUMMARY_FILE);
    let mut text = fs::read_to_string(&summary).unwrap();
    text.push('!');
    fs::write(&summary, text).unwrap();

    assert!(!archive.verify_integrity("alpha"));
    let err = archive.load_verified("alpha").unwrap_err();
    match err.downcast_ref::<MemoryError>() {
        Some(MemoryError::IntegrityFailure { session_id, .. }) => assert_eq!(session_id, "alpha"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn edited_metadata_value_fails_verification() {
    let dir = tempfile::tempdir().unwrap();
    let archive = SessionArchive::new(dir.path());
    archive.save(&session("alpha", 1)).unwrap();

    let meta_path = dir.path().join("alpha").join(METADATA_FILE);
    let mut meta: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&meta_path).unwrap()).unwrap();
    meta["context_utilization"] = serde_json::json!(0.99);
    fs::write(&meta_path, serde_json::to_string(&meta).unwrap()).unwrap();

    assert!(archive.load_session("alpha").is_ok());
    assert!(!archive.verify_integrity("alpha"));
}

#[test]
fn unknown_keys_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let archive = SessionArchive::new(dir.path());
    archive.save(&session("alpha", 1)).unwrap();

    let path = dir.path().join("alpha").join(DECISIONS_FILE);
    let data = fs::read_to_string(&path).unwrap();
    fs::write(&path, data.replacen("\"reasoning\"", "\"reasonimg\"", 1)).unwrap();

    assert!(archive.load_session("alpha").is_err());
    assert!(!archive.verify_integrity("alpha"));
}

#[test]
fn missing_session_is_typed() {
    let dir = tempfile::tempdir().unwrap();
    let archive = SessionArchive::new(dir.path());
    let err = archive.load_session("ghost").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<MemoryError>(),
        Some(MemoryError::MissingSession(id)) if id == "ghost"
    ));
    assert!(!archive.verify_integrity("ghost"));
    assert!(archive.load_session("../escape").is_err());
}

#[test]
fn optional_parts_default_when_absent() {
    let dir = tempfile::tempdir().unwrap();
    let archive = SessionArchive::new(dir.path());
    archive.save(&session("alpha", 1)).unwrap();
    fs::remove_file(dir.path().join("alpha").join(DECISIONS_FILE)).unwrap();

    let loaded = archive.load_session("alpha").unwrap();
    assert!(loaded.decisions.is_empty());
    // The record no longer matches what was sealed.
    assert!(!archive.verify_integrity("alpha"));
}

#[test]
fn recent_sessions_skip_corrupted_ones() {
    let dir = tempfile::tempdir().unwrap();
    let archive = SessionArchive::new(dir.path());
    for day in 1..=5 {
        archive.save(&session(&format!("s{day}"), day)).unwrap();
    }
    let summary = dir.path().join("s3").join(SUMMARY_FILE);
    fs::write(&summary, "rewritten history").unwrap();

    let recent = archive.load_recent_sessions(5).unwrap();
    let ids: Vec<&str> = recent.sessions.iter().map(|s| s.session_id.as_str()).collect();
    assert_eq!(ids, vec!["s5", "s4", "s2", "s1"]);
    assert_eq!(recent.skipped.len(), 1);
    assert_eq!(recent.skipped[0].session_id, "s3");

    let two = archive.load_recent_sessions(2).unwrap();
    let ids: Vec<&str> = two.sessions.iter().map(|s| s.session_id.as_str()).collect();
    assert_eq!(ids, vec!["s5", "s4"]);
    assert!(two.skipped.is_empty());

    let (digest, _) = context::bootstrap(&archive, 5).unwrap();
    assert!(digest.contains("Most recent: s5"));
    assert!(!digest.contains("s3 importer"));
}

#[test]
fn list_orders_by_timestamp_not_save_order() {
    let dir = tempfile::tempdir().unwrap();
    let archive = SessionArchive::new(dir.path());
    archive.save(&session("late", 9)).unwrap();
    archive.save(&session("early", 2)).unwrap();
    archive.save(&session("middle", 5)).unwrap();

    let ids: Vec<String> = archive
        .list_sessions()
        .unwrap()
        .into_iter()
        .map(|e| e.session_id)
        .collect();
    assert_eq!(ids, vec!["late", "middle", "early"]);
}

#[test]
fn resaving_replaces_the_index_entry() {
    let dir = tempfile::tempdir().unwrap();
    let archive = SessionArchive::new(dir.path());
    archive.save(&session("alpha", 1)).unwrap();
    archive.save(&session("alpha", 3)).unwrap();

    let entries = archive.list_sessions().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].timestamp, "2025-01-03T10:00:00Z");
}

#[test]
fn unreadable_index_is_rebuilt_from_directories() {
    let dir = tempfile::tempdir().unwrap();
    let archive = SessionArchive::new(dir.path());
    for day in 1..=3 {
        archive.save(&session(&format!("s{day}"), day)).unwrap();
    }

    fs::write(dir.path().join(INDEX_FILE), "{ not json").unwrap();
    let recent = archive.load_recent_sessions(3).unwrap();
    assert_eq!(recent.sessions.len(), 3);
    assert_eq!(recent.sessions[0].session_id, "s3");

    fs::remove_file(dir.path().join(INDEX_FILE)).unwrap();
    assert_eq!(archive.list_sessions().unwrap().len(), 3);
}

#[test]
fn empty_archive_bootstraps_to_placeholder() {
    let dir = tempfile::tempdir().unwrap();
    let archive = SessionArchive::new(dir.path().join("never-created"));
    let (digest, recent) = context::bootstrap(&archive, 3).unwrap();
    assert!(recent.sessions.is_empty());
    assert!(digest.contains("No previous sessions"));
}

#[test]
fn every_single_byte_edit_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    let archive = SessionArchive::new(dir.path());
    let mut memory = session("alpha", 1);
    // Integral floats and an escaped control character have spellings that
    // parse back to the same value.
    memory.context_utilization = 1.0;
    memory.decisions[0].importance = 1.0;
    memory.user_intent.mean_message_length = 39.0;
    memory
        .technical_context
        .files_changed
        .push("src/a\u{1f}b.rs".to_string());
    archive.save(&memory).unwrap();

    let session_dir = dir.path().join("alpha");
    let metadata = fs::read_to_string(session_dir.join(METADATA_FILE)).unwrap();
    assert!(metadata.contains("1.0"), "{metadata}");

    let mut files: Vec<_> = fs::read_dir(&session_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .filter(|name| name.ends_with(".json") || name == HASH_FILE)
        .collect();
    files.sort();
    assert!(files.len() >= 8, "{files:?}");

    for name in &files {
        let path = session_dir.join(name);
        let original = fs::read(&path).unwrap();
        for (i, &byte) in original.iter().enumerate() {
            let swapped = if byte.is_ascii_lowercase() {
                byte.to_ascii_uppercase()
            } else {
                byte.to_ascii_lowercase()
            };
            for replacement in [swapped, b'e', b'E', b'0', b' ', b'"'] {
                if replacement == byte {
                    continue;
                }
                let mut edited = original.clone();
                edited[i] = replacement;
                fs::write(&path, &edited).unwrap();
                assert!(
                    !archive.verify_integrity("alpha"),
                    "{name}: byte {i} {:?} -> {:?} went unnoticed",
                    byte as char,
                    replacement as char
                );
            }
        }
        fs::write(&path, &original).unwrap();
    }
    assert!(archive.verify_integrity("alpha"));
}

#[test]
fn float_respelling_is_an_integrity_failure() {
    let dir = tempfile::tempdir().unwrap();
    let archive = SessionArchive::new(dir.path());
    let mut memory = session("alpha", 1);
    memory.context_utilization = 1.0;
    archive.save(&memory).unwrap();

    let path = dir.path().join("alpha").join(METADATA_FILE);
    let text = fs::read_to_string(&path).unwrap();
    let respelled = text.replace("\"context_utilization\":1.0", "\"context_utilization\":1e0");
    assert_ne!(respelled, text);
    fs::write(&path, respelled).unwrap();

    // The values still load and hash the same.
    let loaded = archive.load_session("alpha").unwrap();
    assert!(continuity_memory::integrity::is_intact(&loaded));

    let err = archive.load_verified("alpha").unwrap_err();
    assert!(
        matches!(
            err.downcast_ref::<MemoryError>(),
            Some(MemoryError::IntegrityFailure { session_id, .. }) if session_id == "alpha"
        ),
        "{err:#}"
    );
}

#[test]
fn index_file_name_is_not_a_session_id() {
    let dir = tempfile::tempdir().unwrap();
    let archive = SessionArchive::new(dir.path());
    archive.save(&session("alpha", 1)).unwrap();

    let err = archive.save(&session(INDEX_FILE, 2)).unwrap_err();
    assert!(format!("{err:#}").contains("invalid session id"), "{err:#}");
    assert!(dir.path().join(INDEX_FILE).is_file());
    assert!(archive.load_session(INDEX_FILE).is_err());
    assert!(!archive.verify_integrity(INDEX_FILE));
    assert_eq!(archive.list_sessions().unwrap().len(), 1);
}
