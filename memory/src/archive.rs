//! Per-session directory persistence.
//!
//! Layout under the archive root:
//!
//! ```text
//! <root>/index.json
//! <root>/<session_id>/metadata.json
//! <root>/<session_id>/decisions.json
//! <root>/<session_id>/breakthroughs.json
//! <root>/<session_id>/tasks.json
//! <root>/<session_id>/user_intent.json
//! <root>/<session_id>/technical_context.json
//! <root>/<session_id>/successor_notes.json
//! <root>/<session_id>/conversation_summary.md
//! <root>/<session_id>/integrity.sha256
//! ```
//!
//! JSON parts are written compact and parsed strictly (unknown keys are
//! rejected), so any edited byte either fails to parse or changes a value
//! covered by the integrity hash.

use crate::error::MemoryError;
use crate::integrity;
use crate::store::write_atomic;
use crate::types::SessionMemory;
use anyhow::Context as _;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::path::PathBuf;

pub const INDEX_FILE: &str = "index.json";
pub const METADATA_FILE: &str = "metadata.json";
pub const DECISIONS_FILE: &str = "decisions.json";
pub const BREAKTHROUGHS_FILE: &str = "breakthroughs.json";
pub const TASKS_FILE: &str = "tasks.json";
pub const USER_INTENT_FILE: &str = "user_intent.json";
pub const TECHNICAL_CONTEXT_FILE: &str = "technical_context.json";
pub const SUCCESSOR_NOTES_FILE: &str = "successor_notes.json";
pub const SUMMARY_FILE: &str = "conversation_summary.md";
pub const HASH_FILE: &str = "integrity.sha256";

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Metadata {
    session_id: String,
    timestamp: String,
    context_utilization: f64,
    character_plate_version: String,
    previous_session_id: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct SuccessorNotes {
    warnings: Vec<String>,
    priorities: Vec<String>,
}

/// One row of `index.json`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct IndexEntry {
    pub session_id: String,
    pub timestamp: String,
    pub context_utilization: f64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SessionIndex {
    pub sessions: Vec<IndexEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkippedSession {
    pub session_id: String,
    pub reason: String,
}

/// Result of [`SessionArchive::load_recent_sessions`]: verified sessions,
/// most recent first, plus the ones that were left out.
#[derive(Debug, Default)]
pub struct RecentSessions {
    pub sessions: Vec<SessionMemory>,
    pub skipped: Vec<SkippedSession>,
}

#[derive(Debug, Clone)]
pub struct SessionArchive {
    root: PathBuf,
}

impl SessionArchive {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, session_id: &str) -> anyhow::Result<PathBuf> {
        validate_session_id(session_id)?;
        Ok(self.root.join(session_id))
    }

    /// Persist `memory` and upsert its index entry. The hash is recomputed so
    /// the stored digest always matches the stored content.
    pub fn save(&self, memory: &SessionMemory) -> anyhow::Result<PathBuf> {
        let dir = self.session_dir(&memory.session_id)?;
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create session dir {}", dir.display()))?;

        let mut sealed = memory.clone();
        integrity::seal(&mut sealed)?;

        for (name, data) in encode_parts(&sealed)? {
            write_atomic(&dir.join(name), &data)?;
        }

        let mut index = self.read_index()?;
        index.sessions.retain(|e| e.session_id != sealed.session_id);
        index.sessions.push(IndexEntry {
            session_id: sealed.session_id.clone(),
            timestamp: sealed.timestamp.clone(),
            context_utilization: sealed.context_utilization,
        });
        self.write_index(&index)?;

        tracing::info!("saved session {} to {}", sealed.session_id, dir.display());
        Ok(dir)
    }

    /// Read a session back. `metadata.json` is required; other parts default
    /// to empty when absent. The hash is read from `integrity.sha256`, not
    /// checked here.
    pub fn load_session(&self, session_id: &str) -> anyhow::Result<SessionMemory> {
        let dir = self.session_dir(session_id)?;
        let meta_path = dir.join(METADATA_FILE);
        if !meta_path.exists() {
            return Err(MemoryError::MissingSession(session_id.to_string()).into());
        }
        let metadata: Metadata = read_json(&meta_path)?;
        let notes: SuccessorNotes = read_json_or_default(&dir.join(SUCCESSOR_NOTES_FILE))?;
        let conversation_summary = read_text_or_default(&dir.join(SUMMARY_FILE))?;
        let integrity_hash = read_text_or_default(&dir.join(HASH_FILE))?
            .trim()
            .to_string();

        Ok(SessionMemory {
            session_id: metadata.session_id,
            timestamp: metadata.timestamp,
            decisions: read_json_or_default(&dir.join(DECISIONS_FILE))?,
            breakthroughs: read_json_or_default(&dir.join(BREAKTHROUGHS_FILE))?,
            user_intent: read_json_or_default(&dir.join(USER_INTENT_FILE))?,
            technical_context: read_json_or_default(&dir.join(TECHNICAL_CONTEXT_FILE))?,
            tasks: read_json_or_default(&dir.join(TASKS_FILE))?,
            previous_session_id: metadata.previous_session_id,
            context_utilization: metadata.context_utilization,
            conversation_summary,
            character_plate_version: metadata.character_plate_version,
            warnings: notes.warnings,
            successor_priorities: notes.priorities,
            integrity_hash,
        })
    }

    /// Load a session and fail with [`MemoryError::IntegrityFailure`] when the
    /// stored hash does not match the content, or when a part on disk is not
    /// byte for byte what [`Self::save`] would write for the loaded values.
    ///
    /// The second check catches edits that parse back to the same value,
    /// such as `1.0` rewritten as `1e0` or a `\u001f` escape in upper case.
    pub fn load_verified(&self, session_id: &str) -> anyhow::Result<SessionMemory> {
        let memory = self.load_session(session_id)?;
        let actual = integrity::compute_hash(&memory)?;
        if actual != memory.integrity_hash {
            return Err(MemoryError::IntegrityFailure {
                session_id: session_id.to_string(),
                expected: memory.integrity_hash,
                actual,
            }
            .into());
        }

        let dir = self.session_dir(session_id)?;
        for (name, encoded) in encode_parts(&memory)? {
            let path = dir.join(name);
            let on_disk = match std::fs::read(&path) {
                Ok(data) => data,
                // Absent optional parts already loaded as defaults and were
                // covered by the hash above.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
            };
            if on_disk != encoded {
                tracing::debug!("{} differs from its canonical encoding", path.display());
                return Err(MemoryError::IntegrityFailure {
                    session_id: session_id.to_string(),
                    expected: integrity::sha256_hex(&on_disk),
                    actual: integrity::sha256_hex(&encoded),
                }
                .into());
            }
        }
        Ok(memory)
    }

    /// False when the session cannot be read or its hash does not match.
    pub fn verify_integrity(&self, session_id: &str) -> bool {
        self.load_verified(session_id).is_ok()
    }

    /// Index entries, most recent first.
    pub fn list_sessions(&self) -> anyhow::Result<Vec<IndexEntry>> {
        let mut entries = self.read_index()?.sessions;
        entries.sort_by(|a, b| {
            parse_ts(&b.timestamp)
                .cmp(&parse_ts(&a.timestamp))
                .then_with(|| b.timestamp.cmp(&a.timestamp))
        });
        Ok(entries)
    }

    /// Load the `n` most recent sessions. Sessions that fail to load or
    /// verify are dropped with a warning and reported in `skipped`; they are
    /// not replaced by older sessions.
    pub fn load_recent_sessions(&self, n: usize) -> anyhow::Result<RecentSessions> {
        let mut out = RecentSessions::default();
        for entry in self.list_sessions()?.into_iter().take(n) {
            match self.load_verified(&entry.session_id) {
                Ok(memory) => out.sessions.push(memory),
                Err(err) => {
                    tracing::warn!("skipping session {}: {err:#}", entry.session_id);
                    out.skipped.push(SkippedSession {
                        session_id: entry.session_id,
                        reason: format!("{err:#}"),
                    });
                }
            }
        }
        Ok(out)
    }

    /// Read `index.json`, falling back to a scan of session directories when
    /// the file is missing or unparseable.
    pub fn read_index(&self) -> anyhow::Result<SessionIndex> {
        let path = self.root.join(INDEX_FILE);
        let data = match std::fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return self.scan_sessions();
            }
            Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
        };
        match serde_json::from_str::<SessionIndex>(&data) {
            Ok(index) => Ok(index),
            Err(err) => {
                tracing::warn!(
                    "index {} is unreadable ({err}); rebuilding from session directories",
                    path.display()
                );
                self.scan_sessions()
            }
        }
    }

    fn write_index(&self, index: &SessionIndex) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        let data = serde_json::to_vec_pretty(index)?;
        write_atomic(&self.root.join(INDEX_FILE), &data)
    }

    fn scan_sessions(&self) -> anyhow::Result<SessionIndex> {
        let mut index = SessionIndex::default();
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(index),
            Err(e) => return Err(e).with_context(|| format!("scan {}", self.root.display())),
        };
        for entry in entries.flatten() {
            let meta_path = entry.path().join(METADATA_FILE);
            if !meta_path.is_file() {
                continue;
            }
            match read_json::<Metadata>(&meta_path) {
                Ok(meta) => index.sessions.push(IndexEntry {
                    session_id: meta.session_id,
                    timestamp: meta.timestamp,
                    context_utilization: meta.context_utilization,
                }),
                Err(err) => tracing::warn!("ignoring {}: {err:#}", meta_path.display()),
            }
        }
        Ok(index)
    }
}

fn validate_session_id(session_id: &str) -> anyhow::Result<()> {
    if session_id.is_empty()
        || session_id == INDEX_FILE
        || session_id == "."
        || session_id == ".."
        || session_id.contains(['/', '\\'])
    {
        anyhow::bail!("invalid session id: {session_id:?}");
    }
    Ok(())
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Every file of a session directory with its exact contents, hash last so
/// a partial save never leaves a digest describing unwritten parts.
fn encode_parts(memory: &SessionMemory) -> anyhow::Result<Vec<(&'static str, Vec<u8>)>> {
    let metadata = Metadata {
        session_id: memory.session_id.clone(),
        timestamp: memory.timestamp.clone(),
        context_utilization: memory.context_utilization,
        character_plate_version: memory.character_plate_version.clone(),
        previous_session_id: memory.previous_session_id.clone(),
    };
    let notes = SuccessorNotes {
        warnings: memory.warnings.clone(),
        priorities: memory.successor_priorities.clone(),
    };
    Ok(vec![
        (METADATA_FILE, serde_json::to_vec(&metadata)?),
        (DECISIONS_FILE, serde_json::to_vec(&memory.decisions)?),
        (BREAKTHROUGHS_FILE, serde_json::to_vec(&memory.breakthroughs)?),
        (TASKS_FILE, serde_json::to_vec(&memory.tasks)?),
        (USER_INTENT_FILE, serde_json::to_vec(&memory.user_intent)?),
        (TECHNICAL_CONTEXT_FILE, serde_json::to_vec(&memory.technical_context)?),
        (SUCCESSOR_NOTES_FILE, serde_json::to_vec(&notes)?),
        (SUMMARY_FILE, memory.conversation_summary.as_bytes().to_vec()),
        (HASH_FILE, format!("{}\n", memory.integrity_hash).into_bytes()),
    ])
}

fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let data = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_slice(&data).map_err(|source| {
        MemoryError::StoreCorruption {
            path: path.to_path_buf(),
            line: source.line(),
            source,
        }
        .into()
    })
}

fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> anyhow::Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    read_json(path)
}

fn read_text_or_default(path: &Path) -> anyhow::Result<String> {
    match std::fs::read_to_string(path) {
        Ok(s) => Ok(s),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e).with_context(|| format!("read {}", path.display())),
    }
}
