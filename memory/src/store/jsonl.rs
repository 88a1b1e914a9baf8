use super::*;
use crate::error::MemoryError;
use anyhow::Context as _;
use std::io::Read as _;
use std::io::Write as _;
use std::io::Seek as _;
use std::io::SeekFrom;
use std::path::PathBuf;

pub const LOG_FILE: &str = "turns.jsonl";
pub const INDEX_FILE: &str = "semantic_index.json";

/// `<root>/turns.jsonl` (one turn per line) plus `<root>/semantic_index.json`.
///
/// Not safe for concurrent writers: two processes appending to the same root
/// can interleave lines and the last index write wins. The log itself stays
/// readable line by line, so reopening rebuilds a correct index.
#[derive(Debug, Clone)]
pub struct JsonlTurnStorage {
    log_path: PathBuf,
    index_path: PathBuf,
}

impl JsonlTurnStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref();
        Self {
            log_path: root.join(LOG_FILE),
            index_path: root.join(INDEX_FILE),
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }
}

impl TurnStorage for JsonlTurnStorage {
    fn append_turns(&self, turns: &[ConversationTurn]) -> anyhow::Result<()> {
        if let Some(dir) = self.log_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.log_path)
            .with_context(|| format!("open {}", self.log_path.display()))?;

        let mut out = String::new();
        // A previous crash may have left a partial last line; start fresh
        // rather than gluing the next record onto it.
        if f.metadata()?.len() > 0 {
            let mut last = [0u8; 1];
            f.seek(SeekFrom::End(-1))?;
            f.read_exact(&mut last)?;
            if last[0] != b'\n' {
                out.push('\n');
            }
        }
        for turn in turns {
            out.push_str(&serde_json::to_string(turn)?);
            out.push('\n');
        }
        f.write_all(out.as_bytes())?;
        f.flush()?;
        Ok(())
    }

    fn load_turns(&self) -> anyhow::Result<Vec<ConversationTurn>> {
        let data = match std::fs::read(&self.log_path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("read {}", self.log_path.display()));
            }
        };
        let mut turns = Vec::new();
        for (i, line) in data.split(|b| *b == b'\n').enumerate() {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<ConversationTurn>(line) {
                Ok(turn) => turns.push(turn),
                Err(source) => {
                    let err = MemoryError::StoreCorruption {
                        path: self.log_path.clone(),
                        line: i + 1,
                        source,
                    };
                    tracing::warn!("skipping turn: {err}");
                }
            }
        }
        Ok(turns)
    }

    fn save_index(&self, index: &KeywordIndex) -> anyhow::Result<()> {
        let data = serde_json::to_vec_pretty(index)?;
        write_atomic(&self.index_path, &data)
    }

    fn load_index(&self) -> anyhow::Result<Option<KeywordIndex>> {
        let data = match std::fs::read(&self.index_path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("read {}", self.index_path.display()));
            }
        };
        match serde_json::from_slice(&data) {
            Ok(index) => Ok(Some(index)),
            Err(err) => {
                tracing::warn!("ignoring unreadable {}: {err}", self.index_path.display());
                Ok(None)
            }
        }
    }
}
