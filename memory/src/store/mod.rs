use crate::types::ConversationTurn;
use anyhow::Context as _;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::io::Write as _;
use std::path::Path;

/// Keyword -> ids of the turns containing it.
pub type KeywordIndex = BTreeMap<String, BTreeSet<String>>;

/// Persistence behind [`crate::retrieval::RetrievalStore`].
///
/// The turn log is the source of truth and is only ever appended to. The
/// index is a derived artifact the store can always rebuild from the log.
pub trait TurnStorage: Send + Sync {
    fn append_turns(&self, turns: &[ConversationTurn]) -> anyhow::Result<()>;
    /// All readable turns in log order. Unreadable records are skipped.
    fn load_turns(&self) -> anyhow::Result<Vec<ConversationTurn>>;
    fn save_index(&self, index: &KeywordIndex) -> anyhow::Result<()>;
    /// `None` when no usable index has been persisted.
    fn load_index(&self) -> anyhow::Result<Option<KeywordIndex>>;
}

pub mod jsonl;

/// Replace `path` with `data` via a temp file in the same directory.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.flush()?;
    tmp.persist(path)
        .with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
