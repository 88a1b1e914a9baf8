use crate::archive::SessionArchive;
use crate::extract::SessionExtractor;
use crate::retrieval::ReingestPolicy;
use crate::retrieval::RetrievalStore;
use crate::store::jsonl::JsonlTurnStorage;
use std::path::Path;
use std::path::PathBuf;

pub const ENV_ROOT: &str = "CONTINUITY_MEMORY_ROOT";
pub const ENV_SESSIONS_DIR: &str = "CONTINUITY_SESSIONS_DIR";
pub const ENV_RETRIEVAL_DIR: &str = "CONTINUITY_RETRIEVAL_DIR";
pub const ENV_REINGEST: &str = "CONTINUITY_REINGEST";
pub const ENV_CONTEXT_WINDOW: &str = "CONTINUITY_CONTEXT_WINDOW";
pub const ENV_BOOTSTRAP_SESSIONS: &str = "CONTINUITY_BOOTSTRAP_SESSIONS";

pub const DEFAULT_CONTEXT_WINDOW: usize = 200_000;
pub const DEFAULT_BOOTSTRAP_SESSIONS: usize = 3;

/// Where everything lives and how the stores behave.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryConfig {
    pub sessions_dir: PathBuf,
    pub retrieval_dir: PathBuf,
    pub reingest: ReingestPolicy,
    pub context_window_tokens: usize,
    pub bootstrap_sessions: usize,
}

impl MemoryConfig {
    /// Defaults for a memory rooted at `root`, ignoring the environment.
    pub fn with_root(root: &Path) -> Self {
        Self {
            sessions_dir: root.join("sessions"),
            retrieval_dir: root.join("retrieval"),
            reingest: ReingestPolicy::default(),
            context_window_tokens: DEFAULT_CONTEXT_WINDOW,
            bootstrap_sessions: DEFAULT_BOOTSTRAP_SESSIONS,
        }
    }

    /// Resolve from the process environment.
    ///
    /// The base directory is `root` when given, else `CONTINUITY_MEMORY_ROOT`,
    /// else `<home>/.continuity/memory`. Unparseable values fall back to the
    /// defaults with a warning.
    pub fn from_env(root: Option<&Path>, home_dir: &Path) -> Self {
        Self::from_lookup(root, home_dir, |k| std::env::var(k).ok())
    }

    /// [`Self::from_env`] over an arbitrary variable source.
    pub fn from_lookup<F>(root: Option<&Path>, home_dir: &Path, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let base = root
            .map(Path::to_path_buf)
            .or_else(|| lookup(ENV_ROOT).filter(|v| !v.is_empty()).map(PathBuf::from))
            .unwrap_or_else(|| home_dir.join(".continuity").join("memory"));
        let mut config = Self::with_root(&base);
        if let Some(dir) = lookup(ENV_SESSIONS_DIR).filter(|v| !v.is_empty()) {
            config.sessions_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(ENV_RETRIEVAL_DIR).filter(|v| !v.is_empty()) {
            config.retrieval_dir = PathBuf::from(dir);
        }
        if let Some(v) = lookup(ENV_REINGEST) {
            config.reingest = parse_or(ENV_REINGEST, &v, config.reingest);
        }
        if let Some(v) = lookup(ENV_CONTEXT_WINDOW) {
            config.context_window_tokens = parse_or(ENV_CONTEXT_WINDOW, &v, DEFAULT_CONTEXT_WINDOW);
        }
        if let Some(v) = lookup(ENV_BOOTSTRAP_SESSIONS) {
            config.bootstrap_sessions =
                parse_or(ENV_BOOTSTRAP_SESSIONS, &v, DEFAULT_BOOTSTRAP_SESSIONS);
        }
        config
    }

    pub fn open_archive(&self) -> SessionArchive {
        SessionArchive::new(&self.sessions_dir)
    }

    pub fn open_retrieval(&self) -> anyhow::Result<RetrievalStore<JsonlTurnStorage>> {
        RetrievalStore::open(JsonlTurnStorage::new(&self.retrieval_dir), self.reingest)
    }

    pub fn extractor(&self) -> anyhow::Result<SessionExtractor> {
        SessionExtractor::with_defaults(self.context_window_tokens)
    }
}

fn parse_or<T>(var: &str, value: &str, default: T) -> T
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value.trim().parse() {
        Ok(v) => v,
        Err(err) => {
            tracing::warn!("ignoring {var}={value:?}: {err}");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn defaults_live_under_home() {
        let cfg = MemoryConfig::from_lookup(None, Path::new("/home/u"), lookup(&[]));
        assert_eq!(
            cfg,
            MemoryConfig {
                sessions_dir: PathBuf::from("/home/u/.continuity/memory/sessions"),
                retrieval_dir: PathBuf::from("/home/u/.continuity/memory/retrieval"),
                reingest: ReingestPolicy::Append,
                context_window_tokens: DEFAULT_CONTEXT_WINDOW,
                bootstrap_sessions: DEFAULT_BOOTSTRAP_SESSIONS,
            }
        );
    }

    #[test]
    fn explicit_root_beats_env() {
        let cfg = MemoryConfig::from_lookup(
            Some(Path::new("/cli")),
            Path::new("/home/u"),
            lookup(&[(ENV_ROOT, "/env"), (ENV_RETRIEVAL_DIR, "/turns")]),
        );
        assert_eq!(cfg.sessions_dir, PathBuf::from("/cli/sessions"));
        assert_eq!(cfg.retrieval_dir, PathBuf::from("/turns"));
    }

    #[test]
    fn bad_values_fall_back() {
        let cfg = MemoryConfig::from_lookup(
            None,
            Path::new("/h"),
            lookup(&[
                (ENV_REINGEST, "skip"),
                (ENV_CONTEXT_WINDOW, "lots"),
                (ENV_BOOTSTRAP_SESSIONS, "5"),
            ]),
        );
        assert_eq!(cfg.reingest, ReingestPolicy::SkipDuplicates);
        assert_eq!(cfg.context_window_tokens, DEFAULT_CONTEXT_WINDOW);
        assert_eq!(cfg.bootstrap_sessions, 5);
    }
}
