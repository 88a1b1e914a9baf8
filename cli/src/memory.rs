use anyhow::Context as _;
use clap::Parser;
use continuity_memory::context;
use continuity_memory::extract::SessionInput;
use continuity_memory::extract::parse_messages;
use continuity_memory::factory;
use continuity_memory::factory::MemoryConfig;
use continuity_memory::recall::Query;
use continuity_memory::recall::QueryType;
use continuity_memory::types::Message;
use std::io::Read as _;
use std::path::Path;
use std::path::PathBuf;

const PREVIEW_CHARS: usize = 160;

/// Session memory: archive sessions, bootstrap from them, search past turns.
#[derive(Debug, Parser)]
#[command(name = "continuity", version)]
pub struct MemoryCli {
    /// Base directory for sessions and the turn log. Overrides
    /// CONTINUITY_MEMORY_ROOT.
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub cmd: MemoryCommand,
}

#[derive(Debug, clap::Subcommand)]
pub enum MemoryCommand {
    /// Extract structured memory from a transcript and archive it.
    Save {
        /// JSON array of `{role, content}` messages, or `-` for stdin.
        #[arg(long)]
        input: PathBuf,
        #[arg(long = "session-id")]
        session_id: Option<String>,
        /// Session this one continues from.
        #[arg(long)]
        previous: Option<String>,
        /// Files changed during the session.
        #[arg(long, value_delimiter = ',')]
        files: Vec<String>,
        /// Tokens consumed; estimated from the transcript when omitted.
        #[arg(long)]
        tokens: Option<usize>,
        /// Note for the next session. Repeatable.
        #[arg(long = "warn")]
        warnings: Vec<String>,
        /// Priority for the next session. Repeatable.
        #[arg(long = "priority")]
        priorities: Vec<String>,
    },
    /// Print a context digest of the most recent intact sessions.
    Bootstrap {
        #[arg(short = 'n', long = "sessions")]
        sessions: Option<usize>,
    },
    /// List archived sessions, most recent first.
    List,
    /// Check a session's integrity hash.
    Verify { session_id: String },
    /// Archive every message of a transcript in the turn log.
    Ingest {
        #[arg(long = "session-id")]
        session_id: String,
        /// JSON array of `{role, content}` messages, or `-` for stdin.
        #[arg(long)]
        input: PathBuf,
    },
    /// Search archived turns.
    Query {
        text: String,
        /// decision, question, code, correction, task, explanation or
        /// general. Inferred from the text when omitted.
        #[arg(long = "type")]
        query_type: Option<QueryType>,
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Rewrite the keyword index from the turn log.
    Reindex,
    /// Show counts for the archive and the turn log.
    Stats,
}

pub fn run(cli: MemoryCli) -> anyhow::Result<()> {
    let config = resolve_config(cli.root.as_deref())?;
    match cli.cmd {
        MemoryCommand::Save {
            input,
            session_id,
            previous,
            files,
            tokens,
            warnings,
            priorities,
        } => {
            let messages = read_messages(&input)?;
            let memory = config.extractor()?.extract(SessionInput {
                session_id,
                messages,
                files_changed: files,
                token_count: tokens,
                previous_session_id: previous,
                timestamp: None,
                warnings,
                successor_priorities: priorities,
            })?;
            let dir = config.open_archive().save(&memory)?;
            println!(
                "Saved session {} to {} ({} decisions, {} breakthroughs, {} tasks)",
                memory.session_id,
                dir.display(),
                memory.decisions.len(),
                memory.breakthroughs.len(),
                memory.tasks.len()
            );
        }
        MemoryCommand::Bootstrap { sessions } => {
            let n = sessions.unwrap_or(config.bootstrap_sessions);
            let (digest, recent) = context::bootstrap(&config.open_archive(), n)?;
            for skipped in &recent.skipped {
                eprintln!("skipped session {}: {}", skipped.session_id, skipped.reason);
            }
            print!("{digest}");
        }
        MemoryCommand::List => {
            for entry in config.open_archive().list_sessions()? {
                println!(
                    "{}\t{}\t{:.0}%",
                    entry.session_id,
                    entry.timestamp,
                    entry.context_utilization * 100.0
                );
            }
        }
        MemoryCommand::Verify { session_id } => {
            config.open_archive().load_verified(&session_id)?;
            println!("{session_id}: ok");
        }
        MemoryCommand::Ingest { session_id, input } => {
            let messages = read_messages(&input)?;
            let mut store = config.open_retrieval()?;
            let n = store.ingest(&session_id, &messages)?;
            println!("Ingested {n} turns into {session_id}");
        }
        MemoryCommand::Query {
            text,
            query_type,
            session,
            limit,
            json,
        } => {
            let mut query = match query_type {
                Some(query_type) => Query {
                    query_type,
                    ..Query::new(text)
                },
                None => Query::natural(text),
            };
            query.session_id = session;
            if let Some(limit) = limit {
                query.max_results = limit;
            }
            let results = config.open_retrieval()?.query(&query);
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else if results.is_empty() {
                println!("No matching turns");
            } else {
                for r in &results {
                    println!(
                        "{:.2}  {} [{}] {}",
                        r.relevance.score,
                        r.turn.turn_id,
                        r.turn.role.as_str(),
                        preview(&r.turn.content)
                    );
                    println!("      {}", r.why_relevant);
                }
            }
        }
        MemoryCommand::Reindex => {
            let n = config.open_retrieval()?.rebuild_index()?;
            println!("Indexed {n} keywords");
        }
        MemoryCommand::Stats => {
            let sessions = config.open_archive().list_sessions()?.len();
            let stats = serde_json::json!({
                "archive": { "sessions": sessions },
                "retrieval": config.open_retrieval()?.stats(),
            });
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }
    Ok(())
}

fn resolve_config(root: Option<&Path>) -> anyhow::Result<MemoryConfig> {
    match dirs::home_dir() {
        Some(home) => Ok(MemoryConfig::from_env(root, &home)),
        // Without a home directory the root must come from the flag or env.
        None => match root
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(factory::ENV_ROOT).map(PathBuf::from))
        {
            Some(root) => Ok(MemoryConfig::from_env(Some(&root), &root)),
            None => anyhow::bail!("cannot determine home directory; pass --root"),
        },
    }
}

fn read_messages(input: &Path) -> anyhow::Result<Vec<Message>> {
    let data = if input == Path::new("-") {
        let mut s = String::new();
        std::io::stdin().read_to_string(&mut s)?;
        s
    } else {
        std::fs::read_to_string(input).with_context(|| format!("read {}", input.display()))?
    };
    let value: serde_json::Value = serde_json::from_str(&data)
        .with_context(|| format!("{} is not JSON", input.display()))?;
    let messages = parse_messages(&value);
    if messages.is_empty() {
        tracing::warn!("{} contained no usable messages", input.display());
    }
    Ok(messages)
}

fn preview(content: &str) -> String {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= PREVIEW_CHARS {
        return flat;
    }
    let mut s: String = flat.chars().take(PREVIEW_CHARS).collect();
    s.push('…');
    s
}
