//! Renders recovered sessions as a text digest for a successor session.

use crate::archive::RecentSessions;
use crate::archive::SessionArchive;
use crate::types::Breakthrough;
use crate::types::Decision;
use crate::types::SessionMemory;
use crate::types::Task;
use std::fmt::Write as _;

const TOP_BREAKTHROUGHS: usize = 5;
const TOP_DECISIONS: usize = 8;
const TOP_TASKS: usize = 5;

/// Digest of `sessions`, which must be ordered most recent first.
///
/// Pure: identical input renders identical text. Cross-session rankings use
/// a stable sort, so ties keep the more recent session first.
pub fn reconstruct_context(sessions: &[SessionMemory]) -> String {
    let Some(latest) = sessions.first() else {
        return "# Session continuity\n\nNo previous sessions were recovered.\n".to_string();
    };

    let mut out = String::new();
    let _ = writeln!(out, "# Session continuity");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Recovered {} session(s). Most recent: {} ({}).",
        sessions.len(),
        latest.session_id,
        latest.timestamp
    );
    if let Some(prev) = &latest.previous_session_id {
        let _ = writeln!(out, "Continues from: {prev}");
    }
    let _ = writeln!(
        out,
        "Context used: {:.0}%",
        latest.context_utilization * 100.0
    );
    if !latest.conversation_summary.is_empty() {
        let _ = writeln!(out, "Summary: {}", latest.conversation_summary);
    }

    let breakthroughs: Vec<&Breakthrough> = top_by(
        sessions.iter().flat_map(|s| s.breakthroughs.iter()),
        |b| b.importance,
        TOP_BREAKTHROUGHS,
    );
    if !breakthroughs.is_empty() {
        section(&mut out, "Key breakthroughs");
        for b in breakthroughs {
            if b.insight.is_empty() {
                let _ = writeln!(out, "- [{:.2}] {}", b.importance, b.trigger);
            } else {
                let _ = writeln!(
                    out,
                    "- [{:.2}] {} (after: {})",
                    b.importance, b.trigger, b.insight
                );
            }
        }
    }

    let decisions: Vec<&Decision> = top_by(
        sessions.iter().flat_map(|s| s.decisions.iter()),
        |d| d.importance,
        TOP_DECISIONS,
    );
    if !decisions.is_empty() {
        section(&mut out, "Decisions");
        for d in decisions {
            if d.reasoning.is_empty() {
                let _ = writeln!(out, "- [{:.2}] {}", d.importance, d.description);
            } else {
                let _ = writeln!(
                    out,
                    "- [{:.2}] {} (because {})",
                    d.importance, d.description, d.reasoning
                );
            }
        }
    }

    let intent = &latest.user_intent;
    section(&mut out, "User intent");
    if intent.goals.is_empty() {
        let _ = writeln!(out, "Goals: none recorded");
    } else {
        let _ = writeln!(out, "Goals:");
        for g in &intent.goals {
            let _ = writeln!(out, "- {g}");
        }
    }
    let _ = writeln!(
        out,
        "Communication style: {}",
        intent.communication_style.as_str()
    );
    if !intent.priorities.is_empty() {
        let _ = writeln!(out, "Priorities: {}", intent.priorities.join(", "));
    }

    let tech = &latest.technical_context;
    if !tech.files_changed.is_empty()
        || !tech.architecture_decisions.is_empty()
        || !tech.technologies.is_empty()
    {
        section(&mut out, "Technical context");
        if !tech.files_changed.is_empty() {
            let _ = writeln!(out, "Files changed:");
            for f in &tech.files_changed {
                let _ = writeln!(out, "- {f}");
            }
        }
        if !tech.architecture_decisions.is_empty() {
            let _ = writeln!(out, "Architecture decisions:");
            for a in &tech.architecture_decisions {
                let _ = writeln!(out, "- {a}");
            }
        }
        if !tech.technologies.is_empty() {
            let _ = writeln!(out, "Technologies: {}", tech.technologies.join(", "));
        }
    }

    let tasks: Vec<&Task> = top_by(
        sessions.iter().flat_map(|s| s.tasks.iter()),
        |t| t.priority,
        TOP_TASKS,
    );
    if !tasks.is_empty() {
        section(&mut out, "Open tasks");
        for t in tasks {
            let _ = writeln!(out, "- [{:.2}] {}", t.priority, t.description);
        }
    }

    if !latest.warnings.is_empty() {
        section(&mut out, "Warnings");
        for w in &latest.warnings {
            let _ = writeln!(out, "- {w}");
        }
    }
    if !latest.successor_priorities.is_empty() {
        section(&mut out, "Priorities for this session");
        for p in &latest.successor_priorities {
            let _ = writeln!(out, "- {p}");
        }
    }
    out
}

/// Load the `n` most recent intact sessions and render them.
pub fn bootstrap(archive: &SessionArchive, n: usize) -> anyhow::Result<(String, RecentSessions)> {
    let recent = archive.load_recent_sessions(n)?;
    Ok((reconstruct_context(&recent.sessions), recent))
}

fn section(out: &mut String, title: &str) {
    let _ = writeln!(out);
    let _ = writeln!(out, "## {title}");
}

fn top_by<'a, T: 'a>(
    items: impl Iterator<Item = &'a T>,
    key: impl Fn(&T) -> f64,
    n: usize,
) -> Vec<&'a T> {
    let mut v: Vec<&T> = items.collect();
    v.sort_by(|a, b| {
        key(*b)
            .partial_cmp(&key(*a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    v.truncate(n);
    v
}
