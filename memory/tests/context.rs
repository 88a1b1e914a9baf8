use continuity_memory::context::reconstruct_context;
use continuity_memory::types::Breakthrough;
use continuity_memory::types::BreakthroughKind;
use continuity_memory::types::CommunicationStyle;
use continuity_memory::types::Decision;
use continuity_memory::types::SessionMemory;
use continuity_memory::types::Task;
use continuity_memory::types::TaskStatus;
use continuity_memory::types::TechnicalContext;
use continuity_memory::types::UserIntent;
use pretty_assertions::assert_eq;

fn decision(description: &str, importance: f64) -> Decision {
    Decision {
        description: description.to_string(),
        reasoning: String::new(),
        importance,
        source_excerpt: String::new(),
        turn_index: 0,
    }
}

fn memory(id: &str, timestamp: &str) -> SessionMemory {
    SessionMemory {
        session_id: id.to_string(),
        timestamp: timestamp.to_string(),
        decisions: vec![decision(&format!("{id} low"), 0.5), decision(&format!("{id} high"), 0.9)],
        breakthroughs: vec![Breakthrough {
            trigger: format!("No, {id} needs retries"),
            insight: String::new(),
            importance: 0.95,
            kind: BreakthroughKind::UserCorrection,
            turn_index: 2,
        }],
        user_intent: UserIntent {
            goals: vec![format!("ship {id}")],
            communication_style: CommunicationStyle::Direct,
            priorities: vec!["speed".to_string()],
            mean_message_length: 80.0,
        },
        technical_context: TechnicalContext {
            files_changed: vec![format!("src/{id}.rs")],
            architecture_decisions: vec!["append-only log".to_string()],
            technologies: vec!["rust".to_string()],
        },
        tasks: vec![Task {
            description: format!("test {id}"),
            priority: 0.7,
            status: TaskStatus::Pending,
            source_excerpt: String::new(),
        }],
        previous_session_id: None,
        context_utilization: 0.42,
        conversation_summary: format!("{id} summary"),
        character_plate_version: "1.0".to_string(),
        warnings: vec![format!("{id} cache is cold")],
        successor_priorities: vec![format!("review {id}")],
        integrity_hash: String::new(),
    }
}

#[test]
fn empty_input_renders_placeholder() {
    let digest = reconstruct_context(&[]);
    assert!(digest.contains("No previous sessions"));
    assert_eq!(digest, reconstruct_context(&[]));
}

#[test]
fn rendering_is_deterministic() {
    let sessions = vec![memory("b", "2025-02-02T00:00:00Z"), memory("a", "2025-02-01T00:00:00Z")];
    assert_eq!(reconstruct_context(&sessions), reconstruct_context(&sessions.clone()));
}

#[test]
fn sections_appear_in_order() {
    let sessions = vec![memory("b", "2025-02-02T00:00:00Z"), memory("a", "2025-02-01T00:00:00Z")];
    let digest = reconstruct_context(&sessions);

    let headings = [
        "Most recent: b",
        "## Key breakthroughs",
        "## Decisions",
        "## User intent",
        "## Technical context",
        "## Open tasks",
        "## Warnings",
        "## Priorities for this session",
    ];
    let positions: Vec<usize> = headings
        .iter()
        .map(|h| digest.find(h).unwrap_or_else(|| panic!("missing {h}")))
        .collect();
    let mut sorted = positions.clone();
    sorted.sort_unstable();
    assert_eq!(positions, sorted);
}

#[test]
fn rankings_span_sessions_and_latest_wins_ties() {
    let sessions = vec![memory("b", "2025-02-02T00:00:00Z"), memory("a", "2025-02-01T00:00:00Z")];
    let digest = reconstruct_context(&sessions);

    let order = ["b high", "a high", "b low", "a low"];
    let positions: Vec<usize> = order.iter().filter_map(|d| digest.find(d)).collect();
    assert_eq!(positions.len(), 4);
    assert!(positions.windows(2).all(|w| w[0] < w[1]));

    // Intent, files, warnings and priorities come from the latest session only.
    assert!(digest.contains("- ship b"));
    assert!(!digest.contains("- ship a"));
    assert!(digest.contains("- src/b.rs"));
    assert!(!digest.contains("src/a.rs"));
    assert!(digest.contains("- b cache is cold"));
    assert!(!digest.contains("a cache is cold"));
    assert!(digest.contains("Context used: 42%"));
}

#[test]
fn top_lists_are_capped() {
    let mut latest = memory("x", "2025-02-02T00:00:00Z");
    latest.decisions = (0..12).map(|i| decision(&format!("choice {i:02}"), 0.5)).collect();
    let digest = reconstruct_context(&[latest]);
    assert!(digest.contains("choice 07"));
    assert!(!digest.contains("choice 08"));
}
