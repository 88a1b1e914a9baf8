//! Turns a session transcript into a [`SessionMemory`].
//!
//! Extraction is heuristic and best effort: it runs when a session is being
//! archived, so input it does not understand yields empty sections rather
//! than an error. The heuristics live behind [`ExtractionStrategy`] so a
//! different rule set can be plugged in without touching persistence or
//! retrieval.

pub mod patterns;

use crate::integrity;
use crate::keywords;
use crate::types::Breakthrough;
use crate::types::BreakthroughKind;
use crate::types::CHARACTER_PLATE_VERSION;
use crate::types::CommunicationStyle;
use crate::types::Decision;
use crate::types::Message;
use crate::types::Role;
use crate::types::SessionMemory;
use crate::types::Task;
use crate::types::TaskStatus;
use crate::types::TechnicalContext;
use crate::types::UserIntent;
use crate::types::estimate_tokens;
use chrono::SecondsFormat;
use chrono::Utc;
use patterns::PatternSet;
use serde_json::Value;
use std::collections::HashSet;
use uuid::Uuid;

pub const MAX_DECISIONS: usize = 20;
pub const MAX_BREAKTHROUGHS: usize = 10;
pub const MAX_TASKS: usize = 10;
pub const MAX_FILES: usize = 20;
const MAX_ARCHITECTURE_NOTES: usize = 10;
const MAX_WARNINGS: usize = 10;

pub const CORRECTION_IMPORTANCE: f64 = 0.95;
pub const INSIGHT_IMPORTANCE: f64 = 0.9;
pub const TASK_PRIORITY: f64 = 0.7;

const EXCERPT_CHARS: usize = 200;
const QUOTE_CHARS: usize = 300;

/// Raw material for one archived session.
#[derive(Debug, Clone, Default)]
pub struct SessionInput {
    /// Generated from the clock when absent.
    pub session_id: Option<String>,
    pub messages: Vec<Message>,
    pub files_changed: Vec<String>,
    /// Tokens consumed by the session; estimated from the text when absent.
    pub token_count: Option<usize>,
    pub previous_session_id: Option<String>,
    pub timestamp: Option<String>,
    pub warnings: Vec<String>,
    pub successor_priorities: Vec<String>,
}

impl SessionInput {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }
}

/// Best-effort parse of a transcript shaped like `[{"role": .., "content": ..}]`.
///
/// A non-array yields no messages. Entries without usable content are
/// skipped. `content` may be a string or an array of text blocks.
pub fn parse_messages(value: &Value) -> Vec<Message> {
    let Some(items) = value.as_array() else {
        tracing::debug!("transcript is not an array; nothing to extract");
        return Vec::new();
    };
    items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| {
            let parsed = parse_message(item);
            if parsed.is_none() {
                tracing::debug!("skipping malformed message at index {i}");
            }
            parsed
        })
        .collect()
}

fn parse_message(item: &Value) -> Option<Message> {
    let obj = item.as_object()?;
    let role = obj
        .get("role")
        .and_then(Value::as_str)
        .map(Role::parse_lenient)
        .unwrap_or(Role::System);
    let content = match obj.get("content")? {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => {
            let parts: Vec<&str> = blocks
                .iter()
                .filter_map(|b| b.as_str().or_else(|| b.get("text").and_then(Value::as_str)))
                .collect();
            if parts.is_empty() {
                return None;
            }
            parts.join("\n")
        }
        _ => return None,
    };
    let timestamp = obj
        .get("timestamp")
        .and_then(Value::as_str)
        .map(str::to_string);
    Some(Message {
        role,
        content,
        timestamp,
    })
}

/// One way of pulling structured records out of a transcript.
pub trait ExtractionStrategy {
    fn extract_decisions(&self, messages: &[Message], files_changed: &[String]) -> Vec<Decision>;
    fn extract_breakthroughs(&self, messages: &[Message]) -> Vec<Breakthrough>;
    fn extract_user_intent(&self, messages: &[Message]) -> UserIntent;
    fn extract_technical_context(
        &self,
        messages: &[Message],
        files_changed: &[String],
    ) -> TechnicalContext;
    fn extract_tasks(&self, messages: &[Message]) -> Vec<Task>;
    fn extract_warnings(&self, _messages: &[Message]) -> Vec<String> {
        Vec::new()
    }
}

/// Regex heuristics over English conversational text.
#[derive(Debug, Clone)]
pub struct RegexStrategy {
    patterns: PatternSet,
}

impl RegexStrategy {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            patterns: PatternSet::compile()?,
        })
    }
}

impl ExtractionStrategy for RegexStrategy {
    fn extract_decisions(&self, messages: &[Message], files_changed: &[String]) -> Vec<Decision> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for (idx, msg) in messages.iter().enumerate() {
            if msg.role != Role::Assistant {
                continue;
            }
            let user_replied = messages.get(idx + 1).is_some_and(|m| m.role == Role::User);
            for re in &self.patterns.decisions {
                for caps in re.captures_iter(&msg.content) {
                    let (Some(whole), Some(desc)) = (caps.get(0), caps.get(1)) else {
                        continue;
                    };
                    let description = desc.as_str().trim().to_string();
                    if description.is_empty() || !seen.insert((idx, description.to_lowercase())) {
                        continue;
                    }
                    let reasoning = self
                        .patterns
                        .reasoning
                        .captures(&msg.content[whole.start()..])
                        .and_then(|c| c.get(1))
                        .map(|m| m.as_str().trim().to_string())
                        .unwrap_or_default();
                    let importance = decision_importance(
                        whole.as_str(),
                        user_replied,
                        !files_changed.is_empty(),
                    );
                    out.push(Decision {
                        description,
                        reasoning,
                        importance,
                        source_excerpt: excerpt(&msg.content[whole.start()..], EXCERPT_CHARS),
                        turn_index: idx,
                    });
                }
            }
        }
        sort_desc(&mut out, |d| d.importance);
        out.truncate(MAX_DECISIONS);
        out
    }

    fn extract_breakthroughs(&self, messages: &[Message]) -> Vec<Breakthrough> {
        let mut out = Vec::new();
        for (idx, msg) in messages.iter().enumerate() {
            if msg.role == Role::User && keywords::starts_with_correction(&msg.content) {
                let insight = messages[..idx]
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::Assistant)
                    .map(|m| excerpt(&m.content, QUOTE_CHARS))
                    .unwrap_or_default();
                out.push(Breakthrough {
                    trigger: excerpt(&msg.content, QUOTE_CHARS),
                    insight,
                    importance: CORRECTION_IMPORTANCE,
                    kind: BreakthroughKind::UserCorrection,
                    turn_index: idx,
                });
            }
        }
        let mut seen = HashSet::new();
        for (idx, msg) in messages.iter().enumerate() {
            for re in &self.patterns.insights {
                for caps in re.captures_iter(&msg.content) {
                    let Some(whole) = caps.get(0) else {
                        continue;
                    };
                    let trigger = whole.as_str().trim().to_string();
                    if !seen.insert((idx, trigger.to_lowercase())) {
                        continue;
                    }
                    let insight = caps
                        .get(1)
                        .map(|m| m.as_str().trim())
                        .filter(|s| !s.is_empty())
                        .unwrap_or(trigger.as_str())
                        .to_string();
                    out.push(Breakthrough {
                        trigger,
                        insight,
                        importance: INSIGHT_IMPORTANCE,
                        kind: BreakthroughKind::InsightPhrase,
                        turn_index: idx,
                    });
                }
            }
        }
        sort_desc(&mut out, |b| b.importance);
        out.truncate(MAX_BREAKTHROUGHS);
        out
    }

    fn extract_user_intent(&self, messages: &[Message]) -> UserIntent {
        let user_msgs: Vec<&Message> = messages.iter().filter(|m| m.role == Role::User).collect();

        let mut seen = HashSet::new();
        let mut goals = Vec::new();
        for msg in &user_msgs {
            for re in &self.patterns.goals {
                for caps in re.captures_iter(&msg.content) {
                    if let Some(goal) = caps.get(1) {
                        let goal = goal.as_str().trim().to_string();
                        if seen.insert(goal.to_lowercase()) {
                            goals.push(goal);
                        }
                    }
                }
            }
        }

        let mean_message_length = if user_msgs.is_empty() {
            0.0
        } else {
            let total: usize = user_msgs.iter().map(|m| m.content.chars().count()).sum();
            total as f64 / user_msgs.len() as f64
        };

        let all_user_text = user_msgs
            .iter()
            .map(|m| m.content.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ");
        let mut priorities: Vec<String> = Vec::new();
        for (needle, label) in patterns::PRIORITY_KEYWORDS {
            if all_user_text.contains(needle) && !priorities.iter().any(|p| p == label) {
                priorities.push((*label).to_string());
            }
        }

        UserIntent {
            goals,
            communication_style: CommunicationStyle::from_mean_length(mean_message_length),
            priorities,
            mean_message_length,
        }
    }

    fn extract_technical_context(
        &self,
        messages: &[Message],
        files_changed: &[String],
    ) -> TechnicalContext {
        let assistant: Vec<&Message> = messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .collect();

        let mut architecture_decisions = Vec::new();
        let mut seen = HashSet::new();
        'outer: for msg in &assistant {
            for re in &self.patterns.architecture {
                for caps in re.captures_iter(&msg.content) {
                    if let Some(m) = caps.get(1) {
                        let note = m.as_str().trim().to_string();
                        if seen.insert(note.to_lowercase()) {
                            architecture_decisions.push(note);
                            if architecture_decisions.len() >= MAX_ARCHITECTURE_NOTES {
                                break 'outer;
                            }
                        }
                    }
                }
            }
        }

        let tokens: HashSet<String> = assistant
            .iter()
            .flat_map(|m| keywords::tokenize(&m.content))
            .collect();
        let technologies = patterns::TECHNOLOGIES
            .iter()
            .filter(|t| tokens.contains(**t))
            .map(|t| (*t).to_string())
            .collect();

        TechnicalContext {
            files_changed: files_changed.iter().take(MAX_FILES).cloned().collect(),
            architecture_decisions,
            technologies,
        }
    }

    fn extract_tasks(&self, messages: &[Message]) -> Vec<Task> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for msg in messages.iter().filter(|m| m.role == Role::Assistant) {
            for re in &self.patterns.tasks {
                for caps in re.captures_iter(&msg.content) {
                    let (Some(whole), Some(desc)) = (caps.get(0), caps.get(1)) else {
                        continue;
                    };
                    let description = desc.as_str().trim().to_string();
                    if !seen.insert(description.to_lowercase()) {
                        continue;
                    }
                    out.push(Task {
                        description,
                        priority: TASK_PRIORITY,
                        status: TaskStatus::Pending,
                        source_excerpt: excerpt(whole.as_str().trim(), EXCERPT_CHARS),
                    });
                }
            }
        }
        sort_desc(&mut out, |t| t.priority);
        out.truncate(MAX_TASKS);
        out
    }

    fn extract_warnings(&self, messages: &[Message]) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for msg in messages.iter().filter(|m| m.role == Role::Assistant) {
            for caps in self.patterns.warning.captures_iter(&msg.content) {
                if let Some(m) = caps.get(1) {
                    let w = m.as_str().trim().to_string();
                    if seen.insert(w.to_lowercase()) {
                        out.push(w);
                    }
                }
            }
        }
        out.truncate(MAX_WARNINGS);
        out
    }
}

/// Assembles a sealed [`SessionMemory`] around any strategy.
#[derive(Debug, Clone)]
pub struct SessionExtractor<S = RegexStrategy> {
    strategy: S,
    context_window_tokens: usize,
}

impl SessionExtractor<RegexStrategy> {
    pub fn with_defaults(context_window_tokens: usize) -> anyhow::Result<Self> {
        Ok(Self::new(RegexStrategy::new()?, context_window_tokens))
    }
}

impl<S: ExtractionStrategy> SessionExtractor<S> {
    pub fn new(strategy: S, context_window_tokens: usize) -> Self {
        Self {
            strategy,
            context_window_tokens,
        }
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Build the session record. Only hashing can fail; odd input shapes
    /// produce empty sections instead.
    pub fn extract(&self, input: SessionInput) -> anyhow::Result<SessionMemory> {
        let now = Utc::now();
        let session_id = input.session_id.clone().unwrap_or_else(|| {
            let suffix = Uuid::new_v4().simple().to_string();
            format!("{}-{}", now.format("%Y%m%d-%H%M%S"), &suffix[..8])
        });
        let timestamp = input
            .timestamp
            .clone()
            .unwrap_or_else(|| now.to_rfc3339_opts(SecondsFormat::Millis, true));

        let messages = &input.messages;
        let decisions = self
            .strategy
            .extract_decisions(messages, &input.files_changed);
        let breakthroughs = self.strategy.extract_breakthroughs(messages);
        let user_intent = self.strategy.extract_user_intent(messages);
        let technical_context = self
            .strategy
            .extract_technical_context(messages, &input.files_changed);
        let tasks = self.strategy.extract_tasks(messages);

        let mut warnings = self.strategy.extract_warnings(messages);
        for w in &input.warnings {
            if !warnings.contains(w) {
                warnings.push(w.clone());
            }
        }

        let tokens = input
            .token_count
            .unwrap_or_else(|| messages.iter().map(|m| estimate_tokens(&m.content)).sum());
        let context_utilization = if self.context_window_tokens == 0 {
            0.0
        } else {
            (tokens as f64 / self.context_window_tokens as f64).clamp(0.0, 1.0)
        };

        let conversation_summary = summarize(
            messages,
            decisions.len(),
            breakthroughs.len(),
            tasks.len(),
            user_intent.goals.first(),
        );

        let mut memory = SessionMemory {
            session_id,
            timestamp,
            decisions,
            breakthroughs,
            user_intent,
            technical_context,
            tasks,
            previous_session_id: input.previous_session_id,
            context_utilization,
            conversation_summary,
            character_plate_version: CHARACTER_PLATE_VERSION.to_string(),
            warnings,
            successor_priorities: input.successor_priorities,
            integrity_hash: String::new(),
        };
        integrity::seal(&mut memory)?;
        Ok(memory)
    }
}

fn decision_importance(matched: &str, user_replied: bool, files_changed: bool) -> f64 {
    let words: HashSet<String> = keywords::tokenize(matched).into_iter().collect();
    let mut score: f64 = 0.5;
    if user_replied {
        score += 0.2;
    }
    if files_changed {
        score += 0.1;
    }
    if patterns::NOVELTY_WORDS.iter().any(|w| words.contains(*w)) {
        score += 0.1;
    }
    if patterns::SCOPE_WORDS.iter().any(|w| words.contains(*w)) {
        score += 0.1;
    }
    score.min(1.0)
}

fn summarize(
    messages: &[Message],
    decisions: usize,
    breakthroughs: usize,
    tasks: usize,
    first_goal: Option<&String>,
) -> String {
    let users = messages.iter().filter(|m| m.role == Role::User).count();
    let assistants = messages
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .count();
    let mut s = format!(
        "{} turns ({users} user, {assistants} assistant). Captured {decisions} decisions, {breakthroughs} breakthroughs and {tasks} open tasks.",
        messages.len()
    );
    if let Some(goal) = first_goal {
        s.push_str(&format!(" Primary goal: {goal}."));
    }
    s
}

/// Stable descending sort on an f64 key.
fn sort_desc<T>(items: &mut [T], key: impl Fn(&T) -> f64) {
    items.sort_by(|a, b| {
        key(b)
            .partial_cmp(&key(a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// First `max_chars` characters of `text`, trimmed, with an ellipsis when cut.
pub(crate) fn excerpt(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut s: String = text.chars().take(max_chars).collect();
    s.push('…');
    s
}
