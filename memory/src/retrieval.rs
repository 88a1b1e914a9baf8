//! Full-fidelity turn archive with keyword retrieval.
//!
//! Every ingested message is kept verbatim in an append-only log. The
//! keyword index is rebuilt from that log whenever a store is opened; the
//! persisted copy exists for external readers and is never trusted on its
//! own.

use crate::keywords;
use crate::recall::CONTEXT_TURNS;
use crate::recall::ContextWindow;
use crate::recall::Query;
use crate::recall::QueryResult;
use crate::recall::Relevance;
use crate::recall::MIN_RELEVANCE;
use crate::recall::score_turn;
use crate::store::KeywordIndex;
use crate::store::TurnStorage;
use crate::store::jsonl::JsonlTurnStorage;
use crate::types::ConversationTurn;
use crate::types::Message;
use crate::types::estimate_tokens;
use chrono::SecondsFormat;
use chrono::Utc;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;

/// What happens when a session is ingested again.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReingestPolicy {
    /// Append every message as a new turn. Positions continue after the
    /// session's existing timeline, so ids stay unique.
    #[default]
    Append,
    /// Skip a message whose role and content equal the existing turn at the
    /// same position in the session.
    SkipDuplicates,
}

impl std::str::FromStr for ReingestPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "append" => Ok(ReingestPolicy::Append),
            "skip" | "dedupe" | "skip_duplicates" => Ok(ReingestPolicy::SkipDuplicates),
            other => anyhow::bail!("unknown reingest policy: {other}"),
        }
    }
}

/// Single-writer store: mutation takes `&mut self`, so one owning object
/// serializes all writes to its root.
pub struct RetrievalStore<S: TurnStorage = JsonlTurnStorage> {
    storage: S,
    policy: ReingestPolicy,
    turns: Vec<ConversationTurn>,
    by_id: HashMap<String, usize>,
    /// Session id -> log offsets in timeline order.
    sessions: HashMap<String, Vec<usize>>,
    index: KeywordIndex,
}

impl<S: TurnStorage> RetrievalStore<S> {
    pub fn open(storage: S, policy: ReingestPolicy) -> anyhow::Result<Self> {
        let mut store = Self {
            storage,
            policy,
            turns: Vec::new(),
            by_id: HashMap::new(),
            sessions: HashMap::new(),
            index: KeywordIndex::new(),
        };
        for turn in store.storage.load_turns()? {
            store.absorb(turn);
        }
        match store.storage.load_index()? {
            Some(persisted) if persisted != store.index => {
                tracing::warn!("persisted keyword index is stale; using the one rebuilt from the turn log");
            }
            None if !store.turns.is_empty() => {
                tracing::debug!("no persisted keyword index; rebuilt from the turn log");
            }
            _ => {}
        }
        Ok(store)
    }

    pub fn policy(&self) -> ReingestPolicy {
        self.policy
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    fn absorb(&mut self, turn: ConversationTurn) {
        let offset = self.turns.len();
        for kw in &turn.keywords {
            self.index
                .entry(kw.clone())
                .or_default()
                .insert(turn.turn_id.clone());
        }
        self.by_id.insert(turn.turn_id.clone(), offset);
        self.sessions
            .entry(turn.session_id.clone())
            .or_default()
            .push(offset);
        self.turns.push(turn);
    }

    /// Archive `messages` as turns of `session_id`. Returns how many turns
    /// were appended.
    pub fn ingest(&mut self, session_id: &str, messages: &[Message]) -> anyhow::Result<usize> {
        let existing = self.sessions.get(session_id).cloned().unwrap_or_default();
        let mut next_position = existing
            .iter()
            .map(|&i| self.turns[i].position + 1)
            .max()
            .unwrap_or(0);
        let mut previous = existing.last().map(|&i| self.turns[i].turn_id.clone());
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

        let mut fresh = Vec::new();
        for (i, msg) in messages.iter().enumerate() {
            if self.policy == ReingestPolicy::SkipDuplicates
                && let Some(&offset) = existing.get(i)
                && self.turns[offset].role == msg.role
                && self.turns[offset].content == msg.content
            {
                continue;
            }
            let turn_id = ConversationTurn::make_id(session_id, next_position);
            fresh.push(ConversationTurn {
                turn_id: turn_id.clone(),
                session_id: session_id.to_string(),
                position: next_position,
                timestamp: msg.timestamp.clone().unwrap_or_else(|| now.clone()),
                role: msg.role,
                content: msg.content.clone(),
                token_estimate: estimate_tokens(&msg.content),
                keywords: keywords::extract_keywords(&msg.content),
                topics: keywords::classify_topics(&msg.content),
                intent_tags: keywords::classify_intents(msg.role, &msg.content),
                responds_to: previous.replace(turn_id),
            });
            next_position += 1;
        }

        if fresh.is_empty() {
            tracing::debug!("session {session_id}: nothing new to ingest");
            return Ok(0);
        }
        self.storage.append_turns(&fresh)?;
        let count = fresh.len();
        for turn in fresh {
            self.absorb(turn);
        }
        self.storage.save_index(&self.index)?;
        tracing::info!("session {session_id}: ingested {count} turns");
        Ok(count)
    }

    /// Scored keyword retrieval; see [`crate::recall::score_turn`].
    pub fn query(&self, query: &Query) -> Vec<QueryResult> {
        let query_keywords = keywords::extract_keywords(&query.text);
        if query_keywords.is_empty() || query.max_results == 0 {
            return Vec::new();
        }
        let query_topics = keywords::classify_topics(&query.text);
        let intent = query.query_type.intent_tag();

        let candidates: BTreeSet<usize> = query_keywords
            .iter()
            .filter_map(|kw| self.index.get(kw))
            .flatten()
            .filter_map(|id| self.by_id.get(id).copied())
            .collect();

        let mut scored: Vec<(usize, Relevance)> = candidates
            .into_iter()
            .filter(|&offset| {
                let turn = &self.turns[offset];
                query
                    .session_id
                    .as_ref()
                    .is_none_or(|s| *s == turn.session_id)
                    && query
                        .intent_filter
                        .as_ref()
                        .is_none_or(|tag| turn.intent_tags.contains(tag))
            })
            .map(|offset| {
                let relevance =
                    score_turn(&query_keywords, &query_topics, intent, &self.turns[offset]);
                (offset, relevance)
            })
            .filter(|(_, r)| r.score > MIN_RELEVANCE)
            .collect();

        scored.sort_by(|a, b| {
            b.1.score
                .partial_cmp(&a.1.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(query.max_results);

        scored
            .into_iter()
            .map(|(offset, relevance)| QueryResult {
                turn: self.turns[offset].clone(),
                context: self.context_at(offset, CONTEXT_TURNS, CONTEXT_TURNS),
                why_relevant: relevance.explain(),
                relevance,
            })
            .collect()
    }

    /// [`Self::query`] with the query type inferred from the wording.
    pub fn query_natural(&self, text: &str) -> Vec<QueryResult> {
        self.query(&Query::natural(text))
    }

    /// Up to `before` turns preceding and `after` turns following `turn_id`
    /// in its session. `None` for unknown ids.
    pub fn get_context(&self, turn_id: &str, before: usize, after: usize) -> Option<ContextWindow> {
        self.by_id
            .get(turn_id)
            .map(|&offset| self.context_at(offset, before, after))
    }

    fn context_at(&self, offset: usize, before: usize, after: usize) -> ContextWindow {
        let turn = &self.turns[offset];
        let Some(timeline) = self.sessions.get(&turn.session_id) else {
            return ContextWindow::default();
        };
        let Some(i) = timeline.iter().position(|&o| o == offset) else {
            return ContextWindow::default();
        };
        let start = i.saturating_sub(before);
        let end = (i + 1 + after).min(timeline.len());
        ContextWindow {
            before: timeline[start..i]
                .iter()
                .map(|&o| self.turns[o].clone())
                .collect(),
            after: timeline[i + 1..end]
                .iter()
                .map(|&o| self.turns[o].clone())
                .collect(),
        }
    }

    pub fn turn(&self, turn_id: &str) -> Option<&ConversationTurn> {
        self.by_id.get(turn_id).map(|&o| &self.turns[o])
    }

    /// Full timeline of one session.
    pub fn session_turns(&self, session_id: &str) -> Vec<&ConversationTurn> {
        self.sessions
            .get(session_id)
            .map(|offsets| offsets.iter().map(|&o| &self.turns[o]).collect())
            .unwrap_or_default()
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    /// Turn ids recorded for `keyword`.
    pub fn lookup(&self, keyword: &str) -> Option<&BTreeSet<String>> {
        self.index.get(keyword)
    }

    /// Rewrite the persisted index from the in-memory one derived from the log.
    pub fn rebuild_index(&self) -> anyhow::Result<usize> {
        self.storage.save_index(&self.index)?;
        Ok(self.index.len())
    }

    pub fn stats(&self) -> serde_json::Value {
        let mut by_role: BTreeMap<&'static str, usize> = BTreeMap::new();
        for t in &self.turns {
            *by_role.entry(t.role.as_str()).or_default() += 1;
        }
        serde_json::json!({
            "turns": self.turns.len(),
            "sessions": self.sessions.len(),
            "keywords": self.index.len(),
            "tokens": self.turns.iter().map(|t| t.token_estimate).sum::<usize>(),
            "by_role": by_role,
        })
    }
}
