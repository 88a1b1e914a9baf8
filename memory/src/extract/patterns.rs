use regex::Regex;

/// First-person commitments and "Built X" style reports in assistant text.
const DECISION_PATTERNS: &[&str] = &[
    r"(?i)\b(?:I['’]ll|I will|I['’]m going to|I am going to)\s+([^.!?\n]{8,200})",
    r"(?i)\b(?:let['’]s|let us|we['’]ll|we will|we should|we decided to|we['’]re going to)\s+([^.!?\n]{8,200})",
    r"\b(?:Built|Created|Implemented|Added|Refactored)\s+([^.!?\n]{5,200})",
];

const REASONING_PATTERN: &str =
    r"(?i)\b(?:because|since|so that|in order to)\s+([^.!?\n]{5,200})";

const INSIGHT_PATTERNS: &[&str] = &[
    r"(?i)\bI (?:just )?reali[sz]ed?\b[,:]?\s*(?:that\s+)?([^.!?\n]{0,200})",
    r"(?i)\bit turns out\b[,:]?\s*(?:that\s+)?([^.!?\n]{0,200})",
    r"(?i)\bthe key (?:insight|realization|realisation) (?:is|was)\b[,:]?\s*(?:that\s+)?([^.!?\n]{0,200})",
    r"(?i)\bthe real (?:issue|problem) (?:is|was)\b[,:]?\s*(?:that\s+)?([^.!?\n]{0,200})",
    r"(?i)\bthis means that\s+([^.!?\n]{0,200})",
    r"(?i)\baha\b[,!:]?\s*([^.!?\n]{0,200})",
];

const GOAL_PATTERNS: &[&str] = &[
    r"(?i)\b(?:I want to|I need to|I['’]d like to|I would like to|help me)\s+([^.!?\n]{5,200})",
    r"(?i)\b(?:my|the|our) goal is(?: to)?\s+([^.!?\n]{5,200})",
    r"(?i)(?:^|[.!?]\s+)(?:can you|could you|please)\s+([^.!?\n]{5,200})",
];

const ARCHITECTURE_PATTERNS: &[&str] = &[
    r"(?i)\b(?:architecture|design|pattern|structure|approach)\s+(?:is|will be|uses|should be)\s+([^.!?\n]{5,200})",
    r"(?i)\b((?:layered|modular|event[- ]driven|microservices?|plugin[- ]based|append[- ]only)\s[^.!?\n]{3,150})",
];

const TASK_PATTERNS: &[&str] = &[
    r"(?im)(?:^|[.!?]\s+)\s*(?:next(?: steps?)?|todo|to-do)\s*[:,\-]?\s+([^.!?\n]{5,200})",
    r"(?i)\b(?:we should|you should|should also|still need to)\s+([^.!?\n]{5,200})",
];

const WARNING_PATTERN: &str =
    r"(?i)\b(?:warning|caution|careful|be aware|watch out|beware)\b\s*[:,\-]?\s*(?:that\s+)?([^.!?\n]{5,200})";

/// Words that raise a decision's importance when they appear in the match.
pub(crate) const NOVELTY_WORDS: &[&str] = &[
    "new", "novel", "first", "breakthrough", "innovative", "unique", "never",
];
pub(crate) const SCOPE_WORDS: &[&str] = &[
    "architecture", "system", "framework", "infrastructure", "entire", "whole", "design",
    "all",
];

/// Fixed keyword -> priority label table. Keys are matched as substrings of
/// the lower-cased user text.
pub(crate) const PRIORITY_KEYWORDS: &[(&str, &str)] = &[
    ("quick", "speed"),
    ("fast", "speed"),
    ("asap", "speed"),
    ("secur", "security"),
    ("test", "quality"),
    ("quality", "quality"),
    ("reliab", "reliability"),
    ("robust", "reliability"),
    ("simple", "simplicity"),
    ("clean", "maintainability"),
    ("maintainab", "maintainability"),
    ("performance", "performance"),
    ("scal", "scalability"),
    ("document", "documentation"),
    ("privacy", "privacy"),
];

pub(crate) const TECHNOLOGIES: &[&str] = &[
    "rust", "python", "javascript", "typescript", "java", "postgres", "postgresql", "sqlite",
    "mysql", "redis", "docker", "kubernetes", "react", "node", "tokio", "serde", "git",
    "json", "yaml", "graphql", "grpc", "http", "aws", "linux",
];

/// Compiled regex set for [`super::RegexStrategy`].
#[derive(Debug, Clone)]
pub struct PatternSet {
    pub decisions: Vec<Regex>,
    pub reasoning: Regex,
    pub insights: Vec<Regex>,
    pub goals: Vec<Regex>,
    pub architecture: Vec<Regex>,
    pub tasks: Vec<Regex>,
    pub warning: Regex,
}

impl PatternSet {
    pub fn compile() -> anyhow::Result<Self> {
        Ok(Self {
            decisions: compile_all(DECISION_PATTERNS)?,
            reasoning: Regex::new(REASONING_PATTERN)?,
            insights: compile_all(INSIGHT_PATTERNS)?,
            goals: compile_all(GOAL_PATTERNS)?,
            architecture: compile_all(ARCHITECTURE_PATTERNS)?,
            tasks: compile_all(TASK_PATTERNS)?,
            warning: Regex::new(WARNING_PATTERN)?,
        })
    }
}

fn compile_all(patterns: &[&str]) -> anyhow::Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| Regex::new(p).map_err(anyhow::Error::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_patterns_compile() {
        let set = PatternSet::compile().unwrap();
        assert_eq!(set.decisions.len(), DECISION_PATTERNS.len());
        assert_eq!(set.insights.len(), INSIGHT_PATTERNS.len());
    }

    #[test]
    fn decision_pattern_captures_commitment() {
        let set = PatternSet::compile().unwrap();
        let caps = set.decisions[0]
            .captures("Sure. I'll add a retry loop around the upload. Done.")
            .unwrap();
        assert_eq!(&caps[1], "add a retry loop around the upload");
    }

    #[test]
    fn we_should_is_a_decision_phrase() {
        let set = PatternSet::compile().unwrap();
        let caps = set.decisions[1]
            .captures("We should cache the parsed config between runs.")
            .unwrap();
        assert_eq!(&caps[1], "cache the parsed config between runs");
    }

    #[test]
    fn task_pattern_requires_sentence_start_for_next() {
        let set = PatternSet::compile().unwrap();
        assert!(set.tasks[0].is_match("Done. Next: wire the CLI to the store."));
        assert!(set.tasks[0].is_match("TODO add pagination to the listing"));
        assert!(!set.tasks[0].is_match("the next release ships it"));
    }
}
