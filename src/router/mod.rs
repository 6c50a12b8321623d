//! The intent router — layer 1's deterministic classifier.
//!
//! `classify` is a pure function of the utterance, a registry snapshot,
//! and a capability-store snapshot: no I/O, no blocking, and a sub-15 ms
//! bound on a cold process for registries of up to 500 tools. All regex
//! rules, the conversation-marker automaton, and per-tool keyword sets
//! are compiled once at construction.
//!
//! Phases, in contract order:
//! 1. conversation detector (markers, unless an imperative pattern hits)
//! 2. ordered pattern rules — first match wins, confidence 0.95
//! 3. keyword overlap scoring
//! 4. fuzzy canonical-phrase similarity
//! 5. unknown

pub mod patterns;

use aho_corasick::AhoCorasick;
use regex::Regex;
use serde_json::{Map, Value};

use crate::capability::{Capability, Trigger};
use crate::error::ErrorKind;
use crate::tools::RegistrySnapshot;

pub use patterns::{BUILTIN_RULES, conflicts_with_builtin};

// ─── Contract values ─────────────────────────────────────────────────────────

/// At or above: layer 1 executes directly.
pub const CONFIDENCE_HIGH: f64 = 0.85;
/// At or above (below HIGH): layer 1.5 or 2 handles. Below: always escalate.
pub const CONFIDENCE_LOW: f64 = 0.50;

const PATTERN_CONFIDENCE: f64 = 0.95;
const CONVERSATION_CONFIDENCE: f64 = 0.95;
const KEYWORD_THRESHOLD: f64 = 0.60;
const FUZZY_THRESHOLD: f64 = 0.75;
const FUZZY_CONFIDENCE_FLOOR: f64 = 0.50;
const FUZZY_CONFIDENCE_CEIL: f64 = 0.84;

/// Conjunctions joining steps. Pattern rules describe single intents, so
/// an utterance containing one of these never pattern-matches; the
/// orchestrator's escalation policy sends it to the planner instead.
const MULTI_STEP_CONJUNCTIONS: &[&str] = &[" and ", " then ", ", then ", " after "];

/// Conversational markers. An utterance containing one of these (as a
/// whole word) is a chat request unless an imperative pattern matches.
const CONVERSATION_MARKERS: &[&str] = &[
    "what", "who", "why", "how", "when", "where", "tell me", "explain",
    "describe", "can you", "could you", "would you", "teach me", "chat",
    "discuss", "compare", "difference between", "meaning of", "think about",
];

// ─── IntentMatch ─────────────────────────────────────────────────────────────

/// How the router arrived at a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchReason {
    Pattern,
    Keyword,
    Fuzzy,
    Conversation,
    Unknown,
}

/// Result of classifying one utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct IntentMatch {
    /// Absent for conversation and unknown classifications.
    pub tool_name: Option<String>,
    pub args: Map<String, Value>,
    pub confidence: f64,
    pub reason: MatchReason,
}

impl IntentMatch {
    fn unknown() -> Self {
        Self {
            tool_name: None,
            args: Map::new(),
            confidence: 0.0,
            reason: MatchReason::Unknown,
        }
    }

    fn conversation() -> Self {
        Self {
            tool_name: None,
            args: Map::new(),
            confidence: CONVERSATION_CONFIDENCE,
            reason: MatchReason::Conversation,
        }
    }
}

// ─── Compiled tables ─────────────────────────────────────────────────────────

struct CompiledRule {
    regex: Regex,
    tool_name: String,
    /// Present on promoted rules: args template rendered with captures.
    args_template: Option<Map<String, Value>>,
}

struct PromotedKeyword {
    keyword: String,
    tool_name: String,
    args_template: Map<String, Value>,
}

struct KeywordEntry {
    tool_name: String,
    keywords: Vec<String>,
}

struct FuzzyEntry {
    tool_name: String,
    phrase: String,
}

// ─── IntentRouter ────────────────────────────────────────────────────────────

/// Deterministic layer-1 classifier.
pub struct IntentRouter {
    rules: Vec<CompiledRule>,
    promoted_keywords: Vec<PromotedKeyword>,
    markers: AhoCorasick,
    keyword_tools: Vec<KeywordEntry>,
    fuzzy_tools: Vec<FuzzyEntry>,
}

impl IntentRouter {
    /// Compile the router from immutable snapshots. Promoted capability
    /// rules are appended after builtins to preserve precedence.
    pub fn new(
        registry: &RegistrySnapshot,
        capabilities: &[Capability],
    ) -> Result<Self, ErrorKind> {
        let mut rules = Vec::with_capacity(BUILTIN_RULES.len() + capabilities.len());
        for rule in BUILTIN_RULES {
            rules.push(CompiledRule {
                regex: Regex::new(rule.pattern).map_err(|e| {
                    ErrorKind::Internal(format!(
                        "builtin pattern for '{}' does not compile: {e}",
                        rule.tool_name
                    ))
                })?,
                tool_name: rule.tool_name.to_owned(),
                args_template: None,
            });
        }

        let mut promoted_keywords = Vec::new();
        for capability in capabilities {
            if conflicts_with_builtin(capability) {
                return Err(ErrorKind::Internal(format!(
                    "capability '{}' shadows a builtin router rule",
                    capability.name
                )));
            }
            for trigger in &capability.triggers {
                match trigger {
                    Trigger::Pattern(pattern) => {
                        rules.push(CompiledRule {
                            regex: Regex::new(pattern).map_err(|e| {
                                ErrorKind::Internal(format!(
                                    "capability '{}' pattern does not compile: {e}",
                                    capability.name
                                ))
                            })?,
                            tool_name: capability.tool_name.clone(),
                            args_template: Some(capability.args_template.clone()),
                        });
                    }
                    Trigger::Keyword(keyword) => {
                        promoted_keywords.push(PromotedKeyword {
                            keyword: keyword.to_ascii_lowercase(),
                            tool_name: capability.tool_name.clone(),
                            args_template: capability.args_template.clone(),
                        });
                    }
                }
            }
        }

        let markers = AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(CONVERSATION_MARKERS)
            .map_err(|e| ErrorKind::Internal(format!("marker automaton failed: {e}")))?;

        let keyword_tools = registry
            .iter()
            .filter(|t| !t.keywords.is_empty())
            .map(|t| KeywordEntry {
                tool_name: t.name.clone(),
                keywords: t.keywords.iter().map(|k| k.to_ascii_lowercase()).collect(),
            })
            .collect();

        let fuzzy_tools = registry
            .iter()
            .filter(|t| !t.canonical_phrase.is_empty())
            .map(|t| FuzzyEntry {
                tool_name: t.name.clone(),
                phrase: t.canonical_phrase.to_ascii_lowercase(),
            })
            .collect();

        Ok(Self {
            rules,
            promoted_keywords,
            markers,
            keyword_tools,
            fuzzy_tools,
        })
    }

    /// Classify one utterance. Deterministic for a given router.
    pub fn classify(&self, utterance: &str) -> IntentMatch {
        let trimmed = utterance.trim();
        if trimmed.is_empty() {
            return IntentMatch::unknown();
        }

        // An utterance joining steps with a conjunction is not a single
        // intent: every single-intent phase is skipped so the
        // orchestrator's escalation policy can hand it to the planner.
        let lowered = trimmed.to_ascii_lowercase();
        if MULTI_STEP_CONJUNCTIONS.iter().any(|c| lowered.contains(c)) {
            if self.has_conversation_marker(trimmed) {
                return IntentMatch::conversation();
            }
            return IntentMatch::unknown();
        }

        // Pattern phase runs first internally: a high-confidence
        // imperative pattern overrides the conversation detector.
        let pattern_match = self.match_rules(trimmed);

        if pattern_match.is_none() && self.has_conversation_marker(trimmed) {
            return IntentMatch::conversation();
        }
        if let Some(found) = pattern_match {
            return found;
        }

        if let Some(found) = self.match_keywords(trimmed) {
            return found;
        }
        if let Some(found) = self.match_fuzzy(trimmed) {
            return found;
        }
        IntentMatch::unknown()
    }

    // ── pattern phase ────────────────────────────────────────────────────

    fn match_rules(&self, utterance: &str) -> Option<IntentMatch> {
        for rule in &self.rules {
            if let Some(captures) = rule.regex.captures(utterance) {
                let mut args = Map::new();
                for name in rule.regex.capture_names().flatten() {
                    if let Some(value) = captures.name(name) {
                        args.insert(name.to_owned(), Value::String(value.as_str().to_owned()));
                    }
                }
                if let Some(template) = &rule.args_template {
                    args = render_template(template, &args);
                }
                return Some(IntentMatch {
                    tool_name: Some(rule.tool_name.clone()),
                    args,
                    confidence: PATTERN_CONFIDENCE,
                    reason: MatchReason::Pattern,
                });
            }
        }

        // Promoted keyword triggers sit at the end of the pattern phase.
        let lowered = utterance.to_ascii_lowercase();
        for promoted in &self.promoted_keywords {
            if contains_word(&lowered, &promoted.keyword) {
                return Some(IntentMatch {
                    tool_name: Some(promoted.tool_name.clone()),
                    args: promoted.args_template.clone(),
                    confidence: PATTERN_CONFIDENCE,
                    reason: MatchReason::Pattern,
                });
            }
        }
        None
    }

    // ── conversation detector ────────────────────────────────────────────

    fn has_conversation_marker(&self, utterance: &str) -> bool {
        let bytes = utterance.as_bytes();
        self.markers.find_iter(utterance).any(|m| {
            let before_ok = m.start() == 0
                || !bytes[m.start() - 1].is_ascii_alphanumeric();
            let after_ok =
                m.end() == bytes.len() || !bytes[m.end()].is_ascii_alphanumeric();
            before_ok && after_ok
        })
    }

    // ── keyword phase ────────────────────────────────────────────────────

    fn match_keywords(&self, utterance: &str) -> Option<IntentMatch> {
        let tokens: Vec<String> = tokenize(utterance);
        let mut best: Option<(&KeywordEntry, f64)> = None;

        for entry in &self.keyword_tools {
            let overlap = entry
                .keywords
                .iter()
                .filter(|k| tokens.iter().any(|t| t == *k))
                .count();
            let score = overlap as f64 / entry.keywords.len() as f64;
            // Strict comparison keeps the first-registered tool on ties.
            if score > KEYWORD_THRESHOLD && best.map_or(true, |(_, s)| score > s) {
                best = Some((entry, score));
            }
        }

        best.map(|(entry, score)| IntentMatch {
            tool_name: Some(entry.tool_name.clone()),
            args: Map::new(),
            confidence: (score + 0.20).min(CONFIDENCE_HIGH),
            reason: MatchReason::Keyword,
        })
    }

    // ── fuzzy phase ──────────────────────────────────────────────────────

    fn match_fuzzy(&self, utterance: &str) -> Option<IntentMatch> {
        let lowered = utterance.to_ascii_lowercase();
        let mut best: Option<(&FuzzyEntry, f64)> = None;

        for entry in &self.fuzzy_tools {
            let similarity = strsim::normalized_levenshtein(&lowered, &entry.phrase);
            if similarity > FUZZY_THRESHOLD && best.map_or(true, |(_, s)| similarity > s) {
                best = Some((entry, similarity));
            }
        }

        best.map(|(entry, similarity)| IntentMatch {
            tool_name: Some(entry.tool_name.clone()),
            args: Map::new(),
            confidence: fuzzy_confidence(similarity),
            reason: MatchReason::Fuzzy,
        })
    }
}

/// Map similarity in `(0.75, 1.0]` linearly onto `[0.50, 0.84]`.
fn fuzzy_confidence(similarity: f64) -> f64 {
    let scaled = FUZZY_CONFIDENCE_FLOOR
        + (similarity - FUZZY_THRESHOLD) / (1.0 - FUZZY_THRESHOLD)
            * (FUZZY_CONFIDENCE_CEIL - FUZZY_CONFIDENCE_FLOOR);
    scaled.clamp(FUZZY_CONFIDENCE_FLOOR, FUZZY_CONFIDENCE_CEIL)
}

/// Lowercased alphanumeric tokens.
fn tokenize(utterance: &str) -> Vec<String> {
    utterance
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_ascii_lowercase())
        .collect()
}

/// Whole-word containment check.
fn contains_word(haystack: &str, word: &str) -> bool {
    let bytes = haystack.as_bytes();
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(word) {
        let begin = start + pos;
        let end = begin + word.len();
        let before_ok = begin == 0 || !bytes[begin - 1].is_ascii_alphanumeric();
        let after_ok = end == bytes.len() || !bytes[end].is_ascii_alphanumeric();
        if before_ok && after_ok {
            return true;
        }
        start = begin + 1;
    }
    false
}

/// Substitute `${group}` placeholders in string template values.
fn render_template(
    template: &Map<String, Value>,
    captures: &Map<String, Value>,
) -> Map<String, Value> {
    template
        .iter()
        .map(|(key, value)| {
            let rendered = match value {
                Value::String(s) => {
                    let mut out = s.clone();
                    for (name, capture) in captures {
                        if let Value::String(text) = capture {
                            out = out.replace(&format!("${{{name}}}"), text);
                        }
                    }
                    Value::String(out)
                }
                other => other.clone(),
            };
            (key.clone(), rendered)
        })
        .collect()
}
