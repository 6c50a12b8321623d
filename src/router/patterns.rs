//! Builtin pattern rules for the intent router.
//!
//! Rule order is part of the routing contract: rules are evaluated in
//! declared order and the first match wins. Named capture groups become
//! tool arguments verbatim. Promoted capabilities are appended *after*
//! this table so builtins always take precedence.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use crate::capability::{Capability, Trigger};

/// One builtin routing rule.
pub struct PatternRule {
    /// Case-insensitive anchored regex with named capture groups.
    pub pattern: &'static str,
    pub tool_name: &'static str,
}

/// The ordered builtin rule table.
pub const BUILTIN_RULES: &[PatternRule] = &[
    // ── audio ──
    PatternRule {
        pattern: r"(?i)^(?:please )?set (?:the )?volume to (?P<level>\d{1,3})\s*%?\.?$",
        tool_name: "audio.set_volume",
    },
    PatternRule {
        pattern: r"(?i)^(?:turn )?(?:the )?volume (?:up |down )?to (?P<level>\d{1,3})\s*%?\.?$",
        tool_name: "audio.set_volume",
    },
    PatternRule {
        pattern: r"(?i)^(?:please )?mute(?: the)?(?: sound| audio| volume)?\.?$",
        tool_name: "audio.mute",
    },
    PatternRule {
        pattern: r"(?i)^(?:please )?unmute(?: the)?(?: sound| audio| volume)?\.?$",
        tool_name: "audio.unmute",
    },
    PatternRule {
        pattern: r"(?i)^(?:what(?:'s| is) the )?(?:current )?volume\s*\??$",
        tool_name: "audio.get_volume",
    },
    PatternRule {
        pattern: r"(?i)^how loud is (?:it|the volume)\s*\??$",
        tool_name: "audio.get_volume",
    },
    // ── display ──
    PatternRule {
        pattern: r"(?i)^set (?:the )?(?:screen )?brightness to (?P<level>\d{1,3})\s*%?\.?$",
        tool_name: "display.set_brightness",
    },
    PatternRule {
        pattern: r"(?i)^(?:what(?:'s| is) the )?(?:current )?brightness\s*\??$",
        tool_name: "display.get_brightness",
    },
    // ── power ──
    PatternRule {
        pattern: r"(?i)^lock (?:the )?(?:screen|computer|session)\.?$",
        tool_name: "power.lock",
    },
    PatternRule {
        pattern: r"(?i)^(?:put (?:the )?computer to sleep|go to sleep|suspend)\.?$",
        tool_name: "power.sleep",
    },
    PatternRule {
        pattern: r"(?i)^(?:shut ?down|power off)(?: the)?(?: computer| machine| pc)?\.?$",
        tool_name: "power.shutdown",
    },
    // ── apps ──
    PatternRule {
        pattern: r"(?i)^(?:open|launch|start) (?P<name>[A-Za-z][\w .+-]*?)\.?$",
        tool_name: "apps.open",
    },
    PatternRule {
        pattern: r"(?i)^(?:close|quit) (?P<name>[A-Za-z][\w .+-]*?)\.?$",
        tool_name: "apps.close",
    },
    PatternRule {
        pattern: r"(?i)^(?:focus|switch to) (?P<name>[A-Za-z][\w .+-]*?)\.?$",
        tool_name: "apps.focus",
    },
    // ── input ──
    PatternRule {
        pattern: r"(?i)^type (?P<text>.+)$",
        tool_name: "input.type",
    },
    PatternRule {
        pattern: r"(?i)^(?:press|hit) (?:the )?(?P<key>[\w+]+)(?: key)?\.?$",
        tool_name: "input.key",
    },
    // ── clipboard ──
    PatternRule {
        pattern: r"(?i)^what(?:'s| is) (?:on|in) the clipboard\s*\??$",
        tool_name: "clipboard.read",
    },
    PatternRule {
        pattern: r"(?i)^copy (?P<text>.+?) to (?:the )?clipboard\.?$",
        tool_name: "clipboard.write",
    },
    // ── files ──
    PatternRule {
        pattern: r"(?i)^create (?:a )?(?:folder|directory) (?:named |called )?(?P<path>[\w .~/\\-]+?)\.?$",
        tool_name: "files.create_dir",
    },
    PatternRule {
        pattern: r"(?i)^create (?:a |an )?(?:empty )?file (?:named |called )?(?P<path>[\w .~/\\-]+?)\.?$",
        tool_name: "files.create",
    },
    PatternRule {
        pattern: r"(?i)^read (?:the )?file (?P<path>[\w .~/\\-]+?)\.?$",
        tool_name: "files.read",
    },
    PatternRule {
        pattern: r"(?i)^delete (?:the )?(?:file|folder|directory) (?P<path>[\w .~/\\-]+?)\.?$",
        tool_name: "files.delete",
    },
    PatternRule {
        pattern: r"(?i)^(?:move|rename) (?P<from>[\w .~/\\-]+?) to (?P<to>[\w .~/\\-]+?)\.?$",
        tool_name: "files.move",
    },
    // ── desktop ──
    PatternRule {
        pattern: r"(?i)^take a screenshot\.?$|^screenshot\.?$",
        tool_name: "desktop.screenshot",
    },
    // ── time ──
    PatternRule {
        pattern: r"(?i)^what time is it\s*\??$|^what(?:'s| is) the time\s*\??$|^what(?:'s| is) today's date\s*\??$",
        tool_name: "time.now",
    },
];

/// Literal words (len > 2) appearing in the builtin patterns. A promoted
/// keyword trigger that collides with one of these would shadow a builtin
/// rule of equal or greater specificity.
fn builtin_literal_words() -> &'static BTreeSet<String> {
    static WORDS: OnceLock<BTreeSet<String>> = OnceLock::new();
    WORDS.get_or_init(|| {
        let mut words = BTreeSet::new();
        for rule in BUILTIN_RULES {
            let mut current = String::new();
            for c in rule.pattern.chars() {
                if c.is_ascii_alphabetic() {
                    current.push(c.to_ascii_lowercase());
                } else {
                    if current.len() > 2 {
                        words.insert(current.clone());
                    }
                    current.clear();
                }
            }
            if current.len() > 2 {
                words.insert(current);
            }
        }
        words
    })
}

/// Whether a promoted capability's triggers would shadow a builtin rule.
pub fn conflicts_with_builtin(capability: &Capability) -> bool {
    capability.triggers.iter().any(|trigger| match trigger {
        Trigger::Pattern(p) => BUILTIN_RULES.iter().any(|r| r.pattern == p),
        Trigger::Keyword(k) => builtin_literal_words().contains(&k.to_ascii_lowercase()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::Map;

    use crate::capability::CapabilitySource;

    fn promoted(trigger: Trigger) -> Capability {
        Capability {
            name: "test".into(),
            triggers: vec![trigger],
            tool_name: "run_program".into(),
            args_template: Map::new(),
            source: CapabilitySource::Promoted,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn all_builtin_patterns_compile() {
        for rule in BUILTIN_RULES {
            assert!(
                regex::Regex::new(rule.pattern).is_ok(),
                "pattern for {} does not compile",
                rule.tool_name
            );
        }
    }

    #[test]
    fn identical_pattern_conflicts() {
        let cap = promoted(Trigger::Pattern(BUILTIN_RULES[0].pattern.to_string()));
        assert!(conflicts_with_builtin(&cap));
    }

    #[test]
    fn builtin_word_keyword_conflicts() {
        assert!(conflicts_with_builtin(&promoted(Trigger::Keyword("volume".into()))));
        assert!(conflicts_with_builtin(&promoted(Trigger::Keyword("screenshot".into()))));
    }

    #[test]
    fn novel_keyword_does_not_conflict() {
        assert!(!conflicts_with_builtin(&promoted(Trigger::Keyword("fibonacci".into()))));
    }
}
