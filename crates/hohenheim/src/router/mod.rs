//! Command classification
//!
//! Raw input is matched against an ordered table of word patterns. The
//! pattern with the most literal words wins; equal specificity falls back to
//! declaration order. Anything unmatched is [`Intent::Unrecognized`].

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemCommand {
    Help,
    Status,
    Exit,
    Reset,
    Reflect,
}

/// Typed result of classifying one line of input
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "intent", rename_all = "kebab-case")]
pub enum Intent {
    MemoryWrite { content: String },
    MemoryRead { query: String },
    ReasoningBasic { query: String },
    ReasoningAdvanced { query: String },
    /// `None` flips the current mode
    ModeToggle { unrestricted: Option<bool> },
    EvolutionRequest { instruction: String },
    SystemCommand { command: SystemCommand },
    Unrecognized { text: String },
}

impl Intent {
    pub fn name(&self) -> &'static str {
        match self {
            Intent::MemoryWrite { .. } => "memory-write",
            Intent::MemoryRead { .. } => "memory-read",
            Intent::ReasoningBasic { .. } => "reasoning-basic",
            Intent::ReasoningAdvanced { .. } => "reasoning-advanced",
            Intent::ModeToggle { .. } => "mode-toggle",
            Intent::EvolutionRequest { .. } => "evolution-request",
            Intent::SystemCommand { .. } => "system-command",
            Intent::Unrecognized { .. } => "unrecognized",
        }
    }
}

/// One position in a pattern
#[derive(Debug, Clone, Copy)]
enum Word {
    /// Must match one of the alternatives
    Any(&'static [&'static str]),
    /// Matched if present, skipped otherwise
    Optional(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Payload {
    /// Nothing may follow the pattern words
    None,
    /// At least one word must follow
    Required,
}

#[derive(Debug, Clone)]
struct Pattern {
    words: &'static [Word],
    payload: Payload,
    build: fn(String) -> Intent,
    usage: &'static str,
}

impl Pattern {
    fn specificity(&self) -> usize {
        self.words
            .iter()
            .filter(|w| matches!(w, Word::Any(_)))
            .count()
    }

    /// Payload text (original case) when `tokens` match this pattern
    fn matches(&self, text: &str, tokens: &[Token]) -> Option<String> {
        let mut pos = 0;
        for word in self.words {
            let current = tokens.get(pos).map(|t| t.normalized.as_str());
            match word {
                Word::Any(alternatives) => {
                    if !current.is_some_and(|c| alternatives.contains(&c)) {
                        return None;
                    }
                    pos += 1;
                }
                Word::Optional(alternatives) => {
                    if current.is_some_and(|c| alternatives.contains(&c)) {
                        pos += 1;
                    }
                }
            }
        }

        let rest = tokens.get(pos..).unwrap_or_default();
        match self.payload {
            Payload::None if rest.iter().all(|t| t.normalized.is_empty()) => Some(String::new()),
            Payload::None => None,
            Payload::Required => {
                let first = rest.iter().find(|t| !t.normalized.is_empty())?;
                let payload = text[first.start..].trim();
                (!payload.is_empty()).then(|| payload.to_string())
            }
        }
    }
}

#[derive(Debug)]
struct Token {
    start: usize,
    normalized: String,
}

fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut start = None;
    for (i, c) in text.char_indices() {
        match (c.is_whitespace(), start) {
            (true, Some(s)) => {
                tokens.push(make_token(text, s, i));
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        tokens.push(make_token(text, s, text.len()));
    }
    tokens
}

fn make_token(text: &str, start: usize, end: usize) -> Token {
    let normalized = text[start..end]
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();
    Token { start, normalized }
}

const ENABLE: &[&str] = &["enable", "activate"];
const DISABLE: &[&str] = &["disable", "deactivate"];
const MODE_NAMES: &[&str] = &["unrestricted", "uncensored"];
const MODE: &[&str] = &["mode"];

fn system(command: SystemCommand) -> Intent {
    Intent::SystemCommand { command }
}

fn default_patterns() -> Vec<Pattern> {
    vec![
        Pattern {
            words: &[Word::Any(&["help", "commands"])],
            payload: Payload::None,
            build: |_| system(SystemCommand::Help),
            usage: "help | commands",
        },
        Pattern {
            words: &[Word::Any(&["status"])],
            payload: Payload::None,
            build: |_| system(SystemCommand::Status),
            usage: "status",
        },
        Pattern {
            words: &[Word::Any(&["exit", "quit", "stop"])],
            payload: Payload::None,
            build: |_| system(SystemCommand::Exit),
            usage: "exit | quit | stop",
        },
        Pattern {
            words: &[Word::Any(&["reset"])],
            payload: Payload::None,
            build: |_| system(SystemCommand::Reset),
            usage: "reset",
        },
        Pattern {
            words: &[Word::Any(&["clear"]), Word::Any(&["memory"])],
            payload: Payload::None,
            build: |_| system(SystemCommand::Reset),
            usage: "clear memory",
        },
        Pattern {
            words: &[Word::Any(&["reflect"])],
            payload: Payload::None,
            build: |_| system(SystemCommand::Reflect),
            usage: "reflect",
        },
        Pattern {
            words: &[Word::Any(&["remember"])],
            payload: Payload::Required,
            build: |content| Intent::MemoryWrite { content },
            usage: "remember <fact>",
        },
        Pattern {
            words: &[Word::Any(&["remember"]), Word::Any(&["that"])],
            payload: Payload::Required,
            build: |content| Intent::MemoryWrite { content },
            usage: "remember that <fact>",
        },
        Pattern {
            words: &[Word::Any(&["recall"])],
            payload: Payload::Required,
            build: |query| Intent::MemoryRead { query },
            usage: "recall <topic>",
        },
        Pattern {
            words: &[
                Word::Any(&["what"]),
                Word::Any(&["do"]),
                Word::Any(&["you"]),
                Word::Any(&["remember"]),
                Word::Any(&["about"]),
            ],
            payload: Payload::Required,
            build: |query| Intent::MemoryRead { query },
            usage: "what do you remember about <topic>",
        },
        Pattern {
            words: &[Word::Any(&["think", "reason"]), Word::Any(&["about"])],
            payload: Payload::Required,
            build: |query| Intent::ReasoningBasic { query },
            usage: "think about | reason about <question>",
        },
        Pattern {
            words: &[Word::Any(&["analyze", "analyse", "code"])],
            payload: Payload::Required,
            build: |query| Intent::ReasoningAdvanced { query },
            usage: "analyze | code <request>",
        },
        Pattern {
            words: &[Word::Any(&["deep"]), Word::Any(&["think"]), Word::Optional(&["about"])],
            payload: Payload::Required,
            build: |query| Intent::ReasoningAdvanced { query },
            usage: "deep think [about] <question>",
        },
        Pattern {
            words: &[Word::Any(ENABLE), Word::Any(MODE_NAMES), Word::Optional(MODE)],
            payload: Payload::None,
            build: |_| Intent::ModeToggle {
                unrestricted: Some(true),
            },
            usage: "enable unrestricted [mode]",
        },
        Pattern {
            words: &[Word::Any(DISABLE), Word::Any(MODE_NAMES), Word::Optional(MODE)],
            payload: Payload::None,
            build: |_| Intent::ModeToggle {
                unrestricted: Some(false),
            },
            usage: "disable unrestricted [mode]",
        },
        Pattern {
            words: &[Word::Any(&["toggle"]), Word::Any(MODE_NAMES), Word::Optional(MODE)],
            payload: Payload::None,
            build: |_| Intent::ModeToggle { unrestricted: None },
            usage: "toggle unrestricted [mode]",
        },
        Pattern {
            words: &[Word::Optional(&["self"]), Word::Any(&["evolve"])],
            payload: Payload::Required,
            build: |instruction| Intent::EvolutionRequest { instruction },
            usage: "evolve <instruction>",
        },
        Pattern {
            words: &[Word::Any(&["improve"]), Word::Any(&["yourself"])],
            payload: Payload::Required,
            build: |instruction| Intent::EvolutionRequest { instruction },
            usage: "improve yourself <instruction>",
        },
    ]
}

/// Ordered pattern table producing an [`Intent`] for every input
#[derive(Debug, Clone)]
pub struct CommandRouter {
    patterns: Vec<Pattern>,
}

impl Default for CommandRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRouter {
    pub fn new() -> Self {
        Self {
            patterns: default_patterns(),
        }
    }

    /// Classify one line of input. Never fails.
    pub fn classify(&self, raw: &str) -> Intent {
        let text = raw.trim();
        let tokens = tokenize(text);

        let mut best: Option<(usize, &Pattern, String)> = None;
        for pattern in &self.patterns {
            let Some(payload) = pattern.matches(text, &tokens) else {
                continue;
            };
            let specificity = pattern.specificity();
            if best.as_ref().is_none_or(|(s, _, _)| specificity > *s) {
                best = Some((specificity, pattern, payload));
            }
        }

        match best {
            Some((_, pattern, payload)) => (pattern.build)(payload),
            None => Intent::Unrecognized {
                text: text.to_string(),
            },
        }
    }

    /// Usage line for every pattern, in declaration order
    pub fn usage(&self) -> Vec<&'static str> {
        self.patterns.iter().map(|p| p.usage).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &str) -> Intent {
        CommandRouter::new().classify(text)
    }

    #[test]
    fn test_tokenize_tracks_offsets() {
        let tokens = tokenize("  Hello,  World!");
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].start, 2);
        assert_eq!(tokens[0].normalized, "hello");
        assert_eq!(tokens[1].normalized, "world");
    }

    #[test]
    fn test_payload_keeps_original_case() {
        assert_eq!(
            classify("Remember my sister is called Ada"),
            Intent::MemoryWrite {
                content: "my sister is called Ada".to_string()
            }
        );
    }

    #[test]
    fn test_more_specific_pattern_wins() {
        assert_eq!(
            classify("remember that the wifi password is hunter2"),
            Intent::MemoryWrite {
                content: "the wifi password is hunter2".to_string()
            }
        );
    }

    #[test]
    fn test_payload_required() {
        assert_eq!(
            classify("recall"),
            Intent::Unrecognized {
                text: "recall".to_string()
            }
        );
    }

    #[test]
    fn test_no_payload_patterns_reject_trailing_words() {
        assert!(matches!(classify("status report please"), Intent::Unrecognized { .. }));
        assert_eq!(classify("Status?"), system(SystemCommand::Status));
    }

    #[test]
    fn test_empty_input_is_unrecognized() {
        assert_eq!(
            classify("   "),
            Intent::Unrecognized {
                text: String::new()
            }
        );
    }

    #[test]
    fn test_specificity_counts_required_words_only() {
        let router = CommandRouter::new();
        let deep = router
            .patterns
            .iter()
            .find(|p| p.usage.starts_with("deep think"))
            .unwrap();
        assert_eq!(deep.specificity(), 2);
    }

    #[test]
    fn test_usage_lists_every_pattern() {
        let router = CommandRouter::new();
        assert_eq!(router.usage().len(), router.patterns.len());
    }
}
