use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

/// Query classes answered locally, without planning or invoking any agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShortCircuit {
    /// Insults, slurs, threats. Always refused.
    Abusive,
    Greeting,
    Thanks,
    Farewell,
    /// "what time is it", "what's today's date"
    DateTime,
}

pub const REFUSAL: &str = "I can't help with that request.";

impl ShortCircuit {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShortCircuit::Abusive => "abusive",
            ShortCircuit::Greeting => "greeting",
            ShortCircuit::Thanks => "thanks",
            ShortCircuit::Farewell => "farewell",
            ShortCircuit::DateTime => "date_time",
        }
    }

    pub fn is_abusive(&self) -> bool {
        matches!(self, ShortCircuit::Abusive)
    }

    pub fn answer(&self, now: DateTime<Utc>) -> String {
        match self {
            ShortCircuit::Abusive => REFUSAL.to_string(),
            ShortCircuit::Greeting => "Hello! How can I help you today?".to_string(),
            ShortCircuit::Thanks => "You're welcome! Let me know if there's anything else I can do.".to_string(),
            ShortCircuit::Farewell => "Goodbye! Come back any time.".to_string(),
            ShortCircuit::DateTime => format!(
                "It is {} (UTC).",
                now.format("%A, %B %-d, %Y, %H:%M")
            ),
        }
    }
}

struct Rule {
    kind: ShortCircuit,
    /// Matched only as whole words.
    keywords: Vec<&'static str>,
    patterns: Vec<Regex>,
    priority: u8,
}

impl Rule {
    fn matches(&self, lower: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(lower))
            || self.keywords.iter().any(|k| contains_word(lower, k))
    }
}

fn contains_word(haystack: &str, word: &str) -> bool {
    haystack.match_indices(word).any(|(i, _)| {
        let before = haystack[..i].chars().next_back();
        let after = haystack[i + word.len()..].chars().next();
        !before.map_or(false, char::is_alphanumeric) && !after.map_or(false, char::is_alphanumeric)
    })
}

static TRAILING: &str = r"[\s!.,?~]*$";

fn anchored(body: &str) -> Regex {
    Regex::new(&format!(r"(?i)^\s*(?:{}){}", body, TRAILING)).unwrap()
}

static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    let mut rules = vec![
        Rule {
            kind: ShortCircuit::Abusive,
            keywords: vec![
                "idiot", "moron", "stupid bot", "dumbass", "retard", "retarded",
                "bitch", "bastard", "asshole", "fuck you", "fuck off", "piece of shit",
                "shut up",
            ],
            patterns: vec![
                Regex::new(r"(?i)\bi\s*(?:will|'ll|am going to|am gonna|gonna)\s*(?:kill|hurt|murder|shoot|stab)\b").unwrap(),
                Regex::new(r"(?i)\b(?:kill|hurt|murder)\s+(?:you|yourself|myself|him|her|them)\b").unwrap(),
                Regex::new(r"(?i)\bf+u+c+k+(?:ing)?\s+(?:you|off|this)\b").unwrap(),
                Regex::new(r"(?i)\b(?:you|u)\s+(?:are|r)\s+(?:useless|worthless|garbage|trash|pathetic)\b").unwrap(),
            ],
            priority: 100,
        },
        Rule {
            kind: ShortCircuit::Greeting,
            keywords: vec![],
            patterns: vec![
                anchored(r"(?:hi|hello|hey|hiya|howdy|yo|greetings)(?:\s+there)?"),
                anchored(r"good\s*(?:morning|afternoon|evening|day)"),
                anchored(r"how\s+are\s+you(?:\s+doing)?(?:\s+today)?"),
            ],
            priority: 10,
        },
        Rule {
            kind: ShortCircuit::Thanks,
            keywords: vec![],
            patterns: vec![anchored(
                r"(?:thanks|thank\s*you|thx|ty|cheers|much\s+appreciated)(?:\s+(?:so\s+much|a\s+lot|again))?",
            )],
            priority: 10,
        },
        Rule {
            kind: ShortCircuit::Farewell,
            keywords: vec![],
            patterns: vec![anchored(
                r"(?:bye|goodbye|bye\s*bye|see\s+(?:you|ya)(?:\s+later)?|good\s*night|later)",
            )],
            priority: 10,
        },
        Rule {
            kind: ShortCircuit::DateTime,
            keywords: vec![],
            patterns: vec![
                anchored(r"what\s+(?:time|day|date)\s+is\s+it(?:\s+(?:now|today|right\s+now))?"),
                anchored(r"(?:what(?:'s|\s+is)\s+)?(?:the\s+)?(?:current\s+)?(?:time|date)(?:\s+(?:now|today|right\s+now))?"),
                anchored(r"(?:what(?:'s|\s+is)\s+)?today'?s\s+date"),
                anchored(r"what\s+day\s+of\s+the\s+week\s+is\s+it(?:\s+today)?"),
            ],
            priority: 5,
        },
    ];
    rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    rules
});

/// Cheap local pattern checks run before planning. Abusive content wins
/// over every conversational class.
#[derive(Default)]
pub struct ShortCircuitClassifier;

impl ShortCircuitClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, query: &str) -> Option<ShortCircuit> {
        let lower = query.trim().to_lowercase();
        if lower.is_empty() {
            return None;
        }
        RULES.iter().find(|r| r.matches(&lower)).map(|r| r.kind)
    }
}
