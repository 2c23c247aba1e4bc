//! Rule table mapping an RFM code to a customer segment
//!
//! Rules are evaluated in order and every matching rule overwrites the
//! label chosen so far, so the last match wins. The exact-code rules sit at
//! the end of [`SEGMENT_RULES`] and therefore beat the digit rules.

pub const DEFAULT_SEGMENT: &str = "Normal";

/// Condition a [`SegmentRule`] tests against a 3-digit R/F/M code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodePattern {
    /// Recency digit equals the given quartile
    Recency(u8),
    /// Frequency digit equals the given quartile
    Frequency(u8),
    /// Monetary digit equals the given quartile
    Monetary(u8),
    /// The whole code matches
    Exact(&'static str),
}

impl CodePattern {
    pub fn matches(&self, code: &str) -> bool {
        let digit = |pos: usize, q: u8| code.as_bytes().get(pos) == Some(&(b'0' + q));
        match *self {
            CodePattern::Recency(q) => digit(0, q),
            CodePattern::Frequency(q) => digit(1, q),
            CodePattern::Monetary(q) => digit(2, q),
            CodePattern::Exact(expected) => code == expected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentRule {
    pub pattern: CodePattern,
    pub label: &'static str,
}

const fn rule(pattern: CodePattern, label: &'static str) -> SegmentRule {
    SegmentRule { pattern, label }
}

/// Ordered rule list; order is significant
pub const SEGMENT_RULES: [SegmentRule; 6] = [
    rule(CodePattern::Monetary(4), "BigSpenders"),
    rule(CodePattern::Frequency(4), "Loyal"),
    rule(CodePattern::Exact("441"), "LostCheap"),
    rule(CodePattern::Exact("444"), "LostBigSpenders"),
    rule(CodePattern::Exact("344"), "AlmostLost"),
    rule(CodePattern::Exact("144"), "Best"),
];

/// All labels the rule table can produce, default first
pub fn segment_names() -> impl Iterator<Item = &'static str> {
    std::iter::once(DEFAULT_SEGMENT).chain(SEGMENT_RULES.iter().map(|r| r.label))
}

pub fn segment_for_code(code: &str) -> &'static str {
    segment_with_rules(code, &SEGMENT_RULES)
}

/// Evaluate an arbitrary rule list with last-match-wins semantics
pub fn segment_with_rules(code: &str, rules: &[SegmentRule]) -> &'static str {
    rules.iter().fold(DEFAULT_SEGMENT, |current, r| {
        if r.pattern.matches(code) {
            r.label
        } else {
            current
        }
    })
}
