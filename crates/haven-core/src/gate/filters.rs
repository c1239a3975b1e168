//! Pattern filters for raw message text.
//!
//! Two distinct concerns with very different outcomes:
//!
//! - [`InjectionFilter`] matches adversarial input shapes
//!   (SQL/script/command/path-traversal). A match blocks the message
//!   outright before it can reach the rate limiter or cipher.
//! - [`CrisisDetector`] matches self-harm or crisis language. A match
//!   never blocks; it flags the verdict so the pipeline can escalate to
//!   crisis resources while the message proceeds normally.

use regex::Regex;

use super::GateError;

/// Injection shapes blocked by default.
///
/// These target structure, not vocabulary: quote-semicolon SQL breaks,
/// script/handler markup, shell metacharacter command chains, and
/// repeated parent-directory traversal.
pub(crate) const DEFAULT_INJECTION_PATTERNS: &[&str] = &[
    // SQL
    r"(?i)\b(drop|truncate|alter)\s+table\b",
    r"(?i)\bunion\s+select\b",
    r"(?i)\b(insert\s+into|delete\s+from)\b",
    r"'\s*;",
    r"(?i)'\s*or\s+'?1'?\s*=\s*'?1",
    // Script / markup
    r"(?i)<\s*script\b",
    r"(?i)javascript\s*:",
    r"(?i)\bon(load|click|error)\s*=",
    // Command
    r"\$\([^)]*\)",
    r"(?i)[;&|]\s*(rm|curl|wget|nc|chmod)\b",
    // Path traversal
    r"(\.\./){2,}",
];

/// Crisis phrases flagged by default.
///
/// Deliberately broad; a false positive costs one extra notification to
/// crisis resources, a false negative costs much more.
pub(crate) const DEFAULT_CRISIS_KEYWORDS: &[&str] = &[
    "suicide",
    "suicidal",
    "kill myself",
    "end my life",
    "self-harm",
    "self harm",
    "hurt myself",
    "want to die",
    "no reason to live",
    "better off without me",
];

/// Compiled injection-shape patterns.
#[derive(Debug)]
pub(crate) struct InjectionFilter {
    patterns: Vec<Regex>,
}

impl InjectionFilter {
    /// Compile the configured patterns.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::InvalidPattern`] on the first pattern that
    /// fails to compile; a silently skipped filter would be a hole in
    /// the gate.
    pub(crate) fn compile(patterns: &[String]) -> Result<Self, GateError> {
        let compiled = patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|err| GateError::InvalidPattern {
                    pattern: pattern.clone(),
                    reason: err.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { patterns: compiled })
    }

    /// The first pattern that matches, if any.
    pub(crate) fn first_match(&self, text: &str) -> Option<&str> {
        self.patterns.iter().find(|pattern| pattern.is_match(text)).map(Regex::as_str)
    }
}

/// Case-insensitive crisis phrase scanner.
#[derive(Debug)]
pub(crate) struct CrisisDetector {
    keywords: Vec<String>,
}

impl CrisisDetector {
    pub(crate) fn new(keywords: &[String]) -> Self {
        Self { keywords: keywords.iter().map(|keyword| keyword.to_lowercase()).collect() }
    }

    pub(crate) fn detect(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.keywords.iter().any(|keyword| lowered.contains(keyword))
    }
}
