// Detection of feed UI states (rate-limit banner, email challenge) from page text.
// The feed's copy changes without notice, so detectors are injected rather than
// hardcoded at call sites.

use regex::Regex;

pub trait PageDetector: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    fn matches(&self, page_text: &str) -> bool;
}

/// Exact substring match against the rendered text.
pub struct TextMatch {
    name: String,
    needle: String,
}

impl TextMatch {
    pub fn new(name: &str, needle: &str) -> Self {
        Self {
            name: name.to_string(),
            needle: needle.to_string(),
        }
    }
}

impl PageDetector for TextMatch {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, page_text: &str) -> bool {
        !self.needle.is_empty() && page_text.contains(&self.needle)
    }
}

/// Regex match against the rendered text.
pub struct PatternMatch {
    name: String,
    pattern: Regex,
}

impl PatternMatch {
    pub fn new(name: &str, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            name: name.to_string(),
            pattern: Regex::new(pattern)?,
        })
    }
}

impl PageDetector for PatternMatch {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, page_text: &str) -> bool {
        self.pattern.is_match(page_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_match_is_exact_substring() {
        let d = TextMatch::new("rate_limit", "Something went wrong. Try reloading.");
        assert!(d.matches("Home\nSomething went wrong. Try reloading.\nRetry"));
        assert!(!d.matches("Something went wrong."));
    }

    #[test]
    fn empty_needle_never_matches() {
        let d = TextMatch::new("disabled", "");
        assert!(!d.matches("anything at all"));
    }

    #[test]
    fn pattern_match_handles_copy_variants() {
        let d = PatternMatch::new("email", r"(?i)check your (email|inbox)").unwrap();
        assert!(d.matches("Please CHECK YOUR INBOX for a code"));
        assert!(d.matches("check your email"));
        assert!(!d.matches("enter your password"));
        assert_eq!(d.name(), "email");
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        assert!(PatternMatch::new("bad", "(unclosed").is_err());
    }
}
