//! Stateless profanity filtering over precompiled word lists.
//!
//! Matching is whole-word and case-insensitive, one compiled alternation per
//! configured language list. The filter itself never rejects a message; in
//! strict mode it returns [`FilterAction::Drop`] and the caller must honor it.

use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::error;

/// Bundled word lists per language. Hosts can extend these via
/// [`FilterConfig::extra_words`].
const WORDLIST_EN: &[&str] = &[
    "ass", "asshole", "bastard", "bitch", "bollocks", "crap", "cunt", "damn", "dick", "douche",
    "fuck", "fucker", "fucking", "jackass", "piss", "prick", "pussy", "shit", "shitty", "slut",
    "twat", "wanker", "whore",
];
const WORDLIST_DE: &[&str] = &[
    "arsch", "arschloch", "fotze", "hurensohn", "missgeburt", "scheisse", "scheiße", "schlampe",
    "wichser",
];
const WORDLIST_ES: &[&str] = &[
    "cabron", "cabrón", "gilipollas", "joder", "mierda", "pendejo", "puta", "puto", "verga",
];
const WORDLIST_FR: &[&str] = &[
    "connard", "connasse", "encule", "enculé", "merde", "putain", "pute", "salope",
];

/// Filtering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// No filtering at all
    Off,
    /// Matches are replaced, message goes through
    #[default]
    Moderate,
    /// Any match drops the whole message
    Strict,
}

/// How a matched word is rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReplacementStrategy {
    /// Each character becomes '*', preserving length
    #[default]
    Mask,
    /// Fixed "[censored]" token
    Token,
    /// Match removed entirely
    Blank,
    /// The configured `custom_token`
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    pub mode: FilterMode,
    /// Language lists to compile ("en", "de", "es", "fr")
    pub languages: Vec<String>,
    pub strategy: ReplacementStrategy,
    /// Replacement used with [`ReplacementStrategy::Custom`]
    pub custom_token: String,
    /// Host-supplied additions, matched for every language
    pub extra_words: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            mode: FilterMode::Moderate,
            languages: vec!["en".to_string()],
            strategy: ReplacementStrategy::Mask,
            custom_token: "[filtered]".to_string(),
            extra_words: Vec::new(),
        }
    }
}

/// What the caller must do with the filtered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterAction {
    Replace,
    Drop,
}

/// Result of filtering one message.
#[derive(Debug, Clone)]
pub struct FilterOutcome {
    pub filtered: String,
    pub has_profanity: bool,
    /// The matched words, lowercased, in order of appearance
    pub matches: Vec<String>,
    pub action: FilterAction,
}

pub struct ProfanityFilter {
    config: FilterConfig,
    /// One compiled alternation per language list
    patterns: HashMap<String, Regex>,
}

impl ProfanityFilter {
    pub fn new(config: FilterConfig) -> Self {
        let mut patterns = HashMap::new();
        for lang in &config.languages {
            let mut words: Vec<&str> = match lang.as_str() {
                "en" => WORDLIST_EN.to_vec(),
                "de" => WORDLIST_DE.to_vec(),
                "es" => WORDLIST_ES.to_vec(),
                "fr" => WORDLIST_FR.to_vec(),
                _ => Vec::new(),
            };
            words.extend(config.extra_words.iter().map(|w| w.as_str()));
            if words.is_empty() {
                continue;
            }
            if let Some(regex) = compile_wordlist(&words) {
                patterns.insert(lang.clone(), regex);
            }
        }
        Self { config, patterns }
    }

    /// Filter one message. `language` narrows matching to that language's
    /// list when it is configured; otherwise every configured list applies.
    pub fn filter(&self, text: &str, language: Option<&str>) -> FilterOutcome {
        if self.config.mode == FilterMode::Off {
            return FilterOutcome {
                filtered: text.to_string(),
                has_profanity: false,
                matches: Vec::new(),
                action: FilterAction::Replace,
            };
        }

        let selected: Vec<&Regex> = match language.and_then(|l| self.patterns.get(l)) {
            Some(regex) => vec![regex],
            None => self.patterns.values().collect(),
        };

        let mut filtered = text.to_string();
        let mut matches = Vec::new();
        for regex in selected {
            for m in regex.find_iter(&filtered) {
                matches.push(m.as_str().to_lowercase());
            }
            filtered = regex
                .replace_all(&filtered, |caps: &regex::Captures<'_>| {
                    self.replacement_for(&caps[0])
                })
                .into_owned();
        }

        let has_profanity = !matches.is_empty();
        let action = if has_profanity && self.config.mode == FilterMode::Strict {
            FilterAction::Drop
        } else {
            FilterAction::Replace
        };

        FilterOutcome {
            filtered,
            has_profanity,
            matches,
            action,
        }
    }

    fn replacement_for(&self, matched: &str) -> String {
        match self.config.strategy {
            ReplacementStrategy::Mask => "*".repeat(matched.chars().count()),
            ReplacementStrategy::Token => "[censored]".to_string(),
            ReplacementStrategy::Blank => String::new(),
            ReplacementStrategy::Custom => self.config.custom_token.clone(),
        }
    }
}

fn compile_wordlist(words: &[&str]) -> Option<Regex> {
    let alternation = words
        .iter()
        .map(|w| regex::escape(w))
        .collect::<Vec<_>>()
        .join("|");
    let pattern = format!(r"(?i)\b(?:{alternation})\b");
    match Regex::new(&pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            error!("failed to compile profanity pattern: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter_with(mode: FilterMode, strategy: ReplacementStrategy) -> ProfanityFilter {
        ProfanityFilter::new(FilterConfig {
            mode,
            strategy,
            ..Default::default()
        })
    }

    #[test]
    fn off_mode_passes_everything_through() {
        let filter = filter_with(FilterMode::Off, ReplacementStrategy::Mask);
        let outcome = filter.filter("what the fuck", None);
        assert_eq!(outcome.filtered, "what the fuck");
        assert!(!outcome.has_profanity);
        assert_eq!(outcome.action, FilterAction::Replace);
    }

    #[test]
    fn masking_preserves_length() {
        let filter = filter_with(FilterMode::Moderate, ReplacementStrategy::Mask);
        let outcome = filter.filter("what the FUCK is this", None);
        assert_eq!(outcome.filtered, "what the **** is this");
        assert!(outcome.has_profanity);
        assert_eq!(outcome.matches, vec!["fuck"]);
        assert_eq!(outcome.action, FilterAction::Replace);
    }

    #[test]
    fn whole_word_only_no_substring_matches() {
        let filter = filter_with(FilterMode::Moderate, ReplacementStrategy::Mask);
        // "class" and "assistant" contain "ass" but must not match
        let outcome = filter.filter("the class assistant passed", None);
        assert_eq!(outcome.filtered, "the class assistant passed");
        assert!(!outcome.has_profanity);
    }

    #[test]
    fn token_and_blank_strategies() {
        let token = filter_with(FilterMode::Moderate, ReplacementStrategy::Token);
        assert_eq!(token.filter("oh shit", None).filtered, "oh [censored]");

        let blank = filter_with(FilterMode::Moderate, ReplacementStrategy::Blank);
        assert_eq!(blank.filter("oh shit", None).filtered, "oh ");
    }

    #[test]
    fn custom_strategy_uses_configured_token() {
        let filter = ProfanityFilter::new(FilterConfig {
            strategy: ReplacementStrategy::Custom,
            custom_token: "[bleep]".to_string(),
            ..Default::default()
        });
        assert_eq!(filter.filter("damn it", None).filtered, "[bleep] it");
    }

    #[test]
    fn strict_mode_requests_drop() {
        let filter = filter_with(FilterMode::Strict, ReplacementStrategy::Mask);
        let outcome = filter.filter("total crap", None);
        assert_eq!(outcome.action, FilterAction::Drop);

        let clean = filter.filter("totally fine", None);
        assert_eq!(clean.action, FilterAction::Replace);
    }

    #[test]
    fn language_hint_narrows_to_that_list() {
        let filter = ProfanityFilter::new(FilterConfig {
            languages: vec!["en".to_string(), "de".to_string()],
            ..Default::default()
        });
        // German word with the English list selected: untouched
        let outcome = filter.filter("so ein arschloch", Some("en"));
        assert!(!outcome.has_profanity);
        // ...and caught with the German list
        let outcome = filter.filter("so ein arschloch", Some("de"));
        assert!(outcome.has_profanity);
    }

    #[test]
    fn unconfigured_hint_falls_back_to_all_lists() {
        let filter = filter_with(FilterMode::Moderate, ReplacementStrategy::Mask);
        let outcome = filter.filter("oh shit", Some("ja"));
        assert!(outcome.has_profanity);
    }

    #[test]
    fn extra_words_are_matched() {
        let filter = ProfanityFilter::new(FilterConfig {
            extra_words: vec!["forbiddenword".to_string()],
            ..Default::default()
        });
        let outcome = filter.filter("say forbiddenword now", None);
        assert_eq!(outcome.filtered, "say ************* now");
    }
}
