//! Stateless text heuristics: keywords, links, shortener domains, shouting,
//! repetition. Empty text never matches anything.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;
use url::Url;

use crate::config::DetectionConfig;

static RE_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bhttps?://[^\s<>"']+"#).expect("link regex")
});

#[derive(Debug, Clone)]
pub struct PatternClassifier {
    /// (as configured, folded for matching)
    keywords: Vec<(String, String)>,
    shorteners: Vec<String>,
    caps_min_len: usize,
    caps_ratio: f64,
    repetition_min_words: usize,
    repetition_ratio: f64,
}

impl PatternClassifier {
    pub fn new(cfg: &DetectionConfig) -> Self {
        let keywords = cfg
            .keywords
            .iter()
            .filter(|k| !k.trim().is_empty())
            .map(|k| (k.clone(), fold(k)))
            .collect();
        let shorteners = cfg
            .shortener_domains
            .iter()
            .map(|d| d.trim().trim_end_matches('.').to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        Self {
            keywords,
            shorteners,
            caps_min_len: cfg.caps_min_len,
            caps_ratio: cfg.caps_ratio,
            repetition_min_words: cfg.repetition_min_words,
            repetition_ratio: cfg.repetition_ratio,
        }
    }

    /// First configured keyword contained in `text` (case-insensitive).
    /// Only one keyword is ever reported per message.
    pub fn keyword_match(&self, text: &str) -> Option<&str> {
        if text.is_empty() {
            return None;
        }
        let folded = fold(text);
        self.keywords
            .iter()
            .find(|(_, k)| folded.contains(k.as_str()))
            .map(|(orig, _)| orig.as_str())
    }

    /// All `http://` / `https://` tokens in order of appearance.
    pub fn extract_links<'a>(&self, text: &'a str) -> Vec<&'a str> {
        RE_LINK.find_iter(text).map(|m| m.as_str()).collect()
    }

    /// True when the link's host is a known shortener or a subdomain of one.
    pub fn is_suspicious_url(&self, link: &str) -> bool {
        let Ok(url) = Url::parse(link) else {
            return false;
        };
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        self.shorteners.iter().any(|d| {
            host == *d
                || host
                    .strip_suffix(d.as_str())
                    .is_some_and(|rest| rest.ends_with('.'))
        })
    }

    /// Longer than `caps_min_len` chars and more than `caps_ratio` of the letters uppercase.
    pub fn is_shouting(&self, text: &str) -> bool {
        if text.chars().count() <= self.caps_min_len {
            return false;
        }
        let (mut letters, mut upper) = (0usize, 0usize);
        for c in text.chars().filter(|c| c.is_alphabetic()) {
            letters += 1;
            if c.is_uppercase() {
                upper += 1;
            }
        }
        letters > 0 && (upper as f64 / letters as f64) > self.caps_ratio
    }

    /// More than `repetition_min_words` words and distinct/total below `repetition_ratio`.
    pub fn is_repetitive(&self, text: &str) -> bool {
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.len() <= self.repetition_min_words {
            return false;
        }
        let distinct: HashSet<&str> = words.iter().copied().collect();
        (distinct.len() as f64 / words.len() as f64) < self.repetition_ratio
    }
}

fn fold(s: &str) -> String {
    s.nfkc().collect::<String>().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> PatternClassifier {
        PatternClassifier::new(&DetectionConfig::default())
    }

    #[test]
    fn keyword_short_circuits_on_first_match() {
        let c = classifier();
        // "spam" and "scam" both present; config order decides
        assert_eq!(c.keyword_match("this is SPAM and a scam"), Some("spam"));
        assert_eq!(c.keyword_match("hello there"), None);
        assert_eq!(c.keyword_match(""), None);
    }

    #[test]
    fn keyword_folds_fullwidth_letters() {
        let c = classifier();
        assert_eq!(c.keyword_match("ｐｈｉｓｈｉｎｇ attempt"), Some("phishing"));
    }

    #[test]
    fn extracts_links_in_order() {
        let c = classifier();
        let links = c.extract_links("see https://bit.ly/x and http://example.com/y, ok");
        assert_eq!(links, vec!["https://bit.ly/x", "http://example.com/y,"]);
        assert!(c.extract_links("no links here, just t.me/foo").is_empty());
    }

    #[test]
    fn shortener_matching_is_by_host() {
        let c = classifier();
        assert!(c.is_suspicious_url("https://bit.ly/x"));
        assert!(c.is_suspicious_url("https://www.tinyurl.com/abc"));
        assert!(c.is_suspicious_url("http://T.CO/abc"));
        assert!(!c.is_suspicious_url("https://example.com/y"));
        assert!(!c.is_suspicious_url("https://reddit.com/r/rust"));
        assert!(!c.is_suspicious_url("https://notbit.ly/x"));
        assert!(!c.is_suspicious_url("not a url"));
    }

    #[test]
    fn shouting_threshold() {
        let c = classifier();
        // 20 chars, 15 upper -> 75%
        assert!(c.is_shouting("ABCDEFGHIJKLMNOpqrst"));
        // 20 chars, 13 upper -> 65%
        assert!(!c.is_shouting("ABCDEFGHIJKLMnopqrst"));
        // too short even if all caps
        assert!(!c.is_shouting("HELLO!!!"));
        // no letters at all
        assert!(!c.is_shouting("1234567890123"));
    }

    #[test]
    fn repetition_threshold() {
        let c = classifier();
        assert!(c.is_repetitive("spam spam spam spam spam spam"));
        assert!(!c.is_repetitive("the quick brown fox jumps over"));
        // five words is not enough
        assert!(!c.is_repetitive("spam spam spam spam spam"));
    }
}
