use crate::{backend::PageTextMap, config::CleaningConfig};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use unicode_normalization::{
    char::{decompose_compatible, is_combining_mark},
    UnicodeNormalization,
};

#[derive(Debug, Error)]
#[error("invalid header/footer pattern {pattern:?}: {source}")]
pub struct CleanError {
    pattern: String,
    #[source]
    source: regex::Error,
}

/// Text normalization for extracted page text.
///
/// `clean_text` runs the four stages in a fixed order; each stage is public
/// so a consumer can skip any of them.
#[derive(Debug, Clone)]
pub struct Cleaner {
    allowed_punctuation: HashSet<char>,
    page_markers: Vec<Regex>,
    remove_repeated_lines: bool,
    repeated_line_min_occurrences: u32,
    repeated_line_max_length: u32,
}

impl Cleaner {
    pub fn new(cfg: &CleaningConfig) -> Result<Self, CleanError> {
        let page_markers = cfg
            .page_marker_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|source| CleanError {
                    pattern: p.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            allowed_punctuation: cfg.allowed_punctuation.chars().collect(),
            page_markers,
            remove_repeated_lines: cfg.remove_repeated_lines,
            repeated_line_min_occurrences: cfg.repeated_line_min_occurrences,
            repeated_line_max_length: cfg.repeated_line_max_length,
        })
    }

    /// Whitespace collapse, special-character removal, header/footer removal,
    /// then case and unicode normalization.
    pub fn clean_text(&self, text: &str) -> String {
        let text = self.remove_extra_whitespace(text);
        let text = self.remove_special_characters(&text);
        let text = self.remove_headers_footers(&text);
        self.normalize_text(&text)
    }

    /// Every run of whitespace becomes one space; the ends are trimmed.
    pub fn remove_extra_whitespace(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for word in text.split_whitespace() {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(word);
        }
        out
    }

    /// Drop characters outside the allow-set. Whitespace that only separated
    /// a dropped character from its neighbours goes with it, so no doubled or
    /// dangling separators are left behind.
    pub fn remove_special_characters(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut dropped = false;
        for ch in text.chars() {
            if ch.is_whitespace() {
                if dropped && out.chars().next_back().is_none_or(char::is_whitespace) {
                    continue;
                }
                out.push(ch);
            } else if self.is_allowed(ch) {
                out.push(ch);
                dropped = false;
            } else {
                dropped = true;
            }
        }
        if dropped {
            let kept = out.trim_end().len();
            out.truncate(kept);
        }
        out
    }

    /// A character survives only if its whole compatibility decomposition
    /// does, so later normalization cannot introduce disallowed characters.
    fn is_allowed(&self, ch: char) -> bool {
        let mut ok = true;
        decompose_compatible(ch, |d| {
            ok &= d.is_alphanumeric()
                || is_combining_mark(d)
                || self.allowed_punctuation.contains(&d);
        });
        ok
    }

    /// Drop lines that are only a page marker. Lines are compared after
    /// trimming and compatibility folding; body lines that merely contain
    /// numbers are kept.
    pub fn remove_headers_footers(&self, text: &str) -> String {
        text.split('\n')
            .filter(|line| !self.is_page_marker(line))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn is_page_marker(&self, line: &str) -> bool {
        let folded: String = line.trim().nfkd().collect();
        let folded = folded.trim();
        !folded.is_empty() && self.page_markers.iter().any(|r| r.is_match(folded))
    }

    /// NFKD, lowercase, NFKD. Lowercasing can expose new decompositions, so
    /// the second pass keeps the result a fixed point.
    pub fn normalize_text(&self, text: &str) -> String {
        let decomposed: String = text.nfkd().collect();
        decomposed.to_lowercase().nfkd().collect()
    }

    /// Drop running headers/footers: short lines that recur on at least
    /// `repeated_line_min_occurrences` pages. Page keys are preserved.
    pub fn remove_repeated_lines(&self, pages: &PageTextMap) -> PageTextMap {
        let min = self.repeated_line_min_occurrences;
        if min == 0 || (pages.len() as u32) < min {
            return pages.clone();
        }

        let mut counts: HashMap<&str, u32> = HashMap::new();
        for text in pages.values() {
            let mut seen = HashSet::new();
            for l in text.lines() {
                let l = l.trim();
                if l.is_empty() || l.len() > self.repeated_line_max_length as usize {
                    continue;
                }
                if seen.insert(l) {
                    *counts.entry(l).or_insert(0) += 1;
                }
            }
        }

        pages
            .iter()
            .map(|(&page, text)| {
                let kept = text
                    .lines()
                    .filter(|l| {
                        let l = l.trim();
                        l.is_empty() || counts.get(l).copied().unwrap_or(0) < min
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                (page, kept)
            })
            .collect()
    }

    /// Clean every page independently, running the repeated-line filter
    /// first when enabled. Every input page key is present in the output.
    pub fn clean_pages(&self, pages: &PageTextMap) -> PageTextMap {
        let filtered;
        let pages = if self.remove_repeated_lines {
            filtered = self.remove_repeated_lines(pages);
            &filtered
        } else {
            pages
        };
        pages
            .iter()
            .map(|(&page, text)| (page, self.clean_text(&self.remove_headers_footers(text))))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cleaner() -> Cleaner {
        Cleaner::new(&CleaningConfig::default()).unwrap()
    }

    #[test]
    fn hello_world_scenario() {
        assert_eq!(cleaner().clean_text("Hello   World\n\n"), "hello world");
    }

    #[test]
    fn empty_and_blank_inputs() {
        let c = cleaner();
        assert_eq!(c.clean_text(""), "");
        assert_eq!(c.clean_text(" \t\n\r\u{2003} "), "");
        assert_eq!(c.clean_text("\u{0001}\u{0002} \u{007f}\n"), "");
    }

    #[test]
    fn special_characters_leave_no_double_spaces() {
        let c = cleaner();
        assert_eq!(c.remove_special_characters("a $ b"), "a b");
        assert_eq!(c.remove_special_characters("$$ a"), "a");
        assert_eq!(c.remove_special_characters("a ###"), "a");
        assert_eq!(c.remove_special_characters("price: 5$, ok!"), "price: 5, ok!");
    }

    #[test]
    fn special_characters_keep_line_structure() {
        let c = cleaner();
        assert_eq!(c.remove_special_characters("one\n\ntwo"), "one\n\ntwo");
    }

    #[test]
    fn allow_set_is_configurable() {
        let cfg = CleaningConfig {
            allowed_punctuation: "$".into(),
            ..Default::default()
        };
        let c = Cleaner::new(&cfg).unwrap();
        assert_eq!(c.remove_special_characters("cost $5."), "cost $5");
    }

    #[test]
    fn fractions_with_disallowed_decomposition_are_dropped() {
        assert_eq!(cleaner().remove_special_characters("1½ cups"), "1 cups");
    }

    #[test]
    fn headers_and_footers() {
        let c = cleaner();
        let text = "Introduction\n12\nPage 3 of 10\nWe measured 12 samples in 2024.\n- 4 -\n";
        assert_eq!(
            c.remove_headers_footers(text),
            "Introduction\nWe measured 12 samples in 2024.\n"
        );
    }

    #[test]
    fn headers_keep_numbered_body_lines() {
        let c = cleaner();
        let text = "3 apples and 4 pears\nChapter 2\n2.5";
        assert_eq!(c.remove_headers_footers(text), text);
    }

    #[test]
    fn normalization_is_round_trip_safe() {
        let c = cleaner();
        let once = c.normalize_text("Ｃafé ǅ ΣΑΣ");
        assert_eq!(c.normalize_text(&once), once);
        assert_eq!(c.normalize_text("already clean text"), "already clean text");
    }

    #[test]
    fn clean_text_is_idempotent() {
        let c = cleaner();
        let samples = [
            "Hello   World\n\n",
            "  PAGE 1\n\n This    is   a    SAMPLE   text!!!\n $$$ With special ### characters ###\n",
            "Ünïcödé — “quotes” and ﬁligree ½ ①",
            "a $ b $ c",
            "12",
            "①",
            "ﷺ then text",
            "Tab\tseparated\u{00a0}values, İstanbul.",
        ];
        for s in samples {
            let once = c.clean_text(s);
            assert_eq!(c.clean_text(&once), once, "input {s:?}");
        }
    }

    #[test]
    fn repeated_lines_across_pages_are_dropped() {
        let c = cleaner();
        let mut pages = PageTextMap::new();
        pages.insert(1, "ACME CONFIDENTIAL\nHello".into());
        pages.insert(2, "ACME CONFIDENTIAL\nWorld".into());
        pages.insert(3, "ACME CONFIDENTIAL\nAgain".into());
        pages.insert(4, String::new());

        let out = c.remove_repeated_lines(&pages);
        assert_eq!(out.len(), 4);
        assert!(out.values().all(|t| !t.contains("ACME")));
        assert_eq!(out[&2], "World");
        assert_eq!(out[&4], "");
    }

    #[test]
    fn clean_pages_keeps_every_page() {
        let c = cleaner();
        let mut pages = PageTextMap::new();
        pages.insert(1, "Title Page\n1".into());
        pages.insert(2, String::new());
        let out = c.clean_pages(&pages);
        assert_eq!(out.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(out[&1], "title page");
        assert_eq!(out[&2], "");
    }

    #[test]
    fn long_input_completes() {
        let c = cleaner();
        let big = "Lorem ipsum   dolor sit amet, 42.\n".repeat(100_000);
        let out = c.clean_text(&big);
        assert!(out.len() <= big.len());
        assert!(out.starts_with("lorem ipsum dolor sit amet, 42."));
    }
}
