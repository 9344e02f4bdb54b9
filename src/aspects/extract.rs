//! Derives candidate aspect values from raw search results.
//!
//! Structured item aspects and free-text title matches are tallied
//! separately; how much each signal is worth is decided by the resolver.

use crate::aspects::catalog;
use crate::ebay::{AspectDistribution, ItemAspect, RawItem};
use crate::models::{Aspect, MIN_MODEL_YEAR, normalize_part};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

static YEAR_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{4})\b").expect("static regex"));

/// Where one item's evidence for an aspect comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionSource<'a> {
    Structured(&'a [ItemAspect]),
    TitleText(&'a str),
}

impl<'a> ExtractionSource<'a> {
    /// Structured fields win when the item carries the aspect at all.
    pub fn for_item(item: &'a RawItem, aspect: Aspect) -> Self {
        if item
            .structured_attributes
            .iter()
            .any(|attr| aspect.matches_name(&attr.name))
        {
            ExtractionSource::Structured(&item.structured_attributes)
        } else {
            ExtractionSource::TitleText(&item.title)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Hits {
    pub structured: u32,
    pub title: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TallyEntry {
    pub display: String,
    pub hits: Hits,
}

/// Distinct value → hit counts, keyed by normalized value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AspectTally {
    entries: BTreeMap<String, TallyEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HitKind {
    Structured,
    Title,
}

impl AspectTally {
    fn record(&mut self, value: &str, kind: HitKind, amount: u32) {
        let display = value.trim();
        let key = normalize_part(display);
        if key.is_empty() {
            return;
        }
        let entry = self.entries.entry(key).or_insert_with(|| TallyEntry {
            display: display.to_string(),
            hits: Hits::default(),
        });
        match kind {
            HitKind::Structured => entry.hits.structured += amount,
            HitKind::Title => entry.hits.title += amount,
        }
    }

    pub fn absorb(&mut self, other: AspectTally) {
        for (key, incoming) in other.entries {
            match self.entries.get_mut(&key) {
                Some(existing) => {
                    existing.hits.structured += incoming.hits.structured;
                    existing.hits.title += incoming.hits.title;
                }
                None => {
                    self.entries.insert(key, incoming);
                }
            }
        }
    }

    pub fn get(&self, value: &str) -> Option<&TallyEntry> {
        self.entries.get(&normalize_part(value))
    }

    pub fn entries(&self) -> impl Iterator<Item = &TallyEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Context for reading titles.
#[derive(Debug, Clone, Copy)]
pub struct TitleHints<'a> {
    /// Make the search was scoped to; needed to read models out of titles.
    pub make: Option<&'a str>,
    pub current_year: i32,
}

pub fn extract(items: &[RawItem], aspect: Aspect, hints: &TitleHints<'_>) -> AspectTally {
    let mut tally = AspectTally::default();
    for item in items {
        match ExtractionSource::for_item(item, aspect) {
            ExtractionSource::Structured(fields) => {
                for field in fields.iter().filter(|f| aspect.matches_name(&f.name)) {
                    if aspect != Aspect::Year || valid_year(&field.value, hints.current_year) {
                        tally.record(&field.value, HitKind::Structured, 1);
                    }
                }
            }
            ExtractionSource::TitleText(title) => {
                let found = match aspect {
                    Aspect::Year => year_from_title(title, hints.current_year),
                    Aspect::Make => make_from_title(title),
                    Aspect::Model => hints.make.and_then(|make| model_from_title(title, make)),
                };
                if let Some(value) = found {
                    tally.record(&value, HitKind::Title, 1);
                }
            }
        }
    }
    tally
}

/// Marketplace refinement histograms count as structured signal; zero
/// counts are kept so the resolver can see "known, no inventory".
pub fn extract_distributions(distributions: &[AspectDistribution], aspect: Aspect) -> AspectTally {
    let mut tally = AspectTally::default();
    for distribution in distributions.iter().filter(|d| aspect.matches_name(&d.name)) {
        for (value, count) in &distribution.values {
            tally.record(value, HitKind::Structured, *count);
        }
    }
    tally
}

fn valid_year(raw: &str, current_year: i32) -> bool {
    raw.trim()
        .parse::<i32>()
        .map(|year| (MIN_MODEL_YEAR..=current_year + 1).contains(&year))
        .unwrap_or(false)
}

pub fn year_from_title(title: &str, current_year: i32) -> Option<String> {
    YEAR_TOKEN
        .captures_iter(title)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .find(|token| valid_year(token, current_year))
        .map(str::to_string)
}

/// Lowercased words with punctuation other than `-` and `&` stripped.
fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '&'))
        .map(|w| w.trim_matches('-').to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Position of `phrase` as a whole-word run inside `haystack`.
fn find_phrase(haystack: &[String], phrase: &str) -> Option<(usize, usize)> {
    let needle = words(phrase);
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle.as_slice())
        .map(|start| (start, needle.len()))
}

/// Earliest known make (or alias) in the title; longer names win ties.
pub fn make_from_title(title: &str) -> Option<String> {
    let haystack = words(title);
    let aliases = catalog::make_aliases().iter().map(|(alias, name)| (*alias, *name));
    catalog::known_makes()
        .map(|name| (name, name))
        .chain(aliases)
        .filter_map(|(needle, name)| {
            find_phrase(&haystack, needle).map(|(start, len)| (start, std::cmp::Reverse(len), name))
        })
        .min()
        .map(|(_, _, name)| name.to_string())
}

/// Known model of `make` in the title, else the word right after the make
/// (skipping a year token).
pub fn model_from_title(title: &str, make: &str) -> Option<String> {
    let haystack = words(title);
    let known = catalog::known_models(make)
        .iter()
        .filter_map(|model| {
            find_phrase(&haystack, model).map(|(start, len)| (start, std::cmp::Reverse(len), *model))
        })
        .min()
        .map(|(_, _, model)| model.to_string());
    if known.is_some() {
        return known;
    }

    let canonical = catalog::canonical_make(make).unwrap_or(make);
    let mut spellings = vec![make.to_string(), canonical.to_string()];
    spellings.extend(
        catalog::make_aliases()
            .iter()
            .filter(|(_, name)| *name == canonical)
            .map(|(alias, _)| alias.to_string()),
    );
    let (start, len) = spellings
        .iter()
        .filter_map(|spelling| find_phrase(&haystack, spelling))
        .min()?;

    let original: Vec<&str> = title
        .split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '&'))
        .map(|w| w.trim_matches('-'))
        .filter(|w| !w.is_empty())
        .collect();
    original
        .iter()
        .skip(start + len)
        .find(|token| !(token.len() == 4 && token.chars().all(|c| c.is_ascii_digit())))
        .filter(|token| token.chars().count() >= 2)
        .map(|token| token.to_string())
}
