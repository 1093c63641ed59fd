//! Case-insensitive multi-word substring search.

use cadplayer::Track;

use crate::{Filter, SearchResult};

/// The string properties searched when none are configured explicitly.
const DEFAULT_PROPERTIES: &[&str] = &["artist", "title", "album", "album_artist", "genre"];

/// Matches tracks whose properties contain every word of a query.
///
/// Matching is case-insensitive (ASCII) substring search; every occurrence
/// of every word is recorded with its byte offsets so the UI can highlight
/// them. A track is kept only when each query word matches at least one of
/// the searched properties.
pub struct Keyword {
    words: Vec<String>,
    properties: Vec<String>,
}

impl Keyword {
    /// Builds a filter from a whitespace-separated query over the default
    /// property set.
    pub fn new(query: &str) -> Self {
        Keyword {
            words: query
                .split_whitespace()
                .map(|w| w.to_ascii_lowercase())
                .collect(),
            properties: DEFAULT_PROPERTIES.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Restricts the search to the given properties.
    pub fn with_properties(mut self, properties: &[&str]) -> Self {
        self.properties = properties.iter().map(|p| p.to_string()).collect();
        self
    }
}

impl Filter for Keyword {
    fn filter(&self, track: &Track) -> Option<SearchResult> {
        if self.words.is_empty() {
            return None;
        }

        let mut result = SearchResult::new(track.clone());
        for word in &self.words {
            let mut word_matched = false;
            for property in &self.properties {
                let Some(value) = track.property(property) else {
                    continue;
                };
                for m in find_occurrences(value, word) {
                    result.add_match(property.clone(), m.0, m.1);
                    word_matched = true;
                }
            }
            if !word_matched {
                return None;
            }
        }
        Some(result)
    }
}

/// All non-overlapping occurrences of `word` (already lowercased) in
/// `value`, compared ASCII case-insensitively.
fn find_occurrences(value: &str, word: &str) -> Vec<(usize, usize)> {
    let haystack = value.to_ascii_lowercase();
    let mut occurrences = Vec::new();
    let mut from = 0;
    while let Some(pos) = haystack[from..].find(word) {
        let start = from + pos;
        occurrences.push((start, start + word.len()));
        from = start + word.len();
    }
    occurrences
}
