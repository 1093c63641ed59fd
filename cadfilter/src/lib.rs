//! # cadfilter - track filtering and search
//!
//! Applies a predicate to every track of a catalogue with bounded
//! parallelism and collects the matches, optionally ranked by how often
//! they matched.
//!
//! # Architecture
//!
//! - **Filter** : the predicate trait, also implemented by plain closures
//! - **SearchResult** : a matched track plus per-property match offsets
//! - **filter_tracks** : fan-out/fan-in engine over a worker pool
//! - **Keyword** : case-insensitive multi-word substring search

mod engine;
mod keyword;

use std::collections::HashMap;

use cadplayer::Track;
use serde::Serialize;

pub use engine::{filter_tracks, filter_tracks_with_workers};
pub use keyword::Keyword;

/// A filter decides for each track whether it is kept and, if so, which
/// parts of which properties matched.
pub trait Filter: Sync {
    /// Returns the match for `track`, or `None` when the track is rejected.
    fn filter(&self, track: &Track) -> Option<SearchResult>;
}

/// Plain functions and closures are filters too.
impl<F> Filter for F
where
    F: Fn(&Track) -> Option<SearchResult> + Sync,
{
    fn filter(&self, track: &Track) -> Option<SearchResult> {
        self(track)
    }
}

/// Start and end byte offsets of a match inside a property value, usable
/// for highlighting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct SearchMatch {
    pub start: usize,
    pub end: usize,
}

/// A track that passed a filter, along with what was matched where.
#[derive(Clone, Debug, Serialize)]
pub struct SearchResult {
    #[serde(flatten)]
    pub track: Track,
    /// Matched property name to the ordered list of offset pairs.
    pub matches: HashMap<String, Vec<SearchMatch>>,
    /// Slot of the track in the catalogue that was filtered. Used as the
    /// tie breaker when ranking; filled in by the engine.
    #[serde(skip)]
    index: usize,
}

impl SearchResult {
    pub fn new(track: Track) -> Self {
        SearchResult {
            track,
            matches: HashMap::new(),
            index: 0,
        }
    }

    pub(crate) fn set_index(&mut self, index: usize) {
        self.index = index;
    }

    /// Marks a portion of the named property value as matched. Multiple,
    /// possibly overlapping matches may be added per property.
    pub fn add_match(&mut self, property: impl Into<String>, start: usize, end: usize) {
        self.matches
            .entry(property.into())
            .or_default()
            .push(SearchMatch { start, end });
    }

    /// Total number of matches across all properties.
    pub fn num_matches(&self) -> usize {
        self.matches.values().map(Vec::len).sum()
    }
}

/// Ranks results by descending total match count; ties keep the original
/// catalogue order regardless of the order workers produced them in.
pub fn sort_by_match_count(results: &mut [SearchResult]) {
    results.sort_by_key(|result| (std::cmp::Reverse(result.num_matches()), result.index));
}
