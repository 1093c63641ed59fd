//! Playlist reconciliation helpers.

use crate::track::PlaylistTrack;

/// Merges the daemon's queue order with locally held per-track metadata.
///
/// The remote URI sequence is authoritative for which tracks appear and in
/// what order; `queued_by` and `progress` are annotations owned locally and
/// carried over by matching URI. Metadata of URIs no longer present is
/// dropped, new URIs get default metadata.
///
/// Duplicate URIs: first remaining slot wins. Every old entry is consumed at
/// most once, so the n-th occurrence of a URI in the new queue picks up the
/// n-th unconsumed old entry with that URI.
pub fn merge_playlist_meta(old: &[PlaylistTrack], new_uris: &[String]) -> Vec<PlaylistTrack> {
    let mut consumed = vec![false; old.len()];
    new_uris
        .iter()
        .map(|uri| {
            let slot = old
                .iter()
                .enumerate()
                .find(|(i, entry)| !consumed[*i] && entry.uri == *uri);
            match slot {
                Some((i, entry)) => {
                    consumed[i] = true;
                    entry.clone()
                }
                None => PlaylistTrack::new(uri.clone()),
            }
        })
        .collect()
}
