//! Fan-out/fan-in filtering over a bounded worker pool.

use std::thread;

use cadplayer::Track;
use crossbeam_channel::bounded;

use crate::{Filter, SearchResult};

/// Keeps the producer ahead of the workers without buffering the whole
/// catalogue.
const WORK_QUEUE_CAPACITY: usize = 64;

/// Applies `filter` to every track, using one worker per available core.
///
/// The result order is unspecified; use [`crate::sort_by_match_count`] to fix
/// it.
pub fn filter_tracks<F: Filter>(filter: &F, tracks: &[Track]) -> Vec<SearchResult> {
    let workers = thread::available_parallelism().map_or(1, |n| n.get());
    filter_tracks_with_workers(filter, tracks, workers)
}

/// Like [`filter_tracks`] with an explicit worker count.
///
/// The result set is identical for any worker count; only the ordering
/// differs.
pub fn filter_tracks_with_workers<F: Filter>(
    filter: &F,
    tracks: &[Track],
    workers: usize,
) -> Vec<SearchResult> {
    let workers = workers.max(1);
    let (work_tx, work_rx) = bounded::<(usize, &Track)>(WORK_QUEUE_CAPACITY);
    let (result_tx, result_rx) = bounded::<SearchResult>(WORK_QUEUE_CAPACITY);

    let mut results = Vec::new();
    thread::scope(|scope| {
        for _ in 0..workers {
            let work_rx = work_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                for (index, track) in work_rx {
                    if let Some(mut result) = filter.filter(track) {
                        result.set_index(index);
                        if result_tx.send(result).is_err() {
                            return;
                        }
                    }
                }
            });
        }
        // The scope now owns every worker's clone; dropping ours lets the
        // result channel close once all workers are done.
        drop(work_rx);
        drop(result_tx);

        scope.spawn(move || {
            for entry in tracks.iter().enumerate() {
                if work_tx.send(entry).is_err() {
                    return;
                }
            }
        });

        results.extend(result_rx);
    });
    results
}
