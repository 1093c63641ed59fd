//! Read-through track catalogue cache.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::events::{EventBus, PlayerEvent};
use crate::player::Player;
use crate::track::Track;
use crate::{Error, Result};

/// List + index pair, replaced atomically on every reload.
///
/// The index maps a URI to its slot in `tracks`; both are discarded together,
/// so readers holding the shared lock always see a consistent pair.
#[derive(Default)]
struct CacheState {
    tracks: Option<Vec<Track>>,
    index: HashMap<String, usize>,
    err: Option<Error>,
}

/// A lazily populated cache of the full catalogue, indexed by track URI.
///
/// Sits in front of a [`Player`] backend. The catalogue is loaded on first
/// access and invalidated whenever the backend reports a catalogue change;
/// [`TrackCache::run`] must be driven on its own thread for invalidation and
/// event forwarding to happen.
pub struct TrackCache {
    player: Arc<dyn Player>,
    bus: EventBus,
    state: RwLock<CacheState>,
}

impl TrackCache {
    pub fn new(player: Arc<dyn Player>) -> Self {
        TrackCache {
            player,
            bus: EventBus::new(),
            state: RwLock::new(CacheState::default()),
        }
    }

    /// The full catalogue, loaded from the backend on first access or after
    /// an invalidation.
    ///
    /// Concurrent cold readers serialize on the write lock and the first one
    /// performs the single reload; a stored reload failure is returned to
    /// every reader until the next successful reload.
    pub fn tracks(&self) -> Result<Vec<Track>> {
        {
            let state = self.state.read().unwrap();
            if let Some(err) = &state.err {
                return Err(err.clone());
            }
            if let Some(tracks) = &state.tracks {
                return Ok(tracks.clone());
            }
        }

        let mut state = self.state.write().unwrap();
        // Someone else may have reloaded while we waited for the lock.
        if state.tracks.is_none() && state.err.is_none() {
            self.reload(&mut state);
        }
        match (&state.err, &state.tracks) {
            (Some(err), _) => Err(err.clone()),
            (None, Some(tracks)) => Ok(tracks.clone()),
            (None, None) => unreachable!("reload leaves either tracks or an error"),
        }
    }

    /// Resolves each URI against the index, falling back to a direct backend
    /// query for URIs absent from the catalogue (e.g. freshly queued network
    /// streams). Unknown URIs are omitted, matching [`Player::track_info`].
    pub fn track_info(&self, uris: &[String]) -> Result<Vec<Track>> {
        // Make sure the catalogue is loaded first.
        self.tracks()?;

        let state = self.state.read().unwrap();
        let cached = state
            .tracks
            .as_ref()
            .ok_or_else(|| Error::State("catalogue disappeared mid-lookup".to_string()))?;

        let mut results = Vec::with_capacity(uris.len());
        for uri in uris {
            match state.index.get(uri) {
                Some(&slot) => results.push(cached[slot].clone()),
                None => {
                    debug!(uri, "cache miss, querying backend directly");
                    results.extend(self.player.track_info(std::slice::from_ref(uri))?);
                }
            }
        }
        Ok(results)
    }

    /// Events re-published by the cache: everything the backend emits, with
    /// `Tracks` delayed until the reload it triggered has completed.
    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    /// Consumes the backend's event stream until the backend is dropped.
    ///
    /// `Tracks` invalidates and reloads the catalogue before being forwarded;
    /// every other event is forwarded unchanged.
    pub fn run(&self) {
        let listener = self.player.events().listen();
        while let Ok(event) = listener.recv() {
            if event == PlayerEvent::Tracks {
                let mut state = self.state.write().unwrap();
                self.reload(&mut state);
            }
            self.bus.emit(event);
        }
        self.player.events().unlisten(&listener);
    }

    fn reload(&self, state: &mut CacheState) {
        match self.player.tracks() {
            Ok(tracks) => {
                let index = tracks
                    .iter()
                    .enumerate()
                    .map(|(i, track)| (track.uri.clone(), i))
                    .collect();
                state.tracks = Some(tracks);
                state.index = index;
                state.err = None;
            }
            Err(err) => {
                warn!(%err, "catalogue reload failed");
                state.tracks = None;
                state.index = HashMap::new();
                state.err = Some(err);
            }
        }
    }
}
