//! The backend capability trait.

use std::time::Duration;

use crate::events::EventBus;
use crate::track::{PlayState, PlaylistTrack, Track};
use crate::Result;

/// Artwork attached to a track.
#[derive(Clone, Debug)]
pub struct TrackArt {
    pub data: Vec<u8>,
    pub mime: String,
}

/// Capability interface implemented by every player backend.
///
/// The sync core and the caches depend only on this trait, never on a
/// concrete backend. All methods take `&self`:
/// backends are shared across threads behind an `Arc<dyn Player>` and do
/// their own internal locking.
pub trait Player: Send + Sync {
    /// The full track catalogue known to the daemon.
    fn tracks(&self) -> Result<Vec<Track>>;

    /// Resolves metadata for the given URIs. URIs unknown to the daemon are
    /// omitted from the result.
    fn track_info(&self, uris: &[String]) -> Result<Vec<Track>>;

    /// A snapshot of the current playlist. The head entry carries live
    /// playback progress.
    fn playlist(&self) -> Result<Vec<PlaylistTrack>>;

    /// Replaces the daemon's queue with the given playlist.
    fn set_playlist(&self, playlist: Vec<PlaylistTrack>) -> Result<()>;

    /// Seeks within the currently playing track. A no-op when nothing is
    /// playing.
    fn seek(&self, progress: Duration) -> Result<()>;

    fn state(&self) -> Result<PlayState>;

    fn set_state(&self, state: PlayState) -> Result<()>;

    /// Current volume in `[0, 1]`.
    fn volume(&self) -> Result<f32>;

    /// Sets the volume; values outside `[0, 1]` are clamped.
    fn set_volume(&self, volume: f32) -> Result<()>;

    /// Whether the daemon currently responds to commands.
    fn available(&self) -> bool;

    /// Artwork for the given track, if any is stored.
    fn track_art(&self, uri: &str) -> Result<Option<TrackArt>>;

    /// The bus this backend publishes its events on.
    fn events(&self) -> &EventBus;
}
