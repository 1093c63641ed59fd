//! # cadplayer - backend-agnostic player abstraction
//!
//! This crate defines everything the rest of Cadenza needs to talk about a
//! remote player without knowing which daemon is behind it:
//! - the track and playlist data model,
//! - the `Player` capability trait implemented by each backend,
//! - the event bus used to fan player events out to subscribers,
//! - the read-through `TrackCache` sitting in front of a backend,
//! - the playlist metadata merge used during reconciliation.
//!
//! # Architecture
//!
//! - **Player** : object-safe trait, one implementation per daemon protocol
//! - **EventBus / Listener** : pub/sub with per-subscriber bounded queues
//! - **TrackCache** : lazily loaded catalogue, invalidated on `Tracks` events
//! - **merge_playlist_meta** : remote order wins, local annotations carry over

mod cache;
mod error;
mod events;
mod player;
mod playlist;
mod track;

pub use cache::TrackCache;
pub use error::{Error, Result};
pub use events::{EventBus, Listener, PlayerEvent, Subsystem};
pub use player::{Player, TrackArt};
pub use playlist::merge_playlist_meta;
pub use track::{PlayState, PlaylistTrack, Track};
