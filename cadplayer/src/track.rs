//! Track and playlist data model.

use std::time::Duration;

use serde::Serialize;

use crate::{Error, Result};

/// An immutable catalogue entry.
///
/// Identity is the URI; every other field is denormalized metadata that the
/// daemon may or may not know. Missing fields are back-filled with
/// [`Track::interpolate_missing_fields`] before a track is handed out.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Track {
    /// Opaque identifier, globally unique within the daemon's namespace.
    pub uri: String,
    pub artist: String,
    pub title: String,
    pub genre: String,
    pub album: String,
    pub album_artist: String,
    pub album_disc: String,
    pub album_track: String,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    pub has_art: bool,
}

impl Track {
    /// Returns the named string property, if it exists.
    ///
    /// Property names match the serialized field names; used by search
    /// filters to address fields generically.
    pub fn property(&self, name: &str) -> Option<&str> {
        match name {
            "uri" => Some(&self.uri),
            "artist" => Some(&self.artist),
            "title" => Some(&self.title),
            "genre" => Some(&self.genre),
            "album" => Some(&self.album),
            "album_artist" => Some(&self.album_artist),
            "album_disc" => Some(&self.album_disc),
            "album_track" => Some(&self.album_track),
            _ => None,
        }
    }

    /// Fills in fields that the daemon left empty with values derived from
    /// the ones that are present.
    ///
    /// Currently only the title is derived: the URI basename without its
    /// extension, with underscores replaced by spaces. Daemon-provided
    /// values are never overwritten.
    pub fn interpolate_missing_fields(&mut self) {
        if self.title.is_empty() {
            let basename = self.uri.rsplit('/').next().unwrap_or(&self.uri);
            let stem = match basename.rfind('.') {
                Some(i) if i > 0 => &basename[..i],
                _ => basename,
            };
            self.title = stem.replace('_', " ");
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
}

/// A queue entry: a track reference plus session metadata.
///
/// Owned exclusively by the sync loop; callers always receive clones.
/// `progress` is only meaningful for the head of the playlist.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PlaylistTrack {
    pub uri: String,
    /// Who queued this track. `"user"` for manual additions, `"system"` for
    /// tracks queued automatically.
    pub queued_by: String,
    #[serde(with = "duration_secs")]
    pub progress: Duration,
}

impl PlaylistTrack {
    pub fn new(uri: impl Into<String>) -> Self {
        PlaylistTrack {
            uri: uri.into(),
            queued_by: "user".to_string(),
            progress: Duration::ZERO,
        }
    }

    pub fn queued_by(mut self, who: impl Into<String>) -> Self {
        self.queued_by = who.into();
        self
    }
}

/// High-level playback state of the daemon.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayState {
    Playing,
    Paused,
    Stopped,
}

impl PlayState {
    /// Maps the daemon's state notation (`play`/`pause`/`stop`) to a
    /// logical state. Unknown strings are a protocol error, not a panic.
    pub fn from_daemon_state(raw: &str) -> Result<Self> {
        match raw {
            "play" => Ok(PlayState::Playing),
            "pause" => Ok(PlayState::Paused),
            "stop" => Ok(PlayState::Stopped),
            other => Err(Error::Protocol(format!("unknown play state {other:?}"))),
        }
    }

    /// Returns a human-readable label for the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayState::Playing => "playing",
            PlayState::Paused => "paused",
            PlayState::Stopped => "stopped",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolate_title_from_uri() {
        let mut track = Track {
            uri: "mpd://music/Some_Artist/Some_Title.ogg".to_string(),
            ..Default::default()
        };
        track.interpolate_missing_fields();
        assert_eq!(track.title, "Some Title");
    }

    #[test]
    fn test_interpolate_keeps_existing_title() {
        let mut track = Track {
            uri: "mpd://music/foo.ogg".to_string(),
            title: "Foo".to_string(),
            ..Default::default()
        };
        track.interpolate_missing_fields();
        assert_eq!(track.title, "Foo");
    }

    #[test]
    fn test_interpolate_uri_without_extension() {
        let mut track = Track {
            uri: "http://radio.example.com/stream".to_string(),
            ..Default::default()
        };
        track.interpolate_missing_fields();
        assert_eq!(track.title, "stream");
    }

    #[test]
    fn test_play_state_round_trip() {
        assert_eq!(
            PlayState::from_daemon_state("play").unwrap(),
            PlayState::Playing
        );
        assert_eq!(
            PlayState::from_daemon_state("pause").unwrap(),
            PlayState::Paused
        );
        assert_eq!(
            PlayState::from_daemon_state("stop").unwrap(),
            PlayState::Stopped
        );
        assert!(PlayState::from_daemon_state("rewind").is_err());
    }
}
