//! The MPD player: the sync loop and the [`Player`] implementation.
//!
//! The sync loop is the single consumer of the event bus. It owns the local
//! playlist mirror and reconciles it against the daemon's queue whenever the
//! watcher reports a change; local state always converges to the daemon's,
//! transient divergence included. Protocol errors during an iteration are
//! logged and the loop moves on; the next notification re-triggers
//! reconciliation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::{debug, error};

use cadplayer::{
    Error, EventBus, PlayState, Player, PlayerEvent, PlaylistTrack, Result, Subsystem, Track,
    TrackArt, merge_playlist_meta,
};

use crate::config::DaemonConfig;
use crate::pool::ConnectionPool;
use crate::proto::{Client, Record, URI_SCHEMA, daemon_to_uri, uri_to_daemon};
use crate::watch::{WatcherSocket, spawn_watcher};

/// A player backed by a Music Player Daemon instance.
pub struct MpdPlayer {
    pool: ConnectionPool,
    bus: EventBus,
    /// Local mirror of the daemon's queue.
    ///
    /// Never locked from inside a `with_client` closure: playlist operations
    /// nest pool operations, never the other way around.
    playlist: Mutex<Vec<PlaylistTrack>>,
    /// Head URI observed by the last transition; play counts only move when
    /// this actually changes, so repeated notifications with the same head
    /// never double-count.
    last_track: Mutex<Option<String>>,
    /// The daemon sometimes reports a negative volume when nothing is
    /// playing; fall back to the last value we set.
    last_volume: Mutex<f32>,
    shutdown: Arc<AtomicBool>,
    /// Handle to the watcher's connection, closed on drop to unpark the
    /// watcher from its blocking `idle` read.
    watch_socket: WatcherSocket,
}

impl MpdPlayer {
    /// Connects to the daemon, fills the connection pool, and starts the
    /// watcher and sync loop threads.
    pub fn connect(config: &DaemonConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let pool = ConnectionPool::connect(
            &config.address(),
            config.password.as_deref(),
            config.pool_size,
        )?;

        let player = Arc::new(MpdPlayer {
            pool,
            bus: EventBus::new(),
            playlist: Mutex::new(Vec::new()),
            last_track: Mutex::new(None),
            last_volume: Mutex::new(1.0),
            shutdown: Arc::new(AtomicBool::new(false)),
            watch_socket: WatcherSocket::default(),
        });

        spawn_watcher(
            config.address(),
            config.password.clone(),
            player.bus.clone(),
            Arc::clone(&player.shutdown),
            Arc::clone(&player.watch_socket),
        )?;
        spawn_sync_loop(&player)?;
        Ok(player)
    }

    fn handle_event(&self, event: PlayerEvent) {
        let outcome = match event {
            PlayerEvent::Daemon(Subsystem::Player) => {
                self.bus.emit(PlayerEvent::PlayState);
                self.bus.emit(PlayerEvent::Progress);
                // A play/pause/track change can also mean the head moved on.
                self.reconcile_playlist()
            }
            PlayerEvent::Daemon(Subsystem::Queue) => self.reconcile_playlist(),
            PlayerEvent::Playlist => self.observe_head_transition(),
            PlayerEvent::Daemon(Subsystem::Mixer) => {
                self.bus.emit(PlayerEvent::Volume);
                Ok(())
            }
            PlayerEvent::Daemon(Subsystem::Update) => self.emit_tracks_after_update(),
            _ => Ok(()),
        };
        if let Err(err) = outcome {
            error!(?event, %err, "sync iteration failed, waiting for the next notification");
        }
    }

    /// Brings the local playlist mirror in line with the daemon's queue.
    ///
    /// Holds the playlist lock for the whole reconciliation so no second
    /// reconciliation can interleave with a partial write.
    fn reconcile_playlist(&self) -> Result<()> {
        let mut playlist = self.playlist.lock().unwrap();
        let merged = self.pool.with_client(|client| {
            let remote = queue_uris(client)?;
            let in_sync = remote.len() == playlist.len()
                && remote
                    .iter()
                    .zip(playlist.iter())
                    .all(|(uri, entry)| *uri == entry.uri);
            if in_sync {
                return Ok(None);
            }

            // Entries before the play cursor have already been played; drop
            // them so the head is the current track.
            let status = client.status()?;
            if let Some(song) = status.attr_int("song") {
                if song > 0 {
                    client.delete_range(0, song as usize)?;
                }
            }
            let remote = queue_uris(client)?;
            Ok(Some(merge_playlist_meta(&playlist, &remote)))
        })?;

        if let Some(merged) = merged {
            let empty = merged.is_empty();
            *playlist = merged;
            self.bus.emit(PlayerEvent::Playlist);
            if empty {
                self.bus.emit(PlayerEvent::PlaylistEnd);
            }
        }
        Ok(())
    }

    /// Reacts to a playlist change by checking whether the head moved.
    ///
    /// A genuine transition seeks to the head's stored progress (resuming
    /// partially played tracks) and increments its play count. Two
    /// consecutive observations of the same head are no-ops.
    fn observe_head_transition(&self) -> Result<()> {
        let head = {
            let playlist = self.playlist.lock().unwrap();
            match playlist.first() {
                Some(head) => head.clone(),
                None => return Ok(()),
            }
        };

        let mut last = self.last_track.lock().unwrap();
        if let Some(prev) = last.as_deref() {
            if prev != head.uri {
                if !head.progress.is_zero() {
                    self.seek(head.progress)?;
                }
                self.pool
                    .with_client(|client| increment_play_count(client, &head.uri))?;
            }
        }
        *last = Some(head.uri);
        Ok(())
    }

    /// Emits `Tracks` once the daemon confirms the catalogue update is no
    /// longer in progress.
    fn emit_tracks_after_update(&self) -> Result<()> {
        let done = self
            .pool
            .with_client(|client| Ok(client.status()?.get("updating_db").is_none()))?;
        if done {
            self.bus.emit(PlayerEvent::Tracks);
        }
        Ok(())
    }
}

impl Drop for MpdPlayer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        // The watcher may be parked in `idle` for as long as the daemon stays
        // silent; closing its socket wakes it so it can observe the flag.
        if let Some(socket) = self.watch_socket.lock().unwrap().take() {
            let _ = socket.shutdown(std::net::Shutdown::Both);
        }
    }
}

impl Player for MpdPlayer {
    fn tracks(&self) -> Result<Vec<Track>> {
        self.pool.with_client(|client| {
            let records = client.list_all_info("/")?;
            let mut tracks = Vec::with_capacity(records.len());
            for record in &records {
                if let Some(track) = track_from_record(client, record) {
                    tracks.push(track);
                }
            }
            Ok(tracks)
        })
    }

    fn track_info(&self, uris: &[String]) -> Result<Vec<Track>> {
        // Grab the head URI first; the playlist lock must never be taken
        // while holding a pool connection.
        let current = {
            let playlist = self.playlist.lock().unwrap();
            playlist.first().map(|t| t.uri.clone())
        };

        self.pool.with_client(|client| {
            let mut tracks = Vec::new();
            for uri in uris {
                if uri.starts_with(URI_SCHEMA) {
                    let records = client.list_all_info(uri_to_daemon(uri))?;
                    if let Some(record) = records.first() {
                        if let Some(track) = track_from_record(client, record) {
                            tracks.push(track);
                        }
                    }
                } else if current.as_deref() == Some(uri.as_str()) && uri.contains("://") {
                    // A network stream we are currently playing: the daemon
                    // only knows it through the current song.
                    if let Some(mut record) = client.current_song()? {
                        if let Some(name) = record.get("Name").cloned() {
                            record.insert("Album".to_string(), name);
                        }
                        record
                            .entry("file".to_string())
                            .or_insert_with(|| uri.clone());
                        if let Some(track) = track_from_record(client, &record) {
                            tracks.push(track);
                        }
                    }
                } else {
                    debug!(uri, "track unknown to the daemon, omitting");
                }
            }
            Ok(tracks)
        })
    }

    fn playlist(&self) -> Result<Vec<PlaylistTrack>> {
        let playlist = self.playlist.lock().unwrap();
        if playlist.is_empty() {
            return Ok(Vec::new());
        }
        let mut snapshot = playlist.clone();

        // Refresh the head's progress from the live status.
        let elapsed = self
            .pool
            .with_client(|client| Ok(client.status()?.attr_float("elapsed").unwrap_or(0.0)))?;
        snapshot[0].progress = Duration::from_secs(elapsed.max(0.0) as u64);
        Ok(snapshot)
    }

    fn set_playlist(&self, new_playlist: Vec<PlaylistTrack>) -> Result<()> {
        // The daemon will fire a burst of queue notifications while we
        // rewrite it; holding the playlist lock keeps the sync loop from
        // observing a half-written queue.
        let mut playlist = self.playlist.lock().unwrap();
        self.pool.with_client(|client| {
            let remote = queue_uris(client)?;

            // Keep the unchanged common prefix in place.
            let mut keep = 0;
            while keep < remote.len()
                && keep < new_playlist.len()
                && new_playlist[keep].uri == remote[keep]
            {
                keep += 1;
            }
            if keep != remote.len() {
                client.delete_range(keep, remote.len())?;
            }
            let additions: Vec<String> = new_playlist[keep..]
                .iter()
                .map(|entry| uri_to_daemon(&entry.uri).to_string())
                .collect();
            client.enqueue(&additions)?;

            // Start playing if we were not.
            if !new_playlist.is_empty() {
                let status = client.status()?;
                match status.get("state") {
                    Some("play") => {}
                    Some("stop") | None => client.play(0)?,
                    Some(_) => client.pause(false)?,
                }
            }
            Ok(())
        })?;

        let empty = new_playlist.is_empty();
        *playlist = new_playlist;
        self.bus.emit(PlayerEvent::Playlist);
        if empty {
            self.bus.emit(PlayerEvent::PlaylistEnd);
        }
        Ok(())
    }

    fn seek(&self, progress: Duration) -> Result<()> {
        self.pool.with_client(|client| {
            let status = client.status()?;
            match status.attr_int("songid") {
                Some(id) => client.seek_id(id, progress.as_secs()),
                // No track is currently being played.
                None => Ok(()),
            }
        })
    }

    fn state(&self) -> Result<PlayState> {
        self.pool.with_client(|client| {
            let status = client.status()?;
            PlayState::from_daemon_state(status.get("state").unwrap_or(""))
        })
    }

    fn set_state(&self, state: PlayState) -> Result<()> {
        match state {
            PlayState::Paused => self.pool.with_client(|client| client.pause(true)),
            PlayState::Stopped => self.pool.with_client(|client| client.stop()),
            PlayState::Playing => {
                let queue_empty = self.pool.with_client(|client| {
                    let status = client.status()?;
                    if status.attr_int("playlistlength").unwrap_or(0) == 0 {
                        return Ok(true);
                    }
                    if status.get("state") == Some("stop") {
                        client.play(0)?;
                    } else {
                        client.pause(false)?;
                    }
                    Ok(false)
                })?;
                // Nothing to play: report the end of the playlist instead
                // of attempting playback.
                if queue_empty {
                    self.bus.emit(PlayerEvent::PlaylistEnd);
                }
                Ok(())
            }
        }
    }

    fn volume(&self) -> Result<f32> {
        let raw = self.pool.with_client(|client| {
            let status = client.status()?;
            status
                .attr_int("volume")
                .ok_or_else(|| Error::Protocol("no volume attribute in status".to_string()))
        })?;
        let volume = raw as f32 / 100.0;
        if volume < 0.0 {
            return Ok(*self.last_volume.lock().unwrap());
        }
        Ok(volume)
    }

    fn set_volume(&self, volume: f32) -> Result<()> {
        let volume = volume.clamp(0.0, 1.0);
        *self.last_volume.lock().unwrap() = volume;
        self.pool
            .with_client(|client| client.set_volume((volume * 100.0).round() as i64))
    }

    fn available(&self) -> bool {
        self.pool.with_client(|client| client.ping()).is_ok()
    }

    fn track_art(&self, uri: &str) -> Result<Option<TrackArt>> {
        let path = uri_to_daemon(uri).to_string();
        self.pool.with_client(|client| {
            let chunks: usize = match client
                .sticker_get(&path, "image-nchunks")?
                .and_then(|n| n.parse().ok())
            {
                Some(n) if n > 0 => n,
                _ => return Ok(None),
            };

            let mut encoded = String::new();
            for i in 0..chunks {
                match client.sticker_get(&path, &format!("image-{i}"))? {
                    Some(chunk) => encoded.push_str(&chunk),
                    None => return Ok(None),
                }
            }
            // The padding gets lost somewhere between the daemon's sticker
            // store and here.
            while encoded.len() % 4 != 0 {
                encoded.push('=');
            }
            let data = BASE64
                .decode(encoded.as_bytes())
                .map_err(|err| Error::Protocol(format!("invalid artwork data: {err}")))?;
            Ok(Some(TrackArt {
                data,
                mime: "image/jpeg".to_string(),
            }))
        })
    }

    fn events(&self) -> &EventBus {
        &self.bus
    }
}

/// Starts the sync loop thread. It holds only a weak handle so the player
/// can be dropped by its owners; the loop exits once that happens.
fn spawn_sync_loop(player: &Arc<MpdPlayer>) -> Result<()> {
    let listener = player.bus.listen();
    let weak = Arc::downgrade(player);
    thread::Builder::new()
        .name("cadmpd-sync".to_string())
        .spawn(move || {
            // Bootstrap the reconciliation cycle before the first
            // notification arrives.
            if let Some(player) = weak.upgrade() {
                player.handle_event(PlayerEvent::Daemon(Subsystem::Queue));
            }
            while let Ok(event) = listener.recv() {
                let Some(player) = weak.upgrade() else { return };
                player.handle_event(event);
            }
        })
        .map_err(|err| Error::Transport(format!("cannot spawn sync loop: {err}")))?;
    Ok(())
}

/// The daemon's queue as schema-qualified URIs.
fn queue_uris(client: &mut Client) -> Result<Vec<String>> {
    Ok(client
        .playlist_info()?
        .iter()
        .filter_map(|record| record.get("file"))
        .map(|path| daemon_to_uri(path))
        .collect())
}

/// Decodes a catalogue record into a track.
///
/// Directory records and records without a file key are skipped (`None`)
/// rather than aborting the listing; the daemon mixes them freely into
/// catalogue responses.
fn track_from_record(client: &mut Client, record: &Record) -> Option<Track> {
    if record.contains_key("directory") {
        return None;
    }
    let path = record.get("file")?;

    let mut track = Track {
        uri: daemon_to_uri(path),
        artist: field(record, "Artist"),
        title: field(record, "Title"),
        genre: field(record, "Genre"),
        album: field(record, "Album"),
        album_artist: field(record, "AlbumArtist"),
        album_disc: field(record, "Disc"),
        album_track: field(record, "Track"),
        duration: Duration::from_secs(
            record.get("Time").and_then(|t| t.parse().ok()).unwrap_or(0),
        ),
        has_art: false,
    };
    track.has_art = client
        .sticker_get(uri_to_daemon(&track.uri), "image-nchunks")
        .ok()
        .flatten()
        .is_some_and(|n| n.parse::<u32>().is_ok());
    track.interpolate_missing_fields();
    Some(track)
}

fn field(record: &Record, key: &str) -> String {
    record.get(key).cloned().unwrap_or_default()
}

/// Bumps the persisted play counter for a local track. Counters only exist
/// for catalogue tracks, network streams have nowhere to store one.
fn increment_play_count(client: &mut Client, uri: &str) -> Result<()> {
    if !uri.starts_with(URI_SCHEMA) {
        return Ok(());
    }
    let path = uri_to_daemon(uri);
    let count: i64 = client
        .sticker_get(path, "play-count")?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    client.sticker_set(path, "play-count", &(count + 1).to_string())
}
