//! Player event bus.
//!
//! A small publish/subscribe registry: every subscriber gets its own bounded
//! queue and receives every event in emission order. Emission never blocks on
//! a slow consumer: after a short grace period the event is dropped for that
//! subscriber only. Disconnected subscribers are pruned on the next emit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvError, RecvTimeoutError, Sender, TryRecvError, bounded};
use tracing::debug;

/// Coarse change categories pushed by the daemon's notification stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Subsystem {
    /// Playback started, stopped, paused, seeked or changed track.
    Player,
    /// The queue was modified.
    Queue,
    /// Volume or mute changed.
    Mixer,
    /// A catalogue update started or finished.
    Update,
    /// Any subsystem the sync loop does not care about.
    Other,
}

impl Subsystem {
    /// Maps a subsystem name from the daemon's notification stream.
    pub fn from_daemon_name(name: &str) -> Self {
        match name {
            "player" => Subsystem::Player,
            "playlist" => Subsystem::Queue,
            "mixer" => Subsystem::Mixer,
            "update" => Subsystem::Update,
            _ => Subsystem::Other,
        }
    }
}

/// Events published by a player backend.
///
/// Protocol-level notifications are wrapped in `Daemon` to keep them apart
/// from the higher-level events synthesized by the sync loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayerEvent {
    /// The playlist contents changed.
    Playlist,
    /// The playlist ran empty.
    PlaylistEnd,
    /// The play/pause/stop state changed.
    PlayState,
    /// The playback position changed.
    Progress,
    /// The volume changed.
    Volume,
    /// The track catalogue changed.
    Tracks,
    /// The connection to the daemon was gained or lost.
    Availability,
    /// A raw change notification from the daemon.
    Daemon(Subsystem),
}

const SUBSCRIBER_QUEUE_CAPACITY: usize = 16;
const EMIT_GRACE: Duration = Duration::from_millis(100);

/// A subscription handle returned by [`EventBus::listen`].
pub struct Listener {
    id: u64,
    rx: Receiver<PlayerEvent>,
}

impl Listener {
    /// Blocks until the next event. Fails once the bus is dropped.
    pub fn recv(&self) -> Result<PlayerEvent, RecvError> {
        self.rx.recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<PlayerEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    /// Returns the next queued event without blocking.
    pub fn try_recv(&self) -> Result<PlayerEvent, TryRecvError> {
        self.rx.try_recv()
    }

    /// The underlying channel, for use in `select!` loops.
    pub fn receiver(&self) -> &Receiver<PlayerEvent> {
        &self.rx
    }
}

/// Publish/subscribe registry for [`PlayerEvent`]s.
///
/// Cheap to clone; clones share the subscriber list. The bus lives as long
/// as the component that owns it and unsubscribing is always safe to call
/// twice.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<(u64, Sender<PlayerEvent>)>>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus::default()
    }

    /// Registers a new subscriber and returns its handle.
    pub fn listen(&self) -> Listener {
        let (tx, rx) = bounded(SUBSCRIBER_QUEUE_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.push((id, tx));
        Listener { id, rx }
    }

    /// Removes a subscriber. A second call with the same listener is a no-op.
    pub fn unlisten(&self, listener: &Listener) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|(id, _)| *id != listener.id);
    }

    /// Delivers `event` to every subscriber in emission order.
    ///
    /// A subscriber whose queue stays full past the grace period loses this
    /// event only; a disconnected subscriber is removed.
    pub fn emit(&self, event: PlayerEvent) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|(id, tx)| match tx.send_timeout(event, EMIT_GRACE) {
            Ok(()) => true,
            Err(err) if err.is_timeout() => {
                debug!(subscriber = id, ?event, "subscriber queue full, dropping event");
                true
            }
            Err(_) => false,
        });
    }
}
