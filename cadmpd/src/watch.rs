//! The reconnecting change-notification watcher.
//!
//! One dedicated connection sits in `idle` and translates every daemon
//! notification into a bus event. The watcher is the sole source of "maybe
//! something changed upstream"; it never queries or mutates state itself.

use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use cadplayer::{Error, EventBus, PlayerEvent, Result, Subsystem};

use crate::proto::Client;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Limits reconnection attempts to one per second.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Where the watcher publishes a handle to its current connection.
///
/// `idle` blocks without a read timeout, so a clean shutdown closes this
/// socket from the outside to unpark the thread.
pub(crate) type WatcherSocket = Arc<Mutex<Option<TcpStream>>>;

/// Spawns the watcher thread.
///
/// On every successful (re)connect it emits `Availability`; for each
/// notification it emits `Daemon(subsystem)`; on a stream error it emits
/// `Availability` again to signal the loss and reconnects after a fixed
/// delay. The thread exits once `shutdown` is set: either at the next loop
/// edge, or immediately when the socket in `socket` is shut down while the
/// watcher sits in `idle`.
pub(crate) fn spawn_watcher(
    address: String,
    password: Option<String>,
    bus: EventBus,
    shutdown: Arc<AtomicBool>,
    socket: WatcherSocket,
) -> Result<()> {
    let builder = thread::Builder::new().name("cadmpd-watch".to_string());
    builder
        .spawn(move || {
            while !shutdown.load(Ordering::Relaxed) {
                let mut client =
                    match Client::connect(&address, password.as_deref(), CONNECT_TIMEOUT) {
                        Ok(client) => client,
                        Err(err) => {
                            debug!(%err, "watcher cannot reach daemon");
                            thread::sleep(RECONNECT_DELAY);
                            continue;
                        }
                    };
                *socket.lock().unwrap() = client.try_clone_stream().ok();
                bus.emit(PlayerEvent::Availability);

                loop {
                    match client.idle() {
                        Ok(subsystems) => {
                            for name in subsystems {
                                bus.emit(PlayerEvent::Daemon(Subsystem::from_daemon_name(&name)));
                            }
                        }
                        Err(err) => {
                            if shutdown.load(Ordering::Relaxed) {
                                return;
                            }
                            warn!(%err, "notification stream lost");
                            bus.emit(PlayerEvent::Availability);
                            break;
                        }
                    }
                    if shutdown.load(Ordering::Relaxed) {
                        return;
                    }
                }
                socket.lock().unwrap().take();
                thread::sleep(RECONNECT_DELAY);
            }
        })
        .map_err(|err| Error::Transport(format!("cannot spawn watcher: {err}")))?;
    Ok(())
}
