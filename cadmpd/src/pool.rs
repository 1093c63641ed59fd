//! Reusable connection pool with per-connection keepalive supervisors.
//!
//! Each pooled connection is kept alive by its own supervisor thread: a
//! periodic ping plus an idle-expiry timer that is rearmed every time the
//! connection is used. A failed ping or an expiry closes the connection and
//! tombstones the slot; the next acquisition replaces it with a fresh dial.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded, select, tick};
use tracing::{debug, warn};

use cadplayer::{Error, Result};

use crate::proto::Client;

const PING_INTERVAL: Duration = Duration::from_secs(4);
const EXPIRE_AFTER: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// One pool slot. `client` is `None` once the supervisor has torn the
/// connection down; only the supervisor ever sets it to `None`.
struct PooledConn {
    client: Mutex<Option<Client>>,
    reset_tx: Sender<()>,
}

/// A fixed-capacity pool of daemon connections.
///
/// Capacity must stay strictly below the daemon's own connection ceiling,
/// see [`crate::DaemonConfig::validate`]. Pool exhaustion is backpressure,
/// not an error: [`ConnectionPool::with_client`] blocks until a slot frees
/// up.
pub struct ConnectionPool {
    address: String,
    password: Option<String>,
    slots_tx: Sender<Arc<PooledConn>>,
    slots_rx: Receiver<Arc<PooledConn>>,
    ping_interval: Duration,
    expire_after: Duration,
}

impl ConnectionPool {
    /// Dials `capacity` connections up front. Fails if any of them cannot
    /// be established.
    pub fn connect(address: &str, password: Option<&str>, capacity: usize) -> Result<Self> {
        Self::with_keepalive(address, password, capacity, PING_INTERVAL, EXPIRE_AFTER)
    }

    /// Like [`ConnectionPool::connect`] with explicit keepalive timings.
    pub fn with_keepalive(
        address: &str,
        password: Option<&str>,
        capacity: usize,
        ping_interval: Duration,
        expire_after: Duration,
    ) -> Result<Self> {
        let (slots_tx, slots_rx) = bounded(capacity.max(1));
        let pool = ConnectionPool {
            address: address.to_string(),
            password: password.map(String::from),
            slots_tx,
            slots_rx,
            ping_interval,
            expire_after,
        };
        for _ in 0..capacity.max(1) {
            let slot = pool.dial_slot()?;
            pool.slots_tx
                .send(slot)
                .map_err(|_| Error::Transport("connection pool closed".to_string()))?;
        }
        Ok(pool)
    }

    /// Runs `f` with exclusive access to a live connection.
    ///
    /// Blocks until a slot is free. A slot holding a dead connection is
    /// replaced synchronously before `f` runs; if the replacement dial fails
    /// the error is returned and the empty slot goes back into the pool for
    /// the next attempt. The slot is returned on every path, `f` must not
    /// acquire a second one.
    pub fn with_client<T>(&self, f: impl FnOnce(&mut Client) -> Result<T>) -> Result<T> {
        let slot = self.acquire()?;
        // Rearm the idle-expiry timer; best effort, the supervisor may be
        // mid-ping and pick it up a moment later.
        let _ = slot.reset_tx.try_send(());

        let result = {
            let mut guard = slot.client.lock().unwrap();
            match guard.as_mut() {
                Some(client) => {
                    let result = f(client);
                    // A timed-out or interrupted command leaves unread
                    // response lines buffered on the stream; the connection
                    // can no longer be trusted to pair commands with their
                    // responses. Tear it down, the next acquisition redials.
                    if matches!(result, Err(Error::Transport(_))) {
                        warn!("command failed mid-stream, closing connection");
                        *guard = None;
                    }
                    result
                }
                // The supervisor won the race between acquisition and use.
                None => Err(Error::Transport(
                    "connection expired during acquisition".to_string(),
                )),
            }
        };
        let _ = self.slots_tx.send(slot);
        result
    }

    fn acquire(&self) -> Result<Arc<PooledConn>> {
        let slot = self
            .slots_rx
            .recv()
            .map_err(|_| Error::Transport("connection pool closed".to_string()))?;
        if slot.client.lock().unwrap().is_some() {
            return Ok(slot);
        }

        debug!("pooled connection is dead, dialing a replacement");
        match self.dial_slot() {
            Ok(fresh) => Ok(fresh),
            Err(err) => {
                // Keep the pool at capacity; the dead slot will trigger
                // another replacement attempt on its next acquisition.
                let _ = self.slots_tx.send(slot);
                Err(err)
            }
        }
    }

    fn dial_slot(&self) -> Result<Arc<PooledConn>> {
        let client = Client::connect(&self.address, self.password.as_deref(), CONNECT_TIMEOUT)?;
        client.set_read_timeout(Some(COMMAND_TIMEOUT))?;

        let (reset_tx, reset_rx) = bounded(1);
        let slot = Arc::new(PooledConn {
            client: Mutex::new(Some(client)),
            reset_tx,
        });

        let supervised = Arc::clone(&slot);
        let ping_interval = self.ping_interval;
        let expire_after = self.expire_after;
        thread::Builder::new()
            .name("cadmpd-keepalive".to_string())
            .spawn(move || run_supervisor(supervised, reset_rx, ping_interval, expire_after))
            .map_err(|err| Error::Transport(format!("cannot spawn keepalive: {err}")))?;
        Ok(slot)
    }
}

/// Pings the connection periodically and expires it after sitting idle.
/// Exits as soon as the connection is torn down, leaving the slot
/// tombstoned for replacement.
fn run_supervisor(
    conn: Arc<PooledConn>,
    reset_rx: Receiver<()>,
    ping_interval: Duration,
    expire_after: Duration,
) {
    let pinger = tick(ping_interval);
    let mut expire = crossbeam_channel::after(expire_after);
    loop {
        select! {
            recv(pinger) -> _ => {
                let mut guard = conn.client.lock().unwrap();
                let Some(client) = guard.as_mut() else { return };
                if let Err(err) = client.ping() {
                    warn!(%err, "keepalive ping failed, closing connection");
                    *guard = None;
                    return;
                }
            }
            recv(expire) -> _ => {
                debug!("idle connection expired");
                *conn.client.lock().unwrap() = None;
                return;
            }
            recv(reset_rx) -> _ => {
                expire = crossbeam_channel::after(expire_after);
            }
        }
    }
}
