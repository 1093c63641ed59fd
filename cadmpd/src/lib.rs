//! # cadmpd - MPD backend for Cadenza
//!
//! Implements [`cadplayer::Player`] against a Music Player Daemon instance
//! and keeps the local playlist mirror converged with the daemon's queue.
//!
//! # Architecture
//!
//! - **Client** : blocking text-protocol client for the command subset the
//!   sync core needs
//! - **ConnectionPool** : fixed set of reusable connections, each kept alive
//!   by its own keepalive supervisor thread
//! - **watch** : the reconnecting `idle` subscription feeding the event bus
//! - **MpdPlayer** : the sync loop and the `Player` implementation
//!
//! The daemon accepts a limited number of concurrent connections (10 by
//! default) and rudely closes everything beyond that, so the pool capacity
//! stays strictly below it and the watcher uses a single extra connection.

mod config;
mod player;
mod pool;
mod proto;
mod watch;

pub use config::DaemonConfig;
pub use player::MpdPlayer;
pub use pool::ConnectionPool;
pub use proto::{Client, URI_SCHEMA, daemon_to_uri, uri_to_daemon};
