// examples/event_demo.rs
//
// Live demo of the PlayerEvent stream emitted while syncing against a
// running Music Player Daemon:
//   - connects and fills the command pool
//   - subscribes to the event bus
//   - prints every event with an HH:MM:SS timestamp
//
// Build and run (from the cadmpd crate root):
//   cargo run --example event_demo --                     # localhost:6600
//   cargo run --example event_demo -- jukebox.local 6600  # custom address
//
// Ctrl-C to quit.

use std::env;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use cadmpd::{DaemonConfig, MpdPlayer};
use cadplayer::{Player, PlayerEvent};

fn main() {
    let _ = tracing_subscriber::fmt::try_init();

    let args: Vec<String> = env::args().collect();
    let host = args.get(1).map(String::as_str).unwrap_or("localhost");
    let port = args
        .get(2)
        .and_then(|p| p.parse().ok())
        .unwrap_or(6600u16);

    let config = DaemonConfig::new(host, port);
    println!("Connecting to {}...", config.address());
    let player = match MpdPlayer::connect(&config) {
        Ok(player) => player,
        Err(err) => {
            eprintln!("Connection failed: {err}");
            return;
        }
    };

    match player.playlist() {
        Ok(playlist) if playlist.is_empty() => println!("The queue is empty."),
        Ok(playlist) => {
            println!("Current queue:");
            for (idx, entry) in playlist.iter().enumerate() {
                println!("  [{}] {} (queued by {})", idx, entry.uri, entry.queued_by);
            }
        }
        Err(err) => eprintln!("Cannot read the queue: {err}"),
    }

    let listener = player.events().listen();
    println!("\nSubscribed to player events.");
    println!("Press Ctrl-C to quit.\n");

    while let Ok(event) = listener.recv() {
        println!("[{}] {}", now_hms(), describe(event));
    }
    eprintln!("Event bus closed. Exiting.");
}

/// HH:MM:SS from the system clock (UTC mod 24h).
fn now_hms() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0));
    let total = now.as_secs() % 86_400;
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

fn describe(event: PlayerEvent) -> String {
    match event {
        PlayerEvent::Playlist => "Playlist: queue contents changed".to_string(),
        PlayerEvent::PlaylistEnd => "PlaylistEnd: the queue ran empty".to_string(),
        PlayerEvent::PlayState => "PlayState: playback state changed".to_string(),
        PlayerEvent::Progress => "Progress: playback position changed".to_string(),
        PlayerEvent::Volume => "Volume: volume changed".to_string(),
        PlayerEvent::Tracks => "Tracks: catalogue changed".to_string(),
        PlayerEvent::Availability => "Availability: daemon connection state changed".to_string(),
        PlayerEvent::Daemon(subsystem) => format!("Daemon notification: {subsystem:?}"),
    }
}
