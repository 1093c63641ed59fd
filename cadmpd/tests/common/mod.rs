//! In-process daemon double speaking the wire-protocol subset the backend
//! uses. Each connection is served on its own thread; `idle` connections
//! park until [`MockDaemon::notify`] wakes them.

// Each test binary uses a different subset of this module.
#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Sender, unbounded};

/// Sentinel subsystem that makes parked `idle` connections hang up, which
/// is how tests simulate a lost notification stream.
const CLOSE_SENTINEL: &str = "\0close";

#[derive(Clone)]
pub struct CatalogueEntry {
    pub path: String,
    pub title: String,
    pub artist: String,
    pub directory: bool,
}

impl CatalogueEntry {
    pub fn file(path: &str, title: &str, artist: &str) -> Self {
        CatalogueEntry {
            path: path.to_string(),
            title: title.to_string(),
            artist: artist.to_string(),
            directory: false,
        }
    }

    pub fn directory(path: &str) -> Self {
        CatalogueEntry {
            path: path.to_string(),
            title: String::new(),
            artist: String::new(),
            directory: true,
        }
    }
}

#[derive(Default)]
pub struct DaemonState {
    pub queue: Vec<String>,
    pub catalogue: Vec<CatalogueEntry>,
    pub play_state: String,
    pub song: i64,
    pub songid: i64,
    pub elapsed: f64,
    pub volume: i64,
    pub updating: bool,
    pub current_name: Option<String>,
    pub stickers: HashMap<(String, String), String>,
    pub seeks: Vec<(i64, u64)>,
    idle_waiters: Vec<Sender<String>>,
    /// Notifications that arrived while no `idle` was parked; real MPD
    /// accumulates subsystem changes and delivers them at the next `idle`.
    pending: Vec<String>,
}

pub struct MockDaemon {
    pub port: u16,
    pub state: Arc<Mutex<DaemonState>>,
    pub live_connections: Arc<AtomicUsize>,
    pub fail_pings: Arc<AtomicBool>,
    /// While set, commands hang up without a response, leaving the client
    /// waiting on a reply that never comes.
    pub abort_commands: Arc<AtomicBool>,
}

impl MockDaemon {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock daemon");
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(Mutex::new(DaemonState {
            play_state: "stop".to_string(),
            volume: 100,
            ..DaemonState::default()
        }));
        let live_connections = Arc::new(AtomicUsize::new(0));
        let fail_pings = Arc::new(AtomicBool::new(false));
        let abort_commands = Arc::new(AtomicBool::new(false));

        let accept_state = Arc::clone(&state);
        let accept_live = Arc::clone(&live_connections);
        let accept_fail = Arc::clone(&fail_pings);
        let accept_abort = Arc::clone(&abort_commands);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let state = Arc::clone(&accept_state);
                let live = Arc::clone(&accept_live);
                let fail = Arc::clone(&accept_fail);
                let abort = Arc::clone(&accept_abort);
                thread::spawn(move || {
                    live.fetch_add(1, Ordering::SeqCst);
                    let _ = serve_connection(stream, &state, &fail, &abort);
                    live.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        MockDaemon {
            port,
            state,
            live_connections,
            fail_pings,
            abort_commands,
        }
    }

    pub fn address(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    /// Wakes every parked `idle` connection with a changed-subsystem line.
    pub fn notify(&self, subsystem: &str) {
        let mut state = self.state.lock().unwrap();
        if state.idle_waiters.is_empty() {
            state.pending.push(subsystem.to_string());
        } else {
            for waiter in state.idle_waiters.drain(..) {
                let _ = waiter.send(subsystem.to_string());
            }
        }
    }

    /// Hangs up every parked `idle` connection.
    pub fn drop_watchers(&self) {
        self.notify(CLOSE_SENTINEL);
    }

    pub fn sticker(&self, path: &str, name: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .stickers
            .get(&(path.to_string(), name.to_string()))
            .cloned()
    }

    pub fn set_sticker(&self, path: &str, name: &str, value: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .stickers
            .insert((path.to_string(), name.to_string()), value.to_string());
    }
}

/// Polls `cond` until it holds or the deadline passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    cond()
}

fn serve_connection(
    mut stream: TcpStream,
    state: &Arc<Mutex<DaemonState>>,
    fail_pings: &Arc<AtomicBool>,
    abort_commands: &Arc<AtomicBool>,
) -> std::io::Result<()> {
    stream.write_all(b"OK MPD 0.23.0\n")?;
    let reader = BufReader::new(stream.try_clone()?);

    let mut list_buffer: Option<Vec<String>> = None;
    for line in reader.lines() {
        let line = line?;
        if abort_commands.load(Ordering::SeqCst) && line != "idle" {
            return Ok(());
        }
        match line.as_str() {
            "command_list_begin" => {
                list_buffer = Some(Vec::new());
                continue;
            }
            "command_list_end" => {
                for cmd in list_buffer.take().unwrap_or_default() {
                    // Errors abort the list; good enough for tests.
                    if !run_command(&cmd, &mut stream, state, fail_pings, false)? {
                        return Ok(());
                    }
                }
                stream.write_all(b"OK\n")?;
                continue;
            }
            _ => {}
        }
        if let Some(buffer) = list_buffer.as_mut() {
            buffer.push(line);
            continue;
        }
        if !run_command(&line, &mut stream, state, fail_pings, true)? {
            return Ok(());
        }
    }
    Ok(())
}

/// Executes one command. Returns `false` when the connection should close.
fn run_command(
    line: &str,
    stream: &mut TcpStream,
    state: &Arc<Mutex<DaemonState>>,
    fail_pings: &Arc<AtomicBool>,
    reply_ok: bool,
) -> std::io::Result<bool> {
    let args = split_args(line);
    let mut out = String::new();
    let mut ok = true;

    match args.first().map(String::as_str) {
        Some("ping") => {
            if fail_pings.load(Ordering::SeqCst) {
                ok = false;
                out.push_str("ACK [0@0] {ping} simulated ping failure\n");
            }
        }
        Some("password") => {}
        Some("status") => {
            let state = state.lock().unwrap();
            out.push_str(&format!("volume: {}\n", state.volume));
            out.push_str(&format!("state: {}\n", state.play_state));
            out.push_str(&format!("playlistlength: {}\n", state.queue.len()));
            if !state.queue.is_empty() {
                out.push_str(&format!("song: {}\n", state.song));
                out.push_str(&format!("songid: {}\n", state.songid));
                out.push_str(&format!("elapsed: {}\n", state.elapsed));
            }
            if state.updating {
                out.push_str("updating_db: 1\n");
            }
        }
        Some("playlistinfo") => {
            let state = state.lock().unwrap();
            for path in &state.queue {
                out.push_str(&format!("file: {path}\n"));
            }
        }
        Some("listallinfo") => {
            let state = state.lock().unwrap();
            let path = args.get(1).map(String::as_str).unwrap_or("/");
            for entry in &state.catalogue {
                if entry.directory {
                    if path == "/" {
                        out.push_str(&format!("directory: {}\n", entry.path));
                    }
                    continue;
                }
                if path == "/" || entry.path == path {
                    out.push_str(&format!("file: {}\n", entry.path));
                    if !entry.title.is_empty() {
                        out.push_str(&format!("Title: {}\n", entry.title));
                    }
                    if !entry.artist.is_empty() {
                        out.push_str(&format!("Artist: {}\n", entry.artist));
                    }
                    out.push_str("Time: 120\n");
                }
            }
        }
        Some("currentsong") => {
            let state = state.lock().unwrap();
            if let Some(path) = state.queue.get(state.song.max(0) as usize) {
                out.push_str(&format!("file: {path}\n"));
                if let Some(name) = &state.current_name {
                    out.push_str(&format!("Name: {name}\n"));
                }
            }
        }
        Some("add") => {
            let mut state = state.lock().unwrap();
            if let Some(path) = args.get(1) {
                state.queue.push(path.clone());
            }
        }
        Some("delete") => {
            let mut state = state.lock().unwrap();
            if let Some((start, end)) = args
                .get(1)
                .and_then(|range| range.split_once(':'))
                .and_then(|(s, e)| Some((s.parse::<usize>().ok()?, e.parse::<usize>().ok()?)))
            {
                let end = end.min(state.queue.len());
                if start < end {
                    state.queue.drain(start..end);
                }
            }
        }
        Some("seekid") => {
            let mut state = state.lock().unwrap();
            let id = args.get(1).and_then(|v| v.parse().ok()).unwrap_or(-1);
            let secs = args.get(2).and_then(|v| v.parse().ok()).unwrap_or(0);
            state.seeks.push((id, secs));
        }
        Some("setvol") => {
            let mut state = state.lock().unwrap();
            state.volume = args.get(1).and_then(|v| v.parse().ok()).unwrap_or(0);
        }
        Some("play") => state.lock().unwrap().play_state = "play".to_string(),
        Some("pause") => {
            let paused = args.get(1).map(String::as_str) == Some("1");
            state.lock().unwrap().play_state =
                if paused { "pause" } else { "play" }.to_string();
        }
        Some("stop") => state.lock().unwrap().play_state = "stop".to_string(),
        Some("sticker") => match args.get(1).map(String::as_str) {
            Some("get") => {
                let key = (args[3].clone(), args[4].clone());
                let value = state.lock().unwrap().stickers.get(&key).cloned();
                match value {
                    Some(value) => out.push_str(&format!("sticker: {}={}\n", args[4], value)),
                    None => {
                        ok = false;
                        out.push_str("ACK [50@0] {sticker} no such sticker\n");
                    }
                }
            }
            Some("set") => {
                let mut state = state.lock().unwrap();
                state
                    .stickers
                    .insert((args[3].clone(), args[4].clone()), args[5].clone());
            }
            _ => {
                ok = false;
                out.push_str("ACK [2@0] {sticker} bad sticker command\n");
            }
        },
        Some("idle") => {
            let (tx, rx) = unbounded();
            {
                let mut state = state.lock().unwrap();
                if state.pending.is_empty() {
                    state.idle_waiters.push(tx);
                } else {
                    // Deliver a change that arrived before this `idle`.
                    let _ = tx.send(state.pending.remove(0));
                }
            }
            // Wait for a notification while also watching the socket, so a
            // client hang-up releases this connection thread.
            stream.set_read_timeout(Some(Duration::from_millis(50)))?;
            loop {
                if let Ok(subsystem) = rx.try_recv() {
                    if subsystem == CLOSE_SENTINEL {
                        // Hang up, simulating a lost stream.
                        return Ok(false);
                    }
                    stream.set_read_timeout(None)?;
                    stream.write_all(format!("changed: {subsystem}\nOK\n").as_bytes())?;
                    return Ok(true);
                }
                // The client never writes during `idle`; anything other
                // than a read timeout means it is gone.
                let mut probe = [0u8; 1];
                match stream.read(&mut probe) {
                    Ok(0) => return Ok(false),
                    Ok(_) => {}
                    Err(err)
                        if err.kind() == std::io::ErrorKind::WouldBlock
                            || err.kind() == std::io::ErrorKind::TimedOut => {}
                    Err(_) => return Ok(false),
                }
            }
        }
        _ => {
            ok = false;
            out.push_str(&format!("ACK [5@0] {{}} unknown command {line:?}\n"));
        }
    }

    stream.write_all(out.as_bytes())?;
    if ok && reply_ok {
        stream.write_all(b"OK\n")?;
    }
    Ok(true)
}

/// Splits a command line into arguments, honoring double quotes.
fn split_args(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut escaped = false;
    for c in line.chars() {
        if escaped {
            current.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '"' {
            quoted = !quoted;
        } else if c == ' ' && !quoted {
            if !current.is_empty() {
                args.push(std::mem::take(&mut current));
            }
        } else {
            current.push(c);
        }
    }
    if !current.is_empty() {
        args.push(current);
    }
    args
}
