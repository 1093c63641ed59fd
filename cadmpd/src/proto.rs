//! Blocking client for the daemon's text protocol.
//!
//! Only the command subset the sync core needs is covered: status, queue and
//! catalogue listing, queueing, seeking, volume, sticker read/write and the
//! `idle` change subscription. Responses are `key: value` lines terminated by
//! `OK`; failures are `ACK [code@index] {command} message` lines which are
//! decoded into a typed protocol error.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::trace;

use cadplayer::{Error, Result};

/// URI schema under which daemon-relative paths are exposed.
pub const URI_SCHEMA: &str = "mpd://";

/// Strips the schema so a URI can be sent to the daemon. Absolute URIs
/// (network streams) pass through unchanged.
pub fn uri_to_daemon(uri: &str) -> &str {
    uri.strip_prefix(URI_SCHEMA).unwrap_or(uri)
}

/// Wraps a daemon-relative path in the schema. Paths that already carry a
/// scheme (network streams) pass through unchanged.
pub fn daemon_to_uri(path: &str) -> String {
    if path.contains("://") {
        path.to_string()
    } else {
        format!("{URI_SCHEMA}{path}")
    }
}

/// A key/value record from a listing response.
pub type Record = HashMap<String, String>;

/// The daemon's status snapshot.
#[derive(Debug)]
pub struct Status(HashMap<String, String>);

impl Status {
    pub fn get(&self, attr: &str) -> Option<&str> {
        self.0.get(attr).map(String::as_str)
    }

    /// Reads an attribute as an integer; absent or malformed values are
    /// `None` rather than an error, the daemon omits attributes freely.
    pub fn attr_int(&self, attr: &str) -> Option<i64> {
        self.get(attr)?.parse().ok()
    }

    pub fn attr_float(&self, attr: &str) -> Option<f64> {
        self.get(attr)?.parse().ok()
    }
}

/// One authenticated session with the daemon.
///
/// `Client` is deliberately not `Clone`: exclusive access is what the
/// connection pool hands out, one command in flight per connection.
pub struct Client {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Client {
    /// Dials the daemon, reads the protocol banner and authenticates when a
    /// password is configured.
    pub fn connect(address: &str, password: Option<&str>, timeout: Duration) -> Result<Self> {
        let addr = address
            .to_socket_addrs()
            .map_err(|err| Error::Transport(format!("cannot resolve {address}: {err}")))?
            .next()
            .ok_or_else(|| Error::Transport(format!("no address for {address}")))?;
        let stream = TcpStream::connect_timeout(&addr, timeout)
            .map_err(|err| Error::Transport(format!("cannot connect to {address}: {err}")))?;
        let reader = BufReader::new(
            stream
                .try_clone()
                .map_err(|err| Error::Transport(err.to_string()))?,
        );

        let mut client = Client {
            reader,
            writer: stream,
        };
        let banner = client.read_line()?;
        if !banner.starts_with("OK MPD ") {
            return Err(Error::Protocol(format!("unexpected banner {banner:?}")));
        }
        if let Some(password) = password {
            client.command(&format!("password {}", quote(password)))?;
        }
        Ok(client)
    }

    /// Bounds how long a pooled command may wait for its response. The
    /// watcher connection keeps the default (none): `idle` blocks until
    /// something changes.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.writer
            .set_read_timeout(timeout)
            .map_err(|err| Error::Transport(err.to_string()))
    }

    /// A second handle to the underlying socket. Shutting it down unblocks
    /// a read parked on the connection from another thread.
    pub(crate) fn try_clone_stream(&self) -> Result<TcpStream> {
        self.writer
            .try_clone()
            .map_err(|err| Error::Transport(err.to_string()))
    }

    /// Sends one command and collects its response pairs.
    pub fn command(&mut self, cmd: &str) -> Result<Vec<(String, String)>> {
        trace!(cmd, "sending command");
        self.send_line(cmd)?;
        self.read_response()
    }

    /// Sends several commands as one atomic command list with a single
    /// response.
    pub fn command_list(&mut self, cmds: &[String]) -> Result<()> {
        self.send_line("command_list_begin")?;
        for cmd in cmds {
            self.send_line(cmd)?;
        }
        self.send_line("command_list_end")?;
        self.read_response()?;
        Ok(())
    }

    pub fn ping(&mut self) -> Result<()> {
        self.command("ping").map(|_| ())
    }

    pub fn status(&mut self) -> Result<Status> {
        Ok(Status(self.command("status")?.into_iter().collect()))
    }

    /// The current queue as one record per entry, delimited by `file` keys.
    pub fn playlist_info(&mut self) -> Result<Vec<Record>> {
        let pairs = self.command("playlistinfo")?;
        Ok(split_records(pairs))
    }

    /// Catalogue listing. Pass `"/"` for everything. Records describing
    /// directories are kept here; decoding skips them.
    pub fn list_all_info(&mut self, path: &str) -> Result<Vec<Record>> {
        let pairs = self.command(&format!("listallinfo {}", quote(path)))?;
        Ok(split_records(pairs))
    }

    /// The record of the currently playing song, if any.
    pub fn current_song(&mut self) -> Result<Option<Record>> {
        let pairs = self.command("currentsong")?;
        let mut records = split_records(pairs);
        Ok(if records.is_empty() {
            None
        } else {
            Some(records.swap_remove(0))
        })
    }

    pub fn add(&mut self, path: &str) -> Result<()> {
        self.command(&format!("add {}", quote(path))).map(|_| ())
    }

    /// Appends several paths to the queue in one atomic command list.
    pub fn enqueue(&mut self, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let cmds: Vec<String> = paths.iter().map(|p| format!("add {}", quote(p))).collect();
        self.command_list(&cmds)
    }

    /// Removes queue positions `start..end`.
    pub fn delete_range(&mut self, start: usize, end: usize) -> Result<()> {
        self.command(&format!("delete {start}:{end}")).map(|_| ())
    }

    pub fn seek_id(&mut self, songid: i64, seconds: u64) -> Result<()> {
        self.command(&format!("seekid {songid} {seconds}"))
            .map(|_| ())
    }

    pub fn set_volume(&mut self, volume: i64) -> Result<()> {
        self.command(&format!("setvol {volume}")).map(|_| ())
    }

    pub fn play(&mut self, position: usize) -> Result<()> {
        self.command(&format!("play {position}")).map(|_| ())
    }

    pub fn pause(&mut self, paused: bool) -> Result<()> {
        self.command(&format!("pause {}", if paused { 1 } else { 0 }))
            .map(|_| ())
    }

    pub fn stop(&mut self) -> Result<()> {
        self.command("stop").map(|_| ())
    }

    /// Reads a per-track sticker value. The daemon reports missing stickers
    /// as a command error; that case is `None` here.
    pub fn sticker_get(&mut self, path: &str, name: &str) -> Result<Option<String>> {
        let cmd = format!("sticker get song {} {}", quote(path), quote(name));
        match self.command(&cmd) {
            Ok(pairs) => Ok(pairs.into_iter().find_map(|(key, value)| {
                if key != "sticker" {
                    return None;
                }
                value.split_once('=').map(|(_, v)| v.to_string())
            })),
            Err(Error::Protocol(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn sticker_set(&mut self, path: &str, name: &str, value: &str) -> Result<()> {
        let cmd = format!(
            "sticker set song {} {} {}",
            quote(path),
            quote(name),
            quote(value)
        );
        self.command(&cmd).map(|_| ())
    }

    /// Blocks until the daemon reports a change, returning the names of the
    /// changed subsystems.
    pub fn idle(&mut self) -> Result<Vec<String>> {
        Ok(self
            .command("idle")?
            .into_iter()
            .filter(|(key, _)| key == "changed")
            .map(|(_, subsystem)| subsystem)
            .collect())
    }

    fn send_line(&mut self, line: &str) -> Result<()> {
        self.writer
            .write_all(line.as_bytes())
            .and_then(|_| self.writer.write_all(b"\n"))
            .map_err(|err| Error::Transport(format!("write failed: {err}")))
    }

    fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let n = self
            .reader
            .read_line(&mut line)
            .map_err(|err| Error::Transport(format!("read failed: {err}")))?;
        if n == 0 {
            return Err(Error::Transport("connection closed by daemon".to_string()));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    fn read_response(&mut self) -> Result<Vec<(String, String)>> {
        let mut pairs = Vec::new();
        loop {
            let line = self.read_line()?;
            if line == "OK" {
                return Ok(pairs);
            }
            if line.starts_with("ACK ") {
                return Err(parse_ack(&line));
            }
            match line.split_once(':') {
                Some((key, value)) => pairs.push((key.to_string(), value.trim().to_string())),
                // Not fatal: skip lines we cannot make sense of instead of
                // poisoning the whole response.
                None => trace!(line, "skipping malformed response line"),
            }
        }
    }
}

/// Decodes an `ACK [code@index] {command} message` failure line.
fn parse_ack(line: &str) -> Error {
    let message = line
        .split_once("} ")
        .map(|(_, msg)| msg.trim())
        .unwrap_or(line);
    Error::Protocol(message.to_string())
}

/// Splits a flat pair list into records, each starting at a `file` or
/// `directory` key.
fn split_records(pairs: Vec<(String, String)>) -> Vec<Record> {
    let mut records = Vec::new();
    for (key, value) in pairs {
        if key == "file" || key == "directory" {
            records.push(Record::new());
        }
        if let Some(record) = records.last_mut() {
            record.insert(key, value);
        }
    }
    records
}

/// Quotes an argument for the wire, escaping embedded quotes.
fn quote(arg: &str) -> String {
    format!("\"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_mapping_round_trip() {
        assert_eq!(uri_to_daemon("mpd://music/a.ogg"), "music/a.ogg");
        assert_eq!(daemon_to_uri("music/a.ogg"), "mpd://music/a.ogg");
        // Network streams keep their own scheme in both directions.
        assert_eq!(
            uri_to_daemon("http://radio.example.com/stream"),
            "http://radio.example.com/stream"
        );
        assert_eq!(
            daemon_to_uri("http://radio.example.com/stream"),
            "http://radio.example.com/stream"
        );
    }

    #[test]
    fn test_split_records_by_file_and_directory() {
        let pairs = vec![
            ("directory".to_string(), "albums".to_string()),
            ("file".to_string(), "albums/a.ogg".to_string()),
            ("Title".to_string(), "A".to_string()),
            ("Time".to_string(), "120".to_string()),
            ("file".to_string(), "albums/b.ogg".to_string()),
            ("Title".to_string(), "B".to_string()),
        ];
        let records = split_records(pairs);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].get("directory").unwrap(), "albums");
        assert_eq!(records[1].get("Title").unwrap(), "A");
        assert_eq!(records[2].get("file").unwrap(), "albums/b.ogg");
    }

    #[test]
    fn test_parse_ack_extracts_message() {
        let err = parse_ack("ACK [50@0] {playlistinfo} No such song");
        assert!(matches!(err, Error::Protocol(msg) if msg == "No such song"));
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("plain"), "\"plain\"");
        assert_eq!(quote("with \"quotes\""), "\"with \\\"quotes\\\"\"");
    }
}
