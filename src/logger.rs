//! Remote line logger: a `log::Log` implementation that ships each
//! record to a listening collector over a plain TCP connection, one
//! `write` per record, no batching or retry — a dropped connection
//! just drops log lines, which is what a diagnostic sink should do
//! rather than back-pressure the application.

use std::io::Write;
use std::net::TcpStream;
use std::sync::Mutex;

use log::{Level, Log, Metadata, Record};

/// Longest formatted line this sink will forward; longer records are
/// truncated rather than rejected.
const MAX_LINE: usize = 128;

fn level_tag(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WORN",
        Level::Info => "INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

/// A level one step more severe than `log::Level::Error`, for callers
/// that want to flag unrecoverable conditions distinctly from ordinary
/// errors. Not part of the `log` crate's level enum, so it's spelled
/// out as a formatting choice rather than a `Level` variant.
pub fn format_fatal(text: &str) -> String {
    format_line("FATAL", text)
}

fn format_line(tag: &str, text: &str) -> String {
    let mut line = format!("{tag}: {text}");
    if line.len() > MAX_LINE {
        line.truncate(MAX_LINE);
    }
    line
}

/// Ships formatted log lines to a collector at `addr`, one TCP
/// connection reused across calls. Connection failures are swallowed —
/// logging must never be the reason the host application fails.
pub struct RemoteLog {
    addr: String,
    conn: Mutex<Option<TcpStream>>,
    level: Level,
}

impl RemoteLog {
    pub fn new(addr: impl Into<String>, level: Level) -> RemoteLog {
        RemoteLog {
            addr: addr.into(),
            conn: Mutex::new(None),
            level,
        }
    }

    /// Connects (or reconnects) to the collector at `127.0.0.1:4040`.
    pub fn connect_default(level: Level) -> RemoteLog {
        RemoteLog::new("127.0.0.1:4040", level)
    }

    fn send(&self, line: &str) {
        let mut conn = self.conn.lock().unwrap();

        if conn.is_none() {
            *conn = TcpStream::connect(&self.addr).ok();
        }

        if let Some(stream) = conn.as_mut() {
            if stream.write_all(line.as_bytes()).is_err() {
                *conn = None;
            }
        }
    }
}

impl Log for RemoteLog {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_line(level_tag(record.level()), &record.args().to_string());
        self.send(&line);
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_with_level_tag_and_truncates() {
        let short = format_line("INFO", "worker started");
        assert_eq!(short, "INFO: worker started");

        let long_text = "x".repeat(200);
        let long = format_line("DEBUG", &long_text);
        assert_eq!(long.len(), MAX_LINE);
    }

    #[test]
    fn fatal_is_spelled_out_since_log_level_has_no_such_variant() {
        assert_eq!(format_fatal("panic recovered"), "FATAL: panic recovered");
    }
}
