//! Per-session plain-text log.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use parking_lot::Mutex;

use crate::config::LOG_MAX_BYTES;

/// Newline-delimited session log: `[YYYY-MM-DD HH:MM:SS.fff] LEVEL scope: message`.
///
/// Capped at 10 MiB per session; at overflow a single `[LOG TRUNCATED]`
/// line is written and further lines are dropped. Writes are best-effort -
/// logging must never take a session down, so I/O errors only disable the
/// log for the remainder of the session.
pub(crate) struct SessionLog {
    inner: Mutex<Inner>,
}

struct Inner {
    writer: Option<BufWriter<File>>,
    written: u64,
    truncated: bool,
}

impl SessionLog {
    /// Creates the log file at `path`.
    pub fn create(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            inner: Mutex::new(Inner {
                writer: Some(BufWriter::new(file)),
                written: 0,
                truncated: false,
            }),
        })
    }

    pub fn info(&self, scope: &str, message: &str) {
        tracing::info!(scope, "{message}");
        self.line("INFO", scope, message);
    }

    pub fn warn(&self, scope: &str, message: &str) {
        tracing::warn!(scope, "{message}");
        self.line("WARN", scope, message);
    }

    pub fn error(&self, scope: &str, message: &str) {
        tracing::error!(scope, "{message}");
        self.line("ERROR", scope, message);
    }

    fn line(&self, level: &str, scope: &str, message: &str) {
        let mut inner = self.inner.lock();
        if inner.truncated {
            return;
        }
        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let line = format!("[{stamp}] {level} {scope}: {message}\n");
        let written = inner.written;

        let Some(writer) = inner.writer.as_mut() else {
            return;
        };

        if written + line.len() as u64 > LOG_MAX_BYTES {
            let _ = writer.write_all(b"[LOG TRUNCATED]\n");
            let _ = writer.flush();
            inner.truncated = true;
            return;
        }

        match writer.write_all(line.as_bytes()) {
            Ok(()) => inner.written += line.len() as u64,
            Err(_) => inner.writer = None,
        }
    }

    /// Flushes and closes the log file. Further lines are dropped.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if let Some(mut writer) = inner.writer.take() {
            let _ = writer.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_line_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.txt");

        let log = SessionLog::create(&path).unwrap();
        log.info("session", "recording started");
        log.warn("queue", "dropped block #1");
        log.close();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();

        let first = lines.next().unwrap();
        assert!(first.ends_with("INFO session: recording started"), "{first}");
        assert!(first.starts_with('['));
        // "[YYYY-MM-DD HH:MM:SS.fff]" prefix is 25 chars.
        assert_eq!(&first[24..25], "]");

        let second = lines.next().unwrap();
        assert!(second.ends_with("WARN queue: dropped block #1"), "{second}");
        assert!(lines.next().is_none());
    }

    #[test]
    fn test_writes_after_close_are_dropped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.txt");

        let log = SessionLog::create(&path).unwrap();
        log.info("a", "one");
        log.close();
        log.info("a", "two");

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn test_cap_writes_single_truncation_marker() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.txt");

        let log = SessionLog::create(&path).unwrap();
        // Force the cap without writing 10 MiB for real.
        log.inner.lock().written = LOG_MAX_BYTES - 10;

        log.info("cap", "this line no longer fits");
        log.info("cap", "neither does this one");
        log.close();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "[LOG TRUNCATED]\n");
    }
}
