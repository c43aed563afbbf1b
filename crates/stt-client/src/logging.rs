//! Client logging: a size-rotated file under the XDG state directory.
//!
//! Logs go to a file, never to stdout: in `type`/`clipboard` modes stdout is
//! part of the output contract, and in daemon mode there is no terminal at
//! all. The file rotates at 5 MiB keeping three backups (`client.log.1`..`3`).

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing_subscriber::EnvFilter;

/// Rotate when the file would exceed this size.
const MAX_LOG_BYTES: u64 = 5 * 1024 * 1024;

/// Rotated files kept around.
const LOG_BACKUPS: usize = 3;

/// Install the global subscriber writing to `client.log`.
///
/// `-v` lowers the default level to debug; `RUST_LOG` overrides everything.
pub fn init(verbose: bool) -> io::Result<()> {
    let dir = resolve_log_dir(&|key| std::env::var(key).ok());
    std::fs::create_dir_all(&dir)?;

    let writer = RotatingWriter::open(dir.join("client.log"), MAX_LOG_BYTES, LOG_BACKUPS)?;
    let sink = FileSink(Arc::new(Mutex::new(writer)));

    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(move || sink.clone())
        .with_ansi(false)
        .init();
    Ok(())
}

/// Log directory resolution: `STT_LOG_DIR`, else `$XDG_STATE_HOME/stt`,
/// else `~/.local/state/stt`.
pub fn resolve_log_dir(lookup: &dyn Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(dir) = lookup("STT_LOG_DIR").filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }
    let state_home = lookup("XDG_STATE_HOME")
        .filter(|v| !v.is_empty())
        .map_or_else(
            || {
                let home = lookup("HOME").unwrap_or_else(|| ".".to_string());
                PathBuf::from(home).join(".local/state")
            },
            PathBuf::from,
        );
    state_home.join("stt")
}

// ── Size-based rotation ────────────────────────────────────────────

/// An `io::Write` that renames `log` → `log.1` → `log.2` → ... when the
/// configured size would be exceeded, dropping the oldest backup.
pub struct RotatingWriter {
    path: PathBuf,
    max_bytes: u64,
    backups: usize,
    file: File,
    written: u64,
}

impl RotatingWriter {
    pub fn open(path: PathBuf, max_bytes: u64, backups: usize) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path,
            max_bytes,
            backups,
            file,
            written,
        })
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{index}"));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;

        // Shift the backup chain, oldest first.
        let _ = std::fs::remove_file(self.backup_path(self.backups));
        for index in (1..self.backups).rev() {
            let _ = std::fs::rename(self.backup_path(index), self.backup_path(index + 1));
        }
        if self.backups > 0 {
            let _ = std::fs::rename(&self.path, self.backup_path(1));
        }

        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written + buf.len() as u64 > self.max_bytes && self.written > 0 {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Cloneable `Write` handle for `tracing_subscriber`'s `with_writer`.
#[derive(Clone)]
struct FileSink(Arc<Mutex<RotatingWriter>>);

impl Write for FileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.0.lock() {
            Ok(mut writer) => writer.write(buf),
            Err(_) => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.0.lock() {
            Ok(mut writer) => writer.flush(),
            Err(_) => Ok(()),
        }
    }
}
