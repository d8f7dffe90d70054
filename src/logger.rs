//! Per-run log for the RoomVis binary.
//!
//! `init` opens `<data dir>/RoomVis/roomvis.log`, discarding whatever the
//! previous run left there. The data dir is `%APPDATA%` on Windows,
//! `~/Library/Application Support` on macOS and `$XDG_DATA_HOME` (or
//! `~/.local/share`) elsewhere.
//!
//! Library code logs through `log_info!`, `log_warn!` and `log_err!`. Until
//! `init` has run, lines go nowhere unless stderr echo is switched on.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

/// Application folder name inside the platform data directory.
pub const APP_DIR: &str = "RoomVis";

const LOG_NAME: &str = "roomvis.log";

struct Sink {
    path: PathBuf,
    file: Mutex<File>,
}

static SINK: OnceLock<Sink> = OnceLock::new();
static ECHO: AtomicBool = AtomicBool::new(false);

/// Where this run's log lives, once `init` succeeded.
pub fn log_path() -> Option<&'static Path> {
    SINK.get().map(|sink| sink.path.as_path())
}

/// Mirror every log line to stderr as well (CLI `--verbose`).
pub fn set_echo(enabled: bool) {
    ECHO.store(enabled, Ordering::Relaxed);
}

/// Append one raw line. Write failures are swallowed.
pub fn write_line(line: &str) {
    if ECHO.load(Ordering::Relaxed) {
        eprintln!("{}", line);
    }
    let Some(sink) = SINK.get() else { return };
    if let Ok(mut file) = sink.file.lock() {
        let _ = writeln!(file, "{}", line);
    }
}

/// Append `[time] [LEVEL] msg`.
pub fn write(level: &str, msg: &str) {
    if SINK.get().is_none() && !ECHO.load(Ordering::Relaxed) {
        return;
    }
    write_line(&format!("[{}] [{}] {}", clock(), level, msg));
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logger::write("INFO", &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logger::write("WARN", &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_err {
    ($($arg:tt)*) => {
        $crate::logger::write("ERROR", &format!($($arg)*))
    };
}

/// Open the run log and route panics into it. Later calls are ignored.
///
/// A log that cannot be opened is reported on stderr; the binary keeps
/// running without one.
pub fn init() {
    if SINK.get().is_some() {
        return;
    }
    let path = data_dir().join(APP_DIR).join(LOG_NAME);
    let file = match open_fresh(&path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("[logger] no log at {}: {}", path.display(), e);
            return;
        }
    };
    let shown = path.display().to_string();
    if SINK.set(Sink { path, file: Mutex::new(file) }).is_err() {
        return;
    }

    write_line(&format!("--- RoomVis run, unix time {} ---", epoch_secs().unwrap_or(0)));
    write_line(&format!("Log file: {}", shown));

    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        write_line(&format!("[{}] [PANIC] {}", clock(), info));
        default_hook(info);
    }));
}

fn open_fresh(path: &Path) -> io::Result<File> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    OpenOptions::new().create(true).write(true).truncate(true).open(path)
}

/// Platform data directory (without the app sub-folder).
pub fn data_dir() -> PathBuf {
    let var = |key: &str| std::env::var_os(key).map(PathBuf::from);
    if cfg!(target_os = "windows")
        && let Some(appdata) = var("APPDATA")
    {
        return appdata;
    }
    if cfg!(target_os = "macos")
        && let Some(home) = var("HOME")
    {
        return home.join("Library/Application Support");
    }
    var("XDG_DATA_HOME")
        .or_else(|| var("HOME").map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn epoch_secs() -> Option<u64> {
    SystemTime::now().duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs())
}

/// UTC wall clock as HH:MM:SS.
fn clock() -> String {
    match epoch_secs() {
        Some(secs) => format_clock(secs),
        None => "--:--:--".to_string(),
    }
}

fn format_clock(secs: u64) -> String {
    let day = secs % 86_400;
    format!("{:02}:{:02}:{:02}", day / 3600, day % 3600 / 60, day % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_wraps_at_midnight() {
        assert_eq!(format_clock(0), "00:00:00");
        assert_eq!(format_clock(86_399), "23:59:59");
        assert_eq!(format_clock(86_400 + 3_725), "01:02:05");
    }

    #[test]
    fn logging_before_init_is_silent() {
        assert!(log_path().is_none());
        crate::log_info!("dropped {}", 1);
    }
}
