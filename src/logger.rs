//! Session logger — appends engine log output to a single file in the OS
//! data directory.
//!
//! The file is truncated at `init`, so it only ever holds the most recent
//! session. Host applications embedding the engine call [`init`] once;
//! library code logs through the `log_info!` / `log_warn!` / `log_err!`
//! macros, which are no-ops until the logger is initialised.
//!
//! Log location:
//!   Windows:  `%APPDATA%\LayerForge\layerforge.log`
//!   Linux:    `~/.local/share/LayerForge/layerforge.log`
//!   macOS:    `~/Library/Application Support/LayerForge/layerforge.log`

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

static LOG_FILE: OnceLock<Mutex<File>> = OnceLock::new();
static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Returns the path of the current session log, if the logger is active.
pub fn log_path() -> Option<&'static PathBuf> {
    LOG_PATH.get()
}

/// Write a raw line to the session log. I/O errors are swallowed so that
/// logging can never take the engine down.
pub fn write_line(line: &str) {
    if let Some(mutex) = LOG_FILE.get()
        && let Ok(mut file) = mutex.lock()
    {
        let _ = writeln!(file, "{}", line);
    }
}

/// Write a timestamped, level-tagged line.
pub fn write(level: &str, msg: &str) {
    write_line(&format!("[{}] [{}] {}", clock_stamp(), level, msg));
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logger::write("INFO", &format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logger::write("WARN", &format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_err {
    ($($arg:tt)*) => {
        $crate::logger::write("ERROR", &format!($($arg)*));
    };
}

/// Initialise the session logger: create (or truncate) the log file and
/// install a panic hook that mirrors panic messages into it before the
/// default handler runs. Safe to call more than once; later calls are
/// ignored.
pub fn init() {
    if LOG_FILE.get().is_some() {
        return;
    }

    let path = log_file_path();
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&path);

    match file {
        Ok(f) => {
            let _ = LOG_PATH.set(path.clone());
            let _ = LOG_FILE.set(Mutex::new(f));
        }
        Err(e) => {
            // No log file — not fatal, the macros stay silent.
            eprintln!("[logger] failed to open log file {:?}: {}", path, e);
            return;
        }
    }

    write_line(&format!(
        "=== layerforge session started (unix {}) ===",
        unix_seconds()
    ));
    write_line(&format!("Log file: {}", path.display()));
    write_line("");

    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        write_line(&format!("[{}] [PANIC] {}", clock_stamp(), info));
        prev(info);
    }));
}

fn log_file_path() -> PathBuf {
    data_dir().join("LayerForge").join("layerforge.log")
}

/// Platform data directory (without the app sub-folder).
fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata);
        }
    }
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support");
        }
    }
    // Linux / fallback
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    PathBuf::from(".")
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Wall-clock HH:MM:SS within the current day — enough for a session log.
fn clock_stamp() -> String {
    let secs = unix_seconds();
    format!(
        "{:02}:{:02}:{:02}",
        (secs % 86400) / 3600,
        (secs % 3600) / 60,
        secs % 60
    )
}
