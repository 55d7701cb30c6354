use crate::shared::time::now_millis;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn bus_log_path(root: &Path) -> PathBuf {
    root.join("logs/bus.log")
}

// Best-effort by contract: the bus must keep running even when the log file
// is unwritable, so every failure here is swallowed.
pub fn append_bus_log(root: &Path, level: &str, event: &str, message: &str) {
    let payload = serde_json::json!({
        "timestamp": now_millis(),
        "level": level,
        "event": event,
        "message": message,
    });

    let Ok(line) = serde_json::to_string(&payload) else {
        return;
    };

    let path = bus_log_path(root);
    if let Some(parent) = path.parent() {
        if fs::create_dir_all(parent).is_err() {
            return;
        }
    }
    let Ok(mut file) = fs::OpenOptions::new().create(true).append(true).open(path) else {
        return;
    };
    let _ = writeln!(file, "{line}");
}
