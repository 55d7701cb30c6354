use super::{io_err, parse_err, BusError};
use crate::config::BusConfig;
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

/// Reads a command file until its content stops changing, then parses it.
/// The watched directory offers no locking against a producer that is still
/// writing; repeated identical reads are the only consume barrier available.
/// A file that never settles within the attempt budget is malformed as far
/// as the caller is concerned.
pub fn read_stable(path: &Path, config: &BusConfig) -> Result<Value, BusError> {
    let delay = Duration::from_millis(config.stability_delay_ms);
    let raw = read_stable_with(
        || fs::read_to_string(path).map_err(|source| io_err(path, source)),
        || thread::sleep(delay),
        config,
        path,
    )?;
    serde_json::from_str(&raw).map_err(|source| parse_err(path, source))
}

// The retry discipline, generic over the read and the wait so it can be
// driven deterministically in tests.
pub(crate) fn read_stable_with<R, W>(
    mut read: R,
    mut wait: W,
    config: &BusConfig,
    path: &Path,
) -> Result<String, BusError>
where
    R: FnMut() -> Result<String, BusError>,
    W: FnMut(),
{
    let mut last = String::new();
    let mut stable = 0u32;
    let mut attempts = 0u32;

    while stable < config.stability_checks && attempts < config.max_read_attempts {
        attempts += 1;
        let content = read()?;
        if content == last {
            stable += 1;
        } else {
            stable = 0;
            last = content;
        }
        if stable < config.stability_checks {
            wait();
        }
    }

    if attempts >= config.max_read_attempts {
        return Err(BusError::Unstable {
            path: path.display().to_string(),
            attempts,
        });
    }
    Ok(last)
}
