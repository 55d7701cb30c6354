use super::command::{ErrorRecord, ResultRecord, StatusSnapshot};
use super::paths::{command_timestamp, is_command_filename, BusPaths};
use super::{io_err, parse_err, BusError};
use crate::shared::fs_atomic::{atomic_write_file, move_file};
use std::fs;
use std::path::PathBuf;

pub fn write_result(paths: &BusPaths, record: &ResultRecord) -> Result<(), BusError> {
    let path = paths.result_file(&record.command_id);
    let body = serde_json::to_vec_pretty(record).map_err(|source| parse_err(&path, source))?;
    fs::write(&path, body).map_err(|source| io_err(&path, source))
}

pub fn write_error(paths: &BusPaths, record: &ErrorRecord) -> Result<(), BusError> {
    let path = paths.error_file(&record.command_id);
    let body = serde_json::to_vec_pretty(record).map_err(|source| parse_err(&path, source))?;
    fs::write(&path, body).map_err(|source| io_err(&path, source))
}

pub fn write_status(paths: &BusPaths, snapshot: &StatusSnapshot) -> Result<(), BusError> {
    let path = paths.status_file();
    let body = serde_json::to_vec_pretty(snapshot).map_err(|source| parse_err(&path, source))?;
    atomic_write_file(&path, &body).map_err(|source| io_err(&path, source))
}

pub fn load_status(paths: &BusPaths) -> Result<StatusSnapshot, BusError> {
    let path = paths.status_file();
    let raw = fs::read_to_string(&path).map_err(|source| io_err(&path, source))?;
    serde_json::from_str(&raw).map_err(|source| parse_err(&path, source))
}

/// Moves a processed command file verbatim out of the live directory.
pub fn archive_command(paths: &BusPaths, filename: &str) -> Result<(), BusError> {
    let from = paths.commands.join(filename);
    let to = paths.history.join(filename);
    move_file(&from, &to).map_err(|source| io_err(&from, source))
}

pub fn count_history(paths: &BusPaths) -> Result<usize, BusError> {
    Ok(history_entries(paths)?.len())
}

/// Evicts the entries with the smallest embedded timestamps until the store
/// fits the cap again. Returns how many files were removed.
pub fn prune_history(paths: &BusPaths, max_entries: usize) -> Result<usize, BusError> {
    let mut entries = history_entries(paths)?;
    entries.sort_by(|(a_name, _), (b_name, _)| {
        command_timestamp(a_name)
            .cmp(&command_timestamp(b_name))
            .then_with(|| a_name.cmp(b_name))
    });

    let mut evicted = 0usize;
    while entries.len() > max_entries {
        let (_, path) = entries.remove(0);
        fs::remove_file(&path).map_err(|source| io_err(&path, source))?;
        evicted += 1;
    }
    Ok(evicted)
}

fn history_entries(paths: &BusPaths) -> Result<Vec<(String, PathBuf)>, BusError> {
    let mut entries = Vec::new();
    let dir = fs::read_dir(&paths.history).map_err(|source| io_err(&paths.history, source))?;
    for entry in dir {
        let entry = entry.map_err(|source| io_err(&paths.history, source))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if is_command_filename(name) {
            entries.push((name.to_string(), path));
        }
    }
    Ok(entries)
}
