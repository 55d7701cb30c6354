use super::{io_err, BusError};
use std::fs;
use std::path::{Path, PathBuf};

pub const COMMAND_PREFIX: &str = "cmd_";

/// Directory layout under one connected root. The producer writes into
/// `commands/`; everything else belongs to the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusPaths {
    pub root: PathBuf,
    pub commands: PathBuf,
    pub results: PathBuf,
    pub errors: PathBuf,
    pub history: PathBuf,
}

impl BusPaths {
    pub fn from_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            commands: root.join("commands"),
            results: root.join("results"),
            errors: root.join("errors"),
            history: root.join("history"),
            root,
        }
    }

    pub fn status_file(&self) -> PathBuf {
        self.root.join("status.json")
    }

    pub fn required_directories(&self) -> Vec<PathBuf> {
        vec![
            self.commands.clone(),
            self.results.clone(),
            self.errors.clone(),
            self.history.clone(),
        ]
    }

    pub fn bootstrap(&self) -> Result<(), BusError> {
        for path in self.required_directories() {
            fs::create_dir_all(&path).map_err(|source| io_err(&path, source))?;
        }
        Ok(())
    }

    pub fn result_file(&self, command_id: &str) -> PathBuf {
        self.results.join(format!(
            "result_{}.json",
            sanitize_filename_component(command_id)
        ))
    }

    pub fn error_file(&self, command_id: &str) -> PathBuf {
        self.errors.join(format!(
            "error_cmd_{}.json",
            sanitize_filename_component(command_id)
        ))
    }
}

pub fn is_command_filename(name: &str) -> bool {
    let path = Path::new(name);
    if path.extension().and_then(|v| v.to_str()) != Some("json") {
        return false;
    }
    match path.file_stem().and_then(|v| v.to_str()) {
        Some(stem) => stem.len() > COMMAND_PREFIX.len() && stem.starts_with(COMMAND_PREFIX),
        None => false,
    }
}

/// Timestamp embedded in a command filename (`cmd_<millis>….json`); files
/// without one sort before everything else.
pub fn command_timestamp(name: &str) -> i64 {
    let Some(rest) = name.strip_prefix(COMMAND_PREFIX) else {
        return 0;
    };
    let digits: String = rest.chars().take_while(|ch| ch.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

fn sanitize_filename_component(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
