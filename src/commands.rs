use crate::bridge::ShellBackend;
use crate::bus::control::BusEvent;
use crate::bus::{results, BusPaths};
use crate::config::{load_config_for_root, BusConfig};
use crate::routing::CommandRouter;
use crate::runtime::{drive, BusHandle};
use std::path::PathBuf;
use std::sync::Arc;

const USAGE: &str = "usage:\n  \
filebus start <directory>   run the bus against a watched directory\n  \
filebus status <directory>  print the latest status snapshot\n  \
filebus help                show this message";

pub fn run_cli(args: Vec<String>) -> Result<String, String> {
    let mut args = args.into_iter();
    match args.next().as_deref() {
        None | Some("help") | Some("--help") => Ok(USAGE.to_string()),
        Some("start") => {
            let root = required_directory(args.next())?;
            start(root)
        }
        Some("status") => {
            let root = required_directory(args.next())?;
            status(root)
        }
        Some(other) => Err(format!("unknown command `{other}`\n{USAGE}")),
    }
}

fn required_directory(arg: Option<String>) -> Result<PathBuf, String> {
    let raw = arg.ok_or_else(|| format!("missing <directory> argument\n{USAGE}"))?;
    let path = PathBuf::from(raw);
    if path.is_file() {
        return Err(format!("{} is a file, expected a directory", path.display()));
    }
    Ok(path)
}

fn start(root: PathBuf) -> Result<String, String> {
    let config = load_config_for_root(&root).map_err(|e| e.to_string())?;
    let router = build_router(&config);

    let handle = BusHandle::spawn(config);
    handle
        .set_directory(root.clone())
        .map_err(|e| e.to_string())?;
    handle.start_polling().map_err(|e| e.to_string())?;
    println!("filebus watching {}", root.display());

    drive(&handle, router, |event| match event {
        BusEvent::PollingStarted => println!("polling started"),
        BusEvent::PollingStopped => println!("polling stopped"),
        BusEvent::CommandProcessing { command_id } => {
            println!("processing {command_id}");
        }
        BusEvent::CommandComplete {
            command_id,
            status,
            stats,
        } => {
            println!(
                "{command_id} finished: {status} (processed {}, ok {}, failed {}, timeout {})",
                stats.processed, stats.succeeded, stats.failed, stats.timeout
            );
        }
        BusEvent::Error { message } | BusEvent::PollError { message } => {
            eprintln!("bus error: {message}");
        }
        _ => {}
    });

    Ok("bus stopped".to_string())
}

fn build_router(config: &BusConfig) -> Arc<CommandRouter> {
    let router = CommandRouter::new(Arc::new(ShellBackend::default()));
    for channel in &config.channels {
        router.register_channel(channel.clone(), Arc::new(ShellBackend::default()));
    }
    Arc::new(router)
}

fn status(root: PathBuf) -> Result<String, String> {
    let paths = BusPaths::from_root(root);
    let snapshot = results::load_status(&paths).map_err(|e| e.to_string())?;
    serde_json::to_string_pretty(&snapshot).map_err(|e| e.to_string())
}
