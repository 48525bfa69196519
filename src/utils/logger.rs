use anyhow::{Context, Result};
use colored::Colorize;
use env_logger::{Builder, Target};
use log::Level;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// Timestamp layout for file records: `2024-05-01 13:00:00,123`.
const FILE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S,%3f";

/// Install the global logger.
///
/// With `log_file`, records are appended there as `timestamp - LEVEL - message` so an unattended
/// run leaves a greppable trail of per-batch outcomes. Without it, records go to stderr with the
/// colored package prefix.
pub fn setup_logging(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    use log::LevelFilter;

    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    let mut builder = Builder::from_default_env();
    builder
        .filter_level(LevelFilter::Warn) // Default: only warnings from dependencies
        .filter_module(env!("CARGO_PKG_NAME"), level); // Our crate: use requested level

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create log directory {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file {}", path.display()))?;
            builder
                .target(Target::Pipe(Box::new(file)))
                .format(|buf, record| {
                    writeln!(
                        buf,
                        "{} - {} - {}",
                        chrono::Local::now().format(FILE_TIMESTAMP_FORMAT),
                        record.level(),
                        record.args()
                    )
                });
        }
        None => {
            builder.format(|buf, record| {
                let name = env!("CARGO_PKG_NAME");
                let line = match record.level() {
                    Level::Error | Level::Warn => {
                        let level_str = match record.level() {
                            Level::Warn => "WARN".yellow(),
                            Level::Error => "ERROR".red(),
                            _ => unreachable!(),
                        };
                        let path = record.target().to_string().white();
                        format!("[{} {} {}] {}", name.cyan(), level_str, path, record.args())
                    }
                    _ => format!("[{}] {}", name.cyan(), record.args()),
                };
                writeln!(buf, "{}", line)
            });
        }
    }

    builder.try_init().context("install logger")
}
