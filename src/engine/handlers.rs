//! CLI command handlers: `files` and `times`.

use anyhow::{Context, Result, bail};
use chrono::{TimeDelta, Utc};
use log::{debug, info, warn};
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use crate::engine::arg_parser::{Cli, Commands, FilesArgs, TimesArgs};
use crate::engine::task::CommandTask;
use crate::pipeline::{
    build_directory_source, build_interval_source, install_ctrlc_handler, run_pipeline,
};
use crate::source::UnitSource;
use crate::utils::{apply_file_to_opts, load_shakeflow_toml, setup_logging};
use crate::{DispatchSummary, GatingPolicy, Opts};

/// Defaults, then the config file, then CLI flags.
pub fn setup_opts(cli: &Cli) -> Result<Opts> {
    let mut opts = Opts::default();
    let config_path = cli.config_path();
    match load_shakeflow_toml(&config_path)? {
        Some(file) => apply_file_to_opts(&file, &mut opts)
            .with_context(|| format!("apply {}", config_path.display()))?,
        None if cli.config.is_some() => {
            bail!("config file not found: {}", config_path.display())
        }
        None => {}
    }
    apply_cli_to_opts(cli, &mut opts)?;
    Ok(opts)
}

fn apply_cli_to_opts(cli: &Cli, opts: &mut Opts) -> Result<()> {
    if let Some(n) = cli.batch_size {
        opts.batch_size = n;
    }
    if let Some(ms) = cli.poll_interval_ms {
        opts.poll_interval = Duration::from_millis(ms);
    }
    if cli.gating.is_some() {
        opts.gating = cli.gating;
    }
    if let Some(v) = cli.drain_on_stop {
        opts.drain_on_stop = v;
    }
    if let Some(ref p) = cli.log_file {
        opts.log_file = Some(p.clone());
    }
    if let Some(v) = cli.verbose {
        opts.verbose = v;
    }
    match &cli.command {
        Commands::Files(args) => apply_files_args(args, opts),
        Commands::Times(args) => apply_times_args(args, opts)?,
    }
    Ok(())
}

fn apply_files_args(args: &FilesArgs, opts: &mut Opts) {
    if let Some(ref dir) = args.dir {
        opts.root = dir.clone();
    }
    if let Some(ref s) = args.suffix {
        opts.suffix = s.clone();
    }
    if let Some(m) = args.mode {
        opts.mode = m;
    }
    if !args.command.is_empty() {
        opts.command = args.command.clone();
    }
}

fn apply_times_args(args: &TimesArgs, opts: &mut Opts) -> Result<()> {
    if let Some(start) = args.start {
        opts.start = Some(start);
    }
    if let Some(secs) = args.start_ago {
        let start = TimeDelta::try_seconds(secs)
            .and_then(|ago| Utc::now().checked_sub_signed(ago))
            .context("--start-ago out of range")?;
        opts.start = Some(start);
    }
    if let Some(secs) = args.interval {
        opts.interval = TimeDelta::try_seconds(secs).context("--interval out of range")?;
    }
    if let Some(secs) = args.lag {
        opts.lag = TimeDelta::try_seconds(secs).context("--lag out of range")?;
    }
    if let Some(ms) = args.tick_ms {
        opts.tick = Duration::from_millis(ms);
    }
    if !args.command.is_empty() {
        opts.command = args.command.clone();
    }
    Ok(())
}

/// Parse config, set up logging and Ctrl+C, then run the selected pipeline until stopped.
pub fn handle_run(cli: &Cli) -> Result<()> {
    let opts = setup_opts(cli)?;
    setup_logging(opts.verbose, opts.log_file.as_deref())?;
    debug!(
        "{} CONFIG:{:#?}",
        env!("CARGO_PKG_NAME").to_string().to_uppercase(),
        opts
    );

    let task = CommandTask::from_argv(&opts.command)?;
    let cancel = install_ctrlc_handler()?;

    let summary = match cli.command {
        Commands::Files(_) => handle_files(&opts, task, &cancel)?,
        Commands::Times(_) => handle_times(&opts, task, &cancel)?,
    };
    if summary.failed > 0 {
        warn!(
            "{} of {} batches failed; see the log for the affected units",
            summary.failed,
            summary.batches
        );
    }
    Ok(())
}

fn handle_files(
    opts: &Opts,
    task: CommandTask,
    cancel: &AtomicBool,
) -> Result<DispatchSummary> {
    let source = build_directory_source(opts)?;
    info!(
        "Files under {} ({}), {} discovered at start",
        source.root().display(),
        source.mode(),
        source.discovered().len()
    );
    let dispatch = opts.dispatch_opts(GatingPolicy::Full);
    run_pipeline(source, task, &dispatch, cancel, |_| {})
}

fn handle_times(
    opts: &Opts,
    task: CommandTask,
    cancel: &AtomicBool,
) -> Result<DispatchSummary> {
    let source = build_interval_source(opts)?;
    let dispatch = opts.dispatch_opts(GatingPolicy::Ready);
    run_pipeline(source, task, &dispatch, cancel, |_| {})
}
