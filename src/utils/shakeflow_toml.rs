//! Load `.shakeflow.toml` (CLI only). Lib callers pass [`DispatchOpts`](crate::DispatchOpts) and
//! source arguments directly.

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{DiscoveryMode, GatingPolicy, Opts};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ShakeflowToml {
    #[serde(default)]
    pipeline: PipelineSection,
    #[serde(default)]
    files: FilesSection,
    #[serde(default)]
    times: TimesSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PipelineSection {
    batch_size: Option<usize>,
    poll_interval_ms: Option<u64>,
    gating: Option<GatingPolicy>,
    drain_on_stop: Option<bool>,
    verbose: Option<bool>,
    log_file: Option<String>,
    command: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FilesSection {
    root: Option<String>,
    suffix: Option<String>,
    mode: Option<DiscoveryMode>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TimesSection {
    /// RFC 3339 string, e.g. `"2024-05-01T00:00:00Z"`.
    start: Option<DateTime<Utc>>,
    /// Seconds.
    interval: Option<i64>,
    /// Seconds.
    lag: Option<i64>,
    tick_ms: Option<u64>,
}

/// Load the config at `path`. `Ok(None)` when the file does not exist; a file that exists but
/// does not parse is an error so a typo never silently falls back to defaults.
pub(crate) fn load_shakeflow_toml(path: &Path) -> Result<Option<ShakeflowToml>> {
    if !path.exists() {
        return Ok(None);
    }
    let s = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let parsed = toml::from_str(&s).with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(parsed))
}

/// Overwrite opts field from file when present.
macro_rules! apply_file_opt {
    ($sec:expr, $opts:expr, $sec_field:ident => $opts_field:ident) => {
        if let Some(v) = $sec.$sec_field.clone() {
            $opts.$opts_field = v;
        }
    };
}

/// Apply file config to opts (only fields present in the file). Call before applying CLI.
pub(crate) fn apply_file_to_opts(file: &ShakeflowToml, opts: &mut Opts) -> Result<()> {
    let pipeline = &file.pipeline;
    apply_file_opt!(pipeline, opts, batch_size => batch_size);
    if let Some(ms) = pipeline.poll_interval_ms {
        opts.poll_interval = Duration::from_millis(ms);
    }
    if let Some(g) = pipeline.gating {
        opts.gating = Some(g);
    }
    apply_file_opt!(pipeline, opts, drain_on_stop => drain_on_stop);
    apply_file_opt!(pipeline, opts, verbose => verbose);
    if let Some(ref p) = pipeline.log_file {
        opts.log_file = Some(PathBuf::from(p));
    }
    apply_file_opt!(pipeline, opts, command => command);

    let files = &file.files;
    if let Some(ref p) = files.root {
        opts.root = PathBuf::from(p);
    }
    apply_file_opt!(files, opts, suffix => suffix);
    apply_file_opt!(files, opts, mode => mode);

    let times = &file.times;
    if let Some(start) = times.start {
        opts.start = Some(start);
    }
    if let Some(secs) = times.interval {
        opts.interval = TimeDelta::try_seconds(secs).context("times.interval out of range")?;
    }
    if let Some(secs) = times.lag {
        opts.lag = TimeDelta::try_seconds(secs).context("times.lag out of range")?;
    }
    if let Some(ms) = times.tick_ms {
        opts.tick = Duration::from_millis(ms);
    }
    Ok(())
}
