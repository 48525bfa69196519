//! Task collaborator: the opaque per-batch work the dispatcher hands units to.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, SecondsFormat, Utc};
use log::debug;
use std::ffi::OsString;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use crate::utils::config::STDERR_TAIL_LINES;

/// Batch in, artifact out. Any `Err` is logged by the dispatcher and the batch is not retried.
pub trait Task<U> {
    type Artifact: Debug;

    fn invoke(&mut self, batch: &[U]) -> Result<Self::Artifact>;
}

impl<U, A, F> Task<U> for F
where
    F: FnMut(&[U]) -> Result<A>,
    A: Debug,
{
    type Artifact = A;

    fn invoke(&mut self, batch: &[U]) -> Result<A> {
        self(batch)
    }
}

/// How a unit is passed on a child process command line.
pub trait UnitArg {
    fn to_arg(&self) -> OsString;
}

impl UnitArg for PathBuf {
    fn to_arg(&self) -> OsString {
        self.as_os_str().to_os_string()
    }
}

/// Segment starts go out as RFC 3339 with a `Z` suffix, e.g. `2024-05-01T13:00:00Z`.
impl UnitArg for DateTime<Utc> {
    fn to_arg(&self) -> OsString {
        self.to_rfc3339_opts(SecondsFormat::AutoSi, true).into()
    }
}

/// Runs `program args... unit1 unit2 ...` once per batch and waits for it.
/// A non-zero exit is a failure carrying the tail of the child's stderr.
#[derive(Clone, Debug)]
pub struct CommandTask {
    program: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
}

impl CommandTask {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            current_dir: None,
        }
    }

    /// Build from `[program, args...]`, as collected from the CLI or config file.
    pub fn from_argv(argv: &[String]) -> Result<Self> {
        let Some((program, args)) = argv.split_first() else {
            bail!("no command given; pass it after `--` or set `pipeline.command` in the config");
        };
        Ok(Self::new(program.clone(), args.to_vec()))
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl<U: UnitArg> Task<U> for CommandTask {
    type Artifact = ExitStatus;

    fn invoke(&mut self, batch: &[U]) -> Result<ExitStatus> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).args(batch.iter().map(UnitArg::to_arg));
        if let Some(ref dir) = self.current_dir {
            cmd.current_dir(dir);
        }
        let output = cmd
            .output()
            .with_context(|| format!("spawn {}", self.program))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            debug!("{} stdout:\n{}", self.program, stdout.trim_end());
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{} exited with {}{}",
                self.program,
                output.status,
                tail_lines(&stderr, STDERR_TAIL_LINES)
            );
        }
        Ok(output.status)
    }
}

/// Last `n` non-empty lines of `text`, prefixed with a newline, or empty when there are none.
fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() {
        return String::new();
    }
    let start = lines.len().saturating_sub(n);
    format!("\n{}", lines[start..].join("\n"))
}
