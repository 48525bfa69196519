//! File-arrival source: seeds from a recursive walk, then appends files reported created by a
//! `notify` watcher scoped to the root.

use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{debug, error, info, warn};
use notify::event::{CreateKind, EventKind, ModifyKind, RenameMode};
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use walkdir::WalkDir;

use crate::DiscoveryMode;
use crate::engine::tools::should_include_unit;
use crate::utils::config::PackagePaths;

use super::{DiscoveredSet, SourceError, SourceFault, UnitSource};

/// Messages from the watcher callback (and from `stop`) to the producer thread.
enum WatchMessage {
    Event(Event),
    Error(String),
    Stop,
}

/// Discovers files under `root` whose path ends with `suffix`.
pub struct DirectoryUnitSource {
    root: PathBuf,
    suffix: String,
    mode: DiscoveryMode,
    discovered: DiscoveredSet<PathBuf>,
    fault: SourceFault,
    watcher: Option<RecommendedWatcher>,
    control_tx: Option<Sender<WatchMessage>>,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for DirectoryUnitSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryUnitSource")
            .field("root", &self.root)
            .field("suffix", &self.suffix)
            .field("mode", &self.mode)
            .field("discovered", &self.discovered.len())
            .field("watching", &self.watcher.is_some())
            .finish()
    }
}

impl DirectoryUnitSource {
    /// Validate `root` and, for [`DiscoveryMode::FromOrigin`], seed with every matching file
    /// already present (sorted ascending). Nothing is watched until [`start`](UnitSource::start).
    pub fn new(
        root: impl AsRef<Path>,
        mode: DiscoveryMode,
        suffix: impl Into<String>,
    ) -> Result<Self, SourceError> {
        let root = canonical_root(root.as_ref())?;
        let suffix = suffix.into();
        let discovered = match mode {
            DiscoveryMode::FromOrigin => {
                let seeded = collect_matching_files(&root, &suffix)?;
                info!(
                    "Seeded {} existing '{}' files under {}",
                    seeded.len(),
                    suffix,
                    root.display()
                );
                DiscoveredSet::from_units(seeded)
            }
            DiscoveryMode::FromNow => DiscoveredSet::new(),
        };
        Ok(Self {
            root,
            suffix,
            mode,
            discovered,
            fault: SourceFault::new(),
            watcher: None,
            control_tx: None,
            handle: None,
        })
    }

    /// Same as [`new`](Self::new) with the mode given as `"from_origin"` or `"from_now"`.
    pub fn with_mode_str(
        root: impl AsRef<Path>,
        mode: &str,
        suffix: impl Into<String>,
    ) -> Result<Self, SourceError> {
        Self::new(root, mode.parse()?, suffix)
    }

    /// Canonical root being watched. Discovered paths are prefixed with it.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mode(&self) -> DiscoveryMode {
        self.mode
    }

    /// Tear down a half-started watch so a failed `start` leaves no thread behind.
    fn abort_start(&mut self, err: SourceError) -> SourceError {
        self.stop();
        if let Err(join_err) = self.join() {
            warn!("watch teardown after failed start: {}", join_err);
        }
        err
    }
}

impl UnitSource for DirectoryUnitSource {
    type Unit = PathBuf;

    fn discovered(&self) -> DiscoveredSet<PathBuf> {
        self.discovered.clone()
    }

    fn fault(&self) -> SourceFault {
        self.fault.clone()
    }

    fn start(&mut self) -> Result<(), SourceError> {
        if self.handle.is_some() {
            return Ok(());
        }
        let (tx, rx) = unbounded::<WatchMessage>();

        let suffix = self.suffix.clone();
        let discovered = self.discovered.clone();
        let fault = self.fault.clone();
        let handle = thread::Builder::new()
            .name(PackagePaths::get().watch_thread_name().to_string())
            .spawn(move || run_watch_loop(rx, &suffix, &discovered, &fault))
            .map_err(|e| SourceError::io("spawn watch thread", e))?;
        self.handle = Some(handle);
        self.control_tx = Some(tx.clone());

        let watcher = match init_watcher(&self.root, tx) {
            Ok(w) => w,
            Err(e) => return Err(self.abort_start(e)),
        };
        self.watcher = Some(watcher);
        info!("Watching {} for '{}' files", self.root.display(), self.suffix);

        // Files created between the seed walk and the subscription would otherwise be missed.
        if self.mode == DiscoveryMode::FromOrigin {
            let found = match collect_matching_files(&self.root, &self.suffix) {
                Ok(found) => found,
                Err(e) => return Err(self.abort_start(e)),
            };
            for path in found {
                if self.discovered.push(path.clone()) {
                    debug!("discovered (reconcile) {}", path.display());
                }
            }
        }
        Ok(())
    }

    fn stop(&mut self) {
        // Dropping the watcher unsubscribes and drops its sender.
        if self.watcher.take().is_some() {
            debug!("Unwatching {}", self.root.display());
        }
        if let Some(tx) = self.control_tx.take() {
            let _ = tx.send(WatchMessage::Stop);
        }
    }

    fn join(&mut self) -> Result<(), SourceError> {
        match self.handle.take() {
            Some(h) => h.join().map_err(|_| SourceError::Panicked("watch")),
            None => Ok(()),
        }
    }
}

impl Drop for DirectoryUnitSource {
    fn drop(&mut self) {
        self.stop();
        let _ = self.join();
    }
}

fn canonical_root(root: &Path) -> Result<PathBuf, SourceError> {
    if !root.exists() {
        return Err(SourceError::NotFound(root.to_path_buf()));
    }
    if !root.is_dir() {
        return Err(SourceError::InvalidArgument(format!(
            "watch root is not a directory: {}",
            root.display()
        )));
    }
    root.canonicalize()
        .map_err(|e| SourceError::io(format!("canonicalize {}", root.display()), e))
}

/// Every file under `root` (recursive) whose path ends with `suffix`, sorted ascending.
/// Unreadable subtrees are skipped with a warning; an unreadable root is an error.
pub fn collect_matching_files(root: &Path, suffix: &str) -> Result<Vec<PathBuf>, SourceError> {
    let mut files = Vec::new();
    let mut skipped = 0_usize;
    for entry in WalkDir::new(root) {
        match entry {
            Ok(entry) => {
                if entry.file_type().is_file() && should_include_unit(entry.path(), suffix) {
                    files.push(entry.into_path());
                }
            }
            Err(err) if err.depth() == 0 => {
                let msg = format!("walk {}", root.display());
                return Err(match err.into_io_error() {
                    Some(io) => SourceError::io(msg, io),
                    None => SourceError::InvalidArgument(msg),
                });
            }
            Err(err) => {
                skipped += 1;
                debug!("skipped during seed walk: {}", err);
            }
        }
    }
    if skipped > 0 {
        warn!(
            "Skipped {} paths under {} due to permission errors or access issues",
            skipped,
            root.display()
        );
    }
    files.sort();
    Ok(files)
}

fn init_watcher(root: &Path, tx: Sender<WatchMessage>) -> Result<RecommendedWatcher, SourceError> {
    let mut watcher = RecommendedWatcher::new(
        move |res: std::result::Result<Event, notify::Error>| {
            let msg = match res {
                Ok(event) => WatchMessage::Event(event),
                Err(err) => WatchMessage::Error(err.to_string()),
            };
            // Receiver gone means the producer already exited; nothing left to notify.
            let _ = tx.send(msg);
        },
        NotifyConfig::default(),
    )?;
    watcher.watch(root, RecursiveMode::Recursive)?;
    Ok(watcher)
}

/// Something that appeared under the root according to one watch event.
#[derive(Debug, PartialEq, Eq)]
enum Arrival<'a> {
    /// A matching file created or moved in.
    File(&'a PathBuf),
    /// A directory created or moved in. Its contents may predate its own watch.
    Dir(&'a PathBuf),
}

/// Matching files and new directories reported by `event`.
///
/// Renames count as arrivals at their destination. A rename path that no longer exists (the
/// source half of a `RenameMode::Both` pair) is dropped.
fn arrivals<'a>(event: &'a Event, suffix: &'a str) -> Vec<Arrival<'a>> {
    let renamed = matches!(
        event.kind,
        EventKind::Modify(ModifyKind::Name(
            RenameMode::To | RenameMode::Both | RenameMode::Any
        ))
    );
    match event.kind {
        EventKind::Create(CreateKind::Folder) => event.paths.iter().map(Arrival::Dir).collect(),
        EventKind::Create(_) => classify(&event.paths, suffix, false),
        _ if renamed => classify(&event.paths, suffix, true),
        _ => Vec::new(),
    }
}

fn classify<'a>(paths: &'a [PathBuf], suffix: &str, must_exist: bool) -> Vec<Arrival<'a>> {
    paths
        .iter()
        .filter_map(|p| {
            if p.is_dir() {
                Some(Arrival::Dir(p))
            } else if (!must_exist || p.is_file()) && should_include_unit(p, suffix) {
                Some(Arrival::File(p))
            } else {
                None
            }
        })
        .collect()
}

fn push_discovered(discovered: &DiscoveredSet<PathBuf>, path: PathBuf) {
    let shown = path.display().to_string();
    if discovered.push(path) {
        debug!("discovered {}", shown);
    }
}

fn run_watch_loop(
    rx: Receiver<WatchMessage>,
    suffix: &str,
    discovered: &DiscoveredSet<PathBuf>,
    fault: &SourceFault,
) {
    for msg in rx.iter() {
        match msg {
            WatchMessage::Event(event) => {
                for arrival in arrivals(&event, suffix) {
                    match arrival {
                        Arrival::File(path) => push_discovered(discovered, path.clone()),
                        // Files written before the new directory's watch was added raise no
                        // event of their own.
                        Arrival::Dir(dir) => match collect_matching_files(dir, suffix) {
                            Ok(found) => {
                                for path in found {
                                    push_discovered(discovered, path);
                                }
                            }
                            Err(e) => debug!("skipped new directory {}: {}", dir.display(), e),
                        },
                    }
                }
            }
            WatchMessage::Error(msg) => {
                error!("File watch failed, no new files will be discovered: {}", msg);
                fault.record(msg);
                break;
            }
            WatchMessage::Stop => break,
        }
    }
    debug!("watch loop exited");
}
