//! Application configuration constants.
//! Defaults and filenames in one place.

use std::sync::OnceLock;

// ---- Package / paths (from CARGO_PKG_NAME, cached) ----

/// Package-derived filenames: built once from `CARGO_PKG_NAME`, then cached.
pub struct PackagePaths {
    pkg_name: &'static str,
    config_filename: String,
    watch_thread_name: String,
    interval_thread_name: String,
}

static PACKAGE_PATHS: OnceLock<PackagePaths> = OnceLock::new();

impl PackagePaths {
    /// Build and cache names from `CARGO_PKG_NAME`. Called once on first use.
    pub fn get() -> &'static PackagePaths {
        PACKAGE_PATHS.get_or_init(|| {
            let pkg = env!("CARGO_PKG_NAME");
            PackagePaths {
                pkg_name: pkg,
                config_filename: format!(".{pkg}.toml"),
                watch_thread_name: format!("{pkg}-watch"),
                interval_thread_name: format!("{pkg}-interval"),
            }
        })
    }

    pub fn pkg_name(&self) -> &str {
        self.pkg_name
    }

    /// Config file looked up in the working directory when `--config` is not given.
    pub fn config_filename(&self) -> &str {
        &self.config_filename
    }

    pub fn watch_thread_name(&self) -> &str {
        &self.watch_thread_name
    }

    pub fn interval_thread_name(&self) -> &str {
        &self.interval_thread_name
    }
}

// ---- Dispatch ----

/// Dispatcher defaults used when neither the config file nor the CLI sets a value.
pub struct DispatchDefaults;

impl DispatchDefaults {
    /// Units per batch.
    pub const BATCH_SIZE: usize = 2;
    /// Consumer sleep between gating checks (ms).
    pub const POLL_INTERVAL_MS: u64 = 1000;
    /// File suffix for the directory source.
    pub const SUFFIX: &'static str = ".h5";
}

// ---- Interval source ----

/// Virtual-clock defaults for the time-segment source.
pub struct IntervalDefaults;

impl IntervalDefaults {
    /// Segment length in seconds (one hour).
    pub const INTERVAL_SECS: i64 = 60 * 60;
    /// Lag margin in seconds.
    pub const LAG_SECS: i64 = 0;
    /// Producer wake-up cadence (ms). Bounds discovery latency.
    pub const TICK_MS: u64 = 1000;
}

// ---- Task ----

/// Lines of child stderr kept in a failed command's diagnostic.
pub const STDERR_TAIL_LINES: usize = 20;
