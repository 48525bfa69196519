pub mod config;
pub mod logger;
pub mod shakeflow_toml;

pub use config::*;
pub use logger::setup_logging;
pub(crate) use shakeflow_toml::{apply_file_to_opts, load_shakeflow_toml};
