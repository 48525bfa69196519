//! Pipeline components: dispatcher loop and source/dispatcher orchestration.

pub mod dispatcher;
pub mod orchestrator;

pub use dispatcher::{DispatchState, Dispatcher};
pub use orchestrator::{
    build_directory_source, build_interval_source, install_ctrlc_handler, run_pipeline,
    shutdown_source,
};
