//! Engine module: batch selection, task invocation, CLI parsing and handlers

pub mod arg_parser;
pub mod handlers;
pub mod task;
pub mod tools;
pub mod tracker;

// Re-export commonly used functions
pub use arg_parser::{Cli, Commands, FilesArgs, TimesArgs};
pub use handlers::{handle_run, setup_opts};
pub use task::{CommandTask, Task, UnitArg};
pub use tools::{align_down, is_os_hidden_file, should_include_unit};
pub use tracker::{available, next_batch};
