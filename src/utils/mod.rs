//! Cross-cutting utilities: external command execution, file system helpers,
//! output sinks and progress display.

pub mod command;
pub mod fs;
pub mod output;
pub mod progress;

pub use command::ToolCommand;
pub use fs::{atomic_write, ensure_dir, find_project_root, normalize_path, safe_write};
pub use output::{OutputBuffer, OutputSink};
pub use progress::Spinner;
