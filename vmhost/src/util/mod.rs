//! Small host utilities.

pub mod process;

pub use process::{is_process_alive, is_same_process, terminate_process};
