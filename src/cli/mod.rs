//! CLI-specific utilities for haven-route
//!
//! Code used only by the command-line binary, kept out of the library.

pub mod progress;

pub use progress::ProgressManager;
