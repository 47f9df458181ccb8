//! Logging and panic reporting setup.
pub mod tracing;
