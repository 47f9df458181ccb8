//! Process-level glue between configuration and dispatch.
pub mod runtime;
