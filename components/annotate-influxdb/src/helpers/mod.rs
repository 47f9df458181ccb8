//! Configuration loading helpers.
pub mod load_config;
