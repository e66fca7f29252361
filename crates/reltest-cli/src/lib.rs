//! Library half of the `reltest` binary: configuration file handling

pub mod config;
