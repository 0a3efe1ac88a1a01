//! Configuration for ablator: `.ablator/config.toml` discovery, precedence
//! (CLI > file > defaults) with source attribution, and a programmatic builder.

mod config;

pub use config::*;
