//! # xfs-cli: `xfsctl`
//!
//! Command-line front end for one XFS device proxy. Loads a TOML config,
//! initialises logging and runs a single sub-command (`status`,
//! `capabilities`, `info`, `execute`, `cancel`, `watch`) against the
//! configured device server.

pub mod commands;
pub mod config;
