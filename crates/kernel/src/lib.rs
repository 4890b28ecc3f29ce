//! Hookwork Kernel Library
//!
//! Plugin registry, hook bus and marketplace. The `hookwork` binary is a
//! headless host built on these modules.

pub mod config;
pub mod events;
pub mod hook;
pub mod marketplace;
pub mod metrics;
pub mod plugin;
