//! Component transport CLI - moves component resources between registries.

pub mod commands;
pub mod output;
