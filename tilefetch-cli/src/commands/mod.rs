//! Command handlers for the tilefetch CLI.

pub mod area;
pub mod config;
pub mod fetch;
