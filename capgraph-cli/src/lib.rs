//! Command-line interface for the capgraph procedural memory core.

pub mod config;
pub mod engine;
pub mod output;
