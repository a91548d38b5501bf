//! CLI subcommand implementations for the lesson-harvest binary.

pub mod doctor;
pub mod output;
pub mod run_cmd;
