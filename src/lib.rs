pub mod bench;
pub mod capability;
pub mod cli;
pub mod collectors;
pub mod config;
pub mod core;
pub mod engine;
pub mod exec;
pub mod exit;
pub mod files;
pub mod mounts;
pub mod render;
