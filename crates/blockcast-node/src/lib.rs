/// Shared pieces of the blockcast endpoint binaries: environment
/// configuration, the filesystem block store, and the stdin control
/// surface.

pub mod commands;
pub mod config;
pub mod store;

pub use commands::{Command, parse_command, spawn_stdin_reader};
pub use config::NodeConfig;
pub use store::FsStore;
