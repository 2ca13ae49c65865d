//! Engine process launcher.
//!
//! Provides:
//! - `ProcessEngine` - `EngineLauncher` that spawns the engine as a child process
//! - `EnginePeer` - JSON-lines protocol handler over the child's stdio
//! - Command building and executable discovery
//! - `EngineConfig` - TOML configuration

pub mod command;
pub mod config;
pub mod launcher;
pub mod locate;
pub mod peer;

pub use command::{CommandBuildError, CommandParts, EngineCommand};
pub use config::{ConfigError, EngineConfig};
pub use launcher::ProcessEngine;
pub use locate::resolve_executable_path;
pub use peer::{EnginePeer, ProtocolError};
