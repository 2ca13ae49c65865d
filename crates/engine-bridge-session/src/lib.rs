//! Engine sessions and the remote object bridge.
//!
//! Provides:
//! - `SessionManager` - Start engine sessions, including toolbox bootstrap
//! - `Session` - Directory changes, evaluation and workspace access on one engine
//! - `MemoryEngine` - In-process scripted engine (feature: memory)

pub mod manager;
pub mod session;

#[cfg(feature = "memory")]
pub mod memory;

pub use manager::{ManagerError, SessionManager};
pub use session::{Session, SessionError};

#[cfg(feature = "memory")]
pub use memory::MemoryEngine;
