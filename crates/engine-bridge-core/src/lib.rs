//! Core abstractions for bridging to an external computation engine.
//!
//! This crate provides the fundamental building blocks:
//! - `Value` / `Primitive` / `RemoteHandle` - what crosses the engine boundary
//! - `protocol` - JSON-lines wire messages exchanged with an engine process
//! - `OutputStore` - Broadcast + history of the engine's display output
//! - `SessionContext` - Startup parameters for a session
//! - Launcher and channel traits implemented by engine backends

pub mod context;
pub mod handle;
pub mod output;
pub mod protocol;
pub mod traits;
pub mod value;

pub use context::{SessionContext, Toolbox};
pub use handle::{ObjectId, RemoteHandle};
pub use output::{OutputMsg, OutputStore};
pub use traits::{EngineChannel, EngineError, EngineLauncher, SessionId, SessionState};
pub use value::{Primitive, RemoteFault, Value};
