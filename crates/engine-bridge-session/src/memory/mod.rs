//! In-process scripted engine.
//!
//! Useful for tests and for running bridge code without an engine install.
//! Each launch gets its own workspace, object heap and working directory;
//! native functions registered on the [`MemoryEngine`] are shared.

mod heap;
mod interp;
mod script;

use std::{collections::HashMap, fmt, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use engine_bridge_core::{
    EngineChannel, EngineError, EngineLauncher, OutputStore, RemoteFault,
    protocol::{EngineRequest, WireValue},
};

pub use heap::{EngineScope, STRUCT_CLASS, Slot};

use interp::EngineState;

/// Function callable from remote expressions.
///
/// Returns `Ok(None)` for functions with no output value.
pub type NativeFunction =
    Arc<dyn Fn(&mut EngineScope<'_>, Vec<Slot>) -> Result<Option<Slot>, RemoteFault> + Send + Sync>;

type FunctionTable = HashMap<String, NativeFunction>;

/// Engine that runs inside the current process.
#[derive(Clone, Default)]
pub struct MemoryEngine {
    functions: FunctionTable,
    home: Option<PathBuf>,
    missing_executable: Option<String>,
}

impl MemoryEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function under a (possibly dotted) name.
    ///
    /// Registered functions take precedence over built-ins of the same name.
    #[must_use]
    pub fn with_function<F>(mut self, name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&mut EngineScope<'_>, Vec<Slot>) -> Result<Option<Slot>, RemoteFault>
            + Send
            + Sync
            + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
        self
    }

    /// Working directory of freshly launched engines.
    ///
    /// Defaults to the current directory of this process.
    #[must_use]
    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    /// Make every launch fail as if `executable` were not installed.
    #[must_use]
    pub fn not_installed(executable: impl Into<String>) -> Self {
        Self {
            missing_executable: Some(executable.into()),
            ..Self::default()
        }
    }
}

impl fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut functions: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        functions.sort_unstable();
        f.debug_struct("MemoryEngine")
            .field("functions", &functions)
            .field("home", &self.home)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl EngineLauncher for MemoryEngine {
    async fn launch(&self, output: Arc<OutputStore>) -> Result<Box<dyn EngineChannel>, EngineError> {
        if let Some(executable) = &self.missing_executable {
            return Err(EngineError::NotInstalled(executable.clone()));
        }
        let home = self
            .home
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("/"));
        let state = EngineState::new(home, Arc::new(self.functions.clone()));
        Ok(Box::new(MemoryChannel {
            state,
            output,
            closed: false,
        }))
    }
}

struct MemoryChannel {
    state: EngineState,
    output: Arc<OutputStore>,
    closed: bool,
}

#[async_trait]
impl EngineChannel for MemoryChannel {
    async fn request(&mut self, request: EngineRequest) -> Result<Vec<WireValue>, EngineError> {
        if self.closed {
            return Err(EngineError::Disconnected);
        }
        if request == EngineRequest::Shutdown {
            return self.close().await.map(|()| Vec::new());
        }
        self.state
            .handle(request, &self.output)
            .map_err(|fault| EngineError::Remote {
                message: fault.message,
                identifier: fault.identifier,
            })
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        if !self.closed {
            self.closed = true;
            self.output.push_finished();
        }
        Ok(())
    }
}
