//! Startup context for engine sessions.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Expression evaluated inside the toolbox directory when none is configured.
pub const DEFAULT_INIT_EXPRESSION: &str = "init__()";

/// A toolbox that must be initialised before the session is handed out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toolbox {
    /// Directory the engine changes into to run the init expression.
    pub path: PathBuf,
    /// Remote expression that initialises the toolbox.
    #[serde(default = "default_init_expression")]
    pub init_expression: String,
}

fn default_init_expression() -> String {
    DEFAULT_INIT_EXPRESSION.to_string()
}

/// Startup parameters for one engine session.
///
/// Paths are passed to the engine verbatim; nothing here is validated
/// locally. A wrong path surfaces as a remote error from the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionContext {
    /// Remote working directory once the session is ready.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Toolbox to initialise during startup.
    #[serde(default)]
    pub toolbox: Option<Toolbox>,
}

impl SessionContext {
    /// Context that leaves the engine in its own startup directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Context whose session ends up in `working_dir`.
    #[must_use]
    pub fn in_dir(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: Some(working_dir.into()),
            ..Self::default()
        }
    }

    /// Initialise the toolbox at `path` with the default init expression.
    #[must_use]
    pub fn with_toolbox(mut self, path: impl Into<PathBuf>) -> Self {
        self.toolbox = Some(Toolbox {
            path: path.into(),
            init_expression: default_init_expression(),
        });
        self
    }

    /// Override the toolbox init expression. No-op without a toolbox.
    #[must_use]
    pub fn with_init_expression(mut self, expression: impl Into<String>) -> Self {
        if let Some(toolbox) = self.toolbox.as_mut() {
            toolbox.init_expression = expression.into();
        }
        self
    }
}
