//! Engine command line building.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::locate::resolve_executable_path;

/// Command build error.
#[derive(Debug, Error)]
pub enum CommandBuildError {
    #[error("Engine command cannot be parsed: {0}")]
    InvalidBase(String),
    #[error("Engine command is empty after parsing")]
    EmptyCommand,
    #[error("Executable not found: {0}")]
    ExecutableNotFound(String),
}

/// Parsed command parts (program + args).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandParts {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandParts {
    /// Resolve the program to an absolute path, also looking in `search_dirs`.
    ///
    /// # Errors
    /// Returns [`CommandBuildError::ExecutableNotFound`] if the engine is not installed.
    pub async fn into_resolved(
        self,
        search_dirs: &[PathBuf],
    ) -> Result<(PathBuf, Vec<String>), CommandBuildError> {
        let Self { program, args } = self;
        let Some(executable) = resolve_executable_path(&program, search_dirs).await else {
            return Err(CommandBuildError::ExecutableNotFound(program));
        };
        Ok((executable, args))
    }
}

/// Builder for the command that starts an engine.
///
/// The base is split with shell rules; params are appended verbatim, so they
/// may contain spaces and quotes.
#[derive(Debug, Clone)]
pub struct EngineCommand {
    base: String,
    params: Vec<String>,
}

impl EngineCommand {
    #[must_use]
    pub fn new<S: Into<String>>(base: S) -> Self {
        Self {
            base: base.into(),
            params: Vec::new(),
        }
    }

    /// Append parameters.
    #[must_use]
    pub fn params<I>(mut self, more: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.params.extend(more.into_iter().map(Into::into));
        self
    }

    /// Base command line as configured.
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Split into program and arguments.
    ///
    /// # Errors
    /// Returns error if the base cannot be parsed or nothing remains.
    pub fn build(&self) -> Result<CommandParts, CommandBuildError> {
        let mut parts = split_command_line(&self.base)?;
        parts.extend(self.params.iter().cloned());

        if parts.is_empty() {
            return Err(CommandBuildError::EmptyCommand);
        }

        let program = parts.remove(0);
        Ok(CommandParts {
            program,
            args: parts,
        })
    }

    /// Program name without resolving it.
    #[must_use]
    pub fn program_name(&self) -> Option<String> {
        self.build().ok().map(|p| {
            Path::new(&p.program)
                .file_name()
                .map_or(p.program.clone(), |n| n.to_string_lossy().into_owned())
        })
    }
}

fn split_command_line(input: &str) -> Result<Vec<String>, CommandBuildError> {
    #[cfg(windows)]
    {
        Ok(winsplit::split(input))
    }

    #[cfg(not(windows))]
    {
        shlex::split(input).ok_or_else(|| CommandBuildError::InvalidBase(input.to_string()))
    }
}
