//! A live engine session and the remote object bridge on top of it.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use engine_bridge_core::{
    EngineChannel, EngineError, OutputStore, RemoteHandle, SessionId, SessionState, Value,
    protocol::{EngineRequest, WireValue},
};

/// Remote function used by [`Session::display`].
pub const DISPLAY_FUNCTION: &str = "disp";

/// Remote function that reports the engine's working directory.
pub const PWD_FUNCTION: &str = "pwd";

/// Session error.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session {0} has been terminated")]
    Terminated(SessionId),
    #[error("Handle {handle} was not issued by session {session}")]
    ForeignHandle {
        handle: RemoteHandle,
        session: SessionId,
    },
    #[error("Remote error: {message}")]
    Remote {
        message: String,
        identifier: Option<String>,
    },
    #[error("Remote operation returned no value")]
    MissingOutput,
    #[error("Engine error: {0}")]
    Engine(EngineError),
}

/// One running engine.
///
/// All operations take `&mut self`: a session has a single owner and
/// requests are processed strictly in call order. Dropping a session stops
/// its engine.
pub struct Session {
    id: SessionId,
    state: SessionState,
    working_dir: Option<PathBuf>,
    channel: Box<dyn EngineChannel>,
    output: Arc<OutputStore>,
}

impl Session {
    pub(crate) fn new(id: SessionId, channel: Box<dyn EngineChannel>, output: Arc<OutputStore>) -> Self {
        Self {
            id,
            state: SessionState::Running,
            working_dir: None,
            channel,
            output,
        }
    }

    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    /// Remote working directory as last set through this session.
    #[must_use]
    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    /// Display output of the engine.
    #[must_use]
    pub fn output(&self) -> Arc<OutputStore> {
        Arc::clone(&self.output)
    }

    /// Change the engine's working directory.
    ///
    /// Relative paths resolve against the engine's current directory.
    ///
    /// # Errors
    /// Fails remotely if the directory does not exist.
    pub async fn change_directory(&mut self, path: impl AsRef<Path>) -> Result<(), SessionError> {
        let path = path.as_ref();
        self.send(EngineRequest::ChangeDirectory {
            path: path.to_string_lossy().into_owned(),
        })
        .await?;

        self.working_dir = if !path.is_relative() {
            Some(path.to_path_buf())
        } else if let Some(current) = &self.working_dir {
            Some(current.join(path))
        } else {
            // Nothing to join onto: ask the engine where it ended up.
            self.remote_working_dir().await?
        };
        Ok(())
    }

    async fn remote_working_dir(&mut self) -> Result<Option<PathBuf>, SessionError> {
        let values = self
            .send(EngineRequest::Call {
                function: PWD_FUNCTION.to_string(),
                args: Vec::new(),
                nargout: 1,
            })
            .await?;
        Ok(match values.into_iter().next() {
            Some(WireValue::Text { value }) => Some(PathBuf::from(value)),
            _ => None,
        })
    }

    /// Evaluate a string of remote code.
    ///
    /// Without `capture_output` nothing comes back; display output only
    /// reaches the output stream. With it, the expression's value is returned.
    ///
    /// # Errors
    /// Propagates remote evaluation errors.
    pub async fn evaluate(
        &mut self,
        expression: &str,
        capture_output: bool,
    ) -> Result<Option<Value>, SessionError> {
        let values = self
            .evaluate_with_nargout(expression, u32::from(capture_output))
            .await?;
        if !capture_output {
            return Ok(None);
        }
        values.into_iter().next().map(Some).ok_or(SessionError::MissingOutput)
    }

    /// Evaluate a string of remote code, requesting `nargout` values.
    ///
    /// # Errors
    /// Propagates remote evaluation errors.
    pub async fn evaluate_with_nargout(
        &mut self,
        expression: &str,
        nargout: u32,
    ) -> Result<Vec<Value>, SessionError> {
        let values = self
            .send(EngineRequest::Evaluate {
                expression: expression.to_string(),
                nargout,
            })
            .await?;
        Ok(self.decode(values))
    }

    /// Call a remote function by name.
    ///
    /// Handles among `args` are passed by reference, not copied.
    ///
    /// # Errors
    /// Fails locally for handles from another session, remotely otherwise.
    pub async fn call(
        &mut self,
        function: &str,
        args: &[Value],
        nargout: u32,
    ) -> Result<Vec<Value>, SessionError> {
        self.ensure_running()?;
        let args = args
            .iter()
            .map(|a| self.encode(a))
            .collect::<Result<Vec<_>, _>>()?;
        let values = self
            .send(EngineRequest::Call {
                function: function.to_string(),
                args,
                nargout,
            })
            .await?;
        Ok(self.decode(values))
    }

    /// Call a remote function that returns one value.
    ///
    /// # Errors
    /// As [`Session::call`]; also fails if the function returned nothing.
    pub async fn call_one(&mut self, function: &str, args: &[Value]) -> Result<Value, SessionError> {
        self.call(function, args, 1)
            .await?
            .into_iter()
            .next()
            .ok_or(SessionError::MissingOutput)
    }

    /// Bind `value` to `name` in the engine workspace.
    ///
    /// A handle is aliased under `name`; the remote object is not copied.
    ///
    /// # Errors
    /// Fails locally for handles from another session, remotely otherwise.
    pub async fn workspace_set(
        &mut self,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<(), SessionError> {
        self.ensure_running()?;
        let value = self.encode(&value.into())?;
        self.send(EngineRequest::WorkspaceSet {
            name: name.to_string(),
            value,
        })
        .await?;
        Ok(())
    }

    /// Read the value bound to `name` in the engine workspace.
    ///
    /// Complex values come back as a new handle to the same remote object.
    ///
    /// # Errors
    /// Fails remotely if `name` is undefined.
    pub async fn workspace_get(&mut self, name: &str) -> Result<Value, SessionError> {
        let values = self
            .send(EngineRequest::WorkspaceGet {
                name: name.to_string(),
            })
            .await?;
        self.decode(values)
            .into_iter()
            .next()
            .ok_or(SessionError::MissingOutput)
    }

    /// Have the engine print `value` in its own display format.
    ///
    /// # Errors
    /// As [`Session::call`].
    pub async fn display(&mut self, value: impl Into<Value>) -> Result<(), SessionError> {
        self.call(DISPLAY_FUNCTION, &[value.into()], 0).await?;
        Ok(())
    }

    /// Stop the engine. Idempotent.
    ///
    /// # Errors
    /// Returns the engine's error if it could not be stopped cleanly; the
    /// session is terminated regardless.
    pub async fn shutdown(&mut self) -> Result<(), SessionError> {
        if self.state == SessionState::Terminated {
            return Ok(());
        }
        self.state = SessionState::Terminated;
        tracing::info!(session = %self.id, "Shutting down engine session");
        self.channel.close().await.map_err(SessionError::Engine)
    }

    fn ensure_running(&self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Running => Ok(()),
            SessionState::Terminated => Err(SessionError::Terminated(self.id)),
        }
    }

    async fn send(&mut self, request: EngineRequest) -> Result<Vec<WireValue>, SessionError> {
        self.ensure_running()?;
        tracing::debug!(session = %self.id, op = request.op(), "Engine request");

        match self.channel.request(request).await {
            Ok(values) => Ok(values),
            Err(EngineError::Remote {
                message,
                identifier,
            }) => {
                tracing::debug!(session = %self.id, ?identifier, "Remote error: {message}");
                Err(SessionError::Remote {
                    message,
                    identifier,
                })
            }
            Err(EngineError::Disconnected) => {
                tracing::warn!(session = %self.id, "Engine disconnected");
                self.state = SessionState::Terminated;
                Err(SessionError::Terminated(self.id))
            }
            Err(e) => Err(SessionError::Engine(e)),
        }
    }

    fn encode(&self, value: &Value) -> Result<WireValue, SessionError> {
        if let Value::Handle(handle) = value {
            if !handle.belongs_to(self.id) {
                return Err(SessionError::ForeignHandle {
                    handle: handle.clone(),
                    session: self.id,
                });
            }
        }
        Ok(value.into())
    }

    fn decode(&self, values: Vec<WireValue>) -> Vec<Value> {
        values.into_iter().map(|v| v.into_value(self.id)).collect()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("working_dir", &self.working_dir)
            .finish_non_exhaustive()
    }
}
