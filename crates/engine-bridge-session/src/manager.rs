//! Session manager for starting engine sessions.

use std::sync::Arc;

use engine_bridge_core::{EngineError, EngineLauncher, OutputStore, SessionContext, Toolbox};
use uuid::Uuid;

use crate::session::{Session, SessionError};

/// Session manager error.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("Session bootstrap failed: {0}")]
    Bootstrap(#[from] SessionError),
}

impl ManagerError {
    /// Whether the engine never came up, as opposed to failing during bootstrap.
    #[must_use]
    pub const fn is_setup(&self) -> bool {
        match self {
            Self::Engine(e) => e.is_setup(),
            Self::Bootstrap(_) => false,
        }
    }
}

/// Starts engine sessions through a launcher.
#[derive(Debug)]
pub struct SessionManager<L: EngineLauncher> {
    launcher: L,
}

impl<L: EngineLauncher> SessionManager<L> {
    #[must_use]
    pub const fn new(launcher: L) -> Self {
        Self { launcher }
    }

    #[must_use]
    pub const fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Start a new engine session.
    ///
    /// With a toolbox configured, the session changes into the toolbox
    /// directory and evaluates its init expression before moving on to the
    /// context's working directory. The returned session is running.
    ///
    /// # Errors
    /// Returns [`ManagerError::Engine`] if the engine cannot be started and
    /// [`ManagerError::Bootstrap`] if any bootstrap step fails. In the latter
    /// case the engine has already been stopped.
    pub async fn start(&self, ctx: SessionContext) -> Result<Session, ManagerError> {
        let output = Arc::new(OutputStore::new());
        let channel = self.launcher.launch(Arc::clone(&output)).await?;

        let mut session = Session::new(Uuid::new_v4(), channel, output);
        tracing::info!(session = %session.id(), "Engine session started");

        if let Err(e) = bootstrap(&mut session, &ctx).await {
            tracing::error!(session = %session.id(), "Session bootstrap failed: {e}");
            if let Err(close) = session.shutdown().await {
                tracing::warn!(session = %session.id(), "Failed to stop engine: {close}");
            }
            return Err(e.into());
        }

        Ok(session)
    }
}

async fn bootstrap(session: &mut Session, ctx: &SessionContext) -> Result<(), SessionError> {
    if let Some(Toolbox {
        path,
        init_expression,
    }) = &ctx.toolbox
    {
        tracing::debug!(session = %session.id(), toolbox = %path.display(), "Initialising toolbox");
        session.change_directory(path).await?;
        session.evaluate(init_expression, false).await?;
    }
    if let Some(dir) = &ctx.working_dir {
        session.change_directory(dir).await?;
    }
    Ok(())
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use std::{
        path::PathBuf,
        sync::{Arc, Mutex},
    };

    use engine_bridge_core::SessionState;

    use super::*;
    use crate::memory::MemoryEngine;

    #[tokio::test]
    async fn test_bootstrap_runs_init_in_toolbox() {
        let root = tempfile::tempdir().unwrap();
        let toolbox = root.path().join("toolbox");
        let demo = root.path().join("demo");
        std::fs::create_dir(&toolbox).unwrap();
        std::fs::create_dir(&demo).unwrap();

        let seen: Arc<Mutex<Option<PathBuf>>> = Arc::default();
        let recorder = Arc::clone(&seen);
        let engine = MemoryEngine::new().with_function("init__", move |scope, _args| {
            *recorder.lock().unwrap() = Some(scope.working_dir().to_path_buf());
            Ok(None)
        });

        let manager = SessionManager::new(engine);
        let ctx = SessionContext::in_dir(&demo).with_toolbox(&toolbox);
        let mut session = manager.start(ctx).await.unwrap();

        assert_eq!(seen.lock().unwrap().as_deref(), Some(toolbox.as_path()));
        assert_eq!(session.working_dir(), Some(demo.as_path()));
        let pwd = session.evaluate("pwd", true).await.unwrap().unwrap();
        assert_eq!(pwd.as_str(), Some(demo.to_string_lossy().as_ref()));
    }

    #[tokio::test]
    async fn test_custom_init_expression() {
        let root = tempfile::tempdir().unwrap();
        let ctx = SessionContext::new()
            .with_toolbox(root.path())
            .with_init_expression("ready = true");

        let mut session = SessionManager::new(MemoryEngine::new())
            .start(ctx)
            .await
            .unwrap();
        assert_eq!(session.workspace_get("ready").await.unwrap().as_bool(), Some(true));
    }

    #[tokio::test]
    async fn test_not_installed_is_setup_error() {
        let manager = SessionManager::new(MemoryEngine::not_installed("matlab"));
        let err = manager.start(SessionContext::new()).await.unwrap_err();
        assert!(err.is_setup());
        assert!(matches!(err, ManagerError::Engine(EngineError::NotInstalled(ref exe)) if exe == "matlab"));
    }

    #[tokio::test]
    async fn test_failed_init_is_bootstrap_error() {
        let root = tempfile::tempdir().unwrap();
        let ctx = SessionContext::new()
            .with_toolbox(root.path())
            .with_init_expression("error('Toolbox:init', 'license checkout failed')");

        let err = SessionManager::new(MemoryEngine::new())
            .start(ctx)
            .await
            .unwrap_err();
        assert!(!err.is_setup());
        let ManagerError::Bootstrap(SessionError::Remote {
            message,
            identifier,
        }) = err
        else {
            panic!("expected bootstrap failure, got {err:?}");
        };
        assert_eq!(message, "license checkout failed");
        assert_eq!(identifier.as_deref(), Some("Toolbox:init"));
    }

    #[tokio::test]
    async fn test_missing_toolbox_dir_is_bootstrap_error() {
        let root = tempfile::tempdir().unwrap();
        let ctx = SessionContext::new().with_toolbox(root.path().join("absent"));
        let err = SessionManager::new(MemoryEngine::new())
            .start(ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::Bootstrap(SessionError::Remote { .. })));
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let manager = SessionManager::new(MemoryEngine::new());
        let mut a = manager.start(SessionContext::new()).await.unwrap();
        let mut b = manager.start(SessionContext::new()).await.unwrap();
        assert_ne!(a.id(), b.id());

        a.workspace_set("x", 1).await.unwrap();
        assert!(matches!(
            b.workspace_get("x").await,
            Err(SessionError::Remote { .. })
        ));

        a.shutdown().await.unwrap();
        assert_eq!(a.state(), SessionState::Terminated);
        assert_eq!(b.state(), SessionState::Running);
    }
}
