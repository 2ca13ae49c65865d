//! Engine launcher backed by a child process.

use std::{process::Stdio, sync::Arc, time::Duration};

use async_trait::async_trait;
use command_group::{AsyncCommandGroup, AsyncGroupChild};
use engine_bridge_core::{
    EngineChannel, EngineError, EngineLauncher, OutputMsg, OutputStore,
    protocol::{EngineOutcome, EngineRequest, WireValue},
};
use futures::StreamExt;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
};
use tokio_stream::wrappers::LinesStream;

use crate::{
    command::{CommandBuildError, EngineCommand},
    config::EngineConfig,
    peer::EnginePeer,
};

/// How long a shutting-down engine may take before its process group is killed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Starts engines as child processes speaking the bridge protocol on stdio.
#[derive(Debug, Clone, Default)]
pub struct ProcessEngine {
    config: EngineConfig,
    command: Option<EngineCommand>,
}

impl ProcessEngine {
    #[must_use]
    pub const fn new(config: EngineConfig) -> Self {
        Self {
            config,
            command: None,
        }
    }

    /// Use an explicit command instead of the configured command line.
    #[must_use]
    pub fn with_command(mut self, command: EngineCommand) -> Self {
        self.command = Some(command);
        self
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn command(&self) -> EngineCommand {
        self.command
            .clone()
            .unwrap_or_else(|| self.config.engine_command())
    }
}

#[async_trait]
impl EngineLauncher for ProcessEngine {
    async fn launch(&self, output: Arc<OutputStore>) -> Result<Box<dyn EngineChannel>, EngineError> {
        let parts = self
            .command()
            .build()
            .map_err(|e| EngineError::SpawnFailed(e.to_string()))?;
        let (program, args) = parts
            .into_resolved(&self.config.search_dirs)
            .await
            .map_err(|e| match e {
                CommandBuildError::ExecutableNotFound(program) => EngineError::NotInstalled(program),
                other => EngineError::SpawnFailed(other.to_string()),
            })?;

        tracing::info!(program = %program.display(), ?args, "Launching engine");

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .group_spawn()
            .map_err(|e| EngineError::SpawnFailed(format!("{}: {e}", program.display())))?;

        let stdin = child.inner().stdin.take();
        let stdout = child.inner().stdout.take();
        let stderr = child.inner().stderr.take();
        let (Some(stdin), Some(stdout), Some(stderr)) = (stdin, stdout, stderr) else {
            let _ = child.kill().await;
            return Err(EngineError::SpawnFailed("engine stdio unavailable".into()));
        };

        let peer = EnginePeer::spawn(stdin, stdout, Arc::clone(&output));
        let stderr_lines = LinesStream::new(BufReader::new(stderr).lines())
            .map(|line| line.map(|l| OutputMsg::Stderr(format!("{l}\n"))));
        drop(output.spawn_forwarder(stderr_lines));

        Ok(Box::new(ProcessChannel {
            peer,
            child,
            closed: false,
        }))
    }
}

struct ProcessChannel {
    peer: EnginePeer,
    child: AsyncGroupChild,
    closed: bool,
}

#[async_trait]
impl EngineChannel for ProcessChannel {
    async fn request(&mut self, request: EngineRequest) -> Result<Vec<WireValue>, EngineError> {
        if self.closed {
            return Err(EngineError::Disconnected);
        }
        match self.peer.request(request).await? {
            EngineOutcome::Ok { values } => Ok(values),
            EngineOutcome::Error {
                message,
                identifier,
            } => Err(EngineError::Remote {
                message,
                identifier,
            }),
        }
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if !self.peer.is_closed() {
            match tokio::time::timeout(SHUTDOWN_GRACE, self.peer.request(EngineRequest::Shutdown))
                .await
            {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::debug!("Engine did not acknowledge shutdown: {e}"),
                Err(_) => tracing::warn!("Engine shutdown request timed out"),
            }
        }

        match tokio::time::timeout(SHUTDOWN_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(%status, "Engine exited");
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                tracing::warn!("Engine still running after shutdown, killing process group");
                self.child.kill().await?;
                Ok(())
            }
        }
    }
}

impl Drop for ProcessChannel {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.child.start_kill() {
                tracing::debug!("Failed to kill engine process group: {e}");
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    /// A shell stand-in for an engine adapter: prints a banner, answers one
    /// evaluate request, then acknowledges shutdown.
    const FAKE_ENGINE: &str = r#"
read req
printf '%s\n' 'Fake engine ready'
printf '%s\n' '{"type":"output","stream":"stderr","text":"warming up\n"}'
printf '%s\n' '{"type":"response","id":1,"outcome":{"status":"ok","values":[{"kind":"text","value":"/tmp"}]}}'
read req
printf '%s\n' '{"type":"response","id":2,"outcome":{"status":"ok"}}'
"#;

    fn fake_engine() -> ProcessEngine {
        ProcessEngine::default().with_command(EngineCommand::new("sh").params(["-c", FAKE_ENGINE]))
    }

    #[tokio::test]
    async fn test_request_round_trip_and_shutdown() {
        let output = Arc::new(OutputStore::new());
        let mut channel = fake_engine()
            .launch(Arc::clone(&output))
            .await
            .unwrap();

        let values = channel
            .request(EngineRequest::Evaluate {
                expression: "pwd".into(),
                nargout: 1,
            })
            .await
            .unwrap();
        assert_eq!(values, vec![WireValue::Text { value: "/tmp".into() }]);
        assert!(output.stdout_text().contains("Fake engine ready"));

        tokio_test::assert_ok!(channel.close().await);
        let err = channel
            .request(EngineRequest::WorkspaceGet { name: "x".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Disconnected));
    }

    #[tokio::test]
    async fn test_missing_engine_is_setup_error() {
        let engine = ProcessEngine::new(EngineConfig {
            command: "engine-bridge-no-such-engine-7f3a -batch serve".into(),
            ..EngineConfig::default()
        });
        let err = engine
            .launch(Arc::new(OutputStore::new()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::NotInstalled(ref p) if p == "engine-bridge-no-such-engine-7f3a"));
        assert!(err.is_setup());
    }

    #[tokio::test]
    async fn test_engine_exit_disconnects() {
        let engine = ProcessEngine::default()
            .with_command(EngineCommand::new("sh").params(["-c", "read req; exit 3"]));
        let mut channel = engine
            .launch(Arc::new(OutputStore::new()))
            .await
            .unwrap();

        let err = channel
            .request(EngineRequest::ChangeDirectory { path: "/tmp".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Disconnected));
        tokio_test::assert_ok!(channel.close().await);
    }
}
