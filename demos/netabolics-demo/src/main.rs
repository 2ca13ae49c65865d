//! Load a Netabolics model in a fresh engine session and display it.
//!
//! Run with: cargo run -p netabolics-demo -- --toolbox <dir> --demo-dir <dir>

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use engine_bridge_core::{OutputMsg, SessionContext, Value};
use engine_bridge_process::{EngineConfig, ProcessEngine};
use engine_bridge_session::{ManagerError, Session, SessionManager};
use futures::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Remote constructor of the model class.
const MODEL_CONSTRUCTOR: &str = "Netabolics.Biology.Model";

/// Search path variable the engine reads at startup.
const ENGINE_PATH_VAR: &str = "MATLABPATH";

#[derive(Debug, Parser)]
#[command(name = "netabolics-demo")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Toolbox directory, initialised before anything else
    #[arg(long, env = "NETABOLICS_TOOLBOX")]
    toolbox: Option<PathBuf>,

    /// Directory the model path is relative to
    #[arg(long, env = "NETABOLICS_DEMO_DIR", default_value = ".")]
    demo_dir: PathBuf,

    /// Model file to load
    #[arg(long, env = "NETABOLICS_MODEL", default_value = "datasets/Cell.mat")]
    model: String,

    /// Toolbox init expression
    #[arg(long, env = "NETABOLICS_INIT", default_value = engine_bridge_core::context::DEFAULT_INIT_EXPRESSION)]
    init: String,

    /// Engine configuration file (TOML)
    #[arg(long, env = "ENGINE_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the engine-side protocol adapter
    #[arg(
        long,
        env = "ENGINE_BRIDGE_ADAPTER_DIR",
        default_value = concat!(env!("CARGO_MANIFEST_DIR"), "/matlab")
    )]
    adapter_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let config = EngineConfig::load_or_default(args.config.as_deref())
        .context("Failed to load engine configuration")?
        .with_path_entry(ENGINE_PATH_VAR, &args.adapter_dir);
    tracing::debug!(command = %config.command, "Engine configuration loaded");

    let mut ctx = SessionContext::in_dir(&args.demo_dir);
    if let Some(toolbox) = &args.toolbox {
        ctx = ctx.with_toolbox(toolbox).with_init_expression(args.init.as_str());
    }

    let manager = SessionManager::new(ProcessEngine::new(config));
    let mut session = match manager.start(ctx).await {
        Ok(session) => session,
        Err(e) if e.is_setup() => {
            return Err(e).context("Engine could not be started; is it installed and on PATH?");
        }
        Err(e @ ManagerError::Bootstrap(_)) => {
            return Err(e).context("Toolbox initialisation failed");
        }
        Err(e) => return Err(e.into()),
    };

    let echo = tokio::spawn(echo_output(session.output().history_plus_stream()));

    let result = run(&mut session, &args.model).await;
    if let Err(e) = session.shutdown().await {
        tracing::warn!("Engine did not shut down cleanly: {e}");
    }
    if let Err(e) = echo.await {
        tracing::warn!("Output task failed: {e}");
    }
    result
}

async fn run(session: &mut Session, model: &str) -> anyhow::Result<()> {
    let cell = session
        .call_one(MODEL_CONSTRUCTOR, &[Value::from(model)])
        .await
        .with_context(|| format!("Failed to load model {model}"))?;

    // Opaque: fields only show through the engine's own display. Goes
    // through the output store to keep its place among engine output.
    session.output().push_stdout(format!("{cell}\n"));

    session.workspace_set("Cell", cell).await?;
    session.evaluate("disp(Cell)", false).await?;
    session.evaluate("disp(Cell.SBML)", false).await?;
    Ok(())
}

/// Copy engine output to our stdout/stderr until the engine finishes.
async fn echo_output(
    mut stream: futures::stream::BoxStream<'static, Result<OutputMsg, std::io::Error>>,
) {
    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            OutputMsg::Stdout(text) => print!("{text}"),
            OutputMsg::Stderr(text) => eprint!("{text}"),
            OutputMsg::Finished => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use engine_bridge_core::RemoteFault;
    use engine_bridge_session::memory::{EngineScope, MemoryEngine, Slot};

    use super::*;

    fn load_model(scope: &mut EngineScope<'_>, args: Vec<Slot>) -> Result<Option<Slot>, RemoteFault> {
        let file = args.first().and_then(Slot::as_text).unwrap_or_default();
        if !scope.resolve_path(file).is_file() {
            return Err(RemoteFault::new(format!("Unable to find file '{file}'."))
                .with_identifier("Netabolics:fileNotFound"));
        }
        let sbml = scope.new_object("struct");
        scope.set_field(&sbml, "typecode", "SBML_MODEL".into())?;
        scope.set_field(&sbml, "SBML_level", 3.into())?;
        let model = scope.new_object(MODEL_CONSTRUCTOR);
        scope.set_field(&model, "SBML", sbml)?;
        Ok(Some(model))
    }

    fn engine() -> MemoryEngine {
        MemoryEngine::new()
            .with_function("init__", |scope, _args| {
                scope.print("toolbox ready\n");
                Ok(None)
            })
            .with_function(MODEL_CONSTRUCTOR, load_model)
    }

    #[tokio::test]
    async fn test_run_keeps_output_in_script_order() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("toolbox")).unwrap();
        std::fs::create_dir_all(root.path().join("demo/datasets")).unwrap();
        std::fs::write(root.path().join("demo/datasets/Cell.mat"), b"MAT").unwrap();

        let ctx = SessionContext::in_dir(root.path().join("demo"))
            .with_toolbox(root.path().join("toolbox"));
        let mut session = SessionManager::new(engine()).start(ctx).await.unwrap();

        run(&mut session, "datasets/Cell.mat").await.unwrap();

        let text = session.output().stdout_text();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "toolbox ready");
        assert!(lines[1].starts_with("<engine.object Netabolics.Biology.Model #"));
        assert_eq!(lines[2], "  Netabolics.Biology.Model with properties:");
        let model_fields = text.find("SBML: [1×1 struct]").unwrap();
        let sbml_fields = text.rfind("typecode: 'SBML_MODEL'").unwrap();
        assert!(text.find(&lines[1][..]).unwrap() < model_fields);
        assert!(model_fields < sbml_fields);
        tokio_test::assert_ok!(session.shutdown().await);
    }

    #[tokio::test]
    async fn test_run_stops_at_missing_model() {
        let root = tempfile::tempdir().unwrap();
        let mut session = SessionManager::new(engine())
            .start(SessionContext::in_dir(root.path()))
            .await
            .unwrap();

        let err = run(&mut session, "datasets/Cell.mat").await.unwrap_err();
        assert!(err.to_string().contains("datasets/Cell.mat"));
        assert!(session.output().stdout_text().is_empty());
    }

    #[test]
    fn test_adapter_ships_with_demo() {
        let args = Args::parse_from(["netabolics-demo"]);
        assert!(args.adapter_dir.join("engine_bridge_serve.m").is_file());
        assert_eq!(args.model, "datasets/Cell.mat");
    }
}
