//! Local driver for the composition conductor
//!
//! The real entrypoint only ever runs behind the external platform; this
//! binary exists so a composition can be exercised during development
//! without one.

use clap::{Parser, Subcommand};
use conductor::{
    compile, ActionInvoker, Clock, EngineConfig, HttpInvoker, InMemoryStore, Node, RedisStore,
    Store, StubInvoker, SystemClock,
};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "conductor", version, about = "Local driver for the composition conductor")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a composition AST to its flat FSM and print it as JSON.
    Compile {
        /// Path to a composition AST JSON file.
        composition: PathBuf,
    },
    /// Run a composition against an input payload to its first suspension
    /// point or final result.
    Run {
        /// Path to a composition AST JSON file.
        composition: PathBuf,
        /// Path to the input params JSON (may already carry `$composer`).
        input: PathBuf,
        /// Redis connection URI; falls back to an in-memory store when unset.
        #[arg(long)]
        redis_uri: Option<String>,
        /// OpenWhisk-style API host for real action invocation; falls back
        /// to a recording stub invoker when unset.
        #[arg(long)]
        api_host: Option<String>,
        /// Namespace for the API host invoker.
        #[arg(long, default_value = "_")]
        namespace: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Compile { composition } => {
            let ast = load_ast(&composition)?;
            let fsm = compile(&ast);
            println!("{}", serde_json::to_string_pretty(&fsm)?);
            Ok(())
        }
        Command::Run {
            composition,
            input,
            redis_uri,
            api_host,
            namespace,
        } => {
            let ast = load_ast(&composition)?;
            let input_value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&input)?)?;

            let mut config = EngineConfig::from_env()?;
            if redis_uri.is_some() {
                config.redis_uri = redis_uri.clone();
            }

            let clock = SystemClock;
            let outcome = match (redis_uri, api_host) {
                (Some(uri), Some(host)) => {
                    let store = RedisStore::connect(&uri).await?;
                    let invoker = HttpInvoker::new(host, namespace, None);
                    drive(&ast, input_value, &invoker, &store, &clock, &config).await?
                }
                (Some(uri), None) => {
                    let store = RedisStore::connect(&uri).await?;
                    let invoker = StubInvoker::new();
                    drive(&ast, input_value, &invoker, &store, &clock, &config).await?
                }
                (None, Some(host)) => {
                    let store = InMemoryStore::new();
                    let invoker = HttpInvoker::new(host, namespace, None);
                    drive(&ast, input_value, &invoker, &store, &clock, &config).await?
                }
                (None, None) => {
                    let store = InMemoryStore::new();
                    let invoker = StubInvoker::new();
                    let outcome = drive(&ast, input_value, &invoker, &store, &clock, &config).await?;
                    for (name, params) in invoker.calls().await {
                        tracing::info!(action = %name, params = %params, "stubbed action call recorded");
                    }
                    outcome
                }
            };

            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
    }
}

async fn drive<I, S, C>(
    ast: &Node,
    input: serde_json::Value,
    invoker: &I,
    store: &S,
    clock: &C,
    config: &EngineConfig,
) -> anyhow::Result<serde_json::Value>
where
    I: ActionInvoker,
    S: Store,
    C: Clock,
{
    Ok(conductor::shim::invoke(ast, input, invoker, store, clock, config).await?)
}

fn load_ast(path: &PathBuf) -> anyhow::Result<Node> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}
