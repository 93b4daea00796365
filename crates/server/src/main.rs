//! mushsh - interactive MUSH softcode shell
//!
//! Reads lines from stdin and runs them as the wizard of an in-memory
//! world. A line starting with `=` is evaluated as a function expression;
//! anything else is a `;`-separated command list.
//!
//! Options:
//! - `--config <path>`  options file (default `config/mush.txt`), watched for changes
//! - `--check`          report diagnostics instead of evaluating
//! - `--json`           with `--check`, print diagnostics as JSON

use anyhow::{bail, Context, Result};
use mush_config::{ConfigHandle, EngineConfig, DEFAULT_CONFIG_PATH};
use mush_core::DbRef;
use mush_scripting::builtins::standard_functions;
use mush_scripting::commands::standard_commands;
use mush_scripting::diagnostics::{encode_semantic_tokens, semantic_tokens, validate_and_get_errors};
use mush_scripting::{Engine, Frame, GrammarKind, MemoryWorld, ParseRule, ScriptError, Services};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Connection handle the shell's player is bound to
const CONSOLE_HANDLE: u64 = 1;

struct Options {
    config: PathBuf,
    check: bool,
    json: bool,
}

impl Options {
    fn from_args() -> Result<Self> {
        let mut options = Self {
            config: PathBuf::from(DEFAULT_CONFIG_PATH),
            check: false,
            json: false,
        };
        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => {
                    options.config = args.next().map(PathBuf::from).context("--config needs a path")?;
                }
                "--check" => options.check = true,
                "--json" => options.json = true,
                other => bail!("unknown argument: {}", other),
            }
        }
        Ok(options)
    }
}

fn grammar_for(line: &str) -> (GrammarKind, &str) {
    match line.strip_prefix('=') {
        Some(expression) => (GrammarKind::Expression(ParseRule::Function), expression),
        None => (GrammarKind::Expression(ParseRule::CommandList), line),
    }
}

fn check(line: &str, json: bool) -> Result<()> {
    let (kind, text) = grammar_for(line);
    let errors = validate_and_get_errors(text, kind);
    if json {
        let tokens = semantic_tokens(text, kind);
        let report = serde_json::json!({
            "kind": kind,
            "errors": errors,
            "tokens": tokens,
            "data": encode_semantic_tokens(&tokens),
        });
        println!("{}", serde_json::to_string(&report)?);
    } else if errors.is_empty() {
        println!("ok");
    } else {
        for error in errors {
            println!("{}:{}: {}", error.line + 1, error.column + 1, error.message);
        }
    }
    Ok(())
}

async fn evaluate(engine: &Engine, world: &MemoryWorld, player: DbRef, line: &str) -> Result<()> {
    let cancel = CancellationToken::new();
    let frame = Frame::for_connection(player, CONSOLE_HANDLE);
    let (_, text) = grammar_for(line);
    let run = async {
        if line.starts_with('=') {
            let evaluation = engine.function_parse(text, frame, &cancel).await?;
            println!("{}", evaluation.message().render_ansi());
        } else {
            engine.command_list_parse(text, frame, &cancel).await?;
        }
        Ok::<_, ScriptError>(())
    };

    let outcome = tokio::select! {
        outcome = run => outcome,
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            Err(ScriptError::Cancelled)
        }
    };
    match outcome {
        Ok(()) => {}
        Err(ScriptError::Cancelled) => warn!("Evaluation cancelled"),
        Err(e) => return Err(e.into()),
    }

    for notification in world.take_notifications() {
        if notification.target == player {
            println!("{}", notification.message.render_ansi());
        } else {
            println!("[{}] {}", notification.target, notification.message.render_ansi());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let options = Options::from_args()?;

    let config = match EngineConfig::load_from_file(&options.config) {
        Ok(config) => {
            info!("Loaded configuration from {}", options.config.display());
            config
        }
        Err(e) => {
            warn!("Failed to load {}: {}", options.config.display(), e);
            warn!("Using default configuration");
            EngineConfig::default()
        }
    };
    config.display();
    let config = ConfigHandle::new(config);
    let _watcher = match config.watch(&options.config) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            info!("Not watching {}: {}", options.config.display(), e);
            None
        }
    };

    let world = Arc::new(MemoryWorld::new());
    let (_, wizard) = world.bootstrap();
    world.connect(CONSOLE_HANDLE, wizard, "127.0.0.1", "localhost");
    let services = Services::from_world(
        world.clone(),
        Arc::new(standard_functions()),
        Arc::new(standard_commands()),
    );
    let engine = Engine::new(services, config);
    info!("Ready; you are Wizard ({})", wizard);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if options.check {
            check(line, options.json)?;
        } else {
            evaluate(&engine, &world, wizard, line).await?;
        }
    }

    info!("End of input");
    Ok(())
}
