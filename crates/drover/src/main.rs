//! drover command-line interface
//!
//! Three subcommands:
//!
//! - `check`: parse a script and report unclassifiable lines
//! - `run`: execute a script (or resume a persisted queue) against a
//!   simulated page, with durable state in SQLite when requested
//! - `commands`: print the script language reference

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use drover_core::adapter::{PageFixture, SimulatedPage};
use drover_core::config::{Config, LogFormat};
use drover_core::engine::{Engine, EngineStatus};
use drover_core::logging::init_logging;
use drover_core::script::{parse_script, InstructionKind, COMMAND_REFERENCE};
use drover_core::session::{resume_session, SessionStart};
use drover_core::store::{MemoryStore, SqliteStore, Store};

#[derive(Parser)]
#[command(name = "drover", version, about = "Durable, resumable page-automation script runner")]
struct Cli {
    /// Path to a drover.toml configuration file
    #[arg(short, long, global = true, env = "DROVER_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format (pretty or json)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// Increase log verbosity (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a script and report lines that are not valid commands
    Check {
        /// Path to the script file
        script: PathBuf,
    },

    /// Run a script, or resume the persisted queue when no script is given
    Run {
        /// Path to the script file; omit to resume a persisted queue
        script: Option<PathBuf>,

        /// TOML page fixture describing the simulated page
        #[arg(long)]
        page: Option<PathBuf>,

        /// SQLite database for durable state; in-memory when omitted
        #[arg(long)]
        store: Option<PathBuf>,

        /// Attempt budget per step, overriding configuration (new runs only)
        #[arg(long)]
        tries: Option<u32>,
    },

    /// Print the script command reference
    Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load_or_default(cli.config.as_deref())?;

    match cli.verbose {
        0 => {}
        1 => config.logging.level = "debug".to_string(),
        _ => config.logging.level = "trace".to_string(),
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    init_logging(&config.logging).context("failed to initialize logging")?;

    match cli.command {
        Commands::Check { script } => check(&script),
        Commands::Run {
            script,
            page,
            store,
            tries,
        } => run(&config, script, page, store, tries).await,
        Commands::Commands => {
            print!("{COMMAND_REFERENCE}");
            Ok(())
        }
    }
}

fn check(path: &PathBuf) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read script {}", path.display()))?;
    let queue = parse_script(&text);

    let unknown: Vec<&str> = queue
        .items
        .iter()
        .filter(|i| matches!(i.kind, InstructionKind::Unknown))
        .map(|i| i.raw.as_str())
        .collect();

    if unknown.is_empty() {
        println!("ok: {} steps", queue.items.len());
        return Ok(());
    }
    for line in &unknown {
        eprintln!("not a command: {line}");
    }
    bail!("{} of {} lines failed to parse", unknown.len(), queue.items.len());
}

async fn run(
    config: &Config,
    script: Option<PathBuf>,
    page: Option<PathBuf>,
    store: Option<PathBuf>,
    tries: Option<u32>,
) -> Result<()> {
    let store: Arc<dyn Store> = match store {
        Some(path) => Arc::new(SqliteStore::open(&path).await?),
        None => Arc::new(MemoryStore::new()),
    };

    let adapter = Arc::new(load_page(page.as_deref())?);

    let engine = match script {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read script {}", path.display()))?;
            let mut engine_config = config.run.engine_config();
            if let Some(tries) = tries {
                if tries == 0 {
                    bail!("--tries must be at least 1");
                }
                engine_config.default_tries = tries;
            }
            let engine = Engine::new(store, adapter, engine_config);
            engine.submit(&text).await?;
            engine
        }
        None => match resume_session(store, adapter, config).await? {
            SessionStart::Resumed(engine) => engine,
            SessionStart::Idle => {
                println!("nothing to resume");
                return Ok(());
            }
            SessionStart::Deferred => {
                println!("pending queue deferred: resize steps need a parent-controlled window");
                return Ok(());
            }
        },
    };

    let engine = Arc::new(engine);
    let prompter = tokio::spawn(prompt_on_intervention(engine.clone()));
    let result = engine.run().await;
    prompter.abort();

    result?;
    println!("run complete");
    Ok(())
}

fn load_page(path: Option<&std::path::Path>) -> Result<SimulatedPage> {
    let Some(path) = path else {
        return Ok(SimulatedPage::new());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read page fixture {}", path.display()))?;
    let fixture: PageFixture = toml::from_str(&text)
        .with_context(|| format!("failed to parse page fixture {}", path.display()))?;
    Ok(SimulatedPage::from_fixture(fixture))
}

/// Bridge blocked interventions to the operator: print the message and
/// resume on Enter.
async fn prompt_on_intervention(engine: Arc<Engine>) {
    let mut status = engine.subscribe();
    let mut stdin = BufReader::new(tokio::io::stdin());
    loop {
        if status.changed().await.is_err() {
            return;
        }
        let current = status.borrow_and_update().clone();
        if let EngineStatus::Blocked { message } = current {
            eprintln!("intervention required: {message}");
            eprintln!("press Enter to resume");
            let mut line = String::new();
            if stdin.read_line(&mut line).await.is_err() {
                return;
            }
            engine.resume();
        }
    }
}
