//! AURA CLI — headless interface to the assistant core.
//!
//! `aura run "<utterance>"` handles one utterance and exits; with no
//! subcommand the CLI enters an interactive REPL. `tools` and `stats`
//! inspect the registry and the persisted counters.
//!
//! Exit codes: 0 success, 2 misuse, 3 missing LLM credentials, 4
//! internal error.

use std::{
    io::{self, BufRead, IsTerminal, Write},
    process::ExitCode,
    sync::{Arc, Mutex},
    time::Duration,
};

use clap::{Parser, Subcommand};

use aura::capability::CapabilityStore;
use aura::config::{AppConfig, load_default_config};
use aura::error::ErrorKind;
use aura::executor::ToolExecutor;
use aura::logging::{self, UtteranceLog};
use aura::orchestrator::{Orchestrator, Response, SourceLayer};
use aura::os::HostBoundary;
use aura::router::conflicts_with_builtin;
use aura::sandbox::CodeSandbox;
use aura::session::{CancelFlag, SessionContext, SessionStats, Utterance, UtteranceSource};
use aura::tools::builtin_registry;
use aura::llm::{LlmClient, OpenAiCompatibleClient};

// ─── CLI definition ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "aura",
    about = "AURA local-first desktop assistant",
    version,
    long_about = "Local-first desktop assistant core.\n\
                  Run without a subcommand to enter the interactive REPL."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Output responses as JSON.
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Handle one utterance and exit.
    Run(RunArgs),
    /// List the registered tools.
    Tools,
    /// Show the persisted usage counters.
    Stats,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// The utterance to handle.
    utterance: Vec<String>,
}

// ─── main ────────────────────────────────────────────────────────────────────

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = load_default_config();

    // Diagnostics go to a rolling file under the data dir when it is
    // writable, stderr otherwise. The guard flushes on drop.
    let data_dir = config.resolved_data_dir();
    let _log_guard = if std::fs::create_dir_all(&data_dir).is_ok() {
        logging::init_with_dir(&data_dir)
    } else {
        logging::init();
        None
    };

    match cli.command {
        Some(Commands::Tools) => {
            return list_tools();
        }
        Some(Commands::Stats) => {
            return show_stats(&config);
        }
        _ => {}
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start runtime: {e}");
            return ExitCode::from(4);
        }
    };

    runtime.block_on(async move {
        match cli.command {
            Some(Commands::Run(args)) => {
                let text = args.utterance.join(" ");
                if text.trim().is_empty() {
                    eprintln!("error: empty utterance");
                    return ExitCode::from(2);
                }
                run_once(&config, &text, cli.json).await
            }
            None => repl(&config, cli.json).await,
            Some(_) => unreachable!("handled above"),
        }
    })
}

// ─── Assembly ────────────────────────────────────────────────────────────────

struct App {
    orchestrator: Orchestrator,
    session: SessionContext,
    stats_path: std::path::PathBuf,
    has_credentials: bool,
}

fn bootstrap(config: &AppConfig) -> Result<App, ErrorKind> {
    let data_dir = config.resolved_data_dir();
    std::fs::create_dir_all(&data_dir)
        .map_err(|e| ErrorKind::Internal(format!("failed to create data dir: {e}")))?;

    let registry = builtin_registry()?.snapshot();
    let boundary = Arc::new(HostBoundary::detect());
    let sandbox = Arc::new(CodeSandbox::new(&data_dir, config.sandbox.clone())?);
    let executor = Arc::new(ToolExecutor::new(
        registry.clone(),
        boundary,
        sandbox.clone(),
        Duration::from_secs(config.executor.default_timeout_secs),
    ));
    let store = Arc::new(Mutex::new(CapabilityStore::load(
        &data_dir,
        conflicts_with_builtin,
    )?));

    let has_credentials = config.llm.has_credentials();
    let llm: Option<Arc<dyn LlmClient>> = if has_credentials {
        Some(Arc::new(OpenAiCompatibleClient::new(&config.llm)?))
    } else {
        None
    };

    let orchestrator = Orchestrator::new(config, registry, executor, store, llm, sandbox)?
        .with_utterance_log(UtteranceLog::open(&data_dir)?);

    let stats_path = data_dir.join("stats.json");
    let mut session = SessionContext::new(
        config.assistant.user_name.clone(),
        config.assistant.name.clone(),
    );
    session.stats = SessionStats::load(&stats_path);

    Ok(App {
        orchestrator,
        session,
        stats_path,
        has_credentials,
    })
}

// ─── Modes ───────────────────────────────────────────────────────────────────

async fn run_once(config: &AppConfig, text: &str, as_json: bool) -> ExitCode {
    let mut app = match bootstrap(config) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(4);
        }
    };

    let response = handle(&mut app, text).await;
    print_response(&response, as_json);
    exit_code_for(&response, app.has_credentials)
}

async fn repl(config: &AppConfig, as_json: bool) -> ExitCode {
    let mut app = match bootstrap(config) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(4);
        }
    };

    let interactive = io::stdin().is_terminal();
    if interactive {
        println!("{} ready. Ctrl-D to exit.", app.session.assistant_name);
    }

    let stdin = io::stdin();
    loop {
        if interactive {
            print!("> ");
            let _ = io::stdout().flush();
        }
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if text == "exit" || text == "quit" {
            break;
        }
        let response = handle(&mut app, text).await;
        print_response(&response, as_json);
    }

    ExitCode::SUCCESS
}

async fn handle(app: &mut App, text: &str) -> Response {
    let utterance = Utterance::new(text, UtteranceSource::Text);
    let response = app
        .orchestrator
        .process(&utterance, &mut app.session, &CancelFlag::new())
        .await;
    if let Err(e) = app.session.stats.save(&app.stats_path) {
        tracing::warn!(error = %e, "failed to persist stats");
    }
    response
}

fn print_response(response: &Response, as_json: bool) {
    if as_json {
        match serde_json::to_string(response) {
            Ok(json) => println!("{json}"),
            Err(_) => println!("{}", response.text),
        }
    } else {
        println!("{}", response.text);
    }
}

fn exit_code_for(response: &Response, has_credentials: bool) -> ExitCode {
    if response.ok {
        return ExitCode::SUCCESS;
    }
    let llm_layer = matches!(
        response.source_layer,
        SourceLayer::Conversation | SourceLayer::CodeGen | SourceLayer::Plan
    );
    if llm_layer && !has_credentials {
        ExitCode::from(3)
    } else {
        ExitCode::from(4)
    }
}

// ─── Inspection subcommands ──────────────────────────────────────────────────

fn list_tools() -> ExitCode {
    let registry = match builtin_registry() {
        Ok(reg) => reg,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(4);
        }
    };
    for tool in registry.iter() {
        println!("{:28} {:?}  {}", tool.name, tool.risk, tool.description);
    }
    ExitCode::SUCCESS
}

fn show_stats(config: &AppConfig) -> ExitCode {
    let stats = SessionStats::load(&config.resolved_data_dir().join("stats.json"));
    println!("local commands:        {}", stats.local_commands);
    println!("llm commands:          {}", stats.llm_commands);
    println!("tokens saved estimate: {}", stats.tokens_saved_estimate);
    ExitCode::SUCCESS
}
