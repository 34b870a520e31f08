//! `hippo-cli` – Hippocampus Command Line Interface
//!
//! This binary is the entry point for the memory engine.  It:
//!
//! 1. Checks for `~/.hippocampus/config.toml`; runs a **First-Run Wizard**
//!    when the file is absent (interactive mode only).
//! 2. Opens the SQLite store and restores the persisted memory graph.
//! 3. Probes the model server and reports whether the configured model is
//!    served.
//! 4. Either drops the user into an **interactive REPL** (`hippocampus`) or
//!    runs the periodic build / forget / merge jobs (`hippocampus daemon`)
//!    until **Ctrl-C**.

mod config;
mod models;
mod repl;

use colored::Colorize;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, warn};

use hippo_memory::Hippocampus;
use hippo_types::HippoError;
use hippo_memory::similarity::SimpleTokenizer;
use hippo_memory::sqlite_store::SqliteDocumentStore;
use hippo_runtime::{LlmDriver, spawn_scheduler, telemetry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Interactive,
    Daemon,
}

fn parse_mode(arg: Option<&str>) -> Result<Mode, String> {
    match arg {
        None => Ok(Mode::Interactive),
        Some("daemon") => Ok(Mode::Daemon),
        Some(other) => Err(format!("unknown argument '{}'", other)),
    }
}

fn main() {
    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG filters (default "info"); HIPPO_LOG_FORMAT=json switches to
    // JSON lines.  User-facing output still goes through println!.
    let _telemetry = telemetry::init_tracing("hippocampus");

    let mode = match parse_mode(std::env::args().nth(1).as_deref()) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            eprintln!("Usage: hippocampus [daemon]");
            std::process::exit(2);
        }
    };

    print_banner();

    // ── Shared shutdown signal ───────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let wake = Arc::new(Notify::new());
    let (shutdown_clone, wake_clone) = (shutdown.clone(), wake.clone());

    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – finishing current work …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
        wake_clone.notify_one();
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    // ── Configuration ─────────────────────────────────────────────────────
    let cfg = match (mode, config::load()) {
        (Mode::Interactive, Ok(None)) => run_first_run_wizard(),
        (_, Ok(Some(cfg))) => {
            println!("  Config loaded from {}", config::config_path().display().to_string().bold());
            cfg
        }
        (Mode::Daemon, Ok(None)) => config::defaults_with_env(),
        (_, Err(e)) => {
            println!("{}", e.to_string().red());
            println!("  Using default configuration.");
            config::defaults_with_env()
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start async runtime".red(), e);
            std::process::exit(1);
        }
    };

    // ── Memory engine ─────────────────────────────────────────────────────
    let engine = match rt.block_on(open_engine(&cfg)) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("{}: {}", "Failed to open memory".red(), e);
            std::process::exit(1);
        }
    };

    // ── Model discovery ───────────────────────────────────────────────────
    rt.block_on(probe_model_server(&cfg));

    match mode {
        Mode::Interactive => {
            println!();
            println!("  Type {} for a list of commands.\n", "/help".bold().cyan());
            repl::run(&rt, &engine, &cfg, shutdown);
        }
        Mode::Daemon => rt.block_on(run_daemon(engine.clone(), &cfg, wake)),
    }

    match rt.block_on(engine.sync()) {
        Ok(report) => info!(writes = report.writes(), "memory persisted on exit"),
        Err(e) => eprintln!("{}: {}", "Final sync failed".red(), e),
    }
    println!("{}", "  ✓ Exiting Hippocampus.".green());
}

/// Open the store, wire the model driver in, and restore the graph.
async fn open_engine(cfg: &config::Config) -> Result<Arc<Hippocampus>, HippoError> {
    if let Some(dir) = Path::new(&cfg.db_path).parent() {
        config::ensure_private_dir(dir)?;
    }
    let store = SqliteDocumentStore::open(&cfg.db_path)
        .map_err(|e| HippoError::Store(format!("cannot open {}: {}", cfg.db_path, e)))?;

    let driver = LlmDriver::new(&cfg.llm_url, &cfg.model)
        .with_api_key(cfg.api_key())
        .with_timeout(Duration::from_secs(cfg.memory.request_timeout_secs))
        .map_err(|e| HippoError::Config(format!("cannot build model client: {}", e)))?;
    let driver = Arc::new(driver);

    let engine = Hippocampus::new(
        Arc::new(store),
        driver.clone(),
        driver,
        Arc::new(SimpleTokenizer),
        cfg.memory.clone(),
    );
    let report = engine.load().await?;
    println!(
        "  Memory restored from {}: {} concept(s), {} relation(s)",
        cfg.db_path.bold(),
        report.nodes_loaded,
        report.edges_loaded
    );
    if report.nodes_dropped + report.edges_dropped > 0 {
        println!(
            "  {} dropped {} broken node(s) and {} broken relation(s)",
            "Repaired:".yellow(),
            report.nodes_dropped,
            report.edges_dropped
        );
    }
    Ok(Arc::new(engine))
}

async fn probe_model_server(cfg: &config::Config) {
    print!("\n  Probing model server at {} … ", cfg.llm_url.dimmed());
    match models::fetch_models(&cfg.llm_url, cfg.api_key().as_deref()).await {
        Ok(list) if models::serves(&list, &cfg.model) => {
            println!("{} (model {} available)", "online".green(), cfg.model.bold());
        }
        Ok(list) => {
            println!("{} ({} model(s), {} not among them)", "online".yellow(), list.len(), cfg.model.bold());
        }
        Err(_) => {
            println!("{}", "offline".yellow());
            println!(
                "  {}  Consolidation and recall need a model; run `{}` or set `llm_url`.",
                "No model server detected.".dimmed(),
                "ollama serve".bold()
            );
        }
    }
}

async fn run_daemon(engine: Arc<Hippocampus>, cfg: &config::Config, wake: Arc<Notify>) {
    println!("  Running maintenance in the background. Press {} to stop.", "Ctrl-C".bold());
    let handle = spawn_scheduler(engine, &cfg.schedule);
    wake.notified().await;
    handle.shutdown().await;
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() -> config::Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║     Hippocampus First-Run Wizard     ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's set up Hippocampus.\n");

    let mut cfg = config::defaults_with_env();

    cfg.llm_url = prompt_line(&format!("  Model server URL [{}]: ", cfg.llm_url), &cfg.llm_url);
    cfg.model = prompt_line(&format!("  Model [{}]: ", cfg.model), &cfg.model);
    cfg.db_path = prompt_line(&format!("  Memory database [{}]: ", cfg.db_path), &cfg.db_path);

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"    __  ___                                                "#.bold().cyan());
    println!("{}", r#"   / / / (_)___  ____  ____  _________ _____ ___  ____  __  _______"#.bold().cyan());
    println!("{}", r#"  / /_/ / / __ \/ __ \/ __ \/ ___/ __ `/ __ `__ \/ __ \/ / / / ___/"#.bold().cyan());
    println!("{}", r#" / __  / / /_/ / /_/ / /_/ / /__/ /_/ / / / / / / /_/ / /_/ (__  ) "#.bold().cyan());
    println!("{}", r#"/_/ /_/_/ .___/ .___/\____/\___/\__,_/_/ /_/ /_/ .___/\__,_/____/  "#.bold().cyan());
    println!("{}", r#"       /_/   /_/                             /_/                   "#.bold().cyan());
    println!();
    println!("  {} {}", "Hippocampus".bold(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  Associative long-term memory for chat assistants");
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::{BufRead, Write};
    print!("{}", msg);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}
