//! REPL – Read-Eval-Print Loop for the interactive memory shell.
//!
//! Supported slash-commands:
//!   /help              – show this list
//!   /build             – consolidate sampled conversation windows
//!   /forget            – run one decay pass
//!   /merge             – run one merge pass
//!   /query <concept>   – show a concept's memories and its neighbors'
//!   /activate <text>   – activation score of a text
//!   /recall <text>     – memories recalled by a text
//!   /import <file>     – append a text file's lines as one conversation
//!   /stats             – graph size
//!   /models            – list the model server's models
//!   /quit | /exit      – exit the CLI

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use hippo_memory::Hippocampus;
use hippo_types::unix_now;
use tokio::runtime::Runtime;

use crate::config::Config;
use crate::models;

/// Seconds before "now" that imported conversations start and end.
const IMPORT_START_AGE: f64 = 3600.0;
const IMPORT_END_AGE: f64 = 60.0;

/// A parsed slash-command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Build,
    Forget,
    Merge,
    Query(String),
    Activate(String),
    Recall(String),
    Import(PathBuf),
    Stats,
    Models,
    Quit,
}

/// Parse one input line.  `Err` carries the message shown to the user.
pub fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (name, arg) = match line.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (line, ""),
    };
    let require = |usage: &str| {
        if arg.is_empty() { Err(format!("usage: {} {}", name, usage)) } else { Ok(arg.to_string()) }
    };
    match name {
        "/help" => Ok(Command::Help),
        "/build" => Ok(Command::Build),
        "/forget" => Ok(Command::Forget),
        "/merge" => Ok(Command::Merge),
        "/query" => require("<concept>").map(Command::Query),
        "/activate" => require("<text>").map(Command::Activate),
        "/recall" => require("<text>").map(Command::Recall),
        "/import" => require("<file>").map(|p| Command::Import(PathBuf::from(p))),
        "/stats" => Ok(Command::Stats),
        "/models" => Ok(Command::Models),
        "/quit" | "/exit" => Ok(Command::Quit),
        other => Err(format!("Unknown command: '{}'", other)),
    }
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(rt: &Runtime, engine: &Arc<Hippocampus>, cfg: &Config, shutdown: Arc<AtomicBool>) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "hippo>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        if line.trim().is_empty() {
            continue;
        }

        let command = match parse_command(&line) {
            Ok(c) => c,
            Err(msg) => {
                println!("{} Type {} for available commands.", msg.red(), "/help".bold());
                continue;
            }
        };

        match command {
            Command::Help => cmd_help(),
            Command::Build => rt.block_on(cmd_build(engine)),
            Command::Forget => rt.block_on(cmd_forget(engine)),
            Command::Merge => rt.block_on(cmd_merge(engine)),
            Command::Query(concept) => rt.block_on(cmd_query(engine, &concept)),
            Command::Activate(text) => rt.block_on(cmd_activate(engine, &text)),
            Command::Recall(text) => rt.block_on(cmd_recall(engine, &text)),
            Command::Import(path) => rt.block_on(cmd_import(engine, &path)),
            Command::Stats => rt.block_on(cmd_stats(engine)),
            Command::Models => rt.block_on(cmd_models(cfg)),
            Command::Quit => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "Hippocampus Commands".bold().underline());
    println!("  {}            – consolidate sampled conversations", "/build".bold().cyan());
    println!("  {}           – run one decay pass", "/forget".bold().cyan());
    println!("  {}            – re-summarize overgrown concepts", "/merge".bold().cyan());
    println!("  {}  – a concept's memories and its neighbors'", "/query <concept>".bold().cyan());
    println!("  {}  – how strongly a text resonates", "/activate <text>".bold().cyan());
    println!("  {}    – memories recalled by a text", "/recall <text>".bold().cyan());
    println!("  {}    – import a text file as one conversation", "/import <file>".bold().cyan());
    println!("  {}            – graph size", "/stats".bold().cyan());
    println!("  {}           – list the model server's models", "/models".bold().cyan());
    println!("  {}      – exit the CLI", "/quit  /exit".bold().cyan());
    println!();
}

async fn cmd_build(engine: &Hippocampus) {
    println!("  Consolidating … (this calls the model once per topic)");
    match engine.consolidate().await {
        Ok(r) => println!(
            "  {} {} window(s), {} memories, {} similar + {} co-occurrence links",
            "✓".green().bold(),
            r.windows,
            r.memories_added.to_string().bold(),
            r.similar_links,
            r.co_occurrence_links
        ),
        Err(e) => println!("  {}: {}", "Build failed".red(), e),
    }
}

async fn cmd_forget(engine: &Hippocampus) {
    match engine.forget_pass().await {
        Ok(r) => println!(
            "  {} checked {} edge(s) / {} node(s): {} weakened, {} edges removed, {} nodes reduced, {} nodes removed",
            "✓".green().bold(),
            r.edges_checked,
            r.nodes_checked,
            r.edges_weakened,
            r.edges_removed,
            r.nodes_reduced,
            r.nodes_removed
        ),
        Err(e) => println!("  {}: {}", "Forget failed".red(), e),
    }
}

async fn cmd_merge(engine: &Hippocampus) {
    match engine.merge_pass().await {
        Ok(r) => println!(
            "  {} checked {} node(s): {} merged, {} items replaced by {}",
            "✓".green().bold(),
            r.nodes_checked,
            r.nodes_merged,
            r.items_removed,
            r.items_added
        ),
        Err(e) => println!("  {}: {}", "Merge failed".red(), e),
    }
}

async fn cmd_query(engine: &Hippocampus, concept: &str) {
    let (own, neighbors) = engine.related_items(concept, 2).await;
    if own.is_empty() {
        println!("  {} '{}'", "No memories about".yellow(), concept);
        return;
    }
    println!("{}", concept.bold().underline());
    for item in &own {
        println!("  • {}", item);
    }
    if !neighbors.is_empty() {
        println!("  {}", "Related:".dimmed());
        for item in &neighbors {
            println!("    ◦ {}", item.dimmed());
        }
    }
}

async fn cmd_activate(engine: &Hippocampus, text: &str) {
    let value = engine.activation_value(text).await;
    let shown = match value {
        0 => value.to_string().dimmed(),
        1..=40 => value.to_string().yellow(),
        _ => value.to_string().green().bold(),
    };
    println!("  Activation: {}", shown);
}

async fn cmd_recall(engine: &Hippocampus, text: &str) {
    let recalled = engine.relevant_memories(text).await;
    if recalled.is_empty() {
        println!("  {}", "Nothing comes to mind.".dimmed());
        return;
    }
    for memory in &recalled {
        println!(
            "  [{} {}] {}",
            memory.topic.bold(),
            format!("{:.2}", memory.similarity).dimmed(),
            memory.content
        );
    }
}

async fn cmd_import(engine: &Hippocampus, path: &Path) {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) => {
            println!("  {} {}: {}", "Cannot read".red(), path.display(), e);
            return;
        }
    };
    let lines: Vec<String> = raw.lines().map(str::to_string).collect();
    let conversation_id = format!("import-{}", uuid::Uuid::new_v4());
    let now = unix_now();
    match engine.import_messages(&conversation_id, &lines, now - IMPORT_START_AGE, now - IMPORT_END_AGE).await {
        Ok(0) => println!("  {}", "File has no non-blank lines.".yellow()),
        Ok(n) => println!("  {} imported {} message(s) as {}", "✓".green().bold(), n, conversation_id.dimmed()),
        Err(e) => println!("  {}: {}", "Import failed".red(), e),
    }
}

async fn cmd_stats(engine: &Hippocampus) {
    let stats = engine.stats().await;
    println!(
        "  {} concept(s), {} relation(s), {} memory item(s)",
        stats.nodes.to_string().bold(),
        stats.edges.to_string().bold(),
        stats.memory_items.to_string().bold()
    );
}

async fn cmd_models(cfg: &Config) {
    println!("{}", "Model Server".bold().underline());
    println!("  Active model : {}", cfg.model.yellow());
    print!("  Probing {} … ", cfg.llm_url.dimmed());
    io::stdout().flush().ok();

    match models::fetch_models(&cfg.llm_url, cfg.api_key().as_deref()).await {
        Ok(list) if list.is_empty() => println!("{}", "no models found".yellow()),
        Ok(list) => {
            println!("{}", "online".green());
            for m in &list {
                let marker = if models::serves(std::slice::from_ref(m), &cfg.model) { "▶" } else { " " };
                println!("    {} {}", marker.green(), m.id.bold());
            }
            if !models::serves(&list, &cfg.model) {
                println!("  {} '{}' is not served; set `model` in the config.", "Warning:".yellow(), cfg.model);
            }
        }
        Err(e) => {
            println!("{}", "offline".red());
            println!("  {}", e.dimmed());
        }
    }
}
