//! RequestPro CLI
//!
//! CLI tool for managing a rule state file, compiling its declarative table,
//! and checking how the rules treat a given request.

mod bench;
mod config;
mod sink;
mod store;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};

use rp_compiler::{compile, Recompiler};
use rp_core::{io, Decision, EngineError, Header, HookSignal, Rule, RuleEngine, RuleStore, RuleType};

use crate::bench::BenchOptions;
use crate::config::Config;
use crate::sink::FileSink;
use crate::store::JsonFileStore;

#[derive(Parser)]
#[command(name = "rp-cli")]
#[command(about = "RequestPro rule table tools")]
struct Cli {
    /// Rule state file ({rules, stats})
    #[arg(short, long, global = true, default_value = "requestpro.json")]
    state: PathBuf,

    /// Optional JSON config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Where mutations install the compiled declarative table
    #[arg(long, global = true, default_value = "compiled-rules.json")]
    compiled: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the state file
    Validate,

    /// List rules
    List,

    /// Show aggregate statistics
    Stats,

    /// Add an inactive rule of the given type with default actions
    New {
        /// Rule type (redirect, modify-headers, block, ...)
        #[arg(short = 't', long = "type")]
        rule_type: String,

        /// Rule name
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Add a rule from a JSON file
    Add {
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Replace the rule with the same id from a JSON file
    Replace {
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Remove a rule
    Remove { id: String },

    /// Switch a rule between active and inactive
    Toggle { id: String },

    /// Replace all rules with an exported rule set
    Import {
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Export rules as a JSON array
    Export {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Compile the declarative table
    Compile {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run a URL through every interception hook
    Check {
        url: String,

        /// Request header as Name:Value
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Browsing context id for notifications
        #[arg(long)]
        context: Option<i32>,

        /// Evaluate block/redirect rules as if the declarative install failed
        #[arg(long)]
        synchronous: bool,
    },

    /// Check hook latency against performance budgets
    Bench {
        /// Number of synthetic rules
        #[arg(long, default_value_t = 500)]
        rules: usize,

        /// Iterations over the URL set
        #[arg(long, default_value_t = 2000)]
        iterations: usize,

        /// Benchmark the rules in the state file instead
        #[arg(long)]
        use_state: bool,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = Config::load(cli.config.as_deref()).and_then(|config| {
        let ctx = Context {
            store: JsonFileStore::new(&cli.state),
            compiled: cli.compiled.clone(),
            config,
        };
        run(&ctx, cli.command)
    });

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

struct Context {
    store: JsonFileStore,
    compiled: PathBuf,
    config: Config,
}

fn run(ctx: &Context, command: Commands) -> Result<(), String> {
    match command {
        Commands::Validate => cmd_validate(ctx),
        Commands::List => cmd_list(ctx),
        Commands::Stats => cmd_stats(ctx),
        Commands::New { rule_type, name } => cmd_new(ctx, &rule_type, name),
        Commands::Add { input } => {
            let rule = read_rule(&input)?;
            mutate(ctx, |engine| engine.add(rule))
        }
        Commands::Replace { input } => {
            let rule = read_rule(&input)?;
            mutate(ctx, |engine| engine.replace(rule))
        }
        Commands::Remove { id } => mutate(ctx, |engine| engine.remove(&id)),
        Commands::Toggle { id } => cmd_toggle(ctx, &id),
        Commands::Import { input } => cmd_import(ctx, &input),
        Commands::Export { output } => cmd_export(ctx, output.as_deref()),
        Commands::Compile { output } => cmd_compile(ctx, output.as_deref()),
        Commands::Check {
            url,
            headers,
            context,
            synchronous,
        } => cmd_check(ctx, &url, &headers, context, synchronous),
        Commands::Bench {
            rules,
            iterations,
            use_state,
        } => {
            let state_rules = if use_state {
                Some(load_engine(ctx)?.table().rules().to_vec())
            } else {
                None
            };
            bench::run_bench(BenchOptions {
                rules: state_rules,
                synthetic_rules: rules,
                iterations,
            })
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn load_engine(ctx: &Context) -> Result<RuleEngine, String> {
    let state = ctx
        .store
        .load()
        .map_err(|e| format!("Failed to load '{}': {}", ctx.store.path().display(), e))?;
    let (engine, _notifications) = RuleEngine::with_state(&ctx.config.engine, state)
        .map_err(|e| format!("Invalid state '{}': {}", ctx.store.path().display(), e))?;
    Ok(engine)
}

fn read_rule(path: &Path) -> Result<Rule, String> {
    let text = fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
    serde_json::from_str(&text).map_err(|e| format!("Invalid rule '{}': {}", path.display(), e))
}

fn block_on<F: std::future::Future>(future: F) -> Result<F::Output, String> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to start tokio runtime: {}", e))?;
    Ok(runtime.block_on(future))
}

/// Persist the engine's state and install a freshly compiled table, the way
/// the extension does after every mutation.
fn commit(ctx: &Context, engine: RuleEngine, hook: Option<HookSignal>) -> Result<(), String> {
    engine
        .persist_to(&ctx.store)
        .map_err(|e| format!("Failed to save '{}': {}", ctx.store.path().display(), e))?;

    let engine = Arc::new(engine);
    let sink = Arc::new(FileSink::new(&ctx.compiled));
    let recompiler = Recompiler::new(&engine, sink, ctx.config.compiler.clone());
    match block_on(recompiler.recompile())? {
        Ok(count) => println!("Installed {} declarative rules to '{}'", count, ctx.compiled.display()),
        Err(e) => {
            println!("Declarative install failed ({}); block/redirect rules fall back to synchronous evaluation", e);
            // Clear the stale table the same way the worker does
            let _ = block_on(recompiler.recompile())?;
        }
    }

    if let Some(hook) = hook {
        println!("Response hook: {}", describe_hook(hook));
    }
    Ok(())
}

fn mutate<F>(ctx: &Context, op: F) -> Result<(), String>
where
    F: FnOnce(&RuleEngine) -> Result<rp_core::Mutation, EngineError>,
{
    let engine = load_engine(ctx)?;
    let outcome = op(&engine).map_err(|e| e.to_string())?;
    let stats = engine.stats();
    println!("Rules: {} total, {} active", stats.total_rules, stats.active_rules);
    commit(ctx, engine, outcome.hook)
}

fn describe_hook(hook: HookSignal) -> String {
    match hook {
        HookSignal::InstallAll => "install in all contexts".to_string(),
        HookSignal::TeardownAll => "tear down in all contexts".to_string(),
        HookSignal::InstallIn { context_id } => format!("install in context {}", context_id),
    }
}

fn new_rule_id(now: chrono::DateTime<chrono::Utc>) -> String {
    format!("rule_{}_{:x}", now.timestamp_millis(), now.timestamp_subsec_nanos())
}

fn parse_header(raw: &str) -> Result<Header, String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("Invalid header '{}', expected Name:Value", raw))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("Invalid header '{}', empty name", raw));
    }
    Ok(Header::new(name, value.trim()))
}

// =============================================================================
// Commands
// =============================================================================

fn cmd_validate(ctx: &Context) -> Result<(), String> {
    let start = Instant::now();
    let engine = load_engine(ctx)?;
    let table = engine.table();
    let invalid = table.patterns().invalid_count();

    println!("State '{}' is valid", ctx.store.path().display());
    println!("  Rules:       {} ({} active)", table.len(), table.active_count());
    println!("  Patterns:    {} regex ({} invalid, never match)", table.patterns().len(), invalid);
    println!("  Time:        {:.1}ms", start.elapsed().as_secs_f64() * 1000.0);

    if invalid > 0 {
        log::warn!("{} regex condition(s) fail to compile", invalid);
    }
    Ok(())
}

fn cmd_list(ctx: &Context) -> Result<(), String> {
    let engine = load_engine(ctx)?;
    let table = engine.table();
    if table.is_empty() {
        println!("No rules");
        return Ok(());
    }

    for rule in table.rules() {
        let marker = if rule.is_active() { "●" } else { "○" };
        println!(
            "{} {:<28} {:<20} {} ({} conditions, {} actions)",
            marker,
            rule.id,
            rule.rule_type.label(),
            rule.name,
            rule.conditions.len(),
            rule.actions.len()
        );
    }
    Ok(())
}

fn cmd_stats(ctx: &Context) -> Result<(), String> {
    let stats = load_engine(ctx)?.stats();
    println!("Total rules:         {}", stats.total_rules);
    println!("Active rules:        {}", stats.active_rules);
    println!("Blocked requests:    {}", stats.blocked_requests);
    println!("Redirected requests: {}", stats.redirected_requests);
    Ok(())
}

fn cmd_new(ctx: &Context, rule_type: &str, name: Option<String>) -> Result<(), String> {
    let rule_type = RuleType::parse(rule_type).ok_or_else(|| {
        let known: Vec<_> = RuleType::ALL.iter().map(|t| t.as_str()).collect();
        format!("Unknown rule type '{}' (expected one of: {})", rule_type, known.join(", "))
    })?;

    let now = chrono::Utc::now();
    let mut rule = Rule::template(new_rule_id(now), rule_type, now);
    if let Some(name) = name {
        rule.name = name;
    }
    println!("Created {} '{}' ({})", rule_type.label(), rule.name, rule.id);
    mutate(ctx, |engine| engine.add(rule))
}

fn cmd_toggle(ctx: &Context, id: &str) -> Result<(), String> {
    let engine = load_engine(ctx)?;
    let toggled = engine.toggle(id).map_err(|e| e.to_string())?;
    println!("Rule {} is now {:?}", id, toggled.status);
    commit(ctx, engine, toggled.hook)
}

fn cmd_import(ctx: &Context, input: &Path) -> Result<(), String> {
    let text = fs::read_to_string(input).map_err(|e| format!("Failed to read '{}': {}", input.display(), e))?;
    let rules = io::import_rules(&text).map_err(|e| format!("Import failed: {}", e))?;
    println!("Importing {} rules from '{}'", rules.len(), input.display());
    mutate(ctx, |engine| engine.replace_all(rules))
}

fn cmd_export(ctx: &Context, output: Option<&Path>) -> Result<(), String> {
    let engine = load_engine(ctx)?;
    let text = io::export_rules(engine.table().rules()).map_err(|e| format!("Export failed: {}", e))?;
    match output {
        Some(path) => {
            fs::write(path, text).map_err(|e| format!("Failed to write '{}': {}", path.display(), e))?;
            println!("Exported {} rules to '{}'", engine.table().len(), path.display());
        }
        None => println!("{}", text),
    }
    Ok(())
}

fn cmd_compile(ctx: &Context, output: Option<&Path>) -> Result<(), String> {
    let start = Instant::now();
    let engine = load_engine(ctx)?;
    let compiled = compile(&engine.table(), &ctx.config.compiler);
    let text = serde_json::to_string_pretty(&compiled).map_err(|e| format!("Failed to serialize: {}", e))?;

    if compiled.len() > ctx.config.compiler.max_rules {
        log::warn!(
            "compiled table has {} rules, host accepts at most {}",
            compiled.len(),
            ctx.config.compiler.max_rules
        );
    }

    match output {
        Some(path) => {
            fs::write(path, text).map_err(|e| format!("Failed to write '{}': {}", path.display(), e))?;
            println!("Compiled {} rules to '{}'", compiled.len(), path.display());
            println!("  Time:     {:.1}ms", start.elapsed().as_secs_f64() * 1000.0);
        }
        None => println!("{}", text),
    }
    Ok(())
}

fn cmd_check(ctx: &Context, url: &str, raw_headers: &[String], context: Option<i32>, synchronous: bool) -> Result<(), String> {
    let state = ctx
        .store
        .load()
        .map_err(|e| format!("Failed to load '{}': {}", ctx.store.path().display(), e))?;
    let (engine, mut notifications) =
        RuleEngine::with_state(&ctx.config.engine, state).map_err(|e| format!("Invalid state: {}", e))?;
    if synchronous {
        engine.fall_back_to_synchronous();
    }

    let headers = raw_headers
        .iter()
        .map(|raw| parse_header(raw))
        .collect::<Result<Vec<_>, _>>()?;

    println!("URL: {}", url);

    let verdict = engine.on_before_request(url);
    match &verdict.decision {
        Decision::Allow => println!("  Request:   allow"),
        Decision::Block => println!("  Request:   block ({})", verdict.rule_id.as_deref().unwrap_or("-")),
        Decision::Redirect { url } => {
            println!("  Request:   redirect to {} ({})", url, verdict.rule_id.as_deref().unwrap_or("-"))
        }
    }
    if let Some(delay) = verdict.delay {
        println!("  Delay:     {}ms requested (not enforced)", delay.millis);
    }

    let declarative = compile(&engine.table(), &ctx.config.compiler).len();
    if declarative > 0 {
        println!("  Declarative table: {} rules (matched by the host, not here)", declarative);
    }

    match engine.on_before_send(url, &headers) {
        Some(patch) => {
            println!("  Request headers:");
            for h in patch {
                println!("    {}: {}", h.name, h.value);
            }
        }
        None => println!("  Request headers: unchanged"),
    }

    if let Some(hit) = engine.on_response_lookup(url, context) {
        println!("  Response:  mocked by {} ({}, {} bytes)", hit.rule_id, hit.content_type, hit.body.len());
    }

    let page = engine.on_page_load(url);
    for script in &page.scripts {
        println!("  Script:    {}", script);
    }
    if let Some(location) = &page.location {
        println!("  Location:  {}", location);
    }

    if let Some(context_id) = context {
        if let Some(hook) = engine.on_context_navigated(context_id, url) {
            println!("  Response hook: {}", describe_hook(hook));
        }
    }

    while let Ok(note) = notifications.try_recv() {
        println!("  Notification [{}]: {}", note.context_id, note.message);
    }

    Ok(())
}
