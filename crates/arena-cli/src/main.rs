//! # arena-cli
//!
//! Binary entry point for the Arena scheduler.
//!
//! `arena run` drives a scenario file through the scheduler with scripted
//! agent replies, printing the final result and the invocation tree.
//! `arena agents` lists the agents the configuration makes available.

use anyhow::{Context, Result};
use arena_core::testing::{ScriptedGenerator, ScriptedReply};
use arena_core::{AgentManager, Arena, ArenaConfig, EventRecorder, Record};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, IsTerminal, stdout};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Color output mode for terminal display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorMode {
    /// Automatically detect if stdout is a TTY
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl ColorMode {
    fn should_use_colors(self) -> bool {
        match self {
            ColorMode::Always => true,
            ColorMode::Never => false,
            ColorMode::Auto => stdout().is_terminal(),
        }
    }
}

/// ANSI color codes for terminal output.
mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const CYAN: &str = "\x1b[36m";
}

/// Arena - task orchestration for LLM agents
#[derive(Parser, Debug)]
#[command(name = "arena", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "arena.yml", global = true)]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Color output mode (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorMode::Auto, global = true)]
    color: ColorMode,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a scenario through the scheduler
    Run(RunArgs),

    /// List the available agents
    Agents,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Scenario file describing the root agent, its input and scripted replies
    #[arg(short, long)]
    scenario: PathBuf,

    /// Write every published event to this JSONL file
    #[arg(long)]
    record: Option<PathBuf>,

    /// Directory of agent definition files (overrides config and environment)
    #[arg(long)]
    agents_dir: Option<PathBuf>,
}

/// One scripted reply in a scenario file.
///
/// Plain strings are replies; `{ fail: "..." }` makes the generator refuse.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
enum ScriptStep {
    Text(String),
    Fail { fail: String },
}

impl From<ScriptStep> for ScriptedReply {
    fn from(step: ScriptStep) -> Self {
        match step {
            ScriptStep::Text(text) => ScriptedReply::Text(text),
            ScriptStep::Fail { fail } => ScriptedReply::Fail(fail),
        }
    }
}

/// A scenario file.
#[derive(Debug, Clone, Deserialize)]
struct Scenario {
    /// Root agent.
    agent: String,

    #[serde(default)]
    input: serde_json::Value,

    /// Replies per agent, served in order.
    #[serde(default)]
    responses: BTreeMap<String, Vec<ScriptStep>>,

    /// Reply used once an agent's queue is empty.
    #[serde(default)]
    always: BTreeMap<String, String>,
}

impl Scenario {
    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        serde_yaml::from_str(&content).with_context(|| format!("Failed to parse scenario {}", path.display()))
    }

    fn generator(&self) -> ScriptedGenerator {
        let mut generator = ScriptedGenerator::new();
        for (agent, steps) in &self.responses {
            for step in steps {
                generator.push(agent, step.clone().into());
            }
        }
        for (agent, text) in &self.always {
            generator = generator.always(agent, text.clone());
        }
        generator
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over the verbosity flag.
    let default_filter = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let config = load_config(&cli.config)?;
    let use_colors = cli.color.should_use_colors();

    match cli.command {
        Commands::Run(args) => run_command(config, use_colors, args).await,
        Commands::Agents => {
            agents_command(&config, use_colors);
            Ok(())
        }
    }
}

fn load_config(path: &Path) -> Result<ArenaConfig> {
    if path.exists() {
        ArenaConfig::from_file(path).with_context(|| format!("Failed to load config from {}", path.display()))
    } else {
        debug!(path = %path.display(), "Config file not found, using defaults");
        Ok(ArenaConfig::default())
    }
}

async fn run_command(config: ArenaConfig, use_colors: bool, args: RunArgs) -> Result<()> {
    let scenario = Scenario::from_file(&args.scenario)?;

    let mut manager = AgentManager::new(&config);
    if let Some(dir) = args.agents_dir {
        manager = manager.with_search_path(dir);
    }
    let agents = manager.agents();

    let generator = Arc::new(scenario.generator());
    let mut arena = Arena::new(generator, agents).with_config(config.scheduler.clone());

    let recorder = match &args.record {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
            let recorder = Arc::new(EventRecorder::new(BufWriter::new(file)));
            arena.add_observer(EventRecorder::make_observer(Arc::clone(&recorder)));
            recorder.record_meta(Record::meta_run_start(&scenario.agent, &scenario.input));
            Some(recorder)
        }
        None => None,
    };

    let result: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&result);
    arena
        .submit_with(&scenario.agent, scenario.input.clone(), move |output| {
            if let Ok(mut slot) = slot.lock() {
                *slot = Some(output);
            }
        })
        .with_context(|| format!("Failed to submit to {}", scenario.agent))?;

    info!(agent = %scenario.agent, "Running scenario");
    arena.run().await.context("Scheduler run failed")?;

    let result = result.lock().ok().and_then(|mut slot| slot.take());

    if let Some(recorder) = &recorder {
        recorder.record_meta(Record::meta_run_end(result.as_deref(), arena.error_count()));
        recorder.flush().context("Failed to flush event record")?;
        info!(events = recorder.recorded(), "Events recorded");
    }

    print_section("Result", use_colors);
    match &result {
        Some(text) => println!("{text}"),
        None => {
            warn!("Root task produced no result");
            println!("{}", paint("(no result)", colors::DIM, use_colors));
        }
    }

    print_section("Invocations", use_colors);
    print!("{}", arena.invocation_log().render_tree());

    if arena.error_count() > 0 {
        println!(
            "\n{}",
            paint(&format!("errors: {}", arena.error_count()), colors::YELLOW, use_colors)
        );
    }

    Ok(())
}

fn agents_command(config: &ArenaConfig, use_colors: bool) {
    let mut manager = AgentManager::new(config);
    let agents = manager.agents();

    for name in manager.names() {
        let Some(agent) = agents.get(&name) else {
            continue;
        };
        let mut line = paint(&name, colors::GREEN, use_colors);
        if !agent.sub_agents().is_empty() {
            line.push_str(&format!(" -> {}", agent.sub_agents().join(", ")));
        }
        if agent.supports_continuation() {
            line.push_str(&paint(" (continuation)", colors::DIM, use_colors));
        }
        println!("{line}");
    }
}

fn print_section(title: &str, use_colors: bool) {
    println!("{}", paint(&format!("== {title} =="), &format!("{}{}", colors::BOLD, colors::CYAN), use_colors));
}

fn paint(text: &str, color: &str, use_colors: bool) -> String {
    if use_colors {
        format!("{color}{text}{}", colors::RESET)
    } else {
        text.to_string()
    }
}
