//! CLI command definitions for swe-harness.
//!
//! Every command that renders or evaluates images requires an explicit
//! `--need-clone true|false` (or a config file that sets `need_clone`).

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use clap::{ArgAction, Args, Parser};
use serde::Serialize;
use tracing::info;

use crate::config::{Config, HarnessConfig};
use crate::dataset::load_dataset;
use crate::execution::DockerClient;
use crate::harness::{self, Harness, HarnessSummary};
use crate::instance::InstanceRegistry;
use crate::verdict::{certify, LogGrammar};

/// Multi-language pull request evaluation harness.
#[derive(Parser)]
#[command(name = "swe-harness")]
#[command(about = "Build per-PR images, run baseline/test/fix phases and certify fixes")]
#[command(version)]
#[command(
    long_about = "swe-harness rebuilds the environment of a pull request at its base commit, runs the test suite three times (baseline, with the test patch, with test and fix patches) and certifies whether the fix resolves the tests the test patch breaks.\n\nExample usage:\n  swe-harness evaluate --dataset ./prs.jsonl --need-clone true"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// List registered repository adapters.
    Instances(InstancesArgs),

    /// Write build contexts for every pull request without building them.
    Render(RenderArgs),

    /// Reduce a test log to passed/failed/skipped sets.
    ParseLog(ParseLogArgs),

    /// Certify a fix from the logs of the three phases.
    Certify(CertifyArgs),

    /// Build images and run all three phases for every pull request.
    #[command(alias = "eval")]
    Evaluate(EvaluateArgs),
}

/// Arguments for `swe-harness instances`.
#[derive(Parser, Debug)]
pub struct InstancesArgs {
    /// Output as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Options that end up in Dockerfiles and scripts.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// YAML file with `need_clone`, `setup_commands`, `global_env`, `clear_env`, `image_prefix`.
    #[arg(long)]
    pub config: Option<String>,

    /// Clone sources from GitHub (true) or copy them from --repo-dir (false).
    #[arg(long, action = ArgAction::Set, required_unless_present = "config")]
    pub need_clone: Option<bool>,

    /// Shell command injected into prepare.sh (repeatable).
    #[arg(long = "setup-command")]
    pub setup_commands: Vec<String>,

    /// Environment variable set in every layer, as KEY=VALUE (repeatable).
    #[arg(long = "env")]
    pub env: Vec<String>,

    /// Reset the --env variables at the end of every layer.
    #[arg(long)]
    pub clear_env: bool,

    /// Namespace of built images.
    #[arg(long)]
    pub image_prefix: Option<String>,
}

/// Options controlling the harness. Unset flags fall back to `HARNESS_*`
/// environment variables, then to defaults.
#[derive(Args, Debug, Clone)]
pub struct HarnessArgs {
    /// Directory for build contexts, logs and reports.
    #[arg(short = 'w', long)]
    pub workspace: Option<String>,

    /// Root of staged sources, laid out as <repo-dir>/<org>/<repo>.
    #[arg(long)]
    pub repo_dir: Option<String>,

    /// Image build timeout in seconds.
    #[arg(long)]
    pub build_timeout: Option<u64>,

    /// Per-phase run timeout in seconds.
    #[arg(long)]
    pub run_timeout: Option<u64>,

    /// Rebuild images that already exist.
    #[arg(long)]
    pub force_build: bool,

    /// Keep phase containers after they exit (for debugging).
    #[arg(long)]
    pub keep_containers: bool,

    /// Replace the baseline command.
    #[arg(long)]
    pub run_cmd: Option<String>,

    /// Replace the test-patch phase command.
    #[arg(long)]
    pub test_patch_run_cmd: Option<String>,

    /// Replace the fix phase command.
    #[arg(long)]
    pub fix_patch_run_cmd: Option<String>,
}

/// Arguments for `swe-harness render`.
#[derive(Parser, Debug)]
pub struct RenderArgs {
    /// JSONL file of pull requests, or a directory of them.
    #[arg(short = 'd', long)]
    pub dataset: String,

    #[command(flatten)]
    pub config: ConfigArgs,

    #[command(flatten)]
    pub harness: HarnessArgs,

    /// Output as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Where a log grammar comes from.
#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct GrammarSource {
    /// Log grammar to use.
    #[arg(long, value_enum)]
    pub grammar: Option<LogGrammar>,

    /// Use the grammar of a registered adapter, as org/repo.
    #[arg(long)]
    pub instance: Option<String>,
}

/// Arguments for `swe-harness parse-log`.
#[derive(Parser, Debug)]
pub struct ParseLogArgs {
    /// Log file to parse.
    pub log: String,

    #[command(flatten)]
    pub source: GrammarSource,
}

/// Arguments for `swe-harness certify`.
#[derive(Parser, Debug)]
pub struct CertifyArgs {
    /// Baseline log.
    #[arg(long)]
    pub run: String,

    /// Test-patch phase log.
    #[arg(long)]
    pub test_patch_run: String,

    /// Fix phase log.
    #[arg(long)]
    pub fix_patch_run: String,

    #[command(flatten)]
    pub source: GrammarSource,
}

/// Arguments for `swe-harness evaluate`.
#[derive(Parser, Debug)]
pub struct EvaluateArgs {
    /// JSONL file of pull requests, or a directory of them.
    #[arg(short = 'd', long)]
    pub dataset: String,

    #[command(flatten)]
    pub config: ConfigArgs,

    #[command(flatten)]
    pub harness: HarnessArgs,

    /// Output results as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Parse CLI arguments without running a command.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
///
/// For more control over logging initialization, use `parse_cli()` and `run_with_cli()`.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let registry = InstanceRegistry::with_builtin()?;
    match cli.command {
        Commands::Instances(args) => run_instances_command(&registry, args),
        Commands::Render(args) => run_render_command(&registry, args),
        Commands::ParseLog(args) => run_parse_log_command(&registry, args),
        Commands::Certify(args) => run_certify_command(&registry, args),
        Commands::Evaluate(args) => run_evaluate_command(registry, args).await,
    }
}

// ============================================================================
// Argument resolution
// ============================================================================

fn build_config(args: &ConfigArgs) -> anyhow::Result<Config> {
    let mut config = match (&args.config, args.need_clone) {
        (Some(path), _) => Config::from_yaml_file(Path::new(path))?,
        (None, Some(need_clone)) => Config::new(need_clone),
        (None, None) => bail!("--need-clone must be set to true or false"),
    };

    if let Some(need_clone) = args.need_clone {
        config.need_clone = need_clone;
    }
    config.setup_commands.extend(args.setup_commands.iter().cloned());
    for pair in &args.env {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("--env expects KEY=VALUE, got '{pair}'"))?;
        config.global_env.insert(key.to_string(), value.to_string());
    }
    if args.clear_env {
        config.clear_env = true;
    }
    if let Some(prefix) = &args.image_prefix {
        config.image_prefix = prefix.clone();
    }

    config.validate()?;
    Ok(config)
}

fn build_harness_config(args: &HarnessArgs) -> anyhow::Result<HarnessConfig> {
    let mut config = HarnessConfig::from_env()?;

    if let Some(dir) = &args.workspace {
        config.workspace_dir = dir.into();
    }
    if let Some(dir) = &args.repo_dir {
        config.repo_dir = dir.into();
    }
    if let Some(secs) = args.build_timeout {
        config.build_timeout = std::time::Duration::from_secs(secs);
    }
    if let Some(secs) = args.run_timeout {
        config.run_timeout = std::time::Duration::from_secs(secs);
    }
    config.force_build |= args.force_build;
    config.keep_containers |= args.keep_containers;
    if args.run_cmd.is_some() {
        config.run_cmd = args.run_cmd.clone();
    }
    if args.test_patch_run_cmd.is_some() {
        config.test_patch_run_cmd = args.test_patch_run_cmd.clone();
    }
    if args.fix_patch_run_cmd.is_some() {
        config.fix_patch_run_cmd = args.fix_patch_run_cmd.clone();
    }

    config.validate()?;
    Ok(config)
}

fn resolve_grammar(registry: &InstanceRegistry, source: &GrammarSource) -> anyhow::Result<LogGrammar> {
    if let Some(grammar) = source.grammar {
        return Ok(grammar);
    }
    let name = source
        .instance
        .as_deref()
        .ok_or_else(|| anyhow!("either --grammar or --instance is required"))?;
    let (org, repo) = name
        .split_once('/')
        .ok_or_else(|| anyhow!("--instance expects org/repo, got '{name}'"))?;
    Ok(registry.entry(org, repo)?.grammar())
}

fn read_log(path: &str) -> anyhow::Result<String> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read log {path}"))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

// ============================================================================
// Commands
// ============================================================================

#[derive(Debug, Serialize)]
struct InstanceListing<'a> {
    instance: String,
    language: &'a str,
    grammar: LogGrammar,
    base_image: &'a str,
    test_cmd: &'a str,
}

fn run_instances_command(registry: &InstanceRegistry, args: InstancesArgs) -> anyhow::Result<()> {
    let listing: Vec<InstanceListing<'_>> = registry
        .entries()
        .into_iter()
        .map(|e| InstanceListing {
            instance: e.full_name(),
            language: e.language(),
            grammar: e.grammar(),
            base_image: e.toolchain.base_image,
            test_cmd: e.toolchain.test_cmd,
        })
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
    } else {
        for item in &listing {
            println!(
                "{:<24} {:<6} {:<11} {}",
                item.instance, item.language, item.grammar.name(), item.base_image
            );
        }
    }
    Ok(())
}

fn run_render_command(registry: &InstanceRegistry, args: RenderArgs) -> anyhow::Result<()> {
    let config = build_config(&args.config)?;
    let harness_config = build_harness_config(&args.harness)?;
    let prs = load_dataset(Path::new(&args.dataset))?;
    if prs.is_empty() {
        bail!("No pull requests found in {}", args.dataset);
    }

    let mut rendered = Vec::new();
    for pr in &prs {
        let prepared = harness::prepare(registry, &harness_config, pr, &config)
            .with_context(|| format!("Failed to render {}", pr.id()))?;
        rendered.push(serde_json::json!({
            "id": pr.id(),
            "contexts": prepared.contexts,
        }));
        if !args.json {
            for ctx in &prepared.contexts {
                println!("{} -> {}", ctx.image, ctx.dir.display());
            }
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&rendered)?);
    }
    info!("Rendered build contexts for {} pull requests", prs.len());
    Ok(())
}

fn run_parse_log_command(registry: &InstanceRegistry, args: ParseLogArgs) -> anyhow::Result<()> {
    let grammar = resolve_grammar(registry, &args.source)?;
    let result = grammar.parse(&read_log(&args.log)?);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn run_certify_command(registry: &InstanceRegistry, args: CertifyArgs) -> anyhow::Result<()> {
    let grammar = resolve_grammar(registry, &args.source)?;
    let run = grammar.parse(&read_log(&args.run)?);
    let test = grammar.parse(&read_log(&args.test_patch_run)?);
    let fix = grammar.parse(&read_log(&args.fix_patch_run)?);

    let certification = certify(&run, &test, &fix);
    println!("{}", serde_json::to_string_pretty(&certification)?);
    Ok(())
}

async fn run_evaluate_command(registry: InstanceRegistry, args: EvaluateArgs) -> anyhow::Result<()> {
    let config = build_config(&args.config)?;
    let harness_config = build_harness_config(&args.harness)?;
    let prs = load_dataset(Path::new(&args.dataset))?;
    if prs.is_empty() {
        bail!("No pull requests found in {}", args.dataset);
    }

    let client = DockerClient::new()?;
    client.ping().await?;

    info!(
        "Evaluating {} pull requests from {} (need_clone={})",
        prs.len(),
        args.dataset,
        config.need_clone
    );
    let harness = Harness::new(client, Arc::new(registry), harness_config);
    let summary = harness.run_dataset(&prs, &config).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn print_summary(summary: &HarnessSummary) {
    println!("\n=== Evaluation Results ===");
    println!("Total:          {}", summary.total);
    println!("Resolved:       {}", summary.resolved);
    println!("Unresolved:     {}", summary.unresolved);
    println!("Undetermined:   {}", summary.undetermined);
    println!("Setup errors:   {}", summary.setup_error);
    println!();

    for r in &summary.results {
        match &r.certification {
            Some(c) => println!(
                "  {} [{}] f2p={} p2p={} unresolved={} regressions={} ({:.1}s)",
                r.id,
                r.status,
                c.fail_to_pass.len(),
                c.pass_to_pass.len(),
                c.unresolved.len(),
                c.regressions.len(),
                r.duration_secs,
            ),
            None => println!("  {} [{}] ({:.1}s)", r.id, r.status, r.duration_secs),
        }
        if let Some(err) = &r.error {
            let stage = r.failed_stage.as_deref().unwrap_or("unknown");
            println!("    {stage} error: {err}");
        }
    }
}
