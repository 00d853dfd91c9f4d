use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use artship::auth;
use artship::config::{ArtshipConfig, CONFIG_FILE, CliOverrides};
use artship::engine::{Collaborators, Reporter};
use artship::engine_parallel;
use artship::environment::{self, TriggerContext};
use artship::git::{GIT_BIN_ENV, GitCli};
use artship::hosting::GitHubClient;
use artship::receipt;
use artship::refs;
use artship::stager;
use artship::types::{RunReceipt, RuntimeOptions, SourceUnit, TargetRepo, UnitState};
use artship::workspace;

#[derive(Parser, Debug)]
#[command(name = "artship", version)]
#[command(about = "Publish build output to a per-branch artifact repository")]
struct Cli {
    /// Directory holding the root package.json
    #[arg(long, default_value = ".")]
    work_dir: PathBuf,

    /// Config file (default: <work-dir>/.artship.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Publish into repositories owned by this user. Wins over --org.
    #[arg(long, env = "ARTSHIP_USER")]
    user: Option<String>,

    /// Publish into repositories owned by this organization.
    #[arg(long, env = "ARTSHIP_ORG")]
    org: Option<String>,

    /// Fixed artifact repository name (single-package repositories only).
    #[arg(long)]
    repo_name: Option<String>,

    /// Hosting token. Falls back to $ARTSHIP_TOKEN, $GITHUB_TOKEN, $GH_TOKEN.
    #[arg(long)]
    token: Option<String>,

    /// Build-output directory, relative to each package root.
    #[arg(long, env = "ARTSHIP_BUILD_DIR")]
    build_dir: Option<PathBuf>,

    /// Parent directory for staging clones, relative to the work dir.
    #[arg(long)]
    staging_dir: Option<PathBuf>,

    /// Hosting API base URL (default: https://api.github.com)
    #[arg(long)]
    api_base: Option<String>,

    /// Base URL artifact remotes are built from (default: https://github.com)
    #[arg(long)]
    git_base: Option<String>,

    /// Hosting API request timeout (e.g. 30s, 2m)
    #[arg(long)]
    api_timeout: Option<String>,

    /// Do not try to create artifact repositories.
    #[arg(long)]
    no_create_repo: bool,

    /// Source ref to publish (default: $GITHUB_REF, then the current branch)
    #[arg(long = "ref")]
    git_ref: Option<String>,

    /// CI event payload (default: $GITHUB_EVENT_PATH)
    #[arg(long)]
    event_path: Option<PathBuf>,

    /// Write the run receipt as JSON to this path.
    #[arg(long)]
    receipt: Option<PathBuf>,

    /// Print debug output.
    #[arg(long, short)]
    verbose: bool,

    /// Only print warnings and errors.
    #[arg(long, short, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the units that would be published and where they would go.
    Plan,
    /// Publish every unit to its artifact repository.
    Publish,
    /// Print environment and auth diagnostics.
    Doctor,
    /// Manage the configuration file.
    Config {
        #[command(subcommand)]
        cmd: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Write a commented default .artship.toml.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Parse and validate the configuration file.
    Validate,
}

struct CliReporter {
    verbose: bool,
    quiet: bool,
}

impl Reporter for CliReporter {
    fn info(&mut self, msg: &str) {
        if !self.quiet {
            eprintln!("[info] {msg}");
        }
    }

    fn warn(&mut self, msg: &str) {
        eprintln!("[warn] {msg}");
    }

    fn error(&mut self, msg: &str) {
        eprintln!("[error] {msg}");
    }

    fn debug(&mut self, msg: &str) {
        if self.verbose {
            eprintln!("[debug] {msg}");
        }
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let mut reporter = CliReporter {
        verbose: cli.verbose,
        quiet: cli.quiet,
    };

    match &cli.cmd {
        Commands::Config { cmd } => {
            run_config(&cli, cmd)?;
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Doctor => {
            run_doctor(&cli, &mut reporter);
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Plan | Commands::Publish => {}
    }

    let config = load_config(&cli)?.unwrap_or_default();
    config.validate()?;
    let opts = config.build_runtime_options(&cli.work_dir, overrides(&cli)?)?;
    let units = workspace::discover_units(&opts.work_dir)?;
    let trigger =
        TriggerContext::from_env(cli.event_path.as_deref())?.with_ref(cli.git_ref.clone());
    let git = GitCli::from_env();

    match cli.cmd {
        Commands::Plan => {
            print_plan(&units, &opts, &trigger, &git);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Publish => {
            let hosting = GitHubClient::new(&opts.api_base, opts.token.clone(), opts.api_timeout)?;
            let deps = Collaborators {
                vcs: &git,
                hosting: &hosting,
            };
            let run = engine_parallel::run_units(&units, &opts, &trigger, deps, &mut reporter)?;
            print_receipt(&run);
            if let Some(path) = &cli.receipt {
                receipt::write_receipt(path, &run)?;
                reporter.info(&format!("receipt written to {}", path.display()));
            }
            Ok(if run.succeeded() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Doctor | Commands::Config { .. } => Ok(ExitCode::SUCCESS),
    }
}

fn parse_duration(s: &str) -> Result<Duration> {
    humantime::parse_duration(s).with_context(|| format!("invalid duration: {s}"))
}

fn config_path(cli: &Cli) -> PathBuf {
    cli.config
        .clone()
        .unwrap_or_else(|| cli.work_dir.join(CONFIG_FILE))
}

/// An explicit `--config` must exist; the default location may be absent.
fn load_config(cli: &Cli) -> Result<Option<ArtshipConfig>> {
    match &cli.config {
        Some(path) => ArtshipConfig::load_from_file(path).map(Some),
        None => ArtshipConfig::load_from_work_dir(&cli.work_dir),
    }
}

fn overrides(cli: &Cli) -> Result<CliOverrides> {
    Ok(CliOverrides {
        user: cli.user.clone(),
        org: cli.org.clone(),
        repo_name: cli.repo_name.clone(),
        token: cli.token.clone(),
        build_dir: cli.build_dir.clone(),
        staging_dir: cli.staging_dir.clone(),
        api_base: cli.api_base.clone(),
        git_base: cli.git_base.clone(),
        api_timeout: cli.api_timeout.as_deref().map(parse_duration).transpose()?,
        no_create_repo: cli.no_create_repo,
    })
}

fn run_config(cli: &Cli, cmd: &ConfigCommands) -> Result<()> {
    let path = config_path(cli);
    match cmd {
        ConfigCommands::Init { force } => {
            if path.exists() && !force {
                bail!(
                    "{} already exists; pass --force to overwrite",
                    path.display()
                );
            }
            fs::write(&path, ArtshipConfig::default_toml_template())
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("wrote {}", path.display());
        }
        ConfigCommands::Validate => {
            let config = ArtshipConfig::load_from_file(&path)?;
            config.validate()?;
            println!("{}: ok", path.display());
        }
    }
    Ok(())
}

fn print_plan(
    units: &[SourceUnit],
    opts: &RuntimeOptions,
    trigger: &TriggerContext,
    git: &GitCli,
) {
    println!("work_dir: {}", opts.work_dir.display());
    println!("owner: {} ({})", opts.owner, opts.owner.kind());
    let branch = match units.first() {
        Some(unit) => match refs::resolve_quietly(git, &unit.root, trigger) {
            Ok(b) => b.to_string(),
            Err(e) => format!("<unresolved: {e:#}>"),
        },
        None => "<no units>".to_string(),
    };
    println!("branch: {branch}");
    println!("staging_root: {}", opts.staging_root().display());
    println!();

    for (idx, unit) in units.iter().enumerate() {
        let target = match TargetRepo::for_unit(unit, &opts.owner, opts.repo_name.as_deref()) {
            Ok(t) => t.remote_url(&opts.git_base),
            Err(e) => format!("<invalid: {e}>"),
        };
        let mode = match stager::resolve_build_dir(unit, opts).filter(|d| d.is_dir()) {
            Some(dir) => format!(
                "build output {}",
                dir.strip_prefix(&unit.root).unwrap_or(&dir).display()
            ),
            None => "full tree".to_string(),
        };
        println!(
            "{:>3}. {} -> {} ({mode})",
            idx + 1,
            unit.display_name(),
            target
        );
    }
}

fn print_receipt(run: &RunReceipt) {
    for unit in &run.units {
        match &unit.state {
            UnitState::Published(p) => println!(
                "{}: published {} -> {} ({}, {}ms)",
                unit.unit,
                p.branch,
                p.target,
                &p.artifact_hash[..p.artifact_hash.len().min(7)],
                unit.duration_ms
            ),
            UnitState::Failed { message } => println!("{}: failed: {message}", unit.unit),
        }
    }
}

fn run_doctor(cli: &Cli, reporter: &mut dyn Reporter) {
    println!("work_dir: {}", cli.work_dir.display());

    let path = config_path(cli);
    let config = match load_config(cli) {
        Ok(Some(c)) => {
            println!("config: {}", path.display());
            c
        }
        Ok(None) => {
            println!("config: <none>");
            ArtshipConfig::default()
        }
        Err(e) => {
            reporter.warn(&format!("{e:#}"));
            println!("config: <invalid>");
            ArtshipConfig::default()
        }
    };

    println!("ci: {}", environment::detect_environment().name());

    let owner = cli
        .user
        .clone()
        .map(|u| format!("{u} (user)"))
        .or_else(|| config.target.user.clone().map(|u| format!("{u} (user)")))
        .or_else(|| cli.org.clone().map(|o| format!("{o} (org)")))
        .or_else(|| config.target.org.clone().map(|o| format!("{o} (org)")))
        .unwrap_or_else(|| "<not configured>".to_string());
    println!("owner: {owner}");

    match auth::resolve_token_with_source(cli.token.as_deref()) {
        Some((_, source)) => println!("token_detected: true ({})", source.describe()),
        None => println!("token_detected: false"),
    }

    match workspace::discover_units(&cli.work_dir) {
        Ok(units) => println!("units: {}", units.len()),
        Err(e) => {
            println!("units: <none>");
            reporter.warn(&format!("{e:#}"));
        }
    }

    println!();

    let git = GitCli::from_env();
    print_git(&git, reporter);
}

fn print_git(git: &GitCli, reporter: &mut dyn Reporter) {
    match git.version() {
        Ok(v) => println!("git: {v}"),
        Err(e) => {
            reporter.warn(&format!("unable to run {} --version: {e:#}", git.program()));
            return;
        }
    }
    match which::which(git.program()) {
        Ok(p) => println!("git_path: {}", p.display()),
        Err(_) if Path::new(git.program()).is_file() => {
            println!("git_path: {}", git.program());
        }
        Err(e) => reporter.warn(&format!(
            "{} not found on PATH ({e}); set ${GIT_BIN_ENV} to override",
            git.program()
        )),
    }
}
