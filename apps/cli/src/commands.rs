//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use obituary_core::{ConfigPresence, DiscoveryPipeline, ProgressReporter, RunStage};
use obituary_shared::{
    AppConfig, DiscoveryConfig, DiscoveryRunResult, init_config, load_config, load_config_from,
};
use obituary_storage::{LibsqlStore, StoredObituary};
use obituary_trigger::AppState;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Obituary discovery: find, judge and file public AI-skeptic claims.
#[derive(Parser)]
#[command(
    name = "obituary",
    version,
    about = "Discover public claims that AI is overhyped and file them as drafts.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.obituary/obituary.toml.
    #[arg(long, global = true, env = "OBITUARY_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run discovery once and print the result.
    Run {
        /// Look back this many hours (overrides config).
        #[arg(long)]
        since_hours: Option<u32>,

        /// Classify and dedup, but do not write drafts.
        #[arg(long)]
        dry_run: bool,

        /// Print the run result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Serve the HTTP trigger.
    Serve {
        /// Address to bind (overrides config).
        #[arg(long)]
        bind: Option<String>,

        /// Also run discovery every N minutes in-process.
        #[arg(long)]
        interval_minutes: Option<u64>,
    },

    /// List recently filed drafts.
    Drafts {
        /// How many to show.
        #[arg(short, long, default_value = "20")]
        limit: u32,

        /// Show a single draft by slug.
        #[arg(long)]
        slug: Option<String>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show configuration and which credentials are present.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "obituary=info",
        1 => "obituary=debug",
        _ => "obituary=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Command::Run {
            since_hours,
            dry_run,
            json,
        } => cmd_run(config_path, since_hours, dry_run, json).await,
        Command::Serve {
            bind,
            interval_minutes,
        } => cmd_serve(config_path, bind, interval_minutes).await,
        Command::Drafts { limit, slug } => cmd_drafts(config_path, limit, slug.as_deref()).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

fn load(config_path: Option<PathBuf>) -> Result<AppConfig> {
    Ok(match config_path {
        Some(path) => load_config_from(&path)?,
        None => load_config()?,
    })
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(
    config_path: Option<PathBuf>,
    since_hours: Option<u32>,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    let app = load(config_path)?;
    let mut config = DiscoveryConfig::resolve(&app)?;
    if let Some(hours) = since_hours {
        config.since_window_hours = hours;
    }

    info!(since_hours = config.since_window_hours, dry_run, "starting discovery");

    let pipeline = DiscoveryPipeline::from_config(&config)
        .await?
        .with_dry_run(dry_run);

    let reporter = CliProgress::new(!json);
    let result = match pipeline.run(&reporter).await {
        Ok(result) => result,
        Err(e) => {
            reporter.fail();
            return Err(e.into());
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_summary(&result, dry_run);
    }
    Ok(())
}

fn print_summary(result: &DiscoveryRunResult, dry_run: bool) {
    println!();
    if dry_run {
        println!("  Discovery dry run finished (nothing written).");
    } else {
        println!("  Discovery run finished.");
    }
    println!("  Run:        {}", result.run_id);
    println!("  Discovered: {}", result.discovered);
    println!("  Filtered:   {}", result.filtered);
    println!("  Approved:   {}", result.classified);
    println!("  Duplicates: {}", result.duplicates);
    println!("  Created:    {}", result.created);
    for id in &result.created_ids {
        println!("    + {id}");
    }
    if !result.errors.is_empty() {
        println!("  Errors:");
        for error in &result.errors {
            println!("    ! {error}");
        }
    }
    println!(
        "  Time:       {:.1}s",
        Duration::from_millis(result.elapsed_ms).as_secs_f64()
    );
    println!();
}

async fn cmd_serve(
    config_path: Option<PathBuf>,
    bind: Option<String>,
    interval_minutes: Option<u64>,
) -> Result<()> {
    let app = load(config_path)?;
    let config = DiscoveryConfig::resolve(&app)?;
    let bind = bind.unwrap_or_else(|| app.server.bind.clone());

    let pipeline = DiscoveryPipeline::from_config(&config).await?;
    let state = AppState::new(pipeline, ConfigPresence::from_config(&config));

    if let Some(minutes) = interval_minutes {
        obituary_trigger::spawn_interval(state.clone(), interval_from_minutes(minutes)?);
    }

    println!("Serving discovery trigger on http://{bind}/api/discover");
    obituary_trigger::serve(&bind, state).await?;
    Ok(())
}

fn interval_from_minutes(minutes: u64) -> Result<Duration> {
    if minutes == 0 {
        return Err(eyre!("--interval-minutes must be at least 1"));
    }
    let secs = minutes
        .checked_mul(60)
        .ok_or_else(|| eyre!("--interval-minutes {minutes} is too large"))?;
    Ok(Duration::from_secs(secs))
}

async fn cmd_drafts(config_path: Option<PathBuf>, limit: u32, slug: Option<&str>) -> Result<()> {
    let app = load(config_path)?;
    let config = DiscoveryConfig::resolve(&app)?;
    let store = LibsqlStore::connect(&config.store).await?;

    if let Some(slug) = slug {
        let record = store
            .get_by_slug(slug)
            .await?
            .ok_or_else(|| eyre!("no draft with slug '{slug}'"))?;
        print_record(&record);
        return Ok(());
    }

    let records = store.list_recent(limit).await?;
    if records.is_empty() {
        println!("No drafts yet.");
        return Ok(());
    }
    for record in &records {
        print_record(record);
    }
    Ok(())
}

fn print_record(record: &StoredObituary) {
    println!("{}  [{}]  {}", record.date, record.status, record.slug);
    println!("    \"{}\"", record.claim);
    println!("    {} <{}>", record.source_name, record.source_url);
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<PathBuf>) -> Result<()> {
    let app = load(config_path)?;
    let toml_str = toml::to_string_pretty(&app)?;
    println!("{toml_str}");

    let config = DiscoveryConfig::resolve(&app)?;
    let presence = ConfigPresence::from_config(&config);
    let mark = |present: bool| if present { "set" } else { "missing" };
    println!("# credentials");
    println!("# {} = {}", app.search.api_key_env, mark(presence.search_api_key));
    println!("# {} = {}", app.openrouter.api_key_env, mark(presence.classifier_api_key));
    println!("# {} = {}", app.server.run_secret_env, mark(presence.run_secret));
    println!(
        "# store = {}",
        if presence.store_credentials { "remote" } else { "local file" }
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new(visible: bool) -> Self {
        if !visible {
            return Self {
                spinner: ProgressBar::hidden(),
            };
        }
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }

    fn fail(&self) {
        self.spinner.abandon_with_message("Discovery run failed");
    }
}

impl ProgressReporter for CliProgress {
    fn stage(&self, stage: RunStage) {
        let message = match stage {
            RunStage::Discovering => "Searching social and news",
            RunStage::Filtering => "Filtering candidates",
            RunStage::Classifying => "Classifying claims",
            RunStage::Approving => "Applying acceptance threshold",
            RunStage::Enriching => "Attaching capability context",
            RunStage::Deduping => "Checking for duplicates",
            RunStage::Persisting => "Writing drafts",
            RunStage::Done => "Done",
        };
        self.spinner.set_message(message);
    }

    fn done(&self, _result: &DiscoveryRunResult) {
        self.spinner.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_flags_parse() {
        let cli = Cli::parse_from(["obituary", "run", "--since-hours", "6", "--dry-run"]);
        match cli.command {
            Command::Run {
                since_hours,
                dry_run,
                json,
            } => {
                assert_eq!(since_hours, Some(6));
                assert!(dry_run);
                assert!(!json);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn serve_flags_parse() {
        let cli = Cli::parse_from([
            "obituary",
            "-v",
            "serve",
            "--bind",
            "0.0.0.0:8080",
            "--interval-minutes",
            "60",
        ]);
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Command::Serve {
                bind,
                interval_minutes,
            } => {
                assert_eq!(bind.as_deref(), Some("0.0.0.0:8080"));
                assert_eq!(interval_minutes, Some(60));
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn interval_minutes_are_validated() {
        assert_eq!(interval_from_minutes(5).unwrap(), Duration::from_secs(300));
        assert!(interval_from_minutes(0).is_err());
        assert!(interval_from_minutes(u64::MAX).is_err());
        assert!(interval_from_minutes(u64::MAX / 60 + 1).is_err());
    }
}
