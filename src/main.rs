//! # Wait Alert Application Entry Point
//!
//! This binary crate wires the library together: it loads the configuration,
//! opens the preferences file, and either runs the background watcher or performs
//! one-off commands (listing wait times, managing alerts and favorites).

// Test modules
#[cfg(test)]
mod tests;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use wait_alert_lib::config::{Config, DEFAULT_CONFIG_FILE};
use wait_alert_lib::evaluator::{AlertEvaluator, RunOutcome};
use wait_alert_lib::notifier::{CommandNotifier, LogNotifier, MultiNotifier, Notifier};
use wait_alert_lib::scheduler::{
    AssumeConnected, BackoffPolicy, JobScheduler, NetworkProbe, Precondition, TcpProbe,
    IMMEDIATE_JOB, PERIODIC_JOB,
};
use wait_alert_lib::store::{
    AlertRepository, AlertStore, FavoritesRepository, FavoritesStore, FilePreferences,
    KeyValueStore,
};
use wait_alert_lib::wait_times::{HttpWaitTimeSource, WaitTimeSource};
use wait_alert_lib::{Alert, AttractionState};

/// Theme park wait-time watcher with one-shot wait-time alerts
#[derive(Parser, Debug)]
#[command(name = "wait-alert", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check alerts on the configured interval until Ctrl-C
    Watch,
    /// Check alerts once
    Check {
        /// Honor the network precondition and retry with backoff
        #[arg(long)]
        retry: bool,
    },
    /// Print current wait times
    Times {
        /// Only show favorite attractions
        #[arg(long)]
        favorites: bool,
    },
    /// Manage wait-time alerts
    #[command(subcommand)]
    Alerts(AlertsCommand),
    /// Manage favorite attractions
    #[command(subcommand)]
    Favorites(FavoritesCommand),
    /// Write the effective configuration to the config path
    InitConfig,
}

#[derive(Subcommand, Debug)]
enum AlertsCommand {
    List,
    /// Notify once the attraction's wait is at or below TARGET minutes
    Add {
        code: String,
        target: u32,
        /// Display name; looked up from the live wait times when omitted
        #[arg(long)]
        name: Option<String>,
    },
    Remove {
        code: String,
    },
}

#[derive(Subcommand, Debug)]
enum FavoritesCommand {
    List,
    Add { code: String },
    Remove { code: String },
    Toggle { code: String },
}

/// Everything the commands need, built once from the config.
struct App {
    config: Config,
    alerts: Arc<AlertRepository>,
    favorites: FavoritesRepository,
    source: Arc<HttpWaitTimeSource>,
}

impl App {
    fn open(config: Config) -> anyhow::Result<Self> {
        config.validate().context("invalid configuration")?;
        let prefs: Arc<dyn KeyValueStore> = Arc::new(
            FilePreferences::open(&config.storage.path).with_context(|| {
                format!("opening preferences {}", config.storage.path.display())
            })?,
        );
        let source = Arc::new(HttpWaitTimeSource::new(&config.api)?);
        Ok(App {
            alerts: Arc::new(AlertRepository::new(prefs.clone())),
            favorites: FavoritesRepository::new(prefs),
            source,
            config,
        })
    }

    fn notifier(&self) -> Arc<dyn Notifier> {
        let mut channels: Vec<Arc<dyn Notifier>> = vec![Arc::new(LogNotifier)];
        if let Some(command) = CommandNotifier::from_command(&self.config.notify.command) {
            channels.push(Arc::new(command));
        }
        Arc::new(MultiNotifier::new(channels))
    }

    fn evaluator(&self) -> Arc<AlertEvaluator> {
        Arc::new(AlertEvaluator::new(
            self.alerts.clone(),
            self.source.clone(),
            self.notifier(),
        ))
    }

    fn precondition(&self) -> Precondition {
        if self.config.schedule.require_network {
            Precondition::NetworkConnected
        } else {
            Precondition::None
        }
    }

    fn scheduler(&self) -> JobScheduler {
        let probe: Arc<dyn NetworkProbe> =
            match TcpProbe::for_base_url(&self.config.api.base_url, self.config.api.timeout()) {
                Some(probe) => Arc::new(probe),
                None => {
                    warn!(
                        base_url = %self.config.api.base_url,
                        "cannot probe base URL, assuming connected"
                    );
                    Arc::new(AssumeConnected)
                }
            };
        JobScheduler::new(probe, BackoffPolicy::from_config(&self.config.schedule))
    }
}

/// Main application entry point.
fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize structured logging with configurable level via RUST_LOG env var
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load_from_path(&args.config);

    if let Command::InitConfig = args.command {
        config.save(&args.config)?;
        return Ok(());
    }

    // Create Tokio runtime for async operations
    let rt = tokio::runtime::Runtime::new()?;
    let app = App::open(config)?;
    rt.block_on(run(app, args.command))
}

async fn run(app: App, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Watch => watch(&app).await,
        Command::Check { retry } => check(&app, retry).await,
        Command::Times { favorites } => times(&app, favorites).await,
        Command::Alerts(cmd) => alerts(&app, cmd).await,
        Command::Favorites(cmd) => favorites(&app, cmd),
        Command::InitConfig => Ok(()),
    }
}

async fn watch(app: &App) -> anyhow::Result<()> {
    let scheduler = app.scheduler();
    scheduler.schedule_recurring(
        PERIODIC_JOB,
        app.config.schedule.interval(),
        app.precondition(),
        app.evaluator(),
    );
    info!(
        park = %app.config.api.park,
        interval_minutes = app.config.schedule.interval_minutes,
        "watching wait times, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    scheduler.shutdown();
    Ok(())
}

async fn check(app: &App, retry: bool) -> anyhow::Result<()> {
    if retry {
        let scheduler = app.scheduler();
        let outcome = scheduler
            .schedule_once(IMMEDIATE_JOB, app.precondition(), app.evaluator())
            .await
            .unwrap_or(RunOutcome::Retry);
        if outcome == RunOutcome::Retry {
            bail!("alert check did not complete, retries exhausted");
        }
        return Ok(());
    }

    let report = app.evaluator().evaluate().await?;
    if !report.fetched {
        println!("No active alerts.");
        return Ok(());
    }
    for fired in &report.triggered {
        println!(
            "FIRED    {:<28} {:>3} min (target {} min)",
            fired.alert.attraction_name, fired.wait_time_minutes, fired.alert.target_time_minutes
        );
    }
    for alert in &report.pending {
        println!(
            "waiting  {:<28}         (target {} min)",
            alert.attraction_name, alert.target_time_minutes
        );
    }
    for code in &report.unmatched {
        println!("missing  {code}");
    }
    Ok(())
}

async fn times(app: &App, only_favorites: bool) -> anyhow::Result<()> {
    let mut states = app
        .source
        .fetch_current()
        .await
        .context("fetching wait times")?;
    let favorites = app.favorites.list()?;
    let alerts = app.alerts.get_all()?;

    match app.source.fetch_crowd_level().await {
        Ok(level) => println!("Crowd level: {:.0}% ({})", level.crowd_level, level.timestamp),
        Err(e) => warn!(error = %e, "crowd level unavailable"),
    }

    states.retain(|s| !only_favorites || favorites.contains(&s.code));
    states.sort_by(|a, b| {
        favorites
            .contains(&b.code)
            .cmp(&favorites.contains(&a.code))
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });

    for state in &states {
        println!("{}", format_row(state, favorites.contains(&state.code), &alerts));
    }
    Ok(())
}

fn format_row(state: &AttractionState, favorite: bool, alerts: &[Alert]) -> String {
    let star = if favorite { '*' } else { ' ' };
    let alert = alerts
        .iter()
        .find(|a| a.attraction_code == state.code)
        .map(|a| format!("  alert <= {} min", a.target_time_minutes))
        .unwrap_or_default();
    format!(
        "{star} {:<28} {:<8} {:>3} min{alert}",
        state.name,
        state.status.label(),
        state.wait_time_minutes
    )
}

async fn alerts(app: &App, cmd: AlertsCommand) -> anyhow::Result<()> {
    match cmd {
        AlertsCommand::List => {
            for alert in app.alerts.get_all()? {
                println!(
                    "{:<24} {:<28} <= {} min",
                    alert.attraction_code, alert.attraction_name, alert.target_time_minutes
                );
            }
        }
        AlertsCommand::Add { code, target, name } => {
            let name = match name {
                Some(name) => name,
                None => lookup_name(app, &code).await,
            };
            let alert = Alert::new(code, name, target)?;
            app.alerts.upsert(alert.clone())?;
            info!(code = %alert.attraction_code, target_minutes = target, "alert_saved");
        }
        AlertsCommand::Remove { code } => {
            app.alerts.remove(&code)?;
            info!(code = %code, "alert_removed");
        }
    }
    Ok(())
}

/// Best-effort display name for `code`, falling back to the code itself.
async fn lookup_name(app: &App, code: &str) -> String {
    match app.source.fetch_current().await {
        Ok(states) => states
            .into_iter()
            .find(|s| s.code == code)
            .map(|s| s.name)
            .unwrap_or_else(|| {
                warn!(code, "attraction not in current wait times");
                code.to_string()
            }),
        Err(e) => {
            warn!(error = %e, "could not look up attraction name");
            code.to_string()
        }
    }
}

fn favorites(app: &App, cmd: FavoritesCommand) -> anyhow::Result<()> {
    match cmd {
        FavoritesCommand::List => {
            for code in app.favorites.list()? {
                println!("{code}");
            }
        }
        FavoritesCommand::Add { code } => app.favorites.add(&code)?,
        FavoritesCommand::Remove { code } => app.favorites.remove(&code)?,
        FavoritesCommand::Toggle { code } => {
            let now = app.favorites.toggle(&code)?;
            println!("{code}: {}", if now { "favorite" } else { "not a favorite" });
        }
    }
    Ok(())
}
