use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use csv_importer::{
    config::{Config, ConfigProvider, StaticConfigProvider},
    database::{settings::keys, Database, SettingsConfigProvider},
    importer::{ConfigValidator, ImportRun, ImportStateManager},
    models::{ImportConfig, RunTrigger, ScheduleOptions},
    scheduler::{SchedulerService, TokioTriggerPlatform, TriggerPlatform},
    sources::CsvSource,
};

#[derive(Parser)]
#[command(name = "csv-importer")]
#[command(version = "0.1.0")]
#[command(about = "Bulk-imports CSV rows into a content store, manually or on a schedule")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Database URL (overrides config file)
    #[arg(short = 'd', long, value_name = "URL")]
    database_url: Option<String>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one import now and print the summary
    Run {
        /// Read the import configuration from a TOML file instead of the
        /// saved settings
        #[arg(long, value_name = "FILE")]
        import_config: Option<PathBuf>,
    },

    /// Run the scheduler daemon
    Daemon,

    /// Create or replace the recurring import job
    Schedule {
        /// Named cadence (hourly, twicedaily, daily, weekly, monthly,
        /// every_15min, every_30min) or a cron expression
        #[arg(short, long)]
        frequency: String,

        /// Source backend the job imports from (remote or local)
        #[arg(short, long)]
        source: String,

        /// First run one minute from now instead of at the top of the next hour
        #[arg(long)]
        now: bool,
    },

    /// Remove the recurring import job
    Unschedule,

    /// Print the scheduler snapshot as JSON
    Status,

    /// Validate the saved import configuration and probe its sources
    Validate,

    /// Manage the saved import configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Save an import configuration from a TOML file
    Set {
        #[arg(long, value_name = "FILE")]
        file: PathBuf,
    },

    /// Print the saved import configuration as TOML
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging with specified level
    let log_filter = format!("csv_importer={}", cli.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::load(Some(Path::new(&cli.config)))?;
    if let Some(database_url) = cli.database_url {
        config.database.url = database_url;
    }

    let database = Database::new(&config.database).await?;
    database.migrate().await?;

    match cli.command {
        Command::Run { import_config } => run_import(&config, &database, import_config).await,
        Command::Daemon => {
            info!("Starting csv-importer v{}", env!("CARGO_PKG_VERSION"));
            build_scheduler(&config, &database).start().await
        }
        Command::Schedule {
            frequency,
            source,
            now,
        } => {
            let options = ScheduleOptions {
                start_immediately: now,
                skip_resource_checks: false,
            };
            let job = build_scheduler(&config, &database)
                .schedule(&frequency, &source, options)
                .await?;
            println!(
                "Scheduled a {} import from the {} source; first run at {}",
                job.frequency,
                job.source,
                job.next_run_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            Ok(())
        }
        Command::Unschedule => {
            build_scheduler(&config, &database).unschedule().await?;
            println!("Recurring import unscheduled");
            Ok(())
        }
        Command::Status => {
            let snapshot = build_scheduler(&config, &database).get_info().await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
        Command::Validate => validate_saved_config(&config, &database).await,
        Command::Config { action } => match action {
            ConfigAction::Set { file } => {
                let contents = std::fs::read_to_string(&file)?;
                let import_config: ImportConfig = toml::from_str(&contents)?;
                database
                    .settings()
                    .set(keys::IMPORT_CONFIG, &import_config)
                    .await?;
                println!("Import configuration saved");
                Ok(())
            }
            ConfigAction::Show => {
                let saved: Option<ImportConfig> =
                    database.settings().get(keys::IMPORT_CONFIG).await?;
                match saved {
                    Some(import_config) => {
                        println!("{}", toml::to_string_pretty(&import_config)?)
                    }
                    None => println!("No import configuration has been saved"),
                }
                Ok(())
            }
        },
    }
}

async fn run_import(
    config: &Config,
    database: &Database,
    import_config_file: Option<PathBuf>,
) -> Result<()> {
    let provider: Arc<dyn ConfigProvider> = match import_config_file {
        Some(path) => {
            let contents = std::fs::read_to_string(&path)?;
            let import_config: ImportConfig = toml::from_str(&contents)?;
            Arc::new(StaticConfigProvider::new(import_config))
        }
        None => Arc::new(SettingsConfigProvider::new(database.settings())),
    };

    let runner = ImportRun::new(
        provider,
        Arc::new(CsvSource::new(&config.http)),
        Arc::new(database.content()),
        database.settings(),
        ImportStateManager::new(),
    );

    let report = runner.execute(RunTrigger::Manual).await;
    println!("{}", report.message);
    if !report.success {
        std::process::exit(1);
    }
    Ok(())
}

async fn validate_saved_config(config: &Config, database: &Database) -> Result<()> {
    let provider = SettingsConfigProvider::new(database.settings());
    let import_config = provider.import_config().await?;

    let validator = ConfigValidator::new(Arc::new(CsvSource::new(&config.http)));
    let report = validator.validate(&import_config).await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.valid {
        std::process::exit(1);
    }
    Ok(())
}

fn build_scheduler(config: &Config, database: &Database) -> SchedulerService {
    let state = ImportStateManager::new();
    let source = Arc::new(CsvSource::new(&config.http));
    let provider: Arc<dyn ConfigProvider> =
        Arc::new(SettingsConfigProvider::new(database.settings()));
    let platform: Arc<dyn TriggerPlatform> = Arc::new(TokioTriggerPlatform::new());
    let runner = Arc::new(ImportRun::new(
        provider.clone(),
        source.clone(),
        Arc::new(database.content()),
        database.settings(),
        state.clone(),
    ));

    SchedulerService::new(
        config.scheduler.clone(),
        database.settings(),
        platform,
        provider,
        source,
        runner,
        state,
    )
}
