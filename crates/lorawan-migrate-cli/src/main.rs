//! lorawan-migrate CLI - move LoRaWAN devices between backends.

use clap::{Parser, Subcommand, ValueEnum};
use lorawan_migrate::backend::{self, BackendClient};
use lorawan_migrate::scheduler::new_run_id;
use lorawan_migrate::{
    BackendConfig, BackendError, BatchScheduler, Config, DevEui, DiscoverySweep, MigrateError,
    MigrationOptions, Migrator, RecordStore, SqliteStore,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "lorawan-migrate")]
#[command(about = "Move LoRaWAN devices and credentials between device-management backends")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Test connections to the source and target backends
    HealthCheck,

    /// Copy every device on the source backend into the record store
    Discover,

    /// Migrate devices from the record store to the target backend
    Migrate {
        /// Device to migrate (repeatable)
        #[arg(long = "dev-eui", value_name = "EUI")]
        dev_euis: Vec<DevEui>,

        /// Migrate every device in the record store
        #[arg(long, conflicts_with = "dev_euis", required_unless_present = "dev_euis")]
        all: bool,

        /// Override migration.batch_size
        #[arg(long)]
        batch_size: Option<usize>,

        /// Override migration.batch_pause_ms
        #[arg(long)]
        pause_ms: Option<u64>,
    },

    /// Show migration history, newest first
    History {
        /// Only show attempts for this device
        #[arg(long = "dev-eui", value_name = "EUI")]
        dev_eui: Option<DevEui>,
    },

    /// Delete a device from a backend
    Delete {
        /// Device to delete
        #[arg(long = "dev-eui", value_name = "EUI")]
        dev_eui: DevEui,

        /// Backend to delete from
        #[arg(long, value_enum, default_value_t = Side::Target)]
        from: Side,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Side {
    Source,
    Target,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::HealthCheck => health_check(&config, cli.output_json).await,

        Commands::Discover => {
            let store = open_store(&config).await?;
            let source = backend::connect(&config.source)?;
            let sweep = DiscoverySweep::new(
                source,
                store,
                config.source.tenant_id.clone(),
                config.discovery.concurrency,
            );
            let result = sweep.run().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("\nDiscovery completed!");
                println!("  Applications: {}", result.applications);
                println!("  Devices: {}/{} synced", result.synced, result.total);
                println!("  Unknown keys: {}", result.unknown_keys);
                println!("  Sessions: {}", result.sessions);
                println!("  Profiles: {}", result.profiles);
                print_errors(&result.errors);
            }
            Ok(())
        }

        Commands::Migrate {
            dev_euis,
            all,
            batch_size,
            pause_ms,
        } => {
            if let Some(size) = batch_size {
                config.migration.batch_size = size;
            }
            if let Some(ms) = pause_ms {
                config.migration.batch_pause_ms = ms;
            }
            config.validate()?;

            let store = open_store(&config).await?;
            let dev_euis = if all {
                store
                    .get_all_devices()
                    .await?
                    .into_iter()
                    .map(|d| d.device.dev_eui)
                    .collect()
            } else {
                dev_euis
            };

            let target = backend::connect(&config.target)?;
            let options = MigrationOptions {
                run_id: Some(new_run_id()),
                ..MigrationOptions::from_config(&config)
            };
            let migrator = Migrator::new(
                store,
                target,
                config.source.name.clone(),
                config.source.console().to_string(),
                options,
            );
            let scheduler = BatchScheduler::from_config(Arc::new(migrator), &config.migration);

            let cancel_token = setup_signal_handler();
            let result = scheduler.run(dev_euis, cancel_token).await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("\nMigration finished!");
                println!("  Run ID: {}", result.run_id);
                println!("  Devices: {}", result.total);
                println!(
                    "  Successful: {} ({} need manual key entry)",
                    result.successful,
                    result.requires_manual_steps()
                );
                println!("  Failed: {}", result.failed);
                if result.skipped > 0 {
                    println!("  Skipped: {}", result.skipped);
                }
                print_errors(&result.errors);
            }

            if result.cancelled {
                return Err(MigrateError::Cancelled);
            }
            Ok(())
        }

        Commands::History { dev_eui } => {
            let store = open_store(&config).await?;
            let history = store.get_migration_history(dev_eui.as_ref()).await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&history)?);
            } else if history.is_empty() {
                println!("No migration attempts recorded.");
            } else {
                for record in &history {
                    println!(
                        "{:>6}  {}  {}  {} -> {}  {}",
                        record.id,
                        record.started_at.format("%Y-%m-%d %H:%M:%S"),
                        record.dev_eui,
                        record.source_backend,
                        record.target_backend,
                        record.status
                    );
                    if let Some(ref err) = record.error {
                        println!("        {}", err);
                    }
                }
            }
            Ok(())
        }

        Commands::Delete { dev_eui, from } => {
            let backend_config = match from {
                Side::Source => &config.source,
                Side::Target => &config.target,
            };
            let client = backend::connect(backend_config)?;
            client
                .delete(&dev_eui)
                .await
                .map_err(|e| MigrateError::backend(client.name(), e))?;

            if cli.output_json {
                println!(
                    "{}",
                    serde_json::json!({ "deleted": dev_eui, "backend": client.name() })
                );
            } else {
                println!("Deleted {} from '{}'", dev_eui, client.name());
            }
            Ok(())
        }
    }
}

async fn open_store(config: &Config) -> Result<Arc<dyn RecordStore>, MigrateError> {
    let store = SqliteStore::open(&config.store.path).await?;
    Ok(Arc::new(store))
}

async fn health_check(config: &Config, output_json: bool) -> Result<(), MigrateError> {
    let source = backend::connect(&config.source)?;
    let target = backend::connect(&config.target)?;
    let (source_result, target_result) =
        tokio::join!(source.test_connection(), target.test_connection());

    if output_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "healthy": source_result.ok && target_result.ok,
                "source": source_result,
                "target": target_result,
            }))?
        );
    } else {
        println!("Health Check Results:");
        for (role, cfg, result) in [
            ("Source", &config.source, &source_result),
            ("Target", &config.target, &target_result),
        ] {
            println!(
                "  {} ({}, {}): {} ({}ms)",
                role,
                cfg.name,
                cfg.variant,
                if result.ok { "OK" } else { "FAILED" },
                result.latency_ms
            );
            if let Some(ref detail) = result.detail {
                println!("    {}", detail);
            }
            if let Some(ref err) = result.error {
                println!("    Error: {}", err);
            }
        }
    }

    for (cfg, result) in [(&config.source, source_result), (&config.target, target_result)] {
        if !result.ok {
            return Err(unhealthy(cfg, result.error));
        }
    }
    Ok(())
}

fn unhealthy(config: &BackendConfig, error: Option<String>) -> MigrateError {
    MigrateError::backend(
        &config.name,
        BackendError::Transport(error.unwrap_or_else(|| "health check failed".to_string())),
    )
}

fn print_errors(errors: &[lorawan_migrate::ItemError]) {
    if errors.is_empty() {
        return;
    }
    println!("  Errors:");
    for err in errors {
        match (&err.dev_eui, &err.application_id) {
            (Some(eui), _) => println!("    {}: {}", eui, err.error),
            (None, Some(app)) => println!("    application {}: {}", app, err.error),
            (None, None) => println!("    {}", err.error),
        }
    }
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so --output-json keeps stdout parseable.
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Cancel the returned token on SIGINT or SIGTERM.
///
/// The batch scheduler checks it between chunks.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, label) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        match signal(kind) {
            Ok(mut stream) => {
                tokio::spawn(async move {
                    stream.recv().await;
                    eprintln!(
                        "\nReceived {}. Finishing the current chunk, then stopping...",
                        label
                    );
                    token.cancel();
                });
            }
            Err(e) => warn!("Failed to install {} handler: {}", label, e),
        }
    }

    cancel_token
}

#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Finishing the current chunk, then stopping...");
            token.cancel();
        }
    });

    cancel_token
}
