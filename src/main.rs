use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use meteofetch_core::{AppError, Config, ConfigError};
use meteofetch_store::SqliteObservationStore;
use meteofetch_sync::Scheduler;
use meteofetch_weather::{parse_timestamp, OpenMeteoClient, PayloadArchive, Resolution};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(
    name = "meteofetch",
    version,
    about = "Poll Open-Meteo observations into a local SQLite history"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// SQLite database path, overrides `store.path` from the config
    #[arg(long, value_name = "PATH", env = "METEOFETCH_DB")]
    db: Option<PathBuf>,

    /// Run one cycle per resolution and exit
    #[arg(long)]
    once: bool,

    /// POST newly raised alerts to this URL, overrides `alerts.webhook_url`
    #[arg(long, value_name = "URL", env = "ALERT_WEBHOOK_URL")]
    alert_webhook: Option<String>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Print stored alerts as JSON
    Alerts {
        /// Only this resolution (`hourly` or `minutely_15`)
        #[arg(long, value_parser = parse_resolution)]
        resolution: Option<Resolution>,
    },

    /// Export stored observations as JSON
    Export {
        #[arg(long, value_parser = parse_resolution, default_value = "hourly")]
        resolution: Resolution,

        /// Earliest timestamp to include
        #[arg(long, value_parser = parse_time)]
        since: Option<DateTime<Utc>>,

        /// Exclusive upper bound
        #[arg(long, value_parser = parse_time)]
        until: Option<DateTime<Utc>>,

        /// Write to this file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        out: Option<PathBuf>,
    },

    /// Print the most recent fetch log entries as JSON
    History {
        #[arg(long, value_parser = parse_resolution)]
        resolution: Option<Resolution>,

        /// Entries per resolution
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

fn parse_resolution(s: &str) -> Result<Resolution, String> {
    Resolution::parse(s).ok_or_else(|| format!("expected 'hourly' or 'minutely_15', got '{}'", s))
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, String> {
    parse_timestamp(s).map_err(|e| e.to_string())
}

fn resolutions(only: Option<Resolution>) -> Vec<Resolution> {
    only.map_or_else(|| Resolution::ALL.to_vec(), |r| vec![r])
}

/// Render a read-back command as pretty JSON.
fn render(command: &Command, store: &SqliteObservationStore) -> Result<String> {
    let json = match command {
        Command::Alerts { resolution } => {
            let mut alerts = Vec::new();
            for r in resolutions(*resolution) {
                alerts.extend(store.list_alerts(r)?);
            }
            serde_json::to_string_pretty(&alerts)?
        }
        Command::Export {
            resolution,
            since,
            until,
            ..
        } => {
            let records = store.list_range(
                *resolution,
                since.unwrap_or(DateTime::<Utc>::MIN_UTC),
                until.unwrap_or(DateTime::<Utc>::MAX_UTC),
            )?;
            serde_json::to_string_pretty(&records)?
        }
        Command::History { resolution, limit } => {
            let mut entries = Vec::new();
            for r in resolutions(*resolution) {
                entries.extend(store.recent_fetches(r, *limit)?);
            }
            serde_json::to_string_pretty(&entries)?
        }
    };
    Ok(json)
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(db) = &cli.db {
        config.store.path = db.to_string_lossy().into_owned();
    }
    if let Some(url) = &cli.alert_webhook {
        config.alerts.webhook_url = Some(url.clone());
    }
    let (config, _) = config.into_validated()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    meteofetch_core::init(if cli.verbose { "debug" } else { "info" })?;

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            let err = match e.downcast::<ConfigError>() {
                Ok(config_err) => AppError::Config(config_err),
                Err(other) => AppError::Other(other),
            };
            tracing::error!("{} ({})", err.user_message(), err);
            return Err(err.into());
        }
    };

    let store = match SqliteObservationStore::open(&config.store.path) {
        Ok(store) => store,
        Err(e) => {
            let err = AppError::from(e);
            tracing::error!("{} ({})", err.user_message(), err);
            return Err(err).with_context(|| format!("Failed to open {}", config.store.path));
        }
    };

    if let Some(command) = &cli.command {
        let json = render(command, &store)?;
        match command {
            Command::Export { out: Some(path), .. } => {
                std::fs::write(path, json)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                tracing::info!("Exported observations to {}", path.display());
            }
            _ => println!("{}", json),
        }
        return Ok(());
    }
    tracing::info!("Storing observations in {}", config.store.path);

    let archive = config.archive.enabled.then(|| {
        tracing::info!("Archiving raw payloads to {}", config.archive.dir);
        PayloadArchive::new(&config.archive.dir)
    });
    let client = OpenMeteoClient::new(&config.provider, archive)
        .context("Failed to build the Open-Meteo client")?;

    let cancel = CancellationToken::new();
    let scheduler =
        Scheduler::from_config(&config, Arc::new(client), Arc::new(store), cancel.clone());

    if cli.once {
        let report = scheduler.run_once().await;
        for cycle in &report.cycles {
            println!("{}", cycle);
        }
        let code = report.exit_code();
        if code != 0 {
            std::process::exit(code);
        }
        return Ok(());
    }

    tokio::spawn(async move {
        wait_for_shutdown().await;
        tracing::info!("Received shutdown signal");
        cancel.cancel();
    });

    tracing::info!(
        "meteofetch started for {} ({}, {})",
        config.provider.location_name,
        config.provider.latitude,
        config.provider.longitude
    );
    scheduler.run_until_cancelled().await;

    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use chrono::TimeZone;
    use clap::CommandFactory;
    use meteofetch_store::ObservationStore;
    use meteofetch_weather::{Alert, AlertKind, AlertOrigin};

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_once_and_db_flags() {
        let cli = Cli::parse_from(["meteofetch", "--once", "--db", "/tmp/wx.db", "-v"]);
        assert!(cli.once);
        assert!(cli.verbose);
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/wx.db")));
        assert!(cli.config.is_none());
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_alert_webhook_flag() {
        let cli = Cli::parse_from([
            "meteofetch",
            "--alert-webhook",
            "https://hooks.example.com/wx",
        ]);
        assert_eq!(cli.alert_webhook.as_deref(), Some("https://hooks.example.com/wx"));
    }

    #[test]
    fn test_export_subcommand() {
        let cli = Cli::parse_from([
            "meteofetch",
            "export",
            "--resolution",
            "minutely_15",
            "--since",
            "2024-03-10T00:00:00Z",
            "-o",
            "wx.json",
        ]);
        assert_eq!(
            cli.command,
            Some(Command::Export {
                resolution: Resolution::Subhourly,
                since: Some(Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap()),
                until: None,
                out: Some(PathBuf::from("wx.json")),
            })
        );
    }

    #[test]
    fn test_unknown_resolution_is_rejected() {
        assert!(Cli::try_parse_from(["meteofetch", "alerts", "--resolution", "daily"]).is_err());
    }

    #[test]
    fn test_render_alerts_and_history() {
        let store = SqliteObservationStore::in_memory().unwrap();
        let alert = Alert {
            resolution: Resolution::Hourly,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).unwrap(),
            kind: AlertKind::WindSpeed,
            value: 70.0,
            message: "Strong wind: 70.0 km/h".into(),
            origin: AlertOrigin::Historical,
        };
        store.upsert_alerts(&[alert]).unwrap();

        let json = render(&Command::Alerts { resolution: None }, &store).unwrap();
        let alerts: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(alerts.as_array().unwrap().len(), 1);
        assert_eq!(alerts[0]["kind"], "wind_speed");
        assert_eq!(alerts[0]["origin"], "historical");

        let history = Command::History {
            resolution: Some(Resolution::Hourly),
            limit: 5,
        };
        assert_eq!(render(&history, &store).unwrap(), "[]");
    }
}
