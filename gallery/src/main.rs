mod config;
mod logging;

use clap::{Parser, Subcommand};
use config::{Config, ConfigError, MetricsConfig};
use gallery_api::errors::ApiError;
use metrics_exporter_statsd::{StatsdBuilder, StatsdError};
use sentry::types::ParseDsnError;
use settings_store::backends::BackendError;
use settings_store::{SettingsStore, StoreError, get_backend};
use shared::metrics_defs::describe_all;
use std::path::PathBuf;
use tokio::sync::watch;

const METRICS_PREFIX: &str = "gallery";

#[derive(Parser)]
#[command(name = "gallery", about = "Image gallery settings service")]
struct Cli {
    /// Path to the YAML config file
    #[arg(long, short, default_value = "gallery.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Serve the settings API and the admin listener
    Api,
    /// Print the stored settings document of a project
    Show { project_id: String },
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid sentry dsn: {0}")]
    SentryDsn(#[from] ParseDsnError),
    #[error("could not build statsd exporter: {0}")]
    Metrics(#[from] StatsdError),
    #[error("a metrics recorder is already installed")]
    RecorderAlreadySet,
    #[error("config has no `api` section")]
    MissingApiConfig,
    #[error("runtime error: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("api error: {0}")]
    Api(#[from] ApiError),
    #[error("could not open settings backend: {0}")]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("could not serialize settings: {0}")]
    Json(#[from] serde_json::Error),
}

fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    let config = Config::from_file(&cli.config)?;

    let _sentry = logging::init(config.log_level(), config.sentry_dsn())?;

    if let Some(metrics_config) = &config.common.metrics {
        init_metrics(metrics_config)?;
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let result = rt.block_on(async move {
        match cli.command {
            CliCommand::Api => serve(config).await,
            CliCommand::Show { project_id } => show(config, &project_id).await,
        }
    });

    if let Err(e) = &result {
        tracing::error!(error = %e, "Exiting with error");
    }
    result
}

fn init_metrics(config: &MetricsConfig) -> Result<(), CliError> {
    let recorder = StatsdBuilder::from(config.statsd_host.clone(), config.statsd_port)
        .build(Some(METRICS_PREFIX))?;
    metrics::set_global_recorder(recorder).map_err(|_| CliError::RecorderAlreadySet)?;

    describe_all(settings_store::metrics_defs::ALL_METRICS);
    describe_all(gallery_api::metrics_defs::ALL_METRICS);

    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        "Sending metrics to statsd"
    );
    Ok(())
}

async fn serve(config: Config) -> Result<(), CliError> {
    let api_config = config.api.ok_or(CliError::MissingApiConfig)?;

    // The store lives for the duration of the server and is dropped with it
    let store = SettingsStore::new(get_backend(&config.settings_store.r#type)?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    tracing::info!(
        listener = %api_config.listener.address(),
        admin_listener = %api_config.admin_listener.address(),
        "Starting settings api"
    );
    gallery_api::run(api_config, store, shutdown_rx).await?;
    tracing::info!("Settings api stopped");

    Ok(())
}

async fn show(config: Config, project_id: &str) -> Result<(), CliError> {
    let store = SettingsStore::new(get_backend(&config.settings_store.r#type)?);
    let document = store.get(project_id).await?;
    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Could not listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Could not listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_commands() {
        let cli = Cli::try_parse_from(["gallery", "--config", "/etc/gallery.yaml", "api"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/gallery.yaml"));
        assert!(matches!(cli.command, CliCommand::Api));

        let cli = Cli::try_parse_from(["gallery", "show", "apple-branding"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("gallery.yaml"));
        assert!(matches!(
            cli.command,
            CliCommand::Show { project_id } if project_id == "apple-branding"
        ));

        assert!(Cli::try_parse_from(["gallery"]).is_err());
        assert!(Cli::try_parse_from(["gallery", "show"]).is_err());
    }

    #[tokio::test]
    async fn show_reads_configured_backend() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(get_backend(&settings_store::config::BackendType::Filesystem {
            base_dir: dir.path().to_path_buf(),
        }).unwrap());
        store
            .patch("sky-project", serde_json::json!({"imageId": "16.png"}))
            .await
            .unwrap();

        let config: Config = serde_yaml::from_str(&format!(
            "settings_store: {{type: filesystem, base_dir: {:?}}}",
            dir.path()
        ))
        .unwrap();
        show(config, "sky-project").await.unwrap();

        let config: Config = serde_yaml::from_str("settings_store: {type: memory}").unwrap();
        assert!(matches!(
            show(config, "../escape").await,
            Err(CliError::Store(StoreError::InvalidProjectId(_)))
        ));
    }

    #[tokio::test]
    async fn serve_requires_api_section() {
        let config: Config = serde_yaml::from_str("settings_store: {type: memory}").unwrap();
        assert!(matches!(serve(config).await, Err(CliError::MissingApiConfig)));
    }
}
