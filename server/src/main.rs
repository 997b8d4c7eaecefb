use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use config::{Config, Environment, File as ConfigFile};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use pricing_api::{start_server, ApiConfig, AppState};
use pricing_service::{
    BootstrapOutcome, DataConfig, PredictionConfig, PricingService, ServiceConfig,
    UnseenCategoryPolicy,
};
use pricing_trainer::ForestParams;
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_CONFIG_PATH: &str = "config/pricing.toml";
const ENV_PREFIX: &str = "PRICING";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
struct ServerConfig {
    host: String,
    port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
struct AppConfig {
    server: ServerConfig,
    api: ApiConfig,
    data: DataConfig,
    forest: ForestParams,
    prediction: PredictionConfig,

    // Logging
    log_level: String,
    log_format: String,

    // Observability
    metrics_enabled: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            api: ApiConfig::default(),
            data: DataConfig::default(),
            forest: ForestParams::default(),
            prediction: PredictionConfig::default(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
        }
    }
}

impl AppConfig {
    /// Layer the optional config file under `PRICING_*` environment variables
    fn load(config_path_override: Option<&str>) -> Result<Self> {
        let resolved_path = match config_path_override {
            Some(path) => {
                let path = PathBuf::from(path);
                if !path.exists() {
                    anyhow::bail!(
                        "Configuration file {} not found (specified via --config)",
                        path.display()
                    );
                }
                Some(path)
            }
            None => Some(PathBuf::from(DEFAULT_CONFIG_PATH)).filter(|path| path.exists()),
        };

        let mut builder = Config::builder();
        if let Some(path) = &resolved_path {
            builder = builder.add_source(ConfigFile::from(path.as_path()));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .context("failed to read pricing configuration")?
            .try_deserialize::<AppConfig>()
            .context("invalid pricing configuration")?;
        Ok(config)
    }

    fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            data: self.data.clone(),
            forest: self.forest.clone(),
            prediction: self.prediction.clone(),
        }
    }

    fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            anyhow::bail!("server.host must not be empty");
        }
        if self.api.max_upload_bytes == 0 {
            anyhow::bail!("api.max_upload_bytes must be positive");
        }
        if !matches!(self.log_format.as_str(), "pretty" | "json") {
            anyhow::bail!(
                "log_format must be 'pretty' or 'json', got '{}'",
                self.log_format
            );
        }
        self.service_config().validate()?;
        Ok(())
    }
}

fn cli() -> Command {
    Command::new("pricing-server")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Dynamic pricing HTTP server")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path"),
        )
        .arg(
            Arg::new("host")
                .long("host")
                .value_name("HOST")
                .help("Address to bind the HTTP server to"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .value_parser(value_parser!(u16))
                .help("Port to bind the HTTP server to"),
        )
        .arg(
            Arg::new("dataset")
                .long("dataset")
                .value_name("FILE")
                .help("Training dataset CSV"),
        )
        .arg(
            Arg::new("model-dir")
                .long("model-dir")
                .value_name("DIR")
                .help("Directory holding the model and encoder files"),
        )
        .arg(
            Arg::new("unseen-policy")
                .long("unseen-policy")
                .value_name("POLICY")
                .help("Handling of unseen categorical values: flag or reject"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("Log format: pretty or json"),
        )
        .arg(
            Arg::new("no-metrics")
                .long("no-metrics")
                .action(ArgAction::SetTrue)
                .help("Disable the Prometheus exporter"),
        )
}

fn load_config_with_overrides(matches: &ArgMatches) -> Result<AppConfig> {
    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let mut config = AppConfig::load(config_path)?;
    apply_overrides(matches, &mut config)?;
    config.validate()?;
    Ok(config)
}

fn apply_overrides(matches: &ArgMatches, config: &mut AppConfig) -> Result<()> {
    if let Some(host) = matches.get_one::<String>("host") {
        config.server.host = host.clone();
    }

    if let Some(port) = matches.get_one::<u16>("port") {
        config.server.port = *port;
    }

    if let Some(dataset) = matches.get_one::<String>("dataset") {
        config.data.dataset_path = PathBuf::from(dataset);
    }

    if let Some(model_dir) = matches.get_one::<String>("model-dir") {
        config.data.model_dir = PathBuf::from(model_dir);
    }

    if let Some(policy) = matches.get_one::<String>("unseen-policy") {
        config.prediction.unseen_category_policy = policy
            .parse::<UnseenCategoryPolicy>()
            .map_err(anyhow::Error::msg)?;
    }

    if let Some(log_level) = matches.get_one::<String>("log-level") {
        config.log_level = log_level.clone();
    }

    if let Some(log_format) = matches.get_one::<String>("log-format") {
        config.log_format = log_format.clone();
    }

    if matches.get_flag("no-metrics") {
        config.metrics_enabled = false;
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    let config = load_config_with_overrides(&matches)?;

    init_logging(&config)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        dataset = %config.data.dataset_path.display(),
        model_dir = %config.data.model_dir.display(),
        unseen_policy = %config.prediction.unseen_category_policy,
        "Starting pricing server"
    );

    let prometheus = init_metrics(&config);

    let service = Arc::new(
        PricingService::new(config.service_config()).context("failed to create pricing service")?,
    );

    let bootstrap = {
        let service = service.clone();
        tokio::task::spawn_blocking(move || service.bootstrap())
            .await
            .context("model bootstrap task panicked")?
            .context("model bootstrap failed")?
    };
    match bootstrap {
        BootstrapOutcome::Loaded { generation } => info!(%generation, "Serving persisted model"),
        BootstrapOutcome::Trained { generation } => info!(%generation, "Serving freshly trained model"),
        BootstrapOutcome::NoModel => {
            warn!("No model available; /predict returns 503 until data is uploaded or /train runs")
        }
    }

    let mut state = AppState::new(service, &config.api);
    if let Some(handle) = prometheus {
        state = state.with_prometheus(handle);
    }

    start_server(state, &config.api, &config.listen_addr(), shutdown_signal()).await?;
    info!("Pricing server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(err) => warn!("Failed to listen for shutdown signal: {}", err),
    }
}

fn init_metrics(config: &AppConfig) -> Option<PrometheusHandle> {
    if !config.metrics_enabled {
        info!("Prometheus metrics exporter disabled via configuration");
        return None;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            info!("Prometheus metrics exporter registered");
            describe_counter!("pricing_predictions_total", "Successful price predictions");
            describe_counter!(
                "pricing_prediction_errors_total",
                "Prediction requests rejected by the model or input checks"
            );
            describe_counter!(
                "pricing_unseen_category_total",
                "Predictions that named a category value unknown to the encoders"
            );
            describe_counter!("pricing_retrains_total", "Completed model retrains");
            describe_gauge!(
                "pricing_model_r2",
                "Held-out R² score of the serving model"
            );
            Some(handle)
        }
        Err(err) => {
            warn!("Failed to install Prometheus metrics exporter: {}", err);
            None
        }
    }
}

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()?;
    }

    Ok(())
}
