//! Turbidity Gateway binary
//!
//! Serves the latest sensor reading, lifespan predictions and Gemini analyses
//! over HTTP.

use anyhow::Context;
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use turbidity_gateway::{
    analysis::gemini::{DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL},
    analysis::predictor::round2,
    sensor::serial::default_port,
    start_serial_reader, start_web_server, AppState, GeminiClient, GeminiConfig,
    InsightGenerator, LifespanPredictor, ProcessParameters, ReadingStore, SerialConfig,
    WebConfig, DEFAULT_BAUD_RATE, DEFAULT_SERIAL_TIMEOUT_MS, DEFAULT_WEB_PORT,
};

#[derive(Parser)]
#[command(name = "turbidity_gateway")]
#[command(about = "Turbidity telemetry gateway")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(
    long_about = "Serves serial turbidity readings over HTTP, predicts filter lifespan and requests Gemini analyses"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Web server bind address
    #[arg(long, env = "GATEWAY_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Web server port
    #[arg(short, long, env = "GATEWAY_PORT", default_value_t = DEFAULT_WEB_PORT)]
    port: u16,

    /// Serial port the sensor is attached to
    #[arg(long, env = "SERIAL_PORT", default_value = default_port())]
    serial_port: String,

    /// Serial baud rate
    #[arg(long, env = "SERIAL_BAUD", default_value_t = DEFAULT_BAUD_RATE)]
    baud_rate: u32,

    /// Timeout for a single serial read in milliseconds
    #[arg(long, env = "SERIAL_TIMEOUT_MS", default_value_t = DEFAULT_SERIAL_TIMEOUT_MS)]
    serial_timeout_ms: u64,

    /// Serial reading switch ("0" disables it)
    #[arg(
        long,
        env = "ENABLE_SERIAL",
        default_value = "1",
        value_parser = BoolishValueParser::new(),
        action = ArgAction::Set,
        hide = true
    )]
    enable_serial: bool,

    /// Disable serial reading (useful without a sensor attached)
    #[arg(long)]
    no_serial: bool,

    /// Gemini API key
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    gemini_api_key: Option<String>,

    /// Gemini model name
    #[arg(long, env = "GEMINI_MODEL", default_value = DEFAULT_GEMINI_MODEL)]
    gemini_model: String,

    /// Gemini API base URL
    #[arg(long, env = "GEMINI_BASE_URL", default_value = DEFAULT_GEMINI_BASE_URL)]
    gemini_base_url: String,

    /// Allowed CORS origin (repeatable, or comma separated)
    #[arg(long = "allowed-origin", env = "ALLOWED_ORIGINS", value_delimiter = ',')]
    allowed_origins: Vec<String>,

    /// Lifespan regression model artifact (JSON)
    #[arg(long, env = "LIFESPAN_MODEL", requires = "scaler_path")]
    model_path: Option<PathBuf>,

    /// Input scaler artifact matching the model (JSON)
    #[arg(long, env = "LIFESPAN_SCALER", requires = "model_path")]
    scaler_path: Option<PathBuf>,

    #[command(flatten)]
    process: ProcessArgs,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Args)]
struct ProcessArgs {
    /// Total dissolved solids (ppm) fed to the lifespan model
    #[arg(long, default_value_t = ProcessParameters::default().tds)]
    tds: f64,

    /// Feed water pH fed to the lifespan model
    #[arg(long, default_value_t = ProcessParameters::default().ph)]
    ph: f64,

    /// Equipment depth (m) fed to the lifespan model
    #[arg(long, default_value_t = ProcessParameters::default().depth)]
    depth: f64,

    /// Flow rate (L/min) fed to the lifespan model
    #[arg(long, default_value_t = ProcessParameters::default().flow_rate)]
    flow_rate: f64,
}

impl ProcessArgs {
    fn params(&self) -> ProcessParameters {
        ProcessParameters {
            tds: self.tds,
            ph: self.ph,
            depth: self.depth,
            flow_rate: self.flow_rate,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway (default)
    Serve(ServeArgs),

    /// Run one lifespan prediction and exit
    Predict(PredictArgs),

    /// Show the resolved configuration
    Info,
}

#[derive(Args, Default)]
struct ServeArgs {
    /// Disable CORS headers
    #[arg(long)]
    no_cors: bool,

    /// Allow any CORS origin
    #[arg(long, conflicts_with = "no_cors")]
    cors_any: bool,
}

#[derive(Args)]
struct PredictArgs {
    /// Turbidity value (NTU)
    #[arg(short, long, allow_negative_numbers = true)]
    turbidity: f64,

    /// Output format: json or pretty
    #[arg(short, long, default_value = "pretty")]
    format: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing/logging
    init_logging(&cli)?;

    match &cli.command {
        Some(Commands::Serve(args)) => {
            serve_command(&cli, args).await?;
        }
        Some(Commands::Predict(args)) => {
            predict_command(&cli, args)?;
        }
        Some(Commands::Info) => {
            info_command(&cli);
        }
        None => {
            // Default to serve command
            serve_command(&cli, &ServeArgs::default()).await?;
        }
    }

    Ok(())
}

fn init_logging(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_default();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(log_filter(log_level(cli), &directives))
        .with_target(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

fn log_level(cli: &Cli) -> LevelFilter {
    if cli.debug {
        LevelFilter::DEBUG
    } else if cli.verbose {
        LevelFilter::INFO
    } else {
        LevelFilter::WARN
    }
}

/// `RUST_LOG` directives refine the level picked by `-v`/`-d`.
fn log_filter(level: LevelFilter, directives: &str) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level.into())
        .parse_lossy(directives)
}

fn serial_config(cli: &Cli) -> SerialConfig {
    SerialConfig::new(&cli.serial_port, cli.baud_rate)
        .with_timeout_ms(cli.serial_timeout_ms)
        .with_enabled(cli.enable_serial && !cli.no_serial)
}

fn gemini_config(cli: &Cli) -> GeminiConfig {
    GeminiConfig::default()
        .with_api_key(cli.gemini_api_key.clone())
        .with_model(&cli.gemini_model)
        .with_base_url(&cli.gemini_base_url)
}

fn load_predictor(cli: &Cli) -> anyhow::Result<Option<LifespanPredictor>> {
    let (Some(model_path), Some(scaler_path)) = (&cli.model_path, &cli.scaler_path) else {
        return Ok(None);
    };

    let predictor = LifespanPredictor::load(model_path, scaler_path, cli.process.params())
        .with_context(|| {
            format!(
                "loading lifespan model {} with scaler {}",
                model_path.display(),
                scaler_path.display()
            )
        })?;

    info!("Loaded lifespan model from {}", model_path.display());
    Ok(Some(predictor))
}

async fn serve_command(cli: &Cli, args: &ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting turbidity gateway...");

    let store = Arc::new(ReadingStore::new());
    let cancel = CancellationToken::new();

    let predictor = load_predictor(cli)?.map(Arc::new);
    if predictor.is_none() {
        warn!("No lifespan model configured, predictions are unavailable");
    }

    let serial = serial_config(cli);
    let reader = match start_serial_reader(&serial, store.clone(), cancel.clone()) {
        Ok(reader) => reader,
        Err(e) => {
            error!("Failed to open serial port: {}", e);
            None
        }
    };

    let gemini = gemini_config(cli);
    if gemini.api_key.is_none() {
        warn!("GEMINI_API_KEY is not set, analyses will return the fallback message");
    }
    let insights = InsightGenerator::new(
        Arc::new(GeminiClient::new(gemini)),
        predictor.clone(),
        cli.process.params(),
    );

    let state = AppState::new(store, predictor, Arc::new(insights))
        .with_serial_enabled(serial.enabled);

    let web_config = WebConfig::new(&cli.host, cli.port)
        .with_cors(!args.no_cors)
        .with_any_origin(args.cors_any)
        .with_allowed_origins(cli.allowed_origins.clone());

    info!("Gateway configuration:");
    info!("  - Bind address: {}", web_config.bind_address());
    info!("  - CORS enabled: {}", web_config.enable_cors);
    info!(
        "  - Serial: {} @ {} baud (enabled: {})",
        serial.port, serial.baud_rate, serial.enabled
    );

    let shutdown_token = cancel.clone();
    let shutdown = async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
            _ = shutdown_token.cancelled() => {}
        }
        shutdown_token.cancel();
    };

    let served = start_web_server(web_config, state, shutdown).await;
    cancel.cancel();

    if let Some(reader) = reader {
        tokio::task::spawn_blocking(move || reader.shutdown()).await?;
        info!("Serial reader stopped");
    }

    served?;
    Ok(())
}

fn predict_command(cli: &Cli, args: &PredictArgs) -> Result<(), Box<dyn std::error::Error>> {
    let predictor = load_predictor(cli)?
        .context("--model-path and --scaler-path are required for predict")?;
    let hours = round2(predictor.predict(args.turbidity)?);

    match args.format.as_str() {
        "json" => {
            let json = serde_json::json!({ "predicted_life_hours": hours });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        "pretty" => {
            println!("Turbidity: {} NTU", args.turbidity);
            println!("Predicted filter life: {:.2} hours", hours);
        }
        _ => {
            error!("Unsupported format: {}. Use 'json' or 'pretty'", args.format);
            std::process::exit(1);
        }
    }

    Ok(())
}

fn info_command(cli: &Cli) {
    let serial = serial_config(cli);
    let gemini = gemini_config(cli);
    let params = cli.process.params();

    println!("Turbidity Gateway {}", env!("CARGO_PKG_VERSION"));
    println!("==========================");
    println!();
    println!("Web:");
    println!("  Bind address: {}:{}", cli.host, cli.port);
    if cli.allowed_origins.is_empty() {
        println!("  Allowed origins: defaults");
    } else {
        println!("  Allowed origins: {}", cli.allowed_origins.join(", "));
    }
    println!();
    println!("Serial:");
    println!("  Port: {}", serial.port);
    println!("  Baud rate: {}", serial.baud_rate);
    println!("  Read timeout: {} ms", serial.timeout_ms);
    println!("  Enabled: {}", serial.enabled);
    println!();
    println!("Gemini:");
    println!("  Endpoint: {}", gemini.endpoint());
    println!(
        "  API key: {}",
        if gemini.api_key.is_some() { "set" } else { "not set" }
    );
    println!();
    println!("Lifespan model:");
    match (&cli.model_path, &cli.scaler_path) {
        (Some(model), Some(scaler)) => {
            println!("  Model: {}", model.display());
            println!("  Scaler: {}", scaler.display());
        }
        _ => println!("  Not configured"),
    }
    println!(
        "  Parameters: TDS {} ppm, pH {}, depth {} m, flow {} L/min",
        params.tds, params.ph, params.depth, params.flow_rate
    );
}
