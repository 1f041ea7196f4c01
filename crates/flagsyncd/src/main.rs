// # flagsyncd - Flag Provider Daemon
//
// Thin integration layer over flagsync-core. All lifecycle logic lives in
// the core; the daemon only:
// 1. Reads configuration from environment variables
// 2. Initializes tracing and the runtime
// 3. Creates the provider and registers event handlers
// 4. Drives init and shutdown around the process signals
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// - `FLAGSYNC_API_KEY`: SDK key; only `localhost` is served by this daemon (default: localhost)
// - `FLAGSYNC_FLAG_FILE`: JSON flag file read in localhost mode (required)
// - `FLAGSYNC_READY_TIMEOUT_SECS`: Readiness bound, 1-300 (default: 10)
// - `FLAGSYNC_MONITOR_INTERVAL_SECS`: Change poll interval, 5-3600 (default: 30)
// - `FLAGSYNC_LOG_LEVEL`: trace, debug, info, warn, error (default: info)
//
// ## Example
//
// ```bash
// export FLAGSYNC_FLAG_FILE=/etc/flagsync/flags.json
// export FLAGSYNC_MONITOR_INTERVAL_SECS=10
//
// flagsyncd
// ```

use anyhow::Result;
use flagsync_core::{
    FlagProvider, HandlerRegistry, LocalhostClientFactory, LoggingHandler, OperationMode,
    ProviderConfig,
};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum FlagsyncExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<FlagsyncExitCode> for ExitCode {
    fn from(code: FlagsyncExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    api_key: String,
    flag_file: Option<PathBuf>,
    ready_timeout_secs: Option<u64>,
    monitor_interval_secs: Option<u64>,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Ok(Self {
            api_key: env::var("FLAGSYNC_API_KEY").unwrap_or_else(|_| "localhost".to_string()),
            flag_file: env::var("FLAGSYNC_FLAG_FILE").ok().map(PathBuf::from),
            ready_timeout_secs: parse_var("FLAGSYNC_READY_TIMEOUT_SECS")?,
            monitor_interval_secs: parse_var("FLAGSYNC_MONITOR_INTERVAL_SECS")?,
            log_level: env::var("FLAGSYNC_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.api_key != "localhost" {
            anyhow::bail!(
                "FLAGSYNC_API_KEY must be 'localhost'. \
                Remote flag clients are supplied by embedding flagsync-core with a custom ClientFactory."
            );
        }

        match &self.flag_file {
            None => anyhow::bail!(
                "FLAGSYNC_FLAG_FILE is required. \
                Set it via: export FLAGSYNC_FLAG_FILE=/etc/flagsync/flags.json"
            ),
            Some(path) if path.as_os_str().is_empty() => {
                anyhow::bail!("FLAGSYNC_FLAG_FILE cannot be empty")
            }
            Some(path) => {
                if let Some(parent) = path.parent()
                    && !parent.as_os_str().is_empty()
                    && !parent.exists()
                {
                    anyhow::bail!(
                        "FLAGSYNC_FLAG_FILE parent directory does not exist: {}",
                        parent.display()
                    );
                }
            }
        }

        if let Some(timeout) = self.ready_timeout_secs
            && !(1..=300).contains(&timeout)
        {
            anyhow::bail!(
                "FLAGSYNC_READY_TIMEOUT_SECS must be between 1 and 300 seconds. Got: {}",
                timeout
            );
        }

        if let Some(interval) = self.monitor_interval_secs
            && !(5..=3600).contains(&interval)
        {
            anyhow::bail!(
                "FLAGSYNC_MONITOR_INTERVAL_SECS must be between 5 and 3600 seconds. Got: {}",
                interval
            );
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "FLAGSYNC_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }

    /// Build the core provider configuration
    fn provider_config(&self) -> ProviderConfig {
        let mut config = ProviderConfig::new(&self.api_key);
        config.operation_mode = Some(OperationMode::Localhost);
        if let Some(path) = &self.flag_file {
            config = config.with_flag_file(path);
        }
        if let Some(timeout) = self.ready_timeout_secs {
            config = config.with_ready_timeout_secs(timeout);
        }
        if let Some(interval) = self.monitor_interval_secs {
            config = config.with_monitor_interval_secs(interval);
        }
        config
    }
}

/// Parse an optional numeric environment variable
fn parse_var(name: &str) -> Result<Option<u64>> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} must be a positive integer. Got '{}': {}", name, value, e)),
        Err(_) => Ok(None),
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return FlagsyncExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return FlagsyncExitCode::ConfigError.into();
    }

    // Initialize tracing
    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return FlagsyncExitCode::ConfigError.into();
    }

    info!("Starting flagsyncd daemon");

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return FlagsyncExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(config).await {
            error!("Daemon error: {}", e);
            FlagsyncExitCode::RuntimeError
        } else {
            FlagsyncExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Run the daemon until a shutdown signal arrives
async fn run_daemon(config: Config) -> Result<()> {
    let provider = FlagProvider::new(config.provider_config(), &LocalhostClientFactory)?;

    let registry = Arc::new(HandlerRegistry::new());
    registry.register_all(Arc::new(LoggingHandler));
    let dispatcher = registry.dispatch(provider.subscribe());

    if let Err(e) = provider.init_default().await {
        error!(error = %e, "Provider initialization failed");
        if let Err(e) = provider.shutdown_default().await {
            warn!(error = %e, "Shutdown after failed initialization did not complete");
        }
        return Err(e.into());
    }

    let health = serde_json::to_string(&provider.health())?;
    info!(health = %health, "Daemon initialized successfully");

    let signal = wait_for_shutdown().await?;
    info!("Received shutdown signal: {}", signal);

    let shutdown = provider.shutdown_default().await;

    // The dispatcher exits once shutdown has closed the event bus
    match dispatcher.await {
        Ok(dispatched) => info!(events = dispatched, "Event dispatcher stopped"),
        Err(e) => warn!(error = %e, "Event dispatcher failed"),
    }

    shutdown?;
    info!("Daemon shut down");
    Ok(())
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// # Returns
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    let signal = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    Ok(signal)
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
