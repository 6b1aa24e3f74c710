use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use aqi_core::{AqiPipeline, Config, ModelArtifact, OpenWeatherClient};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::{logging, routes};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "aqi", version, about = "City air quality index prediction")]
pub struct Cli {
    /// Path to the configuration file. Defaults to the platform config directory.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP prediction service.
    Serve {
        /// Listen address, overrides `[server] bind`.
        #[arg(long)]
        bind: Option<String>,
    },

    /// Predict the AQI for one city and print it.
    Predict {
        /// City name, e.g. "London".
        city: String,
    },

    /// Store the OpenWeather API key in the config file.
    Configure,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let config = Config::load(self.config.as_deref())?;

        match self.command {
            Command::Serve { bind } => {
                logging::init_logging(&config.logging);
                serve(config, bind).await
            }
            Command::Predict { city } => {
                logging::init_logging(&config.logging);
                let pipeline = build_pipeline(&config)?;
                let result = pipeline.predict_aqi(&city).await?;
                println!("{}: AQI {:.2} ({})", result.city, result.aqi, result.category());
                Ok(())
            }
            Command::Configure => configure(config, self.config),
        }
    }
}

/// Wire the OpenWeather client and the model artifact into a pipeline.
pub fn build_pipeline(config: &Config) -> anyhow::Result<AqiPipeline> {
    let api_key = config.api_key()?.to_owned();
    let client = Arc::new(OpenWeatherClient::new(api_key, &config.upstream)?);

    let model = ModelArtifact::load(&config.model.model_path, &config.model.columns_path)
        .context("Failed to load model artifact")?;

    Ok(AqiPipeline::new(client.clone(), client, Arc::new(model))
        .with_missing_policy(config.model.missing_values))
}

async fn serve(config: Config, bind: Option<String>) -> anyhow::Result<()> {
    let pipeline = build_pipeline(&config)?;
    let state = Arc::new(routes::AppState { pipeline });
    let app = routes::router(state, &config.server.allowed_origins)?;

    let bind = bind.unwrap_or(config.server.bind);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;

    info!(
        addr = %listener.local_addr()?,
        origins = ?config.server.allowed_origins,
        timeout_secs = config.upstream.timeout_secs,
        max_retries = config.upstream.max_retries,
        "AQI service listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("AQI service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}

fn configure(mut config: Config, path: Option<PathBuf>) -> anyhow::Result<()> {
    let api_key = inquire::Password::new("OpenWeather API key:")
        .without_confirmation()
        .with_display_mode(inquire::PasswordDisplayMode::Masked)
        .prompt()
        .context("Failed to read API key")?;

    let api_key = api_key.trim().to_string();
    if api_key.is_empty() {
        anyhow::bail!("API key must not be empty");
    }

    config.set_api_key(api_key);
    let saved = config.save(path.as_deref())?;
    println!("Saved configuration to {}", saved.display());

    Ok(())
}
