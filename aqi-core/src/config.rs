use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
};

use crate::features::MissingPolicy;

/// Environment variable that overrides `[openweather] api_key`.
pub const API_KEY_ENV: &str = "OPENWEATHER_API_KEY";

/// Credentials for the OpenWeather APIs (geocoding and air pollution).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenWeatherConfig {
    pub api_key: Option<String>,
}

/// Outbound call settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub geocode_url: String,
    pub air_pollution_url: String,
    /// Deadline for each outbound request, in seconds.
    pub timeout_secs: u64,
    /// Extra attempts after a transport failure or 5xx. Zero means one attempt.
    pub max_retries: u32,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            geocode_url: "http://api.openweathermap.org/geo/1.0/direct".to_string(),
            air_pollution_url: "http://api.openweathermap.org/data/2.5/air_pollution".to_string(),
            timeout_secs: 10,
            max_retries: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub model_path: PathBuf,
    pub columns_path: PathBuf,
    pub missing_values: MissingPolicy,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("aqi_model.json"),
            columns_path: PathBuf::from("aqi_columns.json"),
            missing_values: MissingPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Origins allowed to call the API from a browser.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
            allowed_origins: vec!["http://localhost:5173".to_string()],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// When set, JSON logs are also written here with daily rotation.
    pub directory: Option<PathBuf>,
}

/// Top-level configuration stored on disk.
///
/// Example TOML:
/// ```toml
/// [openweather]
/// api_key = "..."
///
/// [model]
/// missing_values = "reject"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub openweather: OpenWeatherConfig,
    pub upstream: UpstreamConfig,
    pub model: ModelConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load config from `path` (or the default location), then apply env overrides.
    ///
    /// A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_file_path()?,
        };

        let mut cfg = Self::load_file(&path)?;
        if let Ok(key) = env::var(API_KEY_ENV) {
            cfg.apply_api_key_override(Some(key));
        }

        Ok(cfg)
    }

    fn load_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            // First run: no config file, use defaults.
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        cfg.validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.upstream.timeout_secs == 0 {
            return Err(anyhow!("[upstream] timeout_secs must be at least 1"));
        }

        Ok(())
    }

    fn apply_api_key_override(&mut self, key: Option<String>) {
        if let Some(key) = key.filter(|k| !k.trim().is_empty()) {
            self.openweather.api_key = Some(key);
        }
    }

    /// Save config to `path` (or the default location), creating parent directories as needed.
    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_file_path()?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(&path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(path)
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "aqi-predict", "aqi")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    pub fn set_api_key(&mut self, api_key: String) {
        self.openweather.api_key = Some(api_key);
    }

    /// The OpenWeather credential, required before any outbound call.
    pub fn api_key(&self) -> Result<&str> {
        self.openweather
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                anyhow!(
                    "No OpenWeather API key configured.\n\
                     Hint: set {API_KEY_ENV} or run `aqi configure` and enter your API key."
                )
            })
    }
}
