use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const TELEGRAM_TOKEN_VAR: &str = "TELEGRAM_API_KEY";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub browser: BrowserSettings,
    #[serde(default)]
    pub http: HttpSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// Origin every manga and chapter reference must be rooted at
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Display name used in user-facing messages
    #[serde(default = "default_source_name")]
    pub name: String,

    /// Upper bound for a single adapter call, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Path the source redirects to for unknown references
    #[serde(default = "default_not_found_path")]
    pub not_found_path: String,

    /// Maximum number of search candidates offered to the user (0 = all)
    #[serde(default)]
    pub max_candidates: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrowserSettings {
    #[serde(default = "default_true")]
    pub headless: bool,

    #[serde(default = "default_window_side")]
    pub window_width: u32,

    #[serde(default = "default_window_side")]
    pub window_height: u32,

    /// Disable image loading in the browser (image URLs are still extracted)
    #[serde(default = "default_true")]
    pub disable_images: bool,

    #[serde(default)]
    pub user_agent: Option<String>,

    /// Timeout for navigation and element waits, in seconds
    #[serde(default = "default_navigation_timeout")]
    pub navigation_timeout_secs: u64,

    /// How long the browser connection may stay idle before Chrome is dropped
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Additional Chrome flags
    #[serde(default)]
    pub chrome_flags: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpSettings {
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    #[serde(default = "default_initial_retry_delay")]
    pub initial_retry_delay_ms: u64,

    #[serde(default = "default_max_retry_delay")]
    pub max_retry_delay_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),

    #[error("invalid configuration: {0}")]
    Invalid(#[from] toml::de::Error),
}

fn default_true() -> bool { true }
fn default_database_path() -> String { "manga.db".to_string() }
fn default_base_url() -> String { "https://weebcentral.com".to_string() }
fn default_source_name() -> String { "WeebCentral".to_string() }
fn default_request_timeout() -> u64 { 90 }
fn default_not_found_path() -> String { "/404".to_string() }
fn default_window_side() -> u32 { 400 }
fn default_navigation_timeout() -> u64 { 30 }
fn default_idle_timeout() -> u64 { 3600 }
fn default_http_timeout() -> u64 { 30 }
fn default_max_retries() -> usize { 3 }
fn default_initial_retry_delay() -> u64 { 500 }
fn default_max_retry_delay() -> u64 { 8000 }

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            name: default_source_name(),
            request_timeout_secs: default_request_timeout(),
            not_found_path: default_not_found_path(),
            max_candidates: 0,
        }
    }
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: default_window_side(),
            window_height: default_window_side(),
            disable_images: true,
            user_agent: None,
            navigation_timeout_secs: default_navigation_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            chrome_flags: Vec::new(),
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout(),
            max_retries: default_max_retries(),
            initial_retry_delay_ms: default_initial_retry_delay(),
            max_retry_delay_ms: default_max_retry_delay(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            source: SourceConfig::default(),
            browser: BrowserSettings::default(),
            http: HttpSettings::default(),
        }
    }
}

impl Config {
    /// Load `config.toml` from the working directory, falling back to defaults.
    pub fn load() -> Self {
        Self::load_from(Path::new("config.toml"))
    }

    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            log::info!("No {} found, using default configuration", path.display());
            return Self::default();
        }
        match fs::read_to_string(path) {
            Ok(content) => match Self::from_toml_str(&content) {
                Ok(cfg) => cfg,
                Err(e) => {
                    log::warn!("Ignoring invalid {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                log::warn!("Could not read {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str::<Config>(content)?)
    }

    /// Bot token from the environment, reading `.env` first when present.
    pub fn telegram_token() -> Result<String, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            log::debug!("No .env loaded: {}", e);
        }
        match std::env::var(TELEGRAM_TOKEN_VAR) {
            Ok(token) if !token.trim().is_empty() => Ok(token),
            _ => Err(ConfigError::MissingEnv(TELEGRAM_TOKEN_VAR)),
        }
    }
}

impl SourceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl HttpSettings {
    /// Build the image download client from these settings
    pub fn create_http_client(&self) -> Result<crate::http_client::EnhancedHttpClient, reqwest::Error> {
        use crate::http_client::{EnhancedHttpClient, HttpClientConfig};

        let config = HttpClientConfig {
            timeout: Duration::from_secs(self.timeout_secs),
            max_retries: self.max_retries,
            initial_retry_delay_ms: self.initial_retry_delay_ms,
            max_retry_delay_ms: self.max_retry_delay_ms,
        };

        EnhancedHttpClient::with_config(config)
    }
}

impl BrowserSettings {
    pub fn to_browser_config(&self) -> crate::browser::BrowserConfig {
        let mut config = crate::browser::BrowserConfig {
            headless: self.headless,
            window_size: (self.window_width, self.window_height),
            timeout_seconds: self.navigation_timeout_secs,
            idle_timeout_seconds: self.idle_timeout_secs,
            disable_images: self.disable_images,
            chrome_flags: self.chrome_flags.clone(),
            ..Default::default()
        };
        if self.user_agent.is_some() {
            config.user_agent = self.user_agent.clone();
        }
        config
    }
}
