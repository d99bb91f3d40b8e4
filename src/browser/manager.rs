use super::config::BrowserConfig;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::sync::Arc;

/// Owns one Chrome process and hands out tabs
pub struct BrowserManager {
    browser: Browser,
    config: BrowserConfig,
}

impl BrowserManager {
    /// Launch Chrome with the given configuration
    pub fn new(config: BrowserConfig) -> Result<Self, BrowserError> {
        // LaunchOptions borrows its arguments, keep the owned strings alive here
        let args = config.launch_args();
        let os_args: Vec<&OsStr> = args.iter().map(OsStr::new).collect();

        let launch_options = LaunchOptions::default_builder()
            .headless(config.headless)
            .window_size(Some((config.window_size.0, config.window_size.1)))
            .idle_browser_timeout(config.idle_timeout())
            .args(os_args)
            .build()
            .map_err(|e| BrowserError::ConfigurationError(e.to_string()))?;

        let browser = Browser::new(launch_options)
            .map_err(|e| BrowserError::InitializationError(e.to_string()))?;

        log::info!("Browser launched (headless={})", config.headless);
        Ok(Self { browser, config })
    }

    /// Create a new tab for scraping
    pub fn new_tab(&self) -> Result<Arc<Tab>, BrowserError> {
        let tab = self
            .browser
            .new_tab()
            .map_err(|e| BrowserError::TabCreationError(e.to_string()))?;
        tab.set_default_timeout(self.config.timeout());
        Ok(tab)
    }
}

impl Drop for BrowserManager {
    fn drop(&mut self) {
        // Chrome is killed when the Browser handle is dropped
        log::debug!("Browser manager dropped");
    }
}

/// Errors that can occur during browser operations
#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("Browser initialization failed: {0}")]
    InitializationError(String),

    #[error("Browser configuration error: {0}")]
    ConfigurationError(String),

    #[error("Tab creation failed: {0}")]
    TabCreationError(String),

    #[error("Navigation error: {0}")]
    NavigationError(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("JavaScript execution error: {0}")]
    JavaScriptError(String),

    #[error("HTML extraction error: {0}")]
    HtmlExtractionError(String),
}
