use super::manager::BrowserError;
use headless_chrome::Tab;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// High-level scraping utilities for a browser tab
pub struct BrowserScraper {
    tab: Arc<Tab>,
    default_timeout: Duration,
}

impl BrowserScraper {
    /// Create a new scraper with the given tab
    pub fn new(tab: Arc<Tab>) -> Self {
        Self {
            tab,
            default_timeout: Duration::from_secs(30),
        }
    }

    /// Create a new scraper with a custom default timeout
    pub fn with_timeout(tab: Arc<Tab>, timeout: Duration) -> Self {
        Self {
            tab,
            default_timeout: timeout,
        }
    }

    /// Navigate to a URL and wait for page load
    pub fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        self.tab
            .navigate_to(url)
            .map_err(|e| BrowserError::NavigationError(format!("Failed to navigate to {}: {}", url, e)))?;

        self.tab
            .wait_until_navigated()
            .map_err(|e| BrowserError::NavigationError(format!("Navigation timeout for {}: {}", url, e)))?;

        Ok(())
    }

    /// Wait for an element matching the given CSS selector
    pub fn wait_for_selector(&self, selector: &str) -> Result<(), BrowserError> {
        self.wait_for_selector_with_timeout(selector, self.default_timeout)
    }

    /// Wait for an element with a custom timeout
    pub fn wait_for_selector_with_timeout(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        let start = Instant::now();
        let script = format!("document.querySelector({}) !== null", js_string(selector));

        loop {
            if start.elapsed() > timeout {
                return Err(BrowserError::Timeout(format!(
                    "Waiting for selector: {}",
                    selector
                )));
            }

            if let Ok(result) = self.tab.evaluate(&script, false) {
                if result.value.and_then(|v| v.as_bool()) == Some(true) {
                    return Ok(());
                }
            }

            std::thread::sleep(Duration::from_millis(100));
        }
    }

    /// Focus an input and type text into it, firing the page's key handlers
    pub fn type_into(&self, selector: &str, text: &str) -> Result<(), BrowserError> {
        let element = self
            .tab
            .wait_for_element_with_custom_timeout(selector, self.default_timeout)
            .map_err(|e| BrowserError::ElementNotFound(format!("{}: {}", selector, e)))?;

        element
            .click()
            .map_err(|e| BrowserError::JavaScriptError(format!("Focus failed on {}: {}", selector, e)))?;
        element
            .type_into(text)
            .map_err(|e| BrowserError::JavaScriptError(format!("Typing into {} failed: {}", selector, e)))?;

        Ok(())
    }

    /// Get the HTML content of the page
    pub fn get_html(&self) -> Result<String, BrowserError> {
        self.tab
            .get_content()
            .map_err(|e| BrowserError::HtmlExtractionError(e.to_string()))
    }

    /// URL of the current page, after any redirect
    pub fn current_url(&self) -> String {
        self.tab.get_url()
    }

    pub fn current_title(&self) -> Result<String, BrowserError> {
        self.tab
            .get_title()
            .map_err(|e| BrowserError::JavaScriptError(format!("Title lookup failed: {}", e)))
    }

    /// Close the tab; the browser process is owned by the manager
    pub fn close(&self) {
        if let Err(e) = self.tab.close(false) {
            log::warn!("Failed to close tab: {}", e);
        }
    }

    /// Get a reference to the underlying tab
    pub fn tab(&self) -> &Arc<Tab> {
        &self.tab
    }
}

/// Quote a value as a JavaScript string literal
fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}
