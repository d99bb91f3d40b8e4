//! Headless Chrome session used by the content source adapter
//!
//! The source renders its search results client-side, so pages are driven
//! through a real browser and the resulting HTML is handed to the parsers in
//! [`crate::sources`].
//!
//! # Example
//!
//! ```no_run
//! use manga_notify::browser::{BrowserConfig, BrowserManager, BrowserScraper};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = BrowserManager::new(BrowserConfig::default())?;
//! let scraper = BrowserScraper::new(manager.new_tab()?);
//!
//! scraper.navigate("https://weebcentral.com")?;
//! scraper.wait_for_selector("#quick-search-input")?;
//! let html = scraper.get_html()?;
//!
//! println!("Extracted {} bytes of HTML", html.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod manager;
pub mod scraper;

pub use config::BrowserConfig;
pub use manager::{BrowserError, BrowserManager};
pub use scraper::BrowserScraper;
