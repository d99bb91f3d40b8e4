use std::time::Duration;

/// Configuration for browser instances
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Run browser in headless mode
    pub headless: bool,

    /// Browser window size
    pub window_size: (u32, u32),

    /// Custom user agent
    pub user_agent: Option<String>,

    /// Navigation and element wait timeout in seconds
    pub timeout_seconds: u64,

    /// Idle time after which Chrome closes the connection
    pub idle_timeout_seconds: u64,

    /// Disable image loading for performance
    pub disable_images: bool,

    /// Additional Chrome flags
    pub chrome_flags: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            window_size: (400, 400),
            user_agent: Some(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36"
                    .to_string(),
            ),
            timeout_seconds: 30,
            idle_timeout_seconds: 3600,
            disable_images: true,
            chrome_flags: vec![],
        }
    }
}

impl BrowserConfig {
    /// Flags that strip background work from Chrome for a long-lived session
    pub fn optimized() -> Self {
        let mut config = Self::default();
        config.chrome_flags = [
            "--disable-dev-shm-usage",
            "--disable-gpu",
            "--disable-background-timer-throttling",
            "--disable-backgrounding-occluded-windows",
            "--disable-renderer-backgrounding",
            "--disable-extensions",
            "--disable-sync",
            "--disable-background-networking",
            "--disable-component-update",
            "--no-default-browser-check",
            "--no-first-run",
        ]
        .iter()
        .map(|f| f.to_string())
        .collect();
        config
    }

    /// Get timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    /// Full argument list passed to Chrome on launch
    pub fn launch_args(&self) -> Vec<String> {
        let mut args = vec![
            "--disable-blink-features=AutomationControlled".to_string(),
            "--no-sandbox".to_string(),
            "--disable-setuid-sandbox".to_string(),
        ];
        if self.disable_images {
            args.push("--blink-settings=imagesEnabled=false".to_string());
        }
        if let Some(ua) = &self.user_agent {
            args.push(format!("--user-agent={}", ua));
        }
        for flag in &self.chrome_flags {
            if !args.contains(flag) {
                args.push(flag.clone());
            }
        }
        args
    }
}
