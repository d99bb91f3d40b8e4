use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER, USER_AGENT};
use reqwest::{Client, ClientBuilder, StatusCode};
use std::time::Duration;
use tokio::time::sleep;

/// Browser user agents, one picked per request
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
];

const IMAGE_ACCEPT: &str = "image/avif,image/webp,image/apng,image/*,*/*;q=0.8";

#[derive(Clone, Debug)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub max_retries: usize,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            initial_retry_delay_ms: 500,
            max_retry_delay_ms: 8000,
        }
    }
}

/// HTTP client for chapter page images, with retry and backoff
pub struct EnhancedHttpClient {
    client: Client,
    config: HttpClientConfig,
}

impl EnhancedHttpClient {
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_config(HttpClientConfig::default())
    }

    pub fn with_config(config: HttpClientConfig) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(IMAGE_ACCEPT));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert("Sec-Fetch-Dest", HeaderValue::from_static("image"));
        headers.insert("Sec-Fetch-Mode", HeaderValue::from_static("no-cors"));
        headers.insert("Sec-Fetch-Site", HeaderValue::from_static("cross-site"));

        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .default_headers(headers)
            .build()?;

        Ok(Self { client, config })
    }

    fn random_user_agent() -> &'static str {
        let index = rand::thread_rng().gen_range(0..USER_AGENTS.len());
        USER_AGENTS[index]
    }

    /// Exponential backoff capped at the configured maximum, with ±25% jitter
    fn retry_delay(&self, attempt: usize) -> Duration {
        let factor = 2u64.saturating_pow(attempt as u32);
        let delay_ms = self
            .config
            .initial_retry_delay_ms
            .saturating_mul(factor)
            .min(self.config.max_retry_delay_ms);
        let jitter = rand::thread_rng().gen_range(0.75..=1.25);
        Duration::from_millis((delay_ms as f64 * jitter) as u64)
    }

    fn is_retryable_status(status: StatusCode) -> bool {
        matches!(
            status.as_u16(),
            429 | 500 | 502 | 503 | 504 | 520 | 521 | 522 | 523 | 524
        )
    }

    fn is_retryable_error(err: &reqwest::Error) -> bool {
        err.is_timeout() || err.is_connect() || err.status().map(Self::is_retryable_status).unwrap_or(false)
    }

    /// Download `url` as raw bytes. `referer` is sent as the `Referer`
    /// header; image hosts reject hotlinked requests without it.
    pub async fn get_bytes(&self, url: &str, referer: Option<&str>) -> Result<Vec<u8>, reqwest::Error> {
        let mut attempt = 0;
        loop {
            let mut request = self.client.get(url).header(USER_AGENT, Self::random_user_agent());
            if let Some(referer) = referer {
                request = request.header(REFERER, referer);
            }

            let result = match request.send().await {
                Ok(response) => response.error_for_status(),
                Err(e) => Err(e),
            };

            let err = match result {
                Ok(response) => return Ok(response.bytes().await?.to_vec()),
                Err(e) => e,
            };

            if attempt >= self.config.max_retries || !Self::is_retryable_error(&err) {
                return Err(err);
            }
            let delay = self.retry_delay(attempt);
            log::warn!(
                "Fetching {} failed (attempt {}/{}), retrying in {:?}: {}",
                url,
                attempt + 1,
                self.config.max_retries + 1,
                delay,
                err
            );
            sleep(delay).await;
            attempt += 1;
        }
    }
}
