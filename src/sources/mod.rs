//! Content source adapters
//!
//! A [`ContentSource`] turns the remote catalog into [`Manga`] and [`Chapter`]
//! values. Implementations are blocking (they drive a browser); async callers
//! go through [`SharedSource`], which serializes every call through one owner
//! and bounds it with a timeout.

pub mod weebcentral;

use crate::browser::BrowserError;
use crate::models::{Chapter, Manga};
use reqwest::Url;
use scraper::Selector;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub use weebcentral::WeebCentralSource;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("unexpected page structure: {0}")]
    ParseFailure(String),
}

impl From<BrowserError> for SourceError {
    fn from(err: BrowserError) -> Self {
        match err {
            BrowserError::ElementNotFound(_) | BrowserError::JavaScriptError(_) => {
                SourceError::ParseFailure(err.to_string())
            }
            _ => SourceError::SourceUnavailable(err.to_string()),
        }
    }
}

/// One external catalog, driven through a long-lived browsing session.
///
/// Every lookup opens the session implicitly when needed.
pub trait ContentSource: Send {
    /// Origin all references of this source are rooted at
    fn base_url(&self) -> &Url;

    /// Start the browsing session; reuses the current page when already open
    fn open(&mut self) -> Result<(), SourceError>;

    /// Release the browsing session. Calling it again is a no-op.
    fn close(&mut self);

    /// Search results in source order, without last chapters
    fn find_candidates(&mut self, query: &str) -> Result<Vec<Manga>, SourceError>;

    /// At most `limit` chapters, most recent first
    fn find_recent_chapters(&mut self, manga_url: &str, limit: usize) -> Result<Vec<Chapter>, SourceError>;

    /// Page image references in reading order; unresolvable pages are empty strings
    fn find_chapter_images(&mut self, chapter_url: &str) -> Result<Vec<String>, SourceError>;

    fn current_url(&self) -> Option<String> {
        None
    }

    fn current_page_title(&self) -> Result<String, SourceError> {
        Err(SourceError::SourceUnavailable("no page is open".to_string()))
    }
}

/// Check that `reference` is a URL rooted at the origin of `base`.
pub fn ensure_same_origin(base: &Url, reference: &str) -> Result<Url, SourceError> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Err(SourceError::InvalidInput("reference is empty".to_string()));
    }
    let url = Url::parse(reference)
        .map_err(|e| SourceError::InvalidInput(format!("{:?} is not a valid URL: {}", reference, e)))?;
    if url.origin() != base.origin() {
        return Err(SourceError::InvalidInput(format!(
            "{:?} does not belong to {}",
            reference,
            base.as_str().trim_end_matches('/')
        )));
    }
    Ok(url)
}

/// Resolve a possibly relative href against the source origin.
pub fn resolve_reference(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    base.join(href).ok().map(|u| u.to_string())
}

pub(crate) fn selector(css: &str) -> Result<Selector, SourceError> {
    Selector::parse(css).map_err(|e| SourceError::ParseFailure(format!("bad selector {:?}: {:?}", css, e)))
}

/// Single owner of a [`ContentSource`], shared by every chat.
///
/// Calls run on the blocking pool one at a time. A call that does not finish
/// within `timeout` fails with [`SourceError::SourceUnavailable`]; the next
/// call waits until the stuck one releases the source.
#[derive(Clone)]
pub struct SharedSource {
    inner: Arc<Mutex<Box<dyn ContentSource>>>,
    timeout: Duration,
}

impl SharedSource {
    pub fn new<S: ContentSource + 'static>(source: S, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(source))),
            timeout,
        }
    }

    async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T, SourceError>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn ContentSource) -> Result<T, SourceError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let task = tokio::task::spawn_blocking(move || {
            let mut guard = inner
                .lock()
                .map_err(|_| SourceError::SourceUnavailable("source lock poisoned".to_string()))?;
            f(&mut **guard)
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                log::error!("Source call {} aborted: {}", op, join_err);
                Err(SourceError::SourceUnavailable(format!("{} aborted", op)))
            }
            Err(_) => {
                log::warn!("Source call {} timed out after {:?}", op, self.timeout);
                Err(SourceError::SourceUnavailable(format!(
                    "{} timed out after {}s",
                    op,
                    self.timeout.as_secs_f32()
                )))
            }
        }
    }

    pub async fn open(&self) -> Result<(), SourceError> {
        self.run("open", |s| s.open()).await
    }

    pub async fn close(&self) -> Result<(), SourceError> {
        self.run("close", |s| {
            s.close();
            Ok(())
        })
        .await
    }

    pub async fn find_candidates(&self, query: &str) -> Result<Vec<Manga>, SourceError> {
        let query = query.to_string();
        self.run("find_candidates", move |s| s.find_candidates(&query)).await
    }

    pub async fn find_recent_chapters(&self, manga_url: &str, limit: usize) -> Result<Vec<Chapter>, SourceError> {
        let manga_url = manga_url.to_string();
        self.run("find_recent_chapters", move |s| s.find_recent_chapters(&manga_url, limit))
            .await
    }

    pub async fn find_chapter_images(&self, chapter_url: &str) -> Result<Vec<String>, SourceError> {
        let chapter_url = chapter_url.to_string();
        self.run("find_chapter_images", move |s| s.find_chapter_images(&chapter_url))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://weebcentral.com").unwrap()
    }

    #[test]
    fn test_same_origin_accepts_source_urls() {
        let url = ensure_same_origin(&base(), "https://weebcentral.com/series/01J76/Naruto").unwrap();
        assert_eq!(url.path(), "/series/01J76/Naruto");
    }

    #[test]
    fn test_same_origin_rejects_empty_and_foreign() {
        for bad in [
            "",
            "   ",
            "https://other-origin.example/x",
            "https://mangadex.com/chapters/01J76XYYGMWHPGZ0EW6T7BAJKA",
            "http://weebcentral.com/series/1",
            "https://weebcentral.com.evil.example/series/1",
            "/series/relative",
        ] {
            match ensure_same_origin(&base(), bad) {
                Err(SourceError::InvalidInput(_)) => {}
                other => panic!("{:?} should be rejected, got {:?}", bad, other),
            }
        }
    }

    #[test]
    fn test_resolve_reference() {
        assert_eq!(
            resolve_reference(&base(), "/series/abc").as_deref(),
            Some("https://weebcentral.com/series/abc")
        );
        assert_eq!(
            resolve_reference(&base(), "https://cdn.example/1.png").as_deref(),
            Some("https://cdn.example/1.png")
        );
        assert_eq!(resolve_reference(&base(), "  "), None);
    }

    #[test]
    fn test_browser_error_mapping() {
        assert!(matches!(
            SourceError::from(BrowserError::Timeout("x".into())),
            SourceError::SourceUnavailable(_)
        ));
        assert!(matches!(
            SourceError::from(BrowserError::ElementNotFound("x".into())),
            SourceError::ParseFailure(_)
        ));
    }

    struct SlowSource {
        base: Url,
        delay: Duration,
    }

    impl ContentSource for SlowSource {
        fn base_url(&self) -> &Url {
            &self.base
        }
        fn open(&mut self) -> Result<(), SourceError> {
            Ok(())
        }
        fn close(&mut self) {}
        fn find_candidates(&mut self, query: &str) -> Result<Vec<Manga>, SourceError> {
            std::thread::sleep(self.delay);
            Ok(vec![Manga::new(query, "https://weebcentral.com/series/1")])
        }
        fn find_recent_chapters(&mut self, _: &str, _: usize) -> Result<Vec<Chapter>, SourceError> {
            Ok(Vec::new())
        }
        fn find_chapter_images(&mut self, _: &str) -> Result<Vec<String>, SourceError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_shared_source_times_out() {
        let shared = SharedSource::new(
            SlowSource { base: base(), delay: Duration::from_millis(400) },
            Duration::from_millis(50),
        );
        match shared.find_candidates("Naruto").await {
            Err(SourceError::SourceUnavailable(msg)) => assert!(msg.contains("timed out")),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_shared_source_passes_results_through() {
        let shared = SharedSource::new(
            SlowSource { base: base(), delay: Duration::from_millis(1) },
            Duration::from_secs(5),
        );
        let found = shared.find_candidates("Naruto").await.unwrap();
        assert_eq!(found[0].title, "Naruto");
    }
}
