use super::{ensure_same_origin, resolve_reference, selector, ContentSource, SourceError};
use crate::browser::{BrowserConfig, BrowserManager, BrowserScraper};
use crate::models::{Chapter, Manga};
use chrono::{DateTime, Utc};
use reqwest::Url;
use scraper::{ElementRef, Html};
use std::time::Duration;

pub const BASE_URL: &str = "https://weebcentral.com";

const SEARCH_INPUT: &str = "#quick-search-input";
const SEARCH_RESULTS: &str =
    "body > header > section:nth-of-type(1) > div:nth-of-type(2) > section > div:nth-of-type(2)";
const CHAPTER_LIST: &str = "#chapter-list";
const CHAPTER_PAGES: &str = "body > main > section:nth-of-type(3)";

/// How long to wait for search links once the results container exists
const RESULTS_SETTLE: Duration = Duration::from_secs(3);

struct BrowsingSession {
    // dropped before the manager so the tab goes away first
    scraper: BrowserScraper,
    _manager: BrowserManager,
}

/// WeebCentral adapter: one Chrome instance and one page, reused across calls
pub struct WeebCentralSource {
    base_url: Url,
    not_found_path: String,
    max_candidates: usize,
    config: BrowserConfig,
    session: Option<BrowsingSession>,
}

impl WeebCentralSource {
    pub fn new(base_url: &str, config: BrowserConfig) -> Result<Self, SourceError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| SourceError::InvalidInput(format!("bad source url {:?}: {}", base_url, e)))?;
        Ok(Self {
            base_url,
            not_found_path: "/404".to_string(),
            max_candidates: 0,
            config,
            session: None,
        })
    }

    pub fn from_config(cfg: &crate::config::Config) -> Result<Self, SourceError> {
        let mut source = Self::new(&cfg.source.base_url, cfg.browser.to_browser_config())?;
        source.not_found_path = cfg.source.not_found_path.clone();
        source.max_candidates = cfg.source.max_candidates;
        Ok(source)
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Run `f` against the open page. An unavailable source resets the
    /// session so the next call starts from a fresh browser.
    fn with_page<T>(
        &mut self,
        f: impl FnOnce(&BrowserScraper, &Url) -> Result<T, SourceError>,
    ) -> Result<T, SourceError> {
        self.open()?;
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| SourceError::SourceUnavailable("browser session missing".to_string()))?;

        let result = f(&session.scraper, &self.base_url).map_err(unusable_page_as_unavailable);
        if let Err(SourceError::SourceUnavailable(msg)) = &result {
            log::warn!("WeebCentral: resetting browser session after failure: {}", msg);
            self.close();
        }
        result
    }
}

/// A page whose whole container is missing is as good as no page at all
fn unusable_page_as_unavailable(err: SourceError) -> SourceError {
    match err {
        SourceError::ParseFailure(msg) => {
            log::error!("WeebCentral: unexpected page shape: {}", msg);
            SourceError::SourceUnavailable(format!("unexpected page shape: {}", msg))
        }
        other => other,
    }
}

fn is_not_found_page(base: &Url, not_found_path: &str, landed: &str) -> bool {
    match Url::parse(landed) {
        Ok(url) => url.origin() == base.origin() && url.path() == not_found_path,
        Err(_) => false,
    }
}

/// Navigate to a source reference and fail with NotFound on the error page
fn goto_reference(
    scraper: &BrowserScraper,
    base: &Url,
    not_found_path: &str,
    url: &Url,
) -> Result<(), SourceError> {
    log::info!("WeebCentral: navigating to {}", url);
    scraper.navigate(url.as_str())?;
    let landed = scraper.current_url();
    if is_not_found_page(base, not_found_path, &landed) {
        return Err(SourceError::NotFound(format!("{} does not exist", url)));
    }
    Ok(())
}

impl ContentSource for WeebCentralSource {
    fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn open(&mut self) -> Result<(), SourceError> {
        if self.session.is_some() {
            return Ok(());
        }
        log::info!("WeebCentral: opening browsing session");
        let manager = BrowserManager::new(self.config.clone())?;
        let tab = manager.new_tab()?;
        let scraper = BrowserScraper::with_timeout(tab, self.config.timeout());
        self.session = Some(BrowsingSession {
            scraper,
            _manager: manager,
        });
        Ok(())
    }

    fn close(&mut self) {
        if let Some(session) = self.session.take() {
            log::info!("WeebCentral: closing browsing session");
            session.scraper.close();
        }
    }

    fn find_candidates(&mut self, query: &str) -> Result<Vec<Manga>, SourceError> {
        let query = query.trim().to_string();
        if query.is_empty() {
            return Err(SourceError::InvalidInput("query is empty".to_string()));
        }
        let max = self.max_candidates;

        let mut found = self.with_page(|scraper, base| {
            log::info!("WeebCentral: searching {:?}", query);
            scraper.navigate(base.as_str())?;
            scraper.type_into(SEARCH_INPUT, &query)?;
            scraper.wait_for_selector(SEARCH_RESULTS)?;
            // zero hits leave the container without links, which is not an error
            let links = format!("{} a", SEARCH_RESULTS);
            if scraper.wait_for_selector_with_timeout(&links, RESULTS_SETTLE).is_err() {
                log::debug!("WeebCentral: no result links appeared for {:?}", query);
            }
            let html = scraper.get_html()?;
            parse_search_results(&html, base)
        })?;

        if max > 0 {
            found.truncate(max);
        }
        log::info!("WeebCentral: query {:?} gave {} results", query, found.len());
        Ok(found)
    }

    fn find_recent_chapters(&mut self, manga_url: &str, limit: usize) -> Result<Vec<Chapter>, SourceError> {
        let url = ensure_same_origin(&self.base_url, manga_url)?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let not_found_path = self.not_found_path.clone();
        let mut chapters = self.with_page(|scraper, base| {
            goto_reference(scraper, base, &not_found_path, &url)?;
            scraper.wait_for_selector(CHAPTER_LIST)?;
            let html = scraper.get_html()?;
            parse_chapter_list(&html, base)
        })?;

        chapters.sort_by(|a, b| b.released_at.cmp(&a.released_at));
        chapters.truncate(limit);
        log::debug!("WeebCentral: {} chapters kept for {}", chapters.len(), url);
        Ok(chapters)
    }

    fn find_chapter_images(&mut self, chapter_url: &str) -> Result<Vec<String>, SourceError> {
        let url = ensure_same_origin(&self.base_url, chapter_url)?;

        let not_found_path = self.not_found_path.clone();
        let images = self.with_page(|scraper, base| {
            goto_reference(scraper, base, &not_found_path, &url)?;
            scraper.wait_for_selector(&format!("{} img", CHAPTER_PAGES))?;
            let html = scraper.get_html()?;
            parse_chapter_images(&html, base)
        })?;

        log::info!("WeebCentral: found {} images for {}", images.len(), url);
        Ok(images)
    }

    fn current_url(&self) -> Option<String> {
        self.session.as_ref().map(|s| s.scraper.current_url())
    }

    fn current_page_title(&self) -> Result<String, SourceError> {
        match &self.session {
            Some(s) => Ok(s.scraper.current_title()?),
            None => Err(SourceError::SourceUnavailable("no page is open".to_string())),
        }
    }
}

impl Drop for WeebCentralSource {
    fn drop(&mut self) {
        self.close();
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Candidates from the quick-search dropdown, in presentation order.
///
/// Links that do not resolve to the source origin, or carry no title, cannot
/// be offered for selection and are skipped.
pub fn parse_search_results(html: &str, base: &Url) -> Result<Vec<Manga>, SourceError> {
    let document = Html::parse_document(html);
    let container_sel = selector(SEARCH_RESULTS)?;
    let link_sel = selector("a")?;

    let container = match document.select(&container_sel).next() {
        Some(c) => c,
        None => return Err(SourceError::ParseFailure("search results container missing".to_string())),
    };

    let mut mangas = Vec::new();
    for link in container.select(&link_sel) {
        let title = collapse_whitespace(&link.text().collect::<String>());
        let url = link
            .value()
            .attr("href")
            .and_then(|href| resolve_reference(base, href))
            .filter(|u| ensure_same_origin(base, u).is_ok());

        match url {
            Some(url) if !title.is_empty() => mangas.push(Manga::new(title, url)),
            Some(url) => log::warn!("WeebCentral: skipping untitled result {}", url),
            None => log::warn!("WeebCentral: skipping result {:?} without a source link", title),
        }
    }
    Ok(mangas)
}

/// Chapters as listed on a series page. Title and date are read independently;
/// either one degrades to its zero value when missing. Rows without a link
/// have no identity and are skipped.
pub fn parse_chapter_list(html: &str, base: &Url) -> Result<Vec<Chapter>, SourceError> {
    let document = Html::parse_document(html);
    let row_sel = selector(&format!("{} > div", CHAPTER_LIST))?;
    let list_sel = selector(CHAPTER_LIST)?;

    if document.select(&list_sel).next().is_none() {
        return Err(SourceError::ParseFailure("chapter list missing".to_string()));
    }

    let link_sel = selector("a")?;
    let mut chapters = Vec::new();
    for row in document.select(&row_sel) {
        let link = match row.select(&link_sel).next() {
            Some(a) => a,
            None => {
                log::debug!("WeebCentral: chapter row without link");
                continue;
            }
        };
        let (title, released_at, href) = extract_chapter_fields(link, base);
        match href {
            Some(url) => chapters.push(Chapter::new(title, url, released_at)),
            None => log::warn!("WeebCentral: skipping chapter {:?} without href", title),
        }
    }
    Ok(chapters)
}

fn extract_chapter_fields(link: ElementRef<'_>, base: &Url) -> (String, DateTime<Utc>, Option<String>) {
    let href = link.value().attr("href").and_then(|h| resolve_reference(base, h));

    let released_at = match selector("time").ok().and_then(|s| link.select(&s).next()) {
        Some(time) => match time.value().attr("datetime") {
            Some(raw) => match DateTime::parse_from_rfc3339(raw) {
                Ok(dt) => dt.with_timezone(&Utc),
                Err(e) => {
                    log::warn!("WeebCentral: failed to parse datetime {:?}: {}", raw, e);
                    DateTime::<Utc>::default()
                }
            },
            None => {
                log::debug!("WeebCentral: <time> without datetime attribute");
                DateTime::<Utc>::default()
            }
        },
        None => DateTime::<Utc>::default(),
    };

    // second span under the link holds the label, its first span the title text
    let title = selector("span")
        .ok()
        .and_then(|span| {
            link.select(&span)
                .nth(1)
                .and_then(|outer| outer.select(&span).next())
        })
        .map(|t| collapse_whitespace(&t.text().collect::<String>()))
        .unwrap_or_default();

    (title, released_at, href)
}

/// Page images in reading order. An image with no usable `src` keeps its
/// position as an empty string.
pub fn parse_chapter_images(html: &str, base: &Url) -> Result<Vec<String>, SourceError> {
    let document = Html::parse_document(html);
    let container_sel = selector(CHAPTER_PAGES)?;
    let img_sel = selector("img")?;

    let container = document
        .select(&container_sel)
        .next()
        .ok_or_else(|| SourceError::ParseFailure("chapter images container missing".to_string()))?;

    Ok(container
        .select(&img_sel)
        .map(|img| {
            img.value()
                .attr("src")
                .and_then(|src| resolve_reference(base, src))
                .unwrap_or_default()
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base() -> Url {
        Url::parse(BASE_URL).unwrap()
    }

    const SEARCH_HTML: &str = r#"
        <html><body>
          <header>
            <section>
              <div>logo</div>
              <div>
                <section>
                  <div><input id="quick-search-input" value="naruto"></div>
                  <div>
                    <a href="https://weebcentral.com/series/01J76XY7E9FNDZ1DBBM6PBJPFK/Naruto">
                      <span>Naruto</span>
                    </a>
                    <a href="/series/01J76XY7E4YB2Z3H0JH7RCAMDZ/Boruto-Naruto-Next-Generations">
                      Boruto:   Naruto Next Generations
                    </a>
                    <a href="https://elsewhere.example/series/1">Naruto Mirror</a>
                    <a href="https://weebcentral.com/series/01J76XYFXM/Naruto-Gaiden"></a>
                    <a>Naruto (no link)</a>
                  </div>
                </section>
              </div>
            </section>
          </header>
        </body></html>
    "#;

    const SERIES_HTML: &str = r#"
        <html><body><main>
          <div id="chapter-list">
            <div>
              <a href="https://weebcentral.com/chapters/01J76Y0A">
                <span>icon</span>
                <span><span>Chapter 700</span><span>new</span></span>
                <time datetime="2024-05-02T10:00:00.000Z">May 2</time>
              </a>
            </div>
            <div>
              <a href="https://weebcentral.com/chapters/01J76Y0B">
                <span>icon</span>
                <span><span>Chapter 699</span></span>
                <time datetime="yesterday-ish">?</time>
              </a>
            </div>
            <div>
              <a href="/chapters/01J76Y0C">
                <span>only one span</span>
                <time datetime="2024-04-20T08:30:00Z">Apr 20</time>
              </a>
            </div>
            <div>
              <a><span>x</span><span><span>Chapter 697</span></span></a>
            </div>
            <div><button>Show All Chapters</button></div>
          </div>
        </main></body></html>
    "#;

    const CHAPTER_HTML: &str = r#"
        <html><body><main>
          <section>nav</section>
          <section>title</section>
          <section>
            <img src="https://scans.lastation.us/manga/Naruto/0700-001.png">
            <img alt="broken page">
            <img src="https://scans.lastation.us/manga/Naruto/0700-003.png">
          </section>
        </main></body></html>
    "#;

    #[test]
    fn test_parse_search_results_keeps_order_and_origin() {
        let found = parse_search_results(SEARCH_HTML, &base()).unwrap();
        let titles: Vec<_> = found.iter().map(|m| m.title.as_str()).collect();
        assert_eq!(titles, vec!["Naruto", "Boruto: Naruto Next Generations"]);
        for manga in &found {
            assert!(manga.url.starts_with("https://weebcentral.com/series/"));
            assert!(manga.last_chapter.is_none());
        }
    }

    #[test]
    fn test_parse_search_results_empty_container_is_success() {
        let html = r#"
            <html><body><header><section>
              <div>logo</div>
              <div><section><div><input id="quick-search-input"></div><div></div></section></div>
            </section></header></body></html>
        "#;
        let found = parse_search_results(html, &base()).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_parse_search_results_missing_container() {
        let err = parse_search_results("<html><body></body></html>", &base()).unwrap_err();
        assert!(matches!(err, SourceError::ParseFailure(_)));
    }

    #[test]
    fn test_parse_chapter_list_degrades_fields() {
        let chapters = parse_chapter_list(SERIES_HTML, &base()).unwrap();
        assert_eq!(chapters.len(), 3);

        assert_eq!(chapters[0].title, "Chapter 700");
        assert_eq!(chapters[0].url, "https://weebcentral.com/chapters/01J76Y0A");
        assert_eq!(chapters[0].released_at, Utc.with_ymd_and_hms(2024, 5, 2, 10, 0, 0).unwrap());

        // malformed date keeps the record
        assert_eq!(chapters[1].title, "Chapter 699");
        assert_eq!(chapters[1].released_at, DateTime::<Utc>::default());

        // missing title span keeps the record, relative href is resolved
        assert_eq!(chapters[2].title, "");
        assert_eq!(chapters[2].url, "https://weebcentral.com/chapters/01J76Y0C");
    }

    #[test]
    fn test_parse_chapter_list_missing_list() {
        let err = parse_chapter_list("<html><body><main></main></body></html>", &base()).unwrap_err();
        assert!(matches!(err, SourceError::ParseFailure(_)));
    }

    #[test]
    fn test_parse_chapter_images_keeps_placeholders() {
        let images = parse_chapter_images(CHAPTER_HTML, &base()).unwrap();
        assert_eq!(
            images,
            vec![
                "https://scans.lastation.us/manga/Naruto/0700-001.png".to_string(),
                String::new(),
                "https://scans.lastation.us/manga/Naruto/0700-003.png".to_string(),
            ]
        );
    }

    #[test]
    fn test_parse_chapter_images_missing_container() {
        let err = parse_chapter_images("<html><body><main><section></section></main></body></html>", &base())
            .unwrap_err();
        assert!(matches!(err, SourceError::ParseFailure(_)));
    }

    #[test]
    fn test_unusable_page_reaches_caller_as_unavailable() {
        let err = parse_chapter_list("<html><body><main></main></body></html>", &base())
            .map_err(unusable_page_as_unavailable)
            .unwrap_err();
        assert!(matches!(err, SourceError::SourceUnavailable(ref m) if m.contains("chapter list missing")));

        let not_found = unusable_page_as_unavailable(SourceError::NotFound("gone".into()));
        assert!(matches!(not_found, SourceError::NotFound(_)));
    }

    #[test]
    fn test_input_validation_happens_before_browsing() {
        let mut source = WeebCentralSource::new(BASE_URL, BrowserConfig::default()).unwrap();

        assert!(matches!(source.find_candidates("   "), Err(SourceError::InvalidInput(_))));
        assert!(matches!(source.find_recent_chapters("", 5), Err(SourceError::InvalidInput(_))));
        assert!(matches!(
            source.find_recent_chapters("https://other-origin.example/x", 5),
            Err(SourceError::InvalidInput(_))
        ));
        assert!(matches!(source.find_chapter_images(""), Err(SourceError::InvalidInput(_))));
        assert!(matches!(
            source.find_chapter_images("https://mangadex.com/chapters/01J76XYYGMWHPGZ0EW6T7BAJKA"),
            Err(SourceError::InvalidInput(_))
        ));
        // no browser was needed for any of the above
        assert!(!source.is_open());
    }

    #[test]
    fn test_zero_limit_returns_empty_without_browsing() {
        let mut source = WeebCentralSource::new(BASE_URL, BrowserConfig::default()).unwrap();
        let chapters = source
            .find_recent_chapters("https://weebcentral.com/series/01J76XYFXM8RHFVVCN0PJBPAT8/Hikaru-ga-Shinda-Natsu", 0)
            .unwrap();
        assert!(chapters.is_empty());
        assert!(!source.is_open());
    }

    #[test]
    fn test_not_found_page_detection() {
        assert!(is_not_found_page(&base(), "/404", "https://weebcentral.com/404"));
        assert!(!is_not_found_page(&base(), "/404", "https://weebcentral.com/series/1/x"));
        assert!(!is_not_found_page(&base(), "/404", "https://other.example/404"));
    }

    #[test]
    fn test_close_without_open_is_noop() {
        let mut source = WeebCentralSource::new(BASE_URL, BrowserConfig::default()).unwrap();
        source.close();
        source.close();
        assert!(source.current_url().is_none());
        assert!(source.current_page_title().is_err());
    }
}
