//! Chapter documents
//!
//! [`CbzRenderer`] downloads the page images of a chapter and packages them
//! as a CBZ archive with a ComicInfo.xml entry.

use crate::helpers::{build_comicinfo, sanitize_filename};
use crate::http_client::EnhancedHttpClient;
use crate::session::ResolvedManga;
use async_trait::async_trait;
use std::io::{Cursor, Write};
use zip::write::{FileOptions, ZipWriter};

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("chapter has no resolvable images")]
    NoImages,

    #[error("failed to download page {page} from {url}: {source}")]
    Fetch {
        page: usize,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("page {page} is not a supported image")]
    UnsupportedImage { page: usize },

    #[error("failed to write archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("failed to write archive: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    /// Turn ordered page references into one deliverable document.
    /// Empty references are missing pages and are left out.
    async fn render(&self, manga: &ResolvedManga, images: &[String]) -> Result<Document, RenderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Webp,
    Gif,
}

impl ImageKind {
    pub fn extension(self) -> &'static str {
        match self {
            ImageKind::Jpeg => "jpg",
            ImageKind::Png => "png",
            ImageKind::Webp => "webp",
            ImageKind::Gif => "gif",
        }
    }
}

/// Identify an image by its magic bytes
pub fn sniff_image(bytes: &[u8]) -> Option<ImageKind> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(ImageKind::Jpeg)
    } else if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        Some(ImageKind::Png)
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some(ImageKind::Webp)
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some(ImageKind::Gif)
    } else {
        None
    }
}

/// A downloaded page and its 1-based position in the chapter
pub struct Page {
    pub number: usize,
    pub bytes: Vec<u8>,
}

/// Package pages into a CBZ archive held in memory
pub fn package_cbz(manga: &ResolvedManga, pages: &[Page]) -> Result<Vec<u8>, RenderError> {
    if pages.is_empty() {
        return Err(RenderError::NoImages);
    }

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let xml = build_comicinfo(&manga.title, &manga.chapter.title, pages.len(), Some(&manga.chapter.url));
    zip.start_file("ComicInfo.xml", FileOptions::default())?;
    zip.write_all(xml.as_bytes())?;

    let width = pages.iter().map(|p| p.number).max().unwrap_or(1).to_string().len().max(3);
    for page in pages {
        let kind = sniff_image(&page.bytes).ok_or(RenderError::UnsupportedImage { page: page.number })?;
        let name = format!("page_{:0width$}.{}", page.number, kind.extension(), width = width);
        // images are already compressed
        zip.start_file(name, FileOptions::default().compression_method(zip::CompressionMethod::Stored))?;
        zip.write_all(&page.bytes)?;
    }

    let cursor = zip.finish()?;
    Ok(cursor.into_inner())
}

pub fn document_name(manga: &ResolvedManga) -> String {
    format!("{}.cbz", sanitize_filename(&format!("{}-{}", manga.title, manga.chapter.title)))
}

pub struct CbzRenderer {
    client: EnhancedHttpClient,
    referer: String,
}

impl CbzRenderer {
    /// `referer` is the source origin sent with every image request
    pub fn new(client: EnhancedHttpClient, referer: impl Into<String>) -> Self {
        Self {
            client,
            referer: referer.into(),
        }
    }
}

#[async_trait]
impl DocumentRenderer for CbzRenderer {
    async fn render(&self, manga: &ResolvedManga, images: &[String]) -> Result<Document, RenderError> {
        let mut pages = Vec::new();
        for (i, url) in images.iter().enumerate() {
            if url.is_empty() {
                log::warn!("Page {} of {} has no image, skipping", i + 1, manga.chapter.url);
                continue;
            }
            let bytes = self
                .client
                .get_bytes(url, Some(&self.referer))
                .await
                .map_err(|source| RenderError::Fetch {
                    page: i + 1,
                    url: url.clone(),
                    source,
                })?;
            log::debug!("Downloaded page {} ({} bytes)", i + 1, bytes.len());
            pages.push(Page { number: i + 1, bytes });
        }

        let bytes = package_cbz(manga, &pages)?;
        let file_name = document_name(manga);
        log::info!("Rendered {} with {} pages ({} bytes)", file_name, pages.len(), bytes.len());
        Ok(Document { file_name, bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chapter, Manga};
    use chrono::Utc;
    use std::io::Read;

    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];
    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00];

    fn manga() -> ResolvedManga {
        ResolvedManga::new(
            Manga::new("Naruto", "https://weebcentral.com/series/1/Naruto"),
            Chapter::new("Chapter 700", "https://weebcentral.com/chapters/700", Utc::now()),
        )
    }

    #[test]
    fn test_sniff_image() {
        assert_eq!(sniff_image(JPEG), Some(ImageKind::Jpeg));
        assert_eq!(sniff_image(PNG), Some(ImageKind::Png));
        assert_eq!(sniff_image(b"RIFF\x00\x00\x00\x00WEBPVP8 "), Some(ImageKind::Webp));
        assert_eq!(sniff_image(b"GIF89a...."), Some(ImageKind::Gif));
        assert_eq!(sniff_image(b"<html>blocked</html>"), None);
        assert_eq!(sniff_image(&[]), None);
    }

    #[test]
    fn test_package_keeps_page_positions() {
        let pages = vec![
            Page { number: 1, bytes: JPEG.to_vec() },
            Page { number: 3, bytes: PNG.to_vec() },
        ];
        let bytes = package_cbz(&manga(), &pages).unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let names: Vec<String> = archive.file_names().map(|n| n.to_string()).collect();
        assert!(names.contains(&"ComicInfo.xml".to_string()));
        assert!(names.contains(&"page_001.jpg".to_string()));
        assert!(names.contains(&"page_003.png".to_string()));
        assert_eq!(names.len(), 3);

        let mut xml = String::new();
        archive.by_name("ComicInfo.xml").unwrap().read_to_string(&mut xml).unwrap();
        assert!(xml.contains("<Series>Naruto</Series>"));
        assert!(xml.contains("<Title>Chapter 700</Title>"));
    }

    #[test]
    fn test_package_rejects_empty_and_unknown() {
        assert!(matches!(package_cbz(&manga(), &[]), Err(RenderError::NoImages)));

        let pages = vec![Page { number: 2, bytes: b"not an image".to_vec() }];
        assert!(matches!(
            package_cbz(&manga(), &pages),
            Err(RenderError::UnsupportedImage { page: 2 })
        ));
    }

    #[test]
    fn test_document_name_is_sanitized() {
        let mut m = manga();
        m.title = "Re:Zero".to_string();
        assert_eq!(document_name(&m), "Re_Zero-Chapter 700.cbz");
    }

    #[tokio::test]
    async fn test_renderer_rejects_placeholder_only_chapters() {
        let renderer = CbzRenderer::new(EnhancedHttpClient::new().unwrap(), "https://weebcentral.com");
        let err = renderer
            .render(&manga(), &[String::new(), String::new()])
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::NoImages));
    }
}
