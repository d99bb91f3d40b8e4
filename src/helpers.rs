//! Helper functions shared by the bot and the renderer
//!
//! - XML generation for ComicInfo.xml
//! - File name sanitizing for delivered documents
//! - Human readable release dates
//!
//! # Examples
//!
//! ```
//! use manga_notify::helpers::{sanitize_filename, xml_escape};
//!
//! assert_eq!(xml_escape("Tom & Jerry"), "Tom &amp; Jerry");
//! assert_eq!(sanitize_filename("Naruto: Gaiden/1"), "Naruto_ Gaiden_1");
//! ```

use chrono::{DateTime, Utc};

/// Escape XML special characters for ComicInfo.xml
pub fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Build ComicInfo.xml content for one chapter
pub fn build_comicinfo(series: &str, chapter_title: &str, page_count: usize, web: Option<&str>) -> String {
    let mut lines = vec![
        r#"<?xml version="1.0"?>"#.to_string(),
        r#"<ComicInfo xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xmlns:xsd="http://www.w3.org/2001/XMLSchema">"#.to_string(),
        format!("  <Series>{}</Series>", xml_escape(series)),
        format!("  <Title>{}</Title>", xml_escape(chapter_title)),
    ];
    if let Some(number) = chapter_number(chapter_title) {
        lines.push(format!("  <Number>{}</Number>", number));
    }
    lines.push(format!("  <PageCount>{}</PageCount>", page_count));
    if let Some(web) = web {
        lines.push(format!("  <Web>{}</Web>", xml_escape(web)));
    }
    lines.push("</ComicInfo>".to_string());
    lines.join("\n")
}

/// First number in a chapter title ("Chapter 10.5" -> "10.5")
pub fn chapter_number(title: &str) -> Option<String> {
    let re = regex::Regex::new(r"(\d+(?:\.\d+)?)").ok()?;
    re.captures(title)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Replace characters that are not allowed in file names on common platforms
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_matches('.');
    if trimmed.is_empty() {
        "chapter".to_string()
    } else {
        trimmed.to_string()
    }
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("1 {} ago", unit)
    } else {
        format!("{} {}s ago", n, unit)
    }
}

pub const UNKNOWN_DATE: &str = "unknown";

/// "Just now", "5 minutes ago", ... up to a week, then the calendar date.
/// The Unix epoch marks a date the source did not give us and reads as "unknown".
pub fn format_release_date(released_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    if released_at == DateTime::<Utc>::default() {
        return UNKNOWN_DATE.to_string();
    }
    let elapsed = now.signed_duration_since(released_at);

    if elapsed.num_seconds() < 60 {
        "Just now".to_string()
    } else if elapsed.num_minutes() < 60 {
        plural(elapsed.num_minutes(), "minute")
    } else if elapsed.num_hours() < 24 {
        plural(elapsed.num_hours(), "hour")
    } else if elapsed.num_days() < 7 {
        plural(elapsed.num_days(), "day")
    } else {
        released_at.format("%B %-d, %Y").to_string()
    }
}
