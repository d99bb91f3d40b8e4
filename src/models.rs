use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Telegram chat identifier, the only thing we know about a user.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Manga {
    pub title: String,
    /// Canonical source URL, the identity of the manga
    pub url: String,
    pub last_chapter: Option<Chapter>,
}

impl Manga {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            last_chapter: None,
        }
    }

    pub fn with_last_chapter(mut self, chapter: Chapter) -> Self {
        self.last_chapter = Some(chapter);
        self
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Chapter {
    pub title: String,
    /// Globally unique chapter URL
    pub url: String,
    /// Epoch when the source did not expose a parseable date
    pub released_at: DateTime<Utc>,
}

impl Chapter {
    pub fn new(title: impl Into<String>, url: impl Into<String>, released_at: DateTime<Utc>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            released_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct User {
    pub chat_id: ChatId,
    /// Subscribed mangas; only populated by the read paths that join subscriptions
    pub mangas: Vec<Manga>,
}

impl User {
    pub fn new(chat_id: ChatId) -> Self {
        Self {
            chat_id,
            mangas: Vec::new(),
        }
    }
}

/// Sort mangas so the most recently released last chapter comes first.
///
/// Mangas without a known chapter go after every manga that has one and keep
/// their relative order.
pub fn sort_manga_by_recent_chapter(mangas: &mut [Manga]) {
    mangas.sort_by(|a, b| match (&a.last_chapter, &b.last_chapter) {
        (Some(ca), Some(cb)) => cb.released_at.cmp(&ca.released_at),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}
