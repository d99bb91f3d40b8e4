use crate::models::{ChatId, Chapter, Manga, User};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("database connection lock poisoned")]
    Poisoned,
}

/// SQLite-backed store for mangas, chapters, users and subscriptions.
///
/// Cloning is cheap; all clones share one connection.
#[derive(Clone)]
pub struct Repository {
    conn: Arc<Mutex<Connection>>,
}

const MANGA_COLUMNS: &str = "m.url, m.title, c.url, c.title, c.released_at";

impl Repository {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let conn = Connection::open(path.as_ref())?;
        log::info!("Opened database at {}", path.as_ref().display());
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let repo = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        repo.create_tables()?;
        Ok(repo)
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, rusqlite::Error>,
    ) -> Result<T, StorageError> {
        let mut conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(f(&mut conn)?)
    }

    pub fn create_tables(&self) -> Result<(), StorageError> {
        log::info!("Creating tables if not exists...");
        self.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS chapters (
                    url TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    released_at TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS mangas (
                    url TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    last_chapter_url TEXT REFERENCES chapters(url) ON DELETE SET NULL
                );
                CREATE TABLE IF NOT EXISTS users (
                    chat_id INTEGER PRIMARY KEY
                );
                CREATE TABLE IF NOT EXISTS subscriptions (
                    chat_id INTEGER NOT NULL REFERENCES users(chat_id) ON DELETE CASCADE,
                    manga_url TEXT NOT NULL REFERENCES mangas(url) ON DELETE CASCADE,
                    PRIMARY KEY (chat_id, manga_url)
                );
                CREATE INDEX IF NOT EXISTS idx_subscriptions_manga ON subscriptions(manga_url);",
            )
        })?;
        log::info!("Tables ensured.");
        Ok(())
    }

    /// Store the manga, its last chapter when known, and the chat's
    /// subscription to it in one transaction.
    pub fn upsert_manga(&self, manga: &Manga, chat_id: ChatId) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            if let Some(chapter) = &manga.last_chapter {
                upsert_chapter(&tx, chapter)?;
            }
            tx.execute(
                "INSERT INTO mangas (url, title, last_chapter_url) VALUES (?1, ?2, ?3)
                 ON CONFLICT(url) DO UPDATE SET
                    title = excluded.title,
                    last_chapter_url = excluded.last_chapter_url",
                params![
                    manga.url,
                    manga.title,
                    manga.last_chapter.as_ref().map(|c| c.url.as_str())
                ],
            )?;
            insert_subscription(&tx, chat_id, &manga.url)?;
            tx.commit()
        })
        .map_err(|e| {
            log::error!("upsert_manga failed for {} chat_id={}: {}", manga.url, chat_id, e);
            e
        })?;
        log::debug!("Stored manga {} for chat_id={}", manga.url, chat_id);
        Ok(())
    }

    pub fn find_manga_by_url(&self, url: &str) -> Result<Option<Manga>, StorageError> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM mangas m
                     LEFT JOIN chapters c ON c.url = m.last_chapter_url
                     WHERE m.url = ?1",
                    MANGA_COLUMNS
                ),
                [url],
                manga_from_row,
            )
            .optional()
        })
    }

    /// Mangas the chat is subscribed to, in subscription order
    pub fn find_subscribed(&self, chat_id: ChatId) -> Result<Vec<Manga>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM subscriptions s
                 JOIN mangas m ON m.url = s.manga_url
                 LEFT JOIN chapters c ON c.url = m.last_chapter_url
                 WHERE s.chat_id = ?1
                 ORDER BY s.rowid",
                MANGA_COLUMNS
            ))?;
            let rows = stmt.query_map([chat_id.0], manga_from_row)?;
            rows.collect()
        })
    }

    pub fn is_subscribed(&self, chat_id: ChatId, manga_url: &str) -> Result<bool, StorageError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM subscriptions WHERE chat_id = ?1 AND manga_url = ?2)",
                params![chat_id.0, manga_url],
                |row| row.get(0),
            )
        })
    }

    /// Register a chat. Returns `false` when it was already known.
    pub fn upsert_user(&self, chat_id: ChatId) -> Result<bool, StorageError> {
        let inserted = self.with_conn(|conn| {
            conn.execute("INSERT OR IGNORE INTO users (chat_id) VALUES (?1)", [chat_id.0])
        })?;
        if inserted > 0 {
            log::info!("Registered user chat_id={}", chat_id);
        }
        Ok(inserted > 0)
    }

    pub fn find_user(&self, chat_id: ChatId) -> Result<Option<User>, StorageError> {
        let exists: bool = self.with_conn(|conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE chat_id = ?1)",
                [chat_id.0],
                |row| row.get(0),
            )
        })?;
        if !exists {
            return Ok(None);
        }
        let mut user = User::new(chat_id);
        user.mangas = self.find_subscribed(chat_id)?;
        Ok(Some(user))
    }

    /// Every user with at least one subscription, each with its mangas and
    /// their last known chapters.
    pub fn find_all_users_with_subscriptions(&self) -> Result<Vec<User>, StorageError> {
        let rows: Vec<(i64, Manga)> = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT s.chat_id, {} FROM subscriptions s
                 JOIN mangas m ON m.url = s.manga_url
                 LEFT JOIN chapters c ON c.url = m.last_chapter_url
                 ORDER BY s.chat_id, s.rowid",
                MANGA_COLUMNS
            ))?;
            let rows = stmt.query_map([], |row| {
                let chat_id: i64 = row.get(0)?;
                Ok((chat_id, manga_from_row_at(row, 1)?))
            })?;
            rows.collect()
        })?;

        let mut users: Vec<User> = Vec::new();
        for (chat_id, manga) in rows {
            match users.last_mut() {
                Some(user) if user.chat_id.0 == chat_id => user.mangas.push(manga),
                _ => {
                    let mut user = User::new(ChatId(chat_id));
                    user.mangas.push(manga);
                    users.push(user);
                }
            }
        }
        Ok(users)
    }

    pub fn subscribe(&self, chat_id: ChatId, manga_url: &str) -> Result<(), StorageError> {
        self.with_conn(|conn| insert_subscription(conn, chat_id, manga_url))
    }

    /// Remove the pair only. Returns whether a subscription existed.
    pub fn unsubscribe(&self, chat_id: ChatId, manga_url: &str) -> Result<bool, StorageError> {
        let removed = self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM subscriptions WHERE chat_id = ?1 AND manga_url = ?2",
                params![chat_id.0, manga_url],
            )
        })?;
        Ok(removed > 0)
    }
}

fn upsert_chapter(conn: &Connection, chapter: &Chapter) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO chapters (url, title, released_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(url) DO UPDATE SET
            title = excluded.title,
            released_at = excluded.released_at",
        params![chapter.url, chapter.title, chapter.released_at],
    )?;
    Ok(())
}

fn insert_subscription(conn: &Connection, chat_id: ChatId, manga_url: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO subscriptions (chat_id, manga_url) VALUES (?1, ?2)
         ON CONFLICT(chat_id, manga_url) DO NOTHING",
        params![chat_id.0, manga_url],
    )?;
    Ok(())
}

fn manga_from_row(row: &Row<'_>) -> Result<Manga, rusqlite::Error> {
    manga_from_row_at(row, 0)
}

fn manga_from_row_at(row: &Row<'_>, offset: usize) -> Result<Manga, rusqlite::Error> {
    let url: String = row.get(offset)?;
    let title: String = row.get(offset + 1)?;
    let chapter_url: Option<String> = row.get(offset + 2)?;
    let chapter_title: Option<String> = row.get(offset + 3)?;
    let released_at: Option<DateTime<Utc>> = row.get(offset + 4)?;

    let last_chapter = match (chapter_url, released_at) {
        (Some(url), Some(released_at)) => {
            Some(Chapter::new(chapter_title.unwrap_or_default(), url, released_at))
        }
        _ => None,
    };
    Ok(Manga {
        title,
        url,
        last_chapter,
    })
}
