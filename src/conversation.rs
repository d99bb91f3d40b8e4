//! The add-manga conversation
//!
//! ```text
//! Idle --/add query--> AwaitingSelection --title--> AwaitingAction --action--> Idle
//! ```
//!
//! Every transition takes the chat's state out of its session before doing
//! any I/O, so an error on any path leaves the chat Idle. `/cancel` returns
//! to Idle from anywhere.

use crate::db::{Repository, StorageError};
use crate::models::{ChatId, Manga};
use crate::render::{Document, DocumentRenderer, RenderError};
use crate::session::{ResolvedManga, Session, SessionGuard, SessionRegistry};
use crate::sources::{SharedSource, SourceError};
use std::sync::Arc;

pub const DOWNLOAD: &str = "Download";
pub const READ_ONLINE: &str = "Read Online";
pub const DO_NOTHING: &str = "Do Nothing";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Download,
    ReadOnline,
    DoNothing,
    Invalid,
}

impl Action {
    pub fn parse(text: &str) -> Action {
        match text.trim() {
            DOWNLOAD => Action::Download,
            READ_ONLINE => Action::ReadOnline,
            DO_NOTHING => Action::DoNothing,
            _ => Action::Invalid,
        }
    }

    pub fn labels() -> [&'static str; 3] {
        [DOWNLOAD, READ_ONLINE, DO_NOTHING]
    }
}

/// Result of a transition that the chat should be told about
#[derive(Debug)]
pub enum Outcome {
    /// Candidates cached; waiting for the user to pick a title
    CandidatesFound { query: String, candidates: Vec<Manga> },
    NoCandidates { query: String },
    AlreadySubscribed(Manga),
    /// Stored with its latest chapter; waiting for an action
    Subscribed(ResolvedManga),
    /// The source lists no chapters yet; stored and done
    SubscribedWithoutChapter(Manga),
    Delivered { manga: ResolvedManga, document: Document },
    ReadOnline(ResolvedManga),
    Dismissed(ResolvedManga),
}

#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("no conversation in progress")]
    NoActiveSession,

    #[error("{0:?} matches none of the offered titles")]
    NoMatch(String),

    #[error("{0:?} is not one of the offered actions")]
    InvalidAction(String),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Render(#[from] RenderError),
}

pub const GENERIC_FAILURE: &str = "We are having problems on our server. Please try again later.";

impl FlowError {
    /// Text shown to the user. Internal detail stays in the logs.
    pub fn user_message(&self) -> String {
        match self {
            FlowError::NoActiveSession => "There is nothing to answer right now. Use /add <manga name> to start.".to_string(),
            FlowError::NoMatch(_) => "That title was not in the list. Please start again with /add <manga name>.".to_string(),
            FlowError::InvalidAction(_) => "Invalid choice. Please try again with /add command.".to_string(),
            FlowError::Source(SourceError::InvalidInput(_)) => "To add a manga, use /add <manga name>".to_string(),
            FlowError::Source(SourceError::NotFound(_)) => "Sorry, that manga no longer exists on the source.".to_string(),
            FlowError::Source(SourceError::SourceUnavailable(_) | SourceError::ParseFailure(_))
            | FlowError::Storage(_) => GENERIC_FAILURE.to_string(),
            FlowError::Render(_) => "Sorry, this chapter could not be downloaded. Please try again later.".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct Conversation {
    sessions: SessionRegistry,
    source: SharedSource,
    repo: Repository,
    renderer: Arc<dyn DocumentRenderer>,
}

impl Conversation {
    pub fn new(source: SharedSource, repo: Repository, renderer: Arc<dyn DocumentRenderer>) -> Self {
        Self {
            sessions: SessionRegistry::new(),
            source,
            repo,
            renderer,
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Start a new flow, abandoning any flow already in progress for the chat
    pub async fn start_search(&self, chat_id: ChatId, query: &str) -> Result<Outcome, FlowError> {
        let mut session = self.sessions.acquire(chat_id).await;
        if !session.take().is_idle() {
            log::info!("Restarting add flow chat_id={}", chat_id);
        }

        let query = query.trim();
        if query.is_empty() {
            return Err(SourceError::InvalidInput("empty query".to_string()).into());
        }

        let candidates = self.source.find_candidates(query).await?;
        if candidates.is_empty() {
            log::info!("No candidates for {:?} chat_id={}", query, chat_id);
            return Ok(Outcome::NoCandidates {
                query: query.to_string(),
            });
        }

        log::debug!("{} candidates cached chat_id={}", candidates.len(), chat_id);
        *session = Session::AwaitingSelection {
            candidates: candidates.clone(),
        };
        Ok(Outcome::CandidatesFound {
            query: query.to_string(),
            candidates,
        })
    }

    /// Advance the chat's flow with a free-text message
    pub async fn handle_text(&self, chat_id: ChatId, text: &str) -> Result<Outcome, FlowError> {
        let mut session = self.sessions.acquire(chat_id).await;
        match session.take() {
            Session::Idle => Err(FlowError::NoActiveSession),
            Session::AwaitingSelection { candidates } => self.select(&mut session, candidates, text).await,
            Session::AwaitingAction { manga } => self.act(chat_id, manga, text).await,
        }
    }

    /// Clear the chat's flow. Returns whether one was in progress.
    pub async fn cancel(&self, chat_id: ChatId) -> bool {
        let mut session = self.sessions.acquire(chat_id).await;
        let was_active = !session.take().is_idle();
        if was_active {
            log::info!("Add flow cancelled chat_id={}", chat_id);
        }
        was_active
    }

    async fn select(
        &self,
        session: &mut SessionGuard,
        candidates: Vec<Manga>,
        text: &str,
    ) -> Result<Outcome, FlowError> {
        let chat_id = session.chat_id();
        let wanted = text.trim();
        let manga = candidates
            .into_iter()
            .find(|m| m.title == wanted)
            .ok_or_else(|| FlowError::NoMatch(wanted.to_string()))?;

        if self.repo.is_subscribed(chat_id, &manga.url)? {
            log::info!("Already subscribed to {} chat_id={}", manga.url, chat_id);
            return Ok(Outcome::AlreadySubscribed(manga));
        }

        let latest = self.source.find_recent_chapters(&manga.url, 1).await?.into_iter().next();
        match latest {
            Some(chapter) => {
                let resolved = ResolvedManga::new(manga, chapter);
                self.repo.upsert_manga(&resolved.to_manga(), chat_id)?;
                log::info!("Subscribed to {} at {:?} chat_id={}", resolved.url, resolved.chapter.title, chat_id);
                **session = Session::AwaitingAction {
                    manga: resolved.clone(),
                };
                Ok(Outcome::Subscribed(resolved))
            }
            None => {
                self.repo.upsert_manga(&manga, chat_id)?;
                log::info!("Subscribed to {} without chapters chat_id={}", manga.url, chat_id);
                Ok(Outcome::SubscribedWithoutChapter(manga))
            }
        }
    }

    async fn act(&self, chat_id: ChatId, manga: ResolvedManga, text: &str) -> Result<Outcome, FlowError> {
        match Action::parse(text) {
            Action::Download => {
                let images = self.source.find_chapter_images(&manga.chapter.url).await?;
                let document = self.renderer.render(&manga, &images).await?;
                log::info!("Delivering {} chat_id={}", document.file_name, chat_id);
                Ok(Outcome::Delivered { manga, document })
            }
            Action::ReadOnline => Ok(Outcome::ReadOnline(manga)),
            Action::DoNothing => Ok(Outcome::Dismissed(manga)),
            Action::Invalid => Err(FlowError::InvalidAction(text.trim().to_string())),
        }
    }
}
