//! Inbound message routing
//!
//! [`Orchestrator`] turns chat messages into repository calls and
//! conversation transitions, and answers through a [`ChatTransport`].

use crate::conversation::{Action, Conversation, FlowError, Outcome, GENERIC_FAILURE};
use crate::db::Repository;
use crate::helpers::{format_release_date, UNKNOWN_DATE};
use crate::models::{sort_manga_by_recent_chapter, ChatId, Manga};
use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use std::sync::{Arc, OnceLock};

#[derive(Debug, thiserror::Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

/// Outbound side of the chat service
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send a message, optionally with a one-time reply keyboard (one button per row)
    async fn send_text(&self, chat_id: ChatId, text: &str, keyboard: Option<&[String]>) -> Result<(), TransportError>;

    async fn send_document(&self, chat_id: ChatId, file_name: &str, bytes: Vec<u8>) -> Result<(), TransportError>;

    /// Send a message and remove any reply keyboard
    async fn remove_keyboard(&self, chat_id: ChatId, text: &str) -> Result<(), TransportError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Register,
    Info,
    Help,
    Add(String),
    List,
    Cancel,
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Command(Command),
    Text(String),
}

fn command_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    // `/name`, `/name@bot`, optionally followed by arguments
    RE.get_or_init(|| Regex::new(r"(?s)^/([A-Za-z0-9_]+)(?:@[A-Za-z0-9_]+)?(?:\s+(.*))?$").ok())
        .as_ref()
}

pub fn parse_message(text: &str) -> Inbound {
    let trimmed = text.trim();
    let caps = match command_regex().and_then(|re| re.captures(trimmed)) {
        Some(caps) => caps,
        None => return Inbound::Text(text.to_string()),
    };
    let name = caps.get(1).map(|m| m.as_str().to_lowercase()).unwrap_or_default();
    let args = caps.get(2).map(|m| m.as_str().trim().to_string()).unwrap_or_default();

    let command = match name.as_str() {
        "start" => Command::Start,
        "register" => Command::Register,
        "info" => Command::Info,
        "help" => Command::Help,
        "add" => Command::Add(args),
        "list" => Command::List,
        "cancel" => Command::Cancel,
        _ => Command::Unknown(name),
    };
    Inbound::Command(command)
}

const REGISTRATION_FAILED: &str = "There was a problem with the server and you cannot be notified by the bot in the future.\nTry again by inserting the command /start again.";
const ADD_USAGE: &str = "to add a manga, use /add <manga name>";
const EMPTY_LIST: &str = "You are not subscribed to any manga yet. Use /add <manga name>";

pub fn info_text(source_name: &str) -> String {
    format!(
        "Welcome to manga_notify!\n\
         Here you can keep track of your favourite mangas published on {source}.\n\
         You can also download the latest chapter or read it directly on {source}.\n\
         Subscribe to a manga, and as soon as a new chapter is out on {source} you will be notified via this bot.\n\
         \n\
         Commands:\n\
         /info - Show this help message\n\
         /register - Register yourself to get updates. You are registered automatically when you start the chat (only your chat id is stored). Use this command if you have problems.\n\
         /add <manga name> - Add a manga to your subscription list\n\
         /list - List the mangas you are subscribed to\n\
         /cancel - Abort the current /add conversation",
        source = source_name
    )
}

/// `/list` body, most recently updated first
pub fn format_manga_list(mangas: &[Manga]) -> String {
    if mangas.is_empty() {
        return EMPTY_LIST.to_string();
    }
    let mut sorted = mangas.to_vec();
    sort_manga_by_recent_chapter(&mut sorted);
    let now = Utc::now();
    sorted
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let released = m
                .last_chapter
                .as_ref()
                .map(|c| format_release_date(c.released_at, now))
                .unwrap_or_else(|| UNKNOWN_DATE.to_string());
            format!("{}. {}.\nLast chapter on: {}", i + 1, m.title, released)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[derive(Clone)]
pub struct Orchestrator {
    conversation: Conversation,
    repo: Repository,
    transport: Arc<dyn ChatTransport>,
    source_name: String,
}

impl Orchestrator {
    pub fn new(
        conversation: Conversation,
        repo: Repository,
        transport: Arc<dyn ChatTransport>,
        source_name: impl Into<String>,
    ) -> Self {
        Self {
            conversation,
            repo,
            transport,
            source_name: source_name.into(),
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Handle one inbound text message from `chat_id`
    pub async fn handle(&self, chat_id: ChatId, text: &str) {
        match parse_message(text) {
            Inbound::Command(command) => {
                log::info!("Command {:?} chat_id={}", command, chat_id);
                self.handle_command(chat_id, command).await
            }
            Inbound::Text(text) => {
                let result = self.conversation.handle_text(chat_id, &text).await;
                self.report(chat_id, result).await
            }
        }
    }

    async fn handle_command(&self, chat_id: ChatId, command: Command) {
        match command {
            Command::Start => {
                self.say(chat_id, &info_text(&self.source_name)).await;
                self.register(chat_id).await;
            }
            Command::Register => self.register(chat_id).await,
            Command::Info | Command::Help => self.say(chat_id, &info_text(&self.source_name)).await,
            Command::Add(query) => self.add(chat_id, &query).await,
            Command::List => self.list(chat_id).await,
            Command::Cancel => {
                self.conversation.cancel(chat_id).await;
                self.clear_keyboard(chat_id, "Conversation cancelled. Insert a new command").await;
            }
            Command::Unknown(name) => {
                self.say(chat_id, &format!("Unknown command /{}. Use /help to see what I can do.", name))
                    .await
            }
        }
    }

    async fn register(&self, chat_id: ChatId) {
        match self.repo.upsert_user(chat_id) {
            Ok(true) => self.say(chat_id, "you registered yourself successfully").await,
            Ok(false) => {
                log::info!("User already registered chat_id={}", chat_id);
                self.say(chat_id, "you are already registered").await
            }
            Err(e) => {
                log::error!("Registration failed chat_id={}: {}", chat_id, e);
                self.say(chat_id, REGISTRATION_FAILED).await
            }
        }
    }

    async fn add(&self, chat_id: ChatId, query: &str) {
        if query.trim().is_empty() {
            self.say(chat_id, ADD_USAGE).await;
            return;
        }
        // subscriptions need the user row
        if let Err(e) = self.repo.upsert_user(chat_id) {
            log::error!("Could not register chat_id={} before /add: {}", chat_id, e);
            self.say(chat_id, GENERIC_FAILURE).await;
            return;
        }
        let result = self.conversation.start_search(chat_id, query).await;
        self.report(chat_id, result).await
    }

    async fn list(&self, chat_id: ChatId) {
        match self.repo.find_subscribed(chat_id) {
            Ok(mangas) => {
                log::info!("Sending list of {} mangas chat_id={}", mangas.len(), chat_id);
                self.say(chat_id, &format_manga_list(&mangas)).await
            }
            Err(e) => {
                log::error!("Listing subscriptions failed chat_id={}: {}", chat_id, e);
                self.say(chat_id, "there was an error, could not find the list of mangas").await
            }
        }
    }

    fn release_notice(&self, title: &str) -> String {
        format!(
            "You will get a message when the last chapter of {} is released on {}",
            title, self.source_name
        )
    }

    async fn report(&self, chat_id: ChatId, result: Result<Outcome, FlowError>) {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(FlowError::NoActiveSession) => {
                log::debug!("Text without conversation chat_id={}", chat_id);
                self.say(chat_id, &FlowError::NoActiveSession.user_message()).await;
                return;
            }
            Err(e) => {
                log::error!("Add flow aborted chat_id={}: {}", chat_id, e);
                self.clear_keyboard(chat_id, &e.user_message()).await;
                return;
            }
        };

        match outcome {
            Outcome::CandidatesFound { query, candidates } => {
                let titles: Vec<String> = candidates.into_iter().map(|m| m.title).collect();
                self.say_with_keyboard(chat_id, &format!("You have chosen: {}", query), &titles)
                    .await
            }
            Outcome::NoCandidates { query } => {
                let text = format!("No manga matching \"{}\" was found on {}.", query, self.source_name);
                self.say(chat_id, &text).await
            }
            Outcome::AlreadySubscribed(_) => {
                self.clear_keyboard(chat_id, "You are already subscribed on this manga").await
            }
            Outcome::Subscribed(manga) => {
                let summary = format!(
                    "📚 {}\n📖 Latest Chapter: {}\n📅 Released: {}\n\nWhat would you like to do?",
                    manga.title,
                    manga.chapter.title,
                    format_release_date(manga.chapter.released_at, Utc::now())
                );
                self.clear_keyboard(chat_id, &summary).await;
                let actions: Vec<String> = Action::labels().iter().map(|s| s.to_string()).collect();
                self.say_with_keyboard(chat_id, "Please choose an action:", &actions).await
            }
            Outcome::SubscribedWithoutChapter(manga) => {
                let text = format!(
                    "{} has no chapters on {} yet. You will get a message when the first one is released.",
                    manga.title, self.source_name
                );
                self.clear_keyboard(chat_id, &text).await
            }
            Outcome::Delivered { manga, document } => {
                if let Err(e) = self
                    .transport
                    .send_document(chat_id, &document.file_name, document.bytes)
                    .await
                {
                    log::error!("Sending {} failed chat_id={}: {}", document.file_name, chat_id, e);
                    self.clear_keyboard(chat_id, GENERIC_FAILURE).await;
                    return;
                }
                self.clear_keyboard(chat_id, &self.release_notice(&manga.title)).await
            }
            Outcome::ReadOnline(manga) => {
                self.clear_keyboard(chat_id, &manga.chapter.url).await;
                self.say(chat_id, &self.release_notice(&manga.title)).await
            }
            Outcome::Dismissed(manga) => self.clear_keyboard(chat_id, &self.release_notice(&manga.title)).await,
        }
    }

    async fn say(&self, chat_id: ChatId, text: &str) {
        if let Err(e) = self.transport.send_text(chat_id, text, None).await {
            log::error!("Error sending message chat_id={}: {}", chat_id, e);
        }
    }

    async fn say_with_keyboard(&self, chat_id: ChatId, text: &str, buttons: &[String]) {
        if let Err(e) = self.transport.send_text(chat_id, text, Some(buttons)).await {
            log::error!("Error sending keyboard chat_id={}: {}", chat_id, e);
        }
    }

    async fn clear_keyboard(&self, chat_id: ChatId, text: &str) {
        if let Err(e) = self.transport.remove_keyboard(chat_id, text).await {
            log::error!("Error removing keyboard chat_id={}: {}", chat_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chapter;
    use crate::render::{Document, DocumentRenderer, RenderError};
    use crate::session::ResolvedManga;
    use crate::sources::{ContentSource, SharedSource, SourceError};
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone};
    use reqwest::Url;
    use std::sync::Mutex;
    use std::time::Duration;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_message("/start"), Inbound::Command(Command::Start));
        assert_eq!(parse_message("/add Naruto"), Inbound::Command(Command::Add("Naruto".into())));
        assert_eq!(
            parse_message("/add@manga_notify_bot   One Piece  "),
            Inbound::Command(Command::Add("One Piece".into()))
        );
        assert_eq!(parse_message("/add"), Inbound::Command(Command::Add(String::new())));
        assert_eq!(parse_message("/LIST"), Inbound::Command(Command::List));
        assert_eq!(parse_message("/dance"), Inbound::Command(Command::Unknown("dance".into())));
        assert_eq!(parse_message("Naruto"), Inbound::Text("Naruto".into()));
        assert_eq!(parse_message("Read Online"), Inbound::Text("Read Online".into()));
    }

    #[test]
    fn test_format_manga_list() {
        assert_eq!(format_manga_list(&[]), EMPTY_LIST);

        let old = Chapter::new("Ch 1", "https://weebcentral.com/chapters/1", Utc.with_ymd_and_hms(2006, 1, 2, 0, 0, 0).unwrap());
        let fresh = Chapter::new("Ch 2", "https://weebcentral.com/chapters/2", Utc::now() - ChronoDuration::hours(2));
        let undated = Chapter::new("Ch 5", "https://weebcentral.com/chapters/5", DateTime::<Utc>::default());
        let list = vec![
            Manga::new("Unknown Manga", "https://weebcentral.com/series/3"),
            Manga::new("Undated Manga", "https://weebcentral.com/series/4").with_last_chapter(undated),
            Manga::new("Old Manga", "https://weebcentral.com/series/1").with_last_chapter(old),
            Manga::new("Fresh Manga", "https://weebcentral.com/series/2").with_last_chapter(fresh),
        ];
        assert_eq!(
            format_manga_list(&list),
            "1. Fresh Manga.\nLast chapter on: 2 hours ago\n\n\
             2. Old Manga.\nLast chapter on: January 2, 2006\n\n\
             3. Undated Manga.\nLast chapter on: unknown\n\n\
             4. Unknown Manga.\nLast chapter on: unknown"
        );
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Sent {
        Text(String, Option<Vec<String>>),
        Document(String),
        RemoveKeyboard(String),
    }

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<Sent>>,
    }

    impl RecordingTransport {
        fn take(&self) -> Vec<Sent> {
            std::mem::take(&mut *self.sent.lock().unwrap())
        }
    }

    #[async_trait]
    impl ChatTransport for RecordingTransport {
        async fn send_text(&self, _: ChatId, text: &str, keyboard: Option<&[String]>) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(Sent::Text(text.to_string(), keyboard.map(|k| k.to_vec())));
            Ok(())
        }
        async fn send_document(&self, _: ChatId, file_name: &str, _: Vec<u8>) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(Sent::Document(file_name.to_string()));
            Ok(())
        }
        async fn remove_keyboard(&self, _: ChatId, text: &str) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(Sent::RemoveKeyboard(text.to_string()));
            Ok(())
        }
    }

    /// Source that only knows a fixed search result; everything else is offline
    struct OfflineSource {
        base: Url,
        catalog: Option<Vec<Manga>>,
    }

    impl ContentSource for OfflineSource {
        fn base_url(&self) -> &Url {
            &self.base
        }
        fn open(&mut self) -> Result<(), SourceError> {
            Err(SourceError::SourceUnavailable("offline".into()))
        }
        fn close(&mut self) {}
        fn find_candidates(&mut self, _: &str) -> Result<Vec<Manga>, SourceError> {
            self.catalog
                .clone()
                .ok_or_else(|| SourceError::SourceUnavailable("offline".into()))
        }
        fn find_recent_chapters(&mut self, _: &str, _: usize) -> Result<Vec<Chapter>, SourceError> {
            Err(SourceError::SourceUnavailable("offline".into()))
        }
        fn find_chapter_images(&mut self, _: &str) -> Result<Vec<String>, SourceError> {
            Err(SourceError::SourceUnavailable("offline".into()))
        }
    }

    struct NoRenderer;

    #[async_trait]
    impl DocumentRenderer for NoRenderer {
        async fn render(&self, _: &ResolvedManga, _: &[String]) -> Result<Document, RenderError> {
            Err(RenderError::NoImages)
        }
    }

    fn orchestrator() -> (Orchestrator, Arc<RecordingTransport>, Repository) {
        orchestrator_with_catalog(None)
    }

    fn orchestrator_with_catalog(catalog: Option<Vec<Manga>>) -> (Orchestrator, Arc<RecordingTransport>, Repository) {
        let repo = Repository::open_in_memory().unwrap();
        let source = SharedSource::new(
            OfflineSource {
                base: Url::parse("https://weebcentral.com").unwrap(),
                catalog,
            },
            Duration::from_secs(1),
        );
        let conversation = Conversation::new(source, repo.clone(), Arc::new(NoRenderer));
        let transport = Arc::new(RecordingTransport::default());
        let bot = Orchestrator::new(conversation, repo.clone(), transport.clone(), "WeebCentral");
        (bot, transport, repo)
    }

    #[tokio::test]
    async fn test_start_shows_info_and_registers_once() {
        let (bot, transport, repo) = orchestrator();
        bot.handle(ChatId(1), "/start").await;
        let sent = transport.take();
        assert_eq!(sent.len(), 2);
        assert!(matches!(&sent[0], Sent::Text(t, None) if t.contains("/add <manga name>")));
        assert_eq!(sent[1], Sent::Text("you registered yourself successfully".into(), None));
        assert!(repo.find_user(ChatId(1)).unwrap().is_some());

        bot.handle(ChatId(1), "/register").await;
        assert_eq!(transport.take(), vec![Sent::Text("you are already registered".into(), None)]);
    }

    #[tokio::test]
    async fn test_add_without_query_shows_usage() {
        let (bot, transport, repo) = orchestrator();
        bot.handle(ChatId(1), "/add   ").await;
        assert_eq!(transport.take(), vec![Sent::Text(ADD_USAGE.into(), None)]);
        assert!(repo.find_user(ChatId(1)).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unavailable_source_reports_generic_failure() {
        let (bot, transport, _) = orchestrator();
        bot.handle(ChatId(1), "/add Naruto").await;
        assert_eq!(transport.take(), vec![Sent::RemoveKeyboard(GENERIC_FAILURE.into())]);
        assert!(bot.conversation().sessions().state(ChatId(1)).await.is_none());
    }

    #[tokio::test]
    async fn test_add_offers_candidates_as_keyboard() {
        let naruto = Manga::new("Naruto", "https://weebcentral.com/series/01J76XY7E9FNDZ1DBBM6PBJPFK/Naruto");
        let (bot, transport, _) = orchestrator_with_catalog(Some(vec![naruto]));
        bot.handle(ChatId(1), "/add  Naruto ").await;
        assert_eq!(
            transport.take(),
            vec![Sent::Text("You have chosen: Naruto".into(), Some(vec!["Naruto".into()]))]
        );
    }

    #[tokio::test]
    async fn test_add_without_results_names_the_query() {
        let (bot, transport, _) = orchestrator_with_catalog(Some(vec![]));
        bot.handle(ChatId(1), "/add Berserk").await;
        assert_eq!(
            transport.take(),
            vec![Sent::Text("No manga matching \"Berserk\" was found on WeebCentral.".into(), None)]
        );
        assert!(bot.conversation().sessions().state(ChatId(1)).await.is_none());
    }

    #[tokio::test]
    async fn test_list_and_cancel() {
        let (bot, transport, _) = orchestrator();
        bot.handle(ChatId(1), "/list").await;
        bot.handle(ChatId(1), "/cancel").await;
        assert_eq!(
            transport.take(),
            vec![
                Sent::Text(EMPTY_LIST.into(), None),
                Sent::RemoveKeyboard("Conversation cancelled. Insert a new command".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_free_text_without_flow() {
        let (bot, transport, _) = orchestrator();
        bot.handle(ChatId(1), "hello").await;
        assert_eq!(
            transport.take(),
            vec![Sent::Text(FlowError::NoActiveSession.user_message(), None)]
        );
    }
}
