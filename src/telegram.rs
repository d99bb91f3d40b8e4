use crate::bot::{ChatTransport, Orchestrator, TransportError};
use crate::models::ChatId;
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{InputFile, KeyboardButton, KeyboardMarkup, KeyboardRemove};

pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn to_telegram(chat_id: ChatId) -> teloxide::types::ChatId {
    teloxide::types::ChatId(chat_id.0)
}

fn reply_keyboard(buttons: &[String]) -> KeyboardMarkup {
    let rows: Vec<Vec<KeyboardButton>> = buttons.iter().map(|b| vec![KeyboardButton::new(b.clone())]).collect();
    KeyboardMarkup::new(rows).resize_keyboard(true).one_time_keyboard(true)
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send_text(&self, chat_id: ChatId, text: &str, keyboard: Option<&[String]>) -> Result<(), TransportError> {
        if text.is_empty() {
            log::warn!("Attempting to send empty message to chat_id={}, skipping", chat_id);
            return Ok(());
        }
        let mut request = self.bot.send_message(to_telegram(chat_id), text);
        if let Some(buttons) = keyboard {
            request = request.reply_markup(reply_keyboard(buttons));
        }
        request.await.map(|_| ()).map_err(|e| TransportError(e.to_string()))
    }

    async fn send_document(&self, chat_id: ChatId, file_name: &str, bytes: Vec<u8>) -> Result<(), TransportError> {
        let size = bytes.len();
        let file = InputFile::memory(bytes).file_name(file_name.to_string());
        self.bot
            .send_document(to_telegram(chat_id), file)
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        log::info!("Sent {} ({} bytes) to chat_id={}", file_name, size, chat_id);
        Ok(())
    }

    async fn remove_keyboard(&self, chat_id: ChatId, text: &str) -> Result<(), TransportError> {
        let text = if text.is_empty() { "Keyboard removed" } else { text };
        self.bot
            .send_message(to_telegram(chat_id), text)
            .reply_markup(KeyboardRemove::new())
            .await
            .map(|_| ())
            .map_err(|e| TransportError(e.to_string()))
    }
}

async fn handle_message(msg: Message, orchestrator: Orchestrator) -> ResponseResult<()> {
    if let Some(text) = msg.text() {
        orchestrator.handle(ChatId(msg.chat.id.0), text).await;
    }
    Ok(())
}

/// Receive updates until the process is interrupted
pub async fn run(bot: Bot, orchestrator: Orchestrator) {
    let handler = Update::filter_message().endpoint(handle_message);

    log::info!("Starting the bot");
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![orchestrator])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
    log::info!("Bot stopped");
}
