use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config as LogConfig, Root};
use log4rs::encode::pattern::PatternEncoder;
use manga_notify::bot::Orchestrator;
use manga_notify::config::Config;
use manga_notify::conversation::Conversation;
use manga_notify::db::Repository;
use manga_notify::render::CbzRenderer;
use manga_notify::sources::{SharedSource, WeebCentralSource};
use manga_notify::telegram::{self, TelegramTransport};
use std::path::Path;
use std::sync::Arc;
use teloxide::Bot;

const LOG_CONFIG: &str = "log4rs.yml";

fn init_logging() {
    if Path::new(LOG_CONFIG).exists() {
        match log4rs::init_file(LOG_CONFIG, Default::default()) {
            Ok(()) => return,
            Err(e) => eprintln!("Could not load {}: {}, logging to the console", LOG_CONFIG, e),
        }
    }

    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{d(%Y-%m-%d %H:%M:%S)} {h({l})} {t} - {m}{n}")))
        .build();
    let config = LogConfig::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(LevelFilter::Info));

    match config {
        Ok(config) => {
            if let Err(e) = log4rs::init_config(config) {
                eprintln!("Could not initialise logging: {}", e);
            }
        }
        Err(e) => eprintln!("Invalid logging configuration: {}", e),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let cfg = Config::load();
    let token = Config::telegram_token()?;

    let repo = Repository::open(&cfg.database_path)?;

    let source = SharedSource::new(WeebCentralSource::from_config(&cfg)?, cfg.source.request_timeout());
    let renderer = CbzRenderer::new(cfg.http.create_http_client()?, cfg.source.base_url.clone());
    let conversation = Conversation::new(source.clone(), repo.clone(), Arc::new(renderer));

    let bot = Bot::new(token);
    let transport = Arc::new(TelegramTransport::new(bot.clone()));
    let orchestrator = Orchestrator::new(conversation, repo, transport, cfg.source.name.clone());

    log::info!("Tracking {} at {}", cfg.source.name, cfg.source.base_url);
    telegram::run(bot, orchestrator).await;

    if let Err(e) = source.close().await {
        log::warn!("Closing the browsing session failed: {}", e);
    }
    Ok(())
}
