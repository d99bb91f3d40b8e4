//! Manga subscription tracking for one content source, served over Telegram.
//!
//! Users search the source with `/add`, pick a title, and get subscribed to
//! it; the latest chapter can then be downloaded as a CBZ or read online.

pub mod bot;
pub mod browser;
pub mod config;
pub mod conversation;
pub mod db;
pub mod helpers;
pub mod http_client;
pub mod models;
pub mod render;
pub mod session;
pub mod sources;
pub mod telegram;
