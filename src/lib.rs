/// Shorts Drop Bot Library
///
/// Periodically picks a fresh YouTube short, captions it and posts it to a chat
/// group, with a small web dashboard for pairing and manual sends.

pub mod bot;
pub mod breaker;
pub mod caption;
pub mod config;
pub mod courier;
pub mod delivery;
pub mod downloader;
pub mod error;
pub mod events;
pub mod gate;
pub mod handlers;
pub mod http_server;
pub mod memory;
pub mod messenger;
pub mod scheduler;
pub mod selector;
pub mod session;
pub mod topics;
pub mod youtube;
