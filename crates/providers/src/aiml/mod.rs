pub mod client;
pub mod config;

pub use client::AimlImageClient;
pub use config::AimlConfig;
