pub mod aiml;
pub mod config;
pub mod groq;

pub use aiml::{AimlConfig, AimlImageClient};
pub use config::FileConfig;
pub use groq::{GroqClient, GroqConfig};
