pub mod cancel;
pub mod image;
pub mod llm;
pub mod models;
pub mod persona;
pub mod session;

pub use cancel::CancelToken;
pub use models::ModelId;
pub use session::{
    Fragments, SessionConfig, SessionError, SessionHandle, SessionState, StreamRequest,
    StreamingChatSession,
};
