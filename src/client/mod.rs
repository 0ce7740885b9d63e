pub mod consumer;
pub mod decoder;
pub mod session;

pub use consumer::{ FlushPolicy, StreamConsumer, StreamOutcome };
pub use decoder::FrameDecoder;
pub use session::{ ChatSession, SessionStatus };

use thiserror::Error;
use crate::history::StoreError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("a response is already in progress")]
    Busy,
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {message}")]
    Status {
        status: u16,
        message: String,
    },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
