use thiserror::Error;

use crate::engine::script::parser::ParseError;
use crate::engine::EngineError;
use crate::event::EventError;
use crate::value_store::StoreError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("Event error: {0}")]
    Event(#[from] EventError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("Config error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type InternalResult<T> = Result<T, Error>;

impl Error {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Error::Internal(message.into())
    }
}
