//! # Execution Engines
//!
//! An [`ExecutionEngine`] runs submitted code for the kernel. The kernel never
//! looks inside the engine's host objects: whatever the engine produces reaches
//! the pipeline through an [`EngineSink`] as plain [`EngineOutput`] items,
//! and bindings are reported as `{name, value}` pairs the pipeline tags with
//! their origin.
//!
//! The engine runs cooperatively inside the command's task. Outputs are
//! forwarded as they are sent, so a long-running execution can report progress
//! before it finishes.

pub mod native;
pub mod script;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::{display::DisplayKey, value::Value, value_store::BindingOrigin};

pub use script::ScriptEngine;

/// A request to show `value` in a display slot.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayRequest {
    /// Logical identity of the display. Requests sharing a key update one
    /// slot; `None` always produces a new slot.
    pub key: Option<DisplayKey>,
    pub value: Value,
    /// The slot receives no further updates after this one.
    pub completes: bool,
}

impl DisplayRequest {
    pub fn new(value: Value) -> Self {
        Self {
            key: None,
            value,
            completes: false,
        }
    }

    pub fn keyed(key: DisplayKey, value: Value) -> Self {
        Self {
            key: Some(key),
            value,
            completes: false,
        }
    }

    pub fn completing(key: DisplayKey, value: Value) -> Self {
        Self {
            key: Some(key),
            value,
            completes: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineOutput {
    StandardOutput(String),
    StandardError(String),
    Display(DisplayRequest),
    Binding { name: String, value: Value },
}

/// Sending half of the channel an engine reports through.
#[derive(Debug, Clone)]
pub struct EngineSink {
    sender: mpsc::UnboundedSender<EngineOutput>,
}

impl EngineSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EngineOutput>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn send(&self, output: EngineOutput) -> EngineResult<()> {
        self.sender
            .send(output)
            .map_err(|_| EngineError::SinkClosed)
    }

    pub fn stdout(&self, text: impl Into<String>) -> EngineResult<()> {
        self.send(EngineOutput::StandardOutput(text.into()))
    }

    pub fn stderr(&self, text: impl Into<String>) -> EngineResult<()> {
        self.send(EngineOutput::StandardError(text.into()))
    }

    pub fn display(&self, request: DisplayRequest) -> EngineResult<()> {
        self.send(EngineOutput::Display(request))
    }

    pub fn binding(&self, name: impl Into<String>, value: Value) -> EngineResult<()> {
        self.send(EngineOutput::Binding {
            name: name.into(),
            value,
        })
    }
}

#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Runs `code`, reporting everything it produces through `sink`.
    ///
    /// `origin` tells the engine whether the user typed the code. Profile
    /// code must not show up in session history.
    async fn execute(&self, code: &str, origin: BindingOrigin, sink: EngineSink)
        -> EngineResult<()>;

    /// Drops all engine-side session state.
    async fn reset(&self) {}
}

#[cfg_attr(test, mockall::automock)]
pub trait CompletenessChecker: Send + Sync {
    /// Whether `code` is a complete unit that can run, as opposed to a
    /// fragment still being typed.
    fn is_complete(&self, code: &str) -> bool;
}

/// Treats every submission as complete.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysComplete;

impl CompletenessChecker for AlwaysComplete {
    fn is_complete(&self, _code: &str) -> bool {
        true
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Raised by the executed code itself; the message is surfaced verbatim.
    #[error("{message}")]
    Runtime { message: String },

    #[error("{0}")]
    Parse(#[from] script::parser::ParseError),

    #[error("The term '{name}' is not recognized as a name of a cmdlet, function, script file, or executable program.")]
    CommandNotFound { name: String },

    #[error("Cannot bind parameter '{parameter}' of '{command}': {message}")]
    InvalidArgument {
        command: String,
        parameter: String,
        message: String,
    },

    #[error("Native command '{program}' failed: {message}")]
    Native { program: String, message: String },

    #[error("Engine output channel closed")]
    SinkClosed,
}

impl EngineError {
    pub fn runtime(message: impl Into<String>) -> Self {
        EngineError::Runtime {
            message: message.into(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
