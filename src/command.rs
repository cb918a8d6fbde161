use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Globally unique identity of a submitted command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandToken(String);

impl CommandToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CommandToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CommandToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, strum::Display)]
#[serde(tag = "type")]
pub enum CommandKind {
    SubmitCode {
        code: String,
    },
    RequestValueInfos,
    RequestValue {
        name: String,
        mime_type: Option<String>,
    },
}

/// A request to the kernel. Immutable once issued; every event produced in
/// response refers back to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelCommand {
    pub token: CommandToken,
    #[serde(flatten)]
    pub kind: CommandKind,
}

impl KernelCommand {
    pub fn new(kind: CommandKind) -> Self {
        Self {
            token: CommandToken::new(),
            kind,
        }
    }

    pub fn submit_code(code: impl Into<String>) -> Self {
        Self::new(CommandKind::SubmitCode { code: code.into() })
    }

    pub fn request_value_infos() -> Self {
        Self::new(CommandKind::RequestValueInfos)
    }

    pub fn request_value(name: impl Into<String>) -> Self {
        Self::new(CommandKind::RequestValue {
            name: name.into(),
            mime_type: None,
        })
    }

    pub fn request_value_as(name: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self::new(CommandKind::RequestValue {
            name: name.into(),
            mime_type: Some(mime_type.into()),
        })
    }

    pub fn code(&self) -> Option<&str> {
        match &self.kind {
            CommandKind::SubmitCode { code } => Some(code),
            _ => None,
        }
    }
}
