//! # Kernel Events
//!
//! Immutable facts emitted by the pipeline in response to a command. Every
//! event refers back to its originating [`KernelCommand`]; for one command the
//! events form an ordered log that always ends with exactly one terminal
//! event ([`EventPayload::CommandSucceeded`] or [`EventPayload::CommandFailed`]).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    command::KernelCommand,
    display::SlotId,
    formatting::FormattedValue,
    value::Value,
    value_store::ValueInfo,
};

/// Why a command failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
pub enum FailureKind {
    /// The engine raised an error while running the code.
    Execution,
    /// A requested value, name, or MIME type does not exist.
    NotFound,
    /// The command was cancelled or ran past its timeout.
    Cancelled,
    /// The pipeline itself could not complete the command.
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize, strum::EnumDiscriminants)]
#[strum_discriminants(name(EventKind), derive(strum::Display, Hash))]
#[serde(tag = "type")]
pub enum EventPayload {
    CodeSubmissionReceived {
        code: String,
    },
    CompleteCodeSubmissionReceived {
        code: String,
    },
    /// The submission needs more input; it was not executed.
    IncompleteCodeSubmissionReceived {
        code: String,
    },
    StandardOutputValueProduced {
        formatted_values: Vec<FormattedValue>,
    },
    StandardErrorValueProduced {
        formatted_values: Vec<FormattedValue>,
    },
    DisplayedValueProduced {
        slot: SlotId,
        value: Value,
        formatted_values: Vec<FormattedValue>,
    },
    DisplayedValueUpdated {
        slot: SlotId,
        value: Value,
        formatted_values: Vec<FormattedValue>,
    },
    ValueInfosProduced {
        value_infos: Vec<ValueInfo>,
    },
    ValueProduced {
        name: String,
        value: Value,
        formatted_value: FormattedValue,
    },
    CommandSucceeded,
    CommandFailed {
        kind: FailureKind,
        message: String,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        EventKind::from(self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventPayload::CommandSucceeded | EventPayload::CommandFailed { .. }
        )
    }

    /// Concatenated content of the formatted values with the given MIME type.
    pub fn formatted_text(&self, mime_type: &str) -> Option<String> {
        let values = match self {
            EventPayload::StandardOutputValueProduced { formatted_values }
            | EventPayload::StandardErrorValueProduced { formatted_values }
            | EventPayload::DisplayedValueProduced {
                formatted_values, ..
            }
            | EventPayload::DisplayedValueUpdated {
                formatted_values, ..
            } => formatted_values,
            EventPayload::ValueProduced {
                formatted_value, ..
            } => std::slice::from_ref(formatted_value),
            _ => return None,
        };
        values
            .iter()
            .find(|fv| fv.mime_type == mime_type)
            .map(|fv| fv.value.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KernelEvent {
    pub command: Arc<KernelCommand>,
    #[serde(flatten)]
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
}

impl KernelEvent {
    pub fn new(command: &Arc<KernelCommand>, payload: EventPayload) -> Self {
        Self {
            command: command.clone(),
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

/// The ordered events one command produced.
#[derive(Debug, Clone)]
pub struct KernelCommandResult {
    pub command: Arc<KernelCommand>,
    pub events: Vec<KernelEvent>,
}

impl KernelCommandResult {
    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.iter().map(KernelEvent::kind).collect()
    }

    pub fn terminal(&self) -> Option<&EventPayload> {
        self.events
            .last()
            .map(|event| &event.payload)
            .filter(|payload| payload.is_terminal())
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.terminal(), Some(EventPayload::CommandSucceeded))
    }

    pub fn failure(&self) -> Option<(FailureKind, &str)> {
        match self.terminal() {
            Some(EventPayload::CommandFailed { kind, message }) => Some((*kind, message.as_str())),
            _ => None,
        }
    }

    pub fn is_incomplete(&self) -> bool {
        self.events
            .iter()
            .any(|event| event.kind() == EventKind::IncompleteCodeSubmissionReceived)
    }

    /// Plain-text content of every standard output chunk, in order.
    pub fn standard_output(&self) -> Vec<String> {
        self.events
            .iter()
            .filter(|event| event.kind() == EventKind::StandardOutputValueProduced)
            .filter_map(|event| event.payload.formatted_text(crate::formatting::PLAIN_TEXT))
            .collect()
    }

    pub fn value_infos(&self) -> Option<&[ValueInfo]> {
        self.events.iter().find_map(|event| match &event.payload {
            EventPayload::ValueInfosProduced { value_infos } => Some(value_infos.as_slice()),
            _ => None,
        })
    }

    pub fn value(&self) -> Option<&Value> {
        self.events.iter().find_map(|event| match &event.payload {
            EventPayload::ValueProduced { value, .. } => Some(value),
            _ => None,
        })
    }
}
