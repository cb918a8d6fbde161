//! # Events
//!
//! Every command sent to the kernel yields an ordered log of [`KernelEvent`]s.
//! The caller receives the log as a [`KernelCommandResult`]; other observers
//! subscribe to the [`EventBus`] and see the same events as they are produced.
//!
//! ```text
//! ┌────────┐  command  ┌────────┐  events   ┌──────────┐
//! │ Caller │──────────▶│ Kernel │──────────▶│ EventBus │──▶ subscribers
//! └────────┘           └───┬────┘           └──────────┘
//!      ▲                   │
//!      └───────────────────┘
//!       KernelCommandResult
//! ```
//!
//! For a `SubmitCode` command the log reads:
//!
//! ```text
//! CodeSubmissionReceived
//! CompleteCodeSubmissionReceived | IncompleteCodeSubmissionReceived
//! (StandardOutputValueProduced | StandardErrorValueProduced
//!   | DisplayedValueProduced | DisplayedValueUpdated)*
//! CommandSucceeded | CommandFailed
//! ```

pub mod event_bus;
pub mod kernel_event;

pub use event_bus::{
    ErrorEvent, ErrorReceiver, ErrorSeverity, EventBus, EventError, EventReceiver, EventResult,
};
pub use kernel_event::{EventKind, EventPayload, FailureKind, KernelCommandResult, KernelEvent};
